// Copyright (C) 2026 The virtio-split-queue Authors. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0 AND BSD-3-Clause

//! What a transport needs from a queue, and what a queue needs from a transport.
//!
//! Register programming is left to the transport. A queue only describes where its rings
//! live and asks for a doorbell through [`Notifier`].

use memory_addr::PhysAddr;

use crate::dma::DmaAllocator;
use crate::queue::{LockedQueue, Queue};

/// Everything a transport programs into the device to activate a queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueHandoff {
    /// Number of entries, written to the queue size register.
    pub queue_size: u16,
    /// Physical address of the descriptor table.
    pub descriptor_area: PhysAddr,
    /// Physical address of the available ring.
    pub driver_area: PhysAddr,
    /// Physical address of the used ring.
    pub device_area: PhysAddr,
    /// Doorbell offset the queue was created with.
    pub notify_offset: u16,
}

impl QueueHandoff {
    /// Splits `addr` into the low and high halves of a pair of 32 bit address registers.
    pub fn split_address(addr: PhysAddr) -> (u32, u32) {
        let addr = addr.as_usize() as u64;
        (addr as u32, (addr >> 32) as u32)
    }
}

/// Rings a queue's doorbell.
pub trait Notifier {
    /// Tells the device that new entries are available on the queue at `notify_offset`.
    fn notify(&self, notify_offset: u16);
}

impl<F: Fn(u16)> Notifier for F {
    fn notify(&self, notify_offset: u16) {
        self(notify_offset)
    }
}

impl<A: DmaAllocator> Queue<A> {
    /// Describes the queue for the transport.
    pub fn handoff(&self) -> QueueHandoff {
        let ring = self.ring();
        QueueHandoff {
            queue_size: self.size(),
            descriptor_area: ring.descriptor_area(),
            driver_area: ring.driver_area(),
            device_area: ring.device_area(),
            notify_offset: self.notify_offset(),
        }
    }
}

impl<A: DmaAllocator> LockedQueue<'_, A> {
    /// Rings the doorbell unless the device suppressed notifications.
    ///
    /// Returns whether `notifier` was called.
    pub fn notify_if_needed<N: Notifier + ?Sized>(&self, notifier: &N) -> bool {
        if !self.should_notify() {
            return false;
        }
        notifier.notify(self.queue().notify_offset());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{HeapDma, MockDevice};
    use crate::{BufferType, QueueChain, RingLayout};
    use core::cell::Cell;

    #[test]
    fn handoff_describes_ring_placement() {
        let queue = Queue::<HeapDma>::try_create(64, 7).unwrap();
        let handoff = queue.handoff();
        let layout = RingLayout::new(64);
        let base = handoff.descriptor_area.as_usize();

        assert_eq!(handoff.queue_size, 64);
        assert_eq!(handoff.notify_offset, 7);
        assert_eq!(base % 4096, 0);
        assert_eq!(handoff.driver_area.as_usize(), base + layout.avail_offset());
        assert_eq!(handoff.device_area.as_usize(), base + layout.used_offset());
        assert_eq!(handoff.device_area.as_usize() % 4, 0);
    }

    #[test]
    fn split_address_halves() {
        assert_eq!(
            QueueHandoff::split_address(PhysAddr::from_usize(0x1234_5000)),
            (0x1234_5000, 0)
        );
        #[cfg(target_pointer_width = "64")]
        assert_eq!(
            QueueHandoff::split_address(PhysAddr::from_usize(0x0000_0042_8000_1000)),
            (0x8000_1000, 0x42)
        );
    }

    #[test]
    fn doorbell_honours_device_suppression() {
        let queue = Queue::<HeapDma>::try_create(4, 3).unwrap();
        let device = MockDevice::new(&queue);
        let rung = Cell::new(None);
        let notifier = |offset: u16| rung.set(Some(offset));

        let mut locked = queue.lock();
        let mut chain = QueueChain::new(&queue);
        assert!(chain.add_buffer_to_chain(
            &mut locked,
            PhysAddr::from_usize(0x1000),
            8,
            BufferType::DeviceReadable
        ));
        chain.submit_to_queue(&mut locked);

        device.set_no_notify(true);
        assert!(!locked.notify_if_needed(&notifier));
        assert_eq!(rung.get(), None);

        device.set_no_notify(false);
        assert!(locked.notify_if_needed(&notifier));
        assert_eq!(rung.get(), Some(3));
    }

    #[test]
    fn notifier_trait_object() {
        struct Counter(Cell<u32>);

        impl Notifier for Counter {
            fn notify(&self, _notify_offset: u16) {
                self.0.set(self.0.get() + 1);
            }
        }

        let queue = Queue::<HeapDma>::try_create(2, 0).unwrap();
        let counter = Counter(Cell::new(0));
        let notifier: &dyn Notifier = &counter;
        assert!(queue.lock().notify_if_needed(notifier));
        assert_eq!(counter.0.get(), 1);
    }
}
