// Copyright (C) 2026 The virtio-split-queue Authors. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0 AND BSD-3-Clause

use core::fmt;
use core::num::Wrapping;
use core::sync::atomic::{fence, AtomicU16, Ordering};

use log::{debug, error, trace};
use spin::{Mutex, MutexGuard};
use virtio_bindings::bindings::virtio_ring::{VRING_AVAIL_F_NO_INTERRUPT, VRING_USED_F_NO_NOTIFY};

use crate::chain::{ChainExtent, QueueChain};
use crate::defs::MAX_QUEUE_SIZE;
use crate::desc::RawDescriptor;
use crate::dma::DmaAllocator;
use crate::ring::{RingLayout, RingMemory};
use crate::{Error, Result};

/// Driver side of one split virtqueue.
///
/// The queue owns the ring memory and the descriptor free list. Everything that changes ring
/// state goes through a [`LockedQueue`] obtained from [`Queue::lock`]; only
/// [`new_data_available`](Queue::new_data_available) and
/// [`has_free_slots`](Queue::has_free_slots) can be called without the lock, as hints for
/// whether taking it is worthwhile.
///
/// The lock is a spin lock and is not reentrant. A driver that also drains the queue from its
/// interrupt handler must keep interrupts masked on the local CPU while it holds the lock, or
/// use [`try_lock`](Queue::try_lock) from the handler.
pub struct Queue<A: DmaAllocator> {
    ring: RingMemory<A>,
    notify_offset: u16,
    // Written only with the lock held, read lock free as a hint.
    free_buffers: AtomicU16,
    // Written only with the lock held, read lock free as a hint.
    used_tail: AtomicU16,
    state: Mutex<DriverState>,
}

#[derive(Debug)]
struct DriverState {
    /// Head of the descriptor free list, `None` when every slot is in flight.
    free_head: Option<u16>,
    /// Next value of the avail ring index, published after a fence.
    driver_index_shadow: Wrapping<u16>,
}

impl<A: DmaAllocator> Queue<A> {
    /// Allocates and initializes the ring memory for a queue of `queue_size` entries.
    ///
    /// `notify_offset` is the transport specific doorbell offset of this queue. It is kept
    /// for the transport and never interpreted here.
    pub fn try_create(queue_size: u16, notify_offset: u16) -> Result<Self> {
        if queue_size == 0 || queue_size > MAX_QUEUE_SIZE || !queue_size.is_power_of_two() {
            return Err(Error::InvalidSize(queue_size));
        }

        let layout = RingLayout::new(queue_size);
        let ring = RingMemory::new(layout).map_err(|err| {
            error!(
                "failed to allocate {} pages for virtio queue of size {}: {:?}",
                layout.pages(),
                queue_size,
                err
            );
            Error::DmaAlloc(err)
        })?;

        // Link every descriptor to its successor. The last one terminates the list through
        // the free count. The memory is zeroed, so both rings start empty with interrupts
        // enabled.
        for i in 0..queue_size - 1 {
            ring.write_descriptor(i, RawDescriptor::new(0, 0, 0, i + 1));
        }

        debug!(
            "virtio queue created: size {} notify offset {:#x} desc {:#x} pages {}",
            queue_size,
            notify_offset,
            ring.descriptor_area().as_usize(),
            ring.pages()
        );

        Ok(Queue {
            ring,
            notify_offset,
            free_buffers: AtomicU16::new(queue_size),
            used_tail: AtomicU16::new(0),
            state: Mutex::new(DriverState {
                free_head: Some(0),
                driver_index_shadow: Wrapping(0),
            }),
        })
    }

    /// Takes the queue lock, spinning until it is available.
    pub fn lock(&self) -> LockedQueue<'_, A> {
        LockedQueue {
            queue: self,
            state: self.state.lock(),
        }
    }

    /// Takes the queue lock if nobody holds it.
    pub fn try_lock(&self) -> Option<LockedQueue<'_, A>> {
        self.state.try_lock().map(|state| LockedQueue { queue: self, state })
    }

    /// Number of descriptors, which is also the number of entries of each ring.
    pub fn size(&self) -> u16 {
        self.ring.layout().queue_size()
    }

    /// Transport doorbell offset given at creation.
    pub fn notify_offset(&self) -> u16 {
        self.notify_offset
    }

    /// Placement of the rings inside the queue memory.
    pub fn layout(&self) -> &RingLayout {
        self.ring.layout()
    }

    /// Number of free descriptor slots. Read without the lock, so it may be stale.
    pub fn free_buffers(&self) -> u16 {
        self.free_buffers.load(Ordering::Relaxed)
    }

    /// Whether at least one descriptor slot is free. Lock free hint.
    pub fn has_free_slots(&self) -> bool {
        self.free_buffers() > 0
    }

    /// Whether the device has published completions that were not drained yet. Lock free
    /// hint, a `true` answer still has to be confirmed by
    /// [`LockedQueue::pop_used_buffer_chain`].
    pub fn new_data_available(&self) -> bool {
        let used_idx = self.ring.used_idx(Ordering::Relaxed);
        used_idx.0 != self.used_tail.load(Ordering::Relaxed)
    }

    /// Asks the device to interrupt on new completions again.
    ///
    /// Returns whether completions are already pending. Those may have been published while
    /// interrupts were suppressed and will not raise an interrupt of their own, so the caller
    /// should drain them.
    ///
    /// Takes the queue lock, so it must not be called while a [`LockedQueue`] of this queue is
    /// alive. Use [`LockedQueue::set_interrupts_enabled`] then.
    pub fn enable_interrupts(&self) -> bool {
        self.lock().set_interrupts_enabled(true);
        // Ensures the following read is not reordered before the flag update.
        fence(Ordering::SeqCst);
        self.new_data_available()
    }

    /// Asks the device not to interrupt on new completions. The device may ignore it.
    ///
    /// Takes the queue lock like [`enable_interrupts`](Self::enable_interrupts).
    pub fn disable_interrupts(&self) {
        self.lock().set_interrupts_enabled(false);
    }

    pub(crate) fn ring(&self) -> &RingMemory<A> {
        &self.ring
    }
}

impl<A: DmaAllocator> fmt::Debug for Queue<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("size", &self.size())
            .field("notify_offset", &self.notify_offset)
            .field("free_buffers", &self.free_buffers())
            .field("used_tail", &self.used_tail.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<A: DmaAllocator> Drop for Queue<A> {
    fn drop(&mut self) {
        debug!(
            "virtio queue destroyed: size {} desc {:#x}",
            self.size(),
            self.ring.descriptor_area().as_usize()
        );
    }
}

/// A [`Queue`] whose lock is held.
///
/// Holding a `LockedQueue` is the proof that the caller may touch ring state. The lock is
/// released when it is dropped.
pub struct LockedQueue<'a, A: DmaAllocator> {
    queue: &'a Queue<A>,
    state: MutexGuard<'a, DriverState>,
}

impl<'a, A: DmaAllocator> LockedQueue<'a, A> {
    /// The locked queue.
    pub fn queue(&self) -> &'a Queue<A> {
        self.queue
    }

    /// Pops a slot off the free list, or returns `None` when the queue is full.
    pub fn take_free_slot(&mut self) -> Option<u16> {
        let free = self.queue.free_buffers.load(Ordering::Relaxed);
        if free == 0 {
            return None;
        }

        let slot = self.state.free_head?;
        self.state.free_head = if free > 1 {
            Some(self.queue.ring.read_descriptor(slot).next())
        } else {
            None
        };
        self.queue.free_buffers.store(free - 1, Ordering::Relaxed);

        Some(slot)
    }

    /// Puts the chain `start..=end` of `length` slots back on the free list.
    ///
    /// The slots between `start` and `end` must still be linked through their `next` fields.
    pub fn reclaim_buffer_chain(&mut self, start: u16, end: u16, length: u16) {
        let free = self.queue.free_buffers.load(Ordering::Relaxed);
        assert!(
            length > 0 && u32::from(free) + u32::from(length) <= u32::from(self.queue.size()),
            "reclaiming {} slots into a queue of size {} with {} free slots",
            length,
            self.queue.size(),
            free
        );

        if let Some(head) = self.state.free_head {
            let desc = self.queue.ring.read_descriptor(end);
            self.queue.ring.write_descriptor(
                end,
                RawDescriptor::new(desc.addr(), desc.len(), desc.flags(), head),
            );
        }
        self.state.free_head = Some(start);
        self.queue
            .free_buffers
            .store(free + length, Ordering::Relaxed);
    }

    /// Takes the next completion off the used ring.
    ///
    /// Returns the completed chain together with the number of bytes the device reported as
    /// written, or `None` when nothing is pending. The chain's slots stay allocated until it
    /// is released with [`QueueChain::release_buffer_slots_to_queue`].
    pub fn pop_used_buffer_chain(&mut self) -> Option<(QueueChain<'a, A>, u32)> {
        if !self.queue.new_data_available() {
            return None;
        }

        // The used element must not be read before the index that published it.
        fence(Ordering::SeqCst);

        let used_tail = Wrapping(self.queue.used_tail.load(Ordering::Relaxed));
        let elem = self.queue.ring.used_elem(used_tail);
        assert!(
            elem.id() < u32::from(self.queue.size()),
            "device reported chain head {} for a queue of size {}",
            elem.id(),
            self.queue.size()
        );
        let head = elem.id() as u16;
        let extent = self.walk_chain(head);

        self.queue
            .used_tail
            .store((used_tail + Wrapping(1)).0, Ordering::Relaxed);

        trace!(
            "virtio queue used chain: head {} end {} length {} written {}",
            head,
            extent.end,
            extent.length,
            elem.len()
        );

        Some((QueueChain::drained(self.queue, head, extent), elem.len()))
    }

    /// Drains every pending completion and frees its slots without looking at it.
    ///
    /// Returns the number of chains dropped.
    pub fn discard_used_buffers(&mut self) -> usize {
        let mut discarded = 0;
        while let Some((mut chain, _)) = self.pop_used_buffer_chain() {
            chain.release_buffer_slots_to_queue(self);
            discarded += 1;
        }
        discarded
    }

    /// Whether the device wants to be notified about new available entries.
    ///
    /// Meant to be asked after a batch of submissions, to decide whether to ring the
    /// transport's doorbell.
    pub fn should_notify(&self) -> bool {
        // The avail index published by the submissions must be visible before the flags are
        // sampled, or a device that just cleared NO_NOTIFY could be missed.
        fence(Ordering::SeqCst);
        self.queue.ring.used_flags(Ordering::Relaxed) & VRING_USED_F_NO_NOTIFY as u16 == 0
    }

    /// Sets or clears the driver's interrupt suppression flag.
    pub fn set_interrupts_enabled(&mut self, enabled: bool) {
        let flags = self.queue.ring.avail_flags(Ordering::Relaxed);
        let flags = if enabled {
            flags & !(VRING_AVAIL_F_NO_INTERRUPT as u16)
        } else {
            flags | VRING_AVAIL_F_NO_INTERRUPT as u16
        };
        self.queue.ring.set_avail_flags(flags, Ordering::Relaxed);
    }

    /// Makes the chain starting at `head` visible to the device.
    pub(crate) fn publish_chain(&mut self, head: u16) {
        let slot = self.state.driver_index_shadow;
        self.queue.ring.set_avail_slot(slot, head);
        self.state.driver_index_shadow += Wrapping(1);

        // The ring slot must be visible before the index that publishes it.
        fence(Ordering::SeqCst);

        self.queue
            .ring
            .set_avail_idx(self.state.driver_index_shadow, Ordering::Release);
    }

    /// Follows the `next` links from `head` to the end of the chain.
    ///
    /// The device only reports chain heads, so this is how the driver finds out where a
    /// completed chain ends. The walk is bounded by the queue size.
    pub(crate) fn walk_chain(&self, head: u16) -> ChainExtent {
        let mut extent = ChainExtent {
            end: head,
            length: 1,
            has_device_writable: false,
        };

        loop {
            let desc = self.queue.ring.read_descriptor(extent.end);
            extent.has_device_writable |= desc.is_write_only();
            if !desc.has_next() {
                return extent;
            }
            assert!(
                extent.length < self.queue.size(),
                "descriptor chain starting at {} does not terminate",
                head
            );
            extent.end = desc.next();
            extent.length += 1;
        }
    }

    pub(crate) fn ring(&self) -> &'a RingMemory<A> {
        &self.queue.ring
    }
}

impl<A: DmaAllocator> fmt::Debug for LockedQueue<'_, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockedQueue")
            .field("queue", self.queue)
            .field("free_head", &self.state.free_head)
            .field("driver_index_shadow", &self.state.driver_index_shadow.0)
            .finish()
    }
}
