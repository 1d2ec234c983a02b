// Copyright (C) 2026 The virtio-split-queue Authors. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0 AND BSD-3-Clause

use core::ptr;

use log::trace;
use memory_addr::PhysAddr;
use virtio_bindings::bindings::virtio_ring::VRING_DESC_F_NEXT;

use crate::desc::{BufferType, RawDescriptor};
use crate::dma::DmaAllocator;
use crate::queue::{LockedQueue, Queue};
use crate::ring::RingMemory;

/// Where a chain found in the descriptor table ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ChainExtent {
    pub end: u16,
    pub length: u16,
    pub has_device_writable: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ChainState {
    Empty,
    Building,
    Draining,
}

/// A chain of descriptors, either being built for submission or returned by the device.
///
/// Every call that touches descriptors takes the [`LockedQueue`] of the queue the chain was
/// created for. A chain built with [`new`](Self::new) is filled with
/// [`add_buffer_to_chain`](Self::add_buffer_to_chain) and then handed to the device with
/// [`submit_to_queue`](Self::submit_to_queue). A chain returned by
/// [`LockedQueue::pop_used_buffer_chain`] is inspected and then given back with
/// [`release_buffer_slots_to_queue`](Self::release_buffer_slots_to_queue).
///
/// Slots are not returned on drop, since that would need the lock. A chain that is dropped
/// while it is not empty leaks its slots.
#[derive(Debug)]
#[must_use = "a non-empty chain holds descriptor slots until it is submitted or released"]
pub struct QueueChain<'q, A: DmaAllocator> {
    queue: &'q Queue<A>,
    state: ChainState,
    start: Option<u16>,
    end: Option<u16>,
    length: u16,
    has_device_writable: bool,
}

impl<'q, A: DmaAllocator> QueueChain<'q, A> {
    /// Creates an empty chain for `queue`.
    pub fn new(queue: &'q Queue<A>) -> Self {
        QueueChain {
            queue,
            state: ChainState::Empty,
            start: None,
            end: None,
            length: 0,
            has_device_writable: false,
        }
    }

    pub(crate) fn drained(queue: &'q Queue<A>, head: u16, extent: ChainExtent) -> Self {
        QueueChain {
            queue,
            state: ChainState::Draining,
            start: Some(head),
            end: Some(extent.end),
            length: extent.length,
            has_device_writable: extent.has_device_writable,
        }
    }

    /// The queue this chain belongs to.
    pub fn queue(&self) -> &'q Queue<A> {
        self.queue
    }

    /// Whether the chain holds no slots.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Number of descriptors in the chain.
    pub fn length(&self) -> u16 {
        self.length
    }

    /// Index of the first descriptor.
    pub fn start_index(&self) -> Option<u16> {
        self.start
    }

    /// Index of the last descriptor.
    pub fn end_index(&self) -> Option<u16> {
        self.end
    }

    /// Whether any descriptor of the chain is device writable.
    pub fn has_device_writable_buffer(&self) -> bool {
        self.has_device_writable
    }

    /// Appends a buffer at the end of the chain.
    ///
    /// Device readable buffers must all come before device writable ones. Returns `false`
    /// without changing anything when the queue has no free slot left, in which case the
    /// caller can submit what it has or wait for completions.
    pub fn add_buffer_to_chain(
        &mut self,
        locked: &mut LockedQueue<'_, A>,
        address: PhysAddr,
        length: u32,
        buffer_type: BufferType,
    ) -> bool {
        self.check_queue(locked);
        assert!(
            self.state != ChainState::Draining,
            "cannot add buffers to a chain returned by the device"
        );
        assert!(
            !(buffer_type == BufferType::DeviceReadable && self.has_device_writable),
            "device readable buffers must precede device writable buffers"
        );

        let Some(slot) = locked.take_free_slot() else {
            return false;
        };

        let ring = locked.ring();
        ring.write_descriptor(
            slot,
            RawDescriptor::new(address.as_usize() as u64, length, buffer_type.flags(), 0),
        );
        match self.end {
            Some(prev) => {
                let desc = ring.read_descriptor(prev);
                ring.write_descriptor(
                    prev,
                    RawDescriptor::new(
                        desc.addr(),
                        desc.len(),
                        desc.flags() | VRING_DESC_F_NEXT as u16,
                        slot,
                    ),
                );
            }
            None => self.start = Some(slot),
        }

        self.end = Some(slot);
        self.length += 1;
        self.state = ChainState::Building;
        if buffer_type == BufferType::DeviceWritable {
            self.has_device_writable = true;
        }

        true
    }

    /// Publishes the chain to the device and leaves `self` empty.
    ///
    /// The slots belong to the device until the chain comes back through
    /// [`LockedQueue::pop_used_buffer_chain`]. Whether the device has to be notified is
    /// answered by [`LockedQueue::should_notify`].
    pub fn submit_to_queue(&mut self, locked: &mut LockedQueue<'_, A>) {
        self.check_queue(locked);
        let start = match (self.state, self.start) {
            (ChainState::Building, Some(start)) => start,
            _ => panic!(
                "only a non-empty chain under construction can be submitted, state {:?}",
                self.state
            ),
        };

        locked.publish_chain(start);
        trace!(
            "virtio queue submit: head {} length {} writable {}",
            start,
            self.length,
            self.has_device_writable
        );

        self.reset();
    }

    /// Returns every slot of the chain to the free list and leaves `self` empty.
    ///
    /// Works for completed chains and for chains whose construction is abandoned. Calling it
    /// on an empty chain does nothing.
    pub fn release_buffer_slots_to_queue(&mut self, locked: &mut LockedQueue<'_, A>) {
        self.check_queue(locked);
        if let (Some(start), Some(end)) = (self.start, self.end) {
            locked.reclaim_buffer_chain(start, end, self.length);
        }
        self.reset();
    }

    /// Iterates over the buffers of the chain in order.
    pub fn buffers<'l>(&self, locked: &'l LockedQueue<'_, A>) -> ChainBuffers<'l, A> {
        self.check_queue(locked);
        ChainBuffers {
            ring: locked.ring(),
            next: self.start,
            remaining: self.length,
        }
    }

    fn reset(&mut self) {
        self.state = ChainState::Empty;
        self.start = None;
        self.end = None;
        self.length = 0;
        self.has_device_writable = false;
    }

    fn check_queue(&self, locked: &LockedQueue<'_, A>) {
        assert!(
            ptr::eq(self.queue, locked.queue()),
            "chain used with the lock of another queue"
        );
    }
}

/// One buffer of a chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Buffer {
    /// Physical address of the buffer.
    pub address: PhysAddr,
    /// Length in bytes.
    pub length: u32,
    /// Direction.
    pub buffer_type: BufferType,
}

/// Iterator over the buffers of a [`QueueChain`], see [`QueueChain::buffers`].
pub struct ChainBuffers<'l, A: DmaAllocator> {
    ring: &'l RingMemory<A>,
    next: Option<u16>,
    remaining: u16,
}

impl<A: DmaAllocator> Iterator for ChainBuffers<'_, A> {
    type Item = Buffer;

    fn next(&mut self) -> Option<Buffer> {
        if self.remaining == 0 {
            return None;
        }
        let index = self.next?;
        let desc = self.ring.read_descriptor(index);

        self.remaining -= 1;
        self.next = desc.has_next().then(|| desc.next());

        Some(Buffer {
            address: PhysAddr::from_usize(desc.addr() as usize),
            length: desc.len(),
            buffer_type: desc.buffer_type(),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(usize::from(self.remaining)))
    }
}
