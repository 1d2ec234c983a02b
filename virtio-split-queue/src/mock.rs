// Copyright (C) 2026 The virtio-split-queue Authors. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0 AND BSD-3-Clause

//! Utilities used by unit tests and benchmarks.
//!
//! [`HeapDma`] backs queues with ordinary heap memory whose physical address is its virtual
//! one. [`MockDevice`] plays the device side of a queue against that memory.

use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use alloc::vec::Vec;
use core::num::Wrapping;
use core::ptr::NonNull;
use core::sync::atomic::{fence, Ordering};

use axerrno::{AxError, AxResult};
use memory_addr::{PhysAddr, PAGE_SIZE_4K};
use virtio_bindings::bindings::virtio_ring::{VRING_AVAIL_F_NO_INTERRUPT, VRING_USED_F_NO_NOTIFY};

use crate::desc::{RawDescriptor, VirtqUsedElem};
use crate::dma::DmaAllocator;
use crate::queue::Queue;

/// Identity mapped allocator on top of the global heap.
#[derive(Debug)]
pub struct HeapDma;

fn heap_layout(pages: usize) -> AxResult<Layout> {
    if pages == 0 {
        return Err(AxError::InvalidInput);
    }
    let size = pages
        .checked_mul(PAGE_SIZE_4K)
        .ok_or(AxError::InvalidInput)?;
    Layout::from_size_align(size, PAGE_SIZE_4K).map_err(|_| AxError::InvalidInput)
}

// SAFETY: The memory is zeroed, page aligned and contiguous, and the identity mapping is what a
// test device reading through `MockDevice` expects.
unsafe impl DmaAllocator for HeapDma {
    fn alloc_zeroed(pages: usize) -> AxResult<(PhysAddr, NonNull<u8>)> {
        let layout = heap_layout(pages)?;
        // SAFETY: The layout has a non zero size.
        let vaddr = NonNull::new(unsafe { alloc_zeroed(layout) }).ok_or(AxError::NoMemory)?;
        Ok((PhysAddr::from_usize(vaddr.as_ptr() as usize), vaddr))
    }

    unsafe fn dealloc(_paddr: PhysAddr, vaddr: NonNull<u8>, pages: usize) {
        if let Ok(layout) = heap_layout(pages) {
            // SAFETY: The caller passes back an allocation made with the same layout.
            unsafe { dealloc(vaddr.as_ptr(), layout) }
        }
    }
}

/// Device side of a queue, driven by hand.
pub struct MockDevice<'q, A: DmaAllocator> {
    queue: &'q Queue<A>,
    next_avail: Wrapping<u16>,
    next_used: Wrapping<u16>,
}

impl<'q, A: DmaAllocator> MockDevice<'q, A> {
    /// Attaches to a freshly created `queue`.
    ///
    /// The current avail and used indices become the device's starting point, so the device
    /// must be attached before the driver submits anything. Chains published earlier are never
    /// seen by [`pop_avail`](Self::pop_avail).
    pub fn new(queue: &'q Queue<A>) -> Self {
        let ring = queue.ring();
        MockDevice {
            queue,
            next_avail: ring.avail_idx(Ordering::Acquire),
            next_used: ring.used_idx(Ordering::Relaxed),
        }
    }

    /// Current value of the driver's available index.
    pub fn avail_idx(&self) -> u16 {
        self.queue.ring().avail_idx(Ordering::Acquire).0
    }

    /// Current value of the used index.
    pub fn used_idx(&self) -> u16 {
        self.queue.ring().used_idx(Ordering::Acquire).0
    }

    /// Chain head stored in avail ring entry `position`.
    pub fn avail_slot(&self, position: u16) -> u16 {
        self.queue.ring().avail_slot(Wrapping(position))
    }

    /// Takes the next chain head the driver made available.
    pub fn pop_avail(&mut self) -> Option<u16> {
        let ring = self.queue.ring();
        if ring.avail_idx(Ordering::Acquire) == self.next_avail {
            return None;
        }
        let head = ring.avail_slot(self.next_avail);
        self.next_avail += Wrapping(1);
        Some(head)
    }

    /// Reads descriptor `index`.
    pub fn descriptor(&self, index: u16) -> RawDescriptor {
        self.queue.ring().read_descriptor(index)
    }

    /// Reads the chain starting at `head`.
    pub fn chain(&self, head: u16) -> Vec<RawDescriptor> {
        let mut descs = Vec::new();
        let mut index = head;
        loop {
            let desc = self.descriptor(index);
            descs.push(desc);
            if !desc.has_next() || descs.len() >= usize::from(self.queue.size()) {
                return descs;
            }
            index = desc.next();
        }
    }

    /// Puts the chain at `head` on the used ring, reporting `len` bytes written.
    pub fn add_used(&mut self, head: u16, len: u32) {
        let ring = self.queue.ring();
        ring.set_used_elem(self.next_used, VirtqUsedElem::new(u32::from(head), len));
        self.next_used += Wrapping(1);

        // The element must be visible before the index that publishes it.
        fence(Ordering::SeqCst);
        ring.set_used_idx(self.next_used, Ordering::Release);
    }

    /// Completes every available chain, reporting the full size of its writable buffers as
    /// written. Returns the number of chains completed.
    pub fn complete_all(&mut self) -> usize {
        let mut completed = 0;
        while let Some(head) = self.pop_avail() {
            let written = self
                .chain(head)
                .iter()
                .filter(|desc| desc.is_write_only())
                .map(|desc| desc.len())
                .sum();
            self.add_used(head, written);
            completed += 1;
        }
        completed
    }

    /// Sets or clears the device's notification suppression flag.
    pub fn set_no_notify(&self, suppress: bool) {
        let ring = self.queue.ring();
        let flags = ring.used_flags(Ordering::Relaxed);
        let flags = if suppress {
            flags | VRING_USED_F_NO_NOTIFY as u16
        } else {
            flags & !(VRING_USED_F_NO_NOTIFY as u16)
        };
        ring.set_used_flags(flags, Ordering::Release);
    }

    /// Whether the driver asked not to be interrupted.
    pub fn interrupts_suppressed(&self) -> bool {
        self.queue.ring().avail_flags(Ordering::Acquire) & VRING_AVAIL_F_NO_INTERRUPT as u16 != 0
    }
}
