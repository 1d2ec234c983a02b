// Copyright (C) 2026 The virtio-split-queue Authors. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0 AND BSD-3-Clause

use core::marker::PhantomData;
use core::ptr::NonNull;

use axerrno::AxResult;
use memory_addr::{PhysAddr, PAGE_SIZE_4K};

/// Physical memory provider for ring memory.
///
/// # Safety
///
/// `alloc_zeroed` must return memory that is zero filled, 4 KiB aligned, physically
/// contiguous for all `pages` pages, mapped at `vaddr` and reachable by the device at `paddr`.
/// The memory must stay valid until it is passed back to `dealloc`.
pub unsafe trait DmaAllocator {
    /// Allocates `pages` zeroed, physically contiguous pages.
    fn alloc_zeroed(pages: usize) -> AxResult<(PhysAddr, NonNull<u8>)>;

    /// Returns pages obtained from [`alloc_zeroed`](Self::alloc_zeroed).
    ///
    /// # Safety
    ///
    /// `paddr`, `vaddr` and `pages` must come from one earlier `alloc_zeroed` call, and nothing
    /// may access the memory afterwards.
    unsafe fn dealloc(paddr: PhysAddr, vaddr: NonNull<u8>, pages: usize);
}

/// One physically contiguous allocation, returned to its allocator on drop.
#[derive(Debug)]
pub struct DmaRegion<A: DmaAllocator> {
    paddr: PhysAddr,
    vaddr: NonNull<u8>,
    pages: usize,
    _allocator: PhantomData<A>,
}

// SAFETY: The region is plain memory owned by this value; all shared accesses go through
// volatile or atomic operations in `RingMemory`.
unsafe impl<A: DmaAllocator> Send for DmaRegion<A> {}
// SAFETY: See above.
unsafe impl<A: DmaAllocator> Sync for DmaRegion<A> {}

impl<A: DmaAllocator> DmaRegion<A> {
    /// Allocates `pages` zeroed pages.
    pub fn new(pages: usize) -> AxResult<Self> {
        let (paddr, vaddr) = A::alloc_zeroed(pages)?;
        Ok(DmaRegion {
            paddr,
            vaddr,
            pages,
            _allocator: PhantomData,
        })
    }

    /// Physical address of the first byte.
    pub fn paddr(&self) -> PhysAddr {
        self.paddr
    }

    /// Virtual address of the byte at `offset`.
    pub fn vaddr(&self, offset: usize) -> NonNull<u8> {
        assert!(offset < self.len());
        // SAFETY: `offset` is inside the allocation, so the result is in bounds and non null.
        unsafe { self.vaddr.add(offset) }
    }

    /// Number of pages.
    pub fn pages(&self) -> usize {
        self.pages
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.pages * PAGE_SIZE_4K
    }

    /// Whether the region spans zero pages.
    pub fn is_empty(&self) -> bool {
        self.pages == 0
    }
}

impl<A: DmaAllocator> Drop for DmaRegion<A> {
    fn drop(&mut self) {
        // SAFETY: The values come from `A::alloc_zeroed` and the region is not used anymore.
        unsafe { A::dealloc(self.paddr, self.vaddr, self.pages) }
    }
}
