// Copyright (C) 2026 The virtio-split-queue Authors. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0 AND BSD-3-Clause

//! Ring memory shared with the device.
//!
//! The descriptor table and both rings live in memory that the device reads and writes
//! concurrently, behind the compiler's back. Two rules follow, the same ones the volatile
//! memory types of vm-memory follow:
//! 1. No references or slices to ring memory (`&` or `&mut`) are handed out.
//! 2. Every access is a volatile read or write, or an atomic load or store for the two
//!    published indices and the flag words.
//!
//! Fences are not issued here. The protocol code in `queue` and `chain` places them.

use core::num::Wrapping;
use core::ptr::{read_volatile, write_volatile};
use core::sync::atomic::{AtomicU16, Ordering};

use axerrno::AxResult;
use memory_addr::{align_up, align_up_4k, PhysAddr, PAGE_SIZE_4K};

use crate::defs::{
    VIRTQ_AVAIL_ELEMENT_SIZE, VIRTQ_AVAIL_RING_HEADER_SIZE, VIRTQ_DESCRIPTOR_SIZE,
    VIRTQ_RING_IDX_OFFSET, VIRTQ_USED_ELEMENT_SIZE, VIRTQ_USED_RING_ALIGN,
    VIRTQ_USED_RING_HEADER_SIZE,
};
use crate::desc::{RawDescriptor, VirtqUsedElem};
use crate::dma::{DmaAllocator, DmaRegion};

/// Placement of the descriptor table, available ring and used ring inside one region.
///
/// The three parts are consecutive. The used ring offset is rounded up to its natural
/// alignment and the whole region is rounded up to a page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RingLayout {
    queue_size: u16,
    avail_offset: usize,
    used_offset: usize,
    used_end: usize,
}

impl RingLayout {
    /// Computes the layout for a queue of `queue_size` entries.
    pub fn new(queue_size: u16) -> Self {
        let n = usize::from(queue_size);
        // None of these can overflow, `n` is at most u16::MAX.
        let desc_size = VIRTQ_DESCRIPTOR_SIZE * n;
        let avail_size = VIRTQ_AVAIL_RING_HEADER_SIZE + VIRTQ_AVAIL_ELEMENT_SIZE * n;
        let used_size = VIRTQ_USED_RING_HEADER_SIZE + VIRTQ_USED_ELEMENT_SIZE * n;

        let avail_offset = desc_size;
        let used_offset = align_up(avail_offset + avail_size, VIRTQ_USED_RING_ALIGN);

        RingLayout {
            queue_size,
            avail_offset,
            used_offset,
            used_end: used_offset + used_size,
        }
    }

    /// Number of descriptors and ring entries.
    pub fn queue_size(&self) -> u16 {
        self.queue_size
    }

    /// Byte offset of the available ring.
    pub fn avail_offset(&self) -> usize {
        self.avail_offset
    }

    /// Byte offset of the used ring.
    pub fn used_offset(&self) -> usize {
        self.used_offset
    }

    /// Bytes actually occupied by the three structures.
    pub fn ring_bytes(&self) -> usize {
        self.used_end
    }

    /// Bytes to allocate, a whole number of pages.
    pub fn region_size(&self) -> usize {
        align_up_4k(self.used_end)
    }

    /// Pages to allocate.
    pub fn pages(&self) -> usize {
        self.region_size() / PAGE_SIZE_4K
    }
}

/// The shared ring region of one queue.
#[derive(Debug)]
pub(crate) struct RingMemory<A: DmaAllocator> {
    region: DmaRegion<A>,
    layout: RingLayout,
}

impl<A: DmaAllocator> RingMemory<A> {
    /// Allocates zeroed memory for `layout`.
    pub fn new(layout: RingLayout) -> AxResult<Self> {
        let region = DmaRegion::new(layout.pages())?;
        Ok(RingMemory { region, layout })
    }

    pub fn layout(&self) -> &RingLayout {
        &self.layout
    }

    pub fn pages(&self) -> usize {
        self.region.pages()
    }

    pub fn descriptor_area(&self) -> PhysAddr {
        self.region.paddr()
    }

    pub fn driver_area(&self) -> PhysAddr {
        PhysAddr::from_usize(self.region.paddr().as_usize() + self.layout.avail_offset)
    }

    pub fn device_area(&self) -> PhysAddr {
        PhysAddr::from_usize(self.region.paddr().as_usize() + self.layout.used_offset)
    }

    // Ring slot for a free running index. Queue sizes are powers of two, so the position
    // stays continuous when the u16 index wraps.
    fn position(&self, idx: Wrapping<u16>) -> usize {
        usize::from(idx.0 % self.layout.queue_size)
    }

    fn ptr_at<T>(&self, offset: usize) -> *mut T {
        self.region.vaddr(offset).as_ptr().cast()
    }

    fn atomic_u16(&self, offset: usize) -> &AtomicU16 {
        // SAFETY: `offset` is inside the region (checked by `vaddr`) and every u16 field of
        // the rings sits at an even offset of a page aligned region. The memory lives as long
        // as `self`, and the device side only ever accesses these fields with single u16 loads
        // and stores.
        unsafe { AtomicU16::from_ptr(self.ptr_at(offset)) }
    }

    fn descriptor_ptr(&self, index: u16) -> *mut RawDescriptor {
        assert!(
            index < self.layout.queue_size,
            "descriptor index {} out of range for queue size {}",
            index,
            self.layout.queue_size
        );
        self.ptr_at(usize::from(index) * VIRTQ_DESCRIPTOR_SIZE)
    }

    pub fn read_descriptor(&self, index: u16) -> RawDescriptor {
        // SAFETY: The pointer is in bounds and 16 byte aligned.
        unsafe { read_volatile(self.descriptor_ptr(index)) }
    }

    pub fn write_descriptor(&self, index: u16, desc: RawDescriptor) {
        // SAFETY: The pointer is in bounds and 16 byte aligned.
        unsafe { write_volatile(self.descriptor_ptr(index), desc) }
    }

    pub fn avail_flags(&self, order: Ordering) -> u16 {
        u16::from_le(self.atomic_u16(self.layout.avail_offset).load(order))
    }

    pub fn set_avail_flags(&self, flags: u16, order: Ordering) {
        self.atomic_u16(self.layout.avail_offset)
            .store(u16::to_le(flags), order)
    }

    #[cfg(any(test, feature = "test-utils"))]
    pub fn avail_idx(&self, order: Ordering) -> Wrapping<u16> {
        let offset = self.layout.avail_offset + VIRTQ_RING_IDX_OFFSET;
        Wrapping(u16::from_le(self.atomic_u16(offset).load(order)))
    }

    pub fn set_avail_idx(&self, idx: Wrapping<u16>, order: Ordering) {
        let offset = self.layout.avail_offset + VIRTQ_RING_IDX_OFFSET;
        self.atomic_u16(offset).store(u16::to_le(idx.0), order)
    }

    fn avail_slot_ptr(&self, idx: Wrapping<u16>) -> *mut u16 {
        self.ptr_at(
            self.layout.avail_offset
                + VIRTQ_AVAIL_RING_HEADER_SIZE
                + self.position(idx) * VIRTQ_AVAIL_ELEMENT_SIZE,
        )
    }

    #[cfg(any(test, feature = "test-utils"))]
    pub fn avail_slot(&self, idx: Wrapping<u16>) -> u16 {
        // SAFETY: The position is below the queue size, so the pointer is in bounds and 2 byte
        // aligned.
        u16::from_le(unsafe { read_volatile(self.avail_slot_ptr(idx)) })
    }

    pub fn set_avail_slot(&self, idx: Wrapping<u16>, head: u16) {
        // SAFETY: See `avail_slot`.
        unsafe { write_volatile(self.avail_slot_ptr(idx), u16::to_le(head)) }
    }

    pub fn used_flags(&self, order: Ordering) -> u16 {
        u16::from_le(self.atomic_u16(self.layout.used_offset).load(order))
    }

    #[cfg(any(test, feature = "test-utils"))]
    pub fn set_used_flags(&self, flags: u16, order: Ordering) {
        self.atomic_u16(self.layout.used_offset)
            .store(u16::to_le(flags), order)
    }

    pub fn used_idx(&self, order: Ordering) -> Wrapping<u16> {
        let offset = self.layout.used_offset + VIRTQ_RING_IDX_OFFSET;
        Wrapping(u16::from_le(self.atomic_u16(offset).load(order)))
    }

    #[cfg(any(test, feature = "test-utils"))]
    pub fn set_used_idx(&self, idx: Wrapping<u16>, order: Ordering) {
        let offset = self.layout.used_offset + VIRTQ_RING_IDX_OFFSET;
        self.atomic_u16(offset).store(u16::to_le(idx.0), order)
    }

    fn used_elem_ptr(&self, idx: Wrapping<u16>) -> *mut VirtqUsedElem {
        self.ptr_at(
            self.layout.used_offset
                + VIRTQ_USED_RING_HEADER_SIZE
                + self.position(idx) * VIRTQ_USED_ELEMENT_SIZE,
        )
    }

    pub fn used_elem(&self, idx: Wrapping<u16>) -> VirtqUsedElem {
        // SAFETY: The position is below the queue size and the used ring is 4 byte aligned.
        unsafe { read_volatile(self.used_elem_ptr(idx)) }
    }

    #[cfg(any(test, feature = "test-utils"))]
    pub fn set_used_elem(&self, idx: Wrapping<u16>, elem: VirtqUsedElem) {
        // SAFETY: See `used_elem`.
        unsafe { write_volatile(self.used_elem_ptr(idx), elem) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::HeapDma;

    #[test]
    fn layout_small_queue_fits_one_page() {
        let layout = RingLayout::new(4);
        assert_eq!(layout.avail_offset(), 64);
        // 64 + 4 + 8 = 76, already 4 byte aligned.
        assert_eq!(layout.used_offset(), 76);
        assert_eq!(layout.ring_bytes(), 76 + 4 + 32);
        assert_eq!(layout.region_size(), PAGE_SIZE_4K);
        assert_eq!(layout.pages(), 1);
    }

    #[test]
    fn layout_aligns_used_ring() {
        // avail ring of a one entry queue ends at 16 + 6 = 22.
        let layout = RingLayout::new(1);
        assert_eq!(layout.used_offset(), 24);
    }

    #[test]
    fn layout_large_queue_spans_pages() {
        let layout = RingLayout::new(256);
        assert_eq!(layout.avail_offset(), 4096);
        assert_eq!(layout.used_offset(), 4096 + 516);
        assert_eq!(layout.ring_bytes(), 4096 + 516 + 2052);
        assert_eq!(layout.pages(), 2);

        let layout = RingLayout::new(32768);
        assert_eq!(layout.pages(), 209);
    }

    #[test]
    fn areas_follow_layout() {
        let ring = RingMemory::<HeapDma>::new(RingLayout::new(8)).unwrap();
        let base = ring.descriptor_area().as_usize();
        assert_eq!(ring.driver_area().as_usize(), base + 128);
        assert_eq!(ring.device_area().as_usize(), base + 128 + 20);
        assert_eq!(base % PAGE_SIZE_4K, 0);
    }

    #[test]
    fn fields_round_trip_through_memory() {
        let ring = RingMemory::<HeapDma>::new(RingLayout::new(4)).unwrap();
        assert_eq!(ring.avail_idx(Ordering::Relaxed), Wrapping(0));
        assert_eq!(ring.used_idx(Ordering::Relaxed), Wrapping(0));

        ring.write_descriptor(3, RawDescriptor::new(0xdead_0000, 42, 1, 2));
        assert_eq!(ring.read_descriptor(3), RawDescriptor::new(0xdead_0000, 42, 1, 2));

        // Position wraps with the queue size.
        ring.set_avail_slot(Wrapping(5), 3);
        assert_eq!(ring.avail_slot(Wrapping(1)), 3);

        ring.set_used_elem(Wrapping(u16::MAX), VirtqUsedElem::new(2, 99));
        assert_eq!(ring.used_elem(Wrapping(3)), VirtqUsedElem::new(2, 99));

        ring.set_avail_flags(1, Ordering::Relaxed);
        ring.set_used_idx(Wrapping(7), Ordering::Relaxed);
        assert_eq!(ring.avail_flags(Ordering::Relaxed), 1);
        assert_eq!(ring.used_flags(Ordering::Relaxed), 0);
        assert_eq!(ring.used_idx(Ordering::Relaxed), Wrapping(7));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn descriptor_index_is_bounds_checked() {
        let ring = RingMemory::<HeapDma>::new(RingLayout::new(4)).unwrap();
        ring.read_descriptor(4);
    }
}
