// Copyright (C) 2026 The virtio-split-queue Authors. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0 AND BSD-3-Clause

//! Descriptor and used-element records as they appear in ring memory.

use virtio_bindings::bindings::virtio_ring::{VRING_DESC_F_NEXT, VRING_DESC_F_WRITE};

/// Direction of a buffer from the device's point of view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferType {
    /// The device only reads the buffer (driver to device).
    DeviceReadable,
    /// The device only writes the buffer (device to driver).
    DeviceWritable,
}

impl BufferType {
    /// Descriptor flag bits for this buffer type.
    pub fn flags(self) -> u16 {
        match self {
            BufferType::DeviceReadable => 0,
            BufferType::DeviceWritable => VRING_DESC_F_WRITE as u16,
        }
    }
}

/// A virtio descriptor with C representation.
///
/// This type corresponds to struct virtq_desc, see:
/// https://docs.oasis-open.org/virtio/virtio/v1.3/csd01/virtio-v1.3-csd01.html#x1-720008
///
/// All fields are kept little endian, the accessors convert to native order.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RawDescriptor {
    addr: u64,
    len: u32,
    flags: u16,
    next: u16,
}

#[allow(clippy::len_without_is_empty)]
impl RawDescriptor {
    /// Create a new descriptor from native-endian values.
    pub fn new(addr: u64, len: u32, flags: u16, next: u16) -> Self {
        RawDescriptor {
            addr: u64::to_le(addr),
            len: u32::to_le(len),
            flags: u16::to_le(flags),
            next: u16::to_le(next),
        }
    }

    /// Physical address of the buffer.
    pub fn addr(&self) -> u64 {
        u64::from_le(self.addr)
    }

    /// Length of the buffer in bytes.
    pub fn len(&self) -> u32 {
        u32::from_le(self.len)
    }

    /// Raw flag bits.
    pub fn flags(&self) -> u16 {
        u16::from_le(self.flags)
    }

    /// Index of the next descriptor, only meaningful when [`has_next`](Self::has_next) is set
    /// or while the descriptor sits on the free list.
    pub fn next(&self) -> u16 {
        u16::from_le(self.next)
    }

    /// Whether the chain continues via the `next` field.
    pub fn has_next(&self) -> bool {
        self.flags() & VRING_DESC_F_NEXT as u16 != 0
    }

    /// Whether the device may write this buffer.
    pub fn is_write_only(&self) -> bool {
        self.flags() & VRING_DESC_F_WRITE as u16 != 0
    }

    /// Buffer direction encoded in the flags.
    pub fn buffer_type(&self) -> BufferType {
        if self.is_write_only() {
            BufferType::DeviceWritable
        } else {
            BufferType::DeviceReadable
        }
    }
}

/// Represents the contents of an element from the used virtqueue ring.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VirtqUsedElem {
    id: u32,
    len: u32,
}

#[allow(clippy::len_without_is_empty)]
impl VirtqUsedElem {
    /// Create a new `VirtqUsedElem` instance.
    pub fn new(id: u32, len: u32) -> Self {
        VirtqUsedElem {
            id: u32::to_le(id),
            len: u32::to_le(len),
        }
    }

    /// Head index of the used descriptor chain.
    pub fn id(&self) -> u32 {
        u32::from_le(self.id)
    }

    /// Number of bytes the device wrote into the chain.
    pub fn len(&self) -> u32 {
        u32::from_le(self.len)
    }
}
