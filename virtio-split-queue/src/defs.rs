// Copyright (C) 2026 The virtio-split-queue Authors. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0 AND BSD-3-Clause

//! Virtio queue related constant definitions.

/// The maximum queue size as defined in the Virtio Spec.
pub const MAX_QUEUE_SIZE: u16 = 32768;

/// Size of one entry of the descriptor table.
pub const VIRTQ_DESCRIPTOR_SIZE: usize = 16;

/// Required alignment of the descriptor table.
pub const VIRTQ_DESCRIPTOR_ALIGN: usize = 16;

/// Size of available ring header: flags (u16) + idx (u16).
pub const VIRTQ_AVAIL_RING_HEADER_SIZE: usize = 4;

/// Size of one element in the available ring (u16).
pub const VIRTQ_AVAIL_ELEMENT_SIZE: usize = 2;

/// Required alignment of the available ring.
pub const VIRTQ_AVAIL_RING_ALIGN: usize = 2;

/// Size of used ring header: flags (u16) + idx (u16).
pub const VIRTQ_USED_RING_HEADER_SIZE: usize = 4;

/// Size of one element in the used ring, id (le32) + len (le32).
pub const VIRTQ_USED_ELEMENT_SIZE: usize = 8;

/// Required alignment of the used ring.
pub const VIRTQ_USED_RING_ALIGN: usize = 4;

/// Offset of the `idx` field in both the available and the used ring.
pub(crate) const VIRTQ_RING_IDX_OFFSET: usize = 2;
