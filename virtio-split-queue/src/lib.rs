// Copyright (C) 2026 The virtio-split-queue Authors. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0 AND BSD-3-Clause

//! Driver-side split virtqueue.
//!
//! The crate owns the memory a guest driver shares with a virtio device for one queue: the
//! descriptor table, the available (driver) ring and the used (device) ring. It hands out
//! descriptor slots from a free list, builds descriptor chains, publishes them to the device
//! and drains the chains the device reports as used.
//!
//! Every operation that touches ring state requires a [`LockedQueue`], which can only be
//! obtained by taking the queue lock. A caller can therefore build and submit a whole request,
//! or drain a batch of completions, inside one critical section.
//!
//! ```ignore
//! let queue = Queue::<MyDma>::try_create(128, 0)?;
//! let mut locked = queue.lock();
//! let mut chain = QueueChain::new(&queue);
//! if chain.add_buffer_to_chain(&mut locked, request_paddr, 16, BufferType::DeviceReadable)
//!     && chain.add_buffer_to_chain(&mut locked, reply_paddr, 512, BufferType::DeviceWritable)
//! {
//!     chain.submit_to_queue(&mut locked);
//!     locked.notify_if_needed(&doorbell);
//! } else {
//!     chain.release_buffer_slots_to_queue(&mut locked);
//! }
//! ```

#![no_std]
#![deny(missing_docs)]

#[cfg(any(test, feature = "test-utils"))]
extern crate alloc;

use core::fmt::{self, Display};

use axerrno::AxError;

mod chain;
pub mod defs;
mod desc;
mod dma;
mod queue;
mod ring;
mod transport;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use self::chain::{Buffer, ChainBuffers, QueueChain};
pub use self::desc::{BufferType, RawDescriptor, VirtqUsedElem};
pub use self::dma::{DmaAllocator, DmaRegion};
pub use self::queue::{LockedQueue, Queue};
pub use self::ring::RingLayout;
pub use self::transport::{Notifier, QueueHandoff};

/// Virtio queue related errors.
#[derive(Debug)]
pub enum Error {
    /// The requested queue size is zero, not a power of two or above the maximum.
    InvalidSize(u16),
    /// The ring memory could not be allocated.
    DmaAlloc(AxError),
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use self::Error::*;

        match self {
            InvalidSize(size) => write!(f, "invalid virtio queue size: {}", size),
            DmaAlloc(err) => write!(f, "failed to allocate virtio queue memory: {:?}", err),
        }
    }
}

impl core::error::Error for Error {}

/// Result of queue construction.
pub type Result<T> = core::result::Result<T, Error>;
