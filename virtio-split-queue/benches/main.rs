// Copyright (C) 2026 The virtio-split-queue Authors. All rights reserved.
//
// SPDX-License-Identifier: Apache-2.0 AND BSD-3-Clause

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use memory_addr::PhysAddr;
use virtio_split_queue::mock::{HeapDma, MockDevice};
use virtio_split_queue::{BufferType, Queue, QueueChain};

const QUEUE_SIZE: u16 = 256;

fn fill_queue(queue: &Queue<HeapDma>) -> usize {
    let mut locked = queue.lock();
    let mut submitted = 0;
    loop {
        let mut chain = QueueChain::new(queue);
        if !chain.add_buffer_to_chain(
            &mut locked,
            PhysAddr::from_usize(0x10_0000),
            16,
            BufferType::DeviceReadable,
        ) || !chain.add_buffer_to_chain(
            &mut locked,
            PhysAddr::from_usize(0x20_0000),
            512,
            BufferType::DeviceWritable,
        ) {
            chain.release_buffer_slots_to_queue(&mut locked);
            return submitted;
        }
        chain.submit_to_queue(&mut locked);
        submitted += 1;
    }
}

fn drain_queue(queue: &Queue<HeapDma>) -> u64 {
    let mut locked = queue.lock();
    let mut written = 0u64;
    while let Some((mut chain, len)) = locked.pop_used_buffer_chain() {
        written += u64::from(len);
        chain.release_buffer_slots_to_queue(&mut locked);
    }
    written
}

pub fn benchmark_queue(c: &mut Criterion) {
    c.bench_function("submit full queue", |b| {
        b.iter_batched(
            || Queue::<HeapDma>::try_create(QUEUE_SIZE, 0).unwrap(),
            |queue| black_box(fill_queue(&queue)),
            BatchSize::SmallInput,
        )
    });

    c.bench_function("round trip", |b| {
        let queue = Queue::<HeapDma>::try_create(QUEUE_SIZE, 0).unwrap();
        let mut device = MockDevice::new(&queue);
        b.iter(|| {
            fill_queue(&queue);
            device.complete_all();
            black_box(drain_queue(&queue))
        })
    });

    c.bench_function("discard used", |b| {
        let queue = Queue::<HeapDma>::try_create(QUEUE_SIZE, 0).unwrap();
        let mut device = MockDevice::new(&queue);
        b.iter(|| {
            fill_queue(&queue);
            device.complete_all();
            black_box(queue.lock().discard_used_buffers())
        })
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(200);
    targets = benchmark_queue
}

criterion_main! {
    benches,
}
