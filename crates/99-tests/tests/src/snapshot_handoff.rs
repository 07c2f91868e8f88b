#![cfg(all(test, not(target_arch = "wasm32")))]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;

use transport::{
    tick_ring, triple_buffer_flags, ResourceCommand, TransportError, TripleBuffer,
};

const SNAPSHOT_LEN: usize = 64;

fn frame(value: u32) -> [u8; SNAPSHOT_LEN] {
    let mut bytes = [0u8; SNAPSHOT_LEN];
    for word in bytes.chunks_exact_mut(4) {
        word.copy_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode(bytes: &[u8]) -> u32 {
    let mut words = bytes
        .chunks_exact(4)
        .map(|word| u32::from_le_bytes([word[0], word[1], word[2], word[3]]));
    let first = words.next().expect("non-empty snapshot");
    assert!(words.all(|word| word == first), "torn snapshot");
    first
}

#[test]
fn buffers_on_one_link_publish_together() {
    const FRAMES: u32 = 20_000;
    let (mut writer, mut reader) = triple_buffer_flags();
    let buffers: Arc<[TripleBuffer; 2]> = Arc::new([
        TripleBuffer::with_contents(&writer, &frame(0)).expect("buffer"),
        TripleBuffer::with_contents(&writer, &frame(0)).expect("buffer"),
    ]);

    let producer = {
        let buffers = Arc::clone(&buffers);
        thread::spawn(move || {
            for value in 1..=FRAMES {
                for buffer in buffers.iter() {
                    buffer
                        .copy_to_write_buffer(&mut writer, &frame(value))
                        .expect("copy");
                }
                writer.swap();
            }
        })
    };

    let mut last = 0;
    while last < FRAMES {
        if !reader.swap() {
            thread::yield_now();
            continue;
        }
        let first = decode(buffers[0].read(&reader));
        let second = decode(buffers[1].read(&reader));
        assert_eq!(first, second, "buffers on one link diverged");
        assert!(first >= last, "snapshot went backwards: {first} after {last}");
        last = first;
    }

    producer.join().expect("producer thread");
    assert_eq!(decode(buffers[0].read(&reader)), FRAMES);
}

#[test]
fn tick_ring_never_releases_a_record_early() {
    const RECORDS: u32 = 5_000;
    let (mut producer, mut consumer) = tick_ring(64).expect("ring");
    let published = Arc::new(AtomicU32::new(0));
    let done = Arc::new(AtomicBool::new(false));

    let handle = {
        let published = Arc::clone(&published);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            for id in 1..=RECORDS {
                let tick = id / 2;
                loop {
                    match producer.enqueue(ResourceCommand::Create, tick, id) {
                        Ok(()) => break,
                        Err(TransportError::RingFull { .. }) => thread::yield_now(),
                        Err(err) => panic!("enqueue failed: {err}"),
                    }
                }
                published.store(tick, Ordering::Release);
            }
            done.store(true, Ordering::Release);
        })
    };

    let mut seen = Vec::with_capacity(RECORDS as usize);
    loop {
        let finished = done.load(Ordering::Acquire);
        let tick = published.load(Ordering::Acquire);
        for record in consumer.drain(tick) {
            assert!(record.tick <= tick, "record {} released early", record.id);
            seen.push(record.id);
        }
        if finished && seen.len() == RECORDS as usize {
            break;
        }
        thread::yield_now();
    }

    handle.join().expect("producer thread");
    assert!(seen.windows(2).all(|pair| pair[0] < pair[1]), "out of order");
    assert_eq!(consumer.pending(), 0);
}
