//! Single-producer/single-consumer ring of fixed 12-byte records.
//!
//! Each record is three little-endian `u32` words: command, tick and resource
//! id. Head and tail indices follow the usual SPSC discipline: the producer
//! owns `head`, the consumer owns `tail`, and each publishes with `Release`
//! after touching the entry it claimed.

use crate::region::SharedRegion;
use crate::{TransportError, TransportResult};
#[cfg(feature = "loom")]
use loom::sync::atomic::{AtomicU32, Ordering};
use log::warn;
use std::ptr::{self, NonNull};
#[cfg(not(feature = "loom"))]
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Size in bytes of one encoded record.
pub const RECORD_SIZE: usize = 3 * std::mem::size_of::<u32>();

const RING_ALIGNMENT: usize = 64;

/// Lifecycle intent carried by a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ResourceCommand {
    Create = 0,
    Dispose = 1,
}

impl ResourceCommand {
    fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Create),
            1 => Some(Self::Dispose),
            _ => None,
        }
    }
}

/// One decoded ring entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TickRecord {
    pub command: ResourceCommand,
    pub tick: u32,
    pub id: u32,
}

impl TickRecord {
    pub fn new(command: ResourceCommand, tick: u32, id: u32) -> Self {
        Self { command, tick, id }
    }

    fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut bytes = [0u8; RECORD_SIZE];
        bytes[0..4].copy_from_slice(&(self.command as u32).to_le_bytes());
        bytes[4..8].copy_from_slice(&self.tick.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.id.to_le_bytes());
        bytes
    }

    fn decode(bytes: &[u8; RECORD_SIZE]) -> Result<Self, u32> {
        let word = |i: usize| u32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        let raw = word(0);
        let command = ResourceCommand::from_raw(raw).ok_or(raw)?;
        Ok(Self {
            command,
            tick: word(4),
            id: word(8),
        })
    }
}

struct RecordRing {
    capacity: u32,
    head: AtomicU32,
    tail: AtomicU32,
    base: NonNull<u8>,
    _region: SharedRegion,
}

// SAFETY: the producer only writes the entry at `head` before publishing it and
// the consumer only reads entries in `tail..head`; the split handles are not
// `Clone`, so each side has exactly one owner.
unsafe impl Send for RecordRing {}
unsafe impl Sync for RecordRing {}

impl RecordRing {
    fn entry_ptr(&self, position: u32) -> *mut u8 {
        let index = (position % self.capacity) as usize;
        // SAFETY: `index < capacity` keeps the offset inside the region.
        unsafe { self.base.as_ptr().add(index * RECORD_SIZE) }
    }
}

/// Allocates a ring and splits it into its producer and consumer halves.
///
/// The capacity is rounded up to the next power of two so that the wrapping
/// `u32` positions map onto entries without a discontinuity.
pub fn record_ring(capacity: u32) -> TransportResult<(RecordProducer, RecordConsumer)> {
    if capacity == 0 {
        return Err(TransportError::InvalidCapacity {
            requested: 0,
            minimum: 1,
        });
    }
    let capacity = capacity
        .checked_next_power_of_two()
        .ok_or(TransportError::InvalidCapacity {
            requested: capacity as usize,
            minimum: 1,
        })?;
    let len = capacity as usize * RECORD_SIZE;
    let mut region = SharedRegion::new_aligned(len, RING_ALIGNMENT)?;
    let base = NonNull::new(region.as_mut_ptr()).ok_or(TransportError::AllocationFailed {
        size: len,
        alignment: RING_ALIGNMENT,
    })?;

    let ring = Arc::new(RecordRing {
        capacity,
        head: AtomicU32::new(0),
        tail: AtomicU32::new(0),
        base,
        _region: region,
    });
    Ok((
        RecordProducer { ring: ring.clone() },
        RecordConsumer { ring },
    ))
}

/// Writing half of a record ring.
pub struct RecordProducer {
    ring: Arc<RecordRing>,
}

impl RecordProducer {
    /// Appends a record, failing with [`TransportError::RingFull`] when the
    /// consumer has fallen a full ring behind.
    pub fn push(&mut self, record: TickRecord) -> TransportResult<()> {
        let ring = &*self.ring;
        let head = ring.head.load(Ordering::Relaxed);
        let tail = ring.tail.load(Ordering::Acquire);
        if head.wrapping_sub(tail) >= ring.capacity {
            return Err(TransportError::RingFull {
                capacity: ring.capacity,
            });
        }

        let bytes = record.encode();
        // SAFETY: the entry at `head` is outside `tail..head`, so the consumer
        // does not read it until the store below publishes it.
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), ring.entry_ptr(head), RECORD_SIZE);
        }
        ring.head.store(head.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    /// Number of records the ring can hold.
    pub fn capacity(&self) -> u32 {
        self.ring.capacity
    }

    /// Records published but not yet consumed.
    pub fn len(&self) -> u32 {
        let ring = &*self.ring;
        ring.head
            .load(Ordering::Relaxed)
            .wrapping_sub(ring.tail.load(Ordering::Acquire))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reading half of a record ring.
pub struct RecordConsumer {
    ring: Arc<RecordRing>,
}

impl RecordConsumer {
    /// Pops the oldest published record.
    pub fn pop(&mut self) -> Option<TickRecord> {
        let ring = &*self.ring;
        loop {
            let head = ring.head.load(Ordering::Acquire);
            let tail = ring.tail.load(Ordering::Relaxed);
            if tail == head {
                return None;
            }

            let mut bytes = [0u8; RECORD_SIZE];
            // SAFETY: `tail` is inside `tail..head`, published by the producer.
            unsafe {
                ptr::copy_nonoverlapping(ring.entry_ptr(tail), bytes.as_mut_ptr(), RECORD_SIZE);
            }
            ring.tail.store(tail.wrapping_add(1), Ordering::Release);

            match TickRecord::decode(&bytes) {
                Ok(record) => return Some(record),
                Err(raw) => warn!("skipping ring record with unknown command {raw}"),
            }
        }
    }

    pub fn capacity(&self) -> u32 {
        self.ring.capacity
    }
}


#[cfg(all(test, feature = "loom"))]
mod loom_tests {
    use super::*;
    use loom::thread;

    #[test]
    #[ignore]
    fn slow_loom_record_ring_spsc_round_trip() {
        loom::model(|| {
            const COUNT: u32 = 3;
            let (mut producer, mut consumer) = record_ring(2).expect("ring");

            let producer_thread = thread::spawn(move || {
                for id in 1..=COUNT {
                    let record = TickRecord::new(ResourceCommand::Create, 0, id);
                    while producer.push(record).is_err() {
                        thread::yield_now();
                    }
                }
            });

            for expected in 1..=COUNT {
                let record = loop {
                    if let Some(record) = consumer.pop() {
                        break record;
                    }
                    thread::yield_now();
                };
                assert_eq!(record.id, expected);
            }

            producer_thread.join().unwrap();
        });
    }
}
