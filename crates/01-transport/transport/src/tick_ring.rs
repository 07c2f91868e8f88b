//! Tick-gated create/dispose queue.
//!
//! Producer and consumer frame loops run at unrelated rates. A record stamped
//! with tick `t` must not surface on a consumer that is still simulating an
//! earlier tick, otherwise a resource could be torn down underneath a frame
//! that still references it. [`TickRingConsumer::drain`] therefore releases
//! records only once the consumer reaches their tick, parking early arrivals
//! in a local FIFO.

use crate::record_ring::{record_ring, RecordConsumer, RecordProducer};
use crate::{ResourceCommand, TickRecord, TransportResult};
use log::trace;
use std::collections::VecDeque;

/// Allocates a tick ring holding at least `capacity` in-flight records.
pub fn tick_ring(capacity: u32) -> TransportResult<(TickRingProducer, TickRingConsumer)> {
    let (records, consumer) = record_ring(capacity)?;
    Ok((
        TickRingProducer { records },
        TickRingConsumer {
            records: consumer,
            pending: VecDeque::new(),
            results: Vec::new(),
        },
    ))
}

/// Producer half: stamps intents with the tick they take effect on.
pub struct TickRingProducer {
    records: RecordProducer,
}

impl TickRingProducer {
    /// Appends an intent.
    ///
    /// Overflow is reported as [`crate::TransportError::RingFull`] and must be
    /// treated as fatal; dropping the record would break tick ordering.
    pub fn enqueue(&mut self, command: ResourceCommand, tick: u32, id: u32) -> TransportResult<()> {
        self.records.push(TickRecord::new(command, tick, id))
    }

    pub fn capacity(&self) -> u32 {
        self.records.capacity()
    }

    /// Records the consumer has not popped yet.
    pub fn in_flight(&self) -> u32 {
        self.records.len()
    }
}

/// Consumer half: releases records whose tick has been reached.
pub struct TickRingConsumer {
    records: RecordConsumer,
    pending: VecDeque<TickRecord>,
    results: Vec<TickRecord>,
}

impl TickRingConsumer {
    /// Returns every record due at `tick`, each exactly once and in enqueue order.
    ///
    /// Previously parked records are replayed first, then freshly published
    /// ones are split into due and not-yet-due. Once something is parked, every
    /// later arrival queues behind it, which keeps per-id order intact even if
    /// the producer's ticks were to step backwards.
    pub fn drain(&mut self, tick: u32) -> &[TickRecord] {
        self.results.clear();

        while let Some(front) = self.pending.front() {
            if front.tick > tick {
                break;
            }
            if let Some(record) = self.pending.pop_front() {
                self.results.push(record);
            }
        }

        while let Some(record) = self.records.pop() {
            if record.tick <= tick && self.pending.is_empty() {
                self.results.push(record);
            } else {
                self.pending.push_back(record);
            }
        }

        if !self.results.is_empty() || !self.pending.is_empty() {
            trace!(
                "tick ring drain at {tick}: {} due, {} parked",
                self.results.len(),
                self.pending.len()
            );
        }
        &self.results
    }

    /// Records popped from the ring that are still waiting for their tick.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
