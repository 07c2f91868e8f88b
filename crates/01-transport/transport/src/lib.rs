//! Core transport primitives for handing resource state between frame loops.
//!
//! * [`SharedRegion`] – contiguous, aligned memory backing every structure below.
//! * [`TripleBuffer`] – latest-wins snapshot handoff; buffers on one link share
//!   a flag byte owned by a [`TripleBufferWriter`]/[`TripleBufferReader`] pair.
//! * [`record_ring`] – single-producer/single-consumer ring of 12-byte records.
//! * [`tick_ring`] – the record ring plus tick gating for create/dispose intents.
//! * [`TransportError`] – lightweight error surface for allocation, capacity and
//!   overflow failures.

mod error;
mod record_ring;
mod region;
mod tick_ring;
pub mod triple_buffer;

pub use error::{TransportError, TransportResult};
pub use record_ring::{
    record_ring, RecordConsumer, RecordProducer, ResourceCommand, TickRecord, RECORD_SIZE,
};
pub use region::{SharedRegion, MMAP_THRESHOLD};
pub use tick_ring::{tick_ring, TickRingConsumer, TickRingProducer};
pub use triple_buffer::{triple_buffer_flags, TripleBuffer, TripleBufferReader, TripleBufferWriter};
