//! Error handling helpers for the transport crate.
//!
//! The transport layer keeps its error surface small: allocation and capacity
//! validation, slot length mismatches, and record ring overflow. Ring overflow
//! is fatal for callers; the ring never drops a record on its own.

use std::fmt;

/// Convenience result alias for fallible transport operations.
pub type TransportResult<T, E = TransportError> = Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Errors surfaced by low-level transport helpers.
pub enum TransportError {
    /// Requested capacity or buffer size is below the minimum.
    InvalidCapacity { requested: usize, minimum: usize },
    /// Allocation of a shared region failed for the given size/alignment pair.
    AllocationFailed { size: usize, alignment: usize },
    /// The record ring has no room left for another record.
    RingFull { capacity: u32 },
    /// A snapshot did not match the slot size of its triple buffer.
    LengthMismatch { expected: usize, actual: usize },
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::InvalidCapacity { requested, minimum } => {
                write!(f, "capacity {requested} must be at least {minimum}")
            }
            TransportError::AllocationFailed { size, alignment } => {
                write!(
                    f,
                    "failed to allocate shared region of {size} bytes aligned to {alignment}"
                )
            }
            TransportError::RingFull { capacity } => {
                write!(f, "record ring overflowed its capacity of {capacity} records")
            }
            TransportError::LengthMismatch { expected, actual } => {
                write!(
                    f,
                    "snapshot of {actual} bytes does not fit slots of {expected} bytes"
                )
            }
        }
    }
}

impl std::error::Error for TransportError {}
