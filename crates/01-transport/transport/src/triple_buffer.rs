//! Lock-free triple buffering.
//!
//! Three equally sized slots rotate between the read, temp and write roles.
//! The roles live in a single packed flag byte:
//!
//! | bits | meaning         |
//! |------|-----------------|
//! | 0-1  | read slot       |
//! | 2-3  | temp slot       |
//! | 4-5  | write slot      |
//! | 6    | changed         |
//!
//! The writer publishes by swapping write with temp and raising `changed`.
//! The reader picks the snapshot up by swapping read with temp and clearing
//! `changed`. Both swaps are pure functions of the previous byte, applied with
//! a compare-and-swap retry loop, so contention only costs a retry.
//!
//! A flag byte is usually shared by many buffers: a producer writes every
//! buffer on a link, swaps once, and the consumer sees the whole frame at once.
//! The semantics are latest-wins. A reader that falls behind skips
//! intermediate snapshots; it never observes a mix of two.

use crate::region::SharedRegion;
use crate::{TransportError, TransportResult};
#[cfg(feature = "loom")]
use loom::sync::atomic::{AtomicU8, Ordering};
use std::ptr::{self, NonNull};
#[cfg(not(feature = "loom"))]
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Flag byte every link starts from: read=2, temp=1, write=0.
pub const DEFAULT_FLAGS: u8 = 0x06;
/// Set by the writer on publish, cleared by the reader on pickup.
pub const CHANGED_BIT: u8 = 0x40;

const SLOT_ALIGNMENT: usize = 16;

/// Slot currently owned by the reader.
pub const fn read_index(flags: u8) -> usize {
    (flags & 0x03) as usize
}

/// Slot parked between the two roles.
pub const fn temp_index(flags: u8) -> usize {
    ((flags & 0x0c) >> 2) as usize
}

/// Slot currently owned by the writer.
pub const fn write_index(flags: u8) -> usize {
    ((flags & 0x30) >> 4) as usize
}

/// Whether a snapshot was published since the reader last swapped.
pub const fn ready_to_read(flags: u8) -> bool {
    flags & CHANGED_BIT != 0
}

/// Exchanges read and temp, clearing `changed`. Write is untouched.
pub const fn swap_read_with_temp(flags: u8) -> u8 {
    (flags & 0x30) | ((flags & 0x03) << 2) | ((flags & 0x0c) >> 2)
}

/// Exchanges write and temp, raising `changed`. Read is untouched.
pub const fn swap_write_with_temp(flags: u8) -> u8 {
    CHANGED_BIT | ((flags & 0x0c) << 2) | ((flags & 0x30) >> 2) | (flags & 0x03)
}

/// Creates the writer/reader pair for one link.
///
/// Every [`TripleBuffer`] allocated against the returned writer shares its flag
/// byte; the pair is the only way to touch the write and read slots.
pub fn triple_buffer_flags() -> (TripleBufferWriter, TripleBufferReader) {
    let flags = Arc::new(AtomicU8::new(DEFAULT_FLAGS));
    (
        TripleBufferWriter {
            flags: flags.clone(),
        },
        TripleBufferReader { flags },
    )
}

/// Producer side of a link's flag byte.
#[derive(Debug)]
pub struct TripleBufferWriter {
    flags: Arc<AtomicU8>,
}

impl TripleBufferWriter {
    /// Publishes everything written since the previous swap.
    pub fn swap(&mut self) {
        let mut current = self.flags.load(Ordering::Acquire);
        loop {
            match self.flags.compare_exchange(
                current,
                swap_write_with_temp(current),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Index of the slot the next copy lands in.
    pub fn write_index(&self) -> usize {
        write_index(self.flags.load(Ordering::Acquire))
    }

    /// Raw flag byte, for diagnostics.
    pub fn flags(&self) -> u8 {
        self.flags.load(Ordering::Acquire)
    }
}

/// Consumer side of a link's flag byte.
#[derive(Debug)]
pub struct TripleBufferReader {
    flags: Arc<AtomicU8>,
}

impl TripleBufferReader {
    /// Picks up the latest published snapshot.
    ///
    /// Returns `false` and keeps the current read slot when nothing was
    /// published since the last swap.
    pub fn swap(&mut self) -> bool {
        let mut current = self.flags.load(Ordering::Acquire);
        loop {
            if !ready_to_read(current) {
                return false;
            }
            match self.flags.compare_exchange(
                current,
                swap_read_with_temp(current),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Index of the slot reads resolve to.
    pub fn read_index(&self) -> usize {
        read_index(self.flags.load(Ordering::Acquire))
    }
}

/// Three equally sized byte slots governed by a shared flag byte.
pub struct TripleBuffer {
    flags: Arc<AtomicU8>,
    len: usize,
    base: NonNull<u8>,
    _region: SharedRegion,
}

// SAFETY: slot access is partitioned by the flag byte. Writes require
// `&mut TripleBufferWriter` and only touch the write slot; reads borrow the
// unique `TripleBufferReader`, so the read slot cannot rotate while a view is
// alive.
unsafe impl Send for TripleBuffer {}
unsafe impl Sync for TripleBuffer {}

impl TripleBuffer {
    /// Allocates a buffer on `writer`'s link with `bytes` copied into all
    /// three slots, so every role starts from the same coherent snapshot.
    pub fn with_contents(writer: &TripleBufferWriter, bytes: &[u8]) -> TransportResult<Self> {
        let len = bytes.len();
        let total = len
            .checked_mul(3)
            .ok_or(TransportError::InvalidCapacity {
                requested: len,
                minimum: 1,
            })?
            .max(1);
        let mut region = SharedRegion::new_aligned(total, SLOT_ALIGNMENT)?;
        let base = NonNull::new(region.as_mut_ptr()).ok_or(TransportError::AllocationFailed {
            size: total,
            alignment: SLOT_ALIGNMENT,
        })?;

        for slot in 0..3 {
            // SAFETY: the region holds `3 * len` bytes and is not shared yet.
            unsafe {
                ptr::copy_nonoverlapping(bytes.as_ptr(), base.as_ptr().add(slot * len), len);
            }
        }

        Ok(Self {
            flags: writer.flags.clone(),
            len,
            base,
            _region: region,
        })
    }

    /// Size in bytes of a single slot.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true for zero-sized snapshots.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copies a full snapshot into the current write slot and returns its index.
    ///
    /// # Panics
    ///
    /// Panics if `writer` belongs to a different link.
    pub fn copy_to_write_buffer(
        &self,
        writer: &mut TripleBufferWriter,
        bytes: &[u8],
    ) -> TransportResult<usize> {
        assert!(
            Arc::ptr_eq(&self.flags, &writer.flags),
            "triple buffer written through a foreign link"
        );
        if bytes.len() != self.len {
            return Err(TransportError::LengthMismatch {
                expected: self.len,
                actual: bytes.len(),
            });
        }

        let index = writer.write_index();
        // SAFETY: only the unique writer touches the write slot, and the
        // `&mut` borrow keeps it from swapping mid-copy.
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), self.slot_ptr(index), self.len);
        }
        Ok(index)
    }

    /// Borrows the current read slot.
    ///
    /// # Panics
    ///
    /// Panics if `reader` belongs to a different link.
    pub fn read<'a>(&'a self, reader: &'a TripleBufferReader) -> &'a [u8] {
        assert!(
            Arc::ptr_eq(&self.flags, &reader.flags),
            "triple buffer read through a foreign link"
        );
        let index = reader.read_index();
        // SAFETY: the writer never touches the read slot and the borrow of
        // `reader` prevents the read role from moving while the slice lives.
        unsafe { std::slice::from_raw_parts(self.slot_ptr(index), self.len) }
    }

    fn slot_ptr(&self, index: usize) -> *mut u8 {
        debug_assert!(index < 3, "slot index {index} out of range");
        // SAFETY: `index < 3` keeps the offset inside the `3 * len` region.
        unsafe { self.base.as_ptr().add(index * self.len) }
    }
}

impl std::fmt::Debug for TripleBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TripleBuffer")
            .field("len", &self.len)
            .field("flags", &self.flags.load(Ordering::Relaxed))
            .finish()
    }
}


#[cfg(all(test, feature = "loom"))]
mod loom_tests {
    use super::*;
    use loom::thread;

    #[test]
    #[ignore]
    fn slow_loom_triple_buffer_never_tears() {
        loom::model(|| {
            let (mut writer, mut reader) = triple_buffer_flags();
            let buffer = Arc::new(TripleBuffer::with_contents(&writer, &[0; 4]).expect("alloc"));

            let producer = {
                let buffer = buffer.clone();
                thread::spawn(move || {
                    for value in 1..=2u8 {
                        buffer
                            .copy_to_write_buffer(&mut writer, &[value; 4])
                            .expect("copy");
                        writer.swap();
                    }
                })
            };

            for _ in 0..2 {
                reader.swap();
                let view = buffer.read(&reader);
                assert!(view.iter().all(|&b| b == view[0]));
            }

            producer.join().unwrap();
            reader.swap();
            assert_eq!(buffer.read(&reader), &[2; 4]);
        });
    }
}
