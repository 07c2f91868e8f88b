//! Aligned backing memory for triple buffers and record rings.
//!
//! Large regions come from anonymous `mmap` pages on native targets. Small
//! ones come from the heap: most resource snapshots are a few dozen bytes and
//! a scene holds thousands of them, so a page per buffer would be wasteful.

use crate::{TransportError, TransportResult};
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::{self, NonNull};

/// Regions at least this large are backed by an anonymous mapping when possible.
pub const MMAP_THRESHOLD: usize = 64 * 1024;

#[cfg(not(target_arch = "wasm32"))]
type NativeMap = memmap2::MmapMut;

#[derive(Debug)]
enum Backing {
    #[cfg(not(target_arch = "wasm32"))]
    Native(NativeMap),
    Owned {
        ptr: NonNull<u8>,
        layout: Layout,
    },
}

impl Backing {
    fn as_mut_ptr(&mut self) -> *mut u8 {
        match self {
            #[cfg(not(target_arch = "wasm32"))]
            Backing::Native(map) => map.as_mut_ptr(),
            Backing::Owned { ptr, .. } => ptr.as_ptr(),
        }
    }
}

/// Contiguous, aligned memory shared between one producer and one consumer.
///
/// The region only hands out a raw pointer to its zeroed bytes; the role
/// discipline deciding who may touch which bytes lives in the
/// triple buffer and record ring built on top of it.
#[derive(Debug)]
pub struct SharedRegion {
    len: usize,
    backing: Backing,
}

// SAFETY: the region exclusively owns its allocation; concurrent access is
// arbitrated by the structures that embed it.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Allocates a zeroed region of `len` bytes aligned to `alignment`.
    pub fn new_aligned(len: usize, alignment: usize) -> TransportResult<Self> {
        if alignment == 0 || !alignment.is_power_of_two() {
            return Err(TransportError::AllocationFailed {
                size: len,
                alignment,
            });
        }
        if len == 0 {
            return Err(TransportError::InvalidCapacity {
                requested: 0,
                minimum: 1,
            });
        }

        #[cfg(not(target_arch = "wasm32"))]
        {
            if len >= MMAP_THRESHOLD {
                if let Some(backing) = Self::mmap_backed(len, alignment)? {
                    return Ok(Self { len, backing });
                }
            }
        }

        Self::heap_backed(len, alignment)
    }

    fn heap_backed(len: usize, alignment: usize) -> TransportResult<Self> {
        let layout = Layout::from_size_align(len, alignment).map_err(|_| {
            TransportError::AllocationFailed {
                size: len,
                alignment,
            }
        })?;

        // SAFETY: `layout` has a non-zero size, checked in `new_aligned`.
        let ptr = unsafe { alloc_zeroed(layout) };

        let ptr = NonNull::new(ptr).ok_or(TransportError::AllocationFailed {
            size: len,
            alignment,
        })?;
        Ok(Self {
            len,
            backing: Backing::Owned { ptr, layout },
        })
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn mmap_backed(len: usize, alignment: usize) -> TransportResult<Option<Backing>> {
        let mut map = memmap2::MmapOptions::new()
            .len(len)
            .map_anon()
            .map_err(|_| TransportError::AllocationFailed {
                size: len,
                alignment,
            })?;

        let ptr = map.as_mut_ptr();
        if ptr as usize % alignment != 0 {
            return Ok(None);
        }

        // SAFETY: the anonymous mapping exposes `len` writable bytes.
        unsafe { ptr::write_bytes(ptr, 0, len) };

        Ok(Some(Backing::Native(map)))
    }

    /// Total number of bytes managed by this region.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true when the region has zero length.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Borrow the region as a mut pointer.
    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.backing.as_mut_ptr()
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        if let Backing::Owned { ptr, layout } = &self.backing {
            // SAFETY: `ptr` was returned by `alloc_zeroed` with this `layout`.
            unsafe {
                dealloc(ptr.as_ptr(), *layout);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(region: &mut SharedRegion) -> &[u8] {
        // SAFETY: the region holds `len` zeroed bytes and is borrowed mutably.
        unsafe { std::slice::from_raw_parts(region.as_mut_ptr(), region.len()) }
    }

    #[test]
    fn small_regions_come_from_the_heap() {
        let mut region = SharedRegion::new_aligned(48, 16).expect("alloc");
        assert!(matches!(region.backing, Backing::Owned { .. }));
        assert_eq!(region.len(), 48);
        assert_eq!(region.as_mut_ptr() as usize % 16, 0);
        assert!(bytes(&mut region).iter().all(|&b| b == 0));
    }

    #[cfg(not(target_arch = "wasm32"))]
    #[test]
    fn large_regions_are_mapped_and_zeroed() {
        let mut region = SharedRegion::new_aligned(MMAP_THRESHOLD, 64).expect("alloc");
        assert!(matches!(region.backing, Backing::Native(_)));
        assert!(bytes(&mut region).iter().all(|&b| b == 0));
        // SAFETY: the last byte lies inside the region.
        unsafe { region.as_mut_ptr().add(MMAP_THRESHOLD - 1).write(7) };
        assert_eq!(bytes(&mut region)[MMAP_THRESHOLD - 1], 7);
    }

    #[test]
    fn rejects_empty_and_misaligned_requests() {
        assert!(matches!(
            SharedRegion::new_aligned(0, 8),
            Err(TransportError::InvalidCapacity {
                requested: 0,
                minimum: 1
            })
        ));
        assert!(matches!(
            SharedRegion::new_aligned(32, 12),
            Err(TransportError::AllocationFailed { alignment: 12, .. })
        ));
    }
}
