//! Dynamic property values and the little-endian word codec.

use parking_lot::RwLock;
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

/// Untyped property value, used for defaults, construction and by-name access.
#[derive(Clone, Debug, PartialEq)]
pub enum PropValue {
    Bool(bool),
    U32(u32),
    F32(f32),
    /// Vector, colour, quaternion and matrix components.
    Floats(SmallVec<[f32; 16]>),
    /// String content; the empty string means "no string".
    Str(String),
    Buffer(RawBuffer),
    Ref(Option<u32>),
    /// Slots of a reference array or map; `None` is an empty slot.
    Refs(SmallVec<[Option<u32>; 8]>),
}

impl PropValue {
    pub fn floats(values: &[f32]) -> Self {
        PropValue::Floats(SmallVec::from_slice(values))
    }

    pub fn refs(ids: impl IntoIterator<Item = Option<u32>>) -> Self {
        PropValue::Refs(ids.into_iter().collect())
    }

    /// Numeric view used for bounds checks.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            PropValue::U32(value) => Some(value as f64),
            PropValue::F32(value) => Some(value as f64),
            _ => None,
        }
    }
}

impl From<bool> for PropValue {
    fn from(value: bool) -> Self {
        PropValue::Bool(value)
    }
}

impl From<u32> for PropValue {
    fn from(value: u32) -> Self {
        PropValue::U32(value)
    }
}

impl From<f32> for PropValue {
    fn from(value: f32) -> Self {
        PropValue::F32(value)
    }
}

impl<const N: usize> From<[f32; N]> for PropValue {
    fn from(value: [f32; N]) -> Self {
        PropValue::floats(&value)
    }
}

impl From<&str> for PropValue {
    fn from(value: &str) -> Self {
        PropValue::Str(value.to_owned())
    }
}

impl From<String> for PropValue {
    fn from(value: String) -> Self {
        PropValue::Str(value)
    }
}

impl From<RawBuffer> for PropValue {
    fn from(value: RawBuffer) -> Self {
        PropValue::Buffer(value)
    }
}

/// Raw byte payload carried by an array-buffer property.
///
/// Frozen payloads never change after creation. Shared payloads may be
/// rewritten in place by the producer and are flagged as mutable in the
/// stored layout so consumers know to re-read them.
#[derive(Clone)]
pub enum RawBuffer {
    Frozen(Arc<[u8]>),
    Shared(Arc<RwLock<Vec<u8>>>),
}

impl RawBuffer {
    pub fn frozen(bytes: impl Into<Arc<[u8]>>) -> Self {
        RawBuffer::Frozen(bytes.into())
    }

    pub fn shared(bytes: Vec<u8>) -> Self {
        RawBuffer::Shared(Arc::new(RwLock::new(bytes)))
    }

    pub fn len(&self) -> usize {
        match self {
            RawBuffer::Frozen(bytes) => bytes.len(),
            RawBuffer::Shared(bytes) => bytes.read().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_mutable(&self) -> bool {
        matches!(self, RawBuffer::Shared(_))
    }

    /// Copies the current contents out.
    pub fn to_vec(&self) -> Vec<u8> {
        match self {
            RawBuffer::Frozen(bytes) => bytes.to_vec(),
            RawBuffer::Shared(bytes) => bytes.read().clone(),
        }
    }

    /// Runs `f` with mutable access to a shared payload; frozen payloads yield `None`.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut Vec<u8>) -> R) -> Option<R> {
        match self {
            RawBuffer::Frozen(_) => None,
            RawBuffer::Shared(bytes) => Some(f(&mut bytes.write())),
        }
    }
}

/// Buffers compare by identity: two handles are equal when they share storage.
impl PartialEq for RawBuffer {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (RawBuffer::Frozen(a), RawBuffer::Frozen(b)) => Arc::ptr_eq(a, b),
            (RawBuffer::Shared(a), RawBuffer::Shared(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for RawBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawBuffer")
            .field("len", &self.len())
            .field("mutable", &self.is_mutable())
            .finish()
    }
}

pub fn read_u32(bytes: &[u8], index: usize) -> u32 {
    let start = index * 4;
    u32::from_le_bytes([
        bytes[start],
        bytes[start + 1],
        bytes[start + 2],
        bytes[start + 3],
    ])
}

pub fn write_u32(bytes: &mut [u8], index: usize, value: u32) {
    let start = index * 4;
    bytes[start..start + 4].copy_from_slice(&value.to_le_bytes());
}

pub fn read_f32(bytes: &[u8], index: usize) -> f32 {
    f32::from_bits(read_u32(bytes, index))
}

pub fn write_f32(bytes: &mut [u8], index: usize, value: f32) {
    write_u32(bytes, index, value.to_bits());
}

/// Reads `N` consecutive floats.
pub fn read_floats<const N: usize>(bytes: &[u8]) -> [f32; N] {
    let mut out = [0.0; N];
    for (index, slot) in out.iter_mut().enumerate() {
        *slot = read_f32(bytes, index);
    }
    out
}
