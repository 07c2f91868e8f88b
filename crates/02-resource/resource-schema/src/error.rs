use crate::PropKind;
use thiserror::Error;

pub type SchemaResult<T> = Result<T, SchemaError>;

/// Layout and value validation failures.
///
/// Declaration errors are raised while compiling a definition; value errors
/// are reused by the accessor layer when a write does not fit its property.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("resource `{resource}` declares property `{prop}` twice")]
    DuplicateProp { resource: String, prop: String },
    #[error("resource `{resource}` exceeds the addressable layout size")]
    LayoutTooLarge { resource: String },
    #[error("required property `{prop}` cannot declare a default")]
    RequiredWithDefault { prop: String },
    #[error("property `{prop}` of kind {kind} cannot declare a default")]
    DefaultNotSupported { prop: String, kind: PropKind },
    #[error("reference collection `{prop}` needs a non-zero capacity")]
    ZeroCapacity { prop: String },
    #[error("reference property `{prop}` names no target type")]
    MissingTarget { prop: String },
    #[error("property `{prop}` is marked as a back-reference but is a {kind}")]
    BackRefOnNonRef { prop: String, kind: PropKind },
    #[error("script-writable property `{prop}` must also be mutable")]
    ScriptRequiresMutable { prop: String },
    #[error("property `{prop}` of kind {kind} cannot declare bounds")]
    BoundsOnNonNumeric { prop: String, kind: PropKind },
    #[error("property `{prop}` has min {min} above max {max}")]
    InvertedBounds { prop: String, min: f64, max: f64 },
    #[error("value for property `{prop}` does not fit kind {kind}")]
    KindMismatch { prop: String, kind: PropKind },
    #[error("property `{prop}` expects {expected} elements, got {actual}")]
    LengthMismatch {
        prop: String,
        expected: u32,
        actual: usize,
    },
    #[error("property `{prop}` holds at most {capacity} references, got {actual}")]
    CapacityExceeded {
        prop: String,
        capacity: u32,
        actual: usize,
    },
    #[error("value {value} for property `{prop}` is outside {min:?}..={max:?}")]
    OutOfBounds {
        prop: String,
        value: f64,
        min: Option<f64>,
        max: Option<f64>,
    },
}
