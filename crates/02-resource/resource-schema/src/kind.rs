//! Property kinds and their fixed wire shapes.

use std::fmt;

/// Size in bytes of every stored element; all kinds are built from 32-bit words.
pub const ELEMENT_SIZE: u32 = 4;

/// Every property kind a resource schema can declare.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PropKind {
    Bool,
    U32,
    F32,
    Vec2,
    Vec3,
    Rgb,
    Rgba,
    Quat,
    Mat4,
    Bitmask,
    Enum,
    /// Id of an interned string resource.
    String,
    /// Length, mutability flag and id of a raw byte payload.
    ArrayBuffer,
    Ref,
    /// Reference to the declaring schema's own type; compiled into [`PropKind::Ref`].
    SelfRef,
    RefArray,
    RefMap,
}

impl PropKind {
    /// Element count for kinds with a fixed shape; collections return `None`.
    pub fn fixed_count(self) -> Option<u32> {
        match self {
            PropKind::Bool
            | PropKind::U32
            | PropKind::F32
            | PropKind::Bitmask
            | PropKind::Enum
            | PropKind::String
            | PropKind::Ref
            | PropKind::SelfRef => Some(1),
            PropKind::Vec2 => Some(2),
            PropKind::Vec3 | PropKind::Rgb | PropKind::ArrayBuffer => Some(3),
            PropKind::Rgba | PropKind::Quat => Some(4),
            PropKind::Mat4 => Some(16),
            PropKind::RefArray | PropKind::RefMap => None,
        }
    }

    /// Kinds whose stored words are resource ids that may hold a reference.
    pub fn is_reference(self) -> bool {
        matches!(
            self,
            PropKind::Ref | PropKind::SelfRef | PropKind::RefArray | PropKind::RefMap
        )
    }

    /// Kinds encoded straight from a value with no resource side effects.
    pub fn is_plain(self) -> bool {
        !self.is_reference() && !matches!(self, PropKind::String | PropKind::ArrayBuffer)
    }

    /// Kinds that accept `min`/`max` bounds.
    pub fn is_numeric(self) -> bool {
        matches!(self, PropKind::U32 | PropKind::F32)
    }

    pub fn name(self) -> &'static str {
        match self {
            PropKind::Bool => "bool",
            PropKind::U32 => "u32",
            PropKind::F32 => "f32",
            PropKind::Vec2 => "vec2",
            PropKind::Vec3 => "vec3",
            PropKind::Rgb => "rgb",
            PropKind::Rgba => "rgba",
            PropKind::Quat => "quat",
            PropKind::Mat4 => "mat4",
            PropKind::Bitmask => "bitmask",
            PropKind::Enum => "enum",
            PropKind::String => "string",
            PropKind::ArrayBuffer => "arrayBuffer",
            PropKind::Ref => "ref",
            PropKind::SelfRef => "selfRef",
            PropKind::RefArray => "refArray",
            PropKind::RefMap => "refMap",
        }
    }
}

impl fmt::Display for PropKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
