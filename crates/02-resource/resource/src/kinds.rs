//! Typed property kinds used by [`crate::define_resource!`].
//!
//! Each marker type ties a declaration to the Rust types its accessors take
//! and return. Getters decode straight from a resource's bytes; setters go
//! through [`crate::ResourceManager::set_prop`] so reference counting and
//! validation happen in one place.

use std::marker::PhantomData;

use resource_schema::value::{read_f32, read_floats, read_u32};
use resource_schema::{PropType, PropValue, RawBuffer, ResourceDefinition};

use crate::{ResourceClass, ResourceError, ResourceId, ResourceResult, ResourceView};

pub trait PropAccess {
    /// Value accepted by setters and construction props.
    type Input;
    /// Value returned by getters.
    type Output<'v>;

    fn declare() -> PropType;

    fn into_value(input: Self::Input) -> PropValue;

    /// Decodes the property from its own byte slice.
    fn read<'v, V: ResourceView + ?Sized>(view: &'v V, bytes: &'v [u8]) -> Self::Output<'v>;
}

/// Enumerations stored as their `u32` discriminant.
pub trait PropEnum: Copy + 'static {
    fn to_u32(self) -> u32;

    fn from_u32(value: u32) -> Option<Self>;
}

pub enum Bool {}

impl PropAccess for Bool {
    type Input = bool;
    type Output<'v> = bool;

    fn declare() -> PropType {
        PropType::bool()
    }

    fn into_value(input: bool) -> PropValue {
        PropValue::Bool(input)
    }

    fn read<'v, V: ResourceView + ?Sized>(_: &'v V, bytes: &'v [u8]) -> bool {
        read_u32(bytes, 0) != 0
    }
}

macro_rules! word_kinds {
    ($($name:ident => $ctor:ident),* $(,)?) => {
        $(
            pub enum $name {}

            impl PropAccess for $name {
                type Input = u32;
                type Output<'v> = u32;

                fn declare() -> PropType {
                    PropType::$ctor()
                }

                fn into_value(input: u32) -> PropValue {
                    PropValue::U32(input)
                }

                fn read<'v, V: ResourceView + ?Sized>(_: &'v V, bytes: &'v [u8]) -> u32 {
                    read_u32(bytes, 0)
                }
            }
        )*
    };
}

word_kinds! {
    U32 => u32,
    Bitmask => bitmask,
}

pub enum F32 {}

impl PropAccess for F32 {
    type Input = f32;
    type Output<'v> = f32;

    fn declare() -> PropType {
        PropType::f32()
    }

    fn into_value(input: f32) -> PropValue {
        PropValue::F32(input)
    }

    fn read<'v, V: ResourceView + ?Sized>(_: &'v V, bytes: &'v [u8]) -> f32 {
        read_f32(bytes, 0)
    }
}

macro_rules! float_kinds {
    ($($name:ident => $ctor:ident [$len:literal]),* $(,)?) => {
        $(
            pub enum $name {}

            impl PropAccess for $name {
                type Input = [f32; $len];
                type Output<'v> = [f32; $len];

                fn declare() -> PropType {
                    PropType::$ctor()
                }

                fn into_value(input: [f32; $len]) -> PropValue {
                    PropValue::floats(&input)
                }

                fn read<'v, V: ResourceView + ?Sized>(_: &'v V, bytes: &'v [u8]) -> [f32; $len] {
                    read_floats::<$len>(bytes)
                }
            }
        )*
    };
}

float_kinds! {
    Vec2 => vec2 [2],
    Vec3 => vec3 [3],
    Rgb => rgb [3],
    Rgba => rgba [4],
    Quat => quat [4],
    Mat4 => mat4 [16],
}

/// Enumeration; unknown discriminants read back as `None`.
pub struct Enum<E>(PhantomData<fn() -> E>);

impl<E: PropEnum> PropAccess for Enum<E> {
    type Input = E;
    type Output<'v> = Option<E>;

    fn declare() -> PropType {
        PropType::enumeration()
    }

    fn into_value(input: E) -> PropValue {
        PropValue::U32(input.to_u32())
    }

    fn read<'v, V: ResourceView + ?Sized>(_: &'v V, bytes: &'v [u8]) -> Option<E> {
        E::from_u32(read_u32(bytes, 0))
    }
}

/// Interned string. Unset and not-yet-loaded strings read as `""`.
pub enum Str {}

impl PropAccess for Str {
    type Input = String;
    type Output<'v> = &'v str;

    fn declare() -> PropType {
        PropType::string()
    }

    fn into_value(input: String) -> PropValue {
        PropValue::Str(input)
    }

    fn read<'v, V: ResourceView + ?Sized>(view: &'v V, bytes: &'v [u8]) -> &'v str {
        match read_u32(bytes, 0) {
            0 => "",
            id => view.string(id).unwrap_or(""),
        }
    }
}

/// Raw byte payload. Can be set once per instance.
pub enum ArrayBuffer {}

impl PropAccess for ArrayBuffer {
    type Input = RawBuffer;
    type Output<'v> = Option<&'v RawBuffer>;

    fn declare() -> PropType {
        PropType::array_buffer()
    }

    fn into_value(input: RawBuffer) -> PropValue {
        PropValue::Buffer(input)
    }

    fn read<'v, V: ResourceView + ?Sized>(view: &'v V, bytes: &'v [u8]) -> Option<&'v RawBuffer> {
        match read_u32(bytes, 2) {
            0 => None,
            id => view.raw_buffer(id),
        }
    }
}

/// Owning reference.
pub struct Ref<T>(PhantomData<fn() -> T>);

impl<T: ResourceClass> PropAccess for Ref<T> {
    type Input = Option<T>;
    type Output<'v> = Option<T>;

    fn declare() -> PropType {
        PropType::reference(T::NAME)
    }

    fn into_value(input: Option<T>) -> PropValue {
        PropValue::Ref(input.map(T::id))
    }

    fn read<'v, V: ResourceView + ?Sized>(view: &'v V, bytes: &'v [u8]) -> Option<T> {
        resolve(view, read_u32(bytes, 0))
    }
}

/// Non-owning reverse pointer; never holds a reference.
pub struct BackRef<T>(PhantomData<fn() -> T>);

impl<T: ResourceClass> PropAccess for BackRef<T> {
    type Input = Option<T>;
    type Output<'v> = Option<T>;

    fn declare() -> PropType {
        PropType::reference(T::NAME).back_ref()
    }

    fn into_value(input: Option<T>) -> PropValue {
        PropValue::Ref(input.map(T::id))
    }

    fn read<'v, V: ResourceView + ?Sized>(view: &'v V, bytes: &'v [u8]) -> Option<T> {
        resolve(view, read_u32(bytes, 0))
    }
}

/// Dense list of up to `N` owning references.
pub struct RefArray<T, const N: usize>(PhantomData<fn() -> T>);

impl<T: ResourceClass, const N: usize> PropAccess for RefArray<T, N> {
    type Input = Vec<T>;
    type Output<'v> = Vec<T>;

    fn declare() -> PropType {
        PropType::ref_array(T::NAME, N as u32)
    }

    fn into_value(input: Vec<T>) -> PropValue {
        PropValue::refs(input.into_iter().map(|item| Some(item.id())))
    }

    fn read<'v, V: ResourceView + ?Sized>(view: &'v V, bytes: &'v [u8]) -> Vec<T> {
        (0..N)
            .map(|index| read_u32(bytes, index))
            .take_while(|&id| id != 0)
            .filter_map(|id| resolve(view, id))
            .collect()
    }
}

/// `N` index-addressed slots of owning references.
pub struct RefMap<T, const N: usize>(PhantomData<fn() -> T>);

impl<T: ResourceClass, const N: usize> PropAccess for RefMap<T, N> {
    type Input = Vec<Option<T>>;
    type Output<'v> = Vec<Option<T>>;

    fn declare() -> PropType {
        PropType::ref_map(T::NAME, N as u32)
    }

    fn into_value(input: Vec<Option<T>>) -> PropValue {
        PropValue::refs(input.into_iter().map(|slot| slot.map(T::id)))
    }

    fn read<'v, V: ResourceView + ?Sized>(view: &'v V, bytes: &'v [u8]) -> Vec<Option<T>> {
        (0..N)
            .map(|index| resolve(view, read_u32(bytes, index)))
            .collect()
    }
}

/// Typed handle for `id` when it names a live resource of type `T`.
pub fn resolve<T: ResourceClass, V: ResourceView + ?Sized>(view: &V, id: ResourceId) -> Option<T> {
    if id == 0 || view.resource_type(id)? != T::NAME {
        return None;
    }
    Some(T::from_id(id))
}

/// Reads property `name` of instance `id` through kind `K`.
pub fn read_prop<'v, K: PropAccess, V: ResourceView + ?Sized>(
    view: &'v V,
    id: ResourceId,
    definition: &ResourceDefinition,
    name: &str,
) -> ResourceResult<K::Output<'v>> {
    let actual = view.resource_type(id).ok_or(ResourceError::NotFound(id))?;
    if actual != definition.name() {
        return Err(ResourceError::TypeMismatch {
            id,
            expected: definition.name().to_owned(),
            actual: actual.to_owned(),
        });
    }
    let prop = definition
        .prop(name)
        .ok_or_else(|| ResourceError::UnknownProp {
            resource_type: definition.name().to_owned(),
            prop: name.to_owned(),
        })?;
    let bytes = view
        .resource_bytes(id)
        .and_then(|bytes| bytes.get(prop.range()))
        .ok_or(ResourceError::NotFound(id))?;
    Ok(K::read(view, bytes))
}
