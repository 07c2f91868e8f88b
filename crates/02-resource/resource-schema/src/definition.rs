//! Schema declaration and layout compilation.
//!
//! Properties are laid out back to back in declaration order: each one starts
//! where the previous one ended. Producer and consumer compile the same
//! declaration independently, so the layout must be a pure function of that
//! declaration. Definitions are immutable once compiled.

use crate::value::{write_f32, write_u32, PropValue};
use crate::{PropKind, SchemaError, SchemaResult, ELEMENT_SIZE};
use indexmap::IndexMap;
use std::ops::Range;

/// Declaration of a single property, built fluently.
#[derive(Clone, Debug, PartialEq)]
pub struct PropType {
    kind: PropKind,
    count: u32,
    target: Option<String>,
    default: Option<PropValue>,
    required: bool,
    mutable: bool,
    script: bool,
    back_ref: bool,
    min: Option<f64>,
    max: Option<f64>,
}

macro_rules! fixed_kinds {
    ($($(#[$meta:meta])* $fn_name:ident => $kind:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            pub fn $fn_name() -> Self {
                Self::of(PropKind::$kind)
            }
        )*
    };
}

impl PropType {
    /// Plain declaration of `kind`.
    ///
    /// Collection kinds declared this way have no capacity and are rejected
    /// at compile time; use [`PropType::ref_array`] or [`PropType::ref_map`].
    pub fn of(kind: PropKind) -> Self {
        Self {
            kind,
            count: kind.fixed_count().unwrap_or(0),
            target: None,
            default: None,
            required: false,
            mutable: true,
            script: false,
            back_ref: false,
            min: None,
            max: None,
        }
    }

    fixed_kinds! {
        bool => Bool,
        u32 => U32,
        f32 => F32,
        vec2 => Vec2,
        vec3 => Vec3,
        rgb => Rgb,
        rgba => Rgba,
        quat => Quat,
        mat4 => Mat4,
        bitmask => Bitmask,
        enumeration => Enum,
        string => String,
        array_buffer => ArrayBuffer,
        /// Reference to another instance of the declaring schema.
        self_ref => SelfRef,
    }

    /// Single reference to a resource of type `target`.
    pub fn reference(target: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
            ..Self::of(PropKind::Ref)
        }
    }

    /// Dense list of up to `capacity` references.
    pub fn ref_array(target: impl Into<String>, capacity: u32) -> Self {
        Self::collection(PropKind::RefArray, target.into(), capacity)
    }

    /// Sparse, index-addressed slots holding up to `capacity` references.
    pub fn ref_map(target: impl Into<String>, capacity: u32) -> Self {
        Self::collection(PropKind::RefMap, target.into(), capacity)
    }

    fn collection(kind: PropKind, target: String, capacity: u32) -> Self {
        Self {
            kind,
            count: capacity,
            target: Some(target),
            ..Self::of(PropKind::Ref)
        }
    }

    pub fn with_default(mut self, value: impl Into<PropValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Suppresses setters; the value can only be given at construction.
    pub fn immutable(mut self) -> Self {
        self.mutable = false;
        self
    }

    /// Allows writes through the scripting surface.
    pub fn script(mut self) -> Self {
        self.script = true;
        self
    }

    /// Marks a non-owning reverse pointer excluded from reference counting.
    pub fn back_ref(mut self) -> Self {
        self.back_ref = true;
        self
    }

    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    pub fn kind(&self) -> PropKind {
        self.kind
    }
}

/// A property with its resolved place in the layout.
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledProp {
    pub name: String,
    pub kind: PropKind,
    pub element_count: u32,
    pub byte_offset: u32,
    pub byte_length: u32,
    pub required: bool,
    pub mutable: bool,
    pub script: bool,
    pub back_ref: bool,
    pub default: Option<PropValue>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub target: Option<String>,
}

impl CompiledProp {
    /// Byte range of this property inside an instance's storage.
    pub fn range(&self) -> Range<usize> {
        let start = self.byte_offset as usize;
        start..start + self.byte_length as usize
    }

    /// Reference-bearing and not a back-reference: writes adjust ref-counts.
    pub fn is_owning_ref(&self) -> bool {
        self.kind.is_reference() && !self.back_ref
    }

    /// Checks that `value` has the right shape and respects the bounds.
    pub fn validate(&self, value: &PropValue) -> SchemaResult<()> {
        let fits = match (self.kind, value) {
            (PropKind::Bool, PropValue::Bool(_)) => true,
            (PropKind::U32 | PropKind::Bitmask | PropKind::Enum, PropValue::U32(_)) => true,
            (PropKind::F32, PropValue::F32(_)) => true,
            (
                PropKind::Vec2
                | PropKind::Vec3
                | PropKind::Rgb
                | PropKind::Rgba
                | PropKind::Quat
                | PropKind::Mat4,
                PropValue::Floats(values),
            ) => {
                if values.len() != self.element_count as usize {
                    return Err(SchemaError::LengthMismatch {
                        prop: self.name.clone(),
                        expected: self.element_count,
                        actual: values.len(),
                    });
                }
                true
            }
            (PropKind::String, PropValue::Str(_)) => true,
            (PropKind::ArrayBuffer, PropValue::Buffer(_)) => true,
            (PropKind::Ref, PropValue::Ref(_)) => true,
            (PropKind::RefArray | PropKind::RefMap, PropValue::Refs(slots)) => {
                if slots.len() > self.element_count as usize {
                    return Err(SchemaError::CapacityExceeded {
                        prop: self.name.clone(),
                        capacity: self.element_count,
                        actual: slots.len(),
                    });
                }
                // Arrays are dense: readers stop at the first empty slot.
                self.kind == PropKind::RefMap || slots.iter().all(Option::is_some)
            }
            _ => false,
        };
        if !fits {
            return Err(SchemaError::KindMismatch {
                prop: self.name.clone(),
                kind: self.kind,
            });
        }

        if let Some(number) = value.as_f64() {
            let below = self.min.is_some_and(|min| number < min);
            let above = self.max.is_some_and(|max| number > max);
            if below || above {
                return Err(SchemaError::OutOfBounds {
                    prop: self.name.clone(),
                    value: number,
                    min: self.min,
                    max: self.max,
                });
            }
        }
        Ok(())
    }

    /// Writes a plain value into this property's bytes.
    ///
    /// `bytes` is the property's own slice. Only plain kinds are encoded
    /// here; strings, buffers and references carry resource side effects and
    /// are written by the accessor layer.
    pub fn encode_plain(&self, value: &PropValue, bytes: &mut [u8]) -> SchemaResult<()> {
        self.validate(value)?;
        match value {
            PropValue::Bool(flag) => write_u32(bytes, 0, u32::from(*flag)),
            PropValue::U32(number) => write_u32(bytes, 0, *number),
            PropValue::F32(number) => write_f32(bytes, 0, *number),
            PropValue::Floats(values) => {
                for (index, number) in values.iter().enumerate() {
                    write_f32(bytes, index, *number);
                }
            }
            _ => {
                return Err(SchemaError::KindMismatch {
                    prop: self.name.clone(),
                    kind: self.kind,
                })
            }
        }
        Ok(())
    }
}

/// Compiled, immutable layout of one resource type.
#[derive(Clone, Debug, PartialEq)]
pub struct ResourceDefinition {
    name: String,
    props: IndexMap<String, CompiledProp>,
    byte_length: u32,
}

impl ResourceDefinition {
    pub fn builder(name: impl Into<String>) -> ResourceDefinitionBuilder {
        ResourceDefinitionBuilder {
            name: name.into(),
            props: Vec::new(),
        }
    }

    /// Type tag shared by every instance.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total size of an instance's storage.
    pub fn byte_length(&self) -> u32 {
        self.byte_length
    }

    pub fn prop(&self, name: &str) -> Option<&CompiledProp> {
        self.props.get(name)
    }

    /// Position of a property in declaration order.
    pub fn prop_index(&self, name: &str) -> Option<usize> {
        self.props.get_index_of(name)
    }

    pub fn prop_at(&self, index: usize) -> Option<&CompiledProp> {
        self.props.get_index(index).map(|(_, prop)| prop)
    }

    /// Properties in declaration (and therefore offset) order.
    pub fn props(&self) -> impl Iterator<Item = &CompiledProp> {
        self.props.values()
    }

    pub fn len(&self) -> usize {
        self.props.len()
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }

    /// Properties whose stored ids hold a reference on their targets.
    pub fn owning_refs(&self) -> impl Iterator<Item = &CompiledProp> {
        self.props.values().filter(|prop| prop.is_owning_ref())
    }

    /// Zeroed storage with every plain default encoded at its offset.
    pub fn default_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.byte_length as usize];
        for prop in self.props.values() {
            if let Some(default) = prop.default.as_ref().filter(|_| prop.kind.is_plain()) {
                // Defaults were validated when the definition was compiled.
                let _ = prop.encode_plain(default, &mut bytes[prop.range()]);
            }
        }
        bytes
    }
}

/// Collects declarations until [`ResourceDefinitionBuilder::compile`].
#[derive(Clone, Debug)]
pub struct ResourceDefinitionBuilder {
    name: String,
    props: Vec<(String, PropType)>,
}

impl ResourceDefinitionBuilder {
    pub fn prop(mut self, name: impl Into<String>, prop: PropType) -> Self {
        self.props.push((name.into(), prop));
        self
    }

    /// Assigns offsets in declaration order and validates every declaration.
    pub fn compile(self) -> SchemaResult<ResourceDefinition> {
        let mut props = IndexMap::with_capacity(self.props.len());
        let mut cursor = 0u32;

        for (name, declared) in self.props {
            let prop = compile_prop(&self.name, name, declared, cursor)?;
            cursor = cursor
                .checked_add(prop.byte_length)
                .ok_or_else(|| SchemaError::LayoutTooLarge {
                    resource: self.name.clone(),
                })?;
            if props.contains_key(&prop.name) {
                return Err(SchemaError::DuplicateProp {
                    resource: self.name,
                    prop: prop.name,
                });
            }
            props.insert(prop.name.clone(), prop);
        }

        Ok(ResourceDefinition {
            name: self.name,
            props,
            byte_length: cursor,
        })
    }
}

fn compile_prop(
    resource: &str,
    name: String,
    declared: PropType,
    byte_offset: u32,
) -> SchemaResult<CompiledProp> {
    let PropType {
        kind,
        count,
        target,
        default,
        required,
        mutable,
        script,
        back_ref,
        min,
        max,
    } = declared;

    let (kind, target) = match kind {
        PropKind::SelfRef => (PropKind::Ref, Some(resource.to_owned())),
        kind => (kind, target),
    };

    if kind.is_reference() {
        if target.as_deref().map_or(true, str::is_empty) {
            return Err(SchemaError::MissingTarget { prop: name });
        }
        if count == 0 {
            return Err(SchemaError::ZeroCapacity { prop: name });
        }
    }
    if back_ref && kind != PropKind::Ref {
        return Err(SchemaError::BackRefOnNonRef { prop: name, kind });
    }
    if script && !mutable {
        return Err(SchemaError::ScriptRequiresMutable { prop: name });
    }
    if (min.is_some() || max.is_some()) && !kind.is_numeric() {
        return Err(SchemaError::BoundsOnNonNumeric { prop: name, kind });
    }
    if let (Some(min), Some(max)) = (min, max) {
        if min > max {
            return Err(SchemaError::InvertedBounds {
                prop: name,
                min,
                max,
            });
        }
    }
    if default.is_some() {
        if required {
            return Err(SchemaError::RequiredWithDefault { prop: name });
        }
        if !kind.is_plain() && kind != PropKind::String {
            return Err(SchemaError::DefaultNotSupported { prop: name, kind });
        }
    }

    let byte_length = count
        .checked_mul(ELEMENT_SIZE)
        .ok_or_else(|| SchemaError::LayoutTooLarge {
            resource: resource.to_owned(),
        })?;
    let prop = CompiledProp {
        name,
        kind,
        element_count: count,
        byte_offset,
        byte_length,
        required,
        mutable,
        script,
        back_ref,
        default,
        min,
        max,
        target,
    };
    if let Some(default) = &prop.default {
        prop.validate(default)?;
    }
    Ok(prop)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{read_f32, read_u32};
    use proptest::prelude::*;

    fn material() -> ResourceDefinitionBuilder {
        ResourceDefinition::builder("material")
            .prop("name", PropType::string().with_default("material"))
            .prop("doubleSided", PropType::bool())
            .prop("baseColorFactor", PropType::rgba().with_default([1.0f32; 4]))
            .prop("metallicFactor", PropType::f32().with_default(1.0f32).min(0.0).max(1.0))
            .prop("baseColorTexture", PropType::reference("texture"))
            .prop("transform", PropType::mat4())
            .prop("images", PropType::ref_array("image", 4))
    }

    #[test]
    fn offsets_follow_declaration_order() {
        let definition = material().compile().expect("compile");
        let layout: Vec<_> = definition
            .props()
            .map(|prop| (prop.name.as_str(), prop.byte_offset, prop.byte_length))
            .collect();
        assert_eq!(
            layout,
            vec![
                ("name", 0, 4),
                ("doubleSided", 4, 4),
                ("baseColorFactor", 8, 16),
                ("metallicFactor", 24, 4),
                ("baseColorTexture", 28, 4),
                ("transform", 32, 64),
                ("images", 96, 16),
            ]
        );
        assert_eq!(definition.byte_length(), 112);
        assert_eq!(definition.prop_index("transform"), Some(5));
    }

    #[test]
    fn compilation_is_deterministic() {
        assert_eq!(material().compile(), material().compile());
    }

    #[test]
    fn array_buffer_takes_three_words() {
        let definition = ResourceDefinition::builder("accessor")
            .prop("data", PropType::array_buffer())
            .prop("count", PropType::u32())
            .compile()
            .expect("compile");
        assert_eq!(definition.prop("data").map(|p| p.byte_length), Some(12));
        assert_eq!(definition.prop("count").map(|p| p.byte_offset), Some(12));
    }

    #[test]
    fn self_reference_becomes_reference_to_own_type() {
        let definition = ResourceDefinition::builder("node")
            .prop("parent", PropType::self_ref().back_ref())
            .prop("firstChild", PropType::self_ref())
            .compile()
            .expect("compile");
        let parent = definition.prop("parent").expect("parent");
        assert_eq!(parent.kind, PropKind::Ref);
        assert_eq!(parent.target.as_deref(), Some("node"));
        assert!(!parent.is_owning_ref());
        let owning: Vec<_> = definition.owning_refs().map(|p| p.name.as_str()).collect();
        assert_eq!(owning, vec!["firstChild"]);
    }

    #[test]
    fn default_bytes_encode_plain_defaults() {
        let definition = material().compile().expect("compile");
        let bytes = definition.default_bytes();
        let color = definition.prop("baseColorFactor").expect("prop");
        assert_eq!(read_f32(&bytes[color.range()], 3), 1.0);
        let metallic = definition.prop("metallicFactor").expect("prop");
        assert_eq!(read_f32(&bytes[metallic.range()], 0), 1.0);
        // String defaults are interned at construction, not baked into bytes.
        let name = definition.prop("name").expect("prop");
        assert_eq!(read_u32(&bytes[name.range()], 0), 0);
    }

    #[test]
    fn rejects_invalid_declarations() {
        let compile = |prop: PropType| {
            ResourceDefinition::builder("broken")
                .prop("field", prop)
                .compile()
                .unwrap_err()
        };

        assert!(matches!(
            compile(PropType::u32().required().with_default(1u32)),
            SchemaError::RequiredWithDefault { .. }
        ));
        assert!(matches!(
            compile(PropType::ref_array("texture", 0)),
            SchemaError::ZeroCapacity { .. }
        ));
        assert!(matches!(
            compile(PropType::reference("")),
            SchemaError::MissingTarget { .. }
        ));
        assert!(matches!(
            compile(PropType::f32().back_ref()),
            SchemaError::BackRefOnNonRef { .. }
        ));
        assert!(matches!(
            compile(PropType::f32().immutable().script()),
            SchemaError::ScriptRequiresMutable { .. }
        ));
        assert!(matches!(
            compile(PropType::vec3().min(0.0)),
            SchemaError::BoundsOnNonNumeric { .. }
        ));
        assert!(matches!(
            compile(PropType::f32().min(2.0).max(1.0)),
            SchemaError::InvertedBounds { .. }
        ));
        assert!(matches!(
            compile(PropType::f32().max(1.0).with_default(2.0f32)),
            SchemaError::OutOfBounds { .. }
        ));
        assert!(matches!(
            compile(PropType::vec3().with_default([0.0f32, 1.0])),
            SchemaError::LengthMismatch { expected: 3, actual: 2, .. }
        ));
        assert!(matches!(
            compile(PropType::bool().with_default(1u32)),
            SchemaError::KindMismatch { .. }
        ));
        assert!(matches!(
            compile(PropType::reference("texture").with_default(PropValue::Ref(None))),
            SchemaError::DefaultNotSupported { .. }
        ));

        let duplicate = ResourceDefinition::builder("broken")
            .prop("field", PropType::u32())
            .prop("field", PropType::f32())
            .compile();
        assert!(matches!(duplicate, Err(SchemaError::DuplicateProp { .. })));
    }

    #[test]
    fn validate_checks_collection_capacity_and_density() {
        let definition = material().compile().expect("compile");
        let images = definition.prop("images").expect("prop");
        assert!(images.validate(&PropValue::refs([Some(1), Some(2)])).is_ok());
        assert!(matches!(
            images.validate(&PropValue::refs([Some(1); 5])),
            Err(SchemaError::CapacityExceeded { capacity: 4, actual: 5, .. })
        ));
        assert!(matches!(
            images.validate(&PropValue::refs([Some(1), None])),
            Err(SchemaError::KindMismatch { .. })
        ));
    }

    fn any_prop() -> impl Strategy<Value = (PropType, u32)> {
        prop_oneof![
            Just((PropType::bool(), 4)),
            Just((PropType::f32(), 4)),
            Just((PropType::vec2(), 8)),
            Just((PropType::rgb(), 12)),
            Just((PropType::quat(), 16)),
            Just((PropType::mat4(), 64)),
            Just((PropType::string(), 4)),
            Just((PropType::array_buffer(), 12)),
            Just((PropType::self_ref(), 4)),
            (1u32..9).prop_map(|n| (PropType::ref_map("texture", n), n * 4)),
        ]
    }

    proptest! {
        #[test]
        fn offsets_are_prefix_sums(props in proptest::collection::vec(any_prop(), 0..24)) {
            let mut builder = ResourceDefinition::builder("generated");
            for (index, (prop, _)) in props.iter().enumerate() {
                builder = builder.prop(format!("p{index}"), prop.clone());
            }
            let definition = builder.clone().compile().expect("compile");

            let mut expected_offset = 0;
            for (prop, (_, size)) in definition.props().zip(&props) {
                prop_assert_eq!(prop.byte_offset, expected_offset);
                prop_assert_eq!(prop.byte_length, *size);
                expected_offset += size;
            }
            prop_assert_eq!(definition.byte_length(), expected_offset);
            prop_assert_eq!(builder.compile().expect("compile"), definition);
        }
    }
}
