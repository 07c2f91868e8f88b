//! Reverse lookups over the references instances hold.

use resource_schema::value::read_u32;
use resource_schema::{CompiledProp, PropKind, ResourceDefinition};
use smallvec::{smallvec, SmallVec};

use crate::{ResourceId, ResourceManager};

/// One slot of one property that keeps a resource alive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Retainer {
    pub resource: ResourceId,
    pub resource_type: String,
    pub prop: String,
    /// Element index inside a reference array or map; 0 otherwise.
    pub slot: u32,
}

pub(crate) struct HeldRef<'a> {
    pub(crate) prop: &'a CompiledProp,
    pub(crate) slot: u32,
    pub(crate) id: ResourceId,
}

/// Every id an instance holds a reference on.
///
/// Strings, array buffers and owning references count; back-references and
/// empty slots do not.
pub(crate) fn held_refs<'a>(
    definition: &'a ResourceDefinition,
    bytes: &'a [u8],
) -> impl Iterator<Item = HeldRef<'a>> + 'a {
    definition.props().flat_map(move |prop| {
        let words = &bytes[prop.range()];
        let ids: SmallVec<[(u32, ResourceId); 8]> = match prop.kind {
            PropKind::String => smallvec![(0, read_u32(words, 0))],
            PropKind::ArrayBuffer => smallvec![(0, read_u32(words, 2))],
            _ if prop.is_owning_ref() => (0..prop.element_count)
                .map(|index| (index, read_u32(words, index as usize)))
                .collect(),
            _ => SmallVec::new(),
        };
        ids.into_iter()
            .filter(|&(_, id)| id != 0)
            .map(move |(slot, id)| HeldRef { prop, slot, id })
    })
}

impl ResourceManager {
    /// Instances holding a reference on `id`, ordered by holder id.
    pub fn find_resource_retainers(&self, id: ResourceId) -> Vec<Retainer> {
        let mut retainers: Vec<Retainer> = self
            .resources()
            .filter_map(|resource| Some((resource, resource.definition()?, resource.bytes()?)))
            .flat_map(|(resource, definition, bytes)| {
                held_refs(definition, bytes)
                    .filter(move |held| held.id == id)
                    .map(move |held| Retainer {
                        resource: resource.id(),
                        resource_type: resource.resource_type().to_owned(),
                        prop: held.prop.name.clone(),
                        slot: held.slot,
                    })
            })
            .collect();
        retainers.sort_by(|a, b| (a.resource, &a.prop, a.slot).cmp(&(b.resource, &b.prop, b.slot)));
        retainers
    }
}
