use std::collections::{BTreeMap, BTreeSet};

use log::info;

use crate::{
    config::MeshConfig,
    datatypes::{Element, MaterialTag, Region, RegionId, RegionKey, RemappedElement},
    error::{Result, ZapataError},
};

/// Operator supplied region to material assignment
#[derive(Debug, Clone, PartialEq)]
pub enum MaterialMap {
    /// Every region id is used as its own material tag
    Identity,
    /// Explicit entries, looked up by region name first, then by region id
    Configured(BTreeMap<RegionKey, MaterialTag>),
}

impl MaterialMap {
    pub fn from_config(config: &MeshConfig) -> MaterialMap {
        MaterialMap::Configured(config.material_keys())
    }

    /// Tag for one region, `Ok(None)` if the mapping has no entry for it
    pub fn lookup(&self, region: &Region) -> Result<Option<MaterialTag>> {
        match self {
            MaterialMap::Identity => MaterialTag::new(region.id as i64).map(Some),
            MaterialMap::Configured(entries) => {
                let by_name = region
                    .name
                    .as_ref()
                    .and_then(|name| entries.get(&RegionKey::Name(name.clone())));
                Ok(by_name
                    .or_else(|| entries.get(&RegionKey::Id(region.id)))
                    .copied())
            }
        }
    }
}

/// Attaches a material tag to every surviving element
///
/// Only regions referenced by at least one element are resolved. Every
/// unresolved region is named in the error.
pub fn resolve_tags(
    elements: Vec<RemappedElement>,
    regions: &BTreeMap<RegionId, Region>,
    map: &MaterialMap,
) -> Result<Vec<Element>> {
    let used: BTreeSet<RegionId> = elements.iter().map(|e| e.region).collect();

    let mut tags: BTreeMap<RegionId, MaterialTag> = BTreeMap::new();
    let mut unresolved: Vec<String> = Vec::new();
    for id in used {
        let region = match regions.get(&id) {
            Some(region) => region.clone(),
            None => Region { id, name: None },
        };
        match map.lookup(&region)? {
            Some(tag) => {
                info!("region {} -> material tag {}", region, tag);
                tags.insert(id, tag);
            }
            None => unresolved.push(region.to_string()),
        }
    }

    if !unresolved.is_empty() {
        return Err(ZapataError::Configuration(format!(
            "no material tag configured for region(s): {}",
            unresolved.join(", ")
        )));
    }

    let mut resolved = Vec::with_capacity(elements.len());
    for element in elements {
        let material = *tags.get(&element.region).ok_or_else(|| {
            ZapataError::Translation(format!(
                "region {} lost its material tag during resolution",
                element.region
            ))
        })?;
        resolved.push(Element {
            id: element.id,
            nodes: element.nodes,
            region: element.region,
            material,
        });
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remapped(id: usize, region: RegionId) -> RemappedElement {
        RemappedElement {
            id,
            source_index: id - 1,
            nodes: [1, 2, 3, 4],
            region,
        }
    }

    fn regions() -> BTreeMap<RegionId, Region> {
        let mut regions = BTreeMap::new();
        regions.insert(
            1,
            Region {
                id: 1,
                name: Some("SOIL_1".to_owned()),
            },
        );
        regions.insert(
            2,
            Region {
                id: 2,
                name: Some("FOOTING".to_owned()),
            },
        );
        regions.insert(3, Region { id: 3, name: None });
        regions
    }

    fn tag(value: i64) -> MaterialTag {
        MaterialTag::new(value).unwrap()
    }

    #[test]
    fn names_take_precedence_over_ids() {
        let mut entries = BTreeMap::new();
        entries.insert(RegionKey::Name("FOOTING".to_owned()), tag(4));
        entries.insert(RegionKey::Id(2), tag(9));
        entries.insert(RegionKey::Name("SOIL_1".to_owned()), tag(1));
        let map = MaterialMap::Configured(entries);

        let elements = resolve_tags(vec![remapped(1, 1), remapped(2, 2)], &regions(), &map)
            .unwrap();
        assert_eq!(elements[0].material, tag(1));
        assert_eq!(elements[1].material, tag(4));
    }

    #[test]
    fn unnamed_region_resolves_by_id() {
        let mut entries = BTreeMap::new();
        entries.insert(RegionKey::Id(3), tag(7));
        let map = MaterialMap::Configured(entries);
        let elements = resolve_tags(vec![remapped(1, 3)], &regions(), &map).unwrap();
        assert_eq!(elements[0].material, tag(7));
    }

    #[test]
    fn missing_regions_are_all_reported() {
        let mut entries = BTreeMap::new();
        entries.insert(RegionKey::Name("SOIL_1".to_owned()), tag(1));
        let map = MaterialMap::Configured(entries);
        let err = resolve_tags(
            vec![remapped(1, 1), remapped(2, 2), remapped(3, 3)],
            &regions(),
            &map,
        )
        .unwrap_err();
        let message = err.to_string();
        assert!(matches!(err, ZapataError::Configuration(_)));
        assert!(message.contains("FOOTING (id 2)"));
        assert!(message.contains("id 3"));
    }

    #[test]
    fn unused_regions_need_no_tag() {
        let map = MaterialMap::Configured(BTreeMap::new());
        assert!(resolve_tags(Vec::new(), &regions(), &map).unwrap().is_empty());
    }

    #[test]
    fn identity_mapping_rejects_non_positive_ids() {
        let mut regions = regions();
        regions.insert(0, Region { id: 0, name: None });
        let ok = resolve_tags(vec![remapped(1, 3)], &regions, &MaterialMap::Identity).unwrap();
        assert_eq!(ok[0].material, tag(3));

        let err = resolve_tags(vec![remapped(1, 0)], &regions, &MaterialMap::Identity)
            .unwrap_err();
        assert!(matches!(err, ZapataError::Validation(_)));
    }
}
