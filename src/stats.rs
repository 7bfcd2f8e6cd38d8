use std::collections::{BTreeMap, BTreeSet};

use log::{info, warn};

use crate::{
    datatypes::{Element, MaterialTag, Node, Vertex},
    error::{Result, ZapataError},
    remap::signed_volume,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: Vertex,
    pub max: Vertex,
}

impl BoundingBox {
    fn of(nodes: &[Node]) -> Option<BoundingBox> {
        let first = nodes.first()?.vertex;
        let mut bbox = BoundingBox {
            min: first,
            max: first,
        };
        for node in nodes {
            let v = node.vertex;
            bbox.min = Vertex::new(bbox.min.x.min(v.x), bbox.min.y.min(v.y), bbox.min.z.min(v.z));
            bbox.max = Vertex::new(bbox.max.x.max(v.x), bbox.max.y.max(v.y), bbox.max.z.max(v.z));
        }
        Some(bbox)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub total: f64,
}

impl VolumeStats {
    /// Largest over smallest element volume
    pub fn ratio(&self) -> f64 {
        self.max / self.min
    }
}

/// Canonical nodes referenced by elements of more than one material tag
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InterfaceReport {
    pub shared_nodes: usize,
    pub pairs: BTreeMap<(MaterialTag, MaterialTag), usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeshStats {
    pub node_count: usize,
    pub element_count: usize,
    pub per_tag: BTreeMap<MaterialTag, usize>,
    pub bbox: Option<BoundingBox>,
    pub volumes: Option<VolumeStats>,
    pub interface: InterfaceReport,
}

impl MeshStats {
    pub fn compute(nodes: &[Node], elements: &[Element]) -> Result<MeshStats> {
        let mut per_tag: BTreeMap<MaterialTag, usize> = BTreeMap::new();
        for element in elements {
            *per_tag.entry(element.material).or_default() += 1;
        }

        Ok(MeshStats {
            node_count: nodes.len(),
            element_count: elements.len(),
            per_tag,
            bbox: BoundingBox::of(nodes),
            volumes: volume_stats(nodes, elements)?,
            interface: interface_report(nodes.len(), elements),
        })
    }

    /// Share of the elements carrying `tag`, in percent
    pub fn percentage(&self, tag: MaterialTag) -> f64 {
        if self.element_count == 0 {
            return 0.0;
        }
        let count = self.per_tag.get(&tag).copied().unwrap_or(0);
        100.0 * count as f64 / self.element_count as f64
    }

    pub fn log_summary(&self) {
        info!(
            "mesh has {} nodes and {} elements",
            self.node_count, self.element_count
        );
        for (tag, count) in &self.per_tag {
            info!(
                "material {}: {} elements ({:.1}%)",
                tag,
                count,
                self.percentage(*tag)
            );
        }
        if let Some(volumes) = &self.volumes {
            info!(
                "element volume min {:.3e}, max {:.3e}, mean {:.3e}",
                volumes.min, volumes.max, volumes.mean
            );
        }
        info!(
            "{} canonical nodes are shared between material tags",
            self.interface.shared_nodes
        );
        for ((a, b), count) in &self.interface.pairs {
            info!("interface {} / {}: {} shared nodes", a, b, count);
        }
        if self.per_tag.len() >= 2 && self.interface.shared_nodes == 0 {
            warn!("[interface] no node is shared between materials, regions are disconnected");
        }
    }
}

fn volume_stats(nodes: &[Node], elements: &[Element]) -> Result<Option<VolumeStats>> {
    if elements.is_empty() {
        return Ok(None);
    }
    let mut stats = VolumeStats {
        min: f64::INFINITY,
        max: 0.0,
        mean: 0.0,
        total: 0.0,
    };
    for element in elements {
        let mut corners = [Vertex::new(0.0, 0.0, 0.0); 4];
        for (corner, id) in corners.iter_mut().zip(element.nodes.iter()) {
            *corner = id
                .checked_sub(1)
                .and_then(|i| nodes.get(i))
                .map(|n| n.vertex)
                .ok_or_else(|| {
                    ZapataError::Translation(format!(
                        "element {} references missing canonical node {}",
                        element.id, id
                    ))
                })?;
        }
        let volume = signed_volume(&corners[0], &corners[1], &corners[2], &corners[3]).abs();
        stats.min = stats.min.min(volume);
        stats.max = stats.max.max(volume);
        stats.total += volume;
    }
    stats.mean = stats.total / elements.len() as f64;
    Ok(Some(stats))
}

fn interface_report(node_count: usize, elements: &[Element]) -> InterfaceReport {
    let mut tags_per_node: Vec<BTreeSet<MaterialTag>> = vec![BTreeSet::new(); node_count + 1];
    for element in elements {
        for id in element.nodes {
            if let Some(tags) = tags_per_node.get_mut(id) {
                tags.insert(element.material);
            }
        }
    }

    let mut report = InterfaceReport::default();
    for tags in tags_per_node.iter().filter(|t| t.len() >= 2) {
        report.shared_nodes += 1;
        let tags: Vec<MaterialTag> = tags.iter().copied().collect();
        for i in 0..tags.len() {
            for j in (i + 1)..tags.len() {
                *report.pairs.entry((tags[i], tags[j])).or_default() += 1;
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn node(id: usize, x: f64, y: f64, z: f64) -> Node {
        Node {
            id,
            vertex: Vertex::new(x, y, z),
        }
    }

    fn tag(value: i64) -> MaterialTag {
        MaterialTag::new(value).unwrap()
    }

    // two unit-corner tetrahedra sharing the face (2, 3, 4)
    fn fixture() -> (Vec<Node>, Vec<Element>) {
        let nodes = vec![
            node(1, 0.0, 0.0, 0.0),
            node(2, 1.0, 0.0, 0.0),
            node(3, 0.0, 1.0, 0.0),
            node(4, 0.0, 0.0, 1.0),
            node(5, 1.0, 1.0, 1.0),
        ];
        let elements = vec![
            Element {
                id: 1,
                nodes: [1, 2, 3, 4],
                region: 1,
                material: tag(1),
            },
            Element {
                id: 2,
                nodes: [2, 3, 4, 5],
                region: 2,
                material: tag(4),
            },
        ];
        (nodes, elements)
    }

    #[test]
    fn counts_and_bounding_box() {
        let (nodes, elements) = fixture();
        let stats = MeshStats::compute(&nodes, &elements).unwrap();
        assert_eq!(stats.node_count, 5);
        assert_eq!(stats.per_tag.get(&tag(4)), Some(&1));
        assert_relative_eq!(stats.percentage(tag(1)), 50.0);
        let bbox = stats.bbox.unwrap();
        assert_eq!(bbox.min, Vertex::new(0.0, 0.0, 0.0));
        assert_eq!(bbox.max, Vertex::new(1.0, 1.0, 1.0));
    }

    #[test]
    fn volume_statistics() {
        let (nodes, elements) = fixture();
        let volumes = MeshStats::compute(&nodes, &elements).unwrap().volumes.unwrap();
        assert_relative_eq!(volumes.min, 1.0 / 6.0);
        assert_relative_eq!(volumes.max, 1.0 / 3.0);
        assert_relative_eq!(volumes.mean, 0.25);
        assert_relative_eq!(volumes.ratio(), 2.0);
    }

    #[test]
    fn shared_face_nodes_form_the_interface() {
        let (nodes, elements) = fixture();
        let interface = MeshStats::compute(&nodes, &elements).unwrap().interface;
        assert_eq!(interface.shared_nodes, 3);
        assert_eq!(interface.pairs.get(&(tag(1), tag(4))), Some(&3));
    }

    #[test]
    fn same_tag_neighbours_are_not_an_interface() {
        let (nodes, mut elements) = fixture();
        elements[1].material = tag(1);
        let interface = MeshStats::compute(&nodes, &elements).unwrap().interface;
        assert_eq!(interface.shared_nodes, 0);
        assert!(interface.pairs.is_empty());
    }

    #[test]
    fn dangling_node_reference_is_an_internal_error() {
        let (nodes, mut elements) = fixture();
        elements[0].nodes[3] = 42;
        assert!(matches!(
            MeshStats::compute(&nodes, &elements),
            Err(ZapataError::Translation(_))
        ));
    }
}
