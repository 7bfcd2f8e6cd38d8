use std::collections::BTreeMap;
use std::fmt::Display;

use nalgebra::Vector3;

use crate::error::ZapataError;

/// Nodes per first-order tetrahedron
pub const TET_NODES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vertex {
    pub fn new(x: f64, y: f64, z: f64) -> Vertex {
        Vertex { x, y, z }
    }

    pub fn to_vector(&self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.z)
    }

    pub fn distance(&self, other: &Vertex) -> f64 {
        (self.to_vector() - other.to_vector()).norm()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// A canonical node. Ids are 1-based, following the solver convention.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: usize,
    pub vertex: Vertex,
}

/// Region identifier as found in the mesh source (physical tag or domain id)
pub type RegionId = i32;

/// A named subdomain of the source mesh, e.g. one soil stratum or the footing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub id: RegionId,
    pub name: Option<String>,
}

impl Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} (id {})", name, self.id),
            None => write!(f, "id {}", self.id),
        }
    }
}

/// Key under which an operator configures a material tag for a region
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RegionKey {
    Id(RegionId),
    Name(String),
}

impl Display for RegionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegionKey::Id(id) => write!(f, "region id {id}"),
            RegionKey::Name(name) => write!(f, "region '{name}'"),
        }
    }
}

/// Solver-facing material identifier. Always a positive integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MaterialTag(u32);

impl MaterialTag {
    pub fn new(value: i64) -> Result<MaterialTag, ZapataError> {
        if value <= 0 || value > u32::MAX as i64 {
            return Err(ZapataError::Validation(format!(
                "material tag {value} is not a positive integer"
            )));
        }
        Ok(MaterialTag(value as u32))
    }

    /// Builds a tag from a JSON number, rejecting fractional values
    pub fn from_f64(value: f64) -> Result<MaterialTag, ZapataError> {
        if !value.is_finite() || value.fract() != 0.0 {
            return Err(ZapataError::Validation(format!(
                "material tag {value} is not a positive integer"
            )));
        }
        MaterialTag::new(value as i64)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl Display for MaterialTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Element as delivered by the mesh source; nodes are raw positions (0-based)
#[derive(Debug, Clone, PartialEq)]
pub struct RawElement {
    pub nodes: [usize; TET_NODES],
    pub region: RegionId,
}

/// Element after remapping; nodes are canonical ids
#[derive(Debug, Clone, PartialEq)]
pub struct RemappedElement {
    pub id: usize,
    /// Position of the element in the source element list
    pub source_index: usize,
    pub nodes: [usize; TET_NODES],
    pub region: RegionId,
}

/// Element with its material resolved, ready for emission
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub id: usize,
    pub nodes: [usize; TET_NODES],
    pub region: RegionId,
    pub material: MaterialTag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Msh,
    Vtu,
}

impl Display for SourceFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceFormat::Msh => write!(f, "Gmsh MSH"),
            SourceFormat::Vtu => write!(f, "VTK XML unstructured grid"),
        }
    }
}

/// Normalized in-memory view of a mesh container
#[derive(Debug, Clone)]
pub struct SourceMesh {
    pub format: SourceFormat,
    pub nodes: Vec<Vertex>,
    pub elements: Vec<RawElement>,
    pub regions: BTreeMap<RegionId, Region>,
    /// Cells present in the container that are not first-order tetrahedra
    pub skipped_cells: usize,
}

impl SourceMesh {
    /// Checks that connectivity only references existing raw nodes and that
    /// every element's region is known
    pub fn validate(&self) -> Result<(), ZapataError> {
        if self.nodes.is_empty() {
            return Err(ZapataError::Parse("mesh contains no nodes".to_owned()));
        }
        if self.elements.is_empty() {
            return Err(ZapataError::Parse(
                "mesh contains no tetrahedral elements".to_owned(),
            ));
        }
        if let Some(i) = self.nodes.iter().position(|v| !v.is_finite()) {
            return Err(ZapataError::Parse(format!(
                "node {} has a non-finite coordinate",
                i
            )));
        }
        for (i, element) in self.elements.iter().enumerate() {
            if let Some(n) = element.nodes.iter().find(|n| **n >= self.nodes.len()) {
                return Err(ZapataError::Parse(format!(
                    "element {} references node {} but the mesh has {} nodes",
                    i,
                    n,
                    self.nodes.len()
                )));
            }
            if !self.regions.contains_key(&element.region) {
                return Err(ZapataError::Translation(format!(
                    "element {} belongs to unregistered region {}",
                    i, element.region
                )));
            }
        }
        Ok(())
    }
}
