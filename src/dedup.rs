//! Fusion of coincident nodes.
//!
//! Two raw nodes are coincident when their distance is strictly below the
//! tolerance. Coincidence classes are the connected components of that
//! relation, so chains of near nodes fuse transitively. Candidate pairs come
//! from a uniform grid anchored at the bounding-box minimum. The cell edge is
//! never below the tolerance, so any coincident partner lies in one of the
//! 27 cells around a node, and never below `extent / 2^20`, so cell keys stay
//! small whatever the tolerance.

use std::collections::HashMap;

use indicatif::ProgressBar;
use log::info;

use crate::{
    datatypes::{Node, Vertex},
    error::{Result, ZapataError},
};

/// Meshes below this many nodes are processed without a progress bar
const PROGRESS_THRESHOLD: usize = 10_000;

/// Upper bound on the number of cells along the bounding-box diagonal
const MAX_CELLS_PER_AXIS: f64 = (1u64 << 20) as f64;

type CellKey = (i64, i64, i64);

/// Result of the fusion pass
#[derive(Debug, Clone)]
pub struct Deduplication {
    /// Canonical nodes, ids 1..=M in order of first raw member
    pub nodes: Vec<Node>,
    /// Canonical id for every raw node position
    pub index_map: Vec<usize>,
}

impl Deduplication {
    pub fn fused_count(&self) -> usize {
        self.index_map.len() - self.nodes.len()
    }

    /// Canonical id of a raw node position
    pub fn canonical(&self, raw: usize) -> Result<usize> {
        match self.index_map.get(raw) {
            Some(id) => Ok(*id),
            None => Err(ZapataError::Translation(format!(
                "raw node {} is outside the index map of {} entries",
                raw,
                self.index_map.len()
            ))),
        }
    }
}

/// Disjoint-set forest whose root is always the smallest member
struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(size: usize) -> DisjointSet {
        DisjointSet {
            parent: (0..size).collect(),
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        let mut root = i;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        // path compression
        while self.parent[i] != root {
            let next = self.parent[i];
            self.parent[i] = root;
            i = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            let (low, high) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[high] = low;
        }
    }
}

/// Uniform grid over the raw node cloud
struct Grid {
    origin: Vertex,
    cell: f64,
}

impl Grid {
    fn covering(raw_nodes: &[Vertex], tolerance: f64) -> Grid {
        let Some(first) = raw_nodes.first() else {
            return Grid {
                origin: Vertex::new(0.0, 0.0, 0.0),
                cell: tolerance,
            };
        };
        let (mut min, mut max) = (*first, *first);
        for v in raw_nodes {
            min = Vertex::new(min.x.min(v.x), min.y.min(v.y), min.z.min(v.z));
            max = Vertex::new(max.x.max(v.x), max.y.max(v.y), max.z.max(v.z));
        }
        let extent = min.distance(&max);
        let cell = if extent.is_finite() {
            tolerance.max(extent / MAX_CELLS_PER_AXIS)
        } else {
            tolerance
        };
        Grid { origin: min, cell }
    }

    fn key(&self, vertex: &Vertex) -> CellKey {
        (
            ((vertex.x - self.origin.x) / self.cell).floor() as i64,
            ((vertex.y - self.origin.y) / self.cell).floor() as i64,
            ((vertex.z - self.origin.z) / self.cell).floor() as i64,
        )
    }
}

/// Fuses coincident raw nodes
///
/// # Arguments
/// * `raw_nodes` - Node coordinates in source order
/// * `tolerance` - Coincidence distance, strictly positive
///
/// # Returns
/// The canonical node list and the raw-to-canonical index map
pub fn deduplicate(raw_nodes: &[Vertex], tolerance: f64) -> Result<Deduplication> {
    if !(tolerance.is_finite() && tolerance > 0.0) {
        return Err(ZapataError::Validation(format!(
            "coincidence tolerance must be strictly positive, got {tolerance}"
        )));
    }

    let bar = if raw_nodes.len() >= PROGRESS_THRESHOLD {
        ProgressBar::new(raw_nodes.len() as u64)
    } else {
        ProgressBar::hidden()
    };

    let layout = Grid::covering(raw_nodes, tolerance);
    let mut classes = DisjointSet::new(raw_nodes.len());
    let mut grid: HashMap<CellKey, Vec<usize>> = HashMap::with_capacity(raw_nodes.len());

    for (i, vertex) in raw_nodes.iter().enumerate() {
        let (cx, cy, cz) = layout.key(vertex);
        for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    let neighbour = (
                        cx.saturating_add(dx),
                        cy.saturating_add(dy),
                        cz.saturating_add(dz),
                    );
                    let Some(members) = grid.get(&neighbour) else {
                        continue;
                    };
                    for &j in members {
                        if vertex.distance(&raw_nodes[j]) < tolerance {
                            classes.union(i, j);
                        }
                    }
                }
            }
        }
        grid.entry((cx, cy, cz)).or_default().push(i);
        bar.inc(1);
    }
    bar.finish_and_clear();

    // Roots are the first raw member of each class, so walking raw positions
    // in order numbers classes by first encounter.
    let mut nodes: Vec<Node> = Vec::new();
    let mut root_ids: Vec<usize> = vec![0; raw_nodes.len()];
    let mut index_map: Vec<usize> = Vec::with_capacity(raw_nodes.len());
    for (i, vertex) in raw_nodes.iter().enumerate() {
        let root = classes.find(i);
        if root == i {
            let id = nodes.len() + 1;
            nodes.push(Node {
                id,
                vertex: *vertex,
            });
            root_ids[i] = id;
        }
        index_map.push(root_ids[root]);
    }

    info!(
        "fused {} coincident nodes: {} raw nodes -> {} canonical nodes (tolerance {:e})",
        raw_nodes.len() - nodes.len(),
        raw_nodes.len(),
        nodes.len(),
        tolerance
    );

    Ok(Deduplication { nodes, index_map })
}
