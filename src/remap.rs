use indicatif::ProgressBar;
use log::{debug, info, warn};
use nalgebra::Matrix3;

use crate::{
    datatypes::{Node, RawElement, RemappedElement, Vertex, TET_NODES},
    dedup::Deduplication,
    error::{Result, ZapataError},
};

const PROGRESS_THRESHOLD: usize = 10_000;

/// Number of rejected element positions listed at debug level
const REJECT_LOG_LIMIT: usize = 10;

#[derive(Debug, Clone, Copy)]
pub struct RemapOptions {
    /// Relative volume threshold: degenerate when |V| < ratio * Lmax^3
    pub degeneracy_ratio: f64,
    /// Swap the last two nodes of negatively oriented elements
    pub reorient: bool,
}

#[derive(Debug, Clone)]
pub struct RemapOutcome {
    pub elements: Vec<RemappedElement>,
    /// Source positions of the elements discarded as degenerate
    pub rejected: Vec<usize>,
    pub reoriented: usize,
    pub source_count: usize,
}

impl RemapOutcome {
    pub fn rejected_count(&self) -> usize {
        self.rejected.len()
    }

    /// Fails when the share of degenerate elements exceeds `max_fraction`
    pub fn check_reject_fraction(&self, max_fraction: f64) -> Result<()> {
        if self.source_count == 0 {
            return Ok(());
        }
        let fraction = self.rejected.len() as f64 / self.source_count as f64;
        if fraction > max_fraction {
            return Err(ZapataError::Validation(format!(
                "{} degenerate elements, exceeding {}% threshold of {}",
                self.rejected.len(),
                format_percent(max_fraction),
                self.source_count
            )));
        }
        Ok(())
    }
}

fn format_percent(fraction: f64) -> String {
    let percent = (fraction * 100.0 * 1e6).round() / 1e6;
    format!("{percent}")
}

/// Signed volume of the tetrahedron (a, b, c, d)
pub fn signed_volume(a: &Vertex, b: &Vertex, c: &Vertex, d: &Vertex) -> f64 {
    let origin = a.to_vector();
    let edges = Matrix3::from_columns(&[
        b.to_vector() - origin,
        c.to_vector() - origin,
        d.to_vector() - origin,
    ]);
    edges.determinant() / 6.0
}

/// Length of the longest of the six edges
pub fn longest_edge(corners: &[Vertex; TET_NODES]) -> f64 {
    let mut longest: f64 = 0.0;
    for i in 0..TET_NODES {
        for j in (i + 1)..TET_NODES {
            longest = longest.max(corners[i].distance(&corners[j]));
        }
    }
    longest
}

fn corners_of(nodes: &[Node], ids: &[usize; TET_NODES]) -> Result<[Vertex; TET_NODES]> {
    let mut corners = [Vertex::new(0.0, 0.0, 0.0); TET_NODES];
    for (corner, id) in corners.iter_mut().zip(ids) {
        match id.checked_sub(1).and_then(|i| nodes.get(i)) {
            Some(node) => *corner = node.vertex,
            None => {
                return Err(ZapataError::Translation(format!(
                    "index map references canonical node {} but only {} exist",
                    id,
                    nodes.len()
                )))
            }
        }
    }
    Ok(corners)
}

fn has_repeated_node(ids: &[usize; TET_NODES]) -> bool {
    (0..TET_NODES).any(|i| ((i + 1)..TET_NODES).any(|j| ids[i] == ids[j]))
}

/// Rewrites element connectivity onto canonical nodes
///
/// Elements collapsed by the fusion or with a relative volume below the
/// degeneracy ratio are dropped and counted. Survivors are numbered 1.. in
/// source order and keep their region.
pub fn remap_elements(
    raw_elements: &[RawElement],
    dedup: &Deduplication,
    options: RemapOptions,
) -> Result<RemapOutcome> {
    let bar = if raw_elements.len() >= PROGRESS_THRESHOLD {
        ProgressBar::new(raw_elements.len() as u64)
    } else {
        ProgressBar::hidden()
    };

    let mut elements: Vec<RemappedElement> = Vec::with_capacity(raw_elements.len());
    let mut rejected: Vec<usize> = Vec::new();
    let mut reoriented: usize = 0;

    for (source_index, raw) in raw_elements.iter().enumerate() {
        bar.inc(1);

        let mut ids = [0usize; TET_NODES];
        for (id, raw_node) in ids.iter_mut().zip(raw.nodes.iter()) {
            *id = dedup.canonical(*raw_node)?;
        }

        if has_repeated_node(&ids) {
            rejected.push(source_index);
            continue;
        }

        let corners = corners_of(&dedup.nodes, &ids)?;
        let volume = signed_volume(&corners[0], &corners[1], &corners[2], &corners[3]);
        let scale = longest_edge(&corners).powi(3);
        if volume.abs() < options.degeneracy_ratio * scale {
            rejected.push(source_index);
            continue;
        }

        if volume < 0.0 && options.reorient {
            ids.swap(2, 3);
            reoriented += 1;
        }

        elements.push(RemappedElement {
            id: elements.len() + 1,
            source_index,
            nodes: ids,
            region: raw.region,
        });
    }
    bar.finish_and_clear();

    if !rejected.is_empty() {
        warn!(
            "[remap] discarded {} degenerate elements out of {}",
            rejected.len(),
            raw_elements.len()
        );
        debug!(
            "[remap] first rejected source elements: {:?}",
            &rejected[..rejected.len().min(REJECT_LOG_LIMIT)]
        );
    }
    if reoriented > 0 {
        warn!("[remap] reoriented {} inverted elements", reoriented);
    }
    info!(
        "remapped {} elements onto canonical nodes ({} rejected)",
        elements.len(),
        rejected.len()
    );

    Ok(RemapOutcome {
        elements,
        rejected,
        reoriented,
        source_count: raw_elements.len(),
    })
}
