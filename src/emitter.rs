//! Rendering of the solver input scripts and the companion summary.
//!
//! Every artifact is rendered to memory and staged as a temporary file inside
//! the output directory before the first rename, so a render or staging
//! failure leaves existing outputs untouched. The renames are not atomic as a
//! set: if one fails, the files renamed before it are already replaced and the
//! error names the file that failed.

use std::io::Write as _;
use std::path::{Path, PathBuf};

use log::info;
use tempfile::NamedTempFile;

use crate::{
    datatypes::{Element, MaterialTag, Node},
    error::{Result, ZapataError},
    script::Script,
    stats::MeshStats,
    vtu,
};

pub const NODES_FILE: &str = "nodes.tcl";
pub const ELEMENTS_FILE: &str = "elements.tcl";
pub const MATERIALS_FILE: &str = "materials.tcl";
pub const INFO_FILE: &str = "mesh_info.txt";
pub const FUSED_VTU_FILE: &str = "mesh_fused.vtu";

const ELEMENT_TYPE: &str = "FourNodeTetrahedron";
const RULE: &str = "# ============================================";
const SUBRULE: &str = "# -----------------------------------------";

#[derive(Debug, Clone, Copy)]
pub struct EmitOptions {
    pub coordinate_precision: usize,
    /// Tag that receives concrete defaults in the materials template
    pub footing_tag: Option<MaterialTag>,
    pub fused_vtu: bool,
}

/// What happened upstream of the emitter, reported in `mesh_info.txt`
#[derive(Debug, Clone)]
pub struct RunReport {
    pub source: PathBuf,
    pub raw_node_count: usize,
    pub source_element_count: usize,
    pub skipped_cells: usize,
    pub rejected_elements: usize,
    pub reoriented_elements: usize,
    pub tolerance: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub name: &'static str,
    pub contents: String,
}

fn section_header(out: &mut Script, rule: &str, title: &str) {
    out.line(rule);
    out.line(title);
    out.line(rule);
}

pub fn render_nodes(nodes: &[Node], precision: usize) -> String {
    let mut out = Script::new();
    section_header(&mut out, RULE, "# NODE DEFINITIONS");
    out.line(format!("# Total nodes: {}", nodes.len()));
    out.line("# Format: node <tag> <x> <y> <z>");
    out.line(RULE);
    out.blank();
    for node in nodes {
        let v = node.vertex;
        out.line(format!(
            "node {} {:.p$} {:.p$} {:.p$}",
            node.id,
            v.x,
            v.y,
            v.z,
            p = precision
        ));
    }
    out.finish()
}

/// Element script, grouped by ascending material tag
pub fn render_elements(elements: &[Element]) -> String {
    let mut sorted: Vec<&Element> = elements.iter().collect();
    sorted.sort_by_key(|e| (e.material, e.id));

    let mut out = Script::new();
    section_header(&mut out, RULE, "# TETRAHEDRAL ELEMENT DEFINITIONS");
    out.line(format!("# Total elements: {}", elements.len()));
    out.line(format!("# Type: {ELEMENT_TYPE}"));
    out.line(format!(
        "# Format: element {ELEMENT_TYPE} <tag> <n1> <n2> <n3> <n4> <matTag>"
    ));
    out.line(RULE);

    let mut current: Option<MaterialTag> = None;
    for element in sorted {
        if current != Some(element.material) {
            let count = elements
                .iter()
                .filter(|e| e.material == element.material)
                .count();
            out.blank();
            section_header(
                &mut out,
                SUBRULE,
                &format!("# Material {} ({} elements)", element.material, count),
            );
            out.blank();
            current = Some(element.material);
        }
        let [n1, n2, n3, n4] = element.nodes;
        out.line(format!(
            "element {ELEMENT_TYPE} {} {n1} {n2} {n3} {n4} {}",
            element.id, element.material
        ));
    }
    out.finish()
}

/// Materials and boundary-condition template; the operator completes it by hand
pub fn render_materials(stats: &MeshStats, options: &EmitOptions) -> String {
    let mut out = Script::new();
    section_header(&mut out, RULE, "# MATERIAL DEFINITIONS");
    out.line("# This is a template: complete the parameters for your project");
    out.line(RULE);

    for (tag, count) in &stats.per_tag {
        out.blank();
        section_header(
            &mut out,
            SUBRULE,
            &format!("# Material {} ({} elements)", tag, count),
        );
        if options.footing_tag == Some(*tag) {
            out.line("# Concrete footing");
            out.line(format!("# nDMaterial ElasticIsotropic {tag} <E> <nu> <rho>"));
            out.line(format!("nDMaterial ElasticIsotropic {tag} 2.5e7 0.2 2.4"));
        } else {
            out.line(format!("# Soil stratum {tag}"));
            out.line(format!(
                "# nDMaterial PressureDependMultiYield {tag} <nd> <rho> <refShearModul> <refBulkModul> <cohesi> <peakShearStra> ..."
            ));
            out.line("# or ElasticIsotropic for a simplified analysis:");
            out.line(format!("# nDMaterial ElasticIsotropic {tag} <E> <nu> <rho>"));
            out.line(format!(
                "nDMaterial ElasticIsotropic {tag} 3.0e4 0.3 1.8  ;# COMPLETE PARAMETERS"
            ));
        }
    }

    if let Some(bbox) = stats.bbox {
        let p = options.coordinate_precision;
        out.blank();
        section_header(&mut out, RULE, "# BOUNDARY CONDITIONS");
        out.line("# Base: fully fixed");
        out.line(format!("fixZ {:.p$} 1 1 1", bbox.min.z));
        out.line("# Lateral faces: rollers normal to the face");
        out.line(format!("fixX {:.p$} 1 0 0", bbox.min.x));
        out.line(format!("fixX {:.p$} 1 0 0", bbox.max.x));
        out.line(format!("fixY {:.p$} 0 1 0", bbox.min.y));
        out.line(format!("fixY {:.p$} 0 1 0", bbox.max.y));
    }
    out.finish()
}

pub fn render_mesh_info(stats: &MeshStats, report: &RunReport, options: &EmitOptions) -> String {
    let banner = "=".repeat(70);
    let mut out = Script::new();
    section_header(&mut out, &banner, "CONVERTED MESH INFORMATION");
    out.blank();
    out.line(format!("Source file: {}", report.source.display()));
    out.line(format!("Coincidence tolerance: {:e}", report.tolerance));
    out.blank();

    out.line("STATISTICS:");
    out.line(format!("  Raw nodes: {}", report.raw_node_count));
    out.line(format!(
        "  Fused nodes: {}",
        report.raw_node_count.saturating_sub(stats.node_count)
    ));
    out.line(format!("  Nodes: {}", stats.node_count));
    out.line(format!("  Source elements: {}", report.source_element_count));
    out.line(format!(
        "  Rejected degenerate elements: {}",
        report.rejected_elements
    ));
    out.line(format!("  Reoriented elements: {}", report.reoriented_elements));
    if report.skipped_cells > 0 {
        out.line(format!(
            "  Skipped non-tetrahedral cells: {}",
            report.skipped_cells
        ));
    }
    out.line(format!("  Elements: {}", stats.element_count));
    out.line(format!("  Element type: {ELEMENT_TYPE}"));
    out.blank();

    if let Some(bbox) = stats.bbox {
        out.line("MESH BOUNDS:");
        out.line(format!("  X: [{:.3}, {:.3}] m", bbox.min.x, bbox.max.x));
        out.line(format!("  Y: [{:.3}, {:.3}] m", bbox.min.y, bbox.max.y));
        out.line(format!("  Z: [{:.3}, {:.3}] m", bbox.min.z, bbox.max.z));
        out.blank();
    }

    out.line("DISTRIBUTION BY MATERIAL:");
    for (tag, count) in &stats.per_tag {
        let footing = if options.footing_tag == Some(*tag) {
            " [footing]"
        } else {
            ""
        };
        out.line(format!(
            "  Material {}: {} elements ({:.1}%){}",
            tag,
            count,
            stats.percentage(*tag),
            footing
        ));
    }
    out.blank();

    if let Some(volumes) = stats.volumes {
        out.line("ELEMENT QUALITY:");
        out.line(format!("  Minimum volume: {:.6e} m3", volumes.min));
        out.line(format!("  Maximum volume: {:.6e} m3", volumes.max));
        out.line(format!("  Mean volume: {:.6e} m3", volumes.mean));
        out.line(format!("  Max/min ratio: {:.2}", volumes.ratio()));
        out.blank();
    }

    out.line("INTERFACE CONNECTIVITY:");
    out.line(format!(
        "  Nodes shared between materials: {}",
        stats.interface.shared_nodes
    ));
    for ((a, b), count) in &stats.interface.pairs {
        out.line(format!("  Material {a} / Material {b}: {count} nodes"));
    }

    out.blank();
    section_header(&mut out, &banner, "GENERATED FILES:");
    out.line(format!("  {NODES_FILE:<15}- node definitions"));
    out.line(format!("  {ELEMENTS_FILE:<15}- element definitions"));
    out.line(format!("  {MATERIALS_FILE:<15}- material template (EDIT)"));
    out.line(format!("  {INFO_FILE:<15}- this file"));
    if options.fused_vtu {
        out.line(format!("  {FUSED_VTU_FILE:<15}- fused mesh for inspection"));
    }
    out.blank();
    section_header(&mut out, &banner, "USAGE IN OPENSEES:");
    out.line("# In your main .tcl script:");
    out.line(format!("source {MATERIALS_FILE}"));
    out.line(format!("source {NODES_FILE}"));
    out.line(format!("source {ELEMENTS_FILE}"));
    out.line(&banner);
    out.finish()
}

/// Renders the full artifact set in memory
pub fn render_artifacts(
    nodes: &[Node],
    elements: &[Element],
    stats: &MeshStats,
    report: &RunReport,
    options: &EmitOptions,
) -> Result<Vec<Artifact>> {
    let mut artifacts = vec![
        Artifact {
            name: NODES_FILE,
            contents: render_nodes(nodes, options.coordinate_precision),
        },
        Artifact {
            name: ELEMENTS_FILE,
            contents: render_elements(elements),
        },
        Artifact {
            name: MATERIALS_FILE,
            contents: render_materials(stats, options),
        },
        Artifact {
            name: INFO_FILE,
            contents: render_mesh_info(stats, report, options),
        },
    ];
    if options.fused_vtu {
        artifacts.push(Artifact {
            name: FUSED_VTU_FILE,
            contents: vtu::render_vtu(nodes, elements)?,
        });
    }
    Ok(artifacts)
}

/// Writes the artifacts into `out_dir`, creating it if needed
///
/// All artifacts are staged before the first one is renamed into place. A
/// failed rename stops the loop and leaves the earlier files replaced.
///
/// # Returns
/// The final paths of the written files, in artifact order
pub fn write_artifacts(out_dir: &Path, artifacts: &[Artifact]) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(out_dir).map_err(|e| ZapataError::io(out_dir, e))?;

    let mut staged: Vec<(NamedTempFile, PathBuf)> = Vec::with_capacity(artifacts.len());
    for artifact in artifacts {
        let target = out_dir.join(artifact.name);
        let mut file = NamedTempFile::new_in(out_dir).map_err(|e| ZapataError::io(out_dir, e))?;
        file.write_all(artifact.contents.as_bytes())
            .and_then(|_| file.flush())
            .map_err(|e| ZapataError::io(&target, e))?;
        staged.push((file, target));
    }

    let mut written = Vec::with_capacity(staged.len());
    for (file, target) in staged {
        file.persist(&target)
            .map_err(|e| ZapataError::io(&target, e.error))?;
        info!("wrote {}", target.display());
        written.push(target);
    }
    Ok(written)
}
