//! The translation pass as a one-directional chain of stages.
//!
//! Each stage consumes the previous one, so a stage can only be reached
//! through the stages before it. Any failure ends the run with a
//! [`StageError`] naming the stage.

use std::fmt::Display;
use std::path::{Path, PathBuf};

use log::{info, warn};
use thiserror::Error;

use crate::{
    config::{MeshConfig, TranslationOptions},
    datatypes::{Element, MaterialTag, SourceMesh},
    dedup::{deduplicate, Deduplication},
    emitter::{render_artifacts, write_artifacts, EmitOptions, RunReport},
    error::ZapataError,
    materials::{resolve_tags, MaterialMap},
    remap::{remap_elements, RemapOptions, RemapOutcome},
    source::load_mesh,
    stats::MeshStats,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Load,
    Deduplicate,
    Remap,
    ResolveTags,
    Emit,
}

impl Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Load => "load",
            Stage::Deduplicate => "deduplicate",
            Stage::Remap => "remap",
            Stage::ResolveTags => "resolve-tags",
            Stage::Emit => "emit",
        };
        write!(f, "{name}")
    }
}

#[derive(Error, Debug)]
#[error("{stage} stage failed: {error}")]
pub struct StageError {
    pub stage: Stage,
    #[source]
    pub error: ZapataError,
}

impl StageError {
    pub fn exit_code(&self) -> i32 {
        self.error.exit_code()
    }
}

fn failed(stage: Stage) -> impl FnOnce(ZapataError) -> StageError {
    move |error| StageError { stage, error }
}

type StageResult<T> = std::result::Result<T, StageError>;

/// Everything the translation needs besides the mesh itself
#[derive(Debug, Clone)]
pub struct TranslateOptions {
    pub translation: TranslationOptions,
    pub materials: MaterialMap,
    pub footing_tag: Option<MaterialTag>,
    pub fused_vtu: bool,
}

impl TranslateOptions {
    /// Options from a configuration file, or identity tags without one
    pub fn new(config: Option<&MeshConfig>) -> TranslateOptions {
        match config {
            Some(config) => TranslateOptions {
                translation: config.translation.clone(),
                materials: MaterialMap::from_config(config),
                footing_tag: Some(config.footing_material.material),
                fused_vtu: false,
            },
            None => TranslateOptions {
                translation: TranslationOptions::default(),
                materials: MaterialMap::Identity,
                footing_tag: None,
                fused_vtu: false,
            },
        }
    }
}

pub struct Loaded {
    source: PathBuf,
    mesh: SourceMesh,
}

pub struct Deduplicated {
    source: PathBuf,
    mesh: SourceMesh,
    dedup: Deduplication,
}

pub struct Remapped {
    source: PathBuf,
    mesh: SourceMesh,
    dedup: Deduplication,
    outcome: RemapOutcome,
}

pub struct TagResolved {
    report: RunReport,
    dedup: Deduplication,
    elements: Vec<Element>,
}

/// Terminal state of a successful run
#[derive(Debug)]
pub struct Emitted {
    pub written: Vec<PathBuf>,
    pub stats: MeshStats,
    pub report: RunReport,
}

impl Loaded {
    pub fn from_path(path: &Path) -> StageResult<Loaded> {
        let mesh = load_mesh(path).map_err(failed(Stage::Load))?;
        Loaded::from_mesh(path, mesh)
    }

    /// Wraps an already parsed mesh; `source` is only used for reporting
    pub fn from_mesh(source: &Path, mesh: SourceMesh) -> StageResult<Loaded> {
        mesh.validate().map_err(failed(Stage::Load))?;
        Ok(Loaded {
            source: source.to_path_buf(),
            mesh,
        })
    }

    pub fn mesh(&self) -> &SourceMesh {
        &self.mesh
    }

    pub fn deduplicate(self, tolerance: f64) -> StageResult<Deduplicated> {
        let dedup =
            deduplicate(&self.mesh.nodes, tolerance).map_err(failed(Stage::Deduplicate))?;
        Ok(Deduplicated {
            source: self.source,
            mesh: self.mesh,
            dedup,
        })
    }
}

impl Deduplicated {
    pub fn dedup(&self) -> &Deduplication {
        &self.dedup
    }

    /// Remaps connectivity, then applies the degenerate-element gate
    pub fn remap(self, options: RemapOptions, max_reject_fraction: f64) -> StageResult<Remapped> {
        let outcome = remap_elements(&self.mesh.elements, &self.dedup, options)
            .map_err(failed(Stage::Remap))?;
        outcome
            .check_reject_fraction(max_reject_fraction)
            .map_err(failed(Stage::Remap))?;
        Ok(Remapped {
            source: self.source,
            mesh: self.mesh,
            dedup: self.dedup,
            outcome,
        })
    }
}

impl Remapped {
    pub fn outcome(&self) -> &RemapOutcome {
        &self.outcome
    }

    pub fn resolve_tags(self, map: &MaterialMap, tolerance: f64) -> StageResult<TagResolved> {
        let report = RunReport {
            source: self.source,
            raw_node_count: self.mesh.nodes.len(),
            source_element_count: self.outcome.source_count,
            skipped_cells: self.mesh.skipped_cells,
            rejected_elements: self.outcome.rejected_count(),
            reoriented_elements: self.outcome.reoriented,
            tolerance,
        };
        let elements = resolve_tags(self.outcome.elements, &self.mesh.regions, map)
            .map_err(failed(Stage::ResolveTags))?;
        Ok(TagResolved {
            report,
            dedup: self.dedup,
            elements,
        })
    }
}

impl TagResolved {
    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    /// Renders every artifact, then writes them into `out_dir`
    pub fn emit(self, out_dir: &Path, options: &EmitOptions) -> StageResult<Emitted> {
        let stats =
            MeshStats::compute(&self.dedup.nodes, &self.elements).map_err(failed(Stage::Emit))?;
        stats.log_summary();
        let artifacts = render_artifacts(
            &self.dedup.nodes,
            &self.elements,
            &stats,
            &self.report,
            options,
        )
        .map_err(failed(Stage::Emit))?;
        let written = write_artifacts(out_dir, &artifacts).map_err(failed(Stage::Emit))?;
        Ok(Emitted {
            written,
            stats,
            report: self.report,
        })
    }
}

/// Loads the region to material configuration; a failure belongs to the load stage
pub fn load_config(path: &Path) -> StageResult<MeshConfig> {
    MeshConfig::load(path).map_err(failed(Stage::Load))
}

/// Runs the whole translation from a mesh file to the solver scripts
pub fn translate(input: &Path, out_dir: &Path, options: &TranslateOptions) -> StageResult<Emitted> {
    let loaded = Loaded::from_path(input)?;
    run(loaded, out_dir, options)
}

/// Runs every stage after loading
pub fn run(loaded: Loaded, out_dir: &Path, options: &TranslateOptions) -> StageResult<Emitted> {
    let translation = &options.translation;
    translation.validate().map_err(failed(Stage::Load))?;
    if translation.precision_hides_tolerance() {
        warn!(
            "[mesh] {} decimals are coarser than the coincidence tolerance {:e}, distinct nodes may print identical coordinates",
            translation.coordinate_precision, translation.tolerance
        );
    }

    let remap_options = RemapOptions {
        degeneracy_ratio: translation.degeneracy_ratio,
        reorient: translation.reorient,
    };
    let emit_options = EmitOptions {
        coordinate_precision: translation.coordinate_precision,
        footing_tag: options.footing_tag,
        fused_vtu: options.fused_vtu,
    };

    let emitted = loaded
        .deduplicate(translation.tolerance)?
        .remap(remap_options, translation.max_reject_fraction)?
        .resolve_tags(&options.materials, translation.tolerance)?
        .emit(out_dir, &emit_options)?;

    info!(
        "translation finished: {} nodes, {} elements written to {}",
        emitted.stats.node_count,
        emitted.stats.element_count,
        out_dir.display()
    );
    Ok(emitted)
}
