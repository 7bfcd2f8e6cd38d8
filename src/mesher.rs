use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, info};

use crate::{
    config::MeshConfig,
    error::{Result, ZapataError},
    geo::build_geo,
};

/// Lines of Gmsh output kept in the error message of a failed run
const GMSH_TAIL_LINES: usize = 20;

/// Writes the `.geo` script for `config` to `output`
pub fn write_geo(config: &MeshConfig, output: &Path) -> Result<()> {
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ZapataError::io(parent, e))?;
    }
    std::fs::write(output, build_geo(config)).map_err(|e| ZapataError::io(output, e))?;
    info!("wrote geometry script {}", output.display());
    Ok(())
}

fn tail(text: &[u8]) -> String {
    let text = String::from_utf8_lossy(text);
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(GMSH_TAIL_LINES)..].join("\n")
}

/// Meshes the configured model with Gmsh
///
/// The geometry script and the raw mesh live in a scratch directory that is
/// removed when this function returns; only the final `.msh` is copied to
/// `output`.
///
/// # Arguments
/// * `config` - Validated mesh configuration
/// * `gmsh` - Gmsh executable
/// * `output` - Destination of the MSH 4.1 file
pub fn compute_mesh(config: &MeshConfig, gmsh: &Path, output: &Path) -> Result<PathBuf> {
    let scratch = tempfile::Builder::new()
        .prefix("zapata-mesh")
        .tempdir()
        .map_err(|e| ZapataError::io(std::env::temp_dir(), e))?;

    let geo_path = scratch.path().join("model.geo");
    let msh_path = scratch.path().join("model.msh");
    write_geo(config, &geo_path)?;

    info!(
        "running {} (lc {} to {})...",
        gmsh.display(),
        config.refinement.lc_footing,
        config.refinement.lc_far
    );
    let result = Command::new(gmsh)
        .arg(&geo_path)
        .arg("-3")
        .arg("-format")
        .arg("msh41")
        .arg("-o")
        .arg(&msh_path)
        .output()
        .map_err(|err| {
            ZapataError::Mesher(format!("failed to launch {}: {err}", gmsh.display()))
        })?;
    debug!("gmsh output:\n{}", String::from_utf8_lossy(&result.stdout));

    if !result.status.success() {
        return Err(ZapataError::Mesher(format!(
            "Gmsh exited with {}:\n{}{}",
            result.status,
            tail(&result.stdout),
            tail(&result.stderr)
        )));
    }
    if !msh_path.exists() {
        return Err(ZapataError::Mesher(
            "Gmsh finished without writing a mesh".to_owned(),
        ));
    }

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ZapataError::io(parent, e))?;
    }
    std::fs::copy(&msh_path, output).map_err(|e| ZapataError::io(output, e))?;
    info!("wrote mesh {}", output.display());
    Ok(output.to_path_buf())
}
