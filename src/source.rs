use std::path::Path;

use log::info;

use crate::{
    datatypes::SourceMesh,
    error::{Result, ZapataError},
    msh, vtu,
};

/// Loads a mesh container, picking the reader from the file extension
///
/// # Arguments
/// * `mesh_file` - Path to a `.msh` or `.vtu` file
///
/// # Returns
/// The normalized mesh, independent of the container format
pub fn load_mesh(mesh_file: &Path) -> Result<SourceMesh> {
    if !mesh_file.exists() {
        return Err(ZapataError::io(
            mesh_file,
            std::io::Error::new(std::io::ErrorKind::NotFound, "mesh file not found"),
        ));
    }

    let extension = mesh_file
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    let mesh = match extension.as_deref() {
        Some("msh") => msh::load_msh(mesh_file)?,
        Some("vtu") => vtu::load_vtu(mesh_file)?,
        _ => {
            return Err(ZapataError::Parse(format!(
                "Unrecognized mesh filetype {}, expected .msh or .vtu",
                mesh_file.display()
            )))
        }
    };

    info!(
        "loaded {} nodes and {} tetrahedra in {} regions from {} ({})",
        mesh.nodes.len(),
        mesh.elements.len(),
        mesh.regions.len(),
        mesh_file.display(),
        mesh.format
    );
    Ok(mesh)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mesh.xdmf");
        std::fs::write(&path, "<Xdmf/>").unwrap();
        assert!(matches!(load_mesh(&path), Err(ZapataError::Parse(_))));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_mesh(&dir.path().join("absent.msh")).unwrap_err();
        assert!(matches!(err, ZapataError::Io { .. }));
    }
}
