use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use zapata::{
    config::MeshConfig,
    datatypes::MaterialTag,
    emitter::{ELEMENTS_FILE, FUSED_VTU_FILE, INFO_FILE, MATERIALS_FILE, NODES_FILE},
    error::ZapataError,
    pipeline::{translate, Stage, TranslateOptions},
    vtu,
};

const CONFIG: &str = r#"{
    "geometry": {
        "domain": { "Lx": 4.0, "Ly": 4.0, "Lz": 3.0 },
        "footing": { "B": 1.0, "Df": 1.0, "tz": 0.5 }
    },
    "soil_layers": [ { "name": "SOIL_1", "thickness": 3.0, "material_id": 1 } ],
    "footing_material": { "name": "FOOTING", "material_id": 4 }
}"#;

/// Node tag of corner (i, j, k) of a 1 x 1 x 3 column, numbered from `base`
fn column_tag(base: usize, i: usize, j: usize, k: usize) -> usize {
    base + k * 4 + j * 2 + i + 1
}

/// Two unit-section columns side by side along x, each meshed on its own so
/// the eight nodes of the shared face are duplicated. Each unit cell is split
/// into six tetrahedra along its main diagonal.
fn two_columns_msh(gap: f64) -> String {
    let mut text = String::new();
    let _ = writeln!(text, "$MeshFormat\n2.2 0 8\n$EndMeshFormat");
    let _ = writeln!(
        text,
        "$PhysicalNames\n2\n3 1 \"SOIL_1\"\n3 2 \"FOOTING\"\n$EndPhysicalNames"
    );

    let _ = writeln!(text, "$Nodes\n32");
    for (column, x0) in [(0usize, 0.0), (1, 1.0 + gap)] {
        for k in 0..4 {
            for j in 0..2 {
                for i in 0..2 {
                    let _ = writeln!(
                        text,
                        "{} {} {} {}",
                        column_tag(column * 16, i, j, k),
                        x0 + i as f64,
                        j as f64,
                        k as f64
                    );
                }
            }
        }
    }
    let _ = writeln!(text, "$EndNodes");

    let permutations = [
        [0, 1, 2],
        [0, 2, 1],
        [1, 0, 2],
        [1, 2, 0],
        [2, 0, 1],
        [2, 1, 0],
    ];
    let _ = writeln!(text, "$Elements\n36");
    let mut id = 0;
    for column in 0..2 {
        for cell in 0..3 {
            for permutation in permutations {
                let mut corner = [0usize; 3];
                let mut tags = vec![column_tag(column * 16, 0, 0, cell)];
                for axis in permutation {
                    corner[axis] = 1;
                    tags.push(column_tag(column * 16, corner[0], corner[1], cell + corner[2]));
                }
                id += 1;
                let _ = writeln!(
                    text,
                    "{} 4 2 {} {} {} {} {} {}",
                    id,
                    column + 1,
                    column + 1,
                    tags[0],
                    tags[1],
                    tags[2],
                    tags[3]
                );
            }
        }
    }
    let _ = writeln!(text, "$EndElements");
    text
}

fn write_input(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}

fn configured() -> TranslateOptions {
    TranslateOptions::new(Some(&MeshConfig::parse(CONFIG).unwrap()))
}

fn tag(value: i64) -> MaterialTag {
    MaterialTag::new(value).unwrap()
}

#[test]
fn shared_face_nodes_are_fused_into_an_interface() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "columns.msh", &two_columns_msh(0.0));
    let out_dir = dir.path().join("opensees_input");

    let emitted = translate(&input, &out_dir, &configured()).unwrap();

    assert_eq!(emitted.report.raw_node_count, 32);
    assert_eq!(emitted.stats.node_count, 24);
    assert_eq!(emitted.stats.element_count, 36);
    assert_eq!(
        emitted.stats.element_count + emitted.report.rejected_elements,
        emitted.report.source_element_count
    );
    assert_eq!(emitted.report.reoriented_elements, 18);
    assert_eq!(emitted.stats.interface.shared_nodes, 8);
    assert_eq!(emitted.stats.interface.pairs.get(&(tag(1), tag(4))), Some(&8));

    let nodes = std::fs::read_to_string(out_dir.join(NODES_FILE)).unwrap();
    assert_eq!(nodes.lines().filter(|l| l.starts_with("node ")).count(), 24);

    let elements = std::fs::read_to_string(out_dir.join(ELEMENTS_FILE)).unwrap();
    let tags: Vec<&str> = elements
        .lines()
        .filter(|l| l.starts_with("element "))
        .filter_map(|l| l.split_whitespace().last())
        .collect();
    assert_eq!(tags.len(), 36);
    assert!(tags[..18].iter().all(|t| *t == "1"));
    assert!(tags[18..].iter().all(|t| *t == "4"));

    let materials = std::fs::read_to_string(out_dir.join(MATERIALS_FILE)).unwrap();
    assert!(materials.contains("nDMaterial ElasticIsotropic 4 2.5e7 0.2 2.4"));

    let info = std::fs::read_to_string(out_dir.join(INFO_FILE)).unwrap();
    assert!(info.contains("  Material 4: 18 elements (50.0%) [footing]"));
    assert!(info.contains("  Nodes shared between materials: 8"));
}

#[test]
fn identity_mapping_without_configuration() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "columns.msh", &two_columns_msh(0.0));
    let emitted = translate(&input, &dir.path().join("out"), &TranslateOptions::new(None)).unwrap();
    let tags: Vec<MaterialTag> = emitted.stats.per_tag.keys().copied().collect();
    assert_eq!(tags, vec![tag(1), tag(2)]);
}

#[test]
fn separated_columns_share_no_nodes() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "columns.msh", &two_columns_msh(1e-3));
    let emitted = translate(&input, &dir.path().join("out"), &configured()).unwrap();
    assert_eq!(emitted.stats.node_count, 32);
    assert_eq!(emitted.stats.interface.shared_nodes, 0);
}

#[test]
fn repeated_runs_write_identical_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "columns.msh", &two_columns_msh(0.0));
    let first = dir.path().join("first");
    let second = dir.path().join("second");
    translate(&input, &first, &configured()).unwrap();
    translate(&input, &second, &configured()).unwrap();

    for name in [NODES_FILE, ELEMENTS_FILE, MATERIALS_FILE, INFO_FILE] {
        assert_eq!(
            std::fs::read(first.join(name)).unwrap(),
            std::fs::read(second.join(name)).unwrap(),
            "{name} differs between runs"
        );
    }
}

#[test]
fn unmapped_region_fails_before_any_output() {
    let dir = tempfile::tempdir().unwrap();
    let text = two_columns_msh(0.0).replace("3 2 \"FOOTING\"", "3 2 \"PILE\"");
    let input = write_input(dir.path(), "columns.msh", &text);
    let out_dir = dir.path().join("out");

    let err = translate(&input, &out_dir, &configured()).unwrap_err();
    assert_eq!(err.stage, Stage::ResolveTags);
    assert!(matches!(err.error, ZapataError::Configuration(_)));
    assert!(err.to_string().contains("PILE"));
    assert!(!out_dir.exists());
}

const FLAT_TET_VTU: &str = r#"<?xml version="1.0"?>
<VTKFile type="UnstructuredGrid" version="1.0" byte_order="LittleEndian" header_type="UInt32">
  <UnstructuredGrid>
    <Piece NumberOfPoints="4" NumberOfCells="1">
      <Points>
        <DataArray type="Float64" NumberOfComponents="3" format="ascii">
          0 0 0 1 0 0 0 1 0 0 0 1e-9
        </DataArray>
      </Points>
      <Cells>
        <DataArray type="Int64" Name="connectivity" format="ascii">0 1 2 3</DataArray>
        <DataArray type="Int64" Name="offsets" format="ascii">4</DataArray>
        <DataArray type="UInt8" Name="types" format="ascii">10</DataArray>
      </Cells>
      <CellData>
        <DataArray type="Int32" Name="dominio" format="ascii">1</DataArray>
      </CellData>
    </Piece>
  </UnstructuredGrid>
</VTKFile>
"#;

#[test]
fn degenerate_element_trips_the_reject_gate() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "flat.vtu", FLAT_TET_VTU);
    let out_dir = dir.path().join("out");

    let err = translate(&input, &out_dir, &TranslateOptions::new(None)).unwrap_err();
    assert_eq!(err.stage, Stage::Remap);
    assert_eq!(err.exit_code(), 3);
    assert!(err.to_string().contains("1 degenerate elements"));
    assert!(!out_dir.exists());

    let mut lenient = TranslateOptions::new(None);
    lenient.translation.max_reject_fraction = 1.0;
    let emitted = translate(&input, &out_dir, &lenient).unwrap();
    assert_eq!(emitted.report.rejected_elements, 1);
    assert_eq!(emitted.stats.element_count, 0);
}

#[test]
fn fused_mesh_export_reads_back() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_input(dir.path(), "columns.msh", &two_columns_msh(0.0));
    let out_dir = dir.path().join("out");
    let mut options = configured();
    options.fused_vtu = true;

    let emitted = translate(&input, &out_dir, &options).unwrap();
    assert_eq!(emitted.written.len(), 5);

    let fused = vtu::load_vtu(&out_dir.join(FUSED_VTU_FILE)).unwrap();
    assert_eq!(fused.nodes.len(), 24);
    assert_eq!(fused.elements.len(), 36);
    assert_eq!(fused.regions.keys().copied().collect::<Vec<_>>(), vec![1, 4]);
}
