use crate::{
    config::{FootingBox, MeshConfig},
    script::Script,
};

/// First tag used for the soil volumes left after the excavation cut
const CUT_TAG_OFFSET: usize = 100;

/// Builds an OpenCASCADE `.geo` script for the footing and soil model
///
/// One box per soil layer with the excavation cut out of it, the footing
/// body, one named physical volume per layer and for the footing, and a
/// background size field refining towards the footing.
///
/// # Arguments
/// * `config` - Validated mesh configuration
///
/// # Returns
/// The script text
pub fn build_geo(config: &MeshConfig) -> String {
    let (lx, ly) = config.effective_extent();
    let footing = config.footing_box();
    let layers = config.layer_boundaries();
    let refinement = &config.refinement;

    let mut geo = Script::new();
    geo.line("// Footing on layered soil");
    geo.line("SetFactory(\"OpenCASCADE\");");

    geo.blank();
    geo.line("// Soil layers");
    for (i, (layer, (_, z_bottom))) in config.soil_layers.iter().zip(&layers).enumerate() {
        geo.line(format!(
            "Box({}) = {{ 0, 0, {}, {}, {}, {} }}; // {}",
            i + 1,
            z_bottom,
            lx,
            ly,
            layer.thickness,
            layer.name
        ));
    }

    let excavation_tag = layers.len() + 1;
    let footing_tag = layers.len() + 2;
    geo.blank();
    geo.line("// Excavation and footing");
    geo.line(format!(
        "Box({}) = {{ {}, {}, {}, {}, {}, {} }};",
        excavation_tag,
        footing.x_min,
        footing.y_min,
        footing.z_min,
        footing.dx,
        footing.dy,
        config.footing.df + config.footing.tz
    ));
    geo.line(format!(
        "Box({}) = {{ {}, {}, {}, {}, {}, {} }};",
        footing_tag, footing.x_min, footing.y_min, footing.z_min, footing.dx, footing.dy, footing.dz
    ));

    geo.blank();
    geo.line("// Cut the excavation out of every layer");
    for i in 0..layers.len() {
        let tool_delete = if i + 1 == layers.len() { " Delete;" } else { "" };
        geo.line(format!(
            "BooleanDifference({}) = {{ Volume{{{}}}; Delete; }}{{ Volume{{{}}};{} }};",
            CUT_TAG_OFFSET + i + 1,
            i + 1,
            excavation_tag,
            tool_delete
        ));
    }

    geo.blank();
    geo.line("// Physical groups");
    for (i, layer) in config.soil_layers.iter().enumerate() {
        geo.line(format!(
            "Physical Volume(\"{}\", {}) = {{ {} }};",
            layer.name,
            i + 1,
            CUT_TAG_OFFSET + i + 1
        ));
    }
    geo.line(format!(
        "Physical Volume(\"{}\", {}) = {{ {} }};",
        config.footing_material.name,
        layers.len() + 1,
        footing_tag
    ));

    write_size_fields(&mut geo, config, &footing);

    geo.blank();
    geo.line("// Mesh settings");
    geo.line("Mesh.MeshSizeExtendFromBoundary = 0;");
    geo.line("Mesh.MeshSizeFromPoints = 0;");
    geo.line(format!("Mesh.MeshSizeMax = {};", refinement.lc_far));
    geo.line("Mesh.ElementOrder = 1;");
    geo.line("Mesh.Algorithm = 5;");
    geo.line("Mesh.Algorithm3D = 1;");
    geo.line("Mesh.Optimize = 1;");
    if refinement.optimize_netgen {
        geo.line("Mesh.OptimizeNetgen = 1;");
    }
    geo.finish()
}

/// Footing box at `lc_footing`, a near-field box at `lc_near` grading out to
/// `lc_far`, combined with Min as the background field
fn write_size_fields(geo: &mut Script, config: &MeshConfig, footing: &FootingBox) {
    let refinement = &config.refinement;
    let (lx, ly) = config.effective_extent();
    let margin = config.footing.b.max(config.footing.l);
    let transition = (refinement.lc_far - refinement.lc_near) / (refinement.growth_rate - 1.0);

    let near_x = (
        (footing.x_min - margin).max(0.0),
        (footing.x_min + footing.dx + margin).min(lx),
    );
    let near_y = (
        (footing.y_min - margin).max(0.0),
        (footing.y_min + footing.dy + margin).min(ly),
    );
    let near_z = ((footing.z_min - margin).max(-config.domain.lz), 0.0);

    geo.blank();
    geo.line("// Refinement around the footing");
    geo.line("Field[1] = Box;");
    geo.line(format!("Field[1].VIn = {};", refinement.lc_footing));
    geo.line(format!("Field[1].VOut = {};", refinement.lc_far));
    geo.line(format!("Field[1].XMin = {};", footing.x_min));
    geo.line(format!("Field[1].XMax = {};", footing.x_min + footing.dx));
    geo.line(format!("Field[1].YMin = {};", footing.y_min));
    geo.line(format!("Field[1].YMax = {};", footing.y_min + footing.dy));
    geo.line(format!("Field[1].ZMin = {};", footing.z_min));
    geo.line(format!("Field[1].ZMax = {};", footing.z_min + footing.dz));
    geo.line(format!("Field[1].Thickness = {};", refinement.lc_near));

    geo.line("Field[2] = Box;");
    geo.line(format!("Field[2].VIn = {};", refinement.lc_near));
    geo.line(format!("Field[2].VOut = {};", refinement.lc_far));
    geo.line(format!("Field[2].XMin = {};", near_x.0));
    geo.line(format!("Field[2].XMax = {};", near_x.1));
    geo.line(format!("Field[2].YMin = {};", near_y.0));
    geo.line(format!("Field[2].YMax = {};", near_y.1));
    geo.line(format!("Field[2].ZMin = {};", near_z.0));
    geo.line(format!("Field[2].ZMax = {};", near_z.1));
    geo.line(format!("Field[2].Thickness = {};", transition));

    geo.line("Field[3] = Min;");
    geo.line("Field[3].FieldsList = {1, 2};");
    geo.line("Background Field = 3;");
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"{
        "geometry": {
            "domain": { "Lx": 20.0, "Ly": 20.0, "Lz": 15.0, "quarter_domain": true },
            "footing": { "B": 2.0, "Df": 1.5, "tz": 0.5 }
        },
        "soil_layers": [
            { "name": "SOIL_1", "thickness": 5.0, "material_id": 1 },
            { "name": "SOIL_2", "thickness": 10.0, "material_id": 2 }
        ],
        "footing_material": { "name": "FOOTING", "material_id": 3 },
        "mesh_refinement": { "lc_footing": 0.3, "lc_near": 0.5, "lc_far": 3.0, "growth_rate": 1.25 }
    }"#;

    fn script() -> String {
        build_geo(&MeshConfig::parse(CONFIG).unwrap())
    }

    #[test]
    fn layers_are_stacked_below_the_surface() {
        let geo = script();
        assert!(geo.contains("Box(1) = { 0, 0, -5, 10, 10, 5 }; // SOIL_1"));
        assert!(geo.contains("Box(2) = { 0, 0, -15, 10, 10, 10 }; // SOIL_2"));
    }

    #[test]
    fn quarter_footing_sits_at_the_origin_corner() {
        let geo = script();
        assert!(geo.contains("Box(3) = { 0, 0, -2, 1, 1, 2 };"));
        assert!(geo.contains("Box(4) = { 0, 0, -2, 1, 1, 0.5 };"));
    }

    #[test]
    fn excavation_tool_is_deleted_after_the_last_cut() {
        let geo = script();
        assert!(geo.contains("BooleanDifference(101) = { Volume{1}; Delete; }{ Volume{3}; };"));
        assert!(geo.contains("BooleanDifference(102) = { Volume{2}; Delete; }{ Volume{3}; Delete; };"));
    }

    #[test]
    fn physical_volumes_are_named_after_materials() {
        let geo = script();
        assert!(geo.contains("Physical Volume(\"SOIL_2\", 2) = { 102 };"));
        assert!(geo.contains("Physical Volume(\"FOOTING\", 3) = { 4 };"));
    }

    #[test]
    fn near_field_transition_follows_growth_rate() {
        let geo = script();
        // (3.0 - 0.5) / (1.25 - 1)
        assert!(geo.contains("Field[2].Thickness = 10;"));
        assert!(geo.contains("Background Field = 3;"));
        assert!(geo.contains("Mesh.OptimizeNetgen = 1;"));
    }

    #[test]
    fn script_lines_are_written_verbatim() {
        let geo = script();
        assert!(geo.starts_with("// Footing on layered soil\nSetFactory(\"OpenCASCADE\");\n\n// Soil layers\n"));
        assert!(geo.contains("\nField[3].FieldsList = {1, 2};\n"));
        assert!(geo.ends_with("Mesh.OptimizeNetgen = 1;\n"));
    }
}
