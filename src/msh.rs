//! Reader for Gmsh `.msh` files (ASCII 4.1 and legacy 2.2).
//!
//! Only first-order tetrahedra (element type 4) are kept. The region of an
//! element is the physical group of the volume it was meshed in; names come
//! from `$PhysicalNames` when present.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::str::FromStr;

use log::warn;

use crate::{
    datatypes::{RawElement, Region, RegionId, SourceFormat, SourceMesh, Vertex},
    error::{Result, ZapataError},
};

/// Gmsh element type code of the 4-node tetrahedron
const GMSH_TET4: usize = 4;

/// First format version with the block layout read by the v4 branches.
/// 4.0 used different `$Nodes`/`$Entities` records and is refused.
const V4_LAYOUT: f64 = 4.1;

fn is_supported_version(version: f64) -> bool {
    version >= V4_LAYOUT || (2.0..3.0).contains(&version)
}

enum MeshParseState {
    MeshFormat,
    PhysicalNames,
    Entities,
    Nodes,
    Elements,
    Limbo,
}

/// Non-empty, trimmed lines with their 1-based line numbers
struct Lines<'a> {
    lines: Vec<(usize, &'a str)>,
    pos: usize,
}

impl<'a> Lines<'a> {
    fn new(contents: &'a str) -> Lines<'a> {
        let lines = contents
            .lines()
            .enumerate()
            .map(|(i, l)| (i + 1, l.trim()))
            .filter(|(_, l)| !l.is_empty())
            .collect();
        Lines { lines, pos: 0 }
    }

    fn next(&mut self) -> Option<(usize, &'a str)> {
        let line = self.lines.get(self.pos).copied();
        if line.is_some() {
            self.pos += 1;
        }
        line
    }

    fn expect_line(&mut self, what: &str) -> Result<(usize, &'a str)> {
        self.next().ok_or_else(|| {
            ZapataError::Parse(format!("unexpected end of file while reading {what}"))
        })
    }

    /// Reads the next line as whitespace separated values of one type
    fn fields<T: FromStr>(&mut self, what: &str) -> Result<Vec<T>> {
        let (number, line) = self.expect_line(what)?;
        parse_fields(line, number, what)
    }

    fn skip_to(&mut self, end_marker: &str) -> Result<()> {
        while let Some((_, line)) = self.next() {
            if line == end_marker {
                return Ok(());
            }
        }
        Err(ZapataError::Parse(format!("missing {end_marker}")))
    }
}

fn parse_fields<T: FromStr>(line: &str, number: usize, what: &str) -> Result<Vec<T>> {
    line.split_whitespace()
        .map(|field| {
            field.parse::<T>().map_err(|_| {
                ZapataError::Parse(format!(
                    "line {number}: unexpected value '{field}' in {what}"
                ))
            })
        })
        .collect()
}

fn field_at<T: Copy>(fields: &[T], index: usize, number: usize, what: &str) -> Result<T> {
    fields.get(index).copied().ok_or_else(|| {
        ZapataError::Parse(format!("line {number}: truncated {what}"))
    })
}

/// Raw contents gathered while walking the sections
#[derive(Default)]
struct MshContents {
    version: f64,
    physical_names: HashMap<(usize, RegionId), String>,
    /// Physical tags of each volume entity
    volume_groups: HashMap<i32, Vec<RegionId>>,
    nodes: Vec<Vertex>,
    node_positions: HashMap<usize, usize>,
    /// (raw node tags, region) per tetrahedron
    tets: Vec<([usize; 4], RegionId)>,
    skipped_cells: usize,
}

/// Loads a `.msh` file into the normalized mesh representation
pub fn load_msh(path: &Path) -> Result<SourceMesh> {
    let contents = std::fs::read_to_string(path).map_err(|err| ZapataError::io(path, err))?;
    parse_msh(&contents)
}

/// Parses the text of a `.msh` file
pub fn parse_msh(contents: &str) -> Result<SourceMesh> {
    let mut lines = Lines::new(contents);
    let mut parser_state = MeshParseState::Limbo;
    let mut msh = MshContents {
        version: 4.1,
        ..MshContents::default()
    };
    let mut regions: BTreeMap<RegionId, Region> = BTreeMap::new();
    let mut fallback_entities: Vec<i32> = Vec::new();

    loop {
        match parser_state {
            MeshParseState::Limbo => {
                let Some((_, line)) = lines.next() else { break };
                parser_state = match line {
                    "$MeshFormat" => MeshParseState::MeshFormat,
                    "$PhysicalNames" => MeshParseState::PhysicalNames,
                    "$Entities" => MeshParseState::Entities,
                    "$Nodes" => MeshParseState::Nodes,
                    "$Elements" => MeshParseState::Elements,
                    other if other.starts_with('$') && !other.starts_with("$End") => {
                        lines.skip_to(&format!("$End{}", &other[1..]))?;
                        MeshParseState::Limbo
                    }
                    _ => MeshParseState::Limbo,
                };
            }
            MeshParseState::MeshFormat => {
                let (number, line) = lines.expect_line("mesh format")?;
                let fields: Vec<&str> = line.split_whitespace().collect();
                msh.version = match fields.first().and_then(|v| v.parse::<f64>().ok()) {
                    Some(v) => v,
                    None => {
                        return Err(ZapataError::Parse(format!(
                            "line {number}: unreadable mesh format version"
                        )))
                    }
                };
                if fields.get(1) != Some(&"0") {
                    return Err(ZapataError::Parse(
                        "binary .msh files are not supported, save the mesh as ASCII".to_owned(),
                    ));
                }
                if !is_supported_version(msh.version) {
                    return Err(ZapataError::Parse(format!(
                        "unsupported .msh version {}, save the mesh as format 4.1 or 2.2",
                        msh.version
                    )));
                }
                lines.skip_to("$EndMeshFormat")?;
                parser_state = MeshParseState::Limbo;
            }
            MeshParseState::PhysicalNames => {
                parse_physical_names(&mut lines, &mut msh)?;
                lines.skip_to("$EndPhysicalNames")?;
                parser_state = MeshParseState::Limbo;
            }
            MeshParseState::Entities => {
                parse_entities(&mut lines, &mut msh)?;
                lines.skip_to("$EndEntities")?;
                parser_state = MeshParseState::Limbo;
            }
            MeshParseState::Nodes => {
                if msh.version >= V4_LAYOUT {
                    parse_nodes_v4(&mut lines, &mut msh)?;
                } else {
                    parse_nodes_v2(&mut lines, &mut msh)?;
                }
                lines.skip_to("$EndNodes")?;
                parser_state = MeshParseState::Limbo;
            }
            MeshParseState::Elements => {
                if msh.version >= V4_LAYOUT {
                    parse_elements_v4(&mut lines, &mut msh, &mut fallback_entities)?;
                } else {
                    parse_elements_v2(&mut lines, &mut msh)?;
                }
                lines.skip_to("$EndElements")?;
                parser_state = MeshParseState::Limbo;
            }
        }
    }

    if !fallback_entities.is_empty() {
        warn!(
            "[mesh] volumes {:?} carry no physical group, using their entity tags as region ids",
            fallback_entities
        );
    }

    let mut elements = Vec::with_capacity(msh.tets.len());
    for (tags, region) in &msh.tets {
        let mut nodes = [0usize; 4];
        for (slot, tag) in nodes.iter_mut().zip(tags) {
            *slot = match msh.node_positions.get(tag) {
                Some(p) => *p,
                None => {
                    return Err(ZapataError::Parse(format!(
                        "element references undefined node tag {tag}"
                    )))
                }
            };
        }
        regions.entry(*region).or_insert_with(|| Region {
            id: *region,
            name: msh.physical_names.get(&(3, *region)).cloned(),
        });
        elements.push(RawElement {
            nodes,
            region: *region,
        });
    }

    if msh.skipped_cells > 0 {
        warn!(
            "[mesh] skipped {} elements that are not 4-node tetrahedra",
            msh.skipped_cells
        );
    }

    let mesh = SourceMesh {
        format: SourceFormat::Msh,
        nodes: msh.nodes,
        elements,
        regions,
        skipped_cells: msh.skipped_cells,
    };
    mesh.validate()?;
    Ok(mesh)
}

fn parse_physical_names(lines: &mut Lines, msh: &mut MshContents) -> Result<()> {
    let count: Vec<usize> = lines.fields("physical name count")?;
    let count = field_at(&count, 0, 0, "physical name count")?;
    for _ in 0..count {
        let (number, line) = lines.expect_line("physical names")?;
        let mut parts = line.splitn(3, char::is_whitespace);
        let dim = parts.next().and_then(|d| d.parse::<usize>().ok());
        let tag = parts.next().and_then(|t| t.parse::<RegionId>().ok());
        let name = parts.next().map(|n| n.trim().trim_matches('"').to_owned());
        match (dim, tag, name) {
            (Some(dim), Some(tag), Some(name)) => {
                msh.physical_names.insert((dim, tag), name);
            }
            _ => {
                return Err(ZapataError::Parse(format!(
                    "line {number}: malformed physical name"
                )))
            }
        }
    }
    Ok(())
}

fn parse_entities(lines: &mut Lines, msh: &mut MshContents) -> Result<()> {
    let counts: Vec<usize> = lines.fields("entity counts")?;
    let num_points = field_at(&counts, 0, 0, "entity counts")?;
    let num_curves = field_at(&counts, 1, 0, "entity counts")?;
    let num_surfaces = field_at(&counts, 2, 0, "entity counts")?;
    let num_volumes = field_at(&counts, 3, 0, "entity counts")?;

    for _ in 0..(num_points + num_curves + num_surfaces) {
        lines.expect_line("entities")?;
    }

    for _ in 0..num_volumes {
        let (number, line) = lines.expect_line("volume entities")?;
        // tag, bounding box, physical tags, then bounding surfaces
        let fields: Vec<f64> = parse_fields(line, number, "volume entity")?;
        let tag = field_at(&fields, 0, number, "volume entity")? as i32;
        let num_physical = field_at(&fields, 7, number, "volume entity")? as usize;
        let physical: Vec<RegionId> = (0..num_physical)
            .map(|i| field_at(&fields, 8 + i, number, "volume entity").map(|t| t as RegionId))
            .collect::<Result<_>>()?;
        msh.volume_groups.insert(tag, physical);
    }
    Ok(())
}

fn parse_nodes_v4(lines: &mut Lines, msh: &mut MshContents) -> Result<()> {
    let header: Vec<usize> = lines.fields("node section header")?;
    let num_blocks = field_at(&header, 0, 0, "node section header")?;
    let num_nodes = field_at(&header, 1, 0, "node section header")?;
    msh.nodes.reserve(num_nodes);

    for _ in 0..num_blocks {
        let (number, line) = lines.expect_line("node block")?;
        let block: Vec<usize> = parse_fields(line, number, "node block")?;
        let num_nodes_local = field_at(&block, 3, number, "node block")?;

        let mut node_tags: Vec<usize> = Vec::with_capacity(num_nodes_local);
        for _ in 0..num_nodes_local {
            let tag: Vec<usize> = lines.fields("node tag")?;
            node_tags.push(field_at(&tag, 0, 0, "node tag")?);
        }

        for tag in node_tags {
            let (number, line) = lines.expect_line("node coordinates")?;
            let coords: Vec<f64> = parse_fields(line, number, "node coordinates")?;
            let vertex = Vertex::new(
                field_at(&coords, 0, number, "node coordinates")?,
                field_at(&coords, 1, number, "node coordinates")?,
                field_at(&coords, 2, number, "node coordinates")?,
            );
            register_node(msh, tag, vertex)?;
        }
    }
    Ok(())
}

fn parse_nodes_v2(lines: &mut Lines, msh: &mut MshContents) -> Result<()> {
    let header: Vec<usize> = lines.fields("node count")?;
    let num_nodes = field_at(&header, 0, 0, "node count")?;
    msh.nodes.reserve(num_nodes);

    for _ in 0..num_nodes {
        let (number, line) = lines.expect_line("nodes")?;
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            return Err(ZapataError::Parse(format!("line {number}: truncated node")));
        }
        let tag: usize = parse_fields(fields[0], number, "node tag")?[0];
        let coords: Vec<f64> = parse_fields(&fields[1..4].join(" "), number, "node coordinates")?;
        register_node(msh, tag, Vertex::new(coords[0], coords[1], coords[2]))?;
    }
    Ok(())
}

fn register_node(msh: &mut MshContents, tag: usize, vertex: Vertex) -> Result<()> {
    if msh.node_positions.insert(tag, msh.nodes.len()).is_some() {
        return Err(ZapataError::Parse(format!("node tag {tag} is defined twice")));
    }
    msh.nodes.push(vertex);
    Ok(())
}

fn parse_elements_v4(
    lines: &mut Lines,
    msh: &mut MshContents,
    fallback_entities: &mut Vec<i32>,
) -> Result<()> {
    let header: Vec<usize> = lines.fields("element section header")?;
    let num_blocks = field_at(&header, 0, 0, "element section header")?;

    for _ in 0..num_blocks {
        let (number, line) = lines.expect_line("element block")?;
        let block: Vec<i64> = parse_fields(line, number, "element block")?;
        let entity_dim = field_at(&block, 0, number, "element block")?;
        let entity_tag = field_at(&block, 1, number, "element block")? as i32;
        let element_type = field_at(&block, 2, number, "element block")? as usize;
        let num_elements = field_at(&block, 3, number, "element block")? as usize;

        if entity_dim != 3 || element_type != GMSH_TET4 {
            for _ in 0..num_elements {
                lines.expect_line("elements")?;
            }
            msh.skipped_cells += num_elements;
            continue;
        }

        let region = match msh.volume_groups.get(&entity_tag).map(Vec::as_slice) {
            Some([tag]) => *tag,
            Some([]) | None => {
                if !fallback_entities.contains(&entity_tag) {
                    fallback_entities.push(entity_tag);
                }
                entity_tag
            }
            Some(tags) => {
                return Err(ZapataError::Parse(format!(
                    "volume {entity_tag} belongs to several physical groups {tags:?}, \
                     its elements have no single region"
                )))
            }
        };

        for _ in 0..num_elements {
            let (number, line) = lines.expect_line("elements")?;
            let data: Vec<usize> = parse_fields(line, number, "element")?;
            if data.len() < 5 {
                return Err(ZapataError::Parse(format!(
                    "line {number}: tetrahedron with fewer than 4 nodes"
                )));
            }
            msh.tets.push(([data[1], data[2], data[3], data[4]], region));
        }
    }
    Ok(())
}

fn parse_elements_v2(lines: &mut Lines, msh: &mut MshContents) -> Result<()> {
    let header: Vec<usize> = lines.fields("element count")?;
    let num_elements = field_at(&header, 0, 0, "element count")?;

    for _ in 0..num_elements {
        let (number, line) = lines.expect_line("elements")?;
        let data: Vec<i64> = parse_fields(line, number, "element")?;
        let element_type = field_at(&data, 1, number, "element")? as usize;
        if element_type != GMSH_TET4 {
            msh.skipped_cells += 1;
            continue;
        }
        let num_tags = field_at(&data, 2, number, "element")? as usize;
        let region = if num_tags > 0 {
            field_at(&data, 3, number, "element")? as RegionId
        } else {
            0
        };
        let first = 3 + num_tags;
        if data.len() < first + 4 {
            return Err(ZapataError::Parse(format!(
                "line {number}: tetrahedron with fewer than 4 nodes"
            )));
        }
        let mut tags = [0usize; 4];
        for (slot, value) in tags.iter_mut().zip(&data[first..first + 4]) {
            *slot = *value as usize;
        }
        msh.tets.push((tags, region));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_VOLUMES_V4: &str = "$MeshFormat
4.1 0 8
$EndMeshFormat
$PhysicalNames
2
3 1 \"SOIL_1\"
3 2 \"FOOTING\"
$EndPhysicalNames
$Entities
0 0 0 2
1 0 0 0 1 1 1 1 1 0
2 0 0 1 1 1 2 1 2 0
$EndEntities
$Nodes
2 6 1 6
3 1 0 4
1
2
3
4
0 0 0
1 0 0
0 1 0
0 0 1
3 2 0 2
5
6
1 1 1
0 0 2
$EndNodes
$Elements
3 3 1 3
2 5 2 1
10 1 2 3
3 1 4 1
1 1 2 3 4
3 2 4 1
2 2 3 4 5
$EndElements
";

    #[test]
    fn reads_v4_nodes_elements_and_regions() {
        let mesh = parse_msh(TWO_VOLUMES_V4).unwrap();
        assert_eq!(mesh.nodes.len(), 6);
        assert_eq!(mesh.nodes[5], Vertex::new(0.0, 0.0, 2.0));
        assert_eq!(mesh.elements.len(), 2);
        assert_eq!(mesh.elements[0].nodes, [0, 1, 2, 3]);
        assert_eq!(mesh.elements[1].nodes, [1, 2, 3, 4]);
        assert_eq!(mesh.elements[1].region, 2);
        assert_eq!(mesh.skipped_cells, 1);
        assert_eq!(mesh.regions[&1].name.as_deref(), Some("SOIL_1"));
        assert_eq!(mesh.regions[&2].name.as_deref(), Some("FOOTING"));
    }

    #[test]
    fn reads_legacy_v2_files() {
        let text = "$MeshFormat
2.2 0 8
$EndMeshFormat
$Nodes
5
10 0 0 0
11 1 0 0
12 0 1 0
13 0 0 1
14 1 1 1
$EndNodes
$Elements
3
1 2 2 7 1 10 11 12
2 4 2 7 1 10 11 12 13
3 4 2 8 2 11 12 13 14
$EndElements
";
        let mesh = parse_msh(text).unwrap();
        assert_eq!(mesh.elements.len(), 2);
        assert_eq!(mesh.elements[0].nodes, [0, 1, 2, 3]);
        assert_eq!(mesh.elements[0].region, 7);
        assert_eq!(mesh.elements[1].region, 8);
        assert_eq!(mesh.skipped_cells, 1);
        assert!(mesh.regions[&7].name.is_none());
    }

    #[test]
    fn volume_without_physical_group_uses_entity_tag() {
        let text = TWO_VOLUMES_V4
            .replace("2 0 0 1 1 1 2 1 2 0", "2 0 0 1 1 1 2 0 0")
            .replace("2\n3 1 \"SOIL_1\"\n3 2 \"FOOTING\"", "1\n3 1 \"SOIL_1\"");
        let mesh = parse_msh(&text).unwrap();
        assert_eq!(mesh.elements[1].region, 2);
        assert!(mesh.regions[&2].name.is_none());
        assert_eq!(mesh.regions[&1].name.as_deref(), Some("SOIL_1"));
    }

    #[test]
    fn binary_files_are_rejected() {
        let err = parse_msh("$MeshFormat\n4.1 1 8\n$EndMeshFormat\n").unwrap_err();
        assert!(matches!(err, ZapataError::Parse(_)));
    }

    #[test]
    fn format_4_0_is_refused_by_version() {
        let text = TWO_VOLUMES_V4.replacen("4.1 0 8", "4 0 8", 1);
        let err = parse_msh(&text).unwrap_err();
        assert!(matches!(err, ZapataError::Parse(_)));
        assert!(
            err.to_string().contains("unsupported .msh version 4,"),
            "{err}"
        );
        assert!(is_supported_version(4.1));
        assert!(is_supported_version(2.2));
        assert!(!is_supported_version(3.0));
    }

    #[test]
    fn undefined_node_tag_is_a_parse_error() {
        let text = TWO_VOLUMES_V4.replace("2 2 3 4 5", "2 2 3 4 99");
        assert!(matches!(parse_msh(&text), Err(ZapataError::Parse(_))));
    }

    #[test]
    fn truncated_file_is_a_parse_error() {
        let text = &TWO_VOLUMES_V4[..TWO_VOLUMES_V4.find("$Elements").unwrap() + 20];
        assert!(matches!(parse_msh(text), Err(ZapataError::Parse(_))));
    }
}
