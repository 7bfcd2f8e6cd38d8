//! VTK XML unstructured grid (`.vtu`) support.
//!
//! Reading accepts `ascii` and inline `binary` data arrays (base64, no
//! compression). Writing always produces ASCII, meant for inspecting the
//! fused mesh in ParaView.

use std::collections::BTreeMap;
use std::path::Path;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use log::{info, warn};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::{
    datatypes::{Element, Node, RawElement, Region, RegionId, SourceFormat, SourceMesh, Vertex},
    error::{Result, ZapataError},
};

/// VTK cell type code of the linear tetrahedron
const VTK_TETRA: i64 = 10;

/// Cell data fields that may carry the region id, in lookup order
pub const REGION_FIELDS: [&str; 3] = ["dominio", "material_id", "gmsh:physical"];

/// Region given to every cell when the file carries no region field
const DEFAULT_REGION: RegionId = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeaderType {
    UInt32,
    UInt64,
}

impl HeaderType {
    fn size(self) -> usize {
        match self {
            HeaderType::UInt32 => 4,
            HeaderType::UInt64 => 8,
        }
    }
}

/// Loads a `.vtu` file into the normalized mesh representation
pub fn load_vtu(path: &Path) -> Result<SourceMesh> {
    let contents = std::fs::read_to_string(path).map_err(|err| ZapataError::io(path, err))?;
    parse_vtu(&contents)
}

/// Parses the text of a `.vtu` file
pub fn parse_vtu(contents: &str) -> Result<SourceMesh> {
    let doc = match roxmltree::Document::parse(contents) {
        Ok(d) => d,
        Err(err) => return Err(ZapataError::Parse(format!("invalid VTU xml: {err}"))),
    };

    let root = doc.root_element();
    if root.tag_name().name() != "VTKFile" {
        return Err(ZapataError::Parse("root element is not VTKFile".to_owned()));
    }
    if root.attribute("type") != Some("UnstructuredGrid") {
        return Err(ZapataError::Parse(format!(
            "VTK file type {:?} is not UnstructuredGrid",
            root.attribute("type")
        )));
    }
    if root.attribute("compressor").is_some() {
        return Err(ZapataError::Parse(
            "compressed VTU data is not supported, save the mesh uncompressed or as ASCII"
                .to_owned(),
        ));
    }
    if let Some(order) = root.attribute("byte_order") {
        if order != "LittleEndian" {
            return Err(ZapataError::Parse(format!(
                "byte order {order} is not supported"
            )));
        }
    }
    let header = match root.attribute("header_type") {
        None | Some("UInt32") => HeaderType::UInt32,
        Some("UInt64") => HeaderType::UInt64,
        Some(other) => {
            return Err(ZapataError::Parse(format!(
                "unsupported header_type {other}"
            )))
        }
    };

    let pieces: Vec<roxmltree::Node> = doc
        .descendants()
        .filter(|n| n.tag_name().name() == "Piece")
        .collect();
    let piece = match pieces.as_slice() {
        [piece] => *piece,
        [] => return Err(ZapataError::Parse("VTU file has no Piece".to_owned())),
        _ => {
            return Err(ZapataError::Parse(format!(
                "VTU file has {} pieces, only single-piece grids are supported",
                pieces.len()
            )))
        }
    };
    let num_points = count_attribute(&piece, "NumberOfPoints")?;
    let num_cells = count_attribute(&piece, "NumberOfCells")?;

    // Points
    let points = child(&piece, "Points")?;
    let point_array = data_arrays(&points).next().ok_or_else(|| {
        ZapataError::Parse("Points section has no DataArray".to_owned())
    })?;
    let coords = decode_data_array(&point_array, header)?;
    if coords.len() != 3 * num_points {
        return Err(ZapataError::Parse(format!(
            "expected {} point coordinates, found {}",
            3 * num_points,
            coords.len()
        )));
    }
    let nodes: Vec<Vertex> = coords
        .chunks_exact(3)
        .map(|c| Vertex::new(c[0], c[1], c[2]))
        .collect();

    // Cells
    let cells = child(&piece, "Cells")?;
    let connectivity = named_integers(&cells, "connectivity", header)?;
    let offsets = named_integers(&cells, "offsets", header)?;
    let types = named_integers(&cells, "types", header)?;
    if offsets.len() != num_cells || types.len() != num_cells {
        return Err(ZapataError::Parse(format!(
            "NumberOfCells is {} but found {} offsets and {} types",
            num_cells,
            offsets.len(),
            types.len()
        )));
    }

    // Region field
    let mut region_values: Option<Vec<i64>> = None;
    if let Ok(cell_data) = child(&piece, "CellData") {
        for field in REGION_FIELDS {
            let array = data_arrays(&cell_data).find(|a| a.attribute("Name") == Some(field));
            if let Some(array) = array {
                let values = integers(decode_data_array(&array, header)?, field)?;
                if values.len() != num_cells {
                    return Err(ZapataError::Parse(format!(
                        "cell field {field} has {} values for {} cells",
                        values.len(),
                        num_cells
                    )));
                }
                info!("[mesh] using cell field '{field}' as region id");
                region_values = Some(values);
                break;
            }
        }
    }
    if region_values.is_none() {
        warn!(
            "[mesh] no {} cell field found, assigning region {} to every cell",
            REGION_FIELDS.join("/"),
            DEFAULT_REGION
        );
    }

    let mut elements = Vec::with_capacity(num_cells);
    let mut regions = BTreeMap::new();
    let mut skipped_cells = 0;
    let mut start = 0usize;
    for (i, (&end, &cell_type)) in offsets.iter().zip(&types).enumerate() {
        let end = to_index(end, "offset")?;
        if end < start || end > connectivity.len() {
            return Err(ZapataError::Parse(format!(
                "cell {i} has offset {end} outside the connectivity array"
            )));
        }
        let cell = &connectivity[start..end];
        start = end;

        if cell_type != VTK_TETRA || cell.len() != 4 {
            skipped_cells += 1;
            continue;
        }
        let mut element_nodes = [0usize; 4];
        for (slot, &n) in element_nodes.iter_mut().zip(cell) {
            *slot = to_index(n, "connectivity")?;
        }
        let region = match &region_values {
            Some(values) => RegionId::try_from(values[i]).map_err(|_| {
                ZapataError::Parse(format!("cell {i} has out of range region {}", values[i]))
            })?,
            None => DEFAULT_REGION,
        };
        regions
            .entry(region)
            .or_insert(Region { id: region, name: None });
        elements.push(RawElement {
            nodes: element_nodes,
            region,
        });
    }

    if skipped_cells > 0 {
        warn!("[mesh] skipped {} cells that are not tetrahedra", skipped_cells);
    }

    let mesh = SourceMesh {
        format: SourceFormat::Vtu,
        nodes,
        elements,
        regions,
        skipped_cells,
    };
    mesh.validate()?;
    Ok(mesh)
}

fn count_attribute(node: &roxmltree::Node, name: &str) -> Result<usize> {
    match node.attribute(name).map(|v| v.trim().parse::<usize>()) {
        Some(Ok(v)) => Ok(v),
        _ => Err(ZapataError::Parse(format!(
            "Piece is missing a valid {name} attribute"
        ))),
    }
}

fn child<'a, 'input>(
    node: &roxmltree::Node<'a, 'input>,
    name: &str,
) -> Result<roxmltree::Node<'a, 'input>> {
    node.children()
        .find(|n| n.tag_name().name() == name)
        .ok_or_else(|| ZapataError::Parse(format!("Piece has no {name} section")))
}

fn data_arrays<'a, 'input>(
    node: &roxmltree::Node<'a, 'input>,
) -> impl Iterator<Item = roxmltree::Node<'a, 'input>> {
    node.children()
        .filter(|n| n.tag_name().name() == "DataArray")
}

fn named_integers(node: &roxmltree::Node, name: &str, header: HeaderType) -> Result<Vec<i64>> {
    let array = data_arrays(node)
        .find(|a| a.attribute("Name") == Some(name))
        .ok_or_else(|| ZapataError::Parse(format!("Cells section has no {name} array")))?;
    integers(decode_data_array(&array, header)?, name)
}

fn integers(values: Vec<f64>, name: &str) -> Result<Vec<i64>> {
    values
        .into_iter()
        .map(|v| {
            if v.fract() == 0.0 && v.is_finite() {
                Ok(v as i64)
            } else {
                Err(ZapataError::Parse(format!(
                    "non-integer value {v} in {name} array"
                )))
            }
        })
        .collect()
}

fn to_index(value: i64, what: &str) -> Result<usize> {
    usize::try_from(value)
        .map_err(|_| ZapataError::Parse(format!("negative {what} value {value}")))
}

/// Decodes a DataArray into f64 values, whatever its scalar type
fn decode_data_array(array: &roxmltree::Node, header: HeaderType) -> Result<Vec<f64>> {
    let name = array.attribute("Name").unwrap_or("unnamed");
    let scalar = array.attribute("type").unwrap_or("Float64");
    let text = array.text().unwrap_or("").trim();

    match array.attribute("format").unwrap_or("ascii") {
        "ascii" => text
            .split_whitespace()
            .map(|v| {
                v.parse::<f64>().map_err(|_| {
                    ZapataError::Parse(format!("unexpected value '{v}' in {name} array"))
                })
            })
            .collect(),
        "binary" => {
            let bytes = decode_binary_block(text, header, name)?;
            decode_scalars(&bytes, scalar, name)
        }
        other => Err(ZapataError::Parse(format!(
            "{name} array uses unsupported format '{other}'"
        ))),
    }
}

/// Strips the block-size header from an inline base64 data block.
/// VTK may encode the header and the payload as one base64 stream or as two
/// consecutive ones; both layouts are accepted.
fn decode_binary_block(text: &str, header: HeaderType, name: &str) -> Result<Vec<u8>> {
    let compact: String = text.split_whitespace().collect();
    let header_size = header.size();

    let (block_size, payload) = match BASE64.decode(compact.as_bytes()) {
        Ok(bytes) if bytes.len() >= header_size => {
            let size = read_header(&bytes[..header_size], header);
            (size, bytes[header_size..].to_vec())
        }
        _ => {
            let header_chars = 4 * header_size.div_ceil(3);
            if compact.len() < header_chars {
                return Err(ZapataError::Parse(format!(
                    "{name} array binary block is truncated"
                )));
            }
            let head = BASE64
                .decode(&compact.as_bytes()[..header_chars])
                .map_err(|err| ZapataError::Parse(format!("{name} array: {err}")))?;
            let body = BASE64
                .decode(&compact.as_bytes()[header_chars..])
                .map_err(|err| ZapataError::Parse(format!("{name} array: {err}")))?;
            if head.len() < header_size {
                return Err(ZapataError::Parse(format!(
                    "{name} array binary header is truncated"
                )));
            }
            (read_header(&head[..header_size], header), body)
        }
    };

    if payload.len() < block_size {
        return Err(ZapataError::Parse(format!(
            "{name} array declares {block_size} bytes but holds {}",
            payload.len()
        )));
    }
    Ok(payload[..block_size].to_vec())
}

fn read_header(bytes: &[u8], header: HeaderType) -> usize {
    match header {
        HeaderType::UInt32 => {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&bytes[..4]);
            u32::from_le_bytes(raw) as usize
        }
        HeaderType::UInt64 => {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[..8]);
            u64::from_le_bytes(raw) as usize
        }
    }
}

fn decode_scalars(bytes: &[u8], scalar: &str, name: &str) -> Result<Vec<f64>> {
    macro_rules! le {
        ($t:ty) => {{
            const SIZE: usize = std::mem::size_of::<$t>();
            if bytes.len() % SIZE != 0 {
                return Err(ZapataError::Parse(format!(
                    "{} array length {} is not a multiple of {}",
                    name,
                    bytes.len(),
                    SIZE
                )));
            }
            bytes
                .chunks_exact(SIZE)
                .map(|c| {
                    let mut raw = [0u8; SIZE];
                    raw.copy_from_slice(c);
                    <$t>::from_le_bytes(raw) as f64
                })
                .collect()
        }};
    }

    let values: Vec<f64> = match scalar {
        "Float32" => le!(f32),
        "Float64" => le!(f64),
        "Int8" => le!(i8),
        "UInt8" => le!(u8),
        "Int16" => le!(i16),
        "UInt16" => le!(u16),
        "Int32" => le!(i32),
        "UInt32" => le!(u32),
        "Int64" => le!(i64),
        "UInt64" => le!(u64),
        other => {
            return Err(ZapataError::Parse(format!(
                "{name} array has unsupported type {other}"
            )))
        }
    };
    Ok(values)
}

/// Renders canonical nodes and tagged elements as an ASCII `.vtu` document,
/// with the material tag stored in the `dominio` cell field
pub fn render_vtu(nodes: &[Node], elements: &[Element]) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);

    let points: Vec<String> = nodes
        .iter()
        .map(|n| format!("{} {} {}", n.vertex.x, n.vertex.y, n.vertex.z))
        .collect();
    let connectivity: Vec<String> = elements
        .iter()
        .map(|e| {
            e.nodes
                .iter()
                .map(|id| (id - 1).to_string())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect();
    let offsets: Vec<String> = (1..=elements.len()).map(|i| (4 * i).to_string()).collect();
    let types = vec![VTK_TETRA.to_string(); elements.len()];
    let materials: Vec<String> = elements.iter().map(|e| e.material.to_string()).collect();
    let num_points = nodes.len().to_string();
    let num_cells = elements.len().to_string();

    let xml_err = |err: quick_xml::Error| ZapataError::Translation(format!("VTU writer: {err}"));

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", None, None)))
        .map_err(xml_err)?;
    writer
        .write_event(Event::Start(BytesStart::new("VTKFile").with_attributes([
            ("type", "UnstructuredGrid"),
            ("version", "1.0"),
            ("byte_order", "LittleEndian"),
            ("header_type", "UInt32"),
        ])))
        .map_err(xml_err)?;
    writer
        .write_event(Event::Start(BytesStart::new("UnstructuredGrid")))
        .map_err(xml_err)?;
    writer
        .write_event(Event::Start(BytesStart::new("Piece").with_attributes([
            ("NumberOfPoints", num_points.as_str()),
            ("NumberOfCells", num_cells.as_str()),
        ])))
        .map_err(xml_err)?;

    let sections: [(&str, Vec<(&str, &str, &str, &Vec<String>)>); 3] = [
        ("Points", vec![("Points", "Float64", "3", &points)]),
        (
            "Cells",
            vec![
                ("connectivity", "Int64", "1", &connectivity),
                ("offsets", "Int64", "1", &offsets),
                ("types", "UInt8", "1", &types),
            ],
        ),
        ("CellData", vec![("dominio", "Int32", "1", &materials)]),
    ];

    for (section, arrays) in sections {
        writer
            .write_event(Event::Start(BytesStart::new(section)))
            .map_err(xml_err)?;
        for (name, scalar, components, values) in arrays {
            writer
                .write_event(Event::Start(BytesStart::new("DataArray").with_attributes([
                    ("type", scalar),
                    ("Name", name),
                    ("NumberOfComponents", components),
                    ("format", "ascii"),
                ])))
                .map_err(xml_err)?;
            writer
                .write_event(Event::Text(BytesText::new(&values.join(" "))))
                .map_err(xml_err)?;
            writer
                .write_event(Event::End(BytesEnd::new("DataArray")))
                .map_err(xml_err)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new(section)))
            .map_err(xml_err)?;
    }

    for tag in ["Piece", "UnstructuredGrid", "VTKFile"] {
        writer
            .write_event(Event::End(BytesEnd::new(tag)))
            .map_err(xml_err)?;
    }

    let mut document = String::from_utf8(writer.into_inner())
        .map_err(|err| ZapataError::Translation(format!("VTU writer produced invalid utf-8: {err}")))?;
    document.push('\n');
    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatypes::MaterialTag;

    const ASCII_VTU: &str = r#"<?xml version="1.0"?>
<VTKFile type="UnstructuredGrid" version="1.0" byte_order="LittleEndian" header_type="UInt32">
  <UnstructuredGrid>
    <Piece NumberOfPoints="5" NumberOfCells="3">
      <Points>
        <DataArray type="Float64" NumberOfComponents="3" format="ascii">
          0 0 0  1 0 0  0 1 0  0 0 1  1 1 1
        </DataArray>
      </Points>
      <Cells>
        <DataArray type="Int64" Name="connectivity" format="ascii">0 1 2 3 1 2 3 4 0 1 2</DataArray>
        <DataArray type="Int64" Name="offsets" format="ascii">4 8 11</DataArray>
        <DataArray type="UInt8" Name="types" format="ascii">10 10 5</DataArray>
      </Cells>
      <CellData>
        <DataArray type="Int32" Name="dominio" format="ascii">1 4 1</DataArray>
      </CellData>
    </Piece>
  </UnstructuredGrid>
</VTKFile>
"#;

    #[test]
    fn reads_ascii_grid_with_region_field() {
        let mesh = parse_vtu(ASCII_VTU).unwrap();
        assert_eq!(mesh.nodes.len(), 5);
        assert_eq!(mesh.elements.len(), 2);
        assert_eq!(mesh.elements[1].nodes, [1, 2, 3, 4]);
        assert_eq!(mesh.elements[1].region, 4);
        assert_eq!(mesh.skipped_cells, 1);
        assert_eq!(mesh.regions.keys().copied().collect::<Vec<_>>(), vec![1, 4]);
    }

    #[test]
    fn missing_region_field_defaults_to_one() {
        let text = ASCII_VTU.replace("Name=\"dominio\"", "Name=\"quality\"");
        let mesh = parse_vtu(&text).unwrap();
        assert!(mesh.elements.iter().all(|e| e.region == DEFAULT_REGION));
    }

    #[test]
    fn material_id_field_is_accepted() {
        let text = ASCII_VTU.replace("Name=\"dominio\"", "Name=\"material_id\"");
        let mesh = parse_vtu(&text).unwrap();
        assert_eq!(mesh.elements[1].region, 4);
    }

    fn binary_block(payload: &[u8]) -> String {
        let mut bytes = (payload.len() as u32).to_le_bytes().to_vec();
        bytes.extend_from_slice(payload);
        BASE64.encode(bytes)
    }

    #[test]
    fn reads_inline_binary_arrays() {
        let coords: Vec<u8> = [0.0f64, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let connectivity: Vec<u8> = [0i64, 1, 2, 3].iter().flat_map(|v| v.to_le_bytes()).collect();
        let offsets: Vec<u8> = 4i64.to_le_bytes().to_vec();
        let types = vec![10u8];
        let region: Vec<u8> = 2i32.to_le_bytes().to_vec();

        // header and payload encoded separately, as some VTK versions do
        let split_offsets = format!(
            "{}{}",
            BASE64.encode((offsets.len() as u32).to_le_bytes()),
            BASE64.encode(&offsets)
        );

        let text = format!(
            r#"<VTKFile type="UnstructuredGrid" byte_order="LittleEndian">
  <UnstructuredGrid>
    <Piece NumberOfPoints="4" NumberOfCells="1">
      <Points><DataArray type="Float64" NumberOfComponents="3" format="binary">{}</DataArray></Points>
      <Cells>
        <DataArray type="Int64" Name="connectivity" format="binary">{}</DataArray>
        <DataArray type="Int64" Name="offsets" format="binary">{}</DataArray>
        <DataArray type="UInt8" Name="types" format="binary">{}</DataArray>
      </Cells>
      <CellData><DataArray type="Int32" Name="dominio" format="binary">{}</DataArray></CellData>
    </Piece>
  </UnstructuredGrid>
</VTKFile>"#,
            binary_block(&coords),
            binary_block(&connectivity),
            split_offsets,
            binary_block(&types),
            binary_block(&region)
        );

        let mesh = parse_vtu(&text).unwrap();
        assert_eq!(mesh.nodes[3], Vertex::new(0.0, 0.0, 1.0));
        assert_eq!(mesh.elements[0].nodes, [0, 1, 2, 3]);
        assert_eq!(mesh.elements[0].region, 2);
    }

    #[test]
    fn compressed_files_are_rejected() {
        let text = ASCII_VTU.replace(
            "header_type=\"UInt32\"",
            "header_type=\"UInt32\" compressor=\"vtkZLibDataCompressor\"",
        );
        assert!(matches!(parse_vtu(&text), Err(ZapataError::Parse(_))));
    }

    #[test]
    fn rendered_grid_reads_back() {
        let nodes: Vec<Node> = [
            (0.0, 0.0, 0.0),
            (1.0, 0.0, 0.0),
            (0.0, 1.0, 0.0),
            (0.0, 0.0, 1.0),
        ]
        .iter()
        .enumerate()
        .map(|(i, &(x, y, z))| Node {
            id: i + 1,
            vertex: Vertex::new(x, y, z),
        })
        .collect();
        let elements = vec![Element {
            id: 1,
            nodes: [1, 2, 3, 4],
            region: 3,
            material: MaterialTag::new(7).unwrap(),
        }];

        let text = render_vtu(&nodes, &elements).unwrap();
        let mesh = parse_vtu(&text).unwrap();
        assert_eq!(mesh.nodes.len(), 4);
        assert_eq!(mesh.elements[0].nodes, [0, 1, 2, 3]);
        assert_eq!(mesh.elements[0].region, 7);
    }
}
