use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use json::JsonValue;
use log::info;

use crate::{
    datatypes::{MaterialTag, RegionId, RegionKey},
    error::{Result, ZapataError},
};

/// Tolerance used when comparing the layer thickness sum against the domain depth
const THICKNESS_SUM_TOLERANCE: f64 = 1e-6;

pub const DEFAULT_TOLERANCE: f64 = 1e-6;
pub const DEFAULT_MAX_REJECT_FRACTION: f64 = 0.01;
pub const DEFAULT_DEGENERACY_RATIO: f64 = 1e-6;
pub const DEFAULT_COORDINATE_PRECISION: usize = 6;

#[derive(Debug, Clone, PartialEq)]
pub struct DomainGeometry {
    pub lx: f64,
    pub ly: f64,
    pub lz: f64,
    pub quarter_domain: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FootingGeometry {
    /// Width along x
    pub b: f64,
    /// Length along y
    pub l: f64,
    /// Embedment depth of the footing top below the surface
    pub df: f64,
    /// Footing thickness
    pub tz: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SoilLayer {
    pub name: String,
    pub thickness: f64,
    pub material: MaterialTag,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FootingMaterial {
    pub name: String,
    pub material: MaterialTag,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeshRefinement {
    pub lc_footing: f64,
    pub lc_near: f64,
    pub lc_far: f64,
    pub growth_rate: f64,
    pub optimize_netgen: bool,
}

impl Default for MeshRefinement {
    fn default() -> Self {
        MeshRefinement {
            lc_footing: 0.3,
            lc_near: 0.45,
            lc_far: 3.0,
            growth_rate: 1.2,
            optimize_netgen: true,
        }
    }
}

/// Axis-aligned extent of the footing body inside the meshed domain
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FootingBox {
    pub x_min: f64,
    pub y_min: f64,
    pub z_min: f64,
    pub dx: f64,
    pub dy: f64,
    pub dz: f64,
}

/// Knobs of the translation pass
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationOptions {
    /// Coincidence tolerance, in mesh length units
    pub tolerance: f64,
    /// Largest admissible fraction of degenerate elements
    pub max_reject_fraction: f64,
    /// Degenerate when |V| < ratio * (longest edge)^3
    pub degeneracy_ratio: f64,
    /// Swap nodes of negatively oriented tetrahedra
    pub reorient: bool,
    /// Decimals written for node coordinates
    pub coordinate_precision: usize,
}

impl Default for TranslationOptions {
    fn default() -> Self {
        TranslationOptions {
            tolerance: DEFAULT_TOLERANCE,
            max_reject_fraction: DEFAULT_MAX_REJECT_FRACTION,
            degeneracy_ratio: DEFAULT_DEGENERACY_RATIO,
            reorient: true,
            coordinate_precision: DEFAULT_COORDINATE_PRECISION,
        }
    }
}

impl TranslationOptions {
    pub fn validate(&self) -> Result<()> {
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(ZapataError::Validation(format!(
                "coincidence tolerance must be strictly positive, got {}",
                self.tolerance
            )));
        }
        if !(0.0..=1.0).contains(&self.max_reject_fraction) {
            return Err(ZapataError::Validation(format!(
                "max reject fraction must lie in [0, 1], got {}",
                self.max_reject_fraction
            )));
        }
        if !(self.degeneracy_ratio.is_finite() && self.degeneracy_ratio > 0.0) {
            return Err(ZapataError::Validation(format!(
                "degeneracy ratio must be strictly positive, got {}",
                self.degeneracy_ratio
            )));
        }
        if self.coordinate_precision > 17 {
            return Err(ZapataError::Validation(format!(
                "coordinate precision {} exceeds 17 decimals",
                self.coordinate_precision
            )));
        }
        Ok(())
    }

    /// Whether the written coordinates are coarser than the tolerance, so
    /// two canonical nodes may print as the same point
    pub fn precision_hides_tolerance(&self) -> bool {
        let resolution = 1.0 / 10f64.powi(self.coordinate_precision.min(17) as i32);
        resolution > self.tolerance
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeshConfig {
    pub domain: DomainGeometry,
    pub footing: FootingGeometry,
    pub soil_layers: Vec<SoilLayer>,
    pub footing_material: FootingMaterial,
    pub refinement: MeshRefinement,
    pub translation: TranslationOptions,
    /// Material tags keyed by raw region id, for regions without a usable name
    pub region_tags: BTreeMap<RegionId, MaterialTag>,
}

impl MeshConfig {
    /// Reads and validates a configuration file
    pub fn load(path: &Path) -> Result<MeshConfig> {
        let contents =
            std::fs::read_to_string(path).map_err(|err| ZapataError::io(path, err))?;
        let config = MeshConfig::parse(&contents)?;
        info!(
            "loaded configuration {} with {} soil layers",
            path.display(),
            config.soil_layers.len()
        );
        Ok(config)
    }

    /// Parses and validates a configuration from its JSON text
    pub fn parse(contents: &str) -> Result<MeshConfig> {
        let input = match json::parse(contents) {
            Ok(v) => v,
            Err(err) => {
                return Err(ZapataError::Configuration(format!(
                    "Error in configuration json: {err}"
                )))
            }
        };
        let config = MeshConfig::from_json(&input)?;
        config.validate()?;
        Ok(config)
    }

    fn from_json(input: &JsonValue) -> Result<MeshConfig> {
        for key in ["geometry", "soil_layers", "footing_material"] {
            if !input.has_key(key) {
                return Err(ZapataError::Configuration(format!(
                    "Configuration json missing {key} field"
                )));
            }
        }
        let geometry = &input["geometry"];
        for key in ["domain", "footing"] {
            if !geometry.has_key(key) {
                return Err(ZapataError::Configuration(format!(
                    "Configuration json missing {key} field in geometry section"
                )));
            }
        }

        let domain_json = &geometry["domain"];
        let domain = DomainGeometry {
            lx: required_f64(domain_json, "Lx", "geometry.domain")?,
            ly: required_f64(domain_json, "Ly", "geometry.domain")?,
            lz: required_f64(domain_json, "Lz", "geometry.domain")?,
            quarter_domain: domain_json["quarter_domain"].as_bool().unwrap_or(false),
        };

        let footing_json = &geometry["footing"];
        let b = required_f64(footing_json, "B", "geometry.footing")?;
        let footing = FootingGeometry {
            b,
            l: optional_f64(footing_json, "L", "geometry.footing")?.unwrap_or(b),
            df: required_f64(footing_json, "Df", "geometry.footing")?,
            tz: required_f64(footing_json, "tz", "geometry.footing")?,
        };

        if !input["soil_layers"].is_array() {
            return Err(ZapataError::Configuration(
                "soil_layers must be a list".to_owned(),
            ));
        }
        let mut soil_layers = Vec::new();
        for (i, layer_json) in input["soil_layers"].members().enumerate() {
            let section = format!("soil_layers[{i}]");
            let name = match layer_json["name"].as_str() {
                Some(n) => n.to_owned(),
                None => {
                    return Err(ZapataError::Configuration(format!(
                        "{section} is missing name field"
                    )))
                }
            };
            soil_layers.push(SoilLayer {
                name,
                thickness: required_f64(layer_json, "thickness", &section)?,
                material: required_tag(layer_json, "material_id", &section)?,
                description: layer_json["description"].as_str().map(str::to_owned),
            });
        }

        let footing_material_json = &input["footing_material"];
        let footing_material = FootingMaterial {
            name: footing_material_json["name"]
                .as_str()
                .unwrap_or("FOOTING")
                .to_owned(),
            material: required_tag(footing_material_json, "material_id", "footing_material")?,
        };

        let mut refinement = MeshRefinement::default();
        if input.has_key("mesh_refinement") {
            let r = &input["mesh_refinement"];
            let section = "mesh_refinement";
            if let Some(v) = optional_f64(r, "lc_footing", section)? {
                refinement.lc_footing = v;
                refinement.lc_near = 1.5 * v;
            }
            if let Some(v) = optional_f64(r, "lc_near", section)? {
                refinement.lc_near = v;
            }
            if let Some(v) = optional_f64(r, "lc_far", section)? {
                refinement.lc_far = v;
            }
            if let Some(v) = optional_f64(r, "growth_rate", section)? {
                refinement.growth_rate = v;
            }
            if let Some(v) = r["optimize_netgen"].as_bool() {
                refinement.optimize_netgen = v;
            }
        }

        let mut translation = TranslationOptions::default();
        let mut region_tags = BTreeMap::new();
        if input.has_key("translation") {
            let t = &input["translation"];
            let section = "translation";
            if let Some(v) = optional_f64(t, "tolerance", section)? {
                translation.tolerance = v;
            }
            if let Some(v) = optional_f64(t, "max_reject_fraction", section)? {
                translation.max_reject_fraction = v;
            }
            if let Some(v) = optional_f64(t, "degeneracy_ratio", section)? {
                translation.degeneracy_ratio = v;
            }
            if let Some(v) = t["reorient"].as_bool() {
                translation.reorient = v;
            }
            if t.has_key("coordinate_precision") {
                translation.coordinate_precision = match t["coordinate_precision"].as_usize() {
                    Some(p) => p,
                    None => {
                        return Err(ZapataError::Configuration(
                            "translation.coordinate_precision must be a non-negative integer"
                                .to_owned(),
                        ))
                    }
                };
            }
            for (key, value) in t["region_tags"].entries() {
                let region: RegionId = match key.trim().parse() {
                    Ok(r) => r,
                    Err(_) => {
                        return Err(ZapataError::Configuration(format!(
                            "translation.region_tags key '{key}' is not an integer region id"
                        )))
                    }
                };
                let tag = match value.as_f64() {
                    Some(v) => MaterialTag::from_f64(v)?,
                    None => {
                        return Err(ZapataError::Validation(format!(
                            "translation.region_tags.{key} is not a number"
                        )))
                    }
                };
                region_tags.insert(region, tag);
            }
        }

        Ok(MeshConfig {
            domain,
            footing,
            soil_layers,
            footing_material,
            refinement,
            translation,
            region_tags,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.soil_layers.is_empty() {
            return Err(ZapataError::Validation(
                "at least one soil layer is required".to_owned(),
            ));
        }

        let positive = [
            ("geometry.domain.Lx", self.domain.lx),
            ("geometry.domain.Ly", self.domain.ly),
            ("geometry.domain.Lz", self.domain.lz),
            ("geometry.footing.B", self.footing.b),
            ("geometry.footing.L", self.footing.l),
            ("geometry.footing.tz", self.footing.tz),
            ("mesh_refinement.lc_footing", self.refinement.lc_footing),
            ("mesh_refinement.lc_near", self.refinement.lc_near),
            ("mesh_refinement.lc_far", self.refinement.lc_far),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(ZapataError::Validation(format!(
                    "{name} must be strictly positive, got {value}"
                )));
            }
        }
        if !(self.footing.df.is_finite() && self.footing.df >= 0.0) {
            return Err(ZapataError::Validation(format!(
                "geometry.footing.Df must not be negative, got {}",
                self.footing.df
            )));
        }

        for layer in &self.soil_layers {
            if !(layer.thickness.is_finite() && layer.thickness > 0.0) {
                return Err(ZapataError::Validation(format!(
                    "soil layer '{}' has non-positive thickness {}",
                    layer.name, layer.thickness
                )));
            }
        }
        let total_thickness: f64 = self.soil_layers.iter().map(|l| l.thickness).sum();
        if (total_thickness - self.domain.lz).abs() > THICKNESS_SUM_TOLERANCE {
            return Err(ZapataError::Validation(format!(
                "soil layer thicknesses sum to {} m but the domain depth Lz is {} m",
                total_thickness, self.domain.lz
            )));
        }

        if self.footing.df + self.footing.tz > self.domain.lz {
            return Err(ZapataError::Validation(format!(
                "footing base at depth {} m lies below the domain depth {} m",
                self.footing.df + self.footing.tz,
                self.domain.lz
            )));
        }
        let (lx, ly) = self.effective_extent();
        let footing = self.footing_box();
        if footing.x_min + footing.dx > lx || footing.y_min + footing.dy > ly {
            return Err(ZapataError::Validation(format!(
                "footing {} x {} m does not fit in the {} x {} m domain",
                self.footing.b, self.footing.l, lx, ly
            )));
        }

        let mut names = BTreeSet::new();
        for name in self
            .soil_layers
            .iter()
            .map(|l| &l.name)
            .chain(std::iter::once(&self.footing_material.name))
        {
            if !names.insert(name) {
                return Err(ZapataError::Configuration(format!(
                    "region name '{name}' is used more than once"
                )));
            }
        }

        let r = &self.refinement;
        if !(r.growth_rate.is_finite() && r.growth_rate > 1.0) {
            return Err(ZapataError::Validation(format!(
                "mesh_refinement.growth_rate must be greater than 1, got {}",
                r.growth_rate
            )));
        }
        if r.lc_footing > r.lc_near || r.lc_near > r.lc_far {
            return Err(ZapataError::Validation(format!(
                "element sizes must satisfy lc_footing <= lc_near <= lc_far, got {} / {} / {}",
                r.lc_footing, r.lc_near, r.lc_far
            )));
        }

        self.translation.validate()
    }

    /// Horizontal extent actually meshed (halved in quarter-domain mode)
    pub fn effective_extent(&self) -> (f64, f64) {
        if self.domain.quarter_domain {
            (self.domain.lx / 2.0, self.domain.ly / 2.0)
        } else {
            (self.domain.lx, self.domain.ly)
        }
    }

    /// Footing body position. In quarter-domain mode the footing quarter
    /// sits at the origin corner, where the symmetry planes meet.
    pub fn footing_box(&self) -> FootingBox {
        let (dx, dy, x_min, y_min) = if self.domain.quarter_domain {
            (self.footing.b / 2.0, self.footing.l / 2.0, 0.0, 0.0)
        } else {
            (
                self.footing.b,
                self.footing.l,
                (self.domain.lx - self.footing.b) / 2.0,
                (self.domain.ly - self.footing.l) / 2.0,
            )
        };
        FootingBox {
            x_min,
            y_min,
            z_min: -self.footing.df - self.footing.tz,
            dx,
            dy,
            dz: self.footing.tz,
        }
    }

    /// (z_top, z_bottom) for each soil layer; the surface is z = 0
    pub fn layer_boundaries(&self) -> Vec<(f64, f64)> {
        let mut z_top = 0.0;
        self.soil_layers
            .iter()
            .map(|layer| {
                let z_bottom = z_top - layer.thickness;
                let bounds = (z_top, z_bottom);
                z_top = z_bottom;
                bounds
            })
            .collect()
    }

    /// Operator-supplied region to material mapping
    pub fn material_keys(&self) -> BTreeMap<RegionKey, MaterialTag> {
        let mut keys = BTreeMap::new();
        for layer in &self.soil_layers {
            keys.insert(RegionKey::Name(layer.name.clone()), layer.material);
        }
        keys.insert(
            RegionKey::Name(self.footing_material.name.clone()),
            self.footing_material.material,
        );
        for (id, tag) in &self.region_tags {
            keys.insert(RegionKey::Id(*id), *tag);
        }
        keys
    }

    /// Logs a human-readable summary of the configuration
    pub fn log_summary(&self) {
        let (lx, ly) = self.effective_extent();
        info!(
            "domain {} x {} x {} m{}",
            self.domain.lx,
            self.domain.ly,
            self.domain.lz,
            if self.domain.quarter_domain {
                format!(" (quarter model meshed as {lx} x {ly} m)")
            } else {
                String::new()
            }
        );
        info!(
            "footing B={} m L={} m Df={} m tz={} m, material {} ({})",
            self.footing.b,
            self.footing.l,
            self.footing.df,
            self.footing.tz,
            self.footing_material.material,
            self.footing_material.name
        );
        for (i, (layer, (z_top, z_bottom))) in self
            .soil_layers
            .iter()
            .zip(self.layer_boundaries())
            .enumerate()
        {
            info!(
                "layer {}: {} {} m (z {:.2} to {:.2}), material {}{}",
                i + 1,
                layer.name,
                layer.thickness,
                z_bottom,
                z_top,
                layer.material,
                layer
                    .description
                    .as_ref()
                    .map(|d| format!(" - {d}"))
                    .unwrap_or_default()
            );
        }
        let r = &self.refinement;
        info!(
            "element size {} m at footing, {} m near field, {} m far field, growth {}",
            r.lc_footing, r.lc_near, r.lc_far, r.growth_rate
        );
    }
}

fn required_f64(value: &JsonValue, key: &str, section: &str) -> Result<f64> {
    match optional_f64(value, key, section)? {
        Some(v) => Ok(v),
        None => Err(ZapataError::Configuration(format!(
            "Configuration json missing {key} field in {section} section"
        ))),
    }
}

fn optional_f64(value: &JsonValue, key: &str, section: &str) -> Result<Option<f64>> {
    if !value.has_key(key) {
        return Ok(None);
    }
    match value[key].as_f64() {
        Some(v) => Ok(Some(v)),
        None => Err(ZapataError::Configuration(format!(
            "Bad value for {key} in {section}: expected a number"
        ))),
    }
}

fn required_tag(value: &JsonValue, key: &str, section: &str) -> Result<MaterialTag> {
    if !value.has_key(key) {
        return Err(ZapataError::Configuration(format!(
            "{section} is missing {key} field"
        )));
    }
    match value[key].as_f64() {
        Some(v) => MaterialTag::from_f64(v),
        None => Err(ZapataError::Validation(format!(
            "{section}.{key} is not a number"
        ))),
    }
}
