//! Surface optics per spectral band.
//!
//! A [`Material`] describes how one face of a primitive treats light in each
//! band: how much is reflected, how much is transmitted and how the scattered
//! light is spread. Primitives refer to materials by index into a
//! [`MaterialTable`]; index 0 is the default top face and index 1 the default
//! bottom face.

use thiserror::Error;

/// Number of values describing one band: R, spec power, T, trans power, ior.
pub const VALUES_PER_BAND: usize = 5;

/// Index into a [`MaterialTable`].
pub type MaterialId = usize;

/// Default material of the top face.
pub const DEFAULT_TOP: MaterialId = 0;

/// Default material of the bottom face.
pub const DEFAULT_BOTTOM: MaterialId = 1;

#[derive(Error, Debug, PartialEq)]
pub enum MaterialError {
    #[error("expected a multiple of {VALUES_PER_BAND} values, got {0}")]
    ValueCount(usize),

    #[error("non-finite material value {0}")]
    NotFinite(f32),
}

/// Optical properties of a surface within one spectral band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandOptics {
    /// Fraction of incident light reflected, in [0, 1]
    pub reflectance: f32,
    /// Fraction of incident light transmitted, in [0, 1 - reflectance]
    pub transmittance: f32,
    /// Lobe exponent of the reflected light (negative: keep incident direction)
    pub spec_exponent: f32,
    /// Lobe exponent of the transmitted light (negative: keep incident direction)
    pub trans_exponent: f32,
    /// Refractive index used to bend transmitted rays
    pub refractive_index: f32,
}

impl BandOptics {
    /// Create band optics, clamping reflectance into [0, 1] and transmittance
    /// so that reflectance + transmittance never exceeds 1.
    pub fn new(
        reflectance: f32,
        spec_exponent: f32,
        transmittance: f32,
        trans_exponent: f32,
        refractive_index: f32,
    ) -> Self {
        let r = reflectance.clamp(0.0, 1.0);
        let t = transmittance.clamp(0.0, 1.0 - r);
        if r != reflectance || t != transmittance {
            log::warn!(
                "material band clamped: reflectance {} -> {}, transmittance {} -> {}",
                reflectance,
                r,
                transmittance,
                t
            );
        }
        Self {
            reflectance: r,
            transmittance: t,
            spec_exponent,
            trans_exponent,
            refractive_index,
        }
    }

    /// Fraction of incident light absorbed by the surface.
    pub fn absorbed(&self) -> f32 {
        (1.0 - self.reflectance - self.transmittance).max(0.0)
    }
}

impl Default for BandOptics {
    fn default() -> Self {
        Self::new(0.1, 1.0, 0.1, 1.0, 1.0)
    }
}

/// A named set of per-band optics.
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub name: String,
    bands: Vec<BandOptics>,
}

impl Material {
    /// Create a material from explicit band optics. An empty list yields the
    /// default optics.
    pub fn new(name: impl Into<String>, bands: Vec<BandOptics>) -> Self {
        let bands = if bands.is_empty() {
            vec![BandOptics::default()]
        } else {
            bands
        };
        Self {
            name: name.into(),
            bands,
        }
    }

    /// Parse `R spec T trans ior` groups, one group per band.
    pub fn from_values(name: impl Into<String>, values: &[f32]) -> Result<Self, MaterialError> {
        if values.is_empty() || values.len() % VALUES_PER_BAND != 0 {
            return Err(MaterialError::ValueCount(values.len()));
        }
        if let Some(&bad) = values.iter().find(|v| !v.is_finite()) {
            return Err(MaterialError::NotFinite(bad));
        }

        let bands = values
            .chunks_exact(VALUES_PER_BAND)
            .map(|c| BandOptics::new(c[0], c[1], c[2], c[3], c[4]))
            .collect();
        Ok(Self::new(name, bands))
    }

    /// Material that absorbs everything in every band.
    pub fn black(name: impl Into<String>) -> Self {
        Self::new(name, vec![BandOptics::new(0.0, 1.0, 0.0, 1.0, 1.0)])
    }

    /// Optics of `band`. Bands beyond the ones given repeat the last band.
    pub fn band(&self, band: usize) -> &BandOptics {
        let idx = band.min(self.bands.len() - 1);
        &self.bands[idx]
    }

    /// Number of explicitly specified bands.
    pub fn band_count(&self) -> usize {
        self.bands.len()
    }
}

impl Default for Material {
    fn default() -> Self {
        Self::new("default", Vec::new())
    }
}

/// Materials of one run, addressed by index.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialTable {
    materials: Vec<Material>,
}

impl MaterialTable {
    /// Table holding the default top and bottom materials.
    pub fn new() -> Self {
        Self {
            materials: vec![Material::new("top", Vec::new()), Material::new("bottom", Vec::new())],
        }
    }

    /// Set the material at `id`, growing the table with defaults if needed.
    pub fn insert(&mut self, id: MaterialId, material: Material) {
        if id >= self.materials.len() {
            self.materials.resize_with(id + 1, Material::default);
        }
        self.materials[id] = material;
    }

    /// Material at `id`; out-of-range ids fall back to material 0.
    pub fn get(&self, id: MaterialId) -> &Material {
        self.materials.get(id).unwrap_or(&self.materials[DEFAULT_TOP])
    }

    pub fn contains(&self, id: MaterialId) -> bool {
        id < self.materials.len()
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }
}

impl Default for MaterialTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve a top/bottom pair; an unset bottom mirrors the top.
pub fn face_pair(top: MaterialId, bottom: Option<MaterialId>) -> [MaterialId; 2] {
    [top, bottom.unwrap_or(top)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transmittance_clamped_to_complement() {
        let optics = BandOptics::new(0.7, 1.0, 0.6, 1.0, 1.0);
        assert_eq!(optics.reflectance, 0.7);
        assert!((optics.transmittance - 0.3).abs() < 1e-6);
        assert!(optics.reflectance + optics.transmittance <= 1.0);
        assert_eq!(optics.absorbed(), 0.0);
    }

    #[test]
    fn test_reflectance_clamped_into_unit_range() {
        let optics = BandOptics::new(1.5, 1.0, 0.2, 1.0, 1.0);
        assert_eq!(optics.reflectance, 1.0);
        assert_eq!(optics.transmittance, 0.0);

        let optics = BandOptics::new(-0.5, 1.0, 0.2, 1.0, 1.0);
        assert_eq!(optics.reflectance, 0.0);
        assert_eq!(optics.transmittance, 0.2);
    }

    #[test]
    fn test_loaded_materials_are_normalized() {
        let values = [0.9, 10.0, 0.9, 5.0, 1.4, 0.2, 1.0, 0.3, 1.0, 1.0];
        let material = Material::from_values("leaf", &values).unwrap();
        assert_eq!(material.band_count(), 2);
        for b in 0..2 {
            let o = material.band(b);
            assert!(o.reflectance + o.transmittance <= 1.0 + 1e-6);
        }
    }

    #[test]
    fn test_band_repeats_last() {
        let material = Material::from_values("m", &[0.3, 1.0, 0.2, 1.0, 1.0]).unwrap();
        assert_eq!(material.band(5), material.band(0));
    }

    #[test]
    fn test_bad_value_count() {
        assert_eq!(
            Material::from_values("m", &[0.1, 0.2]),
            Err(MaterialError::ValueCount(2))
        );
        assert!(Material::from_values("m", &[]).is_err());
    }

    #[test]
    fn test_table_fallback_to_zero() {
        let mut table = MaterialTable::new();
        table.insert(0, Material::black("black"));
        assert_eq!(table.get(42).name, "black");

        table.insert(4, Material::default());
        assert_eq!(table.len(), 5);
        assert!(table.contains(3));
    }

    #[test]
    fn test_face_pair_mirrors_top() {
        assert_eq!(face_pair(3, None), [3, 3]);
        assert_eq!(face_pair(3, Some(1)), [3, 1]);
    }
}
