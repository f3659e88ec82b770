//! Environment configuration file.
//!
//! The file holds one `key: value` directive per line; `#` starts a comment.
//! Unknown keys are logged and ignored, malformed values are errors. Paths
//! are resolved relative to the directory of the configuration file.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use canopy_math::{UVec3, Vec3};
use thiserror::Error;

use crate::material::{Material, MaterialError, MaterialTable, DEFAULT_BOTTOM, DEFAULT_TOP};
use crate::sky::LightSource;
use crate::spectrum::{SpectralSample, MAX_BANDS};

/// Largest number of voxel cells a grid may have.
pub const MAX_GRID_CELLS: usize = 1 << 26;

/// Rays per parallel work unit unless configured otherwise.
pub const DEFAULT_BATCH_SIZE: usize = 4096;

/// Total cell count of a grid resolution, or `None` if it does not fit a `usize`.
pub fn grid_cell_count(resolution: UVec3) -> Option<usize> {
    (resolution.x as usize)
        .checked_mul(resolution.y as usize)?
        .checked_mul(resolution.z as usize)
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("line {line}: invalid value '{value}' for '{key}'")]
    InvalidValue { line: usize, key: String, value: String },

    #[error("line {line}: material: {source}")]
    Material { line: usize, source: MaterialError },

    #[error("{0} spectral bands requested, at most {MAX_BANDS} supported")]
    TooManyBands(usize),

    #[error("{given} source spectrum entries for {bands} bands")]
    SpectrumMismatch { given: usize, bands: usize },
}

/// Lobe used to scatter reflected and transmitted rays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReflectanceModel {
    /// Microfacet half-vector lobe around the surface normal
    Blinn,
    /// Lobe around the mirror (or refracted) direction
    #[default]
    Phong,
    /// Cosine-power lobe around the surface normal
    Parcinopy,
}

impl FromStr for ReflectanceModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "blinn" | "blinn-phong" => Ok(ReflectanceModel::Blinn),
            "phong" => Ok(ReflectanceModel::Phong),
            "parcinopy" => Ok(ReflectanceModel::Parcinopy),
            other => Err(format!("unknown reflectance model '{}'", other)),
        }
    }
}

/// Russian-roulette termination of weak rays.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RussianRoulette {
    /// Summed intensity at or below which roulette is played; <= 0 disables it
    pub threshold: f32,
    /// Probability of terminating a ray once below the threshold
    pub probability: f32,
}

impl Default for RussianRoulette {
    fn default() -> Self {
        Self {
            threshold: 0.0,
            probability: 0.5,
        }
    }
}

/// Everything the light environment reads from its configuration file.
#[derive(Debug, Clone)]
pub struct EnvironmentConfig {
    /// Extent of the simulated domain
    pub domain_size: Vec3,
    /// Minimum corner of the domain
    pub position: Vec3,
    /// Voxel grid resolution per axis
    pub grid_size: UVec3,
    pub seed: u64,
    /// Obstacle scene file
    pub obstacles: Option<PathBuf>,
    /// Drop query geometry at the start of every step
    pub remove_objects: bool,
    /// Insert query geometry into the scene
    pub add_objects: bool,
    /// Maximum number of surface interactions per ray
    pub max_depth: u32,
    /// Primary rays per unit area
    pub ray_density: f32,
    pub russian_roulette: RussianRoulette,
    pub reflectance_model: ReflectanceModel,
    /// Source spectrum, one entry per band
    pub spectrum: Vec<SpectralSample>,
    pub light_sources: Vec<LightSource>,
    pub sky_file: Option<PathBuf>,
    /// Emit rays from queried objects instead of from the sky
    pub rays_from_objects: bool,
    /// Lobe exponent of rays emitted from objects
    pub object_exponent: f32,
    /// Carry all bands on one ray instead of shooting each band separately
    pub one_ray_per_spectrum: bool,
    pub materials: MaterialTable,
    /// Query parameter selecting the material of the queried object
    pub material_parameter: Option<usize>,
    pub stratified: bool,
    /// Number of statistical runs per step
    pub runs: u32,
    /// Do not credit light absorbed at the first hit
    pub no_direct_light: bool,
    /// Wrap rays around the X and Z sides of the domain
    pub periodic: bool,
    /// Maximum traversal distance in periodic mode, in grid diagonals
    pub periodic_factor: f32,
    /// Rays per parallel work unit
    pub batch_size: usize,
    pub verbose: bool,
    pub version: Option<String>,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            domain_size: Vec3::splat(2.0),
            position: Vec3::splat(-1.0),
            grid_size: UVec3::ONE,
            seed: 1,
            obstacles: None,
            remove_objects: true,
            add_objects: true,
            max_depth: 10,
            ray_density: 100.0,
            russian_roulette: RussianRoulette::default(),
            reflectance_model: ReflectanceModel::default(),
            spectrum: vec![SpectralSample::default()],
            light_sources: Vec::new(),
            sky_file: None,
            rays_from_objects: false,
            object_exponent: 1.0,
            one_ray_per_spectrum: true,
            materials: MaterialTable::new(),
            material_parameter: None,
            stratified: false,
            runs: 1,
            no_direct_light: false,
            periodic: false,
            periodic_factor: 5.0,
            batch_size: DEFAULT_BATCH_SIZE,
            verbose: false,
            version: None,
        }
    }
}

/// Split a directive line into lowercase key and raw value.
fn split_directive(line: &str) -> Option<(String, &str)> {
    let content = line.split('#').next().unwrap_or("").trim();
    if content.is_empty() {
        return None;
    }
    let (key, value) = content.split_once(':')?;
    Some((key.trim().to_ascii_lowercase(), value.trim()))
}

/// Quick scan for `verbose: on`, used to pick the log level before parsing.
pub fn verbose_requested(content: &str) -> bool {
    content
        .lines()
        .filter_map(split_directive)
        .any(|(key, value)| key == "verbose" && parse_switch(value).unwrap_or(false))
}

fn parse_switch(value: &str) -> Option<bool> {
    match value.split_whitespace().next()?.to_ascii_lowercase().as_str() {
        "on" | "yes" | "true" | "1" => Some(true),
        "off" | "no" | "false" | "0" => Some(false),
        _ => None,
    }
}

struct Line<'a> {
    number: usize,
    key: &'a str,
    value: &'a str,
}

impl Line<'_> {
    fn invalid(&self) -> ConfigError {
        ConfigError::InvalidValue {
            line: self.number,
            key: self.key.to_string(),
            value: self.value.to_string(),
        }
    }

    fn floats(&self) -> Result<Vec<f32>, ConfigError> {
        self.value
            .split_whitespace()
            .map(|t| t.parse::<f32>().ok().filter(|v| v.is_finite()))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| self.invalid())
    }

    fn floats_exact(&self, n: usize) -> Result<Vec<f32>, ConfigError> {
        let v = self.floats()?;
        if v.len() == n {
            Ok(v)
        } else {
            Err(self.invalid())
        }
    }

    fn vec3(&self) -> Result<Vec3, ConfigError> {
        let v = self.floats_exact(3)?;
        Ok(Vec3::new(v[0], v[1], v[2]))
    }

    fn scalar<T: FromStr>(&self) -> Result<T, ConfigError> {
        self.value.parse::<T>().map_err(|_| self.invalid())
    }

    fn switch(&self) -> Result<bool, ConfigError> {
        parse_switch(self.value).ok_or_else(|| self.invalid())
    }

    fn path(&self, base: Option<&Path>) -> PathBuf {
        let p = PathBuf::from(self.value);
        match base {
            Some(dir) if p.is_relative() => dir.join(p),
            _ => p,
        }
    }
}

impl EnvironmentConfig {
    /// Load and parse a configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content, path.parent())
    }

    /// Parse configuration text; relative paths are joined onto `base`.
    pub fn parse(content: &str, base: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = EnvironmentConfig::default();
        let mut band_count: Option<usize> = None;
        let mut spectrum: Vec<SpectralSample> = Vec::new();
        let mut materials: Vec<(usize, usize, Vec<f32>)> = Vec::new();

        for (i, raw) in content.lines().enumerate() {
            let Some((key, value)) = split_directive(raw) else {
                continue;
            };
            let line = Line {
                number: i + 1,
                key: &key,
                value,
            };

            match line.key {
                "domain size" => {
                    let size = line.vec3()?;
                    if !size.is_finite() || size.cmple(Vec3::ZERO).any() {
                        return Err(line.invalid());
                    }
                    config.domain_size = size;
                }
                "position" => config.position = line.vec3()?,
                "grid size" => {
                    let v = line.floats_exact(3)?;
                    if v.iter().any(|&n| n < 1.0 || n.fract() != 0.0) {
                        return Err(line.invalid());
                    }
                    if v.iter().any(|&n| n > u32::MAX as f32) {
                        return Err(line.invalid());
                    }
                    let grid_size = UVec3::new(v[0] as u32, v[1] as u32, v[2] as u32);
                    if grid_cell_count(grid_size).map_or(true, |n| n > MAX_GRID_CELLS) {
                        return Err(line.invalid());
                    }
                    config.grid_size = grid_size;
                }
                "seed" => config.seed = line.scalar()?,
                "obstacles" => config.obstacles = Some(line.path(base)),
                "remove objects" => config.remove_objects = line.switch()?,
                "add objects" => config.add_objects = line.switch()?,
                "depth" => {
                    config.max_depth = line.scalar()?;
                    if config.max_depth == 0 {
                        return Err(line.invalid());
                    }
                }
                "ray density" => {
                    config.ray_density = line.scalar()?;
                    if !config.ray_density.is_finite() || config.ray_density <= 0.0 {
                        return Err(line.invalid());
                    }
                }
                "leaf top" => materials.push((line.number, DEFAULT_TOP, line.floats()?)),
                "leaf bottom" => materials.push((line.number, DEFAULT_BOTTOM, line.floats()?)),
                "material" => {
                    let v = line.floats()?;
                    let Some((&index, values)) = v.split_first() else {
                        return Err(line.invalid());
                    };
                    if index < 0.0 || index.fract() != 0.0 {
                        return Err(line.invalid());
                    }
                    materials.push((line.number, index as usize, values.to_vec()));
                }
                "russian roulette" => {
                    let v = line.floats_exact(2)?;
                    if !(0.0..=1.0).contains(&v[1]) {
                        return Err(line.invalid());
                    }
                    config.russian_roulette = RussianRoulette {
                        threshold: v[0],
                        probability: v[1],
                    };
                }
                "reflectance model" => {
                    config.reflectance_model = line.value.parse().map_err(|_| line.invalid())?;
                }
                "spectrum samples" => {
                    let n: usize = line.scalar()?;
                    if n == 0 {
                        return Err(line.invalid());
                    }
                    band_count = Some(n);
                }
                "source spectrum" => {
                    let v = line.floats_exact(2)?;
                    spectrum.push(SpectralSample {
                        wavelength: v[0],
                        weight: v[1],
                    });
                }
                "light source" => {
                    let v = line.floats_exact(4)?;
                    let direction = Vec3::new(v[0], v[1], v[2])
                        .try_normalize()
                        .ok_or_else(|| line.invalid())?;
                    if direction.y > 0.0 {
                        log::warn!("line {}: light source points upwards", line.number);
                    }
                    config.light_sources.push(LightSource {
                        direction,
                        weight: v[3],
                    });
                }
                "sky file" => config.sky_file = Some(line.path(base)),
                "rays from objects" => {
                    let mut parts = line.value.split_whitespace();
                    config.rays_from_objects = parse_switch(parts.next().unwrap_or("")).ok_or_else(|| line.invalid())?;
                    if let Some(exp) = parts.next() {
                        config.object_exponent = exp.parse().map_err(|_| line.invalid())?;
                    }
                }
                "one ray per spectrum" => config.one_ray_per_spectrum = line.switch()?,
                "material parameter" => config.material_parameter = Some(line.scalar()?),
                "stratified sampling" => config.stratified = line.switch()?,
                "number of runs" => {
                    config.runs = line.scalar()?;
                    if config.runs == 0 {
                        return Err(line.invalid());
                    }
                }
                "no direct light" => config.no_direct_light = line.switch()?,
                "periodic" => {
                    let mut parts = line.value.split_whitespace();
                    config.periodic = parse_switch(parts.next().unwrap_or("")).ok_or_else(|| line.invalid())?;
                    if let Some(factor) = parts.next() {
                        config.periodic_factor = factor.parse().map_err(|_| line.invalid())?;
                        if !config.periodic_factor.is_finite() || config.periodic_factor < 1.0 {
                            return Err(line.invalid());
                        }
                    }
                }
                "batch size" => {
                    config.batch_size = line.scalar()?;
                    if config.batch_size == 0 {
                        return Err(line.invalid());
                    }
                }
                "verbose" => config.verbose = line.switch()?,
                "version" => config.version = Some(line.value.to_string()),
                other => log::warn!("line {}: unknown directive '{}' ignored", line.number, other),
            }
        }

        let bands = band_count.unwrap_or(spectrum.len().max(1));
        if bands > MAX_BANDS {
            return Err(ConfigError::TooManyBands(bands));
        }
        if spectrum.len() > bands {
            return Err(ConfigError::SpectrumMismatch {
                given: spectrum.len(),
                bands,
            });
        }
        spectrum.resize(bands, SpectralSample::default());
        config.spectrum = spectrum;

        for (line, index, values) in materials {
            let name = match index {
                DEFAULT_TOP => "leaf top".to_string(),
                DEFAULT_BOTTOM => "leaf bottom".to_string(),
                n => format!("material {}", n),
            };
            let material =
                Material::from_values(name, &values).map_err(|source| ConfigError::Material { line, source })?;
            if material.band_count() < bands {
                log::debug!("line {}: {} bands given, repeating the last", line, material.band_count());
            }
            config.materials.insert(index, material);
        }

        Ok(config)
    }

    /// Number of spectral bands.
    pub fn bands(&self) -> usize {
        self.spectrum.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# light environment
domain size: 10 5 10
position: -5 0 -5
grid size: 10 5 10
seed: 42
obstacles: scene.dat
depth: 3
ray density: 250
leaf top: 0.1 1 0.9 1 1.5
leaf bottom: 0.2 1 0.1 1 1.5   0.3 1 0.1 1 1.5
material: 2 0.5 10 0 1 1
russian roulette: 0.01 0.5
reflectance model: parcinopy
spectrum samples: 2
source spectrum: 450 0.4
source spectrum: 650 0.6
rays from objects: on 2
stratified sampling: yes
number of runs: 4
periodic: on 3
version: 2.1
";

    #[test]
    fn test_parse_sample() {
        let config = EnvironmentConfig::parse(SAMPLE, Some(Path::new("/data"))).unwrap();

        assert_eq!(config.domain_size, Vec3::new(10.0, 5.0, 10.0));
        assert_eq!(config.grid_size, UVec3::new(10, 5, 10));
        assert_eq!(config.seed, 42);
        assert_eq!(config.obstacles, Some(PathBuf::from("/data/scene.dat")));
        assert_eq!(config.max_depth, 3);
        assert_eq!(config.ray_density, 250.0);
        assert_eq!(config.reflectance_model, ReflectanceModel::Parcinopy);
        assert_eq!(config.bands(), 2);
        assert_eq!(config.spectrum[1].weight, 0.6);
        assert!(config.rays_from_objects);
        assert_eq!(config.object_exponent, 2.0);
        assert!(config.stratified);
        assert_eq!(config.runs, 4);
        assert!(config.periodic);
        assert_eq!(config.periodic_factor, 3.0);
        assert_eq!(config.version.as_deref(), Some("2.1"));
        assert_eq!(config.materials.len(), 3);
    }

    #[test]
    fn test_leaf_material_is_clamped() {
        let config = EnvironmentConfig::parse(SAMPLE, None).unwrap();
        let top = config.materials.get(DEFAULT_TOP).band(0);
        assert_eq!(top.reflectance, 0.1);
        assert!((top.transmittance - 0.9).abs() < 1e-6);

        let bottom = config.materials.get(DEFAULT_BOTTOM);
        assert_eq!(bottom.band(1).reflectance, 0.3);
    }

    #[test]
    fn test_defaults() {
        let config = EnvironmentConfig::parse("", None).unwrap();
        assert_eq!(config.grid_size, UVec3::ONE);
        assert_eq!(config.bands(), 1);
        assert_eq!(config.runs, 1);
        assert_eq!(config.periodic_factor, 5.0);
        assert!(config.remove_objects);
        assert_eq!(config.batch_size, DEFAULT_BATCH_SIZE);
    }

    #[test]
    fn test_unknown_key_ignored() {
        let config = EnvironmentConfig::parse("frobnicate: 3\nseed: 9\n", None).unwrap();
        assert_eq!(config.seed, 9);
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            EnvironmentConfig::parse("grid size: 0 1 1", None),
            Err(ConfigError::InvalidValue { line: 1, .. })
        ));
        assert!(EnvironmentConfig::parse("reflectance model: lambert", None).is_err());
        assert!(EnvironmentConfig::parse("depth: 0", None).is_err());
        assert!(EnvironmentConfig::parse("russian roulette: 0.1 2", None).is_err());
        assert!(matches!(
            EnvironmentConfig::parse("leaf top: 0.1 1 0.2", None),
            Err(ConfigError::Material { .. })
        ));
    }

    #[test]
    fn test_domain_size_must_be_positive() {
        for size in ["0 2 2", "-2 2 2", "2 2 0", "2 inf 2"] {
            let text = format!("periodic: on\ndomain size: {}\n", size);
            assert!(
                matches!(
                    EnvironmentConfig::parse(&text, None),
                    Err(ConfigError::InvalidValue { line: 2, .. })
                ),
                "accepted {}",
                size
            );
        }
        let config = EnvironmentConfig::parse("domain size: 0.5 2 3", None).unwrap();
        assert_eq!(config.domain_size, Vec3::new(0.5, 2.0, 3.0));
    }

    #[test]
    fn test_grid_cell_limit() {
        assert!(EnvironmentConfig::parse("grid size: 2048 2048 1024", None).is_err());
        assert!(EnvironmentConfig::parse("grid size: 5000000000 1 1", None).is_err());
        let config = EnvironmentConfig::parse("grid size: 512 256 512", None).unwrap();
        assert_eq!(grid_cell_count(config.grid_size), Some(MAX_GRID_CELLS));
    }

    #[test]
    fn test_band_limits() {
        assert!(matches!(
            EnvironmentConfig::parse("spectrum samples: 9", None),
            Err(ConfigError::TooManyBands(9))
        ));
        assert!(matches!(
            EnvironmentConfig::parse("spectrum samples: 1\nsource spectrum: 1 1\nsource spectrum: 2 1", None),
            Err(ConfigError::SpectrumMismatch { given: 2, bands: 1 })
        ));
    }

    #[test]
    fn test_verbose_prescan() {
        assert!(verbose_requested("# x\nverbose: on\n"));
        assert!(!verbose_requested("verbose: off\n"));
    }
}
