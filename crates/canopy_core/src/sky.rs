//! Sky and light-source model.
//!
//! Supplies the directions primary rays travel in and, for rays leaving the
//! scene, the relative sky radiance in their direction. World space is Y-up.

use std::path::Path;

use canopy_math::Vec3;
use rand::Rng;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SkyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sky line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("sky file defines no patches")]
    Empty,
}

/// A directional light: light travels along `direction`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightSource {
    pub direction: Vec3,
    pub weight: f32,
}

/// A sky patch seen in direction `direction` (pointing up into the sky).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkyPatch {
    pub direction: Vec3,
    pub weight: f32,
}

impl SkyPatch {
    /// Patch at `elevation` and `azimuth` (degrees). Azimuth 0 faces +Z and
    /// grows towards +X.
    pub fn from_angles(elevation: f32, azimuth: f32, weight: f32) -> Self {
        let (el, az) = (elevation.to_radians(), azimuth.to_radians());
        let direction = Vec3::new(el.cos() * az.sin(), el.sin(), el.cos() * az.cos());
        Self { direction, weight }
    }
}

/// Radiance distribution of the sky dome.
#[derive(Debug, Clone, PartialEq)]
pub enum Sky {
    /// Constant radiance over the upper hemisphere
    Uniform,
    /// CIE standard overcast sky, brightest at the zenith
    Overcast,
    /// Discrete weighted patches
    Patches(Vec<SkyPatch>),
}

impl Sky {
    /// Load a sky file: `uniform`, `overcast`, or lines of
    /// `elevation azimuth weight` in degrees.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Sky, SkyError> {
        let content = std::fs::read_to_string(path)?;
        Sky::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Sky, SkyError> {
        let mut patches = Vec::new();
        for (i, line) in content.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            match trimmed {
                "uniform" if patches.is_empty() => return Ok(Sky::Uniform),
                "overcast" if patches.is_empty() => return Ok(Sky::Overcast),
                _ => {}
            }

            let values: Vec<f32> = trimmed
                .split_whitespace()
                .map(|t| t.parse::<f32>())
                .collect::<Result<_, _>>()
                .map_err(|e| SkyError::Parse {
                    line: i + 1,
                    message: e.to_string(),
                })?;
            if values.len() != 3 {
                return Err(SkyError::Parse {
                    line: i + 1,
                    message: format!("expected 'elevation azimuth weight', got {} values", values.len()),
                });
            }
            if values[2] < 0.0 {
                return Err(SkyError::Parse {
                    line: i + 1,
                    message: format!("negative patch weight {}", values[2]),
                });
            }
            patches.push(SkyPatch::from_angles(values[0], values[1], values[2]));
        }

        if patches.iter().map(|p| p.weight).sum::<f32>() <= 0.0 {
            return Err(SkyError::Empty);
        }
        Ok(Sky::Patches(patches))
    }

    /// Relative radiance seen looking along `direction`. Zero below the horizon.
    pub fn radiance(&self, direction: Vec3) -> f32 {
        let sin_elevation = direction.y;
        if sin_elevation <= 0.0 {
            return 0.0;
        }
        match self {
            Sky::Uniform => 1.0,
            Sky::Overcast => 3.0 * (1.0 + 2.0 * sin_elevation) / 7.0,
            Sky::Patches(patches) => {
                let mean = patches.iter().map(|p| p.weight).sum::<f32>() / patches.len() as f32;
                let nearest = patches
                    .iter()
                    .max_by(|a, b| {
                        a.direction
                            .dot(direction)
                            .partial_cmp(&b.direction.dot(direction))
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })
                    .map(|p| p.weight)
                    .unwrap_or(0.0);
                nearest / mean
            }
        }
    }

    /// Sample a direction pointing into the sky, distributed proportionally
    /// to the radiance arriving on a surface facing that direction.
    pub fn sample_up<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec3 {
        let phi = std::f32::consts::TAU * rng.gen::<f32>();
        let y = match self {
            Sky::Uniform => rng.gen::<f32>(),
            // Inverse of the CDF (y + y^2) / 2 of the density (1 + 2y) / 2
            Sky::Overcast => ((1.0 + 8.0 * rng.gen::<f32>()).sqrt() - 1.0) * 0.5,
            Sky::Patches(patches) => return pick_weighted(patches, |p| p.weight, rng).direction,
        };
        let r = (1.0 - y * y).max(0.0).sqrt();
        Vec3::new(r * phi.cos(), y, r * phi.sin())
    }
}

/// Pick an item with probability proportional to `weight`.
///
/// `items` must be non-empty.
pub fn pick_weighted<'a, T, F, R>(items: &'a [T], weight: F, rng: &mut R) -> &'a T
where
    F: Fn(&T) -> f32,
    R: Rng + ?Sized,
{
    let total: f32 = items.iter().map(&weight).sum();
    let mut target = rng.gen::<f32>() * total;
    for item in items {
        target -= weight(item);
        if target < 0.0 {
            return item;
        }
    }
    &items[items.len() - 1]
}

/// Where primary rays come from.
#[derive(Debug, Clone, PartialEq)]
pub enum Illumination {
    /// Legacy mode: all rays travel straight down
    Overhead,
    /// Weighted directional light sources
    Lights(Vec<LightSource>),
    /// Sampled sky dome
    Sky(Sky),
}

impl Illumination {
    /// Light sources take precedence over a sky file; with neither, rays come
    /// straight down.
    pub fn select(lights: &[LightSource], sky: Option<&Sky>) -> Self {
        let usable: Vec<LightSource> = lights.iter().copied().filter(|l| l.weight > 0.0).collect();
        if !usable.is_empty() {
            if sky.is_some() {
                log::info!("light sources given; sky file used for escaping rays only");
            }
            Illumination::Lights(usable)
        } else if let Some(sky) = sky {
            Illumination::Sky(sky.clone())
        } else {
            Illumination::Overhead
        }
    }

    /// Direction of travel of the next primary ray (unit length).
    pub fn sample_direction<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec3 {
        match self {
            Illumination::Overhead => Vec3::NEG_Y,
            Illumination::Lights(lights) => pick_weighted(lights, |l| l.weight, rng).direction,
            Illumination::Sky(sky) => -sky.sample_up(rng),
        }
    }

    /// Energy factor per primary ray: the summed weight of the light sources,
    /// 1 otherwise.
    pub fn total_weight(&self) -> f32 {
        match self {
            Illumination::Lights(lights) => lights.iter().map(|l| l.weight).sum(),
            _ => 1.0,
        }
    }
}
