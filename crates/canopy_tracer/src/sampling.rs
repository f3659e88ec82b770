//! Random sampling of ray origins and directions.

use std::f32::consts::{PI, TAU};

use canopy_math::{orthonormal_basis, Vec2, Vec3};
use rand::Rng;

/// Sample a direction from a cosine-power lobe `cos^n` around the unit
/// vector `axis`. Returns the direction and its cosine to the axis.
///
/// `n = 1` gives the cosine-weighted (diffuse) distribution, `n = 0` a
/// uniform hemisphere.
pub fn sample_lobe<R: Rng + ?Sized>(axis: Vec3, exponent: f32, rng: &mut R) -> (Vec3, f32) {
    let cos_theta = rng.gen::<f32>().powf(1.0 / (exponent + 1.0));
    let sin_theta = (1.0 - cos_theta * cos_theta).max(0.0).sqrt();
    let phi = TAU * rng.gen::<f32>();

    let (u, v) = orthonormal_basis(axis);
    let dir = u * (sin_theta * phi.cos()) + v * (sin_theta * phi.sin()) + axis * cos_theta;
    (dir.normalize(), cos_theta)
}

/// Uniform point in the disk of `radius`, as 2D offsets.
pub fn sample_disk<R: Rng + ?Sized>(radius: f32, rng: &mut R) -> Vec2 {
    let r = radius * rng.gen::<f32>().sqrt();
    let phi = TAU * rng.gen::<f32>();
    Vec2::new(r * phi.cos(), r * phi.sin())
}

/// Uniform point on the triangle `a b c`.
pub fn sample_triangle<R: Rng + ?Sized>(a: Vec3, b: Vec3, c: Vec3, rng: &mut R) -> Vec3 {
    let s = rng.gen::<f32>().sqrt();
    let t = rng.gen::<f32>();
    a * (1.0 - s) + b * (s * (1.0 - t)) + c * (s * t)
}

/// How primary ray origins are placed on the source disk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DiskSampler {
    /// `count` independent uniform samples
    Uniform { count: usize },
    /// One jittered sample per cell of a `cells x cells` square grid covering
    /// the disk; samples falling outside the disk are dropped
    Stratified { cells: usize },
}

impl DiskSampler {
    /// Sampler delivering about `density` samples per unit area on a disk of
    /// `radius`.
    pub fn new(radius: f32, density: f32, stratified: bool) -> Self {
        if stratified {
            let cells = (2.0 * radius * density.sqrt()).ceil().max(1.0) as usize;
            DiskSampler::Stratified { cells }
        } else {
            let count = (density * PI * radius * radius).round().max(1.0) as usize;
            DiskSampler::Uniform { count }
        }
    }

    /// Number of sample slots; stratified slots may yield no sample.
    pub fn slots(&self) -> usize {
        match *self {
            DiskSampler::Uniform { count } => count,
            DiskSampler::Stratified { cells } => cells * cells,
        }
    }

    /// Area represented by one sample, so that intensities sum to the flux
    /// through the disk.
    pub fn sample_area(&self, radius: f32) -> f32 {
        match *self {
            DiskSampler::Uniform { count } => PI * radius * radius / count as f32,
            DiskSampler::Stratified { cells } => {
                let side = 2.0 * radius / cells as f32;
                side * side
            }
        }
    }

    /// Offset of the sample for `slot`, or `None` if a stratified sample
    /// misses the disk.
    pub fn sample<R: Rng + ?Sized>(&self, slot: usize, radius: f32, rng: &mut R) -> Option<Vec2> {
        match *self {
            DiskSampler::Uniform { .. } => Some(sample_disk(radius, rng)),
            DiskSampler::Stratified { cells } => {
                let side = 2.0 * radius / cells as f32;
                let (i, j) = (slot % cells, slot / cells);
                let p = Vec2::new(
                    -radius + (i as f32 + rng.gen::<f32>()) * side,
                    -radius + (j as f32 + rng.gen::<f32>()) * side,
                );
                (p.length_squared() <= radius * radius).then_some(p)
            }
        }
    }
}
