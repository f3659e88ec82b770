//! Primary ray generation and the two shooting modes.
//!
//! `shoot_all_rays` lights the scene from the sky or light sources and leaves
//! the absorbed intensity per primitive. `shoot_rays_from_objects` sends rays
//! out of each query's surface and measures how much sky they see.

use std::ops::Range;

use canopy_core::{pick_weighted, BandTotals, Illumination, SpectralSample, Sky, Spectrum, MAX_BANDS};
use canopy_math::{orthonormal_basis, Ray, Vec2, Vec3, EPSILON};
use rand::Rng;
use rayon::prelude::*;

use crate::batch::{generate_batches, mix_seed, BatchResult, PassTotals, RayBatch};
use crate::query::Query;
use crate::resolve::RaySpectrum;
use crate::sampling::{sample_lobe, sample_triangle, DiskSampler};
use crate::traversal::{TraceContext, TraceOutcome, Tracer};

/// Sampling settings shared by both shooting modes.
#[derive(Debug, Clone, PartialEq)]
pub struct ShootSettings {
    /// Rays per unit area
    pub density: f32,
    pub stratified: bool,
    /// Carry all bands on one ray instead of one pass per band
    pub one_ray_per_spectrum: bool,
    pub batch_size: usize,
    /// Source spectrum, one entry per band
    pub spectrum: Vec<SpectralSample>,
}

impl ShootSettings {
    pub fn bands(&self) -> usize {
        self.spectrum.len().min(MAX_BANDS)
    }

    /// Band ranges shot as separate passes.
    pub fn passes(&self) -> Vec<Range<usize>> {
        let bands = self.bands();
        if self.one_ray_per_spectrum {
            vec![0..bands]
        } else {
            (0..bands).map(|b| b..b + 1).collect()
        }
    }
}

/// Where primary rays start.
#[derive(Debug, Clone, Copy, PartialEq)]
enum PrimarySource {
    /// Disk of the grid's bounding sphere, perpendicular to each ray
    Disk {
        center: Vec3,
        radius: f32,
        sampler: DiskSampler,
    },
    /// Top face of a periodic domain; rays wrap around the sides
    Roof {
        corner: Vec3,
        extent: Vec2,
        /// Cells per side; one jittered sample each
        cells: (usize, usize),
    },
}

impl PrimarySource {
    fn new(tracer: &Tracer, settings: &ShootSettings) -> Self {
        let bounds = tracer.grid().bounds();
        if tracer.settings().periodic {
            let size = bounds.size();
            let extent = Vec2::new(size.x, size.z);
            let cells = if settings.stratified {
                let per_side = |len: f32| (len * settings.density.sqrt()).ceil().max(1.0) as usize;
                (per_side(extent.x), per_side(extent.y))
            } else {
                let count = (settings.density * extent.x * extent.y).round().max(1.0) as usize;
                (count, 1)
            };
            PrimarySource::Roof {
                corner: Vec3::new(bounds.x.min, bounds.y.max, bounds.z.min),
                extent,
                cells,
            }
        } else {
            let radius = bounds.size().length() * 0.5;
            PrimarySource::Disk {
                center: bounds.centroid(),
                radius,
                sampler: DiskSampler::new(radius, settings.density, settings.stratified),
            }
        }
    }

    fn slots(&self) -> usize {
        match *self {
            PrimarySource::Disk { sampler, .. } => sampler.slots(),
            PrimarySource::Roof { cells, .. } => cells.0 * cells.1,
        }
    }

    /// Origin of the ray in `slot` travelling along `dir`, and the area the
    /// ray represents perpendicular to `dir`.
    fn sample<R: Rng + ?Sized>(&self, slot: usize, dir: Vec3, stratified: bool, rng: &mut R) -> Option<(Vec3, f32)> {
        match *self {
            PrimarySource::Disk {
                center,
                radius,
                sampler,
            } => {
                let offset = sampler.sample(slot, radius, rng)?;
                let (u, v) = orthonormal_basis(dir);
                let origin = center + u * offset.x + v * offset.y - dir * radius;
                Some((origin, sampler.sample_area(radius)))
            }
            PrimarySource::Roof { corner, extent, cells } => {
                // Projected area of the roof cell seen along the ray
                let cos = -dir.y;
                if cos <= 0.0 {
                    return None;
                }
                let (i, j) = if stratified {
                    (slot % cells.0, slot / cells.0)
                } else {
                    (0, 0)
                };
                let (nx, nz) = if stratified { cells } else { (1, 1) };
                let cell = Vec2::new(extent.x / nx as f32, extent.y / nz as f32);
                let x = (i as f32 + rng.gen::<f32>()) * cell.x;
                let z = (j as f32 + rng.gen::<f32>()) * cell.y;
                let area = extent.x * extent.y / self.slots() as f32;
                Some((corner + Vec3::new(x, 0.0, z), area * cos))
            }
        }
    }
}

/// Light the scene from the configured illumination.
///
/// Each pass shoots about `density` rays per unit source area; each ray
/// carries the band weight times the area it represents, so absorbed totals
/// are fluxes independent of the density.
pub fn shoot_all_rays(
    tracer: &Tracer,
    illumination: &Illumination,
    settings: &ShootSettings,
    seed: u64,
) -> PassTotals {
    let source = PrimarySource::new(tracer, settings);
    let batches = generate_batches(source.slots(), settings.batch_size);
    let scale = illumination.total_weight();
    let primitives = tracer.primitives().len();

    let mut results = Vec::new();
    for (pass, bands) in settings.passes().into_iter().enumerate() {
        let pass_results: Vec<BatchResult> = batches
            .par_iter()
            .map(|batch| {
                let mut ctx = TraceContext::new(mix_seed(&[seed, pass as u64, batch.index as u64]), primitives);
                let mut result = BatchResult::new(*batch);
                for slot in batch.slots() {
                    let dir = illumination.sample_direction(&mut ctx.rng);
                    let Some((origin, area)) = source.sample(slot, dir, settings.stratified, &mut ctx.rng) else {
                        continue;
                    };

                    let mut intensity = Spectrum::ZERO;
                    for b in bands.clone() {
                        intensity[b] = settings.spectrum[b].weight * area * scale;
                    }
                    let mut spectrum = RaySpectrum::new(intensity, bands.clone());

                    result.rays += 1;
                    match tracer.trace(Ray::new(origin, dir), &mut spectrum, None, &mut ctx) {
                        TraceOutcome::Escaped { depth: 0, .. } => result.misses += 1,
                        TraceOutcome::Escaped { .. } => {
                            result.hits += 1;
                            for b in bands.clone() {
                                result.returned[b] += spectrum.intensity[b] as f64;
                            }
                        }
                        TraceOutcome::Absorbed { .. } => result.hits += 1,
                    }
                }
                result.absorbed = ctx.absorbed.drain();
                result
            })
            .collect();
        results.extend(pass_results);
    }

    let totals = PassTotals::merge(results);
    log::debug!(
        "shot {} rays: {} hit, {} missed",
        totals.rays,
        totals.hits,
        totals.misses
    );
    totals
}

/// Rays emitted by query `query` in one pass.
fn emission_count(query: &Query, settings: &ShootSettings) -> usize {
    let requested = if query.explicit_geometry {
        query
            .params
            .iter()
            .take(settings.bands())
            .copied()
            .filter(|v| v.is_finite() && *v > 0.0)
            .fold(0.0f32, f32::max)
    } else {
        0.0
    };
    if requested > 0.0 {
        requested.round().max(1.0) as usize
    } else {
        (query.area() * settings.density).ceil().max(1.0) as usize
    }
}

/// Send rays out of every query's surface and measure the sky they reach.
///
/// Rays leave uniformly distributed points in a `cos^exponent` lobe around
/// the surface normal (turned towards the turtle's up vector when known).
/// A ray that escapes returns its remaining intensity times the sky radiance
/// in its final direction; an absorbed ray returns nothing. Returns the mean
/// returned intensity per band for each query.
pub fn shoot_rays_from_objects(
    tracer: &Tracer,
    queries: &[Query],
    sky: &Sky,
    exponent: f32,
    settings: &ShootSettings,
    seed: u64,
) -> Vec<BandTotals> {
    let exponent = exponent.max(0.0);
    let primitives = tracer.primitives().len();
    let passes = settings.passes();

    // (query, pass, batch) work items
    let mut work: Vec<(usize, usize, RayBatch)> = Vec::new();
    let mut counts = vec![0usize; queries.len()];
    for (qi, query) in queries.iter().enumerate() {
        if query.patches.is_empty() {
            continue;
        }
        counts[qi] = emission_count(query, settings);
        for pass in 0..passes.len() {
            for batch in generate_batches(counts[qi], settings.batch_size) {
                work.push((qi, pass, batch));
            }
        }
    }

    let results: Vec<(usize, BandTotals)> = work
        .par_iter()
        .map(|&(qi, pass, batch)| {
            let query = &queries[qi];
            let bands = passes[pass].clone();
            let up = query.up();
            let mut ctx = TraceContext::new(
                mix_seed(&[seed, qi as u64, pass as u64, batch.index as u64]),
                primitives,
            );
            let mut returned = [0.0; MAX_BANDS];

            for _ in batch.slots() {
                let patch = pick_weighted(&query.patches, |p| p.area(), &mut ctx.rng);
                let v = &patch.triangle.vertices;
                let point = sample_triangle(v[0], v[1], v[2], &mut ctx.rng);
                let mut normal = patch.triangle.normal;
                if up.is_some_and(|up| normal.dot(up) < 0.0) {
                    normal = -normal;
                }
                let (dir, _) = sample_lobe(normal, exponent, &mut ctx.rng);

                let mut intensity = Spectrum::ZERO;
                for b in bands.clone() {
                    intensity[b] = settings.spectrum[b].weight;
                }
                let mut spectrum = RaySpectrum::new(intensity, bands.clone());
                let origin = point + normal * (10.0 * EPSILON);

                if let TraceOutcome::Escaped { direction, .. } =
                    tracer.trace(Ray::new(origin, dir), &mut spectrum, patch.primitive, &mut ctx)
                {
                    let radiance = sky.radiance(direction);
                    for b in bands.clone() {
                        returned[b] += (spectrum.intensity[b] * radiance) as f64;
                    }
                }
            }
            (qi, returned)
        })
        .collect();

    // Work items are in a fixed order, so the sums are deterministic
    let mut means = vec![[0.0; MAX_BANDS]; queries.len()];
    for (qi, returned) in results {
        for (m, r) in means[qi].iter_mut().zip(&returned) {
            *m += r;
        }
    }
    for (qi, mean) in means.iter_mut().enumerate() {
        if counts[qi] > 0 {
            for m in mean.iter_mut() {
                *m /= counts[qi] as f64;
            }
        }
    }
    means
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{fan_triangles, merge_records, EmissionPatch};
    use canopy_core::{QueryRecord, TurtleRecord};

    fn settings() -> ShootSettings {
        ShootSettings {
            density: 100.0,
            stratified: false,
            one_ray_per_spectrum: true,
            batch_size: 16,
            spectrum: vec![SpectralSample::default()],
        }
    }

    fn query(params: Vec<f32>, vertices: Vec<[f32; 3]>) -> Query {
        let record = QueryRecord {
            master: 0,
            module: 1,
            params,
            turtle: TurtleRecord::new(Vec3::ZERO, Vec3::Z, Vec3::Y, Vec3::X),
            vertices,
        };
        let mut query = merge_records(vec![record]).remove(0);
        query.patches = fan_triangles(&query.surfaces[0])
            .into_iter()
            .map(|triangle| EmissionPatch {
                triangle,
                primitive: None,
            })
            .collect();
        query
    }

    fn square() -> Vec<[f32; 3]> {
        vec![
            [-0.25, 0.0, -0.25],
            [-0.25, 0.0, 0.25],
            [0.25, 0.0, 0.25],
            [0.25, 0.0, -0.25],
        ]
    }

    #[test]
    fn test_explicit_polygon_params_give_ray_count() {
        assert_eq!(emission_count(&query(vec![37.0, 37.0], square()), &settings()), 37);
        // Rounded, and the largest per-band request wins
        let mut two_bands = settings();
        two_bands.spectrum.push(SpectralSample::default());
        assert_eq!(emission_count(&query(vec![12.4, 20.6], square()), &two_bands), 21);
    }

    #[test]
    fn test_emission_count_falls_back_to_density() {
        // 0.5 x 0.5 at 100 rays per unit area
        assert_eq!(emission_count(&query(vec![0.0, 0.0], square()), &settings()), 25);
        // Leaf quads ignore their parameters as ray counts
        assert_eq!(emission_count(&query(vec![0.5, 0.5], Vec::new()), &settings()), 25);
    }

    #[test]
    fn test_passes_per_band() {
        let mut settings = settings();
        settings.spectrum = vec![SpectralSample::default(); 3];
        assert_eq!(settings.passes(), vec![0..3]);
        settings.one_ray_per_spectrum = false;
        assert_eq!(settings.passes(), vec![0..1, 1..2, 2..3]);
    }
}
