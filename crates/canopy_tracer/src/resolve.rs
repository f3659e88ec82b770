//! What happens to a ray at a surface.
//!
//! The hit face's optics decide how much of the ray's intensity is absorbed
//! (and credited to the primitive), whether the ray survives, and in which
//! direction it leaves.

use std::ops::Range;

use canopy_core::{BandOptics, BandTotals, Material, ReflectanceModel, RussianRoulette, Spectrum};
use canopy_math::Vec3;
use rand::Rng;

use crate::sampling::sample_lobe;

/// Attempts at drawing a direction on the correct side of the surface before
/// falling back to the lobe axis.
pub const MAX_RESAMPLES: u32 = 64;

/// Per-band intensity carried by a ray, restricted to its active bands.
#[derive(Debug, Clone, PartialEq)]
pub struct RaySpectrum {
    pub intensity: Spectrum,
    pub bands: Range<usize>,
}

impl RaySpectrum {
    pub fn new(intensity: Spectrum, bands: Range<usize>) -> Self {
        Self { intensity, bands }
    }

    /// Summed intensity over the active bands.
    pub fn total(&self) -> f32 {
        self.intensity.sum(self.bands.clone())
    }
}

/// Settings the resolver needs from the configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolveSettings {
    pub max_depth: u32,
    pub russian_roulette: RussianRoulette,
    pub model: ReflectanceModel,
    pub no_direct_light: bool,
}

/// Outcome of a surface interaction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolution {
    Absorbed,
    Continue(Vec3),
}

/// Which continuation was chosen at a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Branch {
    Reflect,
    Transmit,
}

impl Branch {
    fn weight(self, optics: &BandOptics) -> f32 {
        match self {
            Branch::Reflect => optics.reflectance,
            Branch::Transmit => optics.transmittance,
        }
    }

    fn exponent(self, optics: &BandOptics) -> f32 {
        match self {
            Branch::Reflect => optics.spec_exponent,
            Branch::Transmit => optics.trans_exponent,
        }
    }
}

/// Resolve a hit of `direction` on a surface with unit normal `normal`.
///
/// `materials` are the primitive's top and bottom face materials; the top
/// face is the one the normal points out of. `depth` counts hits including
/// this one. Absorbed intensity is added to `absorbed`.
#[allow(clippy::too_many_arguments)]
pub fn resolve_intersection<R: Rng + ?Sized>(
    settings: &ResolveSettings,
    materials: [&Material; 2],
    normal: Vec3,
    direction: Vec3,
    spectrum: &mut RaySpectrum,
    depth: u32,
    absorbed: &mut BandTotals,
    rng: &mut R,
) -> Resolution {
    let top = normal.dot(direction) < 0.0;
    // Normal on the side the ray came from
    let ns = if top { normal } else { -normal };
    let material = if top { materials[0] } else { materials[1] };
    let bands = spectrum.bands.clone();

    if !(settings.no_direct_light && depth == 1) {
        for b in bands.clone() {
            absorbed[b] += (spectrum.intensity[b] * material.band(b).absorbed()) as f64;
        }
    }

    if depth >= settings.max_depth {
        return Resolution::Absorbed;
    }

    let roulette = settings.russian_roulette;
    if roulette.threshold > 0.0 && spectrum.total() <= roulette.threshold {
        if rng.gen::<f32>() < roulette.probability {
            return Resolution::Absorbed;
        }
        spectrum.intensity.scale(bands.clone(), 1.0 / (1.0 - roulette.probability));
    }

    let (mut s_reflect, mut s_transmit) = (0.0f32, 0.0f32);
    for b in bands.clone() {
        let optics = material.band(b);
        s_reflect += spectrum.intensity[b] * optics.reflectance;
        s_transmit += spectrum.intensity[b] * optics.transmittance;
    }
    let total = s_reflect + s_transmit;
    if total <= 0.0 {
        return Resolution::Absorbed;
    }

    let p_reflect = s_reflect / total;
    let (branch, p_branch) = if rng.gen::<f32>() < p_reflect {
        (Branch::Reflect, p_reflect)
    } else {
        (Branch::Transmit, 1.0 - p_reflect)
    };
    for b in bands.clone() {
        spectrum.intensity[b] *= branch.weight(material.band(b)) / p_branch;
    }

    let exponent = branch.exponent(material.band(bands.start));
    if exponent < 0.0 {
        return Resolution::Continue(direction);
    }

    let ior = material.band(bands.start).refractive_index;
    let (new_dir, cos_theta) = sample_direction(settings.model, branch, direction, ns, top, exponent, ior, rng);

    for b in bands {
        let band_exponent = branch.exponent(material.band(b));
        if band_exponent >= 0.0 && band_exponent != exponent {
            spectrum.intensity[b] *= exponent_correction(exponent, band_exponent, cos_theta);
        }
    }

    Resolution::Continue(new_dir)
}

/// Weight making a direction sampled with exponent `n` count as if it had
/// been sampled with the band's own exponent `n_band`.
pub fn exponent_correction(n: f32, n_band: f32, cos_theta: f32) -> f32 {
    (n_band + 2.0) * cos_theta.max(1e-6).powf(n_band - n) / (n + 2.0)
}

fn reflect(d: Vec3, n: Vec3) -> Vec3 {
    d - n * (2.0 * d.dot(n))
}

/// Refract unit `d` through a surface with normal `n` facing the incoming
/// side, with relative index `eta`. `None` on total internal reflection.
fn refract(d: Vec3, n: Vec3, eta: f32) -> Option<Vec3> {
    let cos_i = -d.dot(n);
    let k = 1.0 - eta * eta * (1.0 - cos_i * cos_i);
    if k < 0.0 {
        return None;
    }
    Some((d * eta + n * (eta * cos_i - k.sqrt())).normalize())
}

/// Draw the outgoing direction of `branch` and the cosine used for the
/// exponent correction. Reflected directions end up on the `ns` side,
/// transmitted ones on the other side.
#[allow(clippy::too_many_arguments)]
fn sample_direction<R: Rng + ?Sized>(
    model: ReflectanceModel,
    branch: Branch,
    d: Vec3,
    ns: Vec3,
    top: bool,
    exponent: f32,
    ior: f32,
    rng: &mut R,
) -> (Vec3, f32) {
    let wanted = match branch {
        Branch::Reflect => 1.0,
        Branch::Transmit => -1.0,
    };
    let fallback = match branch {
        Branch::Reflect => reflect(d, ns),
        Branch::Transmit => d,
    };

    for _ in 0..MAX_RESAMPLES {
        let (candidate, cos_theta) = match model {
            ReflectanceModel::Phong => {
                let axis = match branch {
                    Branch::Reflect => reflect(d, ns),
                    Branch::Transmit => {
                        let eta = if top { 1.0 / ior } else { ior };
                        refract(d, ns, eta).unwrap_or(d)
                    }
                };
                sample_lobe(axis, exponent, rng)
            }
            ReflectanceModel::Blinn => {
                let (h, cos_h) = sample_lobe(ns, exponent, rng);
                let r = reflect(d, h);
                let dir = match branch {
                    Branch::Reflect => r,
                    Branch::Transmit => reflect(r, ns),
                };
                (dir, cos_h)
            }
            ReflectanceModel::Parcinopy => sample_lobe(ns * wanted, exponent, rng),
        };
        if candidate.dot(ns) * wanted > 0.0 {
            return (candidate, cos_theta);
        }
    }

    log::trace!("no direction on the {:?} side after {} draws", branch, MAX_RESAMPLES);
    (fallback, 1.0)
}
