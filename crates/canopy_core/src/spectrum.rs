//! Fixed-capacity per-band values.
//!
//! Rays, accumulators and materials all carry one value per spectral band.
//! The band count is a run-time setting bounded by [`MAX_BANDS`], so every
//! per-band container is a plain array and rays never allocate.

use std::ops::{Index, IndexMut, Range};

/// Upper bound on the number of spectral samples.
pub const MAX_BANDS: usize = 8;

/// One `f32` per spectral band.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Spectrum([f32; MAX_BANDS]);

impl Spectrum {
    pub const ZERO: Spectrum = Spectrum([0.0; MAX_BANDS]);

    /// Same value in every band.
    pub fn splat(value: f32) -> Self {
        Spectrum([value; MAX_BANDS])
    }

    /// Copy `values` into the leading bands; the rest stay zero.
    pub fn from_slice(values: &[f32]) -> Self {
        let mut s = Spectrum::ZERO;
        for (dst, &v) in s.0.iter_mut().zip(values) {
            *dst = v;
        }
        s
    }

    /// Sum over the given band range.
    pub fn sum(&self, bands: Range<usize>) -> f32 {
        self.0[bands].iter().sum()
    }

    /// Multiply every band in the range by `factor`.
    pub fn scale(&mut self, bands: Range<usize>, factor: f32) {
        for v in &mut self.0[bands] {
            *v *= factor;
        }
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }
}

impl Index<usize> for Spectrum {
    type Output = f32;

    fn index(&self, band: usize) -> &f32 {
        &self.0[band]
    }
}

impl IndexMut<usize> for Spectrum {
    fn index_mut(&mut self, band: usize) -> &mut f32 {
        &mut self.0[band]
    }
}

/// Double-precision per-band accumulator for absorbed intensity.
pub type BandTotals = [f64; MAX_BANDS];

/// Add `src` into `dst` band by band.
pub fn accumulate(dst: &mut BandTotals, src: &BandTotals) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d += s;
    }
}

/// One sample of the source spectrum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectralSample {
    /// Wavelength in nm (informational)
    pub wavelength: f32,
    /// Relative source weight of the band
    pub weight: f32,
}

impl Default for SpectralSample {
    fn default() -> Self {
        Self {
            wavelength: 0.0,
            weight: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_slice_pads_with_zero() {
        let s = Spectrum::from_slice(&[1.0, 2.0]);
        assert_eq!(s[0], 1.0);
        assert_eq!(s[1], 2.0);
        assert_eq!(s[2], 0.0);
    }

    #[test]
    fn test_sum_and_scale_respect_range() {
        let mut s = Spectrum::splat(1.0);
        s.scale(1..3, 4.0);
        assert_eq!(s.sum(0..3), 9.0);
        assert_eq!(s[3], 1.0);
    }

    #[test]
    fn test_accumulate() {
        let mut a: BandTotals = [1.0; MAX_BANDS];
        let b: BandTotals = [0.5; MAX_BANDS];
        accumulate(&mut a, &b);
        assert!(a.iter().all(|&v| v == 1.5));
    }
}
