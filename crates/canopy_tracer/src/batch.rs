//! Batches of rays traced independently and in parallel.
//!
//! Ray slots are cut into fixed-size batches. Each batch seeds its own
//! random stream from the batch's position, so the set of traced rays does
//! not depend on how rayon schedules the batches.

use canopy_core::{accumulate, BandTotals, MAX_BANDS};

/// A contiguous range of ray slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RayBatch {
    /// First slot of the batch
    pub start: usize,
    /// Number of slots in the batch
    pub count: usize,
    /// Index of this batch in the pass
    pub index: usize,
}

impl RayBatch {
    pub fn new(start: usize, count: usize, index: usize) -> Self {
        Self { start, count, index }
    }

    /// Slots covered by this batch.
    pub fn slots(&self) -> std::ops::Range<usize> {
        self.start..self.start + self.count
    }
}

/// Cut `total` slots into batches of at most `batch_size`.
pub fn generate_batches(total: usize, batch_size: usize) -> Vec<RayBatch> {
    let batch_size = batch_size.max(1);
    (0..total)
        .step_by(batch_size)
        .enumerate()
        .map(|(index, start)| RayBatch::new(start, batch_size.min(total - start), index))
        .collect()
}

/// Combine seed components into one well-mixed 64-bit seed (splitmix64).
pub fn mix_seed(parts: &[u64]) -> u64 {
    parts.iter().fold(0x9E37_79B9_7F4A_7C15u64, |acc, &part| {
        let mut z = acc ^ part.wrapping_add(0x9E37_79B9_7F4A_7C15);
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        z ^ (z >> 31)
    })
}

/// What one batch produced.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult {
    pub batch: RayBatch,
    /// Absorbed intensity per touched primitive
    pub absorbed: Vec<(usize, BandTotals)>,
    /// Rays actually traced (stratified slots may yield none)
    pub rays: usize,
    /// Rays that hit at least one primitive
    pub hits: usize,
    /// Rays that never hit anything
    pub misses: usize,
    /// Summed intensity carried out of the scene, per band
    pub returned: BandTotals,
}

impl BatchResult {
    pub fn new(batch: RayBatch) -> Self {
        Self {
            batch,
            absorbed: Vec::new(),
            rays: 0,
            hits: 0,
            misses: 0,
            returned: [0.0; MAX_BANDS],
        }
    }
}

/// Totals of a whole pass, merged from its batches in batch order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PassTotals {
    pub absorbed: Vec<(usize, BandTotals)>,
    pub rays: usize,
    pub hits: usize,
    pub misses: usize,
    pub returned: BandTotals,
}

impl PassTotals {
    /// Merge batch results. Results are sorted by batch index first so the
    /// floating-point sums do not depend on completion order.
    pub fn merge(mut results: Vec<BatchResult>) -> Self {
        results.sort_by_key(|r| r.batch.index);
        let mut totals = PassTotals::default();
        for r in results {
            totals.rays += r.rays;
            totals.hits += r.hits;
            totals.misses += r.misses;
            accumulate(&mut totals.returned, &r.returned);
            totals.absorbed.extend(r.absorbed);
        }
        totals
    }
}
