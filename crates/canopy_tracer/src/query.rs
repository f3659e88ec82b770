//! Queries of one step: merged engine records, their geometry and the
//! per-run statistics reported back.

use canopy_core::{
    face_pair, Address, BandTotals, MaterialId, Planar, PrimitiveStore, QueryRecord, Response, TurtleRecord,
    DEFAULT_BOTTOM, DEFAULT_TOP, MAX_BANDS,
};
use canopy_math::Vec3;

/// A triangle rays can be emitted from.
#[derive(Debug, Clone, PartialEq)]
pub struct EmissionPatch {
    pub triangle: Planar,
    /// Store index when the triangle was added to the scene
    pub primitive: Option<usize>,
}

impl EmissionPatch {
    pub fn area(&self) -> f32 {
        self.triangle.area()
    }
}

/// Running sums over the runs of one step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunStats {
    runs: u32,
    sum: BandTotals,
    sum_sq: BandTotals,
    ratio_sum: f64,
    ratio_sum_sq: f64,
}

impl RunStats {
    /// Record the per-band values of one run.
    pub fn record(&mut self, values: &BandTotals, bands: usize) {
        self.runs += 1;
        for b in 0..bands.min(MAX_BANDS) {
            self.sum[b] += values[b];
            self.sum_sq[b] += values[b] * values[b];
        }
        if bands >= 2 {
            let ratio = if values[1] != 0.0 { values[0] / values[1] } else { 0.0 };
            self.ratio_sum += ratio;
            self.ratio_sum_sq += ratio * ratio;
        }
    }

    pub fn runs(&self) -> u32 {
        self.runs
    }

    pub fn mean(&self, band: usize) -> f64 {
        mean(self.sum[band], self.runs)
    }

    pub fn sd(&self, band: usize) -> f64 {
        sd(self.sum[band], self.sum_sq[band], self.runs)
    }

    pub fn ratio_mean(&self) -> f64 {
        mean(self.ratio_sum, self.runs)
    }

    pub fn ratio_sd(&self) -> f64 {
        sd(self.ratio_sum, self.ratio_sum_sq, self.runs)
    }
}

fn mean(sum: f64, n: u32) -> f64 {
    if n == 0 {
        0.0
    } else {
        sum / n as f64
    }
}

/// `sqrt(|E[X^2] - E[X]^2|)`
fn sd(sum: f64, sum_sq: f64, n: u32) -> f64 {
    let m = mean(sum, n);
    (mean(sum_sq, n) - m * m).abs().sqrt()
}

/// One engine module's query, possibly merged from several records.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub address: Address,
    pub params: Vec<f32>,
    pub turtle: TurtleRecord,
    /// Surface polygons, one per merged record
    pub surfaces: Vec<Vec<Vec3>>,
    /// Whether the surfaces came as explicit polygons rather than from the turtle
    pub explicit_geometry: bool,
    pub patches: Vec<EmissionPatch>,
    pub stats: RunStats,
}

impl Query {
    fn from_record(record: QueryRecord, surface: Vec<Vec3>) -> Self {
        Self {
            address: record.address(),
            explicit_geometry: !record.vertices.is_empty(),
            params: record.params,
            turtle: record.turtle,
            surfaces: vec![surface],
            patches: Vec::new(),
            stats: RunStats::default(),
        }
    }

    /// Face materials of the query's geometry: the selected parameter names
    /// the material of both faces, otherwise the default leaf materials.
    pub fn materials(&self, material_parameter: Option<usize>) -> [MaterialId; 2] {
        match material_parameter.and_then(|k| self.params.get(k)) {
            Some(&v) if v.is_finite() && v >= 0.0 => face_pair(v as MaterialId, None),
            Some(&v) => {
                log::warn!("query {:?}: invalid material index {}", self.address, v);
                [DEFAULT_TOP, DEFAULT_BOTTOM]
            }
            None => [DEFAULT_TOP, DEFAULT_BOTTOM],
        }
    }

    /// Total emitting area.
    pub fn area(&self) -> f32 {
        self.patches.iter().map(EmissionPatch::area).sum()
    }

    /// Normal orientation hint: the turtle's up vector when sent.
    pub fn up(&self) -> Option<Vec3> {
        self.turtle.up()
    }

    /// Sum of the absorbed totals of the query's primitives.
    pub fn absorbed(&self, store: &PrimitiveStore) -> BandTotals {
        let mut totals = [0.0; MAX_BANDS];
        for index in self.patches.iter().filter_map(|p| p.primitive) {
            if let Some(primitive) = store.get(index) {
                for (t, a) in totals.iter_mut().zip(&primitive.absorbed) {
                    *t += a;
                }
            }
        }
        totals
    }

    /// Build the response from the recorded runs.
    ///
    /// One run reports the per-band means. Several runs report mean and
    /// deviation per band, followed by the band 0 / band 1 ratio mean and
    /// deviation when there are at least two bands. Values beyond the
    /// query's parameter count are dropped.
    pub fn response(&self, bands: usize) -> Response {
        let mut values = Vec::with_capacity(2 * bands + 2);
        if self.stats.runs() <= 1 {
            values.extend((0..bands).map(|b| self.stats.mean(b)));
        } else {
            for b in 0..bands {
                values.push(self.stats.mean(b));
                values.push(self.stats.sd(b));
            }
            if bands >= 2 {
                values.push(self.stats.ratio_mean());
                values.push(self.stats.ratio_sd());
            }
        }

        let mut response = Response::new(self.address, self.params.len());
        for (i, v) in values.into_iter().enumerate() {
            if !response.fill(i, v as f32) {
                break;
            }
        }
        response
    }
}

/// Validate records and merge consecutive records of the same module.
///
/// Records with an invalid parameter count or without usable geometry are
/// logged and dropped; no response is produced for them.
pub fn merge_records(records: Vec<QueryRecord>) -> Vec<Query> {
    let mut queries: Vec<Query> = Vec::new();
    for record in records {
        let address = record.address();
        if let Err(e) = record.validate() {
            log::warn!("dropping query {:?}: {}", address, e);
            continue;
        }
        let surface = match record.surface() {
            Ok(surface) => surface,
            Err(e) => {
                log::warn!("dropping query {:?}: {}", address, e);
                continue;
            }
        };
        match queries.last_mut() {
            Some(last) if last.address == address => last.surfaces.push(surface),
            _ => queries.push(Query::from_record(record, surface)),
        }
    }
    queries
}

/// Split a polygon into a fan of triangles sharing vertex 0, skipping
/// degenerate ones.
pub fn fan_triangles(vertices: &[Vec3]) -> Vec<Planar> {
    (1..vertices.len().saturating_sub(1))
        .filter_map(|i| Planar::new(vec![vertices[0], vertices[i], vertices[i + 1]]).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(module: u64, params: Vec<f32>) -> QueryRecord {
        QueryRecord {
            master: 1,
            module,
            params,
            turtle: TurtleRecord::new(Vec3::ZERO, Vec3::Z, Vec3::Y, Vec3::X),
            vertices: Vec::new(),
        }
    }

    #[test]
    fn test_merge_consecutive_records() {
        let queries = merge_records(vec![
            record(1, vec![1.0, 1.0]),
            record(1, vec![1.0, 1.0]),
            record(2, vec![1.0, 1.0]),
            record(1, vec![1.0, 1.0]),
        ]);
        assert_eq!(queries.len(), 3);
        assert_eq!(queries[0].surfaces.len(), 2);
        assert_eq!(queries[2].address.module, 1);
    }

    #[test]
    fn test_invalid_records_dropped() {
        let mut no_turtle = record(3, vec![1.0, 1.0]);
        no_turtle.turtle = TurtleRecord::default();
        let queries = merge_records(vec![record(1, vec![]), no_turtle, record(2, vec![1.0, 2.0])]);
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].address.module, 2);
    }

    #[test]
    fn test_material_selection() {
        let q = &merge_records(vec![record(1, vec![1.0, 1.0, 3.0])])[0];
        assert_eq!(q.materials(Some(2)), [3, 3]);
        assert_eq!(q.materials(None), [DEFAULT_TOP, DEFAULT_BOTTOM]);
        assert_eq!(q.materials(Some(9)), [DEFAULT_TOP, DEFAULT_BOTTOM]);
    }

    #[test]
    fn test_stats() {
        let mut stats = RunStats::default();
        let mut v = [0.0; MAX_BANDS];
        v[0] = 1.0;
        v[1] = 2.0;
        stats.record(&v, 2);
        v[0] = 3.0;
        v[1] = 2.0;
        stats.record(&v, 2);

        assert_eq!(stats.mean(0), 2.0);
        assert_eq!(stats.sd(0), 1.0);
        assert_eq!(stats.sd(1), 0.0);
        assert_eq!(stats.ratio_mean(), 1.0);
        assert_eq!(stats.ratio_sd(), 0.5);
    }

    #[test]
    fn test_single_run_response() {
        let mut q = merge_records(vec![record(1, vec![1.0, 1.0])]).remove(0);
        let mut v = [0.0; MAX_BANDS];
        v[0] = 0.25;
        v[1] = 0.5;
        q.stats.record(&v, 2);

        let response = q.response(2);
        assert_eq!(response.values.len(), 2);
        assert_eq!(response.values[0].value, 0.25);
        assert_eq!(response.values[1].value, 0.5);
        assert!(response.values.iter().all(|s| s.filled));
    }

    #[test]
    fn test_multi_run_response_truncated_to_params() {
        let mut q = merge_records(vec![record(1, vec![1.0, 1.0, 0.0])]).remove(0);
        let mut v = [0.0; MAX_BANDS];
        v[0] = 1.0;
        v[1] = 1.0;
        q.stats.record(&v, 2);
        q.stats.record(&v, 2);

        let response = q.response(2);
        // Room for mean_0, sd_0, mean_1 only
        assert_eq!(response.filled(), 3);
        assert_eq!(response.values[0].value, 1.0);
        assert_eq!(response.values[1].value, 0.0);
    }

    #[test]
    fn test_fan_triangles() {
        let square = [
            Vec3::ZERO,
            Vec3::new(0.0, 0.0, 1.0),
            Vec3::new(1.0, 0.0, 1.0),
            Vec3::new(1.0, 0.0, 0.0),
        ];
        let fan = fan_triangles(&square);
        assert_eq!(fan.len(), 2);
        let area: f32 = fan.iter().map(Planar::area).sum();
        assert!((area - 1.0).abs() < 1e-5);
        assert!(fan_triangles(&square[..2]).is_empty());
    }
}
