//! Ray walk through the voxel grid (3D-DDA) and the bounce loop.
//!
//! A walk visits the cells pierced by a ray in order, testing every listed
//! primitive once, and stops as soon as no later cell can hold a closer hit.
//! In periodic mode the ray re-enters the grid on the opposite X or Z face
//! until it has travelled a fixed multiple of the grid diagonal.

use canopy_core::{BandTotals, EnvironmentConfig, MaterialTable, Primitive, MAX_BANDS};
use canopy_math::{axis, Interval, IVec3, Ray, Vec3, EPSILON};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::grid::Grid;
use crate::intersect::Intersect;
use crate::resolve::{resolve_intersection, RaySpectrum, Resolution, ResolveSettings};

/// Tracing settings derived from the configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraceSettings {
    pub resolve: ResolveSettings,
    pub periodic: bool,
    pub periodic_factor: f32,
}

impl From<&EnvironmentConfig> for TraceSettings {
    fn from(config: &EnvironmentConfig) -> Self {
        Self {
            resolve: ResolveSettings {
                max_depth: config.max_depth,
                russian_roulette: config.russian_roulette,
                model: config.reflectance_model,
                no_direct_light: config.no_direct_light,
            },
            periodic: config.periodic,
            periodic_factor: config.periodic_factor,
        }
    }
}

/// Per-walk visit marks: a primitive is tested at most once per generation.
#[derive(Debug, Clone, Default)]
pub struct Mailbox {
    stamps: Vec<u64>,
    generation: u64,
}

impl Mailbox {
    pub fn new(primitives: usize) -> Self {
        Self {
            stamps: vec![0; primitives],
            generation: 0,
        }
    }

    /// Start a new walk; all primitives become untested.
    pub fn next_generation(&mut self) {
        if self.generation == u64::MAX {
            self.stamps.fill(0);
            self.generation = 0;
        }
        self.generation += 1;
    }

    /// Mark `index` as tested; returns false if it already was in this walk.
    pub fn visit(&mut self, index: usize) -> bool {
        if index >= self.stamps.len() {
            self.stamps.resize(index + 1, 0);
        }
        if self.stamps[index] == self.generation {
            return false;
        }
        self.stamps[index] = self.generation;
        true
    }
}

/// Absorbed intensity of one worker: dense per-primitive totals plus the
/// list of primitives touched, so results can be handed back sparsely.
#[derive(Debug, Clone, Default)]
pub struct Accumulator {
    totals: Vec<BandTotals>,
    marked: Vec<bool>,
    touched: Vec<usize>,
}

impl Accumulator {
    pub fn new(primitives: usize) -> Self {
        Self {
            totals: vec![[0.0; MAX_BANDS]; primitives],
            marked: vec![false; primitives],
            touched: Vec::new(),
        }
    }

    /// Totals of primitive `index`, registering it as touched.
    pub fn slot(&mut self, index: usize) -> &mut BandTotals {
        if index >= self.totals.len() {
            self.totals.resize(index + 1, [0.0; MAX_BANDS]);
            self.marked.resize(index + 1, false);
        }
        if !self.marked[index] {
            self.marked[index] = true;
            self.touched.push(index);
        }
        &mut self.totals[index]
    }

    /// Touched primitives and their totals in first-touch order.
    pub fn drain(&mut self) -> Vec<(usize, BandTotals)> {
        let out = self.touched.iter().map(|&i| (i, self.totals[i])).collect();
        for &i in &self.touched {
            self.totals[i] = [0.0; MAX_BANDS];
            self.marked[i] = false;
        }
        self.touched.clear();
        out
    }
}

/// Mutable per-worker state of a trace.
#[derive(Debug, Clone)]
pub struct TraceContext {
    pub rng: StdRng,
    pub mailbox: Mailbox,
    pub absorbed: Accumulator,
}

impl TraceContext {
    pub fn new(seed: u64, primitives: usize) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            mailbox: Mailbox::new(primitives),
            absorbed: Accumulator::new(primitives),
        }
    }
}

/// Closest hit of one walk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridHit {
    /// Store index of the primitive
    pub index: usize,
    pub t: f32,
    /// Hit point, inside the grid
    pub point: Vec3,
    pub normal: Vec3,
}

/// Result of one walk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Walk {
    pub hit: Option<GridHit>,
    /// Cell steps taken
    pub steps: u32,
}

/// How a traced ray ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TraceOutcome {
    /// Left the scene travelling along `direction` after `depth` hits
    Escaped { direction: Vec3, depth: u32 },
    /// Terminated at its `depth`-th hit
    Absorbed { depth: u32 },
}

/// Read-only view of the scene used to trace rays.
pub struct Tracer<'a> {
    primitives: &'a [Primitive],
    grid: &'a Grid,
    materials: &'a MaterialTable,
    settings: TraceSettings,
}

impl<'a> Tracer<'a> {
    pub fn new(
        primitives: &'a [Primitive],
        grid: &'a Grid,
        materials: &'a MaterialTable,
        settings: TraceSettings,
    ) -> Self {
        Self {
            primitives,
            grid,
            materials,
            settings,
        }
    }

    pub fn primitives(&self) -> &'a [Primitive] {
        self.primitives
    }

    pub fn grid(&self) -> &'a Grid {
        self.grid
    }

    pub fn settings(&self) -> &TraceSettings {
        &self.settings
    }

    /// Follow a ray through all its bounces.
    ///
    /// `leaving` is the primitive the ray starts on, which the first walk
    /// ignores. Absorbed intensity is credited to `ctx.absorbed`.
    pub fn trace(
        &self,
        ray: Ray,
        spectrum: &mut RaySpectrum,
        leaving: Option<usize>,
        ctx: &mut TraceContext,
    ) -> TraceOutcome {
        let mut ray = ray;
        let mut leaving = leaving;
        let mut depth = 0;

        loop {
            let Some(hit) = self.walk(&ray, leaving, &mut ctx.mailbox).hit else {
                return TraceOutcome::Escaped {
                    direction: ray.direction,
                    depth,
                };
            };
            depth += 1;

            let primitive = &self.primitives[hit.index];
            let materials = [
                self.materials.get(primitive.materials[0]),
                self.materials.get(primitive.materials[1]),
            ];
            let resolution = resolve_intersection(
                &self.settings.resolve,
                materials,
                hit.normal,
                ray.direction,
                spectrum,
                depth,
                ctx.absorbed.slot(hit.index),
                &mut ctx.rng,
            );

            match resolution {
                Resolution::Absorbed => return TraceOutcome::Absorbed { depth },
                Resolution::Continue(direction) => {
                    ray = Ray::new(hit.point, direction);
                    leaving = Some(hit.index);
                }
            }
        }
    }

    /// Walk a single ray segment through the grid and return the closest hit.
    ///
    /// `leaving` is skipped until the ray wraps around a periodic side; its
    /// periodic copies can be hit.
    pub fn walk(&self, ray: &Ray, leaving: Option<usize>, mailbox: &mut Mailbox) -> Walk {
        let mut leaving = leaving;
        let grid = self.grid;
        let periodic = self.settings.periodic;
        let size = grid.size();
        let cell_size = grid.cell_size();
        let resolution = grid.resolution().as_ivec3();
        let d = ray.direction;

        let mut origin = ray.origin;
        if periodic {
            origin = wrap_xz(origin, grid.origin(), size);
        }

        let max_dist = if periodic {
            grid.diagonal() * self.settings.periodic_factor
        } else {
            f32::INFINITY
        };
        let Some(span) = grid.bounds().clip(&Ray { origin, direction: d }, Interval::new(0.0, max_dist)) else {
            return Walk { hit: None, steps: 0 };
        };

        let mut cell = grid.clamped_cell(origin + d * span.min);
        let mut step = IVec3::ZERO;
        let mut t_max = Vec3::splat(max_dist);
        let mut t_delta = Vec3::splat(max_dist);
        for a in 0..3 {
            let da = axis(d, a);
            if da.abs() < EPSILON {
                continue;
            }
            let cs = axis(cell_size, a);
            let c = cell[a];
            let boundary = if da > 0.0 {
                step[a] = 1;
                axis(grid.origin(), a) + (c + 1) as f32 * cs
            } else {
                step[a] = -1;
                axis(grid.origin(), a) + c as f32 * cs
            };
            t_max[a] = (boundary - axis(origin, a)) / da;
            t_delta[a] = cs / da.abs();
        }

        let cap = self.step_cap(max_dist);
        mailbox.next_generation();
        let mut best: Option<GridHit> = None;
        let mut steps = 0u32;

        loop {
            let limit = best.map_or(max_dist, |b| b.t);
            for &index in grid.cell(cell) {
                let index = index as usize;
                if Some(index) == leaving || !mailbox.visit(index) {
                    continue;
                }
                if let Some(hit) = self.primitives[index].shape.intersect(origin, d, limit) {
                    if best.map_or(true, |b| hit.t < b.t) {
                        best = Some(GridHit {
                            index,
                            t: hit.t,
                            point: origin + d * hit.t,
                            normal: hit.normal,
                        });
                    }
                }
            }

            let a = nearest_axis(t_max);
            let next = t_max[a];
            if let Some(hit) = best {
                if next + EPSILON > hit.t {
                    return Walk { hit: Some(hit), steps };
                }
            }
            if next >= max_dist {
                return Walk { hit: None, steps };
            }

            steps += 1;
            if steps > cap {
                log::warn!("ray walk exceeded {} cell steps; treating ray as escaped", cap);
                return Walk { hit: None, steps };
            }

            cell[a] += step[a];
            if cell[a] < 0 || cell[a] >= resolution[a] {
                if best.is_some() {
                    log::debug!("closest hit lies outside the grid; ray exits");
                }
                if !(periodic && a != 1) {
                    return Walk { hit: None, steps };
                }
                // Re-enter from the opposite face
                best = None;
                cell[a] -= step[a] * resolution[a];
                origin[a] -= step[a] as f32 * size[a];
                leaving = None;
                mailbox.next_generation();
            }
            t_max[a] += t_delta[a];
        }
    }

    /// Upper bound on the cell steps a walk of length `max_dist` can take.
    ///
    /// Saturates below `u32::MAX` so the step counter cannot overflow.
    fn step_cap(&self, max_dist: f32) -> u32 {
        let res = self.grid.resolution();
        let total = if max_dist.is_finite() {
            let cs = self.grid.cell_size();
            (0..3)
                .map(|a| ((max_dist / axis(cs, a)).ceil() as u64).saturating_add(2))
                .fold(0u64, u64::saturating_add)
        } else {
            u64::from(res.x) + u64::from(res.y) + u64::from(res.z) + 3
        };
        u32::try_from(total).unwrap_or(u32::MAX).min(u32::MAX - 1)
    }
}

/// Axis whose next cell boundary comes first.
#[inline]
fn nearest_axis(t_max: Vec3) -> usize {
    if t_max.x <= t_max.y && t_max.x <= t_max.z {
        0
    } else if t_max.y <= t_max.z {
        1
    } else {
        2
    }
}

/// Shift `p` by whole domain sizes along X and Z into the domain.
fn wrap_xz(p: Vec3, origin: Vec3, size: Vec3) -> Vec3 {
    let mut q = p;
    for a in [0, 2] {
        if size[a] > 0.0 {
            let rel = (q[a] - origin[a]).rem_euclid(size[a]);
            q[a] = origin[a] + rel;
        }
    }
    q
}
