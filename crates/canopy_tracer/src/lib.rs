//! Canopy Tracer - Voxel-grid Monte Carlo light transport
//!
//! Rays are walked through a uniform grid of cells (3D-DDA), bounce off
//! primitives according to their per-band optics and deposit the absorbed
//! intensity on the primitive they end on. Batches of rays run in parallel
//! with rayon and merge deterministically.
//!
//! [`Simulation`] ties it together: one [`Simulation::step`] per engine step.

mod batch;
mod driver;
mod grid;
mod intersect;
mod query;
mod resolve;
mod sampling;
mod simulation;
mod traversal;

pub use batch::{generate_batches, mix_seed, BatchResult, PassTotals, RayBatch};
pub use driver::{shoot_all_rays, shoot_rays_from_objects, ShootSettings};
pub use grid::{Grid, GRID_EPSILON};
pub use intersect::{intersect_planar, Intersect, SurfaceHit};
pub use query::{fan_triangles, merge_records, EmissionPatch, Query, RunStats};
pub use resolve::{exponent_correction, resolve_intersection, RaySpectrum, Resolution, ResolveSettings, MAX_RESAMPLES};
pub use sampling::{sample_disk, sample_lobe, sample_triangle, DiskSampler};
pub use simulation::{Phase, Simulation, SimulationError};
pub use traversal::{Accumulator, GridHit, Mailbox, TraceContext, TraceOutcome, TraceSettings, Tracer, Walk};

/// Re-export the math types used in the public API
pub use canopy_math::{Ray, Vec3};
