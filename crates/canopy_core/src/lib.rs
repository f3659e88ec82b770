//! Canopy Core - Scene data for the light environment.
//!
//! This crate provides:
//!
//! - **Primitives**: `Shape`, `Primitive`, `PrimitiveStore`
//! - **Optics**: per-band `Material`s addressed through a `MaterialTable`
//! - **Inputs**: configuration, obstacle scene and sky file parsers
//! - **Queries**: records received from the growth engine and the responses sent back
//!
//! # Example
//!
//! ```ignore
//! use canopy_core::{load_scene, EnvironmentConfig, PrimitiveStore};
//!
//! let config = EnvironmentConfig::load("light.cfg")?;
//! let mut store = PrimitiveStore::new();
//! if let Some(path) = &config.obstacles {
//!     load_scene(path, &mut store)?;
//! }
//! println!("{} obstacles, {} bands", store.len(), config.bands());
//! ```

pub mod config;
pub mod material;
pub mod primitive;
pub mod query;
pub mod scene_file;
pub mod sky;
pub mod spectrum;

// Re-export commonly used types
pub use config::{
    grid_cell_count, verbose_requested, ConfigError, EnvironmentConfig, ReflectanceModel, RussianRoulette,
    DEFAULT_BATCH_SIZE, MAX_GRID_CELLS,
};
pub use material::{face_pair, BandOptics, Material, MaterialError, MaterialId, MaterialTable, DEFAULT_BOTTOM, DEFAULT_TOP};
pub use primitive::{Placement, Planar, Primitive, PrimitiveId, PrimitiveStore, QueryId, Shape, ShapeError, ShapeParams};
pub use query::{Address, QueryError, QueryRecord, Response, Slot, TurtleRecord, MAX_SLOTS};
pub use scene_file::{load_scene, parse_scene, SceneError, SceneSummary};
pub use sky::{pick_weighted, Illumination, LightSource, Sky, SkyError, SkyPatch};
pub use spectrum::{accumulate, BandTotals, SpectralSample, Spectrum, MAX_BANDS};
