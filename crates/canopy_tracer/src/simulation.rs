//! Per-step simulation state.
//!
//! A `Simulation` owns the scene between steps. Each call to
//! [`Simulation::step`] takes the queries of one engine step, places their
//! geometry, shoots the configured number of runs and answers every query.

use canopy_core::{
    accumulate, load_scene, EnvironmentConfig, Illumination, PrimitiveStore, QueryRecord, Response, SceneError, Sky,
    SkyError,
};
use thiserror::Error;

use crate::batch::mix_seed;
use crate::driver::{shoot_all_rays, shoot_rays_from_objects, ShootSettings};
use crate::grid::Grid;
use crate::query::{fan_triangles, merge_records, EmissionPatch, Query};
use crate::traversal::{TraceSettings, Tracer};

#[derive(Error, Debug)]
pub enum SimulationError {
    #[error("obstacle scene: {0}")]
    Scene(#[from] SceneError),

    #[error("sky file: {0}")]
    Sky(#[from] SkyError),
}

/// Where the simulation is within a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    AccumulatingQueries,
    Shooting,
    Resolving,
    Reporting,
}

pub struct Simulation {
    config: EnvironmentConfig,
    store: PrimitiveStore,
    grid: Grid,
    illumination: Illumination,
    /// Radiance seen by rays leaving the scene
    sky: Sky,
    phase: Phase,
    steps: u64,
}

impl Simulation {
    /// Load the obstacle scene and sky named by `config`.
    pub fn new(config: EnvironmentConfig) -> Result<Self, SimulationError> {
        let mut store = PrimitiveStore::new();
        if let Some(path) = &config.obstacles {
            load_scene(path, &mut store)?;
        }
        let sky = config.sky_file.as_ref().map(Sky::load).transpose()?;
        Ok(Self::with_scene(config, store, sky))
    }

    /// Simulation over an already loaded obstacle scene and optional sky.
    pub fn with_scene(config: EnvironmentConfig, store: PrimitiveStore, sky: Option<Sky>) -> Self {
        let illumination = Illumination::select(&config.light_sources, sky.as_ref());
        if illumination == Illumination::Overhead && !config.rays_from_objects {
            log::info!("no sky file or light sources; rays come straight down");
        }
        if !config.add_objects && !config.rays_from_objects {
            log::warn!("query objects are not added to the scene; absorbed values will be zero");
        }

        let grid = Grid::new(config.position, config.domain_size, config.grid_size);
        let scene_bounds = store.bounds();
        if !store.is_empty() && !grid.bounds().overlaps(&scene_bounds) {
            log::warn!("obstacle scene lies entirely outside the grid");
        }

        Self {
            config,
            store,
            grid,
            illumination,
            sky: sky.unwrap_or(Sky::Uniform),
            phase: Phase::Idle,
            steps: 0,
        }
    }

    pub fn config(&self) -> &EnvironmentConfig {
        &self.config
    }

    pub fn store(&self) -> &PrimitiveStore {
        &self.store
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Steps completed so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    fn shoot_settings(&self) -> ShootSettings {
        ShootSettings {
            density: self.config.ray_density,
            stratified: self.config.stratified,
            one_ray_per_spectrum: self.config.one_ray_per_spectrum,
            batch_size: self.config.batch_size,
            spectrum: self.config.spectrum.clone(),
        }
    }

    /// Answer the queries of one step.
    ///
    /// Queries without usable geometry are logged and get no response.
    pub fn step(&mut self, records: Vec<QueryRecord>) -> Vec<Response> {
        self.phase = Phase::AccumulatingQueries;
        if self.config.remove_objects {
            self.store.retain(|p| p.query.is_none());
        }
        let mut queries = self.place_queries(records);
        self.grid.build(self.store.as_slice());
        log::debug!(
            "step {}: {} queries, {} primitives, {} cell references",
            self.steps,
            queries.len(),
            self.store.len(),
            self.grid.reference_count()
        );

        let bands = self.config.bands();
        let settings = self.shoot_settings();
        let trace_settings = TraceSettings::from(&self.config);

        for run in 0..self.config.runs.max(1) {
            self.phase = Phase::Shooting;
            let seed = mix_seed(&[self.config.seed, self.steps, run as u64]);
            self.store.reset_absorbed();
            let tracer = Tracer::new(self.store.as_slice(), &self.grid, &self.config.materials, trace_settings);

            if self.config.rays_from_objects {
                let values = shoot_rays_from_objects(
                    &tracer,
                    &queries,
                    &self.sky,
                    self.config.object_exponent,
                    &settings,
                    seed,
                );
                self.phase = Phase::Resolving;
                for (query, value) in queries.iter_mut().zip(&values) {
                    query.stats.record(value, bands);
                }
            } else {
                let totals = shoot_all_rays(&tracer, &self.illumination, &settings, seed);
                self.phase = Phase::Resolving;
                let primitives = self.store.as_mut_slice();
                for (index, absorbed) in &totals.absorbed {
                    if let Some(primitive) = primitives.get_mut(*index) {
                        accumulate(&mut primitive.absorbed, absorbed);
                    }
                }
                for query in queries.iter_mut() {
                    let absorbed = query.absorbed(&self.store);
                    query.stats.record(&absorbed, bands);
                }
            }
        }

        self.phase = Phase::Reporting;
        let responses: Vec<Response> = queries.iter().map(|q| q.response(bands)).collect();

        if !self.config.remove_objects {
            self.store.detach_queries();
        }
        self.steps += 1;
        self.phase = Phase::Idle;
        responses
    }

    /// Merge the records into queries and build their emission patches,
    /// adding the triangles to the scene when configured.
    fn place_queries(&mut self, records: Vec<QueryRecord>) -> Vec<Query> {
        let mut queries: Vec<Query> = Vec::new();
        for mut query in merge_records(records) {
            let id = queries.len();
            let materials = query.materials(self.config.material_parameter);
            let mut patches = Vec::new();
            for surface in &query.surfaces {
                if self.config.add_objects {
                    let added = match self.store.add_fan(surface, materials, Some(id)) {
                        Ok(added) => added,
                        Err(e) => {
                            log::warn!("query {:?}: {}", query.address, e);
                            continue;
                        }
                    };
                    for index in added {
                        if let Some(triangle) = self.store.get(index).and_then(|p| p.shape.planar()) {
                            patches.push(EmissionPatch {
                                triangle: triangle.clone(),
                                primitive: Some(index),
                            });
                        }
                    }
                } else {
                    patches.extend(fan_triangles(surface).into_iter().map(|triangle| EmissionPatch {
                        triangle,
                        primitive: None,
                    }));
                }
            }

            if patches.is_empty() {
                log::warn!("dropping query {:?}: degenerate geometry", query.address);
                continue;
            }
            query.patches = patches;
            queries.push(query);
        }
        queries
    }
}
