//! Query and response records exchanged with the growth engine.
//!
//! A record describes one module of the engine's string: where to send the
//! answer, the module's parameter vector and the turtle pose at the module.
//! Turtle fields carry only the coordinates the engine actually sent, so
//! every accessor checks the count before building a vector.

use canopy_math::Vec3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::spectrum::MAX_BANDS;

/// Most response slots a query may declare: mean and deviation per band
/// plus the band-ratio mean and deviation.
pub const MAX_SLOTS: usize = 2 * MAX_BANDS + 2;

/// Reasons a record is dropped. No response is sent for dropped records.
#[derive(Error, Debug, PartialEq)]
pub enum QueryError {
    #[error("query has no parameters")]
    NoParameters,

    #[error("query has {0} parameters, at most {MAX_SLOTS} supported")]
    TooManyParameters(usize),

    #[error("query polygon has {0} vertices, need at least 3")]
    TooFewVertices(usize),

    #[error("query carries no geometry")]
    NoGeometry,
}

/// Turtle pose as sent by the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TurtleRecord {
    #[serde(default)]
    pub position: Vec<f32>,
    #[serde(default)]
    pub heading: Vec<f32>,
    #[serde(default)]
    pub up: Vec<f32>,
    #[serde(default)]
    pub left: Vec<f32>,
}

fn vec3_from(coords: &[f32]) -> Option<Vec3> {
    match coords {
        [x, y, z, ..] => Some(Vec3::new(*x, *y, *z)),
        _ => None,
    }
}

impl TurtleRecord {
    /// Turtle pose with every field fully specified.
    pub fn new(position: Vec3, heading: Vec3, up: Vec3, left: Vec3) -> Self {
        Self {
            position: position.to_array().to_vec(),
            heading: heading.to_array().to_vec(),
            up: up.to_array().to_vec(),
            left: left.to_array().to_vec(),
        }
    }

    pub fn position(&self) -> Option<Vec3> {
        vec3_from(&self.position)
    }

    pub fn heading(&self) -> Option<Vec3> {
        vec3_from(&self.heading)
    }

    pub fn up(&self) -> Option<Vec3> {
        vec3_from(&self.up)
    }

    pub fn left(&self) -> Option<Vec3> {
        vec3_from(&self.left)
    }
}

/// Engine address of a module: originating engine and module id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub master: u32,
    pub module: u64,
}

/// One query as received from the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRecord {
    pub master: u32,
    pub module: u64,
    #[serde(default)]
    pub params: Vec<f32>,
    #[serde(default)]
    pub turtle: TurtleRecord,
    /// Polygon sent with the module, if any
    #[serde(default)]
    pub vertices: Vec<[f32; 3]>,
}

impl QueryRecord {
    pub fn address(&self) -> Address {
        Address {
            master: self.master,
            module: self.module,
        }
    }

    /// Check the parameter count against the response contract.
    pub fn validate(&self) -> Result<(), QueryError> {
        match self.params.len() {
            0 => Err(QueryError::NoParameters),
            n if n > MAX_SLOTS => Err(QueryError::TooManyParameters(n)),
            _ => Ok(()),
        }
    }

    /// Surface polygon of the module.
    ///
    /// An explicit polygon wins. Otherwise a leaf quad is built from the
    /// turtle: `params[0]` wide along the left vector (centred on the turtle)
    /// and `params[1]` long along the heading, wound so its normal follows
    /// heading x left.
    pub fn surface(&self) -> Result<Vec<Vec3>, QueryError> {
        match self.vertices.len() {
            0 => {}
            n if n < 3 => return Err(QueryError::TooFewVertices(n)),
            _ => return Ok(self.vertices.iter().map(|v| Vec3::from_array(*v)).collect()),
        }

        let (Some(position), Some(heading), Some(left)) =
            (self.turtle.position(), self.turtle.heading(), self.turtle.left())
        else {
            return Err(QueryError::NoGeometry);
        };
        let [width, length, ..] = self.params.as_slice() else {
            return Err(QueryError::NoGeometry);
        };

        let half = left * (*width * 0.5);
        let along = heading * *length;
        let p0 = position - half;
        let p1 = position + half;
        Ok(vec![p0, p0 + along, p1 + along, p1])
    }
}

/// One response value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    pub value: f32,
    pub filled: bool,
}

/// Answer to one (merged) query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub master: u32,
    pub module: u64,
    pub values: Vec<Slot>,
}

impl Response {
    /// Response with `slots` unfilled values.
    pub fn new(address: Address, slots: usize) -> Self {
        Self {
            master: address.master,
            module: address.module,
            values: vec![Slot::default(); slots],
        }
    }

    /// Fill slot `index`; values beyond the declared slots are dropped.
    pub fn fill(&mut self, index: usize, value: f32) -> bool {
        match self.values.get_mut(index) {
            Some(slot) => {
                *slot = Slot { value, filled: true };
                true
            }
            None => false,
        }
    }

    pub fn filled(&self) -> usize {
        self.values.iter().filter(|s| s.filled).count()
    }
}
