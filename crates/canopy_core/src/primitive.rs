//! Geometric primitives and the primitive store.
//!
//! Primitives are a closed set of shapes. Planar shapes (triangles and
//! polygons) are stored in world space with a precomputed plane; solid shapes
//! keep their primitive-space parameters plus the object-to-world matrix and
//! its inverse so rays can be tested in local space.

use canopy_math::{dominant_axis, Aabb, Mat4, Mat4Ext, Vec3};
use thiserror::Error;

use crate::material::MaterialId;
use crate::spectrum::BandTotals;

/// Unique primitive identifier, never reused within one store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrimitiveId(pub u32);

/// Index of the query a primitive was created for.
pub type QueryId = usize;

#[derive(Error, Debug, PartialEq)]
pub enum ShapeError {
    #[error("polygon needs at least 3 vertices, got {0}")]
    TooFewVertices(usize),

    #[error("degenerate polygon (zero area)")]
    Degenerate,

    #[error("invalid {shape} parameter: {value}")]
    InvalidParameter { shape: &'static str, value: f32 },

    #[error("transform is not invertible")]
    SingularTransform,
}

/// Primitive-space description of a shape, before transformation.
#[derive(Debug, Clone, PartialEq)]
pub enum ShapeParams {
    Triangle([Vec3; 3]),
    Polygon(Vec<Vec3>),
    Sphere { radius: f32 },
    Cylinder { radius: f32, height: f32 },
    Cone { base_radius: f32, top_radius: f32, height: f32 },
    Prism { size: Vec3 },
    Rectangle { width: f32, length: f32 },
}

/// World-space planar polygon with its supporting plane.
#[derive(Debug, Clone, PartialEq)]
pub struct Planar {
    pub vertices: Vec<Vec3>,
    /// Unit plane normal (follows the vertex winding)
    pub normal: Vec3,
    /// Plane offset: normal . p + offset = 0
    pub offset: f32,
    /// Axis dropped when projecting onto a coordinate plane
    pub drop_axis: usize,
}

impl Planar {
    /// Build the plane of a convex polygon using Newell's method.
    pub fn new(vertices: Vec<Vec3>) -> Result<Self, ShapeError> {
        if vertices.len() < 3 {
            return Err(ShapeError::TooFewVertices(vertices.len()));
        }

        let mut n = Vec3::ZERO;
        for (i, a) in vertices.iter().enumerate() {
            let b = vertices[(i + 1) % vertices.len()];
            n.x += (a.y - b.y) * (a.z + b.z);
            n.y += (a.z - b.z) * (a.x + b.x);
            n.z += (a.x - b.x) * (a.y + b.y);
        }
        let normal = n.try_normalize().ok_or(ShapeError::Degenerate)?;

        Ok(Self {
            offset: -normal.dot(vertices[0]),
            drop_axis: dominant_axis(normal),
            normal,
            vertices,
        })
    }

    /// Area of the polygon.
    pub fn area(&self) -> f32 {
        let v0 = self.vertices[0];
        self.vertices
            .windows(2)
            .skip(1)
            .map(|w| (w[0] - v0).cross(w[1] - v0).length() * 0.5)
            .sum()
    }
}

/// Placement of a solid shape: object-to-world matrix and its inverse.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Placement {
    pub to_world: Mat4,
    pub to_local: Mat4,
}

impl Placement {
    pub fn new(to_world: Mat4) -> Result<Self, ShapeError> {
        let det = to_world.determinant();
        if !det.is_finite() || det.abs() < 1e-12 {
            return Err(ShapeError::SingularTransform);
        }
        Ok(Self {
            to_world,
            to_local: to_world.inverse(),
        })
    }
}

/// A shape ready for ray testing.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Triangle(Planar),
    Polygon(Planar),
    Sphere { placement: Placement, radius: f32 },
    Cylinder { placement: Placement, radius: f32, height: f32 },
    Cone { placement: Placement, base_radius: f32, top_radius: f32, height: f32 },
    Prism { placement: Placement, size: Vec3 },
    Rectangle { placement: Placement, width: f32, length: f32 },
}

fn positive(shape: &'static str, value: f32) -> Result<f32, ShapeError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(ShapeError::InvalidParameter { shape, value })
    }
}

fn non_negative(shape: &'static str, value: f32) -> Result<f32, ShapeError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(ShapeError::InvalidParameter { shape, value })
    }
}

impl Shape {
    /// Transform primitive-space parameters by `transform`.
    pub fn build(params: ShapeParams, transform: &Mat4) -> Result<Self, ShapeError> {
        let shape = match params {
            ShapeParams::Triangle(v) => {
                let world = v.iter().map(|&p| transform.transform_point3(p)).collect();
                Shape::Triangle(Planar::new(world)?)
            }
            ShapeParams::Polygon(v) => {
                let world = v.iter().map(|&p| transform.transform_point3(p)).collect();
                Shape::Polygon(Planar::new(world)?)
            }
            ShapeParams::Sphere { radius } => Shape::Sphere {
                placement: Placement::new(*transform)?,
                radius: positive("sphere", radius)?,
            },
            ShapeParams::Cylinder { radius, height } => Shape::Cylinder {
                placement: Placement::new(*transform)?,
                radius: positive("cylinder", radius)?,
                height: positive("cylinder", height)?,
            },
            ShapeParams::Cone {
                base_radius,
                top_radius,
                height,
            } => {
                let base_radius = non_negative("cone", base_radius)?;
                let top_radius = non_negative("cone", top_radius)?;
                if base_radius == 0.0 && top_radius == 0.0 {
                    return Err(ShapeError::InvalidParameter {
                        shape: "cone",
                        value: 0.0,
                    });
                }
                Shape::Cone {
                    placement: Placement::new(*transform)?,
                    base_radius,
                    top_radius,
                    height: positive("cone", height)?,
                }
            }
            ShapeParams::Prism { size } => {
                for v in size.to_array() {
                    positive("prism", v)?;
                }
                Shape::Prism {
                    placement: Placement::new(*transform)?,
                    size,
                }
            }
            ShapeParams::Rectangle { width, length } => Shape::Rectangle {
                placement: Placement::new(*transform)?,
                width: positive("rectangle", width)?,
                length: positive("rectangle", length)?,
            },
        };
        Ok(shape)
    }

    /// Short name of the shape kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Shape::Triangle(_) => "triangle",
            Shape::Polygon(_) => "polygon",
            Shape::Sphere { .. } => "sphere",
            Shape::Cylinder { .. } => "cylinder",
            Shape::Cone { .. } => "cone",
            Shape::Prism { .. } => "prism",
            Shape::Rectangle { .. } => "rectangle",
        }
    }

    /// World-space bounding box: planar shapes enclose their vertices, solid
    /// shapes transform the corners of their primitive-space box.
    pub fn bounding_box(&self) -> Aabb {
        match self {
            Shape::Triangle(p) | Shape::Polygon(p) => Aabb::enclosing(p.vertices.iter().copied()),
            Shape::Sphere { placement, radius } => {
                let r = Vec3::splat(*radius);
                placement.to_world.transform_aabb(&Aabb::from_points(-r, r))
            }
            Shape::Cylinder {
                placement,
                radius,
                height,
            } => {
                let local = Aabb::from_points(
                    Vec3::new(-radius, 0.0, -radius),
                    Vec3::new(*radius, *height, *radius),
                );
                placement.to_world.transform_aabb(&local)
            }
            Shape::Cone {
                placement,
                base_radius,
                top_radius,
                height,
            } => {
                let r = base_radius.max(*top_radius);
                let local = Aabb::from_points(Vec3::new(-r, 0.0, -r), Vec3::new(r, *height, r));
                placement.to_world.transform_aabb(&local)
            }
            Shape::Prism { placement, size } => {
                let half = Vec3::new(size.x * 0.5, 0.0, size.z * 0.5);
                let local = Aabb::from_points(-half, Vec3::new(half.x, size.y, half.z));
                placement.to_world.transform_aabb(&local)
            }
            Shape::Rectangle {
                placement,
                width,
                length,
            } => {
                let half = Vec3::new(width * 0.5, 0.0, length * 0.5);
                placement.to_world.transform_aabb(&Aabb::from_points(-half, half))
            }
        }
    }

    /// Plane data of triangles and polygons.
    pub fn planar(&self) -> Option<&Planar> {
        match self {
            Shape::Triangle(p) | Shape::Polygon(p) => Some(p),
            _ => None,
        }
    }
}

/// A primitive of the scene.
#[derive(Debug, Clone, PartialEq)]
pub struct Primitive {
    pub id: PrimitiveId,
    pub shape: Shape,
    pub bbox: Aabb,
    /// Material of the top face (normal side) and of the bottom face
    pub materials: [MaterialId; 2],
    /// Query this primitive answers for, if any
    pub query: Option<QueryId>,
    /// Intensity absorbed so far in the current run, per band
    pub absorbed: BandTotals,
}

/// Owns all primitives of the scene.
#[derive(Debug, Default)]
pub struct PrimitiveStore {
    primitives: Vec<Primitive>,
    next_id: u32,
}

impl PrimitiveStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a primitive described in primitive space, transformed by `transform`.
    pub fn add(
        &mut self,
        params: ShapeParams,
        transform: &Mat4,
        materials: [MaterialId; 2],
        query: Option<QueryId>,
    ) -> Result<PrimitiveId, ShapeError> {
        let shape = Shape::build(params, transform)?;
        Ok(self.insert(shape, materials, query))
    }

    /// Add an already built shape.
    pub fn insert(
        &mut self,
        shape: Shape,
        materials: [MaterialId; 2],
        query: Option<QueryId>,
    ) -> PrimitiveId {
        let id = PrimitiveId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.primitives.push(Primitive {
            id,
            bbox: shape.bounding_box(),
            shape,
            materials,
            query,
            absorbed: Default::default(),
        });
        id
    }

    /// Split a world-space polygon into a fan of triangles sharing vertex 0.
    ///
    /// Degenerate triangles of the fan are skipped with a warning. Returns the
    /// store indices of the triangles that were added.
    pub fn add_fan(
        &mut self,
        vertices: &[Vec3],
        materials: [MaterialId; 2],
        query: Option<QueryId>,
    ) -> Result<Vec<usize>, ShapeError> {
        if vertices.len() < 3 {
            return Err(ShapeError::TooFewVertices(vertices.len()));
        }

        let mut added = Vec::with_capacity(vertices.len() - 2);
        for i in 1..vertices.len() - 1 {
            let tri = vec![vertices[0], vertices[i], vertices[i + 1]];
            match Planar::new(tri) {
                Ok(planar) => {
                    self.insert(Shape::Triangle(planar), materials, query);
                    added.push(self.primitives.len() - 1);
                }
                Err(e) => log::warn!("skipping fan triangle {}: {}", i, e),
            }
        }
        Ok(added)
    }

    /// Keep only primitives matching `keep`.
    pub fn retain<F: FnMut(&Primitive) -> bool>(&mut self, keep: F) {
        self.primitives.retain(keep);
    }

    /// Detach all primitives from their queries so they persist as scenery.
    pub fn detach_queries(&mut self) {
        for p in &mut self.primitives {
            p.query = None;
        }
    }

    /// Zero every absorbed-intensity accumulator.
    pub fn reset_absorbed(&mut self) {
        for p in &mut self.primitives {
            p.absorbed = Default::default();
        }
    }

    /// Union of all bounding boxes.
    pub fn bounds(&self) -> Aabb {
        self.primitives
            .iter()
            .fold(Aabb::EMPTY, |acc, p| Aabb::surrounding(&acc, &p.bbox))
    }

    pub fn as_slice(&self) -> &[Primitive] {
        &self.primitives
    }

    pub fn as_mut_slice(&mut self) -> &mut [Primitive] {
        &mut self.primitives
    }

    pub fn get(&self, index: usize) -> Option<&Primitive> {
        self.primitives.get(index)
    }

    pub fn len(&self) -> usize {
        self.primitives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primitives.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Primitive> {
        self.primitives.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_math::MatrixStack;

    fn square() -> Vec<Vec3> {
        vec![
            Vec3::new(-1.0, 0.0, -1.0),
            Vec3::new(-1.0, 0.0, 1.0),
            Vec3::new(1.0, 0.0, 1.0),
            Vec3::new(1.0, 0.0, -1.0),
        ]
    }

    #[test]
    fn test_planar_normal_and_area() {
        let planar = Planar::new(square()).unwrap();
        assert!((planar.normal - Vec3::Y).length() < 1e-6);
        assert_eq!(planar.drop_axis, 1);
        assert!((planar.area() - 4.0).abs() < 1e-5);
        assert!(planar.offset.abs() < 1e-6);
    }

    #[test]
    fn test_degenerate_polygon_rejected() {
        let collinear = vec![Vec3::ZERO, Vec3::X, Vec3::X * 2.0];
        assert_eq!(Planar::new(collinear), Err(ShapeError::Degenerate));
        assert_eq!(Planar::new(vec![Vec3::ZERO, Vec3::X]), Err(ShapeError::TooFewVertices(2)));
    }

    #[test]
    fn test_add_applies_transform() {
        let mut store = PrimitiveStore::new();
        let mut stack = MatrixStack::new();
        stack.translate(Vec3::new(0.0, 5.0, 0.0));

        store
            .add(ShapeParams::Sphere { radius: 1.0 }, &stack.current(), [0, 1], None)
            .unwrap();

        let bbox = store.get(0).unwrap().bbox;
        assert!((bbox.centroid() - Vec3::new(0.0, 5.0, 0.0)).length() < 1e-5);
        assert!((bbox.y.size() - 2.0).abs() < 1e-5);
    }

    #[test]
    fn test_fan_decomposition() {
        let mut store = PrimitiveStore::new();
        let pentagon: Vec<Vec3> = (0..5)
            .map(|i| {
                let a = i as f32 * std::f32::consts::TAU / 5.0;
                Vec3::new(a.cos(), 0.0, -a.sin())
            })
            .collect();

        let added = store.add_fan(&pentagon, [0, 1], Some(7)).unwrap();
        assert_eq!(added.len(), 3);
        assert!(store.iter().all(|p| p.query == Some(7)));
        assert!(store.iter().all(|p| matches!(p.shape, Shape::Triangle(_))));
    }

    #[test]
    fn test_ids_are_unique_after_retain() {
        let mut store = PrimitiveStore::new();
        let id0 = store.insert(Shape::Triangle(Planar::new(square()[..3].to_vec()).unwrap()), [0, 0], Some(0));
        store.retain(|p| p.query.is_none());
        let id1 = store.insert(Shape::Triangle(Planar::new(square()[..3].to_vec()).unwrap()), [0, 0], None);
        assert_ne!(id0, id1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_invalid_parameters() {
        let m = Mat4::IDENTITY;
        assert!(Shape::build(ShapeParams::Sphere { radius: -1.0 }, &m).is_err());
        assert!(Shape::build(
            ShapeParams::Cone {
                base_radius: 0.0,
                top_radius: 0.0,
                height: 1.0
            },
            &m
        )
        .is_err());
        assert_eq!(
            Shape::build(ShapeParams::Sphere { radius: 1.0 }, &Mat4::ZERO),
            Err(ShapeError::SingularTransform)
        );
    }

    #[test]
    fn test_solid_bounding_boxes() {
        let m = Mat4::IDENTITY;
        let cyl = Shape::build(ShapeParams::Cylinder { radius: 0.5, height: 2.0 }, &m).unwrap();
        let bbox = cyl.bounding_box();
        assert_eq!(bbox.min(), Vec3::new(-0.5, 0.0, -0.5));
        assert_eq!(bbox.max(), Vec3::new(0.5, 2.0, 0.5));

        let prism = Shape::build(ShapeParams::Prism { size: Vec3::new(2.0, 1.0, 4.0) }, &m).unwrap();
        let bbox = prism.bounding_box();
        assert_eq!(bbox.min(), Vec3::new(-1.0, 0.0, -2.0));
        assert_eq!(bbox.max(), Vec3::new(1.0, 1.0, 2.0));
    }

    #[test]
    fn test_reset_absorbed() {
        let mut store = PrimitiveStore::new();
        store.insert(Shape::Polygon(Planar::new(square()).unwrap()), [0, 1], None);
        store.as_mut_slice()[0].absorbed[0] = 3.0;
        store.reset_absorbed();
        assert_eq!(store.get(0).unwrap().absorbed[0], 0.0);
    }
}
