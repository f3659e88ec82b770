//! Ray-shape intersection routines.
//!
//! Every routine is a pure function of the ray and the shape. Directions
//! need not be unit length: solids are tested in their local space with the
//! transformed (unnormalized) direction, so local and world distances agree.

use canopy_core::{Placement, Planar, Shape};
use canopy_math::{axis, Mat4Ext, Vec3, EPSILON};

/// Closest surface point along a ray.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceHit {
    /// Distance along the ray
    pub t: f32,
    /// Unit outward (or plane) normal in world space
    pub normal: Vec3,
}

/// Trait for shapes a ray can be tested against.
pub trait Intersect {
    /// Closest hit with `EPSILON < t < max_dist`, if any.
    fn intersect(&self, origin: Vec3, dir: Vec3, max_dist: f32) -> Option<SurfaceHit>;
}

impl Intersect for Shape {
    fn intersect(&self, origin: Vec3, dir: Vec3, max_dist: f32) -> Option<SurfaceHit> {
        match self {
            Shape::Triangle(p) | Shape::Polygon(p) => intersect_planar(p, origin, dir, max_dist),
            Shape::Sphere { placement, radius } => {
                in_local(placement, origin, dir, |o, d| sphere(o, d, *radius, max_dist))
            }
            Shape::Cylinder {
                placement,
                radius,
                height,
            } => in_local(placement, origin, dir, |o, d| {
                cone(o, d, *radius, *radius, *height, max_dist)
            }),
            Shape::Cone {
                placement,
                base_radius,
                top_radius,
                height,
            } => in_local(placement, origin, dir, |o, d| {
                cone(o, d, *base_radius, *top_radius, *height, max_dist)
            }),
            Shape::Prism { placement, size } => {
                in_local(placement, origin, dir, |o, d| prism(o, d, *size, max_dist))
            }
            Shape::Rectangle {
                placement,
                width,
                length,
            } => in_local(placement, origin, dir, |o, d| rectangle(o, d, *width, *length, max_dist)),
        }
    }
}

/// Run `test` in the shape's local space and bring the normal back.
fn in_local<F>(placement: &Placement, origin: Vec3, dir: Vec3, test: F) -> Option<SurfaceHit>
where
    F: FnOnce(Vec3, Vec3) -> Option<SurfaceHit>,
{
    let o = placement.to_local.transform_point3(origin);
    let d = placement.to_local.transform_vector3(dir);
    let local = test(o, d)?;
    Some(SurfaceHit {
        t: local.t,
        normal: placement.to_world.transform_normal3(local.normal),
    })
}

/// Keeps the nearest accepted root.
struct Nearest {
    best: Option<SurfaceHit>,
    limit: f32,
}

impl Nearest {
    fn new(max_dist: f32) -> Self {
        Self { best: None, limit: max_dist }
    }

    fn offer(&mut self, t: f32, normal: impl FnOnce() -> Vec3) {
        if t > EPSILON && t < self.limit {
            self.limit = t;
            self.best = Some(SurfaceHit { t, normal: normal() });
        }
    }
}

/// Plane intersection followed by a half-plane test in the projection that
/// drops the polygon's dominant normal axis. Works for convex polygons.
pub fn intersect_planar(p: &Planar, origin: Vec3, dir: Vec3, max_dist: f32) -> Option<SurfaceHit> {
    let denom = p.normal.dot(dir);
    if denom.abs() < 1e-12 {
        return None;
    }
    let t = -(p.normal.dot(origin) + p.offset) / denom;
    if t <= EPSILON || t >= max_dist {
        return None;
    }

    let hit = origin + dir * t;
    let (u, v) = match p.drop_axis {
        0 => (1, 2),
        1 => (2, 0),
        _ => (0, 1),
    };
    let (hu, hv) = (axis(hit, u), axis(hit, v));

    let mut sign = 0.0f32;
    let n = p.vertices.len();
    for i in 0..n {
        let a = p.vertices[i];
        let b = p.vertices[(i + 1) % n];
        let (au, av) = (axis(a, u), axis(a, v));
        let (bu, bv) = (axis(b, u), axis(b, v));
        let cross = (bu - au) * (hv - av) - (bv - av) * (hu - au);
        if cross == 0.0 {
            continue;
        }
        if sign == 0.0 {
            sign = cross.signum();
        } else if cross.signum() != sign {
            return None;
        }
    }

    Some(SurfaceHit { t, normal: p.normal })
}

fn sphere(o: Vec3, d: Vec3, radius: f32, max_dist: f32) -> Option<SurfaceHit> {
    let a = d.length_squared();
    let h = d.dot(o);
    let c = o.length_squared() - radius * radius;
    let discriminant = h * h - a * c;
    if discriminant < 0.0 || a == 0.0 {
        return None;
    }
    let sqrtd = discriminant.sqrt();

    let mut nearest = Nearest::new(max_dist);
    for t in [(-h - sqrtd) / a, (-h + sqrtd) / a] {
        nearest.offer(t, || (o + d * t) / radius);
    }
    nearest.best
}

/// Capped truncated cone along +Y from `y = 0` (radius `r1`) to `y = h`
/// (radius `r2`). Equal radii give a cylinder.
fn cone(o: Vec3, d: Vec3, r1: f32, r2: f32, h: f32, max_dist: f32) -> Option<SurfaceHit> {
    let k = (r2 - r1) / h;
    let mut nearest = Nearest::new(max_dist);

    // Mantle: x^2 + z^2 = (r1 + k y)^2
    let ro = r1 + k * o.y;
    let a = d.x * d.x + d.z * d.z - k * k * d.y * d.y;
    let b = 2.0 * (o.x * d.x + o.z * d.z - k * ro * d.y);
    let c = o.x * o.x + o.z * o.z - ro * ro;

    let mut roots = [f32::NAN; 2];
    if a.abs() > 1e-12 {
        let disc = b * b - 4.0 * a * c;
        if disc >= 0.0 {
            let s = disc.sqrt();
            roots = [(-b - s) / (2.0 * a), (-b + s) / (2.0 * a)];
        }
    } else if b.abs() > 1e-12 {
        roots[0] = -c / b;
    }
    for t in roots {
        if t.is_nan() {
            continue;
        }
        let p = o + d * t;
        if p.y < 0.0 || p.y > h {
            continue;
        }
        nearest.offer(t, || Vec3::new(p.x, -k * (r1 + k * p.y), p.z).try_normalize().unwrap_or(Vec3::X));
    }

    // Caps
    if d.y.abs() > 1e-12 {
        for (y, r, n) in [(0.0, r1, Vec3::NEG_Y), (h, r2, Vec3::Y)] {
            if r <= 0.0 {
                continue;
            }
            let t = (y - o.y) / d.y;
            let p = o + d * t;
            if p.x * p.x + p.z * p.z <= r * r {
                nearest.offer(t, || n);
            }
        }
    }

    nearest.best
}

/// Box `[-sx/2, sx/2] x [0, sy] x [-sz/2, sz/2]` by the slab method.
fn prism(o: Vec3, d: Vec3, size: Vec3, max_dist: f32) -> Option<SurfaceHit> {
    let lo = Vec3::new(-size.x * 0.5, 0.0, -size.z * 0.5);
    let hi = Vec3::new(size.x * 0.5, size.y, size.z * 0.5);

    let mut t_near = f32::NEG_INFINITY;
    let mut t_far = f32::INFINITY;
    let mut near_normal = Vec3::ZERO;
    let mut far_normal = Vec3::ZERO;

    for n in 0..3 {
        let (on, dn) = (axis(o, n), axis(d, n));
        let (ln, hn) = (axis(lo, n), axis(hi, n));
        if dn.abs() < 1e-12 {
            if on < ln || on > hn {
                return None;
            }
            continue;
        }
        let unit = Vec3::AXES[n];
        let (mut t0, mut t1) = ((ln - on) / dn, (hn - on) / dn);
        let (mut n0, mut n1) = (-unit, unit);
        if t0 > t1 {
            std::mem::swap(&mut t0, &mut t1);
            std::mem::swap(&mut n0, &mut n1);
        }
        if t0 > t_near {
            t_near = t0;
            near_normal = n0;
        }
        if t1 < t_far {
            t_far = t1;
            far_normal = n1;
        }
        if t_near > t_far {
            return None;
        }
    }

    let mut nearest = Nearest::new(max_dist);
    nearest.offer(t_near, || near_normal);
    if nearest.best.is_none() {
        nearest.offer(t_far, || far_normal);
    }
    nearest.best
}

/// `w x l` rectangle in the local XZ plane, normal +Y.
fn rectangle(o: Vec3, d: Vec3, width: f32, length: f32, max_dist: f32) -> Option<SurfaceHit> {
    if d.y.abs() < 1e-12 {
        return None;
    }
    let t = -o.y / d.y;
    let p = o + d * t;
    if p.x.abs() > width * 0.5 || p.z.abs() > length * 0.5 {
        return None;
    }
    let mut nearest = Nearest::new(max_dist);
    nearest.offer(t, || Vec3::Y);
    nearest.best
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_core::ShapeParams;
    use canopy_math::Mat4;

    fn build(params: ShapeParams) -> Shape {
        Shape::build(params, &Mat4::IDENTITY).unwrap()
    }

    #[test]
    fn test_triangle_hit_and_miss() {
        let tri = build(ShapeParams::Triangle([
            Vec3::new(-1.0, 0.0, -1.0),
            Vec3::new(-1.0, 0.0, 1.0),
            Vec3::new(1.0, 0.0, 1.0),
        ]));
        let hit = tri
            .intersect(Vec3::new(-0.5, 2.0, 0.5), Vec3::NEG_Y, f32::INFINITY)
            .unwrap();
        assert!((hit.t - 2.0).abs() < 1e-5);
        assert!(hit.normal.dot(Vec3::Y).abs() > 0.999);

        // Other half of the square
        assert!(tri.intersect(Vec3::new(0.5, 2.0, -0.5), Vec3::NEG_Y, f32::INFINITY).is_none());
        // Beyond max distance
        assert!(tri.intersect(Vec3::new(-0.5, 2.0, 0.5), Vec3::NEG_Y, 1.5).is_none());
        // Behind the origin
        assert!(tri.intersect(Vec3::new(-0.5, 2.0, 0.5), Vec3::Y, f32::INFINITY).is_none());
    }

    #[test]
    fn test_polygon_vertical_plane() {
        let quad = build(ShapeParams::Polygon(vec![
            Vec3::new(0.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(0.0, 1.0, 1.0),
            Vec3::new(0.0, 0.0, 1.0),
        ]));
        let hit = quad
            .intersect(Vec3::new(-3.0, 0.5, 0.5), Vec3::X, f32::INFINITY)
            .unwrap();
        assert!((hit.t - 3.0).abs() < 1e-5);
        assert!(quad.intersect(Vec3::new(-3.0, 1.5, 0.5), Vec3::X, f32::INFINITY).is_none());
    }

    #[test]
    fn test_sphere_outside_and_inside() {
        let sphere = build(ShapeParams::Sphere { radius: 1.0 });
        let hit = sphere
            .intersect(Vec3::new(0.0, 0.0, 5.0), Vec3::NEG_Z, f32::INFINITY)
            .unwrap();
        assert!((hit.t - 4.0).abs() < 1e-4);
        assert!((hit.normal - Vec3::Z).length() < 1e-4);

        let hit = sphere.intersect(Vec3::ZERO, Vec3::X, f32::INFINITY).unwrap();
        assert!((hit.t - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_transformed_sphere_keeps_world_distance() {
        let m = Mat4::from_translation(Vec3::new(0.0, 3.0, 0.0)) * Mat4::from_scale(Vec3::splat(2.0));
        let sphere = Shape::build(ShapeParams::Sphere { radius: 0.5 }, &m).unwrap();
        let hit = sphere.intersect(Vec3::ZERO, Vec3::Y, f32::INFINITY).unwrap();
        assert!((hit.t - 2.0).abs() < 1e-4);
        assert!((hit.normal - Vec3::NEG_Y).length() < 1e-4);
    }

    #[test]
    fn test_cylinder_side_and_cap() {
        let cyl = build(ShapeParams::Cylinder { radius: 0.5, height: 2.0 });
        let side = cyl
            .intersect(Vec3::new(-3.0, 1.0, 0.0), Vec3::X, f32::INFINITY)
            .unwrap();
        assert!((side.t - 2.5).abs() < 1e-4);
        assert!((side.normal - Vec3::NEG_X).length() < 1e-4);

        let cap = cyl
            .intersect(Vec3::new(0.1, 5.0, 0.0), Vec3::NEG_Y, f32::INFINITY)
            .unwrap();
        assert!((cap.t - 3.0).abs() < 1e-4);
        assert_eq!(cap.normal, Vec3::Y);

        // Passes above the top cap
        assert!(cyl.intersect(Vec3::new(-3.0, 2.5, 0.0), Vec3::X, f32::INFINITY).is_none());
    }

    #[test]
    fn test_cone_narrows_with_height() {
        let cone = build(ShapeParams::Cone {
            base_radius: 1.0,
            top_radius: 0.0,
            height: 1.0,
        });
        // At y = 0.5 the radius is 0.5
        let hit = cone
            .intersect(Vec3::new(-2.0, 0.5, 0.0), Vec3::X, f32::INFINITY)
            .unwrap();
        assert!((hit.t - 1.5).abs() < 1e-4);
        assert!(hit.normal.x < 0.0 && hit.normal.y > 0.0);

        // From below through the base disk
        let base = cone
            .intersect(Vec3::new(0.2, -1.0, 0.0), Vec3::Y, f32::INFINITY)
            .unwrap();
        assert!((base.t - 1.0).abs() < 1e-4);
        assert_eq!(base.normal, Vec3::NEG_Y);
    }

    #[test]
    fn test_prism_faces() {
        let prism = build(ShapeParams::Prism {
            size: Vec3::new(2.0, 1.0, 2.0),
        });
        let top = prism
            .intersect(Vec3::new(0.0, 3.0, 0.0), Vec3::NEG_Y, f32::INFINITY)
            .unwrap();
        assert!((top.t - 2.0).abs() < 1e-5);
        assert_eq!(top.normal, Vec3::Y);

        // From inside the far face is hit
        let inside = prism
            .intersect(Vec3::new(0.0, 0.5, 0.0), Vec3::X, f32::INFINITY)
            .unwrap();
        assert!((inside.t - 1.0).abs() < 1e-5);
        assert_eq!(inside.normal, Vec3::X);
    }

    #[test]
    fn test_rectangle() {
        let m = Mat4::from_rotation_x(std::f32::consts::FRAC_PI_2);
        let rect = Shape::build(ShapeParams::Rectangle { width: 2.0, length: 1.0 }, &m).unwrap();
        // Rotated into the XY plane facing +Z
        let hit = rect
            .intersect(Vec3::new(0.5, 0.2, 4.0), Vec3::NEG_Z, f32::INFINITY)
            .unwrap();
        assert!((hit.t - 4.0).abs() < 1e-4);
        assert!((hit.normal - Vec3::Z).length() < 1e-4);
        assert!(rect.intersect(Vec3::new(1.5, 0.0, 4.0), Vec3::NEG_Z, f32::INFINITY).is_none());
    }

    #[test]
    fn test_grazing_hits_rejected_at_origin() {
        let sphere = build(ShapeParams::Sphere { radius: 1.0 });
        // Starting on the surface heading outwards: no hit
        assert!(sphere.intersect(Vec3::X, Vec3::X, f32::INFINITY).is_none());
    }
}
