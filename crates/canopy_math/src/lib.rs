//! Canopy math - shared vector and bounding types.
//!
//! Re-exports glam and adds the small set of types the light environment
//! needs on top of it: intervals, axis-aligned boxes, rays and a
//! fixed-function style matrix stack.

// Re-export glam for convenience
pub use glam::*;

mod aabb;
mod interval;
mod ray;
mod transform;

pub use aabb::Aabb;
pub use interval::Interval;
pub use ray::Ray;
pub use transform::{Mat4Ext, MatrixStack};

/// Tolerance used for distance comparisons along rays and at cell boundaries.
pub const EPSILON: f32 = 1e-5;

/// Component of `v` along axis `n` (0=X, 1=Y, 2=Z).
#[inline]
pub fn axis(v: Vec3, n: usize) -> f32 {
    match n {
        0 => v.x,
        1 => v.y,
        _ => v.z,
    }
}

/// Index of the component of `v` with the largest magnitude.
#[inline]
pub fn dominant_axis(v: Vec3) -> usize {
    let a = v.abs();
    if a.x >= a.y && a.x >= a.z {
        0
    } else if a.y >= a.z {
        1
    } else {
        2
    }
}

/// Build an orthonormal basis `(u, v)` perpendicular to the unit vector `w`.
pub fn orthonormal_basis(w: Vec3) -> (Vec3, Vec3) {
    let helper = if w.x.abs() > 0.9 { Vec3::Y } else { Vec3::X };
    let u = helper.cross(w).normalize();
    let v = w.cross(u);
    (u, v)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_axis_access() {
        let v = Vec3::new(1.0, 2.0, 3.0);
        assert_eq!(axis(v, 0), 1.0);
        assert_eq!(axis(v, 1), 2.0);
        assert_eq!(axis(v, 2), 3.0);
    }

    #[test]
    fn test_dominant_axis() {
        assert_eq!(dominant_axis(Vec3::new(0.1, -5.0, 2.0)), 1);
        assert_eq!(dominant_axis(Vec3::new(-3.0, 1.0, 2.0)), 0);
        assert_eq!(dominant_axis(Vec3::new(0.0, 0.0, -1.0)), 2);
    }

    #[test]
    fn test_orthonormal_basis() {
        for w in [Vec3::X, Vec3::Y, Vec3::Z, Vec3::new(1.0, 1.0, 1.0).normalize()] {
            let (u, v) = orthonormal_basis(w);
            assert!(u.dot(w).abs() < 1e-5);
            assert!(v.dot(w).abs() < 1e-5);
            assert!(u.dot(v).abs() < 1e-5);
            assert!((u.length() - 1.0).abs() < 1e-5);
            assert!((v.length() - 1.0).abs() < 1e-5);
        }
    }
}
