// Transform utilities for Mat4
//
// Extends glam::Mat4 with the helpers the primitive store needs, and adds a
// fixed-function style matrix stack for scene-file loading.

use crate::Aabb;
use glam::{Mat3, Mat4, Vec3};

/// Extension trait for Mat4 to provide additional transform utilities
pub trait Mat4Ext {
    /// Transform an axis-aligned bounding box.
    /// Computes the bounding box of all 8 transformed corners.
    fn transform_aabb(&self, aabb: &Aabb) -> Aabb;

    /// Transform a surface normal (inverse transpose of the linear part)
    /// and re-normalize it.
    fn transform_normal3(&self, normal: Vec3) -> Vec3;
}

impl Mat4Ext for Mat4 {
    fn transform_aabb(&self, aabb: &Aabb) -> Aabb {
        let lo = aabb.min();
        let hi = aabb.max();

        let corners = [
            Vec3::new(lo.x, lo.y, lo.z),
            Vec3::new(hi.x, lo.y, lo.z),
            Vec3::new(lo.x, hi.y, lo.z),
            Vec3::new(hi.x, hi.y, lo.z),
            Vec3::new(lo.x, lo.y, hi.z),
            Vec3::new(hi.x, lo.y, hi.z),
            Vec3::new(lo.x, hi.y, hi.z),
            Vec3::new(hi.x, hi.y, hi.z),
        ];

        Aabb::enclosing(corners.iter().map(|&c| self.transform_point3(c)))
    }

    fn transform_normal3(&self, normal: Vec3) -> Vec3 {
        let linear = Mat3::from_mat4(*self);
        (linear.inverse().transpose() * normal).normalize()
    }
}

/// A stack of 4x4 matrices mirroring the classic push/pop/translate/rotate
/// interface. Operations post-multiply the top of the stack, so the most
/// recently issued transform is applied to geometry first.
#[derive(Debug, Clone)]
pub struct MatrixStack {
    stack: Vec<Mat4>,
}

impl MatrixStack {
    /// Create a stack holding only the identity.
    pub fn new() -> Self {
        Self {
            stack: vec![Mat4::IDENTITY],
        }
    }

    /// The current (top) matrix.
    pub fn current(&self) -> Mat4 {
        *self.stack.last().unwrap_or(&Mat4::IDENTITY)
    }

    /// Number of matrices on the stack (at least 1).
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Duplicate the top matrix.
    pub fn push(&mut self) {
        let top = self.current();
        self.stack.push(top);
    }

    /// Discard the top matrix. Popping the root is ignored and returns false.
    pub fn pop(&mut self) -> bool {
        if self.stack.len() > 1 {
            self.stack.pop();
            true
        } else {
            log::warn!("popmatrix without matching pushmatrix ignored");
            false
        }
    }

    /// Post-multiply the top matrix by `m`.
    pub fn mult(&mut self, m: Mat4) {
        if let Some(top) = self.stack.last_mut() {
            *top = *top * m;
        }
    }

    pub fn translate(&mut self, offset: Vec3) {
        self.mult(Mat4::from_translation(offset));
    }

    /// Rotate by `angle_deg` degrees around `axis`. A zero axis is ignored.
    pub fn rotate(&mut self, angle_deg: f32, axis: Vec3) {
        if let Some(axis) = axis.try_normalize() {
            self.mult(Mat4::from_axis_angle(axis, angle_deg.to_radians()));
        }
    }

    pub fn scale(&mut self, factors: Vec3) {
        self.mult(Mat4::from_scale(factors));
    }
}

impl Default for MatrixStack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    #[test]
    fn test_transform_aabb_translation() {
        let mat = Mat4::from_translation(Vec3::splat(5.0));
        let transformed = mat.transform_aabb(&Aabb::from_points(Vec3::ZERO, Vec3::ONE));

        assert!((transformed.min() - Vec3::splat(5.0)).length() < 0.001);
        assert!((transformed.max() - Vec3::splat(6.0)).length() < 0.001);
    }

    #[test]
    fn test_transform_aabb_rotation_grows_box() {
        let mat = Mat4::from_rotation_y(PI / 4.0);
        let transformed = mat.transform_aabb(&Aabb::from_points(Vec3::splat(-1.0), Vec3::ONE));

        let half_diag = 2.0_f32.sqrt();
        assert!((transformed.x.max - half_diag).abs() < 0.001);
        assert!((transformed.y.max - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_transform_normal_under_nonuniform_scale() {
        let mat = Mat4::from_scale(Vec3::new(2.0, 1.0, 1.0));
        // Normal of the plane x + y = 0 before scaling
        let n = mat.transform_normal3(Vec3::new(1.0, 1.0, 0.0).normalize());
        let expected = Vec3::new(0.5, 1.0, 0.0).normalize();
        assert!((n - expected).length() < 1e-5);
    }

    #[test]
    fn test_stack_push_pop() {
        let mut stack = MatrixStack::new();
        stack.push();
        stack.translate(Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(stack.depth(), 2);
        assert_eq!(stack.current().transform_point3(Vec3::ZERO), Vec3::new(1.0, 2.0, 3.0));

        assert!(stack.pop());
        assert_eq!(stack.current(), Mat4::IDENTITY);

        // Root level cannot be popped
        assert!(!stack.pop());
        assert_eq!(stack.depth(), 1);
    }

    #[test]
    fn test_stack_order_matches_fixed_function() {
        // translate then rotate: geometry is rotated first, then translated
        let mut stack = MatrixStack::new();
        stack.translate(Vec3::new(10.0, 0.0, 0.0));
        stack.rotate(90.0, Vec3::Z);

        let p = stack.current().transform_point3(Vec3::X);
        assert!((p - Vec3::new(10.0, 1.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_stack_rotate_zero_axis_ignored() {
        let mut stack = MatrixStack::new();
        stack.rotate(45.0, Vec3::ZERO);
        assert_eq!(stack.current(), Mat4::IDENTITY);
    }
}
