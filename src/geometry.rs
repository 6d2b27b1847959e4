// src/geometry.rs
//! Shared spatial primitives and the `glam` <-> `nalgebra` boundary.
//!
//! Everything inside the core speaks rapier's `nalgebra` types. The command surface
//! takes `glam::Vec3` and converts here.

use glam::Vec3;
use nalgebra::{Isometry3, Point3, UnitQuaternion, Vector3};

/// Edge length of one sector cell in world units.
pub const SECTOR_SIZE: f32 = 1024.0;

/// Default world gravity (Z is up).
pub const DEFAULT_GRAVITY: [f32; 3] = [0.0, 0.0, -4500.0];

/// Axis-aligned bounding box in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Point3<f32>,
    pub max: Point3<f32>,
}

impl Aabb {
    pub fn new(min: Point3<f32>, max: Point3<f32>) -> Self {
        Self { min, max }
    }

    /// Inclusive on every face.
    #[inline]
    pub fn contains(&self, p: &Point3<f32>) -> bool {
        self.contains_xy(p) && p.z >= self.min.z && p.z <= self.max.z
    }

    /// Footprint test, ignoring height.
    #[inline]
    pub fn contains_xy(&self, p: &Point3<f32>) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }
}

#[inline(always)]
pub fn to_na(v: Vec3) -> Vector3<f32> {
    Vector3::new(v.x, v.y, v.z)
}

#[inline(always)]
pub fn to_point(v: Vec3) -> Point3<f32> {
    Point3::new(v.x, v.y, v.z)
}

#[inline(always)]
pub fn to_glam(v: &Vector3<f32>) -> Vec3 {
    Vec3::new(v.x, v.y, v.z)
}

/// Rotation built the way level and setup data specify it: rotate about X, then Y, then Z.
#[inline]
pub fn euler_zyx(angles: [f32; 3]) -> UnitQuaternion<f32> {
    UnitQuaternion::from_euler_angles(angles[0], angles[1], angles[2])
}

/// Frame with an origin and Euler rotation.
#[inline]
pub fn frame(origin: Vector3<f32>, angles: [f32; 3]) -> Isometry3<f32> {
    Isometry3::from_parts(origin.into(), euler_zyx(angles))
}

/// Principal moments of a solid box with the given half extents.
///
/// Degenerate extents are clamped so a flat mesh still gets a usable tensor.
pub fn box_inertia(mass: f32, half_extents: Vector3<f32>) -> Vector3<f32> {
    let e = half_extents.map(|v| v.abs().max(1.0e-3));
    let k = mass / 3.0;
    Vector3::new(
        k * (e.y * e.y + e.z * e.z),
        k * (e.x * e.x + e.z * e.z),
        k * (e.x * e.x + e.y * e.y),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aabb_contains_is_inclusive() {
        let b = Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(10.0, 10.0, 10.0));
        assert!(b.contains(&Point3::new(0.0, 10.0, 5.0)));
        assert!(!b.contains(&Point3::new(0.0, 10.1, 5.0)));
        assert!(b.contains_xy(&Point3::new(5.0, 5.0, 100.0)));
    }

    #[test]
    fn box_inertia_is_positive_for_flat_boxes() {
        let i = box_inertia(2.0, Vector3::new(1.0, 0.0, 1.0));
        assert!(i.iter().all(|c| *c > 0.0));
    }
}
