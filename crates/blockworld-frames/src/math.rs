//! Rigid-body math: vectors, unit quaternions and 3-D transforms.
//!
//! All distances are millimetres, all angles radians.
//!
//! # Example
//!
//! ```rust
//! use blockworld_frames::math::{Quaternion, Transform3D, Vec3};
//!
//! // robot is 100 mm forward of the origin, turned 90° left.
//! let robot = Transform3D::new(
//!     Vec3::new(100.0, 0.0, 0.0),
//!     Quaternion::from_yaw(std::f32::consts::FRAC_PI_2),
//! );
//! // camera is 20 mm in front of the robot.
//! let camera = Transform3D::from_translation(Vec3::new(20.0, 0.0, 0.0));
//!
//! let t = robot.compose(camera);
//! assert!((t.translation.x - 100.0).abs() < 1e-3);
//! assert!((t.translation.y - 20.0).abs() < 1e-3);
//!
//! let back = t.compose(t.inverse());
//! assert!(back.translation.length() < 1e-3);
//! ```

use serde::{Deserialize, Serialize};

// ────────────────────────────────────────────────────────────────────────────
// Vec3
// ────────────────────────────────────────────────────────────────────────────

/// A 3-D vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }

    pub fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }

    pub fn scale(self, k: f32) -> Self {
        Self::new(self.x * k, self.y * k, self.z * k)
    }

    pub fn dot(self, rhs: Self) -> f32 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    pub fn cross(self, rhs: Self) -> Self {
        Self::new(
            self.y * rhs.z - self.z * rhs.y,
            self.z * rhs.x - self.x * rhs.z,
            self.x * rhs.y - self.y * rhs.x,
        )
    }

    pub fn length(self) -> f32 {
        self.dot(self).sqrt()
    }

    pub fn distance(self, other: Self) -> f32 {
        self.sub(other).length()
    }

    /// Distance ignoring the Z component.
    pub fn distance_xy(self, other: Self) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Quaternion
// ────────────────────────────────────────────────────────────────────────────

/// A unit quaternion representing a 3-D rotation (w, x, y, z convention).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Quaternion {
    /// Create a quaternion.  The caller is responsible for providing a unit
    /// quaternion (|q| = 1); see [`Quaternion::normalized`].
    pub fn new(w: f32, x: f32, y: f32, z: f32) -> Self {
        Self { w, x, y, z }
    }

    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }

    /// Rotation of `angle` radians about `axis`. A zero axis gives identity.
    pub fn from_axis_angle(axis: Vec3, angle: f32) -> Self {
        let len = axis.length();
        if len < f32::EPSILON {
            return Self::identity();
        }
        let (s, c) = (angle * 0.5).sin_cos();
        let k = s / len;
        Self::new(c, axis.x * k, axis.y * k, axis.z * k)
    }

    /// Rotation about +Z.
    pub fn from_yaw(yaw: f32) -> Self {
        Self::from_axis_angle(Vec3::new(0.0, 0.0, 1.0), yaw)
    }

    /// Hamilton product: compose two rotations.
    pub fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        )
    }

    /// Conjugate (== inverse for a unit quaternion).
    pub fn conjugate(self) -> Self {
        Self::new(self.w, -self.x, -self.y, -self.z)
    }

    pub fn normalized(self) -> Self {
        let n = (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt();
        if n < f32::EPSILON {
            return Self::identity();
        }
        Self::new(self.w / n, self.x / n, self.y / n, self.z / n)
    }

    /// Rotate a vector by this quaternion: p' = q * p * q*.
    pub fn rotate(self, v: Vec3) -> Vec3 {
        let p = Self::new(0.0, v.x, v.y, v.z);
        let rotated = self.mul(p).mul(self.conjugate());
        Vec3::new(rotated.x, rotated.y, rotated.z)
    }

    /// Magnitude of the rotation in `[0, π]`.
    pub fn angle(self) -> f32 {
        2.0 * self.w.abs().clamp(0.0, 1.0).acos()
    }

    /// Heading of the rotated +X axis projected onto the XY plane.
    pub fn yaw(self) -> f32 {
        let fwd = self.rotate(Vec3::new(1.0, 0.0, 0.0));
        fwd.y.atan2(fwd.x)
    }

    /// Angle of the rotation taking `self` to `other`.
    pub fn angle_to(self, other: Self) -> f32 {
        self.conjugate().mul(other).angle()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Transform3D
// ────────────────────────────────────────────────────────────────────────────

/// A rigid-body 3-D transform: rotation followed by translation.
///
/// Represents the pose of frame B relative to frame A: to convert a point
/// expressed in frame B into frame A, rotate it by `rotation` then add
/// `translation`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform3D {
    pub translation: Vec3,
    pub rotation: Quaternion,
}

impl Transform3D {
    pub fn new(translation: Vec3, rotation: Quaternion) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    pub fn identity() -> Self {
        Self::new(Vec3::zero(), Quaternion::identity())
    }

    pub fn from_translation(translation: Vec3) -> Self {
        Self::new(translation, Quaternion::identity())
    }

    /// Planar pose: position plus heading about +Z.
    pub fn from_xyz_yaw(x: f32, y: f32, z: f32, yaw: f32) -> Self {
        Self::new(Vec3::new(x, y, z), Quaternion::from_yaw(yaw))
    }

    /// Compose two transforms: `self` applied first, then `other`.
    ///
    /// If `self` = T_A_B and `other` = T_B_C, the result is T_A_C.
    pub fn compose(self, other: Self) -> Self {
        let translated = self.translation.add(self.rotation.rotate(other.translation));
        let rotated = self.rotation.mul(other.rotation).normalized();
        Self::new(translated, rotated)
    }

    /// If `self` = T_A_B, returns T_B_A.
    pub fn inverse(self) -> Self {
        let inv_rot = self.rotation.conjugate();
        let inv_trans = inv_rot.rotate(self.translation).scale(-1.0);
        Self::new(inv_trans, inv_rot)
    }

    /// Map a point expressed in frame B into frame A.
    pub fn transform_point(self, p: Vec3) -> Vec3 {
        self.translation.add(self.rotation.rotate(p))
    }

    /// True when both translation and rotation are within tolerance.
    pub fn is_near(self, other: Self, distance_tol: f32, angle_tol: f32) -> bool {
        self.translation.distance(other.translation) <= distance_tol
            && self.rotation.angle_to(other.rotation) <= angle_tol
    }
}

impl Default for Transform3D {
    fn default() -> Self {
        Self::identity()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::{FRAC_1_SQRT_2, FRAC_PI_2, PI};

    // ── Quaternion ──────────────────────────────────────────────────────────

    #[test]
    fn quaternion_90deg_yaw_rotates_x_to_y() {
        let q = Quaternion::new(FRAC_1_SQRT_2, 0.0, 0.0, FRAC_1_SQRT_2);
        let r = q.rotate(Vec3::new(1.0, 0.0, 0.0));
        assert!(r.x.abs() < 1e-5, "x should be ~0, got {}", r.x);
        assert!((r.y - 1.0).abs() < 1e-5, "y should be ~1, got {}", r.y);
        assert!(r.z.abs() < 1e-5);
    }

    #[test]
    fn from_yaw_matches_explicit_quaternion() {
        let q = Quaternion::from_yaw(FRAC_PI_2);
        assert!((q.w - FRAC_1_SQRT_2).abs() < 1e-5);
        assert!((q.z - FRAC_1_SQRT_2).abs() < 1e-5);
        assert!((q.yaw() - FRAC_PI_2).abs() < 1e-5);
    }

    #[test]
    fn axis_angle_pitch_tilts_forward_axis_down() {
        // Positive rotation about +Y takes +X towards -Z.
        let q = Quaternion::from_axis_angle(Vec3::new(0.0, 1.0, 0.0), FRAC_PI_2);
        let r = q.rotate(Vec3::new(1.0, 0.0, 0.0));
        assert!(r.x.abs() < 1e-5);
        assert!((r.z + 1.0).abs() < 1e-5);
    }

    #[test]
    fn angle_to_measures_relative_rotation() {
        let a = Quaternion::from_yaw(0.1);
        let b = Quaternion::from_yaw(0.4);
        assert!((a.angle_to(b) - 0.3).abs() < 1e-4);
        assert!((Quaternion::identity().angle_to(Quaternion::from_yaw(PI)) - PI).abs() < 1e-3);
    }

    // ── Transform3D ─────────────────────────────────────────────────────────

    #[test]
    fn transform_compose_translations_add() {
        let t1 = Transform3D::from_translation(Vec3::new(1.0, 0.0, 0.0));
        let t2 = Transform3D::from_translation(Vec3::new(2.0, 0.0, 0.0));
        assert!((t1.compose(t2).translation.x - 3.0).abs() < 1e-5);
    }

    #[test]
    fn transform_inverse_round_trips() {
        let t = Transform3D::new(
            Vec3::new(12.0, -40.0, 5.0),
            Quaternion::from_axis_angle(Vec3::new(0.2, 0.3, 1.0), 1.1),
        );
        let id = t.compose(t.inverse());
        assert!(id.translation.length() < 1e-3);
        assert!(id.rotation.angle() < 1e-3);

        let id2 = t.inverse().compose(t);
        assert!(id2.is_near(Transform3D::identity(), 1e-3, 1e-3));
    }

    #[test]
    fn transform_point_respects_rotation() {
        let t = Transform3D::from_xyz_yaw(10.0, 0.0, 0.0, FRAC_PI_2);
        let p = t.transform_point(Vec3::new(5.0, 0.0, 0.0));
        assert!((p.x - 10.0).abs() < 1e-4);
        assert!((p.y - 5.0).abs() < 1e-4);
    }

    #[test]
    fn is_near_checks_both_tolerances() {
        let a = Transform3D::from_xyz_yaw(0.0, 0.0, 0.0, 0.0);
        let b = Transform3D::from_xyz_yaw(3.0, 4.0, 0.0, 0.05);
        assert!(a.is_near(b, 5.0, 0.1));
        assert!(!a.is_near(b, 4.9, 0.1));
        assert!(!a.is_near(b, 5.0, 0.01));
    }
}
