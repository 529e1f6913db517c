//! Geometric helpers used by the world model.
//!
//! # Key types
//!
//! | Type | Role |
//! |------|------|
//! | [`Dimensions`]          | Bounding size of an object.                           |
//! | [`Aabb`]                | Axis-aligned box for region queries.                  |
//! | [`OrientedRect`]        | Yawed footprint on the ground plane (SAT overlap).    |
//! | [`MarkerPoseEstimator`] | Turns a marker's image quad into a camera-frame pose. |
//! | [`PinholeEstimator`]    | Estimator for an ideal pinhole camera.                |

use blockworld_frames::{Transform3D, Vec3};
use blockworld_types::ImageQuad;
use serde::{Deserialize, Serialize};

use crate::config::CameraConfig;

// ────────────────────────────────────────────────────────────────────────────
// Dimensions
// ────────────────────────────────────────────────────────────────────────────

/// Extent of an object's bounding box along its own axes, in mm.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Dimensions {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Dimensions {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Half-extents along each axis.
    pub fn half(self) -> Vec3 {
        Vec3::new(self.x * 0.5, self.y * 0.5, self.z * 0.5)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Aabb
// ────────────────────────────────────────────────────────────────────────────

/// An axis-aligned bounding box, defined by its minimum and maximum corners.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Create a bounding box from its two opposite corners.
    ///
    /// The constructor normalises the corners so that `min ≤ max` per axis.
    pub fn new(a: Vec3, b: Vec3) -> Self {
        Self {
            min: Vec3::new(a.x.min(b.x), a.y.min(b.y), a.z.min(b.z)),
            max: Vec3::new(a.x.max(b.x), a.y.max(b.y), a.z.max(b.z)),
        }
    }

    /// Grow the box by `margin` on every side.
    pub fn expanded(&self, margin: f32) -> Self {
        let m = Vec3::new(margin, margin, margin);
        Self::new(self.min.sub(m), self.max.add(m))
    }

    /// True when the point lies inside or on the boundary of the box.
    pub fn contains_point(&self, p: Vec3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    /// True when `other` overlaps (intersects or touches) this box.
    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// Box enclosing an object of size `dims` posed at `pose`.
    pub fn enclosing(pose: Transform3D, dims: Dimensions) -> Self {
        let h = dims.half();
        let mut min = pose.translation;
        let mut max = pose.translation;
        for sx in [-1.0, 1.0] {
            for sy in [-1.0, 1.0] {
                for sz in [-1.0, 1.0] {
                    let c = pose.transform_point(Vec3::new(sx * h.x, sy * h.y, sz * h.z));
                    min = Vec3::new(min.x.min(c.x), min.y.min(c.y), min.z.min(c.z));
                    max = Vec3::new(max.x.max(c.x), max.y.max(c.y), max.z.max(c.z));
                }
            }
        }
        Self { min, max }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// OrientedRect
// ────────────────────────────────────────────────────────────────────────────

/// A rectangle on the XY plane, rotated by `yaw` about its centre.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OrientedRect {
    pub center_x: f32,
    pub center_y: f32,
    pub half_x: f32,
    pub half_y: f32,
    pub yaw: f32,
}

impl OrientedRect {
    /// Ground footprint of a box of size `dims` posed at `pose`.
    pub fn footprint(pose: Transform3D, dims: Dimensions) -> Self {
        Self {
            center_x: pose.translation.x,
            center_y: pose.translation.y,
            half_x: dims.x * 0.5,
            half_y: dims.y * 0.5,
            yaw: pose.rotation.yaw(),
        }
    }

    /// Grow both half-extents by `margin`.
    pub fn padded(self, margin: f32) -> Self {
        Self {
            half_x: self.half_x + margin,
            half_y: self.half_y + margin,
            ..self
        }
    }

    fn axes(&self) -> [(f32, f32); 2] {
        let (s, c) = self.yaw.sin_cos();
        [(c, s), (-s, c)]
    }

    /// Corners in winding order, ground-plane coordinates.
    pub fn corners(&self) -> [(f32, f32); 4] {
        let [(ax, ay), (bx, by)] = self.axes();
        let mut out = [(0.0, 0.0); 4];
        for (i, (sx, sy)) in [(1.0, 1.0), (1.0, -1.0), (-1.0, -1.0), (-1.0, 1.0)]
            .into_iter()
            .enumerate()
        {
            out[i] = (
                self.center_x + sx * self.half_x * ax + sy * self.half_y * bx,
                self.center_y + sx * self.half_x * ay + sy * self.half_y * by,
            );
        }
        out
    }

    /// Separating-axis test; touching edges count as overlap.
    pub fn intersects(&self, other: &OrientedRect) -> bool {
        let a = self.corners();
        let b = other.corners();
        for (nx, ny) in self.axes().into_iter().chain(other.axes()) {
            let project = |pts: &[(f32, f32); 4]| {
                pts.iter().fold((f32::MAX, f32::MIN), |(lo, hi), (x, y)| {
                    let d = x * nx + y * ny;
                    (lo.min(d), hi.max(d))
                })
            };
            let (a_lo, a_hi) = project(&a);
            let (b_lo, b_hi) = project(&b);
            if a_hi < b_lo || b_hi < a_lo {
                return false;
            }
        }
        true
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Marker pose estimation
// ────────────────────────────────────────────────────────────────────────────

/// Recovers a marker's pose in the camera body frame (x forward, y left,
/// z up) from its image corners.
pub trait MarkerPoseEstimator {
    /// `None` when the quad is degenerate.
    fn estimate(&self, quad: &ImageQuad, marker_size_mm: f32) -> Option<Transform3D>;
}

/// Fronto-parallel pinhole model: range from apparent size, bearing from
/// the quad centroid.  The marker is assumed to face the camera.
#[derive(Debug, Clone, Copy)]
pub struct PinholeEstimator {
    pub focal_length_px: f32,
    pub center_x_px: f32,
    pub center_y_px: f32,
}

impl PinholeEstimator {
    /// Estimator for the configured camera.
    pub fn from_config(cfg: &CameraConfig) -> Self {
        Self {
            focal_length_px: cfg.focal_length_px,
            center_x_px: cfg.center_x_px,
            center_y_px: cfg.center_y_px,
        }
    }
}

impl MarkerPoseEstimator for PinholeEstimator {
    fn estimate(&self, quad: &ImageQuad, marker_size_mm: f32) -> Option<Transform3D> {
        let side = quad.mean_side_length();
        if side < 1.0 || self.focal_length_px <= 0.0 {
            return None;
        }
        let range = self.focal_length_px * marker_size_mm / side;
        let c = quad.centroid();
        let left = -(c.x - self.center_x_px) * range / self.focal_length_px;
        let up = -(c.y - self.center_y_px) * range / self.focal_length_px;
        Some(Transform3D::from_translation(Vec3::new(range, left, up)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_4;

    // ── Aabb ────────────────────────────────────────────────────────────────

    #[test]
    fn aabb_normalises_and_overlaps() {
        let a = Aabb::new(Vec3::new(5.0, 5.0, 5.0), Vec3::new(0.0, 0.0, 0.0));
        assert_eq!(a.min, Vec3::zero());
        let b = Aabb::new(Vec3::new(5.0, 5.0, 5.0), Vec3::new(8.0, 8.0, 8.0));
        assert!(a.overlaps(&b));
        let c = Aabb::new(Vec3::new(6.0, 0.0, 0.0), Vec3::new(8.0, 1.0, 1.0));
        assert!(!a.overlaps(&c));
        assert!(a.expanded(1.0).overlaps(&c));
    }

    #[test]
    fn enclosing_box_of_rotated_cube_grows() {
        let pose = Transform3D::from_xyz_yaw(0.0, 0.0, 22.0, FRAC_PI_4);
        let b = Aabb::enclosing(pose, Dimensions::new(44.0, 44.0, 44.0));
        let expected = 22.0 * std::f32::consts::SQRT_2;
        assert!((b.max.x - expected).abs() < 1e-3);
        assert!((b.min.z - 0.0).abs() < 1e-3);
        assert!(b.contains_point(Vec3::new(0.0, 0.0, 22.0)));
    }

    // ── OrientedRect ────────────────────────────────────────────────────────

    #[test]
    fn rects_overlap_when_sharing_area() {
        let a = OrientedRect::footprint(Transform3D::identity(), Dimensions::new(10.0, 10.0, 1.0));
        let b = OrientedRect::footprint(
            Transform3D::from_xyz_yaw(8.0, 0.0, 0.0, 0.0),
            Dimensions::new(10.0, 10.0, 1.0),
        );
        assert!(a.intersects(&b));
        assert!(b.intersects(&a));
    }

    #[test]
    fn rotated_rect_separates_on_its_own_axis() {
        // A diamond whose corner points at the square but does not reach it.
        let square = OrientedRect::footprint(Transform3D::identity(), Dimensions::new(10.0, 10.0, 1.0));
        let diamond = OrientedRect::footprint(
            Transform3D::from_xyz_yaw(12.5, 0.0, 0.0, FRAC_PI_4),
            Dimensions::new(10.0, 10.0, 1.0),
        );
        // Corner of the diamond reaches x = 12.5 - 7.07 = 5.43 > 5.
        assert!(!square.intersects(&diamond));
        assert!(square.padded(1.0).intersects(&diamond));
    }

    // ── Pinhole ─────────────────────────────────────────────────────────────

    #[test]
    fn pinhole_range_from_apparent_size() {
        let est = PinholeEstimator {
            focal_length_px: 300.0,
            center_x_px: 160.0,
            center_y_px: 120.0,
        };
        let t = est.estimate(&ImageQuad::square(160.0, 120.0, 30.0), 30.0).unwrap();
        assert!((t.translation.x - 300.0).abs() < 1e-3);
        assert!(t.translation.y.abs() < 1e-3);
        assert!(t.translation.z.abs() < 1e-3);
    }

    #[test]
    fn pinhole_bearing_from_centroid() {
        let est = PinholeEstimator {
            focal_length_px: 300.0,
            center_x_px: 160.0,
            center_y_px: 120.0,
        };
        // Right of and above centre → negative y (right), positive z (up).
        let t = est.estimate(&ImageQuad::square(190.0, 90.0, 30.0), 30.0).unwrap();
        assert!((t.translation.y + 30.0).abs() < 1e-3);
        assert!((t.translation.z - 30.0).abs() < 1e-3);
        assert!(est.estimate(&ImageQuad::square(0.0, 0.0, 0.0), 30.0).is_none());
    }
}
