//! Pre-action poses: where the robot should stand before docking with,
//! placing on, rolling or entering an object.
//!
//! Poses depend only on the object's pose and size, so each object keeps a
//! [`PreActionPoseCache`] that is filled lazily per [`PreActionType`] and
//! dropped wholesale whenever the object's pose changes.

use std::collections::HashMap;
use std::f32::consts::{FRAC_PI_2, PI};

use blockworld_frames::Transform3D;
use blockworld_types::{ObjectId, PreActionType};
use serde::Serialize;

use crate::config::PreActionConfig;
use crate::geometry::Dimensions;

/// Candidate robot pose, expressed in the object's origin frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PreActionPose {
    pub action: PreActionType,
    pub pose: Transform3D,
}

/// Result of a pre-action lookup for one object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreActionLookup {
    pub object: ObjectId,
    pub poses: Vec<PreActionPose>,
    /// `true` when the cache had to recompute (a stale-cache miss).
    pub was_freshly_computed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PreActionPoseCache {
    entries: HashMap<PreActionType, Vec<PreActionPose>>,
}

impl PreActionPoseCache {
    /// Whether poses for `action` are cached.
    pub fn is_cached(&self, action: PreActionType) -> bool {
        self.entries.contains_key(&action)
    }

    /// Forget every cached action.
    pub fn invalidate(&mut self) {
        self.entries.clear();
    }

    /// Cached poses for `action`, running `compute` on a miss.  The flag is
    /// `true` when `compute` ran.
    pub fn get_or_compute(
        &mut self,
        action: PreActionType,
        compute: impl FnOnce() -> Vec<PreActionPose>,
    ) -> (Vec<PreActionPose>, bool) {
        if let Some(poses) = self.entries.get(&action) {
            return (poses.clone(), false);
        }
        let poses = compute();
        self.entries.insert(action, poses.clone());
        (poses, true)
    }
}

/// Places one candidate in front of each vertical face of an object.
#[derive(Debug, Clone, Copy)]
pub struct PreActionPoseGenerator {
    config: PreActionConfig,
}

impl PreActionPoseGenerator {
    pub fn new(config: PreActionConfig) -> Self {
        Self { config }
    }

    /// Robot poses on the ground around an object of size `size` at
    /// `object_pose`, each facing the object's centre.
    pub fn generate(
        &self,
        object_pose: Transform3D,
        size: Dimensions,
        action: PreActionType,
    ) -> Vec<PreActionPose> {
        let standoff = self.config.standoff_mm(action);
        let yaw = object_pose.rotation.yaw();
        let centre = object_pose.translation;
        let ground_z = (centre.z - size.z * 0.5).max(0.0);

        (0..4)
            .map(|face| {
                let normal = yaw + face as f32 * FRAC_PI_2;
                let half = 0.5 * if face % 2 == 0 { size.x } else { size.y };
                let reach = half + standoff;
                let (s, c) = normal.sin_cos();
                PreActionPose {
                    action,
                    pose: Transform3D::from_xyz_yaw(
                        centre.x + reach * c,
                        centre.y + reach * s,
                        ground_z,
                        normal + PI,
                    ),
                }
            })
            .collect()
    }
}
