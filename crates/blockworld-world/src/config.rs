//! World-model tuning knobs and the marker → object library.
//!
//! Every field carries a serde default so a partial TOML file (or none at
//! all) yields a usable configuration.

use std::collections::HashMap;

use blockworld_types::{MarkerCode, ObjectType, PreActionType};
use serde::{Deserialize, Serialize};

use crate::geometry::Dimensions;

/// Top-level world-model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldConfig {
    /// Consecutive missed ticks before a Dirty object becomes Unknown.
    #[serde(default = "default_unobserved_dirty_threshold")]
    pub unobserved_dirty_threshold: u32,

    /// Radius within which a detection is matched to an existing object.
    #[serde(default = "default_same_distance_tolerance_mm")]
    pub same_distance_tolerance_mm: f32,

    /// How many recent marker detections each object keeps.
    #[serde(default = "default_recent_marker_capacity")]
    pub recent_marker_capacity: usize,

    #[serde(default)]
    pub robot: RobotGeometry,

    #[serde(default)]
    pub camera: CameraConfig,

    #[serde(default)]
    pub pre_action: PreActionConfig,

    #[serde(default = "default_objects")]
    pub objects: Vec<ObjectDefinition>,
}

fn default_unobserved_dirty_threshold() -> u32 {
    2
}
fn default_same_distance_tolerance_mm() -> f32 {
    30.0
}
fn default_recent_marker_capacity() -> usize {
    8
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            unobserved_dirty_threshold: default_unobserved_dirty_threshold(),
            same_distance_tolerance_mm: default_same_distance_tolerance_mm(),
            recent_marker_capacity: default_recent_marker_capacity(),
            robot: RobotGeometry::default(),
            camera: CameraConfig::default(),
            pre_action: PreActionConfig::default(),
            objects: default_objects(),
        }
    }
}

impl WorldConfig {
    /// Index the configured object definitions.
    pub fn library(&self) -> ObjectLibrary {
        ObjectLibrary::new(&self.objects)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Robot / camera
// ────────────────────────────────────────────────────────────────────────────

/// Robot body envelope, relative to the robot's pose frame (x forward,
/// z up, origin on the ground between the wheels).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotGeometry {
    pub length_mm: f32,
    pub width_mm: f32,
    pub height_mm: f32,
    /// Distance from the pose origin to the front of the body.
    pub front_mm: f32,
    /// Extra margin added around the footprint for collision checks.
    pub collision_padding_mm: f32,
}

impl Default for RobotGeometry {
    fn default() -> Self {
        Self {
            length_mm: 88.0,
            width_mm: 54.0,
            height_mm: 67.7,
            front_mm: 32.0,
            collision_padding_mm: 5.0,
        }
    }
}

/// Pinhole intrinsics and where the camera sits on the robot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub focal_length_px: f32,
    pub center_x_px: f32,
    pub center_y_px: f32,
    pub mount_x_mm: f32,
    pub mount_y_mm: f32,
    pub mount_z_mm: f32,
    /// Positive pitches the camera down.
    pub pitch_rad: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            focal_length_px: 290.0,
            center_x_px: 160.0,
            center_y_px: 120.0,
            mount_x_mm: 17.0,
            mount_y_mm: 0.0,
            mount_z_mm: 22.0,
            pitch_rad: 0.0,
        }
    }
}

/// Stand-off distances from an object's face for each action.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct PreActionConfig {
    pub docking_mm: f32,
    pub place_relative_mm: f32,
    pub place_on_ground_mm: f32,
    pub rolling_mm: f32,
    pub entry_mm: f32,
}

impl Default for PreActionConfig {
    fn default() -> Self {
        Self {
            docking_mm: 100.0,
            place_relative_mm: 100.0,
            place_on_ground_mm: 80.0,
            rolling_mm: 100.0,
            entry_mm: 140.0,
        }
    }
}

impl PreActionConfig {
    /// Distance from the object face for `action`.
    pub fn standoff_mm(&self, action: PreActionType) -> f32 {
        match action {
            PreActionType::Docking => self.docking_mm,
            PreActionType::PlaceRelative => self.place_relative_mm,
            PreActionType::PlaceOnGround => self.place_on_ground_mm,
            PreActionType::Rolling => self.rolling_mm,
            PreActionType::Entry => self.entry_mm,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Object library
// ────────────────────────────────────────────────────────────────────────────

/// What a marker code means.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObjectDefinition {
    pub marker: MarkerCode,
    pub object_type: ObjectType,
    pub size: Dimensions,
    pub marker_size_mm: f32,
    /// At most one instance of this type exists in the world.
    #[serde(default)]
    pub unique: bool,
}

fn default_objects() -> Vec<ObjectDefinition> {
    let cube = Dimensions::new(44.0, 44.0, 44.0);
    vec![
        ObjectDefinition {
            marker: MarkerCode(1),
            object_type: ObjectType::LightCube1,
            size: cube,
            marker_size_mm: 30.0,
            unique: true,
        },
        ObjectDefinition {
            marker: MarkerCode(2),
            object_type: ObjectType::LightCube2,
            size: cube,
            marker_size_mm: 30.0,
            unique: true,
        },
        ObjectDefinition {
            marker: MarkerCode(3),
            object_type: ObjectType::LightCube3,
            size: cube,
            marker_size_mm: 30.0,
            unique: true,
        },
        ObjectDefinition {
            marker: MarkerCode(10),
            object_type: ObjectType::Charger,
            size: Dimensions::new(104.0, 98.0, 54.0),
            marker_size_mm: 40.0,
            unique: true,
        },
        ObjectDefinition {
            marker: MarkerCode(20),
            object_type: ObjectType::CustomCuboid,
            size: Dimensions::new(50.0, 50.0, 50.0),
            marker_size_mm: 30.0,
            unique: false,
        },
    ]
}

/// Indexed view of the configured object definitions.
#[derive(Debug, Clone, Default)]
pub struct ObjectLibrary {
    by_marker: HashMap<MarkerCode, ObjectDefinition>,
    by_type: HashMap<ObjectType, ObjectDefinition>,
}

impl ObjectLibrary {
    pub fn new(definitions: &[ObjectDefinition]) -> Self {
        let mut lib = Self::default();
        for def in definitions {
            lib.by_marker.insert(def.marker, *def);
            lib.by_type.entry(def.object_type).or_insert(*def);
        }
        lib
    }

    /// Definition of the object carrying marker `code`.
    pub fn by_marker(&self, code: MarkerCode) -> Option<&ObjectDefinition> {
        self.by_marker.get(&code)
    }

    /// Definition of `object_type`.
    pub fn by_type(&self, object_type: ObjectType) -> Option<&ObjectDefinition> {
        self.by_type.get(&object_type)
    }

    /// Bounding size for `object_type`, or a zero box for markerless types.
    pub fn size_of(&self, object_type: ObjectType) -> Dimensions {
        self.by_type(object_type)
            .map(|d| d.size)
            .unwrap_or_default()
    }

    /// Whether at most one object of this type exists.
    pub fn is_unique(&self, object_type: ObjectType) -> bool {
        self.by_type(object_type).is_some_and(|d| d.unique)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_robot_envelope() {
        let cfg = WorldConfig::default();
        assert_eq!(cfg.unobserved_dirty_threshold, 2);
        assert!((cfg.robot.length_mm - 88.0).abs() < 1e-5);
        assert!((cfg.robot.front_mm - 32.0).abs() < 1e-5);
        assert_eq!(cfg.objects.len(), 5);
    }

    #[test]
    fn library_indexes_markers_and_types() {
        let lib = WorldConfig::default().library();
        let def = lib.by_marker(MarkerCode(2)).unwrap();
        assert_eq!(def.object_type, ObjectType::LightCube2);
        assert!(lib.is_unique(ObjectType::LightCube2));
        assert!(!lib.is_unique(ObjectType::CustomCuboid));
        assert!(lib.by_marker(MarkerCode(99)).is_none());
        assert_eq!(lib.size_of(ObjectType::CollisionObstacle), Dimensions::default());
    }

    #[test]
    fn standoff_per_action() {
        let cfg = PreActionConfig::default();
        assert!(cfg.standoff_mm(PreActionType::Entry) > cfg.standoff_mm(PreActionType::Docking));
    }
}
