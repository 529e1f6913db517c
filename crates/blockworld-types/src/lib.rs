//! Shared vocabulary for the BlockWorld crates: identifiers, object and
//! pose-state enums, the sensor/comms records the world model consumes, and
//! the [`WorldError`] taxonomy.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Milliseconds on the robot's monotonic clock.
pub type TimestampMs = u32;

macro_rules! id_newtype {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

id_newtype!(
    /// Stable identifier of a tracked object. Survives delocalization.
    ObjectId,
    "obj#"
);
id_newtype!(
    /// Identifier of one coordinate origin.
    OriginId,
    "origin#"
);
id_newtype!(
    /// Persistent identifier assigned by the wireless comms layer.
    ActiveId,
    "active#"
);
id_newtype!(
    /// Decoded fiducial marker code.
    MarkerCode,
    "marker#"
);

// ────────────────────────────────────────────────────────────────────────────
// Object vocabulary
// ────────────────────────────────────────────────────────────────────────────

/// Kind of physical object the world model can track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
    LightCube1,
    LightCube2,
    LightCube3,
    Charger,
    /// Passive marker-bearing cuboid; several instances may coexist.
    CustomCuboid,
    /// Markerless obstacle inferred from a collision.
    CollisionObstacle,
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ObjectType::LightCube1 => "light_cube_1",
            ObjectType::LightCube2 => "light_cube_2",
            ObjectType::LightCube3 => "light_cube_3",
            ObjectType::Charger => "charger",
            ObjectType::CustomCuboid => "custom_cuboid",
            ObjectType::CollisionObstacle => "collision_obstacle",
        };
        f.write_str(name)
    }
}

/// Confidence in an object's last modelled pose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoseState {
    /// Recently observed and not contradicted since.
    Known,
    /// There is evidence the object may have moved.
    Dirty,
    /// No longer trusted; evicted on the next sweep.
    Unknown,
}

impl PoseState {
    /// Known and Dirty poses are still usable for planning.
    pub fn is_valid(self) -> bool {
        !matches!(self, PoseState::Unknown)
    }
}

/// Which face of an active object points up, as reported over comms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpAxis {
    XNegative,
    XPositive,
    YNegative,
    YPositive,
    ZNegative,
    ZPositive,
}

/// Manipulation action a pre-action pose is generated for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreActionType {
    Docking,
    PlaceRelative,
    PlaceOnGround,
    Rolling,
    Entry,
}

// ────────────────────────────────────────────────────────────────────────────
// Sensor input
// ────────────────────────────────────────────────────────────────────────────

/// A pixel coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f32,
    pub y: f32,
}

impl Point2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Point2) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Image-space corners of a detected marker, ordered top-left, bottom-left,
/// top-right, bottom-right.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageQuad {
    pub corners: [Point2; 4],
}

impl ImageQuad {
    pub const TOP_LEFT: usize = 0;
    pub const BOTTOM_LEFT: usize = 1;
    pub const TOP_RIGHT: usize = 2;
    pub const BOTTOM_RIGHT: usize = 3;

    pub fn new(corners: [Point2; 4]) -> Self {
        Self { corners }
    }

    /// Axis-aligned square quad centred on `(cx, cy)` with side `side` pixels.
    pub fn square(cx: f32, cy: f32, side: f32) -> Self {
        let h = side * 0.5;
        Self::new([
            Point2::new(cx - h, cy - h),
            Point2::new(cx - h, cy + h),
            Point2::new(cx + h, cy - h),
            Point2::new(cx + h, cy + h),
        ])
    }

    /// Mean of the four corners.
    pub fn centroid(&self) -> Point2 {
        let (sx, sy) = self
            .corners
            .iter()
            .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
        Point2::new(sx / 4.0, sy / 4.0)
    }

    /// Mean length of the four edges, in pixels.
    pub fn mean_side_length(&self) -> f32 {
        let c = &self.corners;
        let edges = [
            c[Self::TOP_LEFT].distance(c[Self::BOTTOM_LEFT]),
            c[Self::TOP_RIGHT].distance(c[Self::BOTTOM_RIGHT]),
            c[Self::TOP_LEFT].distance(c[Self::TOP_RIGHT]),
            c[Self::BOTTOM_LEFT].distance(c[Self::BOTTOM_RIGHT]),
        ];
        edges.iter().sum::<f32>() / 4.0
    }
}

/// One marker detection handed over by the vision pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObservedMarker {
    pub code: MarkerCode,
    pub quad: ImageQuad,
    pub timestamp: TimestampMs,
}

/// Object lifecycle signals from the wireless comms layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ObjectEvent {
    Connected {
        active_id: ActiveId,
        hw_address: String,
        object_type: ObjectType,
    },
    Disconnected {
        active_id: ActiveId,
    },
    Moved {
        active_id: ActiveId,
        timestamp: TimestampMs,
    },
    StoppedMoving {
        active_id: ActiveId,
        timestamp: TimestampMs,
    },
    UpAxisChanged {
        active_id: ActiveId,
        up_axis: UpAxis,
    },
}

impl ObjectEvent {
    pub fn active_id(&self) -> ActiveId {
        match self {
            ObjectEvent::Connected { active_id, .. }
            | ObjectEvent::Disconnected { active_id }
            | ObjectEvent::Moved { active_id, .. }
            | ObjectEvent::StoppedMoving { active_id, .. }
            | ObjectEvent::UpAxisChanged { active_id, .. } => *active_id,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Failures surfaced by the frame tree and the object world.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorldError {
    /// A handle or id that does not name a live entity.
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    #[error("Frames '{from}' and '{to}' do not share an origin")]
    DifferentOrigin { from: String, to: String },

    /// Parent walk exceeded the depth cap, or a re-parent would close a loop.
    #[error("Cycle detected at frame '{frame}'")]
    CycleDetected { frame: String },

    #[error("{active_id} already registered as {registered}, cannot register as {requested}")]
    DuplicateActiveId {
        active_id: ActiveId,
        registered: ObjectType,
        requested: ObjectType,
    },

    #[error("No object definition for {0}")]
    UnknownMarker(MarkerCode),
}
