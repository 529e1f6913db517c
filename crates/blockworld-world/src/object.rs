//! Per-object state.
//!
//! An [`ObjectRecord`] is the located (spatially tracked) view of a
//! physical object.  Its confidence follows a small state machine:
//!
//! ```text
//!            observed                    moved / collision
//!   (new) ───────────▶ Known ─────────────────────────────▶ Dirty
//!                        ▲                                   │
//!                        └────────────── observed ───────────┤
//!                                                            │ K misses
//!                                                            ▼
//!                                     evicted ◀── sweep ── Unknown
//! ```
//!
//! [`Tracking`] records how an object id is currently known: only over
//! comms, only spatially, or both.

use std::collections::VecDeque;

use blockworld_frames::FrameId;
use blockworld_types::{
    ActiveId, ObjectId, ObjectType, ObservedMarker, OriginId, PoseState, TimestampMs, UpAxis,
};
use serde::Serialize;

use crate::geometry::Dimensions;
use crate::pre_action::PreActionPoseCache;

/// Key of the located index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LocatedKey {
    pub origin: OriginId,
    pub object: ObjectId,
}

// ────────────────────────────────────────────────────────────────────────────
// Tracking
// ────────────────────────────────────────────────────────────────────────────

/// How an object id is currently tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Tracking {
    /// Connected over comms, pose never established (or cleared).
    CommsOnly { active_id: ActiveId },
    /// Seen by the camera, no comms link.
    SpatialOnly { located: LocatedKey },
    /// Both.
    Correlated {
        active_id: ActiveId,
        located: LocatedKey,
    },
}

impl Tracking {
    pub fn active_id(&self) -> Option<ActiveId> {
        match self {
            Tracking::CommsOnly { active_id } | Tracking::Correlated { active_id, .. } => {
                Some(*active_id)
            }
            Tracking::SpatialOnly { .. } => None,
        }
    }

    pub fn located(&self) -> Option<LocatedKey> {
        match self {
            Tracking::SpatialOnly { located } | Tracking::Correlated { located, .. } => {
                Some(*located)
            }
            Tracking::CommsOnly { .. } => None,
        }
    }

    /// The object gained (or moved) its spatial entry.
    pub fn with_location(self, located: LocatedKey) -> Tracking {
        match self.active_id() {
            Some(active_id) => Tracking::Correlated { active_id, located },
            None => Tracking::SpatialOnly { located },
        }
    }

    /// The spatial entry went away; `None` when nothing tracks the id any
    /// more.
    pub fn without_location(self) -> Option<Tracking> {
        self.active_id()
            .map(|active_id| Tracking::CommsOnly { active_id })
    }

    pub fn with_active_id(self, active_id: ActiveId) -> Tracking {
        match self.located() {
            Some(located) => Tracking::Correlated { active_id, located },
            None => Tracking::CommsOnly { active_id },
        }
    }

    pub fn without_active_id(self) -> Option<Tracking> {
        self.located()
            .map(|located| Tracking::SpatialOnly { located })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ObjectRecord
// ────────────────────────────────────────────────────────────────────────────

/// Located view of a tracked object.
#[derive(Debug, Clone)]
pub struct ObjectRecord {
    pub(crate) id: ObjectId,
    pub(crate) object_type: ObjectType,
    pub(crate) origin: OriginId,
    pub(crate) frame: FrameId,
    pub(crate) pose_state: PoseState,
    pub(crate) size: Dimensions,
    pub(crate) last_observed: Option<TimestampMs>,
    pub(crate) last_observed_tick: Option<u64>,
    pub(crate) times_observed: u32,
    pub(crate) times_unobserved: u32,
    pub(crate) is_moving: bool,
    pub(crate) is_carried: bool,
    pub(crate) active_id: Option<ActiveId>,
    pub(crate) recent_markers: VecDeque<ObservedMarker>,
    pub(crate) marker_capacity: usize,
    pub(crate) pre_action: PreActionPoseCache,
}

impl ObjectRecord {
    pub(crate) fn new(
        id: ObjectId,
        object_type: ObjectType,
        origin: OriginId,
        frame: FrameId,
        size: Dimensions,
        pose_state: PoseState,
        marker_capacity: usize,
    ) -> Self {
        Self {
            id,
            object_type,
            origin,
            frame,
            pose_state,
            size,
            last_observed: None,
            last_observed_tick: None,
            times_observed: 0,
            times_unobserved: 0,
            is_moving: false,
            is_carried: false,
            active_id: None,
            recent_markers: VecDeque::new(),
            marker_capacity,
            pre_action: PreActionPoseCache::default(),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn object_type(&self) -> ObjectType {
        self.object_type
    }

    pub fn origin(&self) -> OriginId {
        self.origin
    }

    /// Pose node in the frame tree.
    pub fn frame(&self) -> FrameId {
        self.frame
    }

    pub fn pose_state(&self) -> PoseState {
        self.pose_state
    }

    pub fn size(&self) -> Dimensions {
        self.size
    }

    pub fn last_observed(&self) -> Option<TimestampMs> {
        self.last_observed
    }

    pub fn times_observed(&self) -> u32 {
        self.times_observed
    }

    pub fn times_unobserved(&self) -> u32 {
        self.times_unobserved
    }

    pub fn is_moving(&self) -> bool {
        self.is_moving
    }

    pub fn is_carried(&self) -> bool {
        self.is_carried
    }

    pub fn active_id(&self) -> Option<ActiveId> {
        self.active_id
    }

    pub fn recent_markers(&self) -> impl Iterator<Item = &ObservedMarker> {
        self.recent_markers.iter()
    }

    pub fn key(&self) -> LocatedKey {
        LocatedKey {
            origin: self.origin,
            object: self.id,
        }
    }

    pub fn was_observed_on_tick(&self, tick: u64) -> bool {
        self.last_observed_tick == Some(tick)
    }

    pub fn pre_action_cache(&self) -> &PreActionPoseCache {
        &self.pre_action
    }

    // ── State machine ───────────────────────────────────────────────────────

    /// A fresh sighting: Known, not moving, miss counter reset.
    pub(crate) fn mark_observed(&mut self, marker: ObservedMarker, tick: u64) {
        self.pose_state = PoseState::Known;
        self.is_moving = false;
        self.times_unobserved = 0;
        self.times_observed = self.times_observed.saturating_add(1);
        self.last_observed = Some(marker.timestamp);
        self.last_observed_tick = Some(tick);
        if self.marker_capacity > 0 {
            if self.recent_markers.len() == self.marker_capacity {
                self.recent_markers.pop_front();
            }
            self.recent_markers.push_back(marker);
        }
    }

    /// Known → Dirty.  Returns whether the state changed.
    pub(crate) fn mark_dirty(&mut self) -> bool {
        if self.pose_state != PoseState::Known {
            return false;
        }
        self.pose_state = PoseState::Dirty;
        self.times_unobserved = 0;
        true
    }

    /// Count one missed tick.  Returns `true` when this miss pushed a Dirty
    /// object to Unknown.
    pub(crate) fn note_unobserved(&mut self, threshold: u32) -> bool {
        if self.pose_state != PoseState::Dirty {
            return false;
        }
        self.times_unobserved += 1;
        if self.times_unobserved >= threshold {
            self.pose_state = PoseState::Unknown;
            return true;
        }
        false
    }
}

/// Comms-side record for an object reachable over the radio link.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectedObject {
    pub active_id: ActiveId,
    pub object_id: ObjectId,
    pub object_type: ObjectType,
    pub hw_address: String,
    pub is_moving: bool,
    pub up_axis: Option<UpAxis>,
}
