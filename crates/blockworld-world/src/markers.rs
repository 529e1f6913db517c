//! Marker observation processing.
//!
//! Each tick the vision pipeline hands over a batch of decoded markers.  For
//! every marker the processor looks up what object carries it, estimates
//! the object's pose in the current origin through the robot's camera
//! frame, then either refreshes the matching object or creates a new one.
//!
//! Matching order:
//!
//! 1. the comms-connected object of that type, if any (for types with
//!    several instances, only when it is not located yet or sits within the
//!    match radius);
//! 2. the nearest same-typed object in the current origin within the match
//!    radius;
//! 3. for unique types, the same-typed object in any origin (this is how an
//!    object seen before a delocalization is picked up again).
//!
//! Objects the robot is carrying are never matched.

use blockworld_frames::{FrameId, Transform3D, Vec3};
use blockworld_types::{ObjectId, ObservedMarker, PoseState, WorldError};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{ObjectDefinition, WorldConfig};
use crate::filter::{ObjectFilter, OriginMode};
use crate::geometry::{MarkerPoseEstimator, PinholeEstimator};
use crate::world::ObjectWorld;

/// Outcome of one batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ObservationSummary {
    pub updated: Vec<ObjectId>,
    pub created: Vec<ObjectId>,
    /// Unknown codes, degenerate quads, and sightings of carried objects.
    pub ignored: usize,
}

enum Correlation {
    Existing(ObjectId),
    New,
    Ignore,
}

pub struct MarkerObservationProcessor {
    estimator: Box<dyn MarkerPoseEstimator>,
    unobserved_dirty_threshold: u32,
}

impl MarkerObservationProcessor {
    /// Processor with a custom pose estimator.
    pub fn new(estimator: Box<dyn MarkerPoseEstimator>, unobserved_dirty_threshold: u32) -> Self {
        Self {
            estimator,
            unobserved_dirty_threshold,
        }
    }

    /// Processor using the configured pinhole camera.
    pub fn from_config(config: &WorldConfig) -> Self {
        Self::new(
            Box::new(PinholeEstimator::from_config(&config.camera)),
            config.unobserved_dirty_threshold,
        )
    }

    pub fn unobserved_dirty_threshold(&self) -> u32 {
        self.unobserved_dirty_threshold
    }

    /// Fold a batch of detections into `world`.
    ///
    /// The robot pose for the batch's timestamp must already be applied to
    /// the frame tree: `camera_frame` is resolved against the current origin
    /// once, up front.
    pub fn process_markers(
        &self,
        world: &mut ObjectWorld,
        camera_frame: FrameId,
        markers: &[ObservedMarker],
        tick: u64,
    ) -> Result<ObservationSummary, WorldError> {
        let mut summary = ObservationSummary::default();
        if markers.is_empty() {
            return Ok(summary);
        }
        let origin_frame = world.origins().current_frame();
        let camera_wrt_origin = world
            .frames()
            .compose_with_respect_to(camera_frame, origin_frame)?;

        for marker in markers {
            let Some(def) = world.library().by_marker(marker.code).copied() else {
                warn!(error = %WorldError::UnknownMarker(marker.code), "ignoring marker");
                summary.ignored += 1;
                continue;
            };
            let Some(marker_wrt_camera) = self.estimator.estimate(&marker.quad, def.marker_size_mm)
            else {
                debug!(code = %marker.code, "degenerate marker quad");
                summary.ignored += 1;
                continue;
            };
            // The marker sits on the object's -X face.
            let object_pose = camera_wrt_origin
                .compose(marker_wrt_camera)
                .compose(Transform3D::from_translation(Vec3::new(def.size.x * 0.5, 0.0, 0.0)));

            match self.correlate(world, &def, object_pose) {
                Correlation::Existing(id) => {
                    let was_located = world.get_located_object_by_id(id).is_some();
                    world.set_object_pose(id, object_pose, PoseState::Known)?;
                    world.record_observation(id, *marker, tick)?;
                    debug!(object = %id, code = %marker.code, x = object_pose.translation.x, y = object_pose.translation.y, "object re-observed");
                    if was_located {
                        summary.updated.push(id);
                    } else {
                        summary.created.push(id);
                    }
                }
                Correlation::New => {
                    let id =
                        world.add_located_object(def.object_type, object_pose, PoseState::Known)?;
                    world.record_observation(id, *marker, tick)?;
                    summary.created.push(id);
                }
                Correlation::Ignore => {
                    debug!(code = %marker.code, "marker belongs to carried object");
                    summary.ignored += 1;
                }
            }
        }
        Ok(summary)
    }

    fn correlate(
        &self,
        world: &ObjectWorld,
        def: &ObjectDefinition,
        pose: Transform3D,
    ) -> Correlation {
        let carried = |id: ObjectId| {
            world
                .get_located_object_by_id(id)
                .is_some_and(|r| r.is_carried())
        };

        let tolerance = world.same_distance_tolerance_mm();
        let current = world.current_origin();
        let mut connected = world.connected_objects_of_type(def.object_type);
        let claimed = if def.unique {
            connected.next()
        } else {
            // Several objects share the type: a connected one only claims a
            // sighting where it could plausibly be.
            connected.find(|c| match world.get_located_object_by_id(c.object_id) {
                None => true,
                Some(r) => {
                    r.origin() == current
                        && world
                            .object_pose(r.id())
                            .is_ok_and(|p| p.translation.distance(pose.translation) <= tolerance)
                }
            })
        };
        if let Some(connected) = claimed {
            return if carried(connected.object_id) {
                Correlation::Ignore
            } else {
                Correlation::Existing(connected.object_id)
            };
        }

        let nearby = ObjectFilter::new()
            .of_type(def.object_type)
            .with_predicate(|r| !r.is_carried());
        if let Some(r) = world.find_located_closest_matching(&nearby, pose, tolerance) {
            return Correlation::Existing(r.id());
        }

        if def.unique {
            let anywhere = ObjectFilter::new()
                .of_type(def.object_type)
                .in_origin_mode(OriginMode::InAnyFrame);
            return match world.find_located_matching_object(&anywhere) {
                Some(r) if r.is_carried() => Correlation::Ignore,
                Some(r) => Correlation::Existing(r.id()),
                None => Correlation::New,
            };
        }
        Correlation::New
    }

    /// Count a miss for every Dirty, uncarried object in the current origin
    /// that was not seen on `tick`.  Returns the ids that just became
    /// Unknown.
    pub fn account_unobserved(
        &self,
        world: &mut ObjectWorld,
        tick: u64,
    ) -> Result<Vec<ObjectId>, WorldError> {
        let current = world.current_origin();
        let candidates: Vec<ObjectId> = world
            .located_objects()
            .filter(|r| {
                r.origin() == current
                    && !r.is_carried()
                    && r.pose_state() == PoseState::Dirty
                    && !r.was_observed_on_tick(tick)
            })
            .map(|r| r.id())
            .collect();

        let mut became_unknown = Vec::new();
        for id in candidates {
            if world.note_unobserved(id, self.unobserved_dirty_threshold)? {
                became_unknown.push(id);
            }
        }
        Ok(became_unknown)
    }
}
