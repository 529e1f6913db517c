//! Tick orchestrator.
//!
//! [`BlockWorld`] owns the object world together with the robot's own pose
//! node and camera mount, and runs the per-tick pipeline:
//!
//! 1. evict objects that went Unknown on the previous tick;
//! 2. apply the robot pose for this tick;
//! 3. apply comms events (connect, disconnect, moved, stopped, up-axis);
//! 4. fold in marker detections;
//! 5. count misses for Dirty objects that were not seen;
//! 6. dirty Known objects the robot's body now overlaps.
//!
//! Everything runs synchronously on the caller's thread.

use blockworld_frames::{FrameId, Quaternion, Transform3D, Vec3};
use blockworld_types::{
    ObjectEvent, ObjectId, ObservedMarker, OriginId, PreActionType, TimestampMs, WorldError,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::collision::CollisionChecker;
use crate::config::WorldConfig;
use crate::filter::ObjectFilter;
use crate::geometry::MarkerPoseEstimator;
use crate::markers::{MarkerObservationProcessor, ObservationSummary};
use crate::observer::WorldObserver;
use crate::pre_action::{PreActionLookup, PreActionPoseGenerator};
use crate::world::ObjectWorld;

/// Robot pose in the current origin at `timestamp`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RobotPoseUpdate {
    pub timestamp: TimestampMs,
    pub pose: Transform3D,
}

/// Everything that arrived for one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickInput {
    #[serde(default)]
    pub robot_pose: Option<RobotPoseUpdate>,
    #[serde(default)]
    pub events: Vec<ObjectEvent>,
    #[serde(default)]
    pub markers: Vec<ObservedMarker>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickSummary {
    pub tick: u64,
    pub evicted: Vec<ObjectId>,
    pub observation: ObservationSummary,
    pub became_unknown: Vec<ObjectId>,
    pub collided: Vec<ObjectId>,
    pub rejected_events: usize,
}

pub struct BlockWorld {
    world: ObjectWorld,
    robot_frame: FrameId,
    camera_frame: FrameId,
    processor: MarkerObservationProcessor,
    collision: CollisionChecker,
    pre_action: PreActionPoseGenerator,
    tick: u64,
    last_pose_timestamp: Option<TimestampMs>,
}

impl BlockWorld {
    /// World using the configured pinhole camera.
    pub fn new(config: &WorldConfig) -> Result<Self, WorldError> {
        Self::build(config, MarkerObservationProcessor::from_config(config))
    }

    /// World with a custom marker pose estimator.
    pub fn with_estimator(
        config: &WorldConfig,
        estimator: Box<dyn MarkerPoseEstimator>,
    ) -> Result<Self, WorldError> {
        Self::build(
            config,
            MarkerObservationProcessor::new(estimator, config.unobserved_dirty_threshold),
        )
    }

    fn build(
        config: &WorldConfig,
        processor: MarkerObservationProcessor,
    ) -> Result<Self, WorldError> {
        let mut world = ObjectWorld::new(config);
        let origin = world.origins().current_frame();
        let robot_frame = world
            .frames_mut()
            .create_node(Some(origin), Transform3D::identity(), "robot")?;
        let cam = &config.camera;
        let camera_mount = Transform3D::new(
            Vec3::new(cam.mount_x_mm, cam.mount_y_mm, cam.mount_z_mm),
            Quaternion::from_axis_angle(Vec3::new(0.0, 1.0, 0.0), cam.pitch_rad),
        );
        let camera_frame = world
            .frames_mut()
            .create_node(Some(robot_frame), camera_mount, "camera")?;

        Ok(Self {
            world,
            robot_frame,
            camera_frame,
            processor,
            collision: CollisionChecker::new(config.robot),
            pre_action: PreActionPoseGenerator::new(config.pre_action),
            tick: 0,
            last_pose_timestamp: None,
        })
    }

    pub fn set_observer(&mut self, observer: Box<dyn WorldObserver>) {
        self.world.set_observer(observer);
    }

    pub fn world(&self) -> &ObjectWorld {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut ObjectWorld {
        &mut self.world
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn robot_frame(&self) -> FrameId {
        self.robot_frame
    }

    pub fn camera_frame(&self) -> FrameId {
        self.camera_frame
    }

    pub fn current_origin(&self) -> OriginId {
        self.world.current_origin()
    }

    // ── Per-tick pipeline ───────────────────────────────────────────────────

    /// Run one tick.
    pub fn update(&mut self, input: TickInput) -> Result<TickSummary, WorldError> {
        self.tick += 1;
        let evicted = self.check_for_unobserved_objects();

        if let Some(pose) = input.robot_pose {
            self.set_robot_pose(pose)?;
        }

        let mut rejected_events = 0;
        for event in &input.events {
            if let Err(e) = self.handle_object_event(event) {
                warn!(active_id = %event.active_id(), error = %e, "object event rejected");
                rejected_events += 1;
            }
        }

        let observation = self.process_markers(&input.markers)?;
        let became_unknown = self.processor.account_unobserved(&mut self.world, self.tick)?;
        let collided = self.check_for_collisions()?;

        Ok(TickSummary {
            tick: self.tick,
            evicted,
            observation,
            became_unknown,
            collided,
            rejected_events,
        })
    }

    /// Move the robot within the current origin.
    pub fn set_robot_pose(&mut self, update: RobotPoseUpdate) -> Result<(), WorldError> {
        self.world
            .frames_mut()
            .set_transform(self.robot_frame, update.pose)?;
        self.last_pose_timestamp = Some(update.timestamp);
        self.invalidate_carried_pre_action_poses();
        Ok(())
    }

    /// Poses around a carried object move with the robot.
    fn invalidate_carried_pre_action_poses(&mut self) {
        if let Some(id) = self.carried_object() {
            self.world.invalidate_pre_action_poses(id);
        }
    }

    /// Robot pose in the current origin.
    pub fn robot_pose(&self) -> Result<Transform3D, WorldError> {
        self.world
            .frames()
            .compose_with_respect_to(self.robot_frame, self.world.origins().current_frame())
    }

    /// Fold marker detections into the world.  The robot pose for their
    /// timestamp is expected to have been applied already.
    pub fn process_markers(
        &mut self,
        markers: &[ObservedMarker],
    ) -> Result<ObservationSummary, WorldError> {
        if let Some(newest) = markers.iter().map(|m| m.timestamp).max()
            && self.last_pose_timestamp.is_none_or(|t| newest > t)
        {
            warn!(
                marker_ts = newest,
                pose_ts = ?self.last_pose_timestamp,
                "markers are newer than the last robot pose"
            );
        }
        self.processor
            .process_markers(&mut self.world, self.camera_frame, markers, self.tick)
    }

    /// Apply one comms-layer signal.
    pub fn handle_object_event(&mut self, event: &ObjectEvent) -> Result<(), WorldError> {
        match event {
            ObjectEvent::Connected {
                active_id,
                hw_address,
                object_type,
            } => {
                self.world
                    .add_connected_object(*active_id, hw_address, *object_type)?;
            }
            ObjectEvent::Disconnected { active_id } => {
                if self.world.remove_connected_object(*active_id).is_none() {
                    debug!(active_id = %active_id, "disconnect for unknown object");
                }
            }
            ObjectEvent::Moved { active_id, .. } => {
                let id = self
                    .world
                    .set_connected_motion(*active_id, Some(true), None)?;
                self.apply_movement(id, true)?;
            }
            ObjectEvent::StoppedMoving { active_id, .. } => {
                let id = self
                    .world
                    .set_connected_motion(*active_id, Some(false), None)?;
                if self.world.get_located_object_by_id(id).is_some() {
                    self.world.set_moving(id, false)?;
                }
            }
            ObjectEvent::UpAxisChanged { active_id, up_axis } => {
                let id = self
                    .world
                    .set_connected_motion(*active_id, None, Some(*up_axis))?;
                self.apply_movement(id, false)?;
            }
        }
        Ok(())
    }

    /// Movement evidence for a located, uncarried object: Dirty, and
    /// optionally flagged moving.
    fn apply_movement(&mut self, id: ObjectId, set_moving: bool) -> Result<(), WorldError> {
        let Some(record) = self.world.get_located_object_by_id(id) else {
            return Ok(());
        };
        if record.is_carried() {
            debug!(object = %id, "ignoring movement of carried object");
            return Ok(());
        }
        self.world.mark_dirty(id)?;
        if set_moving {
            self.world.set_moving(id, true)?;
        }
        Ok(())
    }

    /// Evict every object that has gone Unknown.
    pub fn check_for_unobserved_objects(&mut self) -> Vec<ObjectId> {
        self.world.delete_unknown_objects()
    }

    /// Dirty every Known object the robot body currently overlaps.
    pub fn check_for_collisions(&mut self) -> Result<Vec<ObjectId>, WorldError> {
        let robot_pose = self.robot_pose()?;
        let hits = self
            .collision
            .find_colliding_objects(&self.world, robot_pose, self.tick);
        for id in &hits {
            self.world.mark_dirty(*id)?;
        }
        Ok(hits)
    }

    // ── Origins ─────────────────────────────────────────────────────────────

    /// Forget where the robot is: start a new origin with the robot at its
    /// centre.  A carried object comes along; everything else stays behind.
    pub fn delocalize(&mut self) -> Result<OriginId, WorldError> {
        let carried = self.carried_object();
        let origin = self.world.delocalize();
        let frame = self.world.origins().current_frame();
        let frames = self.world.frames_mut();
        frames.set_parent(self.robot_frame, Some(frame))?;
        frames.set_transform(self.robot_frame, Transform3D::identity())?;
        if let Some(id) = carried {
            self.world.adopt_into_current_origin(id)?;
            self.world.invalidate_pre_action_poses(id);
        }
        let retired = self.world.retire_zombie_origins();
        info!(origin = %origin, retired = retired.len(), "robot delocalized");
        Ok(origin)
    }

    /// Recognised that the current origin sits at `current_wrt_target`
    /// inside the older origin `target`: merge into it.
    pub fn relocalize_to_origin(
        &mut self,
        target: OriginId,
        current_wrt_target: Transform3D,
    ) -> Result<(), WorldError> {
        let current = self.current_origin();
        self.world
            .merge_origin_into(current, target, current_wrt_target)?;
        self.invalidate_carried_pre_action_poses();
        info!(from = %current, to = %target, "robot relocalized");
        Ok(())
    }

    // ── Carrying ────────────────────────────────────────────────────────────

    /// The object currently on the lift, if any.
    pub fn carried_object(&self) -> Option<ObjectId> {
        self.world
            .located_objects()
            .find(|r| r.is_carried())
            .map(|r| r.id())
    }

    /// Attach `id` to the robot.  Any previously carried object is put down
    /// where it is.
    pub fn set_carried_object(&mut self, id: ObjectId) -> Result<(), WorldError> {
        if let Some(previous) = self.carried_object()
            && previous != id
        {
            self.world.detach_to_origin(previous)?;
        }
        self.world.attach_to(id, self.robot_frame)?;
        debug!(object = %id, "carrying object");
        Ok(())
    }

    /// Put the carried object down where it is and return its id.
    pub fn clear_carried_object(&mut self) -> Result<Option<ObjectId>, WorldError> {
        let Some(id) = self.carried_object() else {
            return Ok(None);
        };
        self.world.detach_to_origin(id)?;
        Ok(Some(id))
    }

    // ── Queries ─────────────────────────────────────────────────────────────

    /// Pose of object `id` as seen from the robot.  Fails with
    /// [`WorldError::DifferentOrigin`] for objects left behind in an older
    /// origin.
    pub fn compose_robot_to_object(&self, id: ObjectId) -> Result<Transform3D, WorldError> {
        let record = self
            .world
            .get_located_object_by_id(id)
            .ok_or_else(|| WorldError::InvalidReference(format!("{id} is not located")))?;
        self.world
            .frames()
            .compose_with_respect_to(record.frame(), self.robot_frame)
    }

    /// Pre-action poses for every current-origin object matching `filter`,
    /// each list ordered nearest-first from the robot.
    pub fn get_current_pre_action_poses(
        &mut self,
        action: PreActionType,
        filter: &ObjectFilter,
    ) -> Result<Vec<PreActionLookup>, WorldError> {
        let robot = self.robot_pose()?.translation;
        let current = self.current_origin();
        let ids: Vec<ObjectId> = self
            .world
            .find_located_matching_objects(filter)
            .into_iter()
            .filter(|r| r.origin() == current)
            .map(|r| r.id())
            .collect();

        let mut lookups = Vec::with_capacity(ids.len());
        for id in ids {
            let mut lookup = self.world.pre_action_poses(id, action, &self.pre_action)?;
            lookup.poses.sort_by(|a, b| {
                a.pose
                    .translation
                    .distance(robot)
                    .total_cmp(&b.pose.translation.distance(robot))
            });
            lookups.push(lookup);
        }
        Ok(lookups)
    }
}
