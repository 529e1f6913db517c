//! Dual-indexed object store.
//!
//! [`ObjectWorld`] owns the frame tree and the origins, plus two indices
//! over the same objects:
//!
//! - **located** – keyed by `(origin, object id)`; every entry has a pose
//!   node anchored in that origin.
//! - **connected** – keyed by [`ActiveId`]; objects reachable over comms,
//!   whether or not their pose is known.
//!
//! The [`Tracking`] map ties the two together per object id.

use std::collections::{BTreeMap, HashMap, HashSet};

use blockworld_frames::{FrameId, FrameTree, OriginManager, Transform3D};
use blockworld_types::{
    ActiveId, ObjectId, ObjectType, ObservedMarker, OriginId, PoseState, PreActionType,
    TimestampMs, UpAxis, WorldError,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{ObjectLibrary, WorldConfig};
use crate::filter::ObjectFilter;
use crate::geometry::{Aabb, Dimensions, OrientedRect};
use crate::object::{ConnectedObject, LocatedKey, ObjectRecord, Tracking};
use crate::observer::{WorldEvent, WorldObserver};
use crate::pre_action::{PreActionLookup, PreActionPoseGenerator};

/// Poses closer than this are considered unchanged.
const POSE_EPSILON_MM: f32 = 0.01;
const POSE_EPSILON_RAD: f32 = 1e-3;

/// Vertical slack when deciding whether one object rests on another.
const STACK_Z_TOLERANCE_MM: f32 = 15.0;

/// Serializable view of one located object.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LocatedObjectSnapshot {
    pub id: ObjectId,
    pub object_type: ObjectType,
    pub origin: OriginId,
    pub pose: Transform3D,
    pub pose_state: PoseState,
    pub is_carried: bool,
    pub active_id: Option<ActiveId>,
    pub last_observed: Option<TimestampMs>,
}

pub struct ObjectWorld {
    frames: FrameTree,
    origins: OriginManager,
    library: ObjectLibrary,
    located: BTreeMap<LocatedKey, ObjectRecord>,
    connected: BTreeMap<ActiveId, ConnectedObject>,
    tracking: HashMap<ObjectId, Tracking>,
    next_object_id: u32,
    marker_capacity: usize,
    same_distance_tolerance_mm: f32,
    observer: Option<Box<dyn WorldObserver>>,
}

impl ObjectWorld {
    /// Empty world with a single origin.
    pub fn new(config: &WorldConfig) -> Self {
        let mut frames = FrameTree::new();
        let origins = OriginManager::new(&mut frames);
        Self {
            frames,
            origins,
            library: config.library(),
            located: BTreeMap::new(),
            connected: BTreeMap::new(),
            tracking: HashMap::new(),
            next_object_id: 1,
            marker_capacity: config.recent_marker_capacity,
            same_distance_tolerance_mm: config.same_distance_tolerance_mm,
            observer: None,
        }
    }

    /// Install the observer notified of every world change.
    pub fn set_observer(&mut self, observer: Box<dyn WorldObserver>) {
        self.observer = Some(observer);
    }

    fn emit(&mut self, event: WorldEvent) {
        if let Some(observer) = self.observer.as_mut() {
            observer.notify(&event);
        }
    }

    fn allocate_id(&mut self) -> ObjectId {
        let id = ObjectId(self.next_object_id);
        self.next_object_id += 1;
        id
    }

    // ── Frames and origins ──────────────────────────────────────────────────

    pub fn frames(&self) -> &FrameTree {
        &self.frames
    }

    pub fn frames_mut(&mut self) -> &mut FrameTree {
        &mut self.frames
    }

    pub fn origins(&self) -> &OriginManager {
        &self.origins
    }

    pub fn current_origin(&self) -> OriginId {
        self.origins.current_origin_id()
    }

    pub fn library(&self) -> &ObjectLibrary {
        &self.library
    }

    /// Radius within which a sighting matches an existing object.
    pub fn same_distance_tolerance_mm(&self) -> f32 {
        self.same_distance_tolerance_mm
    }

    /// Start a new origin.  Existing located objects stay where they are.
    pub fn delocalize(&mut self) -> OriginId {
        let previous = self.current_origin();
        let current = self.origins.delocalize(&mut self.frames);
        self.emit(WorldEvent::OriginChanged { previous, current });
        current
    }

    /// A non-current origin with nothing left in it.
    pub fn is_zombie_origin(&self, origin: OriginId) -> bool {
        origin != self.current_origin()
            && self.origins.is_origin_valid(origin)
            && !self.located.keys().any(|k| k.origin == origin)
    }

    /// Retire every zombie origin.  Returns the retired ids.
    pub fn retire_zombie_origins(&mut self) -> Vec<OriginId> {
        let zombies: Vec<OriginId> = self
            .origins
            .origins()
            .filter(|o| self.is_zombie_origin(*o))
            .collect();
        let mut retired = Vec::with_capacity(zombies.len());
        for origin in zombies {
            match self.origins.retire(&mut self.frames, origin) {
                Ok(()) => retired.push(origin),
                Err(e) => warn!(origin = %origin, error = %e, "failed to retire zombie origin"),
            }
        }
        retired
    }

    /// Fold origin `old` into `target`, given the pose of `old`'s frame in
    /// `target`.
    ///
    /// Objects of `old` move into `target`.  When an object of `old` lands
    /// within tolerance of a same-typed object already in `target`, the two
    /// are merged: the comms-correlated one survives, otherwise the target's
    /// id survives and takes the newer pose from `old`.  If `old` was
    /// current, `target` becomes current.  `old` is then retired.
    pub fn merge_origin_into(
        &mut self,
        old: OriginId,
        target: OriginId,
        old_wrt_target: Transform3D,
    ) -> Result<(), WorldError> {
        if old == target {
            return Ok(());
        }
        let old_frame = self
            .origins
            .frame_of(old)
            .ok_or_else(|| WorldError::InvalidReference(format!("unknown {old}")))?;
        let target_frame = self
            .origins
            .frame_of(target)
            .ok_or_else(|| WorldError::InvalidReference(format!("unknown {target}")))?;

        if self.frames.is_ancestor(old_frame, target_frame)? {
            return Err(WorldError::CycleDetected {
                frame: format!("{target} already hangs under {old}"),
            });
        }

        let was_current = old == self.current_origin();
        if was_current {
            self.origins.set_current(target)?;
        }
        self.frames.set_parent(old_frame, Some(target_frame))?;
        self.frames.set_transform(old_frame, old_wrt_target)?;

        let keys: Vec<LocatedKey> = self
            .located
            .keys()
            .filter(|k| k.origin == old)
            .copied()
            .collect();
        let resident: HashSet<LocatedKey> = self
            .located
            .keys()
            .filter(|k| k.origin == target)
            .copied()
            .collect();
        for key in keys {
            self.merge_located_into(key, target, target_frame, &resident)?;
        }

        self.origins.retire(&mut self.frames, old)?;
        info!(old = %old, target = %target, "origins merged");
        if was_current {
            self.emit(WorldEvent::OriginChanged {
                previous: old,
                current: target,
            });
        }
        Ok(())
    }

    /// `resident` holds the keys that were in the target before the merge;
    /// only those are duplicate candidates.
    fn merge_located_into(
        &mut self,
        key: LocatedKey,
        target: OriginId,
        target_frame: FrameId,
        resident: &HashSet<LocatedKey>,
    ) -> Result<(), WorldError> {
        let (frame, object_type, is_carried, has_comms) = match self.located.get(&key) {
            Some(r) => (r.frame, r.object_type, r.is_carried, r.active_id.is_some()),
            None => return Ok(()),
        };
        let pose = self.frames.compose_with_respect_to(frame, target_frame)?;

        let duplicate = if is_carried {
            None
        } else {
            self.located
                .values()
                .filter(|r| {
                    resident.contains(&r.key()) && r.object_type == object_type && !r.is_carried
                })
                .filter_map(|r| {
                    let p = self.frames.compose_with_respect_to(r.frame, target_frame).ok()?;
                    let d = p.translation.distance(pose.translation);
                    (d <= self.same_distance_tolerance_mm).then_some((r.key(), r.active_id, d))
                })
                .min_by(|a, b| a.2.total_cmp(&b.2))
        };

        match duplicate {
            Some((dup_key, dup_active, _)) if has_comms && dup_active.is_none() => {
                debug!(kept = %key.object, dropped = %dup_key.object, "merge keeps correlated object");
                self.remove_located(dup_key);
                self.rekey(key, target);
            }
            Some((dup_key, _, _)) => {
                let (state, last_observed, last_tick) = match self.located.get(&key) {
                    Some(r) => (r.pose_state, r.last_observed, r.last_observed_tick),
                    None => return Ok(()),
                };
                self.remove_located(key);
                if let Some(dup) = self.located.get_mut(&dup_key) {
                    self.frames.set_transform(dup.frame, pose)?;
                    dup.pose_state = state;
                    dup.last_observed = last_observed;
                    dup.last_observed_tick = last_tick;
                    dup.pre_action.invalidate();
                }
                debug!(kept = %dup_key.object, dropped = %key.object, "merge folded duplicate");
            }
            None => self.rekey(key, target),
        }
        Ok(())
    }

    /// Move a located entry to another origin's key without touching its
    /// frame.
    fn rekey(&mut self, key: LocatedKey, origin: OriginId) {
        if let Some(mut record) = self.located.remove(&key) {
            record.origin = origin;
            record.pre_action.invalidate();
            let new_key = record.key();
            self.located.insert(new_key, record);
            self.retrack(key.object, |t| Some(t.with_location(new_key)));
        }
    }

    /// Re-key an object whose frame already hangs off something in the
    /// current origin (a carried object after the robot moved origins).
    pub(crate) fn adopt_into_current_origin(&mut self, id: ObjectId) -> Result<(), WorldError> {
        let key = self
            .key_of(id)
            .ok_or_else(|| WorldError::InvalidReference(format!("{id} is not located")))?;
        let current = self.current_origin();
        if key.origin != current {
            self.rekey(key, current);
        }
        Ok(())
    }

    fn retrack(&mut self, id: ObjectId, f: impl FnOnce(Tracking) -> Option<Tracking>) {
        if let Some(t) = self.tracking.remove(&id)
            && let Some(next) = f(t)
        {
            self.tracking.insert(id, next);
        }
    }

    // ── Located: lookup ─────────────────────────────────────────────────────

    /// How `id` is currently tracked, if at all.
    pub fn tracking(&self, id: ObjectId) -> Option<&Tracking> {
        self.tracking.get(&id)
    }

    fn key_of(&self, id: ObjectId) -> Option<LocatedKey> {
        self.tracking.get(&id).and_then(|t| t.located())
    }

    /// Located record for `id`, in whichever origin it lives.
    pub fn get_located_object_by_id(&self, id: ObjectId) -> Option<&ObjectRecord> {
        self.key_of(id).and_then(|k| self.located.get(&k))
    }

    pub(crate) fn located_mut(&mut self, id: ObjectId) -> Option<&mut ObjectRecord> {
        let key = self.key_of(id)?;
        self.located.get_mut(&key)
    }

    fn located_or_err(&self, id: ObjectId) -> Result<&ObjectRecord, WorldError> {
        self.get_located_object_by_id(id)
            .ok_or_else(|| WorldError::InvalidReference(format!("{id} is not located")))
    }

    pub fn located_objects(&self) -> impl Iterator<Item = &ObjectRecord> {
        self.located.values()
    }

    pub fn located_len(&self) -> usize {
        self.located.len()
    }

    /// Pose of `id` in its own origin.
    pub fn object_pose(&self, id: ObjectId) -> Result<Transform3D, WorldError> {
        let record = self.located_or_err(id)?;
        self.record_pose(record)
    }

    fn record_pose(&self, record: &ObjectRecord) -> Result<Transform3D, WorldError> {
        let origin_frame = self.origins.frame_of(record.origin).ok_or_else(|| {
            WorldError::InvalidReference(format!("{} lives in unknown {}", record.id, record.origin))
        })?;
        self.frames.compose_with_respect_to(record.frame, origin_frame)
    }

    /// Every located object passing `filter`.
    pub fn find_located_matching_objects(&self, filter: &ObjectFilter) -> Vec<&ObjectRecord> {
        let current = self.current_origin();
        self.located
            .values()
            .filter(|r| filter.matches(r, current))
            .collect()
    }

    /// First located object passing `filter`, in origin then id order.
    pub fn find_located_matching_object(&self, filter: &ObjectFilter) -> Option<&ObjectRecord> {
        let current = self.current_origin();
        self.located.values().find(|r| filter.matches(r, current))
    }

    /// Closest current-origin match to `pose` within `max_distance_mm`.
    pub fn find_located_closest_matching(
        &self,
        filter: &ObjectFilter,
        pose: Transform3D,
        max_distance_mm: f32,
    ) -> Option<&ObjectRecord> {
        let current = self.current_origin();
        self.located
            .values()
            .filter(|r| r.origin == current && filter.matches(r, current))
            .filter_map(|r| {
                let p = self.record_pose(r).ok()?;
                let d = p.translation.distance(pose.translation);
                (d <= max_distance_mm).then_some((r, d))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(r, _)| r)
    }

    /// Current-origin matches whose padded bounding box touches `region`.
    pub fn find_located_intersecting_objects(
        &self,
        filter: &ObjectFilter,
        region: &Aabb,
        padding_mm: f32,
    ) -> Vec<&ObjectRecord> {
        let current = self.current_origin();
        self.located
            .values()
            .filter(|r| r.origin == current && filter.matches(r, current))
            .filter(|r| {
                self.record_pose(r)
                    .map(|p| Aabb::enclosing(p, r.size).expanded(padding_mm).overlaps(region))
                    .unwrap_or(false)
            })
            .collect()
    }

    /// Matching object with the latest observation timestamp.  Objects never
    /// seen by the camera are skipped.
    pub fn find_most_recently_observed(&self, filter: &ObjectFilter) -> Option<&ObjectRecord> {
        let current = self.current_origin();
        self.located
            .values()
            .filter(|r| r.last_observed.is_some() && filter.matches(r, current))
            .max_by_key(|r| r.last_observed)
    }

    /// Object resting directly on top of `id`, if any.
    pub fn find_located_object_on_top_of(&self, id: ObjectId) -> Option<&ObjectRecord> {
        let base = self.get_located_object_by_id(id)?;
        let base_pose = self.record_pose(base).ok()?;
        let top_z = base_pose.translation.z + base.size.z * 0.5;
        let reach = base.size.x.max(base.size.y) * 0.5;
        self.located
            .values()
            .filter(|r| r.origin == base.origin && r.id != id && !r.is_carried)
            .filter_map(|r| {
                let p = self.record_pose(r).ok()?;
                let bottom = p.translation.z - r.size.z * 0.5;
                let d = p.translation.distance_xy(base_pose.translation);
                ((bottom - top_z).abs() <= STACK_Z_TOLERANCE_MM && d <= reach).then_some((r, d))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(r, _)| r)
    }

    /// Serializable view of every located object, poses in their origin.
    pub fn snapshot(&self) -> Vec<LocatedObjectSnapshot> {
        self.located
            .values()
            .filter_map(|r| {
                Some(LocatedObjectSnapshot {
                    id: r.id,
                    object_type: r.object_type,
                    origin: r.origin,
                    pose: self.record_pose(r).ok()?,
                    pose_state: r.pose_state,
                    is_carried: r.is_carried,
                    active_id: r.active_id,
                    last_observed: r.last_observed,
                })
            })
            .collect()
    }

    // ── Located: mutation ───────────────────────────────────────────────────

    /// Create a new spatially tracked object in the current origin.
    pub fn add_located_object(
        &mut self,
        object_type: ObjectType,
        pose: Transform3D,
        state: PoseState,
    ) -> Result<ObjectId, WorldError> {
        let id = self.allocate_id();
        let size = self.library.size_of(object_type);
        self.create_located(id, object_type, size, pose, state)?;
        Ok(id)
    }

    /// Markerless obstacle the robot ran into.  Returns `None` without
    /// adding anything when the space is already taken by a current-origin
    /// object.
    pub fn add_collision_obstacle(
        &mut self,
        pose: Transform3D,
        size: Dimensions,
    ) -> Result<Option<ObjectId>, WorldError> {
        let occupied = self.find_overlapping(pose, size, |r| !r.is_carried);
        if let Some(existing) = occupied.first() {
            debug!(existing = %existing.object, "obstacle overlaps a known object, not added");
            return Ok(None);
        }
        let id = self.allocate_id();
        self.create_located(id, ObjectType::CollisionObstacle, size, pose, PoseState::Dirty)?;
        Ok(Some(id))
    }

    /// Keys of current-origin objects accepted by `keep` whose box overlaps
    /// a box of `size` at `pose`.
    fn find_overlapping(
        &self,
        pose: Transform3D,
        size: Dimensions,
        keep: impl Fn(&ObjectRecord) -> bool,
    ) -> Vec<LocatedKey> {
        let current = self.current_origin();
        let footprint = OrientedRect::footprint(pose, size);
        self.located
            .values()
            .filter(|r| r.origin == current && keep(r))
            .filter(|r| {
                let Ok(p) = self.record_pose(r) else {
                    return false;
                };
                let dz = (p.translation.z - pose.translation.z).abs();
                dz <= (size.z + r.size.z) * 0.5
                    && footprint.intersects(&OrientedRect::footprint(p, r.size))
            })
            .map(|r| r.key())
            .collect()
    }

    fn create_located(
        &mut self,
        id: ObjectId,
        object_type: ObjectType,
        size: Dimensions,
        pose: Transform3D,
        state: PoseState,
    ) -> Result<(), WorldError> {
        if object_type != ObjectType::CollisionObstacle {
            let stale = self.find_overlapping(pose, size, |r| {
                r.object_type == ObjectType::CollisionObstacle
            });
            for key in stale {
                info!(obstacle = %key.object, object = %id, "obstacle replaced by located object");
                self.remove_located(key);
            }
        }
        let origin = self.current_origin();
        let frame = self.frames.create_node(
            Some(self.origins.current_frame()),
            pose,
            format!("{object_type} {id}"),
        )?;
        let mut record = ObjectRecord::new(
            id,
            object_type,
            origin,
            frame,
            size,
            state,
            self.marker_capacity,
        );
        let prior = self.tracking.get(&id).copied();
        record.active_id = prior.and_then(|t| t.active_id());
        let key = record.key();
        self.located.insert(key, record);
        let tracking = match prior {
            Some(t) => t.with_location(key),
            None => Tracking::SpatialOnly { located: key },
        };
        self.tracking.insert(id, tracking);

        info!(object = %id, object_type = %object_type, origin = %origin, ?state, "located object created");
        self.emit(WorldEvent::ObjectCreated {
            id,
            object_type,
            origin,
            pose,
        });
        Ok(())
    }

    /// Set the pose of `id` relative to the current origin.
    ///
    /// Creates the located entry for an object known only over comms, and
    /// migrates an entry living in another origin.  The object's pre-action
    /// cache is dropped when the pose actually changed.  Returns whether it
    /// did.
    pub fn set_object_pose(
        &mut self,
        id: ObjectId,
        pose: Transform3D,
        state: PoseState,
    ) -> Result<bool, WorldError> {
        let Some(key) = self.key_of(id) else {
            let connected_type = self
                .get_connected_by_object_id(id)
                .map(|c| c.object_type)
                .ok_or_else(|| WorldError::InvalidReference(format!("unknown {id}")))?;
            let size = self.library.size_of(connected_type);
            self.create_located(id, connected_type, size, pose, state)?;
            return Ok(true);
        };

        let current = self.current_origin();
        let current_frame = self.origins.current_frame();
        let old_pose = self.object_pose(id)?;
        let frame = self.located_or_err(id)?.frame;
        self.frames.set_parent(frame, Some(current_frame))?;
        self.frames.set_transform(frame, pose)?;

        let changed =
            key.origin != current || !old_pose.is_near(pose, POSE_EPSILON_MM, POSE_EPSILON_RAD);
        let Some(mut record) = self.located.remove(&key) else {
            return Err(WorldError::InvalidReference(format!("{id} vanished")));
        };
        let old_state = record.pose_state;
        record.origin = current;
        record.is_carried = false;
        record.pose_state = state;
        if old_state != state {
            record.times_unobserved = 0;
        }
        if changed {
            record.pre_action.invalidate();
        }
        let new_key = record.key();
        self.located.insert(new_key, record);
        self.retrack(id, |t| Some(t.with_location(new_key)));

        if key.origin != current {
            info!(object = %id, from = %key.origin, to = %current, "object migrated to current origin");
        }
        self.emit(WorldEvent::PoseUpdated {
            id,
            origin: current,
            pose,
            state,
        });
        if old_state != state {
            self.emit(WorldEvent::PoseStateChanged {
                id,
                old_state,
                new_state: state,
            });
        }
        Ok(changed)
    }

    fn remove_located(&mut self, key: LocatedKey) -> Option<ObjectRecord> {
        let record = self.located.remove(&key)?;
        if let Err(e) = self.frames.destroy(record.frame) {
            warn!(object = %key.object, error = %e, "pose node already gone");
        }
        self.retrack(key.object, Tracking::without_location);
        self.emit(WorldEvent::ObjectErased {
            id: key.object,
            origin: key.origin,
        });
        Some(record)
    }

    /// Stop tracking `id` spatially.  Its connected record is untouched.
    pub fn clear_located_object(&mut self, id: ObjectId) -> bool {
        match self.key_of(id) {
            Some(key) => {
                debug!(object = %id, "clearing located object");
                self.remove_located(key).is_some()
            }
            None => false,
        }
    }

    /// Remove every located entry matching `filter`.
    pub fn delete_located_objects(&mut self, filter: &ObjectFilter) -> Vec<ObjectId> {
        let current = self.current_origin();
        let keys: Vec<LocatedKey> = self
            .located
            .iter()
            .filter(|(_, r)| filter.matches(r, current))
            .map(|(k, _)| *k)
            .collect();
        keys.into_iter()
            .filter_map(|k| self.remove_located(k).map(|r| r.id))
            .collect()
    }

    /// Apply `f` to every located object matching `filter`.  Matches are
    /// collected first so `f` may mutate the world freely.
    pub fn modify_located_objects<F>(
        &mut self,
        filter: &ObjectFilter,
        mut f: F,
    ) -> Result<usize, WorldError>
    where
        F: FnMut(&mut Self, ObjectId) -> Result<(), WorldError>,
    {
        let ids: Vec<ObjectId> = self
            .find_located_matching_objects(filter)
            .into_iter()
            .map(|r| r.id)
            .collect();
        for id in &ids {
            f(self, *id)?;
        }
        Ok(ids.len())
    }

    /// Evict every Unknown entry, in any origin.
    pub fn delete_unknown_objects(&mut self) -> Vec<ObjectId> {
        let keys: Vec<LocatedKey> = self
            .located
            .iter()
            .filter(|(_, r)| r.pose_state == PoseState::Unknown)
            .map(|(k, _)| *k)
            .collect();
        let mut evicted = Vec::with_capacity(keys.len());
        for key in keys {
            if self.remove_located(key).is_some() {
                info!(object = %key.object, origin = %key.origin, "evicted unknown object");
                evicted.push(key.object);
            }
        }
        evicted
    }

    fn change_state(&mut self, id: ObjectId, old_state: PoseState, new_state: PoseState) {
        if old_state != new_state {
            self.emit(WorldEvent::PoseStateChanged {
                id,
                old_state,
                new_state,
            });
        }
    }

    /// Mark `id` Dirty and drop its pre-action cache, then do the same for
    /// whatever is stacked on it.  Carried objects are exempt.  Returns the
    /// ids whose state went Known → Dirty.
    pub fn mark_dirty(&mut self, id: ObjectId) -> Result<Vec<ObjectId>, WorldError> {
        if self.located_or_err(id)?.is_carried {
            return Ok(Vec::new());
        }
        let mut dirtied = Vec::new();
        let mut visited = HashSet::new();
        let mut next = Some(id);
        while let Some(cur) = next.take() {
            if !visited.insert(cur) {
                break;
            }
            let Some(record) = self.located_mut(cur) else {
                break;
            };
            record.pre_action.invalidate();
            let old_state = record.pose_state;
            if record.mark_dirty() {
                dirtied.push(cur);
                debug!(object = %cur, "marked dirty");
                self.change_state(cur, old_state, PoseState::Dirty);
            }
            next = self.find_located_object_on_top_of(cur).map(|r| r.id);
        }
        Ok(dirtied)
    }

    /// Force `id` to Unknown; `true` if it was not already.
    pub fn mark_unknown(&mut self, id: ObjectId) -> Result<bool, WorldError> {
        let record = self
            .located_mut(id)
            .ok_or_else(|| WorldError::InvalidReference(format!("{id} is not located")))?;
        let old_state = record.pose_state;
        record.pose_state = PoseState::Unknown;
        self.change_state(id, old_state, PoseState::Unknown);
        Ok(old_state != PoseState::Unknown)
    }

    /// One missed tick for `id`; `true` when it just became Unknown.
    pub(crate) fn note_unobserved(&mut self, id: ObjectId, threshold: u32) -> Result<bool, WorldError> {
        let record = self
            .located_mut(id)
            .ok_or_else(|| WorldError::InvalidReference(format!("{id} is not located")))?;
        let became_unknown = record.note_unobserved(threshold);
        if became_unknown {
            info!(object = %id, misses = threshold, "dirty object not re-observed, now unknown");
            self.change_state(id, PoseState::Dirty, PoseState::Unknown);
        }
        Ok(became_unknown)
    }

    pub(crate) fn record_observation(
        &mut self,
        id: ObjectId,
        marker: ObservedMarker,
        tick: u64,
    ) -> Result<(), WorldError> {
        let record = self
            .located_mut(id)
            .ok_or_else(|| WorldError::InvalidReference(format!("{id} is not located")))?;
        let was_moving = record.is_moving;
        let active_id = record.active_id;
        record.mark_observed(marker, tick);
        if let Some(connected) = active_id.and_then(|a| self.connected.get_mut(&a)) {
            connected.is_moving = false;
        }
        if was_moving {
            self.emit(WorldEvent::ObjectStoppedMoving { id });
        }
        Ok(())
    }

    /// Flag `id` moving or settled, notifying the observer on change.
    pub fn set_moving(&mut self, id: ObjectId, moving: bool) -> Result<(), WorldError> {
        let record = self
            .located_mut(id)
            .ok_or_else(|| WorldError::InvalidReference(format!("{id} is not located")))?;
        if record.is_moving == moving {
            return Ok(());
        }
        record.is_moving = moving;
        self.emit(if moving {
            WorldEvent::ObjectMoved { id }
        } else {
            WorldEvent::ObjectStoppedMoving { id }
        });
        Ok(())
    }

    /// Re-parent a current-origin object under `parent` (e.g. the robot's
    /// lift) keeping its pose, and flag it carried.
    pub fn attach_to(&mut self, id: ObjectId, parent: FrameId) -> Result<(), WorldError> {
        let frame = self.located_or_err(id)?.frame;
        self.frames.reparent_preserving_pose(frame, parent)?;
        if let Some(record) = self.located_mut(id) {
            record.is_carried = true;
        }
        Ok(())
    }

    /// Put a carried object back under the current origin where it is now.
    pub fn detach_to_origin(&mut self, id: ObjectId) -> Result<(), WorldError> {
        let frame = self.located_or_err(id)?.frame;
        self.frames
            .reparent_preserving_pose(frame, self.origins.current_frame())?;
        if let Some(record) = self.located_mut(id) {
            record.is_carried = false;
            record.pre_action.invalidate();
        }
        Ok(())
    }

    /// Drop every cached pre-action pose of `id`.
    pub fn invalidate_pre_action_poses(&mut self, id: ObjectId) {
        if let Some(record) = self.located_mut(id) {
            record.pre_action.invalidate();
        }
    }

    /// Cached pre-action poses of `id` for `action`, computing them on a
    /// miss.
    pub fn pre_action_poses(
        &mut self,
        id: ObjectId,
        action: PreActionType,
        generator: &PreActionPoseGenerator,
    ) -> Result<PreActionLookup, WorldError> {
        let pose = self.object_pose(id)?;
        let record = self
            .located_mut(id)
            .ok_or_else(|| WorldError::InvalidReference(format!("{id} is not located")))?;
        let size = record.size;
        let (poses, was_freshly_computed) = record
            .pre_action
            .get_or_compute(action, || generator.generate(pose, size, action));
        if was_freshly_computed {
            debug!(object = %id, ?action, count = poses.len(), "pre-action poses computed");
        }
        Ok(PreActionLookup {
            object: id,
            poses,
            was_freshly_computed,
        })
    }

    // ── Connected ───────────────────────────────────────────────────────────

    /// Register an object announced over comms.
    ///
    /// Re-announcing the same active id with the same type is a no-op that
    /// returns the existing object id; a different type fails with
    /// [`WorldError::DuplicateActiveId`].  A new unique-typed object takes
    /// over the id of an uncorrelated located object of its type, which is
    /// then marked Dirty.
    pub fn add_connected_object(
        &mut self,
        active_id: ActiveId,
        hw_address: &str,
        object_type: ObjectType,
    ) -> Result<ObjectId, WorldError> {
        if let Some(existing) = self.connected.get_mut(&active_id) {
            if existing.object_type != object_type {
                return Err(WorldError::DuplicateActiveId {
                    active_id,
                    registered: existing.object_type,
                    requested: object_type,
                });
            }
            if existing.hw_address != hw_address {
                warn!(
                    active_id = %active_id,
                    old = %existing.hw_address,
                    new = %hw_address,
                    "hardware address changed for connected object"
                );
                existing.hw_address = hw_address.to_string();
            }
            return Ok(existing.object_id);
        }

        let current = self.current_origin();
        let inherited = if self.library.is_unique(object_type) {
            self.located
                .values()
                .filter(|r| r.object_type == object_type && r.active_id.is_none())
                .max_by_key(|r| (r.origin == current, r.last_observed))
                .map(|r| r.id)
        } else {
            None
        };
        let id = match inherited {
            Some(id) => id,
            None => self.allocate_id(),
        };

        self.connected.insert(
            active_id,
            ConnectedObject {
                active_id,
                object_id: id,
                object_type,
                hw_address: hw_address.to_string(),
                is_moving: false,
                up_axis: None,
            },
        );
        let tracking = match self.tracking.get(&id) {
            Some(t) => t.with_active_id(active_id),
            None => Tracking::CommsOnly { active_id },
        };
        self.tracking.insert(id, tracking);

        if inherited.is_some() {
            if let Some(record) = self.located_mut(id) {
                record.active_id = Some(active_id);
            }
            self.mark_dirty(id)?;
        }
        info!(object = %id, active_id = %active_id, object_type = %object_type, inherited = inherited.is_some(), "connected object added");
        self.emit(WorldEvent::ConnectionChanged {
            id,
            active_id,
            connected: true,
        });
        Ok(id)
    }

    /// Forget the comms side of an object.  Its located entry, if any,
    /// remains as a spatial-only object.
    pub fn remove_connected_object(&mut self, active_id: ActiveId) -> Option<ObjectId> {
        let connected = self.connected.remove(&active_id)?;
        let id = connected.object_id;
        if let Some(record) = self.located_mut(id) {
            record.active_id = None;
        }
        self.retrack(id, Tracking::without_active_id);
        info!(object = %id, active_id = %active_id, "connected object removed");
        self.emit(WorldEvent::ConnectionChanged {
            id,
            active_id,
            connected: false,
        });
        Some(id)
    }

    /// Connected object registered under `active_id`.
    pub fn get_connected_by_active_id(&self, active_id: ActiveId) -> Option<&ConnectedObject> {
        self.connected.get(&active_id)
    }

    /// Connected object correlated with `id`.
    pub fn get_connected_by_object_id(&self, id: ObjectId) -> Option<&ConnectedObject> {
        self.tracking
            .get(&id)
            .and_then(|t| t.active_id())
            .and_then(|a| self.connected.get(&a))
    }

    /// Connected objects of `object_type`, in active-id order.
    pub fn connected_objects_of_type(
        &self,
        object_type: ObjectType,
    ) -> impl Iterator<Item = &ConnectedObject> {
        self.connected
            .values()
            .filter(move |c| c.object_type == object_type)
    }

    /// Connected objects passing the type and id constraints of `filter`.
    pub fn find_connected_matching_objects(&self, filter: &ObjectFilter) -> Vec<&ConnectedObject> {
        self.connected
            .values()
            .filter(|c| filter.matches_connected(c))
            .collect()
    }

    pub(crate) fn set_connected_motion(
        &mut self,
        active_id: ActiveId,
        moving: Option<bool>,
        up_axis: Option<UpAxis>,
    ) -> Result<ObjectId, WorldError> {
        let connected = self
            .connected
            .get_mut(&active_id)
            .ok_or_else(|| WorldError::InvalidReference(format!("unknown {active_id}")))?;
        if let Some(m) = moving {
            connected.is_moving = m;
        }
        if up_axis.is_some() {
            connected.up_axis = up_axis;
        }
        Ok(connected.object_id)
    }
}
