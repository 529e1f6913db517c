//! End-to-end behaviour of the tick pipeline.
//!
//! The default camera sits 17 mm ahead of and 22 mm above the robot origin,
//! looking straight ahead with f = 290 px.  A cube marker (30 mm) imaged as
//! a centred square of side `290 * 30 / r` px therefore puts the cube's
//! centre at `x = 17 + r + 22` in the robot frame.

use std::sync::mpsc;

use blockworld_frames::Transform3D;
use blockworld_types::{
    ActiveId, ImageQuad, MarkerCode, ObjectEvent, ObjectId, ObjectType, ObservedMarker, PoseState,
    PreActionType, UpAxis, WorldError,
};
use blockworld_world::observer::WorldEvent;
use blockworld_world::{BlockWorld, ObjectFilter, RobotPoseUpdate, TickInput, WorldConfig};

const CUBE_MARKER_MM: f32 = 30.0;
const FOCAL_PX: f32 = 290.0;

fn block_world() -> BlockWorld {
    BlockWorld::new(&WorldConfig::default()).unwrap()
}

fn sighting(code: u32, range_mm: f32, timestamp: u32) -> ObservedMarker {
    ObservedMarker {
        code: MarkerCode(code),
        quad: ImageQuad::square(160.0, 120.0, FOCAL_PX * CUBE_MARKER_MM / range_mm),
        timestamp,
    }
}

fn pose_at(timestamp: u32, pose: Transform3D) -> Option<RobotPoseUpdate> {
    Some(RobotPoseUpdate { timestamp, pose })
}

fn state_of(bw: &BlockWorld, id: ObjectId) -> PoseState {
    bw.world().get_located_object_by_id(id).unwrap().pose_state()
}

fn cube_at(x: f32, y: f32) -> Transform3D {
    Transform3D::from_xyz_yaw(x, y, 22.0, 0.0)
}

// ── Pose confidence lifecycle ───────────────────────────────────────────────

#[test]
fn observed_object_survives_idle_ticks_then_is_swept_after_moving() {
    let mut bw = block_world();
    let summary = bw
        .update(TickInput {
            robot_pose: pose_at(0, Transform3D::identity()),
            events: vec![ObjectEvent::Connected {
                active_id: ActiveId(7),
                hw_address: "aa:bb:cc".into(),
                object_type: ObjectType::LightCube1,
            }],
            markers: vec![sighting(1, 300.0, 0)],
        })
        .unwrap();
    let id = bw.world().get_connected_by_active_id(ActiveId(7)).unwrap().object_id;
    assert_eq!(summary.observation.created, vec![id]);
    assert_eq!(state_of(&bw, id), PoseState::Known);

    let pose = bw.compose_robot_to_object(id).unwrap();
    assert!((pose.translation.x - 339.0).abs() < 1e-2, "x = {}", pose.translation.x);

    // No dirty trigger: three empty ticks leave it Known.
    for _ in 0..3 {
        bw.update(TickInput::default()).unwrap();
    }
    assert_eq!(state_of(&bw, id), PoseState::Known);

    bw.update(TickInput {
        events: vec![ObjectEvent::Moved {
            active_id: ActiveId(7),
            timestamp: 500,
        }],
        ..Default::default()
    })
    .unwrap();
    assert_eq!(state_of(&bw, id), PoseState::Dirty);
    assert!(bw.world().get_located_object_by_id(id).unwrap().is_moving());

    // K = 2 misses, the first counted on the Moved tick itself.
    let summary = bw.update(TickInput::default()).unwrap();
    assert_eq!(summary.became_unknown, vec![id]);
    assert!(bw.world().get_located_object_by_id(id).is_some());

    assert_eq!(bw.check_for_unobserved_objects(), vec![id]);
    assert!(bw.world().get_located_object_by_id(id).is_none());
    // Comms side is untouched.
    assert!(bw.world().get_connected_by_active_id(ActiveId(7)).is_some());
}

#[test]
fn unknown_objects_are_evicted_at_the_start_of_the_next_tick() {
    let mut bw = block_world();
    let id = bw
        .world_mut()
        .add_located_object(ObjectType::CustomCuboid, cube_at(400.0, 0.0), PoseState::Dirty)
        .unwrap();

    let first = bw.update(TickInput::default()).unwrap();
    assert!(first.became_unknown.is_empty());
    let second = bw.update(TickInput::default()).unwrap();
    assert_eq!(second.became_unknown, vec![id]);
    assert!(second.evicted.is_empty());

    let third = bw.update(TickInput::default()).unwrap();
    assert_eq!(third.evicted, vec![id]);
    assert_eq!(bw.world().located_len(), 0);
}

#[test]
fn re_sighting_a_dirty_object_makes_it_known_again() {
    let mut bw = block_world();
    let created = bw
        .update(TickInput {
            robot_pose: pose_at(0, Transform3D::identity()),
            markers: vec![sighting(2, 250.0, 0)],
            ..Default::default()
        })
        .unwrap()
        .observation
        .created;
    let id = created[0];

    bw.world_mut().mark_dirty(id).unwrap();
    bw.update(TickInput::default()).unwrap();
    assert_eq!(state_of(&bw, id), PoseState::Dirty);

    let summary = bw
        .update(TickInput {
            robot_pose: pose_at(66, Transform3D::identity()),
            markers: vec![sighting(2, 250.0, 66)],
            ..Default::default()
        })
        .unwrap();
    assert_eq!(summary.observation.updated, vec![id]);
    assert!(summary.became_unknown.is_empty());
    assert_eq!(state_of(&bw, id), PoseState::Known);
    assert_eq!(bw.world().get_located_object_by_id(id).unwrap().times_observed(), 2);
}

// ── Origins ─────────────────────────────────────────────────────────────────

#[test]
fn delocalize_strands_object_until_it_is_seen_again() {
    let mut bw = block_world();
    let o1 = bw.current_origin();
    let id = bw
        .update(TickInput {
            robot_pose: pose_at(0, Transform3D::identity()),
            markers: vec![sighting(3, 300.0, 0)],
            ..Default::default()
        })
        .unwrap()
        .observation
        .created[0];

    let o2 = bw.delocalize().unwrap();
    assert_ne!(o1, o2);

    let record = bw.world().get_located_object_by_id(id).unwrap();
    assert_eq!(record.origin(), o1);
    assert!(matches!(
        bw.compose_robot_to_object(id),
        Err(WorldError::DifferentOrigin { .. })
    ));

    let summary = bw
        .update(TickInput {
            robot_pose: pose_at(100, Transform3D::identity()),
            markers: vec![sighting(3, 300.0, 100)],
            ..Default::default()
        })
        .unwrap();
    assert_eq!(summary.observation.updated, vec![id]);
    assert_eq!(bw.world().get_located_object_by_id(id).unwrap().origin(), o2);
    assert!(bw.compose_robot_to_object(id).is_ok());

    // O1 is now empty and goes away on the next delocalize.
    assert!(bw.world().is_zombie_origin(o1));
    bw.delocalize().unwrap();
    assert!(!bw.world().origins().is_origin_valid(o1));
}

#[test]
fn non_unique_objects_are_not_carried_across_origins() {
    let mut bw = block_world();
    let first = bw
        .update(TickInput {
            robot_pose: pose_at(0, Transform3D::identity()),
            markers: vec![sighting(20, 300.0, 0)],
            ..Default::default()
        })
        .unwrap()
        .observation
        .created[0];

    bw.delocalize().unwrap();
    let second = bw
        .update(TickInput {
            robot_pose: pose_at(100, Transform3D::identity()),
            markers: vec![sighting(20, 300.0, 100)],
            ..Default::default()
        })
        .unwrap()
        .observation
        .created;
    assert_eq!(second.len(), 1);
    assert_ne!(second[0], first);
    assert_eq!(bw.world().located_len(), 2);
}

#[test]
fn relocalizing_merges_back_into_the_older_origin() {
    let mut bw = block_world();
    let o1 = bw.current_origin();
    let id = bw
        .update(TickInput {
            robot_pose: pose_at(0, Transform3D::identity()),
            markers: vec![sighting(1, 300.0, 0)],
            ..Default::default()
        })
        .unwrap()
        .observation
        .created[0];

    let o2 = bw.delocalize().unwrap();
    bw.relocalize_to_origin(o1, Transform3D::from_xyz_yaw(100.0, 0.0, 0.0, 0.0))
        .unwrap();

    assert_eq!(bw.current_origin(), o1);
    assert!(!bw.world().origins().is_origin_valid(o2));
    let robot = bw.robot_pose().unwrap();
    assert!((robot.translation.x - 100.0).abs() < 1e-3);

    let seen = bw.compose_robot_to_object(id).unwrap();
    assert!((seen.translation.x - 239.0).abs() < 1e-2, "x = {}", seen.translation.x);
}

#[test]
fn carried_object_follows_robot_into_new_origin() {
    let mut bw = block_world();
    let o1 = bw.current_origin();
    let id = bw
        .world_mut()
        .add_located_object(ObjectType::LightCube2, cube_at(60.0, 0.0), PoseState::Known)
        .unwrap();
    bw.set_carried_object(id).unwrap();
    assert_eq!(bw.carried_object(), Some(id));

    let o2 = bw.delocalize().unwrap();
    let record = bw.world().get_located_object_by_id(id).unwrap();
    assert_eq!(record.origin(), o2);
    assert!(record.is_carried());
    // Nothing left in O1, so it was retired straight away.
    assert!(!bw.world().origins().is_origin_valid(o1));

    let held = bw.compose_robot_to_object(id).unwrap();
    assert!((held.translation.x - 60.0).abs() < 1e-3);

    assert_eq!(bw.clear_carried_object().unwrap(), Some(id));
    assert_eq!(bw.carried_object(), None);
}

// ── Collisions ──────────────────────────────────────────────────────────────

#[test]
fn object_inside_robot_footprint_becomes_dirty() {
    let mut bw = block_world();
    let id = bw
        .world_mut()
        .add_located_object(ObjectType::LightCube1, cube_at(0.0, 0.0), PoseState::Known)
        .unwrap();
    let summary = bw.update(TickInput::default()).unwrap();
    assert_eq!(summary.collided, vec![id]);
    assert_eq!(state_of(&bw, id), PoseState::Dirty);
}

#[test]
fn object_above_robot_stays_known() {
    let mut bw = block_world();
    let id = bw
        .world_mut()
        .add_located_object(
            ObjectType::LightCube1,
            Transform3D::from_xyz_yaw(0.0, 0.0, 67.7 + 22.0 + 30.0, 0.0),
            PoseState::Known,
        )
        .unwrap();
    assert!(bw.check_for_collisions().unwrap().is_empty());
    assert_eq!(state_of(&bw, id), PoseState::Known);
}

#[test]
fn driving_onto_an_object_dirties_it() {
    let mut bw = block_world();
    let id = bw
        .world_mut()
        .add_located_object(ObjectType::LightCube3, cube_at(300.0, 0.0), PoseState::Known)
        .unwrap();
    bw.update(TickInput::default()).unwrap();
    assert_eq!(state_of(&bw, id), PoseState::Known);

    let summary = bw
        .update(TickInput {
            robot_pose: pose_at(200, Transform3D::from_xyz_yaw(290.0, 0.0, 0.0, 0.0)),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(summary.collided, vec![id]);
}

#[test]
fn carried_object_never_collides() {
    let mut bw = block_world();
    let id = bw
        .world_mut()
        .add_located_object(ObjectType::LightCube1, cube_at(10.0, 0.0), PoseState::Known)
        .unwrap();
    bw.set_carried_object(id).unwrap();
    assert!(bw.check_for_collisions().unwrap().is_empty());
    assert_eq!(state_of(&bw, id), PoseState::Known);
}

// ── Pre-action poses ────────────────────────────────────────────────────────

#[test]
fn pre_action_poses_are_cached_until_the_pose_changes() {
    let mut bw = block_world();
    let id = bw
        .world_mut()
        .add_located_object(ObjectType::LightCube1, cube_at(200.0, 0.0), PoseState::Known)
        .unwrap();
    let filter = ObjectFilter::new().with_id(id);

    let first = bw
        .get_current_pre_action_poses(PreActionType::Docking, &filter)
        .unwrap();
    assert_eq!(first.len(), 1);
    assert!(first[0].was_freshly_computed);
    assert_eq!(first[0].poses.len(), 4);
    // Nearest approach is the face towards the robot: 22 mm half-size plus
    // 100 mm standoff.
    let nearest = first[0].poses[0].pose.translation;
    assert!((nearest.x - 78.0).abs() < 1e-2, "x = {}", nearest.x);
    assert!(nearest.y.abs() < 1e-2);

    let second = bw
        .get_current_pre_action_poses(PreActionType::Docking, &filter)
        .unwrap();
    assert!(!second[0].was_freshly_computed);

    bw.world_mut()
        .set_object_pose(id, cube_at(250.0, 0.0), PoseState::Known)
        .unwrap();
    let third = bw
        .get_current_pre_action_poses(PreActionType::Docking, &filter)
        .unwrap();
    assert!(third[0].was_freshly_computed);
}

#[test]
fn carried_object_pre_action_poses_follow_the_robot() {
    let mut bw = block_world();
    let id = bw
        .world_mut()
        .add_located_object(ObjectType::LightCube1, cube_at(60.0, 0.0), PoseState::Known)
        .unwrap();
    bw.set_carried_object(id).unwrap();
    let filter = ObjectFilter::new().with_id(id);

    let held = bw
        .get_current_pre_action_poses(PreActionType::Docking, &filter)
        .unwrap();
    assert!(held[0].was_freshly_computed);
    let nearest = held[0].poses[0].pose.translation;
    assert!((nearest.x + 62.0).abs() < 1e-2, "x = {}", nearest.x);

    bw.set_robot_pose(RobotPoseUpdate {
        timestamp: 100,
        pose: Transform3D::from_xyz_yaw(500.0, 0.0, 0.0, 0.0),
    })
    .unwrap();
    let moved = bw
        .get_current_pre_action_poses(PreActionType::Docking, &filter)
        .unwrap();
    assert!(moved[0].was_freshly_computed);
    let nearest = moved[0].poses[0].pose.translation;
    assert!((nearest.x - 438.0).abs() < 1e-2, "x = {}", nearest.x);

    bw.delocalize().unwrap();
    let after = bw
        .get_current_pre_action_poses(PreActionType::Docking, &filter)
        .unwrap();
    assert!(after[0].was_freshly_computed);
    let nearest = after[0].poses[0].pose.translation;
    assert!((nearest.x + 62.0).abs() < 1e-2, "x = {}", nearest.x);
}

#[test]
fn pre_action_poses_skip_objects_in_other_origins() {
    let mut bw = block_world();
    bw.world_mut()
        .add_located_object(ObjectType::LightCube1, cube_at(200.0, 0.0), PoseState::Known)
        .unwrap();
    bw.delocalize().unwrap();
    let lookups = bw
        .get_current_pre_action_poses(PreActionType::Entry, &ObjectFilter::new())
        .unwrap();
    assert!(lookups.is_empty());
}

// ── Comms events ────────────────────────────────────────────────────────────

#[test]
fn conflicting_connect_is_rejected_without_aborting_the_tick() {
    let mut bw = block_world();
    let summary = bw
        .update(TickInput {
            events: vec![
                ObjectEvent::Connected {
                    active_id: ActiveId(1),
                    hw_address: "01".into(),
                    object_type: ObjectType::LightCube1,
                },
                ObjectEvent::Connected {
                    active_id: ActiveId(1),
                    hw_address: "01".into(),
                    object_type: ObjectType::Charger,
                },
                ObjectEvent::Moved {
                    active_id: ActiveId(42),
                    timestamp: 0,
                },
            ],
            ..Default::default()
        })
        .unwrap();
    assert_eq!(summary.rejected_events, 2);
    assert_eq!(
        bw.world()
            .get_connected_by_active_id(ActiveId(1))
            .unwrap()
            .object_type,
        ObjectType::LightCube1
    );
}

#[test]
fn up_axis_change_dirties_the_object_without_flagging_motion() {
    let mut bw = block_world();
    bw.update(TickInput {
        robot_pose: pose_at(0, Transform3D::identity()),
        events: vec![ObjectEvent::Connected {
            active_id: ActiveId(2),
            hw_address: "02".into(),
            object_type: ObjectType::LightCube2,
        }],
        markers: vec![sighting(2, 300.0, 0)],
    })
    .unwrap();
    let id = bw.world().get_connected_by_active_id(ActiveId(2)).unwrap().object_id;
    assert_eq!(state_of(&bw, id), PoseState::Known);

    let summary = bw
        .update(TickInput {
            events: vec![ObjectEvent::UpAxisChanged {
                active_id: ActiveId(2),
                up_axis: UpAxis::XPositive,
            }],
            ..Default::default()
        })
        .unwrap();
    assert_eq!(summary.rejected_events, 0);
    let connected = bw.world().get_connected_by_active_id(ActiveId(2)).unwrap();
    assert_eq!(connected.up_axis, Some(UpAxis::XPositive));
    assert!(!connected.is_moving);
    assert_eq!(state_of(&bw, id), PoseState::Dirty);
    assert!(!bw.world().get_located_object_by_id(id).unwrap().is_moving());
}

#[test]
fn stopped_moving_clears_motion_and_sighting_restores_confidence() {
    let mut bw = block_world();
    bw.update(TickInput {
        robot_pose: pose_at(0, Transform3D::identity()),
        events: vec![ObjectEvent::Connected {
            active_id: ActiveId(3),
            hw_address: "03".into(),
            object_type: ObjectType::LightCube3,
        }],
        markers: vec![sighting(3, 300.0, 0)],
    })
    .unwrap();
    let id = bw.world().get_connected_by_active_id(ActiveId(3)).unwrap().object_id;

    bw.update(TickInput {
        events: vec![
            ObjectEvent::Moved {
                active_id: ActiveId(3),
                timestamp: 40,
            },
            ObjectEvent::StoppedMoving {
                active_id: ActiveId(3),
                timestamp: 60,
            },
        ],
        ..Default::default()
    })
    .unwrap();
    assert_eq!(state_of(&bw, id), PoseState::Dirty);
    assert!(!bw.world().get_located_object_by_id(id).unwrap().is_moving());
    assert!(!bw.world().get_connected_by_active_id(ActiveId(3)).unwrap().is_moving);

    // A push seen by the camera in the same tick: moving on comms, then
    // re-observed, so both views settle.
    bw.update(TickInput {
        robot_pose: pose_at(100, Transform3D::identity()),
        events: vec![ObjectEvent::Moved {
            active_id: ActiveId(3),
            timestamp: 90,
        }],
        markers: vec![sighting(3, 250.0, 100)],
    })
    .unwrap();
    assert_eq!(state_of(&bw, id), PoseState::Known);
    assert!(!bw.world().get_located_object_by_id(id).unwrap().is_moving());
    assert!(!bw.world().get_connected_by_active_id(ActiveId(3)).unwrap().is_moving);
}

#[test]
fn tick_input_parses_from_json() {
    let line = r#"{
        "events": [
            {"event": "connected", "active_id": 5, "hw_address": "c0:ff:ee", "object_type": "light_cube_2"}
        ],
        "markers": [
            {"code": 2, "timestamp": 0,
             "quad": {"corners": [
                {"x": 145.5, "y": 105.5}, {"x": 145.5, "y": 134.5},
                {"x": 174.5, "y": 105.5}, {"x": 174.5, "y": 134.5}
             ]}}
        ]
    }"#;
    let input: TickInput = serde_json::from_str(line).unwrap();
    assert!(input.robot_pose.is_none());

    let mut bw = block_world();
    let summary = bw.update(input).unwrap();
    let id = bw.world().get_connected_by_active_id(ActiveId(5)).unwrap().object_id;
    assert_eq!(summary.observation.created, vec![id]);
}

#[test]
fn observer_sees_the_lifecycle() {
    let (tx, rx) = mpsc::channel();
    let mut bw = block_world();
    bw.set_observer(Box::new(tx));

    let id = bw
        .update(TickInput {
            robot_pose: pose_at(0, Transform3D::identity()),
            markers: vec![sighting(1, 300.0, 0)],
            ..Default::default()
        })
        .unwrap()
        .observation
        .created[0];
    bw.world_mut().mark_unknown(id).unwrap();
    bw.update(TickInput::default()).unwrap();
    bw.delocalize().unwrap();

    let events: Vec<WorldEvent> = rx.try_iter().collect();
    assert!(matches!(events[0], WorldEvent::ObjectCreated { id: created, .. } if created == id));
    assert!(events.iter().any(|e| matches!(
        e,
        WorldEvent::PoseStateChanged { new_state: PoseState::Unknown, .. }
    )));
    assert!(events.iter().any(|e| matches!(e, WorldEvent::ObjectErased { .. })));
    assert!(matches!(events.last(), Some(WorldEvent::OriginChanged { .. })));
}
