//! Robot/object overlap check.
//!
//! If the robot's body occupies the space where a Known object is supposed
//! to be, the object cannot be there any more.  Such objects are returned so
//! the caller can mark them Dirty.

use blockworld_frames::{Transform3D, Vec3};
use blockworld_types::{ObjectId, PoseState};
use tracing::debug;

use crate::config::RobotGeometry;
use crate::geometry::{Dimensions, OrientedRect};
use crate::world::ObjectWorld;

#[derive(Debug, Clone, Copy)]
pub struct CollisionChecker {
    robot: RobotGeometry,
}

impl CollisionChecker {
    /// Checker for a robot body of the given geometry.
    pub fn new(robot: RobotGeometry) -> Self {
        Self { robot }
    }

    /// Padded robot footprint on the ground plane for `robot_pose`.
    pub fn robot_footprint(&self, robot_pose: Transform3D) -> OrientedRect {
        let r = &self.robot;
        let centre_offset = Vec3::new(r.front_mm - r.length_mm * 0.5, 0.0, 0.0);
        let centre = robot_pose.transform_point(centre_offset);
        OrientedRect::footprint(
            Transform3D::new(centre, robot_pose.rotation),
            Dimensions::new(r.length_mm, r.width_mm, r.height_mm),
        )
        .padded(r.collision_padding_mm)
    }

    /// True when an object centred at height `z` with size `size` shares a
    /// horizontal slice with the robot body.
    fn in_robot_plane(&self, robot_pose: Transform3D, z: f32, size: Dimensions) -> bool {
        let bottom = robot_pose.translation.z;
        let top = bottom + self.robot.height_mm;
        let half_z = size.z * 0.5;
        z >= bottom - half_z && z <= top + half_z
    }

    /// Known, uncarried current-origin objects the robot at `robot_pose`
    /// overlaps.  Objects observed on `tick` are trusted over the overlap.
    pub fn find_colliding_objects(
        &self,
        world: &ObjectWorld,
        robot_pose: Transform3D,
        tick: u64,
    ) -> Vec<ObjectId> {
        let footprint = self.robot_footprint(robot_pose);
        let current = world.current_origin();
        world
            .located_objects()
            .filter(|r| {
                r.origin() == current
                    && r.pose_state() == PoseState::Known
                    && !r.is_carried()
                    && !r.was_observed_on_tick(tick)
            })
            .filter(|r| {
                let Ok(pose) = world.object_pose(r.id()) else {
                    return false;
                };
                if !self.in_robot_plane(robot_pose, pose.translation.z, r.size()) {
                    return false;
                }
                let hit = footprint.intersects(&OrientedRect::footprint(pose, r.size()));
                if hit {
                    debug!(object = %r.id(), "robot footprint overlaps object");
                }
                hit
            })
            .map(|r| r.id())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WorldConfig;
    use blockworld_types::ObjectType;

    fn setup() -> (ObjectWorld, CollisionChecker) {
        let config = WorldConfig::default();
        (ObjectWorld::new(&config), CollisionChecker::new(config.robot))
    }

    #[test]
    fn footprint_is_shifted_back_from_front() {
        let (_, checker) = setup();
        let fp = checker.robot_footprint(Transform3D::identity());
        // 32 mm front, 88 mm long → centre at -12 mm.
        assert!((fp.center_x + 12.0).abs() < 1e-4);
        assert!((fp.half_x - 49.0).abs() < 1e-4);
        assert!((fp.half_y - 32.0).abs() < 1e-4);
    }

    #[test]
    fn object_under_robot_collides() {
        let (mut world, checker) = setup();
        let id = world
            .add_located_object(
                ObjectType::LightCube1,
                Transform3D::from_xyz_yaw(10.0, 0.0, 22.0, 0.0),
                PoseState::Known,
            )
            .unwrap();
        assert_eq!(checker.find_colliding_objects(&world, Transform3D::identity(), 0), vec![id]);
    }

    #[test]
    fn object_above_or_beside_robot_is_clear() {
        let (mut world, checker) = setup();
        world
            .add_located_object(
                ObjectType::LightCube1,
                Transform3D::from_xyz_yaw(0.0, 0.0, 67.7 + 22.0 + 30.0, 0.0),
                PoseState::Known,
            )
            .unwrap();
        world
            .add_located_object(
                ObjectType::LightCube2,
                Transform3D::from_xyz_yaw(0.0, 120.0, 22.0, 0.0),
                PoseState::Known,
            )
            .unwrap();
        assert!(checker.find_colliding_objects(&world, Transform3D::identity(), 0).is_empty());
    }

    #[test]
    fn dirty_objects_are_skipped() {
        let (mut world, checker) = setup();
        let dirty = world
            .add_located_object(
                ObjectType::LightCube1,
                Transform3D::from_xyz_yaw(0.0, 0.0, 22.0, 0.0),
                PoseState::Dirty,
            )
            .unwrap();
        assert!(checker.find_colliding_objects(&world, Transform3D::identity(), 0).is_empty());
        assert_eq!(world.get_located_object_by_id(dirty).unwrap().pose_state(), PoseState::Dirty);
    }
}
