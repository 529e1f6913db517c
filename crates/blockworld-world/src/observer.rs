//! Change notifications for visualization and logging sinks.
//!
//! Observers see every create, pose/state change, erase and movement
//! signal.  Nothing in the world model depends on them.

use std::sync::mpsc::Sender;

use blockworld_frames::Transform3D;
use blockworld_types::{ActiveId, ObjectId, ObjectType, OriginId, PoseState};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorldEvent {
    ObjectCreated {
        id: ObjectId,
        object_type: ObjectType,
        origin: OriginId,
        pose: Transform3D,
    },
    PoseUpdated {
        id: ObjectId,
        origin: OriginId,
        pose: Transform3D,
        state: PoseState,
    },
    PoseStateChanged {
        id: ObjectId,
        old_state: PoseState,
        new_state: PoseState,
    },
    ObjectErased {
        id: ObjectId,
        origin: OriginId,
    },
    ObjectMoved {
        id: ObjectId,
    },
    ObjectStoppedMoving {
        id: ObjectId,
    },
    ConnectionChanged {
        id: ObjectId,
        active_id: ActiveId,
        connected: bool,
    },
    OriginChanged {
        previous: OriginId,
        current: OriginId,
    },
}

pub trait WorldObserver {
    fn notify(&mut self, event: &WorldEvent);
}

/// Forwards events over a channel; a dropped receiver is ignored.
impl WorldObserver for Sender<WorldEvent> {
    fn notify(&mut self, event: &WorldEvent) {
        let _ = self.send(event.clone());
    }
}
