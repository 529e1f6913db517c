//! Query filters over located and connected objects.
//!
//! ```rust
//! use blockworld_types::{ObjectId, ObjectType};
//! use blockworld_world::filter::{ObjectFilter, OriginMode};
//!
//! let filter = ObjectFilter::new()
//!     .with_types([ObjectType::LightCube1, ObjectType::LightCube2])
//!     .ignoring_id(ObjectId(3))
//!     .in_origin_mode(OriginMode::InAnyFrame)
//!     .with_predicate(|obj| !obj.is_carried());
//! # let _ = filter;
//! ```

use std::collections::{BTreeSet, HashSet};

use blockworld_types::{ObjectId, ObjectType, OriginId};

use crate::object::{ConnectedObject, ObjectRecord};

/// Which origins a located query looks in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum OriginMode {
    /// Only the robot's current origin.
    #[default]
    InRobotFrame,
    /// Every origin except the current one.
    NotInRobotFrame,
    InAnyFrame,
    Custom(BTreeSet<OriginId>),
}

impl OriginMode {
    /// Whether an object living in `origin` passes, given the current origin.
    pub fn admits(&self, origin: OriginId, current: OriginId) -> bool {
        match self {
            OriginMode::InRobotFrame => origin == current,
            OriginMode::NotInRobotFrame => origin != current,
            OriginMode::InAnyFrame => true,
            OriginMode::Custom(set) => set.contains(&origin),
        }
    }
}

type Predicate = Box<dyn Fn(&ObjectRecord) -> bool>;

/// Conjunction of type, id, origin and free-form predicate constraints.
/// An empty filter matches every located object in the current origin.
#[derive(Default)]
pub struct ObjectFilter {
    allowed_types: Option<HashSet<ObjectType>>,
    ignored_types: HashSet<ObjectType>,
    allowed_ids: Option<HashSet<ObjectId>>,
    ignored_ids: HashSet<ObjectId>,
    origin_mode: OriginMode,
    predicates: Vec<Predicate>,
}

impl ObjectFilter {
    /// Filter matching every current-origin object.
    pub fn new() -> Self {
        Self::default()
    }

    /// Only objects of `object_type`.
    pub fn of_type(self, object_type: ObjectType) -> Self {
        self.with_types([object_type])
    }

    /// Only objects of one of `types`.  Repeated calls widen the set.
    pub fn with_types(mut self, types: impl IntoIterator<Item = ObjectType>) -> Self {
        self.allowed_types
            .get_or_insert_with(HashSet::new)
            .extend(types);
        self
    }

    /// Reject objects of `object_type`.
    pub fn ignoring_type(mut self, object_type: ObjectType) -> Self {
        self.ignored_types.insert(object_type);
        self
    }

    /// Only the object `id`.
    pub fn with_id(self, id: ObjectId) -> Self {
        self.with_ids([id])
    }

    /// Only objects among `ids`.  Repeated calls widen the set.
    pub fn with_ids(mut self, ids: impl IntoIterator<Item = ObjectId>) -> Self {
        self.allowed_ids.get_or_insert_with(HashSet::new).extend(ids);
        self
    }

    /// Reject the object `id`.
    pub fn ignoring_id(mut self, id: ObjectId) -> Self {
        self.ignored_ids.insert(id);
        self
    }

    /// Which origins are searched (default: the current one).
    pub fn in_origin_mode(mut self, mode: OriginMode) -> Self {
        self.origin_mode = mode;
        self
    }

    /// Extra condition every match must satisfy.
    pub fn with_predicate(mut self, f: impl Fn(&ObjectRecord) -> bool + 'static) -> Self {
        self.predicates.push(Box::new(f));
        self
    }

    pub fn origin_mode(&self) -> &OriginMode {
        &self.origin_mode
    }

    fn admits(&self, object_type: ObjectType, id: ObjectId) -> bool {
        if self.ignored_types.contains(&object_type) || self.ignored_ids.contains(&id) {
            return false;
        }
        if let Some(types) = &self.allowed_types
            && !types.contains(&object_type)
        {
            return false;
        }
        if let Some(ids) = &self.allowed_ids
            && !ids.contains(&id)
        {
            return false;
        }
        true
    }

    /// Whether `record` passes every constraint.
    pub fn matches(&self, record: &ObjectRecord, current_origin: OriginId) -> bool {
        self.origin_mode.admits(record.origin(), current_origin)
            && self.admits(record.object_type(), record.id())
            && self.predicates.iter().all(|p| p(record))
    }

    /// Connected objects have no origin; only type and id constraints apply.
    pub fn matches_connected(&self, connected: &ConnectedObject) -> bool {
        self.admits(connected.object_type, connected.object_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_modes() {
        let (cur, other) = (OriginId(2), OriginId(1));
        assert!(OriginMode::InRobotFrame.admits(cur, cur));
        assert!(!OriginMode::InRobotFrame.admits(other, cur));
        assert!(OriginMode::NotInRobotFrame.admits(other, cur));
        assert!(OriginMode::InAnyFrame.admits(other, cur));
        let custom = OriginMode::Custom([other].into_iter().collect());
        assert!(custom.admits(other, cur));
        assert!(!custom.admits(cur, cur));
    }

    #[test]
    fn type_and_id_constraints_combine() {
        let f = ObjectFilter::new()
            .with_types([ObjectType::LightCube1, ObjectType::Charger])
            .ignoring_id(ObjectId(5));
        assert!(f.admits(ObjectType::LightCube1, ObjectId(1)));
        assert!(!f.admits(ObjectType::LightCube1, ObjectId(5)));
        assert!(!f.admits(ObjectType::LightCube2, ObjectId(1)));

        let by_id = ObjectFilter::new().with_id(ObjectId(7)).ignoring_type(ObjectType::Charger);
        assert!(by_id.admits(ObjectType::LightCube3, ObjectId(7)));
        assert!(!by_id.admits(ObjectType::Charger, ObjectId(7)));
        assert!(!by_id.admits(ObjectType::LightCube3, ObjectId(8)));
    }
}
