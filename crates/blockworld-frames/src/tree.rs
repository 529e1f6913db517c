//! Coordinate-frame tree.
//!
//! Nodes live in an arena and are addressed by generational [`FrameId`]
//! handles.  Each node stores its pose relative to its parent, a back
//! reference to that parent, and the set of its direct children.  A node
//! without a parent is a root; roots created with
//! [`FrameTree::create_origin`] are the coordinate origins objects are
//! anchored in.
//!
//! Handles outlive the nodes they name: once a node is destroyed its slot
//! generation is bumped, and every operation on the old handle fails with
//! [`WorldError::InvalidReference`].
//!
//! # Example
//!
//! ```rust
//! use blockworld_frames::math::{Transform3D, Vec3};
//! use blockworld_frames::tree::FrameTree;
//!
//! let mut tree = FrameTree::new();
//! let origin = tree.create_origin("origin");
//! let robot = tree
//!     .create_node(Some(origin), Transform3D::from_translation(Vec3::new(100.0, 0.0, 0.0)), "robot")
//!     .unwrap();
//! let cube = tree
//!     .create_node(Some(origin), Transform3D::from_translation(Vec3::new(250.0, 30.0, 22.0)), "cube")
//!     .unwrap();
//!
//! // Pose of the cube as seen from the robot.
//! let t = tree.compose_with_respect_to(cube, robot).unwrap();
//! assert!((t.translation.x - 150.0).abs() < 1e-3);
//! assert!((t.translation.y - 30.0).abs() < 1e-3);
//! ```

use std::collections::BTreeSet;
use std::fmt;

use blockworld_types::WorldError;
use tracing::{error, warn};

use crate::math::Transform3D;

/// Upper bound on the length of any parent chain.
pub const MAX_TREE_DEPTH: usize = 1000;

/// Generational handle to a node in a [`FrameTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameId {
    index: u32,
    generation: u32,
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame#{}.{}", self.index, self.generation)
    }
}

#[derive(Debug)]
struct FrameNode {
    local: Transform3D,
    parent: Option<FrameId>,
    children: BTreeSet<FrameId>,
    name: String,
    is_origin: bool,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    node: Option<FrameNode>,
}

/// Arena of pose nodes forming a forest of coordinate frames.
#[derive(Debug, Default)]
pub struct FrameTree {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl FrameTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    // ── Creation / destruction ──────────────────────────────────────────────

    /// Create a new root flagged as a coordinate origin.
    pub fn create_origin(&mut self, name: impl Into<String>) -> FrameId {
        self.insert(FrameNode {
            local: Transform3D::identity(),
            parent: None,
            children: BTreeSet::new(),
            name: name.into(),
            is_origin: true,
        })
    }

    /// Create a node posed at `local` relative to `parent`, or a bare root
    /// when `parent` is `None`.
    pub fn create_node(
        &mut self,
        parent: Option<FrameId>,
        local: Transform3D,
        name: impl Into<String>,
    ) -> Result<FrameId, WorldError> {
        if let Some(p) = parent {
            self.node(p)?;
        }
        let id = self.insert(FrameNode {
            local,
            parent,
            children: BTreeSet::new(),
            name: name.into(),
            is_origin: false,
        });
        if let Some(p) = parent {
            self.node_mut(p)?.children.insert(id);
        }
        Ok(id)
    }

    /// Remove a node.
    ///
    /// Children keep their pose: they are re-parented to the destroyed
    /// node's parent, or become roots when it had none.
    pub fn destroy(&mut self, id: FrameId) -> Result<(), WorldError> {
        let node = self.node(id)?;
        let parent = node.parent;
        let local = node.local;
        let children: Vec<FrameId> = node.children.iter().copied().collect();

        for child in children {
            let child_node = self.node_mut(child)?;
            child_node.local = local.compose(child_node.local);
            child_node.parent = parent;
            if let Some(p) = parent {
                self.node_mut(p)?.children.insert(child);
            }
        }
        if let Some(p) = parent {
            self.node_mut(p)?.children.remove(&id);
        }

        let slot = &mut self.slots[id.index as usize];
        slot.node = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;
        Ok(())
    }

    fn insert(&mut self, node: FrameNode) -> FrameId {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            return FrameId {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        FrameId {
            index,
            generation: 0,
        }
    }

    // ── Accessors ───────────────────────────────────────────────────────────

    fn node(&self, id: FrameId) -> Result<&FrameNode, WorldError> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
            .ok_or_else(|| WorldError::InvalidReference(format!("stale frame handle {id}")))
    }

    fn node_mut(&mut self, id: FrameId) -> Result<&mut FrameNode, WorldError> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
            .ok_or_else(|| WorldError::InvalidReference(format!("stale frame handle {id}")))
    }

    pub fn is_live(&self, id: FrameId) -> bool {
        self.node(id).is_ok()
    }

    /// Whether `id` is an origin (root) frame.
    pub fn is_origin(&self, id: FrameId) -> Result<bool, WorldError> {
        Ok(self.node(id)?.is_origin)
    }

    pub fn name(&self, id: FrameId) -> Result<&str, WorldError> {
        Ok(&self.node(id)?.name)
    }

    pub fn parent(&self, id: FrameId) -> Result<Option<FrameId>, WorldError> {
        Ok(self.node(id)?.parent)
    }

    pub fn children(&self, id: FrameId) -> Result<Vec<FrameId>, WorldError> {
        Ok(self.node(id)?.children.iter().copied().collect())
    }

    /// Pose of `id` relative to its parent.
    pub fn transform(&self, id: FrameId) -> Result<Transform3D, WorldError> {
        Ok(self.node(id)?.local)
    }

    /// Replace the pose of `id` relative to its parent.
    pub fn set_transform(&mut self, id: FrameId, local: Transform3D) -> Result<(), WorldError> {
        self.node_mut(id)?.local = local;
        Ok(())
    }

    fn label(&self, id: FrameId) -> String {
        match self.node(id) {
            Ok(node) => format!("{} ({id})", node.name),
            Err(_) => id.to_string(),
        }
    }

    // ── Re-parenting ────────────────────────────────────────────────────────

    /// Move `id` under `new_parent` (or make it a root), keeping its local
    /// transform unchanged.
    ///
    /// Rejects a parent that already has `id` among its ancestors.
    pub fn set_parent(
        &mut self,
        id: FrameId,
        new_parent: Option<FrameId>,
    ) -> Result<(), WorldError> {
        let old_parent = self.node(id)?.parent;
        if let Some(p) = new_parent {
            self.node(p)?;
            if p == id || self.is_ancestor(id, p)? {
                warn!(frame = %self.label(id), parent = %self.label(p), "re-parent would close a cycle");
                return Err(WorldError::CycleDetected {
                    frame: self.label(id),
                });
            }
            if old_parent != Some(p) && self.node(p)?.children.contains(&id) {
                error!(
                    frame = %self.label(id),
                    parent = %self.label(p),
                    "child list out of sync with parent link"
                );
                return Err(WorldError::InvalidReference(format!(
                    "{id} already recorded as a child of {p}"
                )));
            }
        }

        if let Some(old) = old_parent
            && let Ok(old_node) = self.node_mut(old)
        {
            old_node.children.remove(&id);
        }
        if let Some(p) = new_parent {
            self.node_mut(p)?.children.insert(id);
        }
        self.node_mut(id)?.parent = new_parent;
        Ok(())
    }

    /// Re-parent `id` under `new_parent` while keeping its pose in the
    /// shared origin fixed.
    pub fn reparent_preserving_pose(
        &mut self,
        id: FrameId,
        new_parent: FrameId,
    ) -> Result<(), WorldError> {
        let local = self.compose_with_respect_to(id, new_parent)?;
        self.set_parent(id, Some(new_parent))?;
        self.set_transform(id, local)
    }

    // ── Chain walks ─────────────────────────────────────────────────────────

    fn cycle_detected(&self, id: FrameId) -> WorldError {
        let frame = self.label(id);
        error!(frame = %frame, max_depth = MAX_TREE_DEPTH, "parent chain exceeded depth cap");
        debug_assert!(false, "parent chain of {frame} exceeded {MAX_TREE_DEPTH} links");
        WorldError::CycleDetected { frame }
    }

    /// Number of links between `id` and its root.
    pub fn depth(&self, id: FrameId) -> Result<usize, WorldError> {
        let mut node = self.node(id)?;
        let mut depth = 0;
        while let Some(p) = node.parent {
            depth += 1;
            if depth > MAX_TREE_DEPTH {
                return Err(self.cycle_detected(id));
            }
            node = self.node(p)?;
        }
        Ok(depth)
    }

    /// Root of the chain containing `id`.
    pub fn find_origin(&self, id: FrameId) -> Result<FrameId, WorldError> {
        let mut current = id;
        let mut node = self.node(id)?;
        let mut steps = 0;
        while let Some(p) = node.parent {
            steps += 1;
            if steps > MAX_TREE_DEPTH {
                return Err(self.cycle_detected(id));
            }
            current = p;
            node = self.node(p)?;
        }
        Ok(current)
    }

    /// True when `ancestor` appears on the parent chain of `id`.
    pub fn is_ancestor(&self, ancestor: FrameId, id: FrameId) -> Result<bool, WorldError> {
        let mut node = self.node(id)?;
        let mut steps = 0;
        while let Some(p) = node.parent {
            if p == ancestor {
                return Ok(true);
            }
            steps += 1;
            if steps > MAX_TREE_DEPTH {
                return Err(self.cycle_detected(id));
            }
            node = self.node(p)?;
        }
        Ok(false)
    }

    /// One link up: returns the parent and `total` pre-multiplied by the
    /// current node's local transform.
    fn step_up(
        &self,
        current: FrameId,
        total: Transform3D,
    ) -> Result<(FrameId, Transform3D), WorldError> {
        let node = self.node(current)?;
        let parent = node.parent.ok_or_else(|| {
            WorldError::InvalidReference(format!("{} has no parent", self.label(current)))
        })?;
        Ok((parent, node.local.compose(total)))
    }

    /// Pose of `id` expressed in its root frame.
    pub fn with_respect_to_root(&self, id: FrameId) -> Result<Transform3D, WorldError> {
        let root = self.find_origin(id)?;
        self.compose_with_respect_to(id, root)
    }

    /// Pose of `from` expressed in frame `to`.
    ///
    /// Both chains are walked up to equal depth and then in lockstep until
    /// they meet.  When one node is an ancestor of the other the walk stops
    /// there.  Fails with [`WorldError::DifferentOrigin`] when the nodes
    /// live under different roots.
    pub fn compose_with_respect_to(
        &self,
        from: FrameId,
        to: FrameId,
    ) -> Result<Transform3D, WorldError> {
        if from == to {
            self.node(from)?;
            return Ok(Transform3D::identity());
        }
        if self.find_origin(from)? != self.find_origin(to)? {
            return Err(WorldError::DifferentOrigin {
                from: self.label(from),
                to: self.label(to),
            });
        }

        let mut from_depth = self.depth(from)?;
        let mut to_depth = self.depth(to)?;

        // from_total = pose of `from` in `from_cur`; likewise for `to`.
        let (mut from_cur, mut from_total) = (from, Transform3D::identity());
        let (mut to_cur, mut to_total) = (to, Transform3D::identity());

        while from_depth > to_depth {
            (from_cur, from_total) = self.step_up(from_cur, from_total)?;
            from_depth -= 1;
            if from_cur == to {
                return Ok(from_total);
            }
        }
        while to_depth > from_depth {
            (to_cur, to_total) = self.step_up(to_cur, to_total)?;
            to_depth -= 1;
            if to_cur == from {
                return Ok(to_total.inverse());
            }
        }

        let mut steps = 0;
        while from_cur != to_cur {
            steps += 1;
            if steps > MAX_TREE_DEPTH {
                return Err(self.cycle_detected(from));
            }
            (from_cur, from_total) = self.step_up(from_cur, from_total)?;
            (to_cur, to_total) = self.step_up(to_cur, to_total)?;
        }

        Ok(to_total.inverse().compose(from_total))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
