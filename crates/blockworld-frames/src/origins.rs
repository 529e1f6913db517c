//! Origin bookkeeping.
//!
//! Every time the robot loses track of its own pose it starts a fresh
//! coordinate origin.  [`OriginManager`] keeps the ordered list of origins,
//! the root frame each one owns in the [`FrameTree`], and which one is
//! current.

use blockworld_types::{OriginId, WorldError};
use tracing::info;

use crate::tree::{FrameId, FrameTree};

#[derive(Debug)]
pub struct OriginManager {
    origins: Vec<(OriginId, FrameId)>,
    current: (OriginId, FrameId),
    next_id: u32,
}

impl OriginManager {
    /// Create the manager together with the first origin.
    pub fn new(tree: &mut FrameTree) -> Self {
        let first = OriginId(1);
        let frame = tree.create_origin(first.to_string());
        Self {
            origins: vec![(first, frame)],
            current: (first, frame),
            next_id: 2,
        }
    }

    /// Start a new origin and make it current.
    pub fn delocalize(&mut self, tree: &mut FrameTree) -> OriginId {
        let id = OriginId(self.next_id);
        self.next_id += 1;
        let frame = tree.create_origin(id.to_string());
        self.origins.push((id, frame));
        let previous = self.current.0;
        self.current = (id, frame);
        info!(previous = %previous, origin = %id, "delocalized");
        id
    }

    pub fn current_origin_id(&self) -> OriginId {
        self.current.0
    }

    pub fn current_frame(&self) -> FrameId {
        self.current.1
    }

    /// Whether `id` is a live, unretired origin.
    pub fn is_origin_valid(&self, id: OriginId) -> bool {
        self.origins.iter().any(|(o, _)| *o == id)
    }

    /// Origins in creation order.
    pub fn origins(&self) -> impl Iterator<Item = OriginId> + '_ {
        self.origins.iter().map(|(o, _)| *o)
    }

    pub fn len(&self) -> usize {
        self.origins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.origins.is_empty()
    }

    /// Root frame of origin `id`.
    pub fn frame_of(&self, id: OriginId) -> Option<FrameId> {
        self.origins
            .iter()
            .find(|(o, _)| *o == id)
            .map(|(_, frame)| *frame)
    }

    /// Origin whose root frame is `frame`.
    pub fn origin_of_frame(&self, frame: FrameId) -> Option<OriginId> {
        self.origins
            .iter()
            .find(|(_, f)| *f == frame)
            .map(|(o, _)| *o)
    }

    /// Origin whose tree contains `node`.
    ///
    /// An origin that has been merged under another one resolves to the
    /// origin at the root.
    pub fn origin_containing(
        &self,
        tree: &FrameTree,
        node: FrameId,
    ) -> Result<OriginId, WorldError> {
        let root = tree.find_origin(node)?;
        self.origin_of_frame(root).ok_or_else(|| {
            WorldError::InvalidReference(format!("{node} is not anchored in a known origin"))
        })
    }

    /// Make an existing origin current again.
    pub fn set_current(&mut self, id: OriginId) -> Result<(), WorldError> {
        let frame = self
            .frame_of(id)
            .ok_or_else(|| WorldError::InvalidReference(format!("unknown {id}")))?;
        self.current = (id, frame);
        Ok(())
    }

    /// Forget a non-current origin and destroy its root frame.
    ///
    /// Nodes still parented to the origin's frame keep their pose relative
    /// to whatever the frame itself was parented to.
    pub fn retire(&mut self, tree: &mut FrameTree, id: OriginId) -> Result<(), WorldError> {
        if id == self.current.0 {
            return Err(WorldError::InvalidReference(format!(
                "cannot retire current {id}"
            )));
        }
        let pos = self
            .origins
            .iter()
            .position(|(o, _)| *o == id)
            .ok_or_else(|| WorldError::InvalidReference(format!("unknown {id}")))?;
        let (_, frame) = self.origins.remove(pos);
        tree.destroy(frame)?;
        info!(origin = %id, "origin retired");
        Ok(())
    }
}
