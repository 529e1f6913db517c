//! `blockworld-frames` – coordinate frames for the world model.
//!
//! # Modules
//!
//! - [`math`] – [`Vec3`][math::Vec3], [`Quaternion`][math::Quaternion] and
//!   [`Transform3D`][math::Transform3D] rigid-body algebra.
//! - [`tree`] – [`FrameTree`][tree::FrameTree]: arena of pose nodes with
//!   generational handles; composes poses between any two nodes sharing a
//!   root.
//! - [`origins`] – [`OriginManager`][origins::OriginManager]: the set of
//!   coordinate origins and which one the robot currently lives in.

pub mod math;
pub mod origins;
pub mod tree;

pub use math::{Quaternion, Transform3D, Vec3};
pub use origins::OriginManager;
pub use tree::{FrameId, FrameTree, MAX_TREE_DEPTH};
