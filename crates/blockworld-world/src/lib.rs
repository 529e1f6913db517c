//! `blockworld-world` – the robot's belief about the objects around it.
//!
//! Fuses camera marker sightings, comms-layer signals and the robot's own
//! motion into a set of objects with poses and confidence states.
//!
//! # Modules
//!
//! - [`world`] – [`ObjectWorld`][world::ObjectWorld]: the located and
//!   connected object registries, origin bookkeeping and queries.
//! - [`object`] – per-object records and the Known/Dirty/Unknown pose state.
//! - [`filter`] – [`ObjectFilter`][filter::ObjectFilter]: composable query
//!   predicates.
//! - [`markers`] – correlates marker sightings with objects.
//! - [`collision`] – dirties objects the robot's body drives through.
//! - [`pre_action`] – approach poses around an object, cached per action.
//! - [`geometry`] – boxes, footprints and the marker pose estimator.
//! - [`observer`] – change notifications.
//! - [`config`] – tunables and the marker/object library.
//! - [`block_world`] – [`BlockWorld`][block_world::BlockWorld]: the per-tick
//!   pipeline tying the above together.

pub mod block_world;
pub mod collision;
pub mod config;
pub mod filter;
pub mod geometry;
pub mod markers;
pub mod object;
pub mod observer;
pub mod pre_action;
pub mod world;

pub use block_world::{BlockWorld, RobotPoseUpdate, TickInput, TickSummary};
pub use config::WorldConfig;
pub use filter::{ObjectFilter, OriginMode};
pub use world::ObjectWorld;
