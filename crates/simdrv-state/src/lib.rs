//! Reactive object-state tree.
//!
//! Every logical object created by the client API (devices, images, locked regions) is a node
//! in a [`StateTree`]. Nodes carry a resizable byte payload and own their children, keyed by
//! [`Id`](simdrv_types::Id). [`Controller`]s attached to a node are told about structural
//! changes and payload writes on that node; the driver layer is built entirely out of such
//! controllers.
//!
//! Events always follow the mutation they describe, with one exception: removal is announced
//! while the child is still linked and alive, so controllers can read it one last time.

#![forbid(unsafe_code)]

mod controller;
mod error;
mod mapping;
mod tree;

pub use controller::{Controller, ControllerError, ControllerResult, NodeEvent, WatchState};
pub use error::StateError;
pub use mapping::MappedData;
pub use tree::{NodeHandle, StateTree};
