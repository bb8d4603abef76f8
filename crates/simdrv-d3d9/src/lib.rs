//! D3D9-style driver controllers.
//!
//! The API layer describes devices, volumes, surfaces and locks as nodes of a
//! [`StateTree`](simdrv_state::StateTree). The controllers in this crate react to those nodes:
//!
//! - [`DeviceController`] sits on the root and wires each `Device9` node to the managers,
//! - [`ImageMemoryManager`] backs every image with a tiled device-memory region and records the
//!   backing in the registry of the [`DriverContext`],
//! - [`LockSynchronizer`] sizes lock regions and moves their bytes into the Morton-tiled image
//!   and on to device memory.
//!
//! [`Driver`] bundles a tree with the controllers and offers node builders.

#![forbid(unsafe_code)]

mod context;
mod device;
mod driver;
mod error;
mod image;
mod lock;
mod manager;

pub use context::{DriverConfig, DriverContext, LockPrefill};
pub use device::DeviceController;
pub use driver::{Driver, SurfaceDesc, VolumeDesc};
pub use error::DriverError;
pub use image::{ImageInfo, ImageKind};
pub use lock::{LockFlags, LockRegion, LockSynchronizer};
pub use manager::ImageMemoryManager;
