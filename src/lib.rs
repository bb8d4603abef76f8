//! Driver-emulation core of the GPU simulator.
//!
//! This crate only re-exports the workspace members:
//!
//! - [`types`]: node, usage and resource names,
//! - [`tiling`]: Morton address codec and texel formats,
//! - [`mem`]: device memory,
//! - [`assign`]: resource assignment registry,
//! - [`state`]: the reactive state tree,
//! - [`d3d9`]: the controllers that keep D3D9 images in sync with device memory.
//!
//! The most used items are also available at the top level.

pub use simdrv_assign as assign;
pub use simdrv_d3d9 as d3d9;
pub use simdrv_mem as mem;
pub use simdrv_state as state;
pub use simdrv_tiling as tiling;
pub use simdrv_types as types;

pub use simdrv_d3d9::{
    Driver, DriverConfig, DriverError, LockFlags, LockPrefill, LockRegion, SurfaceDesc, VolumeDesc,
};
pub use simdrv_mem::{DeviceMemory, MemoryOptions, VecDeviceMemory};
pub use simdrv_state::{Controller, NodeHandle, StateTree};
pub use simdrv_types::{Id, Name};
