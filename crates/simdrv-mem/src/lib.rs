//! Simulated device memory as seen by the driver layer.
//!
//! The simulated GPU owns a flat memory array; the driver only ever talks to it through opaque
//! descriptors handed out by [`DeviceMemory::allocate`]. [`VecDeviceMemory`] is the in-process
//! implementation used by the driver and its tests: one contiguous byte array carved up by a
//! [`RegionAllocator`].

#![forbid(unsafe_code)]

mod allocator;
mod device_memory;

pub use allocator::RegionAllocator;
pub use device_memory::{
    DeviceMemory, DeviceMemoryError, MemoryDescriptor, MemoryOptions, VecDeviceMemory,
};
