use core::fmt;
use std::cell::{Ref, RefCell};
use std::collections::BTreeMap;
use std::num::NonZeroU32;

use crate::allocator::{align_up, RegionAllocator};

/// Opaque handle to a region of device memory. Never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MemoryDescriptor(NonZeroU32);

impl MemoryDescriptor {
    pub fn from_raw(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    pub fn raw(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for MemoryDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "md#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceMemoryError {
    #[error("allocate: zero-sized allocation")]
    ZeroSize,

    #[error("allocate: out of device memory (requested={requested:#x}, available={available:#x})")]
    OutOfMemory { requested: u64, available: u64 },

    #[error("{op}: unknown memory descriptor {md}")]
    InvalidDescriptor {
        op: &'static str,
        md: MemoryDescriptor,
    },

    #[error("{op}: access out of bounds (md={md}, offset={offset:#x}, len={len:#x}, size={size:#x})")]
    OutOfBounds {
        op: &'static str,
        md: MemoryDescriptor,
        offset: u64,
        len: u64,
        size: u64,
    },
}

/// Device memory as exposed by the simulated GPU.
///
/// All methods take `&self`; implementations are expected to use interior mutability so the
/// memory can be shared between the controllers that keep images coherent with it.
pub trait DeviceMemory {
    fn allocate(&self, size_bytes: u64) -> Result<MemoryDescriptor, DeviceMemoryError>;
    fn release(&self, md: MemoryDescriptor) -> Result<(), DeviceMemoryError>;
    fn write(&self, md: MemoryDescriptor, offset: u64, src: &[u8]) -> Result<(), DeviceMemoryError>;
    fn read(&self, md: MemoryDescriptor, offset: u64, dst: &mut [u8])
        -> Result<(), DeviceMemoryError>;
    fn size_of(&self, md: MemoryDescriptor) -> Result<u64, DeviceMemoryError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryOptions {
    /// Total bytes of device memory.
    pub capacity: u64,
    /// Alignment of every allocation, in bytes.
    pub alignment: u64,
}

impl Default for MemoryOptions {
    fn default() -> Self {
        Self {
            capacity: 64 * 1024 * 1024,
            alignment: 256,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Region {
    offset: u64,
    size: u64,
}

#[derive(Debug)]
struct Inner {
    bytes: Vec<u8>,
    allocator: RegionAllocator,
    regions: BTreeMap<MemoryDescriptor, Region>,
    next_descriptor: u32,
}

impl Inner {
    fn region(&self, op: &'static str, md: MemoryDescriptor) -> Result<Region, DeviceMemoryError> {
        self.regions
            .get(&md)
            .copied()
            .ok_or(DeviceMemoryError::InvalidDescriptor { op, md })
    }

    /// Absolute byte range of `len` bytes at `offset` inside the region of `md`.
    fn span(
        &self,
        op: &'static str,
        md: MemoryDescriptor,
        offset: u64,
        len: usize,
    ) -> Result<std::ops::Range<usize>, DeviceMemoryError> {
        let region = self.region(op, md)?;
        let len = len as u64;
        let oob = DeviceMemoryError::OutOfBounds {
            op,
            md,
            offset,
            len,
            size: region.size,
        };
        let end = offset.checked_add(len).ok_or(oob.clone())?;
        if end > region.size {
            return Err(oob);
        }
        let start = usize::try_from(region.offset + offset).map_err(|_| oob.clone())?;
        let end = usize::try_from(region.offset + end).map_err(|_| oob)?;
        Ok(start..end)
    }
}

/// Contiguous in-process device memory.
#[derive(Debug)]
pub struct VecDeviceMemory {
    options: MemoryOptions,
    inner: RefCell<Inner>,
}

impl VecDeviceMemory {
    pub fn new(options: MemoryOptions) -> Self {
        let capacity = usize::try_from(options.capacity).unwrap_or(usize::MAX);
        Self {
            options,
            inner: RefCell::new(Inner {
                bytes: vec![0u8; capacity],
                allocator: RegionAllocator::new(0, capacity as u64),
                regions: BTreeMap::new(),
                next_descriptor: 1,
            }),
        }
    }

    pub fn with_capacity(capacity: u64) -> Self {
        Self::new(MemoryOptions {
            capacity,
            ..MemoryOptions::default()
        })
    }

    pub fn options(&self) -> MemoryOptions {
        self.options
    }

    /// Whole device memory, for inspection.
    pub fn as_slice(&self) -> Ref<'_, [u8]> {
        Ref::map(self.inner.borrow(), |inner| inner.bytes.as_slice())
    }

    /// Copy of the bytes backing `md`.
    pub fn region_bytes(&self, md: MemoryDescriptor) -> Result<Vec<u8>, DeviceMemoryError> {
        let inner = self.inner.borrow();
        let region = inner.region("region_bytes", md)?;
        let span = inner.span("region_bytes", md, 0, region.size as usize)?;
        Ok(inner.bytes[span].to_vec())
    }

    /// Offset of the region of `md` inside device memory.
    pub fn region_offset(&self, md: MemoryDescriptor) -> Result<u64, DeviceMemoryError> {
        Ok(self.inner.borrow().region("region_offset", md)?.offset)
    }

    /// Bytes currently handed out, alignment padding excluded.
    pub fn allocated_bytes(&self) -> u64 {
        self.inner.borrow().regions.values().map(|r| r.size).sum()
    }

    pub fn live_allocations(&self) -> usize {
        self.inner.borrow().regions.len()
    }

    pub fn is_live(&self, md: MemoryDescriptor) -> bool {
        self.inner.borrow().regions.contains_key(&md)
    }
}

impl Default for VecDeviceMemory {
    fn default() -> Self {
        Self::new(MemoryOptions::default())
    }
}

impl DeviceMemory for VecDeviceMemory {
    fn allocate(&self, size_bytes: u64) -> Result<MemoryDescriptor, DeviceMemoryError> {
        if size_bytes == 0 {
            return Err(DeviceMemoryError::ZeroSize);
        }

        let mut inner = self.inner.borrow_mut();
        // Reserve whole alignment units so released regions stay aligned for reuse.
        let reserved = align_up(size_bytes, self.options.alignment.max(1)).ok_or(
            DeviceMemoryError::OutOfMemory {
                requested: size_bytes,
                available: inner.allocator.available(),
            },
        )?;
        let offset = inner
            .allocator
            .alloc(reserved, self.options.alignment)
            .ok_or(DeviceMemoryError::OutOfMemory {
                requested: size_bytes,
                available: inner.allocator.available(),
            })?;

        let md = MemoryDescriptor::from_raw(inner.next_descriptor).ok_or(
            DeviceMemoryError::OutOfMemory {
                requested: size_bytes,
                available: 0,
            },
        )?;
        inner.next_descriptor = inner.next_descriptor.wrapping_add(1);
        inner.regions.insert(
            md,
            Region {
                offset,
                size: size_bytes,
            },
        );

        tracing::debug!(%md, offset, size = size_bytes, "device memory allocated");
        Ok(md)
    }

    fn release(&self, md: MemoryDescriptor) -> Result<(), DeviceMemoryError> {
        let mut inner = self.inner.borrow_mut();
        let region = inner
            .regions
            .remove(&md)
            .ok_or(DeviceMemoryError::InvalidDescriptor { op: "release", md })?;
        let reserved = align_up(region.size, self.options.alignment.max(1)).unwrap_or(region.size);
        inner.allocator.free(region.offset, reserved);

        tracing::debug!(%md, offset = region.offset, size = region.size, "device memory released");
        Ok(())
    }

    fn write(&self, md: MemoryDescriptor, offset: u64, src: &[u8]) -> Result<(), DeviceMemoryError> {
        let mut inner = self.inner.borrow_mut();
        let span = inner.span("write", md, offset, src.len())?;
        inner.bytes[span].copy_from_slice(src);
        tracing::trace!(%md, offset, len = src.len(), "device memory write");
        Ok(())
    }

    fn read(
        &self,
        md: MemoryDescriptor,
        offset: u64,
        dst: &mut [u8],
    ) -> Result<(), DeviceMemoryError> {
        let inner = self.inner.borrow();
        let span = inner.span("read", md, offset, dst.len())?;
        dst.copy_from_slice(&inner.bytes[span]);
        Ok(())
    }

    fn size_of(&self, md: MemoryDescriptor) -> Result<u64, DeviceMemoryError> {
        Ok(self.inner.borrow().region("size_of", md)?.size)
    }
}
