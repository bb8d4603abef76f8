use std::fmt;
use std::rc::{Rc, Weak};

use bitflags::bitflags;
use simdrv_state::{Controller, ControllerResult, NodeHandle, StateTree};
use simdrv_tiling::{FormatInfo, TiledLayout};
use simdrv_types::{Id, Name};

use crate::image::{backing_memory, data_child, put_value};
use crate::{DriverContext, DriverError, ImageInfo, ImageKind, LockPrefill};

bitflags! {
    /// `D3DLOCK_*` flags, read from the optional `Flags` child of a lock node.
    #[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
    pub struct LockFlags: u32 {
        const READONLY = 0x0000_0010;
        const NOSYSLOCK = 0x0000_0800;
        const NOOVERWRITE = 0x0000_1000;
        const DISCARD = 0x0000_2000;
        const DONOTWAIT = 0x0000_4000;
        const NO_DIRTY_UPDATE = 0x0000_8000;
    }
}

/// Half-open texel box `[left, right) x [top, bottom) x [front, back)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRegion {
    pub left: u32,
    pub top: u32,
    pub front: u32,
    pub right: u32,
    pub bottom: u32,
    pub back: u32,
}

impl LockRegion {
    pub const fn new(left: u32, top: u32, front: u32, right: u32, bottom: u32, back: u32) -> Self {
        Self {
            left,
            top,
            front,
            right,
            bottom,
            back,
        }
    }

    /// A single-slice rectangle.
    pub const fn rect(left: u32, top: u32, right: u32, bottom: u32) -> Self {
        Self::new(left, top, 0, right, bottom, 1)
    }

    pub const fn full(width: u32, height: u32, depth: u32) -> Self {
        Self::new(0, 0, 0, width, height, depth)
    }

    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }

    pub fn depth(&self) -> u32 {
        self.back.saturating_sub(self.front)
    }

    pub fn fits(&self, width: u32, height: u32, depth: u32) -> bool {
        self.left <= self.right
            && self.top <= self.bottom
            && self.front <= self.back
            && self.right <= width
            && self.bottom <= height
            && self.back <= depth
    }

    /// Reads the region stored under a lock node. Rect locks have no `Front`/`Back`.
    pub fn read(tree: &StateTree, lock: NodeHandle, kind: ImageKind) -> Result<Self, DriverError> {
        let value = |name| tree.child_value::<u32>(lock, Id::named(name));
        let (front, back) = if kind.has_depth() {
            (value(Name::Front)?, value(Name::Back)?)
        } else {
            (0, 1)
        };
        Ok(Self {
            left: value(Name::Left)?,
            top: value(Name::Top)?,
            front,
            right: value(Name::Right)?,
            bottom: value(Name::Bottom)?,
            back,
        })
    }
}

impl fmt::Display for LockRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}) x [{}, {}) x [{}, {})",
            self.left, self.right, self.top, self.bottom, self.front, self.back
        )
    }
}

/// Element-space footprint of a lock region and the linear layout of its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LockGeometry {
    x: (u32, u32),
    y: (u32, u32),
    z: (u32, u32),
    element_size: usize,
}

impl LockGeometry {
    fn new(region: LockRegion, format: FormatInfo) -> Self {
        Self {
            x: format.element_range(region.left, region.right),
            y: format.element_range(region.top, region.bottom),
            z: (region.front, region.back),
            element_size: format.bytes_per_element as usize,
        }
    }

    fn columns(&self) -> usize {
        (self.x.1 - self.x.0) as usize
    }

    fn rows(&self) -> usize {
        (self.y.1 - self.y.0) as usize
    }

    fn slices(&self) -> usize {
        (self.z.1 - self.z.0) as usize
    }

    fn row_pitch(&self) -> usize {
        self.columns() * self.element_size
    }

    fn slice_pitch(&self) -> usize {
        self.row_pitch() * self.rows()
    }

    fn byte_size(&self) -> usize {
        self.slice_pitch() * self.slices()
    }

    /// Calls `f(lock_offset, image_offset)` for every element of the region.
    fn for_each_element(&self, layout: &TiledLayout, mut f: impl FnMut(usize, usize)) {
        let mut lock_offset = 0;
        for z in self.z.0..self.z.1 {
            for y in self.y.0..self.y.1 {
                for x in self.x.0..self.x.1 {
                    f(lock_offset, layout.element_offset(x, y, z));
                    lock_offset += self.element_size;
                }
            }
        }
    }
}

/// Pitches are published as `i32`, like `D3DLOCKED_BOX`.
fn pitch_value(lock: Id, bytes: usize) -> Result<i32, DriverError> {
    i32::try_from(bytes).map_err(|_| DriverError::PitchOverflow { lock, pitch: bytes })
}

/// Everything needed to move bytes between a lock and its image.
struct OpenLock {
    lock_id: Id,
    image_id: Id,
    image_data: NodeHandle,
    layout: TiledLayout,
    geometry: LockGeometry,
}

/// Keeps image data, lock data and device memory coherent.
///
/// Attached to an image node it watches the image's `Data` child and every lock opened on the
/// image, and through those the locks' `Data` children:
/// - image data writes are copied linearly to the image's device memory,
/// - lock data writes are scattered element by element into the tiled image data, which in
///   turn reaches device memory.
pub struct LockSynchronizer {
    kind: ImageKind,
    ctx: Rc<DriverContext>,
    this: Weak<LockSynchronizer>,
}

impl LockSynchronizer {
    pub fn new(kind: ImageKind, ctx: Rc<DriverContext>) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            kind,
            ctx,
            this: this.clone(),
        })
    }

    /// Synchronizer for volumes and their lock boxes.
    pub fn lock_box(ctx: Rc<DriverContext>) -> Rc<Self> {
        Self::new(ImageKind::Volume, ctx)
    }

    /// Synchronizer for surfaces and their lock rects.
    pub fn lock_rect(ctx: Rc<DriverContext>) -> Rc<Self> {
        Self::new(ImageKind::Surface, ctx)
    }

    pub fn kind(&self) -> ImageKind {
        self.kind
    }

    fn this(&self) -> Result<Rc<dyn Controller>, DriverError> {
        let this: Rc<dyn Controller> = self
            .this
            .upgrade()
            .ok_or(DriverError::ControllerDropped(self.name()))?;
        Ok(this)
    }

    fn watch(&self, tree: &mut StateTree, node: NodeHandle) -> Result<(), DriverError> {
        if !tree.has_controller(node, self)? {
            tree.add_controller(node, self.this()?)?;
        }
        Ok(())
    }

    fn unwatch(&self, tree: &mut StateTree, node: NodeHandle) -> Result<(), DriverError> {
        if tree.has_controller(node, self)? {
            tree.remove_controller(node, self)?;
        }
        Ok(())
    }

    fn open(&self, tree: &StateTree, lock: NodeHandle) -> Result<OpenLock, DriverError> {
        let lock_id = tree.id(lock)?;
        let image = tree.parent(lock)?.ok_or(DriverError::UnexpectedNode {
            op: "open lock",
            node: lock_id,
            expected: self.kind.node_name(),
        })?;
        let info = ImageInfo::read(tree, image, self.kind, self.ctx.formats())?;
        let layout = info.layout(self.ctx.config().tiling)?;

        let region = LockRegion::read(tree, lock, self.kind)?;
        if !region.fits(info.width, info.height, info.depth) {
            return Err(DriverError::InvalidLockRegion {
                image: info.id,
                lock: lock_id,
                region,
                width: info.width,
                height: info.height,
                depth: info.depth,
            });
        }

        Ok(OpenLock {
            lock_id,
            image_id: info.id,
            image_data: tree.get_child(image, Id::named(Name::Data))?,
            layout,
            geometry: LockGeometry::new(region, info.format_info),
        })
    }

    /// Sizes the lock data, publishes its pitches and optionally fills it from the image.
    fn prepare_lock(&self, tree: &mut StateTree, lock: NodeHandle) -> Result<(), DriverError> {
        let open = self.open(tree, lock)?;
        let geometry = open.geometry;

        let data = data_child(tree, lock)?;
        tree.set_data_size(data, geometry.byte_size())?;

        let row_pitch = pitch_value(open.lock_id, geometry.row_pitch())?;
        if self.kind.has_depth() {
            let slice_pitch = pitch_value(open.lock_id, geometry.slice_pitch())?;
            put_value(tree, lock, Id::named(Name::RowPitch), row_pitch)?;
            put_value(tree, lock, Id::named(Name::SlicePitch), slice_pitch)?;
        } else {
            put_value(tree, lock, Id::named(Name::Pitch), row_pitch)?;
        }

        let flags = match tree.find_child(lock, Id::named(Name::Flags)) {
            Some(node) => LockFlags::from_bits_truncate(tree.read_value::<u32>(node)?),
            None => LockFlags::empty(),
        };
        let prefill = match self.ctx.config().lock_prefill {
            LockPrefill::Never => false,
            LockPrefill::UnlessDiscard => !flags.contains(LockFlags::DISCARD),
        };
        if prefill {
            let image = tree.data(open.image_data)?;
            if image.len() < open.layout.byte_size() {
                return Err(DriverError::ImageDataSize {
                    image: open.image_id,
                    expected: open.layout.byte_size(),
                    actual: image.len(),
                });
            }
            let mut bytes = vec![0u8; geometry.byte_size()];
            let size = geometry.element_size;
            geometry.for_each_element(&open.layout, |lock_offset, image_offset| {
                bytes[lock_offset..lock_offset + size]
                    .copy_from_slice(&image[image_offset..image_offset + size]);
            });
            // Nothing watches the lock data yet.
            tree.write_data(data, &bytes, 0)?;
        }

        tracing::debug!(
            lock = %open.lock_id,
            size = geometry.byte_size(),
            row_pitch,
            ?flags,
            prefill,
            "lock data sized"
        );
        Ok(())
    }

    /// Copies `size` bytes at `offset` of an image's data node to its device memory.
    fn push_image_data(
        &self,
        tree: &StateTree,
        image: NodeHandle,
        data: NodeHandle,
        size: usize,
        offset: usize,
    ) -> Result<(), DriverError> {
        let id = tree.id(image)?;
        let md = backing_memory(&self.ctx, self.kind, id.index)?;

        let mut bytes = vec![0u8; size];
        tree.read_data(data, &mut bytes, offset)?;
        self.ctx.memory().write(md, offset as u64, &bytes)?;

        tracing::trace!(image = %id, %md, offset, size, "image data pushed to device memory");
        Ok(())
    }

    /// Scatters the whole lock data into the tiled image data.
    fn scatter_lock_data(
        &self,
        tree: &mut StateTree,
        lock: NodeHandle,
        data: NodeHandle,
    ) -> Result<(), DriverError> {
        let open = self.open(tree, lock)?;
        let geometry = open.geometry;
        let expected = geometry.byte_size();
        if expected == 0 {
            return Ok(());
        }

        let src = tree.data(data)?.to_vec();
        if src.len() != expected {
            return Err(DriverError::LockDataSize {
                lock: open.lock_id,
                expected,
                actual: src.len(),
            });
        }

        // Only the touched span of the image is mapped, and so pushed to device memory.
        let (mut lo, mut hi) = (usize::MAX, 0);
        geometry.for_each_element(&open.layout, |_, image_offset| {
            lo = lo.min(image_offset);
            hi = hi.max(image_offset + geometry.element_size);
        });

        let size = geometry.element_size;
        let mut elements = 0usize;
        let mut image = tree.map_data_write(open.image_data, lo, hi - lo)?;
        geometry.for_each_element(&open.layout, |lock_offset, image_offset| {
            let at = image_offset - lo;
            image[at..at + size].copy_from_slice(&src[lock_offset..lock_offset + size]);
            elements += 1;
        });
        image.unmap()?;

        tracing::trace!(lock = %open.lock_id, elements, span = hi - lo, "lock data scattered");
        Ok(())
    }
}

impl Controller for LockSynchronizer {
    fn name(&self) -> &'static str {
        match self.kind {
            ImageKind::Volume => "lock-box-sync",
            ImageKind::Surface => "lock-rect-sync",
        }
    }

    fn on_add_node_child(
        &self,
        tree: &mut StateTree,
        parent: NodeHandle,
        child: NodeHandle,
    ) -> ControllerResult {
        if tree.id(parent)?.name == self.kind.node_name()
            && tree.id(child)?.name == self.kind.lock_name()
        {
            self.prepare_lock(tree, child)?;
            self.watch(tree, child)?;
        }
        Ok(())
    }

    fn on_remove_node_child(
        &self,
        tree: &mut StateTree,
        _parent: NodeHandle,
        child: NodeHandle,
    ) -> ControllerResult {
        if tree.id(child)?.name == self.kind.lock_name() {
            self.unwatch(tree, child)?;
        }
        Ok(())
    }

    fn on_write_node_data(
        &self,
        tree: &mut StateTree,
        node: NodeHandle,
        size: usize,
        offset: usize,
    ) -> ControllerResult {
        if tree.id(node)?.name != Name::Data {
            return Ok(());
        }
        let Some(owner) = tree.parent(node)? else {
            return Ok(());
        };

        let owner_name = tree.id(owner)?.name;
        if owner_name == self.kind.node_name() {
            self.push_image_data(tree, owner, node, size, offset)?;
        } else if owner_name == self.kind.lock_name() {
            self.scatter_lock_data(tree, owner, node)?;
        }
        Ok(())
    }

    fn on_added_controller(&self, tree: &mut StateTree, node: NodeHandle) -> ControllerResult {
        let name = tree.id(node)?.name;
        if name == self.kind.node_name() || name == self.kind.lock_name() {
            let data = tree.get_child(node, Id::named(Name::Data))?;
            self.watch(tree, data)?;
        }
        Ok(())
    }

    fn on_removed_controller(&self, tree: &mut StateTree, node: NodeHandle) -> ControllerResult {
        let name = tree.id(node)?.name;
        if name == self.kind.node_name() || name == self.kind.lock_name() {
            if let Some(data) = tree.find_child(node, Id::named(Name::Data)) {
                self.unwatch(tree, data)?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for LockSynchronizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockSynchronizer")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}
