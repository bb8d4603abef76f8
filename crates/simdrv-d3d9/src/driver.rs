use std::rc::Rc;

use simdrv_mem::{DeviceMemory, MemoryDescriptor};
use simdrv_state::{NodeHandle, StateError, StateTree};
use simdrv_tiling::D3dFormat;
use simdrv_types::{Id, Name};

use crate::image::backing_memory;
use crate::{
    DeviceController, DriverConfig, DriverContext, DriverError, ImageKind, LockFlags, LockRegion,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeDesc {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub format: D3dFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SurfaceDesc {
    pub width: u32,
    pub height: u32,
    pub format: D3dFormat,
}

/// Entry point of the driver core: a state tree with the device controller on its root.
///
/// The helpers build nodes the way the API layer does. Anything they do can also be done by
/// editing [`Driver::tree_mut`] directly; the controllers only ever react to tree events.
#[derive(Debug)]
pub struct Driver {
    tree: StateTree,
    ctx: Rc<DriverContext>,
    device_controller: Rc<DeviceController>,
    next_device: u32,
    next_image: u32,
    next_lock: u32,
}

impl Driver {
    pub fn new(memory: Rc<dyn DeviceMemory>, config: DriverConfig) -> Result<Self, DriverError> {
        Self::with_context(Rc::new(DriverContext::new(memory, config)))
    }

    pub fn with_context(ctx: Rc<DriverContext>) -> Result<Self, DriverError> {
        let mut tree = StateTree::new();
        let device_controller = DeviceController::new(ctx.clone());
        let root = tree.root();
        tree.add_controller(root, device_controller.clone())
            .map_err(lift)?;
        Ok(Self {
            tree,
            ctx,
            device_controller,
            next_device: 0,
            next_image: 0,
            next_lock: 0,
        })
    }

    pub fn tree(&self) -> &StateTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut StateTree {
        &mut self.tree
    }

    pub fn context(&self) -> &Rc<DriverContext> {
        &self.ctx
    }

    pub fn device_controller(&self) -> &Rc<DeviceController> {
        &self.device_controller
    }

    pub fn create_device(&mut self) -> Result<NodeHandle, DriverError> {
        let id = Id::new(Name::Device9, self.next_device);
        self.next_device += 1;
        let root = self.tree.root();
        self.tree.create_child(root, id).map_err(lift)
    }

    pub fn create_volume(
        &mut self,
        device: NodeHandle,
        desc: VolumeDesc,
    ) -> Result<NodeHandle, DriverError> {
        let id = self.image_id(ImageKind::Volume);
        let volume = self.tree.create_node(id);
        self.put(volume, Name::Width, desc.width)?;
        self.put(volume, Name::Height, desc.height)?;
        self.put(volume, Name::Depth, desc.depth)?;
        self.put(volume, Name::Format, desc.format.raw())?;
        self.tree.create_child(volume, Id::named(Name::Data))?;
        self.attach(device, volume)
    }

    pub fn create_surface(
        &mut self,
        device: NodeHandle,
        desc: SurfaceDesc,
    ) -> Result<NodeHandle, DriverError> {
        let id = self.image_id(ImageKind::Surface);
        let surface = self.tree.create_node(id);
        self.put(surface, Name::Width, desc.width)?;
        self.put(surface, Name::Height, desc.height)?;
        self.put(surface, Name::Format, desc.format.raw())?;
        self.tree.create_child(surface, Id::named(Name::Data))?;
        self.attach(device, surface)
    }

    /// Opens a lock box on `volume`. The returned node's `Data` child holds the region.
    pub fn lock_box(
        &mut self,
        volume: NodeHandle,
        region: LockRegion,
        flags: LockFlags,
    ) -> Result<NodeHandle, DriverError> {
        let id = self.lock_id(Name::LockBox);
        let lock = self.tree.create_node(id);
        self.put(lock, Name::Left, region.left)?;
        self.put(lock, Name::Top, region.top)?;
        self.put(lock, Name::Front, region.front)?;
        self.put(lock, Name::Right, region.right)?;
        self.put(lock, Name::Bottom, region.bottom)?;
        self.put(lock, Name::Back, region.back)?;
        self.open_lock(volume, lock, flags)
    }

    /// Opens a lock rect on `surface`. Only the 2D part of `region` is used.
    pub fn lock_rect(
        &mut self,
        surface: NodeHandle,
        region: LockRegion,
        flags: LockFlags,
    ) -> Result<NodeHandle, DriverError> {
        let id = self.lock_id(Name::LockRect);
        let lock = self.tree.create_node(id);
        self.put(lock, Name::Left, region.left)?;
        self.put(lock, Name::Top, region.top)?;
        self.put(lock, Name::Right, region.right)?;
        self.put(lock, Name::Bottom, region.bottom)?;
        self.open_lock(surface, lock, flags)
    }

    /// Writes the whole lock data, which pushes it into the image and device memory.
    pub fn write_lock(&mut self, lock: NodeHandle, bytes: &[u8]) -> Result<(), DriverError> {
        let data = self.tree.get_child(lock, Id::named(Name::Data))?;
        self.tree.write_data(data, bytes, 0).map_err(lift)
    }

    pub fn lock_data(&self, lock: NodeHandle) -> Result<&[u8], DriverError> {
        let data = self.tree.get_child(lock, Id::named(Name::Data))?;
        Ok(self.tree.data(data)?)
    }

    /// Device memory currently backing `image`.
    pub fn image_memory(&self, image: NodeHandle) -> Result<MemoryDescriptor, DriverError> {
        let id = self.tree.id(image)?;
        let kind = ImageKind::of_node(id.name).ok_or(DriverError::UnexpectedNode {
            op: "image memory",
            node: id,
            expected: Name::Volume9,
        })?;
        backing_memory(&self.ctx, kind, id.index)
    }

    /// Reads back the device region of `image`.
    pub fn read_image_memory(&self, image: NodeHandle) -> Result<Vec<u8>, DriverError> {
        let md = self.image_memory(image)?;
        let size = self.ctx.memory().size_of(md)?;
        let mut bytes = vec![0u8; size as usize];
        self.ctx.memory().read(md, 0, &mut bytes)?;
        Ok(bytes)
    }

    /// Releases a device, image or lock together with everything under it.
    pub fn release(&mut self, node: NodeHandle) -> Result<(), DriverError> {
        match self.tree.parent(node)? {
            Some(parent) => self.tree.remove_child(parent, node).map_err(lift),
            None => self.tree.destroy_node(node).map_err(lift),
        }
    }

    fn image_id(&mut self, kind: ImageKind) -> Id {
        let id = Id::new(kind.node_name(), self.next_image);
        self.next_image += 1;
        id
    }

    fn lock_id(&mut self, name: Name) -> Id {
        let id = Id::new(name, self.next_lock);
        self.next_lock += 1;
        id
    }

    fn put(&mut self, node: NodeHandle, name: Name, value: u32) -> Result<(), DriverError> {
        self.tree.create_value_child(node, Id::named(name), value)?;
        Ok(())
    }

    fn open_lock(
        &mut self,
        image: NodeHandle,
        lock: NodeHandle,
        flags: LockFlags,
    ) -> Result<NodeHandle, DriverError> {
        if !flags.is_empty() {
            self.put(lock, Name::Flags, flags.bits())?;
        }
        self.tree.create_child(lock, Id::named(Name::Data))?;
        self.attach(image, lock)
    }

    /// Links a fully built node under `parent`. If a controller rejects it, it is taken out again.
    fn attach(&mut self, parent: NodeHandle, node: NodeHandle) -> Result<NodeHandle, DriverError> {
        if let Err(err) = self.tree.add_child(parent, node) {
            let cleanup = match self.tree.parent(node) {
                Ok(Some(_)) => self.tree.remove_child(parent, node),
                _ => self.tree.destroy_node(node),
            };
            if let Err(cleanup) = cleanup {
                tracing::warn!(error = %cleanup, "failed to discard rejected node");
            }
            return Err(lift(err));
        }
        Ok(node)
    }
}

/// Surfaces the driver error behind a controller failure.
fn lift(err: StateError) -> DriverError {
    match err {
        StateError::Controller {
            controller,
            event,
            source,
        } => match source.downcast::<DriverError>() {
            Ok(inner) => match *inner {
                DriverError::State(state) => lift(state),
                other => other,
            },
            Err(source) => DriverError::State(StateError::Controller {
                controller,
                event,
                source,
            }),
        },
        other => DriverError::State(other),
    }
}
