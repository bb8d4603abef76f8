use std::fmt;
use std::rc::Rc;

use simdrv_assign::ResourceId;
use simdrv_mem::MemoryDescriptor;
use simdrv_state::{Controller, ControllerResult, NodeHandle, StateTree};
use simdrv_types::Name;

use crate::image::data_child;
use crate::{DriverContext, DriverError, ImageInfo, ImageKind, LockSynchronizer};

/// Backs every image of one kind under a device with device memory.
///
/// The manager owns one [`LockSynchronizer`] and attaches it to each image it sets up.
pub struct ImageMemoryManager {
    kind: ImageKind,
    ctx: Rc<DriverContext>,
    sync: Rc<LockSynchronizer>,
}

impl ImageMemoryManager {
    pub fn new(kind: ImageKind, ctx: Rc<DriverContext>) -> Rc<Self> {
        Rc::new(Self {
            kind,
            sync: LockSynchronizer::new(kind, ctx.clone()),
            ctx,
        })
    }

    pub fn volumes(ctx: Rc<DriverContext>) -> Rc<Self> {
        Self::new(ImageKind::Volume, ctx)
    }

    pub fn surfaces(ctx: Rc<DriverContext>) -> Rc<Self> {
        Self::new(ImageKind::Surface, ctx)
    }

    pub fn kind(&self) -> ImageKind {
        self.kind
    }

    pub fn synchronizer(&self) -> &Rc<LockSynchronizer> {
        &self.sync
    }

    fn is_image(&self, tree: &StateTree, node: NodeHandle) -> Result<bool, DriverError> {
        Ok(tree.id(node)?.name == self.kind.node_name())
    }

    fn is_set_up(&self, tree: &StateTree, image: NodeHandle) -> Result<bool, DriverError> {
        Ok(tree.has_controller(image, &*self.sync)?)
    }

    fn setup_image(&self, tree: &mut StateTree, image: NodeHandle) -> Result<(), DriverError> {
        let info = ImageInfo::read(tree, image, self.kind, self.ctx.formats())?;
        let size = info.layout(self.ctx.config().tiling)?.byte_size();
        let pattern = self.ctx.config().fill_pattern;

        let data = data_child(tree, image)?;
        tree.resize_data(data, size)?;
        tree.write_data(data, &vec![pattern; size], 0)?;

        let md = self.ctx.memory().allocate(size as u64)?;
        if let Err(err) = self.back_with(md, info.id.index, pattern, size) {
            // The descriptor was never published.
            let _ = self.ctx.memory().release(md);
            return Err(err);
        }

        tracing::debug!(
            image = %info.id,
            width = info.width,
            height = info.height,
            depth = info.depth,
            format = info.format,
            size,
            %md,
            "image backed by device memory"
        );

        tree.add_controller(image, self.sync.clone())?;
        Ok(())
    }

    fn back_with(
        &self,
        md: MemoryDescriptor,
        index: u32,
        pattern: u8,
        size: usize,
    ) -> Result<(), DriverError> {
        self.ctx.memory().write(md, 0, &vec![pattern; size])?;

        let resource = ResourceId::new(Name::Memory, md.raw());
        let usage = self.kind.usage(index);
        self.ctx.with_table(self.kind.table_name(), |table| {
            table.add_resource(resource)?;
            if let Err(err) = table.assign(usage, resource) {
                // Just added, so nothing else refers to it.
                let _ = table.remove_resource(resource);
                return Err(err);
            }
            Ok(())
        })?;
        Ok(())
    }

    fn release_image(&self, tree: &mut StateTree, image: NodeHandle) -> Result<(), DriverError> {
        // Images whose setup failed early hold nothing.
        if !self.is_set_up(tree, image)? {
            return Ok(());
        }
        tree.remove_controller(image, &*self.sync)?;

        let id = tree.id(image)?;
        let usage = self.kind.usage(id.index);
        let resource = self.ctx.with_table(self.kind.table_name(), |table| {
            let resource = table.unassign(usage)?;
            table.remove_resource(resource)?;
            Ok::<_, DriverError>(resource)
        })?;

        let md = MemoryDescriptor::from_raw(resource.index()).ok_or(
            DriverError::MissingAssignment {
                op: "release image",
                table: self.kind.table_name(),
                usage,
            },
        )?;
        self.ctx.memory().release(md)?;

        tracing::debug!(image = %id, %md, "image memory released");
        Ok(())
    }
}

impl Controller for ImageMemoryManager {
    fn name(&self) -> &'static str {
        match self.kind {
            ImageKind::Volume => "volume-manager",
            ImageKind::Surface => "surface-manager",
        }
    }

    fn on_add_node_child(
        &self,
        tree: &mut StateTree,
        _parent: NodeHandle,
        child: NodeHandle,
    ) -> ControllerResult {
        if self.is_image(tree, child)? {
            self.setup_image(tree, child)?;
        }
        Ok(())
    }

    fn on_remove_node_child(
        &self,
        tree: &mut StateTree,
        _parent: NodeHandle,
        child: NodeHandle,
    ) -> ControllerResult {
        if self.is_image(tree, child)? {
            self.release_image(tree, child)?;
        }
        Ok(())
    }

    fn on_added_controller(&self, tree: &mut StateTree, device: NodeHandle) -> ControllerResult {
        for image in tree.find_children_named(device, self.kind.node_name()) {
            let usage = self.kind.usage(tree.id(image)?.index);
            let adopted = self
                .ctx
                .registry()
                .table(self.kind.table_name())
                .is_some_and(|table| table.is_assigned(usage));
            if !adopted {
                self.setup_image(tree, image)?;
            }
        }
        Ok(())
    }

    fn on_removed_controller(&self, tree: &mut StateTree, device: NodeHandle) -> ControllerResult {
        for image in tree.find_children_named(device, self.kind.node_name()) {
            self.release_image(tree, image)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ImageMemoryManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageMemoryManager")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}
