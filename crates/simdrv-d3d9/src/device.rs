use std::fmt;
use std::rc::{Rc, Weak};

use simdrv_state::{Controller, ControllerResult, NodeHandle, StateTree};
use simdrv_types::Name;

use crate::{DriverContext, DriverError, ImageKind, ImageMemoryManager};

/// Root controller: wires every `Device9` node to the image memory managers.
///
/// Surfaces are set up before volumes and torn down after them.
pub struct DeviceController {
    ctx: Rc<DriverContext>,
    surfaces: Rc<ImageMemoryManager>,
    volumes: Rc<ImageMemoryManager>,
    this: Weak<DeviceController>,
}

impl DeviceController {
    pub fn new(ctx: Rc<DriverContext>) -> Rc<Self> {
        Rc::new_cyclic(|this| Self {
            surfaces: ImageMemoryManager::surfaces(ctx.clone()),
            volumes: ImageMemoryManager::volumes(ctx.clone()),
            ctx,
            this: this.clone(),
        })
    }

    pub fn manager(&self, kind: ImageKind) -> &Rc<ImageMemoryManager> {
        match kind {
            ImageKind::Volume => &self.volumes,
            ImageKind::Surface => &self.surfaces,
        }
    }

    fn is_device(tree: &StateTree, node: NodeHandle) -> Result<bool, DriverError> {
        Ok(tree.id(node)?.name == Name::Device9)
    }
}

impl Controller for DeviceController {
    fn name(&self) -> &'static str {
        "device"
    }

    fn on_add_node_child(
        &self,
        tree: &mut StateTree,
        _parent: NodeHandle,
        child: NodeHandle,
    ) -> ControllerResult {
        if Self::is_device(tree, child)? && !tree.has_controller(child, self)? {
            let this: Rc<dyn Controller> = self
                .this
                .upgrade()
                .ok_or(DriverError::ControllerDropped(self.name()))?;
            tree.add_controller(child, this)?;
        }
        Ok(())
    }

    fn on_remove_node_child(
        &self,
        tree: &mut StateTree,
        _parent: NodeHandle,
        child: NodeHandle,
    ) -> ControllerResult {
        if Self::is_device(tree, child)? && tree.has_controller(child, self)? {
            tree.remove_controller(child, self)?;
        }
        Ok(())
    }

    fn on_added_controller(&self, tree: &mut StateTree, node: NodeHandle) -> ControllerResult {
        if !Self::is_device(tree, node)? {
            return Ok(());
        }
        for kind in [ImageKind::Surface, ImageKind::Volume] {
            self.ctx.ensure_table(kind.table_name());
        }
        for manager in [&self.surfaces, &self.volumes] {
            if !tree.has_controller(node, &**manager)? {
                tree.add_controller(node, manager.clone())?;
            }
        }
        tracing::debug!(device = %tree.id(node)?, "device attached");
        Ok(())
    }

    fn on_removed_controller(&self, tree: &mut StateTree, node: NodeHandle) -> ControllerResult {
        if !Self::is_device(tree, node)? {
            return Ok(());
        }
        for manager in [&self.volumes, &self.surfaces] {
            if tree.has_controller(node, &**manager)? {
                tree.remove_controller(node, &**manager)?;
            }
        }
        for kind in [ImageKind::Volume, ImageKind::Surface] {
            self.ctx.drop_table_if_empty(kind.table_name());
        }
        tracing::debug!(device = %tree.id(node)?, "device detached");
        Ok(())
    }
}

impl fmt::Debug for DeviceController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceController")
            .field("surfaces", &self.surfaces)
            .field("volumes", &self.volumes)
            .finish_non_exhaustive()
    }
}
