use crate::{NodeHandle, StateTree};

/// Error returned by controller callbacks. Any crate error converts into it with `?`.
pub type ControllerError = Box<dyn std::error::Error + Send + Sync>;
pub type ControllerResult = Result<(), ControllerError>;

/// Reacts to changes of the nodes it is attached to.
///
/// Callbacks take `&self`: a controller is shared between every node it watches and is
/// re-entered whenever one of its callbacks mutates the tree. Controllers that need mutable
/// state keep it in a `Cell`/`RefCell`.
///
/// All callbacks default to doing nothing.
#[allow(unused_variables)]
pub trait Controller {
    /// Short name used in error reports.
    fn name(&self) -> &'static str {
        "controller"
    }

    /// `child` has just been linked under `parent`.
    fn on_add_node_child(
        &self,
        tree: &mut StateTree,
        parent: NodeHandle,
        child: NodeHandle,
    ) -> ControllerResult {
        Ok(())
    }

    /// `child` is about to be unlinked from `parent` and destroyed. It is still readable.
    fn on_remove_node_child(
        &self,
        tree: &mut StateTree,
        parent: NodeHandle,
        child: NodeHandle,
    ) -> ControllerResult {
        Ok(())
    }

    /// `size` bytes at `offset` of the payload of `node` have been written.
    fn on_write_node_data(
        &self,
        tree: &mut StateTree,
        node: NodeHandle,
        size: usize,
        offset: usize,
    ) -> ControllerResult {
        Ok(())
    }

    /// This controller has just been attached to `node`.
    fn on_added_controller(&self, tree: &mut StateTree, node: NodeHandle) -> ControllerResult {
        Ok(())
    }

    /// This controller is about to be detached from `node`.
    fn on_removed_controller(&self, tree: &mut StateTree, node: NodeHandle) -> ControllerResult {
        Ok(())
    }
}

/// The closed set of notifications a node can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeEvent {
    AddChild { parent: NodeHandle, child: NodeHandle },
    RemoveChild { parent: NodeHandle, child: NodeHandle },
    WriteData { node: NodeHandle, size: usize, offset: usize },
    AddedController { node: NodeHandle },
    RemovedController { node: NodeHandle },
}

impl NodeEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            NodeEvent::AddChild { .. } => "add_node_child",
            NodeEvent::RemoveChild { .. } => "remove_node_child",
            NodeEvent::WriteData { .. } => "write_node_data",
            NodeEvent::AddedController { .. } => "added_controller",
            NodeEvent::RemovedController { .. } => "removed_controller",
        }
    }

    /// The node whose controllers receive this event.
    pub fn target(&self) -> NodeHandle {
        match *self {
            NodeEvent::AddChild { parent, .. } | NodeEvent::RemoveChild { parent, .. } => parent,
            NodeEvent::WriteData { node, .. }
            | NodeEvent::AddedController { node }
            | NodeEvent::RemovedController { node } => node,
        }
    }

    pub fn deliver(self, controller: &dyn Controller, tree: &mut StateTree) -> ControllerResult {
        match self {
            NodeEvent::AddChild { parent, child } => {
                controller.on_add_node_child(tree, parent, child)
            }
            NodeEvent::RemoveChild { parent, child } => {
                controller.on_remove_node_child(tree, parent, child)
            }
            NodeEvent::WriteData { node, size, offset } => {
                controller.on_write_node_data(tree, node, size, offset)
            }
            NodeEvent::AddedController { node } => controller.on_added_controller(tree, node),
            NodeEvent::RemovedController { node } => controller.on_removed_controller(tree, node),
        }
    }
}

/// Whether any controller is watching a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Unattached,
    Watched(usize),
}
