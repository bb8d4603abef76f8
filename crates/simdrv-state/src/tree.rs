use core::fmt;
use std::collections::BTreeMap;
use std::ops::Range;
use std::rc::Rc;

use bytemuck::Pod;
use simdrv_types::{Id, Name};

use crate::{Controller, MappedData, NodeEvent, StateError, WatchState};

/// Generation-checked reference to a node of a [`StateTree`].
///
/// A handle outlives the node it names; using it after the node is destroyed yields
/// [`StateError::StaleHandle`] rather than reaching whatever reuses the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeHandle {
    index: u32,
    generation: u32,
}

struct Node {
    id: Id,
    data: Vec<u8>,
    parent: Option<NodeHandle>,
    children: BTreeMap<Id, NodeHandle>,
    controllers: Vec<Rc<dyn Controller>>,
}

struct Slot {
    generation: u32,
    node: Option<Node>,
}

fn same_controller(a: &dyn Controller, b: &dyn Controller) -> bool {
    core::ptr::addr_eq(a, b)
}

/// Arena-backed tree of state nodes.
pub struct StateTree {
    slots: Vec<Slot>,
    free: Vec<u32>,
    root: NodeHandle,
    live: usize,
    deferred_error: Option<StateError>,
}

impl StateTree {
    /// Creates a tree holding only the root node, `root[0]`.
    pub fn new() -> Self {
        let mut tree = Self {
            slots: Vec::new(),
            free: Vec::new(),
            root: NodeHandle {
                index: 0,
                generation: 0,
            },
            live: 0,
            deferred_error: None,
        };
        tree.root = tree.alloc(Id::named(Name::Root), Vec::new());
        tree
    }

    pub fn root(&self) -> NodeHandle {
        self.root
    }

    /// Number of live nodes, detached ones included.
    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn contains(&self, node: NodeHandle) -> bool {
        self.node("contains", node).is_ok()
    }

    fn alloc(&mut self, id: Id, data: Vec<u8>) -> NodeHandle {
        let node = Node {
            id,
            data,
            parent: None,
            children: BTreeMap::new(),
            controllers: Vec::new(),
        };
        self.live += 1;

        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            return NodeHandle {
                index,
                generation: slot.generation,
            };
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            node: Some(node),
        });
        NodeHandle {
            index,
            generation: 0,
        }
    }

    fn release_slot(&mut self, handle: NodeHandle) {
        let Some(slot) = self.slots.get_mut(handle.index as usize) else {
            return;
        };
        if slot.generation != handle.generation || slot.node.take().is_none() {
            return;
        }
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.live -= 1;
    }

    fn node(&self, op: &'static str, handle: NodeHandle) -> Result<&Node, StateError> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.node.as_ref())
            .ok_or(StateError::StaleHandle { op, handle })
    }

    fn node_mut(&mut self, op: &'static str, handle: NodeHandle) -> Result<&mut Node, StateError> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.node.as_mut())
            .ok_or(StateError::StaleHandle { op, handle })
    }

    // Structure

    pub fn id(&self, node: NodeHandle) -> Result<Id, StateError> {
        Ok(self.node("id", node)?.id)
    }

    pub fn parent(&self, node: NodeHandle) -> Result<Option<NodeHandle>, StateError> {
        Ok(self.node("parent", node)?.parent)
    }

    /// Children in id order.
    pub fn children(&self, node: NodeHandle) -> Result<Vec<NodeHandle>, StateError> {
        Ok(self.node("children", node)?.children.values().copied().collect())
    }

    pub fn get_child(&self, parent: NodeHandle, id: Id) -> Result<NodeHandle, StateError> {
        let node = self.node("get_child", parent)?;
        node.children
            .get(&id)
            .copied()
            .ok_or(StateError::ChildNotFound {
                op: "get_child",
                parent: node.id,
                id,
            })
    }

    pub fn find_child(&self, parent: NodeHandle, id: Id) -> Option<NodeHandle> {
        self.node("find_child", parent)
            .ok()
            .and_then(|node| node.children.get(&id).copied())
    }

    /// Children called `name`, in index order. Fails if there are none.
    pub fn get_children_named(
        &self,
        parent: NodeHandle,
        name: Name,
    ) -> Result<Vec<NodeHandle>, StateError> {
        let node = self.node("get_children_named", parent)?;
        let found = Self::named(node, name);
        if found.is_empty() {
            return Err(StateError::NoChildrenNamed {
                op: "get_children_named",
                parent: node.id,
                name,
            });
        }
        Ok(found)
    }

    pub fn find_children_named(&self, parent: NodeHandle, name: Name) -> Vec<NodeHandle> {
        self.node("find_children_named", parent)
            .map(|node| Self::named(node, name))
            .unwrap_or_default()
    }

    fn named(node: &Node, name: Name) -> Vec<NodeHandle> {
        node.children
            .range(Id::new(name, 0)..=Id::new(name, u32::MAX))
            .map(|(_, child)| *child)
            .collect()
    }

    /// Creates a detached node. It joins the tree through [`StateTree::add_child`].
    pub fn create_node(&mut self, id: Id) -> NodeHandle {
        self.alloc(id, Vec::new())
    }

    pub fn create_node_with_data(&mut self, id: Id, data: impl Into<Vec<u8>>) -> NodeHandle {
        self.alloc(id, data.into())
    }

    fn check_link(
        &self,
        op: &'static str,
        parent: NodeHandle,
        child: NodeHandle,
    ) -> Result<(), StateError> {
        let parent_node = self.node(op, parent)?;
        let child_node = self.node(op, child)?;

        if child == self.root {
            return Err(StateError::RootCannotBeChild { op });
        }
        if child_node.parent.is_some() {
            return Err(StateError::AlreadyParented {
                op,
                child: child_node.id,
            });
        }
        let mut cursor = Some(parent);
        while let Some(ancestor) = cursor {
            if ancestor == child {
                return Err(StateError::Cycle {
                    op,
                    parent: parent_node.id,
                    child: child_node.id,
                });
            }
            cursor = self.node(op, ancestor)?.parent;
        }
        if parent_node.children.contains_key(&child_node.id) {
            return Err(StateError::ChildExists {
                op,
                parent: parent_node.id,
                id: child_node.id,
            });
        }
        Ok(())
    }

    fn link(&mut self, op: &'static str, parent: NodeHandle, child: NodeHandle) -> Result<(), StateError> {
        let child_node = self.node_mut(op, child)?;
        child_node.parent = Some(parent);
        let id = child_node.id;
        self.node_mut(op, parent)?.children.insert(id, child);
        Ok(())
    }

    fn unlink(&mut self, child: NodeHandle) {
        let Ok(child_node) = self.node_mut("unlink", child) else {
            return;
        };
        let id = child_node.id;
        if let Some(parent) = child_node.parent.take() {
            if let Ok(parent_node) = self.node_mut("unlink", parent) {
                parent_node.children.remove(&id);
            }
        }
    }

    fn is_child_of(&self, child: NodeHandle, parent: NodeHandle) -> bool {
        self.node("is_child_of", child)
            .map(|node| node.parent == Some(parent))
            .unwrap_or(false)
    }

    /// Links the detached node `child` under `parent`, then notifies the parent's controllers.
    pub fn add_child(&mut self, parent: NodeHandle, child: NodeHandle) -> Result<(), StateError> {
        self.check_link("add_child", parent, child)?;
        self.link("add_child", parent, child)?;
        self.dispatch(NodeEvent::AddChild { parent, child })
    }

    /// Creates a child of `parent` and notifies the parent's controllers. A child they refuse is
    /// destroyed before the error is returned.
    pub fn create_child(&mut self, parent: NodeHandle, id: Id) -> Result<NodeHandle, StateError> {
        self.attach_new("create_child", parent, id, Vec::new())
    }

    /// Creates a child whose payload is the bytes of `value`.
    pub fn create_value_child<T: Pod>(
        &mut self,
        parent: NodeHandle,
        id: Id,
        value: T,
    ) -> Result<NodeHandle, StateError> {
        self.attach_new(
            "create_value_child",
            parent,
            id,
            bytemuck::bytes_of(&value).to_vec(),
        )
    }

    fn attach_new(
        &mut self,
        op: &'static str,
        parent: NodeHandle,
        id: Id,
        data: Vec<u8>,
    ) -> Result<NodeHandle, StateError> {
        let child = self.alloc(id, data);
        if let Err(err) = self.check_link(op, parent, child) {
            self.release_slot(child);
            return Err(err);
        }
        self.link(op, parent, child)?;
        if let Err(err) = self.dispatch(NodeEvent::AddChild { parent, child }) {
            self.discard_rejected(child, parent);
            return Err(err);
        }
        Ok(child)
    }

    /// Takes a child the parent's controllers refused back out of the tree.
    fn discard_rejected(&mut self, child: NodeHandle, parent: NodeHandle) {
        if self.is_child_of(child, parent) {
            self.unlink(child);
        }
        if let Err(err) = self.destroy_subtree(child) {
            tracing::warn!(error = %err, "failed to discard rejected child");
        }
    }

    /// Notifies the parent's controllers, then unlinks `child` and destroys its subtree.
    pub fn remove_child(&mut self, parent: NodeHandle, child: NodeHandle) -> Result<(), StateError> {
        const OP: &str = "remove_child";
        let parent_id = self.node(OP, parent)?.id;
        let child_node = self.node(OP, child)?;
        if child_node.parent != Some(parent) {
            return Err(StateError::ChildNotFound {
                op: OP,
                parent: parent_id,
                id: child_node.id,
            });
        }

        self.dispatch(NodeEvent::RemoveChild { parent, child })?;
        if self.is_child_of(child, parent) {
            self.unlink(child);
        }
        self.destroy_subtree(child)
    }

    /// Destroys a detached node and its subtree.
    pub fn destroy_node(&mut self, node: NodeHandle) -> Result<(), StateError> {
        const OP: &str = "destroy_node";
        if node == self.root {
            return Err(StateError::RootNotRemovable { op: OP });
        }
        let n = self.node(OP, node)?;
        if n.parent.is_some() {
            return Err(StateError::NotDetached { op: OP, node: n.id });
        }
        self.destroy_subtree(node)
    }

    fn destroy_subtree(&mut self, node: NodeHandle) -> Result<(), StateError> {
        const OP: &str = "destroy";
        let Ok(n) = self.node(OP, node) else {
            return Ok(());
        };
        let children: Vec<NodeHandle> = n.children.values().copied().collect();

        for child in children {
            if !self.is_child_of(child, node) {
                continue;
            }
            self.dispatch(NodeEvent::RemoveChild {
                parent: node,
                child,
            })?;
            if self.is_child_of(child, node) {
                self.unlink(child);
            }
            self.destroy_subtree(child)?;
        }

        // Whoever still watches the node hears about it before it goes away.
        loop {
            let next = self
                .node(OP, node)
                .ok()
                .and_then(|n| n.controllers.first().cloned());
            let Some(controller) = next else {
                break;
            };
            self.remove_controller(node, controller.as_ref())?;
        }

        if let Ok(n) = self.node(OP, node) {
            tracing::trace!(id = %n.id, "node destroyed");
        }
        self.release_slot(node);
        Ok(())
    }

    // Data

    pub fn data_size(&self, node: NodeHandle) -> Result<usize, StateError> {
        Ok(self.node("data_size", node)?.data.len())
    }

    /// Replaces the payload with `size` zero bytes. Fires no event.
    pub fn set_data_size(&mut self, node: NodeHandle, size: usize) -> Result<(), StateError> {
        let n = self.node_mut("set_data_size", node)?;
        n.data = vec![0; size];
        Ok(())
    }

    /// Resizes the payload, keeping its first `min(old, new)` bytes. Fires no event.
    pub fn resize_data(&mut self, node: NodeHandle, size: usize) -> Result<(), StateError> {
        let n = self.node_mut("resize_data", node)?;
        tracing::debug!(id = %n.id, from = n.data.len(), to = size, "node data resized");
        n.data.resize(size, 0);
        Ok(())
    }

    /// Read-only view of the payload. Reading never notifies anyone.
    pub fn data(&self, node: NodeHandle) -> Result<&[u8], StateError> {
        Ok(&self.node("data", node)?.data)
    }

    fn check_range(
        op: &'static str,
        node: &Node,
        offset: usize,
        len: usize,
    ) -> Result<Range<usize>, StateError> {
        let oob = StateError::OutOfBounds {
            op,
            node: node.id,
            offset,
            len,
            size: node.data.len(),
        };
        match offset.checked_add(len) {
            Some(end) if end <= node.data.len() => Ok(offset..end),
            _ => Err(oob),
        }
    }

    pub fn read_data(
        &self,
        node: NodeHandle,
        dst: &mut [u8],
        offset: usize,
    ) -> Result<(), StateError> {
        let n = self.node("read_data", node)?;
        let range = Self::check_range("read_data", n, offset, dst.len())?;
        dst.copy_from_slice(&n.data[range]);
        Ok(())
    }

    /// Copies `src` into the payload at `offset`, then notifies the node's controllers.
    pub fn write_data(
        &mut self,
        node: NodeHandle,
        src: &[u8],
        offset: usize,
    ) -> Result<(), StateError> {
        let n = self.node_mut("write_data", node)?;
        let range = Self::check_range("write_data", n, offset, src.len())?;
        n.data[range].copy_from_slice(src);
        self.dispatch(NodeEvent::WriteData {
            node,
            size: src.len(),
            offset,
        })
    }

    /// Reads a payload holding exactly one `T`.
    pub fn read_value<T: Pod>(&self, node: NodeHandle) -> Result<T, StateError> {
        let n = self.node("read_value", node)?;
        let expected = core::mem::size_of::<T>();
        if n.data.len() != expected {
            return Err(StateError::ValueSizeMismatch {
                op: "read_value",
                node: n.id,
                expected,
                actual: n.data.len(),
            });
        }
        Ok(bytemuck::pod_read_unaligned(&n.data))
    }

    /// Stores `value` as the whole payload and notifies the node's controllers.
    pub fn write_value<T: Pod>(&mut self, node: NodeHandle, value: T) -> Result<(), StateError> {
        let bytes = bytemuck::bytes_of(&value);
        if self.data_size(node)? != bytes.len() {
            self.set_data_size(node, bytes.len())?;
        }
        self.write_data(node, bytes, 0)
    }

    /// Reads the value stored in the child `id` of `parent`.
    pub fn child_value<T: Pod>(&self, parent: NodeHandle, id: Id) -> Result<T, StateError> {
        self.read_value(self.get_child(parent, id)?)
    }

    /// Maps `size` bytes at `offset` for writing.
    ///
    /// The write is announced when the mapping is unmapped (or dropped).
    pub fn map_data_write(
        &mut self,
        node: NodeHandle,
        offset: usize,
        size: usize,
    ) -> Result<MappedData<'_>, StateError> {
        let n = self.node_mut("map_data_write", node)?;
        Self::check_range("map_data_write", n, offset, size)?;
        let data = core::mem::take(&mut n.data);
        Ok(MappedData::new(self, node, offset, size, data))
    }

    pub(crate) fn restore_data(&mut self, node: NodeHandle, data: Vec<u8>) -> Result<(), StateError> {
        self.node_mut("unmap", node)?.data = data;
        Ok(())
    }

    pub(crate) fn defer_error(&mut self, err: StateError) {
        self.deferred_error = Some(err);
    }

    /// Error raised while dispatching the write of a mapping that was dropped without
    /// [`MappedData::unmap`].
    pub fn take_deferred_error(&mut self) -> Option<StateError> {
        self.deferred_error.take()
    }

    // Controllers

    /// Attaches `controller` to `node`, then fires its `on_added_controller`.
    ///
    /// If the callback fails the controller is detached again.
    pub fn add_controller(
        &mut self,
        node: NodeHandle,
        controller: Rc<dyn Controller>,
    ) -> Result<(), StateError> {
        const OP: &str = "add_controller";
        let n = self.node_mut(OP, node)?;
        if n.controllers
            .iter()
            .any(|c| same_controller(c.as_ref(), controller.as_ref()))
        {
            return Err(StateError::ControllerExists {
                op: OP,
                node: n.id,
                controller: controller.name(),
            });
        }
        n.controllers.push(controller.clone());
        let delivered = self.deliver(controller.as_ref(), NodeEvent::AddedController { node });
        if delivered.is_err() {
            if let Ok(n) = self.node_mut(OP, node) {
                n.controllers
                    .retain(|c| !same_controller(c.as_ref(), controller.as_ref()));
            }
        }
        delivered
    }

    /// Fires `on_removed_controller` on `controller`, then detaches it from `node`.
    pub fn remove_controller(
        &mut self,
        node: NodeHandle,
        controller: &dyn Controller,
    ) -> Result<(), StateError> {
        const OP: &str = "remove_controller";
        if !self.has_controller(node, controller)? {
            return Err(StateError::ControllerNotFound {
                op: OP,
                node: self.id(node)?,
                controller: controller.name(),
            });
        }
        self.deliver(controller, NodeEvent::RemovedController { node })?;
        if let Ok(n) = self.node_mut(OP, node) {
            n.controllers.retain(|c| !same_controller(c.as_ref(), controller));
        }
        Ok(())
    }

    pub fn has_controller(
        &self,
        node: NodeHandle,
        controller: &dyn Controller,
    ) -> Result<bool, StateError> {
        Ok(self
            .node("has_controller", node)?
            .controllers
            .iter()
            .any(|c| same_controller(c.as_ref(), controller)))
    }

    pub fn watch_state(&self, node: NodeHandle) -> Result<WatchState, StateError> {
        let count = self.node("watch_state", node)?.controllers.len();
        Ok(match count {
            0 => WatchState::Unattached,
            n => WatchState::Watched(n),
        })
    }

    fn deliver(&mut self, controller: &dyn Controller, event: NodeEvent) -> Result<(), StateError> {
        event
            .deliver(controller, self)
            .map_err(|source| StateError::Controller {
                controller: controller.name(),
                event: event.kind(),
                source,
            })
    }

    /// Delivers `event` to the controllers attached to its target, in attachment order.
    ///
    /// The list is captured up front; controllers attached by a callback only see later events.
    pub(crate) fn dispatch(&mut self, event: NodeEvent) -> Result<(), StateError> {
        let target = event.target();
        let controllers = self.node("dispatch", target)?.controllers.clone();
        for controller in &controllers {
            if !self.contains(target) {
                break;
            }
            self.deliver(controller.as_ref(), event)?;
        }
        Ok(())
    }
}

impl Default for StateTree {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StateTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateTree")
            .field("root", &self.root)
            .field("live", &self.live)
            .field("slots", &self.slots.len())
            .finish()
    }
}
