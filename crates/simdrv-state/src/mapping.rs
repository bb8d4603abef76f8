use std::ops::{Deref, DerefMut, Range};

use crate::{NodeEvent, NodeHandle, StateError, StateTree};

/// Writable view of part of a node payload.
///
/// The payload is moved out of the node for the lifetime of the mapping and put back on
/// [`MappedData::unmap`], which then fires `on_write_node_data(size, offset)` for the mapped
/// range. Dropping the mapping does the same; a controller error raised on that path is logged
/// and kept for [`StateTree::take_deferred_error`].
pub struct MappedData<'a> {
    tree: &'a mut StateTree,
    node: NodeHandle,
    offset: usize,
    size: usize,
    data: Vec<u8>,
    unmapped: bool,
}

impl<'a> MappedData<'a> {
    pub(crate) fn new(
        tree: &'a mut StateTree,
        node: NodeHandle,
        offset: usize,
        size: usize,
        data: Vec<u8>,
    ) -> Self {
        Self {
            tree,
            node,
            offset,
            size,
            data,
            unmapped: false,
        }
    }

    pub fn node(&self) -> NodeHandle {
        self.node
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.size
    }

    /// Puts the payload back and notifies the node's controllers.
    pub fn unmap(mut self) -> Result<(), StateError> {
        self.finish()
    }

    fn finish(&mut self) -> Result<(), StateError> {
        if self.unmapped {
            return Ok(());
        }
        self.unmapped = true;
        self.tree
            .restore_data(self.node, std::mem::take(&mut self.data))?;
        self.tree.dispatch(NodeEvent::WriteData {
            node: self.node,
            size: self.size,
            offset: self.offset,
        })
    }
}

impl Deref for MappedData<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data[self.range()]
    }
}

impl DerefMut for MappedData<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        let range = self.range();
        &mut self.data[range]
    }
}

impl Drop for MappedData<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.finish() {
            tracing::error!(node = ?self.node, error = %err, "write notification failed on drop");
            self.tree.defer_error(err);
        }
    }
}
