use simdrv_types::{Id, Name};
use thiserror::Error;

use crate::{ControllerError, NodeHandle};

#[derive(Debug, Error)]
pub enum StateError {
    #[error("{op}: stale node handle {handle:?}")]
    StaleHandle {
        op: &'static str,
        handle: NodeHandle,
    },

    #[error("{op}: {parent} already has a child {id}")]
    ChildExists {
        op: &'static str,
        parent: Id,
        id: Id,
    },

    #[error("{op}: {parent} has no child {id}")]
    ChildNotFound {
        op: &'static str,
        parent: Id,
        id: Id,
    },

    #[error("{op}: {parent} has no children named {name}")]
    NoChildrenNamed {
        op: &'static str,
        parent: Id,
        name: Name,
    },

    #[error("{op}: {child} already has a parent")]
    AlreadyParented { op: &'static str, child: Id },

    #[error("{op}: linking {child} under {parent} would create a cycle")]
    Cycle {
        op: &'static str,
        parent: Id,
        child: Id,
    },

    #[error("{op}: the root node cannot be a child")]
    RootCannotBeChild { op: &'static str },

    #[error("{op}: the root node cannot be destroyed")]
    RootNotRemovable { op: &'static str },

    #[error("{op}: {node} is still linked to a parent")]
    NotDetached { op: &'static str, node: Id },

    #[error("{op}: controller {controller} already attached to {node}")]
    ControllerExists {
        op: &'static str,
        node: Id,
        controller: &'static str,
    },

    #[error("{op}: controller {controller} not attached to {node}")]
    ControllerNotFound {
        op: &'static str,
        node: Id,
        controller: &'static str,
    },

    #[error("{op}: {node}: range offset={offset} len={len} outside {size}-byte payload")]
    OutOfBounds {
        op: &'static str,
        node: Id,
        offset: usize,
        len: usize,
        size: usize,
    },

    #[error("{op}: {node}: payload is {actual} bytes, value needs {expected}")]
    ValueSizeMismatch {
        op: &'static str,
        node: Id,
        expected: usize,
        actual: usize,
    },

    #[error("{event}: controller {controller} failed: {source}")]
    Controller {
        controller: &'static str,
        event: &'static str,
        #[source]
        source: ControllerError,
    },
}
