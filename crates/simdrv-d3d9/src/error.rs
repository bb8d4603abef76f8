use simdrv_assign::{AssignmentError, UsageId};
use simdrv_mem::DeviceMemoryError;
use simdrv_state::StateError;
use simdrv_tiling::TilingError;
use simdrv_types::{Id, Name};
use thiserror::Error;

use crate::LockRegion;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Assignment(#[from] AssignmentError),

    #[error(transparent)]
    Memory(#[from] DeviceMemoryError),

    #[error(transparent)]
    Tiling(#[from] TilingError),

    #[error("lock: {lock} region {region} is outside the {width}x{height}x{depth} image {image}")]
    InvalidLockRegion {
        image: Id,
        lock: Id,
        region: LockRegion,
        width: u32,
        height: u32,
        depth: u32,
    },

    #[error("lock: {lock} holds {actual} bytes of data, its region needs {expected}")]
    LockDataSize {
        lock: Id,
        expected: usize,
        actual: usize,
    },

    #[error("lock: image {image} holds {actual} bytes of data, its layout needs {expected}")]
    ImageDataSize {
        image: Id,
        expected: usize,
        actual: usize,
    },

    #[error("lock: {lock} pitch of {pitch} bytes does not fit in an i32")]
    PitchOverflow { lock: Id, pitch: usize },

    #[error("{op}: {usage} has no device memory assigned in {table}")]
    MissingAssignment {
        op: &'static str,
        table: Name,
        usage: UsageId,
    },

    #[error("{op}: {node} is not a {expected} node")]
    UnexpectedNode {
        op: &'static str,
        node: Id,
        expected: Name,
    },

    #[error("{0}: controller dropped while still attached")]
    ControllerDropped(&'static str),
}
