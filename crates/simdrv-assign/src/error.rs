use simdrv_types::Name;
use thiserror::Error;

use crate::{ResourceId, UsageId};

/// Misuse of an assignment table. Every variant names the table and the failing operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssignmentError {
    #[error("{table}: {op}: {resource} already present")]
    ResourceExists {
        table: Name,
        op: &'static str,
        resource: ResourceId,
    },

    #[error("{table}: {op}: {resource} not found")]
    ResourceNotFound {
        table: Name,
        op: &'static str,
        resource: ResourceId,
    },

    #[error("{table}: {op}: {resource} is assigned to {usage}")]
    ResourceAssigned {
        table: Name,
        op: &'static str,
        resource: ResourceId,
        usage: UsageId,
    },

    #[error("{table}: {op}: {usage} already holds {resource}")]
    UsageAssigned {
        table: Name,
        op: &'static str,
        usage: UsageId,
        resource: ResourceId,
    },

    #[error("{table}: {op}: {usage} not found")]
    UsageNotAssigned {
        table: Name,
        op: &'static str,
        usage: UsageId,
    },

    #[error("{table}: {op}: no {name} resource available for {usage}")]
    NoResourceAvailable {
        table: Name,
        op: &'static str,
        usage: UsageId,
        name: Name,
    },

    #[error("{table}: {op}: observer already present")]
    ObserverExists { table: Name, op: &'static str },

    #[error("{table}: {op}: observer not found")]
    ObserverNotFound { table: Name, op: &'static str },

    #[error("{table}: {op}: table not found")]
    TableNotFound { table: Name, op: &'static str },
}
