//! Resource assignment tables.
//!
//! A table records which consumer ([`UsageId`]) is currently backed by which allocation
//! ([`ResourceId`]). Tables are grouped by [`Name`](simdrv_types::Name) in a
//! [`ResourceAssignmentRegistry`], an explicitly constructed context object owned by the driver.

#![forbid(unsafe_code)]

mod error;
mod ids;
mod registry;
mod table;

pub use error::AssignmentError;
pub use ids::{ResourceId, UsageId};
pub use registry::ResourceAssignmentRegistry;
pub use table::{AssignmentObserver, AssignmentTable};
