use std::cell::{Ref, RefCell};
use std::fmt;
use std::rc::Rc;

use simdrv_assign::{AssignmentTable, ResourceAssignmentRegistry};
use simdrv_mem::DeviceMemory;
use simdrv_tiling::{D3d9FormatTable, FormatTable, TilingParams};
use simdrv_types::Name;

/// What a new lock region holds before the client writes to it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LockPrefill {
    /// Lock data starts zeroed. Elements the client leaves untouched overwrite the image with
    /// zeroes when the lock data is written.
    #[default]
    Never,
    /// Lock data is gathered from the image, unless the lock was opened with `DISCARD`.
    UnlessDiscard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverConfig {
    pub tiling: TilingParams,
    /// Byte written over fresh image data and device memory.
    pub fill_pattern: u8,
    pub lock_prefill: LockPrefill,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            tiling: TilingParams::default(),
            fill_pattern: 0xCD,
            lock_prefill: LockPrefill::Never,
        }
    }
}

/// State shared by every controller of one driver instance.
///
/// Registry borrows are scoped to a single table operation and never held while the state tree
/// dispatches events.
pub struct DriverContext {
    registry: RefCell<ResourceAssignmentRegistry>,
    memory: Rc<dyn DeviceMemory>,
    formats: Box<dyn FormatTable>,
    config: DriverConfig,
}

impl DriverContext {
    pub fn new(memory: Rc<dyn DeviceMemory>, config: DriverConfig) -> Self {
        Self::with_formats(memory, Box::new(D3d9FormatTable), config)
    }

    pub fn with_formats(
        memory: Rc<dyn DeviceMemory>,
        formats: Box<dyn FormatTable>,
        config: DriverConfig,
    ) -> Self {
        Self {
            registry: RefCell::new(ResourceAssignmentRegistry::new()),
            memory,
            formats,
            config,
        }
    }

    pub fn memory(&self) -> &dyn DeviceMemory {
        self.memory.as_ref()
    }

    pub fn formats(&self) -> &dyn FormatTable {
        self.formats.as_ref()
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn registry(&self) -> Ref<'_, ResourceAssignmentRegistry> {
        self.registry.borrow()
    }

    /// Runs `f` on the table called `name`, creating it if needed.
    pub fn with_table<R>(&self, name: Name, f: impl FnOnce(&mut AssignmentTable) -> R) -> R {
        f(self.registry.borrow_mut().get_table(name))
    }

    pub(crate) fn ensure_table(&self, name: Name) {
        self.registry.borrow_mut().get_table(name);
    }

    /// Drops the table called `name` if it holds no resources.
    pub(crate) fn drop_table_if_empty(&self, name: Name) {
        let mut registry = self.registry.borrow_mut();
        if registry.table(name).is_some_and(AssignmentTable::is_empty) {
            // Presence was just checked.
            let _ = registry.remove_table(name);
            tracing::debug!(table = %name, "assignment table dropped");
        }
    }
}

impl fmt::Debug for DriverContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverContext")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
