use core::fmt;

use simdrv_types::{Id, Name};

/// A consumer of resources (e.g. a volume by image index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UsageId(pub Id);

/// An allocation registered in a table (e.g. a device memory descriptor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId(pub Id);

impl UsageId {
    pub const fn new(name: Name, index: u32) -> Self {
        Self(Id::new(name, index))
    }

    pub const fn name(self) -> Name {
        self.0.name
    }

    pub const fn index(self) -> u32 {
        self.0.index
    }
}

impl ResourceId {
    pub const fn new(name: Name, index: u32) -> Self {
        Self(Id::new(name, index))
    }

    pub const fn name(self) -> Name {
        self.0.name
    }

    pub const fn index(self) -> u32 {
        self.0.index
    }
}

impl fmt::Display for UsageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "usage {}", self.0)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "resource {}", self.0)
    }
}
