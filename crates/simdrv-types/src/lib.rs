//! Identifiers shared by the state tree and the resource-assignment tables.
//!
//! Every object the driver layer tracks is named by an [`Id`]: a closed [`Name`] tag plus an
//! index. Ids order by name first and index second, which keeps sibling iteration and table
//! scans deterministic.

#![forbid(unsafe_code)]

use core::fmt;

/// Closed set of tags used for node, usage, resource and table names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Name {
    NoName,
    Root,
    Device9,
    Volume9,
    Surface9,
    Width,
    Height,
    Depth,
    Format,
    Data,
    LockBox,
    LockRect,
    Left,
    Top,
    Right,
    Bottom,
    Front,
    Back,
    Flags,
    Pitch,
    RowPitch,
    SlicePitch,
    Volume,
    Surface,
    Memory,
    VolumeMemory,
    SurfaceMemory,
}

impl Name {
    pub const fn as_str(self) -> &'static str {
        match self {
            Name::NoName => "no-name",
            Name::Root => "root",
            Name::Device9 => "device9",
            Name::Volume9 => "volume9",
            Name::Surface9 => "surface9",
            Name::Width => "width",
            Name::Height => "height",
            Name::Depth => "depth",
            Name::Format => "format",
            Name::Data => "data",
            Name::LockBox => "lock-box",
            Name::LockRect => "lock-rect",
            Name::Left => "left",
            Name::Top => "top",
            Name::Right => "right",
            Name::Bottom => "bottom",
            Name::Front => "front",
            Name::Back => "back",
            Name::Flags => "flags",
            Name::Pitch => "pitch",
            Name::RowPitch => "row-pitch",
            Name::SlicePitch => "slice-pitch",
            Name::Volume => "volume",
            Name::Surface => "surface",
            Name::Memory => "memory",
            Name::VolumeMemory => "volume-memory",
            Name::SurfaceMemory => "surface-memory",
        }
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `(name, index)` pair. Structural equality, ordered by name then index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id {
    pub name: Name,
    pub index: u32,
}

impl Id {
    pub const fn new(name: Name, index: u32) -> Self {
        Self { name, index }
    }

    /// Shorthand for index 0, the common case for metadata nodes.
    pub const fn named(name: Name) -> Self {
        Self { name, index: 0 }
    }
}

impl Default for Id {
    fn default() -> Self {
        Self::named(Name::NoName)
    }
}

impl From<Name> for Id {
    fn from(name: Name) -> Self {
        Self::named(name)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.name, self.index)
    }
}
