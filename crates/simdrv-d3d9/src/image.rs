use bytemuck::Pod;
use simdrv_assign::UsageId;
use simdrv_mem::MemoryDescriptor;
use simdrv_state::{NodeHandle, StateError, StateTree};
use simdrv_tiling::{FormatInfo, FormatTable, TiledLayout, TilingParams};
use simdrv_types::{Id, Name};

use crate::{DriverContext, DriverError};

/// Image families handled by the driver, and the names each one uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageKind {
    Volume,
    Surface,
}

impl ImageKind {
    /// Name of the image nodes (children of a device).
    pub const fn node_name(self) -> Name {
        match self {
            ImageKind::Volume => Name::Volume9,
            ImageKind::Surface => Name::Surface9,
        }
    }

    /// Name of the lock nodes (children of an image).
    pub const fn lock_name(self) -> Name {
        match self {
            ImageKind::Volume => Name::LockBox,
            ImageKind::Surface => Name::LockRect,
        }
    }

    pub const fn usage_name(self) -> Name {
        match self {
            ImageKind::Volume => Name::Volume,
            ImageKind::Surface => Name::Surface,
        }
    }

    pub const fn table_name(self) -> Name {
        match self {
            ImageKind::Volume => Name::VolumeMemory,
            ImageKind::Surface => Name::SurfaceMemory,
        }
    }

    pub const fn has_depth(self) -> bool {
        matches!(self, ImageKind::Volume)
    }

    /// Usage under which the image with node index `index` holds its memory.
    pub const fn usage(self, index: u32) -> UsageId {
        UsageId::new(self.usage_name(), index)
    }

    pub fn of_node(name: Name) -> Option<Self> {
        [ImageKind::Volume, ImageKind::Surface]
            .into_iter()
            .find(|kind| kind.node_name() == name)
    }
}

/// Metadata of an image node: its `Width`, `Height`, `Depth` and `Format` children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageInfo {
    pub id: Id,
    pub width: u32,
    pub height: u32,
    /// Always 1 for surfaces.
    pub depth: u32,
    pub format: u32,
    pub format_info: FormatInfo,
}

impl ImageInfo {
    pub fn read(
        tree: &StateTree,
        image: NodeHandle,
        kind: ImageKind,
        formats: &dyn FormatTable,
    ) -> Result<Self, DriverError> {
        let id = tree.id(image)?;
        if id.name != kind.node_name() {
            return Err(DriverError::UnexpectedNode {
                op: "read image",
                node: id,
                expected: kind.node_name(),
            });
        }

        let width = tree.child_value::<u32>(image, Id::named(Name::Width))?;
        let height = tree.child_value::<u32>(image, Id::named(Name::Height))?;
        let depth = if kind.has_depth() {
            tree.child_value::<u32>(image, Id::named(Name::Depth))?
        } else {
            1
        };
        let format = tree.child_value::<u32>(image, Id::named(Name::Format))?;

        Ok(Self {
            id,
            width,
            height,
            depth,
            format,
            format_info: formats.lookup(format)?,
        })
    }

    pub fn layout(&self, params: TilingParams) -> Result<TiledLayout, DriverError> {
        Ok(TiledLayout::new(
            self.width,
            self.height,
            self.depth,
            self.format_info,
            params,
        )?)
    }
}

/// Device memory backing the image `index` of `kind`.
pub(crate) fn backing_memory(
    ctx: &DriverContext,
    kind: ImageKind,
    index: u32,
) -> Result<MemoryDescriptor, DriverError> {
    const OP: &str = "backing memory";
    let usage = kind.usage(index);
    let missing = DriverError::MissingAssignment {
        op: OP,
        table: kind.table_name(),
        usage,
    };

    let resource = ctx
        .registry()
        .table(kind.table_name())
        .and_then(|table| table.get_assigned_to(usage).ok());
    match resource {
        Some(resource) if resource.name() == Name::Memory => {
            MemoryDescriptor::from_raw(resource.index()).ok_or(missing)
        }
        _ => Err(missing),
    }
}

/// Stores `value` in the child `id` of `parent`, creating the child if needed.
pub(crate) fn put_value<T: Pod>(
    tree: &mut StateTree,
    parent: NodeHandle,
    id: Id,
    value: T,
) -> Result<NodeHandle, StateError> {
    match tree.find_child(parent, id) {
        Some(child) => {
            tree.write_value(child, value)?;
            Ok(child)
        }
        None => tree.create_value_child(parent, id, value),
    }
}

/// The `Data` child of `parent`, created empty if missing.
pub(crate) fn data_child(tree: &mut StateTree, parent: NodeHandle) -> Result<NodeHandle, StateError> {
    match tree.find_child(parent, Id::named(Name::Data)) {
        Some(data) => Ok(data),
        None => tree.create_child(parent, Id::named(Name::Data)),
    }
}
