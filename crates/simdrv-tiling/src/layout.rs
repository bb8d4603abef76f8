use crate::{
    ceil_log2, texel_to_morton_address, FormatInfo, TilingError, TilingParams, MAX_DOMAIN_LOG2,
};

/// Device-side layout of a (possibly 3D) image.
///
/// Each depth slice is padded to a `2^domain_log2` square of elements and walked in Morton
/// order; slices follow each other linearly. All coordinates taken by this type are in elements
/// (4x4 blocks for compressed formats), never texels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TiledLayout {
    width: u32,
    height: u32,
    depth: u32,
    element_size: u32,
    domain_log2: u32,
    params: TilingParams,
}

impl TiledLayout {
    /// Builds the layout of a `width x height x depth` texel image of the given format.
    pub fn new(
        width: u32,
        height: u32,
        depth: u32,
        format: FormatInfo,
        params: TilingParams,
    ) -> Result<Self, TilingError> {
        if !params.is_valid() {
            return Err(TilingError::InvalidParams {
                block_dim: params.block_dim,
                super_block_dim: params.super_block_dim,
            });
        }

        let overflow = TilingError::SizeOverflow {
            width,
            height,
            depth,
        };

        let elements_wide = format.elements(width);
        let elements_high = format.elements(height);
        let domain_log2 = ceil_log2(elements_wide.max(elements_high));
        if domain_log2 > MAX_DOMAIN_LOG2 {
            return Err(overflow);
        }

        let layout = Self {
            width: elements_wide,
            height: elements_high,
            depth,
            element_size: format.bytes_per_element,
            domain_log2,
            params: if format.block_compressed {
                params.for_compressed()
            } else {
                params
            },
        };

        // Reject layouts whose byte size can't be addressed on this host.
        let size = layout.byte_size_u64().ok_or(overflow.clone())?;
        usize::try_from(size).map_err(|_| overflow)?;

        Ok(layout)
    }

    fn byte_size_u64(&self) -> Option<u64> {
        let side = 1u64 << self.domain_log2;
        (side * side)
            .checked_mul(u64::from(self.element_size))?
            .checked_mul(u64::from(self.depth))
    }

    /// Width of the image in elements.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height of the image in elements.
    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn element_size(&self) -> u32 {
        self.element_size
    }

    /// Log2 side of the padded square domain, in elements.
    pub fn domain_log2(&self) -> u32 {
        self.domain_log2
    }

    /// Tiling parameters in element units (already reduced for compressed formats).
    pub fn params(&self) -> TilingParams {
        self.params
    }

    pub fn slice_bytes(&self) -> usize {
        let side = 1usize << self.domain_log2;
        side * side * self.element_size as usize
    }

    /// Total bytes of the tiled image, padding included.
    pub fn byte_size(&self) -> usize {
        self.slice_bytes() * self.depth as usize
    }

    pub fn contains(&self, x: u32, y: u32, z: u32) -> bool {
        x < self.width && y < self.height && z < self.depth
    }

    /// Byte offset of element `(x, y, z)` inside the tiled image.
    pub fn element_offset(&self, x: u32, y: u32, z: u32) -> usize {
        debug_assert!(self.contains(x, y, z));
        let address = texel_to_morton_address(x, y, self.params, self.domain_log2);
        z as usize * self.slice_bytes() + address as usize * self.element_size as usize
    }
}
