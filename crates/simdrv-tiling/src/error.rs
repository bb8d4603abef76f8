use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TilingError {
    #[error("format lookup: unsupported texel format {0:#010x}")]
    UnsupportedFormat(u32),

    #[error("layout: {width}x{height}x{depth} image does not fit the tiled address space")]
    SizeOverflow { width: u32, height: u32, depth: u32 },

    #[error("layout: invalid tiling parameters (block_dim={block_dim}, super_block_dim={super_block_dim})")]
    InvalidParams {
        block_dim: u32,
        super_block_dim: u32,
    },
}
