//! Morton (Z-order) address codec and texel-format metadata.
//!
//! Device memory stores images as square, power-of-two padded tiles walked in Morton order.
//! This crate provides:
//! - the bit-interleaving primitives ([`morton`], [`demorton`]),
//! - the tiled address function used by the simulated texture unit
//!   ([`texel_to_morton_address`] and its inverse),
//! - [`TiledLayout`], which sizes an image and maps element coordinates to byte offsets,
//! - D3D9 format metadata ([`D3dFormat`], [`FormatInfo`], [`FormatTable`]).
//!
//! Everything here is pure; no function touches memory beyond its arguments.

#![forbid(unsafe_code)]

mod error;
mod format;
mod layout;
mod morton;

pub use error::TilingError;
pub use format::{D3d9FormatTable, D3dFormat, FormatInfo, FormatTable, COMPRESSED_BLOCK_DIM};
pub use layout::TiledLayout;
pub use morton::{
    ceil_log2, demorton, encode_texel, is_power_of_two, morton, morton_address_to_texel,
    texel_to_morton_address, TilingParams, MAX_DOMAIN_LOG2,
};
