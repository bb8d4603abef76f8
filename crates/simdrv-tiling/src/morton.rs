/// Largest supported domain (and per-level interleave) size, in log2 elements per side.
///
/// A `2^16 x 2^16` domain already fills the 32-bit address range.
pub const MAX_DOMAIN_LOG2: u32 = 16;

/// Interleave table for two 4-bit nibbles: index is `(y << 4) | x`.
const MORTON_TABLE: [u8; 256] = build_morton_table();

const fn build_morton_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let mut x = i & 0x0F;
        let mut y = (i >> 4) & 0x0F;
        let mut m = 0;
        let mut bit = 0;
        while bit < 4 {
            m |= ((x & 0x01) << (2 * bit)) | ((y & 0x01) << (2 * bit + 1));
            x >>= 1;
            y >>= 1;
            bit += 1;
        }
        table[i] = m as u8;
        i += 1;
    }
    table
}

#[inline]
fn low_bits(bits: u32) -> u32 {
    if bits >= u32::BITS {
        u32::MAX
    } else {
        (1 << bits) - 1
    }
}

#[inline]
fn shr(value: u32, bits: u32) -> u32 {
    value.checked_shr(bits).unwrap_or(0)
}

#[inline]
fn shl(value: u32, bits: u32) -> u32 {
    value.checked_shl(bits).unwrap_or(0)
}

/// Address of element `(x, y)` inside a `2^size x 2^size` square walked in Morton order.
///
/// Bit `n` of `x` lands on address bit `2n`, bit `n` of `y` on `2n + 1`. Only the low `size`
/// bits of each coordinate participate.
pub fn morton(size: u32, x: u32, y: u32) -> u32 {
    let size = size.min(MAX_DOMAIN_LOG2);
    let mut address = 0u32;
    let mut shift = 0;
    while shift < size {
        let nx = shr(x, shift) & 0x0F;
        let ny = shr(y, shift) & 0x0F;
        address |= u32::from(MORTON_TABLE[((ny << 4) | nx) as usize]) << (2 * shift);
        shift += 4;
    }
    address & low_bits(2 * size)
}

/// Inverse of [`morton`] for addresses inside a `2^size` square.
pub fn demorton(size: u32, address: u32) -> (u32, u32) {
    let size = size.min(MAX_DOMAIN_LOG2);
    let mut x = 0;
    let mut y = 0;
    for bit in 0..size {
        x |= ((address >> (2 * bit)) & 0x01) << bit;
        y |= ((address >> (2 * bit + 1)) & 0x01) << bit;
    }
    (x, y)
}

/// Tiling granularity: elements form `2^block_dim` square tiles, tiles form `2^super_block_dim`
/// square super-tiles, and super-tiles are laid out row-major across the domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TilingParams {
    pub block_dim: u32,
    pub super_block_dim: u32,
}

impl TilingParams {
    pub const fn new(block_dim: u32, super_block_dim: u32) -> Self {
        Self {
            block_dim,
            super_block_dim,
        }
    }

    /// Parameters for a block-compressed grid, where one element is already a 4x4 texel block.
    pub const fn for_compressed(self) -> Self {
        Self {
            block_dim: self.block_dim.saturating_sub(2),
            super_block_dim: self.super_block_dim,
        }
    }

    pub const fn is_valid(self) -> bool {
        self.block_dim + self.super_block_dim <= MAX_DOMAIN_LOG2
    }
}

impl Default for TilingParams {
    fn default() -> Self {
        Self::new(3, 3)
    }
}

/// Translates element coordinates into the Morton-tiled element address used by device memory.
///
/// `domain_log2` is the log2 side of the padded square domain, in elements.
pub fn texel_to_morton_address(x: u32, y: u32, params: TilingParams, domain_log2: u32) -> u32 {
    let b = params.block_dim;
    let s = params.super_block_dim;
    let sb = b + s;

    let texel = morton(b, x, y);
    let block = morton(s, shr(x, b), shr(y, b));
    let row_shift = domain_log2.saturating_sub(sb);
    let super_block = shl(shr(y, sb), row_shift) + shr(x, sb);

    shl(shl(super_block, 2 * s) + block, 2 * b) + texel
}

/// Inverse of [`texel_to_morton_address`] for addresses inside the domain.
pub fn morton_address_to_texel(
    address: u32,
    params: TilingParams,
    domain_log2: u32,
) -> (u32, u32) {
    let b = params.block_dim;
    let s = params.super_block_dim;
    let sb = b + s;

    let texel = address & low_bits(2 * b);
    let block = shr(address, 2 * b) & low_bits(2 * s);
    let super_block = shr(address, 2 * sb);
    let row_shift = domain_log2.saturating_sub(sb);

    let (tx, ty) = demorton(b, texel);
    let (bx, by) = demorton(s, block);
    let sx = super_block & low_bits(row_shift);
    let sy = shr(super_block, row_shift);

    (
        shl(sx, sb) | shl(bx, b) | tx,
        shl(sy, sb) | shl(by, b) | ty,
    )
}

/// Texel-space entry point: block-compressed formats are addressed per 4x4 block, so the
/// coordinates and the domain shrink by 4 and the tile dimension by 2. Depth is never involved.
pub fn encode_texel(
    x: u32,
    y: u32,
    compressed: bool,
    params: TilingParams,
    domain_log2: u32,
) -> u32 {
    if compressed {
        texel_to_morton_address(x / 4, y / 4, params.for_compressed(), domain_log2.saturating_sub(2))
    } else {
        texel_to_morton_address(x, y, params, domain_log2)
    }
}

pub fn is_power_of_two(x: u32) -> bool {
    x.is_power_of_two()
}

/// Smallest `n` with `2^n >= x`. `ceil_log2(0)` and `ceil_log2(1)` are both 0.
pub fn ceil_log2(x: u32) -> u32 {
    if x <= 1 {
        0
    } else {
        u32::BITS - (x - 1).leading_zeros()
    }
}
