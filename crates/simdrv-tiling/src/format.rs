use crate::TilingError;

/// Side of the texel block encoded by one element of a block-compressed format.
pub const COMPRESSED_BLOCK_DIM: u32 = 4;

const fn fourcc(code: &[u8; 4]) -> u32 {
    (code[0] as u32) | ((code[1] as u32) << 8) | ((code[2] as u32) << 16) | ((code[3] as u32) << 24)
}

/// D3D9 texel formats the driver layer can size. Discriminants are the `D3DFORMAT` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum D3dFormat {
    R8G8B8 = 20,
    A8R8G8B8 = 21,
    X8R8G8B8 = 22,
    R5G6B5 = 23,
    X1R5G5B5 = 24,
    A1R5G5B5 = 25,
    A4R4G4B4 = 26,
    R3G3B2 = 27,
    A8 = 28,
    A8R3G3B2 = 29,
    X4R4G4B4 = 30,
    A2B10G10R10 = 31,
    A8B8G8R8 = 32,
    X8B8G8R8 = 33,
    G16R16 = 34,
    A2R10G10B10 = 35,
    A16B16G16R16 = 36,
    A8P8 = 40,
    P8 = 41,
    L8 = 50,
    A8L8 = 51,
    A4L4 = 52,
    V8U8 = 60,
    L6V5U5 = 61,
    X8L8V8U8 = 62,
    Q8W8V8U8 = 63,
    V16U16 = 64,
    A2W10V10U10 = 67,
    D16Lockable = 70,
    D32 = 71,
    D15S1 = 73,
    D24S8 = 75,
    D24X8 = 77,
    D24X4S4 = 79,
    D16 = 80,
    L16 = 81,
    D32FLockable = 82,
    D24FS8 = 83,
    Index16 = 101,
    Index32 = 102,
    Q16W16V16U16 = 110,
    R16F = 111,
    G16R16F = 112,
    A16B16G16R16F = 113,
    R32F = 114,
    G32R32F = 115,
    A32B32G32R32F = 116,
    CxV8U8 = 117,
    Dxt1 = fourcc(b"DXT1"),
    Dxt2 = fourcc(b"DXT2"),
    Dxt3 = fourcc(b"DXT3"),
    Dxt4 = fourcc(b"DXT4"),
    Dxt5 = fourcc(b"DXT5"),
    Ati2 = fourcc(b"ATI2"),
    Uyvy = fourcc(b"UYVY"),
    Yuy2 = fourcc(b"YUY2"),
    R8G8B8G8 = fourcc(b"RGBG"),
    Multi2Argb8 = fourcc(b"MET1"),
}

impl D3dFormat {
    const ALL: [D3dFormat; 58] = [
        D3dFormat::R8G8B8,
        D3dFormat::A8R8G8B8,
        D3dFormat::X8R8G8B8,
        D3dFormat::R5G6B5,
        D3dFormat::X1R5G5B5,
        D3dFormat::A1R5G5B5,
        D3dFormat::A4R4G4B4,
        D3dFormat::R3G3B2,
        D3dFormat::A8,
        D3dFormat::A8R3G3B2,
        D3dFormat::X4R4G4B4,
        D3dFormat::A2B10G10R10,
        D3dFormat::A8B8G8R8,
        D3dFormat::X8B8G8R8,
        D3dFormat::G16R16,
        D3dFormat::A2R10G10B10,
        D3dFormat::A16B16G16R16,
        D3dFormat::A8P8,
        D3dFormat::P8,
        D3dFormat::L8,
        D3dFormat::A8L8,
        D3dFormat::A4L4,
        D3dFormat::V8U8,
        D3dFormat::L6V5U5,
        D3dFormat::X8L8V8U8,
        D3dFormat::Q8W8V8U8,
        D3dFormat::V16U16,
        D3dFormat::A2W10V10U10,
        D3dFormat::D16Lockable,
        D3dFormat::D32,
        D3dFormat::D15S1,
        D3dFormat::D24S8,
        D3dFormat::D24X8,
        D3dFormat::D24X4S4,
        D3dFormat::D16,
        D3dFormat::L16,
        D3dFormat::D32FLockable,
        D3dFormat::D24FS8,
        D3dFormat::Index16,
        D3dFormat::Index32,
        D3dFormat::Q16W16V16U16,
        D3dFormat::R16F,
        D3dFormat::G16R16F,
        D3dFormat::A16B16G16R16F,
        D3dFormat::R32F,
        D3dFormat::G32R32F,
        D3dFormat::A32B32G32R32F,
        D3dFormat::CxV8U8,
        D3dFormat::Dxt1,
        D3dFormat::Dxt2,
        D3dFormat::Dxt3,
        D3dFormat::Dxt4,
        D3dFormat::Dxt5,
        D3dFormat::Ati2,
        D3dFormat::Uyvy,
        D3dFormat::Yuy2,
        D3dFormat::R8G8B8G8,
        D3dFormat::Multi2Argb8,
    ];

    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|f| *f as u32 == raw)
    }

    pub const fn raw(self) -> u32 {
        self as u32
    }

    pub const fn is_compressed(self) -> bool {
        matches!(
            self,
            D3dFormat::Dxt1
                | D3dFormat::Dxt2
                | D3dFormat::Dxt3
                | D3dFormat::Dxt4
                | D3dFormat::Dxt5
                | D3dFormat::Ati2
        )
    }

    /// Bytes per texel, or per 4x4 block for compressed formats.
    pub const fn element_size(self) -> u32 {
        match self {
            D3dFormat::R3G3B2 | D3dFormat::A8 | D3dFormat::P8 | D3dFormat::L8 | D3dFormat::A4L4 => 1,

            D3dFormat::R5G6B5
            | D3dFormat::X1R5G5B5
            | D3dFormat::A1R5G5B5
            | D3dFormat::A4R4G4B4
            | D3dFormat::A8R3G3B2
            | D3dFormat::X4R4G4B4
            | D3dFormat::A8P8
            | D3dFormat::A8L8
            | D3dFormat::V8U8
            | D3dFormat::L6V5U5
            | D3dFormat::D16Lockable
            | D3dFormat::D15S1
            | D3dFormat::D16
            | D3dFormat::L16
            | D3dFormat::Index16
            | D3dFormat::R16F
            | D3dFormat::CxV8U8
            | D3dFormat::Uyvy
            | D3dFormat::Yuy2
            | D3dFormat::R8G8B8G8 => 2,

            D3dFormat::R8G8B8 => 3,

            D3dFormat::A8R8G8B8
            | D3dFormat::X8R8G8B8
            | D3dFormat::A2B10G10R10
            | D3dFormat::A8B8G8R8
            | D3dFormat::X8B8G8R8
            | D3dFormat::G16R16
            | D3dFormat::A2R10G10B10
            | D3dFormat::X8L8V8U8
            | D3dFormat::Q8W8V8U8
            | D3dFormat::V16U16
            | D3dFormat::A2W10V10U10
            | D3dFormat::D32
            | D3dFormat::D24S8
            | D3dFormat::D24X8
            | D3dFormat::D24X4S4
            | D3dFormat::D32FLockable
            | D3dFormat::D24FS8
            | D3dFormat::Index32
            | D3dFormat::G16R16F
            | D3dFormat::R32F
            | D3dFormat::Multi2Argb8 => 4,

            D3dFormat::A16B16G16R16
            | D3dFormat::Q16W16V16U16
            | D3dFormat::A16B16G16R16F
            | D3dFormat::G32R32F
            | D3dFormat::Dxt1 => 8,

            D3dFormat::A32B32G32R32F
            | D3dFormat::Dxt2
            | D3dFormat::Dxt3
            | D3dFormat::Dxt4
            | D3dFormat::Dxt5
            | D3dFormat::Ati2 => 16,
        }
    }

    pub const fn info(self) -> FormatInfo {
        FormatInfo {
            bytes_per_element: self.element_size(),
            block_compressed: self.is_compressed(),
        }
    }
}

/// Size metadata for one texel format.
///
/// For block-compressed formats an element is a 4x4 texel block, otherwise a single texel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FormatInfo {
    pub bytes_per_element: u32,
    pub block_compressed: bool,
}

impl FormatInfo {
    /// Number of elements needed to cover `texels` texels along one axis (not depth).
    pub const fn elements(&self, texels: u32) -> u32 {
        if self.block_compressed {
            texels.div_ceil(COMPRESSED_BLOCK_DIM)
        } else {
            texels
        }
    }

    /// Converts a texel span `[start, end)` into the element span covering it.
    pub const fn element_range(&self, start: u32, end: u32) -> (u32, u32) {
        if self.block_compressed {
            (start / COMPRESSED_BLOCK_DIM, end.div_ceil(COMPRESSED_BLOCK_DIM))
        } else {
            (start, end)
        }
    }

    /// Bytes in one row of a linear (untiled) copy of a `width`-texel image.
    pub const fn row_pitch(&self, width: u32) -> u64 {
        self.elements(width) as u64 * self.bytes_per_element as u64
    }

    /// Bytes of a linear (untiled) `width x height x depth` image.
    pub const fn linear_size(&self, width: u32, height: u32, depth: u32) -> u64 {
        self.row_pitch(width) * self.elements(height) as u64 * depth as u64
    }
}

/// Format code to metadata lookup consumed by the image controllers.
pub trait FormatTable {
    fn format_info(&self, raw: u32) -> Option<FormatInfo>;

    fn lookup(&self, raw: u32) -> Result<FormatInfo, TilingError> {
        self.format_info(raw)
            .ok_or(TilingError::UnsupportedFormat(raw))
    }
}

/// The D3D9 `D3DFORMAT` table.
#[derive(Debug, Clone, Copy, Default)]
pub struct D3d9FormatTable;

impl FormatTable for D3d9FormatTable {
    fn format_info(&self, raw: u32) -> Option<FormatInfo> {
        D3dFormat::from_raw(raw).map(D3dFormat::info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fourcc_codes_match_d3d_values() {
        assert_eq!(D3dFormat::Dxt1.raw(), 0x3154_5844);
        assert_eq!(D3dFormat::Ati2.raw(), 0x3249_5441);
        assert_eq!(D3dFormat::from_raw(0x3554_5844), Some(D3dFormat::Dxt5));
        assert_eq!(D3dFormat::from_raw(21), Some(D3dFormat::A8R8G8B8));
    }

    #[test]
    fn every_listed_format_round_trips_its_code() {
        for format in D3dFormat::ALL {
            assert_eq!(D3dFormat::from_raw(format.raw()), Some(format));
        }
    }

    #[test]
    fn compressed_formats_report_block_sizes() {
        assert_eq!(D3dFormat::Dxt1.info(), FormatInfo { bytes_per_element: 8, block_compressed: true });
        assert_eq!(D3dFormat::Dxt5.info().bytes_per_element, 16);
        assert!(!D3dFormat::A8R8G8B8.info().block_compressed);
    }

    #[test]
    fn element_counts_round_partial_blocks_up() {
        let dxt = D3dFormat::Dxt3.info();
        assert_eq!(dxt.elements(8), 2);
        assert_eq!(dxt.elements(6), 2);
        assert_eq!(dxt.elements(1), 1);
        assert_eq!(dxt.element_range(4, 10), (1, 3));

        let argb = D3dFormat::A8R8G8B8.info();
        assert_eq!(argb.elements(6), 6);
        assert_eq!(argb.element_range(4, 10), (4, 10));
    }

    #[test]
    fn pitches_and_linear_sizes() {
        assert_eq!(D3dFormat::R5G6B5.info().row_pitch(10), 20);
        assert_eq!(D3dFormat::Dxt1.info().row_pitch(16), 32);
        assert_eq!(D3dFormat::Dxt1.info().linear_size(16, 16, 1), 128);
        assert_eq!(D3dFormat::A8R8G8B8.info().linear_size(4, 4, 2), 128);
    }

    #[test]
    fn unknown_formats_are_reported() {
        assert_eq!(D3d9FormatTable.lookup(0xDEAD), Err(TilingError::UnsupportedFormat(0xDEAD)));
        assert_eq!(
            D3d9FormatTable.lookup(D3dFormat::L8.raw()),
            Ok(FormatInfo { bytes_per_element: 1, block_compressed: false })
        );
    }
}
