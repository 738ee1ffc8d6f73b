//! Surface array formats and the stride helpers derived from them.
//!
//! A surface's vertex data lives in four logical streams:
//!
//! | Stream | Arrays |
//! |---|---|
//! | vertex | positions, followed by the normal/tangent block |
//! | normal/tangent | `NORMAL`, `TANGENT` (stored after the positions) |
//! | attribute | `COLOR`, `TEX_UV`, `TEX_UV2`, `CUSTOM0..3` |
//! | skin | `BONES`, `WEIGHTS` |
//!
//! Every size below is a pure function of the format bits and the vertex count.

use bitflags::bitflags;
use vesper_core::ordinal_enum;

ordinal_enum! {
    #[derive(Default)]
    pub enum PrimitiveType {
        Points = 0,
        Lines = 1,
        LineStrip = 2,
        #[default]
        Triangles = 3,
        TriangleStrip = 4,
    }
}

impl PrimitiveType {
    /// Primitives assembled from `elements` vertices or indices.
    #[must_use]
    pub const fn primitive_count(self, elements: u32) -> u32 {
        match self {
            Self::Points => elements,
            Self::Lines => elements / 2,
            Self::LineStrip => elements.saturating_sub(1),
            Self::Triangles => elements / 3,
            Self::TriangleStrip => elements.saturating_sub(2),
        }
    }
}

ordinal_enum! {
    pub enum ArrayType {
        Vertex = 0,
        Normal = 1,
        Tangent = 2,
        Color = 3,
        TexUv = 4,
        TexUv2 = 5,
        Custom0 = 6,
        Custom1 = 7,
        Custom2 = 8,
        Custom3 = 9,
        Bones = 10,
        Weights = 11,
        Index = 12,
    }
}

/// Number of [`ArrayType`] entries.
pub const ARRAY_MAX: usize = 13;
/// Number of custom arrays.
pub const ARRAY_CUSTOM_COUNT: usize = 4;

ordinal_enum! {
    #[derive(Default)]
    pub enum ArrayCustomFormat {
        #[default]
        Rgba8Unorm = 0,
        Rgba8Snorm = 1,
        RgHalf = 2,
        RgbaHalf = 3,
        RFloat = 4,
        RgFloat = 5,
        RgbFloat = 6,
        RgbaFloat = 7,
    }
}

impl ArrayCustomFormat {
    /// Floats per vertex on the CPU side.
    #[must_use]
    pub const fn components(self) -> usize {
        match self {
            Self::RFloat => 1,
            Self::RgHalf | Self::RgFloat => 2,
            Self::RgbFloat => 3,
            Self::Rgba8Unorm | Self::Rgba8Snorm | Self::RgbaHalf | Self::RgbaFloat => 4,
        }
    }

    /// Bytes per vertex once encoded.
    #[must_use]
    pub const fn byte_size(self) -> u32 {
        match self {
            Self::Rgba8Unorm | Self::Rgba8Snorm | Self::RgHalf | Self::RFloat => 4,
            Self::RgbaHalf | Self::RgFloat => 8,
            Self::RgbFloat => 12,
            Self::RgbaFloat => 16,
        }
    }
}

ordinal_enum! {
    #[derive(Default)]
    pub enum BlendShapeMode {
        #[default]
        Normalized = 0,
        Relative = 1,
    }
}

pub const ARRAY_FORMAT_CUSTOM_BASE: u32 = 13;
pub const ARRAY_FORMAT_CUSTOM_BITS: u32 = 3;
pub const ARRAY_FORMAT_CUSTOM_MASK: u64 = 0x7;
pub const ARRAY_FLAG_FORMAT_VERSION_SHIFT: u32 = 35;
pub const ARRAY_FLAG_FORMAT_VERSION_1: u64 = 0;
pub const ARRAY_FLAG_FORMAT_VERSION_2: u64 = 1 << ARRAY_FLAG_FORMAT_VERSION_SHIFT;
pub const ARRAY_FLAG_FORMAT_CURRENT_VERSION: u64 = ARRAY_FLAG_FORMAT_VERSION_2;

bitflags! {
    /// Which arrays a surface carries plus compression and version bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ArrayFormat: u64 {
        const VERTEX = 1 << 0;
        const NORMAL = 1 << 1;
        const TANGENT = 1 << 2;
        const COLOR = 1 << 3;
        const TEX_UV = 1 << 4;
        const TEX_UV2 = 1 << 5;
        const CUSTOM0 = 1 << 6;
        const CUSTOM1 = 1 << 7;
        const CUSTOM2 = 1 << 8;
        const CUSTOM3 = 1 << 9;
        const BONES = 1 << 10;
        const WEIGHTS = 1 << 11;
        const INDEX = 1 << 12;

        const CUSTOM0_FORMAT = ARRAY_FORMAT_CUSTOM_MASK << 13;
        const CUSTOM1_FORMAT = ARRAY_FORMAT_CUSTOM_MASK << 16;
        const CUSTOM2_FORMAT = ARRAY_FORMAT_CUSTOM_MASK << 19;
        const CUSTOM3_FORMAT = ARRAY_FORMAT_CUSTOM_MASK << 22;

        const FLAG_USE_2D_VERTICES = 1 << 25;
        const FLAG_USE_DYNAMIC_UPDATE = 1 << 26;
        const FLAG_USE_8_BONE_WEIGHTS = 1 << 27;
        const FLAG_USES_EMPTY_VERTEX_ARRAY = 1 << 28;
        const FLAG_COMPRESS_ATTRIBUTES = 1 << 29;

        const FLAG_FORMAT_VERSION_MASK = 0xFF << 35;

        const _ = !0;
    }
}

impl ArrayFormat {
    /// Bit for a single array type.
    #[must_use]
    pub const fn of(array: ArrayType) -> Self {
        Self::from_bits_retain(1 << array as u32)
    }

    #[must_use]
    pub fn has(self, array: ArrayType) -> bool {
        self.contains(Self::of(array))
    }

    /// Encoding of custom array `index` (0..4).
    #[must_use]
    pub fn custom_format(self, index: usize) -> ArrayCustomFormat {
        let shift = ARRAY_FORMAT_CUSTOM_BASE + ARRAY_FORMAT_CUSTOM_BITS * index as u32;
        let bits = (self.bits() >> shift) & ARRAY_FORMAT_CUSTOM_MASK;
        ArrayCustomFormat::from_ordinal(bits as i32).unwrap_or_default()
    }

    #[must_use]
    pub fn with_custom_format(self, index: usize, format: ArrayCustomFormat) -> Self {
        let shift = ARRAY_FORMAT_CUSTOM_BASE + ARRAY_FORMAT_CUSTOM_BITS * index as u32;
        let cleared = self.bits() & !(ARRAY_FORMAT_CUSTOM_MASK << shift);
        Self::from_bits_retain(cleared | ((format.ordinal() as u64) << shift))
    }

    /// Version field, `ARRAY_FLAG_FORMAT_VERSION_1` or `_2`.
    #[must_use]
    pub fn version(self) -> u64 {
        self.bits() & Self::FLAG_FORMAT_VERSION_MASK.bits()
    }

    #[must_use]
    pub fn with_current_version(self) -> Self {
        Self::from_bits_retain((self.bits() & !Self::FLAG_FORMAT_VERSION_MASK.bits()) | ARRAY_FLAG_FORMAT_CURRENT_VERSION)
    }

    #[must_use]
    pub fn is_compressed(self) -> bool {
        self.contains(Self::FLAG_COMPRESS_ATTRIBUTES)
    }

    #[must_use]
    pub fn is_2d(self) -> bool {
        self.contains(Self::FLAG_USE_2D_VERTICES)
    }

    /// Influences per vertex: 4 or 8.
    #[must_use]
    pub fn bone_count(self) -> usize {
        if self.contains(Self::FLAG_USE_8_BONE_WEIGHTS) { 8 } else { 4 }
    }
}

/// Strides and per-array offsets for a format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FormatLayout {
    /// Byte offset of each array inside its stream. Normal and tangent
    /// offsets include the position block that precedes them.
    pub offsets: [u32; ARRAY_MAX],
    pub vertex_stride: u32,
    pub normal_tangent_stride: u32,
    pub attribute_stride: u32,
    pub skin_stride: u32,
    pub index_stride: u32,
}

impl FormatLayout {
    /// Computes the layout for `format` with `vertex_len` vertices.
    #[must_use]
    pub fn new(format: ArrayFormat, vertex_len: u32) -> Self {
        let mut layout = Self::default();

        #[derive(Clone, Copy)]
        enum Stream {
            Vertex,
            Normal,
            Attribute,
            Skin,
        }
        let mut stream = Stream::Vertex;
        let compressed = format.is_compressed();
        let bones = format.bone_count() as u32;

        for array in ArrayType::ALL.iter().copied() {
            stream = match array {
                ArrayType::Vertex => Stream::Vertex,
                ArrayType::Normal => Stream::Normal,
                ArrayType::Color => Stream::Attribute,
                ArrayType::Bones => Stream::Skin,
                _ => stream,
            };
            if !format.has(array) {
                continue;
            }
            let elem_size = match array {
                ArrayType::Vertex => {
                    if format.is_2d() || compressed { 8 } else { 12 }
                }
                ArrayType::Normal | ArrayType::Color => 4,
                ArrayType::Tangent => {
                    if compressed { 0 } else { 4 }
                }
                ArrayType::TexUv | ArrayType::TexUv2 => {
                    if compressed { 4 } else { 8 }
                }
                ArrayType::Custom0 | ArrayType::Custom1 | ArrayType::Custom2 | ArrayType::Custom3 => {
                    let index = (array.ordinal() - ArrayType::Custom0.ordinal()) as usize;
                    format.custom_format(index).byte_size()
                }
                ArrayType::Bones | ArrayType::Weights => 2 * bones,
                ArrayType::Index => {
                    layout.index_stride = if vertex_len >= (1 << 16) || vertex_len == 0 { 4 } else { 2 };
                    continue;
                }
            };

            let accum = match stream {
                Stream::Vertex => &mut layout.vertex_stride,
                Stream::Normal => &mut layout.normal_tangent_stride,
                Stream::Attribute => &mut layout.attribute_stride,
                Stream::Skin => &mut layout.skin_stride,
            };
            let mut offset = *accum;
            *accum += elem_size;
            if matches!(array, ArrayType::Normal | ArrayType::Tangent) {
                offset += layout.vertex_stride * vertex_len;
            }
            layout.offsets[array as usize] = offset;
        }
        layout
    }

    /// Expected `vertex_data` length (positions plus normal/tangent block).
    #[must_use]
    pub fn vertex_buffer_size(&self, vertex_len: u32) -> usize {
        (self.vertex_stride + self.normal_tangent_stride) as usize * vertex_len as usize
    }

    #[must_use]
    pub fn attribute_buffer_size(&self, vertex_len: u32) -> usize {
        self.attribute_stride as usize * vertex_len as usize
    }

    #[must_use]
    pub fn skin_buffer_size(&self, vertex_len: u32) -> usize {
        self.skin_stride as usize * vertex_len as usize
    }
}

/// Byte size of one position entry.
#[must_use]
pub fn vertex_stride(format: ArrayFormat, vertex_len: u32) -> u32 {
    FormatLayout::new(format, vertex_len).vertex_stride
}

/// Byte size of one interleaved normal+tangent entry.
#[must_use]
pub fn normal_tangent_stride(format: ArrayFormat, vertex_len: u32) -> u32 {
    FormatLayout::new(format, vertex_len).normal_tangent_stride
}

/// Byte size of one interleaved attribute entry (color, UVs, custom).
#[must_use]
pub fn attribute_stride(format: ArrayFormat, vertex_len: u32) -> u32 {
    FormatLayout::new(format, vertex_len).attribute_stride
}

/// Byte size of one interleaved skin entry (bones, weights).
#[must_use]
pub fn skin_stride(format: ArrayFormat, vertex_len: u32) -> u32 {
    FormatLayout::new(format, vertex_len).skin_stride
}

/// Offset of `array` within its stream.
#[must_use]
pub fn format_offset(format: ArrayFormat, vertex_len: u32, array: ArrayType) -> u32 {
    FormatLayout::new(format, vertex_len).offsets[array as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASIC: ArrayFormat = ArrayFormat::VERTEX
        .union(ArrayFormat::NORMAL)
        .union(ArrayFormat::TANGENT)
        .union(ArrayFormat::TEX_UV);

    #[test]
    fn flag_bit_positions() {
        assert_eq!(ArrayFormat::FLAG_USE_2D_VERTICES.bits(), 1 << 25);
        assert_eq!(ArrayFormat::FLAG_USE_DYNAMIC_UPDATE.bits(), 1 << 26);
        assert_eq!(ArrayFormat::FLAG_USE_8_BONE_WEIGHTS.bits(), 1 << 27);
        assert_eq!(ArrayFormat::FLAG_USES_EMPTY_VERTEX_ARRAY.bits(), 1 << 28);
        assert_eq!(ArrayFormat::FLAG_COMPRESS_ATTRIBUTES.bits(), 1 << 29);
        assert_eq!(ARRAY_FLAG_FORMAT_VERSION_2, 1 << 35);
        assert_eq!(ArrayFormat::of(ArrayType::Index), ArrayFormat::INDEX);
    }

    #[test]
    fn uncompressed_strides() {
        let f = BASIC;
        assert_eq!(vertex_stride(f, 100), 12);
        assert_eq!(normal_tangent_stride(f, 100), 8);
        assert_eq!(attribute_stride(f, 100), 8);
        assert_eq!(skin_stride(f, 100), 0);
        // Normals follow the 100 positions.
        assert_eq!(format_offset(f, 100, ArrayType::Normal), 1200);
        assert_eq!(format_offset(f, 100, ArrayType::Tangent), 1204);
    }

    #[test]
    fn compressed_strides() {
        let f = BASIC | ArrayFormat::FLAG_COMPRESS_ATTRIBUTES;
        assert_eq!(vertex_stride(f, 10), 8);
        assert_eq!(normal_tangent_stride(f, 10), 4);
        assert_eq!(attribute_stride(f, 10), 4);
    }

    #[test]
    fn two_d_positions() {
        let f = ArrayFormat::VERTEX | ArrayFormat::FLAG_USE_2D_VERTICES;
        assert_eq!(vertex_stride(f, 4), 8);
    }

    #[test]
    fn skin_and_custom_strides() {
        let f = ArrayFormat::VERTEX | ArrayFormat::BONES | ArrayFormat::WEIGHTS;
        assert_eq!(skin_stride(f, 3), 16);
        assert_eq!(skin_stride(f | ArrayFormat::FLAG_USE_8_BONE_WEIGHTS, 3), 32);

        let f = (ArrayFormat::VERTEX | ArrayFormat::COLOR | ArrayFormat::CUSTOM0)
            .with_custom_format(0, ArrayCustomFormat::RgbaFloat);
        assert_eq!(f.custom_format(0), ArrayCustomFormat::RgbaFloat);
        assert_eq!(attribute_stride(f, 3), 4 + 16);
        assert_eq!(format_offset(f, 3, ArrayType::Custom0), 4);
    }

    #[test]
    fn index_width_follows_vertex_count() {
        let f = ArrayFormat::VERTEX | ArrayFormat::INDEX;
        assert_eq!(FormatLayout::new(f, 100).index_stride, 2);
        assert_eq!(FormatLayout::new(f, 70_000).index_stride, 4);
    }

    #[test]
    fn strides_are_pure() {
        let f = BASIC | ArrayFormat::COLOR | ArrayFormat::BONES | ArrayFormat::WEIGHTS;
        for n in [0, 1, 7, 65_536] {
            assert_eq!(FormatLayout::new(f, n), FormatLayout::new(f, n));
        }
    }
}
