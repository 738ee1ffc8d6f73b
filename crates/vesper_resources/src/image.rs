//! CPU-side images
//!
//! [`Image`] is the pixel container exchanged with the texture store: callers
//! hand one to `texture_2d_create` and receive one back from `texture_2d_get`.
//! Only uncompressed formats are supported; block-compressed formats belong to
//! asset import, which lives outside the server.

use glam::UVec2;
use half::f16;
use vesper_core::math::Color;
use vesper_core::{ordinal_enum, Result, ServerError};

ordinal_enum! {
    /// Pixel layout of an [`Image`].
    #[derive(Default)]
    pub enum ImageFormat {
        L8 = 0,
        La8 = 1,
        R8 = 2,
        Rg8 = 3,
        Rgb8 = 4,
        #[default]
        Rgba8 = 5,
        Rgba4444 = 6,
        Rgb565 = 7,
        Rf = 8,
        Rgf = 9,
        Rgbf = 10,
        Rgbaf = 11,
        Rh = 12,
        Rgh = 13,
        Rgbh = 14,
        Rgbah = 15,
        Rgbe9995 = 16,
    }
}

impl ImageFormat {
    /// Bytes used by a single pixel.
    #[must_use]
    pub const fn pixel_size(self) -> usize {
        match self {
            Self::L8 | Self::R8 => 1,
            Self::La8 | Self::Rg8 | Self::Rgba4444 | Self::Rgb565 | Self::Rh => 2,
            Self::Rgb8 => 3,
            Self::Rgba8 | Self::Rf | Self::Rgh | Self::Rgbe9995 => 4,
            Self::Rgbh => 6,
            Self::Rgf | Self::Rgbah => 8,
            Self::Rgbf => 12,
            Self::Rgbaf => 16,
        }
    }

    /// Number of color channels stored.
    #[must_use]
    pub const fn channel_count(self) -> usize {
        match self {
            Self::L8 | Self::R8 | Self::Rf | Self::Rh => 1,
            Self::La8 | Self::Rg8 | Self::Rgf | Self::Rgh => 2,
            Self::Rgb8 | Self::Rgb565 | Self::Rgbf | Self::Rgbh | Self::Rgbe9995 => 3,
            Self::Rgba8 | Self::Rgba4444 | Self::Rgbaf | Self::Rgbah => 4,
        }
    }

    #[must_use]
    pub const fn is_hdr(self) -> bool {
        matches!(
            self,
            Self::Rf
                | Self::Rgf
                | Self::Rgbf
                | Self::Rgbaf
                | Self::Rh
                | Self::Rgh
                | Self::Rgbh
                | Self::Rgbah
                | Self::Rgbe9995
        )
    }
}

/// Number of mip levels of a full chain for `width`×`height`, base level included.
#[must_use]
pub fn mipmap_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// Byte size of an image, including every mip level when `mipmaps` is set.
#[must_use]
pub fn data_size(width: u32, height: u32, format: ImageFormat, mipmaps: bool) -> usize {
    let levels = if mipmaps { mipmap_count(width, height) } else { 1 };
    (0..levels)
        .map(|level| {
            let w = (width >> level).max(1) as usize;
            let h = (height >> level).max(1) as usize;
            w * h * format.pixel_size()
        })
        .sum()
}

/// Uncompressed pixel data with an optional mip chain.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Image {
    width: u32,
    height: u32,
    mipmaps: bool,
    format: ImageFormat,
    data: Vec<u8>,
}

impl Image {
    /// Wraps raw bytes, validating their length against the format.
    pub fn new(width: u32, height: u32, mipmaps: bool, format: ImageFormat, data: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(ServerError::InvalidArgument(format!(
                "image size must be positive, got {width}x{height}"
            )));
        }
        let expected = data_size(width, height, format, mipmaps);
        if data.len() != expected {
            return Err(ServerError::SizeMismatch {
                what: "image data",
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            mipmaps,
            format,
            data,
        })
    }

    /// Zero-filled image.
    #[must_use]
    pub fn create_empty(width: u32, height: u32, mipmaps: bool, format: ImageFormat) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        Self {
            width,
            height,
            mipmaps,
            format,
            data: vec![0; data_size(width, height, format, mipmaps)],
        }
    }

    /// RGBA8 image from a row-major list of colors.
    pub fn from_colors(width: u32, height: u32, pixels: &[Color]) -> Result<Self> {
        let data: Vec<u8> = pixels.iter().flat_map(|c| c.to_rgba8()).collect();
        Self::new(width, height, false, ImageFormat::Rgba8, data)
    }

    /// Image filled with a single color.
    #[must_use]
    pub fn filled(width: u32, height: u32, format: ImageFormat, color: Color) -> Self {
        let mut image = Self::create_empty(width, height, false, format);
        image.fill(color);
        image
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn size(&self) -> UVec2 {
        UVec2::new(self.width, self.height)
    }

    #[must_use]
    pub fn format(&self) -> ImageFormat {
        self.format
    }

    #[must_use]
    pub fn has_mipmaps(&self) -> bool {
        self.mipmaps
    }

    #[must_use]
    pub fn mipmap_count(&self) -> u32 {
        if self.mipmaps {
            mipmap_count(self.width, self.height)
        } else {
            1
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    fn pixel_offset(&self, x: u32, y: u32) -> Option<usize> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some((y as usize * self.width as usize + x as usize) * self.format.pixel_size())
    }

    /// Reads a base-level pixel. Out-of-range coordinates yield transparent black.
    #[must_use]
    pub fn get_pixel(&self, x: u32, y: u32) -> Color {
        match self.pixel_offset(x, y) {
            Some(ofs) => decode_pixel(self.format, &self.data[ofs..ofs + self.format.pixel_size()]),
            None => Color::TRANSPARENT,
        }
    }

    /// Writes a base-level pixel. Out-of-range coordinates are ignored.
    pub fn set_pixel(&mut self, x: u32, y: u32, color: Color) {
        if let Some(ofs) = self.pixel_offset(x, y) {
            let size = self.format.pixel_size();
            encode_pixel(self.format, color, &mut self.data[ofs..ofs + size]);
        }
    }

    /// Fills every level with `color`.
    pub fn fill(&mut self, color: Color) {
        let size = self.format.pixel_size();
        let mut pixel = vec![0u8; size];
        encode_pixel(self.format, color, &mut pixel);
        for chunk in self.data.chunks_exact_mut(size) {
            chunk.copy_from_slice(&pixel);
        }
    }

    /// Re-encodes the image into another format, dropping mipmaps.
    #[must_use]
    pub fn convert(&self, format: ImageFormat) -> Image {
        if format == self.format && !self.mipmaps {
            return self.clone();
        }
        let mut out = Image::create_empty(self.width, self.height, false, format);
        for y in 0..self.height {
            for x in 0..self.width {
                out.set_pixel(x, y, self.get_pixel(x, y));
            }
        }
        out
    }

    /// Rebuilds the mip chain with a 2×2 box filter.
    pub fn generate_mipmaps(&mut self) {
        let size = self.format.pixel_size();
        let base_len = self.width as usize * self.height as usize * size;
        self.data.truncate(base_len);

        let (mut w, mut h) = (self.width, self.height);
        let mut level_start = 0;
        while w > 1 || h > 1 {
            let (nw, nh) = ((w >> 1).max(1), (h >> 1).max(1));
            let mut next = vec![0u8; nw as usize * nh as usize * size];
            for y in 0..nh {
                for x in 0..nw {
                    let mut acc = [0.0f32; 4];
                    for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                        let sx = (x * 2 + dx).min(w - 1) as usize;
                        let sy = (y * 2 + dy).min(h - 1) as usize;
                        let ofs = level_start + (sy * w as usize + sx) * size;
                        let c = decode_pixel(self.format, &self.data[ofs..ofs + size]).to_array();
                        for (a, v) in acc.iter_mut().zip(c) {
                            *a += v * 0.25;
                        }
                    }
                    let ofs = (y as usize * nw as usize + x as usize) * size;
                    encode_pixel(self.format, Color::from_array(acc), &mut next[ofs..ofs + size]);
                }
            }
            level_start = self.data.len();
            self.data.extend_from_slice(&next);
            w = nw;
            h = nh;
        }
        self.mipmaps = true;
    }

    /// Converts to an 8-bit RGBA buffer from the `image` crate.
    #[must_use]
    pub fn to_rgba_image(&self) -> image::RgbaImage {
        let rgba = self.convert(ImageFormat::Rgba8);
        image::RgbaImage::from_raw(self.width, self.height, rgba.data).unwrap_or_else(|| {
            log::error!("Image::to_rgba_image: inconsistent buffer for {}x{}", self.width, self.height);
            image::RgbaImage::new(self.width, self.height)
        })
    }
}

impl From<image::RgbaImage> for Image {
    fn from(img: image::RgbaImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            width: width.max(1),
            height: height.max(1),
            mipmaps: false,
            format: ImageFormat::Rgba8,
            data: img.into_raw(),
        }
    }
}

// ============================================================================
// Pixel codecs
// ============================================================================

fn unorm8(v: u8) -> f32 {
    f32::from(v) / 255.0
}

fn to_unorm8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn read_f32(bytes: &[u8], i: usize) -> f32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[i * 4..i * 4 + 4]);
    f32::from_le_bytes(raw)
}

fn read_f16(bytes: &[u8], i: usize) -> f32 {
    f16::from_le_bytes([bytes[i * 2], bytes[i * 2 + 1]]).to_f32()
}

fn decode_pixel(format: ImageFormat, px: &[u8]) -> Color {
    match format {
        ImageFormat::L8 => {
            let l = unorm8(px[0]);
            Color::rgb(l, l, l)
        }
        ImageFormat::La8 => {
            let l = unorm8(px[0]);
            Color::rgba(l, l, l, unorm8(px[1]))
        }
        ImageFormat::R8 => Color::rgb(unorm8(px[0]), 0.0, 0.0),
        ImageFormat::Rg8 => Color::rgb(unorm8(px[0]), unorm8(px[1]), 0.0),
        ImageFormat::Rgb8 => Color::rgb(unorm8(px[0]), unorm8(px[1]), unorm8(px[2])),
        ImageFormat::Rgba8 => Color::from_rgba8([px[0], px[1], px[2], px[3]]),
        ImageFormat::Rgba4444 => {
            let v = u16::from_le_bytes([px[0], px[1]]);
            let c = |shift: u16| f32::from((v >> shift) & 0xF) / 15.0;
            Color::rgba(c(12), c(8), c(4), c(0))
        }
        ImageFormat::Rgb565 => {
            let v = u16::from_le_bytes([px[0], px[1]]);
            Color::rgb(
                f32::from((v >> 11) & 0x1F) / 31.0,
                f32::from((v >> 5) & 0x3F) / 63.0,
                f32::from(v & 0x1F) / 31.0,
            )
        }
        ImageFormat::Rf => Color::rgb(read_f32(px, 0), 0.0, 0.0),
        ImageFormat::Rgf => Color::rgb(read_f32(px, 0), read_f32(px, 1), 0.0),
        ImageFormat::Rgbf => Color::rgb(read_f32(px, 0), read_f32(px, 1), read_f32(px, 2)),
        ImageFormat::Rgbaf => Color::rgba(read_f32(px, 0), read_f32(px, 1), read_f32(px, 2), read_f32(px, 3)),
        ImageFormat::Rh => Color::rgb(read_f16(px, 0), 0.0, 0.0),
        ImageFormat::Rgh => Color::rgb(read_f16(px, 0), read_f16(px, 1), 0.0),
        ImageFormat::Rgbh => Color::rgb(read_f16(px, 0), read_f16(px, 1), read_f16(px, 2)),
        ImageFormat::Rgbah => Color::rgba(read_f16(px, 0), read_f16(px, 1), read_f16(px, 2), read_f16(px, 3)),
        ImageFormat::Rgbe9995 => {
            let v = u32::from_le_bytes([px[0], px[1], px[2], px[3]]);
            let exp = ((v >> 27) & 0x1F) as i32 - 15 - 9;
            let scale = 2f32.powi(exp);
            Color::rgb(
                (v & 0x1FF) as f32 * scale,
                ((v >> 9) & 0x1FF) as f32 * scale,
                ((v >> 18) & 0x1FF) as f32 * scale,
            )
        }
    }
}

fn encode_pixel(format: ImageFormat, c: Color, out: &mut [u8]) {
    let write_f32 = |out: &mut [u8], vals: &[f32]| {
        for (i, v) in vals.iter().enumerate() {
            out[i * 4..i * 4 + 4].copy_from_slice(&v.to_le_bytes());
        }
    };
    let write_f16 = |out: &mut [u8], vals: &[f32]| {
        for (i, v) in vals.iter().enumerate() {
            out[i * 2..i * 2 + 2].copy_from_slice(&f16::from_f32(*v).to_le_bytes());
        }
    };
    match format {
        ImageFormat::L8 => out[0] = to_unorm8((c.r + c.g + c.b) / 3.0),
        ImageFormat::La8 => {
            out[0] = to_unorm8((c.r + c.g + c.b) / 3.0);
            out[1] = to_unorm8(c.a);
        }
        ImageFormat::R8 => out[0] = to_unorm8(c.r),
        ImageFormat::Rg8 => {
            out[0] = to_unorm8(c.r);
            out[1] = to_unorm8(c.g);
        }
        ImageFormat::Rgb8 => out[..3].copy_from_slice(&c.to_rgba8()[..3]),
        ImageFormat::Rgba8 => out.copy_from_slice(&c.to_rgba8()),
        ImageFormat::Rgba4444 => {
            let q = |v: f32| (v.clamp(0.0, 1.0) * 15.0).round() as u16;
            let v = (q(c.r) << 12) | (q(c.g) << 8) | (q(c.b) << 4) | q(c.a);
            out.copy_from_slice(&v.to_le_bytes());
        }
        ImageFormat::Rgb565 => {
            let r = (c.r.clamp(0.0, 1.0) * 31.0).round() as u16;
            let g = (c.g.clamp(0.0, 1.0) * 63.0).round() as u16;
            let b = (c.b.clamp(0.0, 1.0) * 31.0).round() as u16;
            out.copy_from_slice(&((r << 11) | (g << 5) | b).to_le_bytes());
        }
        ImageFormat::Rf => write_f32(out, &[c.r]),
        ImageFormat::Rgf => write_f32(out, &[c.r, c.g]),
        ImageFormat::Rgbf => write_f32(out, &[c.r, c.g, c.b]),
        ImageFormat::Rgbaf => write_f32(out, &c.to_array()),
        ImageFormat::Rh => write_f16(out, &[c.r]),
        ImageFormat::Rgh => write_f16(out, &[c.r, c.g]),
        ImageFormat::Rgbh => write_f16(out, &[c.r, c.g, c.b]),
        ImageFormat::Rgbah => write_f16(out, &c.to_array()),
        ImageFormat::Rgbe9995 => out.copy_from_slice(&encode_rgbe9995(c).to_le_bytes()),
    }
}

fn encode_rgbe9995(c: Color) -> u32 {
    const MAX_VAL: f32 = 65408.0;
    let r = c.r.clamp(0.0, MAX_VAL);
    let g = c.g.clamp(0.0, MAX_VAL);
    let b = c.b.clamp(0.0, MAX_VAL);
    let max = r.max(g).max(b);
    let shared = (max.max(f32::MIN_POSITIVE).log2().floor() as i32).max(-16) + 1 + 15;
    let mut exp = shared.clamp(0, 31);
    let mut denom = 2f32.powi(exp - 15 - 9);
    if (max / denom).round() as u32 == 512 {
        exp = (exp + 1).min(31);
        denom *= 2.0;
    }
    let q = |v: f32| ((v / denom).round() as u32).min(511);
    q(r) | (q(g) << 9) | (q(b) << 18) | ((exp as u32) << 27)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_size_with_mips() {
        assert_eq!(data_size(4, 4, ImageFormat::Rgba8, false), 64);
        // 4x4 + 2x2 + 1x1
        assert_eq!(data_size(4, 4, ImageFormat::Rgba8, true), (16 + 4 + 1) * 4);
        assert_eq!(mipmap_count(1, 1), 1);
        assert_eq!(mipmap_count(256, 16), 9);
    }

    #[test]
    fn rejects_wrong_length() {
        let err = Image::new(2, 2, false, ImageFormat::Rgba8, vec![0; 15]).unwrap_err();
        assert!(matches!(err, ServerError::SizeMismatch { expected: 16, actual: 15, .. }));
    }

    #[test]
    fn pixel_round_trip_rgba8() {
        let img = Image::from_colors(2, 1, &[Color::RED, Color::BLUE]).unwrap();
        assert_eq!(img.get_pixel(0, 0), Color::RED);
        assert_eq!(img.get_pixel(1, 0), Color::BLUE);
        assert_eq!(img.get_pixel(5, 5), Color::TRANSPARENT);
    }

    #[test]
    fn half_float_conversion() {
        let img = Image::filled(2, 2, ImageFormat::Rgbah, Color::rgba(0.5, 2.0, 4.0, 1.0));
        let c = img.get_pixel(1, 1);
        assert_eq!((c.r, c.g, c.b, c.a), (0.5, 2.0, 4.0, 1.0));
    }

    #[test]
    fn rgbe_encodes_hdr_values() {
        let img = Image::filled(1, 1, ImageFormat::Rgbe9995, Color::rgb(1.0, 0.5, 8.0));
        let c = img.get_pixel(0, 0);
        assert!((c.r - 1.0).abs() < 0.05);
        assert!((c.g - 0.5).abs() < 0.05);
        assert!((c.b - 8.0).abs() < 0.05);
    }

    #[test]
    fn mipmaps_average_down_to_one_pixel() {
        let mut img = Image::from_colors(2, 2, &[Color::WHITE, Color::BLACK, Color::BLACK, Color::WHITE]).unwrap();
        img.generate_mipmaps();
        assert!(img.has_mipmaps());
        assert_eq!(img.data().len(), data_size(2, 2, ImageFormat::Rgba8, true));
        let last = &img.data()[16..20];
        assert!((i32::from(last[0]) - 128).abs() <= 1);
    }

    #[test]
    fn converts_through_image_crate() {
        let img = Image::from_colors(1, 2, &[Color::GREEN, Color::RED]).unwrap();
        let rgba = img.to_rgba_image();
        assert_eq!(rgba.get_pixel(0, 1).0, [255, 0, 0, 255]);
        assert_eq!(Image::from(rgba), img);
    }
}
