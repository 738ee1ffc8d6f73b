//! Texture Store
//!
//! Textures come in three shapes (2D, layered, 3D), each with a placeholder
//! flavor. Placeholders accept every operation, change nothing and answer
//! with a small magenta image, so code paths that only need *a* texture keep
//! working when real data is unavailable.
//!
//! Pixel data is mirrored on the CPU. The render crate uploads it to the
//! device whenever [`Texture::changes`] advances past the version it last saw.

use glam::UVec2;
use vesper_core::math::Color;
use vesper_core::{ordinal_enum, ChangeTracker, Result, Rid, RidKind, RidOwner, ServerError};

use crate::image::{Image, ImageFormat};

ordinal_enum! {
    pub enum TextureLayeredType {
        Array2D = 0,
        Cubemap = 1,
        CubemapArray = 2,
    }
}

ordinal_enum! {
    pub enum CubeMapLayer {
        Left = 0,
        Right = 1,
        Bottom = 2,
        Top = 3,
        Front = 4,
        Back = 5,
    }
}

/// Edge length of placeholder images.
pub const PLACEHOLDER_SIZE: u32 = 4;
/// Color placeholder textures report.
pub const PLACEHOLDER_COLOR: Color = Color::rgba(1.0, 0.0, 1.0, 1.0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureKind {
    Texture2D,
    Layered(TextureLayeredType),
    Texture3D,
}

/// Row returned by [`TextureStore::debug_usage`].
#[derive(Debug, Clone, PartialEq)]
pub struct TextureInfo {
    pub texture: Rid,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub format: ImageFormat,
    pub bytes: usize,
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct Texture {
    pub kind: TextureKind,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    /// Slice count for 3D textures, layer count for layered ones, 1 otherwise.
    pub depth: u32,
    pub mipmaps: bool,
    /// 2D: one image. Layered: one per layer. 3D: `depth` slices per mip level, level-major.
    pub images: Vec<Image>,
    pub placeholder: bool,
    pub size_override: Option<UVec2>,
    pub path: String,
    pub force_redraw_if_visible: bool,
    /// Set when the texture mirrors a viewport's render target.
    pub render_target: Option<Rid>,
    pub changes: ChangeTracker,
}

impl Texture {
    fn new(kind: TextureKind, images: Vec<Image>, depth: u32) -> Self {
        let (format, width, height, mipmaps) = images
            .first()
            .map_or((ImageFormat::Rgba8, 0, 0, false), |img| {
                (img.format(), img.width(), img.height(), img.has_mipmaps())
            });
        Self {
            kind,
            format,
            width,
            height,
            depth,
            mipmaps,
            images,
            placeholder: false,
            size_override: None,
            path: String::new(),
            force_redraw_if_visible: false,
            render_target: None,
            changes: ChangeTracker::new(),
        }
    }

    fn placeholder(kind: TextureKind, depth: u32) -> Self {
        let img = placeholder_image();
        let mut tex = Self::new(kind, vec![img; depth.max(1) as usize], depth.max(1));
        tex.placeholder = true;
        tex
    }

    /// Size used for layout and UV computation, honoring the override.
    #[must_use]
    pub fn logical_size(&self) -> UVec2 {
        self.size_override.unwrap_or(UVec2::new(self.width, self.height))
    }

    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.images.iter().map(|i| i.data().len()).sum()
    }
}

#[must_use]
pub fn placeholder_image() -> Image {
    Image::filled(PLACEHOLDER_SIZE, PLACEHOLDER_SIZE, ImageFormat::Rgba8, PLACEHOLDER_COLOR)
}

fn layer_count_valid(ty: TextureLayeredType, count: usize) -> bool {
    match ty {
        TextureLayeredType::Array2D => count > 0,
        TextureLayeredType::Cubemap => count == 6,
        TextureLayeredType::CubemapArray => count > 0 && count % 6 == 0,
    }
}

fn check_same_shape(reference: &Image, other: &Image, what: &'static str) -> Result<()> {
    if other.size() != reference.size() || other.format() != reference.format() {
        return Err(ServerError::InvalidArgument(format!(
            "{what}: expected {}x{} {:?}, got {}x{} {:?}",
            reference.width(),
            reference.height(),
            reference.format(),
            other.width(),
            other.height(),
            other.format()
        )));
    }
    Ok(())
}

/// Expected slice count of a 3D texture with the given mip flag.
fn slices_3d(width: u32, height: u32, depth: u32, mipmaps: bool) -> Vec<(u32, u32, u32)> {
    let mut levels = vec![(width, height, depth)];
    if mipmaps {
        let (mut w, mut h, mut d) = (width, height, depth);
        while w > 1 || h > 1 || d > 1 {
            w = (w >> 1).max(1);
            h = (h >> 1).max(1);
            d = (d >> 1).max(1);
            levels.push((w, h, d));
        }
    }
    levels
}

pub struct TextureStore {
    owner: RidOwner<Texture>,
}

impl Default for TextureStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TextureStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            owner: RidOwner::new(RidKind::Texture),
        }
    }

    #[must_use]
    pub fn get(&self, rid: Rid) -> Option<&Texture> {
        self.owner.get(rid)
    }

    pub fn get_mut(&mut self, rid: Rid) -> Option<&mut Texture> {
        self.owner.get_mut(rid)
    }

    #[must_use]
    pub fn owns(&self, rid: Rid) -> bool {
        self.owner.owns(rid)
    }

    pub fn free(&mut self, rid: Rid) -> Option<Texture> {
        self.owner.take(rid)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Rid, &Texture)> {
        self.owner.iter()
    }

    // ========================================================================
    // Creation
    // ========================================================================

    pub fn initialize_2d(&mut self, rid: Rid, image: Image) -> Result<()> {
        if image.is_empty() {
            return Err(ServerError::InvalidArgument("texture_2d_create: empty image".into()));
        }
        self.owner.initialize(rid, Texture::new(TextureKind::Texture2D, vec![image], 1));
        Ok(())
    }

    pub fn initialize_2d_layered(&mut self, rid: Rid, layers: Vec<Image>, ty: TextureLayeredType) -> Result<()> {
        if !layer_count_valid(ty, layers.len()) {
            return Err(ServerError::InvalidArgument(format!(
                "texture_2d_layered_create: {} layers is invalid for {ty:?}",
                layers.len()
            )));
        }
        let first = &layers[0];
        if first.is_empty() {
            return Err(ServerError::InvalidArgument("texture_2d_layered_create: empty layer".into()));
        }
        for layer in &layers[1..] {
            check_same_shape(first, layer, "texture_2d_layered_create")?;
        }
        let depth = layers.len() as u32;
        self.owner.initialize(rid, Texture::new(TextureKind::Layered(ty), layers, depth));
        Ok(())
    }

    pub fn initialize_3d(
        &mut self,
        rid: Rid,
        format: ImageFormat,
        width: u32,
        height: u32,
        depth: u32,
        mipmaps: bool,
        data: Vec<Image>,
    ) -> Result<()> {
        validate_3d(format, width, height, depth, mipmaps, &data)?;
        let mut tex = Texture::new(TextureKind::Texture3D, data, depth);
        tex.format = format;
        tex.width = width;
        tex.height = height;
        tex.mipmaps = mipmaps;
        self.owner.initialize(rid, tex);
        Ok(())
    }

    pub fn initialize_2d_placeholder(&mut self, rid: Rid) {
        self.owner.initialize(rid, Texture::placeholder(TextureKind::Texture2D, 1));
    }

    pub fn initialize_2d_layered_placeholder(&mut self, rid: Rid, ty: TextureLayeredType) {
        let layers = match ty {
            TextureLayeredType::Array2D => 1,
            TextureLayeredType::Cubemap | TextureLayeredType::CubemapArray => 6,
        };
        self.owner.initialize(rid, Texture::placeholder(TextureKind::Layered(ty), layers));
    }

    pub fn initialize_3d_placeholder(&mut self, rid: Rid) {
        self.owner.initialize(rid, Texture::placeholder(TextureKind::Texture3D, PLACEHOLDER_SIZE));
    }

    /// Texture standing in for a viewport's color output.
    pub fn initialize_render_target(&mut self, rid: Rid, viewport: Rid, size: UVec2) {
        let img = Image::create_empty(size.x.max(1), size.y.max(1), false, ImageFormat::Rgba8);
        let mut tex = Texture::new(TextureKind::Texture2D, vec![img], 1);
        tex.render_target = Some(viewport);
        self.owner.initialize(rid, tex);
    }

    // ========================================================================
    // Updates
    // ========================================================================

    /// Replaces one layer of a 2D or layered texture. Size and format must match.
    pub fn update_2d(&mut self, rid: Rid, image: Image, layer: usize) -> Result<()> {
        let tex = self.owner.get_mut(rid).ok_or(ServerError::InvalidRid(rid))?;
        if tex.placeholder {
            return Ok(());
        }
        if tex.kind == TextureKind::Texture3D {
            return Err(ServerError::InvalidArgument("texture_2d_update on a 3D texture".into()));
        }
        let limit = tex.images.len();
        let current = tex.images.get(layer).ok_or(ServerError::OutOfRange {
            what: "texture layer",
            index: layer,
            limit,
        })?;
        check_same_shape(current, &image, "texture_2d_update")?;
        tex.images[layer] = image;
        tex.changes.changed();
        Ok(())
    }

    pub fn update_3d(&mut self, rid: Rid, data: Vec<Image>) -> Result<()> {
        let tex = self.owner.get_mut(rid).ok_or(ServerError::InvalidRid(rid))?;
        if tex.placeholder {
            return Ok(());
        }
        if tex.kind != TextureKind::Texture3D {
            return Err(ServerError::InvalidArgument("texture_3d_update on a non-3D texture".into()));
        }
        validate_3d(tex.format, tex.width, tex.height, tex.depth, tex.mipmaps, &data)?;
        tex.images = data;
        tex.changes.changed();
        Ok(())
    }

    /// Moves `src`'s contents into `dst`. The caller retires `src` afterwards.
    pub fn replace(&mut self, dst: Rid, src: Rid) -> Result<()> {
        if dst == src {
            return Err(ServerError::InvalidArgument("texture_replace: texture replaced by itself".into()));
        }
        let bound = |rid| self.owner.get(rid).is_some_and(|t: &Texture| t.render_target.is_some());
        if !self.owner.owns(dst) {
            return Err(ServerError::InvalidRid(dst));
        }
        if bound(dst) || bound(src) {
            return Err(ServerError::InvalidArgument("texture_replace: viewport textures cannot be replaced".into()));
        }
        let mut incoming = self.owner.take(src).ok_or(ServerError::InvalidRid(src))?;
        if let Some(existing) = self.owner.get_mut(dst) {
            incoming.path = std::mem::take(&mut existing.path);
            incoming.changes = existing.changes;
            incoming.changes.changed();
            *existing = incoming;
        }
        Ok(())
    }

    /// Stores the latest contents of a viewport-backed texture.
    pub fn store_render_target(&mut self, rid: Rid, image: Image) -> Result<()> {
        let tex = self.owner.get_mut(rid).ok_or(ServerError::InvalidRid(rid))?;
        if tex.render_target.is_none() {
            return Err(ServerError::InvalidArgument(format!("texture {rid:?} is not a viewport texture")));
        }
        tex.width = image.width();
        tex.height = image.height();
        tex.format = image.format();
        tex.images = vec![image];
        tex.changes.changed();
        Ok(())
    }

    /// Logical size used for layout. `width`/`height` ≤ 0 leaves it unchanged.
    pub fn set_size_override(&mut self, rid: Rid, width: i32, height: i32) -> Result<()> {
        let tex = self.owner.get_mut(rid).ok_or(ServerError::InvalidRid(rid))?;
        if width <= 0 || height <= 0 {
            return Err(ServerError::InvalidArgument(format!(
                "texture_set_size_override: size must be positive, got {width}x{height}"
            )));
        }
        if tex.kind != TextureKind::Texture2D {
            return Err(ServerError::InvalidArgument("texture_set_size_override: only 2D textures".into()));
        }
        tex.size_override = Some(UVec2::new(width as u32, height as u32));
        tex.changes.changed();
        Ok(())
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// First layer of a 2D or layered texture.
    #[must_use]
    pub fn get_2d(&self, rid: Rid) -> Option<Image> {
        self.get_layer(rid, 0)
    }

    #[must_use]
    pub fn get_layer(&self, rid: Rid, layer: usize) -> Option<Image> {
        let tex = self.owner.get(rid)?;
        if tex.kind == TextureKind::Texture3D {
            return None;
        }
        tex.images.get(layer).cloned()
    }

    #[must_use]
    pub fn get_3d(&self, rid: Rid) -> Vec<Image> {
        self.owner
            .get(rid)
            .filter(|t| t.kind == TextureKind::Texture3D)
            .map(|t| t.images.clone())
            .unwrap_or_default()
    }

    /// Logical size honoring the override; zero for unknown handles.
    #[must_use]
    pub fn size(&self, rid: Rid) -> UVec2 {
        self.owner.get(rid).map_or(UVec2::ZERO, Texture::logical_size)
    }

    #[must_use]
    pub fn debug_usage(&self) -> Vec<TextureInfo> {
        let mut infos: Vec<TextureInfo> = self
            .owner
            .iter()
            .map(|(rid, t)| TextureInfo {
                texture: rid,
                width: t.width,
                height: t.height,
                depth: t.depth,
                format: t.format,
                bytes: t.byte_size(),
                path: t.path.clone(),
            })
            .collect();
        infos.sort_by(|a, b| b.bytes.cmp(&a.bytes));
        infos
    }

    /// Total bytes held by every texture.
    #[must_use]
    pub fn memory_usage(&self) -> usize {
        self.owner.iter().map(|(_, t)| t.byte_size()).sum()
    }
}

fn validate_3d(format: ImageFormat, width: u32, height: u32, depth: u32, mipmaps: bool, data: &[Image]) -> Result<()> {
    if width == 0 || height == 0 || depth == 0 {
        return Err(ServerError::InvalidArgument(format!(
            "3D texture size must be positive, got {width}x{height}x{depth}"
        )));
    }
    let levels = slices_3d(width, height, depth, mipmaps);
    let expected: usize = levels.iter().map(|l| l.2 as usize).sum();
    if data.len() != expected {
        return Err(ServerError::SizeMismatch {
            what: "3D texture slices",
            expected,
            actual: data.len(),
        });
    }
    let mut slices = data.iter();
    for (w, h, d) in levels {
        for _ in 0..d {
            let Some(img) = slices.next() else { break };
            if img.width() != w || img.height() != h || img.format() != format {
                return Err(ServerError::InvalidArgument(format!(
                    "3D texture slice is {}x{} {:?}, expected {w}x{h} {format:?}",
                    img.width(),
                    img.height(),
                    img.format()
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_core::RidAllocator;

    fn rgba(w: u32, h: u32, c: Color) -> Image {
        Image::filled(w, h, ImageFormat::Rgba8, c)
    }

    #[test]
    fn create_and_read_back_2d() {
        let alloc = RidAllocator::new();
        let mut store = TextureStore::new();
        let rid = alloc.alloc(RidKind::Texture);
        let img = Image::from_colors(2, 2, &[Color::RED, Color::GREEN, Color::BLUE, Color::WHITE]).unwrap();
        store.initialize_2d(rid, img.clone()).unwrap();
        assert_eq!(store.get_2d(rid), Some(img));
        assert_eq!(store.size(rid), UVec2::new(2, 2));
    }

    #[test]
    fn cubemap_requires_six_layers() {
        let alloc = RidAllocator::new();
        let mut store = TextureStore::new();
        let rid = alloc.alloc(RidKind::Texture);
        let layers = vec![rgba(4, 4, Color::WHITE); 5];
        assert!(store.initialize_2d_layered(rid, layers, TextureLayeredType::Cubemap).is_err());
        let layers = vec![rgba(4, 4, Color::WHITE); 6];
        assert!(store.initialize_2d_layered(rid, layers, TextureLayeredType::Cubemap).is_ok());
    }

    #[test]
    fn update_rejects_size_change() {
        let alloc = RidAllocator::new();
        let mut store = TextureStore::new();
        let rid = alloc.alloc(RidKind::Texture);
        store.initialize_2d(rid, rgba(4, 4, Color::WHITE)).unwrap();
        assert!(store.update_2d(rid, rgba(8, 8, Color::RED), 0).is_err());
        assert_eq!(store.get_2d(rid).unwrap().get_pixel(0, 0), Color::WHITE);
        store.update_2d(rid, rgba(4, 4, Color::RED), 0).unwrap();
        assert_eq!(store.get_2d(rid).unwrap().get_pixel(0, 0), Color::RED);
    }

    #[test]
    fn size_override_ignores_non_positive() {
        let alloc = RidAllocator::new();
        let mut store = TextureStore::new();
        let rid = alloc.alloc(RidKind::Texture);
        store.initialize_2d(rid, rgba(4, 4, Color::WHITE)).unwrap();
        assert!(store.set_size_override(rid, 0, 10).is_err());
        assert!(store.set_size_override(rid, 10, -1).is_err());
        assert_eq!(store.size(rid), UVec2::new(4, 4));
        store.set_size_override(rid, 16, 8).unwrap();
        assert_eq!(store.size(rid), UVec2::new(16, 8));
    }

    #[test]
    fn placeholder_ignores_updates() {
        let alloc = RidAllocator::new();
        let mut store = TextureStore::new();
        let rid = alloc.alloc(RidKind::Texture);
        store.initialize_2d_placeholder(rid);
        store.update_2d(rid, rgba(1, 1, Color::BLUE), 0).unwrap();
        let img = store.get_2d(rid).unwrap();
        assert_eq!(img.size(), UVec2::splat(PLACEHOLDER_SIZE));
        assert_eq!(img.get_pixel(0, 0), PLACEHOLDER_COLOR);
    }

    #[test]
    fn replace_consumes_source() {
        let alloc = RidAllocator::new();
        let mut store = TextureStore::new();
        let dst = alloc.alloc(RidKind::Texture);
        let src = alloc.alloc(RidKind::Texture);
        store.initialize_2d(dst, rgba(2, 2, Color::WHITE)).unwrap();
        store.initialize_2d(src, rgba(8, 8, Color::GREEN)).unwrap();
        store.replace(dst, src).unwrap();
        assert!(!store.owns(src));
        assert_eq!(store.size(dst), UVec2::new(8, 8));
    }

    #[test]
    fn texture_3d_with_mips() {
        let alloc = RidAllocator::new();
        let mut store = TextureStore::new();
        let rid = alloc.alloc(RidKind::Texture);
        // 2x2x2 -> 1x1x1: 2 + 1 slices
        let data = vec![rgba(2, 2, Color::WHITE), rgba(2, 2, Color::WHITE), rgba(1, 1, Color::WHITE)];
        store.initialize_3d(rid, ImageFormat::Rgba8, 2, 2, 2, true, data).unwrap();
        assert_eq!(store.get_3d(rid).len(), 3);
        assert!(store.get_2d(rid).is_none());
    }
}
