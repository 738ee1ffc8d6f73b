//! Device-side storage behind viewports, textures and screens.
//!
//! Server handles never leak into the device. This cache owns every
//! [`TextureId`] the server creates and recreates them when the logical
//! resource changes size, format or contents.

use glam::UVec2;
use log::{debug, trace};
use rustc_hash::FxHashMap;
use vesper_core::{Result, Rid};
use vesper_resources::{ImageFormat, TextureStore};

use crate::device::{RenderingDevice, TargetFormat, TextureDesc, TextureId, TextureUsage};

/// Device textures of one viewport.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ViewportTargets {
    pub size: UVec2,
    pub format: TargetFormat,
    pub samples: u32,
    pub color: TextureId,
    /// Scaled 3D buffer when the internal size differs from `size`.
    pub internal: Option<(UVec2, TextureId)>,
    pub shadow_atlas: Option<(u32, TextureId)>,
    pub vrs: Option<(UVec2, TextureId)>,
    /// Copy of the color target taken by canvas items.
    pub backbuffer: Option<TextureId>,
}

/// Uploaded copy of a texture resource.
#[derive(Debug, Clone, Copy)]
struct Mirror {
    id: TextureId,
    version: u64,
    size: UVec2,
}

#[derive(Debug, Default)]
pub(crate) struct TargetCache {
    viewports: FxHashMap<Rid, ViewportTargets>,
    mirrors: FxHashMap<Rid, Mirror>,
    screens: FxHashMap<i32, (UVec2, TextureId)>,
    directional_atlas: Option<(u32, TextureId)>,
}

impl TargetCache {
    /// Color target of `viewport`, (re)created to match `size` and `format`.
    pub fn viewport(
        &mut self,
        device: &mut dyn RenderingDevice,
        viewport: Rid,
        size: UVec2,
        format: TargetFormat,
        samples: u32,
    ) -> Result<&mut ViewportTargets> {
        let stale = self
            .viewports
            .get(&viewport)
            .is_some_and(|t| t.size != size || t.format != format || t.samples != samples);
        if stale {
            self.free_viewport(device, viewport);
        }
        if !self.viewports.contains_key(&viewport) {
            let color = device.texture_create(&TextureDesc::render_target(size, format, samples), None)?;
            debug!("created {}x{} {format:?} target for viewport {viewport:?}", size.x, size.y);
            self.viewports.insert(
                viewport,
                ViewportTargets {
                    size,
                    format,
                    samples,
                    color,
                    internal: None,
                    shadow_atlas: None,
                    vrs: None,
                    backbuffer: None,
                },
            );
        }
        self.viewports
            .get_mut(&viewport)
            .ok_or(vesper_core::ServerError::InvalidRid(viewport))
    }

    #[must_use]
    pub fn color_of(&self, viewport: Rid) -> Option<TextureId> {
        self.viewports.get(&viewport).map(|t| t.color)
    }

    /// Buffer the 3D pass renders into: the color target itself at native
    /// resolution, a separate scaled buffer otherwise.
    pub fn internal(&mut self, device: &mut dyn RenderingDevice, viewport: Rid, size: UVec2) -> Result<TextureId> {
        let t = self
            .viewports
            .get_mut(&viewport)
            .ok_or(vesper_core::ServerError::InvalidRid(viewport))?;
        if size == t.size {
            if let Some((_, id)) = t.internal.take() {
                device.texture_free(id);
            }
            return Ok(t.color);
        }
        match t.internal {
            Some((s, id)) if s == size => Ok(id),
            stale => {
                if let Some((_, id)) = stale {
                    device.texture_free(id);
                }
                let id = device.texture_create(&TextureDesc::render_target(size, t.format, t.samples), None)?;
                t.internal = Some((size, id));
                Ok(id)
            }
        }
    }

    /// Positional shadow atlas of `viewport`, allocated on first use.
    pub fn shadow_atlas(&mut self, device: &mut dyn RenderingDevice, viewport: Rid, size: u32) -> Result<TextureId> {
        let t = self
            .viewports
            .get_mut(&viewport)
            .ok_or(vesper_core::ServerError::InvalidRid(viewport))?;
        match t.shadow_atlas {
            Some((s, id)) if s == size => Ok(id),
            stale => {
                if let Some((_, id)) = stale {
                    device.texture_free(id);
                }
                let id = device.texture_create(&depth_desc(size), None)?;
                trace!("allocated {size}px shadow atlas for viewport {viewport:?}");
                t.shadow_atlas = Some((size, id));
                Ok(id)
            }
        }
    }

    pub fn directional_atlas(&mut self, device: &mut dyn RenderingDevice, size: u32) -> Result<TextureId> {
        match self.directional_atlas {
            Some((s, id)) if s == size => Ok(id),
            stale => {
                if let Some((_, id)) = stale {
                    device.texture_free(id);
                }
                let id = device.texture_create(&depth_desc(size), None)?;
                self.directional_atlas = Some((size, id));
                Ok(id)
            }
        }
    }

    /// Canvas backbuffer of `viewport`, matching its color target.
    pub fn backbuffer(&mut self, device: &mut dyn RenderingDevice, viewport: Rid) -> Result<TextureId> {
        let t = self
            .viewports
            .get_mut(&viewport)
            .ok_or(vesper_core::ServerError::InvalidRid(viewport))?;
        if let Some(id) = t.backbuffer {
            return Ok(id);
        }
        let id = device.texture_create(&TextureDesc::render_target(t.size, t.format, 1), None)?;
        trace!("allocated backbuffer for viewport {viewport:?}");
        t.backbuffer = Some(id);
        Ok(id)
    }

    /// Uploads a shading-rate image for `viewport`. `rates` holds one byte
    /// per tile, stored in the red channel.
    pub fn vrs(&mut self, device: &mut dyn RenderingDevice, viewport: Rid, size: UVec2, rates: &[u8]) -> Result<()> {
        let t = self
            .viewports
            .get_mut(&viewport)
            .ok_or(vesper_core::ServerError::InvalidRid(viewport))?;
        let data: Vec<u8> = rates.iter().flat_map(|r| [*r, 0, 0, 255]).collect();
        match t.vrs {
            Some((s, id)) if s == size => device.texture_update(id, &data),
            stale => {
                if let Some((_, id)) = stale {
                    device.texture_free(id);
                }
                let desc = TextureDesc {
                    size,
                    format: TargetFormat::Rgba8,
                    usage: TextureUsage::SHADING_RATE | TextureUsage::COPY_DST,
                    samples: 1,
                };
                let id = device.texture_create(&desc, Some(&data))?;
                t.vrs = Some((size, id));
                Ok(())
            }
        }
    }

    pub fn free_viewport(&mut self, device: &mut dyn RenderingDevice, viewport: Rid) {
        let Some(t) = self.viewports.remove(&viewport) else {
            return;
        };
        device.texture_free(t.color);
        for id in [t.internal.map(|x| x.1), t.shadow_atlas.map(|x| x.1), t.vrs.map(|x| x.1), t.backbuffer]
            .into_iter()
            .flatten()
        {
            device.texture_free(id);
        }
    }

    /// Device copy of a 2D texture resource, re-uploaded whenever the
    /// resource changed. `None` for unknown, 3D or empty textures.
    pub fn mirror(
        &mut self,
        device: &mut dyn RenderingDevice,
        textures: &TextureStore,
        texture: Rid,
    ) -> Result<Option<TextureId>> {
        let Some(tex) = textures.get(texture) else {
            return Ok(None);
        };
        let version = tex.changes.version();
        if let Some(m) = self.mirrors.get(&texture)
            && m.version == version
        {
            return Ok(Some(m.id));
        }
        let Some(image) = textures.get_2d(texture) else {
            return Ok(None);
        };
        if image.width() == 0 || image.height() == 0 {
            return Ok(None);
        }
        let size = image.size();
        let rgba = image.convert(ImageFormat::Rgba8);
        let bytes = &rgba.data()[..(size.x * size.y * 4) as usize];
        let id = match self.mirrors.get(&texture) {
            Some(m) if m.size == size => {
                device.texture_update(m.id, bytes)?;
                m.id
            }
            stale => {
                if let Some(m) = stale {
                    device.texture_free(m.id);
                }
                device.texture_create(&TextureDesc::sampled(size), Some(bytes))?
            }
        };
        trace!("uploaded texture {texture:?} ({}x{})", size.x, size.y);
        self.mirrors.insert(texture, Mirror { id, version, size });
        Ok(Some(id))
    }

    pub fn free_texture(&mut self, device: &mut dyn RenderingDevice, texture: Rid) {
        if let Some(m) = self.mirrors.remove(&texture) {
            device.texture_free(m.id);
        }
    }

    /// Backbuffer of a screen, resized to `size`.
    pub fn screen(&mut self, device: &mut dyn RenderingDevice, screen: i32, size: UVec2) -> Result<TextureId> {
        match self.screens.get(&screen) {
            Some((s, id)) if *s == size => Ok(*id),
            stale => {
                if let Some((_, id)) = stale {
                    device.texture_free(*id);
                }
                let id = device.texture_create(&TextureDesc::render_target(size, TargetFormat::Rgba8, 1), None)?;
                self.screens.insert(screen, (size, id));
                Ok(id)
            }
        }
    }
}

fn depth_desc(size: u32) -> TextureDesc {
    TextureDesc {
        size: UVec2::splat(size.max(1)),
        format: TargetFormat::Rgba8,
        usage: TextureUsage::RENDER_TARGET | TextureUsage::SAMPLED,
        samples: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HeadlessDevice;
    use vesper_core::{Color, RidAllocator, RidKind};
    use vesper_resources::Image;

    #[test]
    fn viewport_targets_follow_size() {
        let alloc = RidAllocator::new();
        let vp = alloc.alloc(RidKind::Viewport);
        let mut dev = HeadlessDevice::new();
        let mut cache = TargetCache::default();
        let a = cache.viewport(&mut dev, vp, UVec2::new(8, 8), TargetFormat::Rgba8, 1).unwrap().color;
        let b = cache.viewport(&mut dev, vp, UVec2::new(8, 8), TargetFormat::Rgba8, 1).unwrap().color;
        assert_eq!(a, b);
        let c = cache.viewport(&mut dev, vp, UVec2::new(16, 8), TargetFormat::Rgba8, 1).unwrap().color;
        assert_ne!(a, c);
        assert_eq!(dev.texture_count(), 1);

        assert_eq!(cache.internal(&mut dev, vp, UVec2::new(16, 8)).unwrap(), c);
        let scaled = cache.internal(&mut dev, vp, UVec2::new(8, 4)).unwrap();
        assert_ne!(scaled, c);
        cache.free_viewport(&mut dev, vp);
        assert_eq!(dev.texture_count(), 0);
    }

    #[test]
    fn mirrors_reupload_on_change() {
        let alloc = RidAllocator::new();
        let tex = alloc.alloc(RidKind::Texture);
        let mut store = TextureStore::new();
        store
            .initialize_2d(tex, Image::filled(2, 2, ImageFormat::Rgba8, Color::RED))
            .unwrap();
        let mut dev = HeadlessDevice::new();
        let mut cache = TargetCache::default();
        let id = cache.mirror(&mut dev, &store, tex).unwrap().unwrap();
        assert_eq!(&dev.texture_read(id).unwrap()[..4], &[255, 0, 0, 255]);

        store
            .update_2d(tex, Image::filled(2, 2, ImageFormat::Rgba8, Color::BLUE), 0)
            .unwrap();
        let id2 = cache.mirror(&mut dev, &store, tex).unwrap().unwrap();
        assert_eq!(id, id2);
        assert_eq!(&dev.texture_read(id2).unwrap()[..4], &[0, 0, 255, 255]);

        cache.free_texture(&mut dev, tex);
        assert_eq!(dev.texture_count(), 0);
    }
}
