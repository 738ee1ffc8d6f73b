//! In-memory device without a GPU.
//!
//! Textures and buffers live in slotmaps; 3D draw lists are counted but not
//! shaded, while canvas batches are rasterized so 2D output can be read back.

use std::time::Instant;

use glam::{UVec2, Vec2};
use log::{debug, trace};
use rustc_hash::FxHashMap;
use slotmap::SlotMap;
use vesper_core::math::Rect2;
use vesper_core::settings::AdapterIdentity;
use vesper_core::{Color, Result, ServerError};

use super::raster::{self, Surface, TextureView};
use super::{
    AdapterInfo, BufferId, BufferUsage, CanvasDraw, DeviceCapabilities, DeviceType, DrawList, PassStats,
    RenderingDevice, ScreenFilter, TextureDesc, TextureId,
};

struct DeviceTexture {
    desc: TextureDesc,
    data: Vec<u8>,
    /// Resolved colors of the previous TAA frame.
    history: Option<Vec<Color>>,
}

impl DeviceTexture {
    fn surface(&mut self) -> Surface<'_> {
        Surface {
            size: self.desc.size,
            format: self.desc.format,
            data: &mut self.data,
        }
    }
}

struct DeviceBuffer {
    usage: BufferUsage,
    data: Vec<u8>,
}

pub struct HeadlessDevice {
    info: AdapterInfo,
    caps: DeviceCapabilities,
    textures: SlotMap<TextureId, DeviceTexture>,
    buffers: SlotMap<BufferId, DeviceBuffer>,
    epoch: Instant,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDevice {
    /// A device reporting `DeviceType::Other` and empty identity strings.
    #[must_use]
    pub fn new() -> Self {
        Self::with_identity(&AdapterIdentity::default())
    }

    #[must_use]
    pub fn with_identity(identity: &AdapterIdentity) -> Self {
        Self {
            info: AdapterInfo {
                name: identity.name.clone(),
                vendor: identity.vendor.clone(),
                device_type: DeviceType::Other,
                api_version: identity.api_version.clone(),
            },
            caps: DeviceCapabilities::default(),
            textures: SlotMap::with_key(),
            buffers: SlotMap::with_key(),
            epoch: Instant::now(),
        }
    }

    #[must_use]
    pub fn with_capabilities(mut self, caps: DeviceCapabilities) -> Self {
        self.caps = caps;
        self
    }

    #[must_use]
    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    #[must_use]
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    fn texture_mut(&mut self, id: TextureId) -> Result<&mut DeviceTexture> {
        self.textures
            .get_mut(id)
            .ok_or_else(|| ServerError::Device(format!("unknown texture {id:?}")))
    }

    fn buffer_mut(&mut self, id: BufferId) -> Result<&mut DeviceBuffer> {
        self.buffers
            .get_mut(id)
            .ok_or_else(|| ServerError::Device(format!("unknown buffer {id:?}")))
    }
}

impl RenderingDevice for HeadlessDevice {
    fn adapter_info(&self) -> &AdapterInfo {
        &self.info
    }

    fn capabilities(&self) -> &DeviceCapabilities {
        &self.caps
    }

    fn texture_create(&mut self, desc: &TextureDesc, data: Option<&[u8]>) -> Result<TextureId> {
        let max = self.caps.max_texture_size;
        if desc.size.x == 0 || desc.size.y == 0 || desc.size.x > max || desc.size.y > max {
            return Err(ServerError::Device(format!(
                "texture size {}x{} outside 1..={max}",
                desc.size.x, desc.size.y
            )));
        }
        let expected = desc.byte_size();
        let data = match data {
            Some(bytes) if bytes.len() != expected => {
                return Err(ServerError::SizeMismatch {
                    what: "texture data",
                    expected,
                    actual: bytes.len(),
                });
            }
            Some(bytes) => bytes.to_vec(),
            None => vec![0; expected],
        };
        let id = self.textures.insert(DeviceTexture {
            desc: *desc,
            data,
            history: None,
        });
        trace!("device texture {id:?} created ({}x{} {:?})", desc.size.x, desc.size.y, desc.format);
        Ok(id)
    }

    fn texture_update(&mut self, id: TextureId, data: &[u8]) -> Result<()> {
        let tex = self.texture_mut(id)?;
        if data.len() != tex.data.len() {
            return Err(ServerError::SizeMismatch {
                what: "texture data",
                expected: tex.data.len(),
                actual: data.len(),
            });
        }
        tex.data.copy_from_slice(data);
        Ok(())
    }

    fn texture_read(&self, id: TextureId) -> Result<Vec<u8>> {
        self.textures
            .get(id)
            .map(|t| t.data.clone())
            .ok_or_else(|| ServerError::Device(format!("unknown texture {id:?}")))
    }

    fn texture_free(&mut self, id: TextureId) {
        if self.textures.remove(id).is_some() {
            trace!("device texture {id:?} freed");
        }
    }

    fn texture_desc(&self, id: TextureId) -> Option<TextureDesc> {
        self.textures.get(id).map(|t| t.desc)
    }

    fn buffer_create(&mut self, size: usize, usage: BufferUsage, data: Option<&[u8]>) -> Result<BufferId> {
        let data = match data {
            Some(bytes) if bytes.len() != size => {
                return Err(ServerError::SizeMismatch {
                    what: "buffer data",
                    expected: size,
                    actual: bytes.len(),
                });
            }
            Some(bytes) => bytes.to_vec(),
            None => vec![0; size],
        };
        Ok(self.buffers.insert(DeviceBuffer { usage, data }))
    }

    fn buffer_update(&mut self, id: BufferId, offset: usize, data: &[u8]) -> Result<()> {
        let buf = self.buffer_mut(id)?;
        let end = offset.checked_add(data.len()).unwrap_or(usize::MAX);
        if end > buf.data.len() {
            return Err(ServerError::OutOfRange {
                what: "buffer write",
                index: end,
                limit: buf.data.len(),
            });
        }
        buf.data[offset..end].copy_from_slice(data);
        Ok(())
    }

    fn buffer_read(&self, id: BufferId) -> Result<Vec<u8>> {
        self.buffers
            .get(id)
            .map(|b| b.data.clone())
            .ok_or_else(|| ServerError::Device(format!("unknown buffer {id:?}")))
    }

    fn buffer_free(&mut self, id: BufferId) {
        if let Some(buf) = self.buffers.remove(id) {
            trace!("device buffer {id:?} freed ({:?})", buf.usage);
        }
    }

    fn clear(&mut self, target: TextureId, color: Color, rect: Option<Rect2>) -> Result<()> {
        let tex = self.texture_mut(target)?;
        tex.surface().fill(color, rect);
        Ok(())
    }

    fn submit_draw_list(&mut self, target: TextureId, list: &DrawList) -> Result<PassStats> {
        if !self.textures.contains_key(target) {
            return Err(ServerError::Device(format!("unknown render target {target:?}")));
        }
        let mut stats = PassStats::default();
        for draw in &list.draws {
            stats.objects += 1;
            stats.draw_calls += 1;
            stats.primitives += u64::from(draw.primitive_count) * u64::from(draw.instance_count.max(1));
        }
        trace!("{:?} pass: {} draw(s), {} primitive(s)", list.pass, stats.draw_calls, stats.primitives);
        Ok(stats)
    }

    fn submit_canvas(&mut self, target: TextureId, draws: &[CanvasDraw]) -> Result<PassStats> {
        // Sampled textures are copied out first so a target may sample itself.
        let mut sources: FxHashMap<TextureId, (TextureDesc, Vec<u8>)> = FxHashMap::default();
        for id in draws.iter().filter_map(|d| d.texture) {
            if sources.contains_key(&id) {
                continue;
            }
            match self.textures.get(id) {
                Some(t) => {
                    sources.insert(id, (t.desc, t.data.clone()));
                }
                None => debug!("canvas draw samples unknown texture {id:?}, using white"),
            }
        }

        let tex = self.texture_mut(target)?;
        let mut surface = tex.surface();
        let mut stats = PassStats::default();
        for draw in draws {
            let view = draw.texture.and_then(|id| sources.get(&id)).map(|(desc, data)| TextureView {
                size: desc.size,
                format: desc.format,
                data,
            });
            raster::draw_batch(&mut surface, view, draw);
            stats.draw_calls += 1;
            stats.primitives += (draw.indices.len() / 3) as u64;
        }
        stats.objects = draws.len() as u64;
        Ok(stats)
    }

    fn blit(&mut self, src: TextureId, dst: TextureId, dst_rect: Rect2) -> Result<()> {
        let (src_desc, src_data) = {
            let s = self
                .textures
                .get(src)
                .ok_or_else(|| ServerError::Device(format!("unknown texture {src:?}")))?;
            (s.desc, s.data.clone())
        };
        let view = TextureView {
            size: src_desc.size,
            format: src_desc.format,
            data: &src_data,
        };
        let tex = self.texture_mut(dst)?;
        let mut surface = tex.surface();
        let size = surface.size;
        let r = dst_rect.intersection(&Rect2::new(Vec2::ZERO, size.as_vec2()));
        if !r.has_area() {
            return Ok(());
        }
        let x0 = r.position.x.max(0.0) as u32;
        let y0 = r.position.y.max(0.0) as u32;
        let x1 = (r.end().x.ceil() as u32).min(size.x);
        let y1 = (r.end().y.ceil() as u32).min(size.y);
        for y in y0..y1 {
            for x in x0..x1 {
                let local = (Vec2::new(x as f32 + 0.5, y as f32 + 0.5) - dst_rect.position) / dst_rect.size;
                let sx = ((local.x * src_desc.size.x as f32) as u32).min(src_desc.size.x - 1);
                let sy = ((local.y * src_desc.size.y as f32) as u32).min(src_desc.size.y - 1);
                surface.set(x, y, view.fetch(sx, sy));
            }
        }
        Ok(())
    }

    fn copy_rect(&mut self, src: TextureId, dst: TextureId, rect: Rect2) -> Result<()> {
        let (src_desc, src_data) = {
            let s = self
                .textures
                .get(src)
                .ok_or_else(|| ServerError::Device(format!("unknown texture {src:?}")))?;
            (s.desc, s.data.clone())
        };
        let view = TextureView {
            size: src_desc.size,
            format: src_desc.format,
            data: &src_data,
        };
        let tex = self.texture_mut(dst)?;
        if tex.desc.format != src_desc.format {
            return Err(ServerError::Device(format!("copy between {:?} and {:?}", src_desc.format, tex.desc.format)));
        }
        tex.surface().copy_from(&view, &rect);
        Ok(())
    }

    fn apply_color_transform(&mut self, target: TextureId, transform: &dyn Fn(Color) -> Color) -> Result<()> {
        let tex = self.texture_mut(target)?;
        let mut surface = tex.surface();
        let UVec2 { x: w, y: h } = surface.size;
        for y in 0..h {
            for x in 0..w {
                let c = surface.get(x, y);
                surface.set(x, y, transform(c));
            }
        }
        Ok(())
    }

    fn apply_filter(&mut self, target: TextureId, filter: ScreenFilter) -> Result<()> {
        let tex = self.texture_mut(target)?;
        match filter {
            ScreenFilter::Fxaa => raster::fxaa(&mut tex.surface()),
            ScreenFilter::Debanding => raster::deband(&mut tex.surface()),
            ScreenFilter::Taa => {
                let history = tex.history.take();
                let resolved = raster::taa_resolve(&mut tex.surface(), history.as_deref());
                tex.history = Some(resolved);
            }
        }
        Ok(())
    }

    fn timestamp(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    fn memory_usage(&self) -> usize {
        self.textures.values().map(|t| t.data.len()).sum::<usize>() + self.buffers.values().map(|b| b.data.len()).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{read_rgba8, DrawCall, PassKind, SamplerState, TargetFormat};
    use glam::Mat4;
    use vesper_scene::{BatchShading, CanvasVertex};

    #[test]
    fn reports_headless_identity() {
        let dev = HeadlessDevice::new();
        assert_eq!(dev.adapter_info().device_type, DeviceType::Other);
        assert!(dev.adapter_info().vendor.is_empty());
        assert!(!dev.is_native());
        assert!(!dev.capabilities().has_os_feature("s3tc"));
    }

    #[test]
    fn texture_data_must_match_size() {
        let mut dev = HeadlessDevice::new();
        let desc = TextureDesc::sampled(UVec2::new(2, 2));
        assert!(matches!(
            dev.texture_create(&desc, Some(&[0; 3])),
            Err(ServerError::SizeMismatch { expected: 16, actual: 3, .. })
        ));
        let id = dev.texture_create(&desc, Some(&[7; 16])).unwrap();
        assert_eq!(dev.texture_read(id).unwrap(), vec![7; 16]);
        dev.texture_free(id);
        assert!(dev.texture_read(id).is_err());
    }

    #[test]
    fn buffer_writes_are_bounds_checked() {
        let mut dev = HeadlessDevice::new();
        let id = dev.buffer_create(8, BufferUsage::VERTEX, None).unwrap();
        dev.buffer_update(id, 4, &[1, 2, 3, 4]).unwrap();
        assert!(dev.buffer_update(id, 6, &[1, 2, 3]).is_err());
        assert_eq!(dev.buffer_read(id).unwrap(), vec![0, 0, 0, 0, 1, 2, 3, 4]);
    }

    #[test]
    fn draw_lists_count_primitives() {
        let mut dev = HeadlessDevice::new();
        let rt = dev
            .texture_create(&TextureDesc::render_target(UVec2::new(4, 4), TargetFormat::Rgba8, 1), None)
            .unwrap();
        let mut list = DrawList::new(PassKind::Opaque, Mat4::IDENTITY);
        list.draws.push(DrawCall {
            transform: Mat4::IDENTITY,
            primitive_count: 12,
            instance_count: 3,
            color: Color::WHITE,
            sort_key: 0,
        });
        let stats = dev.submit_draw_list(rt, &list).unwrap();
        assert_eq!((stats.draw_calls, stats.primitives), (1, 36));
    }

    #[test]
    fn canvas_draw_samples_texture_and_blends() {
        let mut dev = HeadlessDevice::new();
        let rt = dev
            .texture_create(&TextureDesc::render_target(UVec2::new(4, 4), TargetFormat::Rgba16F, 1), None)
            .unwrap();
        dev.clear(rt, Color::BLACK, None).unwrap();
        let tex = dev
            .texture_create(&TextureDesc::sampled(UVec2::new(1, 1)), Some(&[0, 255, 0, 255]))
            .unwrap();
        let v = |x: f32, y: f32| CanvasVertex::new(Vec2::new(x, y), Vec2::new(x / 4.0, y / 4.0), Color::WHITE);
        let draw = CanvasDraw {
            texture: Some(tex),
            sampler: SamplerState::default(),
            shading: BatchShading::Flat,
            clip: None,
            vertices: vec![v(0.0, 0.0), v(4.0, 0.0), v(4.0, 4.0), v(0.0, 4.0)],
            indices: vec![0, 1, 2, 0, 2, 3],
        };
        let stats = dev.submit_canvas(rt, &[draw]).unwrap();
        assert_eq!(stats.primitives, 2);
        let px = read_rgba8(&dev, rt).unwrap();
        assert_eq!(&px[..4], &[0, 255, 0, 255]);
    }

    #[test]
    fn copy_rect_keeps_pixels_in_place() {
        let mut dev = HeadlessDevice::new();
        let desc = TextureDesc::render_target(UVec2::new(4, 4), TargetFormat::Rgba8, 1);
        let src = dev.texture_create(&desc, Some(&[255; 64])).unwrap();
        let dst = dev.texture_create(&desc, None).unwrap();
        dev.copy_rect(src, dst, Rect2::from_xywh(1.0, 1.0, 2.0, 2.0)).unwrap();
        let px = dev.texture_read(dst).unwrap();
        let at = |x: usize, y: usize| &px[(y * 4 + x) * 4..(y * 4 + x) * 4 + 4];
        assert_eq!(at(1, 1), &[255, 255, 255, 255]);
        assert_eq!(at(2, 2), &[255, 255, 255, 255]);
        assert_eq!(at(0, 0), &[0, 0, 0, 0]);
        assert_eq!(at(3, 2), &[0, 0, 0, 0]);
    }

    #[test]
    fn blit_scales_into_destination_rect() {
        let mut dev = HeadlessDevice::new();
        let src = dev
            .texture_create(&TextureDesc::sampled(UVec2::new(1, 1)), Some(&[255, 0, 0, 255]))
            .unwrap();
        let dst = dev
            .texture_create(&TextureDesc::render_target(UVec2::new(4, 4), TargetFormat::Rgba8, 1), None)
            .unwrap();
        dev.blit(src, dst, Rect2::from_xywh(2.0, 2.0, 2.0, 2.0)).unwrap();
        let px = dev.texture_read(dst).unwrap();
        let at = |x: usize, y: usize| &px[(y * 4 + x) * 4..(y * 4 + x) * 4 + 4];
        assert_eq!(at(3, 3), &[255, 0, 0, 255]);
        assert_eq!(at(0, 0), &[0, 0, 0, 0]);
    }
}
