//! Low-level rendering device
//!
//! The server never talks to a graphics API directly. Everything it needs
//! from the GPU goes through the object-safe [`RenderingDevice`] trait:
//! texture and buffer storage, render targets, draw submission and timing.
//!
//! Two layers of identifiers exist on purpose:
//!
//! - [`Rid`](vesper_core::Rid)s are the caller-facing handles owned by the
//!   server's registry.
//! - [`TextureId`] / [`BufferId`] are slotmap keys private to a device. The
//!   render crate keeps the mapping between the two.
//!
//! [`HeadlessDevice`] keeps everything in memory and rasterizes 2D batches on
//! the CPU, which is what the test-suite and tooling run against.

mod headless;
pub mod raster;

use bitflags::bitflags;
use glam::{Mat4, UVec2};
use rustc_hash::FxHashSet;
use vesper_core::math::Rect2;
use vesper_core::{ordinal_enum, Color, Result};
use vesper_scene::{BatchShading, CanvasVertex};

pub use headless::HeadlessDevice;

slotmap::new_key_type! {
    /// Device-side texture (sampled image or render target).
    pub struct TextureId;
    /// Device-side buffer.
    pub struct BufferId;
}

ordinal_enum! {
    #[derive(Default)]
    pub enum DeviceType {
        #[default]
        Other = 0,
        IntegratedGpu = 1,
        DiscreteGpu = 2,
        VirtualGpu = 3,
        Cpu = 4,
    }
}

/// Adapter identity reported through `get_video_adapter_*`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdapterInfo {
    pub name: String,
    pub vendor: String,
    pub device_type: DeviceType,
    pub api_version: String,
}

/// What the device can do, queried by `has_os_feature` and by the viewport
/// pipeline before enabling optional stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCapabilities {
    /// Feature tags such as `"s3tc"` or `"etc2"`.
    pub os_features: FxHashSet<String>,
    pub max_texture_size: u32,
    pub max_msaa_samples: u32,
    pub supports_vrs: bool,
    pub supports_hdr_targets: bool,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            os_features: FxHashSet::default(),
            max_texture_size: 16384,
            max_msaa_samples: 8,
            supports_vrs: false,
            supports_hdr_targets: true,
        }
    }
}

impl DeviceCapabilities {
    #[must_use]
    pub fn has_os_feature(&self, feature: &str) -> bool {
        self.os_features.contains(feature)
    }
}

/// Storage format of device textures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub enum TargetFormat {
    #[default]
    Rgba8,
    /// Half-float RGBA, used for HDR 2D and 3D buffers.
    Rgba16F,
}

impl TargetFormat {
    #[must_use]
    pub const fn pixel_size(self) -> usize {
        match self {
            Self::Rgba8 => 4,
            Self::Rgba16F => 8,
        }
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TextureUsage: u32 {
        const SAMPLED       = 1 << 0;
        const RENDER_TARGET = 1 << 1;
        const COPY_SRC      = 1 << 2;
        const COPY_DST      = 1 << 3;
        /// Shading-rate image consumed by VRS.
        const SHADING_RATE  = 1 << 4;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        const VERTEX  = 1 << 0;
        const INDEX   = 1 << 1;
        const UNIFORM = 1 << 2;
        const STORAGE = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDesc {
    pub size: UVec2,
    pub format: TargetFormat,
    pub usage: TextureUsage,
    /// MSAA sample count; 1 for single-sampled.
    pub samples: u32,
}

impl TextureDesc {
    #[must_use]
    pub fn sampled(size: UVec2) -> Self {
        Self {
            size,
            format: TargetFormat::Rgba8,
            usage: TextureUsage::SAMPLED | TextureUsage::COPY_DST,
            samples: 1,
        }
    }

    #[must_use]
    pub fn render_target(size: UVec2, format: TargetFormat, samples: u32) -> Self {
        Self {
            size,
            format,
            usage: TextureUsage::RENDER_TARGET | TextureUsage::SAMPLED | TextureUsage::COPY_SRC,
            samples: samples.max(1),
        }
    }

    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.size.x as usize * self.size.y as usize * self.format.pixel_size()
    }
}

// ============================================================================
// Submission types
// ============================================================================

ordinal_enum! {
    /// Stage of the 3D pipeline a draw list belongs to.
    pub enum PassKind {
        Shadow = 0,
        Opaque = 1,
        Sky = 2,
        Transparent = 3,
    }
}

/// One 3D draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawCall {
    pub transform: Mat4,
    pub primitive_count: u32,
    pub instance_count: u32,
    /// Color used by backends without a material system.
    pub color: Color,
    pub sort_key: u64,
}

/// Ordered draws for one pass into one target.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawList {
    pub pass: PassKind,
    pub view_proj: Mat4,
    /// Pixel rectangle of the target written by this list (shadow atlas slots).
    pub viewport: Option<Rect2>,
    pub draws: Vec<DrawCall>,
}

impl DrawList {
    #[must_use]
    pub fn new(pass: PassKind, view_proj: Mat4) -> Self {
        Self {
            pass,
            view_proj,
            viewport: None,
            draws: Vec::new(),
        }
    }

    /// Sorts by key: front to back for opaque, back to front for transparent
    /// (the caller encodes depth accordingly).
    pub fn sort(&mut self) {
        self.draws.sort_by_key(|d| d.sort_key);
    }
}

/// Texture sampling used by a 2D draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SamplerState {
    pub nearest: bool,
    pub repeat: bool,
    pub mirror: bool,
}

/// A tessellated canvas batch in target pixel space.
#[derive(Debug, Clone, PartialEq)]
pub struct CanvasDraw {
    /// `None` samples opaque white.
    pub texture: Option<TextureId>,
    pub sampler: SamplerState,
    pub shading: BatchShading,
    pub clip: Option<Rect2>,
    pub vertices: Vec<CanvasVertex>,
    pub indices: Vec<u32>,
}

/// Statistics of one submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    pub objects: u64,
    pub draw_calls: u64,
    pub primitives: u64,
}

impl std::ops::AddAssign for PassStats {
    fn add_assign(&mut self, rhs: Self) {
        self.objects += rhs.objects;
        self.draw_calls += rhs.draw_calls;
        self.primitives += rhs.primitives;
    }
}

/// Full-screen filters run by the post chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenFilter {
    Fxaa,
    Debanding,
    /// Blends the target with its previous contents.
    Taa,
}

// ============================================================================
// RenderingDevice
// ============================================================================

/// The GPU seam. Every method may be called only from the render thread.
pub trait RenderingDevice: Send {
    fn adapter_info(&self) -> &AdapterInfo;
    fn capabilities(&self) -> &DeviceCapabilities;

    // --- textures ---
    fn texture_create(&mut self, desc: &TextureDesc, data: Option<&[u8]>) -> Result<TextureId>;
    /// Replaces the full contents; `data` must match the descriptor's size.
    fn texture_update(&mut self, id: TextureId, data: &[u8]) -> Result<()>;
    fn texture_read(&self, id: TextureId) -> Result<Vec<u8>>;
    fn texture_free(&mut self, id: TextureId);
    fn texture_desc(&self, id: TextureId) -> Option<TextureDesc>;

    // --- buffers ---
    fn buffer_create(&mut self, size: usize, usage: BufferUsage, data: Option<&[u8]>) -> Result<BufferId>;
    fn buffer_update(&mut self, id: BufferId, offset: usize, data: &[u8]) -> Result<()>;
    fn buffer_read(&self, id: BufferId) -> Result<Vec<u8>>;
    fn buffer_free(&mut self, id: BufferId);

    // --- drawing ---
    fn clear(&mut self, target: TextureId, color: Color, rect: Option<Rect2>) -> Result<()>;
    fn submit_draw_list(&mut self, target: TextureId, list: &DrawList) -> Result<PassStats>;
    fn submit_canvas(&mut self, target: TextureId, draws: &[CanvasDraw]) -> Result<PassStats>;
    /// Copies `src` into `dst_rect` of `dst`, scaling with nearest sampling.
    fn blit(&mut self, src: TextureId, dst: TextureId, dst_rect: Rect2) -> Result<()>;
    /// Copies the pixels of `rect` from `src` into the same place in `dst`.
    fn copy_rect(&mut self, src: TextureId, dst: TextureId, rect: Rect2) -> Result<()>;
    fn apply_color_transform(&mut self, target: TextureId, transform: &dyn Fn(Color) -> Color) -> Result<()>;
    fn apply_filter(&mut self, target: TextureId, filter: ScreenFilter) -> Result<()>;

    // --- queries ---
    /// Monotonic GPU clock in nanoseconds.
    fn timestamp(&self) -> u64;
    fn memory_usage(&self) -> usize;
    /// Whether the device is backed by a real graphics API that callers may
    /// drive directly.
    fn is_native(&self) -> bool {
        false
    }
}

/// Reads a texture and converts it to 8-bit RGBA regardless of its format.
pub fn read_rgba8(device: &dyn RenderingDevice, id: TextureId) -> Result<Vec<u8>> {
    let desc = device
        .texture_desc(id)
        .ok_or_else(|| vesper_core::ServerError::Device(format!("unknown texture {id:?}")))?;
    let bytes = device.texture_read(id)?;
    Ok(match desc.format {
        TargetFormat::Rgba8 => bytes,
        TargetFormat::Rgba16F => bytes
            .chunks_exact(8)
            .flat_map(|px| {
                let c = raster::decode_pixel(TargetFormat::Rgba16F, px);
                c.to_rgba8()
            })
            .collect(),
    })
}
