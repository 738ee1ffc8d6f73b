//! Server Settings & Global Render Configuration
//!
//! Two layers of configuration exist:
//!
//! - [`ServerSettings`]: immutable start-up options (threading model, queue
//!   capacity, adapter identity). Serializable so hosts can keep them in a
//!   JSON project file.
//! - [`GlobalRenderConfig`]: process-wide knobs that can change at any time
//!   from any thread (`render_loop_enabled`, shadow filter quality, SDFGI
//!   schedules, ...). Every field is an atomic so reads on the render thread
//!   never contend with writes from callers.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use vesper_core::settings::{ServerSettings, ThreadModel};
//!
//! let settings = ServerSettings {
//!     thread_model: ThreadModel::SeparateRenderThread,
//!     ..Default::default()
//! };
//! ```

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

use crate::errors::{Result, ServerError};
use crate::math::Color;
use crate::quality::{
    DofBlurQuality, DofBokehShape, OcclusionCullingBuildQuality, SdfgiFramesToConverge,
    SdfgiFramesToUpdateLight, SdfgiRayCount, ShadowQuality, SsaoQuality, SsilQuality,
    SsrRoughnessQuality, SubSurfaceScatteringQuality, TextureAtlasFilter, VoxelGiQuality,
};

// ---------------------------------------------------------------------------
// ServerSettings
// ---------------------------------------------------------------------------

/// How work reaches the render thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ThreadModel {
    /// Every call executes immediately on the calling thread, which is also
    /// the render thread.
    #[default]
    SingleThreaded,
    /// A dedicated OS thread owns all server state; mutations travel through
    /// a bounded queue.
    SeparateRenderThread,
}

/// Identity reported by the headless device.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AdapterIdentity {
    pub name: String,
    pub vendor: String,
    pub api_version: String,
}

/// Start-up options of a rendering server instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub thread_model: ThreadModel,
    /// Capacity of the submission queue. Producers block when it is full.
    pub command_queue_capacity: usize,
    /// Clear color used by viewports without a transparent background.
    pub default_clear_color: Color,
    /// Positional shadow atlas size given to new viewports.
    pub default_shadow_atlas_size: u32,
    /// Directional shadow map size.
    pub directional_shadow_size: u32,
    pub positional_shadow_quality: ShadowQuality,
    pub directional_shadow_quality: ShadowQuality,
    pub occlusion_culling_build_quality: OcclusionCullingBuildQuality,
    pub occlusion_rays_per_thread: u32,
    pub adapter: AdapterIdentity,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            thread_model: ThreadModel::SingleThreaded,
            command_queue_capacity: 4096,
            default_clear_color: Color::rgb(0.3, 0.3, 0.3),
            default_shadow_atlas_size: 2048,
            directional_shadow_size: 4096,
            positional_shadow_quality: ShadowQuality::SoftLow,
            directional_shadow_quality: ShadowQuality::SoftLow,
            occlusion_culling_build_quality: OcclusionCullingBuildQuality::Medium,
            occlusion_rays_per_thread: 512,
            adapter: AdapterIdentity::default(),
        }
    }
}

impl ServerSettings {
    /// Parses settings from JSON. Missing fields take their default value.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.command_queue_capacity == 0 {
            return Err(ServerError::Config(
                "command_queue_capacity must be at least 1".into(),
            ));
        }
        if !self.default_shadow_atlas_size.is_power_of_two() && self.default_shadow_atlas_size != 0 {
            return Err(ServerError::Config(format!(
                "default_shadow_atlas_size {} is not a power of two",
                self.default_shadow_atlas_size
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// GlobalRenderConfig
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct AtomicF32(AtomicU32);

impl AtomicF32 {
    fn new(v: f32) -> Self {
        Self(AtomicU32::new(v.to_bits()))
    }

    fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    fn store(&self, v: f32) {
        self.0.store(v.to_bits(), Ordering::Relaxed);
    }
}

macro_rules! enum_knob {
    ($field:ident, $setter:ident, $ty:ty) => {
        #[must_use]
        pub fn $field(&self) -> $ty {
            <$ty>::from_ordinal(self.$field.load(Ordering::Relaxed)).unwrap_or_default()
        }

        pub fn $setter(&self, value: $ty) {
            self.$field.store(value.ordinal(), Ordering::Relaxed);
        }
    };
}

macro_rules! bool_knob {
    ($field:ident, $setter:ident) => {
        #[must_use]
        pub fn $field(&self) -> bool {
            self.$field.load(Ordering::Relaxed)
        }

        pub fn $setter(&self, value: bool) {
            self.$field.store(value, Ordering::Relaxed);
        }
    };
}

macro_rules! f32_knob {
    ($field:ident, $setter:ident) => {
        #[must_use]
        pub fn $field(&self) -> f32 {
            self.$field.load()
        }

        pub fn $setter(&self, value: f32) {
            self.$field.store(value);
        }
    };
}

/// Process-wide render configuration with atomic read/write.
#[derive(Debug)]
pub struct GlobalRenderConfig {
    render_loop_enabled: AtomicBool,
    positional_shadow_quality: AtomicI32,
    directional_shadow_quality: AtomicI32,
    directional_shadow_size: AtomicU32,
    directional_shadow_16_bits: AtomicBool,
    ssr_roughness_quality: AtomicI32,
    ssao_quality: AtomicI32,
    ssao_half_size: AtomicBool,
    ssao_adaptive_target: AtomicF32,
    ssil_quality: AtomicI32,
    ssil_half_size: AtomicBool,
    sdfgi_ray_count: AtomicI32,
    sdfgi_frames_to_converge: AtomicI32,
    sdfgi_frames_to_update_light: AtomicI32,
    roughness_limiter_active: AtomicBool,
    roughness_limiter_amount: AtomicF32,
    roughness_limiter_limit: AtomicF32,
    sss_quality: AtomicI32,
    sss_scale: AtomicF32,
    sss_depth_scale: AtomicF32,
    decals_filter: AtomicI32,
    light_projectors_filter: AtomicI32,
    voxel_gi_quality: AtomicI32,
    occlusion_culling_build_quality: AtomicI32,
    occlusion_rays_per_thread: AtomicU32,
    dof_bokeh_shape: AtomicI32,
    dof_blur_quality: AtomicI32,
    dof_use_jitter: AtomicBool,
    debug_generate_wireframes: AtomicBool,
    default_clear_color: parking_lot::RwLock<Color>,
}

impl Default for GlobalRenderConfig {
    fn default() -> Self {
        Self::from_settings(&ServerSettings::default())
    }
}

impl GlobalRenderConfig {
    #[must_use]
    pub fn from_settings(settings: &ServerSettings) -> Self {
        Self {
            render_loop_enabled: AtomicBool::new(true),
            positional_shadow_quality: AtomicI32::new(settings.positional_shadow_quality.ordinal()),
            directional_shadow_quality: AtomicI32::new(settings.directional_shadow_quality.ordinal()),
            directional_shadow_size: AtomicU32::new(settings.directional_shadow_size),
            directional_shadow_16_bits: AtomicBool::new(true),
            ssr_roughness_quality: AtomicI32::new(SsrRoughnessQuality::Low.ordinal()),
            ssao_quality: AtomicI32::new(SsaoQuality::Medium.ordinal()),
            ssao_half_size: AtomicBool::new(true),
            ssao_adaptive_target: AtomicF32::new(0.5),
            ssil_quality: AtomicI32::new(SsilQuality::Medium.ordinal()),
            ssil_half_size: AtomicBool::new(true),
            sdfgi_ray_count: AtomicI32::new(SdfgiRayCount::Rays16.ordinal()),
            sdfgi_frames_to_converge: AtomicI32::new(SdfgiFramesToConverge::In20Frames.ordinal()),
            sdfgi_frames_to_update_light: AtomicI32::new(SdfgiFramesToUpdateLight::In2Frames.ordinal()),
            roughness_limiter_active: AtomicBool::new(true),
            roughness_limiter_amount: AtomicF32::new(0.25),
            roughness_limiter_limit: AtomicF32::new(0.18),
            sss_quality: AtomicI32::new(SubSurfaceScatteringQuality::Low.ordinal()),
            sss_scale: AtomicF32::new(0.05),
            sss_depth_scale: AtomicF32::new(0.01),
            decals_filter: AtomicI32::new(TextureAtlasFilter::LinearMipmaps.ordinal()),
            light_projectors_filter: AtomicI32::new(TextureAtlasFilter::LinearMipmaps.ordinal()),
            voxel_gi_quality: AtomicI32::new(VoxelGiQuality::Low.ordinal()),
            occlusion_culling_build_quality: AtomicI32::new(settings.occlusion_culling_build_quality.ordinal()),
            occlusion_rays_per_thread: AtomicU32::new(settings.occlusion_rays_per_thread),
            dof_bokeh_shape: AtomicI32::new(DofBokehShape::Hexagon.ordinal()),
            dof_blur_quality: AtomicI32::new(DofBlurQuality::Medium.ordinal()),
            dof_use_jitter: AtomicBool::new(false),
            debug_generate_wireframes: AtomicBool::new(false),
            default_clear_color: parking_lot::RwLock::new(settings.default_clear_color),
        }
    }

    bool_knob!(render_loop_enabled, set_render_loop_enabled);
    enum_knob!(positional_shadow_quality, set_positional_shadow_quality, ShadowQuality);
    enum_knob!(directional_shadow_quality, set_directional_shadow_quality, ShadowQuality);
    bool_knob!(directional_shadow_16_bits, set_directional_shadow_16_bits);
    enum_knob!(ssr_roughness_quality, set_ssr_roughness_quality, SsrRoughnessQuality);
    enum_knob!(ssao_quality, set_ssao_quality, SsaoQuality);
    bool_knob!(ssao_half_size, set_ssao_half_size);
    f32_knob!(ssao_adaptive_target, set_ssao_adaptive_target);
    enum_knob!(ssil_quality, set_ssil_quality, SsilQuality);
    bool_knob!(ssil_half_size, set_ssil_half_size);
    enum_knob!(sdfgi_ray_count, set_sdfgi_ray_count, SdfgiRayCount);
    enum_knob!(sdfgi_frames_to_converge, set_sdfgi_frames_to_converge, SdfgiFramesToConverge);
    enum_knob!(sdfgi_frames_to_update_light, set_sdfgi_frames_to_update_light, SdfgiFramesToUpdateLight);
    bool_knob!(roughness_limiter_active, set_roughness_limiter_active);
    f32_knob!(roughness_limiter_amount, set_roughness_limiter_amount);
    f32_knob!(roughness_limiter_limit, set_roughness_limiter_limit);
    enum_knob!(sss_quality, set_sss_quality, SubSurfaceScatteringQuality);
    f32_knob!(sss_scale, set_sss_scale);
    f32_knob!(sss_depth_scale, set_sss_depth_scale);
    enum_knob!(decals_filter, set_decals_filter, TextureAtlasFilter);
    enum_knob!(light_projectors_filter, set_light_projectors_filter, TextureAtlasFilter);
    enum_knob!(voxel_gi_quality, set_voxel_gi_quality, VoxelGiQuality);
    enum_knob!(occlusion_culling_build_quality, set_occlusion_culling_build_quality, OcclusionCullingBuildQuality);
    enum_knob!(dof_bokeh_shape, set_dof_bokeh_shape, DofBokehShape);
    enum_knob!(dof_blur_quality, set_dof_blur_quality, DofBlurQuality);
    bool_knob!(dof_use_jitter, set_dof_use_jitter);
    bool_knob!(debug_generate_wireframes, set_debug_generate_wireframes);

    #[must_use]
    pub fn directional_shadow_size(&self) -> u32 {
        self.directional_shadow_size.load(Ordering::Relaxed)
    }

    /// Rounds `size` up to the next power of two (minimum 256).
    pub fn set_directional_shadow_size(&self, size: u32) {
        let size = size.max(256).next_power_of_two();
        self.directional_shadow_size.store(size, Ordering::Relaxed);
    }

    #[must_use]
    pub fn occlusion_rays_per_thread(&self) -> u32 {
        self.occlusion_rays_per_thread.load(Ordering::Relaxed)
    }

    pub fn set_occlusion_rays_per_thread(&self, rays: u32) {
        self.occlusion_rays_per_thread.store(rays.max(1), Ordering::Relaxed);
    }

    #[must_use]
    pub fn default_clear_color(&self) -> Color {
        *self.default_clear_color.read()
    }

    pub fn set_default_clear_color(&self, color: Color) {
        *self.default_clear_color.write() = color;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_roundtrip_through_json() {
        let settings = ServerSettings {
            thread_model: ThreadModel::SeparateRenderThread,
            positional_shadow_quality: ShadowQuality::SoftUltra,
            ..Default::default()
        };
        let json = settings.to_json_string().unwrap();
        let back = ServerSettings::from_json_str(&json).unwrap();
        assert_eq!(back, settings);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let settings = ServerSettings::from_json_str(r#"{ "command_queue_capacity": 16 }"#).unwrap();
        assert_eq!(settings.command_queue_capacity, 16);
        assert_eq!(settings.thread_model, ThreadModel::SingleThreaded);
    }

    #[test]
    fn zero_queue_capacity_is_rejected() {
        assert!(ServerSettings::from_json_str(r#"{ "command_queue_capacity": 0 }"#).is_err());
    }

    #[test]
    fn knobs_store_and_load() {
        let config = GlobalRenderConfig::default();
        assert!(config.render_loop_enabled());
        config.set_render_loop_enabled(false);
        assert!(!config.render_loop_enabled());

        config.set_positional_shadow_quality(ShadowQuality::SoftHigh);
        assert_eq!(config.positional_shadow_quality(), ShadowQuality::SoftHigh);

        config.set_roughness_limiter_amount(0.75);
        assert_eq!(config.roughness_limiter_amount(), 0.75);

        config.set_directional_shadow_size(1000);
        assert_eq!(config.directional_shadow_size(), 1024);
    }
}
