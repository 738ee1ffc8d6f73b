//! Cameras, skies, compositors, environments, camera attributes and the
//! process-wide quality settings they are rendered with.

use glam::{Affine3A, Mat3, Vec2};
use log::{debug, error};
use vesper_core::quality::{
    DofBlurQuality, DofBokehShape, SdfgiFramesToConverge, SdfgiFramesToUpdateLight, SdfgiRayCount,
    ShadowQuality, SsaoQuality, SsilQuality, SsrRoughnessQuality, SubSurfaceScatteringQuality,
    TextureAtlasFilter, VoxelGiQuality,
};
use vesper_core::{Color, Result, Rid, RidKind, ServerError};
use vesper_resources::camera_attributes::{AutoExposureParams, DofBlurParams};
use vesper_resources::environment::{
    AdjustmentParams, AmbientParams, EnvironmentBg, FogParams, GlowParams, SdfgiParams, SsaoParams, SsilParams,
    SsrParams, TonemapParams, VolumetricFogParams,
};
use vesper_resources::{
    CompositorEffectCallback, CompositorEffectCallbackType, CompositorEffectFlags, Image, ImageFormat, SkyMode,
};

use super::RenderingServer;
use crate::state::ServerState;

/// Panorama height used when neither the caller nor a sky gives one.
const DEFAULT_PANORAMA_SIZE: u32 = 256;

fn bake_environment(s: &ServerState, environment: Rid, size: u32) -> Result<Image> {
    let res = &s.resources;
    let env = res
        .environments
        .get(environment)
        .ok_or(ServerError::InvalidRid(environment))?;
    let energy = env.bg_energy_multiplier;
    match env.background {
        EnvironmentBg::Sky if res.skies.owns(env.sky) => res.skies.bake_panorama(env.sky, &res.materials, energy, size),
        background => {
            let base = match background {
                EnvironmentBg::Color => env.bg_color,
                _ => Color::BLACK,
            };
            let height = if size == 0 { DEFAULT_PANORAMA_SIZE } else { size };
            let color = Color::rgba(base.r * energy, base.g * energy, base.b * energy, 1.0);
            Ok(Image::filled(height * 2, height, ImageFormat::Rgbaf, color))
        }
    }
}

impl RenderingServer {
    // ------------------------------------------------------------------
    // Cameras
    // ------------------------------------------------------------------

    pub fn camera_create(&self) -> Rid {
        self.create(RidKind::Camera, |s, rid| s.resources.cameras.initialize(rid))
    }

    forward! {
        /// `fov` is the vertical field of view in degrees, unless the
        /// camera keeps the horizontal axis.
        camera_set_perspective => resources.cameras::set_perspective(fov: f32, near: f32, far: f32)
    }

    forward!(camera_set_orthogonal => resources.cameras::set_orthogonal(size: f32, near: f32, far: f32));
    forward!(camera_set_frustum => resources.cameras::set_frustum(size: f32, offset: Vec2, near: f32, far: f32));
    forward!(camera_set_transform => resources.cameras::set_transform(transform: Affine3A));
    forward!(camera_set_cull_mask => resources.cameras::set_cull_mask(mask: u32));
    forward!(camera_set_use_vertical_aspect => resources.cameras::set_use_vertical_aspect(enable: bool));

    pub fn camera_set_environment(&self, camera: Rid, environment: Rid) {
        if self.accepts("camera_set_environment", environment, RidKind::Environment) {
            self.apply("camera_set_environment", |s| s.resources.cameras.set_environment(camera, environment));
        }
    }

    pub fn camera_set_camera_attributes(&self, camera: Rid, attributes: Rid) {
        if self.accepts("camera_set_camera_attributes", attributes, RidKind::CameraAttributes) {
            self.apply("camera_set_camera_attributes", |s| s.resources.cameras.set_attributes(camera, attributes));
        }
    }

    pub fn camera_set_compositor(&self, camera: Rid, compositor: Rid) {
        if self.accepts("camera_set_compositor", compositor, RidKind::Compositor) {
            self.apply("camera_set_compositor", |s| s.resources.cameras.set_compositor(camera, compositor));
        }
    }

    // ------------------------------------------------------------------
    // Skies
    // ------------------------------------------------------------------

    pub fn sky_create(&self) -> Rid {
        self.create(RidKind::Sky, |s, rid| s.resources.skies.initialize(rid))
    }

    forward! {
        /// Radiance cubemap face size; a power of two of at least 16.
        sky_set_radiance_size => resources.skies::set_radiance_size(size: u32)
    }

    forward!(sky_set_mode => resources.skies::set_mode(mode: SkyMode));

    pub fn sky_set_material(&self, sky: Rid, material: Rid) {
        if self.accepts("sky_set_material", material, RidKind::Material) {
            self.apply("sky_set_material", |s| s.resources.skies.set_material(sky, material));
        }
    }

    /// Equirectangular HDR image of the sky, `2·size × size`. `None` on an
    /// invalid handle.
    #[must_use]
    pub fn sky_bake_panorama(&self, sky: Rid, energy: f32, size: u32) -> Option<Image> {
        self.scheduler.sync();
        self.with_state(|s| s.resources.skies.bake_panorama(sky, &s.resources.materials, energy, size))
            .map_err(|err| error!("sky_bake_panorama: {err}"))
            .ok()
    }

    // ------------------------------------------------------------------
    // Compositor effects and compositors
    // ------------------------------------------------------------------

    pub fn compositor_effect_create(&self) -> Rid {
        self.create(RidKind::CompositorEffect, |s, rid| s.resources.compositor_effects.initialize(rid))
    }

    forward!(compositor_effect_set_enabled => resources.compositor_effects::set_enabled(enabled: bool));

    forward! {
        /// Binds the callback run at `callback_type` for every viewport using
        /// this effect. It runs on the render thread while the frame is drawn
        /// and must not call back into the server.
        compositor_effect_set_callback => resources.compositor_effects::set_callback(
            callback_type: CompositorEffectCallbackType,
            callback: Option<CompositorEffectCallback>,
        )
    }

    forward!(compositor_effect_set_flag => resources.compositor_effects::set_flag(flag: CompositorEffectFlags, set: bool));

    pub fn compositor_create(&self) -> Rid {
        self.create(RidKind::Compositor, |s, rid| s.resources.compositors.initialize(rid))
    }

    /// Replaces the ordered effect list. Every entry must be a live effect.
    pub fn compositor_set_compositor_effects(&self, compositor: Rid, effects: Vec<Rid>) {
        self.apply("compositor_set_compositor_effects", |s| {
            let res = &mut s.resources;
            res.compositors
                .set_compositor_effects(compositor, effects, &res.compositor_effects)
        });
    }

    // ------------------------------------------------------------------
    // Environments
    // ------------------------------------------------------------------

    pub fn environment_create(&self) -> Rid {
        self.create(RidKind::Environment, |s, rid| s.resources.environments.initialize(rid))
    }

    forward!(environment_set_background => resources.environments::set_background(bg: EnvironmentBg));
    forward!(environment_set_sky_custom_fov => resources.environments::set_sky_custom_fov(scale: f32));
    forward!(environment_set_sky_orientation => resources.environments::set_sky_orientation(orientation: Mat3));
    forward!(environment_set_bg_color => resources.environments::set_bg_color(color: Color));
    forward!(environment_set_bg_energy => resources.environments::set_bg_energy(multiplier: f32, exposure_value: f32));
    forward!(environment_set_canvas_max_layer => resources.environments::set_canvas_max_layer(max_layer: i32));
    forward!(environment_set_camera_feed_id => resources.environments::set_camera_feed_id(id: i32));
    forward!(environment_set_ambient_light => resources.environments::set_ambient(ambient: AmbientParams));
    forward!(environment_set_glow => resources.environments::set_glow(glow: GlowParams));
    forward!(environment_set_tonemap => resources.environments::set_tonemap(tonemap: TonemapParams));
    forward!(environment_set_adjustment => resources.environments::set_adjustment(adjustment: AdjustmentParams));
    forward!(environment_set_ssr => resources.environments::set_ssr(ssr: SsrParams));
    forward!(environment_set_ssao => resources.environments::set_ssao(ssao: SsaoParams));
    forward!(environment_set_ssil => resources.environments::set_ssil(ssil: SsilParams));
    forward!(environment_set_fog => resources.environments::set_fog(fog: FogParams));
    forward!(environment_set_volumetric_fog => resources.environments::set_volumetric_fog(fog: VolumetricFogParams));

    forward! {
        /// Between 1 and 8 cascades.
        environment_set_sdfgi => resources.environments::set_sdfgi(sdfgi: SdfgiParams)
    }

    /// Binding something other than a sky is refused and leaves the
    /// environment unchanged.
    pub fn environment_set_sky(&self, environment: Rid, sky: Rid) {
        if self.accepts("environment_set_sky", sky, RidKind::Sky) {
            self.apply("environment_set_sky", |s| s.resources.environments.set_sky(environment, sky));
        }
    }

    #[must_use]
    pub fn environment_get_background(&self, environment: Rid) -> EnvironmentBg {
        self.with_state(|s| s.resources.environments.get(environment).map(|e| e.background).unwrap_or_default())
    }

    /// Panorama of what the environment shows behind the scene: its sky,
    /// its background color, or black.
    #[must_use]
    pub fn environment_bake_panorama(&self, environment: Rid, size: u32) -> Option<Image> {
        self.scheduler.sync();
        self.with_state(|s| bake_environment(s, environment, size))
            .map_err(|err| error!("environment_bake_panorama: {err}"))
            .ok()
    }

    // Process-wide environment quality.

    pub fn environment_set_ssr_roughness_quality(&self, quality: SsrRoughnessQuality) {
        self.inner.config.set_ssr_roughness_quality(quality);
    }

    pub fn environment_set_ssao_quality(&self, quality: SsaoQuality, half_size: bool, adaptive_target: f32) {
        let config = &self.inner.config;
        config.set_ssao_quality(quality);
        config.set_ssao_half_size(half_size);
        config.set_ssao_adaptive_target(adaptive_target.clamp(0.0, 1.0));
    }

    pub fn environment_set_ssil_quality(&self, quality: SsilQuality, half_size: bool) {
        self.inner.config.set_ssil_quality(quality);
        self.inner.config.set_ssil_half_size(half_size);
    }

    pub fn environment_set_sdfgi_ray_count(&self, rays: SdfgiRayCount) {
        self.inner.config.set_sdfgi_ray_count(rays);
    }

    pub fn environment_set_sdfgi_frames_to_converge(&self, frames: SdfgiFramesToConverge) {
        self.inner.config.set_sdfgi_frames_to_converge(frames);
    }

    pub fn environment_set_sdfgi_frames_to_update_light(&self, frames: SdfgiFramesToUpdateLight) {
        self.inner.config.set_sdfgi_frames_to_update_light(frames);
    }

    pub fn screen_space_roughness_limiter_set_active(&self, active: bool, amount: f32, limit: f32) {
        let config = &self.inner.config;
        config.set_roughness_limiter_active(active);
        config.set_roughness_limiter_amount(amount);
        config.set_roughness_limiter_limit(limit);
    }

    pub fn sub_surface_scattering_set_quality(&self, quality: SubSurfaceScatteringQuality) {
        self.inner.config.set_sss_quality(quality);
    }

    pub fn sub_surface_scattering_set_scale(&self, scale: f32, depth_scale: f32) {
        self.inner.config.set_sss_scale(scale);
        self.inner.config.set_sss_depth_scale(depth_scale);
    }

    pub fn decals_set_filter(&self, filter: TextureAtlasFilter) {
        self.inner.config.set_decals_filter(filter);
    }

    pub fn light_projectors_set_filter(&self, filter: TextureAtlasFilter) {
        self.inner.config.set_light_projectors_filter(filter);
    }

    pub fn voxel_gi_set_quality(&self, quality: VoxelGiQuality) {
        self.inner.config.set_voxel_gi_quality(quality);
    }

    pub fn positional_soft_shadow_filter_set_quality(&self, quality: ShadowQuality) {
        debug!("positional shadow quality -> {quality:?}");
        self.inner.config.set_positional_shadow_quality(quality);
    }

    pub fn directional_soft_shadow_filter_set_quality(&self, quality: ShadowQuality) {
        debug!("directional shadow quality -> {quality:?}");
        self.inner.config.set_directional_shadow_quality(quality);
    }

    /// Size is rounded up to a power of two of at least 256.
    pub fn directional_shadow_atlas_set_size(&self, size: u32, is_16bits: bool) {
        self.inner.config.set_directional_shadow_size(size);
        self.inner.config.set_directional_shadow_16_bits(is_16bits);
    }

    // ------------------------------------------------------------------
    // Camera attributes
    // ------------------------------------------------------------------

    pub fn camera_attributes_create(&self) -> Rid {
        self.create(RidKind::CameraAttributes, |s, rid| s.resources.camera_attributes.initialize(rid))
    }

    forward!(camera_attributes_set_dof_blur => resources.camera_attributes::set_dof_blur(dof: DofBlurParams));
    forward!(camera_attributes_set_exposure => resources.camera_attributes::set_exposure(multiplier: f32, normalization: f32));
    forward!(camera_attributes_set_auto_exposure => resources.camera_attributes::set_auto_exposure(auto_exposure: AutoExposureParams));

    pub fn camera_attributes_set_dof_blur_quality(&self, quality: DofBlurQuality, use_jitter: bool) {
        self.inner.config.set_dof_blur_quality(quality);
        self.inner.config.set_dof_use_jitter(use_jitter);
    }

    pub fn camera_attributes_set_dof_blur_bokeh_shape(&self, shape: DofBokehShape) {
        self.inner.config.set_dof_bokeh_shape(shape);
    }
}
