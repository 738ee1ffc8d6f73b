//! `viewport_*`.

use glam::UVec2;
use vesper_core::math::{Rect2, Transform2D};
use vesper_core::{fail_invalid_rid, Rid, RidKind};
use vesper_resources::{CanvasItemTextureFilter, CanvasItemTextureRepeat, Image, ImageFormat};

use super::RenderingServer;
use crate::viewport::{
    RenderPass, Scaling3DMode, ShadowSlot, ViewportClearMode, ViewportDebugDraw, ViewportEnvironmentMode,
    ViewportMsaa, ViewportRenderInfo, ViewportRenderInfoType, ViewportScreenSpaceAa, ViewportSdfOversize,
    ViewportSdfScale, ViewportUpdateMode, ViewportVrsMode, ViewportVrsUpdateMode,
};

impl RenderingServer {
    /// Creates a viewport together with the texture its output lands in.
    /// The texture lives as long as the viewport.
    pub fn viewport_create(&self) -> Rid {
        let texture = self.inner.rids.alloc(RidKind::Texture);
        let atlas_size = self.inner.settings.default_shadow_atlas_size;
        self.create(RidKind::Viewport, |s, rid| {
            s.resources.textures.initialize_render_target(texture, rid, UVec2::ZERO);
            s.viewports.initialize(rid, texture, atlas_size);
        })
    }

    /// Resizes the viewport and its texture. Zero in either axis stops it
    /// from rendering.
    pub fn viewport_set_size(&self, viewport: Rid, width: i32, height: i32) {
        self.apply("viewport_set_size", |s| {
            s.viewports.set_size(viewport, width, height)?;
            let texture = s.viewports.get(viewport).map_or(Rid::INVALID, |vp| vp.texture);
            let image = Image::create_empty(width.max(1) as u32, height.max(1) as u32, false, ImageFormat::Rgba8);
            s.resources.textures.store_render_target(texture, image)
        });
    }

    #[must_use]
    pub fn viewport_get_texture(&self, viewport: Rid) -> Rid {
        self.with_state(|s| s.viewports.get(viewport).map_or(Rid::INVALID, |vp| vp.texture))
    }

    /// Renders `viewport` only while `parent` is visible in
    /// `WhenParentVisible` mode. Cycles are refused.
    pub fn viewport_set_parent_viewport(&self, viewport: Rid, parent: Rid) {
        self.apply("viewport_set_parent_viewport", |s| s.viewports.set_parent(viewport, parent));
    }

    forward! {
        /// Blits the viewport into `rect` of `screen` after each frame. A
        /// zero-area rect detaches it.
        viewport_attach_to_screen => viewports::attach_to_screen(rect: Rect2, screen: i32)
    }

    forward!(viewport_set_render_direct_to_screen => viewports::set_render_direct_to_screen(enabled: bool));

    /// Extent and resolution of the 2D signed distance field built from
    /// the light occluders marked as SDF collision.
    pub fn viewport_set_sdf_oversize_and_scale(&self, viewport: Rid, oversize: ViewportSdfOversize, scale: ViewportSdfScale) {
        self.apply("viewport_set_sdf_oversize_and_scale", |s| {
            s.viewports.set_sdf_oversize(viewport, oversize)?;
            s.viewports.set_sdf_scale(viewport, scale)
        });
    }

    forward!(viewport_set_active => viewports::set_active(active: bool));
    forward!(viewport_set_use_xr => viewports::set_use_xr(enabled: bool));
    forward!(viewport_set_update_mode => viewports::set_update_mode(mode: ViewportUpdateMode));
    forward!(viewport_set_clear_mode => viewports::set_clear_mode(mode: ViewportClearMode));
    forward!(viewport_set_disable_3d => viewports::set_disable_3d(disable: bool));
    forward!(viewport_set_disable_2d => viewports::set_disable_2d(disable: bool));
    forward!(viewport_set_environment_mode => viewports::set_environment_mode(mode: ViewportEnvironmentMode));
    forward!(viewport_set_canvas_cull_mask => viewports::set_canvas_cull_mask(mask: u32));
    forward!(viewport_set_msaa_2d => viewports::set_msaa_2d(msaa: ViewportMsaa));
    forward!(viewport_set_msaa_3d => viewports::set_msaa_3d(msaa: ViewportMsaa));
    forward!(viewport_set_screen_space_aa => viewports::set_screen_space_aa(mode: ViewportScreenSpaceAa));
    forward!(viewport_set_use_taa => viewports::set_use_taa(enabled: bool));
    forward!(viewport_set_use_debanding => viewports::set_use_debanding(enabled: bool));
    forward!(viewport_set_use_occlusion_culling => viewports::set_use_occlusion_culling(enabled: bool));
    forward!(viewport_set_mesh_lod_threshold => viewports::set_mesh_lod_threshold(pixels: f32));
    forward!(viewport_set_vrs_mode => viewports::set_vrs_mode(mode: ViewportVrsMode));
    forward!(viewport_set_vrs_update_mode => viewports::set_vrs_update_mode(mode: ViewportVrsUpdateMode));
    forward!(viewport_set_use_hdr_2d => viewports::set_use_hdr_2d(enabled: bool));
    forward!(viewport_set_scaling_3d_mode => viewports::set_scaling_3d_mode(mode: Scaling3DMode));
    forward!(viewport_set_fsr_sharpness => viewports::set_fsr_sharpness(sharpness: f32));
    forward!(viewport_set_texture_mipmap_bias => viewports::set_texture_mipmap_bias(bias: f32));
    forward!(viewport_set_default_canvas_item_texture_filter => viewports::set_default_canvas_item_texture_filter(filter: CanvasItemTextureFilter));
    forward!(viewport_set_default_canvas_item_texture_repeat => viewports::set_default_canvas_item_texture_repeat(repeat: CanvasItemTextureRepeat));
    forward!(viewport_set_transparent_background => viewports::set_transparent_background(enabled: bool));
    forward!(viewport_set_global_canvas_transform => viewports::set_global_canvas_transform(transform: Transform2D));
    forward!(viewport_set_snap_2d_transforms_to_pixel => viewports::set_snap_2d_transforms_to_pixel(enabled: bool));
    forward!(viewport_set_snap_2d_vertices_to_pixel => viewports::set_snap_2d_vertices_to_pixel(enabled: bool));
    forward!(viewport_set_debug_draw => viewports::set_debug_draw(mode: ViewportDebugDraw));

    forward! {
        /// Clamped to the range the current scaling mode supports.
        viewport_set_scaling_3d_scale => viewports::set_scaling_3d_scale(scale: f32)
    }

    forward! {
        /// Turning measurement on or off resets the collected timings.
        viewport_set_measure_render_time => viewports::set_measure_render_time(enable: bool)
    }

    forward! {
        /// Rounded up to a power of two. Zero disables positional shadows.
        viewport_set_positional_shadow_atlas_size => viewports::set_positional_shadow_atlas_size(size: i32, use_16_bits: bool)
    }

    forward! {
        viewport_set_positional_shadow_atlas_quadrant_subdivision =>
            viewports::set_positional_shadow_atlas_quadrant_subdivision(quadrant: i32, subdivision: i32)
    }

    pub fn viewport_attach_camera(&self, viewport: Rid, camera: Rid) {
        if self.accepts("viewport_attach_camera", camera, RidKind::Camera) {
            self.apply("viewport_attach_camera", |s| s.viewports.attach_camera(viewport, camera));
        }
    }

    pub fn viewport_set_scenario(&self, viewport: Rid, scenario: Rid) {
        if self.accepts("viewport_set_scenario", scenario, RidKind::Scenario) {
            self.apply("viewport_set_scenario", |s| s.viewports.set_scenario(viewport, scenario));
        }
    }

    /// Texture whose red and green channels encode the shading rate, used
    /// in `Texture` VRS mode.
    pub fn viewport_set_vrs_texture(&self, viewport: Rid, texture: Rid) {
        if self.accepts("viewport_set_vrs_texture", texture, RidKind::Texture) {
            self.apply("viewport_set_vrs_texture", |s| s.viewports.set_vrs_texture(viewport, texture));
        }
    }

    // ------------------------------------------------------------------
    // Attached canvases
    // ------------------------------------------------------------------

    pub fn viewport_attach_canvas(&self, viewport: Rid, canvas: Rid) {
        if !self.inner.rids.owns(canvas, RidKind::Canvas) {
            fail_invalid_rid!("viewport_attach_canvas", canvas);
        }
        self.apply("viewport_attach_canvas", |s| s.viewports.attach_canvas(viewport, canvas));
    }

    forward!(viewport_remove_canvas => viewports::remove_canvas(canvas: Rid));
    forward!(viewport_set_canvas_transform => viewports::set_canvas_transform(canvas: Rid, transform: Transform2D));

    forward! {
        /// Canvases draw by `layer`, then `sublayer`, then attach order.
        viewport_set_canvas_stacking => viewports::set_canvas_stacking(canvas: Rid, layer: i32, sublayer: i32)
    }

    // ------------------------------------------------------------------
    // Readback
    // ------------------------------------------------------------------

    /// `Once` turns into `Disabled` after the viewport rendered, so this
    /// waits for pending frames first.
    #[must_use]
    pub fn viewport_get_update_mode(&self, viewport: Rid) -> ViewportUpdateMode {
        self.scheduler.sync();
        self.with_state(|s| s.viewports.get(viewport).map_or_else(Default::default, |vp| vp.update_mode))
    }

    /// `Once` turns into `Disabled` after the viewport rendered with a rate
    /// mode set.
    #[must_use]
    pub fn viewport_get_vrs_update_mode(&self, viewport: Rid) -> ViewportVrsUpdateMode {
        self.scheduler.sync();
        self.with_state(|s| s.viewports.get(viewport).map_or_else(Default::default, |vp| vp.vrs_update_mode))
    }

    /// Counters of the last frame the viewport rendered.
    #[must_use]
    pub fn viewport_get_render_info(&self, viewport: Rid, ty: ViewportRenderInfoType, info: ViewportRenderInfo) -> u64 {
        self.scheduler.sync();
        self.with_state(|s| s.viewports.get(viewport).map_or(0, |vp| vp.render_info.get(ty, info)))
    }

    /// Milliseconds, or zero while measurement is off or warming up.
    #[must_use]
    pub fn viewport_get_measured_render_time_cpu(&self, viewport: Rid) -> f64 {
        self.scheduler.sync();
        self.with_state(|s| {
            s.viewports
                .get(viewport)
                .map_or(0.0, |vp| vp.times.cpu(vp.measure_render_time))
        })
    }

    #[must_use]
    pub fn viewport_get_measured_render_time_gpu(&self, viewport: Rid) -> f64 {
        self.scheduler.sync();
        self.with_state(|s| {
            s.viewports
                .get(viewport)
                .map_or(0.0, |vp| vp.times.gpu(vp.measure_render_time))
        })
    }

    /// Shadow atlas slot `light` received in the last frame of `viewport`.
    #[must_use]
    pub fn viewport_find_shadow_slot(&self, viewport: Rid, light: Rid) -> Option<ShadowSlot> {
        self.scheduler.sync();
        self.with_state(|s| {
            s.viewports
                .get(viewport)
                .and_then(|vp| vp.shadow_atlas.slot_of(light).copied())
        })
    }

    /// Pipeline stages the viewport ran in its last rendered frame.
    #[must_use]
    pub fn viewport_get_last_passes(&self, viewport: Rid) -> Vec<RenderPass> {
        self.scheduler.sync();
        self.with_state(|s| s.viewports.get(viewport).map(|vp| vp.last_passes.clone()).unwrap_or_default())
    }
}
