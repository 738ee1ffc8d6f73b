//! Viewport Pipeline Tests
//!
//! Tests for:
//! - Update-mode gating (`Once`, `Disabled`, inactive, zero size)
//! - Render info of the 3D pass
//! - Render-time measurement off by default
//! - Clear color reaching the viewport texture
//! - Disabled render loop
//! - Variable rate shading update modes
//! - Compositor effects at their callback points

mod common;

use std::sync::Arc;

use common::{color_near, init_logger, server};
use parking_lot::Mutex;
use vesper::prelude::*;
use vesper::render::viewport::RenderPass;
use vesper::render::{DeviceCapabilities, HeadlessDevice, ViewportVrsMode, ViewportVrsUpdateMode};
use vesper::resources::{CompositorEffectCallbackType as EffectPoint, CompositorEffectContext, CompositorEffectFlags};

/// A 64×64 active viewport looking at the test cube from z = 5.
fn cube_viewport(server: &RenderingServer, mode: ViewportUpdateMode) -> Rid {
    cube_scene(server, mode).0
}

/// [`cube_viewport`] together with its camera.
fn cube_scene(server: &RenderingServer, mode: ViewportUpdateMode) -> (Rid, Rid) {
    let scenario = server.scenario_create();
    server.instance_create2(server.get_test_cube(), scenario);

    let camera = server.camera_create();
    server.camera_set_perspective(camera, 70.0, 0.05, 100.0);
    server.camera_set_transform(camera, Affine3A::from_translation(Vec3::new(0.0, 0.0, 5.0)));

    let viewport = server.viewport_create();
    server.viewport_set_size(viewport, 64, 64);
    server.viewport_set_active(viewport, true);
    server.viewport_set_scenario(viewport, scenario);
    server.viewport_attach_camera(viewport, camera);
    server.viewport_set_update_mode(viewport, mode);
    (viewport, camera)
}

fn draw_calls(server: &RenderingServer, viewport: Rid) -> u64 {
    server.viewport_get_render_info(viewport, ViewportRenderInfoType::Visible, ViewportRenderInfo::DrawCallsInFrame)
}

// ============================================================================
// Update gating
// ============================================================================

#[test]
fn update_once_renders_a_single_frame() {
    let server = server();
    let viewport = cube_viewport(&server, ViewportUpdateMode::Once);

    server.force_draw(true, 1.0 / 60.0);
    assert!(draw_calls(&server, viewport) > 0);
    assert_eq!(server.viewport_get_update_mode(viewport), ViewportUpdateMode::Disabled);

    server.force_draw(true, 1.0 / 60.0);
    assert_eq!(draw_calls(&server, viewport), 0);
}

#[test]
fn update_always_renders_every_frame() {
    let server = server();
    let viewport = cube_viewport(&server, ViewportUpdateMode::Always);
    for _ in 0..3 {
        server.force_draw(true, 1.0 / 60.0);
        assert!(draw_calls(&server, viewport) > 0);
    }
    assert_eq!(server.viewport_get_update_mode(viewport), ViewportUpdateMode::Always);
}

#[test]
fn disabled_inactive_or_empty_viewports_do_not_render() {
    let server = server();

    let disabled = cube_viewport(&server, ViewportUpdateMode::Disabled);
    let inactive = cube_viewport(&server, ViewportUpdateMode::Always);
    server.viewport_set_active(inactive, false);
    let empty = cube_viewport(&server, ViewportUpdateMode::Always);
    server.viewport_set_size(empty, 0, 64);

    server.force_draw(true, 1.0 / 60.0);
    for viewport in [disabled, inactive, empty] {
        assert_eq!(draw_calls(&server, viewport), 0);
        assert!(server.viewport_get_last_passes(viewport).is_empty());
    }
}

#[test]
fn when_visible_needs_screen_or_sampling() {
    let server = server();
    let viewport = cube_viewport(&server, ViewportUpdateMode::WhenVisible);
    server.force_draw(true, 1.0 / 60.0);
    assert_eq!(draw_calls(&server, viewport), 0);

    server.viewport_attach_to_screen(viewport, Rect2::from_xywh(0.0, 0.0, 64.0, 64.0), 0);
    server.force_draw(true, 1.0 / 60.0);
    assert!(draw_calls(&server, viewport) > 0);
}

#[test]
fn disabling_3d_skips_the_scene() {
    let server = server();
    let viewport = cube_viewport(&server, ViewportUpdateMode::Always);
    server.viewport_set_disable_3d(viewport, true);
    server.force_draw(true, 1.0 / 60.0);

    assert_eq!(draw_calls(&server, viewport), 0);
    let passes = server.viewport_get_last_passes(viewport);
    assert!(passes.contains(&RenderPass::Clear));
    assert!(!passes.contains(&RenderPass::Opaque));
}

// ============================================================================
// Measurement
// ============================================================================

#[test]
fn render_time_is_zero_while_not_measured() {
    let server = server();
    let viewport = cube_viewport(&server, ViewportUpdateMode::Always);
    for _ in 0..4 {
        server.force_draw(true, 1.0 / 60.0);
    }
    assert_eq!(server.viewport_get_measured_render_time_cpu(viewport), 0.0);
    assert_eq!(server.viewport_get_measured_render_time_gpu(viewport), 0.0);
}

// ============================================================================
// Output
// ============================================================================

#[test]
fn empty_viewport_shows_clear_color() {
    let server = server();
    let viewport = server.viewport_create();
    server.viewport_set_size(viewport, 8, 8);
    server.viewport_set_active(viewport, true);
    server.viewport_set_update_mode(viewport, ViewportUpdateMode::Always);
    server.set_default_clear_color(Color::BLUE);
    server.force_draw(true, 1.0 / 60.0);

    let image = server
        .texture_2d_get(server.viewport_get_texture(viewport))
        .expect("viewport texture holds the frame");
    assert_eq!((image.width(), image.height()), (8, 8));
    assert!(color_near(image.get_pixel(4, 4), Color::BLUE));
}

#[test]
fn rendered_frames_are_counted() {
    let server = server();
    cube_viewport(&server, ViewportUpdateMode::Always);
    let before = server.get_frames_drawn();
    server.force_draw(true, 1.0 / 60.0);
    server.force_draw(true, 1.0 / 60.0);
    assert_eq!(server.get_frames_drawn(), before + 2);
    assert!(server.get_rendering_info(RenderingInfo::TotalDrawCallsInFrame) > 0);
}

// ============================================================================
// Render loop
// ============================================================================

#[test]
fn disabled_render_loop_skips_drawing_but_reclaims_handles() {
    let server = server();
    let viewport = cube_viewport(&server, ViewportUpdateMode::Always);
    server.set_render_loop_enabled(false);

    let material = server.material_create();
    server.free_rid(material);
    assert_eq!(server.debug_pending_reclaim(), 1);

    server.force_draw(true, 1.0 / 60.0);
    server.force_draw(true, 1.0 / 60.0);
    assert_eq!(draw_calls(&server, viewport), 0);
    assert!(server.viewport_get_last_passes(viewport).is_empty());
    assert_eq!(server.get_rendering_info(RenderingInfo::TotalDrawCallsInFrame), 0);
    assert_eq!(server.debug_pending_reclaim(), 0);

    server.set_render_loop_enabled(true);
    server.force_draw(true, 1.0 / 60.0);
    assert!(draw_calls(&server, viewport) > 0);
}

// ============================================================================
// Variable rate shading
// ============================================================================

fn vrs_server() -> RenderingServer {
    init_logger();
    let caps = DeviceCapabilities {
        supports_vrs: true,
        ..DeviceCapabilities::default()
    };
    let device = HeadlessDevice::new().with_capabilities(caps);
    RenderingServer::with_device(ServerSettings::default(), Box::new(device)).expect("headless server starts")
}

#[test]
fn vrs_update_once_falls_back_to_disabled() {
    let server = vrs_server();
    let viewport = cube_viewport(&server, ViewportUpdateMode::Always);
    server.viewport_set_vrs_mode(viewport, ViewportVrsMode::Texture);
    assert_eq!(server.viewport_get_vrs_update_mode(viewport), ViewportVrsUpdateMode::Once);

    server.force_draw(true, 1.0 / 60.0);
    assert!(server.viewport_get_last_passes(viewport).contains(&RenderPass::Vrs));
    assert_eq!(server.viewport_get_vrs_update_mode(viewport), ViewportVrsUpdateMode::Disabled);

    server.force_draw(true, 1.0 / 60.0);
    assert!(!server.viewport_get_last_passes(viewport).contains(&RenderPass::Vrs));
}

#[test]
fn vrs_update_always_keeps_building_rates() {
    let server = vrs_server();
    let viewport = cube_viewport(&server, ViewportUpdateMode::Always);
    server.viewport_set_vrs_mode(viewport, ViewportVrsMode::Texture);
    server.viewport_set_vrs_update_mode(viewport, ViewportVrsUpdateMode::Always);
    for _ in 0..2 {
        server.force_draw(true, 1.0 / 60.0);
        assert!(server.viewport_get_last_passes(viewport).contains(&RenderPass::Vrs));
    }
    assert_eq!(server.viewport_get_vrs_update_mode(viewport), ViewportVrsUpdateMode::Always);
}

// ============================================================================
// Compositor effects
// ============================================================================

fn effect(
    server: &RenderingServer,
    point: EffectPoint,
    callback: impl Fn(&mut CompositorEffectContext<'_>) + Send + Sync + 'static,
) -> Rid {
    let effect = server.compositor_effect_create();
    server.compositor_effect_set_callback(effect, point, Some(Arc::new(callback)));
    effect
}

#[test]
fn compositor_effects_fire_at_their_callback_points() {
    let server = server();
    let (viewport, camera) = cube_scene(&server, ViewportUpdateMode::Always);
    let log = Arc::new(Mutex::new(Vec::new()));

    let effects = [EffectPoint::PostTransparent, EffectPoint::PreOpaque, EffectPoint::PostOpaque]
        .map(|point| {
            let log = Arc::clone(&log);
            effect(&server, point, move |ctx| log.lock().push(ctx.callback_type))
        })
        .to_vec();
    let compositor = server.compositor_create();
    server.compositor_set_compositor_effects(compositor, effects);
    server.camera_set_compositor(camera, compositor);

    server.force_draw(true, 1.0 / 60.0);
    assert_eq!(
        *log.lock(),
        [EffectPoint::PreOpaque, EffectPoint::PostOpaque, EffectPoint::PostTransparent]
    );

    let passes = server.viewport_get_last_passes(viewport);
    let at = |pass: RenderPass| passes.iter().position(|p| *p == pass).expect("pass ran");
    assert!(at(RenderPass::CompositorEffect(EffectPoint::PreOpaque)) < at(RenderPass::Opaque));
    assert!(at(RenderPass::Opaque) < at(RenderPass::CompositorEffect(EffectPoint::PostOpaque)));
    assert!(at(RenderPass::Transparent) < at(RenderPass::CompositorEffect(EffectPoint::PostTransparent)));
    assert!(!passes.contains(&RenderPass::CompositorEffect(EffectPoint::PostSky)));
}

#[test]
fn compositor_effects_share_the_color_buffer_in_order() {
    let server = server();
    let (viewport, camera) = cube_scene(&server, ViewportUpdateMode::Always);
    let seen = Arc::new(Mutex::new(None));

    let paint = effect(&server, EffectPoint::PostTransparent, |ctx| {
        if let Some(color) = ctx.color.as_deref_mut() {
            color.fill(Color::RED);
        }
    });
    server.compositor_effect_set_flag(paint, CompositorEffectFlags::ACCESS_RESOLVED_COLOR, true);
    let sink = Arc::clone(&seen);
    let observe = effect(&server, EffectPoint::PostTransparent, move |ctx| {
        *sink.lock() = ctx.color.as_deref().map(|c| c.get_pixel(0, 0));
    });
    server.compositor_effect_set_flag(observe, CompositorEffectFlags::ACCESS_RESOLVED_COLOR, true);

    let compositor = server.compositor_create();
    server.compositor_set_compositor_effects(compositor, vec![paint, observe]);
    server.camera_set_compositor(camera, compositor);
    server.force_draw(true, 1.0 / 60.0);

    let observed = seen.lock().expect("second effect saw the color buffer");
    assert!(color_near(observed, Color::RED));
    let frame = server
        .texture_2d_get(server.viewport_get_texture(viewport))
        .expect("viewport texture holds the frame");
    assert!(color_near(frame.get_pixel(32, 32), Color::RED));
}

#[test]
fn compositor_buffers_follow_effect_flags() {
    let server = server();
    let (_, camera) = cube_scene(&server, ViewportUpdateMode::Always);
    let seen = Arc::new(Mutex::new(None));

    let sink = Arc::clone(&seen);
    let fx = effect(&server, EffectPoint::PostOpaque, move |ctx| {
        *sink.lock() = Some((ctx.color.is_some(), ctx.depth.as_ref().map(|d| d.len()), ctx.render_size));
    });
    server.compositor_effect_set_flag(fx, CompositorEffectFlags::ACCESS_RESOLVED_DEPTH, true);
    let compositor = server.compositor_create();
    server.compositor_set_compositor_effects(compositor, vec![fx]);
    server.camera_set_compositor(camera, compositor);
    server.force_draw(true, 1.0 / 60.0);

    let (has_color, depth_len, size) = seen.lock().expect("effect ran");
    assert!(!has_color);
    assert_eq!(depth_len, Some(size.x as usize * size.y as usize));
}
