//! Canvas Item Tests
//!
//! Tests for:
//! - Command order on the rendered viewport texture
//! - Clearing an item between frames
//! - Recorded command lists and their bounds
//! - Rejection of malformed commands
//! - Item clipping
//! - Backbuffer copies

mod common;

use common::{color_near, server};
use vesper::prelude::*;
use vesper::render::viewport::RenderPass;

struct CanvasFixture {
    server: RenderingServer,
    viewport: Rid,
    canvas: Rid,
    item: Rid,
}

impl CanvasFixture {
    fn new() -> Self {
        let server = server();
        let viewport = server.viewport_create();
        server.viewport_set_size(viewport, 64, 64);
        server.viewport_set_active(viewport, true);
        server.viewport_set_update_mode(viewport, ViewportUpdateMode::Always);

        let canvas = server.canvas_create();
        server.viewport_attach_canvas(viewport, canvas);
        let item = server.canvas_item_create();
        server.canvas_item_set_parent(item, canvas);
        Self { server, viewport, canvas, item }
    }

    /// Another top-level item, drawn after the ones created before it.
    fn sibling(&self) -> Rid {
        let item = self.server.canvas_item_create();
        self.server.canvas_item_set_parent(item, self.canvas);
        item
    }

    fn render(&self) -> Image {
        self.server.force_draw(true, 1.0 / 60.0);
        self.server
            .texture_2d_get(self.server.viewport_get_texture(self.viewport))
            .expect("viewport texture holds the frame")
    }
}

fn record_lines_and_rect(f: &CanvasFixture) {
    f.server
        .canvas_item_add_line(f.item, Vec2::new(2.0, 8.0), Vec2::new(30.0, 8.0), Color::RED, 2.0, false);
    f.server
        .canvas_item_add_rect(f.item, Rect2::from_xywh(10.0, 4.0, 10.0, 8.0), Color::GREEN, false);
    f.server
        .canvas_item_add_line(f.item, Vec2::new(15.0, 0.0), Vec2::new(15.0, 31.0), Color::BLUE, 2.0, false);
}

// ============================================================================
// Rendering
// ============================================================================

#[test]
fn commands_draw_in_recording_order() {
    let f = CanvasFixture::new();
    record_lines_and_rect(&f);
    let image = f.render();

    assert!(color_near(image.get_pixel(5, 8), Color::RED));
    assert!(color_near(image.get_pixel(12, 8), Color::GREEN));
    assert!(color_near(image.get_pixel(15, 8), Color::BLUE));
    assert!(color_near(image.get_pixel(15, 20), Color::BLUE));
}

#[test]
fn cleared_item_leaves_no_trace() {
    let f = CanvasFixture::new();
    record_lines_and_rect(&f);
    f.render();

    f.server.canvas_item_clear(f.item);
    f.server
        .canvas_item_add_circle(f.item, Vec2::new(40.0, 40.0), 5.0, Color::WHITE, false);
    let image = f.render();

    let background = image.get_pixel(0, 63);
    for (x, y) in [(5, 8), (12, 8), (15, 8), (15, 20)] {
        assert!(color_near(image.get_pixel(x, y), background), "pixel ({x}, {y}) kept old content");
    }
    assert!(color_near(image.get_pixel(40, 40), Color::WHITE));
}

#[test]
fn hidden_items_are_not_drawn() {
    let f = CanvasFixture::new();
    record_lines_and_rect(&f);
    f.server.canvas_item_set_visible(f.item, false);
    let image = f.render();
    assert!(color_near(image.get_pixel(12, 8), image.get_pixel(0, 63)));
}

// ============================================================================
// Command lists
// ============================================================================

#[test]
fn command_list_keeps_order() {
    let f = CanvasFixture::new();
    record_lines_and_rect(&f);
    let commands = f.server.canvas_item_get_commands(f.item);
    assert_eq!(commands.len(), 3);
    assert!(matches!(commands[0], CanvasCommand::Line { color, .. } if color == Color::RED));
    assert!(matches!(commands[1], CanvasCommand::Rect { color, .. } if color == Color::GREEN));
    assert!(matches!(commands[2], CanvasCommand::Line { color, .. } if color == Color::BLUE));
}

#[test]
fn clear_append_clear_is_empty() {
    let f = CanvasFixture::new();
    f.server.canvas_item_clear(f.item);
    record_lines_and_rect(&f);
    f.server
        .canvas_item_add_circle(f.item, Vec2::splat(4.0), 2.0, Color::WHITE, true);
    f.server.canvas_item_clear(f.item);
    assert!(f.server.canvas_item_get_commands(f.item).is_empty());
}

#[test]
fn item_rect_covers_commands() {
    let f = CanvasFixture::new();
    f.server
        .canvas_item_add_rect(f.item, Rect2::from_xywh(10.0, 4.0, 10.0, 8.0), Color::GREEN, false);
    f.server
        .canvas_item_add_circle(f.item, Vec2::new(40.0, 40.0), 5.0, Color::WHITE, false);
    let rect = f.server.debug_canvas_item_get_rect(f.item);
    assert!(rect.has_point(Vec2::new(11.0, 5.0)));
    assert!(rect.has_point(Vec2::new(44.0, 44.0)));
    assert!(!rect.has_point(Vec2::new(50.0, 50.0)));
}

#[test]
fn malformed_commands_are_refused() {
    let f = CanvasFixture::new();
    f.server
        .canvas_item_add_polyline(f.item, &[Vec2::ZERO], &[Color::WHITE], 1.0, false);
    f.server
        .canvas_item_add_polyline(f.item, &[Vec2::ZERO, Vec2::ONE, Vec2::X], &[Color::RED, Color::BLUE], 1.0, false);
    f.server
        .canvas_item_add_circle(f.item, Vec2::ZERO, -1.0, Color::WHITE, false);
    assert!(f.server.canvas_item_get_commands(f.item).is_empty());
}

#[test]
fn commands_on_freed_item_are_dropped() {
    let f = CanvasFixture::new();
    f.server.free_rid(f.item);
    record_lines_and_rect(&f);
    assert!(f.server.canvas_item_get_commands(f.item).is_empty());
}

#[test]
fn frame_exports_as_rgba_image() {
    let f = CanvasFixture::new();
    record_lines_and_rect(&f);
    let rgba: image::RgbaImage = f.render().to_rgba_image();
    assert_eq!(rgba.dimensions(), (64, 64));
    let image::Rgba([r, g, b, a]) = *rgba.get_pixel(5, 8);
    assert!(r > 250 && g < 5 && b < 5 && a == 255);
}

// ============================================================================
// Clipping and backbuffer
// ============================================================================

#[test]
fn clip_limits_the_item_itself() {
    let f = CanvasFixture::new();
    f.server.set_default_clear_color(Color::BLUE);
    f.server.canvas_item_add_rect(f.item, Rect2::from_xywh(0.0, 0.0, 32.0, 32.0), Color::RED, false);
    f.server.canvas_item_set_custom_rect(f.item, Some(Rect2::from_xywh(0.0, 0.0, 8.0, 8.0)));
    f.server.canvas_item_set_clip(f.item, true);

    let image = f.render();
    assert!(color_near(image.get_pixel(4, 4), Color::RED));
    assert!(color_near(image.get_pixel(20, 20), Color::BLUE));
}

#[test]
fn backbuffer_copy_is_sampled_by_later_items() {
    let f = CanvasFixture::new();
    f.server.set_default_clear_color(Color::BLUE);
    f.server.canvas_item_add_rect(f.item, Rect2::from_xywh(0.0, 0.0, 16.0, 16.0), Color::RED, false);

    let copier = f.sibling();
    f.server.canvas_item_set_copy_to_backbuffer(copier, Some(Rect2::from_xywh(0.0, 0.0, 64.0, 64.0)));
    let reader = f.sibling();
    let own = f.server.viewport_get_texture(f.viewport);
    f.server
        .canvas_item_add_texture_rect(reader, Rect2::from_xywh(32.0, 32.0, 32.0, 32.0), own, false, Color::WHITE, false);

    let image = f.render();
    // The backbuffer is drawn at half size into the lower right quarter.
    assert!(color_near(image.get_pixel(34, 34), Color::RED));
    assert!(color_near(image.get_pixel(56, 56), Color::BLUE));
    assert!(f.server.viewport_get_last_passes(f.viewport).contains(&RenderPass::BackbufferCopy));
}

#[test]
fn own_texture_without_backbuffer_draws_untextured() {
    let f = CanvasFixture::new();
    f.server.set_default_clear_color(Color::BLUE);
    let own = f.server.viewport_get_texture(f.viewport);
    f.server
        .canvas_item_add_texture_rect(f.item, Rect2::from_xywh(0.0, 0.0, 16.0, 16.0), own, false, Color::GREEN, false);

    let image = f.render();
    assert!(color_near(image.get_pixel(8, 8), Color::GREEN));
    assert!(!f.server.viewport_get_last_passes(f.viewport).contains(&RenderPass::BackbufferCopy));
}
