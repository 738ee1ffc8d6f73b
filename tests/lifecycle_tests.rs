//! Handle Lifecycle Tests
//!
//! Tests for:
//! - Create-and-free of a texture with pixel read-back
//! - Created handles are live and of the declared kind
//! - Mutators and getters on freed handles
//! - Idempotent `free_rid`
//! - Viewport textures follow their viewport

mod common;

use common::server;
use vesper::prelude::*;

fn four_pixel_image() -> Image {
    Image::from_colors(2, 2, &[Color::RED, Color::GREEN, Color::BLUE, Color::WHITE]).unwrap()
}

// ============================================================================
// Create and free
// ============================================================================

#[test]
fn texture_create_read_free() {
    let server = server();
    let image = four_pixel_image();
    let texture = server.texture_2d_create(image.clone());
    assert!(texture.is_valid());

    let read = server.texture_2d_get(texture).expect("texture has contents");
    assert_eq!(read.format(), image.format());
    assert_eq!(read.width(), 2);
    assert_eq!(read.height(), 2);
    assert_eq!(read.get_pixel(0, 0), Color::RED);
    assert_eq!(read.get_pixel(1, 0), Color::GREEN);
    assert_eq!(read.get_pixel(0, 1), Color::BLUE);
    assert_eq!(read.get_pixel(1, 1), Color::WHITE);

    server.free_rid(texture);
    assert!(server.texture_2d_get(texture).is_none());

    // Second free is a no-op.
    server.free_rid(texture);
    assert!(server.texture_2d_get(texture).is_none());
}

#[test]
fn created_handles_are_live_with_their_kind() {
    let server = server();
    let cases = [
        (server.texture_2d_create(four_pixel_image()), RidKind::Texture),
        (server.mesh_create(), RidKind::Mesh),
        (server.multimesh_create(), RidKind::MultiMesh),
        (server.material_create(), RidKind::Material),
        (server.shader_create(), RidKind::Shader),
        (server.omni_light_create(), RidKind::Light),
        (server.scenario_create(), RidKind::Scenario),
        (server.instance_create(), RidKind::Instance),
        (server.canvas_create(), RidKind::Canvas),
        (server.canvas_item_create(), RidKind::CanvasItem),
        (server.viewport_create(), RidKind::Viewport),
    ];
    for (rid, kind) in cases {
        assert!(rid.is_valid(), "{kind} creation failed");
        assert!(server.debug_live_handles(kind).contains(&rid), "{rid:?} is not a live {kind}");
    }
}

#[test]
fn failed_create_returns_invalid_handle() {
    let server = server();
    // A cubemap needs exactly six layers.
    let layers = vec![four_pixel_image(); 2];
    let rid = server.texture_2d_layered_create(layers, vesper::resources::TextureLayeredType::Cubemap);
    assert_eq!(rid, Rid::INVALID);
}

// ============================================================================
// Freed handles
// ============================================================================

#[test]
fn freed_handle_mutators_are_noops() {
    let server = server();
    let mesh = server.mesh_create();
    server.free_rid(mesh);

    let arrays = vesper::resources::mesh::primitives::box_arrays(Vec3::ONE);
    server.mesh_add_surface_from_arrays(mesh, PrimitiveType::Triangles, &arrays, &[], &[], ArrayFormat::empty());
    assert_eq!(server.mesh_get_surface_count(mesh), 0);
    assert_eq!(server.mesh_get_aabb(mesh), Aabb::ZERO);

    let multimesh = server.multimesh_create();
    server.multimesh_allocate_data(multimesh, 2, MultimeshTransformFormat::Transform3D, false, false);
    server.free_rid(multimesh);
    assert!(server.multimesh_get_buffer(multimesh).is_empty());
    assert_eq!(server.multimesh_get_instance_count(multimesh), 0);
}

#[test]
fn handles_are_never_reissued() {
    let server = server();
    let first = server.material_create();
    server.free_rid(first);
    server.force_draw(true, 0.0);
    server.force_draw(true, 0.0);
    let second = server.material_create();
    assert_ne!(first, second);
    assert!(server.material_get_param(first, "anything").is_nil());
}

#[test]
fn freeing_a_viewport_frees_its_texture() {
    let server = server();
    let viewport = server.viewport_create();
    let texture = server.viewport_get_texture(viewport);
    assert!(server.debug_live_handles(RidKind::Texture).contains(&texture));

    // The texture cannot be freed on its own.
    server.free_rid(texture);
    assert!(server.debug_live_handles(RidKind::Texture).contains(&texture));

    server.free_rid(viewport);
    assert!(!server.debug_live_handles(RidKind::Texture).contains(&texture));
}

#[test]
fn viewport_textures_cannot_be_replaced() {
    let server = server();
    let viewport = server.viewport_create();
    server.viewport_set_size(viewport, 4, 4);
    server.viewport_set_active(viewport, true);
    server.viewport_set_update_mode(viewport, ViewportUpdateMode::Always);
    let target = server.viewport_get_texture(viewport);
    let plain = server.texture_2d_create(four_pixel_image());

    // Neither direction may move the render target.
    server.texture_replace(plain, target);
    server.texture_replace(target, plain);
    for _ in 0..2 {
        server.force_draw(true, 1.0 / 60.0);
    }

    let frame = server.texture_2d_get(target).expect("viewport still renders into its texture");
    assert_eq!((frame.width(), frame.height()), (4, 4));
    let kept = server.texture_2d_get(plain).expect("plain texture keeps its contents");
    assert_eq!((kept.width(), kept.height()), (2, 2));
    assert_eq!(kept.get_pixel(0, 0), Color::RED);
}

#[test]
fn replaced_texture_takes_new_contents() {
    let server = server();
    let texture = server.texture_2d_create(four_pixel_image());
    let by = server.texture_2d_create(Image::from_colors(1, 1, &[Color::BLUE]).unwrap());

    server.texture_replace(texture, by);
    let read = server.texture_2d_get(texture).expect("replaced texture has contents");
    assert_eq!((read.width(), read.height()), (1, 1));
    assert_eq!(read.get_pixel(0, 0), Color::BLUE);
    assert!(!server.debug_live_handles(RidKind::Texture).contains(&by));
}

#[test]
fn freed_material_is_dropped_from_references() {
    let server = server();
    let mesh = server.mesh_create();
    let arrays = vesper::resources::mesh::primitives::box_arrays(Vec3::ONE);
    server.mesh_add_surface_from_arrays(mesh, PrimitiveType::Triangles, &arrays, &[], &[], ArrayFormat::empty());
    let material = server.material_create();
    server.mesh_surface_set_material(mesh, 0, material);
    assert_eq!(server.mesh_surface_get_material(mesh, 0), material);

    server.free_rid(material);
    assert_eq!(server.mesh_surface_get_material(mesh, 0), Rid::INVALID);
}
