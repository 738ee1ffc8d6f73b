//! Resource Store Tests
//!
//! Tests for:
//! - MultiMesh buffer protocol and stride
//! - Mesh surface bookkeeping
//! - Stride helpers
//! - Material parameters and next-pass chains
//! - Instance uniforms reflected through materials
//! - Particles with no slots
//! - Built-in default resources

mod common;

use common::{approx, server};
use vesper::prelude::*;
use vesper::resources::mesh::primitives;
use vesper::resources::particles::ParticlesEmitFlags;
use vesper::vesper_core::GlobalShaderParameterType;

// ============================================================================
// MultiMesh
// ============================================================================

#[test]
fn multimesh_buffer_round_trip() {
    let server = server();
    let mm = server.multimesh_create();
    server.multimesh_allocate_data(mm, 3, MultimeshTransformFormat::Transform3D, true, false);

    // 12 transform floats + 4 color floats per instance.
    assert_eq!(server.multimesh_get_buffer(mm).len(), 48);

    let mut buffer = vec![0.0f32; 48];
    buffer[..16].copy_from_slice(&[
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        1.0, 0.0, 0.0, 1.0,
    ]);
    server.multimesh_set_buffer(mm, &buffer);
    assert_eq!(server.multimesh_get_buffer(mm), buffer);

    assert_eq!(server.multimesh_instance_get_color(mm, 0), Color::RED);
    assert_eq!(server.multimesh_instance_get_transform(mm, 0), Affine3A::IDENTITY);
}

#[test]
fn multimesh_rejects_wrong_buffer_length() {
    let server = server();
    let mm = server.multimesh_create();
    server.multimesh_allocate_data(mm, 3, MultimeshTransformFormat::Transform3D, true, false);
    let before = server.multimesh_get_buffer(mm);

    server.multimesh_set_buffer(mm, &[1.0; 47]);
    assert_eq!(server.multimesh_get_buffer(mm), before);
}

#[test]
fn multimesh_buffer_length_follows_format() {
    let server = server();
    let mm = server.multimesh_create();
    let cases = [
        (MultimeshTransformFormat::Transform2D, false, false, 8),
        (MultimeshTransformFormat::Transform2D, true, true, 16),
        (MultimeshTransformFormat::Transform3D, false, true, 16),
        (MultimeshTransformFormat::Transform3D, true, true, 20),
    ];
    for (format, colors, custom, stride) in cases {
        server.multimesh_allocate_data(mm, 5, format, colors, custom);
        assert_eq!(server.multimesh_get_buffer(mm).len(), 5 * stride, "{format:?} {colors} {custom}");
    }
}

#[test]
fn multimesh_allocation_is_zero_filled() {
    let server = server();
    let mm = server.multimesh_create();
    server.multimesh_allocate_data(mm, 3, MultimeshTransformFormat::Transform3D, true, true);
    assert!(server.multimesh_get_buffer(mm).iter().all(|v| *v == 0.0));
}

#[test]
fn multimesh_refuses_oversized_allocation() {
    let server = server();
    let mm = server.multimesh_create();
    server.multimesh_allocate_data(mm, 4, MultimeshTransformFormat::Transform2D, false, false);

    server.multimesh_allocate_data(mm, usize::MAX / 8, MultimeshTransformFormat::Transform3D, true, false);
    assert_eq!(server.multimesh_get_instance_count(mm), 4);
    assert_eq!(server.multimesh_get_buffer(mm).len(), 32);
}

#[test]
fn multimesh_per_instance_setters() {
    let server = server();
    let mm = server.multimesh_create();
    server.multimesh_allocate_data(mm, 2, MultimeshTransformFormat::Transform3D, true, true);
    let t = Affine3A::from_translation(Vec3::new(1.0, 2.0, 3.0));
    server.multimesh_instance_set_transform(mm, 1, t);
    server.multimesh_instance_set_custom_data(mm, 1, Vec4::new(0.1, 0.2, 0.3, 0.4));

    assert_eq!(server.multimesh_instance_get_transform(mm, 1), t);
    assert_eq!(server.multimesh_instance_get_custom_data(mm, 1), Vec4::new(0.1, 0.2, 0.3, 0.4));
    // Out of range reads return the zero value.
    assert_eq!(server.multimesh_instance_get_custom_data(mm, 7), Vec4::ZERO);
}

// ============================================================================
// Meshes
// ============================================================================

fn add_box(server: &RenderingServer, mesh: Rid, size: f32) {
    let arrays = primitives::box_arrays(Vec3::splat(size));
    server.mesh_add_surface_from_arrays(mesh, PrimitiveType::Triangles, &arrays, &[], &[], ArrayFormat::empty());
}

#[test]
fn mesh_surface_count_tracks_adds_and_clear() {
    let server = server();
    let mesh = server.mesh_create();
    add_box(&server, mesh, 1.0);
    add_box(&server, mesh, 2.0);
    assert_eq!(server.mesh_get_surface_count(mesh), 2);

    let aabb = server.mesh_get_aabb(mesh);
    assert!(approx(aabb.min.x, -1.0) && approx(aabb.max.x, 1.0));

    server.mesh_surface_remove(mesh, 0);
    assert_eq!(server.mesh_get_surface_count(mesh), 1);

    server.mesh_clear(mesh);
    assert_eq!(server.mesh_get_surface_count(mesh), 0);
}

#[test]
fn mesh_surface_arrays_read_back() {
    let server = server();
    let mesh = server.mesh_create();
    let arrays = primitives::box_arrays(Vec3::ONE);
    server.mesh_add_surface_from_arrays(mesh, PrimitiveType::Triangles, &arrays, &[], &[], ArrayFormat::empty());

    let read = server.mesh_surface_get_arrays(mesh, 0);
    assert_eq!(read.indices, arrays.indices);
    assert_eq!(read.normals.len(), arrays.normals.len());
}

#[test]
fn mesh_custom_aabb_overrides_bounds() {
    let server = server();
    let mesh = server.mesh_create();
    add_box(&server, mesh, 1.0);
    let custom = Aabb::new(Vec3::splat(-5.0), Vec3::splat(5.0));
    server.mesh_set_custom_aabb(mesh, custom);
    assert_eq!(server.mesh_get_custom_aabb(mesh), custom);
    assert_eq!(server.mesh_get_aabb(mesh), custom);
}

// ============================================================================
// Stride helpers
// ============================================================================

#[test]
fn stride_helpers_are_pure() {
    let server = server();
    let format = ArrayFormat::VERTEX | ArrayFormat::NORMAL | ArrayFormat::TANGENT | ArrayFormat::TEX_UV;
    for n in [1, 100, 70_000] {
        let a = (
            server.mesh_surface_get_format_vertex_stride(format, n),
            server.mesh_surface_get_format_normal_tangent_stride(format, n),
            server.mesh_surface_get_format_attribute_stride(format, n),
            server.mesh_surface_get_format_skin_stride(format, n),
        );
        let b = (
            server.mesh_surface_get_format_vertex_stride(format, n),
            server.mesh_surface_get_format_normal_tangent_stride(format, n),
            server.mesh_surface_get_format_attribute_stride(format, n),
            server.mesh_surface_get_format_skin_stride(format, n),
        );
        assert_eq!(a, b);
    }
    assert_eq!(server.mesh_surface_get_format_vertex_stride(format, 100), 12);
    assert_eq!(server.mesh_surface_get_format_normal_tangent_stride(format, 100), 8);
    assert_eq!(server.mesh_surface_get_format_offset(format, 100, ArrayType::Normal), 1200);
}

// ============================================================================
// Materials and shaders
// ============================================================================

const SHADER: &str = r"
shader_type spatial;
uniform float roughness : hint_range(0, 1) = 0.75;
instance uniform float tint_amount = 1.0;
";

#[test]
fn material_param_round_trip() {
    let server = server();
    let material = server.material_create();
    let values = [
        ("roughness", Variant::Float(0.5)),
        ("albedo", Variant::Color(Color::rgb(0.2, 0.4, 0.6))),
        ("offset", Variant::Vec3(Vec3::new(1.0, 2.0, 3.0))),
        ("count", Variant::Int(7)),
    ];
    for (name, value) in &values {
        server.material_set_param(material, name, value.clone());
    }
    for (name, value) in &values {
        assert_eq!(&server.material_get_param(material, name), value);
    }

    server.material_set_param(material, "roughness", Variant::Nil);
    assert!(server.material_get_param(material, "roughness").is_nil());
}

#[test]
fn shader_reflects_parameters() {
    let server = server();
    let shader = server.shader_create();
    server.shader_set_code(shader, SHADER);
    assert_eq!(server.shader_get_code(shader), SHADER);
    assert_eq!(server.shader_get_parameter_default(shader, "roughness"), Variant::Float(0.75));
    let names: Vec<String> = server
        .shader_get_parameter_list(shader)
        .iter()
        .map(|p| p.name.as_str().to_owned())
        .collect();
    assert_eq!(names, ["roughness"]);
}

#[test]
fn instance_uniforms_come_from_surface_materials() {
    let server = server();
    let shader = server.shader_create();
    server.shader_set_code(shader, SHADER);
    let material = server.material_create();
    server.material_set_shader(material, shader);

    let mesh = server.mesh_create();
    add_box(&server, mesh, 1.0);
    server.mesh_surface_set_material(mesh, 0, material);

    let instance = server.instance_create();
    server.instance_set_base(instance, mesh);

    let list = server.instance_geometry_get_shader_parameter_list(instance);
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].name.as_str(), "tint_amount");
    assert_eq!(
        server.instance_geometry_get_shader_parameter_default_value(instance, "tint_amount"),
        Variant::Float(1.0)
    );

    server.instance_geometry_set_shader_parameter(instance, "tint_amount", Variant::Float(0.25));
    assert_eq!(
        server.instance_geometry_get_shader_parameter(instance, "tint_amount"),
        Variant::Float(0.25)
    );
}

#[test]
fn global_shader_parameters() {
    let server = server();
    server.global_shader_parameter_add(
        "wind",
        GlobalShaderParameterType::Vec3,
        Variant::Vec3(Vec3::X),
    );
    assert_eq!(server.global_shader_parameter_get("wind"), Variant::Vec3(Vec3::X));

    server.global_shader_parameter_set("wind", Variant::Vec3(Vec3::Y));
    assert_eq!(server.global_shader_parameter_get("wind"), Variant::Vec3(Vec3::Y));

    server.global_shader_parameter_remove("wind");
    assert!(server.global_shader_parameter_get("wind").is_nil());
    assert!(server.global_shader_parameter_get_list().is_empty());
}

// ============================================================================
// Particles
// ============================================================================

#[test]
fn particles_with_zero_amount_never_emit() {
    let server = server();
    let particles = server.particles_create();
    server.particles_set_emitting(particles, false);
    server.particles_set_amount(particles, 0);
    server.particles_emit(
        particles,
        Affine3A::IDENTITY,
        Vec3::ZERO,
        Color::WHITE,
        Vec4::ZERO,
        ParticlesEmitFlags::POSITION,
    );
    server.force_draw(true, 1.0 / 60.0);
    assert!(server.particles_is_inactive(particles));
    assert_eq!(server.particles_get_current_aabb(particles), Aabb::ZERO);
}

// ============================================================================
// Defaults
// ============================================================================

#[test]
fn default_resources_are_cached_until_freed() {
    let server = server();
    let white = server.get_white_texture();
    assert_eq!(server.get_white_texture(), white);
    let image = server.texture_2d_get(white).unwrap();
    assert_eq!(image.get_pixel(3, 3), Color::WHITE);

    server.free_rid(white);
    let again = server.get_white_texture();
    assert!(again.is_valid());
    assert_ne!(again, white);

    let cube = server.get_test_cube();
    assert_eq!(server.mesh_get_surface_count(cube), 1);
    let aabb = server.mesh_get_aabb(cube);
    assert!(approx(aabb.max.y - aabb.min.y, 2.0));

    let a = server.make_sphere_mesh(8, 8, 1.0);
    let b = server.make_sphere_mesh(8, 8, 1.0);
    assert_ne!(a, b);
}
