//! Spatial Query Tests
//!
//! Tests for:
//! - AABB, ray and convex queries against a scenario
//! - Index updates on transform, scenario and free
//! - Instances bound to a mesh resource

mod common;

use common::server;
use vesper::prelude::*;

/// Three unit boxes at x = 0, 10 and 100 with object ids 101..=103.
fn three_boxes(server: &RenderingServer) -> (Rid, [Rid; 3]) {
    let scenario = server.scenario_create();
    let mut instances = [Rid::INVALID; 3];
    for (i, (x, id)) in [(0.0, 101), (10.0, 102), (100.0, 103)].into_iter().enumerate() {
        let instance = server.instance_create();
        server.instance_set_custom_aabb(instance, Aabb::from_center_extents(Vec3::new(x, 0.0, 0.0), Vec3::ONE));
        server.instance_attach_object_instance_id(instance, id);
        server.instance_set_scenario(instance, scenario);
        instances[i] = instance;
    }
    (scenario, instances)
}

fn unit_query() -> Aabb {
    Aabb::new(Vec3::splat(-2.0), Vec3::splat(2.0))
}

// ============================================================================
// AABB
// ============================================================================

#[test]
fn cull_aabb_returns_overlapping_ids() {
    let server = server();
    let (scenario, _) = three_boxes(&server);
    assert_eq!(server.instances_cull_aabb(unit_query(), scenario), vec![101]);

    let wide = Aabb::new(Vec3::new(-2.0, -2.0, -2.0), Vec3::new(12.0, 2.0, 2.0));
    assert_eq!(server.instances_cull_aabb(wide, scenario), vec![101, 102]);
}

#[test]
fn cull_aabb_follows_transforms() {
    let server = server();
    let (scenario, instances) = three_boxes(&server);
    server.instance_set_transform(instances[2], Affine3A::from_translation(Vec3::new(-100.0, 0.0, 0.0)));
    assert_eq!(server.instances_cull_aabb(unit_query(), scenario), vec![101, 103]);
}

#[test]
fn cull_skips_other_scenarios_and_freed_instances() {
    let server = server();
    let (scenario, instances) = three_boxes(&server);
    let other = server.scenario_create();

    server.instance_set_scenario(instances[0], other);
    assert!(server.instances_cull_aabb(unit_query(), scenario).is_empty());
    assert_eq!(server.instances_cull_aabb(unit_query(), other), vec![101]);

    server.free_rid(instances[0]);
    assert!(server.instances_cull_aabb(unit_query(), other).is_empty());
}

#[test]
fn unknown_scenario_yields_nothing() {
    let server = server();
    let (scenario, _) = three_boxes(&server);
    server.free_rid(scenario);
    assert!(server.instances_cull_aabb(unit_query(), scenario).is_empty());
    assert!(server.instances_cull_aabb(unit_query(), Rid::INVALID).is_empty());
}

#[test]
fn instances_without_object_id_are_not_reported() {
    let server = server();
    let (scenario, _) = three_boxes(&server);
    let anonymous = server.instance_create();
    server.instance_set_custom_aabb(anonymous, Aabb::from_center_extents(Vec3::ZERO, Vec3::ONE));
    server.instance_set_scenario(anonymous, scenario);
    assert_eq!(server.instances_cull_aabb(unit_query(), scenario), vec![101]);
}

#[test]
fn mesh_instances_use_mesh_bounds() {
    let server = server();
    let scenario = server.scenario_create();
    let instance = server.instance_create2(server.get_test_cube(), scenario);
    server.instance_attach_object_instance_id(instance, 7);
    server.instance_set_transform(instance, Affine3A::from_translation(Vec3::new(0.0, 0.0, 5.0)));

    let hit = Aabb::new(Vec3::new(-0.5, -0.5, 4.5), Vec3::new(0.5, 0.5, 5.5));
    let miss = Aabb::new(Vec3::new(-0.5, -0.5, 1.0), Vec3::new(0.5, 0.5, 2.0));
    assert_eq!(server.instances_cull_aabb(hit, scenario), vec![7]);
    assert!(server.instances_cull_aabb(miss, scenario).is_empty());
}

// ============================================================================
// Ray
// ============================================================================

#[test]
fn cull_ray_hits_boxes_along_segment() {
    let server = server();
    let (scenario, _) = three_boxes(&server);

    let along_x = server.instances_cull_ray(Vec3::new(-5.0, 0.0, 0.0), Vec3::new(50.0, 0.0, 0.0), scenario);
    assert_eq!(along_x, vec![101, 102]);

    let above = server.instances_cull_ray(Vec3::new(-5.0, 3.0, 0.0), Vec3::new(200.0, 3.0, 0.0), scenario);
    assert!(above.is_empty());
}

// ============================================================================
// Convex
// ============================================================================

#[test]
fn cull_convex_matches_box_volume() {
    let server = server();
    let (scenario, _) = three_boxes(&server);
    // Slab 5 <= x <= 15, unbounded elsewhere.
    let planes = [Plane::new(Vec3::X, 15.0), Plane::new(Vec3::NEG_X, -5.0)];
    assert_eq!(server.instances_cull_convex(&planes, scenario), vec![102]);
}

#[test]
fn cull_convex_without_planes_is_empty() {
    let server = server();
    let (scenario, _) = three_boxes(&server);
    assert!(server.instances_cull_convex(&[], scenario).is_empty());
}
