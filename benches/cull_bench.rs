use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};

use vesper::prelude::*;

/// A 32×32×8 grid of unit boxes, 4 units apart, each with an object id.
fn populated_scenario() -> (RenderingServer, Rid, Vec<Rid>) {
    let server = RenderingServer::new(ServerSettings::default()).expect("headless server starts");
    let scenario = server.scenario_create();
    let mut instances = Vec::new();
    let mut id = 1;
    for x in 0..32 {
        for y in 0..8 {
            for z in 0..32 {
                let instance = server.instance_create();
                let center = Vec3::new(x as f32, y as f32, z as f32) * 4.0;
                server.instance_set_custom_aabb(instance, Aabb::from_center_extents(Vec3::ZERO, Vec3::ONE));
                server.instance_set_transform(instance, Affine3A::from_translation(center));
                server.instance_attach_object_instance_id(instance, id);
                server.instance_set_scenario(instance, scenario);
                instances.push(instance);
                id += 1;
            }
        }
    }
    // Builds the index once so the query benches measure queries only.
    server.instances_cull_aabb(Aabb::ZERO, scenario);
    (server, scenario, instances)
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

fn bench_cull_aabb(c: &mut Criterion) {
    let (server, scenario, _) = populated_scenario();
    let query = Aabb::new(Vec3::splat(10.0), Vec3::splat(30.0));
    c.bench_function("cull_aabb_8k", |b| {
        b.iter(|| server.instances_cull_aabb(black_box(query), scenario));
    });
}

fn bench_cull_ray(c: &mut Criterion) {
    let (server, scenario, _) = populated_scenario();
    c.bench_function("cull_ray_8k", |b| {
        b.iter(|| {
            server.instances_cull_ray(
                black_box(Vec3::new(-10.0, 2.0, -10.0)),
                black_box(Vec3::new(140.0, 2.0, 140.0)),
                scenario,
            )
        });
    });
}

fn bench_cull_convex(c: &mut Criterion) {
    let (server, scenario, _) = populated_scenario();
    // Axis-aligned slab around the center of the grid.
    let planes = [
        Plane::new(Vec3::X, 80.0),
        Plane::new(Vec3::NEG_X, -40.0),
        Plane::new(Vec3::Z, 80.0),
        Plane::new(Vec3::NEG_Z, -40.0),
    ];
    c.bench_function("cull_convex_8k", |b| {
        b.iter(|| server.instances_cull_convex(black_box(&planes), scenario));
    });
}

// ---------------------------------------------------------------------------
// Index maintenance
// ---------------------------------------------------------------------------

fn bench_move_and_query(c: &mut Criterion) {
    let (server, scenario, instances) = populated_scenario();
    let query = Aabb::new(Vec3::ZERO, Vec3::splat(8.0));
    let mut step = 0.0f32;
    c.bench_function("move_64_then_cull_8k", |b| {
        b.iter(|| {
            step += 0.25;
            for (i, instance) in instances.iter().take(64).enumerate() {
                let t = Vec3::new(i as f32 * 4.0, step.sin(), 0.0);
                server.instance_set_transform(*instance, Affine3A::from_translation(t));
            }
            server.instances_cull_aabb(black_box(query), scenario)
        });
    });
}

criterion_group!(benches, bench_cull_aabb, bench_cull_ray, bench_cull_convex, bench_move_and_query);
criterion_main!(benches);
