//! BVH Consistency Tests
//!
//! The tree must answer every query exactly like a linear scan, whether it
//! was rebuilt or is still dirty after moves and removals.

use glam::Vec3;
use vesper_core::math::{Aabb, Plane};
use vesper_core::{Rid, RidAllocator, RidKind};
use vesper_scene::Bvh;

/// Small deterministic generator so failures reproduce.
struct Lcg(u64);

impl Lcg {
    fn next_f32(&mut self) -> f32 {
        self.0 = self.0.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1_442_695_040_888_963_407);
        ((self.0 >> 40) as f32) / ((1u64 << 24) as f32)
    }

    fn vec3(&mut self, scale: f32) -> Vec3 {
        Vec3::new(self.next_f32(), self.next_f32(), self.next_f32()) * scale
    }

    fn aabb(&mut self) -> Aabb {
        let extents = self.vec3(3.0) + Vec3::splat(0.1);
        Aabb::from_center_extents(self.vec3(100.0), extents)
    }
}

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn populate(count: usize, rng: &mut Lcg) -> (Bvh, Vec<(Rid, Aabb)>) {
    let alloc = RidAllocator::new();
    let mut bvh = Bvh::new();
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        let rid = alloc.alloc(RidKind::Instance);
        let aabb = rng.aabb();
        bvh.set(rid, aabb);
        items.push((rid, aabb));
    }
    (bvh, items)
}

fn brute(items: &[(Rid, Aabb)], hit: impl Fn(&Aabb) -> bool) -> Vec<Rid> {
    let mut out: Vec<Rid> = items.iter().filter(|(_, b)| hit(b)).map(|(r, _)| *r).collect();
    out.sort_unstable();
    out
}

fn sorted(mut v: Vec<Rid>) -> Vec<Rid> {
    v.sort_unstable();
    v
}

fn check_queries(bvh: &Bvh, items: &[(Rid, Aabb)], rng: &mut Lcg) {
    for _ in 0..50 {
        let query = rng.aabb();
        let mut out = Vec::new();
        bvh.query_aabb(&query, &mut out);
        assert_eq!(sorted(out), brute(items, |b| b.intersects(&query)));

        let (from, to) = (rng.vec3(120.0), rng.vec3(120.0));
        let mut out = Vec::new();
        bvh.query_segment(from, to, &mut out);
        assert_eq!(sorted(out), brute(items, |b| b.intersects_segment(from, to)));

        let center = rng.vec3(100.0);
        let planes = [
            Plane::new(Vec3::X, center.x + 10.0),
            Plane::new(Vec3::NEG_X, -(center.x - 10.0)),
            Plane::new(Vec3::Y, center.y + 10.0),
            Plane::new(Vec3::NEG_Y, -(center.y - 10.0)),
        ];
        let mut out = Vec::new();
        bvh.query_convex(&planes, &mut out);
        assert_eq!(sorted(out), brute(items, |b| b.intersects_convex(&planes)));
    }
}

#[test]
fn rebuilt_tree_matches_linear_scan() {
    init_logger();
    let mut rng = Lcg(7);
    let (mut bvh, items) = populate(500, &mut rng);
    bvh.rebuild();
    assert!(!bvh.is_dirty());
    check_queries(&bvh, &items, &mut rng);
}

#[test]
fn dirty_tree_matches_linear_scan() {
    init_logger();
    let mut rng = Lcg(11);
    let (mut bvh, mut items) = populate(300, &mut rng);
    bvh.rebuild();

    for entry in items.iter_mut().step_by(3) {
        entry.1 = rng.aabb();
        bvh.set(entry.0, entry.1);
    }
    let removed: Vec<Rid> = items.iter().skip(1).step_by(7).map(|(r, _)| *r).collect();
    for rid in &removed {
        assert!(bvh.remove(*rid));
    }
    items.retain(|(r, _)| !removed.contains(r));

    assert!(bvh.is_dirty());
    check_queries(&bvh, &items, &mut rng);

    bvh.rebuild();
    assert_eq!(bvh.len(), items.len());
    check_queries(&bvh, &items, &mut rng);
}

#[test]
fn unchanged_boxes_keep_tree_clean() {
    let mut rng = Lcg(3);
    let (mut bvh, items) = populate(10, &mut rng);
    bvh.rebuild();
    for (rid, aabb) in &items {
        bvh.set(*rid, *aabb);
    }
    assert!(!bvh.is_dirty());
}
