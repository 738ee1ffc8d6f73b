//! Bounding volume hierarchy over handle-keyed boxes.
//!
//! Inserts, moves and removals only touch the item table and mark the tree
//! dirty; [`Bvh::rebuild`] rebuilds it top-down with median splits along the
//! widest centroid axis. Queries against a dirty tree fall back to a linear
//! scan, so results are always exact.

use glam::Vec3;
use rustc_hash::FxHashMap;
use vesper_core::math::{Aabb, Plane};
use vesper_core::Rid;

const LEAF_SIZE: usize = 4;

#[derive(Debug, Clone, Copy)]
enum NodeKind {
    Leaf { start: u32, count: u32 },
    Inner { left: u32, right: u32 },
}

#[derive(Debug, Clone, Copy)]
struct Node {
    aabb: Aabb,
    kind: NodeKind,
}

#[derive(Debug, Default)]
pub struct Bvh {
    items: FxHashMap<Rid, Aabb>,
    nodes: Vec<Node>,
    order: Vec<(Rid, Aabb)>,
    dirty: bool,
}

impl Bvh {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    #[must_use]
    pub fn contains(&self, rid: Rid) -> bool {
        self.items.contains_key(&rid)
    }

    #[must_use]
    pub fn get(&self, rid: Rid) -> Option<Aabb> {
        self.items.get(&rid).copied()
    }

    /// Inserts or moves an item.
    pub fn set(&mut self, rid: Rid, aabb: Aabb) {
        if self.items.insert(rid, aabb) != Some(aabb) {
            self.dirty = true;
        }
    }

    pub fn remove(&mut self, rid: Rid) -> bool {
        let removed = self.items.remove(&rid).is_some();
        self.dirty |= removed;
        removed
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.nodes.clear();
        self.order.clear();
        self.dirty = false;
    }

    pub fn rebuild(&mut self) {
        if !self.dirty {
            return;
        }
        self.nodes.clear();
        self.order = self.items.iter().map(|(r, b)| (*r, *b)).collect();
        // Deterministic layout regardless of hash order.
        self.order.sort_unstable_by_key(|(r, _)| *r);
        if !self.order.is_empty() {
            let count = self.order.len();
            self.build(0, count);
        }
        self.dirty = false;
    }

    fn build(&mut self, start: usize, end: usize) -> u32 {
        let slice = &mut self.order[start..end];
        let bounds = slice[1..].iter().fold(slice[0].1, |acc, (_, b)| acc.merge(b));
        let index = self.nodes.len() as u32;

        if end - start <= LEAF_SIZE {
            self.nodes.push(Node {
                aabb: bounds,
                kind: NodeKind::Leaf {
                    start: start as u32,
                    count: (end - start) as u32,
                },
            });
            return index;
        }

        let (cmin, cmax) = slice.iter().fold(
            (Vec3::splat(f32::INFINITY), Vec3::splat(f32::NEG_INFINITY)),
            |(lo, hi), (_, b)| (lo.min(b.center()), hi.max(b.center())),
        );
        let extent = cmax - cmin;
        let axis = if extent.x >= extent.y && extent.x >= extent.z {
            0
        } else if extent.y >= extent.z {
            1
        } else {
            2
        };
        let mid = slice.len() / 2;
        slice.select_nth_unstable_by(mid, |a, b| a.1.center()[axis].total_cmp(&b.1.center()[axis]));

        self.nodes.push(Node {
            aabb: bounds,
            kind: NodeKind::Leaf { start: 0, count: 0 },
        });
        let left = self.build(start, start + mid);
        let right = self.build(start + mid, end);
        self.nodes[index as usize].kind = NodeKind::Inner { left, right };
        index
    }

    fn query_with(&self, mut hit: impl FnMut(&Aabb) -> bool, out: &mut Vec<Rid>) {
        if self.dirty {
            out.extend(self.items.iter().filter(|(_, b)| hit(b)).map(|(r, _)| *r));
            return;
        }
        if self.nodes.is_empty() {
            return;
        }
        let mut stack = vec![0u32];
        while let Some(i) = stack.pop() {
            let node = &self.nodes[i as usize];
            if !hit(&node.aabb) {
                continue;
            }
            match node.kind {
                NodeKind::Leaf { start, count } => {
                    let items = &self.order[start as usize..(start + count) as usize];
                    out.extend(items.iter().filter(|(_, b)| hit(b)).map(|(r, _)| *r));
                }
                NodeKind::Inner { left, right } => {
                    stack.push(right);
                    stack.push(left);
                }
            }
        }
    }

    pub fn query_aabb(&self, aabb: &Aabb, out: &mut Vec<Rid>) {
        self.query_with(|b| b.intersects(aabb), out);
    }

    pub fn query_segment(&self, from: Vec3, to: Vec3, out: &mut Vec<Rid>) {
        self.query_with(|b| b.intersects_segment(from, to), out);
    }

    pub fn query_convex(&self, planes: &[Plane], out: &mut Vec<Rid>) {
        self.query_with(|b| b.intersects_convex(planes), out);
    }

    pub fn iter(&self) -> impl Iterator<Item = (Rid, &Aabb)> {
        self.items.iter().map(|(r, b)| (*r, b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_core::{RidAllocator, RidKind};

    fn unit_at(x: f32) -> Aabb {
        Aabb::from_center_extents(Vec3::new(x, 0.0, 0.0), Vec3::splat(0.5))
    }

    fn sorted(mut v: Vec<Rid>) -> Vec<Rid> {
        v.sort_unstable();
        v
    }

    #[test]
    fn rebuilt_tree_matches_linear_scan() {
        let alloc = RidAllocator::new();
        let mut bvh = Bvh::new();
        let rids: Vec<Rid> = (0..100).map(|_| alloc.alloc(RidKind::Instance)).collect();
        for (i, r) in rids.iter().enumerate() {
            bvh.set(*r, unit_at(i as f32 * 2.0));
        }
        let probe = Aabb::new(Vec3::new(9.0, -1.0, -1.0), Vec3::new(21.0, 1.0, 1.0));

        let mut linear = Vec::new();
        bvh.query_aabb(&probe, &mut linear);
        bvh.rebuild();
        assert!(!bvh.is_dirty());
        let mut tree = Vec::new();
        bvh.query_aabb(&probe, &mut tree);

        assert_eq!(sorted(linear.clone()), sorted(tree));
        // Centers 10, 12, ..., 20.
        assert_eq!(linear.len(), 6);
    }

    #[test]
    fn segment_and_convex_queries() {
        let alloc = RidAllocator::new();
        let mut bvh = Bvh::new();
        let a = alloc.alloc(RidKind::Instance);
        let b = alloc.alloc(RidKind::Instance);
        bvh.set(a, unit_at(0.0));
        bvh.set(b, unit_at(10.0));
        bvh.rebuild();

        let mut out = Vec::new();
        bvh.query_segment(Vec3::new(-5.0, 0.0, 0.0), Vec3::new(5.0, 0.0, 0.0), &mut out);
        assert_eq!(out, vec![a]);

        out.clear();
        let half_space = [Plane::new(Vec3::NEG_X, -5.0)];
        bvh.query_convex(&half_space, &mut out);
        assert_eq!(out, vec![b]);
    }

    #[test]
    fn removal_marks_dirty() {
        let alloc = RidAllocator::new();
        let mut bvh = Bvh::new();
        let a = alloc.alloc(RidKind::Instance);
        bvh.set(a, unit_at(0.0));
        bvh.rebuild();
        assert!(bvh.remove(a));
        assert!(bvh.is_dirty());
        let mut out = Vec::new();
        bvh.query_aabb(&unit_at(0.0), &mut out);
        assert!(out.is_empty());
    }
}
