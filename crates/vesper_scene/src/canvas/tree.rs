//! The 2D half of the scene graph.
//!
//! [`Scene2D`] owns canvases, canvas items and the 2D light stores, keeps
//! the parent/child links consistent, and flattens a canvas into the
//! z-ordered draw list the canvas renderer consumes.

use glam::Vec2;
use log::{trace, warn};
use rustc_hash::FxHashSet;
use vesper_core::math::{Rect2, Transform2D};
use vesper_core::{Color, Result, Rid, ServerError};
use vesper_resources::{CanvasItemTextureFilter, CanvasItemTextureRepeat, NotifierCallback};

use super::lights::{CanvasLightOccluderStore, CanvasLightStore, CanvasOccluderPolygonStore};
use super::{CanvasChild, CanvasCommand, CanvasGroup, CanvasGroupMode, CanvasItem, CanvasItemStore, CanvasStore};

/// One canvas item ready to be drawn, in canvas space.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawItem {
    pub item: Rid,
    pub transform: Transform2D,
    /// Inherited modulate times self modulate times canvas modulate.
    pub modulate: Color,
    pub z: i32,
    pub clip: Option<Rect2>,
    pub material: Rid,
    pub texture_filter: CanvasItemTextureFilter,
    pub texture_repeat: CanvasItemTextureRepeat,
    pub light_mask: u32,
    pub skeleton: Rid,
    pub distance_field: bool,
    pub copy_to_backbuffer: Option<Rect2>,
    /// Root of the transparent canvas group this item is composited with.
    pub group: Option<(Rid, CanvasGroup)>,
}

/// Inputs for flattening one canvas.
#[derive(Debug, Clone, Copy)]
pub struct FlattenParams {
    /// Canvas-space rect in view; items entirely outside it are skipped.
    pub cull_rect: Option<Rect2>,
    /// Items whose visibility layer misses this mask are not drawn.
    pub visibility_mask: u32,
    /// Physics interpolation fraction.
    pub fraction: f32,
    pub texture_filter: CanvasItemTextureFilter,
    pub texture_repeat: CanvasItemTextureRepeat,
}

impl Default for FlattenParams {
    fn default() -> Self {
        Self {
            cull_rect: None,
            visibility_mask: u32::MAX,
            fraction: 1.0,
            texture_filter: CanvasItemTextureFilter::Linear,
            texture_repeat: CanvasItemTextureRepeat::Disabled,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct FlattenedCanvas {
    pub items: Vec<DrawItem>,
    /// Items with a visibility notifier and the canvas-space notifier rect.
    pub notifiers: Vec<(Rid, Rect2)>,
}

#[derive(Clone, Copy)]
struct Inherited {
    transform: Transform2D,
    modulate: Color,
    z: i32,
    clip: Option<Rect2>,
    material: Rid,
    filter: CanvasItemTextureFilter,
    repeat: CanvasItemTextureRepeat,
    group: Option<(Rid, CanvasGroup)>,
}

#[derive(Default)]
pub struct Scene2D {
    pub canvases: CanvasStore,
    pub items: CanvasItemStore,
    pub lights: CanvasLightStore,
    pub light_occluders: CanvasLightOccluderStore,
    pub occluder_polygons: CanvasOccluderPolygonStore,
}

/// Whether drawing `cmd` needs bounds the command itself cannot report.
fn unbounded(cmd: &CanvasCommand) -> bool {
    matches!(
        cmd,
        CanvasCommand::Mesh { .. } | CanvasCommand::MultiMesh { .. } | CanvasCommand::Particles { .. }
    )
}

impl Scene2D {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn detach(&mut self, item: Rid) {
        let Some(parent) = self.items.get(item).map(|i| i.parent) else {
            return;
        };
        if let Some(canvas) = self.canvases.get_mut(parent) {
            canvas.children.retain(|c| c.item != item);
            canvas.changes.changed();
        } else if let Some(p) = self.items.get_mut(parent) {
            p.children.retain(|c| *c != item);
            p.changes.changed();
        }
        if let Some(i) = self.items.get_mut(item) {
            i.parent = Rid::INVALID;
        }
    }

    /// Re-parents `item` under a canvas, another item, or nothing.
    pub fn item_set_parent(&mut self, item: Rid, parent: Rid) -> Result<()> {
        if !self.items.owns(item) {
            return Err(ServerError::InvalidRid(item));
        }
        if parent.is_valid() && !self.canvases.owns(parent) && !self.items.owns(parent) {
            return Err(ServerError::InvalidRid(parent));
        }
        if self.items.owns(parent) {
            let mut current = parent;
            let mut seen = FxHashSet::default();
            while let Some(i) = self.items.get(current) {
                if current == item {
                    return Err(ServerError::CycleDetected(format!(
                        "canvas item {item:?} cannot be a descendant of itself"
                    )));
                }
                if !seen.insert(current) {
                    break;
                }
                current = i.parent;
            }
        }
        self.detach(item);
        if let Some(canvas) = self.canvases.get_mut(parent) {
            canvas.children.push(CanvasChild {
                item,
                mirroring: Vec2::ZERO,
            });
            canvas.changes.changed();
        } else if let Some(p) = self.items.get_mut(parent) {
            p.children.push(item);
            p.changes.changed();
        }
        let i = self.items.item_mut(item)?;
        i.parent = parent;
        i.changes.changed();
        Ok(())
    }

    /// Frees an item; its children are left without a parent.
    pub fn free_item(&mut self, item: Rid) -> bool {
        if !self.items.owns(item) {
            return false;
        }
        self.detach(item);
        let Some(freed) = self.items.free(item) else {
            return false;
        };
        for child in freed.children {
            if let Some(c) = self.items.get_mut(child) {
                c.parent = Rid::INVALID;
                c.changes.changed();
            }
        }
        true
    }

    /// Frees a canvas; its root items and lights are detached.
    pub fn free_canvas(&mut self, canvas: Rid) -> bool {
        let Some(freed) = self.canvases.free(canvas) else {
            return false;
        };
        for child in freed.children {
            if let Some(c) = self.items.get_mut(child.item) {
                c.parent = Rid::INVALID;
                c.changes.changed();
            }
        }
        self.lights.purge_reference(canvas);
        self.light_occluders.purge_reference(canvas);
        true
    }

    pub fn purge_reference(&mut self, freed: Rid) {
        self.items.purge_reference(freed);
        self.lights.purge_reference(freed);
        self.light_occluders.purge_reference(freed);
    }

    /// Canvas the item ultimately belongs to, if any.
    #[must_use]
    pub fn canvas_of(&self, item: Rid) -> Rid {
        let mut current = item;
        let mut steps = 0usize;
        while let Some(i) = self.items.get(current) {
            steps += 1;
            if steps > 1 << 16 {
                break;
            }
            if self.canvases.owns(i.parent) {
                return i.parent;
            }
            current = i.parent;
        }
        Rid::INVALID
    }

    /// Orders the children of `item` for drawing.
    fn sorted_children(&self, item: &CanvasItem, parent_xform: &Transform2D, fraction: f32) -> Vec<Rid> {
        let mut kids: Vec<(Rid, i32, f32)> = item
            .children
            .iter()
            .filter_map(|c| {
                let child = self.items.get(*c)?;
                let y = (*parent_xform * child.interpolated_transform(fraction)).translation.y;
                Some((*c, child.draw_index, y))
            })
            .collect();
        if item.sort_children_by_y {
            kids.sort_by(|a, b| a.1.cmp(&b.1).then(a.2.total_cmp(&b.2)));
        } else {
            kids.sort_by_key(|k| k.1);
        }
        kids.into_iter().map(|k| k.0).collect()
    }

    /// Flattens a canvas into a z-ordered draw list.
    #[must_use]
    pub fn flatten(&self, canvas: Rid, params: &FlattenParams) -> FlattenedCanvas {
        let mut out = FlattenedCanvas::default();
        let Some(c) = self.canvases.get(canvas) else {
            return out;
        };
        let mut collected: Vec<DrawItem> = Vec::new();
        let mut roots: Vec<CanvasChild> = c.children.clone();
        roots.sort_by_key(|r| self.items.get(r.item).map_or(0, |i| i.draw_index));
        for root in roots {
            let mut offsets = vec![Vec2::ZERO];
            if root.mirroring.x != 0.0 {
                offsets.push(Vec2::new(root.mirroring.x, 0.0));
            }
            if root.mirroring.y != 0.0 {
                offsets.push(Vec2::new(0.0, root.mirroring.y));
            }
            if root.mirroring.x != 0.0 && root.mirroring.y != 0.0 {
                offsets.push(root.mirroring);
            }
            for offset in offsets {
                let inherited = Inherited {
                    transform: Transform2D::from_translation(offset),
                    modulate: c.modulate,
                    z: 0,
                    clip: None,
                    material: Rid::INVALID,
                    filter: params.texture_filter,
                    repeat: params.texture_repeat,
                    group: None,
                };
                self.visit(root.item, &inherited, params, true, 0, &mut collected, &mut out.notifiers);
            }
        }
        // Stable: equal z keeps tree order.
        collected.sort_by_key(|d| d.z);
        out.items = collected;
        out
    }

    #[allow(clippy::too_many_arguments)]
    fn visit(
        &self,
        rid: Rid,
        parent: &Inherited,
        params: &FlattenParams,
        apply_repeat: bool,
        depth: usize,
        out: &mut Vec<DrawItem>,
        notifiers: &mut Vec<(Rid, Rect2)>,
    ) {
        let Some(item) = self.items.get(rid) else { return };
        if !item.visible || depth > 1024 {
            return;
        }
        if apply_repeat && item.repeat_times > 0 && item.repeat_size != Vec2::ZERO {
            let t = item.repeat_times;
            for y in -t..=t {
                for x in -t..=t {
                    let offset = item.repeat_size * Vec2::new(x as f32, y as f32);
                    let shifted = Inherited {
                        transform: parent.transform * Transform2D::from_translation(offset),
                        ..*parent
                    };
                    self.visit(rid, &shifted, params, false, depth, out, notifiers);
                }
            }
            return;
        }

        let transform = parent.transform * item.interpolated_transform(params.fraction);
        let modulate = parent.modulate * item.modulate;
        let z = if item.z_as_relative {
            (parent.z + item.z_index).clamp(super::CANVAS_ITEM_Z_MIN, super::CANVAS_ITEM_Z_MAX)
        } else {
            item.z_index
        };
        // Members of a transparent group stay at the group's depth.
        let z = if parent.group.is_some() { parent.z } else { z };
        let material = if item.use_parent_material { parent.material } else { item.material };
        let filter = item.texture_filter.resolve(parent.filter);
        let repeat = item.texture_repeat.resolve(parent.repeat);

        let local_rect = item.rect();
        let global_rect = local_rect.transformed(&transform);
        let mut clip = parent.clip;
        // A clipping item clips its own commands and its whole subtree.
        let clips = item.clip || matches!(item.group.mode, CanvasGroupMode::ClipOnly | CanvasGroupMode::ClipAndDraw);
        if clips {
            clip = Some(clip.map_or(global_rect, |c| c.intersection(&global_rect)));
        }
        let group = match item.group.mode {
            CanvasGroupMode::Transparent if parent.group.is_none() => Some((rid, item.group)),
            _ => parent.group,
        };

        if let Some(n) = &item.notifier {
            notifiers.push((rid, n.rect.transformed(&transform)));
        }

        let inherited = Inherited {
            transform,
            modulate,
            z,
            clip,
            material,
            filter,
            repeat,
            group,
        };

        let children = self.sorted_children(item, &transform, params.fraction);
        let (behind, front): (Vec<Rid>, Vec<Rid>) = children
            .into_iter()
            .partition(|c| self.items.get(*c).is_some_and(|i| i.draw_behind_parent));
        for child in behind {
            self.visit(child, &inherited, params, true, depth + 1, out, notifiers);
        }

        let draws_self = item.group.mode != CanvasGroupMode::ClipOnly
            && item.visibility_layer & params.visibility_mask != 0
            && (!item.commands.is_empty() || item.copy_to_backbuffer.is_some());
        let in_view = match params.cull_rect {
            Some(view) if !item.commands.iter().any(unbounded) && item.commands.iter().any(|c| c.local_rect().is_some()) => {
                view.intersects(&global_rect) || (item.custom_rect.is_none() && !global_rect.has_area() && view.has_point(global_rect.position))
            }
            _ => true,
        };
        if draws_self && in_view {
            out.push(DrawItem {
                item: rid,
                transform,
                modulate: modulate * item.self_modulate,
                z,
                clip,
                material,
                texture_filter: filter,
                texture_repeat: repeat,
                light_mask: item.light_mask,
                skeleton: item.skeleton,
                distance_field: item.distance_field,
                copy_to_backbuffer: item.copy_to_backbuffer.map(|r| r.transformed(&transform)),
                group,
            });
        } else if draws_self {
            trace!("canvas item {rid:?} culled");
        }

        for child in front {
            self.visit(child, &inherited, params, true, depth + 1, out, notifiers);
        }
    }

    /// Updates notifier state from the set of items whose notifier rect was
    /// on screen this frame; returns the callbacks to run.
    pub fn apply_notifiers(&mut self, visible: &FxHashSet<Rid>) -> Vec<NotifierCallback> {
        let mut fire = Vec::new();
        for (rid, item) in self.items.iter_mut() {
            let Some(n) = item.notifier.as_mut() else { continue };
            let now = visible.contains(&rid);
            if now == n.visible {
                continue;
            }
            n.visible = now;
            let cb = if now { n.on_enter.clone() } else { n.on_exit.clone() };
            fire.extend(cb);
        }
        fire
    }

    /// Advances physics interpolation for items, lights and occluders.
    pub fn physics_tick(&mut self) {
        for (_, item) in self.items.iter_mut() {
            if item.interpolated {
                item.prev_transform = item.transform;
            }
        }
        let lights: Vec<Rid> = self.lights.iter().map(|(r, _)| r).collect();
        for rid in lights {
            if let Some(l) = self.lights.get_mut(rid) {
                l.prev_transform = l.transform;
            }
        }
        let occluders: Vec<Rid> = self.light_occluders.iter().map(|(r, _)| r).collect();
        for rid in occluders {
            if let Some(o) = self.light_occluders.get_mut(rid) {
                o.prev_transform = o.transform;
            }
        }
    }

    /// Canvas-space bounds of an item, for diagnostics.
    #[must_use]
    pub fn debug_item_rect(&self, item: Rid) -> Rect2 {
        let Some(i) = self.items.get(item) else {
            warn!("debug_canvas_item_get_rect: invalid handle {item:?}");
            return Rect2::ZERO;
        };
        let mut xform = i.transform;
        let mut current = i.parent;
        let mut steps = 0;
        while let Some(p) = self.items.get(current) {
            xform = p.transform * xform;
            current = p.parent;
            steps += 1;
            if steps > 1024 {
                break;
            }
        }
        i.rect().transformed(&xform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_core::{RidAllocator, RidKind};

    struct Fixture {
        alloc: RidAllocator,
        scene: Scene2D,
        canvas: Rid,
    }

    fn fixture() -> Fixture {
        let alloc = RidAllocator::new();
        let mut scene = Scene2D::new();
        let canvas = alloc.alloc(RidKind::Canvas);
        scene.canvases.initialize(canvas);
        Fixture { alloc, scene, canvas }
    }

    impl Fixture {
        fn item(&mut self, parent: Rid) -> Rid {
            let rid = self.alloc.alloc(RidKind::CanvasItem);
            self.scene.items.initialize(rid);
            self.scene.item_set_parent(rid, parent).unwrap();
            self.scene
                .items
                .add_command(
                    rid,
                    CanvasCommand::Rect {
                        rect: Rect2::from_xywh(0.0, 0.0, 10.0, 10.0),
                        color: Color::WHITE,
                        antialiased: false,
                    },
                )
                .unwrap();
            rid
        }

        fn order(&self) -> Vec<Rid> {
            self.scene
                .flatten(self.canvas, &FlattenParams::default())
                .items
                .iter()
                .map(|d| d.item)
                .collect()
        }
    }

    #[test]
    fn parent_draws_before_children_unless_behind() {
        let mut f = fixture();
        let root = f.item(f.canvas);
        let a = f.item(root);
        let b = f.item(root);
        assert_eq!(f.order(), vec![root, a, b]);
        f.scene.items.set_draw_behind_parent(b, true).unwrap();
        assert_eq!(f.order(), vec![b, root, a]);
    }

    #[test]
    fn z_index_sorts_across_the_tree() {
        let mut f = fixture();
        let root = f.item(f.canvas);
        let a = f.item(root);
        let b = f.item(f.canvas);
        f.scene.items.set_z_index(a, 5).unwrap();
        assert_eq!(f.order(), vec![root, b, a]);
        // Relative z accumulates through parents.
        f.scene.items.set_z_index(root, -10).unwrap();
        assert_eq!(f.order(), vec![root, a, b]);
    }

    #[test]
    fn y_sort_orders_children() {
        let mut f = fixture();
        let root = f.item(f.canvas);
        let low = f.item(root);
        let high = f.item(root);
        f.scene
            .items
            .set_transform(low, Transform2D::from_translation(Vec2::new(0.0, 50.0)))
            .unwrap();
        assert_eq!(f.order(), vec![root, low, high]);
        f.scene.items.set_sort_children_by_y(root, true).unwrap();
        assert_eq!(f.order(), vec![root, high, low]);
    }

    #[test]
    fn hidden_items_hide_their_subtree() {
        let mut f = fixture();
        let root = f.item(f.canvas);
        f.item(root);
        f.scene.items.set_visible(root, false).unwrap();
        assert!(f.order().is_empty());
    }

    #[test]
    fn reparenting_rejects_cycles() {
        let mut f = fixture();
        let root = f.item(f.canvas);
        let child = f.item(root);
        assert!(f.scene.item_set_parent(root, child).is_err());
        assert_eq!(f.scene.canvas_of(child), f.canvas);
    }

    #[test]
    fn freeing_a_parent_orphans_children() {
        let mut f = fixture();
        let root = f.item(f.canvas);
        let child = f.item(root);
        assert!(f.scene.free_item(root));
        assert_eq!(f.scene.items.get(child).unwrap().parent, Rid::INVALID);
        assert!(f.order().is_empty());
        assert!(!f.scene.free_item(root));
    }

    #[test]
    fn modulate_inherits_but_self_modulate_does_not() {
        let mut f = fixture();
        let root = f.item(f.canvas);
        let child = f.item(root);
        f.scene.items.set_modulate(root, Color::rgba(1.0, 0.0, 0.0, 1.0)).unwrap();
        f.scene.items.set_self_modulate(root, Color::rgba(0.5, 0.5, 0.5, 1.0)).unwrap();
        let flat = f.scene.flatten(f.canvas, &FlattenParams::default());
        assert_eq!(flat.items[0].modulate, Color::rgba(0.5, 0.0, 0.0, 1.0));
        assert_eq!(flat.items[1].item, child);
        assert_eq!(flat.items[1].modulate, Color::rgba(1.0, 0.0, 0.0, 1.0));
    }

    #[test]
    fn clip_applies_to_the_item_and_its_children() {
        let mut f = fixture();
        let root = f.item(f.canvas);
        let child = f.item(root);
        let bounds = Rect2::from_xywh(0.0, 0.0, 5.0, 5.0);
        f.scene.items.set_custom_rect(root, Some(bounds)).unwrap();
        f.scene.items.set_clip(root, true).unwrap();

        let flat = f.scene.flatten(f.canvas, &FlattenParams::default());
        assert_eq!(flat.items[0].item, root);
        assert_eq!(flat.items[0].clip, Some(bounds));
        assert_eq!(flat.items[1].item, child);
        assert_eq!(flat.items[1].clip, Some(bounds));
    }

    #[test]
    fn cull_rect_skips_offscreen_items() {
        let mut f = fixture();
        let near = f.item(f.canvas);
        let far = f.item(f.canvas);
        f.scene
            .items
            .set_transform(far, Transform2D::from_translation(Vec2::new(500.0, 0.0)))
            .unwrap();
        let params = FlattenParams {
            cull_rect: Some(Rect2::from_xywh(0.0, 0.0, 100.0, 100.0)),
            ..Default::default()
        };
        let items: Vec<Rid> = f.scene.flatten(f.canvas, &params).items.iter().map(|d| d.item).collect();
        assert_eq!(items, vec![near]);
    }

    #[test]
    fn notifiers_fire_on_edges() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;
        let mut f = fixture();
        let item = f.item(f.canvas);
        let entered = Arc::new(AtomicUsize::new(0));
        let e = entered.clone();
        f.scene
            .items
            .set_visibility_notifier(
                item,
                Some(Rect2::from_xywh(0.0, 0.0, 1.0, 1.0)),
                Some(Arc::new(move || {
                    e.fetch_add(1, Ordering::SeqCst);
                })),
                None,
            )
            .unwrap();
        let mut visible = FxHashSet::default();
        visible.insert(item);
        for cb in f.scene.apply_notifiers(&visible) {
            cb();
        }
        assert!(f.scene.apply_notifiers(&visible).is_empty());
        assert_eq!(entered.load(Ordering::SeqCst), 1);
    }
}
