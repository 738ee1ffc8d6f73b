//! Canvases and canvas items
//!
//! A canvas is the root of a 2D world. Canvas items form a tree under it;
//! each item carries a 2D transform, draw state and an ordered list of
//! [`CanvasCommand`]s that are replayed every frame until cleared.

pub mod commands;
pub mod lights;
pub mod tessellate;
pub mod tree;

use glam::Vec2;
use vesper_core::math::{Rect2, Transform2D};
use vesper_core::{ordinal_enum, ChangeTracker, Color, Result, Rid, RidKind, RidOwner, ServerError};
use vesper_resources::{CanvasItemTextureFilter, CanvasItemTextureRepeat, NotifierCallback};

pub use commands::{CanvasCommand, NinePatchAxisMode};

pub const CANVAS_ITEM_Z_MIN: i32 = -4096;
pub const CANVAS_ITEM_Z_MAX: i32 = 4096;

ordinal_enum! {
    #[derive(Default)]
    pub enum CanvasGroupMode {
        #[default]
        Disabled = 0,
        ClipOnly = 1,
        ClipAndDraw = 2,
        Transparent = 3,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CanvasGroup {
    pub mode: CanvasGroupMode,
    pub clear_margin: f32,
    pub fit_empty: bool,
    pub fit_margin: f32,
    pub blur_mipmaps: bool,
}

/// Rect that reports entering and leaving the visible area.
#[derive(Clone)]
pub struct CanvasNotifier {
    pub rect: Rect2,
    pub on_enter: Option<NotifierCallback>,
    pub on_exit: Option<NotifierCallback>,
    pub visible: bool,
}

impl std::fmt::Debug for CanvasNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CanvasNotifier")
            .field("rect", &self.rect)
            .field("visible", &self.visible)
            .finish_non_exhaustive()
    }
}

/// A root item of a canvas with its mirroring offset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanvasChild {
    pub item: Rid,
    pub mirroring: Vec2,
}

#[derive(Debug, Clone)]
pub struct Canvas {
    pub children: Vec<CanvasChild>,
    pub modulate: Color,
    pub disable_scale: bool,
    pub changes: ChangeTracker,
}

impl Default for Canvas {
    fn default() -> Self {
        Self {
            children: Vec::new(),
            modulate: Color::WHITE,
            disable_scale: false,
            changes: ChangeTracker::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CanvasItem {
    /// A canvas (for root items), another item, or invalid.
    pub parent: Rid,
    pub children: Vec<Rid>,
    pub visible: bool,
    pub light_mask: u32,
    pub visibility_layer: u32,
    pub transform: Transform2D,
    pub prev_transform: Transform2D,
    pub interpolated: bool,
    pub clip: bool,
    pub distance_field: bool,
    pub custom_rect: Option<Rect2>,
    pub modulate: Color,
    pub self_modulate: Color,
    pub draw_behind_parent: bool,
    pub z_index: i32,
    pub z_as_relative: bool,
    pub copy_to_backbuffer: Option<Rect2>,
    pub sort_children_by_y: bool,
    pub draw_index: i32,
    pub texture_filter: CanvasItemTextureFilter,
    pub texture_repeat: CanvasItemTextureRepeat,
    pub material: Rid,
    pub use_parent_material: bool,
    pub skeleton: Rid,
    pub notifier: Option<CanvasNotifier>,
    pub group: CanvasGroup,
    pub repeat_size: Vec2,
    pub repeat_times: i32,
    pub commands: Vec<CanvasCommand>,
    pub changes: ChangeTracker,
}

impl Default for CanvasItem {
    fn default() -> Self {
        Self {
            parent: Rid::INVALID,
            children: Vec::new(),
            visible: true,
            light_mask: 1,
            visibility_layer: 1,
            transform: Transform2D::IDENTITY,
            prev_transform: Transform2D::IDENTITY,
            interpolated: false,
            clip: false,
            distance_field: false,
            custom_rect: None,
            modulate: Color::WHITE,
            self_modulate: Color::WHITE,
            draw_behind_parent: false,
            z_index: 0,
            z_as_relative: true,
            copy_to_backbuffer: None,
            sort_children_by_y: false,
            draw_index: 0,
            texture_filter: CanvasItemTextureFilter::Default,
            texture_repeat: CanvasItemTextureRepeat::Default,
            material: Rid::INVALID,
            use_parent_material: false,
            skeleton: Rid::INVALID,
            notifier: None,
            group: CanvasGroup::default(),
            repeat_size: Vec2::ZERO,
            repeat_times: 0,
            commands: Vec::new(),
            changes: ChangeTracker::new(),
        }
    }
}

impl CanvasItem {
    /// Local bounds of the recorded commands, `SetTransform`s applied.
    #[must_use]
    pub fn command_rect(&self) -> Option<Rect2> {
        let mut xform = Transform2D::IDENTITY;
        let mut rect: Option<Rect2> = None;
        for cmd in &self.commands {
            if let CanvasCommand::SetTransform(t) = cmd {
                xform = *t;
                continue;
            }
            if let Some(r) = cmd.local_rect() {
                let r = r.transformed(&xform);
                rect = Some(rect.map_or(r, |acc| acc.merge(&r)));
            }
        }
        rect
    }

    /// Custom rect when set, else the command bounds.
    #[must_use]
    pub fn rect(&self) -> Rect2 {
        self.custom_rect.or_else(|| self.command_rect()).unwrap_or(Rect2::ZERO)
    }

    /// Transform blended between the last two physics ticks.
    #[must_use]
    pub fn interpolated_transform(&self, fraction: f32) -> Transform2D {
        if !self.interpolated {
            return self.transform;
        }
        let f = fraction.clamp(0.0, 1.0);
        Transform2D::from_mat2_translation(
            glam::Mat2::from_cols(
                self.prev_transform.matrix2.x_axis.lerp(self.transform.matrix2.x_axis, f),
                self.prev_transform.matrix2.y_axis.lerp(self.transform.matrix2.y_axis, f),
            ),
            self.prev_transform.translation.lerp(self.transform.translation, f),
        )
    }
}

/// Rejects malformed commands before they are recorded.
pub fn validate_command(cmd: &CanvasCommand) -> Result<()> {
    let colors_ok = |n: usize, colors: usize| colors <= 1 || colors == n;
    match cmd {
        CanvasCommand::Polyline { points, colors, .. } => {
            if points.len() < 2 {
                return Err(ServerError::InvalidArgument("polyline needs at least two points".into()));
            }
            if !colors_ok(points.len(), colors.len()) {
                return Err(ServerError::SizeMismatch {
                    what: "polyline colors",
                    expected: points.len(),
                    actual: colors.len(),
                });
            }
        }
        CanvasCommand::Multiline { points, colors, .. } => {
            if points.len() < 2 || points.len() % 2 != 0 {
                return Err(ServerError::InvalidArgument("multiline needs pairs of points".into()));
            }
            if !colors_ok(points.len() / 2, colors.len()) {
                return Err(ServerError::SizeMismatch {
                    what: "multiline colors",
                    expected: points.len() / 2,
                    actual: colors.len(),
                });
            }
        }
        CanvasCommand::Circle { radius, .. } if *radius < 0.0 => {
            return Err(ServerError::InvalidArgument(format!("circle radius {radius} is negative")));
        }
        CanvasCommand::Primitive { points, colors, uvs, .. } => {
            if !(1..=4).contains(&points.len()) {
                return Err(ServerError::OutOfRange {
                    what: "primitive points",
                    index: points.len(),
                    limit: 4,
                });
            }
            if !colors_ok(points.len(), colors.len()) || !(uvs.is_empty() || uvs.len() == points.len()) {
                return Err(ServerError::InvalidArgument("primitive colors or uvs do not match points".into()));
            }
        }
        CanvasCommand::Polygon { points, colors, uvs, .. } => {
            if points.len() < 3 {
                return Err(ServerError::InvalidArgument("polygon needs at least three points".into()));
            }
            if !colors_ok(points.len(), colors.len()) || !(uvs.is_empty() || uvs.len() == points.len()) {
                return Err(ServerError::InvalidArgument("polygon colors or uvs do not match points".into()));
            }
            if tessellate::triangulate(points).is_empty() {
                return Err(ServerError::InvalidArgument("polygon could not be triangulated".into()));
            }
        }
        CanvasCommand::TriangleArray {
            indices,
            points,
            colors,
            uvs,
            bones,
            weights,
            ..
        } => {
            let n = points.len();
            if indices.len() % 3 != 0 || indices.iter().any(|i| *i as usize >= n) {
                return Err(ServerError::InvalidArgument("triangle array indices are invalid".into()));
            }
            if indices.is_empty() && n % 3 != 0 {
                return Err(ServerError::InvalidArgument("triangle array needs whole triangles".into()));
            }
            if !colors_ok(n, colors.len()) || !(uvs.is_empty() || uvs.len() == n) {
                return Err(ServerError::InvalidArgument("triangle array colors or uvs do not match points".into()));
            }
            if !(bones.is_empty() || bones.len() == n * 4) || bones.len() != weights.len() {
                return Err(ServerError::SizeMismatch {
                    what: "triangle array bones",
                    expected: n * 4,
                    actual: bones.len(),
                });
            }
        }
        CanvasCommand::AnimationSlice { length, begin, end, .. } => {
            if *length < 0.0 || begin > end {
                return Err(ServerError::InvalidArgument("animation slice window is invalid".into()));
            }
        }
        _ => {}
    }
    Ok(())
}

pub struct CanvasStore {
    owner: RidOwner<Canvas>,
}

impl Default for CanvasStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CanvasStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            owner: RidOwner::new(RidKind::Canvas),
        }
    }

    pub fn initialize(&mut self, rid: Rid) {
        self.owner.initialize(rid, Canvas::default());
    }

    #[must_use]
    pub fn get(&self, rid: Rid) -> Option<&Canvas> {
        self.owner.get(rid)
    }

    pub fn get_mut(&mut self, rid: Rid) -> Option<&mut Canvas> {
        self.owner.get_mut(rid)
    }

    #[must_use]
    pub fn owns(&self, rid: Rid) -> bool {
        self.owner.owns(rid)
    }

    pub fn free(&mut self, rid: Rid) -> Option<Canvas> {
        self.owner.take(rid)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Rid, &Canvas)> {
        self.owner.iter()
    }

    fn canvas_mut(&mut self, rid: Rid) -> Result<&mut Canvas> {
        self.owner.get_mut(rid).ok_or(ServerError::InvalidRid(rid))
    }

    pub fn set_modulate(&mut self, rid: Rid, color: Color) -> Result<()> {
        let c = self.canvas_mut(rid)?;
        c.modulate = color;
        c.changes.changed();
        Ok(())
    }

    pub fn set_disable_scale(&mut self, rid: Rid, disable: bool) -> Result<()> {
        let c = self.canvas_mut(rid)?;
        c.disable_scale = disable;
        c.changes.changed();
        Ok(())
    }

    /// Draws a mirrored copy of a root item offset by `mirroring`.
    pub fn set_item_mirroring(&mut self, rid: Rid, item: Rid, mirroring: Vec2) -> Result<()> {
        let c = self.canvas_mut(rid)?;
        let child = c
            .children
            .iter_mut()
            .find(|ch| ch.item == item)
            .ok_or_else(|| ServerError::InvalidArgument(format!("{item:?} is not a root item of {rid:?}")))?;
        child.mirroring = mirroring;
        c.changes.changed();
        Ok(())
    }
}

pub struct CanvasItemStore {
    owner: RidOwner<CanvasItem>,
}

impl Default for CanvasItemStore {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! item_setter {
    ($name:ident, $field:ident : $ty:ty) => {
        pub fn $name(&mut self, rid: Rid, value: $ty) -> Result<()> {
            let item = self.item_mut(rid)?;
            item.$field = value;
            item.changes.changed();
            Ok(())
        }
    };
}

impl CanvasItemStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            owner: RidOwner::new(RidKind::CanvasItem),
        }
    }

    pub fn initialize(&mut self, rid: Rid) {
        self.owner.initialize(rid, CanvasItem::default());
    }

    #[must_use]
    pub fn get(&self, rid: Rid) -> Option<&CanvasItem> {
        self.owner.get(rid)
    }

    pub fn get_mut(&mut self, rid: Rid) -> Option<&mut CanvasItem> {
        self.owner.get_mut(rid)
    }

    #[must_use]
    pub fn owns(&self, rid: Rid) -> bool {
        self.owner.owns(rid)
    }

    pub fn free(&mut self, rid: Rid) -> Option<CanvasItem> {
        self.owner.take(rid)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Rid, &CanvasItem)> {
        self.owner.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Rid, &mut CanvasItem)> {
        self.owner.iter_mut()
    }

    pub(crate) fn item_mut(&mut self, rid: Rid) -> Result<&mut CanvasItem> {
        self.owner.get_mut(rid).ok_or(ServerError::InvalidRid(rid))
    }

    item_setter!(set_visible, visible: bool);
    item_setter!(set_light_mask, light_mask: u32);
    item_setter!(set_visibility_layer, visibility_layer: u32);
    item_setter!(set_clip, clip: bool);
    item_setter!(set_distance_field_mode, distance_field: bool);
    item_setter!(set_modulate, modulate: Color);
    item_setter!(set_self_modulate, self_modulate: Color);
    item_setter!(set_draw_behind_parent, draw_behind_parent: bool);
    item_setter!(set_z_as_relative_to_parent, z_as_relative: bool);
    item_setter!(set_sort_children_by_y, sort_children_by_y: bool);
    item_setter!(set_draw_index, draw_index: i32);
    item_setter!(set_default_texture_filter, texture_filter: CanvasItemTextureFilter);
    item_setter!(set_default_texture_repeat, texture_repeat: CanvasItemTextureRepeat);
    item_setter!(set_material, material: Rid);
    item_setter!(set_use_parent_material, use_parent_material: bool);
    item_setter!(attach_skeleton, skeleton: Rid);
    item_setter!(set_interpolated, interpolated: bool);

    pub fn set_transform(&mut self, rid: Rid, transform: Transform2D) -> Result<()> {
        let item = self.item_mut(rid)?;
        item.prev_transform = if item.interpolated { item.transform } else { transform };
        item.transform = transform;
        item.changes.changed();
        Ok(())
    }

    pub fn reset_physics_interpolation(&mut self, rid: Rid) -> Result<()> {
        let item = self.item_mut(rid)?;
        item.prev_transform = item.transform;
        Ok(())
    }

    /// Applies `transform` on top of both the current and previous
    /// transforms, keeping the interpolation in step.
    pub fn transform_physics_interpolation(&mut self, rid: Rid, transform: Transform2D) -> Result<()> {
        let item = self.item_mut(rid)?;
        item.prev_transform = transform * item.prev_transform;
        item.transform = transform * item.transform;
        item.changes.changed();
        Ok(())
    }

    /// Clamped to `[CANVAS_ITEM_Z_MIN, CANVAS_ITEM_Z_MAX]`.
    pub fn set_z_index(&mut self, rid: Rid, z: i32) -> Result<()> {
        let item = self.item_mut(rid)?;
        item.z_index = z.clamp(CANVAS_ITEM_Z_MIN, CANVAS_ITEM_Z_MAX);
        item.changes.changed();
        Ok(())
    }

    /// `None` returns the item to its command bounds.
    pub fn set_custom_rect(&mut self, rid: Rid, rect: Option<Rect2>) -> Result<()> {
        let item = self.item_mut(rid)?;
        item.custom_rect = rect;
        item.changes.changed();
        Ok(())
    }

    /// `None` disables the copy.
    pub fn set_copy_to_backbuffer(&mut self, rid: Rid, rect: Option<Rect2>) -> Result<()> {
        let item = self.item_mut(rid)?;
        item.copy_to_backbuffer = rect;
        item.changes.changed();
        Ok(())
    }

    pub fn set_canvas_group_mode(&mut self, rid: Rid, group: CanvasGroup) -> Result<()> {
        let item = self.item_mut(rid)?;
        item.group = CanvasGroup {
            clear_margin: group.clear_margin.max(0.0),
            fit_margin: group.fit_margin.max(0.0),
            ..group
        };
        item.changes.changed();
        Ok(())
    }

    pub fn set_repeat(&mut self, rid: Rid, size: Vec2, times: i32) -> Result<()> {
        if times < 0 {
            return Err(ServerError::InvalidArgument(format!("repeat times {times} is negative")));
        }
        let item = self.item_mut(rid)?;
        item.repeat_size = size;
        item.repeat_times = times;
        item.changes.changed();
        Ok(())
    }

    /// `None` as the rect removes the notifier.
    pub fn set_visibility_notifier(
        &mut self,
        rid: Rid,
        rect: Option<Rect2>,
        on_enter: Option<NotifierCallback>,
        on_exit: Option<NotifierCallback>,
    ) -> Result<()> {
        let item = self.item_mut(rid)?;
        item.notifier = rect.map(|rect| CanvasNotifier {
            rect,
            on_enter,
            on_exit,
            visible: false,
        });
        item.changes.changed();
        Ok(())
    }

    /// Appends a command after validating it.
    pub fn add_command(&mut self, rid: Rid, cmd: CanvasCommand) -> Result<()> {
        validate_command(&cmd)?;
        let item = self.item_mut(rid)?;
        item.commands.push(cmd);
        item.changes.changed();
        Ok(())
    }

    pub fn clear(&mut self, rid: Rid) -> Result<()> {
        let item = self.item_mut(rid)?;
        item.commands.clear();
        item.changes.changed();
        Ok(())
    }

    #[must_use]
    pub fn commands(&self, rid: Rid) -> &[CanvasCommand] {
        self.owner.get(rid).map_or(&[], |i| i.commands.as_slice())
    }

    /// Drops references to a freed resource from item state and commands.
    pub fn purge_reference(&mut self, freed: Rid) {
        for (_, item) in self.owner.iter_mut() {
            let mut touched = false;
            for r in [&mut item.material, &mut item.skeleton] {
                if *r == freed {
                    *r = Rid::INVALID;
                    touched = true;
                }
            }
            for cmd in &mut item.commands {
                touched |= cmd.purge_reference(freed);
            }
            if touched {
                item.changes.changed();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;
    use vesper_core::RidAllocator;

    fn item() -> (RidAllocator, CanvasItemStore, Rid) {
        let alloc = RidAllocator::new();
        let mut store = CanvasItemStore::new();
        let rid = alloc.alloc(RidKind::CanvasItem);
        store.initialize(rid);
        (alloc, store, rid)
    }

    #[test]
    fn clear_empties_command_list() {
        let (_a, mut store, rid) = item();
        store
            .add_command(
                rid,
                CanvasCommand::Rect {
                    rect: Rect2::from_xywh(0.0, 0.0, 2.0, 2.0),
                    color: Color::RED,
                    antialiased: false,
                },
            )
            .unwrap();
        assert_eq!(store.commands(rid).len(), 1);
        store.clear(rid).unwrap();
        assert!(store.commands(rid).is_empty());
    }

    #[test]
    fn rejects_malformed_commands() {
        let (_a, mut store, rid) = item();
        let bad_poly = CanvasCommand::Polyline {
            points: vec![Vec2::ZERO, Vec2::ONE, Vec2::X],
            colors: smallvec![Color::RED, Color::BLUE],
            width: 1.0,
            antialiased: false,
        };
        assert!(store.add_command(rid, bad_poly).is_err());
        let bad_primitive = CanvasCommand::Primitive {
            points: smallvec![],
            colors: smallvec![],
            uvs: smallvec![],
            texture: Rid::INVALID,
        };
        assert!(store.add_command(rid, bad_primitive).is_err());
        assert!(store.commands(rid).is_empty());
    }

    #[test]
    fn z_index_is_clamped() {
        let (_a, mut store, rid) = item();
        store.set_z_index(rid, 10_000).unwrap();
        assert_eq!(store.get(rid).unwrap().z_index, CANVAS_ITEM_Z_MAX);
    }

    #[test]
    fn command_rect_follows_set_transform() {
        let (_a, mut store, rid) = item();
        let unit = CanvasCommand::Rect {
            rect: Rect2::from_xywh(0.0, 0.0, 1.0, 1.0),
            color: Color::WHITE,
            antialiased: false,
        };
        store.add_command(rid, unit.clone()).unwrap();
        store
            .add_command(rid, CanvasCommand::SetTransform(Transform2D::from_translation(Vec2::new(9.0, 0.0))))
            .unwrap();
        store.add_command(rid, unit).unwrap();
        assert_eq!(store.get(rid).unwrap().rect(), Rect2::from_xywh(0.0, 0.0, 10.0, 1.0));
    }
}
