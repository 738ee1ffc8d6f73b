//! 2D lights, light occluders and occluder polygons.

use glam::Vec2;
use vesper_core::math::{Rect2, Transform2D};
use vesper_core::{ordinal_enum, ChangeTracker, Color, Result, Rid, RidKind, RidOwner, ServerError};

ordinal_enum! {
    #[derive(Default)]
    pub enum CanvasLightMode {
        #[default]
        Point = 0,
        Directional = 1,
    }
}

ordinal_enum! {
    #[derive(Default)]
    pub enum CanvasLightBlendMode {
        #[default]
        Add = 0,
        Sub = 1,
        Mix = 2,
    }
}

ordinal_enum! {
    #[derive(Default)]
    pub enum CanvasLightShadowFilter {
        #[default]
        None = 0,
        Pcf5 = 1,
        Pcf13 = 2,
    }
}

ordinal_enum! {
    #[derive(Default)]
    pub enum CanvasOccluderPolygonCullMode {
        #[default]
        Disabled = 0,
        Clockwise = 1,
        CounterClockwise = 2,
    }
}

#[derive(Debug, Clone)]
pub struct CanvasLight {
    pub mode: CanvasLightMode,
    pub enabled: bool,
    pub canvas: Rid,
    pub texture: Rid,
    pub texture_offset: Vec2,
    /// Radius of a point light's reach, from its texture scale.
    pub texture_scale: f32,
    pub transform: Transform2D,
    pub prev_transform: Transform2D,
    pub interpolated: bool,
    pub color: Color,
    pub height: f32,
    pub energy: f32,
    pub z_range: (i32, i32),
    pub layer_range: (i32, i32),
    pub item_cull_mask: u32,
    pub item_shadow_cull_mask: u32,
    pub blend_mode: CanvasLightBlendMode,
    pub shadow_enabled: bool,
    pub shadow_filter: CanvasLightShadowFilter,
    pub shadow_color: Color,
    pub shadow_smooth: f32,
    pub directional_distance: f32,
    pub changes: ChangeTracker,
}

impl Default for CanvasLight {
    fn default() -> Self {
        Self {
            mode: CanvasLightMode::Point,
            enabled: true,
            canvas: Rid::INVALID,
            texture: Rid::INVALID,
            texture_offset: Vec2::ZERO,
            texture_scale: 1.0,
            transform: Transform2D::IDENTITY,
            prev_transform: Transform2D::IDENTITY,
            interpolated: true,
            color: Color::WHITE,
            height: 0.0,
            energy: 1.0,
            z_range: (-1024, 1024),
            layer_range: (0, 0),
            item_cull_mask: 1,
            item_shadow_cull_mask: 1,
            blend_mode: CanvasLightBlendMode::Add,
            shadow_enabled: false,
            shadow_filter: CanvasLightShadowFilter::None,
            shadow_color: Color::BLACK,
            shadow_smooth: 0.0,
            directional_distance: 10000.0,
            changes: ChangeTracker::new(),
        }
    }
}

impl CanvasLight {
    /// Whether the light reaches an item at `z`, on canvas layer `layer`,
    /// with the given light mask.
    #[must_use]
    pub fn affects(&self, z: i32, layer: i32, light_mask: u32) -> bool {
        self.enabled
            && light_mask & self.item_cull_mask != 0
            && (self.z_range.0..=self.z_range.1).contains(&z)
            && (self.layer_range.0..=self.layer_range.1).contains(&layer)
    }

    /// Unshadowed intensity at `point`, in `[0, energy]`.
    #[must_use]
    pub fn attenuation(&self, point: Vec2) -> f32 {
        match self.mode {
            CanvasLightMode::Directional => self.energy,
            CanvasLightMode::Point => {
                let origin = self.transform.translation + self.texture_offset;
                let radius = self.texture_scale.max(f32::EPSILON) * 64.0;
                let d = point.distance(origin) / radius;
                self.energy * (1.0 - d).clamp(0.0, 1.0)
            }
        }
    }

    /// Point the light shines from for shadow rays toward `point`.
    #[must_use]
    pub fn source_for(&self, point: Vec2) -> Vec2 {
        match self.mode {
            CanvasLightMode::Point => self.transform.translation + self.texture_offset,
            CanvasLightMode::Directional => {
                let dir = self.transform.transform_vector2(Vec2::Y).normalize_or(Vec2::Y);
                point - dir * self.directional_distance
            }
        }
    }

    /// Applies this light's contribution to `base` at `point`; `shadowed`
    /// tells whether the point is in shadow.
    #[must_use]
    pub fn shade(&self, base: Color, point: Vec2, shadowed: bool) -> Color {
        let mut light = self.color;
        let strength = self.attenuation(point);
        if shadowed {
            light = light.lerp(self.shadow_color, self.shadow_color.a);
        }
        let contribution = Color::rgba(light.r * strength, light.g * strength, light.b * strength, 1.0);
        match self.blend_mode {
            CanvasLightBlendMode::Add => Color::rgba(
                base.r + base.r * contribution.r,
                base.g + base.g * contribution.g,
                base.b + base.b * contribution.b,
                base.a,
            ),
            CanvasLightBlendMode::Sub => Color::rgba(
                (base.r - base.r * contribution.r).max(0.0),
                (base.g - base.g * contribution.g).max(0.0),
                (base.b - base.b * contribution.b).max(0.0),
                base.a,
            ),
            CanvasLightBlendMode::Mix => {
                let t = (strength * light.a).clamp(0.0, 1.0);
                Color::rgba(
                    base.r + (base.r * light.r - base.r) * t,
                    base.g + (base.g * light.g - base.g) * t,
                    base.b + (base.b * light.b - base.b) * t,
                    base.a,
                )
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CanvasOccluderPolygon {
    pub points: Vec<Vec2>,
    pub closed: bool,
    pub cull_mode: CanvasOccluderPolygonCullMode,
    pub changes: ChangeTracker,
}

impl CanvasOccluderPolygon {
    /// Edges as point pairs; open polygons skip the closing edge.
    pub fn edges(&self) -> impl Iterator<Item = (Vec2, Vec2)> + '_ {
        let n = self.points.len();
        let count = match n {
            0 | 1 => 0,
            _ if self.closed => n,
            _ => n - 1,
        };
        (0..count).map(move |i| (self.points[i], self.points[(i + 1) % n]))
    }

    /// Signed area; positive for counter-clockwise outlines in y-down space.
    #[must_use]
    pub fn signed_area(&self) -> f32 {
        let n = self.points.len();
        (0..n).map(|i| self.points[i].perp_dot(self.points[(i + 1) % n])).sum::<f32>() * 0.5
    }
}

#[derive(Debug, Clone)]
pub struct CanvasLightOccluder {
    pub canvas: Rid,
    pub enabled: bool,
    pub polygon: Rid,
    pub as_sdf_collision: bool,
    pub transform: Transform2D,
    pub prev_transform: Transform2D,
    pub interpolated: bool,
    pub light_mask: u32,
    pub changes: ChangeTracker,
}

impl Default for CanvasLightOccluder {
    fn default() -> Self {
        Self {
            canvas: Rid::INVALID,
            enabled: true,
            polygon: Rid::INVALID,
            as_sdf_collision: true,
            transform: Transform2D::IDENTITY,
            prev_transform: Transform2D::IDENTITY,
            interpolated: true,
            light_mask: 1,
            changes: ChangeTracker::new(),
        }
    }
}

fn segments_intersect(a0: Vec2, a1: Vec2, b0: Vec2, b1: Vec2) -> bool {
    let d = (a1 - a0).perp_dot(b1 - b0);
    if d.abs() < f32::EPSILON {
        return false;
    }
    let t = (b0 - a0).perp_dot(b1 - b0) / d;
    let u = (b0 - a0).perp_dot(a1 - a0) / d;
    (0.0..=1.0).contains(&t) && (0.0..=1.0).contains(&u)
}

/// Whether the segment from `light` to `point` is blocked by the edge
/// `(e0, e1)` of a polygon culled with `cull_mode`.
#[must_use]
pub fn edge_blocks(light: Vec2, point: Vec2, e0: Vec2, e1: Vec2, cull_mode: CanvasOccluderPolygonCullMode, winding: f32) -> bool {
    if !segments_intersect(light, point, e0, e1) {
        return false;
    }
    // Facing test: which side of the edge the light sits on.
    let side = (e1 - e0).perp_dot(light - e0) * winding.signum();
    match cull_mode {
        CanvasOccluderPolygonCullMode::Disabled => true,
        CanvasOccluderPolygonCullMode::Clockwise => side > 0.0,
        CanvasOccluderPolygonCullMode::CounterClockwise => side < 0.0,
    }
}

macro_rules! store_boilerplate {
    ($store:ident, $state:ty, $kind:expr) => {
        pub struct $store {
            owner: RidOwner<$state>,
        }

        impl Default for $store {
            fn default() -> Self {
                Self::new()
            }
        }

        impl $store {
            #[must_use]
            pub fn new() -> Self {
                Self {
                    owner: RidOwner::new($kind),
                }
            }

            pub fn initialize(&mut self, rid: Rid) {
                self.owner.initialize(rid, <$state>::default());
            }

            #[must_use]
            pub fn get(&self, rid: Rid) -> Option<&$state> {
                self.owner.get(rid)
            }

            pub fn get_mut(&mut self, rid: Rid) -> Option<&mut $state> {
                self.owner.get_mut(rid)
            }

            #[must_use]
            pub fn owns(&self, rid: Rid) -> bool {
                self.owner.owns(rid)
            }

            pub fn free(&mut self, rid: Rid) -> Option<$state> {
                self.owner.take(rid)
            }

            pub fn iter(&self) -> impl Iterator<Item = (Rid, &$state)> {
                self.owner.iter()
            }

            fn state_mut(&mut self, rid: Rid) -> Result<&mut $state> {
                self.owner.get_mut(rid).ok_or(ServerError::InvalidRid(rid))
            }
        }
    };
}

macro_rules! setters {
    ($store:ident { $($name:ident => $field:ident : $ty:ty),+ $(,)? }) => {
        impl $store {
            $(
                pub fn $name(&mut self, rid: Rid, value: $ty) -> Result<()> {
                    let state = self.state_mut(rid)?;
                    state.$field = value;
                    state.changes.changed();
                    Ok(())
                }
            )+
        }
    };
}

store_boilerplate!(CanvasLightStore, CanvasLight, RidKind::CanvasLight);
store_boilerplate!(CanvasLightOccluderStore, CanvasLightOccluder, RidKind::CanvasLightOccluder);
store_boilerplate!(CanvasOccluderPolygonStore, CanvasOccluderPolygon, RidKind::CanvasOccluderPolygon);

setters!(CanvasLightStore {
    set_mode => mode: CanvasLightMode,
    set_enabled => enabled: bool,
    set_texture => texture: Rid,
    set_texture_offset => texture_offset: Vec2,
    set_color => color: Color,
    set_height => height: f32,
    set_energy => energy: f32,
    set_item_cull_mask => item_cull_mask: u32,
    set_item_shadow_cull_mask => item_shadow_cull_mask: u32,
    set_blend_mode => blend_mode: CanvasLightBlendMode,
    set_shadow_enabled => shadow_enabled: bool,
    set_shadow_filter => shadow_filter: CanvasLightShadowFilter,
    set_shadow_color => shadow_color: Color,
    set_shadow_smooth => shadow_smooth: f32,
    set_directional_distance => directional_distance: f32,
    set_interpolated => interpolated: bool,
});

setters!(CanvasLightOccluderStore {
    set_enabled => enabled: bool,
    set_as_sdf_collision => as_sdf_collision: bool,
    set_light_mask => light_mask: u32,
    set_interpolated => interpolated: bool,
});

setters!(CanvasOccluderPolygonStore {
    set_cull_mode => cull_mode: CanvasOccluderPolygonCullMode,
});

impl CanvasLightStore {
    pub fn attach_to_canvas(&mut self, rid: Rid, canvas: Rid) -> Result<()> {
        let light = self.state_mut(rid)?;
        light.canvas = canvas;
        light.changes.changed();
        Ok(())
    }

    pub fn set_texture_scale(&mut self, rid: Rid, scale: f32) -> Result<()> {
        if scale <= 0.0 {
            return Err(ServerError::InvalidArgument(format!("texture scale {scale} must be positive")));
        }
        let light = self.state_mut(rid)?;
        light.texture_scale = scale;
        light.changes.changed();
        Ok(())
    }

    pub fn set_transform(&mut self, rid: Rid, transform: Transform2D) -> Result<()> {
        let light = self.state_mut(rid)?;
        light.prev_transform = if light.interpolated { light.transform } else { transform };
        light.transform = transform;
        light.changes.changed();
        Ok(())
    }

    pub fn reset_physics_interpolation(&mut self, rid: Rid) -> Result<()> {
        let light = self.state_mut(rid)?;
        light.prev_transform = light.transform;
        Ok(())
    }

    pub fn set_z_range(&mut self, rid: Rid, min: i32, max: i32) -> Result<()> {
        if min > max {
            return Err(ServerError::InvalidArgument(format!("z range {min}..{max} is inverted")));
        }
        let light = self.state_mut(rid)?;
        light.z_range = (min, max);
        light.changes.changed();
        Ok(())
    }

    pub fn set_layer_range(&mut self, rid: Rid, min: i32, max: i32) -> Result<()> {
        if min > max {
            return Err(ServerError::InvalidArgument(format!("layer range {min}..{max} is inverted")));
        }
        let light = self.state_mut(rid)?;
        light.layer_range = (min, max);
        light.changes.changed();
        Ok(())
    }

    pub fn purge_reference(&mut self, freed: Rid) {
        for (_, light) in self.owner.iter_mut() {
            if light.canvas == freed {
                light.canvas = Rid::INVALID;
                light.changes.changed();
            }
            if light.texture == freed {
                light.texture = Rid::INVALID;
                light.changes.changed();
            }
        }
    }

    /// Enabled lights attached to `canvas`, in handle order.
    #[must_use]
    pub fn lights_of(&self, canvas: Rid) -> Vec<Rid> {
        let mut out: Vec<Rid> = self
            .owner
            .iter()
            .filter(|(_, l)| l.enabled && l.canvas == canvas)
            .map(|(r, _)| r)
            .collect();
        out.sort_unstable();
        out
    }
}

impl CanvasLightOccluderStore {
    pub fn attach_to_canvas(&mut self, rid: Rid, canvas: Rid) -> Result<()> {
        let occ = self.state_mut(rid)?;
        occ.canvas = canvas;
        occ.changes.changed();
        Ok(())
    }

    pub fn set_polygon(&mut self, rid: Rid, polygon: Rid) -> Result<()> {
        let occ = self.state_mut(rid)?;
        occ.polygon = polygon;
        occ.changes.changed();
        Ok(())
    }

    pub fn set_transform(&mut self, rid: Rid, transform: Transform2D) -> Result<()> {
        let occ = self.state_mut(rid)?;
        occ.prev_transform = if occ.interpolated { occ.transform } else { transform };
        occ.transform = transform;
        occ.changes.changed();
        Ok(())
    }

    pub fn reset_physics_interpolation(&mut self, rid: Rid) -> Result<()> {
        let occ = self.state_mut(rid)?;
        occ.prev_transform = occ.transform;
        Ok(())
    }

    pub fn purge_reference(&mut self, freed: Rid) {
        for (_, occ) in self.owner.iter_mut() {
            if occ.canvas == freed {
                occ.canvas = Rid::INVALID;
                occ.changes.changed();
            }
            if occ.polygon == freed {
                occ.polygon = Rid::INVALID;
                occ.changes.changed();
            }
        }
    }
}

impl CanvasOccluderPolygonStore {
    pub fn set_shape(&mut self, rid: Rid, points: Vec<Vec2>, closed: bool) -> Result<()> {
        if points.len() < 2 {
            return Err(ServerError::InvalidArgument("an occluder polygon needs at least two points".into()));
        }
        let poly = self.state_mut(rid)?;
        poly.points = points;
        poly.closed = closed;
        poly.changes.changed();
        Ok(())
    }
}

/// Shadow queries against the occluders of one canvas.
pub struct ShadowCaster<'a> {
    occluders: Vec<(&'a CanvasLightOccluder, &'a CanvasOccluderPolygon)>,
}

impl<'a> ShadowCaster<'a> {
    #[must_use]
    pub fn new(canvas: Rid, occluders: &'a CanvasLightOccluderStore, polygons: &'a CanvasOccluderPolygonStore) -> Self {
        let mut list: Vec<_> = occluders
            .iter()
            .filter(|(_, o)| o.enabled && o.canvas == canvas)
            .filter_map(|(r, o)| polygons.get(o.polygon).map(|p| (r, o, p)))
            .collect();
        list.sort_unstable_by_key(|(r, _, _)| *r);
        Self {
            occluders: list.into_iter().map(|(_, o, p)| (o, p)).collect(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.occluders.is_empty()
    }

    /// Whether `point` is shadowed from `light`.
    #[must_use]
    pub fn is_shadowed(&self, light: &CanvasLight, point: Vec2) -> bool {
        if !light.shadow_enabled {
            return false;
        }
        let source = light.source_for(point);
        self.occluders.iter().any(|(occ, poly)| {
            if occ.light_mask & light.item_shadow_cull_mask == 0 {
                return false;
            }
            let winding = poly.signed_area();
            poly.edges().any(|(a, b)| {
                let (a, b) = (occ.transform.transform_point2(a), occ.transform.transform_point2(b));
                edge_blocks(source, point, a, b, poly.cull_mode, winding)
            })
        })
    }

    /// Bounds of every occluder, for diagnostics.
    #[must_use]
    pub fn bounds(&self) -> Rect2 {
        let pts: Vec<Vec2> = self
            .occluders
            .iter()
            .flat_map(|(o, p)| p.points.iter().map(|pt| o.transform.transform_point2(*pt)))
            .collect();
        Rect2::from_points(&pts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_core::RidAllocator;

    #[test]
    fn light_filters_by_z_layer_and_mask() {
        let light = CanvasLight::default();
        assert!(light.affects(0, 0, 1));
        assert!(!light.affects(0, 0, 2));
        assert!(!light.affects(2000, 0, 1));
        assert!(!light.affects(0, 1, 1));
    }

    #[test]
    fn point_light_falls_off() {
        let light = CanvasLight::default();
        assert!((light.attenuation(Vec2::ZERO) - 1.0).abs() < 1e-6);
        assert!((light.attenuation(Vec2::new(32.0, 0.0)) - 0.5).abs() < 1e-6);
        assert_eq!(light.attenuation(Vec2::new(100.0, 0.0)), 0.0);
    }

    #[test]
    fn occluder_casts_shadow() {
        let alloc = RidAllocator::new();
        let canvas = alloc.alloc(RidKind::Canvas);
        let mut polys = CanvasOccluderPolygonStore::new();
        let poly = alloc.alloc(RidKind::CanvasOccluderPolygon);
        polys.initialize(poly);
        polys
            .set_shape(poly, vec![Vec2::new(10.0, -5.0), Vec2::new(10.0, 5.0)], false)
            .unwrap();
        let mut occs = CanvasLightOccluderStore::new();
        let occ = alloc.alloc(RidKind::CanvasLightOccluder);
        occs.initialize(occ);
        occs.attach_to_canvas(occ, canvas).unwrap();
        occs.set_polygon(occ, poly).unwrap();

        let mut light = CanvasLight {
            canvas,
            shadow_enabled: true,
            ..Default::default()
        };
        let caster = ShadowCaster::new(canvas, &occs, &polys);
        assert!(caster.is_shadowed(&light, Vec2::new(20.0, 0.0)));
        assert!(!caster.is_shadowed(&light, Vec2::new(5.0, 0.0)));
        assert!(!caster.is_shadowed(&light, Vec2::new(20.0, 20.0)));
        light.shadow_enabled = false;
        assert!(!caster.is_shadowed(&light, Vec2::new(20.0, 0.0)));
    }

    #[test]
    fn inverted_ranges_are_rejected() {
        let alloc = RidAllocator::new();
        let mut lights = CanvasLightStore::new();
        let l = alloc.alloc(RidKind::CanvasLight);
        lights.initialize(l);
        assert!(lights.set_z_range(l, 5, -5).is_err());
        assert!(lights.set_texture_scale(l, 0.0).is_err());
        lights.set_layer_range(l, -1, 3).unwrap();
        assert_eq!(lights.get(l).unwrap().layer_range, (-1, 3));
    }
}
