//! Instances
//!
//! An instance places one drawable or volume resource (its *base*) into a
//! scenario at a world transform. The world-space bounds used for culling
//! are cached and refreshed lazily when the transform, the base or the
//! base's own change version moves.

use bitflags::bitflags;
use glam::{Affine3A, Vec3};
use rustc_hash::FxHashMap;
use vesper_core::math::Aabb;
use vesper_core::{ordinal_enum, ChangeTracker, Result, Rid, RidKind, RidOwner, ServerError, StringName, Variant};

use crate::visibility_range::{VisibilityRange, VisibilityRangeFadeMode};

ordinal_enum! {
    /// What an instance's base resource is.
    #[derive(Default)]
    pub enum InstanceType {
        #[default]
        None = 0,
        Mesh = 1,
        Multimesh = 2,
        Particles = 3,
        ParticlesCollision = 4,
        Light = 5,
        ReflectionProbe = 6,
        Decal = 7,
        VoxelGi = 8,
        Lightmap = 9,
        Occluder = 10,
        VisibilityNotifier = 11,
        FogVolume = 12,
    }
}

impl InstanceType {
    #[must_use]
    pub fn from_kind(kind: RidKind) -> Option<Self> {
        Some(match kind {
            RidKind::Mesh => Self::Mesh,
            RidKind::MultiMesh => Self::Multimesh,
            RidKind::Particles => Self::Particles,
            RidKind::ParticlesCollision => Self::ParticlesCollision,
            RidKind::Light => Self::Light,
            RidKind::ReflectionProbe => Self::ReflectionProbe,
            RidKind::Decal => Self::Decal,
            RidKind::VoxelGi => Self::VoxelGi,
            RidKind::Lightmap => Self::Lightmap,
            RidKind::Occluder => Self::Occluder,
            RidKind::VisibilityNotifier => Self::VisibilityNotifier,
            RidKind::FogVolume => Self::FogVolume,
            _ => return None,
        })
    }

    #[must_use]
    pub fn kind(self) -> Option<RidKind> {
        Some(match self {
            Self::None => return None,
            Self::Mesh => RidKind::Mesh,
            Self::Multimesh => RidKind::MultiMesh,
            Self::Particles => RidKind::Particles,
            Self::ParticlesCollision => RidKind::ParticlesCollision,
            Self::Light => RidKind::Light,
            Self::ReflectionProbe => RidKind::ReflectionProbe,
            Self::Decal => RidKind::Decal,
            Self::VoxelGi => RidKind::VoxelGi,
            Self::Lightmap => RidKind::Lightmap,
            Self::Occluder => RidKind::Occluder,
            Self::VisibilityNotifier => RidKind::VisibilityNotifier,
            Self::FogVolume => RidKind::FogVolume,
        })
    }

    /// Mesh, multimesh and particles: the kinds that produce draw calls.
    #[must_use]
    pub const fn is_geometry(self) -> bool {
        matches!(self, Self::Mesh | Self::Multimesh | Self::Particles)
    }
}

ordinal_enum! {
    pub enum InstanceFlags {
        UseBakedLight = 0,
        UseDynamicGi = 1,
        DrawNextFrameIfVisible = 2,
        IgnoreOcclusionCulling = 3,
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct GeometryFlags: u32 {
        const USE_BAKED_LIGHT = 1 << 0;
        const USE_DYNAMIC_GI = 1 << 1;
        const DRAW_NEXT_FRAME_IF_VISIBLE = 1 << 2;
        const IGNORE_OCCLUSION_CULLING = 1 << 3;
    }
}

impl From<InstanceFlags> for GeometryFlags {
    fn from(flag: InstanceFlags) -> Self {
        GeometryFlags::from_bits_truncate(1 << flag.ordinal())
    }
}

ordinal_enum! {
    #[derive(Default)]
    pub enum ShadowCastingSetting {
        Off = 0,
        #[default]
        On = 1,
        DoubleSided = 2,
        ShadowsOnly = 3,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightmapBinding {
    pub lightmap: Rid,
    pub uv_scale: glam::Vec4,
    pub slice: u32,
}

#[derive(Debug, Clone)]
pub struct Instance {
    pub base: Rid,
    pub base_type: InstanceType,
    pub scenario: Rid,
    pub layer_mask: u32,
    pub transform: Affine3A,
    pub prev_transform: Affine3A,
    pub interpolated: bool,
    pub object_id: u64,
    pub skeleton: Rid,
    pub lightmap: Option<LightmapBinding>,
    pub surface_materials: Vec<Rid>,
    pub blend_shape_weights: Vec<f32>,
    pub custom_aabb: Option<Aabb>,
    pub extra_margin: f32,
    pub visibility_parent: Rid,
    pub ignore_culling: bool,
    pub flags: GeometryFlags,
    pub cast_shadows: ShadowCastingSetting,
    pub material_override: Rid,
    pub material_overlay: Rid,
    pub visibility_range: VisibilityRange,
    pub lod_bias: f32,
    pub transparency: f32,
    pub shader_params: FxHashMap<StringName, Variant>,
    pub visible: bool,
    pub sorting_offset: f32,
    pub use_aabb_center: bool,
    /// Cached world bounds and the base version they were computed from.
    pub world_aabb: Aabb,
    pub(crate) base_version: u64,
    pub(crate) aabb_dirty: bool,
    pub changes: ChangeTracker,
}

impl Default for Instance {
    fn default() -> Self {
        Self {
            base: Rid::INVALID,
            base_type: InstanceType::None,
            scenario: Rid::INVALID,
            layer_mask: 1,
            transform: Affine3A::IDENTITY,
            prev_transform: Affine3A::IDENTITY,
            interpolated: false,
            object_id: 0,
            skeleton: Rid::INVALID,
            lightmap: None,
            surface_materials: Vec::new(),
            blend_shape_weights: Vec::new(),
            custom_aabb: None,
            extra_margin: 0.0,
            visibility_parent: Rid::INVALID,
            ignore_culling: false,
            flags: GeometryFlags::empty(),
            cast_shadows: ShadowCastingSetting::On,
            material_override: Rid::INVALID,
            material_overlay: Rid::INVALID,
            visibility_range: VisibilityRange::default(),
            lod_bias: 1.0,
            transparency: 0.0,
            shader_params: FxHashMap::default(),
            visible: true,
            sorting_offset: 0.0,
            use_aabb_center: true,
            world_aabb: Aabb::ZERO,
            base_version: 0,
            aabb_dirty: true,
            changes: ChangeTracker::new(),
        }
    }
}

impl Instance {
    /// World bounds from local bounds, the transform and the extra margin.
    #[must_use]
    pub fn compute_world_aabb(&self, local: Aabb) -> Aabb {
        let local = self.custom_aabb.unwrap_or(local);
        let world = local.transform(&self.transform);
        if self.extra_margin > 0.0 {
            world.grow(self.extra_margin)
        } else {
            world
        }
    }

    /// Transform blended between the previous and current physics ticks.
    #[must_use]
    pub fn interpolated_transform(&self, fraction: f32) -> Affine3A {
        if !self.interpolated {
            return self.transform;
        }
        let (s0, r0, t0) = self.prev_transform.to_scale_rotation_translation();
        let (s1, r1, t1) = self.transform.to_scale_rotation_translation();
        let f = fraction.clamp(0.0, 1.0);
        Affine3A::from_scale_rotation_translation(s0.lerp(s1, f), r0.slerp(r1, f), t0.lerp(t1, f))
    }

    /// Point used for depth sorting.
    #[must_use]
    pub fn sort_origin(&self) -> Vec3 {
        if self.use_aabb_center {
            self.world_aabb.center()
        } else {
            self.transform.translation.into()
        }
    }

    #[must_use]
    pub fn is_geometry(&self) -> bool {
        self.base_type.is_geometry()
    }

    pub(crate) fn touch(&mut self) {
        self.aabb_dirty = true;
        self.changes.changed();
    }
}

pub struct InstanceStore {
    owner: RidOwner<Instance>,
}

impl Default for InstanceStore {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! instance_setter {
    ($name:ident, $field:ident : $ty:ty) => {
        pub fn $name(&mut self, rid: Rid, value: $ty) -> Result<()> {
            let inst = self.inst_mut(rid)?;
            inst.$field = value;
            inst.changes.changed();
            Ok(())
        }
    };
}

impl InstanceStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            owner: RidOwner::new(RidKind::Instance),
        }
    }

    pub fn initialize(&mut self, rid: Rid) {
        self.owner.initialize(rid, Instance::default());
    }

    #[must_use]
    pub fn get(&self, rid: Rid) -> Option<&Instance> {
        self.owner.get(rid)
    }

    pub fn get_mut(&mut self, rid: Rid) -> Option<&mut Instance> {
        self.owner.get_mut(rid)
    }

    #[must_use]
    pub fn owns(&self, rid: Rid) -> bool {
        self.owner.owns(rid)
    }

    pub fn free(&mut self, rid: Rid) -> Option<Instance> {
        self.owner.take(rid)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Rid, &Instance)> {
        self.owner.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Rid, &mut Instance)> {
        self.owner.iter_mut()
    }

    fn inst_mut(&mut self, rid: Rid) -> Result<&mut Instance> {
        self.owner.get_mut(rid).ok_or(ServerError::InvalidRid(rid))
    }

    /// Binds a base resource; `kind` is its registry kind, `None` unbinds.
    pub fn set_base(&mut self, rid: Rid, base: Rid, kind: Option<RidKind>) -> Result<()> {
        let base_type = match kind {
            None => InstanceType::None,
            Some(k) => InstanceType::from_kind(k).ok_or_else(|| {
                ServerError::InvalidArgument(format!("{k} cannot be the base of an instance"))
            })?,
        };
        let inst = self.inst_mut(rid)?;
        inst.base = if base_type == InstanceType::None { Rid::INVALID } else { base };
        inst.base_type = base_type;
        inst.surface_materials.clear();
        inst.blend_shape_weights.clear();
        inst.base_version = 0;
        inst.touch();
        Ok(())
    }

    pub fn set_transform(&mut self, rid: Rid, transform: Affine3A) -> Result<()> {
        let inst = self.inst_mut(rid)?;
        inst.prev_transform = if inst.interpolated { inst.transform } else { transform };
        inst.transform = transform;
        inst.touch();
        Ok(())
    }

    /// Snaps the previous transform to the current one.
    pub fn reset_physics_interpolation(&mut self, rid: Rid) -> Result<()> {
        let inst = self.inst_mut(rid)?;
        inst.prev_transform = inst.transform;
        Ok(())
    }

    pub fn set_custom_aabb(&mut self, rid: Rid, aabb: Aabb) -> Result<()> {
        let inst = self.inst_mut(rid)?;
        inst.custom_aabb = (aabb != Aabb::ZERO).then_some(aabb);
        inst.touch();
        Ok(())
    }

    pub fn set_extra_visibility_margin(&mut self, rid: Rid, margin: f32) -> Result<()> {
        let inst = self.inst_mut(rid)?;
        inst.extra_margin = margin.max(0.0);
        inst.touch();
        Ok(())
    }

    pub fn set_surface_override_material(&mut self, rid: Rid, surface: usize, material: Rid) -> Result<()> {
        let inst = self.inst_mut(rid)?;
        if inst.surface_materials.len() <= surface {
            inst.surface_materials.resize(surface + 1, Rid::INVALID);
        }
        inst.surface_materials[surface] = material;
        inst.changes.changed();
        Ok(())
    }

    pub fn set_blend_shape_weight(&mut self, rid: Rid, shape: usize, weight: f32) -> Result<()> {
        let inst = self.inst_mut(rid)?;
        if inst.base_type != InstanceType::Mesh {
            return Err(ServerError::InvalidArgument("blend shapes need a mesh base".into()));
        }
        if inst.blend_shape_weights.len() <= shape {
            inst.blend_shape_weights.resize(shape + 1, 0.0);
        }
        inst.blend_shape_weights[shape] = weight;
        inst.changes.changed();
        Ok(())
    }

    pub fn set_pivot_data(&mut self, rid: Rid, sorting_offset: f32, use_aabb_center: bool) -> Result<()> {
        let inst = self.inst_mut(rid)?;
        inst.sorting_offset = sorting_offset;
        inst.use_aabb_center = use_aabb_center;
        inst.changes.changed();
        Ok(())
    }

    pub fn geometry_set_flag(&mut self, rid: Rid, flag: InstanceFlags, enabled: bool) -> Result<()> {
        let inst = self.inst_mut(rid)?;
        inst.flags.set(flag.into(), enabled);
        inst.changes.changed();
        Ok(())
    }

    /// Clamped to `[0, 1]`.
    pub fn geometry_set_transparency(&mut self, rid: Rid, transparency: f32) -> Result<()> {
        let inst = self.inst_mut(rid)?;
        inst.transparency = transparency.clamp(0.0, 1.0);
        inst.changes.changed();
        Ok(())
    }

    pub fn geometry_set_visibility_range(
        &mut self,
        rid: Rid,
        begin: f32,
        end: f32,
        begin_margin: f32,
        end_margin: f32,
        fade_mode: VisibilityRangeFadeMode,
    ) -> Result<()> {
        if end > 0.0 && end < begin {
            return Err(ServerError::InvalidArgument(format!(
                "visibility range end {end} is below begin {begin}"
            )));
        }
        let inst = self.inst_mut(rid)?;
        inst.visibility_range = VisibilityRange {
            begin: begin.max(0.0),
            end: end.max(0.0),
            begin_margin: begin_margin.max(0.0),
            end_margin: end_margin.max(0.0),
            fade_mode,
        };
        inst.changes.changed();
        Ok(())
    }

    pub fn geometry_set_lightmap(&mut self, rid: Rid, lightmap: Rid, uv_scale: glam::Vec4, slice: u32) -> Result<()> {
        let inst = self.inst_mut(rid)?;
        inst.lightmap = lightmap.is_valid().then_some(LightmapBinding {
            lightmap,
            uv_scale,
            slice,
        });
        inst.changes.changed();
        Ok(())
    }

    /// Nil removes the per-instance value so the shader default applies.
    pub fn geometry_set_shader_parameter(&mut self, rid: Rid, name: StringName, value: Variant) -> Result<()> {
        let inst = self.inst_mut(rid)?;
        if value.is_nil() {
            inst.shader_params.remove(&name);
        } else {
            inst.shader_params.insert(name, value);
        }
        inst.changes.changed();
        Ok(())
    }

    #[must_use]
    pub fn geometry_get_shader_parameter(&self, rid: Rid, name: StringName) -> Variant {
        self.owner
            .get(rid)
            .and_then(|i| i.shader_params.get(&name).cloned())
            .unwrap_or_default()
    }

    instance_setter!(set_layer_mask, layer_mask: u32);
    instance_setter!(attach_object_instance_id, object_id: u64);
    instance_setter!(attach_skeleton, skeleton: Rid);
    instance_setter!(set_visible, visible: bool);
    instance_setter!(set_ignore_culling, ignore_culling: bool);
    instance_setter!(set_interpolated, interpolated: bool);
    instance_setter!(geometry_set_cast_shadows_setting, cast_shadows: ShadowCastingSetting);
    instance_setter!(geometry_set_material_override, material_override: Rid);
    instance_setter!(geometry_set_material_overlay, material_overlay: Rid);
    instance_setter!(geometry_set_lod_bias, lod_bias: f32);

    /// Rejects parents that would make the visibility-parent chain loop.
    pub fn set_visibility_parent(&mut self, rid: Rid, parent: Rid) -> Result<()> {
        if parent.is_valid() {
            let mut current = parent;
            let mut steps = 0usize;
            while current.is_valid() {
                if current == rid {
                    return Err(ServerError::CycleDetected(format!(
                        "instance {rid:?} cannot use {parent:?} as visibility parent"
                    )));
                }
                steps += 1;
                if steps > self.owner.len() {
                    break;
                }
                current = self.owner.get(current).map_or(Rid::INVALID, |i| i.visibility_parent);
            }
        }
        let inst = self.inst_mut(rid)?;
        inst.visibility_parent = parent;
        inst.changes.changed();
        Ok(())
    }

    /// Drops references to a freed resource; freed bases leave an empty
    /// instance behind.
    pub fn purge_reference(&mut self, freed: Rid) {
        for (_, inst) in self.owner.iter_mut() {
            let mut touched = false;
            if inst.base == freed {
                inst.base = Rid::INVALID;
                inst.base_type = InstanceType::None;
                inst.aabb_dirty = true;
                touched = true;
            }
            for r in [
                &mut inst.skeleton,
                &mut inst.material_override,
                &mut inst.material_overlay,
                &mut inst.visibility_parent,
            ] {
                if *r == freed {
                    *r = Rid::INVALID;
                    touched = true;
                }
            }
            for m in inst.surface_materials.iter_mut().filter(|m| **m == freed) {
                *m = Rid::INVALID;
                touched = true;
            }
            if inst.lightmap.is_some_and(|l| l.lightmap == freed) {
                inst.lightmap = None;
                touched = true;
            }
            if inst.scenario == freed {
                inst.scenario = Rid::INVALID;
                touched = true;
            }
            if touched {
                inst.changes.changed();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_core::RidAllocator;

    fn setup(n: usize) -> (RidAllocator, InstanceStore, Vec<Rid>) {
        let alloc = RidAllocator::new();
        let mut store = InstanceStore::new();
        let rids = (0..n)
            .map(|_| {
                let r = alloc.alloc(RidKind::Instance);
                store.initialize(r);
                r
            })
            .collect();
        (alloc, store, rids)
    }

    #[test]
    fn transparency_is_clamped() {
        let (_a, mut store, i) = setup(1);
        store.geometry_set_transparency(i[0], 3.0).unwrap();
        assert_eq!(store.get(i[0]).unwrap().transparency, 1.0);
        store.geometry_set_transparency(i[0], -1.0).unwrap();
        assert_eq!(store.get(i[0]).unwrap().transparency, 0.0);
    }

    #[test]
    fn base_kind_is_checked() {
        let (alloc, mut store, i) = setup(1);
        let mesh = alloc.alloc(RidKind::Mesh);
        store.set_base(i[0], mesh, Some(RidKind::Mesh)).unwrap();
        assert_eq!(store.get(i[0]).unwrap().base_type, InstanceType::Mesh);
        let shader = alloc.alloc(RidKind::Shader);
        assert!(store.set_base(i[0], shader, Some(RidKind::Shader)).is_err());
        store.purge_reference(mesh);
        assert_eq!(store.get(i[0]).unwrap().base_type, InstanceType::None);
    }

    #[test]
    fn visibility_parent_cycles_are_rejected() {
        let (_a, mut store, i) = setup(3);
        store.set_visibility_parent(i[1], i[0]).unwrap();
        store.set_visibility_parent(i[2], i[1]).unwrap();
        assert!(store.set_visibility_parent(i[0], i[2]).is_err());
    }

    #[test]
    fn world_aabb_uses_custom_and_margin() {
        let mut inst = Instance {
            transform: Affine3A::from_translation(Vec3::new(10.0, 0.0, 0.0)),
            ..Default::default()
        };
        let unit = Aabb::from_center_extents(Vec3::ZERO, Vec3::ONE);
        assert_eq!(inst.compute_world_aabb(unit).center(), Vec3::new(10.0, 0.0, 0.0));
        inst.extra_margin = 1.0;
        assert_eq!(inst.compute_world_aabb(unit).size(), Vec3::splat(4.0));
    }

    #[test]
    fn interpolation_blends_translation() {
        let (_a, mut store, i) = setup(1);
        store.set_interpolated(i[0], true).unwrap();
        store.set_transform(i[0], Affine3A::IDENTITY).unwrap();
        store.set_transform(i[0], Affine3A::from_translation(Vec3::X * 2.0)).unwrap();
        let mid = store.get(i[0]).unwrap().interpolated_transform(0.5);
        assert!((mid.translation.x - 1.0).abs() < 1e-5);
    }
}
