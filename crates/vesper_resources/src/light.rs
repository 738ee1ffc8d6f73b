//! Light Store
//!
//! Directional, omni and spot lights. Numeric tuning lives in a fixed array
//! indexed by [`LightParam`]; the rest are explicit fields.

use glam::Vec3;
use vesper_core::math::{Aabb, Color};
use vesper_core::quality::ShadowQuality;
use vesper_core::{ordinal_enum, ChangeTracker, Result, Rid, RidKind, RidOwner, ServerError};

ordinal_enum! {
    pub enum LightType {
        Directional = 0,
        Omni = 1,
        Spot = 2,
    }
}

ordinal_enum! {
    pub enum LightParam {
        Energy = 0,
        IndirectEnergy = 1,
        VolumetricFogEnergy = 2,
        Specular = 3,
        Range = 4,
        Size = 5,
        Attenuation = 6,
        SpotAngle = 7,
        SpotAttenuation = 8,
        MaxDistance = 9,
        ShadowSplit1Offset = 10,
        ShadowSplit2Offset = 11,
        ShadowSplit3Offset = 12,
        ShadowFadeStart = 13,
        ShadowNormalBias = 14,
        ShadowBias = 15,
        ShadowPancakeSize = 16,
        ShadowOpacity = 17,
        ShadowBlur = 18,
        TransmittanceBias = 19,
        Intensity = 20,
    }
}

pub const LIGHT_PARAM_MAX: usize = 21;

ordinal_enum! {
    #[derive(Default)]
    pub enum LightBakeMode {
        Disabled = 0,
        Static = 1,
        #[default]
        Dynamic = 2,
    }
}

ordinal_enum! {
    #[derive(Default)]
    pub enum LightOmniShadowMode {
        DualParaboloid = 0,
        #[default]
        Cube = 1,
    }
}

ordinal_enum! {
    #[derive(Default)]
    pub enum LightDirectionalShadowMode {
        Orthogonal = 0,
        Parallel2Splits = 1,
        #[default]
        Parallel4Splits = 2,
    }
}

ordinal_enum! {
    #[derive(Default)]
    pub enum LightDirectionalSkyMode {
        #[default]
        LightAndSky = 0,
        LightOnly = 1,
        SkyOnly = 2,
    }
}

/// Initial parameter vector of a new light.
pub const DEFAULT_PARAMS: [f32; LIGHT_PARAM_MAX] = [
    1.0,  // energy
    1.0,  // indirect energy
    1.0,  // volumetric fog energy
    0.5,  // specular
    1.0,  // range
    0.0,  // size
    1.0,  // attenuation
    45.0, // spot angle
    1.0,  // spot attenuation
    0.0,  // max distance
    0.1,  // split 1
    0.3,  // split 2
    0.6,  // split 3
    0.8,  // fade start
    1.0,  // normal bias
    0.02, // bias
    20.0, // pancake
    1.0,  // opacity
    0.0,  // blur
    0.05, // transmittance bias
    1.0,  // intensity
];

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DistanceFade {
    pub enabled: bool,
    pub begin: f32,
    pub shadow: f32,
    pub length: f32,
}

#[derive(Debug, Clone)]
pub struct Light {
    pub ty: LightType,
    pub color: Color,
    pub params: [f32; LIGHT_PARAM_MAX],
    pub shadow: bool,
    pub negative: bool,
    pub reverse_cull_face: bool,
    pub bake_mode: LightBakeMode,
    pub max_sdfgi_cascade: u32,
    pub cull_mask: u32,
    pub shadow_caster_mask: u32,
    pub projector: Rid,
    pub distance_fade: DistanceFade,
    pub omni_shadow_mode: LightOmniShadowMode,
    pub directional_shadow_mode: LightDirectionalShadowMode,
    pub blend_splits: bool,
    pub sky_mode: LightDirectionalSkyMode,
    pub changes: ChangeTracker,
}

impl Light {
    #[must_use]
    pub fn new(ty: LightType) -> Self {
        Self {
            ty,
            color: Color::WHITE,
            params: DEFAULT_PARAMS,
            shadow: false,
            negative: false,
            reverse_cull_face: false,
            bake_mode: LightBakeMode::Dynamic,
            max_sdfgi_cascade: 2,
            cull_mask: u32::MAX,
            shadow_caster_mask: u32::MAX,
            projector: Rid::INVALID,
            distance_fade: DistanceFade::default(),
            omni_shadow_mode: LightOmniShadowMode::Cube,
            directional_shadow_mode: LightDirectionalShadowMode::Parallel4Splits,
            blend_splits: false,
            sky_mode: LightDirectionalSkyMode::LightAndSky,
            changes: ChangeTracker::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn param(&self, p: LightParam) -> f32 {
        self.params[p.ordinal() as usize]
    }

    /// Directional lights reuse `Size` as their angular distance.
    #[must_use]
    pub fn angular_distance(&self) -> f32 {
        match self.ty {
            LightType::Directional => self.param(LightParam::Size),
            _ => 0.0,
        }
    }

    /// Blur radius the shadow filter uses at `quality`.
    #[must_use]
    pub fn effective_shadow_blur(&self, quality: ShadowQuality) -> f32 {
        let size = match self.ty {
            LightType::Directional => 0.0,
            _ => self.param(LightParam::Size),
        };
        quality.effective_shadow_blur(self.param(LightParam::ShadowBlur), size, self.angular_distance())
    }

    /// Local-space bounds; directional lights are unbounded and report zero.
    #[must_use]
    pub fn aabb(&self) -> Aabb {
        let range = self.param(LightParam::Range);
        match self.ty {
            LightType::Directional => Aabb::ZERO,
            LightType::Omni => Aabb::from_center_extents(Vec3::ZERO, Vec3::splat(range)),
            LightType::Spot => {
                let angle = self.param(LightParam::SpotAngle).to_radians();
                let len = if angle < std::f32::consts::FRAC_PI_2 {
                    (angle.tan() * range).min(range)
                } else {
                    range
                };
                Aabb::new(Vec3::new(-len, -len, -range), Vec3::new(len, len, 0.0))
            }
        }
    }
}

pub struct LightStore {
    owner: RidOwner<Light>,
}

impl Default for LightStore {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! light_setter {
    ($name:ident, $field:ident : $ty:ty) => {
        pub fn $name(&mut self, rid: Rid, value: $ty) -> Result<()> {
            let light = self.light_mut(rid)?;
            light.$field = value;
            light.changes.changed();
            Ok(())
        }
    };
}

impl LightStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            owner: RidOwner::new(RidKind::Light),
        }
    }

    pub fn initialize(&mut self, rid: Rid, ty: LightType) {
        self.owner.initialize(rid, Light::new(ty));
    }

    #[must_use]
    pub fn get(&self, rid: Rid) -> Option<&Light> {
        self.owner.get(rid)
    }

    #[must_use]
    pub fn owns(&self, rid: Rid) -> bool {
        self.owner.owns(rid)
    }

    pub fn free(&mut self, rid: Rid) -> Option<Light> {
        self.owner.take(rid)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Rid, &Light)> {
        self.owner.iter()
    }

    fn light_mut(&mut self, rid: Rid) -> Result<&mut Light> {
        self.owner.get_mut(rid).ok_or(ServerError::InvalidRid(rid))
    }

    pub fn set_param(&mut self, rid: Rid, param: LightParam, value: f32) -> Result<()> {
        let light = self.light_mut(rid)?;
        light.params[param.ordinal() as usize] = value;
        light.changes.changed();
        Ok(())
    }

    #[must_use]
    pub fn param(&self, rid: Rid, param: LightParam) -> f32 {
        self.owner.get(rid).map_or(0.0, |l| l.param(param))
    }

    light_setter!(set_color, color: Color);
    light_setter!(set_shadow, shadow: bool);
    light_setter!(set_negative, negative: bool);
    light_setter!(set_reverse_cull_face_mode, reverse_cull_face: bool);
    light_setter!(set_bake_mode, bake_mode: LightBakeMode);
    light_setter!(set_max_sdfgi_cascade, max_sdfgi_cascade: u32);
    light_setter!(set_cull_mask, cull_mask: u32);
    light_setter!(set_shadow_caster_mask, shadow_caster_mask: u32);
    light_setter!(set_projector, projector: Rid);
    light_setter!(omni_set_shadow_mode, omni_shadow_mode: LightOmniShadowMode);
    light_setter!(directional_set_shadow_mode, directional_shadow_mode: LightDirectionalShadowMode);
    light_setter!(directional_set_blend_splits, blend_splits: bool);
    light_setter!(directional_set_sky_mode, sky_mode: LightDirectionalSkyMode);

    pub fn set_distance_fade(&mut self, rid: Rid, enabled: bool, begin: f32, shadow: f32, length: f32) -> Result<()> {
        let light = self.light_mut(rid)?;
        light.distance_fade = DistanceFade {
            enabled,
            begin,
            shadow,
            length,
        };
        light.changes.changed();
        Ok(())
    }

    pub fn purge_reference(&mut self, freed: Rid) {
        for (_, light) in self.owner.iter_mut() {
            if light.projector == freed {
                light.projector = Rid::INVALID;
                light.changes.changed();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_core::RidAllocator;

    #[test]
    fn defaults_match_param_table() {
        let light = Light::new(LightType::Spot);
        assert_eq!(light.param(LightParam::Energy), 1.0);
        assert_eq!(light.param(LightParam::Specular), 0.5);
        assert_eq!(light.param(LightParam::SpotAngle), 45.0);
        assert_eq!(light.param(LightParam::ShadowBias), 0.02);
        assert_eq!(light.param(LightParam::Intensity), 1.0);
        assert_eq!(light.cull_mask, u32::MAX);
        assert_eq!(LightParam::ALL.len(), LIGHT_PARAM_MAX);
    }

    #[test]
    fn omni_shadow_blur_follows_quality() {
        let alloc = RidAllocator::new();
        let mut store = LightStore::new();
        let l = alloc.alloc(RidKind::Light);
        store.initialize(l, LightType::Omni);
        store.set_param(l, LightParam::ShadowBlur, 1.0).unwrap();
        let light = store.get(l).unwrap();
        assert_eq!(light.effective_shadow_blur(ShadowQuality::SoftLow), 0.75);
        assert_eq!(light.effective_shadow_blur(ShadowQuality::SoftHigh), 1.5);
        assert_eq!(light.effective_shadow_blur(ShadowQuality::SoftUltra), 2.0);
        assert_eq!(light.effective_shadow_blur(ShadowQuality::Hard), 1.0);

        store.set_param(l, LightParam::Size, 0.2).unwrap();
        assert_eq!(store.get(l).unwrap().effective_shadow_blur(ShadowQuality::SoftUltra), 1.0);
    }

    #[test]
    fn directional_angular_distance_disables_multiplier() {
        let mut light = Light::new(LightType::Directional);
        light.params[LightParam::ShadowBlur.ordinal() as usize] = 1.0;
        assert_eq!(light.effective_shadow_blur(ShadowQuality::SoftHigh), 1.5);
        light.params[LightParam::Size.ordinal() as usize] = 0.5;
        assert_eq!(light.effective_shadow_blur(ShadowQuality::SoftHigh), 1.0);
    }

    #[test]
    fn omni_aabb_uses_range() {
        let mut light = Light::new(LightType::Omni);
        light.params[LightParam::Range.ordinal() as usize] = 5.0;
        assert_eq!(light.aabb().max, Vec3::splat(5.0));
    }
}
