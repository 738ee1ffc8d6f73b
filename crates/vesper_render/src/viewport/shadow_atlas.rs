//! Shadow atlases
//!
//! Positional lights (omni and spot) share one square atlas per viewport.
//! The atlas is split into four quadrants; each quadrant is subdivided into
//! `subdiv` equal square slots, where `subdiv` must be a power of four up to
//! 1024 (or zero to disable the quadrant). Every frame the visible shadowed
//! lights are ranked by screen importance and handed the largest free slots.
//!
//! Directional lights render into the global directional atlas, split into
//! 1, 2 or 4 cascades.

use glam::{Mat4, Vec3};
use vesper_core::math::Rect2;
use vesper_core::{Result, Rid, ServerError};
use vesper_resources::light::LightDirectionalShadowMode;

/// Subdivision values a quadrant accepts.
pub const VALID_SUBDIVISIONS: [u32; 7] = [0, 1, 4, 16, 64, 256, 1024];

/// Maximum cascade count per directional light.
pub const MAX_CASCADES: usize = 4;

/// One light's region of the positional atlas.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowSlot {
    pub light: Rid,
    pub quadrant: u32,
    pub index: u32,
    /// Pixel rectangle inside the atlas.
    pub rect: Rect2,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShadowAtlas {
    size: u32,
    use_16_bits: bool,
    subdivisions: [u32; 4],
    slots: Vec<ShadowSlot>,
}

impl Default for ShadowAtlas {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ShadowAtlas {
    #[must_use]
    pub fn new(size: u32) -> Self {
        Self {
            size,
            use_16_bits: true,
            subdivisions: [1, 4, 16, 64],
            slots: Vec::new(),
        }
    }

    #[must_use]
    pub fn size(&self) -> u32 {
        self.size
    }

    #[must_use]
    pub fn use_16_bits(&self) -> bool {
        self.use_16_bits
    }

    /// Size 0 disables positional shadows for the viewport; other sizes are
    /// rounded up to a power of two.
    pub fn set_size(&mut self, size: u32, use_16_bits: bool) {
        self.size = if size == 0 { 0 } else { size.next_power_of_two() };
        self.use_16_bits = use_16_bits;
        self.slots.clear();
    }

    #[must_use]
    pub fn subdivisions(&self) -> [u32; 4] {
        self.subdivisions
    }

    pub fn set_quadrant_subdivision(&mut self, quadrant: u32, subdiv: u32) -> Result<()> {
        if quadrant >= 4 {
            return Err(ServerError::OutOfRange {
                what: "shadow atlas quadrant",
                index: quadrant as usize,
                limit: 4,
            });
        }
        if !VALID_SUBDIVISIONS.contains(&subdiv) {
            return Err(ServerError::InvalidArgument(format!(
                "quadrant subdivision {subdiv} is not one of {VALID_SUBDIVISIONS:?}"
            )));
        }
        self.subdivisions[quadrant as usize] = subdiv;
        self.slots.clear();
        Ok(())
    }

    /// Edge length in pixels of a slot in `quadrant`, 0 when disabled.
    #[must_use]
    pub fn slot_size(&self, quadrant: u32) -> u32 {
        let subdiv = self.subdivisions.get(quadrant as usize).copied().unwrap_or(0);
        if subdiv == 0 || self.size == 0 {
            return 0;
        }
        let per_side = subdiv.isqrt();
        (self.size / 2) / per_side
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        if self.size == 0 {
            return 0;
        }
        self.subdivisions.iter().map(|s| *s as usize).sum()
    }

    fn slot_rect(&self, quadrant: u32, index: u32) -> Rect2 {
        let half = (self.size / 2) as f32;
        let slot = self.slot_size(quadrant) as f32;
        let per_side = self.subdivisions[quadrant as usize].isqrt().max(1);
        let qx = (quadrant % 2) as f32 * half;
        let qy = (quadrant / 2) as f32 * half;
        Rect2::from_xywh(
            qx + (index % per_side) as f32 * slot,
            qy + (index / per_side) as f32 * slot,
            slot,
            slot,
        )
    }

    /// Assigns slots to `lights`, given as `(light, importance)`. The most
    /// important lights get the largest slots; lights beyond capacity get
    /// none. Returns the lights that were dropped.
    pub fn assign(&mut self, lights: &[(Rid, f32)]) -> Vec<Rid> {
        self.slots.clear();
        let mut ranked: Vec<(Rid, f32)> = lights.to_vec();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        let mut quadrants: Vec<u32> = (0..4).filter(|q| self.slot_size(*q) > 0).collect();
        quadrants.sort_by_key(|q| (std::cmp::Reverse(self.slot_size(*q)), *q));

        let free: Vec<(u32, u32)> = quadrants
            .iter()
            .flat_map(|q| (0..self.subdivisions[*q as usize]).map(move |i| (*q, i)))
            .take(ranked.len())
            .collect();
        let dropped = ranked.iter().skip(free.len()).map(|(l, _)| *l).collect();
        let slots = ranked
            .iter()
            .zip(free)
            .map(|((light, _), (quadrant, index))| ShadowSlot {
                light: *light,
                quadrant,
                index,
                rect: self.slot_rect(quadrant, index),
            })
            .collect();
        self.slots = slots;
        dropped
    }

    #[must_use]
    pub fn slot_of(&self, light: Rid) -> Option<&ShadowSlot> {
        self.slots.iter().find(|s| s.light == light)
    }

    #[must_use]
    pub fn slots(&self) -> &[ShadowSlot] {
        &self.slots
    }
}

// ============================================================================
// Light projections
// ============================================================================

/// Number of cascades a directional shadow mode renders.
#[must_use]
pub fn cascade_count(mode: LightDirectionalShadowMode) -> usize {
    match mode {
        LightDirectionalShadowMode::Orthogonal => 1,
        LightDirectionalShadowMode::Parallel2Splits => 2,
        LightDirectionalShadowMode::Parallel4Splits => 4,
    }
}

/// Far distance of each cascade. `offsets` are the light's split params
/// as fractions of `max_distance`; the last cascade always reaches it.
#[must_use]
pub fn cascade_splits(count: usize, offsets: [f32; 3], max_distance: f32) -> [f32; MAX_CASCADES] {
    let mut splits = [0.0; MAX_CASCADES];
    let n = count.clamp(1, MAX_CASCADES);
    for (i, split) in splits.iter_mut().enumerate().take(n - 1) {
        *split = offsets[i].clamp(0.0, 1.0) * max_distance;
    }
    splits[n - 1] = max_distance;
    splits
}

/// Region of the directional atlas used by `cascade` of a light rendering
/// `count` cascades.
#[must_use]
pub fn cascade_rect(atlas_size: u32, count: usize, cascade: usize) -> Rect2 {
    let s = atlas_size as f32;
    match count {
        1 => Rect2::from_xywh(0.0, 0.0, s, s),
        2 => Rect2::from_xywh(0.0, cascade as f32 * s * 0.5, s, s * 0.5),
        _ => Rect2::from_xywh((cascade % 2) as f32 * s * 0.5, (cascade / 2) as f32 * s * 0.5, s * 0.5, s * 0.5),
    }
}

/// Orthographic view-projection of one directional cascade, fit around a
/// sphere of `radius` at `center`.
#[must_use]
pub fn directional_view_proj(direction: Vec3, center: Vec3, radius: f32, pancake: f32) -> Mat4 {
    let dir = direction.try_normalize().unwrap_or(Vec3::NEG_Z);
    let up = if dir.y.abs() > 0.99 { Vec3::Z } else { Vec3::Y };
    let eye = center - dir * (radius + pancake);
    let view = Mat4::look_at_rh(eye, center, up);
    let proj = Mat4::orthographic_rh(-radius, radius, -radius, radius, 0.0, radius * 2.0 + pancake);
    proj * view
}

/// Perspective view-projection of a spot light.
#[must_use]
pub fn spot_view_proj(position: Vec3, direction: Vec3, angle_degrees: f32, range: f32) -> Mat4 {
    let dir = direction.try_normalize().unwrap_or(Vec3::NEG_Z);
    let up = if dir.y.abs() > 0.99 { Vec3::Z } else { Vec3::Y };
    let view = Mat4::look_at_rh(position, position + dir, up);
    let fov = (angle_degrees.clamp(1.0, 89.0) * 2.0).to_radians();
    let proj = Mat4::perspective_rh(fov, 1.0, 0.05, range.max(0.1));
    proj * view
}

/// The six cube-face view-projections of an omni light.
#[must_use]
pub fn omni_cube_view_projs(position: Vec3, range: f32) -> [Mat4; 6] {
    const FACES: [(Vec3, Vec3); 6] = [
        (Vec3::X, Vec3::NEG_Y),
        (Vec3::NEG_X, Vec3::NEG_Y),
        (Vec3::Y, Vec3::Z),
        (Vec3::NEG_Y, Vec3::NEG_Z),
        (Vec3::Z, Vec3::NEG_Y),
        (Vec3::NEG_Z, Vec3::NEG_Y),
    ];
    let proj = Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, 0.05, range.max(0.1));
    FACES.map(|(dir, up)| proj * Mat4::look_at_rh(position, position + dir, up))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_core::RidAllocator;
    use vesper_core::RidKind;

    #[test]
    fn only_powers_of_four_are_accepted() {
        let mut atlas = ShadowAtlas::new(4096);
        for s in VALID_SUBDIVISIONS {
            assert!(atlas.set_quadrant_subdivision(0, s).is_ok(), "{s}");
        }
        for s in [2, 3, 8, 32, 2048] {
            assert!(atlas.set_quadrant_subdivision(0, s).is_err(), "{s}");
        }
        assert!(atlas.set_quadrant_subdivision(4, 1).is_err());
    }

    #[test]
    fn slot_sizes_follow_subdivision() {
        let atlas = ShadowAtlas::new(4096);
        assert_eq!(atlas.slot_size(0), 2048);
        assert_eq!(atlas.slot_size(1), 1024);
        assert_eq!(atlas.slot_size(2), 512);
        assert_eq!(atlas.slot_size(3), 256);
        assert_eq!(atlas.capacity(), 1 + 4 + 16 + 64);
    }

    #[test]
    fn important_lights_get_large_slots() {
        let alloc = RidAllocator::new();
        let a = alloc.alloc(RidKind::Light);
        let b = alloc.alloc(RidKind::Light);
        let c = alloc.alloc(RidKind::Light);
        let mut atlas = ShadowAtlas::new(1024);
        atlas.set_quadrant_subdivision(0, 1).unwrap();
        atlas.set_quadrant_subdivision(1, 0).unwrap();
        atlas.set_quadrant_subdivision(2, 0).unwrap();
        atlas.set_quadrant_subdivision(3, 4).unwrap();

        let dropped = atlas.assign(&[(a, 0.1), (b, 0.9), (c, 0.5)]);
        assert!(dropped.is_empty());
        assert_eq!(atlas.slot_of(b).unwrap().quadrant, 0);
        assert_eq!(atlas.slot_of(b).unwrap().rect, Rect2::from_xywh(0.0, 0.0, 512.0, 512.0));
        let slot_c = atlas.slot_of(c).unwrap();
        assert_eq!((slot_c.quadrant, slot_c.index), (3, 0));
        assert_eq!(slot_c.rect, Rect2::from_xywh(512.0, 512.0, 256.0, 256.0));
        assert_eq!(atlas.slot_of(a).unwrap().rect, Rect2::from_xywh(768.0, 512.0, 256.0, 256.0));
    }

    #[test]
    fn overflowing_lights_are_dropped() {
        let alloc = RidAllocator::new();
        let lights: Vec<(Rid, f32)> = (0..3).map(|i| (alloc.alloc(RidKind::Light), i as f32)).collect();
        let mut atlas = ShadowAtlas::new(512);
        for q in 0..4 {
            atlas.set_quadrant_subdivision(q, if q == 0 { 1 } else { 0 }).unwrap();
        }
        let dropped = atlas.assign(&lights);
        assert_eq!(dropped.len(), 2);
        assert_eq!(atlas.slots()[0].light, lights[2].0);
    }

    #[test]
    fn last_cascade_reaches_max_distance() {
        let s = cascade_splits(4, [0.1, 0.3, 0.6], 100.0);
        assert_eq!(s, [10.0, 30.0, 60.0, 100.0]);
        assert_eq!(cascade_splits(1, [0.1, 0.3, 0.6], 50.0)[0], 50.0);
        assert_eq!(cascade_rect(1024, 4, 3), Rect2::from_xywh(512.0, 512.0, 512.0, 512.0));
    }
}
