//! Sky Store
//!
//! A sky is a sky-mode shader material plus radiance settings. Without a
//! GPU the radiance cubemap is not filtered; `bake_panorama` evaluates the
//! material's gradient colors into an equirectangular image instead.

use std::f32::consts::PI;

use vesper_core::math::Color;
use vesper_core::{ordinal_enum, ChangeTracker, Result, Rid, RidKind, ServerError, StringName, Variant};

use crate::image::{Image, ImageFormat};
use crate::material::MaterialStore;

ordinal_enum! {
    #[derive(Default)]
    pub enum SkyMode {
        #[default]
        Automatic = 0,
        Quality = 1,
        Incremental = 2,
        Realtime = 3,
    }
}

pub const DEFAULT_RADIANCE_SIZE: u32 = 256;

const SKY_TOP: Color = Color::rgb(0.385, 0.454, 0.55);
const SKY_HORIZON: Color = Color::rgb(0.6463, 0.6558, 0.6708);
const GROUND_BOTTOM: Color = Color::rgb(0.2, 0.169, 0.133);

#[derive(Debug, Clone)]
pub struct Sky {
    pub mode: SkyMode,
    pub radiance_size: u32,
    pub material: Rid,
    pub changes: ChangeTracker,
}

impl Default for Sky {
    fn default() -> Self {
        Self {
            mode: SkyMode::Automatic,
            radiance_size: DEFAULT_RADIANCE_SIZE,
            material: Rid::INVALID,
            changes: ChangeTracker::new(),
        }
    }
}

/// Gradient colors read from a sky material, with procedural defaults.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkyGradient {
    pub top: Color,
    pub horizon: Color,
    pub ground_horizon: Color,
    pub ground_bottom: Color,
}

impl Default for SkyGradient {
    fn default() -> Self {
        Self {
            top: SKY_TOP,
            horizon: SKY_HORIZON,
            ground_horizon: SKY_HORIZON,
            ground_bottom: GROUND_BOTTOM,
        }
    }
}

impl SkyGradient {
    pub fn from_material(materials: &MaterialStore, material: Rid) -> Self {
        let mut g = Self::default();
        let read = |name: &str, slot: &mut Color| {
            if let Variant::Color(c) = materials.get_param(material, StringName::new(name)) {
                *slot = c;
            }
        };
        read("sky_top_color", &mut g.top);
        read("sky_horizon_color", &mut g.horizon);
        read("ground_horizon_color", &mut g.ground_horizon);
        read("ground_bottom_color", &mut g.ground_bottom);
        g
    }

    /// Color seen along a direction with the given elevation in radians.
    #[must_use]
    pub fn sample(&self, elevation: f32) -> Color {
        let t = (elevation.abs() / (PI * 0.5)).clamp(0.0, 1.0);
        if elevation >= 0.0 {
            self.horizon.lerp(self.top, t)
        } else {
            self.ground_horizon.lerp(self.ground_bottom, t)
        }
    }
}

resource_store!(SkyStore, Sky, RidKind::Sky);

impl SkyStore {
    pub fn initialize(&mut self, rid: Rid) {
        self.owner.initialize(rid, Sky::default());
    }

    field_setters! {
        mode: SkyMode,
        material: Rid,
    }

    /// Must be a power of two of at least 16.
    pub fn set_radiance_size(&mut self, rid: Rid, size: u32) -> Result<()> {
        if size < 16 || !size.is_power_of_two() {
            return Err(ServerError::InvalidArgument(format!(
                "sky radiance size {size} must be a power of two >= 16"
            )));
        }
        let sky = self.state_mut(rid)?;
        sky.radiance_size = size;
        sky.changes.changed();
        Ok(())
    }

    /// Equirectangular `2·size × size` HDR image of the sky scaled by
    /// `energy`. A zero `size` uses the radiance size.
    pub fn bake_panorama(&self, rid: Rid, materials: &MaterialStore, energy: f32, size: u32) -> Result<Image> {
        let sky = self.owner.get(rid).ok_or(ServerError::InvalidRid(rid))?;
        let height = if size == 0 { sky.radiance_size } else { size };
        let width = height * 2;
        let gradient = SkyGradient::from_material(materials, sky.material);

        let mut image = Image::create_empty(width, height, false, ImageFormat::Rgbaf);
        for y in 0..height {
            let elevation = PI * 0.5 - (y as f32 + 0.5) / height as f32 * PI;
            let c = gradient.sample(elevation);
            let c = Color::rgba(c.r * energy, c.g * energy, c.b * energy, 1.0);
            for x in 0..width {
                image.set_pixel(x, y, c);
            }
        }
        Ok(image)
    }

    pub fn purge_reference(&mut self, freed: Rid) {
        for (_, sky) in self.owner.iter_mut() {
            if sky.material == freed {
                sky.material = Rid::INVALID;
                sky.changes.changed();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_core::RidAllocator;

    #[test]
    fn radiance_size_validation() {
        let alloc = RidAllocator::new();
        let mut store = SkyStore::new();
        let s = alloc.alloc(RidKind::Sky);
        store.initialize(s);
        assert_eq!(store.get(s).unwrap().radiance_size, 256);
        assert!(store.set_radiance_size(s, 100).is_err());
        store.set_radiance_size(s, 64).unwrap();
        assert_eq!(store.get(s).unwrap().radiance_size, 64);
    }

    #[test]
    fn panorama_uses_material_colors() {
        let alloc = RidAllocator::new();
        let mut skies = SkyStore::new();
        let mut materials = MaterialStore::new();
        let s = alloc.alloc(RidKind::Sky);
        let m = alloc.alloc(RidKind::Material);
        skies.initialize(s);
        materials.initialize(m);
        materials
            .set_param(m, StringName::new("sky_top_color"), Variant::Color(Color::BLUE))
            .unwrap();
        materials
            .set_param(m, StringName::new("ground_bottom_color"), Variant::Color(Color::GREEN))
            .unwrap();
        skies.set_material(s, m).unwrap();

        let img = skies.bake_panorama(s, &materials, 1.0, 64).unwrap();
        assert_eq!((img.width(), img.height()), (128, 64));
        let top = img.get_pixel(0, 0);
        let bottom = img.get_pixel(0, 63);
        assert!(top.b > 0.95 && top.r < 0.05);
        assert!(bottom.g > 0.95 && bottom.r < 0.05);
    }
}
