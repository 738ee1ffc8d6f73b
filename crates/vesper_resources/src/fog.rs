//! Fog volumes: a shape and size plus the fog material filling it.

use glam::Vec3;
use vesper_core::math::Aabb;
use vesper_core::{ordinal_enum, ChangeTracker, Rid, RidKind};

ordinal_enum! {
    #[derive(Default)]
    pub enum FogVolumeShape {
        Ellipsoid = 0,
        Cone = 1,
        Cylinder = 2,
        #[default]
        Box = 3,
        World = 4,
    }
}

#[derive(Debug, Clone)]
pub struct FogVolume {
    pub shape: FogVolumeShape,
    pub size: Vec3,
    pub material: Rid,
    pub changes: ChangeTracker,
}

impl Default for FogVolume {
    fn default() -> Self {
        Self {
            shape: FogVolumeShape::Box,
            size: Vec3::splat(2.0),
            material: Rid::INVALID,
            changes: ChangeTracker::new(),
        }
    }
}

impl FogVolume {
    /// World volumes cover everything and report an empty box.
    #[must_use]
    pub fn aabb(&self) -> Aabb {
        match self.shape {
            FogVolumeShape::World => Aabb::ZERO,
            _ => Aabb::from_center_extents(Vec3::ZERO, self.size * 0.5),
        }
    }
}

resource_store!(FogVolumeStore, FogVolume, RidKind::FogVolume);

impl FogVolumeStore {
    pub fn initialize(&mut self, rid: Rid) {
        self.owner.initialize(rid, FogVolume::default());
    }

    field_setters! {
        shape: FogVolumeShape,
        size: Vec3,
        material: Rid,
    }

    pub fn purge_reference(&mut self, freed: Rid) {
        for (_, fog) in self.owner.iter_mut() {
            if fog.material == freed {
                fog.material = Rid::INVALID;
                fog.changes.changed();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_core::RidAllocator;

    #[test]
    fn world_fog_has_no_bounds() {
        let alloc = RidAllocator::new();
        let mut store = FogVolumeStore::new();
        let f = alloc.alloc(RidKind::FogVolume);
        store.initialize(f);
        assert_eq!(store.get(f).unwrap().aabb().max, Vec3::ONE);
        store.set_shape(f, FogVolumeShape::World).unwrap();
        assert_eq!(store.get(f).unwrap().aabb(), Aabb::ZERO);
    }
}
