//! Camera attributes: depth of field and exposure.

use vesper_core::{ChangeTracker, Rid, RidKind};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DofBlurParams {
    pub far_enabled: bool,
    pub far_distance: f32,
    pub far_transition: f32,
    pub near_enabled: bool,
    pub near_distance: f32,
    pub near_transition: f32,
    pub amount: f32,
}

impl Default for DofBlurParams {
    fn default() -> Self {
        Self {
            far_enabled: false,
            far_distance: 10.0,
            far_transition: 5.0,
            near_enabled: false,
            near_distance: 2.0,
            near_transition: 1.0,
            amount: 0.1,
        }
    }
}

impl DofBlurParams {
    /// Blur weight in `[0, 1]` for a view-space depth.
    #[must_use]
    pub fn blur_at(&self, depth: f32) -> f32 {
        let far = if self.far_enabled && depth > self.far_distance {
            ((depth - self.far_distance) / self.far_transition.max(1e-4)).min(1.0)
        } else {
            0.0
        };
        let near = if self.near_enabled && depth < self.near_distance {
            ((self.near_distance - depth) / self.near_transition.max(1e-4)).min(1.0)
        } else {
            0.0
        };
        far.max(near) * self.amount.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutoExposureParams {
    pub enabled: bool,
    pub min_sensitivity: f32,
    pub max_sensitivity: f32,
    pub speed: f32,
    pub scale: f32,
}

impl Default for AutoExposureParams {
    fn default() -> Self {
        Self {
            enabled: false,
            min_sensitivity: 0.0,
            max_sensitivity: 8.0,
            speed: 0.5,
            scale: 0.4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CameraAttributes {
    pub dof_blur: DofBlurParams,
    pub exposure_multiplier: f32,
    pub exposure_normalization: f32,
    pub auto_exposure: AutoExposureParams,
    pub changes: ChangeTracker,
}

impl Default for CameraAttributes {
    fn default() -> Self {
        Self {
            dof_blur: DofBlurParams::default(),
            exposure_multiplier: 1.0,
            exposure_normalization: 1.0,
            auto_exposure: AutoExposureParams::default(),
            changes: ChangeTracker::new(),
        }
    }
}

impl CameraAttributes {
    #[must_use]
    pub fn exposure(&self) -> f32 {
        self.exposure_multiplier * self.exposure_normalization
    }
}

resource_store!(CameraAttributesStore, CameraAttributes, RidKind::CameraAttributes);

impl CameraAttributesStore {
    pub fn initialize(&mut self, rid: Rid) {
        self.owner.initialize(rid, CameraAttributes::default());
    }

    field_setters! {
        dof_blur: DofBlurParams,
        auto_exposure: AutoExposureParams,
    }

    pub fn set_exposure(&mut self, rid: Rid, multiplier: f32, normalization: f32) -> vesper_core::Result<()> {
        let attrs = self.state_mut(rid)?;
        attrs.exposure_multiplier = multiplier;
        attrs.exposure_normalization = normalization;
        attrs.changes.changed();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dof_blur_ramps() {
        let dof = DofBlurParams {
            far_enabled: true,
            amount: 1.0,
            ..Default::default()
        };
        assert_eq!(dof.blur_at(5.0), 0.0);
        assert_eq!(dof.blur_at(12.5), 0.5);
        assert_eq!(dof.blur_at(100.0), 1.0);
    }

    #[test]
    fn exposure_combines_multiplier_and_normalization() {
        let alloc = vesper_core::RidAllocator::new();
        let mut store = CameraAttributesStore::new();
        let a = alloc.alloc(RidKind::CameraAttributes);
        store.initialize(a);
        store.set_exposure(a, 2.0, 0.5).unwrap();
        assert_eq!(store.get(a).unwrap().exposure(), 1.0);
    }
}
