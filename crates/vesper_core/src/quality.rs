//! Global quality enumerations.
//!
//! These settings are process-wide rather than per resource; they are stored
//! in [`GlobalRenderConfig`](crate::settings::GlobalRenderConfig).

use serde::{Deserialize, Serialize};

use crate::ordinal_enum;

ordinal_enum! {
    /// Soft shadow filter quality for positional and directional shadows.
    #[derive(Default, Serialize, Deserialize)]
    pub enum ShadowQuality {
        Hard = 0,
        SoftVeryLow = 1,
        #[default]
        SoftLow = 2,
        SoftMedium = 3,
        SoftHigh = 4,
        SoftUltra = 5,
    }
}

impl ShadowQuality {
    /// Implicit multiplier applied to `shadow_blur` at this quality level.
    ///
    /// Only lights whose `light_size` and `light_angular_distance` are both
    /// zero are affected; see [`effective_shadow_blur`](Self::effective_shadow_blur).
    #[must_use]
    pub const fn blur_multiplier(self) -> f32 {
        match self {
            Self::SoftVeryLow | Self::SoftLow => 0.75,
            Self::SoftHigh => 1.5,
            Self::SoftUltra => 2.0,
            Self::Hard | Self::SoftMedium => 1.0,
        }
    }

    /// Blur radius actually used when filtering a shadow map.
    #[must_use]
    pub fn effective_shadow_blur(self, shadow_blur: f32, light_size: f32, angular_distance: f32) -> f32 {
        if light_size == 0.0 && angular_distance == 0.0 {
            shadow_blur * self.blur_multiplier()
        } else {
            shadow_blur
        }
    }

    /// Number of PCF taps used by the filter.
    #[must_use]
    pub const fn sample_count(self) -> u32 {
        match self {
            Self::Hard => 1,
            Self::SoftVeryLow => 4,
            Self::SoftLow => 8,
            Self::SoftMedium => 12,
            Self::SoftHigh => 24,
            Self::SoftUltra => 32,
        }
    }
}

ordinal_enum! {
    #[derive(Default)]
    pub enum SsrRoughnessQuality {
        Disabled = 0,
        #[default]
        Low = 1,
        Medium = 2,
        High = 3,
    }
}

ordinal_enum! {
    #[derive(Default)]
    pub enum SsaoQuality {
        VeryLow = 0,
        Low = 1,
        #[default]
        Medium = 2,
        High = 3,
        Ultra = 4,
    }
}

ordinal_enum! {
    #[derive(Default)]
    pub enum SsilQuality {
        VeryLow = 0,
        Low = 1,
        #[default]
        Medium = 2,
        High = 3,
        Ultra = 4,
    }
}

ordinal_enum! {
    #[derive(Default)]
    pub enum SdfgiYScale {
        Percent50 = 0,
        #[default]
        Percent75 = 1,
        Percent100 = 2,
    }
}

ordinal_enum! {
    #[derive(Default)]
    pub enum SdfgiRayCount {
        Rays4 = 0,
        Rays8 = 1,
        #[default]
        Rays16 = 2,
        Rays32 = 3,
        Rays64 = 4,
        Rays96 = 5,
        Rays128 = 6,
    }
}

impl SdfgiRayCount {
    #[must_use]
    pub const fn rays(self) -> u32 {
        match self {
            Self::Rays4 => 4,
            Self::Rays8 => 8,
            Self::Rays16 => 16,
            Self::Rays32 => 32,
            Self::Rays64 => 64,
            Self::Rays96 => 96,
            Self::Rays128 => 128,
        }
    }
}

ordinal_enum! {
    #[derive(Default)]
    pub enum SdfgiFramesToConverge {
        In5Frames = 0,
        In10Frames = 1,
        In15Frames = 2,
        #[default]
        In20Frames = 3,
        In25Frames = 4,
        In30Frames = 5,
    }
}

ordinal_enum! {
    #[derive(Default)]
    pub enum SdfgiFramesToUpdateLight {
        In1Frame = 0,
        #[default]
        In2Frames = 1,
        In4Frames = 2,
        In8Frames = 3,
        In16Frames = 4,
    }
}

ordinal_enum! {
    #[derive(Default)]
    pub enum SubSurfaceScatteringQuality {
        Disabled = 0,
        #[default]
        Low = 1,
        Medium = 2,
        High = 3,
    }
}

ordinal_enum! {
    #[derive(Default)]
    pub enum DofBokehShape {
        Box = 0,
        #[default]
        Hexagon = 1,
        Circle = 2,
    }
}

ordinal_enum! {
    #[derive(Default)]
    pub enum DofBlurQuality {
        VeryLow = 0,
        Low = 1,
        #[default]
        Medium = 2,
        High = 3,
    }
}

ordinal_enum! {
    /// Sampling filter used for decal and light projector textures.
    #[derive(Default)]
    pub enum TextureAtlasFilter {
        Nearest = 0,
        Linear = 1,
        NearestMipmaps = 2,
        #[default]
        LinearMipmaps = 3,
        NearestMipmapsAnisotropic = 4,
        LinearMipmapsAnisotropic = 5,
    }
}

ordinal_enum! {
    #[derive(Default)]
    pub enum VoxelGiQuality {
        #[default]
        Low = 0,
        High = 1,
    }
}

ordinal_enum! {
    #[derive(Default, Serialize, Deserialize)]
    pub enum OcclusionCullingBuildQuality {
        Low = 0,
        #[default]
        Medium = 1,
        High = 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blur_multiplier_applies_only_without_light_size() {
        let q = ShadowQuality::SoftUltra;
        assert_eq!(q.effective_shadow_blur(1.0, 0.0, 0.0), 2.0);
        assert_eq!(q.effective_shadow_blur(1.0, 0.5, 0.0), 1.0);
        assert_eq!(q.effective_shadow_blur(1.0, 0.0, 0.5), 1.0);
    }

    #[test]
    fn blur_multiplier_per_level() {
        let blur = |q: ShadowQuality| q.effective_shadow_blur(1.0, 0.0, 0.0);
        assert_eq!(blur(ShadowQuality::Hard), 1.0);
        assert_eq!(blur(ShadowQuality::SoftVeryLow), 0.75);
        assert_eq!(blur(ShadowQuality::SoftLow), 0.75);
        assert_eq!(blur(ShadowQuality::SoftMedium), 1.0);
        assert_eq!(blur(ShadowQuality::SoftHigh), 1.5);
        assert_eq!(blur(ShadowQuality::SoftUltra), 2.0);
    }
}
