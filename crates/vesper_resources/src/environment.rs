//! Environment Store
//!
//! Background, ambient light and post-processing state attached to a
//! scenario or camera. Each effect is a plain parameter group; the group
//! setters (`set_glow`, `set_ssao`, ...) replace the whole group at once.

use glam::{Mat3, Vec3};
use vesper_core::math::Color;
use vesper_core::quality::SdfgiYScale;
use vesper_core::{ordinal_enum, ChangeTracker, Result, Rid, RidKind, ServerError};

ordinal_enum! {
    #[derive(Default)]
    pub enum EnvironmentBg {
        #[default]
        ClearColor = 0,
        Color = 1,
        Sky = 2,
        Canvas = 3,
        Keep = 4,
        CameraFeed = 5,
    }
}

ordinal_enum! {
    #[derive(Default)]
    pub enum EnvironmentAmbientSource {
        #[default]
        Bg = 0,
        Disabled = 1,
        Color = 2,
        Sky = 3,
    }
}

ordinal_enum! {
    #[derive(Default)]
    pub enum EnvironmentReflectionSource {
        #[default]
        Bg = 0,
        Disabled = 1,
        Sky = 2,
    }
}

ordinal_enum! {
    #[derive(Default)]
    pub enum EnvironmentGlowBlendMode {
        Additive = 0,
        Screen = 1,
        #[default]
        Softlight = 2,
        Replace = 3,
        Mix = 4,
    }
}

ordinal_enum! {
    #[derive(Default)]
    pub enum EnvironmentFogMode {
        #[default]
        Exponential = 0,
        Depth = 1,
    }
}

ordinal_enum! {
    #[derive(Default)]
    pub enum EnvironmentToneMapper {
        #[default]
        Linear = 0,
        Reinhard = 1,
        Filmic = 2,
        Aces = 3,
        Agx = 4,
    }
}

pub const MAX_GLOW_LEVELS: usize = 7;
pub const MAX_SDFGI_CASCADES: u32 = 8;

// ============================================================================
// Parameter groups
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmbientParams {
    pub color: Color,
    pub source: EnvironmentAmbientSource,
    pub energy: f32,
    pub sky_contribution: f32,
    pub reflection_source: EnvironmentReflectionSource,
}

impl Default for AmbientParams {
    fn default() -> Self {
        Self {
            color: Color::BLACK,
            source: EnvironmentAmbientSource::Bg,
            energy: 1.0,
            sky_contribution: 1.0,
            reflection_source: EnvironmentReflectionSource::Bg,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlowParams {
    pub enabled: bool,
    pub levels: [f32; MAX_GLOW_LEVELS],
    pub intensity: f32,
    pub strength: f32,
    pub mix: f32,
    pub bloom_threshold: f32,
    pub blend_mode: EnvironmentGlowBlendMode,
    pub hdr_bleed_threshold: f32,
    pub hdr_bleed_scale: f32,
    pub hdr_luminance_cap: f32,
    pub glow_map_strength: f32,
    pub glow_map: Rid,
}

impl Default for GlowParams {
    fn default() -> Self {
        Self {
            enabled: false,
            levels: [0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 0.0],
            intensity: 0.8,
            strength: 1.0,
            mix: 0.05,
            bloom_threshold: 0.0,
            blend_mode: EnvironmentGlowBlendMode::Softlight,
            hdr_bleed_threshold: 1.0,
            hdr_bleed_scale: 2.0,
            hdr_luminance_cap: 12.0,
            glow_map_strength: 0.8,
            glow_map: Rid::INVALID,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TonemapParams {
    pub mode: EnvironmentToneMapper,
    pub exposure: f32,
    pub white: f32,
}

impl Default for TonemapParams {
    fn default() -> Self {
        Self {
            mode: EnvironmentToneMapper::Linear,
            exposure: 1.0,
            white: 1.0,
        }
    }
}

impl TonemapParams {
    /// Maps a linear HDR color into `[0, 1]`.
    #[must_use]
    pub fn apply(&self, color: Color) -> Color {
        let white = self.white.max(1e-3);
        let map = |v: f32| -> f32 {
            let v = (v * self.exposure).max(0.0);
            let mapped = match self.mode {
                EnvironmentToneMapper::Linear => v,
                EnvironmentToneMapper::Reinhard => (v * (1.0 + v / (white * white))) / (1.0 + v),
                EnvironmentToneMapper::Filmic => {
                    let f = |x: f32| {
                        let (a, b, c, d, e, f) = (0.22, 0.3, 0.1, 0.2, 0.01, 0.3);
                        ((x * (a * x + c * b) + d * e) / (x * (a * x + b) + d * f)) - e / f
                    };
                    f(v) / f(white)
                }
                EnvironmentToneMapper::Aces => {
                    let x = v * 0.6;
                    (x * (2.51 * x + 0.03)) / (x * (2.43 * x + 0.59) + 0.14)
                }
                EnvironmentToneMapper::Agx => {
                    let x = (v / (v + 1.0)).max(1e-6);
                    x * x * (3.0 - 2.0 * x)
                }
            };
            mapped.clamp(0.0, 1.0)
        };
        Color::rgba(map(color.r), map(color.g), map(color.b), color.a)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdjustmentParams {
    pub enabled: bool,
    pub brightness: f32,
    pub contrast: f32,
    pub saturation: f32,
    pub use_1d_color_correction: bool,
    pub color_correction: Rid,
}

impl Default for AdjustmentParams {
    fn default() -> Self {
        Self {
            enabled: false,
            brightness: 1.0,
            contrast: 1.0,
            saturation: 1.0,
            use_1d_color_correction: true,
            color_correction: Rid::INVALID,
        }
    }
}

impl AdjustmentParams {
    #[must_use]
    pub fn apply(&self, color: Color) -> Color {
        if !self.enabled {
            return color;
        }
        let rgb = Vec3::new(color.r, color.g, color.b) * self.brightness;
        let rgb = (rgb - Vec3::splat(0.5)) * self.contrast + Vec3::splat(0.5);
        let luma = rgb.dot(Vec3::new(0.2126, 0.7152, 0.0722));
        let rgb = Vec3::splat(luma).lerp(rgb, self.saturation);
        Color::rgba(rgb.x, rgb.y, rgb.z, color.a)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SsrParams {
    pub enabled: bool,
    pub max_steps: u32,
    pub fade_in: f32,
    pub fade_out: f32,
    pub depth_tolerance: f32,
}

impl Default for SsrParams {
    fn default() -> Self {
        Self {
            enabled: false,
            max_steps: 64,
            fade_in: 0.15,
            fade_out: 2.0,
            depth_tolerance: 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SsaoParams {
    pub enabled: bool,
    pub radius: f32,
    pub intensity: f32,
    pub power: f32,
    pub detail: f32,
    pub horizon: f32,
    pub sharpness: f32,
    pub light_affect: f32,
    pub ao_channel_affect: f32,
}

impl Default for SsaoParams {
    fn default() -> Self {
        Self {
            enabled: false,
            radius: 1.0,
            intensity: 2.0,
            power: 1.5,
            detail: 0.5,
            horizon: 0.06,
            sharpness: 0.98,
            light_affect: 0.0,
            ao_channel_affect: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SsilParams {
    pub enabled: bool,
    pub radius: f32,
    pub intensity: f32,
    pub sharpness: f32,
    pub normal_rejection: f32,
}

impl Default for SsilParams {
    fn default() -> Self {
        Self {
            enabled: false,
            radius: 5.0,
            intensity: 1.0,
            sharpness: 0.98,
            normal_rejection: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SdfgiParams {
    pub enabled: bool,
    pub cascades: u32,
    pub min_cell_size: f32,
    pub y_scale: SdfgiYScale,
    pub use_occlusion: bool,
    pub bounce_feedback: f32,
    pub read_sky: bool,
    pub energy: f32,
    pub normal_bias: f32,
    pub probe_bias: f32,
}

impl Default for SdfgiParams {
    fn default() -> Self {
        Self {
            enabled: false,
            cascades: 4,
            min_cell_size: 0.2,
            y_scale: SdfgiYScale::Percent75,
            use_occlusion: false,
            bounce_feedback: 0.5,
            read_sky: true,
            energy: 1.0,
            normal_bias: 1.1,
            probe_bias: 1.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FogParams {
    pub enabled: bool,
    pub mode: EnvironmentFogMode,
    pub light_color: Color,
    pub light_energy: f32,
    pub sun_scatter: f32,
    pub density: f32,
    pub height: f32,
    pub height_density: f32,
    pub aerial_perspective: f32,
    pub sky_affect: f32,
    pub depth_curve: f32,
    pub depth_begin: f32,
    pub depth_end: f32,
}

impl Default for FogParams {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: EnvironmentFogMode::Exponential,
            light_color: Color::rgb(0.518, 0.553, 0.608),
            light_energy: 1.0,
            sun_scatter: 0.0,
            density: 0.01,
            height: 0.0,
            height_density: 0.0,
            aerial_perspective: 0.0,
            sky_affect: 1.0,
            depth_curve: 1.0,
            depth_begin: 10.0,
            depth_end: 100.0,
        }
    }
}

impl FogParams {
    /// Fog opacity at `distance` from the camera.
    #[must_use]
    pub fn factor(&self, distance: f32) -> f32 {
        if !self.enabled {
            return 0.0;
        }
        match self.mode {
            EnvironmentFogMode::Exponential => 1.0 - (-distance.max(0.0) * self.density).exp(),
            EnvironmentFogMode::Depth => {
                let span = (self.depth_end - self.depth_begin).max(1e-4);
                ((distance - self.depth_begin) / span).clamp(0.0, 1.0).powf(self.depth_curve)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumetricFogParams {
    pub enabled: bool,
    pub density: f32,
    pub albedo: Color,
    pub emission: Color,
    pub emission_energy: f32,
    pub anisotropy: f32,
    pub length: f32,
    pub detail_spread: f32,
    pub gi_inject: f32,
    pub temporal_reprojection: bool,
    pub temporal_reprojection_amount: f32,
    pub ambient_inject: f32,
    pub sky_affect: f32,
}

impl Default for VolumetricFogParams {
    fn default() -> Self {
        Self {
            enabled: false,
            density: 0.05,
            albedo: Color::WHITE,
            emission: Color::BLACK,
            emission_energy: 1.0,
            anisotropy: 0.2,
            length: 64.0,
            detail_spread: 2.0,
            gi_inject: 1.0,
            temporal_reprojection: true,
            temporal_reprojection_amount: 0.9,
            ambient_inject: 0.0,
            sky_affect: 1.0,
        }
    }
}

// ============================================================================
// Environment
// ============================================================================

#[derive(Debug, Clone)]
pub struct Environment {
    pub background: EnvironmentBg,
    pub sky: Rid,
    pub sky_custom_fov: f32,
    pub sky_orientation: Mat3,
    pub bg_color: Color,
    pub bg_energy_multiplier: f32,
    pub bg_intensity: f32,
    pub canvas_max_layer: i32,
    pub camera_feed_id: i32,
    pub ambient: AmbientParams,
    pub glow: GlowParams,
    pub tonemap: TonemapParams,
    pub adjustment: AdjustmentParams,
    pub ssr: SsrParams,
    pub ssao: SsaoParams,
    pub ssil: SsilParams,
    pub sdfgi: SdfgiParams,
    pub fog: FogParams,
    pub volumetric_fog: VolumetricFogParams,
    pub changes: ChangeTracker,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            background: EnvironmentBg::ClearColor,
            sky: Rid::INVALID,
            sky_custom_fov: 0.0,
            sky_orientation: Mat3::IDENTITY,
            bg_color: Color::BLACK,
            bg_energy_multiplier: 1.0,
            bg_intensity: 30000.0,
            canvas_max_layer: 0,
            camera_feed_id: 1,
            ambient: AmbientParams::default(),
            glow: GlowParams::default(),
            tonemap: TonemapParams::default(),
            adjustment: AdjustmentParams::default(),
            ssr: SsrParams::default(),
            ssao: SsaoParams::default(),
            ssil: SsilParams::default(),
            sdfgi: SdfgiParams::default(),
            fog: FogParams::default(),
            volumetric_fog: VolumetricFogParams::default(),
            changes: ChangeTracker::new(),
        }
    }
}

impl Environment {
    /// Post-process a final HDR color: tonemap, then adjustments.
    #[must_use]
    pub fn post_process(&self, color: Color) -> Color {
        self.adjustment.apply(self.tonemap.apply(color))
    }
}

resource_store!(EnvironmentStore, Environment, RidKind::Environment);

impl EnvironmentStore {
    pub fn initialize(&mut self, rid: Rid) {
        self.owner.initialize(rid, Environment::default());
    }

    field_setters! {
        background: EnvironmentBg,
        sky: Rid,
        sky_custom_fov: f32,
        sky_orientation: Mat3,
        bg_color: Color,
        canvas_max_layer: i32,
        camera_feed_id: i32,
        ambient: AmbientParams,
        tonemap: TonemapParams,
        adjustment: AdjustmentParams,
        ssr: SsrParams,
        ssao: SsaoParams,
        ssil: SsilParams,
        fog: FogParams,
        volumetric_fog: VolumetricFogParams,
    }

    pub fn set_bg_energy(&mut self, rid: Rid, multiplier: f32, intensity: f32) -> Result<()> {
        let env = self.state_mut(rid)?;
        env.bg_energy_multiplier = multiplier;
        env.bg_intensity = intensity;
        env.changes.changed();
        Ok(())
    }

    pub fn set_glow(&mut self, rid: Rid, glow: GlowParams) -> Result<()> {
        if glow.levels.iter().any(|l| *l < 0.0) {
            return Err(ServerError::InvalidArgument("glow level intensities must be >= 0".into()));
        }
        let env = self.state_mut(rid)?;
        env.glow = glow;
        env.changes.changed();
        Ok(())
    }

    pub fn set_sdfgi(&mut self, rid: Rid, sdfgi: SdfgiParams) -> Result<()> {
        if !(1..=MAX_SDFGI_CASCADES).contains(&sdfgi.cascades) {
            return Err(ServerError::OutOfRange {
                what: "sdfgi cascades",
                index: sdfgi.cascades as usize,
                limit: MAX_SDFGI_CASCADES as usize,
            });
        }
        let env = self.state_mut(rid)?;
        env.sdfgi = sdfgi;
        env.changes.changed();
        Ok(())
    }

    pub fn purge_reference(&mut self, freed: Rid) {
        for (_, env) in self.owner.iter_mut() {
            let mut touched = false;
            for r in [&mut env.sky, &mut env.glow.glow_map, &mut env.adjustment.color_correction] {
                if *r == freed {
                    *r = Rid::INVALID;
                    touched = true;
                }
            }
            if touched {
                env.changes.changed();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_core::RidAllocator;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn tonemappers_stay_in_range() {
        for mode in EnvironmentToneMapper::ALL {
            let t = TonemapParams {
                mode: *mode,
                exposure: 1.0,
                white: 4.0,
            };
            for v in [0.0, 0.5, 1.0, 8.0, 100.0] {
                let c = t.apply(Color::rgb(v, v, v));
                assert!((0.0..=1.0).contains(&c.r), "{mode:?} {v} -> {}", c.r);
            }
        }
        let linear = TonemapParams::default();
        assert!(approx(linear.apply(Color::rgb(0.25, 0.5, 2.0)).g, 0.5));
        assert!(approx(linear.apply(Color::rgb(0.25, 0.5, 2.0)).b, 1.0));
    }

    #[test]
    fn adjustments_desaturate() {
        let adj = AdjustmentParams {
            enabled: true,
            saturation: 0.0,
            ..Default::default()
        };
        let c = adj.apply(Color::RED);
        assert!(approx(c.r, c.g) && approx(c.g, c.b));
    }

    #[test]
    fn depth_fog_ramps_between_begin_and_end() {
        let fog = FogParams {
            enabled: true,
            mode: EnvironmentFogMode::Depth,
            ..Default::default()
        };
        assert_eq!(fog.factor(5.0), 0.0);
        assert!(approx(fog.factor(55.0), 0.5));
        assert_eq!(fog.factor(500.0), 1.0);
    }

    #[test]
    fn group_setters_validate() {
        let alloc = RidAllocator::new();
        let mut store = EnvironmentStore::new();
        let e = alloc.alloc(RidKind::Environment);
        store.initialize(e);
        let bad = SdfgiParams {
            cascades: 9,
            ..Default::default()
        };
        assert!(store.set_sdfgi(e, bad).is_err());
        store
            .set_ssao(
                e,
                SsaoParams {
                    enabled: true,
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(store.get(e).unwrap().ssao.enabled);
        store.set_background(e, EnvironmentBg::Sky).unwrap();
        assert_eq!(store.get(e).unwrap().background.ordinal(), 2);
    }
}
