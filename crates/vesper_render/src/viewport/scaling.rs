//! 3D resolution scaling.

use glam::UVec2;

use super::Scaling3DMode;

pub const MIN_SCALE: f32 = 0.25;
pub const MAX_SCALE: f32 = 2.0;

/// Resolved scaling state of one viewport for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalingPlan {
    pub mode: Scaling3DMode,
    pub scale: f32,
    /// Size of the internal 3D buffers.
    pub internal_size: UVec2,
    /// Mipmap bias applied to 3D texture sampling.
    pub mipmap_bias: f32,
    pub fsr_sharpness: f32,
}

/// Clamps a requested scale. FSR modes only ever downscale.
#[must_use]
pub fn clamp_scale(mode: Scaling3DMode, scale: f32) -> f32 {
    let scale = if scale.is_finite() { scale } else { 1.0 };
    let s = scale.clamp(MIN_SCALE, MAX_SCALE);
    match mode {
        Scaling3DMode::Bilinear => s,
        Scaling3DMode::Fsr | Scaling3DMode::Fsr2 => s.min(1.0),
    }
}

/// Mipmap bias for a scaled render. Upscalers sample sharper mips so the
/// reconstructed image keeps detail: `-log2(1 / scale) + user_bias`.
#[must_use]
pub fn mipmap_bias(mode: Scaling3DMode, scale: f32, user_bias: f32) -> f32 {
    match mode {
        Scaling3DMode::Fsr | Scaling3DMode::Fsr2 if scale < 1.0 => -(1.0 / scale).log2() + user_bias,
        _ => user_bias,
    }
}

#[must_use]
pub fn plan(mode: Scaling3DMode, scale: f32, user_bias: f32, sharpness: f32, size: UVec2) -> ScalingPlan {
    let scale = clamp_scale(mode, scale);
    let internal_size = (size.as_vec2() * scale).round().as_uvec2().max(UVec2::ONE);
    ScalingPlan {
        mode,
        scale,
        internal_size: if size == UVec2::ZERO { UVec2::ZERO } else { internal_size },
        mipmap_bias: mipmap_bias(mode, scale, user_bias),
        fsr_sharpness: sharpness.clamp(0.0, 2.0),
    }
}
