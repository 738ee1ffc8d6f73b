//! Distance-based visibility ranges (HLOD).
//!
//! An instance is drawn while its distance to the camera lies in
//! `[begin, end]`; `end == 0` means unbounded. Margins widen the range and,
//! depending on the fade mode, either fade the instance itself or fade its
//! dependencies in the opposite direction.

use vesper_core::ordinal_enum;

ordinal_enum! {
    #[derive(Default)]
    pub enum VisibilityRangeFadeMode {
        #[default]
        Disabled = 0,
        SelfFade = 1,
        Dependencies = 2,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VisibilityRange {
    pub begin: f32,
    pub end: f32,
    pub begin_margin: f32,
    pub end_margin: f32,
    pub fade_mode: VisibilityRangeFadeMode,
}

impl VisibilityRange {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.begin > 0.0 || self.end > 0.0
    }

    /// How far into the fade band `distance` lies: 0 fully inside the range,
    /// 1 fully outside. `None` when the instance is out of range entirely.
    #[must_use]
    pub fn fade_at(&self, distance: f32) -> Option<f32> {
        if !self.is_active() {
            return Some(0.0);
        }
        let begin_edge = self.begin - self.begin_margin;
        let end_edge = self.end + self.end_margin;
        if distance < begin_edge.max(0.0) && self.begin > 0.0 {
            return None;
        }
        if self.end > 0.0 && distance > end_edge {
            return None;
        }
        let fade_in = if self.begin > 0.0 && self.begin_margin > 0.0 && distance < self.begin {
            (self.begin - distance) / self.begin_margin
        } else {
            0.0
        };
        let fade_out = if self.end > 0.0 && self.end_margin > 0.0 && distance > self.end {
            (distance - self.end) / self.end_margin
        } else {
            0.0
        };
        Some(fade_in.max(fade_out).clamp(0.0, 1.0))
    }

    /// Transparency added to the instance itself at `distance`, or `None`
    /// when it must not be drawn.
    #[must_use]
    pub fn self_transparency(&self, distance: f32) -> Option<f32> {
        let fade = self.fade_at(distance)?;
        match self.fade_mode {
            VisibilityRangeFadeMode::SelfFade => Some(fade),
            // Without self fading the margins only add hysteresis.
            VisibilityRangeFadeMode::Disabled | VisibilityRangeFadeMode::Dependencies => {
                if fade >= 1.0 { None } else { Some(0.0) }
            }
        }
    }

    /// Transparency of a dependency whose visibility parent uses this range:
    /// dependencies fade in while the parent fades out.
    #[must_use]
    pub fn dependency_transparency(&self, distance: f32) -> f32 {
        if self.fade_mode != VisibilityRangeFadeMode::Dependencies {
            return 0.0;
        }
        match self.fade_at(distance) {
            Some(fade) => 1.0 - fade,
            None => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inactive_range_is_always_visible() {
        let r = VisibilityRange::default();
        assert_eq!(r.self_transparency(1e6), Some(0.0));
    }

    #[test]
    fn hard_cut_without_margins() {
        let r = VisibilityRange {
            begin: 10.0,
            end: 50.0,
            ..Default::default()
        };
        assert_eq!(r.self_transparency(5.0), None);
        assert_eq!(r.self_transparency(20.0), Some(0.0));
        assert_eq!(r.self_transparency(60.0), None);
    }

    #[test]
    fn self_fade_over_end_margin() {
        let r = VisibilityRange {
            end: 50.0,
            end_margin: 10.0,
            fade_mode: VisibilityRangeFadeMode::SelfFade,
            ..Default::default()
        };
        assert_eq!(r.self_transparency(45.0), Some(0.0));
        assert_eq!(r.self_transparency(55.0), Some(0.5));
        assert_eq!(r.self_transparency(61.0), None);
    }

    #[test]
    fn dependencies_fade_in_opposite() {
        let r = VisibilityRange {
            end: 50.0,
            end_margin: 10.0,
            fade_mode: VisibilityRangeFadeMode::Dependencies,
            ..Default::default()
        };
        assert_eq!(r.dependency_transparency(55.0), 0.5);
        assert_eq!(r.dependency_transparency(40.0), 1.0);
        assert_eq!(r.self_transparency(55.0), Some(0.0));
    }
}
