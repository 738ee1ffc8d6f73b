//! Canvas item draw commands.
//!
//! Commands are recorded in order and replayed every frame until the item is
//! cleared. `SetTransform` and `AnimationSlice` are state commands: they
//! affect the commands recorded after them.

use glam::Vec2;
use smallvec::SmallVec;
use vesper_core::math::{Rect2, Transform2D};
use vesper_core::{ordinal_enum, Color, Rid};

ordinal_enum! {
    #[derive(Default)]
    pub enum NinePatchAxisMode {
        #[default]
        Stretch = 0,
        Tile = 1,
        TileFit = 2,
    }
}

/// Per-point colors: either one color for everything or one per point.
pub type Colors = SmallVec<[Color; 1]>;

#[derive(Debug, Clone, PartialEq)]
pub enum CanvasCommand {
    Line {
        from: Vec2,
        to: Vec2,
        color: Color,
        /// Negative draws a one-pixel line regardless of scale.
        width: f32,
        antialiased: bool,
    },
    Polyline {
        points: Vec<Vec2>,
        colors: Colors,
        width: f32,
        antialiased: bool,
    },
    Multiline {
        points: Vec<Vec2>,
        colors: Colors,
        width: f32,
        antialiased: bool,
    },
    Rect {
        rect: Rect2,
        color: Color,
        antialiased: bool,
    },
    Circle {
        center: Vec2,
        radius: f32,
        color: Color,
        antialiased: bool,
    },
    TextureRect {
        rect: Rect2,
        texture: Rid,
        tile: bool,
        modulate: Color,
        transpose: bool,
    },
    TextureRectRegion {
        rect: Rect2,
        texture: Rid,
        src_rect: Rect2,
        modulate: Color,
        transpose: bool,
        clip_uv: bool,
    },
    MsdfTextureRectRegion {
        rect: Rect2,
        texture: Rid,
        src_rect: Rect2,
        modulate: Color,
        outline_size: i32,
        px_range: f32,
        scale: f32,
    },
    LcdTextureRectRegion {
        rect: Rect2,
        texture: Rid,
        src_rect: Rect2,
        modulate: Color,
    },
    NinePatch {
        rect: Rect2,
        source: Rect2,
        texture: Rid,
        topleft: Vec2,
        bottomright: Vec2,
        x_axis_mode: NinePatchAxisMode,
        y_axis_mode: NinePatchAxisMode,
        draw_center: bool,
        modulate: Color,
    },
    Primitive {
        points: SmallVec<[Vec2; 4]>,
        colors: Colors,
        uvs: SmallVec<[Vec2; 4]>,
        texture: Rid,
    },
    Polygon {
        points: Vec<Vec2>,
        colors: Colors,
        uvs: Vec<Vec2>,
        texture: Rid,
    },
    TriangleArray {
        indices: Vec<u32>,
        points: Vec<Vec2>,
        colors: Colors,
        uvs: Vec<Vec2>,
        bones: Vec<u32>,
        weights: Vec<f32>,
        texture: Rid,
    },
    Mesh {
        mesh: Rid,
        transform: Transform2D,
        modulate: Color,
        texture: Rid,
    },
    MultiMesh {
        multimesh: Rid,
        texture: Rid,
    },
    Particles {
        particles: Rid,
        texture: Rid,
    },
    SetTransform(Transform2D),
    ClipIgnore(bool),
    AnimationSlice {
        length: f64,
        begin: f64,
        end: f64,
        offset: f64,
    },
}

impl CanvasCommand {
    /// Resources the command reads from.
    pub fn referenced(&self) -> impl Iterator<Item = Rid> {
        let refs: SmallVec<[Rid; 2]> = match self {
            Self::TextureRect { texture, .. }
            | Self::TextureRectRegion { texture, .. }
            | Self::MsdfTextureRectRegion { texture, .. }
            | Self::LcdTextureRectRegion { texture, .. }
            | Self::NinePatch { texture, .. }
            | Self::Primitive { texture, .. }
            | Self::Polygon { texture, .. }
            | Self::TriangleArray { texture, .. } => smallvec::smallvec![*texture],
            Self::Mesh { mesh, texture, .. } => smallvec::smallvec![*mesh, *texture],
            Self::MultiMesh { multimesh, texture } => smallvec::smallvec![*multimesh, *texture],
            Self::Particles { particles, texture } => smallvec::smallvec![*particles, *texture],
            _ => SmallVec::new(),
        };
        refs.into_iter().filter(|r| r.is_valid())
    }

    /// Replaces references to `freed` with the invalid handle, so the
    /// command falls back to placeholders.
    pub fn purge_reference(&mut self, freed: Rid) -> bool {
        let mut touched = false;
        let mut clear = |r: &mut Rid| {
            if *r == freed {
                *r = Rid::INVALID;
                touched = true;
            }
        };
        match self {
            Self::TextureRect { texture, .. }
            | Self::TextureRectRegion { texture, .. }
            | Self::MsdfTextureRectRegion { texture, .. }
            | Self::LcdTextureRectRegion { texture, .. }
            | Self::NinePatch { texture, .. }
            | Self::Primitive { texture, .. }
            | Self::Polygon { texture, .. }
            | Self::TriangleArray { texture, .. } => clear(texture),
            Self::Mesh { mesh, texture, .. } => {
                clear(mesh);
                clear(texture);
            }
            Self::MultiMesh { multimesh, texture } => {
                clear(multimesh);
                clear(texture);
            }
            Self::Particles { particles, texture } => {
                clear(particles);
                clear(texture);
            }
            _ => {}
        }
        touched
    }

    /// Local-space bounds, before any `SetTransform`. Resource-backed
    /// commands without intrinsic geometry report `None`.
    #[must_use]
    pub fn local_rect(&self) -> Option<Rect2> {
        let pad = |r: Rect2, w: f32| if w > 0.0 { r.grow(w * 0.5) } else { r };
        match self {
            Self::Line { from, to, width, .. } => Some(pad(Rect2::from_points(&[*from, *to]), *width)),
            Self::Polyline { points, width, .. } | Self::Multiline { points, width, .. } => {
                (!points.is_empty()).then(|| pad(Rect2::from_points(points), *width))
            }
            Self::Rect { rect, .. }
            | Self::TextureRect { rect, .. }
            | Self::TextureRectRegion { rect, .. }
            | Self::MsdfTextureRectRegion { rect, .. }
            | Self::LcdTextureRectRegion { rect, .. }
            | Self::NinePatch { rect, .. } => Some(rect.abs()),
            Self::Circle { center, radius, .. } => Some(Rect2::new(*center - Vec2::splat(*radius), Vec2::splat(radius * 2.0))),
            Self::Primitive { points, .. } => (!points.is_empty()).then(|| Rect2::from_points(points)),
            Self::Polygon { points, .. } | Self::TriangleArray { points, .. } => {
                (!points.is_empty()).then(|| Rect2::from_points(points))
            }
            Self::Mesh { .. }
            | Self::MultiMesh { .. }
            | Self::Particles { .. }
            | Self::SetTransform(_)
            | Self::ClipIgnore(_)
            | Self::AnimationSlice { .. } => None,
        }
    }
}

/// Whether commands under an animation slice are drawn at `time`.
#[must_use]
pub fn slice_active(length: f64, begin: f64, end: f64, offset: f64, time: f64) -> bool {
    if length <= 0.0 {
        return true;
    }
    let t = (time + offset).rem_euclid(length);
    t >= begin && t < end
}

/// Color of point `i`: per-point when there are enough, else the first.
#[must_use]
pub fn color_at(colors: &[Color], i: usize) -> Color {
    colors.get(i).or_else(|| colors.first()).copied().unwrap_or(Color::WHITE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_window_wraps() {
        assert!(slice_active(1.0, 0.0, 0.5, 0.0, 0.25));
        assert!(!slice_active(1.0, 0.0, 0.5, 0.0, 0.75));
        assert!(slice_active(1.0, 0.0, 0.5, 0.0, 1.25));
        assert!(slice_active(1.0, 0.5, 1.0, 0.5, 0.25));
    }

    #[test]
    fn purge_drops_texture() {
        let alloc = vesper_core::RidAllocator::new();
        let tex = alloc.alloc(vesper_core::RidKind::Texture);
        let mut cmd = CanvasCommand::TextureRect {
            rect: Rect2::from_xywh(0.0, 0.0, 4.0, 4.0),
            texture: tex,
            tile: false,
            modulate: Color::WHITE,
            transpose: false,
        };
        assert_eq!(cmd.referenced().collect::<Vec<_>>(), vec![tex]);
        assert!(cmd.purge_reference(tex));
        assert_eq!(cmd.referenced().count(), 0);
    }

    #[test]
    fn color_fallbacks() {
        assert_eq!(color_at(&[], 3), Color::WHITE);
        assert_eq!(color_at(&[Color::RED], 3), Color::RED);
        assert_eq!(color_at(&[Color::RED, Color::BLUE], 1), Color::BLUE);
    }
}
