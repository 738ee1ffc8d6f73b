//! CPU rasterization used by the headless device.
//!
//! Triangles are filled at pixel centers with a consistent tie-break on
//! shared edges, so adjacent triangles of one shape never blend a pixel
//! twice. Blending is straight-alpha "over".

use glam::{UVec2, Vec2};
use half::f16;
use vesper_core::math::Rect2;
use vesper_core::Color;
use vesper_scene::{BatchShading, CanvasVertex};

use super::{CanvasDraw, SamplerState, TargetFormat};

// ============================================================================
// Pixel codecs
// ============================================================================

#[must_use]
pub fn decode_pixel(format: TargetFormat, px: &[u8]) -> Color {
    match format {
        TargetFormat::Rgba8 => Color::from_rgba8([px[0], px[1], px[2], px[3]]),
        TargetFormat::Rgba16F => {
            let ch = |i: usize| f16::from_le_bytes([px[i * 2], px[i * 2 + 1]]).to_f32();
            Color::rgba(ch(0), ch(1), ch(2), ch(3))
        }
    }
}

pub fn encode_pixel(format: TargetFormat, color: Color, out: &mut [u8]) {
    match format {
        TargetFormat::Rgba8 => out[..4].copy_from_slice(&color.to_rgba8()),
        TargetFormat::Rgba16F => {
            for (i, v) in color.to_array().into_iter().enumerate() {
                out[i * 2..i * 2 + 2].copy_from_slice(&f16::from_f32(v).to_le_bytes());
            }
        }
    }
}

/// Mutable view of a render target.
pub struct Surface<'a> {
    pub size: UVec2,
    pub format: TargetFormat,
    pub data: &'a mut [u8],
}

impl Surface<'_> {
    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.size.x as usize + x as usize) * self.format.pixel_size()
    }

    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> Color {
        let o = self.offset(x, y);
        decode_pixel(self.format, &self.data[o..o + self.format.pixel_size()])
    }

    pub fn set(&mut self, x: u32, y: u32, color: Color) {
        let o = self.offset(x, y);
        let n = self.format.pixel_size();
        encode_pixel(self.format, color, &mut self.data[o..o + n]);
    }

    fn bounds(&self) -> Rect2 {
        Rect2::new(Vec2::ZERO, self.size.as_vec2())
    }

    /// Pixel range `[x0, x1) × [y0, y1)` covered by `rect`, clamped to the surface.
    fn pixel_span(&self, rect: &Rect2) -> Option<(u32, u32, u32, u32)> {
        let r = rect.intersection(&self.bounds());
        if !r.has_area() {
            return None;
        }
        let x0 = r.position.x.floor().max(0.0) as u32;
        let y0 = r.position.y.floor().max(0.0) as u32;
        let x1 = (r.end().x.ceil() as u32).min(self.size.x);
        let y1 = (r.end().y.ceil() as u32).min(self.size.y);
        (x0 < x1 && y0 < y1).then_some((x0, y0, x1, y1))
    }

    /// Overwrites (no blending) the pixels whose centers fall in `rect`.
    pub fn fill(&mut self, color: Color, rect: Option<Rect2>) {
        let rect = rect.unwrap_or_else(|| self.bounds());
        let Some((x0, y0, x1, y1)) = self.pixel_span(&rect) else {
            return;
        };
        for y in y0..y1 {
            for x in x0..x1 {
                let center = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
                if rect.has_point(center) {
                    self.set(x, y, color);
                }
            }
        }
    }

    /// Copies the pixels of `src` whose centers fall in `rect` to the same
    /// place on this surface.
    pub fn copy_from(&mut self, src: &TextureView<'_>, rect: &Rect2) {
        let rect = rect.intersection(&Rect2::new(Vec2::ZERO, src.size.as_vec2()));
        let Some((x0, y0, x1, y1)) = self.pixel_span(&rect) else {
            return;
        };
        for y in y0..y1 {
            for x in x0..x1 {
                if rect.has_point(Vec2::new(x as f32 + 0.5, y as f32 + 0.5)) {
                    self.set(x, y, src.fetch(x, y));
                }
            }
        }
    }
}

/// Read-only view of a sampled texture.
#[derive(Clone, Copy)]
pub struct TextureView<'a> {
    pub size: UVec2,
    pub format: TargetFormat,
    pub data: &'a [u8],
}

impl TextureView<'_> {
    #[must_use]
    pub fn fetch(&self, x: u32, y: u32) -> Color {
        let n = self.format.pixel_size();
        let o = (y as usize * self.size.x as usize + x as usize) * n;
        decode_pixel(self.format, &self.data[o..o + n])
    }

    fn wrap(coord: i64, size: u32, sampler: SamplerState) -> u32 {
        let size = i64::from(size.max(1));
        if sampler.mirror {
            let period = size * 2;
            let m = coord.rem_euclid(period);
            (if m >= size { period - 1 - m } else { m }) as u32
        } else if sampler.repeat {
            coord.rem_euclid(size) as u32
        } else {
            coord.clamp(0, size - 1) as u32
        }
    }

    /// Samples at normalized `uv`.
    #[must_use]
    pub fn sample(&self, uv: Vec2, sampler: SamplerState) -> Color {
        if self.size.x == 0 || self.size.y == 0 {
            return Color::WHITE;
        }
        let texel = uv * self.size.as_vec2();
        if sampler.nearest {
            let x = Self::wrap(texel.x.floor() as i64, self.size.x, sampler);
            let y = Self::wrap(texel.y.floor() as i64, self.size.y, sampler);
            return self.fetch(x, y);
        }
        let p = texel - Vec2::splat(0.5);
        let base = p.floor();
        let f = p - base;
        let (bx, by) = (base.x as i64, base.y as i64);
        let at = |dx: i64, dy: i64| {
            self.fetch(
                Self::wrap(bx + dx, self.size.x, sampler),
                Self::wrap(by + dy, self.size.y, sampler),
            )
        };
        let top = at(0, 0).lerp(at(1, 0), f.x);
        let bottom = at(0, 1).lerp(at(1, 1), f.x);
        top.lerp(bottom, f.y)
    }
}

// ============================================================================
// Blending & shading
// ============================================================================

#[must_use]
pub fn blend_over(src: Color, dst: Color) -> Color {
    let a = src.a + dst.a * (1.0 - src.a);
    let mix = |s: f32, d: f32| s * src.a + d * (1.0 - src.a);
    Color::rgba(mix(src.r, dst.r), mix(src.g, dst.g), mix(src.b, dst.b), a)
}

fn median3(a: f32, b: f32, c: f32) -> f32 {
    a.min(b).max(a.max(b).min(c))
}

/// Coverage of a multi-channel distance field sample.
#[must_use]
pub fn msdf_alpha(sample: Color, px_range: f32, outline_size: i32, scale: f32) -> f32 {
    let px_size = (px_range * scale).max(1.0);
    let median = median3(sample.r, sample.g, sample.b);
    let outline = if outline_size > 0 && px_range > 0.0 {
        (outline_size as f32).min(px_range * 0.5) / px_range
    } else {
        0.0
    };
    ((median + outline - 0.5) * px_size + 0.5).clamp(0.0, 1.0)
}

fn shade(shading: BatchShading, vertex: Color, texel: Color, dst: Color) -> Color {
    match shading {
        BatchShading::Flat => blend_over(vertex * texel, dst),
        BatchShading::Msdf {
            px_range,
            outline_size,
            scale,
        } => {
            let a = msdf_alpha(texel, px_range, outline_size, scale);
            blend_over(Color::rgba(vertex.r, vertex.g, vertex.b, vertex.a * a), dst)
        }
        BatchShading::Lcd => {
            // Per-subpixel coverage.
            let cov = |c: f32| c * vertex.a;
            let ch = |s: f32, d: f32, c: f32| s * cov(c) + d * (1.0 - cov(c));
            let a = cov(texel.r.max(texel.g).max(texel.b));
            Color::rgba(
                ch(vertex.r, dst.r, texel.r),
                ch(vertex.g, dst.g, texel.g),
                ch(vertex.b, dst.b, texel.b),
                a + dst.a * (1.0 - a),
            )
        }
    }
}

// ============================================================================
// Triangles
// ============================================================================

fn edge(a: Vec2, b: Vec2, p: Vec2) -> f32 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

/// Tie-break for pixels exactly on an edge; antisymmetric in the edge
/// direction, so a shared edge belongs to exactly one of its triangles.
fn owns_edge(a: Vec2, b: Vec2) -> bool {
    let d = b - a;
    d.y > 0.0 || (d.y == 0.0 && d.x < 0.0)
}

fn inside(w: f32, a: Vec2, b: Vec2) -> bool {
    w > 0.0 || (w == 0.0 && owns_edge(a, b))
}

/// Rasterizes one batch. Returns the number of triangles that touched at
/// least one pixel.
pub fn draw_batch(surface: &mut Surface<'_>, texture: Option<TextureView<'_>>, draw: &CanvasDraw) -> u64 {
    let mut drawn = 0;
    let clip = draw.clip.unwrap_or_else(|| surface.bounds());
    for tri in draw.indices.chunks_exact(3) {
        let fetch = |i: u32| draw.vertices.get(i as usize).copied();
        let (Some(v0), Some(v1), Some(v2)) = (fetch(tri[0]), fetch(tri[1]), fetch(tri[2])) else {
            continue;
        };
        if draw_triangle(surface, texture, draw, &clip, [v0, v1, v2]) {
            drawn += 1;
        }
    }
    drawn
}

fn draw_triangle(
    surface: &mut Surface<'_>,
    texture: Option<TextureView<'_>>,
    draw: &CanvasDraw,
    clip: &Rect2,
    mut v: [CanvasVertex; 3],
) -> bool {
    let mut area = edge(v[0].position, v[1].position, v[2].position);
    if area == 0.0 || !area.is_finite() {
        return false;
    }
    if area < 0.0 {
        v.swap(1, 2);
        area = -area;
    }
    let (p0, p1, p2) = (v[0].position, v[1].position, v[2].position);
    let bounds = Rect2::from_points(&[p0, p1, p2]).intersection(clip);
    let Some((x0, y0, x1, y1)) = surface.pixel_span(&bounds) else {
        return false;
    };

    let mut touched = false;
    for y in y0..y1 {
        for x in x0..x1 {
            let p = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
            if !clip.has_point(p) {
                continue;
            }
            let w0 = edge(p1, p2, p);
            let w1 = edge(p2, p0, p);
            let w2 = edge(p0, p1, p);
            if !(inside(w0, p1, p2) && inside(w1, p2, p0) && inside(w2, p0, p1)) {
                continue;
            }
            let (b0, b1, b2) = (w0 / area, w1 / area, w2 / area);
            let color = Color::rgba(
                v[0].color.r * b0 + v[1].color.r * b1 + v[2].color.r * b2,
                v[0].color.g * b0 + v[1].color.g * b1 + v[2].color.g * b2,
                v[0].color.b * b0 + v[1].color.b * b1 + v[2].color.b * b2,
                v[0].color.a * b0 + v[1].color.a * b1 + v[2].color.a * b2,
            );
            let texel = texture.map_or(Color::WHITE, |t| {
                let uv = v[0].uv * b0 + v[1].uv * b1 + v[2].uv * b2;
                t.sample(uv, draw.sampler)
            });
            let dst = surface.get(x, y);
            surface.set(x, y, shade(draw.shading, color, texel, dst));
            touched = true;
        }
    }
    touched
}

// ============================================================================
// Screen filters
// ============================================================================

fn luma(c: Color) -> f32 {
    c.r * 0.299 + c.g * 0.587 + c.b * 0.114
}

/// Edge-directed smoothing in the spirit of FXAA: pixels whose local luma
/// contrast exceeds the threshold are blended with their neighbours.
pub fn fxaa(surface: &mut Surface<'_>) {
    const ABSOLUTE: f32 = 0.0312;
    const RELATIVE: f32 = 0.125;
    let (w, h) = (surface.size.x, surface.size.y);
    if w < 3 || h < 3 {
        return;
    }
    let src: Vec<Color> = (0..h).flat_map(|y| (0..w).map(move |x| (x, y))).map(|(x, y)| surface.get(x, y)).collect();
    let at = |x: u32, y: u32| src[(y * w + x) as usize];
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let c = at(x, y);
            let n = [at(x, y - 1), at(x, y + 1), at(x - 1, y), at(x + 1, y)];
            let lc = luma(c);
            let (lo, hi) = n.iter().fold((lc, lc), |(lo, hi), p| (lo.min(luma(*p)), hi.max(luma(*p))));
            if hi - lo < ABSOLUTE.max(hi * RELATIVE) {
                continue;
            }
            let avg = n.iter().fold(Color::TRANSPARENT, |acc, p| {
                Color::rgba(acc.r + p.r * 0.25, acc.g + p.g * 0.25, acc.b + p.b * 0.25, acc.a + p.a * 0.25)
            });
            surface.set(x, y, c.lerp(avg, 0.5));
        }
    }
}

const BAYER4: [f32; 16] = [
    0.0, 8.0, 2.0, 10.0, 12.0, 4.0, 14.0, 6.0, 3.0, 11.0, 1.0, 9.0, 15.0, 7.0, 13.0, 5.0,
];

/// Ordered dither of half a quantization step.
pub fn deband(surface: &mut Surface<'_>) {
    for y in 0..surface.size.y {
        for x in 0..surface.size.x {
            let t = BAYER4[((y % 4) * 4 + x % 4) as usize] / 16.0 - 0.5;
            let d = t / 255.0;
            let c = surface.get(x, y);
            surface.set(x, y, Color::rgba(c.r + d, c.g + d, c.b + d, c.a));
        }
    }
}

/// Temporal resolve against `history` with neighbourhood clamping; returns
/// the new history.
pub fn taa_resolve(surface: &mut Surface<'_>, history: Option<&[Color]>) -> Vec<Color> {
    const FEEDBACK: f32 = 0.5;
    let (w, h) = (surface.size.x, surface.size.y);
    let current: Vec<Color> =
        (0..h).flat_map(|y| (0..w).map(move |x| (x, y))).map(|(x, y)| surface.get(x, y)).collect();
    let Some(history) = history.filter(|hist| hist.len() == current.len()) else {
        return current;
    };
    let mut resolved = current.clone();
    for y in 0..h {
        for x in 0..w {
            let mut lo = [f32::MAX; 4];
            let mut hi = [f32::MIN; 4];
            for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
                for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                    let c = current[(ny * w + nx) as usize].to_array();
                    for i in 0..4 {
                        lo[i] = lo[i].min(c[i]);
                        hi[i] = hi[i].max(c[i]);
                    }
                }
            }
            let idx = (y * w + x) as usize;
            let past = history[idx].to_array();
            let clamped = Color::from_array(std::array::from_fn(|i| past[i].clamp(lo[i], hi[i])));
            let out = current[idx].lerp(clamped, FEEDBACK);
            resolved[idx] = out;
            surface.set(x, y, out);
        }
    }
    resolved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SamplerState;

    fn target(w: u32, h: u32) -> Vec<u8> {
        vec![0; (w * h * 4) as usize]
    }

    fn quad(rect: Rect2, color: Color) -> CanvasDraw {
        let p = rect.position;
        let e = rect.end();
        let v = |x: f32, y: f32| CanvasVertex::new(Vec2::new(x, y), Vec2::ZERO, color);
        CanvasDraw {
            texture: None,
            sampler: SamplerState::default(),
            shading: BatchShading::Flat,
            clip: None,
            vertices: vec![v(p.x, p.y), v(e.x, p.y), v(e.x, e.y), v(p.x, e.y)],
            indices: vec![0, 1, 2, 0, 2, 3],
        }
    }

    #[test]
    fn shared_edge_is_blended_once() {
        let mut data = target(8, 8);
        let mut s = Surface {
            size: UVec2::new(8, 8),
            format: TargetFormat::Rgba8,
            data: &mut data,
        };
        let half_red = Color::rgba(1.0, 0.0, 0.0, 0.5);
        assert_eq!(draw_batch(&mut s, None, &quad(Rect2::from_xywh(0.0, 0.0, 8.0, 8.0), half_red)), 2);
        let alphas: Vec<u8> = (0..8).flat_map(|y| (0..8).map(move |x| (x, y))).map(|(x, y)| s.get(x, y).to_rgba8()[3]).collect();
        assert!(alphas.iter().all(|a| *a == alphas[0]), "diagonal pixels double-blended");
    }

    #[test]
    fn clip_rect_limits_coverage() {
        let mut data = target(8, 8);
        let mut s = Surface {
            size: UVec2::new(8, 8),
            format: TargetFormat::Rgba8,
            data: &mut data,
        };
        let mut q = quad(Rect2::from_xywh(0.0, 0.0, 8.0, 8.0), Color::GREEN);
        q.clip = Some(Rect2::from_xywh(0.0, 0.0, 4.0, 8.0));
        draw_batch(&mut s, None, &q);
        assert_eq!(s.get(1, 1), Color::GREEN);
        assert_eq!(s.get(6, 1).a, 0.0);
    }

    #[test]
    fn textures_modulate_vertex_color() {
        let tex = [255u8, 0, 0, 255, 0, 0, 255, 255];
        let view = TextureView {
            size: UVec2::new(2, 1),
            format: TargetFormat::Rgba8,
            data: &tex,
        };
        let nearest = SamplerState {
            nearest: true,
            ..SamplerState::default()
        };
        assert_eq!(view.sample(Vec2::new(0.25, 0.5), nearest), Color::RED);
        assert_eq!(view.sample(Vec2::new(0.75, 0.5), nearest), Color::BLUE);
        let repeat = SamplerState {
            nearest: true,
            repeat: true,
            ..SamplerState::default()
        };
        assert_eq!(view.sample(Vec2::new(1.25, 0.5), repeat), Color::RED);
    }

    #[test]
    fn msdf_edge_is_half_covered() {
        let edge = Color::rgb(0.5, 0.5, 0.5);
        assert!((msdf_alpha(edge, 4.0, 0, 1.0) - 0.5).abs() < 1e-6);
        assert_eq!(msdf_alpha(Color::WHITE, 4.0, 0, 1.0), 1.0);
        assert_eq!(msdf_alpha(Color::BLACK, 4.0, 0, 1.0), 0.0);
        // An outline grows coverage outward.
        assert!(msdf_alpha(Color::rgb(0.4, 0.4, 0.4), 4.0, 1, 1.0) > msdf_alpha(Color::rgb(0.4, 0.4, 0.4), 4.0, 0, 1.0));
    }

    #[test]
    fn half_float_pixels_round_trip() {
        let mut px = [0u8; 8];
        let c = Color::rgba(2.5, 0.25, 0.0, 1.0);
        encode_pixel(TargetFormat::Rgba16F, c, &mut px);
        assert_eq!(decode_pixel(TargetFormat::Rgba16F, &px), c);
    }
}
