//! Turns canvas commands into textured triangle batches.
//!
//! Vertices come out in canvas space (the item's global transform already
//! applied). Consecutive commands sharing a texture, shading mode and clip
//! rect are merged into one batch.

use glam::{Affine2, Vec2};
use log::trace;
use vesper_core::math::{Rect2, Transform2D};
use vesper_core::{Color, Rid};
use vesper_resources::mesh::arrays::surface_to_arrays;
use vesper_resources::mesh::{Positions, PrimitiveType};
use vesper_resources::ResourceStores;

use super::commands::{color_at, slice_active, CanvasCommand, NinePatchAxisMode};

pub const CIRCLE_SEGMENTS: usize = 64;
/// Width of the alpha feather added around antialiased shapes, in pixels.
pub const FEATHER: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanvasVertex {
    pub position: Vec2,
    pub uv: Vec2,
    pub color: Color,
}

impl CanvasVertex {
    #[must_use]
    pub const fn new(position: Vec2, uv: Vec2, color: Color) -> Self {
        Self { position, uv, color }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum BatchShading {
    #[default]
    Flat,
    /// Multi-channel signed distance field glyphs.
    Msdf { px_range: f32, outline_size: i32, scale: f32 },
    /// Subpixel (LCD) glyphs.
    Lcd,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CanvasBatch {
    /// Invalid for untextured batches, which sample white.
    pub texture: Rid,
    pub shading: BatchShading,
    pub clip: Option<Rect2>,
    pub vertices: Vec<CanvasVertex>,
    pub indices: Vec<u32>,
}

impl CanvasBatch {
    #[must_use]
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// Per-item inputs of tessellation.
#[derive(Debug, Clone, Copy)]
pub struct ItemContext {
    pub transform: Transform2D,
    pub modulate: Color,
    pub clip: Option<Rect2>,
    pub skeleton: Rid,
    /// Seconds used to evaluate animation slices.
    pub time: f64,
}

impl Default for ItemContext {
    fn default() -> Self {
        Self {
            transform: Affine2::IDENTITY,
            modulate: Color::WHITE,
            clip: None,
            skeleton: Rid::INVALID,
            time: 0.0,
        }
    }
}

pub struct Tessellator<'a> {
    resources: &'a ResourceStores,
    batches: Vec<CanvasBatch>,
}

impl<'a> Tessellator<'a> {
    #[must_use]
    pub fn new(resources: &'a ResourceStores) -> Self {
        Self {
            resources,
            batches: Vec::new(),
        }
    }

    #[must_use]
    pub fn finish(self) -> Vec<CanvasBatch> {
        self.batches
    }

    /// Appends the triangles of one item's command list.
    pub fn add_item(&mut self, commands: &[CanvasCommand], ctx: &ItemContext) {
        let mut xform = ctx.transform;
        let mut clip = ctx.clip;
        let mut slice_visible = true;
        for cmd in commands {
            match cmd {
                CanvasCommand::SetTransform(t) => {
                    xform = ctx.transform * *t;
                    continue;
                }
                CanvasCommand::ClipIgnore(ignore) => {
                    clip = if *ignore { None } else { ctx.clip };
                    continue;
                }
                CanvasCommand::AnimationSlice {
                    length,
                    begin,
                    end,
                    offset,
                } => {
                    slice_visible = slice_active(*length, *begin, *end, *offset, ctx.time);
                    continue;
                }
                _ => {}
            }
            if !slice_visible {
                continue;
            }
            let mut out = Emit {
                xform,
                modulate: ctx.modulate,
                clip,
                skeleton: ctx.skeleton,
                tess: self,
            };
            out.command(cmd);
        }
    }

    fn batch(&mut self, texture: Rid, shading: BatchShading, clip: Option<Rect2>) -> &mut CanvasBatch {
        let reuse = self
            .batches
            .last()
            .is_some_and(|b| b.texture == texture && b.shading == shading && b.clip == clip);
        if !reuse {
            self.batches.push(CanvasBatch {
                texture,
                shading,
                clip,
                vertices: Vec::new(),
                indices: Vec::new(),
            });
        }
        let last = self.batches.len() - 1;
        &mut self.batches[last]
    }

    /// Texture actually sampled: canvas textures resolve to their diffuse
    /// channel and missing textures to the white placeholder.
    fn resolve_texture(&self, texture: Rid) -> Rid {
        if !texture.is_valid() {
            return Rid::INVALID;
        }
        let texture = self
            .resources
            .canvas_textures
            .get(texture)
            .map_or(texture, |ct| ct.diffuse());
        if self.resources.textures.owns(texture) {
            texture
        } else {
            if texture.is_valid() {
                trace!("texture {texture:?} is gone, drawing with placeholder");
            }
            Rid::INVALID
        }
    }

    fn texture_size(&self, texture: Rid) -> Vec2 {
        if !texture.is_valid() {
            return Vec2::ONE;
        }
        self.resources.textures.size(texture).as_vec2().max(Vec2::ONE)
    }
}

struct Emit<'t, 'a> {
    xform: Transform2D,
    modulate: Color,
    clip: Option<Rect2>,
    skeleton: Rid,
    tess: &'t mut Tessellator<'a>,
}

impl Emit<'_, '_> {
    fn command(&mut self, cmd: &CanvasCommand) {
        let resources = self.tess.resources;
        match cmd {
            CanvasCommand::Line {
                from,
                to,
                color,
                width,
                antialiased,
            } => self.line(*from, *to, *color, *color, *width, *antialiased),
            CanvasCommand::Polyline {
                points,
                colors,
                width,
                antialiased,
            } => {
                for (i, pair) in points.windows(2).enumerate() {
                    self.line(pair[0], pair[1], color_at(colors, i), color_at(colors, i + 1), *width, *antialiased);
                }
            }
            CanvasCommand::Multiline {
                points,
                colors,
                width,
                antialiased,
            } => {
                for (i, pair) in points.chunks_exact(2).enumerate() {
                    let c = color_at(colors, i);
                    self.line(pair[0], pair[1], c, c, *width, *antialiased);
                }
            }
            CanvasCommand::Rect { rect, color, antialiased } => {
                let r = rect.abs();
                let corners = rect_corners(&r);
                self.quad(Rid::INVALID, BatchShading::Flat, corners, [Vec2::ZERO; 4], [*color; 4]);
                if *antialiased {
                    self.feather(&corners, *color);
                }
            }
            CanvasCommand::Circle {
                center,
                radius,
                color,
                antialiased,
            } => {
                let rim: Vec<Vec2> = (0..CIRCLE_SEGMENTS)
                    .map(|i| {
                        let a = i as f32 / CIRCLE_SEGMENTS as f32 * std::f32::consts::TAU;
                        *center + Vec2::new(a.cos(), a.sin()) * *radius
                    })
                    .collect();
                self.fan(Rid::INVALID, *center, &rim, *color);
                if *antialiased {
                    self.feather(&rim, *color);
                }
            }
            CanvasCommand::TextureRect {
                rect,
                texture,
                tile,
                modulate,
                transpose,
            } => {
                let tex = self.tess.resolve_texture(*texture);
                let uv_end = if *tile {
                    rect.size.abs() / self.tess.texture_size(tex)
                } else {
                    Vec2::ONE
                };
                let uvs = rect_uvs(Vec2::ZERO, uv_end, *transpose);
                self.quad(tex, BatchShading::Flat, rect_corners(rect), uvs, [*modulate; 4]);
            }
            CanvasCommand::TextureRectRegion {
                rect,
                texture,
                src_rect,
                modulate,
                transpose,
                clip_uv,
            } => {
                let tex = self.tess.resolve_texture(*texture);
                let size = self.tess.texture_size(tex);
                let mut start = src_rect.position / size;
                let mut end = src_rect.end() / size;
                if *clip_uv {
                    let half = 0.5 / size;
                    start += half;
                    end -= half;
                }
                let uvs = rect_uvs(start, end, *transpose);
                self.quad(tex, BatchShading::Flat, rect_corners(rect), uvs, [*modulate; 4]);
            }
            CanvasCommand::MsdfTextureRectRegion {
                rect,
                texture,
                src_rect,
                modulate,
                outline_size,
                px_range,
                scale,
            } => {
                let tex = self.tess.resolve_texture(*texture);
                let size = self.tess.texture_size(tex);
                let uvs = rect_uvs(src_rect.position / size, src_rect.end() / size, false);
                let shading = BatchShading::Msdf {
                    px_range: *px_range,
                    outline_size: *outline_size,
                    scale: *scale,
                };
                self.quad(tex, shading, rect_corners(rect), uvs, [*modulate; 4]);
            }
            CanvasCommand::LcdTextureRectRegion {
                rect,
                texture,
                src_rect,
                modulate,
            } => {
                let tex = self.tess.resolve_texture(*texture);
                let size = self.tess.texture_size(tex);
                let uvs = rect_uvs(src_rect.position / size, src_rect.end() / size, false);
                self.quad(tex, BatchShading::Lcd, rect_corners(rect), uvs, [*modulate; 4]);
            }
            CanvasCommand::NinePatch {
                rect,
                source,
                texture,
                topleft,
                bottomright,
                x_axis_mode,
                y_axis_mode,
                draw_center,
                modulate,
            } => {
                let tex = self.tess.resolve_texture(*texture);
                let size = self.tess.texture_size(tex);
                let source = if source.has_area() {
                    *source
                } else {
                    Rect2::new(Vec2::ZERO, size)
                };
                let rect = rect.abs();
                let xs = nine_patch_axis(
                    rect.position.x,
                    rect.size.x,
                    source.position.x,
                    source.size.x,
                    topleft.x,
                    bottomright.x,
                    *x_axis_mode,
                );
                let ys = nine_patch_axis(
                    rect.position.y,
                    rect.size.y,
                    source.position.y,
                    source.size.y,
                    topleft.y,
                    bottomright.y,
                    *y_axis_mode,
                );
                for y in &ys {
                    for x in &xs {
                        if x.center && y.center && !*draw_center {
                            continue;
                        }
                        let corners = [
                            Vec2::new(x.dst.0, y.dst.0),
                            Vec2::new(x.dst.1, y.dst.0),
                            Vec2::new(x.dst.1, y.dst.1),
                            Vec2::new(x.dst.0, y.dst.1),
                        ];
                        let uvs = [
                            Vec2::new(x.src.0, y.src.0) / size,
                            Vec2::new(x.src.1, y.src.0) / size,
                            Vec2::new(x.src.1, y.src.1) / size,
                            Vec2::new(x.src.0, y.src.1) / size,
                        ];
                        self.quad(tex, BatchShading::Flat, corners, uvs, [*modulate; 4]);
                    }
                }
            }
            CanvasCommand::Primitive {
                points,
                colors,
                uvs,
                texture,
            } => {
                let tex = self.tess.resolve_texture(*texture);
                let uv = |i: usize| uvs.get(i).copied().unwrap_or(Vec2::ZERO);
                match points.len() {
                    1 => {
                        let p = points[0];
                        let c = color_at(colors, 0);
                        self.line(p, p + Vec2::X, c, c, -1.0, false);
                    }
                    2 => self.line(points[0], points[1], color_at(colors, 0), color_at(colors, 1), -1.0, false),
                    3 | 4 => {
                        let verts: Vec<CanvasVertex> = (0..points.len())
                            .map(|i| CanvasVertex::new(points[i], uv(i), color_at(colors, i)))
                            .collect();
                        let indices: &[u32] = if points.len() == 3 { &[0, 1, 2] } else { &[0, 1, 2, 0, 2, 3] };
                        self.triangles(tex, BatchShading::Flat, &verts, indices);
                    }
                    _ => {}
                }
            }
            CanvasCommand::Polygon {
                points,
                colors,
                uvs,
                texture,
            } => {
                let tex = self.tess.resolve_texture(*texture);
                let indices = triangulate(points);
                let verts: Vec<CanvasVertex> = points
                    .iter()
                    .enumerate()
                    .map(|(i, p)| CanvasVertex::new(*p, uvs.get(i).copied().unwrap_or(Vec2::ZERO), color_at(colors, i)))
                    .collect();
                self.triangles(tex, BatchShading::Flat, &verts, &indices);
            }
            CanvasCommand::TriangleArray {
                indices,
                points,
                colors,
                uvs,
                bones,
                weights,
                texture,
            } => {
                let tex = self.tess.resolve_texture(*texture);
                let verts: Vec<CanvasVertex> = points
                    .iter()
                    .enumerate()
                    .map(|(i, p)| {
                        let p = self.skin(*p, bones.get(i * 4..i * 4 + 4), weights.get(i * 4..i * 4 + 4));
                        CanvasVertex::new(p, uvs.get(i).copied().unwrap_or(Vec2::ZERO), color_at(colors, i))
                    })
                    .collect();
                let sequential: Vec<u32>;
                let indices = if indices.is_empty() {
                    let n = (points.len() / 3 * 3) as u32;
                    sequential = (0..n).collect();
                    &sequential
                } else {
                    indices
                };
                self.triangles(tex, BatchShading::Flat, &verts, indices);
            }
            CanvasCommand::Mesh {
                mesh,
                transform,
                modulate,
                texture,
            } => {
                let tex = self.tess.resolve_texture(*texture);
                self.mesh(*mesh, *transform, *modulate, tex);
            }
            CanvasCommand::MultiMesh { multimesh, texture } => {
                let tex = self.tess.resolve_texture(*texture);
                let Some(mm) = resources.multimeshes.get(*multimesh) else {
                    return;
                };
                for i in 0..mm.drawn_instances() {
                    let t = resources.multimeshes.instance_get_transform_2d(*multimesh, i);
                    let c = if mm.use_colors {
                        resources.multimeshes.instance_get_color(*multimesh, i)
                    } else {
                        Color::WHITE
                    };
                    self.mesh(mm.mesh, t, c, tex);
                }
            }
            CanvasCommand::Particles { particles, texture } => {
                let tex = self.tess.resolve_texture(*texture);
                let Some(ps) = resources.particles.get(*particles) else {
                    return;
                };
                let pass_mesh = ps.draw_passes.first().copied().unwrap_or(Rid::INVALID);
                for p in ps.pool.iter().filter(|p| p.active) {
                    let t = Affine2::from_cols(
                        p.transform.x_axis.truncate(),
                        p.transform.y_axis.truncate(),
                        p.transform.translation.truncate(),
                    );
                    if resources.meshes.owns(pass_mesh) {
                        self.mesh(pass_mesh, t, p.color, tex);
                    } else {
                        let unit = Rect2::from_xywh(-0.5, -0.5, 1.0, 1.0);
                        let corners = rect_corners(&unit).map(|c| t.transform_point2(c));
                        self.quad(tex, BatchShading::Flat, corners, rect_uvs(Vec2::ZERO, Vec2::ONE, false), [p.color; 4]);
                    }
                }
            }
            CanvasCommand::SetTransform(_) | CanvasCommand::ClipIgnore(_) | CanvasCommand::AnimationSlice { .. } => {}
        }
    }

    fn skin(&self, p: Vec2, bones: Option<&[u32]>, weights: Option<&[f32]>) -> Vec2 {
        let (Some(bones), Some(weights)) = (bones, weights) else {
            return p;
        };
        let skeletons = &self.tess.resources.skeletons;
        if !skeletons.owns(self.skeleton) {
            return p;
        }
        let total: f32 = weights.iter().sum();
        if total <= f32::EPSILON {
            return p;
        }
        bones
            .iter()
            .zip(weights)
            .map(|(b, w)| skeletons.bone_get_transform_2d(self.skeleton, *b as usize).transform_point2(p) * *w)
            .sum::<Vec2>()
            / total
    }

    fn mesh(&mut self, mesh: Rid, local: Transform2D, modulate: Color, tex: Rid) {
        let resources = self.tess.resources;
        let Some(m) = resources.meshes.get(mesh) else {
            trace!("mesh {mesh:?} is gone, skipping draw");
            return;
        };
        let surfaces: Vec<_> = m.surfaces.iter().filter(|s| s.primitive == PrimitiveType::Triangles).collect();
        for surface in surfaces {
            let arrays = surface_to_arrays(surface);
            let positions: Vec<Vec2> = match &arrays.positions {
                Positions::D2(v) => v.clone(),
                Positions::D3(v) => v.iter().map(|p| p.truncate()).collect(),
            };
            let verts: Vec<CanvasVertex> = positions
                .iter()
                .enumerate()
                .map(|(i, p)| {
                    let c = arrays.colors.get(i).copied().unwrap_or(Color::WHITE);
                    CanvasVertex::new(
                        local.transform_point2(*p),
                        arrays.uvs.get(i).copied().unwrap_or(Vec2::ZERO),
                        c * modulate,
                    )
                })
                .collect();
            let indices: Vec<u32> = if arrays.indices.is_empty() {
                (0..(verts.len() / 3 * 3) as u32).collect()
            } else {
                arrays.indices.clone()
            };
            self.triangles(tex, BatchShading::Flat, &verts, &indices);
        }
    }

    /// Line as a quad; a non-positive width is one pixel wide whatever
    /// the transform.
    fn line(&mut self, from: Vec2, to: Vec2, c0: Color, c1: Color, width: f32, antialiased: bool) {
        if width > 0.0 {
            let dir = (to - from).normalize_or(Vec2::X);
            let n = dir.perp() * (width * 0.5);
            let corners = [from - n, to - n, to + n, from + n];
            self.quad(Rid::INVALID, BatchShading::Flat, corners, [Vec2::ZERO; 4], [c0, c1, c1, c0]);
            if antialiased {
                self.feather(&corners, c0);
            }
            return;
        }
        let (a, b) = (self.xform.transform_point2(from), self.xform.transform_point2(to));
        let dir = (b - a).normalize_or(Vec2::X);
        let n = dir.perp() * 0.5;
        // Half a pixel past both ends so endpoints are covered.
        let ext = dir * 0.5;
        let corners = [a - n - ext, b - n + ext, b + n + ext, a + n - ext];
        self.global_quad(Rid::INVALID, corners, [Vec2::ZERO; 4], [c0, c1, c1, c0]);
        if antialiased {
            self.global_feather(&corners, c0);
        }
    }

    fn quad(&mut self, tex: Rid, shading: BatchShading, corners: [Vec2; 4], uvs: [Vec2; 4], colors: [Color; 4]) {
        let verts: Vec<CanvasVertex> = (0..4).map(|i| CanvasVertex::new(corners[i], uvs[i], colors[i])).collect();
        self.triangles(tex, shading, &verts, &[0, 1, 2, 0, 2, 3]);
    }

    fn global_quad(&mut self, tex: Rid, corners: [Vec2; 4], uvs: [Vec2; 4], colors: [Color; 4]) {
        let verts: Vec<CanvasVertex> = (0..4).map(|i| CanvasVertex::new(corners[i], uvs[i], colors[i])).collect();
        self.push(tex, BatchShading::Flat, &verts, &[0, 1, 2, 0, 2, 3]);
    }

    fn fan(&mut self, tex: Rid, center: Vec2, rim: &[Vec2], color: Color) {
        let mut verts = vec![CanvasVertex::new(center, Vec2::ZERO, color)];
        verts.extend(rim.iter().map(|p| CanvasVertex::new(*p, Vec2::ZERO, color)));
        let n = rim.len() as u32;
        let indices: Vec<u32> = (0..n).flat_map(|i| [0, 1 + i, 1 + (i + 1) % n]).collect();
        self.triangles(tex, BatchShading::Flat, &verts, &indices);
    }

    /// Local-space outline feather.
    fn feather(&mut self, outline: &[Vec2], color: Color) {
        let global: Vec<Vec2> = outline.iter().map(|p| self.xform.transform_point2(*p)).collect();
        self.global_feather(&global, color);
    }

    /// Strip around a convex outline fading from `color` to transparent.
    fn global_feather(&mut self, outline: &[Vec2], color: Color) {
        let n = outline.len();
        if n < 3 {
            return;
        }
        let centroid = outline.iter().copied().sum::<Vec2>() / n as f32;
        let clear = Color { a: 0.0, ..color };
        let mut verts = Vec::with_capacity(n * 2);
        for p in outline {
            let out = (*p - centroid).normalize_or_zero() * FEATHER;
            verts.push(CanvasVertex::new(*p, Vec2::ZERO, color));
            verts.push(CanvasVertex::new(*p + out, Vec2::ZERO, clear));
        }
        let n = n as u32;
        let indices: Vec<u32> = (0..n)
            .flat_map(|i| {
                let j = (i + 1) % n;
                [2 * i, 2 * j, 2 * j + 1, 2 * i, 2 * j + 1, 2 * i + 1]
            })
            .collect();
        self.push(Rid::INVALID, BatchShading::Flat, &verts, &indices);
    }

    /// Local-space triangles.
    fn triangles(&mut self, tex: Rid, shading: BatchShading, verts: &[CanvasVertex], indices: &[u32]) {
        let xform = self.xform;
        let global: Vec<CanvasVertex> = verts
            .iter()
            .map(|v| CanvasVertex::new(xform.transform_point2(v.position), v.uv, v.color))
            .collect();
        self.push(tex, shading, &global, indices);
    }

    fn push(&mut self, tex: Rid, shading: BatchShading, verts: &[CanvasVertex], indices: &[u32]) {
        let count = verts.len() as u32;
        if indices.iter().any(|i| *i >= count) {
            trace!("dropping triangles with out-of-range indices");
            return;
        }
        let modulate = self.modulate;
        let batch = self.tess.batch(tex, shading, self.clip);
        let base = batch.vertices.len() as u32;
        batch
            .vertices
            .extend(verts.iter().map(|v| CanvasVertex::new(v.position, v.uv, v.color * modulate)));
        batch.indices.extend(indices.iter().map(|i| base + i));
    }
}

fn rect_corners(r: &Rect2) -> [Vec2; 4] {
    let (p, e) = (r.position, r.end());
    [p, Vec2::new(e.x, p.y), e, Vec2::new(p.x, e.y)]
}

fn rect_uvs(start: Vec2, end: Vec2, transpose: bool) -> [Vec2; 4] {
    if transpose {
        [
            start,
            Vec2::new(start.x, end.y),
            end,
            Vec2::new(end.x, start.y),
        ]
    } else {
        [start, Vec2::new(end.x, start.y), end, Vec2::new(start.x, end.y)]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Segment {
    dst: (f32, f32),
    src: (f32, f32),
    center: bool,
}

/// Splits one axis of a nine-patch into margin and center segments.
fn nine_patch_axis(
    dst_pos: f32,
    dst_len: f32,
    src_pos: f32,
    src_len: f32,
    margin_start: f32,
    margin_end: f32,
    mode: NinePatchAxisMode,
) -> Vec<Segment> {
    let total_margin = margin_start + margin_end;
    // Margins shrink proportionally when the target is smaller than them.
    let scale = if total_margin > dst_len && total_margin > 0.0 {
        dst_len / total_margin
    } else {
        1.0
    };
    let (m0, m1) = (margin_start * scale, margin_end * scale);
    let mut out = Vec::new();
    if m0 > 0.0 {
        out.push(Segment {
            dst: (dst_pos, dst_pos + m0),
            src: (src_pos, src_pos + margin_start),
            center: false,
        });
    }
    let (c0, c1) = (dst_pos + m0, dst_pos + dst_len - m1);
    let (s0, s1) = (src_pos + margin_start, src_pos + src_len - margin_end);
    let src_center = s1 - s0;
    if c1 > c0 && src_center > 0.0 {
        match mode {
            NinePatchAxisMode::Stretch => out.push(Segment {
                dst: (c0, c1),
                src: (s0, s1),
                center: true,
            }),
            NinePatchAxisMode::Tile => {
                let mut x = c0;
                while x < c1 {
                    let len = src_center.min(c1 - x);
                    out.push(Segment {
                        dst: (x, x + len),
                        src: (s0, s0 + len),
                        center: true,
                    });
                    x += src_center;
                }
            }
            NinePatchAxisMode::TileFit => {
                let count = ((c1 - c0) / src_center).round().max(1.0) as usize;
                let step = (c1 - c0) / count as f32;
                for i in 0..count {
                    let x = c0 + step * i as f32;
                    out.push(Segment {
                        dst: (x, x + step),
                        src: (s0, s1),
                        center: true,
                    });
                }
            }
        }
    }
    if m1 > 0.0 {
        out.push(Segment {
            dst: (dst_pos + dst_len - m1, dst_pos + dst_len),
            src: (src_pos + src_len - margin_end, src_pos + src_len),
            center: false,
        });
    }
    out
}

/// Ear-clipping triangulation of a simple polygon of either winding.
#[must_use]
pub fn triangulate(points: &[Vec2]) -> Vec<u32> {
    let n = points.len();
    if n < 3 {
        return Vec::new();
    }
    let area: f32 = (0..n).map(|i| points[i].perp_dot(points[(i + 1) % n])).sum();
    let ccw = area > 0.0;
    let mut remaining: Vec<usize> = (0..n).collect();
    let mut out = Vec::with_capacity((n - 2) * 3);
    let mut guard = 0;
    while remaining.len() > 3 && guard < n * n {
        guard += 1;
        let m = remaining.len();
        let mut clipped = false;
        for i in 0..m {
            let (ia, ib, ic) = (remaining[(i + m - 1) % m], remaining[i], remaining[(i + 1) % m]);
            let (a, b, c) = (points[ia], points[ib], points[ic]);
            let cross = (b - a).perp_dot(c - b);
            if (cross > 0.0) != ccw || cross == 0.0 {
                continue;
            }
            let contains_other = remaining
                .iter()
                .filter(|&&k| k != ia && k != ib && k != ic)
                .any(|&k| point_in_triangle(points[k], a, b, c));
            if contains_other {
                continue;
            }
            out.extend([ia as u32, ib as u32, ic as u32]);
            remaining.remove(i);
            clipped = true;
            break;
        }
        if !clipped {
            // Degenerate input: fall back to a fan over what is left.
            break;
        }
    }
    for i in 1..remaining.len().saturating_sub(1) {
        out.extend([remaining[0] as u32, remaining[i] as u32, remaining[i + 1] as u32]);
    }
    out
}

fn point_in_triangle(p: Vec2, a: Vec2, b: Vec2, c: Vec2) -> bool {
    let d1 = (b - a).perp_dot(p - a);
    let d2 = (c - b).perp_dot(p - b);
    let d3 = (a - c).perp_dot(p - c);
    let has_neg = d1 < 0.0 || d2 < 0.0 || d3 < 0.0;
    let has_pos = d1 > 0.0 || d2 > 0.0 || d3 > 0.0;
    !(has_neg && has_pos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_core::RidAllocator;
    use vesper_core::RidKind;

    fn run(commands: &[CanvasCommand]) -> Vec<CanvasBatch> {
        let resources = ResourceStores::new();
        let mut t = Tessellator::new(&resources);
        t.add_item(commands, &ItemContext::default());
        t.finish()
    }

    #[test]
    fn untextured_commands_share_a_batch() {
        let batches = run(&[
            CanvasCommand::Line {
                from: Vec2::ZERO,
                to: Vec2::new(10.0, 0.0),
                color: Color::RED,
                width: 2.0,
                antialiased: false,
            },
            CanvasCommand::Rect {
                rect: Rect2::from_xywh(0.0, 0.0, 4.0, 4.0),
                color: Color::GREEN,
                antialiased: false,
            },
        ]);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].triangle_count(), 4);
    }

    #[test]
    fn freed_texture_falls_back_to_placeholder() {
        let alloc = RidAllocator::new();
        let gone = alloc.alloc(RidKind::Texture);
        let batches = run(&[CanvasCommand::TextureRect {
            rect: Rect2::from_xywh(0.0, 0.0, 4.0, 4.0),
            texture: gone,
            tile: false,
            modulate: Color::WHITE,
            transpose: false,
        }]);
        assert_eq!(batches[0].texture, Rid::INVALID);
    }

    #[test]
    fn set_transform_applies_to_later_commands() {
        let rect = CanvasCommand::Rect {
            rect: Rect2::from_xywh(0.0, 0.0, 1.0, 1.0),
            color: Color::WHITE,
            antialiased: false,
        };
        let batches = run(&[
            rect.clone(),
            CanvasCommand::SetTransform(Affine2::from_translation(Vec2::new(5.0, 0.0))),
            rect,
        ]);
        let xs: Vec<f32> = batches[0].vertices.iter().map(|v| v.position.x).collect();
        assert_eq!(xs[0], 0.0);
        assert_eq!(xs[4], 5.0);
    }

    #[test]
    fn animation_slice_hides_following_commands() {
        let batches = run(&[
            CanvasCommand::AnimationSlice {
                length: 1.0,
                begin: 0.5,
                end: 1.0,
                offset: 0.0,
            },
            CanvasCommand::Rect {
                rect: Rect2::from_xywh(0.0, 0.0, 1.0, 1.0),
                color: Color::WHITE,
                antialiased: false,
            },
        ]);
        assert!(batches.is_empty());
    }

    #[test]
    fn triangulates_concave_polygon() {
        // An L shape.
        let pts = [
            Vec2::new(0.0, 0.0),
            Vec2::new(2.0, 0.0),
            Vec2::new(2.0, 1.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(1.0, 2.0),
            Vec2::new(0.0, 2.0),
        ];
        let idx = triangulate(&pts);
        assert_eq!(idx.len(), 12);
        let area: f32 = idx
            .chunks_exact(3)
            .map(|t| {
                let (a, b, c) = (pts[t[0] as usize], pts[t[1] as usize], pts[t[2] as usize]);
                ((b - a).perp_dot(c - a) * 0.5).abs()
            })
            .sum();
        assert!((area - 3.0).abs() < 1e-5);
    }

    #[test]
    fn nine_patch_tile_fit_divides_evenly() {
        let segs = nine_patch_axis(0.0, 100.0, 0.0, 30.0, 10.0, 10.0, NinePatchAxisMode::TileFit);
        // Margin, 8 tiles of 10, margin.
        assert_eq!(segs.len(), 10);
        assert!(segs[1..9].iter().all(|s| (s.dst.1 - s.dst.0 - 10.0).abs() < 1e-5));
    }

    #[test]
    fn nine_patch_tile_clips_last_tile() {
        let segs = nine_patch_axis(0.0, 45.0, 0.0, 30.0, 10.0, 10.0, NinePatchAxisMode::Tile);
        assert_eq!(segs.len(), 5);
        assert!((segs[3].dst.1 - 35.0).abs() < 1e-5);
        assert!((segs[3].src.1 - segs[3].src.0 - 5.0).abs() < 1e-5);
    }
}
