//! Occlusion culling
//!
//! A small ray-cast depth buffer built from occluder triangles. Each texel
//! stores the view depth of the nearest occluder hit along its pixel ray; a
//! box is hidden when every texel it covers has an occluder in front of the
//! box's nearest corner.

use glam::{Mat4, Vec3, Vec4Swizzles};
use vesper_core::math::Aabb;
use vesper_core::quality::OcclusionCullingBuildQuality;

/// Buffer width per build quality; height is half of it.
#[must_use]
pub const fn buffer_width(quality: OcclusionCullingBuildQuality) -> u32 {
    match quality {
        OcclusionCullingBuildQuality::Low => 64,
        OcclusionCullingBuildQuality::Medium => 128,
        OcclusionCullingBuildQuality::High => 256,
    }
}

#[derive(Debug, Clone)]
struct Triangle {
    v: [Vec3; 3],
    aabb: Aabb,
}

#[derive(Debug, Clone)]
pub struct OcclusionBuffer {
    width: u32,
    height: u32,
    depth: Vec<f32>,
    view_proj: Mat4,
    eye: Vec3,
    forward: Vec3,
    batches: u32,
}

impl OcclusionBuffer {
    #[must_use]
    pub fn new(quality: OcclusionCullingBuildQuality) -> Self {
        let width = buffer_width(quality);
        let height = width / 2;
        Self {
            width,
            height,
            depth: vec![f32::INFINITY; (width * height) as usize],
            view_proj: Mat4::IDENTITY,
            eye: Vec3::ZERO,
            forward: Vec3::NEG_Z,
            batches: 0,
        }
    }

    #[must_use]
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Number of ray batches issued by the last [`rasterize`](Self::rasterize).
    #[must_use]
    pub fn batches(&self) -> u32 {
        self.batches
    }

    /// Casts one ray per texel against `triangles`, in batches of
    /// `rays_per_thread` rays.
    pub fn rasterize(
        &mut self,
        view_proj: Mat4,
        eye: Vec3,
        forward: Vec3,
        triangles: &[[Vec3; 3]],
        rays_per_thread: u32,
    ) {
        self.view_proj = view_proj;
        self.eye = eye;
        self.forward = forward.normalize_or(Vec3::NEG_Z);
        self.depth.fill(f32::INFINITY);
        self.batches = 0;
        if triangles.is_empty() {
            return;
        }
        let inv = view_proj.inverse();
        let tris: Vec<Triangle> = triangles
            .iter()
            .map(|t| Triangle {
                v: *t,
                aabb: Aabb::from_points(t).grow(1e-4),
            })
            .collect();

        let total = self.width * self.height;
        let batch = rays_per_thread.max(1);
        let mut start = 0;
        while start < total {
            let end = (start + batch).min(total);
            for texel in start..end {
                let (x, y) = (texel % self.width, texel / self.width);
                let ndc_x = (x as f32 + 0.5) / self.width as f32 * 2.0 - 1.0;
                let ndc_y = 1.0 - (y as f32 + 0.5) / self.height as f32 * 2.0;
                let near = inv.project_point3(Vec3::new(ndc_x, ndc_y, 0.0));
                let far = inv.project_point3(Vec3::new(ndc_x, ndc_y, 1.0));
                let dir = far - near;
                let mut best = f32::INFINITY;
                for tri in &tris {
                    if !tri.aabb.intersects_segment(near, far) {
                        continue;
                    }
                    if let Some(t) = ray_triangle(near, dir, &tri.v) {
                        let hit = near + dir * t;
                        best = best.min((hit - self.eye).dot(self.forward));
                    }
                }
                self.depth[texel as usize] = best;
            }
            self.batches += 1;
            start = end;
        }
    }

    /// `true` when `aabb` is completely behind rasterized occluders.
    #[must_use]
    pub fn is_occluded(&self, aabb: &Aabb) -> bool {
        if self.batches == 0 {
            return false;
        }
        let mut min_px = glam::Vec2::splat(f32::INFINITY);
        let mut max_px = glam::Vec2::splat(f32::NEG_INFINITY);
        let mut nearest = f32::INFINITY;
        for corner in aabb.corners() {
            let clip = self.view_proj * corner.extend(1.0);
            if clip.w <= f32::EPSILON {
                return false;
            }
            let ndc = clip.xy() / clip.w;
            let px = glam::Vec2::new(
                (ndc.x + 1.0) * 0.5 * self.width as f32,
                (1.0 - ndc.y) * 0.5 * self.height as f32,
            );
            min_px = min_px.min(px);
            max_px = max_px.max(px);
            nearest = nearest.min((corner - self.eye).dot(self.forward));
        }
        if nearest <= 0.0 {
            return false;
        }
        let x0 = min_px.x.floor().max(0.0) as u32;
        let y0 = min_px.y.floor().max(0.0) as u32;
        let x1 = (max_px.x.ceil() as u32).min(self.width);
        let y1 = (max_px.y.ceil() as u32).min(self.height);
        if x0 >= x1 || y0 >= y1 {
            // Off screen; the frustum test owns that case.
            return false;
        }
        (y0..y1).all(|y| (x0..x1).all(|x| self.depth[(y * self.width + x) as usize] < nearest))
    }
}

/// Moller-Trumbore; returns the ray parameter of a two-sided hit.
fn ray_triangle(origin: Vec3, dir: Vec3, v: &[Vec3; 3]) -> Option<f32> {
    let e1 = v[1] - v[0];
    let e2 = v[2] - v[0];
    let p = dir.cross(e2);
    let det = e1.dot(p);
    if det.abs() < 1e-12 {
        return None;
    }
    let inv_det = 1.0 / det;
    let s = origin - v[0];
    let u = s.dot(p) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(e1);
    let w = dir.dot(q) * inv_det;
    if w < 0.0 || u + w > 1.0 {
        return None;
    }
    let t = e2.dot(q) * inv_det;
    (0.0..=1.0).contains(&t).then_some(t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_core::math::perspective;

    fn wall(z: f32, half: f32) -> Vec<[Vec3; 3]> {
        let a = Vec3::new(-half, -half, z);
        let b = Vec3::new(half, -half, z);
        let c = Vec3::new(half, half, z);
        let d = Vec3::new(-half, half, z);
        vec![[a, b, c], [a, c, d]]
    }

    fn camera() -> (Mat4, Vec3, Vec3) {
        let proj = perspective(60.0, 2.0, 0.1, 100.0);
        let view = Mat4::look_to_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
        (proj * view, Vec3::ZERO, Vec3::NEG_Z)
    }

    #[test]
    fn box_behind_wall_is_hidden() {
        let (vp, eye, fwd) = camera();
        let mut buf = OcclusionBuffer::new(OcclusionCullingBuildQuality::Low);
        buf.rasterize(vp, eye, fwd, &wall(-5.0, 50.0), 512);
        let behind = Aabb::from_center_extents(Vec3::new(0.0, 0.0, -20.0), Vec3::ONE);
        let in_front = Aabb::from_center_extents(Vec3::new(0.0, 0.0, -2.0), Vec3::splat(0.5));
        assert!(buf.is_occluded(&behind));
        assert!(!buf.is_occluded(&in_front));
    }

    #[test]
    fn small_wall_hides_nothing_around_it() {
        let (vp, eye, fwd) = camera();
        let mut buf = OcclusionBuffer::new(OcclusionCullingBuildQuality::Low);
        buf.rasterize(vp, eye, fwd, &wall(-5.0, 0.5), 512);
        let wide = Aabb::from_center_extents(Vec3::new(0.0, 0.0, -20.0), Vec3::new(10.0, 1.0, 1.0));
        assert!(!buf.is_occluded(&wide));
    }

    #[test]
    fn batches_follow_ray_budget() {
        let (vp, eye, fwd) = camera();
        let mut buf = OcclusionBuffer::new(OcclusionCullingBuildQuality::Low);
        buf.rasterize(vp, eye, fwd, &wall(-5.0, 1.0), 512);
        // 64 x 32 texels
        assert_eq!(buf.batches(), 4);
    }

    #[test]
    fn empty_buffer_never_occludes() {
        let buf = OcclusionBuffer::new(OcclusionCullingBuildQuality::High);
        assert_eq!(buf.size(), (256, 128));
        assert!(!buf.is_occluded(&Aabb::from_center_extents(Vec3::NEG_Z * 5.0, Vec3::ONE)));
    }
}
