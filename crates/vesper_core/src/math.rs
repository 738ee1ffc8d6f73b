//! Math Primitives
//!
//! Geometry types used across the server: colors, 2D rectangles, axis-aligned
//! boxes, planes, frusta and projection helpers. Linear algebra itself comes
//! from `glam`; these types add the bounding-volume logic the culling and
//! canvas code needs.

use glam::{Affine2, Affine3A, Mat4, Vec2, Vec3, Vec4};
use serde::{Deserialize, Serialize};

/// 2D affine transform used by canvases and canvas items.
pub type Transform2D = Affine2;

/// 3D affine transform used by instances, cameras and lights.
pub type Transform3D = Affine3A;

// ============================================================================
// Color
// ============================================================================

/// Linear RGBA color with `f32` channels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

impl Color {
    pub const WHITE: Color = Color::rgba(1.0, 1.0, 1.0, 1.0);
    pub const BLACK: Color = Color::rgba(0.0, 0.0, 0.0, 1.0);
    pub const TRANSPARENT: Color = Color::rgba(0.0, 0.0, 0.0, 0.0);
    pub const RED: Color = Color::rgba(1.0, 0.0, 0.0, 1.0);
    pub const GREEN: Color = Color::rgba(0.0, 1.0, 0.0, 1.0);
    pub const BLUE: Color = Color::rgba(0.0, 0.0, 1.0, 1.0);
    pub const GRAY: Color = Color::rgba(0.5, 0.5, 0.5, 1.0);

    #[inline]
    #[must_use]
    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    #[inline]
    #[must_use]
    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    #[must_use]
    pub fn from_rgba8(rgba: [u8; 4]) -> Self {
        Self::rgba(
            f32::from(rgba[0]) / 255.0,
            f32::from(rgba[1]) / 255.0,
            f32::from(rgba[2]) / 255.0,
            f32::from(rgba[3]) / 255.0,
        )
    }

    #[must_use]
    pub fn to_rgba8(self) -> [u8; 4] {
        let q = |v: f32| (v.clamp(0.0, 1.0) * 255.0 + 0.5) as u8;
        [q(self.r), q(self.g), q(self.b), q(self.a)]
    }

    #[must_use]
    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }

    #[must_use]
    pub fn from_array(v: [f32; 4]) -> Self {
        Self::rgba(v[0], v[1], v[2], v[3])
    }

    #[must_use]
    pub fn to_vec4(self) -> Vec4 {
        Vec4::new(self.r, self.g, self.b, self.a)
    }

    #[must_use]
    pub fn lerp(self, other: Color, t: f32) -> Self {
        Self::rgba(
            self.r + (other.r - self.r) * t,
            self.g + (other.g - self.g) * t,
            self.b + (other.b - self.b) * t,
            self.a + (other.a - self.a) * t,
        )
    }

    /// Converts a linear color to sRGB encoding.
    #[must_use]
    pub fn linear_to_srgb(self) -> Self {
        let f = |c: f32| {
            if c < 0.003_130_8 {
                12.92 * c
            } else {
                1.055 * c.powf(1.0 / 2.4) - 0.055
            }
        };
        Self::rgba(f(self.r), f(self.g), f(self.b), self.a)
    }

    /// Converts an sRGB encoded color to linear.
    #[must_use]
    pub fn srgb_to_linear(self) -> Self {
        let f = |c: f32| {
            if c < 0.040_45 {
                c / 12.92
            } else {
                ((c + 0.055) / 1.055).powf(2.4)
            }
        };
        Self::rgba(f(self.r), f(self.g), f(self.b), self.a)
    }
}

impl std::ops::Mul for Color {
    type Output = Color;

    fn mul(self, rhs: Color) -> Color {
        Color::rgba(self.r * rhs.r, self.g * rhs.g, self.b * rhs.b, self.a * rhs.a)
    }
}

impl From<Color> for [f32; 4] {
    fn from(c: Color) -> Self {
        c.to_array()
    }
}

// ============================================================================
// Rect2
// ============================================================================

/// Axis-aligned 2D rectangle stored as position + size.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect2 {
    pub position: Vec2,
    pub size: Vec2,
}

impl Rect2 {
    pub const ZERO: Rect2 = Rect2 {
        position: Vec2::ZERO,
        size: Vec2::ZERO,
    };

    #[inline]
    #[must_use]
    pub const fn new(position: Vec2, size: Vec2) -> Self {
        Self { position, size }
    }

    #[inline]
    #[must_use]
    pub fn from_xywh(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self::new(Vec2::new(x, y), Vec2::new(w, h))
    }

    #[inline]
    #[must_use]
    pub fn end(&self) -> Vec2 {
        self.position + self.size
    }

    #[inline]
    #[must_use]
    pub fn center(&self) -> Vec2 {
        self.position + self.size * 0.5
    }

    #[inline]
    #[must_use]
    pub fn has_area(&self) -> bool {
        self.size.x > 0.0 && self.size.y > 0.0
    }

    /// Rectangle with non-negative size covering the same area.
    #[must_use]
    pub fn abs(&self) -> Self {
        let min = self.position.min(self.end());
        Self::new(min, self.size.abs())
    }

    #[must_use]
    pub fn has_point(&self, p: Vec2) -> bool {
        p.x >= self.position.x
            && p.y >= self.position.y
            && p.x < self.position.x + self.size.x
            && p.y < self.position.y + self.size.y
    }

    #[must_use]
    pub fn intersects(&self, other: &Rect2) -> bool {
        self.position.x < other.position.x + other.size.x
            && other.position.x < self.position.x + self.size.x
            && self.position.y < other.position.y + other.size.y
            && other.position.y < self.position.y + self.size.y
    }

    #[must_use]
    pub fn encloses(&self, other: &Rect2) -> bool {
        other.position.x >= self.position.x
            && other.position.y >= self.position.y
            && other.end().x <= self.end().x
            && other.end().y <= self.end().y
    }

    #[must_use]
    pub fn intersection(&self, other: &Rect2) -> Rect2 {
        let min = self.position.max(other.position);
        let max = self.end().min(other.end());
        if max.x <= min.x || max.y <= min.y {
            return Rect2::ZERO;
        }
        Rect2::new(min, max - min)
    }

    #[must_use]
    pub fn merge(&self, other: &Rect2) -> Rect2 {
        let min = self.position.min(other.position);
        let max = self.end().max(other.end());
        Rect2::new(min, max - min)
    }

    #[must_use]
    pub fn expand_to(&self, p: Vec2) -> Rect2 {
        let min = self.position.min(p);
        let max = self.end().max(p);
        Rect2::new(min, max - min)
    }

    #[must_use]
    pub fn grow(&self, by: f32) -> Rect2 {
        Rect2::new(self.position - Vec2::splat(by), self.size + Vec2::splat(by * 2.0))
    }

    /// Grows each side independently (left, top, right, bottom).
    #[must_use]
    pub fn grow_individual(&self, left: f32, top: f32, right: f32, bottom: f32) -> Rect2 {
        Rect2::new(
            self.position - Vec2::new(left, top),
            self.size + Vec2::new(left + right, top + bottom),
        )
    }

    /// Bounding rectangle of `points`. Returns `Rect2::ZERO` for an empty slice.
    #[must_use]
    pub fn from_points(points: &[Vec2]) -> Rect2 {
        let Some(first) = points.first() else {
            return Rect2::ZERO;
        };
        points[1..]
            .iter()
            .fold(Rect2::new(*first, Vec2::ZERO), |r, p| r.expand_to(*p))
    }

    /// Bounding rectangle of this rectangle after applying `xform`.
    #[must_use]
    pub fn transformed(&self, xform: &Transform2D) -> Rect2 {
        let corners = [
            self.position,
            Vec2::new(self.end().x, self.position.y),
            self.end(),
            Vec2::new(self.position.x, self.end().y),
        ];
        let pts = corners.map(|c| xform.transform_point2(c));
        Rect2::from_points(&pts)
    }
}

// ============================================================================
// Aabb
// ============================================================================

/// Axis-aligned 3D bounding box stored as min/max corners.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub const ZERO: Aabb = Aabb {
        min: Vec3::ZERO,
        max: Vec3::ZERO,
    };

    #[inline]
    #[must_use]
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Builds a box from its minimum corner and size.
    #[must_use]
    pub fn from_position_size(position: Vec3, size: Vec3) -> Self {
        let a = position;
        let b = position + size;
        Self::new(a.min(b), a.max(b))
    }

    /// Builds a box from its center and half extents.
    #[must_use]
    pub fn from_center_extents(center: Vec3, half_extents: Vec3) -> Self {
        let h = half_extents.abs();
        Self::new(center - h, center + h)
    }

    /// Bounding box of `points`. Returns `Aabb::ZERO` for an empty slice.
    #[must_use]
    pub fn from_points(points: &[Vec3]) -> Self {
        let Some(first) = points.first() else {
            return Aabb::ZERO;
        };
        points[1..]
            .iter()
            .fold(Aabb::new(*first, *first), |b, p| b.expand_to(*p))
    }

    #[inline]
    #[must_use]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    #[inline]
    #[must_use]
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    #[inline]
    #[must_use]
    pub fn extents(&self) -> Vec3 {
        self.size() * 0.5
    }

    #[must_use]
    pub fn has_volume(&self) -> bool {
        let s = self.size();
        s.x > 0.0 && s.y > 0.0 && s.z > 0.0
    }

    #[must_use]
    pub fn has_surface(&self) -> bool {
        let s = self.size();
        s.x > 0.0 || s.y > 0.0 || s.z > 0.0
    }

    /// Surface area, used as the BVH insertion cost.
    #[must_use]
    pub fn surface_area(&self) -> f32 {
        let s = self.size().max(Vec3::ZERO);
        2.0 * (s.x * s.y + s.y * s.z + s.z * s.x)
    }

    #[must_use]
    pub fn merge(&self, other: &Aabb) -> Aabb {
        Aabb::new(self.min.min(other.min), self.max.max(other.max))
    }

    #[must_use]
    pub fn expand_to(&self, p: Vec3) -> Aabb {
        Aabb::new(self.min.min(p), self.max.max(p))
    }

    #[must_use]
    pub fn grow(&self, by: f32) -> Aabb {
        Aabb::new(self.min - Vec3::splat(by), self.max + Vec3::splat(by))
    }

    #[must_use]
    pub fn contains_point(&self, p: Vec3) -> bool {
        p.cmpge(self.min).all() && p.cmple(self.max).all()
    }

    #[must_use]
    pub fn encloses(&self, other: &Aabb) -> bool {
        other.min.cmpge(self.min).all() && other.max.cmple(self.max).all()
    }

    /// Closed-interval overlap test; touching boxes intersect.
    #[must_use]
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.cmple(other.max).all() && other.min.cmple(self.max).all()
    }

    /// Slab test against the segment `from → to`.
    #[must_use]
    pub fn intersects_segment(&self, from: Vec3, to: Vec3) -> bool {
        let dir = to - from;
        let mut t_min = 0.0f32;
        let mut t_max = 1.0f32;
        for axis in 0..3 {
            let o = from[axis];
            let d = dir[axis];
            let (lo, hi) = (self.min[axis], self.max[axis]);
            if d.abs() < f32::EPSILON {
                if o < lo || o > hi {
                    return false;
                }
                continue;
            }
            let inv = 1.0 / d;
            let mut t0 = (lo - o) * inv;
            let mut t1 = (hi - o) * inv;
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            t_min = t_min.max(t0);
            t_max = t_max.min(t1);
            if t_min > t_max {
                return false;
            }
        }
        true
    }

    /// Slab test against an infinite ray.
    #[must_use]
    pub fn intersects_ray(&self, origin: Vec3, dir: Vec3) -> bool {
        let mut t_min = 0.0f32;
        let mut t_max = f32::INFINITY;
        for axis in 0..3 {
            let o = origin[axis];
            let d = dir[axis];
            let (lo, hi) = (self.min[axis], self.max[axis]);
            if d.abs() < f32::EPSILON {
                if o < lo || o > hi {
                    return false;
                }
                continue;
            }
            let inv = 1.0 / d;
            let mut t0 = (lo - o) * inv;
            let mut t1 = (hi - o) * inv;
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            t_min = t_min.max(t0);
            t_max = t_max.min(t1);
            if t_min > t_max {
                return false;
            }
        }
        true
    }

    /// Conservative test against the intersection of half-spaces. Planes use
    /// the outward convention: a point is inside when it is not over any plane.
    #[must_use]
    pub fn intersects_convex(&self, planes: &[Plane]) -> bool {
        planes.iter().all(|plane| {
            let support = self.support(-plane.normal);
            !plane.is_point_over(support)
        })
    }

    /// Corner of the box furthest along `dir`.
    #[must_use]
    pub fn support(&self, dir: Vec3) -> Vec3 {
        Vec3::new(
            if dir.x > 0.0 { self.max.x } else { self.min.x },
            if dir.y > 0.0 { self.max.y } else { self.min.y },
            if dir.z > 0.0 { self.max.z } else { self.min.z },
        )
    }

    #[must_use]
    pub fn corners(&self) -> [Vec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            Vec3::new(a.x, a.y, a.z),
            Vec3::new(a.x, a.y, b.z),
            Vec3::new(a.x, b.y, a.z),
            Vec3::new(a.x, b.y, b.z),
            Vec3::new(b.x, a.y, a.z),
            Vec3::new(b.x, a.y, b.z),
            Vec3::new(b.x, b.y, a.z),
            Vec3::new(b.x, b.y, b.z),
        ]
    }

    /// World-space bounds of this box after applying `matrix`.
    #[must_use]
    pub fn transform(&self, matrix: &Affine3A) -> Self {
        let mut new_min = Vec3::splat(f32::INFINITY);
        let mut new_max = Vec3::splat(f32::NEG_INFINITY);
        for point in self.corners() {
            let transformed = matrix.transform_point3(point);
            new_min = new_min.min(transformed);
            new_max = new_max.max(transformed);
        }
        Self::new(new_min, new_max)
    }

    /// Squared distance from `p` to the closest point of the box.
    #[must_use]
    pub fn distance_squared_to(&self, p: Vec3) -> f32 {
        let clamped = p.clamp(self.min, self.max);
        p.distance_squared(clamped)
    }
}

// ============================================================================
// Plane
// ============================================================================

/// Plane `normal · p = d`. Points with positive distance are "over" it.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Plane {
    pub normal: Vec3,
    pub d: f32,
}

impl Plane {
    #[inline]
    #[must_use]
    pub const fn new(normal: Vec3, d: f32) -> Self {
        Self { normal, d }
    }

    /// Plane through `point` with the given normal.
    #[must_use]
    pub fn from_point_normal(point: Vec3, normal: Vec3) -> Self {
        let n = normal.normalize_or_zero();
        Self::new(n, n.dot(point))
    }

    /// Plane through three points, wound counter-clockwise.
    #[must_use]
    pub fn from_points(a: Vec3, b: Vec3, c: Vec3) -> Self {
        let n = (b - a).cross(c - a).normalize_or_zero();
        Self::new(n, n.dot(a))
    }

    #[inline]
    #[must_use]
    pub fn distance_to(&self, p: Vec3) -> f32 {
        self.normal.dot(p) - self.d
    }

    #[inline]
    #[must_use]
    pub fn is_point_over(&self, p: Vec3) -> bool {
        self.distance_to(p) > 0.0
    }

    #[must_use]
    pub fn normalized(&self) -> Self {
        let len = self.normal.length();
        if len <= f32::EPSILON {
            return *self;
        }
        Self::new(self.normal / len, self.d / len)
    }

    #[must_use]
    pub fn flipped(&self) -> Self {
        Self::new(-self.normal, -self.d)
    }
}

// ============================================================================
// Frustum
// ============================================================================

/// Six outward-facing planes extracted from a view-projection matrix.
#[derive(Debug, Clone, Copy, Default)]
pub struct Frustum {
    planes: [Plane; 6], // Left, Right, Bottom, Top, Near, Far
}

impl Frustum {
    /// Gribb-Hartmann extraction for a `[0, 1]` depth range.
    #[must_use]
    pub fn from_matrix(m: Mat4) -> Self {
        let rows = [m.row(0), m.row(1), m.row(2), m.row(3)];
        let inward = [
            rows[3] + rows[0],
            rows[3] - rows[0],
            rows[3] + rows[1],
            rows[3] - rows[1],
            rows[2],
            rows[3] - rows[2],
        ];
        let planes = inward.map(|v| {
            // inward: n·p + w >= 0  ⇔  outward: (-n)·p - w <= 0
            Plane::new(-v.truncate(), v.w).normalized()
        });
        Self { planes }
    }

    #[must_use]
    pub fn from_planes(planes: [Plane; 6]) -> Self {
        Self { planes }
    }

    #[must_use]
    pub fn planes(&self) -> &[Plane; 6] {
        &self.planes
    }

    #[must_use]
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        aabb.intersects_convex(&self.planes)
    }

    #[must_use]
    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.distance_to(center) <= radius)
    }
}

// ============================================================================
// Projection helpers
// ============================================================================

/// Right-handed perspective projection with a `[0, 1]` depth range.
/// `fov_y_degrees` is the vertical field of view.
#[must_use]
pub fn perspective(fov_y_degrees: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
    Mat4::perspective_rh(fov_y_degrees.to_radians(), aspect.max(1e-4), near, far)
}

/// Right-handed orthographic projection. `size` is the full height of the
/// view volume; width follows `aspect`.
#[must_use]
pub fn orthogonal(size: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
    let half_h = size * 0.5;
    let half_w = half_h * aspect;
    Mat4::orthographic_rh(-half_w, half_w, -half_h, half_h, near, far)
}

/// Off-axis perspective projection. `size` is the height of the near plane
/// window and `offset` shifts it in view space.
#[must_use]
pub fn frustum(size: f32, aspect: f32, offset: Vec2, near: f32, far: f32) -> Mat4 {
    let half_h = size * 0.5;
    let half_w = half_h * aspect;
    let (l, r) = (offset.x - half_w, offset.x + half_w);
    let (b, t) = (offset.y - half_h, offset.y + half_h);
    let n = near;
    let f = far;
    Mat4::from_cols(
        Vec4::new(2.0 * n / (r - l), 0.0, 0.0, 0.0),
        Vec4::new(0.0, 2.0 * n / (t - b), 0.0, 0.0),
        Vec4::new((r + l) / (r - l), (t + b) / (t - b), f / (n - f), -1.0),
        Vec4::new(0.0, 0.0, n * f / (n - f), 0.0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_serializes_with_vector_arrays() {
        let rect = Rect2::from_xywh(1.0, 2.0, 3.0, 4.0);
        let json = serde_json::to_string(&rect).unwrap();
        assert_eq!(json, r#"{"position":[1.0,2.0],"size":[3.0,4.0]}"#);
        assert_eq!(serde_json::from_str::<Rect2>(&json).unwrap(), rect);
    }

    #[test]
    fn aabb_intersection_is_closed() {
        let a = Aabb::from_center_extents(Vec3::ZERO, Vec3::ONE);
        let b = Aabb::from_center_extents(Vec3::new(2.0, 0.0, 0.0), Vec3::ONE);
        let c = Aabb::from_center_extents(Vec3::new(2.5, 0.0, 0.0), Vec3::ONE);
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn segment_hits_and_misses() {
        let a = Aabb::from_center_extents(Vec3::ZERO, Vec3::ONE);
        assert!(a.intersects_segment(Vec3::new(-5.0, 0.0, 0.0), Vec3::new(5.0, 0.0, 0.0)));
        assert!(!a.intersects_segment(Vec3::new(-5.0, 3.0, 0.0), Vec3::new(5.0, 3.0, 0.0)));
        assert!(!a.intersects_segment(Vec3::new(-5.0, 0.0, 0.0), Vec3::new(-3.0, 0.0, 0.0)));
    }

    #[test]
    fn convex_uses_outward_planes() {
        // Half-space x <= 0.
        let planes = [Plane::new(Vec3::X, 0.0)];
        let left = Aabb::from_center_extents(Vec3::new(-3.0, 0.0, 0.0), Vec3::ONE);
        let right = Aabb::from_center_extents(Vec3::new(3.0, 0.0, 0.0), Vec3::ONE);
        assert!(left.intersects_convex(&planes));
        assert!(!right.intersects_convex(&planes));
    }

    #[test]
    fn frustum_culls_box_behind_camera() {
        let proj = perspective(60.0, 1.0, 0.1, 100.0);
        let frustum = Frustum::from_matrix(proj);
        let front = Aabb::from_center_extents(Vec3::new(0.0, 0.0, -10.0), Vec3::ONE);
        let behind = Aabb::from_center_extents(Vec3::new(0.0, 0.0, 10.0), Vec3::ONE);
        let far = Aabb::from_center_extents(Vec3::new(0.0, 0.0, -500.0), Vec3::ONE);
        assert!(frustum.intersects_aabb(&front));
        assert!(!frustum.intersects_aabb(&behind));
        assert!(!frustum.intersects_aabb(&far));
    }

    #[test]
    fn rect_intersection_and_merge() {
        let a = Rect2::from_xywh(0.0, 0.0, 10.0, 10.0);
        let b = Rect2::from_xywh(5.0, 5.0, 10.0, 10.0);
        assert_eq!(a.intersection(&b), Rect2::from_xywh(5.0, 5.0, 5.0, 5.0));
        assert_eq!(a.merge(&b), Rect2::from_xywh(0.0, 0.0, 15.0, 15.0));
        assert!(a.has_point(Vec2::new(0.0, 0.0)));
        assert!(!a.has_point(Vec2::new(10.0, 0.0)));
    }

    #[test]
    fn color_rgba8_roundtrip() {
        let c = Color::from_rgba8([255, 0, 128, 255]);
        assert_eq!(c.to_rgba8(), [255, 0, 128, 255]);
    }
}
