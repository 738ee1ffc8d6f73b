//! Camera Store
//!
//! Cameras hold projection parameters and a world transform. The view
//! frustum used for culling is derived on demand from both.

use glam::{Affine3A, Mat4, Vec2, Vec3};
use vesper_core::math::{self, Frustum};
use vesper_core::{ordinal_enum, ChangeTracker, Result, Rid, RidKind, ServerError};

ordinal_enum! {
    #[derive(Default)]
    pub enum CameraProjection {
        #[default]
        Perspective = 0,
        Orthogonal = 1,
        Frustum = 2,
    }
}

#[derive(Debug, Clone)]
pub struct Camera {
    pub projection: CameraProjection,
    /// Vertical field of view in degrees, horizontal when `vaspect` is set.
    pub fov: f32,
    pub size: f32,
    pub offset: Vec2,
    pub near: f32,
    pub far: f32,
    pub transform: Affine3A,
    pub cull_mask: u32,
    pub environment: Rid,
    pub attributes: Rid,
    pub compositor: Rid,
    /// Keep the width fixed instead of the height.
    pub vaspect: bool,
    pub changes: ChangeTracker,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            projection: CameraProjection::Perspective,
            fov: 75.0,
            size: 1.0,
            offset: Vec2::ZERO,
            near: 0.05,
            far: 4000.0,
            transform: Affine3A::IDENTITY,
            cull_mask: u32::MAX,
            environment: Rid::INVALID,
            attributes: Rid::INVALID,
            compositor: Rid::INVALID,
            vaspect: false,
            changes: ChangeTracker::new(),
        }
    }
}

impl Camera {
    /// Projection matrix for a target with the given width / height ratio.
    #[must_use]
    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        let aspect = aspect.max(1e-4);
        match self.projection {
            CameraProjection::Perspective => {
                let fov_y = if self.vaspect {
                    let half = (self.fov.to_radians() * 0.5).tan() / aspect;
                    (2.0 * half.atan()).to_degrees()
                } else {
                    self.fov
                };
                math::perspective(fov_y, aspect, self.near, self.far)
            }
            CameraProjection::Orthogonal => {
                let size = if self.vaspect { self.size / aspect } else { self.size };
                math::orthogonal(size, aspect, self.near, self.far)
            }
            CameraProjection::Frustum => {
                let size = if self.vaspect { self.size / aspect } else { self.size };
                math::frustum(size, aspect, self.offset, self.near, self.far)
            }
        }
    }

    #[must_use]
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::from(self.transform.inverse())
    }

    #[must_use]
    pub fn frustum(&self, aspect: f32) -> Frustum {
        Frustum::from_matrix(self.projection_matrix(aspect) * self.view_matrix())
    }

    #[must_use]
    pub fn position(&self) -> Vec3 {
        self.transform.translation.into()
    }

    /// Unit view direction (-Z of the transform).
    #[must_use]
    pub fn forward(&self) -> Vec3 {
        (-Vec3::from(self.transform.matrix3.z_axis)).normalize_or_zero()
    }
}

resource_store!(CameraStore, Camera, RidKind::Camera);

impl CameraStore {
    pub fn initialize(&mut self, rid: Rid) {
        self.owner.initialize(rid, Camera::default());
    }

    field_setters! {
        transform: Affine3A,
        cull_mask: u32,
        environment: Rid,
        attributes: Rid,
        compositor: Rid,
    }

    fn check_planes(near: f32, far: f32) -> Result<()> {
        if near <= 0.0 || far <= near {
            return Err(ServerError::InvalidArgument(format!(
                "camera planes near={near} far={far} are invalid"
            )));
        }
        Ok(())
    }

    pub fn set_perspective(&mut self, rid: Rid, fov_degrees: f32, near: f32, far: f32) -> Result<()> {
        Self::check_planes(near, far)?;
        let cam = self.state_mut(rid)?;
        cam.projection = CameraProjection::Perspective;
        cam.fov = fov_degrees.clamp(1.0, 179.0);
        cam.near = near;
        cam.far = far;
        cam.changes.changed();
        Ok(())
    }

    pub fn set_orthogonal(&mut self, rid: Rid, size: f32, near: f32, far: f32) -> Result<()> {
        Self::check_planes(near, far)?;
        let cam = self.state_mut(rid)?;
        cam.projection = CameraProjection::Orthogonal;
        cam.size = size.max(0.001);
        cam.near = near;
        cam.far = far;
        cam.changes.changed();
        Ok(())
    }

    pub fn set_frustum(&mut self, rid: Rid, size: f32, offset: Vec2, near: f32, far: f32) -> Result<()> {
        Self::check_planes(near, far)?;
        let cam = self.state_mut(rid)?;
        cam.projection = CameraProjection::Frustum;
        cam.size = size.max(0.001);
        cam.offset = offset;
        cam.near = near;
        cam.far = far;
        cam.changes.changed();
        Ok(())
    }

    pub fn set_use_vertical_aspect(&mut self, rid: Rid, enable: bool) -> Result<()> {
        let cam = self.state_mut(rid)?;
        cam.vaspect = enable;
        cam.changes.changed();
        Ok(())
    }

    pub fn purge_reference(&mut self, freed: Rid) {
        for (_, cam) in self.owner.iter_mut() {
            let mut touched = false;
            for r in [&mut cam.environment, &mut cam.attributes, &mut cam.compositor] {
                if *r == freed {
                    *r = Rid::INVALID;
                    touched = true;
                }
            }
            if touched {
                cam.changes.changed();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_core::math::Aabb;
    use vesper_core::RidAllocator;

    #[test]
    fn defaults() {
        let cam = Camera::default();
        assert_eq!(cam.fov, 75.0);
        assert_eq!(cam.near, 0.05);
        assert_eq!(cam.far, 4000.0);
    }

    #[test]
    fn frustum_sees_ahead_not_behind() {
        let cam = Camera::default();
        let f = cam.frustum(16.0 / 9.0);
        let ahead = Aabb::from_center_extents(Vec3::new(0.0, 0.0, -10.0), Vec3::ONE);
        let behind = Aabb::from_center_extents(Vec3::new(0.0, 0.0, 10.0), Vec3::ONE);
        assert!(f.intersects_aabb(&ahead));
        assert!(!f.intersects_aabb(&behind));
    }

    #[test]
    fn rejects_bad_planes() {
        let alloc = RidAllocator::new();
        let mut store = CameraStore::new();
        let c = alloc.alloc(RidKind::Camera);
        store.initialize(c);
        assert!(store.set_perspective(c, 60.0, 1.0, 0.5).is_err());
        store.set_orthogonal(c, 10.0, 0.1, 100.0).unwrap();
        assert_eq!(store.get(c).unwrap().projection, CameraProjection::Orthogonal);
    }
}
