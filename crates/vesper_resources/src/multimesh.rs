//! MultiMesh Store
//!
//! One mesh drawn N times from a flat float buffer. Each instance row is
//! `transform (8 or 12) + color (4, optional) + custom data (4, optional)`
//! floats. 3D transforms are stored as three rows of a 3x4 matrix
//! `[bx.x, by.x, bz.x, o.x, bx.y, ...]`; 2D transforms as two rows
//! `[x.x, y.x, 0, o.x, x.y, y.y, 0, o.y]`.

use glam::{Affine2, Affine3A, Mat2, Mat3A, Vec2, Vec3A, Vec4};
use vesper_core::math::{Aabb, Color};
use vesper_core::{ordinal_enum, ChangeTracker, Result, Rid, RidKind, RidOwner, ServerError};

ordinal_enum! {
    #[derive(Default)]
    pub enum MultimeshTransformFormat {
        Transform2D = 0,
        #[default]
        Transform3D = 1,
    }
}

ordinal_enum! {
    #[derive(Default)]
    pub enum MultimeshPhysicsInterpolationQuality {
        #[default]
        Fast = 0,
        High = 1,
    }
}

/// Largest instance buffer `allocate_data` accepts.
pub const MAX_BUFFER_BYTES: usize = i32::MAX as usize;

/// Floats per instance row.
#[must_use]
pub fn row_stride(format: MultimeshTransformFormat, use_colors: bool, use_custom_data: bool) -> usize {
    let transform = match format {
        MultimeshTransformFormat::Transform2D => 8,
        MultimeshTransformFormat::Transform3D => 12,
    };
    transform + if use_colors { 4 } else { 0 } + if use_custom_data { 4 } else { 0 }
}

#[must_use]
pub fn pack_transform(t: &Affine3A) -> [f32; 12] {
    let b = t.matrix3;
    let o = t.translation;
    [
        b.x_axis.x, b.y_axis.x, b.z_axis.x, o.x, //
        b.x_axis.y, b.y_axis.y, b.z_axis.y, o.y, //
        b.x_axis.z, b.y_axis.z, b.z_axis.z, o.z,
    ]
}

#[must_use]
pub fn unpack_transform(r: &[f32]) -> Affine3A {
    Affine3A {
        matrix3: Mat3A::from_cols(
            Vec3A::new(r[0], r[4], r[8]),
            Vec3A::new(r[1], r[5], r[9]),
            Vec3A::new(r[2], r[6], r[10]),
        ),
        translation: Vec3A::new(r[3], r[7], r[11]),
    }
}

#[must_use]
pub fn pack_transform_2d(t: &Affine2) -> [f32; 8] {
    let m = t.matrix2;
    let o = t.translation;
    [m.x_axis.x, m.y_axis.x, 0.0, o.x, m.x_axis.y, m.y_axis.y, 0.0, o.y]
}

#[must_use]
pub fn unpack_transform_2d(r: &[f32]) -> Affine2 {
    Affine2 {
        matrix2: Mat2::from_cols(Vec2::new(r[0], r[4]), Vec2::new(r[1], r[5])),
        translation: Vec2::new(r[3], r[7]),
    }
}

#[derive(Debug, Clone, Default)]
pub struct MultiMesh {
    pub mesh: Rid,
    pub instances: usize,
    pub transform_format: MultimeshTransformFormat,
    pub use_colors: bool,
    pub use_custom_data: bool,
    pub buffer: Vec<f32>,
    /// -1 draws every allocated instance.
    pub visible_instances: i32,
    pub custom_aabb: Option<Aabb>,
    pub physics_interpolation_quality: MultimeshPhysicsInterpolationQuality,
    pub changes: ChangeTracker,
}

impl MultiMesh {
    #[must_use]
    pub fn stride(&self) -> usize {
        row_stride(self.transform_format, self.use_colors, self.use_custom_data)
    }

    /// Instances actually drawn.
    #[must_use]
    pub fn drawn_instances(&self) -> usize {
        if self.visible_instances < 0 {
            self.instances
        } else {
            (self.visible_instances as usize).min(self.instances)
        }
    }

    fn row(&self, index: usize) -> Option<&[f32]> {
        let stride = self.stride();
        self.buffer.get(index * stride..(index + 1) * stride)
    }

    fn row_mut(&mut self, index: usize) -> Result<&mut [f32]> {
        let stride = self.stride();
        let limit = self.instances;
        if index >= limit {
            return Err(ServerError::OutOfRange {
                what: "multimesh instance",
                index,
                limit,
            });
        }
        Ok(&mut self.buffer[index * stride..(index + 1) * stride])
    }

    fn color_offset(&self) -> usize {
        match self.transform_format {
            MultimeshTransformFormat::Transform2D => 8,
            MultimeshTransformFormat::Transform3D => 12,
        }
    }

    fn custom_offset(&self) -> usize {
        self.color_offset() + if self.use_colors { 4 } else { 0 }
    }

    /// Transform of one instance, identity for out-of-range indices.
    #[must_use]
    pub fn instance_transform(&self, index: usize) -> Affine3A {
        match (self.row(index), self.transform_format) {
            (Some(r), MultimeshTransformFormat::Transform3D) => unpack_transform(r),
            (Some(r), MultimeshTransformFormat::Transform2D) => {
                let t = unpack_transform_2d(r);
                Affine3A::from_cols(
                    t.matrix2.x_axis.extend(0.0).into(),
                    t.matrix2.y_axis.extend(0.0).into(),
                    Vec3A::Z,
                    t.translation.extend(0.0).into(),
                )
            }
            (None, _) => Affine3A::IDENTITY,
        }
    }

    /// Union of `mesh_aabb` placed at each drawn instance.
    #[must_use]
    pub fn compute_aabb(&self, mesh_aabb: &Aabb) -> Aabb {
        if let Some(custom) = self.custom_aabb {
            return custom;
        }
        let mut out: Option<Aabb> = None;
        for i in 0..self.drawn_instances() {
            let b = mesh_aabb.transform(&self.instance_transform(i));
            out = Some(out.map_or(b, |acc| acc.merge(&b)));
        }
        out.unwrap_or(Aabb::ZERO)
    }
}

pub struct MultiMeshStore {
    owner: RidOwner<MultiMesh>,
}

impl Default for MultiMeshStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MultiMeshStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            owner: RidOwner::new(RidKind::MultiMesh),
        }
    }

    pub fn initialize(&mut self, rid: Rid) {
        self.owner.initialize(
            rid,
            MultiMesh {
                visible_instances: -1,
                ..Default::default()
            },
        );
    }

    #[must_use]
    pub fn get(&self, rid: Rid) -> Option<&MultiMesh> {
        self.owner.get(rid)
    }

    pub fn get_mut(&mut self, rid: Rid) -> Option<&mut MultiMesh> {
        self.owner.get_mut(rid)
    }

    #[must_use]
    pub fn owns(&self, rid: Rid) -> bool {
        self.owner.owns(rid)
    }

    pub fn free(&mut self, rid: Rid) -> Option<MultiMesh> {
        self.owner.take(rid)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Rid, &MultiMesh)> {
        self.owner.iter()
    }

    fn mm_mut(&mut self, rid: Rid) -> Result<&mut MultiMesh> {
        self.owner.get_mut(rid).ok_or(ServerError::InvalidRid(rid))
    }

    /// Reallocates a zeroed buffer of `instances × stride` floats.
    ///
    /// Counts whose buffer would exceed [`MAX_BUFFER_BYTES`] are refused and
    /// leave the multimesh untouched.
    pub fn allocate_data(
        &mut self,
        rid: Rid,
        instances: usize,
        format: MultimeshTransformFormat,
        use_colors: bool,
        use_custom_data: bool,
    ) -> Result<()> {
        let mm = self.mm_mut(rid)?;
        let floats = instances
            .checked_mul(row_stride(format, use_colors, use_custom_data))
            .filter(|n| n.checked_mul(size_of::<f32>()).is_some_and(|bytes| bytes <= MAX_BUFFER_BYTES))
            .ok_or_else(|| {
                ServerError::InvalidArgument(format!("multimesh_allocate_data: {instances} instances do not fit a buffer"))
            })?;
        mm.instances = instances;
        mm.transform_format = format;
        mm.use_colors = use_colors;
        mm.use_custom_data = use_custom_data;
        mm.buffer = vec![0.0; floats];
        mm.changes.changed();
        Ok(())
    }

    /// Replaces the whole buffer; its length must be `instances × stride`.
    pub fn set_buffer(&mut self, rid: Rid, buffer: &[f32]) -> Result<()> {
        let mm = self.mm_mut(rid)?;
        let expected = mm.instances * mm.stride();
        if buffer.len() != expected {
            return Err(ServerError::SizeMismatch {
                what: "multimesh buffer",
                expected,
                actual: buffer.len(),
            });
        }
        mm.buffer.copy_from_slice(buffer);
        mm.changes.changed();
        Ok(())
    }

    #[must_use]
    pub fn get_buffer(&self, rid: Rid) -> Vec<f32> {
        self.owner.get(rid).map(|m| m.buffer.clone()).unwrap_or_default()
    }

    pub fn set_mesh(&mut self, rid: Rid, mesh: Rid) -> Result<()> {
        let mm = self.mm_mut(rid)?;
        mm.mesh = mesh;
        mm.changes.changed();
        Ok(())
    }

    pub fn instance_set_transform(&mut self, rid: Rid, index: usize, transform: &Affine3A) -> Result<()> {
        let mm = self.mm_mut(rid)?;
        if mm.transform_format != MultimeshTransformFormat::Transform3D {
            return Err(ServerError::InvalidArgument("multimesh uses 2D transforms".into()));
        }
        mm.row_mut(index)?[..12].copy_from_slice(&pack_transform(transform));
        mm.changes.changed();
        Ok(())
    }

    pub fn instance_set_transform_2d(&mut self, rid: Rid, index: usize, transform: &Affine2) -> Result<()> {
        let mm = self.mm_mut(rid)?;
        if mm.transform_format != MultimeshTransformFormat::Transform2D {
            return Err(ServerError::InvalidArgument("multimesh uses 3D transforms".into()));
        }
        mm.row_mut(index)?[..8].copy_from_slice(&pack_transform_2d(transform));
        mm.changes.changed();
        Ok(())
    }

    pub fn instance_set_color(&mut self, rid: Rid, index: usize, color: Color) -> Result<()> {
        let mm = self.mm_mut(rid)?;
        if !mm.use_colors {
            return Err(ServerError::InvalidArgument("multimesh has no color data".into()));
        }
        let ofs = mm.color_offset();
        mm.row_mut(index)?[ofs..ofs + 4].copy_from_slice(&color.to_array());
        mm.changes.changed();
        Ok(())
    }

    pub fn instance_set_custom_data(&mut self, rid: Rid, index: usize, data: Vec4) -> Result<()> {
        let mm = self.mm_mut(rid)?;
        if !mm.use_custom_data {
            return Err(ServerError::InvalidArgument("multimesh has no custom data".into()));
        }
        let ofs = mm.custom_offset();
        mm.row_mut(index)?[ofs..ofs + 4].copy_from_slice(&data.to_array());
        mm.changes.changed();
        Ok(())
    }

    #[must_use]
    pub fn instance_get_transform(&self, rid: Rid, index: usize) -> Affine3A {
        match self.owner.get(rid) {
            Some(mm) if mm.transform_format == MultimeshTransformFormat::Transform3D => mm.instance_transform(index),
            _ => Affine3A::IDENTITY,
        }
    }

    #[must_use]
    pub fn instance_get_transform_2d(&self, rid: Rid, index: usize) -> Affine2 {
        self.owner
            .get(rid)
            .filter(|mm| mm.transform_format == MultimeshTransformFormat::Transform2D)
            .and_then(|mm| mm.row(index).map(unpack_transform_2d))
            .unwrap_or(Affine2::IDENTITY)
    }

    #[must_use]
    pub fn instance_get_color(&self, rid: Rid, index: usize) -> Color {
        self.owner
            .get(rid)
            .filter(|mm| mm.use_colors)
            .and_then(|mm| {
                let ofs = mm.color_offset();
                mm.row(index).map(|r| Color::rgba(r[ofs], r[ofs + 1], r[ofs + 2], r[ofs + 3]))
            })
            .unwrap_or(Color::TRANSPARENT)
    }

    #[must_use]
    pub fn instance_get_custom_data(&self, rid: Rid, index: usize) -> Vec4 {
        self.owner
            .get(rid)
            .filter(|mm| mm.use_custom_data)
            .and_then(|mm| {
                let ofs = mm.custom_offset();
                mm.row(index).map(|r| Vec4::from_slice(&r[ofs..ofs + 4]))
            })
            .unwrap_or(Vec4::ZERO)
    }

    pub fn set_visible_instances(&mut self, rid: Rid, visible: i32) -> Result<()> {
        let mm = self.mm_mut(rid)?;
        if visible < -1 || (visible >= 0 && visible as usize > mm.instances) {
            return Err(ServerError::OutOfRange {
                what: "visible instances",
                index: visible.max(0) as usize,
                limit: mm.instances,
            });
        }
        mm.visible_instances = visible;
        mm.changes.changed();
        Ok(())
    }

    pub fn set_custom_aabb(&mut self, rid: Rid, aabb: Aabb) -> Result<()> {
        let mm = self.mm_mut(rid)?;
        mm.custom_aabb = (aabb != Aabb::ZERO).then_some(aabb);
        mm.changes.changed();
        Ok(())
    }

    pub fn purge_reference(&mut self, freed: Rid) {
        for (_, mm) in self.owner.iter_mut() {
            if mm.mesh == freed {
                mm.mesh = Rid::INVALID;
                mm.changes.changed();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use vesper_core::RidAllocator;

    fn setup() -> (RidAllocator, MultiMeshStore, Rid) {
        let alloc = RidAllocator::new();
        let mut store = MultiMeshStore::new();
        let rid = alloc.alloc(RidKind::MultiMesh);
        store.initialize(rid);
        (alloc, store, rid)
    }

    #[test]
    fn strides() {
        use MultimeshTransformFormat::*;
        assert_eq!(row_stride(Transform3D, true, false), 16);
        assert_eq!(row_stride(Transform3D, true, true), 20);
        assert_eq!(row_stride(Transform2D, false, false), 8);
        assert_eq!(row_stride(Transform2D, true, true), 16);
    }

    #[test]
    fn buffer_size_is_checked() {
        let (_alloc, mut store, mm) = setup();
        store.allocate_data(mm, 3, MultimeshTransformFormat::Transform3D, true, false).unwrap();
        assert_eq!(store.get_buffer(mm).len(), 48);
        let err = store.set_buffer(mm, &[0.0; 47]).unwrap_err();
        assert!(matches!(err, ServerError::SizeMismatch { expected: 48, actual: 47, .. }));
        assert!(store.get_buffer(mm).iter().all(|v| *v == 0.0));
    }

    #[test]
    fn oversized_allocation_is_refused() {
        let (_alloc, mut store, mm) = setup();
        store.allocate_data(mm, 2, MultimeshTransformFormat::Transform2D, false, false).unwrap();
        for instances in [usize::MAX / 8, usize::MAX, MAX_BUFFER_BYTES / 4] {
            let err = store
                .allocate_data(mm, instances, MultimeshTransformFormat::Transform3D, true, false)
                .unwrap_err();
            assert!(matches!(err, ServerError::InvalidArgument(_)));
        }
        let kept = store.get(mm).unwrap();
        assert_eq!(kept.instances, 2);
        assert_eq!(kept.transform_format, MultimeshTransformFormat::Transform2D);
        assert_eq!(store.get_buffer(mm).len(), 16);
    }

    #[test]
    fn instance_setters_write_expected_slots() {
        let (_alloc, mut store, mm) = setup();
        store.allocate_data(mm, 2, MultimeshTransformFormat::Transform3D, true, true).unwrap();
        let t = Affine3A::from_translation(Vec3::new(1.0, 2.0, 3.0));
        store.instance_set_transform(mm, 1, &t).unwrap();
        store.instance_set_color(mm, 1, Color::RED).unwrap();
        store.instance_set_custom_data(mm, 1, Vec4::splat(7.0)).unwrap();

        let buf = store.get_buffer(mm);
        let row = &buf[20..40];
        assert_eq!(&row[..12], &[1.0, 0.0, 0.0, 1.0, 0.0, 1.0, 0.0, 2.0, 0.0, 0.0, 1.0, 3.0]);
        assert_eq!(&row[12..16], &[1.0, 0.0, 0.0, 1.0]);
        assert_eq!(&row[16..20], &[7.0; 4]);
        assert_eq!(store.instance_get_transform(mm, 1), t);
        assert_eq!(store.instance_get_color(mm, 1), Color::RED);
        assert!(store.instance_set_transform(mm, 2, &t).is_err());
    }

    #[test]
    fn transform_2d_round_trip() {
        let (_alloc, mut store, mm) = setup();
        store.allocate_data(mm, 1, MultimeshTransformFormat::Transform2D, false, false).unwrap();
        let t = Affine2::from_angle_translation(0.5, Vec2::new(4.0, -2.0));
        store.instance_set_transform_2d(mm, 0, &t).unwrap();
        let back = store.instance_get_transform_2d(mm, 0);
        assert!(back.abs_diff_eq(t, 1e-6));
    }

    #[test]
    fn aabb_covers_drawn_instances() {
        let (_alloc, mut store, mm) = setup();
        store.allocate_data(mm, 2, MultimeshTransformFormat::Transform3D, false, false).unwrap();
        store.instance_set_transform(mm, 0, &Affine3A::IDENTITY).unwrap();
        store
            .instance_set_transform(mm, 1, &Affine3A::from_translation(Vec3::new(10.0, 0.0, 0.0)))
            .unwrap();
        let unit = Aabb::new(Vec3::splat(-1.0), Vec3::splat(1.0));
        let m = store.get(mm).unwrap();
        assert_eq!(m.compute_aabb(&unit).max.x, 11.0);
        store.set_visible_instances(mm, 1).unwrap();
        assert_eq!(store.get(mm).unwrap().compute_aabb(&unit).max.x, 1.0);
    }
}
