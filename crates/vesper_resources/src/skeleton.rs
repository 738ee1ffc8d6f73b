//! Skeleton Store
//!
//! Bones are kept in the same row-major float layout multimeshes use, so a
//! skinning pass can upload the buffer unchanged: 12 floats per 3D bone,
//! 8 per 2D bone.

use glam::{Affine2, Affine3A};
use vesper_core::{ChangeTracker, Result, Rid, RidKind, RidOwner, ServerError};

use crate::multimesh::{pack_transform, pack_transform_2d, unpack_transform, unpack_transform_2d};

#[derive(Debug, Clone, Default)]
pub struct Skeleton {
    pub bone_count: usize,
    pub is_2d: bool,
    pub base_transform_2d: Affine2,
    pub data: Vec<f32>,
    pub changes: ChangeTracker,
}

impl Skeleton {
    #[must_use]
    pub fn stride(&self) -> usize {
        if self.is_2d { 8 } else { 12 }
    }

    fn bone(&self, index: usize) -> Option<&[f32]> {
        let s = self.stride();
        self.data.get(index * s..(index + 1) * s)
    }

    fn bone_mut(&mut self, index: usize) -> Result<&mut [f32]> {
        let s = self.stride();
        if index >= self.bone_count {
            return Err(ServerError::OutOfRange {
                what: "bone",
                index,
                limit: self.bone_count,
            });
        }
        Ok(&mut self.data[index * s..(index + 1) * s])
    }
}

pub struct SkeletonStore {
    owner: RidOwner<Skeleton>,
}

impl Default for SkeletonStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SkeletonStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            owner: RidOwner::new(RidKind::Skeleton),
        }
    }

    pub fn initialize(&mut self, rid: Rid) {
        self.owner.initialize(
            rid,
            Skeleton {
                base_transform_2d: Affine2::IDENTITY,
                ..Default::default()
            },
        );
    }

    #[must_use]
    pub fn get(&self, rid: Rid) -> Option<&Skeleton> {
        self.owner.get(rid)
    }

    #[must_use]
    pub fn owns(&self, rid: Rid) -> bool {
        self.owner.owns(rid)
    }

    pub fn free(&mut self, rid: Rid) -> Option<Skeleton> {
        self.owner.take(rid)
    }

    fn skel_mut(&mut self, rid: Rid) -> Result<&mut Skeleton> {
        self.owner.get_mut(rid).ok_or(ServerError::InvalidRid(rid))
    }

    /// Resets every bone to identity.
    pub fn allocate_data(&mut self, rid: Rid, bones: usize, is_2d: bool) -> Result<()> {
        let skel = self.skel_mut(rid)?;
        skel.bone_count = bones;
        skel.is_2d = is_2d;
        skel.data = if is_2d {
            pack_transform_2d(&Affine2::IDENTITY).repeat(bones)
        } else {
            pack_transform(&Affine3A::IDENTITY).repeat(bones)
        };
        skel.changes.changed();
        Ok(())
    }

    #[must_use]
    pub fn bone_count(&self, rid: Rid) -> usize {
        self.owner.get(rid).map_or(0, |s| s.bone_count)
    }

    pub fn bone_set_transform(&mut self, rid: Rid, bone: usize, transform: &Affine3A) -> Result<()> {
        let skel = self.skel_mut(rid)?;
        if skel.is_2d {
            return Err(ServerError::InvalidArgument("skeleton is 2D".into()));
        }
        skel.bone_mut(bone)?.copy_from_slice(&pack_transform(transform));
        skel.changes.changed();
        Ok(())
    }

    pub fn bone_set_transform_2d(&mut self, rid: Rid, bone: usize, transform: &Affine2) -> Result<()> {
        let skel = self.skel_mut(rid)?;
        if !skel.is_2d {
            return Err(ServerError::InvalidArgument("skeleton is 3D".into()));
        }
        skel.bone_mut(bone)?.copy_from_slice(&pack_transform_2d(transform));
        skel.changes.changed();
        Ok(())
    }

    #[must_use]
    pub fn bone_get_transform(&self, rid: Rid, bone: usize) -> Affine3A {
        self.owner
            .get(rid)
            .filter(|s| !s.is_2d)
            .and_then(|s| s.bone(bone).map(unpack_transform))
            .unwrap_or(Affine3A::IDENTITY)
    }

    #[must_use]
    pub fn bone_get_transform_2d(&self, rid: Rid, bone: usize) -> Affine2 {
        self.owner
            .get(rid)
            .filter(|s| s.is_2d)
            .and_then(|s| s.bone(bone).map(unpack_transform_2d))
            .unwrap_or(Affine2::IDENTITY)
    }

    pub fn set_base_transform_2d(&mut self, rid: Rid, base: Affine2) -> Result<()> {
        let skel = self.skel_mut(rid)?;
        skel.base_transform_2d = base;
        skel.changes.changed();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Vec2, Vec3};
    use vesper_core::RidAllocator;

    #[test]
    fn bones_start_at_identity_and_round_trip() {
        let alloc = RidAllocator::new();
        let mut store = SkeletonStore::new();
        let sk = alloc.alloc(RidKind::Skeleton);
        store.initialize(sk);
        store.allocate_data(sk, 3, false).unwrap();
        assert_eq!(store.bone_get_transform(sk, 2), Affine3A::IDENTITY);

        let t = Affine3A::from_scale_rotation_translation(Vec3::splat(2.0), glam::Quat::from_rotation_y(0.3), Vec3::X);
        store.bone_set_transform(sk, 1, &t).unwrap();
        assert!(store.bone_get_transform(sk, 1).abs_diff_eq(t, 1e-6));
        assert!(store.bone_set_transform(sk, 3, &t).is_err());
        assert!(store.bone_set_transform_2d(sk, 0, &Affine2::IDENTITY).is_err());
    }

    #[test]
    fn skeleton_2d() {
        let alloc = RidAllocator::new();
        let mut store = SkeletonStore::new();
        let sk = alloc.alloc(RidKind::Skeleton);
        store.initialize(sk);
        store.allocate_data(sk, 2, true).unwrap();
        assert_eq!(store.get(sk).unwrap().data.len(), 16);
        let t = Affine2::from_translation(Vec2::new(3.0, 4.0));
        store.bone_set_transform_2d(sk, 1, &t).unwrap();
        assert_eq!(store.bone_get_transform_2d(sk, 1), t);
    }
}
