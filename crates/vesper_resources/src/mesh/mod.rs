//! Mesh Store
//!
//! A mesh is an ordered list of packed surfaces (see [`arrays`]) plus
//! blend-shape bookkeeping shared by every surface and an optional shadow
//! mesh used in place of the mesh during shadow passes.

pub mod arrays;
pub mod format;
pub mod primitives;

use vesper_core::math::Aabb;
use vesper_core::{ChangeTracker, Result, Rid, RidKind, RidOwner, ServerError};

pub use arrays::{CustomArray, Positions, SurfaceArrays, SurfaceData, SurfaceLod};
pub use format::{ArrayCustomFormat, ArrayFormat, ArrayType, BlendShapeMode, FormatLayout, PrimitiveType};

#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub surfaces: Vec<SurfaceData>,
    pub blend_shape_count: u32,
    pub blend_shape_mode: BlendShapeMode,
    pub custom_aabb: Option<Aabb>,
    pub shadow_mesh: Rid,
    pub path: String,
    pub changes: ChangeTracker,
}

impl Mesh {
    /// Custom AABB if set, else the union of the surface AABBs.
    #[must_use]
    pub fn aabb(&self) -> Aabb {
        if let Some(custom) = self.custom_aabb {
            return custom;
        }
        let mut surfaces = self.surfaces.iter();
        let Some(first) = surfaces.next() else {
            return Aabb::ZERO;
        };
        surfaces.fold(first.aabb, |acc, s| acc.merge(&s.aabb))
    }
}

/// Which packed buffer a region update writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceBuffer {
    Vertex,
    Attribute,
    Skin,
}

pub struct MeshStore {
    owner: RidOwner<Mesh>,
}

impl Default for MeshStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MeshStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            owner: RidOwner::new(RidKind::Mesh),
        }
    }

    pub fn initialize(&mut self, rid: Rid) {
        self.owner.initialize(rid, Mesh::default());
    }

    #[must_use]
    pub fn get(&self, rid: Rid) -> Option<&Mesh> {
        self.owner.get(rid)
    }

    pub fn get_mut(&mut self, rid: Rid) -> Option<&mut Mesh> {
        self.owner.get_mut(rid)
    }

    #[must_use]
    pub fn owns(&self, rid: Rid) -> bool {
        self.owner.owns(rid)
    }

    pub fn free(&mut self, rid: Rid) -> Option<Mesh> {
        self.owner.take(rid)
    }

    fn mesh_mut(&mut self, rid: Rid) -> Result<&mut Mesh> {
        self.owner.get_mut(rid).ok_or(ServerError::InvalidRid(rid))
    }

    /// Only allowed while the mesh has no surfaces.
    pub fn set_blend_shape_count(&mut self, rid: Rid, count: u32) -> Result<()> {
        let mesh = self.mesh_mut(rid)?;
        if !mesh.surfaces.is_empty() {
            return Err(ServerError::InvalidArgument(
                "mesh_set_blend_shape_count: mesh already has surfaces".into(),
            ));
        }
        mesh.blend_shape_count = count;
        mesh.changes.changed();
        Ok(())
    }

    pub fn add_surface(&mut self, rid: Rid, surface: SurfaceData) -> Result<()> {
        let mesh = self.mesh_mut(rid)?;
        surface.validate(mesh.blend_shape_count)?;
        mesh.surfaces.push(surface);
        mesh.changes.changed();
        Ok(())
    }

    #[must_use]
    pub fn surface_count(&self, rid: Rid) -> usize {
        self.owner.get(rid).map_or(0, |m| m.surfaces.len())
    }

    #[must_use]
    pub fn surface(&self, rid: Rid, index: usize) -> Option<&SurfaceData> {
        self.owner.get(rid)?.surfaces.get(index)
    }

    fn surface_mut(&mut self, rid: Rid, index: usize) -> Result<&mut SurfaceData> {
        let mesh = self.mesh_mut(rid)?;
        mesh.changes.changed();
        let limit = mesh.surfaces.len();
        mesh.surfaces.get_mut(index).ok_or(ServerError::OutOfRange {
            what: "surface",
            index,
            limit,
        })
    }

    pub fn surface_set_material(&mut self, rid: Rid, index: usize, material: Rid) -> Result<()> {
        self.surface_mut(rid, index)?.material = material;
        Ok(())
    }

    #[must_use]
    pub fn surface_material(&self, rid: Rid, index: usize) -> Rid {
        self.surface(rid, index).map_or(Rid::INVALID, |s| s.material)
    }

    pub fn surface_remove(&mut self, rid: Rid, index: usize) -> Result<()> {
        let mesh = self.mesh_mut(rid)?;
        if index >= mesh.surfaces.len() {
            return Err(ServerError::OutOfRange {
                what: "surface",
                index,
                limit: mesh.surfaces.len(),
            });
        }
        mesh.surfaces.remove(index);
        mesh.changes.changed();
        Ok(())
    }

    pub fn clear(&mut self, rid: Rid) -> Result<()> {
        let mesh = self.mesh_mut(rid)?;
        mesh.surfaces.clear();
        mesh.changes.changed();
        Ok(())
    }

    /// Writes `data` at byte `offset` of one packed buffer. Out-of-range
    /// writes fail without touching the surface.
    pub fn update_region(&mut self, rid: Rid, index: usize, buffer: SurfaceBuffer, offset: usize, data: &[u8]) -> Result<()> {
        let surface = self.surface_mut(rid, index)?;
        let target = match buffer {
            SurfaceBuffer::Vertex => &mut surface.vertex_data,
            SurfaceBuffer::Attribute => &mut surface.attribute_data,
            SurfaceBuffer::Skin => &mut surface.skin_data,
        };
        let end = offset.checked_add(data.len()).unwrap_or(usize::MAX);
        if end > target.len() {
            return Err(ServerError::OutOfRange {
                what: "surface buffer region",
                index: end,
                limit: target.len(),
            });
        }
        target[offset..end].copy_from_slice(data);
        Ok(())
    }

    /// `Aabb::ZERO` clears the custom box.
    pub fn set_custom_aabb(&mut self, rid: Rid, aabb: Aabb) -> Result<()> {
        let mesh = self.mesh_mut(rid)?;
        mesh.custom_aabb = (aabb != Aabb::ZERO).then_some(aabb);
        mesh.changes.changed();
        Ok(())
    }

    #[must_use]
    pub fn aabb(&self, rid: Rid) -> Aabb {
        self.owner.get(rid).map_or(Aabb::ZERO, Mesh::aabb)
    }

    pub fn set_shadow_mesh(&mut self, rid: Rid, shadow: Rid) -> Result<()> {
        if rid == shadow {
            return Err(ServerError::CycleDetected("a mesh cannot be its own shadow mesh".into()));
        }
        let mesh = self.mesh_mut(rid)?;
        mesh.shadow_mesh = shadow;
        mesh.changes.changed();
        Ok(())
    }

    /// Mesh drawn in shadow passes: the shadow mesh when set and alive.
    #[must_use]
    pub fn shadow_source(&self, rid: Rid) -> Rid {
        match self.owner.get(rid) {
            Some(m) if self.owner.owns(m.shadow_mesh) => m.shadow_mesh,
            _ => rid,
        }
    }

    pub fn purge_reference(&mut self, freed: Rid) {
        for (_, mesh) in self.owner.iter_mut() {
            let mut touched = false;
            if mesh.shadow_mesh == freed {
                mesh.shadow_mesh = Rid::INVALID;
                touched = true;
            }
            for s in &mut mesh.surfaces {
                if s.material == freed {
                    s.material = Rid::INVALID;
                    touched = true;
                }
            }
            if touched {
                mesh.changes.changed();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_core::RidAllocator;

    fn store_with_mesh() -> (RidAllocator, MeshStore, Rid) {
        let alloc = RidAllocator::new();
        let mut store = MeshStore::new();
        let rid = alloc.alloc(RidKind::Mesh);
        store.initialize(rid);
        (alloc, store, rid)
    }

    fn sphere_surface() -> SurfaceData {
        let arrays = primitives::sphere_arrays(4, 8, 1.0);
        arrays::create_surface_data(PrimitiveType::Triangles, &arrays, &[], &[], ArrayFormat::empty()).unwrap()
    }

    #[test]
    fn surface_count_tracks_add_and_clear() {
        let (_alloc, mut store, mesh) = store_with_mesh();
        store.add_surface(mesh, sphere_surface()).unwrap();
        store.add_surface(mesh, sphere_surface()).unwrap();
        assert_eq!(store.surface_count(mesh), 2);
        store.clear(mesh).unwrap();
        assert_eq!(store.surface_count(mesh), 0);
    }

    #[test]
    fn out_of_range_region_update_changes_nothing() {
        let (_alloc, mut store, mesh) = store_with_mesh();
        store.add_surface(mesh, sphere_surface()).unwrap();
        let before = store.surface(mesh, 0).unwrap().vertex_data.clone();
        let len = before.len();
        assert!(store.update_region(mesh, 0, SurfaceBuffer::Vertex, len - 2, &[1, 2, 3, 4]).is_err());
        assert_eq!(store.surface(mesh, 0).unwrap().vertex_data, before);
        store.update_region(mesh, 0, SurfaceBuffer::Vertex, 0, &[9, 9]).unwrap();
        assert_eq!(&store.surface(mesh, 0).unwrap().vertex_data[..2], &[9, 9]);
    }

    #[test]
    fn blend_shape_count_locked_after_surfaces() {
        let (_alloc, mut store, mesh) = store_with_mesh();
        store.set_blend_shape_count(mesh, 0).unwrap();
        store.add_surface(mesh, sphere_surface()).unwrap();
        assert!(store.set_blend_shape_count(mesh, 2).is_err());
    }

    #[test]
    fn surface_with_wrong_blend_shape_data_is_rejected() {
        let (_alloc, mut store, mesh) = store_with_mesh();
        store.set_blend_shape_count(mesh, 1).unwrap();
        assert!(store.add_surface(mesh, sphere_surface()).is_err());
        assert_eq!(store.surface_count(mesh), 0);
    }

    #[test]
    fn aabb_prefers_custom() {
        let (_alloc, mut store, mesh) = store_with_mesh();
        store.add_surface(mesh, sphere_surface()).unwrap();
        let computed = store.aabb(mesh);
        assert!((computed.size() - glam::Vec3::splat(2.0)).length() < 1e-4);
        let custom = Aabb::new(glam::Vec3::splat(-5.0), glam::Vec3::splat(5.0));
        store.set_custom_aabb(mesh, custom).unwrap();
        assert_eq!(store.aabb(mesh), custom);
    }

    #[test]
    fn shadow_mesh_falls_back_when_freed() {
        let (alloc, mut store, mesh) = store_with_mesh();
        let shadow = alloc.alloc(RidKind::Mesh);
        store.initialize(shadow);
        store.set_shadow_mesh(mesh, shadow).unwrap();
        assert_eq!(store.shadow_source(mesh), shadow);
        store.free(shadow);
        store.purge_reference(shadow);
        assert_eq!(store.shadow_source(mesh), mesh);
    }
}
