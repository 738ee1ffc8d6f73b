//! Occluder meshes consumed by the occlusion culler.

use glam::Vec3;
use vesper_core::math::Aabb;
use vesper_core::{ChangeTracker, Result, Rid, RidKind, ServerError};

#[derive(Debug, Clone, Default)]
pub struct Occluder {
    pub vertices: Vec<Vec3>,
    pub indices: Vec<u32>,
    pub aabb: Aabb,
    pub changes: ChangeTracker,
}

impl Occluder {
    pub fn triangles(&self) -> impl Iterator<Item = [Vec3; 3]> + '_ {
        self.indices.chunks_exact(3).map(|t| {
            [
                self.vertices[t[0] as usize],
                self.vertices[t[1] as usize],
                self.vertices[t[2] as usize],
            ]
        })
    }
}

resource_store!(OccluderStore, Occluder, RidKind::Occluder);

impl OccluderStore {
    pub fn initialize(&mut self, rid: Rid) {
        self.owner.initialize(rid, Occluder::default());
    }

    /// Indices form a triangle list and must address `vertices`.
    pub fn set_mesh(&mut self, rid: Rid, vertices: Vec<Vec3>, indices: Vec<u32>) -> Result<()> {
        if indices.len() % 3 != 0 {
            return Err(ServerError::InvalidArgument(format!(
                "occluder index count {} is not a multiple of 3",
                indices.len()
            )));
        }
        if let Some(bad) = indices.iter().find(|i| **i as usize >= vertices.len()) {
            return Err(ServerError::OutOfRange {
                what: "occluder index",
                index: *bad as usize,
                limit: vertices.len(),
            });
        }
        let occ = self.state_mut(rid)?;
        occ.aabb = Aabb::from_points(&vertices);
        occ.vertices = vertices;
        occ.indices = indices;
        occ.changes.changed();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_core::RidAllocator;

    #[test]
    fn mesh_validation() {
        let alloc = RidAllocator::new();
        let mut store = OccluderStore::new();
        let o = alloc.alloc(RidKind::Occluder);
        store.initialize(o);
        let quad = vec![Vec3::ZERO, Vec3::X, Vec3::Y, Vec3::new(1.0, 1.0, 0.0)];
        assert!(store.set_mesh(o, quad.clone(), vec![0, 1]).is_err());
        assert!(store.set_mesh(o, quad.clone(), vec![0, 1, 4]).is_err());
        store.set_mesh(o, quad, vec![0, 1, 2, 1, 3, 2]).unwrap();
        let occ = store.get(o).unwrap();
        assert_eq!(occ.triangles().count(), 2);
        assert_eq!(occ.aabb.max, Vec3::new(1.0, 1.0, 0.0));
    }
}
