//! Vesper Resources
//!
//! One store per resource kind, each wrapping a
//! [`RidOwner`](vesper_core::RidOwner) with the kind's validated operations.
//! Stores never reach into each other; cross-store effects such as
//! dropping references to a freed handle go through [`ResourceStores`].
//!
//! - Textures & images: [`texture`], [`image`], [`canvas_texture`]
//! - Shading: [`shader`], [`material`], [`global_uniforms`]
//! - Geometry: [`mesh`], [`multimesh`], [`skeleton`], [`occluder`]
//! - Lighting & GI: [`light`], [`probes`], [`fog`]
//! - Effects: [`particles`], [`sky`], [`environment`], [`camera_attributes`], [`compositor`]
//! - Misc: [`camera`], [`visibility_notifier`]

#[macro_use]
mod store;

pub mod camera;
pub mod camera_attributes;
pub mod canvas_texture;
pub mod compositor;
pub mod environment;
pub mod fog;
pub mod global_uniforms;
pub mod image;
pub mod light;
pub mod material;
pub mod mesh;
pub mod multimesh;
pub mod occluder;
pub mod particles;
pub mod probes;
pub mod shader;
pub mod skeleton;
pub mod sky;
pub mod texture;
pub mod visibility_notifier;

use vesper_core::math::Aabb;
use vesper_core::{Rid, RidKind};

pub use camera::{Camera, CameraProjection, CameraStore};
pub use camera_attributes::{CameraAttributes, CameraAttributesStore};
pub use canvas_texture::{CanvasItemTextureFilter, CanvasItemTextureRepeat, CanvasTextureChannel, CanvasTextureStore};
pub use compositor::{
    CompositorEffectCallback, CompositorEffectCallbackType, CompositorEffectContext, CompositorEffectFlags,
    CompositorEffectStore, CompositorStore,
};
pub use environment::{Environment, EnvironmentStore};
pub use fog::{FogVolumeShape, FogVolumeStore};
pub use global_uniforms::{GlobalShaderUniforms, GlobalUniformDecl};
pub use image::{Image, ImageFormat};
pub use light::{Light, LightParam, LightStore, LightType};
pub use material::MaterialStore;
pub use mesh::{ArrayFormat, ArrayType, Mesh, MeshStore, PrimitiveType, SurfaceArrays, SurfaceData};
pub use multimesh::{MultiMeshStore, MultimeshTransformFormat};
pub use occluder::OccluderStore;
pub use particles::{ParticlesCollisionStore, ParticlesStore};
pub use probes::{DecalStore, LightmapStore, ReflectionProbeStore, VoxelGiStore};
pub use shader::{ShaderMode, ShaderStore};
pub use skeleton::SkeletonStore;
pub use sky::{SkyMode, SkyStore};
pub use texture::{TextureLayeredType, TextureStore};
pub use visibility_notifier::{NotifierCallback, VisibilityNotifierStore};

/// Every resource store plus the global uniform table.
#[derive(Default)]
pub struct ResourceStores {
    pub textures: TextureStore,
    pub shaders: ShaderStore,
    pub materials: MaterialStore,
    pub meshes: MeshStore,
    pub multimeshes: MultiMeshStore,
    pub skeletons: SkeletonStore,
    pub lights: LightStore,
    pub reflection_probes: ReflectionProbeStore,
    pub decals: DecalStore,
    pub voxel_gis: VoxelGiStore,
    pub lightmaps: LightmapStore,
    pub particles: ParticlesStore,
    pub particles_collisions: ParticlesCollisionStore,
    pub fog_volumes: FogVolumeStore,
    pub visibility_notifiers: VisibilityNotifierStore,
    pub occluders: OccluderStore,
    pub cameras: CameraStore,
    pub skies: SkyStore,
    pub compositor_effects: CompositorEffectStore,
    pub compositors: CompositorStore,
    pub environments: EnvironmentStore,
    pub camera_attributes: CameraAttributesStore,
    pub canvas_textures: CanvasTextureStore,
    pub global_uniforms: GlobalShaderUniforms,
}

impl ResourceStores {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes the state of `rid` from the store of `kind`. Returns `false`
    /// if that store does not hold it (scene kinds are freed elsewhere).
    pub fn free(&mut self, rid: Rid, kind: RidKind) -> bool {
        match kind {
            RidKind::Texture => self.textures.free(rid).is_some(),
            RidKind::Shader => {
                let freed = self.shaders.free(rid).is_some();
                if freed {
                    self.materials.mark_shader_dirty(rid);
                }
                freed
            }
            RidKind::Material => self.materials.free(rid).is_some(),
            RidKind::Mesh => self.meshes.free(rid).is_some(),
            RidKind::MultiMesh => self.multimeshes.free(rid).is_some(),
            RidKind::Skeleton => self.skeletons.free(rid).is_some(),
            RidKind::Light => self.lights.free(rid).is_some(),
            RidKind::ReflectionProbe => self.reflection_probes.free(rid).is_some(),
            RidKind::Decal => self.decals.free(rid).is_some(),
            RidKind::VoxelGi => self.voxel_gis.free(rid).is_some(),
            RidKind::Lightmap => self.lightmaps.free(rid).is_some(),
            RidKind::Particles => self.particles.free(rid).is_some(),
            RidKind::ParticlesCollision => self.particles_collisions.free(rid).is_some(),
            RidKind::FogVolume => self.fog_volumes.free(rid).is_some(),
            RidKind::VisibilityNotifier => self.visibility_notifiers.free(rid).is_some(),
            RidKind::Occluder => self.occluders.free(rid).is_some(),
            RidKind::Camera => self.cameras.free(rid).is_some(),
            RidKind::Sky => self.skies.free(rid).is_some(),
            RidKind::CompositorEffect => self.compositor_effects.free(rid).is_some(),
            RidKind::Compositor => self.compositors.free(rid).is_some(),
            RidKind::Environment => self.environments.free(rid).is_some(),
            RidKind::CameraAttributes => self.camera_attributes.free(rid).is_some(),
            RidKind::CanvasTexture => self.canvas_textures.free(rid).is_some(),
            _ => false,
        }
    }

    /// Drops every reference to `freed` held by another resource.
    pub fn purge_reference(&mut self, freed: Rid) {
        self.shaders.purge_reference(freed);
        self.materials.purge_reference(freed);
        self.meshes.purge_reference(freed);
        self.multimeshes.purge_reference(freed);
        self.lights.purge_reference(freed);
        self.decals.purge_reference(freed);
        self.lightmaps.purge_reference(freed);
        self.particles.purge_reference(freed);
        self.particles_collisions.purge_reference(freed);
        self.fog_volumes.purge_reference(freed);
        self.cameras.purge_reference(freed);
        self.skies.purge_reference(freed);
        self.compositors.purge_reference(freed);
        self.environments.purge_reference(freed);
        self.canvas_textures.purge_reference(freed);
        self.global_uniforms.purge_reference(freed);
    }

    /// Local-space bounds of a drawable or volume resource.
    #[must_use]
    pub fn base_aabb(&self, rid: Rid, kind: RidKind) -> Option<Aabb> {
        Some(match kind {
            RidKind::Mesh => self.meshes.get(rid)?.aabb(),
            RidKind::MultiMesh => {
                let mm = self.multimeshes.get(rid)?;
                mm.compute_aabb(&self.meshes.aabb(mm.mesh))
            }
            RidKind::Particles => self.particles.get(rid)?.custom_aabb,
            RidKind::Light => self.lights.get(rid)?.aabb(),
            RidKind::ReflectionProbe => self.reflection_probes.get(rid)?.aabb(),
            RidKind::Decal => self.decals.get(rid)?.aabb(),
            RidKind::VoxelGi => self.voxel_gis.get(rid)?.aabb(),
            RidKind::Lightmap => self.lightmaps.get(rid)?.bounds,
            RidKind::ParticlesCollision => self.particles_collisions.get(rid)?.aabb(),
            RidKind::FogVolume => self.fog_volumes.get(rid)?.aabb(),
            RidKind::VisibilityNotifier => self.visibility_notifiers.get(rid)?.aabb,
            RidKind::Occluder => self.occluders.get(rid)?.aabb,
            _ => return None,
        })
    }

    /// Change version of a resource, used by instances to detect when their
    /// cached bounds are stale.
    #[must_use]
    pub fn version(&self, rid: Rid, kind: RidKind) -> u64 {
        let v = match kind {
            RidKind::Mesh => self.meshes.get(rid).map(|m| m.changes.version()),
            RidKind::MultiMesh => self.multimeshes.get(rid).map(|m| {
                m.changes.version().wrapping_add(self.meshes.get(m.mesh).map_or(0, |x| x.changes.version()))
            }),
            RidKind::Particles => self.particles.get(rid).map(|p| p.changes.version()),
            RidKind::Light => self.lights.get(rid).map(|l| l.changes.version()),
            RidKind::ReflectionProbe => self.reflection_probes.get(rid).map(|p| p.changes.version()),
            RidKind::Decal => self.decals.get(rid).map(|d| d.changes.version()),
            RidKind::VoxelGi => self.voxel_gis.get(rid).map(|g| g.changes.version()),
            RidKind::Lightmap => self.lightmaps.get(rid).map(|l| l.changes.version()),
            RidKind::ParticlesCollision => self.particles_collisions.get(rid).map(|c| c.changes.version()),
            RidKind::FogVolume => self.fog_volumes.get(rid).map(|f| f.changes.version()),
            RidKind::VisibilityNotifier => self.visibility_notifiers.get(rid).map(|n| n.changes.version()),
            RidKind::Occluder => self.occluders.get(rid).map(|o| o.changes.version()),
            _ => None,
        };
        v.unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_core::RidAllocator;

    #[test]
    fn freeing_a_mesh_detaches_multimesh() {
        let alloc = RidAllocator::new();
        let mut res = ResourceStores::new();
        let mesh = alloc.alloc(RidKind::Mesh);
        let mm = alloc.alloc(RidKind::MultiMesh);
        res.meshes.initialize(mesh);
        res.multimeshes.initialize(mm);
        res.multimeshes.set_mesh(mm, mesh).unwrap();

        assert!(res.free(mesh, RidKind::Mesh));
        res.purge_reference(mesh);
        assert_eq!(res.multimeshes.get(mm).unwrap().mesh, Rid::INVALID);
        assert!(!res.free(mesh, RidKind::Mesh));
    }

    #[test]
    fn scene_kinds_are_not_resources() {
        let alloc = RidAllocator::new();
        let mut res = ResourceStores::new();
        let s = alloc.alloc(RidKind::Scenario);
        assert!(!res.free(s, RidKind::Scenario));
        assert_eq!(res.base_aabb(s, RidKind::Scenario), None);
    }
}
