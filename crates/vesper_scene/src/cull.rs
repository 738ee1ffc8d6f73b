//! Culling queries over scenarios.
//!
//! Gameplay queries (`cull_aabb`, `cull_ray`, `cull_convex`) report the
//! object ids attached to matching instances. Camera culling produces the
//! per-frame [`CullResult`] the renderer consumes.

use glam::{Mat4, Vec3};
use log::trace;
use rustc_hash::FxHashSet;
use vesper_core::math::{Aabb, Frustum, Plane};
use vesper_core::quality::OcclusionCullingBuildQuality;
use vesper_core::Rid;
use vesper_resources::ResourceStores;

use crate::instance::{GeometryFlags, Instance, InstanceType, ShadowCastingSetting};
use crate::occlusion::OcclusionBuffer;
use crate::scene3d::Scene3D;

/// Camera-side inputs of a cull pass.
#[derive(Debug, Clone, Copy)]
pub struct CullParams {
    pub view_proj: Mat4,
    pub eye: Vec3,
    pub forward: Vec3,
    pub cull_mask: u32,
    pub use_occlusion: bool,
    pub occlusion_quality: OcclusionCullingBuildQuality,
    pub occlusion_rays_per_thread: u32,
}

impl CullParams {
    #[must_use]
    pub fn new(view_proj: Mat4, eye: Vec3, forward: Vec3) -> Self {
        Self {
            view_proj,
            eye,
            forward,
            cull_mask: u32::MAX,
            use_occlusion: false,
            occlusion_quality: OcclusionCullingBuildQuality::Medium,
            occlusion_rays_per_thread: 512,
        }
    }

    #[must_use]
    pub fn frustum(&self) -> Frustum {
        Frustum::from_matrix(self.view_proj)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisibleInstance {
    pub instance: Rid,
    pub base: Rid,
    pub base_type: InstanceType,
    /// Distance from the eye to the sort origin, including the sorting offset.
    pub depth: f32,
    /// Instance transparency combined with visibility-range fading.
    pub transparency: f32,
    pub casts_shadows: bool,
    pub shadows_only: bool,
}

#[derive(Debug, Default, Clone)]
pub struct CullResult {
    /// Mesh, multimesh and particle instances, front to back.
    pub geometry: Vec<VisibleInstance>,
    pub lights: Vec<Rid>,
    pub reflection_probes: Vec<Rid>,
    pub decals: Vec<Rid>,
    pub voxel_gis: Vec<Rid>,
    pub fog_volumes: Vec<Rid>,
    pub lightmaps: Vec<Rid>,
    pub notifiers: Vec<Rid>,
    pub occluded: usize,
    pub range_culled: usize,
}

impl CullResult {
    /// Number of rendered primitives contributed by geometry.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.geometry.iter().filter(|g| !g.shadows_only).count()
    }
}

fn object_ids(scene: &Scene3D, rids: &[Rid]) -> Vec<u64> {
    let mut ids: Vec<u64> = rids
        .iter()
        .filter_map(|r| scene.instances.get(*r))
        .map(|i| i.object_id)
        .filter(|id| *id != 0)
        .collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

impl Scene3D {
    /// Object ids of instances whose bounds intersect `aabb`.
    pub fn cull_aabb(&mut self, resources: &ResourceStores, scenario: Rid, aabb: &Aabb) -> Vec<u64> {
        self.flush(resources);
        let Some(sc) = self.scenarios.get(scenario) else {
            return Vec::new();
        };
        let mut hits = Vec::new();
        sc.index.query_aabb(aabb, &mut hits);
        object_ids(self, &hits)
    }

    /// Object ids of instances whose bounds intersect the segment.
    pub fn cull_ray(&mut self, resources: &ResourceStores, scenario: Rid, from: Vec3, to: Vec3) -> Vec<u64> {
        self.flush(resources);
        let Some(sc) = self.scenarios.get(scenario) else {
            return Vec::new();
        };
        let mut hits = Vec::new();
        sc.index.query_segment(from, to, &mut hits);
        object_ids(self, &hits)
    }

    /// Object ids of instances whose bounds intersect the convex volume
    /// bounded by `planes` (normals pointing out).
    pub fn cull_convex(&mut self, resources: &ResourceStores, scenario: Rid, planes: &[Plane]) -> Vec<u64> {
        self.flush(resources);
        let Some(sc) = self.scenarios.get(scenario) else {
            return Vec::new();
        };
        if planes.is_empty() {
            return Vec::new();
        }
        let mut hits = Vec::new();
        sc.index.query_convex(planes, &mut hits);
        object_ids(self, &hits)
    }

    /// Visible set for a camera.
    pub fn cull_camera(&mut self, resources: &ResourceStores, scenario: Rid, params: &CullParams) -> CullResult {
        self.flush(resources);
        let mut result = CullResult::default();
        let Some(sc) = self.scenarios.get(scenario) else {
            return result;
        };

        let frustum = params.frustum();
        let mut candidates = Vec::new();
        sc.index.query_convex(frustum.planes(), &mut candidates);
        // Culling-exempt instances are considered regardless of bounds.
        let mut seen: FxHashSet<Rid> = candidates.iter().copied().collect();
        for rid in &sc.instances {
            if self.instances.get(*rid).is_some_and(|i| i.ignore_culling) && seen.insert(*rid) {
                candidates.push(*rid);
            }
        }
        candidates.sort_unstable();

        let occlusion = if params.use_occlusion && !sc.occluders.is_empty() {
            let mut occluders: Vec<Rid> = sc.occluders.iter().copied().collect();
            occluders.sort_unstable();
            let mut triangles = Vec::new();
            for rid in occluders {
                let Some(inst) = self.instances.get(rid) else { continue };
                if !inst.visible {
                    continue;
                }
                if let Some(occ) = resources.occluders.get(inst.base) {
                    triangles.extend(occ.triangles().map(|t| t.map(|v| inst.transform.transform_point3(v))));
                }
            }
            let mut buffer = OcclusionBuffer::new(params.occlusion_quality);
            buffer.rasterize(
                params.view_proj,
                params.eye,
                params.forward,
                &triangles,
                params.occlusion_rays_per_thread,
            );
            Some(buffer)
        } else {
            None
        };

        for rid in candidates {
            let Some(inst) = self.instances.get(rid) else { continue };
            if !inst.visible || inst.layer_mask & params.cull_mask == 0 {
                continue;
            }
            let Some(range_transparency) = self.range_transparency(inst, params.eye) else {
                result.range_culled += 1;
                continue;
            };
            if inst.is_geometry()
                && !inst.ignore_culling
                && !inst.flags.contains(GeometryFlags::IGNORE_OCCLUSION_CULLING)
                && occlusion.as_ref().is_some_and(|o| o.is_occluded(&inst.world_aabb))
            {
                result.occluded += 1;
                continue;
            }
            match inst.base_type {
                InstanceType::Mesh | InstanceType::Multimesh | InstanceType::Particles => {
                    let depth = (inst.sort_origin() - params.eye).dot(params.forward) + inst.sorting_offset;
                    let transparency = 1.0 - (1.0 - inst.transparency) * (1.0 - range_transparency);
                    result.geometry.push(VisibleInstance {
                        instance: rid,
                        base: inst.base,
                        base_type: inst.base_type,
                        depth,
                        transparency,
                        casts_shadows: inst.cast_shadows != ShadowCastingSetting::Off,
                        shadows_only: inst.cast_shadows == ShadowCastingSetting::ShadowsOnly,
                    });
                }
                InstanceType::Light => result.lights.push(rid),
                InstanceType::ReflectionProbe => result.reflection_probes.push(rid),
                InstanceType::Decal => result.decals.push(rid),
                InstanceType::VoxelGi => result.voxel_gis.push(rid),
                InstanceType::FogVolume => result.fog_volumes.push(rid),
                InstanceType::Lightmap => result.lightmaps.push(rid),
                InstanceType::VisibilityNotifier => result.notifiers.push(rid),
                InstanceType::None | InstanceType::Occluder | InstanceType::ParticlesCollision => {}
            }
        }
        result.geometry.sort_by(|a, b| a.depth.total_cmp(&b.depth).then(a.instance.cmp(&b.instance)));
        trace!(
            "cull {scenario:?}: {} geometry, {} lights, {} occluded",
            result.geometry.len(),
            result.lights.len(),
            result.occluded
        );
        result
    }

    /// Transparency from visibility ranges (own and parent's), or `None`
    /// when the instance is out of range.
    fn range_transparency(&self, inst: &Instance, eye: Vec3) -> Option<f32> {
        let distance = inst.world_aabb.center().distance(eye);
        let own = inst.visibility_range.self_transparency(distance)?;
        let Some(parent) = self.instances.get(inst.visibility_parent) else {
            return Some(own);
        };
        let parent_distance = parent.world_aabb.center().distance(eye);
        let dependency = match parent.visibility_range.self_transparency(parent_distance) {
            // Parent hidden: its dependencies take over.
            None => 0.0,
            Some(_) => {
                let fade = parent.visibility_range.dependency_transparency(parent_distance);
                if fade >= 1.0 || !parent.visibility_range.is_active() {
                    return None;
                }
                fade
            }
        };
        Some(1.0 - (1.0 - own) * (1.0 - dependency))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_core::{RidAllocator, RidKind};

    struct Fixture {
        alloc: RidAllocator,
        resources: ResourceStores,
        scene: Scene3D,
        scenario: Rid,
    }

    fn fixture() -> Fixture {
        let alloc = RidAllocator::new();
        let mut scene = Scene3D::new();
        let scenario = alloc.alloc(RidKind::Scenario);
        scene.scenarios.initialize(scenario);
        Fixture {
            alloc,
            resources: ResourceStores::new(),
            scene,
            scenario,
        }
    }

    impl Fixture {
        fn boxed(&mut self, center: Vec3, id: u64) -> Rid {
            let rid = self.alloc.alloc(RidKind::Instance);
            self.scene.instances.initialize(rid);
            self.scene.instance_set_scenario(rid, self.scenario).unwrap();
            self.scene
                .instances
                .set_custom_aabb(rid, Aabb::from_center_extents(center, Vec3::ONE))
                .unwrap();
            self.scene.instances.attach_object_instance_id(rid, id).unwrap();
            rid
        }

        fn mesh_box(&mut self, center: Vec3) -> Rid {
            let rid = self.boxed(center, 0);
            let mesh = self.alloc.alloc(RidKind::Mesh);
            self.resources.meshes.initialize(mesh);
            self.scene.instance_set_base(rid, mesh, Some(RidKind::Mesh)).unwrap();
            rid
        }
    }

    #[test]
    fn aabb_query_reports_object_ids() {
        let mut f = fixture();
        f.boxed(Vec3::ZERO, 101);
        f.boxed(Vec3::new(10.0, 0.0, 0.0), 102);
        f.boxed(Vec3::new(100.0, 0.0, 0.0), 103);
        let query = Aabb::new(Vec3::splat(-2.0), Vec3::splat(2.0));
        assert_eq!(f.scene.cull_aabb(&f.resources, f.scenario, &query), vec![101]);
    }

    #[test]
    fn ray_and_convex_queries() {
        let mut f = fixture();
        f.boxed(Vec3::ZERO, 1);
        f.boxed(Vec3::new(10.0, 0.0, 0.0), 2);
        f.boxed(Vec3::new(0.0, 10.0, 0.0), 3);
        let hits = f.scene.cull_ray(&f.resources, f.scenario, Vec3::new(-5.0, 0.0, 0.0), Vec3::new(20.0, 0.0, 0.0));
        assert_eq!(hits, vec![1, 2]);

        // Half-space x <= 5.
        let planes = [Plane::new(Vec3::X, 5.0)];
        assert_eq!(f.scene.cull_convex(&f.resources, f.scenario, &planes), vec![1, 3]);
    }

    #[test]
    fn instances_without_object_id_are_not_reported() {
        let mut f = fixture();
        f.boxed(Vec3::ZERO, 0);
        let query = Aabb::new(Vec3::splat(-2.0), Vec3::splat(2.0));
        assert!(f.scene.cull_aabb(&f.resources, f.scenario, &query).is_empty());
    }

    #[test]
    fn moving_an_instance_updates_queries() {
        let mut f = fixture();
        let rid = f.boxed(Vec3::ZERO, 7);
        let query = Aabb::new(Vec3::splat(-2.0), Vec3::splat(2.0));
        assert_eq!(f.scene.cull_aabb(&f.resources, f.scenario, &query), vec![7]);
        f.scene
            .instances
            .set_transform(rid, glam::Affine3A::from_translation(Vec3::new(50.0, 0.0, 0.0)))
            .unwrap();
        assert!(f.scene.cull_aabb(&f.resources, f.scenario, &query).is_empty());
    }

    #[test]
    fn camera_cull_respects_layers_and_frustum() {
        let mut f = fixture();
        let front = f.mesh_box(Vec3::new(0.0, 0.0, -10.0));
        let behind = f.mesh_box(Vec3::new(0.0, 0.0, 10.0));
        let hidden_layer = f.mesh_box(Vec3::new(0.0, 0.0, -20.0));
        f.scene.instances.set_layer_mask(hidden_layer, 2).unwrap();

        let proj = vesper_core::math::perspective(70.0, 1.0, 0.1, 100.0);
        let view = Mat4::look_to_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
        let mut params = CullParams::new(proj * view, Vec3::ZERO, Vec3::NEG_Z);
        params.cull_mask = 1;
        let result = f.scene.cull_camera(&f.resources, f.scenario, &params);
        let visible: Vec<Rid> = result.geometry.iter().map(|g| g.instance).collect();
        assert_eq!(visible, vec![front]);
        assert!(!visible.contains(&behind));
    }

    #[test]
    fn culling_exempt_instances_are_reported_once() {
        let mut f = fixture();
        let inside = f.mesh_box(Vec3::new(0.0, 0.0, -10.0));
        let behind = f.mesh_box(Vec3::new(0.0, 0.0, 10.0));
        f.scene.instances.set_ignore_culling(inside, true).unwrap();
        f.scene.instances.set_ignore_culling(behind, true).unwrap();

        let proj = vesper_core::math::perspective(70.0, 1.0, 0.1, 100.0);
        let view = Mat4::look_to_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
        let params = CullParams::new(proj * view, Vec3::ZERO, Vec3::NEG_Z);
        let result = f.scene.cull_camera(&f.resources, f.scenario, &params);
        let mut visible: Vec<Rid> = result.geometry.iter().map(|g| g.instance).collect();
        visible.sort_unstable();
        let mut expected = vec![inside, behind];
        expected.sort_unstable();
        assert_eq!(visible, expected);
    }

    #[test]
    fn occluders_hide_geometry_behind_them() {
        let mut f = fixture();
        let hidden = f.mesh_box(Vec3::new(0.0, 0.0, -30.0));
        let occ_inst = f.alloc.alloc(RidKind::Instance);
        f.scene.instances.initialize(occ_inst);
        f.scene.instance_set_scenario(occ_inst, f.scenario).unwrap();
        let occ = f.alloc.alloc(RidKind::Occluder);
        f.resources.occluders.initialize(occ);
        let h = 100.0;
        f.resources
            .occluders
            .set_mesh(
                occ,
                vec![
                    Vec3::new(-h, -h, -5.0),
                    Vec3::new(h, -h, -5.0),
                    Vec3::new(h, h, -5.0),
                    Vec3::new(-h, h, -5.0),
                ],
                vec![0, 1, 2, 0, 2, 3],
            )
            .unwrap();
        f.scene.instance_set_base(occ_inst, occ, Some(RidKind::Occluder)).unwrap();

        let proj = vesper_core::math::perspective(60.0, 1.0, 0.1, 100.0);
        let view = Mat4::look_to_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
        let mut params = CullParams::new(proj * view, Vec3::ZERO, Vec3::NEG_Z);
        params.occlusion_quality = OcclusionCullingBuildQuality::Low;
        let open = f.scene.cull_camera(&f.resources, f.scenario, &params);
        assert_eq!(open.geometry.len(), 1);

        params.use_occlusion = true;
        let closed = f.scene.cull_camera(&f.resources, f.scenario, &params);
        assert!(closed.geometry.is_empty());
        assert_eq!(closed.occluded, 1);

        f.scene
            .instances
            .geometry_set_flag(hidden, crate::instance::InstanceFlags::IgnoreOcclusionCulling, true)
            .unwrap();
        let exempt = f.scene.cull_camera(&f.resources, f.scenario, &params);
        assert_eq!(exempt.geometry.len(), 1);
    }

    #[test]
    fn visibility_range_culls_far_instances() {
        let mut f = fixture();
        let rid = f.mesh_box(Vec3::new(0.0, 0.0, -50.0));
        f.scene
            .instances
            .geometry_set_visibility_range(rid, 0.0, 20.0, 0.0, 0.0, crate::VisibilityRangeFadeMode::Disabled)
            .unwrap();
        let proj = vesper_core::math::perspective(60.0, 1.0, 0.1, 100.0);
        let view = Mat4::look_to_rh(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y);
        let params = CullParams::new(proj * view, Vec3::ZERO, Vec3::NEG_Z);
        let result = f.scene.cull_camera(&f.resources, f.scenario, &params);
        assert!(result.geometry.is_empty());
        assert_eq!(result.range_culled, 1);
    }
}
