//! `scenario_*`, `instance_*` and the `instances_cull_*` queries.

use glam::{Affine3A, Vec3, Vec4};
use rustc_hash::FxHashSet;
use vesper_core::{fail_cond, Aabb, Plane, Rid, RidKind, StringName, Variant};
use vesper_resources::shader::{ShaderParameterInfo, UniformScope};
use vesper_resources::ResourceStores;
use vesper_scene::instance::Instance;
use vesper_scene::{InstanceFlags, InstanceType, ScenarioDebugMode, ShadowCastingSetting, VisibilityRangeFadeMode};

use super::RenderingServer;

/// Instance-scope uniforms declared by every material the instance draws
/// with, first declaration wins.
fn instance_uniforms(res: &ResourceStores, inst: &Instance) -> Vec<ShaderParameterInfo> {
    let mut materials = vec![inst.material_override];
    materials.extend(inst.surface_materials.iter().copied());
    if inst.base_type == InstanceType::Mesh {
        let count = res.meshes.surface_count(inst.base);
        materials.extend((0..count).map(|i| res.meshes.surface_material(inst.base, i)));
    }
    materials.push(inst.material_overlay);

    let mut seen = FxHashSet::default();
    let mut out = Vec::new();
    for material in materials {
        let mut next = material;
        // Walk the next-pass chain; cycles are refused on set so this ends.
        while let Some(mat) = res.materials.get(next) {
            if let Some(shader) = res.shaders.get(mat.shader) {
                for param in shader.params_in_scope(UniformScope::Instance) {
                    if seen.insert(param.name.clone()) {
                        out.push(param.clone());
                    }
                }
            }
            next = mat.next_pass;
        }
    }
    out
}

impl RenderingServer {
    // ------------------------------------------------------------------
    // Scenarios
    // ------------------------------------------------------------------

    pub fn scenario_create(&self) -> Rid {
        self.create(RidKind::Scenario, |s, rid| s.scene3d.scenarios.initialize(rid))
    }

    pub fn scenario_set_environment(&self, scenario: Rid, environment: Rid) {
        if self.accepts("scenario_set_environment", environment, RidKind::Environment) {
            self.apply("scenario_set_environment", |s| {
                s.scene3d.scenarios.set_environment(scenario, environment)
            });
        }
    }

    /// Used when neither the camera nor the scenario sets an environment.
    pub fn scenario_set_fallback_environment(&self, scenario: Rid, environment: Rid) {
        if self.accepts("scenario_set_fallback_environment", environment, RidKind::Environment) {
            self.apply("scenario_set_fallback_environment", |s| {
                s.scene3d.scenarios.set_fallback_environment(scenario, environment)
            });
        }
    }

    pub fn scenario_set_camera_attributes(&self, scenario: Rid, attributes: Rid) {
        if self.accepts("scenario_set_camera_attributes", attributes, RidKind::CameraAttributes) {
            self.apply("scenario_set_camera_attributes", |s| {
                s.scene3d.scenarios.set_camera_attributes(scenario, attributes)
            });
        }
    }

    pub fn scenario_set_compositor(&self, scenario: Rid, compositor: Rid) {
        if self.accepts("scenario_set_compositor", compositor, RidKind::Compositor) {
            self.apply("scenario_set_compositor", |s| s.scene3d.scenarios.set_compositor(scenario, compositor));
        }
    }

    forward!(scenario_set_debug => scene3d.scenarios::set_debug(mode: ScenarioDebugMode));

    // ------------------------------------------------------------------
    // Instances
    // ------------------------------------------------------------------

    pub fn instance_create(&self) -> Rid {
        self.create(RidKind::Instance, |s, rid| s.scene3d.instances.initialize(rid))
    }

    /// Creates an instance already bound to `base` and placed in `scenario`.
    pub fn instance_create2(&self, base: Rid, scenario: Rid) -> Rid {
        let instance = self.instance_create();
        self.instance_set_base(instance, base);
        self.instance_set_scenario(instance, scenario);
        instance
    }

    /// Binds a drawable resource. Non-drawable handles are refused; the
    /// invalid handle unbinds.
    pub fn instance_set_base(&self, instance: Rid, base: Rid) {
        let kind = self.inner.rids.kind_of(base);
        fail_cond!(
            base.is_valid() && kind.and_then(InstanceType::from_kind).is_none(),
            "instance_set_base: {base:?} is not a drawable resource"
        );
        self.apply("instance_set_base", |s| s.scene3d.instance_set_base(instance, base, kind));
    }

    pub fn instance_set_scenario(&self, instance: Rid, scenario: Rid) {
        self.apply("instance_set_scenario", |s| s.scene3d.instance_set_scenario(instance, scenario));
    }

    forward!(instance_set_layer_mask => scene3d.instances::set_layer_mask(mask: u32));
    forward!(instance_set_transform => scene3d.instances::set_transform(transform: Affine3A));
    forward!(instance_set_interpolated => scene3d.instances::set_interpolated(interpolated: bool));
    forward!(instance_attach_object_instance_id => scene3d.instances::attach_object_instance_id(id: u64));
    forward!(instance_set_blend_shape_weight => scene3d.instances::set_blend_shape_weight(shape: usize, weight: f32));
    forward!(instance_set_visible => scene3d.instances::set_visible(visible: bool));
    forward!(instance_set_custom_aabb => scene3d.instances::set_custom_aabb(aabb: Aabb));
    forward!(instance_set_extra_visibility_margin => scene3d.instances::set_extra_visibility_margin(margin: f32));
    forward!(instance_set_ignore_culling => scene3d.instances::set_ignore_culling(enabled: bool));
    forward!(instance_geometry_set_flag => scene3d.instances::geometry_set_flag(flag: InstanceFlags, enabled: bool));
    forward!(instance_geometry_set_cast_shadows_setting => scene3d.instances::geometry_set_cast_shadows_setting(setting: ShadowCastingSetting));
    forward!(instance_geometry_set_lod_bias => scene3d.instances::geometry_set_lod_bias(lod_bias: f32));

    forward! {
        /// Makes the current transform the previous one too, so the next
        /// interpolated frame does not blend from a stale pose.
        instance_reset_physics_interpolation => scene3d.instances::reset_physics_interpolation()
    }

    forward! {
        /// Sorting offset for transparent draw order, measured from the AABB
        /// center or from the origin.
        instance_set_pivot_data => scene3d.instances::set_pivot_data(sorting_offset: f32, use_aabb_center: bool)
    }

    forward! {
        /// Clamped to `0..=1`.
        instance_geometry_set_transparency => scene3d.instances::geometry_set_transparency(transparency: f32)
    }

    forward! {
        instance_geometry_set_visibility_range => scene3d.instances::geometry_set_visibility_range(
            min: f32,
            max: f32,
            min_margin: f32,
            max_margin: f32,
            fade_mode: VisibilityRangeFadeMode,
        )
    }

    pub fn instance_set_surface_override_material(&self, instance: Rid, surface: usize, material: Rid) {
        if self.accepts("instance_set_surface_override_material", material, RidKind::Material) {
            self.apply("instance_set_surface_override_material", |s| {
                s.scene3d.instances.set_surface_override_material(instance, surface, material)
            });
        }
    }

    pub fn instance_attach_skeleton(&self, instance: Rid, skeleton: Rid) {
        if self.accepts("instance_attach_skeleton", skeleton, RidKind::Skeleton) {
            self.apply("instance_attach_skeleton", |s| s.scene3d.instances.attach_skeleton(instance, skeleton));
        }
    }

    /// Culled together with `parent`: when the parent is hidden by its
    /// visibility range, so is this instance.
    pub fn instance_set_visibility_parent(&self, instance: Rid, parent: Rid) {
        if self.accepts("instance_set_visibility_parent", parent, RidKind::Instance) {
            self.apply("instance_set_visibility_parent", |s| {
                s.scene3d.instances.set_visibility_parent(instance, parent)
            });
        }
    }

    pub fn instance_geometry_set_material_override(&self, instance: Rid, material: Rid) {
        if self.accepts("instance_geometry_set_material_override", material, RidKind::Material) {
            self.apply("instance_geometry_set_material_override", |s| {
                s.scene3d.instances.geometry_set_material_override(instance, material)
            });
        }
    }

    pub fn instance_geometry_set_material_overlay(&self, instance: Rid, material: Rid) {
        if self.accepts("instance_geometry_set_material_overlay", material, RidKind::Material) {
            self.apply("instance_geometry_set_material_overlay", |s| {
                s.scene3d.instances.geometry_set_material_overlay(instance, material)
            });
        }
    }

    pub fn instance_geometry_set_lightmap(&self, instance: Rid, lightmap: Rid, uv_scale: Vec4, slice: u32) {
        if self.accepts("instance_geometry_set_lightmap", lightmap, RidKind::Lightmap) {
            self.apply("instance_geometry_set_lightmap", |s| {
                s.scene3d.instances.geometry_set_lightmap(instance, lightmap, uv_scale, slice)
            });
        }
    }

    /// Per-instance value of an `instance uniform`. `Variant::Nil` removes
    /// the override.
    pub fn instance_geometry_set_shader_parameter(&self, instance: Rid, name: &str, value: Variant) {
        self.apply("instance_geometry_set_shader_parameter", |s| {
            s.scene3d
                .instances
                .geometry_set_shader_parameter(instance, StringName::new(name), value)
        });
    }

    #[must_use]
    pub fn instance_geometry_get_shader_parameter(&self, instance: Rid, name: &str) -> Variant {
        self.with_state(|s| {
            s.scene3d
                .instances
                .geometry_get_shader_parameter(instance, StringName::new(name))
        })
    }

    /// Declared default of an instance uniform, `Nil` if no material of the
    /// instance declares it.
    #[must_use]
    pub fn instance_geometry_get_shader_parameter_default_value(&self, instance: Rid, name: &str) -> Variant {
        let name = StringName::new(name);
        self.with_state(|s| {
            s.scene3d
                .instances
                .get(instance)
                .and_then(|inst| {
                    instance_uniforms(&s.resources, inst)
                        .into_iter()
                        .find(|p| p.name == name)
                })
                .map_or(Variant::Nil, |p| p.default)
        })
    }

    /// Instance uniforms reachable through the instance's materials.
    #[must_use]
    pub fn instance_geometry_get_shader_parameter_list(&self, instance: Rid) -> Vec<ShaderParameterInfo> {
        self.with_state(|s| {
            s.scene3d
                .instances
                .get(instance)
                .map(|inst| instance_uniforms(&s.resources, inst))
                .unwrap_or_default()
        })
    }

    // ------------------------------------------------------------------
    // Spatial queries
    // ------------------------------------------------------------------

    /// Object ids of the instances in `scenario` whose world bounds overlap
    /// `aabb`. Instances without an object id are skipped.
    #[must_use]
    pub fn instances_cull_aabb(&self, aabb: Aabb, scenario: Rid) -> Vec<u64> {
        self.with_state(|s| s.scene3d.cull_aabb(&s.resources, scenario, &aabb))
    }

    /// Object ids of the instances whose bounds the segment `from..to` hits.
    #[must_use]
    pub fn instances_cull_ray(&self, from: Vec3, to: Vec3, scenario: Rid) -> Vec<u64> {
        self.with_state(|s| s.scene3d.cull_ray(&s.resources, scenario, from, to))
    }

    /// Object ids of the instances inside the convex volume bounded by
    /// `planes`, whose normals point outward.
    #[must_use]
    pub fn instances_cull_convex(&self, planes: &[Plane], scenario: Rid) -> Vec<u64> {
        self.with_state(|s| s.scene3d.cull_convex(&s.resources, scenario, planes))
    }
}
