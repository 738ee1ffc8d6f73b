//! Lights, probes, GI volumes, particles, fog volumes and visibility
//! notifiers: every 3D base that is not a mesh.

use glam::{Affine3A, Vec3, Vec4};
use log::error;
use vesper_core::{Aabb, Color, Rid, RidKind, ServerError};
use vesper_resources::fog::FogVolumeShape;
use vesper_resources::light::{
    LightBakeMode, LightDirectionalShadowMode, LightDirectionalSkyMode, LightOmniShadowMode,
};
use vesper_resources::particles::{
    EmitRequest, ParticlesCollisionHeightfieldResolution, ParticlesCollisionHeightfieldUpdate,
    ParticlesCollisionType, ParticlesDrawOrder, ParticlesEmitFlags, ParticlesMode, ParticlesTransformAlign,
};
use vesper_resources::probes::{
    DecalTexture, LightmapCapture, ReflectionProbeAmbientMode, ReflectionProbeUpdateMode, VoxelGiData,
};
use vesper_resources::{LightParam, LightType, NotifierCallback};

use super::RenderingServer;

impl RenderingServer {
    // ------------------------------------------------------------------
    // Lights
    // ------------------------------------------------------------------

    fn light_create(&self, ty: LightType) -> Rid {
        self.create(RidKind::Light, |s, rid| s.resources.lights.initialize(rid, ty))
    }

    pub fn directional_light_create(&self) -> Rid {
        self.light_create(LightType::Directional)
    }

    pub fn omni_light_create(&self) -> Rid {
        self.light_create(LightType::Omni)
    }

    pub fn spot_light_create(&self) -> Rid {
        self.light_create(LightType::Spot)
    }

    forward!(light_set_color => resources.lights::set_color(color: Color));
    forward!(light_set_param => resources.lights::set_param(param: LightParam, value: f32));
    forward!(light_set_shadow => resources.lights::set_shadow(enabled: bool));
    forward!(light_set_negative => resources.lights::set_negative(enable: bool));
    forward!(light_set_cull_mask => resources.lights::set_cull_mask(mask: u32));
    forward!(light_set_shadow_caster_mask => resources.lights::set_shadow_caster_mask(mask: u32));
    forward!(light_set_reverse_cull_face_mode => resources.lights::set_reverse_cull_face_mode(enabled: bool));
    forward!(light_set_bake_mode => resources.lights::set_bake_mode(mode: LightBakeMode));
    forward!(light_set_max_sdfgi_cascade => resources.lights::set_max_sdfgi_cascade(cascade: u32));
    forward!(light_omni_set_shadow_mode => resources.lights::omni_set_shadow_mode(mode: LightOmniShadowMode));
    forward!(light_directional_set_shadow_mode => resources.lights::directional_set_shadow_mode(mode: LightDirectionalShadowMode));
    forward!(light_directional_set_blend_splits => resources.lights::directional_set_blend_splits(enable: bool));
    forward!(light_directional_set_sky_mode => resources.lights::directional_set_sky_mode(mode: LightDirectionalSkyMode));

    forward! {
        /// Fades the light out between `begin` and `begin + length` from the
        /// camera; its shadow fades starting at `shadow`.
        light_set_distance_fade => resources.lights::set_distance_fade(enabled: bool, begin: f32, shadow: f32, length: f32)
    }

    /// Texture projected by omni and spot lights.
    pub fn light_set_projector(&self, light: Rid, texture: Rid) {
        if self.accepts("light_set_projector", texture, RidKind::Texture) {
            self.apply("light_set_projector", |s| s.resources.lights.set_projector(light, texture));
        }
    }

    #[must_use]
    pub fn light_get_param(&self, light: Rid, param: LightParam) -> f32 {
        self.with_state(|s| s.resources.lights.param(light, param))
    }

    /// Blur radius the shadow filter actually applies, after the quality
    /// multiplier for point-sized lights. Directional lights follow the
    /// directional quality, the others the positional one.
    #[must_use]
    pub fn light_get_effective_shadow_blur(&self, light: Rid) -> f32 {
        let config = &self.inner.config;
        self.with_state(|s| {
            s.resources.lights.get(light).map_or(0.0, |l| {
                let quality = match l.ty {
                    LightType::Directional => config.directional_shadow_quality(),
                    LightType::Omni | LightType::Spot => config.positional_shadow_quality(),
                };
                l.effective_shadow_blur(quality)
            })
        })
    }

    // ------------------------------------------------------------------
    // Reflection probes
    // ------------------------------------------------------------------

    pub fn reflection_probe_create(&self) -> Rid {
        self.create(RidKind::ReflectionProbe, |s, rid| s.resources.reflection_probes.initialize(rid))
    }

    forward!(reflection_probe_set_update_mode => resources.reflection_probes::set_update_mode(mode: ReflectionProbeUpdateMode));
    forward!(reflection_probe_set_intensity => resources.reflection_probes::set_intensity(intensity: f32));
    forward!(reflection_probe_set_blend_distance => resources.reflection_probes::set_blend_distance(distance: f32));
    forward!(reflection_probe_set_ambient_mode => resources.reflection_probes::set_ambient_mode(mode: ReflectionProbeAmbientMode));
    forward!(reflection_probe_set_ambient_color => resources.reflection_probes::set_ambient_color(color: Color));
    forward!(reflection_probe_set_ambient_energy => resources.reflection_probes::set_ambient_energy(energy: f32));
    forward!(reflection_probe_set_max_distance => resources.reflection_probes::set_max_distance(distance: f32));
    forward!(reflection_probe_set_size => resources.reflection_probes::set_size(size: Vec3));
    forward!(reflection_probe_set_origin_offset => resources.reflection_probes::set_origin_offset(offset: Vec3));
    forward!(reflection_probe_set_as_interior => resources.reflection_probes::set_as_interior(enable: bool));
    forward!(reflection_probe_set_enable_box_projection => resources.reflection_probes::set_enable_box_projection(enable: bool));
    forward!(reflection_probe_set_enable_shadows => resources.reflection_probes::set_enable_shadows(enable: bool));
    forward!(reflection_probe_set_cull_mask => resources.reflection_probes::set_cull_mask(mask: u32));
    forward!(reflection_probe_set_reflection_mask => resources.reflection_probes::set_reflection_mask(mask: u32));
    forward!(reflection_probe_set_mesh_lod_threshold => resources.reflection_probes::set_mesh_lod_threshold(pixels: f32));

    forward! {
        /// Cubemap face size, rounded up to a power of two of at least 32.
        reflection_probe_set_resolution => resources.reflection_probes::set_resolution(resolution: u32)
    }

    // ------------------------------------------------------------------
    // Decals
    // ------------------------------------------------------------------

    pub fn decal_create(&self) -> Rid {
        self.create(RidKind::Decal, |s, rid| s.resources.decals.initialize(rid))
    }

    forward!(decal_set_size => resources.decals::set_size(size: Vec3));
    forward!(decal_set_emission_energy => resources.decals::set_emission_energy(energy: f32));
    forward!(decal_set_albedo_mix => resources.decals::set_albedo_mix(mix: f32));
    forward!(decal_set_modulate => resources.decals::set_modulate(color: Color));
    forward!(decal_set_cull_mask => resources.decals::set_cull_mask(mask: u32));
    forward!(decal_set_distance_fade => resources.decals::set_distance_fade(enabled: bool, begin: f32, length: f32));
    forward!(decal_set_normal_fade => resources.decals::set_normal_fade(fade: f32));

    pub fn decal_set_fade(&self, decal: Rid, above: f32, below: f32) {
        self.apply("decal_set_fade", |s| {
            s.resources.decals.set_upper_fade(decal, above)?;
            s.resources.decals.set_lower_fade(decal, below)
        });
    }

    pub fn decal_set_texture(&self, decal: Rid, slot: DecalTexture, texture: Rid) {
        if self.accepts("decal_set_texture", texture, RidKind::Texture) {
            self.apply("decal_set_texture", |s| s.resources.decals.set_texture(decal, slot, texture));
        }
    }

    // ------------------------------------------------------------------
    // Voxel GI
    // ------------------------------------------------------------------

    pub fn voxel_gi_create(&self) -> Rid {
        self.create(RidKind::VoxelGi, |s, rid| s.resources.voxel_gis.initialize(rid))
    }

    /// Uploads baked octree data. The cell buffer must hold eight bytes per
    /// cell counted in `level_counts`.
    pub fn voxel_gi_allocate_data(&self, voxel_gi: Rid, data: VoxelGiData) {
        self.apply("voxel_gi_allocate_data", |s| s.resources.voxel_gis.allocate_data(voxel_gi, data));
    }

    #[must_use]
    pub fn voxel_gi_get_bounds(&self, voxel_gi: Rid) -> Aabb {
        self.with_state(|s| {
            s.resources
                .voxel_gis
                .get(voxel_gi)
                .and_then(|v| v.data.as_ref())
                .map_or(Aabb::ZERO, |d| d.bounds)
        })
    }

    #[must_use]
    pub fn voxel_gi_get_level_counts(&self, voxel_gi: Rid) -> Vec<i32> {
        self.with_state(|s| {
            s.resources
                .voxel_gis
                .get(voxel_gi)
                .and_then(|v| v.data.as_ref())
                .map(|d| d.level_counts.clone())
                .unwrap_or_default()
        })
    }

    forward!(voxel_gi_set_dynamic_range => resources.voxel_gis::set_dynamic_range(range: f32));
    forward!(voxel_gi_set_propagation => resources.voxel_gis::set_propagation(propagation: f32));
    forward!(voxel_gi_set_energy => resources.voxel_gis::set_energy(energy: f32));
    forward!(voxel_gi_set_baked_exposure_normalization => resources.voxel_gis::set_baked_exposure_normalization(exposure: f32));
    forward!(voxel_gi_set_bias => resources.voxel_gis::set_bias(bias: f32));
    forward!(voxel_gi_set_normal_bias => resources.voxel_gis::set_normal_bias(bias: f32));
    forward!(voxel_gi_set_interior => resources.voxel_gis::set_interior(enable: bool));
    forward!(voxel_gi_set_use_two_bounces => resources.voxel_gis::set_use_two_bounces(enable: bool));

    // ------------------------------------------------------------------
    // Lightmaps
    // ------------------------------------------------------------------

    pub fn lightmap_create(&self) -> Rid {
        self.create(RidKind::Lightmap, |s, rid| s.resources.lightmaps.initialize(rid))
    }

    pub fn lightmap_set_textures(&self, lightmap: Rid, textures: Rid, uses_sh: bool) {
        if self.accepts("lightmap_set_textures", textures, RidKind::Texture) {
            self.apply("lightmap_set_textures", |s| {
                s.resources.lightmaps.set_textures(lightmap, textures, uses_sh)
            });
        }
    }

    pub fn lightmap_set_shadowmask_textures(&self, lightmap: Rid, shadowmask: Rid) {
        if self.accepts("lightmap_set_shadowmask_textures", shadowmask, RidKind::Texture) {
            self.apply("lightmap_set_shadowmask_textures", |s| {
                s.resources.lightmaps.set_shadowmask_textures(lightmap, shadowmask)
            });
        }
    }

    forward!(lightmap_set_probe_bounds => resources.lightmaps::set_bounds(bounds: Aabb));
    forward!(lightmap_set_probe_interior => resources.lightmaps::set_interior(interior: bool));
    forward!(lightmap_set_baked_exposure_normalization => resources.lightmaps::set_baked_exposure_normalization(exposure: f32));

    /// Probe points, SH coefficients (nine per point) and the tetrahedral
    /// mesh used to interpolate them.
    pub fn lightmap_set_probe_capture_data(&self, lightmap: Rid, capture: LightmapCapture) {
        self.apply("lightmap_set_probe_capture_data", |s| {
            s.resources.lightmaps.set_probe_capture_data(lightmap, capture)
        });
    }

    #[must_use]
    pub fn lightmap_get_probe_capture_points(&self, lightmap: Rid) -> Vec<Vec3> {
        self.with_state(|s| s.resources.lightmaps.capture(lightmap).map(|c| c.points.clone()).unwrap_or_default())
    }

    #[must_use]
    pub fn lightmap_get_probe_capture_sh(&self, lightmap: Rid) -> Vec<Color> {
        self.with_state(|s| s.resources.lightmaps.capture(lightmap).map(|c| c.point_sh.clone()).unwrap_or_default())
    }

    #[must_use]
    pub fn lightmap_get_probe_capture_tetrahedra(&self, lightmap: Rid) -> Vec<i32> {
        self.with_state(|s| {
            s.resources
                .lightmaps
                .capture(lightmap)
                .map(|c| c.tetrahedra.clone())
                .unwrap_or_default()
        })
    }

    #[must_use]
    pub fn lightmap_get_probe_capture_bsp_tree(&self, lightmap: Rid) -> Vec<i32> {
        self.with_state(|s| s.resources.lightmaps.capture(lightmap).map(|c| c.bsp_tree.clone()).unwrap_or_default())
    }

    // ------------------------------------------------------------------
    // Particles
    // ------------------------------------------------------------------

    pub fn particles_create(&self) -> Rid {
        self.create(RidKind::Particles, |s, rid| s.resources.particles.initialize(rid))
    }

    forward!(particles_set_mode => resources.particles::set_mode(mode: ParticlesMode));
    forward!(particles_set_emitting => resources.particles::set_emitting(emitting: bool));
    forward!(particles_set_amount_ratio => resources.particles::set_amount_ratio(ratio: f32));
    forward!(particles_set_lifetime => resources.particles::set_lifetime(lifetime: f32));
    forward!(particles_set_one_shot => resources.particles::set_one_shot(one_shot: bool));
    forward!(particles_set_pre_process_time => resources.particles::set_pre_process_time(time: f32));
    forward!(particles_set_explosiveness_ratio => resources.particles::set_explosiveness(ratio: f32));
    forward!(particles_set_randomness_ratio => resources.particles::set_randomness(ratio: f32));
    forward!(particles_set_custom_aabb => resources.particles::set_custom_aabb(aabb: Aabb));
    forward!(particles_set_speed_scale => resources.particles::set_speed_scale(scale: f32));
    forward!(particles_set_use_local_coordinates => resources.particles::set_use_local_coordinates(enable: bool));
    forward!(particles_set_fixed_fps => resources.particles::set_fixed_fps(fps: u32));
    forward!(particles_set_interpolate => resources.particles::set_interpolate(enable: bool));
    forward!(particles_set_fractional_delta => resources.particles::set_fractional_delta(enable: bool));
    forward!(particles_set_collision_base_size => resources.particles::set_collision_base_size(size: f32));
    forward!(particles_set_draw_order => resources.particles::set_draw_order(order: ParticlesDrawOrder));
    forward!(particles_set_transform_align => resources.particles::set_transform_align(align: ParticlesTransformAlign));
    forward!(particles_set_trails => resources.particles::set_trails(enabled: bool, length: f32));
    forward!(particles_set_trail_bind_poses => resources.particles::set_trail_bind_poses(poses: Vec<Affine3A>));
    forward!(particles_set_emission_transform => resources.particles::set_emission_transform(transform: Affine3A));
    forward!(particles_set_emitter_velocity => resources.particles::set_emitter_velocity(velocity: Vec3));
    forward!(particles_set_interp_to_end => resources.particles::set_interp_to_end(factor: f32));
    forward!(particles_restart => resources.particles::restart());
    forward!(particles_request_process_time => resources.particles::request_process_time(time: f32));

    forward! {
        /// Reallocates the particle pool. Zero is allowed and leaves nothing
        /// to emit into.
        particles_set_amount => resources.particles::set_amount(amount: usize)
    }

    forward! {
        /// Number of draw passes, `1..=4`.
        particles_set_draw_passes => resources.particles::set_draw_passes(count: usize)
    }

    pub fn particles_set_draw_pass_mesh(&self, particles: Rid, pass: usize, mesh: Rid) {
        if self.accepts("particles_set_draw_pass_mesh", mesh, RidKind::Mesh) {
            self.apply("particles_set_draw_pass_mesh", |s| {
                s.resources.particles.set_draw_pass_mesh(particles, pass, mesh)
            });
        }
    }

    pub fn particles_set_process_material(&self, particles: Rid, material: Rid) {
        if self.accepts("particles_set_process_material", material, RidKind::Material) {
            self.apply("particles_set_process_material", |s| {
                s.resources.particles.set_process_material(particles, material)
            });
        }
    }

    pub fn particles_set_subemitter(&self, particles: Rid, subemitter: Rid) {
        if subemitter == particles {
            error!("particles_set_subemitter: {particles:?} cannot be its own subemitter");
            return;
        }
        if self.accepts("particles_set_subemitter", subemitter, RidKind::Particles) {
            self.apply("particles_set_subemitter", |s| s.resources.particles.set_subemitter(particles, subemitter));
        }
    }

    /// Spawns one particle on the next process step.
    pub fn particles_emit(
        &self,
        particles: Rid,
        transform: Affine3A,
        velocity: Vec3,
        color: Color,
        custom: Vec4,
        flags: ParticlesEmitFlags,
    ) {
        let request = EmitRequest {
            transform,
            velocity,
            color,
            custom,
            flags,
        };
        self.apply("particles_emit", |s| s.resources.particles.emit(particles, request));
    }

    /// True once a system stopped emitting and its last particle died.
    #[must_use]
    pub fn particles_is_inactive(&self, particles: Rid) -> bool {
        self.with_state(|s| s.resources.particles.is_inactive(particles))
    }

    /// Bounds of the live particles, simulated up to the last frame.
    #[must_use]
    pub fn particles_get_current_aabb(&self, particles: Rid) -> Aabb {
        self.scheduler.sync();
        self.with_state(|s| s.resources.particles.current_aabb(particles))
    }

    // ------------------------------------------------------------------
    // Particle collisions and attractors
    // ------------------------------------------------------------------

    pub fn particles_collision_create(&self) -> Rid {
        self.create(RidKind::ParticlesCollision, |s, rid| s.resources.particles_collisions.initialize(rid))
    }

    forward!(particles_collision_set_collision_type => resources.particles_collisions::set_collision_type(ty: ParticlesCollisionType));
    forward!(particles_collision_set_cull_mask => resources.particles_collisions::set_cull_mask(mask: u32));
    forward!(particles_collision_set_sphere_radius => resources.particles_collisions::set_sphere_radius(radius: f32));
    forward!(particles_collision_set_box_extents => resources.particles_collisions::set_box_extents(extents: Vec3));
    forward!(particles_collision_set_attractor_strength => resources.particles_collisions::set_attractor_strength(strength: f32));
    forward!(particles_collision_set_attractor_directionality => resources.particles_collisions::set_attractor_directionality(amount: f32));
    forward!(particles_collision_set_attractor_attenuation => resources.particles_collisions::set_attractor_attenuation(curve: f32));
    forward!(particles_collision_set_height_field_resolution => resources.particles_collisions::set_height_field_resolution(resolution: ParticlesCollisionHeightfieldResolution));
    forward!(particles_collision_set_height_field_mask => resources.particles_collisions::set_height_field_mask(mask: u32));
    forward!(particles_collision_set_height_field_update => resources.particles_collisions::set_height_field_update(update: ParticlesCollisionHeightfieldUpdate));

    pub fn particles_collision_set_field_texture(&self, collision: Rid, texture: Rid) {
        if self.accepts("particles_collision_set_field_texture", texture, RidKind::Texture) {
            self.apply("particles_collision_set_field_texture", |s| {
                s.resources.particles_collisions.set_field_texture(collision, texture)
            });
        }
    }

    /// Heightfield colliders re-render on demand; the others ignore this.
    pub fn particles_collision_height_field_update(&self, collision: Rid) {
        self.apply("particles_collision_height_field_update", |s| {
            let c = s
                .resources
                .particles_collisions
                .get_mut(collision)
                .ok_or(ServerError::InvalidRid(collision))?;
            if c.is_heightfield() {
                c.changes.changed();
            }
            Ok(())
        });
    }

    // ------------------------------------------------------------------
    // Fog volumes
    // ------------------------------------------------------------------

    pub fn fog_volume_create(&self) -> Rid {
        self.create(RidKind::FogVolume, |s, rid| s.resources.fog_volumes.initialize(rid))
    }

    forward!(fog_volume_set_shape => resources.fog_volumes::set_shape(shape: FogVolumeShape));
    forward!(fog_volume_set_size => resources.fog_volumes::set_size(size: Vec3));

    pub fn fog_volume_set_material(&self, fog_volume: Rid, material: Rid) {
        if self.accepts("fog_volume_set_material", material, RidKind::Material) {
            self.apply("fog_volume_set_material", |s| s.resources.fog_volumes.set_material(fog_volume, material));
        }
    }

    // ------------------------------------------------------------------
    // Visibility notifiers
    // ------------------------------------------------------------------

    pub fn visibility_notifier_create(&self) -> Rid {
        self.create(RidKind::VisibilityNotifier, |s, rid| s.resources.visibility_notifiers.initialize(rid))
    }

    forward!(visibility_notifier_set_aabb => resources.visibility_notifiers::set_aabb(aabb: Aabb));

    /// Callbacks fired, with the server unlocked, when an instance of this
    /// notifier enters or leaves every camera's view.
    pub fn visibility_notifier_set_callbacks(
        &self,
        notifier: Rid,
        on_enter: Option<NotifierCallback>,
        on_exit: Option<NotifierCallback>,
    ) {
        self.apply("visibility_notifier_set_callbacks", |s| {
            s.resources.visibility_notifiers.set_callbacks(notifier, on_enter, on_exit)
        });
    }
}
