//! `mesh_*`, `multimesh_*`, `skeleton_*` and `occluder_*`.

use glam::{Affine2, Affine3A, Vec3, Vec4};
use log::error;
use vesper_core::{Aabb, Color, Rid, RidKind, ServerError};
use vesper_resources::mesh::{arrays, format, BlendShapeMode, SurfaceBuffer};
use vesper_resources::{ArrayFormat, ArrayType, MultimeshTransformFormat, PrimitiveType, SurfaceArrays, SurfaceData};

use super::RenderingServer;

/// LOD entry accepted by the array helpers: edge length and index subset.
pub type LodIndices = (f32, Vec<u32>);

impl RenderingServer {
    // ------------------------------------------------------------------
    // Meshes
    // ------------------------------------------------------------------

    pub fn mesh_create(&self) -> Rid {
        self.create(RidKind::Mesh, |s, rid| s.resources.meshes.initialize(rid))
    }

    /// Creates a mesh holding `surfaces`. Returns `Rid::INVALID` if any
    /// surface is malformed.
    pub fn mesh_create_from_surfaces(&self, surfaces: Vec<SurfaceData>, blend_shape_count: u32) -> Rid {
        self.try_create("mesh_create_from_surfaces", RidKind::Mesh, |s, rid| {
            let meshes = &mut s.resources.meshes;
            meshes.initialize(rid);
            let added = meshes.set_blend_shape_count(rid, blend_shape_count).and_then(|()| {
                surfaces
                    .into_iter()
                    .try_for_each(|surface| meshes.add_surface(rid, surface))
            });
            if added.is_err() {
                meshes.free(rid);
            }
            added
        })
    }

    /// Packs vertex arrays into the stored surface layout.
    #[must_use]
    pub fn mesh_create_surface_data_from_arrays(
        &self,
        primitive: PrimitiveType,
        arrays: &SurfaceArrays,
        blend_shapes: &[SurfaceArrays],
        lods: &[LodIndices],
        compress_format: ArrayFormat,
    ) -> Option<SurfaceData> {
        arrays::create_surface_data(primitive, arrays, blend_shapes, lods, compress_format)
            .map_err(|err| error!("mesh_create_surface_data_from_arrays: {err}"))
            .ok()
    }

    pub fn mesh_add_surface(&self, mesh: Rid, surface: SurfaceData) {
        self.apply("mesh_add_surface", |s| s.resources.meshes.add_surface(mesh, surface));
    }

    pub fn mesh_add_surface_from_arrays(
        &self,
        mesh: Rid,
        primitive: PrimitiveType,
        arrays: &SurfaceArrays,
        blend_shapes: &[SurfaceArrays],
        lods: &[LodIndices],
        compress_format: ArrayFormat,
    ) {
        self.apply("mesh_add_surface_from_arrays", |s| {
            let surface = arrays::create_surface_data(primitive, arrays, blend_shapes, lods, compress_format)?;
            s.resources.meshes.add_surface(mesh, surface)
        });
    }

    forward!(mesh_set_blend_shape_count => resources.meshes::set_blend_shape_count(count: u32));

    #[must_use]
    pub fn mesh_get_blend_shape_count(&self, mesh: Rid) -> u32 {
        self.with_state(|s| s.resources.meshes.get(mesh).map_or(0, |m| m.blend_shape_count))
    }

    pub fn mesh_set_blend_shape_mode(&self, mesh: Rid, mode: BlendShapeMode) {
        self.apply("mesh_set_blend_shape_mode", |s| {
            let m = s.resources.meshes.get_mut(mesh).ok_or(ServerError::InvalidRid(mesh))?;
            m.blend_shape_mode = mode;
            m.changes.changed();
            Ok(())
        });
    }

    #[must_use]
    pub fn mesh_get_blend_shape_mode(&self, mesh: Rid) -> BlendShapeMode {
        self.with_state(|s| s.resources.meshes.get(mesh).map(|m| m.blend_shape_mode).unwrap_or_default())
    }

    fn update_region(&self, op: &str, mesh: Rid, surface: usize, buffer: SurfaceBuffer, offset: usize, data: &[u8]) {
        self.apply(op, |s| s.resources.meshes.update_region(mesh, surface, buffer, offset, data));
    }

    /// Writes `data` at byte `offset` of the position/normal buffer. Writes
    /// past the end fail without touching the surface.
    pub fn mesh_surface_update_vertex_region(&self, mesh: Rid, surface: usize, offset: usize, data: &[u8]) {
        self.update_region("mesh_surface_update_vertex_region", mesh, surface, SurfaceBuffer::Vertex, offset, data);
    }

    pub fn mesh_surface_update_attribute_region(&self, mesh: Rid, surface: usize, offset: usize, data: &[u8]) {
        self.update_region(
            "mesh_surface_update_attribute_region",
            mesh,
            surface,
            SurfaceBuffer::Attribute,
            offset,
            data,
        );
    }

    pub fn mesh_surface_update_skin_region(&self, mesh: Rid, surface: usize, offset: usize, data: &[u8]) {
        self.update_region("mesh_surface_update_skin_region", mesh, surface, SurfaceBuffer::Skin, offset, data);
    }

    pub fn mesh_surface_set_material(&self, mesh: Rid, surface: usize, material: Rid) {
        if !self.accepts("mesh_surface_set_material", material, RidKind::Material) {
            return;
        }
        self.apply("mesh_surface_set_material", |s| {
            s.resources.meshes.surface_set_material(mesh, surface, material)
        });
    }

    #[must_use]
    pub fn mesh_surface_get_material(&self, mesh: Rid, surface: usize) -> Rid {
        self.with_state(|s| s.resources.meshes.surface_material(mesh, surface))
    }

    #[must_use]
    pub fn mesh_get_surface(&self, mesh: Rid, surface: usize) -> Option<SurfaceData> {
        self.with_state(|s| s.resources.meshes.surface(mesh, surface).cloned())
    }

    /// Unpacked arrays of a surface; empty for unknown surfaces.
    #[must_use]
    pub fn mesh_surface_get_arrays(&self, mesh: Rid, surface: usize) -> SurfaceArrays {
        self.with_state(|s| {
            s.resources
                .meshes
                .surface(mesh, surface)
                .map(arrays::surface_to_arrays)
                .unwrap_or_default()
        })
    }

    #[must_use]
    pub fn mesh_surface_get_blend_shape_arrays(&self, mesh: Rid, surface: usize) -> Vec<SurfaceArrays> {
        self.with_state(|s| {
            s.resources
                .meshes
                .surface(mesh, surface)
                .map(arrays::blend_shape_arrays)
                .unwrap_or_default()
        })
    }

    #[must_use]
    pub fn mesh_get_surface_count(&self, mesh: Rid) -> usize {
        self.with_state(|s| s.resources.meshes.surface_count(mesh))
    }

    forward!(mesh_set_custom_aabb => resources.meshes::set_custom_aabb(aabb: Aabb));

    #[must_use]
    pub fn mesh_get_custom_aabb(&self, mesh: Rid) -> Aabb {
        self.with_state(|s| s.resources.meshes.get(mesh).and_then(|m| m.custom_aabb).unwrap_or(Aabb::ZERO))
    }

    #[must_use]
    pub fn mesh_get_aabb(&self, mesh: Rid) -> Aabb {
        self.with_state(|s| s.resources.meshes.aabb(mesh))
    }

    forward!(mesh_surface_remove => resources.meshes::surface_remove(surface: usize));
    forward!(mesh_clear => resources.meshes::clear());

    /// Lower-detail mesh drawn in place of `mesh` in shadow passes.
    pub fn mesh_set_shadow_mesh(&self, mesh: Rid, shadow: Rid) {
        if !self.accepts("mesh_set_shadow_mesh", shadow, RidKind::Mesh) {
            return;
        }
        self.apply("mesh_set_shadow_mesh", |s| s.resources.meshes.set_shadow_mesh(mesh, shadow));
    }

    pub fn mesh_set_path(&self, mesh: Rid, path: &str) {
        self.apply("mesh_set_path", |s| {
            let m = s.resources.meshes.get_mut(mesh).ok_or(ServerError::InvalidRid(mesh))?;
            m.path = path.to_owned();
            Ok(())
        });
    }

    #[must_use]
    pub fn mesh_get_path(&self, mesh: Rid) -> String {
        self.with_state(|s| s.resources.meshes.get(mesh).map(|m| m.path.clone()).unwrap_or_default())
    }

    // Stride helpers: pure functions of the format bits and vertex count.

    #[must_use]
    pub fn mesh_surface_get_format_vertex_stride(&self, format: ArrayFormat, vertex_count: u32) -> u32 {
        format::vertex_stride(format, vertex_count)
    }

    #[must_use]
    pub fn mesh_surface_get_format_normal_tangent_stride(&self, format: ArrayFormat, vertex_count: u32) -> u32 {
        format::normal_tangent_stride(format, vertex_count)
    }

    #[must_use]
    pub fn mesh_surface_get_format_attribute_stride(&self, format: ArrayFormat, vertex_count: u32) -> u32 {
        format::attribute_stride(format, vertex_count)
    }

    #[must_use]
    pub fn mesh_surface_get_format_skin_stride(&self, format: ArrayFormat, vertex_count: u32) -> u32 {
        format::skin_stride(format, vertex_count)
    }

    /// Byte offset of `array` inside its buffer.
    #[must_use]
    pub fn mesh_surface_get_format_offset(&self, format: ArrayFormat, vertex_count: u32, array: ArrayType) -> u32 {
        format::format_offset(format, vertex_count, array)
    }

    // ------------------------------------------------------------------
    // MultiMeshes
    // ------------------------------------------------------------------

    pub fn multimesh_create(&self) -> Rid {
        self.create(RidKind::MultiMesh, |s, rid| s.resources.multimeshes.initialize(rid))
    }

    /// Resizes the instance buffer to `instances` zero-filled rows. Counts
    /// too large for one buffer are refused.
    pub fn multimesh_allocate_data(
        &self,
        multimesh: Rid,
        instances: usize,
        transform_format: MultimeshTransformFormat,
        use_colors: bool,
        use_custom_data: bool,
    ) {
        self.apply("multimesh_allocate_data", |s| {
            s.resources
                .multimeshes
                .allocate_data(multimesh, instances, transform_format, use_colors, use_custom_data)
        });
    }

    #[must_use]
    pub fn multimesh_get_instance_count(&self, multimesh: Rid) -> usize {
        self.with_state(|s| s.resources.multimeshes.get(multimesh).map_or(0, |m| m.instances))
    }

    pub fn multimesh_set_mesh(&self, multimesh: Rid, mesh: Rid) {
        if !self.accepts("multimesh_set_mesh", mesh, RidKind::Mesh) {
            return;
        }
        self.apply("multimesh_set_mesh", |s| s.resources.multimeshes.set_mesh(multimesh, mesh));
    }

    #[must_use]
    pub fn multimesh_get_mesh(&self, multimesh: Rid) -> Rid {
        self.with_state(|s| s.resources.multimeshes.get(multimesh).map_or(Rid::INVALID, |m| m.mesh))
    }

    pub fn multimesh_instance_set_transform(&self, multimesh: Rid, index: usize, transform: Affine3A) {
        self.apply("multimesh_instance_set_transform", |s| {
            s.resources.multimeshes.instance_set_transform(multimesh, index, &transform)
        });
    }

    pub fn multimesh_instance_set_transform_2d(&self, multimesh: Rid, index: usize, transform: Affine2) {
        self.apply("multimesh_instance_set_transform_2d", |s| {
            s.resources.multimeshes.instance_set_transform_2d(multimesh, index, &transform)
        });
    }

    pub fn multimesh_instance_set_color(&self, multimesh: Rid, index: usize, color: Color) {
        self.apply("multimesh_instance_set_color", |s| {
            s.resources.multimeshes.instance_set_color(multimesh, index, color)
        });
    }

    pub fn multimesh_instance_set_custom_data(&self, multimesh: Rid, index: usize, data: Vec4) {
        self.apply("multimesh_instance_set_custom_data", |s| {
            s.resources.multimeshes.instance_set_custom_data(multimesh, index, data)
        });
    }

    #[must_use]
    pub fn multimesh_instance_get_transform(&self, multimesh: Rid, index: usize) -> Affine3A {
        self.with_state(|s| s.resources.multimeshes.instance_get_transform(multimesh, index))
    }

    #[must_use]
    pub fn multimesh_instance_get_transform_2d(&self, multimesh: Rid, index: usize) -> Affine2 {
        self.with_state(|s| s.resources.multimeshes.instance_get_transform_2d(multimesh, index))
    }

    #[must_use]
    pub fn multimesh_instance_get_color(&self, multimesh: Rid, index: usize) -> Color {
        self.with_state(|s| s.resources.multimeshes.instance_get_color(multimesh, index))
    }

    #[must_use]
    pub fn multimesh_instance_get_custom_data(&self, multimesh: Rid, index: usize) -> Vec4 {
        self.with_state(|s| s.resources.multimeshes.instance_get_custom_data(multimesh, index))
    }

    /// `-1` draws every allocated instance.
    pub fn multimesh_set_visible_instances(&self, multimesh: Rid, visible: i32) {
        self.apply("multimesh_set_visible_instances", |s| {
            s.resources.multimeshes.set_visible_instances(multimesh, visible)
        });
    }

    #[must_use]
    pub fn multimesh_get_visible_instances(&self, multimesh: Rid) -> i32 {
        self.with_state(|s| s.resources.multimeshes.get(multimesh).map_or(0, |m| m.visible_instances))
    }

    /// Replaces the whole instance buffer. Its length must be
    /// `instances × stride`.
    pub fn multimesh_set_buffer(&self, multimesh: Rid, buffer: &[f32]) {
        self.apply("multimesh_set_buffer", |s| s.resources.multimeshes.set_buffer(multimesh, buffer));
    }

    /// Copy of the instance buffer. Waits for queued frames first.
    #[must_use]
    pub fn multimesh_get_buffer(&self, multimesh: Rid) -> Vec<f32> {
        self.scheduler.sync();
        self.with_state(|s| s.resources.multimeshes.get_buffer(multimesh))
    }

    forward!(multimesh_set_custom_aabb => resources.multimeshes::set_custom_aabb(aabb: Aabb));

    #[must_use]
    pub fn multimesh_get_custom_aabb(&self, multimesh: Rid) -> Aabb {
        self.with_state(|s| {
            s.resources
                .multimeshes
                .get(multimesh)
                .and_then(|m| m.custom_aabb)
                .unwrap_or(Aabb::ZERO)
        })
    }

    /// Bounds of every drawn instance of the mesh, or the custom AABB.
    #[must_use]
    pub fn multimesh_get_aabb(&self, multimesh: Rid) -> Aabb {
        self.with_state(|s| {
            let res = &s.resources;
            res.multimeshes
                .get(multimesh)
                .map_or(Aabb::ZERO, |m| m.compute_aabb(&res.meshes.aabb(m.mesh)))
        })
    }

    // ------------------------------------------------------------------
    // Skeletons
    // ------------------------------------------------------------------

    pub fn skeleton_create(&self) -> Rid {
        self.create(RidKind::Skeleton, |s, rid| s.resources.skeletons.initialize(rid))
    }

    forward!(skeleton_allocate_data => resources.skeletons::allocate_data(bones: usize, is_2d: bool));

    #[must_use]
    pub fn skeleton_get_bone_count(&self, skeleton: Rid) -> usize {
        self.with_state(|s| s.resources.skeletons.bone_count(skeleton))
    }

    pub fn skeleton_bone_set_transform(&self, skeleton: Rid, bone: usize, transform: Affine3A) {
        self.apply("skeleton_bone_set_transform", |s| {
            s.resources.skeletons.bone_set_transform(skeleton, bone, &transform)
        });
    }

    #[must_use]
    pub fn skeleton_bone_get_transform(&self, skeleton: Rid, bone: usize) -> Affine3A {
        self.with_state(|s| s.resources.skeletons.bone_get_transform(skeleton, bone))
    }

    pub fn skeleton_bone_set_transform_2d(&self, skeleton: Rid, bone: usize, transform: Affine2) {
        self.apply("skeleton_bone_set_transform_2d", |s| {
            s.resources.skeletons.bone_set_transform_2d(skeleton, bone, &transform)
        });
    }

    #[must_use]
    pub fn skeleton_bone_get_transform_2d(&self, skeleton: Rid, bone: usize) -> Affine2 {
        self.with_state(|s| s.resources.skeletons.bone_get_transform_2d(skeleton, bone))
    }

    forward!(skeleton_set_base_transform_2d => resources.skeletons::set_base_transform_2d(base: Affine2));

    // ------------------------------------------------------------------
    // Occluders
    // ------------------------------------------------------------------

    pub fn occluder_create(&self) -> Rid {
        self.create(RidKind::Occluder, |s, rid| s.resources.occluders.initialize(rid))
    }

    /// Sets the occluder's triangle mesh; indices come in triples.
    pub fn occluder_set_mesh(&self, occluder: Rid, vertices: Vec<Vec3>, indices: Vec<u32>) {
        self.apply("occluder_set_mesh", |s| s.resources.occluders.set_mesh(occluder, vertices, indices));
    }
}
