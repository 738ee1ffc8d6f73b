//! Reflection probes, decals, VoxelGI volumes and lightmaps.
//!
//! These are parameter containers: the scene renderer reads them when an
//! instance using them is visible.

use glam::{Affine3A, IVec3, Vec3};
use vesper_core::math::{Aabb, Color};
use vesper_core::{ordinal_enum, ChangeTracker, Result, Rid, RidKind, ServerError};

// ============================================================================
// Reflection probes
// ============================================================================

ordinal_enum! {
    #[derive(Default)]
    pub enum ReflectionProbeUpdateMode {
        #[default]
        Once = 0,
        Always = 1,
    }
}

ordinal_enum! {
    #[derive(Default)]
    pub enum ReflectionProbeAmbientMode {
        Disabled = 0,
        #[default]
        Environment = 1,
        Color = 2,
    }
}

#[derive(Debug, Clone)]
pub struct ReflectionProbe {
    pub update_mode: ReflectionProbeUpdateMode,
    pub intensity: f32,
    pub blend_distance: f32,
    pub ambient_mode: ReflectionProbeAmbientMode,
    pub ambient_color: Color,
    pub ambient_energy: f32,
    pub max_distance: f32,
    pub size: Vec3,
    pub origin_offset: Vec3,
    pub as_interior: bool,
    pub enable_box_projection: bool,
    pub enable_shadows: bool,
    pub cull_mask: u32,
    pub reflection_mask: u32,
    pub resolution: u32,
    pub mesh_lod_threshold: f32,
    pub changes: ChangeTracker,
}

impl Default for ReflectionProbe {
    fn default() -> Self {
        Self {
            update_mode: ReflectionProbeUpdateMode::Once,
            intensity: 1.0,
            blend_distance: 1.0,
            ambient_mode: ReflectionProbeAmbientMode::Environment,
            ambient_color: Color::BLACK,
            ambient_energy: 1.0,
            max_distance: 0.0,
            size: Vec3::splat(20.0),
            origin_offset: Vec3::ZERO,
            as_interior: false,
            enable_box_projection: false,
            enable_shadows: false,
            cull_mask: u32::MAX,
            reflection_mask: u32::MAX,
            resolution: 256,
            mesh_lod_threshold: 0.01,
            changes: ChangeTracker::new(),
        }
    }
}

impl ReflectionProbe {
    #[must_use]
    pub fn aabb(&self) -> Aabb {
        Aabb::from_center_extents(self.origin_offset, self.size * 0.5)
    }
}

resource_store!(ReflectionProbeStore, ReflectionProbe, RidKind::ReflectionProbe);

impl ReflectionProbeStore {
    pub fn initialize(&mut self, rid: Rid) {
        self.owner.initialize(rid, ReflectionProbe::default());
    }

    field_setters! {
        update_mode: ReflectionProbeUpdateMode,
        intensity: f32,
        blend_distance: f32,
        ambient_mode: ReflectionProbeAmbientMode,
        ambient_color: Color,
        ambient_energy: f32,
        max_distance: f32,
        origin_offset: Vec3,
        as_interior: bool,
        enable_box_projection: bool,
        enable_shadows: bool,
        cull_mask: u32,
        reflection_mask: u32,
        mesh_lod_threshold: f32,
    }

    pub fn set_size(&mut self, rid: Rid, size: Vec3) -> Result<()> {
        if size.min_element() <= 0.0 {
            return Err(ServerError::InvalidArgument(format!("probe size {size} must be positive")));
        }
        let probe = self.state_mut(rid)?;
        probe.size = size;
        probe.changes.changed();
        Ok(())
    }

    /// Cubemap face size; rounded up to a power of two and at least 32.
    pub fn set_resolution(&mut self, rid: Rid, resolution: u32) -> Result<()> {
        let probe = self.state_mut(rid)?;
        probe.resolution = resolution.max(32).next_power_of_two();
        probe.changes.changed();
        Ok(())
    }
}

// ============================================================================
// Decals
// ============================================================================

ordinal_enum! {
    pub enum DecalTexture {
        Albedo = 0,
        Normal = 1,
        Orm = 2,
        Emission = 3,
    }
}

pub const DECAL_TEXTURE_MAX: usize = 4;

#[derive(Debug, Clone)]
pub struct Decal {
    pub size: Vec3,
    pub textures: [Rid; DECAL_TEXTURE_MAX],
    pub emission_energy: f32,
    pub albedo_mix: f32,
    pub modulate: Color,
    pub cull_mask: u32,
    pub distance_fade_enabled: bool,
    pub distance_fade_begin: f32,
    pub distance_fade_length: f32,
    pub upper_fade: f32,
    pub lower_fade: f32,
    pub normal_fade: f32,
    pub changes: ChangeTracker,
}

impl Default for Decal {
    fn default() -> Self {
        Self {
            size: Vec3::splat(2.0),
            textures: [Rid::INVALID; DECAL_TEXTURE_MAX],
            emission_energy: 1.0,
            albedo_mix: 1.0,
            modulate: Color::WHITE,
            cull_mask: u32::MAX,
            distance_fade_enabled: false,
            distance_fade_begin: 40.0,
            distance_fade_length: 10.0,
            upper_fade: 0.3,
            lower_fade: 0.3,
            normal_fade: 0.0,
            changes: ChangeTracker::new(),
        }
    }
}

impl Decal {
    #[must_use]
    pub fn aabb(&self) -> Aabb {
        Aabb::from_center_extents(Vec3::ZERO, self.size * 0.5)
    }
}

resource_store!(DecalStore, Decal, RidKind::Decal);

impl DecalStore {
    pub fn initialize(&mut self, rid: Rid) {
        self.owner.initialize(rid, Decal::default());
    }

    field_setters! {
        size: Vec3,
        emission_energy: f32,
        albedo_mix: f32,
        modulate: Color,
        cull_mask: u32,
        upper_fade: f32,
        lower_fade: f32,
        normal_fade: f32,
    }

    pub fn set_texture(&mut self, rid: Rid, slot: DecalTexture, texture: Rid) -> Result<()> {
        let decal = self.state_mut(rid)?;
        decal.textures[slot.ordinal() as usize] = texture;
        decal.changes.changed();
        Ok(())
    }

    pub fn set_distance_fade(&mut self, rid: Rid, enabled: bool, begin: f32, length: f32) -> Result<()> {
        let decal = self.state_mut(rid)?;
        decal.distance_fade_enabled = enabled;
        decal.distance_fade_begin = begin;
        decal.distance_fade_length = length;
        decal.changes.changed();
        Ok(())
    }

    pub fn purge_reference(&mut self, freed: Rid) {
        for (_, decal) in self.owner.iter_mut() {
            let mut touched = false;
            for slot in &mut decal.textures {
                if *slot == freed {
                    *slot = Rid::INVALID;
                    touched = true;
                }
            }
            if touched {
                decal.changes.changed();
            }
        }
    }
}

// ============================================================================
// VoxelGI
// ============================================================================

/// Baked octree payload handed over by the editor-side baker.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VoxelGiData {
    pub to_cell_xform: Affine3A,
    pub bounds: Aabb,
    pub octree_size: IVec3,
    pub octree_cells: Vec<u8>,
    pub data_cells: Vec<u8>,
    pub distance_field: Vec<u8>,
    pub level_counts: Vec<i32>,
}

#[derive(Debug, Clone)]
pub struct VoxelGi {
    pub data: Option<VoxelGiData>,
    pub dynamic_range: f32,
    pub propagation: f32,
    pub energy: f32,
    pub baked_exposure_normalization: f32,
    pub bias: f32,
    pub normal_bias: f32,
    pub interior: bool,
    pub use_two_bounces: bool,
    pub changes: ChangeTracker,
}

impl Default for VoxelGi {
    fn default() -> Self {
        Self {
            data: None,
            dynamic_range: 2.0,
            propagation: 0.5,
            energy: 1.0,
            baked_exposure_normalization: 1.0,
            bias: 1.4,
            normal_bias: 0.0,
            interior: false,
            use_two_bounces: true,
            changes: ChangeTracker::new(),
        }
    }
}

impl VoxelGi {
    #[must_use]
    pub fn aabb(&self) -> Aabb {
        self.data.as_ref().map_or(Aabb::ZERO, |d| d.bounds)
    }
}

resource_store!(VoxelGiStore, VoxelGi, RidKind::VoxelGi);

impl VoxelGiStore {
    pub fn initialize(&mut self, rid: Rid) {
        self.owner.initialize(rid, VoxelGi::default());
    }

    field_setters! {
        dynamic_range: f32,
        propagation: f32,
        energy: f32,
        baked_exposure_normalization: f32,
        bias: f32,
        normal_bias: f32,
        interior: bool,
        use_two_bounces: bool,
    }

    /// `level_counts` must sum to the number of octree cells (8 bytes each).
    pub fn allocate_data(&mut self, rid: Rid, data: VoxelGiData) -> Result<()> {
        let cells: i32 = data.level_counts.iter().sum();
        let expected = usize::try_from(cells).unwrap_or(0) * 8;
        if data.octree_cells.len() != expected {
            return Err(ServerError::SizeMismatch {
                what: "voxel gi octree cells",
                expected,
                actual: data.octree_cells.len(),
            });
        }
        let gi = self.state_mut(rid)?;
        gi.data = Some(data);
        gi.changes.changed();
        Ok(())
    }
}

// ============================================================================
// Lightmaps
// ============================================================================

/// Light probe set baked next to the lightmap atlas.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LightmapCapture {
    pub points: Vec<Vec3>,
    /// Nine spherical-harmonics coefficients per point.
    pub point_sh: Vec<Color>,
    pub tetrahedra: Vec<i32>,
    pub bsp_tree: Vec<i32>,
}

#[derive(Debug, Clone)]
pub struct Lightmap {
    pub textures: Rid,
    pub shadowmask_textures: Rid,
    pub bounds: Aabb,
    pub interior: bool,
    pub uses_spherical_harmonics: bool,
    pub baked_exposure_normalization: f32,
    pub capture: LightmapCapture,
    pub changes: ChangeTracker,
}

impl Default for Lightmap {
    fn default() -> Self {
        Self {
            textures: Rid::INVALID,
            shadowmask_textures: Rid::INVALID,
            bounds: Aabb::ZERO,
            interior: false,
            uses_spherical_harmonics: true,
            baked_exposure_normalization: 1.0,
            capture: LightmapCapture::default(),
            changes: ChangeTracker::new(),
        }
    }
}

resource_store!(LightmapStore, Lightmap, RidKind::Lightmap);

impl LightmapStore {
    pub fn initialize(&mut self, rid: Rid) {
        self.owner.initialize(rid, Lightmap::default());
    }

    field_setters! {
        bounds: Aabb,
        interior: bool,
        baked_exposure_normalization: f32,
        shadowmask_textures: Rid,
    }

    pub fn set_textures(&mut self, rid: Rid, textures: Rid, uses_sh: bool) -> Result<()> {
        let lm = self.state_mut(rid)?;
        lm.textures = textures;
        lm.uses_spherical_harmonics = uses_sh;
        lm.changes.changed();
        Ok(())
    }

    pub fn set_probe_capture_data(&mut self, rid: Rid, capture: LightmapCapture) -> Result<()> {
        if capture.point_sh.len() != capture.points.len() * 9 {
            return Err(ServerError::SizeMismatch {
                what: "lightmap probe SH",
                expected: capture.points.len() * 9,
                actual: capture.point_sh.len(),
            });
        }
        if capture.tetrahedra.len() % 4 != 0 {
            return Err(ServerError::InvalidArgument(
                "lightmap tetrahedra must come in groups of four indices".into(),
            ));
        }
        let lm = self.state_mut(rid)?;
        lm.capture = capture;
        lm.changes.changed();
        Ok(())
    }

    #[must_use]
    pub fn capture(&self, rid: Rid) -> Option<&LightmapCapture> {
        self.owner.get(rid).map(|lm| &lm.capture)
    }

    pub fn purge_reference(&mut self, freed: Rid) {
        for (_, lm) in self.owner.iter_mut() {
            let mut touched = false;
            if lm.textures == freed {
                lm.textures = Rid::INVALID;
                touched = true;
            }
            if lm.shadowmask_textures == freed {
                lm.shadowmask_textures = Rid::INVALID;
                touched = true;
            }
            if touched {
                lm.changes.changed();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_core::RidAllocator;

    #[test]
    fn probe_defaults_and_resolution_rounding() {
        let alloc = RidAllocator::new();
        let mut store = ReflectionProbeStore::new();
        let p = alloc.alloc(RidKind::ReflectionProbe);
        store.initialize(p);
        assert_eq!(store.get(p).unwrap().size, Vec3::splat(20.0));
        store.set_resolution(p, 300).unwrap();
        assert_eq!(store.get(p).unwrap().resolution, 512);
        assert!(store.set_size(p, Vec3::new(1.0, 0.0, 1.0)).is_err());
        store.set_intensity(p, 2.0).unwrap();
        assert_eq!(store.get(p).unwrap().intensity, 2.0);
    }

    #[test]
    fn decal_texture_slots() {
        let alloc = RidAllocator::new();
        let mut store = DecalStore::new();
        let d = alloc.alloc(RidKind::Decal);
        let tex = alloc.alloc(RidKind::Texture);
        store.initialize(d);
        store.set_texture(d, DecalTexture::Normal, tex).unwrap();
        assert_eq!(store.get(d).unwrap().textures[1], tex);
        store.purge_reference(tex);
        assert_eq!(store.get(d).unwrap().textures[1], Rid::INVALID);
        assert_eq!(store.get(d).unwrap().aabb().max, Vec3::ONE);
    }

    #[test]
    fn voxel_gi_cell_count_is_checked() {
        let alloc = RidAllocator::new();
        let mut store = VoxelGiStore::new();
        let gi = alloc.alloc(RidKind::VoxelGi);
        store.initialize(gi);
        let data = VoxelGiData {
            level_counts: vec![1, 2],
            octree_cells: vec![0; 16],
            ..Default::default()
        };
        assert!(store.allocate_data(gi, data.clone()).is_err());
        let data = VoxelGiData {
            octree_cells: vec![0; 24],
            ..data
        };
        store.allocate_data(gi, data).unwrap();
    }

    #[test]
    fn lightmap_capture_validation() {
        let alloc = RidAllocator::new();
        let mut store = LightmapStore::new();
        let lm = alloc.alloc(RidKind::Lightmap);
        store.initialize(lm);
        let bad = LightmapCapture {
            points: vec![Vec3::ZERO],
            point_sh: vec![Color::WHITE; 8],
            ..Default::default()
        };
        assert!(store.set_probe_capture_data(lm, bad).is_err());
        let good = LightmapCapture {
            points: vec![Vec3::ZERO],
            point_sh: vec![Color::WHITE; 9],
            ..Default::default()
        };
        store.set_probe_capture_data(lm, good).unwrap();
        assert_eq!(store.capture(lm).unwrap().points.len(), 1);
    }
}
