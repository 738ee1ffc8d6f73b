//! Viewports
//!
//! A viewport is a render target plus everything needed to fill it: an
//! optional camera and scenario for the 3D pass, an ordered list of canvases
//! for the 2D pass, and per-target pipeline settings (scaling, anti-aliasing,
//! shadow atlas, VRS, debug draw).
//!
//! [`ViewportStore`] also decides *which* viewports render in a frame and in
//! what order (see [`ViewportStore::plan_frame`]).

pub mod scaling;
pub mod shadow_atlas;
pub mod vrs;

use glam::{Affine2, UVec2};
use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};
use vesper_core::math::{Rect2, Transform2D};
use vesper_core::{ordinal_enum, ChangeTracker, Result, Rid, RidKind, RidOwner, ServerError};
use vesper_resources::{CanvasItemTextureFilter, CanvasItemTextureRepeat};

pub use shadow_atlas::{ShadowAtlas, ShadowSlot};

// ============================================================================
// Enumerations
// ============================================================================

ordinal_enum! {
    #[derive(Default)]
    pub enum ViewportUpdateMode {
        Disabled = 0,
        Once = 1,
        #[default]
        WhenVisible = 2,
        WhenParentVisible = 3,
        Always = 4,
    }
}

ordinal_enum! {
    #[derive(Default)]
    pub enum ViewportClearMode {
        #[default]
        Always = 0,
        Never = 1,
        OnlyNextFrame = 2,
    }
}

ordinal_enum! {
    #[derive(Default)]
    pub enum ViewportEnvironmentMode {
        Disabled = 0,
        Enabled = 1,
        #[default]
        Inherit = 2,
    }
}

ordinal_enum! {
    #[derive(Default)]
    pub enum Scaling3DMode {
        #[default]
        Bilinear = 0,
        Fsr = 1,
        Fsr2 = 2,
    }
}

ordinal_enum! {
    #[derive(Default)]
    pub enum ViewportMsaa {
        #[default]
        Disabled = 0,
        X2 = 1,
        X4 = 2,
        X8 = 3,
    }
}

impl ViewportMsaa {
    #[must_use]
    pub const fn samples(self) -> u32 {
        match self {
            Self::Disabled => 1,
            Self::X2 => 2,
            Self::X4 => 4,
            Self::X8 => 8,
        }
    }
}

ordinal_enum! {
    #[derive(Default)]
    pub enum ViewportScreenSpaceAa {
        #[default]
        Disabled = 0,
        Fxaa = 1,
    }
}

ordinal_enum! {
    #[derive(Default)]
    pub enum ViewportSdfOversize {
        #[default]
        Percent100 = 0,
        Percent120 = 1,
        Percent150 = 2,
        Percent200 = 3,
    }
}

ordinal_enum! {
    #[derive(Default)]
    pub enum ViewportSdfScale {
        #[default]
        Percent100 = 0,
        Percent50 = 1,
        Percent25 = 2,
    }
}

ordinal_enum! {
    #[derive(Default)]
    pub enum ViewportDebugDraw {
        #[default]
        Disabled = 0,
        Unshaded = 1,
        Lighting = 2,
        Overdraw = 3,
        Wireframe = 4,
        NormalBuffer = 5,
        VoxelGiAlbedo = 6,
        VoxelGiLighting = 7,
        VoxelGiEmission = 8,
        ShadowAtlas = 9,
        DirectionalShadowAtlas = 10,
        SceneLuminance = 11,
        Ssao = 12,
        Ssil = 13,
        PssmSplits = 14,
        DecalAtlas = 15,
        Sdfgi = 16,
        SdfgiProbes = 17,
        GiBuffer = 18,
        DisableLod = 19,
        ClusterOmniLights = 20,
        ClusterSpotLights = 21,
        ClusterDecals = 22,
        ClusterReflectionProbes = 23,
        Occluders = 24,
        MotionVectors = 25,
        InternalBuffer = 26,
    }
}

ordinal_enum! {
    #[derive(Default)]
    pub enum ViewportVrsMode {
        #[default]
        Disabled = 0,
        Texture = 1,
        Xr = 2,
    }
}

ordinal_enum! {
    #[derive(Default)]
    pub enum ViewportVrsUpdateMode {
        Disabled = 0,
        #[default]
        Once = 1,
        Always = 2,
    }
}

ordinal_enum! {
    pub enum ViewportRenderInfo {
        ObjectsInFrame = 0,
        PrimitivesInFrame = 1,
        DrawCallsInFrame = 2,
    }
}

ordinal_enum! {
    pub enum ViewportRenderInfoType {
        Visible = 0,
        Shadow = 1,
        Canvas = 2,
    }
}

// ============================================================================
// Viewport state
// ============================================================================

/// A canvas drawn by a viewport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CanvasAttachment {
    pub canvas: Rid,
    pub transform: Transform2D,
    pub layer: i32,
    pub sublayer: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScreenAttachment {
    pub screen: i32,
    pub rect: Rect2,
}

/// Per-frame statistics, indexed by [`ViewportRenderInfoType`] then
/// [`ViewportRenderInfo`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderInfoCounters([[u64; 3]; 3]);

impl RenderInfoCounters {
    #[must_use]
    pub fn get(&self, ty: ViewportRenderInfoType, info: ViewportRenderInfo) -> u64 {
        self.0[ty.ordinal() as usize][info.ordinal() as usize]
    }

    pub fn add(&mut self, ty: ViewportRenderInfoType, objects: u64, primitives: u64, draw_calls: u64) {
        let row = &mut self.0[ty.ordinal() as usize];
        row[0] += objects;
        row[1] += primitives;
        row[2] += draw_calls;
    }

    pub fn reset(&mut self) {
        self.0 = [[0; 3]; 3];
    }
}

/// Timer samples of the measured viewport.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RenderTimes {
    pub cpu_ms: f64,
    pub gpu_ms: f64,
    pub frames_measured: u64,
}

impl RenderTimes {
    /// Frames needed before reported timings are meaningful.
    pub const WARMUP_FRAMES: u64 = 2;

    #[must_use]
    pub fn cpu(&self, enabled: bool) -> f64 {
        if enabled && self.frames_measured >= Self::WARMUP_FRAMES { self.cpu_ms } else { 0.0 }
    }

    #[must_use]
    pub fn gpu(&self, enabled: bool) -> f64 {
        if enabled && self.frames_measured >= Self::WARMUP_FRAMES { self.gpu_ms } else { 0.0 }
    }
}

/// Pipeline stages a viewport ran last frame, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderPass {
    Clear,
    Shadows,
    Opaque,
    Sky,
    Transparent,
    CompositorEffect(vesper_resources::CompositorEffectCallbackType),
    Environment,
    Msaa3D,
    Taa,
    Fxaa,
    Debanding,
    Canvas,
    BackbufferCopy,
    Msaa2D,
    Vrs,
    DebugOverlay,
}

#[derive(Debug, Clone)]
pub struct Viewport {
    pub size: UVec2,
    pub active: bool,
    pub use_xr: bool,
    pub parent: Rid,
    pub screen: Option<ScreenAttachment>,
    pub render_direct_to_screen: bool,
    pub update_mode: ViewportUpdateMode,
    pub clear_mode: ViewportClearMode,
    pub disable_3d: bool,
    pub disable_2d: bool,
    pub environment_mode: ViewportEnvironmentMode,
    pub camera: Rid,
    pub scenario: Rid,
    pub canvases: Vec<CanvasAttachment>,
    pub canvas_cull_mask: u32,
    pub shadow_atlas: ShadowAtlas,
    pub msaa_2d: ViewportMsaa,
    pub msaa_3d: ViewportMsaa,
    pub screen_space_aa: ViewportScreenSpaceAa,
    pub use_taa: bool,
    pub use_debanding: bool,
    pub use_occlusion_culling: bool,
    pub mesh_lod_threshold: f32,
    pub vrs_mode: ViewportVrsMode,
    pub vrs_update_mode: ViewportVrsUpdateMode,
    pub vrs_texture: Rid,
    pub use_hdr_2d: bool,
    pub sdf_oversize: ViewportSdfOversize,
    pub sdf_scale: ViewportSdfScale,
    pub scaling_3d_mode: Scaling3DMode,
    pub scaling_3d_scale: f32,
    pub fsr_sharpness: f32,
    pub texture_mipmap_bias: f32,
    pub texture_filter: CanvasItemTextureFilter,
    pub texture_repeat: CanvasItemTextureRepeat,
    pub transparent_bg: bool,
    pub global_canvas_transform: Transform2D,
    pub snap_2d_transforms_to_pixel: bool,
    pub snap_2d_vertices_to_pixel: bool,
    pub debug_draw: ViewportDebugDraw,
    pub measure_render_time: bool,
    pub times: RenderTimes,
    /// Texture handle exposing the render target to the rest of the server.
    pub texture: Rid,
    pub render_info: RenderInfoCounters,
    pub last_passes: Vec<RenderPass>,
    /// Set when the viewport texture was drawn by a visible consumer during
    /// the previous frame.
    pub texture_sampled: bool,
    pub changes: ChangeTracker,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            size: UVec2::ZERO,
            active: false,
            use_xr: false,
            parent: Rid::INVALID,
            screen: None,
            render_direct_to_screen: false,
            update_mode: ViewportUpdateMode::WhenVisible,
            clear_mode: ViewportClearMode::Always,
            disable_3d: false,
            disable_2d: false,
            environment_mode: ViewportEnvironmentMode::Inherit,
            camera: Rid::INVALID,
            scenario: Rid::INVALID,
            canvases: Vec::new(),
            canvas_cull_mask: u32::MAX,
            shadow_atlas: ShadowAtlas::new(2048),
            msaa_2d: ViewportMsaa::Disabled,
            msaa_3d: ViewportMsaa::Disabled,
            screen_space_aa: ViewportScreenSpaceAa::Disabled,
            use_taa: false,
            use_debanding: false,
            use_occlusion_culling: false,
            mesh_lod_threshold: 1.0,
            vrs_mode: ViewportVrsMode::Disabled,
            vrs_update_mode: ViewportVrsUpdateMode::Once,
            vrs_texture: Rid::INVALID,
            use_hdr_2d: false,
            sdf_oversize: ViewportSdfOversize::Percent120,
            sdf_scale: ViewportSdfScale::Percent50,
            scaling_3d_mode: Scaling3DMode::Bilinear,
            scaling_3d_scale: 1.0,
            fsr_sharpness: 0.2,
            texture_mipmap_bias: 0.0,
            texture_filter: CanvasItemTextureFilter::Linear,
            texture_repeat: CanvasItemTextureRepeat::Disabled,
            transparent_bg: false,
            global_canvas_transform: Affine2::IDENTITY,
            snap_2d_transforms_to_pixel: false,
            snap_2d_vertices_to_pixel: false,
            debug_draw: ViewportDebugDraw::Disabled,
            measure_render_time: false,
            times: RenderTimes::default(),
            texture: Rid::INVALID,
            render_info: RenderInfoCounters::default(),
            last_passes: Vec::new(),
            texture_sampled: false,
            changes: ChangeTracker::new(),
        }
    }
}

impl Viewport {
    /// On a screen, directly or through its own blit.
    #[must_use]
    pub fn is_on_screen(&self) -> bool {
        self.screen.is_some()
    }

    /// Canvas attachments sorted by `(layer, sublayer)`; ties keep
    /// attachment order.
    #[must_use]
    pub fn sorted_canvases(&self) -> Vec<CanvasAttachment> {
        let mut sorted = self.canvases.clone();
        sorted.sort_by_key(|c| (c.layer, c.sublayer));
        sorted
    }
}

// ============================================================================
// ViewportStore
// ============================================================================

macro_rules! viewport_setter {
    ($name:ident, $field:ident : $ty:ty) => {
        pub fn $name(&mut self, rid: Rid, value: $ty) -> Result<()> {
            let vp = self.vp_mut(rid)?;
            vp.$field = value;
            vp.changes.changed();
            Ok(())
        }
    };
}

/// What the frame loop should do with one viewport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramePlanEntry {
    pub viewport: Rid,
    pub render: bool,
}

pub struct ViewportStore {
    owner: RidOwner<Viewport>,
    /// Creation order, the tie-breaker of the render order.
    order: Vec<Rid>,
}

impl Default for ViewportStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewportStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            owner: RidOwner::new(RidKind::Viewport),
            order: Vec::new(),
        }
    }

    pub fn initialize(&mut self, rid: Rid, texture: Rid, shadow_atlas_size: u32) {
        let mut vp = Viewport {
            texture,
            ..Viewport::default()
        };
        vp.shadow_atlas.set_size(shadow_atlas_size, true);
        self.owner.initialize(rid, vp);
        self.order.push(rid);
    }

    #[must_use]
    pub fn get(&self, rid: Rid) -> Option<&Viewport> {
        self.owner.get(rid)
    }

    pub fn get_mut(&mut self, rid: Rid) -> Option<&mut Viewport> {
        self.owner.get_mut(rid)
    }

    #[must_use]
    pub fn owns(&self, rid: Rid) -> bool {
        self.owner.owns(rid)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.owner.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.owner.is_empty()
    }

    /// Viewports in creation order.
    pub fn iter(&self) -> impl Iterator<Item = (Rid, &Viewport)> {
        self.order.iter().filter_map(|r| self.owner.get(*r).map(|v| (*r, v)))
    }

    /// Removes a viewport. Children lose their parent link.
    pub fn free(&mut self, rid: Rid) -> Option<Viewport> {
        let vp = self.owner.take(rid)?;
        self.order.retain(|r| *r != rid);
        for (_, other) in self.owner.iter_mut() {
            if other.parent == rid {
                other.parent = Rid::INVALID;
            }
        }
        Some(vp)
    }

    /// Drops every reference to `freed`: cameras, scenarios, canvases and
    /// VRS textures.
    pub fn purge_reference(&mut self, freed: Rid) {
        for (_, vp) in self.owner.iter_mut() {
            let mut touched = false;
            for r in [&mut vp.camera, &mut vp.scenario, &mut vp.vrs_texture, &mut vp.parent] {
                if *r == freed {
                    *r = Rid::INVALID;
                    touched = true;
                }
            }
            let before = vp.canvases.len();
            vp.canvases.retain(|c| c.canvas != freed);
            if touched || before != vp.canvases.len() {
                vp.changes.changed();
            }
        }
    }

    fn vp_mut(&mut self, rid: Rid) -> Result<&mut Viewport> {
        self.owner.get_mut(rid).ok_or(ServerError::InvalidRid(rid))
    }

    viewport_setter!(set_active, active: bool);
    viewport_setter!(set_use_xr, use_xr: bool);
    viewport_setter!(set_render_direct_to_screen, render_direct_to_screen: bool);
    viewport_setter!(set_update_mode, update_mode: ViewportUpdateMode);
    viewport_setter!(set_clear_mode, clear_mode: ViewportClearMode);
    viewport_setter!(set_disable_3d, disable_3d: bool);
    viewport_setter!(set_disable_2d, disable_2d: bool);
    viewport_setter!(set_environment_mode, environment_mode: ViewportEnvironmentMode);
    viewport_setter!(attach_camera, camera: Rid);
    viewport_setter!(set_scenario, scenario: Rid);
    viewport_setter!(set_canvas_cull_mask, canvas_cull_mask: u32);
    viewport_setter!(set_msaa_2d, msaa_2d: ViewportMsaa);
    viewport_setter!(set_msaa_3d, msaa_3d: ViewportMsaa);
    viewport_setter!(set_screen_space_aa, screen_space_aa: ViewportScreenSpaceAa);
    viewport_setter!(set_use_taa, use_taa: bool);
    viewport_setter!(set_use_debanding, use_debanding: bool);
    viewport_setter!(set_use_occlusion_culling, use_occlusion_culling: bool);
    viewport_setter!(set_vrs_mode, vrs_mode: ViewportVrsMode);
    viewport_setter!(set_vrs_update_mode, vrs_update_mode: ViewportVrsUpdateMode);
    viewport_setter!(set_vrs_texture, vrs_texture: Rid);
    viewport_setter!(set_use_hdr_2d, use_hdr_2d: bool);
    viewport_setter!(set_sdf_oversize, sdf_oversize: ViewportSdfOversize);
    viewport_setter!(set_sdf_scale, sdf_scale: ViewportSdfScale);
    viewport_setter!(set_scaling_3d_mode, scaling_3d_mode: Scaling3DMode);
    viewport_setter!(set_texture_mipmap_bias, texture_mipmap_bias: f32);
    viewport_setter!(set_default_canvas_item_texture_filter, texture_filter: CanvasItemTextureFilter);
    viewport_setter!(set_default_canvas_item_texture_repeat, texture_repeat: CanvasItemTextureRepeat);
    viewport_setter!(set_transparent_background, transparent_bg: bool);
    viewport_setter!(set_global_canvas_transform, global_canvas_transform: Transform2D);
    viewport_setter!(set_snap_2d_transforms_to_pixel, snap_2d_transforms_to_pixel: bool);
    viewport_setter!(set_snap_2d_vertices_to_pixel, snap_2d_vertices_to_pixel: bool);
    viewport_setter!(set_debug_draw, debug_draw: ViewportDebugDraw);

    pub fn set_size(&mut self, rid: Rid, width: i32, height: i32) -> Result<()> {
        if width < 0 || height < 0 {
            return Err(ServerError::InvalidArgument(format!("viewport size {width}x{height} is negative")));
        }
        let vp = self.vp_mut(rid)?;
        vp.size = UVec2::new(width as u32, height as u32);
        vp.changes.changed();
        Ok(())
    }

    pub fn set_parent(&mut self, rid: Rid, parent: Rid) -> Result<()> {
        if parent.is_valid() {
            if !self.owner.owns(parent) {
                return Err(ServerError::InvalidRid(parent));
            }
            let mut cursor = parent;
            while cursor.is_valid() {
                if cursor == rid {
                    return Err(ServerError::CycleDetected(format!(
                        "viewport {rid:?} cannot be parented under its descendant {parent:?}"
                    )));
                }
                cursor = self.owner.get(cursor).map_or(Rid::INVALID, |v| v.parent);
            }
        }
        let vp = self.vp_mut(rid)?;
        vp.parent = parent;
        vp.changes.changed();
        Ok(())
    }

    /// A zero-area rect detaches the viewport from the screen.
    pub fn attach_to_screen(&mut self, rid: Rid, rect: Rect2, screen: i32) -> Result<()> {
        let vp = self.vp_mut(rid)?;
        vp.screen = rect.has_area().then_some(ScreenAttachment { screen, rect });
        vp.changes.changed();
        Ok(())
    }

    pub fn set_scaling_3d_scale(&mut self, rid: Rid, scale: f32) -> Result<()> {
        let vp = self.vp_mut(rid)?;
        vp.scaling_3d_scale = scaling::clamp_scale(vp.scaling_3d_mode, scale);
        vp.changes.changed();
        Ok(())
    }

    pub fn set_fsr_sharpness(&mut self, rid: Rid, sharpness: f32) -> Result<()> {
        let vp = self.vp_mut(rid)?;
        vp.fsr_sharpness = sharpness.clamp(0.0, 2.0);
        vp.changes.changed();
        Ok(())
    }

    pub fn set_mesh_lod_threshold(&mut self, rid: Rid, pixels: f32) -> Result<()> {
        let vp = self.vp_mut(rid)?;
        vp.mesh_lod_threshold = pixels.max(0.0);
        vp.changes.changed();
        Ok(())
    }

    pub fn set_measure_render_time(&mut self, rid: Rid, enable: bool) -> Result<()> {
        let vp = self.vp_mut(rid)?;
        vp.measure_render_time = enable;
        vp.times = RenderTimes::default();
        Ok(())
    }

    pub fn set_positional_shadow_atlas_size(&mut self, rid: Rid, size: i32, use_16_bits: bool) -> Result<()> {
        if size < 0 {
            return Err(ServerError::InvalidArgument(format!("shadow atlas size {size} is negative")));
        }
        let vp = self.vp_mut(rid)?;
        vp.shadow_atlas.set_size(size as u32, use_16_bits);
        vp.changes.changed();
        Ok(())
    }

    pub fn set_positional_shadow_atlas_quadrant_subdivision(&mut self, rid: Rid, quadrant: i32, subdiv: i32) -> Result<()> {
        if quadrant < 0 || subdiv < 0 {
            return Err(ServerError::InvalidArgument(format!(
                "quadrant {quadrant} / subdivision {subdiv} must not be negative"
            )));
        }
        let vp = self.vp_mut(rid)?;
        vp.shadow_atlas.set_quadrant_subdivision(quadrant as u32, subdiv as u32)?;
        vp.changes.changed();
        Ok(())
    }

    // --- canvases ---

    pub fn attach_canvas(&mut self, rid: Rid, canvas: Rid) -> Result<()> {
        let vp = self.vp_mut(rid)?;
        if vp.canvases.iter().any(|c| c.canvas == canvas) {
            return Err(ServerError::InvalidArgument(format!("canvas {canvas:?} is already attached")));
        }
        vp.canvases.push(CanvasAttachment {
            canvas,
            transform: Affine2::IDENTITY,
            layer: 0,
            sublayer: 0,
        });
        vp.changes.changed();
        Ok(())
    }

    pub fn remove_canvas(&mut self, rid: Rid, canvas: Rid) -> Result<()> {
        let vp = self.vp_mut(rid)?;
        let before = vp.canvases.len();
        vp.canvases.retain(|c| c.canvas != canvas);
        if before == vp.canvases.len() {
            return Err(ServerError::InvalidArgument(format!("canvas {canvas:?} is not attached")));
        }
        vp.changes.changed();
        Ok(())
    }

    fn attachment_mut(&mut self, rid: Rid, canvas: Rid) -> Result<&mut CanvasAttachment> {
        let vp = self.vp_mut(rid)?;
        vp.changes.changed();
        vp.canvases
            .iter_mut()
            .find(|c| c.canvas == canvas)
            .ok_or_else(|| ServerError::InvalidArgument(format!("canvas {canvas:?} is not attached")))
    }

    pub fn set_canvas_transform(&mut self, rid: Rid, canvas: Rid, transform: Transform2D) -> Result<()> {
        self.attachment_mut(rid, canvas)?.transform = transform;
        Ok(())
    }

    pub fn set_canvas_stacking(&mut self, rid: Rid, canvas: Rid, layer: i32, sublayer: i32) -> Result<()> {
        let a = self.attachment_mut(rid, canvas)?;
        a.layer = layer;
        a.sublayer = sublayer;
        Ok(())
    }

    // --- frame planning ---

    fn depth(&self, rid: Rid) -> usize {
        let mut depth = 0;
        let mut cursor = self.owner.get(rid).map_or(Rid::INVALID, |v| v.parent);
        while let Some(p) = self.owner.get(cursor) {
            depth += 1;
            cursor = p.parent;
            if depth > self.order.len() {
                break;
            }
        }
        depth
    }

    fn gate(&self, rid: Rid, memo: &mut FxHashMap<Rid, bool>, visiting: &mut FxHashSet<Rid>) -> bool {
        if let Some(v) = memo.get(&rid) {
            return *v;
        }
        let Some(vp) = self.owner.get(rid) else {
            return false;
        };
        if !visiting.insert(rid) {
            return false;
        }
        let render = vp.active
            && vp.size.x > 0
            && vp.size.y > 0
            && match vp.update_mode {
                ViewportUpdateMode::Disabled => false,
                ViewportUpdateMode::Once | ViewportUpdateMode::Always => true,
                ViewportUpdateMode::WhenVisible => vp.is_on_screen() || vp.texture_sampled,
                ViewportUpdateMode::WhenParentVisible => {
                    vp.parent.is_valid() && self.gate(vp.parent, memo, visiting)
                }
            };
        visiting.remove(&rid);
        memo.insert(rid, render);
        render
    }

    /// Every viewport in render order (descendants before ancestors, then
    /// creation order) with its update-mode verdict for this frame.
    #[must_use]
    pub fn plan_frame(&self) -> Vec<FramePlanEntry> {
        let mut memo = FxHashMap::default();
        let mut visiting = FxHashSet::default();
        let mut order: Vec<(usize, usize, Rid)> = self
            .order
            .iter()
            .enumerate()
            .map(|(i, r)| (self.depth(*r), i, *r))
            .collect();
        order.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        order
            .into_iter()
            .map(|(_, _, viewport)| FramePlanEntry {
                viewport,
                render: self.gate(viewport, &mut memo, &mut visiting),
            })
            .collect()
    }

    /// Applies the one-shot transitions after a viewport rendered.
    pub fn finish_render(&mut self, rid: Rid) {
        let Some(vp) = self.owner.get_mut(rid) else {
            return;
        };
        if vp.update_mode == ViewportUpdateMode::Once {
            debug!("viewport {rid:?} rendered once, disabling updates");
            vp.update_mode = ViewportUpdateMode::Disabled;
        }
        if vp.clear_mode == ViewportClearMode::OnlyNextFrame {
            vp.clear_mode = ViewportClearMode::Never;
        }
        if vp.vrs_mode != ViewportVrsMode::Disabled && vp.vrs_update_mode == ViewportVrsUpdateMode::Once {
            vp.vrs_update_mode = ViewportVrsUpdateMode::Disabled;
        }
    }

    /// Whether the environment applies to `rid`, resolving `Inherit` up the
    /// parent chain; the topmost `Inherit` counts as enabled.
    #[must_use]
    pub fn environment_enabled(&self, rid: Rid) -> bool {
        let mut cursor = rid;
        let mut steps = 0;
        while let Some(vp) = self.owner.get(cursor) {
            match vp.environment_mode {
                ViewportEnvironmentMode::Disabled => return false,
                ViewportEnvironmentMode::Enabled => return true,
                ViewportEnvironmentMode::Inherit => {}
            }
            cursor = vp.parent;
            steps += 1;
            if steps > self.order.len() {
                break;
            }
        }
        true
    }

    /// Marks which viewport textures were sampled this frame; feeds the
    /// `WhenVisible` gate of the next one.
    pub fn set_sampled(&mut self, sampled: &FxHashSet<Rid>) {
        for (rid, vp) in self.owner.iter_mut() {
            vp.texture_sampled = sampled.contains(&rid);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_core::RidAllocator;

    fn store_with(n: usize) -> (RidAllocator, ViewportStore, Vec<Rid>) {
        let alloc = RidAllocator::new();
        let mut store = ViewportStore::new();
        let rids = (0..n)
            .map(|_| {
                let vp = alloc.alloc(RidKind::Viewport);
                let tex = alloc.alloc(RidKind::Texture);
                store.initialize(vp, tex, 2048);
                store.set_size(vp, 8, 8).unwrap();
                store.set_active(vp, true).unwrap();
                vp
            })
            .collect();
        (alloc, store, rids)
    }

    #[test]
    fn once_renders_a_single_frame() {
        let (_a, mut store, v) = store_with(1);
        store.set_update_mode(v[0], ViewportUpdateMode::Once).unwrap();
        assert!(store.plan_frame()[0].render);
        store.finish_render(v[0]);
        assert!(!store.plan_frame()[0].render);
        assert_eq!(store.get(v[0]).unwrap().update_mode, ViewportUpdateMode::Disabled);
    }

    #[test]
    fn inactive_viewports_never_render() {
        let (_a, mut store, v) = store_with(1);
        store.set_update_mode(v[0], ViewportUpdateMode::Always).unwrap();
        store.set_active(v[0], false).unwrap();
        assert!(!store.plan_frame()[0].render);
    }

    #[test]
    fn when_visible_needs_screen_or_consumer() {
        let (_a, mut store, v) = store_with(1);
        assert!(!store.plan_frame()[0].render);
        store.attach_to_screen(v[0], Rect2::from_xywh(0.0, 0.0, 8.0, 8.0), 0).unwrap();
        assert!(store.plan_frame()[0].render);
        store.attach_to_screen(v[0], Rect2::ZERO, 0).unwrap();
        assert!(!store.plan_frame()[0].render);
        let mut sampled = FxHashSet::default();
        sampled.insert(v[0]);
        store.set_sampled(&sampled);
        assert!(store.plan_frame()[0].render);
    }

    #[test]
    fn children_render_before_parents() {
        let (_a, mut store, v) = store_with(3);
        store.set_parent(v[1], v[0]).unwrap();
        store.set_parent(v[2], v[1]).unwrap();
        let order: Vec<Rid> = store.plan_frame().iter().map(|e| e.viewport).collect();
        assert_eq!(order, vec![v[2], v[1], v[0]]);
        assert!(matches!(store.set_parent(v[0], v[2]), Err(ServerError::CycleDetected(_))));
    }

    #[test]
    fn when_parent_visible_follows_parent() {
        let (_a, mut store, v) = store_with(2);
        store.set_parent(v[1], v[0]).unwrap();
        store.set_update_mode(v[1], ViewportUpdateMode::WhenParentVisible).unwrap();
        assert!(!store.plan_frame().iter().any(|e| e.render));
        store.set_update_mode(v[0], ViewportUpdateMode::Always).unwrap();
        assert!(store.plan_frame().iter().all(|e| e.render));
    }

    #[test]
    fn topmost_inherit_counts_as_enabled() {
        let (_a, mut store, v) = store_with(2);
        store.set_parent(v[1], v[0]).unwrap();
        assert!(store.environment_enabled(v[1]));
        store.set_environment_mode(v[0], ViewportEnvironmentMode::Disabled).unwrap();
        assert!(!store.environment_enabled(v[1]));
        store.set_environment_mode(v[1], ViewportEnvironmentMode::Enabled).unwrap();
        assert!(store.environment_enabled(v[1]));
    }

    #[test]
    fn clear_once_then_never() {
        let (_a, mut store, v) = store_with(1);
        store.set_clear_mode(v[0], ViewportClearMode::OnlyNextFrame).unwrap();
        store.finish_render(v[0]);
        assert_eq!(store.get(v[0]).unwrap().clear_mode, ViewportClearMode::Never);
    }

    #[test]
    fn canvases_sort_by_layer_then_sublayer() {
        let (a, mut store, v) = store_with(1);
        let c: Vec<Rid> = (0..3).map(|_| a.alloc(RidKind::Canvas)).collect();
        for canvas in &c {
            store.attach_canvas(v[0], *canvas).unwrap();
        }
        store.set_canvas_stacking(v[0], c[0], 1, 0).unwrap();
        store.set_canvas_stacking(v[0], c[2], 0, -1).unwrap();
        let sorted: Vec<Rid> = store.get(v[0]).unwrap().sorted_canvases().iter().map(|x| x.canvas).collect();
        assert_eq!(sorted, vec![c[2], c[1], c[0]]);
        assert!(store.attach_canvas(v[0], c[0]).is_err());
    }

    #[test]
    fn measured_times_need_two_frames() {
        let t = RenderTimes {
            cpu_ms: 1.5,
            gpu_ms: 2.0,
            frames_measured: 1,
        };
        assert_eq!(t.cpu(true), 0.0);
        let t = RenderTimes { frames_measured: 2, ..t };
        assert_eq!(t.cpu(true), 1.5);
        assert_eq!(t.gpu(false), 0.0);
    }
}
