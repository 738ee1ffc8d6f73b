//! Mutable server state guarded by the server lock.

use log::{debug, warn};
use vesper_core::{Rid, RidAllocator, RidKind};
use vesper_resources::ResourceStores;
use vesper_scene::{Scene2D, Scene3D};

use crate::device::{BufferId, PassStats, RenderingDevice};
use crate::targets::TargetCache;
use crate::viewport::ViewportStore;

/// Built-in resources, created on first request.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Defaults {
    pub white_texture: Rid,
    pub test_texture: Rid,
    pub test_cube: Rid,
}

/// Everything the API mutates and the frame loop reads.
pub(crate) struct ServerState {
    pub resources: ResourceStores,
    pub scene3d: Scene3D,
    pub scene2d: Scene2D,
    pub viewports: ViewportStore,
    pub device: Box<dyn RenderingDevice>,
    pub targets: TargetCache,
    pub defaults: Defaults,
    /// Frames completed so far.
    pub frame: u64,
    /// Seconds accumulated from `frame_step`.
    pub time: f64,
    pub frame_setup_ms: f64,
    /// Totals of the last completed frame.
    pub totals: PassStats,
    /// Fraction of the current physics tick, for interpolated transforms.
    pub physics_fraction: f32,
    /// Device copy of the global uniform buffer and the version it holds.
    pub globals_buffer: Option<(u64, usize, BufferId)>,
}

impl ServerState {
    pub fn new(device: Box<dyn RenderingDevice>) -> Self {
        Self {
            resources: ResourceStores::new(),
            scene3d: Scene3D::new(),
            scene2d: Scene2D::new(),
            viewports: ViewportStore::new(),
            device,
            targets: TargetCache::default(),
            defaults: Defaults::default(),
            frame: 0,
            time: 0.0,
            frame_setup_ms: 0.0,
            totals: PassStats::default(),
            physics_fraction: 1.0,
            globals_buffer: None,
        }
    }

    /// Drops the state of a retired handle and every reference to it.
    /// A viewport takes its render-target texture down with it.
    pub fn free(&mut self, rid: Rid, kind: RidKind, rids: &RidAllocator) {
        let freed = match kind {
            RidKind::Scenario => self.scene3d.free_scenario(rid),
            RidKind::Instance => self.scene3d.free_instance(rid),
            RidKind::Canvas => self.scene2d.free_canvas(rid),
            RidKind::CanvasItem => self.scene2d.free_item(rid),
            RidKind::CanvasLight => self.scene2d.lights.free(rid).is_some(),
            RidKind::CanvasLightOccluder => self.scene2d.light_occluders.free(rid).is_some(),
            RidKind::CanvasOccluderPolygon => self.scene2d.occluder_polygons.free(rid).is_some(),
            RidKind::Viewport => match self.viewports.free(rid) {
                Some(vp) => {
                    self.targets.free_viewport(self.device.as_mut(), rid);
                    if rids.retire(vp.texture, self.frame).is_some() {
                        self.resources.textures.free(vp.texture);
                        self.purge_reference(vp.texture);
                    }
                    true
                }
                None => false,
            },
            RidKind::Texture => {
                self.targets.free_texture(self.device.as_mut(), rid);
                self.resources.free(rid, kind)
            }
            _ => self.resources.free(rid, kind),
        };
        if !freed {
            warn!("free_rid: no {kind} state behind {rid:?}");
        }
        self.purge_reference(rid);
        debug!("freed {kind} {rid:?}");
    }

    pub fn purge_reference(&mut self, freed: Rid) {
        self.resources.purge_reference(freed);
        self.scene3d.purge_reference(freed);
        self.scene2d.purge_reference(freed);
        self.viewports.purge_reference(freed);
        let d = &mut self.defaults;
        for slot in [&mut d.white_texture, &mut d.test_texture, &mut d.test_cube] {
            if *slot == freed {
                *slot = Rid::INVALID;
            }
        }
    }
}
