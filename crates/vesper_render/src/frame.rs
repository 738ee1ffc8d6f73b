//! One frame of the render loop.
//!
//! [`ServerState::render_frame`] runs with the server lock held: it updates
//! particles and scene bounds, renders every viewport the plan selects, blits
//! on-screen viewports to their screens and updates visibility notifiers.
//! User callbacks found along the way are returned as [`Deferred`] work and
//! run by the caller after the lock is released, so they may call back into
//! the server.

use std::time::Instant;

use glam::UVec2;
use log::{debug, error, trace};
use rustc_hash::{FxHashMap, FxHashSet};
use vesper_core::{Color, GlobalRenderConfig, Result, Rid, RidAllocator};
use vesper_resources::{Image, ImageFormat, NotifierCallback};

use crate::canvas_renderer::CanvasRenderer;
use crate::device::{raster, BufferUsage, PassStats, TargetFormat, TextureId};
use crate::scene_renderer::SceneRenderer;
use crate::state::ServerState;
use crate::viewport::{RenderPass, ViewportClearMode, ViewportRenderInfoType};

/// User code collected during a frame, run once the state is unlocked.
/// Compositor effects are not deferred; they run at their callback point.
pub(crate) enum Deferred {
    Notifier(NotifierCallback),
}

impl Deferred {
    pub fn run(self) {
        match self {
            Self::Notifier(cb) => cb(),
        }
    }
}

/// What one viewport render left behind for the end of the frame.
struct ViewportOutcome {
    scenario: Rid,
    notifiers: Vec<Rid>,
    color: TextureId,
    format: TargetFormat,
}

impl ServerState {
    /// Renders one frame. Returns the callbacks to run after unlocking.
    pub fn render_frame(
        &mut self,
        config: &GlobalRenderConfig,
        rids: &RidAllocator,
        swap_buffers: bool,
        frame_step: f64,
    ) -> Vec<Deferred> {
        let started = Instant::now();
        let mut deferred = Vec::new();
        self.time += frame_step;
        self.totals = PassStats::default();

        if config.render_loop_enabled() {
            self.draw_viewports(config, swap_buffers, frame_step, started, &mut deferred);
        } else {
            trace!("render loop disabled, frame {} skipped", self.frame);
        }

        let reclaimed = rids.reclaim(self.frame);
        if reclaimed > 0 {
            debug!("reclaimed {reclaimed} handle slot(s)");
        }
        self.frame += 1;
        deferred
    }

    fn draw_viewports(
        &mut self,
        config: &GlobalRenderConfig,
        swap_buffers: bool,
        frame_step: f64,
        started: Instant,
        deferred: &mut Vec<Deferred>,
    ) {
        self.resources.particles.process_all(frame_step as f32);
        self.scene3d.flush(&self.resources);
        if let Err(err) = self.upload_global_uniforms() {
            error!("global shader uniforms: {err}");
        }
        let plan = self.viewports.plan_frame();
        self.frame_setup_ms = started.elapsed().as_secs_f64() * 1000.0;

        let mut sampled = FxHashSet::default();
        let mut visible_items = FxHashSet::default();
        let mut seen: FxHashMap<Rid, Vec<Rid>> = FxHashMap::default();
        let mut rendered = Vec::new();
        for entry in plan {
            if let Some(vp) = self.viewports.get_mut(entry.viewport) {
                vp.render_info.reset();
                vp.last_passes.clear();
            }
            if !entry.render {
                continue;
            }
            match self.render_viewport(entry.viewport, config, &mut sampled, &mut visible_items) {
                Ok(Some(outcome)) => {
                    seen.entry(outcome.scenario).or_default().extend(outcome.notifiers.iter().copied());
                    rendered.push((entry.viewport, outcome));
                }
                Ok(None) => {}
                Err(err) => error!("viewport {:?}: {err}", entry.viewport),
            }
            self.viewports.finish_render(entry.viewport);
        }

        self.update_notifiers(&seen, &visible_items, deferred);
        self.viewports.set_sampled(&sampled);
        if swap_buffers {
            if let Err(err) = self.present(&rendered) {
                error!("present: {err}");
            }
        }
        for (rid, outcome) in &rendered {
            if let Err(err) = self.read_back(*rid, outcome) {
                error!("viewport {rid:?} readback: {err}");
            }
        }
    }

    fn render_viewport(
        &mut self,
        rid: Rid,
        config: &GlobalRenderConfig,
        sampled: &mut FxHashSet<Rid>,
        visible_items: &mut FxHashSet<Rid>,
    ) -> Result<Option<ViewportOutcome>> {
        let cpu_start = Instant::now();
        let gpu_start = self.device.timestamp();
        let env_enabled = self.viewports.environment_enabled(rid);
        let Self {
            resources,
            scene3d,
            scene2d,
            viewports,
            device,
            targets,
            time,
            physics_fraction,
            totals,
            ..
        } = self;
        let Some(vp) = viewports.get_mut(rid) else {
            return Ok(None);
        };

        let caps = device.capabilities();
        let format = if vp.use_hdr_2d && caps.supports_hdr_targets {
            TargetFormat::Rgba16F
        } else {
            TargetFormat::Rgba8
        };
        let samples = vp.msaa_3d.samples().max(vp.msaa_2d.samples()).min(caps.max_msaa_samples);
        let color = targets.viewport(device.as_mut(), rid, vp.size, format, samples)?.color;

        if vp.clear_mode != ViewportClearMode::Never {
            let clear = if vp.transparent_bg {
                Color::TRANSPARENT
            } else {
                config.default_clear_color()
            };
            device.clear(color, clear, None)?;
            vp.last_passes.push(RenderPass::Clear);
        }

        let mut notifiers = Vec::new();
        if !vp.disable_3d {
            let output = SceneRenderer {
                device: device.as_mut(),
                targets: &mut *targets,
                resources: &*resources,
                scene: &mut *scene3d,
                config,
            }
            .render(rid, vp, env_enabled)?;
            notifiers = output.notifiers;
        }

        if !vp.disable_2d && !vp.canvases.is_empty() {
            let output = CanvasRenderer {
                device: device.as_mut(),
                targets: &mut *targets,
                resources: &*resources,
                scene: &*scene2d,
                sampled,
                visible_notifiers: visible_items,
                time: *time,
                fraction: *physics_fraction,
            }
            .render(rid, vp, color)?;
            vp.render_info.add(
                ViewportRenderInfoType::Canvas,
                output.stats.objects,
                output.stats.primitives,
                output.stats.draw_calls,
            );
            vp.last_passes.extend(output.passes);
        }

        for ty in [
            ViewportRenderInfoType::Visible,
            ViewportRenderInfoType::Shadow,
            ViewportRenderInfoType::Canvas,
        ] {
            use crate::viewport::ViewportRenderInfo as Info;
            *totals += PassStats {
                objects: vp.render_info.get(ty, Info::ObjectsInFrame),
                primitives: vp.render_info.get(ty, Info::PrimitivesInFrame),
                draw_calls: vp.render_info.get(ty, Info::DrawCallsInFrame),
            };
        }

        if vp.measure_render_time {
            vp.times.cpu_ms = cpu_start.elapsed().as_secs_f64() * 1000.0;
            vp.times.gpu_ms = device.timestamp().saturating_sub(gpu_start) as f64 / 1_000_000.0;
            vp.times.frames_measured += 1;
        }

        Ok(Some(ViewportOutcome {
            scenario: if vp.disable_3d { Rid::INVALID } else { vp.scenario },
            notifiers,
            color,
            format,
        }))
    }

    /// Fires enter/exit edges of 3D notifier instances and 2D item notifiers.
    fn update_notifiers(
        &mut self,
        seen: &FxHashMap<Rid, Vec<Rid>>,
        visible_items: &FxHashSet<Rid>,
        deferred: &mut Vec<Deferred>,
    ) {
        let scenarios: Vec<Rid> = self.scene3d.scenarios.iter().map(|(r, _)| r).collect();
        for scenario in scenarios {
            let visible = seen.get(&scenario).map_or(&[][..], Vec::as_slice);
            let Some(sc) = self.scene3d.scenarios.get_mut(scenario) else { continue };
            let (entered, exited) = sc.update_notifiers(visible);
            let edges = entered.into_iter().map(|i| (i, true)).chain(exited.into_iter().map(|i| (i, false)));
            for (instance, enter) in edges {
                let base = self.scene3d.instances.get(instance).map_or(Rid::INVALID, |i| i.base);
                let Some(notifier) = self.resources.visibility_notifiers.get(base) else { continue };
                let cb = if enter { &notifier.on_enter } else { &notifier.on_exit };
                if let Some(cb) = cb {
                    deferred.push(Deferred::Notifier(cb.clone()));
                }
            }
        }
        for cb in self.scene2d.apply_notifiers(visible_items) {
            deferred.push(Deferred::Notifier(cb));
        }
    }

    /// Copies on-screen viewports into their screens' backbuffers.
    fn present(&mut self, rendered: &[(Rid, ViewportOutcome)]) -> Result<()> {
        let mut extents: FxHashMap<i32, UVec2> = FxHashMap::default();
        let mut blits = Vec::new();
        for (rid, outcome) in rendered {
            let Some(screen) = self.viewports.get(*rid).and_then(|v| v.screen) else { continue };
            let end = (screen.rect.position + screen.rect.size).ceil().max(glam::Vec2::ONE);
            let extent = extents.entry(screen.screen).or_insert(UVec2::ONE);
            *extent = extent.max(end.as_uvec2());
            blits.push((screen, outcome.color));
        }
        for (screen, color) in blits {
            let size = extents.get(&screen.screen).copied().unwrap_or(UVec2::ONE);
            let backbuffer = self.targets.screen(self.device.as_mut(), screen.screen, size)?;
            self.device.blit(color, backbuffer, screen.rect)?;
        }
        Ok(())
    }

    /// Makes the viewport texture reflect what was rendered. HDR targets are
    /// converted to sRGB.
    fn read_back(&mut self, rid: Rid, outcome: &ViewportOutcome) -> Result<()> {
        let Some(vp) = self.viewports.get(rid) else {
            return Ok(());
        };
        let texture = vp.texture;
        let size = vp.size;
        let raw = self.device.texture_read(outcome.color)?;
        let bytes = match outcome.format {
            TargetFormat::Rgba8 => raw,
            TargetFormat::Rgba16F => raw
                .chunks_exact(TargetFormat::Rgba16F.pixel_size())
                .flat_map(|px| raster::decode_pixel(TargetFormat::Rgba16F, px).linear_to_srgb().to_rgba8())
                .collect(),
        };
        let image = Image::new(size.x, size.y, false, ImageFormat::Rgba8, bytes)?;
        self.resources.textures.store_render_target(texture, image)
    }

    /// Keeps the device copy of the global uniform table current.
    fn upload_global_uniforms(&mut self) -> Result<()> {
        let globals = &self.resources.global_uniforms;
        let version = globals.buffer_version();
        let data: &[u8] = bytemuck::cast_slice(globals.buffer());
        match self.globals_buffer {
            Some((v, _, _)) if v == version => Ok(()),
            Some((_, len, id)) if len == data.len() => {
                self.device.buffer_update(id, 0, data)?;
                self.globals_buffer = Some((version, len, id));
                Ok(())
            }
            stale => {
                if let Some((_, _, id)) = stale {
                    self.device.buffer_free(id);
                }
                if data.is_empty() {
                    self.globals_buffer = None;
                    return Ok(());
                }
                let id = self
                    .device
                    .buffer_create(data.len(), BufferUsage::UNIFORM | BufferUsage::STORAGE, Some(data))?;
                self.globals_buffer = Some((version, data.len(), id));
                Ok(())
            }
        }
    }
}
