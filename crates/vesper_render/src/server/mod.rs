//! The rendering server facade.
//!
//! [`RenderingServer`] is the only type callers talk to. Every resource is
//! addressed through a [`Rid`]; the operations are grouped by category in
//! the submodules (`texture_*` in [`textures`], `mesh_*` in [`meshes`], ...).
//!
//! # Error policy
//!
//! Nothing on this surface returns an error. Setters on an invalid handle log
//! at `error` level and leave state unchanged; getters return the type's zero
//! value; create operations that fail return [`Rid::INVALID`].
//!
//! # Threading
//!
//! Mutations are written straight into the server state under one lock, so
//! they are visible to the next frame as soon as the call returns. Frames and
//! [`call_on_render_thread`](RenderingServer::call_on_render_thread) work run
//! on the render thread. Visibility notifiers and frame signals are invoked
//! with the lock released, so they may call back into the server. Compositor
//! effects run inside the frame at their callback point and must not.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, error, info, trace};
use parking_lot::Mutex;
use vesper_core::{ordinal_enum, GlobalRenderConfig, Result, Rid, RidAllocator, RidKind, ServerSettings};

use crate::device::{AdapterInfo, DeviceType, HeadlessDevice, RenderingDevice};
use crate::scheduler::{RenderCommand, Scheduler};
use crate::state::ServerState;

/// Forwards a `(rid, args..)` setter of a store reachable from
/// [`ServerState`], logging failures under the operation's name.
macro_rules! forward {
    ($(#[$meta:meta])* $name:ident => $($path:ident).+ :: $method:ident ( $($arg:ident : $ty:ty),* $(,)? )) => {
        $(#[$meta])*
        pub fn $name(&self, rid: Rid, $($arg: $ty),*) {
            self.apply(stringify!($name), |s| s.$($path).+.$method(rid, $($arg),*));
        }
    };
}

mod canvas;
mod defaults;
mod environment;
mod lighting;
mod meshes;
mod scene;
mod textures;
mod viewport;

pub use meshes::LodIndices;

/// Callback connected to `frame_pre_draw` / `frame_post_draw`.
pub type FrameSignal = Arc<dyn Fn() + Send + Sync>;

ordinal_enum! {
    /// Server-wide statistics read by [`RenderingServer::get_rendering_info`].
    pub enum RenderingInfo {
        TotalObjectsInFrame = 0,
        TotalPrimitivesInFrame = 1,
        TotalDrawCallsInFrame = 2,
        TextureMemUsed = 3,
        BufferMemUsed = 4,
        VideoMemUsed = 5,
        PipelineCompilationsCanvas = 6,
        PipelineCompilationsMesh = 7,
        PipelineCompilationsSurface = 8,
        PipelineCompilationsDraw = 9,
        PipelineCompilationsSpecialization = 10,
    }
}

/// Frame statistics are reported once this many frames completed.
const STATS_WARMUP_FRAMES: u64 = 2;

/// State shared between the API threads and the render thread.
pub(crate) struct ServerInner {
    pub rids: RidAllocator,
    pub config: GlobalRenderConfig,
    pub settings: ServerSettings,
    pub state: Mutex<ServerState>,
    pre_draw: Mutex<Vec<FrameSignal>>,
    post_draw: Mutex<Vec<FrameSignal>>,
    frame_drawn: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
    changed: AtomicBool,
}

impl ServerInner {
    pub fn execute(&self, cmd: RenderCommand) {
        match cmd {
            RenderCommand::Frame { swap_buffers, frame_step } => self.run_frame(swap_buffers, frame_step),
            RenderCommand::Call(f) => f(),
            RenderCommand::Sync(done) => {
                let _ = done.send(());
            }
            RenderCommand::Shutdown => {}
        }
    }

    fn run_frame(&self, swap_buffers: bool, frame_step: f64) {
        emit(&self.pre_draw);
        let deferred = self
            .state
            .lock()
            .render_frame(&self.config, &self.rids, swap_buffers, frame_step);
        if !deferred.is_empty() {
            trace!("running {} deferred callback(s)", deferred.len());
        }
        for work in deferred {
            work.run();
        }
        emit(&self.post_draw);
        self.changed.store(false, Ordering::Release);
        let drawn = std::mem::take(&mut *self.frame_drawn.lock());
        for cb in drawn {
            cb();
        }
    }
}

fn emit(signal: &Mutex<Vec<FrameSignal>>) {
    let listeners = signal.lock().clone();
    for listener in listeners {
        listener();
    }
}

/// Centralized owner of every visual resource.
///
/// ```rust,ignore
/// let server = RenderingServer::new(ServerSettings::default())?;
/// let viewport = server.viewport_create();
/// server.viewport_set_size(viewport, 64, 64);
/// server.force_draw(true, 0.0);
/// ```
pub struct RenderingServer {
    inner: Arc<ServerInner>,
    scheduler: Scheduler,
}

impl RenderingServer {
    /// Starts a server on the headless device described by `settings`.
    pub fn new(settings: ServerSettings) -> Result<Self> {
        let device = HeadlessDevice::with_identity(&settings.adapter);
        Self::with_device(settings, Box::new(device))
    }

    /// Starts a server on a caller-supplied device.
    pub fn with_device(settings: ServerSettings, device: Box<dyn RenderingDevice>) -> Result<Self> {
        settings.validate()?;
        let config = GlobalRenderConfig::from_settings(&settings);
        let info = device.adapter_info().clone();
        let inner = Arc::new(ServerInner {
            rids: RidAllocator::new(),
            config,
            state: Mutex::new(ServerState::new(device)),
            pre_draw: Mutex::new(Vec::new()),
            post_draw: Mutex::new(Vec::new()),
            frame_drawn: Mutex::new(Vec::new()),
            changed: AtomicBool::new(false),
            settings,
        });
        let scheduler = Scheduler::start(
            inner.clone(),
            inner.settings.thread_model,
            inner.settings.command_queue_capacity,
        )?;
        info!(
            "rendering server up: adapter '{}' ({:?}), {:?}",
            info.name, info.device_type, inner.settings.thread_model
        );
        Ok(Self { inner, scheduler })
    }

    // ------------------------------------------------------------------
    // Plumbing shared by the category modules
    // ------------------------------------------------------------------

    fn with_state<R>(&self, f: impl FnOnce(&mut ServerState) -> R) -> R {
        f(&mut self.inner.state.lock())
    }

    /// Runs a mutation, logging its error under `op`.
    fn apply(&self, op: &str, f: impl FnOnce(&mut ServerState) -> Result<()>) {
        match self.with_state(f) {
            Ok(()) => self.inner.changed.store(true, Ordering::Release),
            Err(err) => error!("{op}: {err}"),
        }
    }

    /// Allocates a handle and initializes its state.
    fn create(&self, kind: RidKind, init: impl FnOnce(&mut ServerState, Rid)) -> Rid {
        let rid = self.inner.rids.alloc(kind);
        self.with_state(|s| init(s, rid));
        self.inner.changed.store(true, Ordering::Release);
        rid
    }

    /// Like [`create`](Self::create) for initializers that validate their
    /// input. On failure the handle is retired and `Rid::INVALID` returned.
    fn try_create(&self, op: &str, kind: RidKind, init: impl FnOnce(&mut ServerState, Rid) -> Result<()>) -> Rid {
        let rid = self.inner.rids.alloc(kind);
        let result = self.with_state(|s| {
            let result = init(s, rid);
            if result.is_err() {
                self.inner.rids.retire(rid, s.frame);
            }
            result
        });
        match result {
            Ok(()) => {
                self.inner.changed.store(true, Ordering::Release);
                rid
            }
            Err(err) => {
                error!("{op}: {err}");
                Rid::INVALID
            }
        }
    }

    /// Whether `rid` may be stored as a reference of `kind`. The invalid
    /// handle is accepted and clears the reference.
    fn accepts(&self, op: &str, rid: Rid, kind: RidKind) -> bool {
        if !rid.is_valid() || self.inner.rids.owns(rid, kind) {
            return true;
        }
        match self.inner.rids.kind_of(rid) {
            Some(actual) => error!("{op}: {rid:?} is a {actual}, expected {kind}"),
            None => error!("{op}: {rid:?} is not a live {kind}"),
        }
        false
    }

    /// Read-only access to the process-wide quality knobs.
    #[must_use]
    pub fn config(&self) -> &GlobalRenderConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn settings(&self) -> &ServerSettings {
        &self.inner.settings
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Frees any handle. Idempotent: freeing a dead handle does nothing.
    ///
    /// The state goes away immediately and every reference to it is dropped;
    /// the handle's slot is only reused once the current frame completed.
    pub fn free_rid(&self, rid: Rid) {
        let rids = &self.inner.rids;
        let Some(kind) = rids.kind_of(rid) else {
            trace!("free_rid: {rid:?} is not live");
            return;
        };
        self.with_state(|s| {
            if kind == RidKind::Texture
                && let Some(viewport) = s.resources.textures.get(rid).and_then(|t| t.render_target)
                && s.viewports.owns(viewport)
            {
                error!("free_rid: {rid:?} belongs to viewport {viewport:?}, free the viewport instead");
                return;
            }
            if rids.retire(rid, s.frame).is_some() {
                s.free(rid, kind, rids);
            }
        });
        self.inner.changed.store(true, Ordering::Release);
    }

    /// Whether any mutation happened since the last frame was drawn.
    #[must_use]
    pub fn has_changed(&self) -> bool {
        self.inner.changed.load(Ordering::Acquire)
    }

    /// Requests a frame without waiting for it.
    pub fn draw(&self, swap_buffers: bool, frame_step: f64) {
        self.scheduler.submit(RenderCommand::Frame { swap_buffers, frame_step });
    }

    /// Draws a frame and waits until it is done. Must not be called from the
    /// render thread itself.
    pub fn force_draw(&self, swap_buffers: bool, frame_step: f64) {
        if self.scheduler.is_threaded() && self.scheduler.is_on_render_thread() {
            error!("force_draw: called on the render thread, ignored");
            return;
        }
        self.draw(swap_buffers, frame_step);
        self.scheduler.sync();
    }

    /// Waits until every queued command ran.
    pub fn sync(&self) {
        self.scheduler.sync();
    }

    /// CPU/GPU barrier: waits for the render thread to go idle.
    pub fn force_sync(&self) {
        self.scheduler.sync();
    }

    /// Runs `f` on the render thread after everything queued before it.
    pub fn call_on_render_thread(&self, f: impl FnOnce() + Send + 'static) {
        self.scheduler.submit(RenderCommand::Call(Box::new(f)));
    }

    #[must_use]
    pub fn is_on_render_thread(&self) -> bool {
        self.scheduler.is_on_render_thread()
    }

    /// Runs `f` once, after the next frame was drawn.
    pub fn request_frame_drawn_callback(&self, f: impl FnOnce() + Send + 'static) {
        self.inner.frame_drawn.lock().push(Box::new(f));
    }

    /// Connects a listener invoked right before each frame starts.
    pub fn connect_frame_pre_draw(&self, f: impl Fn() + Send + Sync + 'static) {
        self.inner.pre_draw.lock().push(Arc::new(f));
    }

    /// Connects a listener invoked after each frame presented.
    pub fn connect_frame_post_draw(&self, f: impl Fn() + Send + Sync + 'static) {
        self.inner.post_draw.lock().push(Arc::new(f));
    }

    /// Snapshots current transforms as the previous ones; interpolated
    /// instances, canvas items and canvas lights blend between the two.
    pub fn tick(&self) {
        self.with_state(|s| {
            s.scene3d.physics_tick();
            s.scene2d.physics_tick();
        });
    }

    /// Position inside the current physics tick, `0..=1`.
    pub fn set_physics_interpolation_fraction(&self, fraction: f32) {
        self.with_state(|s| s.physics_fraction = fraction.clamp(0.0, 1.0));
    }

    /// Number of frames drawn so far.
    #[must_use]
    pub fn get_frames_drawn(&self) -> u64 {
        self.with_state(|s| s.frame)
    }

    // ------------------------------------------------------------------
    // Global configuration
    // ------------------------------------------------------------------

    pub fn set_render_loop_enabled(&self, enabled: bool) {
        debug!("render loop {}", if enabled { "enabled" } else { "disabled" });
        self.inner.config.set_render_loop_enabled(enabled);
    }

    #[must_use]
    pub fn is_render_loop_enabled(&self) -> bool {
        self.inner.config.render_loop_enabled()
    }

    pub fn set_default_clear_color(&self, color: vesper_core::Color) {
        self.inner.config.set_default_clear_color(color);
    }

    pub fn set_debug_generate_wireframes(&self, generate: bool) {
        self.inner.config.set_debug_generate_wireframes(generate);
    }

    // ------------------------------------------------------------------
    // Capability and statistics queries
    // ------------------------------------------------------------------

    #[must_use]
    pub fn has_os_feature(&self, feature: &str) -> bool {
        self.with_state(|s| s.device.capabilities().has_os_feature(feature))
    }

    fn adapter(&self) -> AdapterInfo {
        self.with_state(|s| s.device.adapter_info().clone())
    }

    #[must_use]
    pub fn get_video_adapter_name(&self) -> String {
        self.adapter().name
    }

    #[must_use]
    pub fn get_video_adapter_vendor(&self) -> String {
        self.adapter().vendor
    }

    #[must_use]
    pub fn get_video_adapter_type(&self) -> DeviceType {
        self.adapter().device_type
    }

    #[must_use]
    pub fn get_video_adapter_api_version(&self) -> String {
        self.adapter().api_version
    }

    /// Identity of the low-level device when it drives a real GPU. Always
    /// `None` on the headless device.
    #[must_use]
    pub fn get_rendering_device(&self) -> Option<AdapterInfo> {
        self.with_state(|s| s.device.is_native().then(|| s.device.adapter_info().clone()))
    }

    /// Milliseconds spent preparing the last frame before the first
    /// viewport rendered. Zero during the first frames.
    #[must_use]
    pub fn get_frame_setup_time_cpu(&self) -> f64 {
        self.with_state(|s| if s.frame < STATS_WARMUP_FRAMES { 0.0 } else { s.frame_setup_ms })
    }

    #[must_use]
    pub fn get_rendering_info(&self, info: RenderingInfo) -> u64 {
        self.with_state(|s| {
            let texture_mem = s.resources.textures.memory_usage() as u64;
            let device_mem = s.device.memory_usage() as u64;
            match info {
                RenderingInfo::TotalObjectsInFrame
                | RenderingInfo::TotalPrimitivesInFrame
                | RenderingInfo::TotalDrawCallsInFrame
                    if s.frame < STATS_WARMUP_FRAMES =>
                {
                    0
                }
                RenderingInfo::TotalObjectsInFrame => s.totals.objects,
                RenderingInfo::TotalPrimitivesInFrame => s.totals.primitives,
                RenderingInfo::TotalDrawCallsInFrame => s.totals.draw_calls,
                RenderingInfo::TextureMemUsed => texture_mem,
                RenderingInfo::BufferMemUsed => device_mem,
                RenderingInfo::VideoMemUsed => texture_mem + device_mem,
                RenderingInfo::PipelineCompilationsSurface => s.resources.shaders.program_count() as u64,
                RenderingInfo::PipelineCompilationsCanvas
                | RenderingInfo::PipelineCompilationsMesh
                | RenderingInfo::PipelineCompilationsDraw
                | RenderingInfo::PipelineCompilationsSpecialization => 0,
            }
        })
    }

    /// Live handles per kind, for leak diagnostics.
    #[must_use]
    pub fn debug_live_handles(&self, kind: RidKind) -> Vec<Rid> {
        self.inner.rids.live_of_kind(kind)
    }

    /// Freed handles whose slots the frame loop has not reclaimed yet.
    #[must_use]
    pub fn debug_pending_reclaim(&self) -> usize {
        self.scheduler.sync();
        self.inner.rids.pending_reclaim()
    }
}
