//! Vesper Render
//!
//! The rendering server proper:
//!
//! - [`RenderingServer`]: the handle-based facade every caller talks to
//! - [`viewport`]: render targets, their update gates and shadow atlases
//! - [`device`]: the low-level device trait and the headless software device
//!
//! Frames are produced by the scene and canvas renderers, which walk the
//! state in `vesper_scene` and `vesper_resources` and record device passes.
//! The scheduler decides which thread runs them.

mod canvas_renderer;
mod frame;
mod scene_renderer;
mod scheduler;
mod server;
mod state;
mod targets;

pub mod device;
pub mod viewport;

pub use device::{AdapterInfo, DeviceCapabilities, DeviceType, HeadlessDevice, RenderingDevice};
pub use server::{FrameSignal, LodIndices, RenderingInfo, RenderingServer};
pub use viewport::{
    RenderPass, Scaling3DMode, ShadowSlot, ViewportClearMode, ViewportDebugDraw, ViewportEnvironmentMode, ViewportMsaa,
    ViewportRenderInfo, ViewportRenderInfoType, ViewportScreenSpaceAa, ViewportSdfOversize, ViewportSdfScale,
    ViewportUpdateMode, ViewportVrsMode, ViewportVrsUpdateMode,
};
