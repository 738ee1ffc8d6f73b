//! Vesper Scene
//!
//! The scene graph the rendering server draws from:
//!
//! - 3D: [`scenario`]s hold [`instance`]s indexed in a [`bvh`]; [`cull`]
//!   selects what a camera sees, with [`visibility_range`] and
//!   [`occlusion`] culling on top of the frustum test.
//! - 2D: [`canvas`] trees of items with recorded draw commands, 2D lights
//!   and occluders, flattened and tessellated for the canvas renderer.

pub mod bvh;
pub mod canvas;
pub mod cull;
pub mod instance;
pub mod occlusion;
pub mod scenario;
pub mod scene3d;
pub mod visibility_range;

pub use bvh::Bvh;
pub use canvas::lights::{
    CanvasLight, CanvasLightBlendMode, CanvasLightMode, CanvasLightShadowFilter, CanvasOccluderPolygonCullMode,
    ShadowCaster,
};
pub use canvas::tessellate::{BatchShading, CanvasBatch, CanvasVertex, ItemContext, Tessellator};
pub use canvas::tree::{DrawItem, FlattenParams, FlattenedCanvas, Scene2D};
pub use canvas::{CanvasCommand, CanvasGroup, CanvasGroupMode, NinePatchAxisMode};
pub use cull::{CullParams, CullResult, VisibleInstance};
pub use instance::{GeometryFlags, InstanceFlags, InstanceType, ShadowCastingSetting};
pub use occlusion::OcclusionBuffer;
pub use scenario::ScenarioDebugMode;
pub use scene3d::Scene3D;
pub use visibility_range::{VisibilityRange, VisibilityRangeFadeMode};
