//! Everything a typical caller of the server needs in one import.

pub use glam::{Affine2, Affine3A, Vec2, Vec3, Vec4};

pub use vesper_core::quality::{OcclusionCullingBuildQuality, ShadowQuality};
pub use vesper_core::{
    Aabb, Color, Plane, Rect2, Rid, RidKind, ServerError, ServerSettings, ThreadModel, Transform2D, Transform3D,
    Variant,
};
pub use vesper_render::{
    RenderingInfo, RenderingServer, ViewportClearMode, ViewportRenderInfo, ViewportRenderInfoType, ViewportUpdateMode,
};
pub use vesper_resources::{
    ArrayFormat, ArrayType, Image, ImageFormat, LightParam, MultimeshTransformFormat, PrimitiveType, SurfaceArrays,
};
pub use vesper_scene::{CanvasCommand, InstanceFlags, ShadowCastingSetting};
