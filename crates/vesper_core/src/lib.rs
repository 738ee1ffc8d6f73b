//! Vesper Core
//!
//! Foundational types shared by every crate of the rendering server:
//!
//! - [`rid`]: opaque generation-checked handles and the per-kind state tables
//! - [`math`]: colors, rectangles, bounding boxes, planes and frusta
//! - [`variant`]: dynamic values for shader parameters
//! - [`interner`]: interned parameter names
//! - [`errors`]: the shared error type and "log and bail" macros
//! - [`settings`] / [`quality`]: start-up options and process-wide knobs

pub mod change_tracker;
pub mod errors;
pub mod interner;
pub mod math;
pub mod ordinal;
pub mod quality;
pub mod rid;
pub mod settings;
pub mod variant;

pub use change_tracker::{ChangeTracker, MutGuard};
pub use errors::{Result, ServerError};
pub use interner::StringName;
pub use math::{Aabb, Color, Frustum, Plane, Rect2, Transform2D, Transform3D};
pub use rid::{Rid, RidAllocator, RidKind, RidOwner};
pub use settings::{GlobalRenderConfig, ServerSettings, ThreadModel};
pub use variant::{GlobalShaderParameterType, Variant};

#[doc(hidden)]
pub use log as __log;
