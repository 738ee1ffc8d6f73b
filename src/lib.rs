//! Vesper: a handle-based rendering server.
//!
//! Callers never hold resource state. Every texture, mesh, light, viewport
//! and canvas item lives inside the [`RenderingServer`] and is addressed by
//! an opaque [`Rid`]. The member crates are re-exported here:
//!
//! - [`core`](vesper_core): handles, math, variants, errors and settings
//! - [`resources`]: the resource stores and global shader uniforms
//! - [`scene`]: scenarios, instances, culling and the 2D canvas tree
//! - [`render`]: viewports, frame scheduling, devices and the facade
//!
//! ```rust,ignore
//! use vesper::prelude::*;
//!
//! let server = RenderingServer::new(ServerSettings::default())?;
//! let canvas = server.canvas_create();
//! let item = server.canvas_item_create();
//! server.canvas_item_set_parent(item, canvas);
//! server.canvas_item_add_rect(item, Rect2::from_xywh(0.0, 0.0, 8.0, 8.0), Color::RED, false);
//! ```

pub mod prelude;

pub use vesper_core;
pub use vesper_render as render;
pub use vesper_resources as resources;
pub use vesper_scene as scene;

pub use vesper_core::{
    Aabb, Color, GlobalRenderConfig, Plane, Rect2, Result, Rid, RidKind, ServerError, ServerSettings, ThreadModel,
    Transform2D, Transform3D, Variant,
};
pub use vesper_render::{RenderingInfo, RenderingServer};
