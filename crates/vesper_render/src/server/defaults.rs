//! Built-in resources created on first request and cached until freed.

use glam::Vec3;
use log::debug;
use vesper_core::{Color, Result, Rid, RidKind};
use vesper_resources::mesh::{arrays, primitives};
use vesper_resources::{ArrayFormat, Image, ImageFormat, PrimitiveType, SurfaceArrays};

use super::RenderingServer;
use crate::state::ServerState;

const TEST_TEXTURE_SIZE: u32 = 16;

/// 16×16 checkerboard, each quadrant tinted so orientation is visible.
fn test_pattern() -> Result<Image> {
    let n = TEST_TEXTURE_SIZE;
    let half = n / 2;
    let pixels: Vec<Color> = (0..n * n)
        .map(|i| {
            let (x, y) = (i % n, i / n);
            let tint = match (x < half, y < half) {
                (true, true) => Color::rgb(1.0, 0.3, 0.3),
                (false, true) => Color::rgb(0.3, 1.0, 0.3),
                (true, false) => Color::rgb(0.3, 0.3, 1.0),
                (false, false) => Color::rgb(1.0, 1.0, 0.3),
            };
            if (x + y) % 2 == 0 { tint } else { tint.lerp(Color::BLACK, 0.5) }
        })
        .collect();
    Image::from_colors(n, n, &pixels)
}

fn mesh_from_arrays(s: &mut ServerState, rid: Rid, arrays: &SurfaceArrays) -> Result<()> {
    let surface = arrays::create_surface_data(PrimitiveType::Triangles, arrays, &[], &[], ArrayFormat::empty())?;
    s.resources.meshes.initialize(rid);
    s.resources.meshes.add_surface(rid, surface)
}

impl RenderingServer {
    /// Returns the cached handle in `slot`, creating it with `init` first if
    /// it was never made or has been freed.
    fn cached_default(
        &self,
        op: &str,
        kind: RidKind,
        slot: impl Fn(&mut ServerState) -> &mut Rid,
        init: impl FnOnce(&mut ServerState, Rid) -> Result<()>,
    ) -> Rid {
        let existing = self.with_state(|s| *slot(s));
        if existing.is_valid() && self.inner.rids.owns(existing, kind) {
            return existing;
        }
        let rid = self.try_create(op, kind, init);
        if rid.is_valid() {
            debug!("{op}: created {rid:?}");
            self.with_state(|s| *slot(s) = rid);
        }
        rid
    }

    /// A 4×4 opaque white texture.
    pub fn get_white_texture(&self) -> Rid {
        self.cached_default(
            "get_white_texture",
            RidKind::Texture,
            |s| &mut s.defaults.white_texture,
            |s, rid| {
                let image = Image::filled(4, 4, ImageFormat::Rgba8, Color::WHITE);
                s.resources.textures.initialize_2d(rid, image)
            },
        )
    }

    pub fn get_test_texture(&self) -> Rid {
        self.cached_default(
            "get_test_texture",
            RidKind::Texture,
            |s| &mut s.defaults.test_texture,
            |s, rid| s.resources.textures.initialize_2d(rid, test_pattern()?),
        )
    }

    /// A 2×2×2 cube mesh centered on the origin.
    pub fn get_test_cube(&self) -> Rid {
        self.cached_default(
            "get_test_cube",
            RidKind::Mesh,
            |s| &mut s.defaults.test_cube,
            |s, rid| mesh_from_arrays(s, rid, &primitives::box_arrays(Vec3::splat(2.0))),
        )
    }

    /// Creates a new UV sphere mesh. Unlike the other defaults this is not
    /// cached: each call returns a fresh handle the caller owns.
    pub fn make_sphere_mesh(&self, latitudes: u32, longitudes: u32, radius: f32) -> Rid {
        self.try_create("make_sphere_mesh", RidKind::Mesh, |s, rid| {
            let arrays = primitives::sphere_arrays(latitudes.max(2), longitudes.max(3), radius);
            mesh_from_arrays(s, rid, &arrays)
        })
    }
}
