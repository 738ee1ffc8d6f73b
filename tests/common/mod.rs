//! Helpers shared by the integration tests.
#![allow(dead_code)]

use vesper::{Color, RenderingServer, ServerSettings, ThreadModel};

pub const EPSILON: f32 = 1e-4;

pub fn approx(a: f32, b: f32) -> bool {
    (a - b).abs() < EPSILON
}

/// Channel-wise comparison with a tolerance wide enough for 8-bit readback.
pub fn color_near(a: Color, b: Color) -> bool {
    let close = |x: f32, y: f32| (x - y).abs() < 0.02;
    close(a.r, b.r) && close(a.g, b.g) && close(a.b, b.b) && close(a.a, b.a)
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A single-threaded server on the headless device.
pub fn server() -> RenderingServer {
    init_logger();
    RenderingServer::new(ServerSettings::default()).expect("headless server starts")
}

/// A server whose frames run on a dedicated render thread.
pub fn threaded_server() -> RenderingServer {
    init_logger();
    let settings = ServerSettings {
        thread_model: ThreadModel::SeparateRenderThread,
        command_queue_capacity: 64,
        ..ServerSettings::default()
    };
    RenderingServer::new(settings).expect("threaded server starts")
}
