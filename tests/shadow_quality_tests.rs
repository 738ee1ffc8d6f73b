//! Shadow Quality Tests
//!
//! Tests for:
//! - Blur multiplier per soft shadow quality on point-sized lights
//! - Lights with a size keep their blur
//! - Directional lights follow the directional quality

mod common;

use common::{approx, server};
use vesper::prelude::*;

fn point_light(server: &RenderingServer) -> Rid {
    let light = server.omni_light_create();
    server.light_set_param(light, LightParam::Size, 0.0);
    server.light_set_param(light, LightParam::ShadowBlur, 1.0);
    light
}

#[test]
fn soft_quality_scales_point_light_blur() {
    let server = server();
    let light = point_light(&server);
    let cases = [
        (ShadowQuality::Hard, 1.0),
        (ShadowQuality::SoftVeryLow, 0.75),
        (ShadowQuality::SoftLow, 0.75),
        (ShadowQuality::SoftMedium, 1.0),
        (ShadowQuality::SoftHigh, 1.5),
        (ShadowQuality::SoftUltra, 2.0),
    ];
    for (quality, expected) in cases {
        server.positional_soft_shadow_filter_set_quality(quality);
        let blur = server.light_get_effective_shadow_blur(light);
        assert!(approx(blur, expected), "{quality:?}: {blur}");
    }
}

#[test]
fn sized_lights_keep_their_blur() {
    let server = server();
    let light = point_light(&server);
    server.light_set_param(light, LightParam::Size, 0.5);
    for quality in [ShadowQuality::SoftLow, ShadowQuality::SoftUltra] {
        server.positional_soft_shadow_filter_set_quality(quality);
        assert!(approx(server.light_get_effective_shadow_blur(light), 1.0));
    }
}

#[test]
fn directional_lights_use_directional_quality() {
    let server = server();
    let sun = server.directional_light_create();
    server.light_set_param(sun, LightParam::ShadowBlur, 1.0);
    server.light_set_param(sun, LightParam::Size, 0.0);

    server.positional_soft_shadow_filter_set_quality(ShadowQuality::SoftUltra);
    server.directional_soft_shadow_filter_set_quality(ShadowQuality::SoftHigh);
    assert!(approx(server.light_get_effective_shadow_blur(sun), 1.5));

    // A non-zero angular distance turns the multiplier off.
    server.light_set_param(sun, LightParam::Size, 2.0);
    assert!(approx(server.light_get_effective_shadow_blur(sun), 1.0));
}

#[test]
fn freed_light_reports_zero_blur() {
    let server = server();
    let light = point_light(&server);
    server.free_rid(light);
    assert_eq!(server.light_get_effective_shadow_blur(light), 0.0);
}
