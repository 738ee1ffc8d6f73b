//! 3D viewport rendering.
//!
//! One call renders the scenario seen by a viewport's camera into the
//! viewport's targets:
//!
//! 1. cull (frustum, visibility ranges, occlusion)
//! 2. shadows: positional lights into the viewport atlas, directional
//!    cascades into the global atlas
//! 3. background, opaque, sky and transparent passes, with compositor
//!    effect callbacks between them
//! 4. the post chain: environment and exposure, upscale, TAA, FXAA, debanding
//!
//! Compositor callbacks run inline at their callback point, in compositor
//! order, against the internal buffers of the render in progress.

use glam::{Mat4, UVec2, Vec3, Vec4};
use log::{debug, trace, warn};
use vesper_core::math::Rect2;
use vesper_core::{Color, GlobalRenderConfig, Result, Rid, ServerError, StringName, Variant};
use vesper_resources::compositor::{CompositorEffectCallbackType as EffectPoint, CompositorEffectContext, CompositorEffectFlags};
use vesper_resources::environment::EnvironmentBg;
use vesper_resources::light::LightType;
use vesper_resources::sky::SkyGradient;
use vesper_resources::{Camera, Environment, Image, ImageFormat, LightParam, ResourceStores};
use vesper_scene::instance::Instance;
use vesper_scene::{CullParams, CullResult, InstanceType, Scene3D};

use crate::device::{DrawCall, DrawList, PassKind, PassStats, RenderingDevice, ScreenFilter, TargetFormat, TextureId};
use crate::targets::TargetCache;
use crate::viewport::shadow_atlas::{self, MAX_CASCADES};
use crate::viewport::{
    scaling, vrs, RenderPass, Viewport, ViewportDebugDraw, ViewportMsaa, ViewportRenderInfoType,
    ViewportScreenSpaceAa, ViewportVrsMode, ViewportVrsUpdateMode,
};

/// Packed draw sort key: `pipeline(14) | material(20) | depth(30)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RenderKey(u64);

impl RenderKey {
    const DEPTH_MASK: u64 = 0x3FFF_FFFF;

    fn pipeline_bits(priority: i32) -> u64 {
        (((priority + 128).clamp(0, 0x3FFF)) as u64) << 50
    }

    fn depth_bits(depth: f32) -> u64 {
        let d = if depth.is_sign_negative() { 0 } else { depth.to_bits() >> 2 };
        u64::from(d) & Self::DEPTH_MASK
    }

    /// Priority, then material, then front to back.
    #[must_use]
    pub fn opaque(priority: i32, material: Rid, depth: f32) -> Self {
        let m_bits = (u64::from(material.slot()) & 0xF_FFFF) << 30;
        Self(Self::pipeline_bits(priority) | m_bits | Self::depth_bits(depth))
    }

    /// Priority, then back to front.
    #[must_use]
    pub fn transparent(priority: i32, depth: f32) -> Self {
        Self(Self::pipeline_bits(priority) | (Self::DEPTH_MASK - Self::depth_bits(depth)))
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

/// Everything a 3D render of one viewport borrows from the server state.
pub(crate) struct SceneRenderer<'a> {
    pub device: &'a mut dyn RenderingDevice,
    pub targets: &'a mut TargetCache,
    pub resources: &'a ResourceStores,
    pub scene: &'a mut Scene3D,
    pub config: &'a GlobalRenderConfig,
}

/// Output of a 3D render besides what lands in the targets.
#[derive(Debug, Default)]
pub(crate) struct SceneOutput {
    /// Notifier instances seen by the camera.
    pub notifiers: Vec<Rid>,
}

fn albedo_of(res: &ResourceStores, material: Rid) -> Color {
    match res.materials.get_param(material, StringName::new("albedo_color")) {
        Variant::Color(c) => c,
        _ => Color::WHITE,
    }
}

fn scaled(c: Color, k: f32) -> Color {
    Color::rgba(c.r * k, c.g * k, c.b * k, c.a)
}

/// Meshes drawn by a geometry instance, with their instance counts.
fn mesh_sources(res: &ResourceStores, inst: &Instance, shadow: bool) -> Vec<(Rid, u32)> {
    let pick = |mesh: Rid| if shadow { res.meshes.shadow_source(mesh) } else { mesh };
    match inst.base_type {
        InstanceType::Mesh => vec![(pick(inst.base), 1)],
        InstanceType::Multimesh => res
            .multimeshes
            .get(inst.base)
            .map(|mm| vec![(pick(mm.mesh), mm.drawn_instances() as u32)])
            .unwrap_or_default(),
        InstanceType::Particles => res
            .particles
            .get(inst.base)
            .map(|p| {
                let count = p.active_count() as u32;
                p.draw_passes.iter().map(|m| (pick(*m), count)).collect()
            })
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

/// Appends the draws of one instance. `key` maps `(priority, material)` to
/// a sort key.
fn push_draws(
    res: &ResourceStores,
    inst: &Instance,
    shadow: bool,
    alpha: f32,
    key: &dyn Fn(i32, Rid) -> u64,
    out: &mut Vec<DrawCall>,
) {
    let transform = Mat4::from(inst.transform);
    for (mesh, instances) in mesh_sources(res, inst, shadow) {
        if instances == 0 {
            continue;
        }
        let Some(m) = res.meshes.get(mesh) else { continue };
        for (i, surface) in m.surfaces.iter().enumerate() {
            let material = [inst.material_override, inst.surface_materials.get(i).copied().unwrap_or(Rid::INVALID)]
                .into_iter()
                .find(|r| res.materials.owns(*r))
                .unwrap_or(surface.material);
            let mut passes = res.materials.pass_chain(material);
            if passes.is_empty() {
                passes.push(Rid::INVALID);
            }
            if !shadow && res.materials.owns(inst.material_overlay) {
                passes.push(inst.material_overlay);
            }
            for pass in passes {
                let priority = res.materials.get(pass).map_or(0, |p| p.render_priority);
                let mut color = albedo_of(res, pass);
                color.a *= alpha;
                out.push(DrawCall {
                    transform,
                    primitive_count: surface.primitive_count(),
                    instance_count: instances,
                    color,
                    sort_key: key(priority, pass),
                });
                if shadow {
                    break;
                }
            }
        }
    }
}

impl SceneRenderer<'_> {
    /// Renders `vp`'s 3D scene into its targets. Does nothing without a live
    /// camera and scenario.
    pub fn render(&mut self, rid: Rid, vp: &mut Viewport, env_enabled: bool) -> Result<SceneOutput> {
        let res = self.resources;
        let Some(camera) = res.cameras.get(vp.camera) else {
            return Ok(SceneOutput::default());
        };
        let Some(sc) = self.scene.scenarios.get(vp.scenario) else {
            return Ok(SceneOutput::default());
        };
        let (sc_env, sc_attributes, sc_compositor) = (sc.effective_environment(), sc.camera_attributes, sc.compositor);

        let size = vp.size;
        let plan = scaling::plan(
            vp.scaling_3d_mode,
            vp.scaling_3d_scale,
            vp.texture_mipmap_bias,
            vp.fsr_sharpness,
            size,
        );
        let aspect = size.x as f32 / size.y.max(1) as f32;
        let view_proj = camera.projection_matrix(aspect) * camera.view_matrix();
        let mut params = CullParams::new(view_proj, camera.position(), camera.forward());
        params.cull_mask = camera.cull_mask;
        params.use_occlusion = vp.use_occlusion_culling;
        params.occlusion_quality = self.config.occlusion_culling_build_quality();
        params.occlusion_rays_per_thread = self.config.occlusion_rays_per_thread();
        let cull = self.scene.cull_camera(res, vp.scenario, &params);

        let env = if env_enabled {
            let env_rid = if res.environments.owns(camera.environment) {
                camera.environment
            } else {
                sc_env
            };
            res.environments.get(env_rid)
        } else {
            None
        };
        let attributes = if res.camera_attributes.owns(camera.attributes) {
            camera.attributes
        } else {
            sc_attributes
        };
        let exposure = res.camera_attributes.get(attributes).map_or(1.0, |a| a.exposure());
        let compositor = if res.compositors.owns(camera.compositor) {
            camera.compositor
        } else {
            sc_compositor
        };
        let effects: Vec<Rid> = res.compositors.get(compositor).map(|c| c.effects.clone()).unwrap_or_default();

        let mut passes = Vec::new();
        let shadow_stats = self.render_shadows(rid, vp, &cull, camera, &params)?;
        if shadow_stats.draw_calls > 0 {
            passes.push(RenderPass::Shadows);
        }
        vp.render_info.add(
            ViewportRenderInfoType::Shadow,
            shadow_stats.objects,
            shadow_stats.primitives,
            shadow_stats.draw_calls,
        );

        let color_target = self
            .targets
            .color_of(rid)
            .ok_or(ServerError::InvalidRid(rid))?;
        let target = self.targets.internal(self.device, rid, plan.internal_size)?;

        if vp.vrs_mode != ViewportVrsMode::Disabled
            && vp.vrs_update_mode != ViewportVrsUpdateMode::Disabled
            && self.device.capabilities().supports_vrs
        {
            let source = match vp.vrs_mode {
                ViewportVrsMode::Texture => res.textures.get_2d(vp.vrs_texture),
                _ => None,
            };
            let rates = vrs::build_rate_image(source.as_ref(), plan.internal_size);
            self.targets
                .vrs(self.device, rid, vrs::rate_image_size(plan.internal_size), &rates)?;
            passes.push(RenderPass::Vrs);
        }

        if let Some(bg) = background(res, env, camera, self.config, vp.transparent_bg) {
            self.device.clear(target, bg, None)?;
        }

        let overdraw = vp.debug_draw == ViewportDebugDraw::Overdraw;
        let mut opaque = DrawList::new(PassKind::Opaque, view_proj);
        let mut transparent = DrawList::new(PassKind::Transparent, view_proj);
        for vi in cull.geometry.iter().filter(|g| !g.shadows_only) {
            let Some(inst) = self.scene.instances.get(vi.instance) else { continue };
            let alpha = 1.0 - vi.transparency;
            if vi.transparency > 0.0 || overdraw {
                let depth = vi.depth;
                push_draws(
                    res,
                    inst,
                    false,
                    alpha,
                    &|p, _| RenderKey::transparent(p, depth).get(),
                    &mut transparent.draws,
                );
            } else {
                let depth = vi.depth;
                push_draws(
                    res,
                    inst,
                    false,
                    alpha,
                    &|p, m| RenderKey::opaque(p, m, depth).get(),
                    &mut opaque.draws,
                );
            }
        }
        if overdraw {
            for d in &mut transparent.draws {
                d.color = Color::rgba(1.0, 0.5, 0.2, 0.1);
            }
        }
        opaque.sort();
        transparent.sort();

        let mut visible = PassStats::default();
        let mut fx = EffectRun {
            effects: &effects,
            viewport: rid,
            target,
            size: plan.internal_size,
            scratch: EffectScratch::default(),
        };
        self.run_effects(&mut fx, EffectPoint::PreOpaque, &mut passes)?;
        visible += self.device.submit_draw_list(target, &opaque)?;
        passes.push(RenderPass::Opaque);
        self.run_effects(&mut fx, EffectPoint::PostOpaque, &mut passes)?;
        if env.is_some_and(|e| e.background == EnvironmentBg::Sky) {
            passes.push(RenderPass::Sky);
        }
        self.run_effects(&mut fx, EffectPoint::PostSky, &mut passes)?;
        self.run_effects(&mut fx, EffectPoint::PreTransparent, &mut passes)?;
        visible += self.device.submit_draw_list(target, &transparent)?;
        passes.push(RenderPass::Transparent);
        self.run_effects(&mut fx, EffectPoint::PostTransparent, &mut passes)?;
        vp.render_info.add(
            ViewportRenderInfoType::Visible,
            visible.objects,
            visible.primitives,
            visible.draw_calls,
        );

        if let Some(env) = env {
            let post = |c: Color| env.post_process(scaled(c, exposure));
            self.device.apply_color_transform(target, &post)?;
            passes.push(RenderPass::Environment);
        } else if (exposure - 1.0).abs() > f32::EPSILON {
            self.device.apply_color_transform(target, &|c| scaled(c, exposure))?;
        }
        if target != color_target {
            trace!(
                "upscaling {}x{} -> {}x{} ({:?})",
                plan.internal_size.x, plan.internal_size.y, size.x, size.y, plan.mode
            );
            self.device
                .blit(target, color_target, Rect2::from_xywh(0.0, 0.0, size.x as f32, size.y as f32))?;
        }
        if vp.msaa_3d != ViewportMsaa::Disabled {
            passes.push(RenderPass::Msaa3D);
        }
        if vp.use_taa {
            self.device.apply_filter(color_target, ScreenFilter::Taa)?;
            passes.push(RenderPass::Taa);
        }
        if vp.screen_space_aa == ViewportScreenSpaceAa::Fxaa {
            self.device.apply_filter(color_target, ScreenFilter::Fxaa)?;
            passes.push(RenderPass::Fxaa);
        }
        if vp.use_debanding {
            self.device.apply_filter(color_target, ScreenFilter::Debanding)?;
            passes.push(RenderPass::Debanding);
        }
        self.debug_overlay(rid, vp, color_target, &mut passes)?;

        vp.last_passes.extend(passes);
        Ok(SceneOutput { notifiers: cull.notifiers })
    }

    /// Runs the effects bound to `point` in compositor order. The color
    /// buffer is read from the device only if one of them asks for it and is
    /// written back after the last one returned.
    fn run_effects(&mut self, fx: &mut EffectRun<'_>, point: EffectPoint, passes: &mut Vec<RenderPass>) -> Result<()> {
        let bound: Vec<_> = fx
            .effects
            .iter()
            .filter_map(|e| self.resources.compositor_effects.active(*e, point).map(|(cb, flags)| (*e, cb, flags)))
            .collect();
        if bound.is_empty() {
            return Ok(());
        }
        let wants = |flag: CompositorEffectFlags| bound.iter().any(|(_, _, f)| f.contains(flag));
        let mut color = if wants(CompositorEffectFlags::ACCESS_RESOLVED_COLOR) {
            Some(read_color(&*self.device, fx.target)?)
        } else {
            None
        };
        let pixels = fx.size.x as usize * fx.size.y as usize;
        for (effect, cb, flags) in &bound {
            let EffectScratch { depth, normal_roughness } = &mut fx.scratch;
            let mut ctx = CompositorEffectContext {
                viewport: fx.viewport,
                effect: *effect,
                callback_type: point,
                render_size: fx.size,
                flags: *flags,
                color: color
                    .as_mut()
                    .filter(|_| flags.contains(CompositorEffectFlags::ACCESS_RESOLVED_COLOR)),
                depth: flags
                    .contains(CompositorEffectFlags::ACCESS_RESOLVED_DEPTH)
                    .then(|| depth.get_or_insert_with(|| vec![1.0; pixels]).as_mut_slice()),
                normal_roughness: flags.contains(CompositorEffectFlags::NEEDS_ROUGHNESS).then(|| {
                    normal_roughness
                        .get_or_insert_with(|| vec![Vec4::new(0.0, 0.0, 1.0, 1.0); pixels])
                        .as_mut_slice()
                }),
            };
            trace!("viewport {:?}: compositor effect {effect:?} at {point:?}", fx.viewport);
            cb(&mut ctx);
        }
        if let Some(image) = color {
            write_color(&mut *self.device, fx.target, &image)?;
        }
        passes.push(RenderPass::CompositorEffect(point));
        Ok(())
    }

    /// Shadow maps of the lights the camera sees.
    fn render_shadows(
        &mut self,
        rid: Rid,
        vp: &mut Viewport,
        cull: &CullResult,
        camera: &Camera,
        params: &CullParams,
    ) -> Result<PassStats> {
        let res = self.resources;
        let mut stats = PassStats::default();
        let mut positional = Vec::new();
        let mut directional = Vec::new();
        for light_rid in &cull.lights {
            let Some(inst) = self.scene.instances.get(*light_rid) else { continue };
            let Some(light) = res.lights.get(inst.base) else { continue };
            if !light.shadow {
                continue;
            }
            let position = Vec3::from(inst.transform.translation);
            match light.ty {
                LightType::Directional => directional.push(*light_rid),
                LightType::Omni | LightType::Spot => {
                    let importance = light.param(LightParam::Range) / (1.0 + position.distance(params.eye));
                    positional.push((*light_rid, importance));
                }
            }
        }

        if !positional.is_empty() {
            let dropped = vp.shadow_atlas.assign(&positional);
            if !dropped.is_empty() {
                debug!("viewport {rid:?}: {} shadowed light(s) did not fit the atlas", dropped.len());
            }
            let slots = vp.shadow_atlas.slots().to_vec();
            if !slots.is_empty() {
                let atlas = self.targets.shadow_atlas(self.device, rid, vp.shadow_atlas.size())?;
                for slot in slots {
                    let Some(inst) = self.scene.instances.get(slot.light) else { continue };
                    let Some(light) = res.lights.get(inst.base) else { continue };
                    let position = Vec3::from(inst.transform.translation);
                    let direction = -Vec3::from(inst.transform.matrix3.z_axis);
                    let range = light.param(LightParam::Range);
                    let casters = self.casters_in(vp.scenario, &inst.world_aabb, light.shadow_caster_mask);
                    let views: Vec<(Mat4, Rect2)> = match light.ty {
                        LightType::Spot => vec![(
                            shadow_atlas::spot_view_proj(position, direction, light.param(LightParam::SpotAngle), range),
                            slot.rect,
                        )],
                        _ => {
                            let w = slot.rect.size.x / 3.0;
                            let h = slot.rect.size.y / 2.0;
                            shadow_atlas::omni_cube_view_projs(position, range)
                                .into_iter()
                                .enumerate()
                                .map(|(face, vp_mat)| {
                                    let x = slot.rect.position.x + (face % 3) as f32 * w;
                                    let y = slot.rect.position.y + (face / 3) as f32 * h;
                                    (vp_mat, Rect2::from_xywh(x, y, w, h))
                                })
                                .collect()
                        }
                    };
                    for (view_proj, rect) in views {
                        stats += self.submit_shadow(atlas, view_proj, rect, &casters)?;
                    }
                }
            }
        }

        if !directional.is_empty() {
            let size = self.config.directional_shadow_size();
            let atlas = self.targets.directional_atlas(self.device, size)?;
            let casters: Vec<Rid> = cull.geometry.iter().filter(|g| g.casts_shadows).map(|g| g.instance).collect();
            for light_rid in directional {
                let Some(inst) = self.scene.instances.get(light_rid) else { continue };
                let Some(light) = res.lights.get(inst.base) else { continue };
                let direction = -Vec3::from(inst.transform.matrix3.z_axis);
                let count = shadow_atlas::cascade_count(light.directional_shadow_mode);
                let max_distance = match light.param(LightParam::MaxDistance) {
                    d if d > 0.0 => d.min(camera.far),
                    _ => camera.far,
                };
                let splits = shadow_atlas::cascade_splits(
                    count,
                    [
                        light.param(LightParam::ShadowSplit1Offset),
                        light.param(LightParam::ShadowSplit2Offset),
                        light.param(LightParam::ShadowSplit3Offset),
                    ],
                    max_distance,
                );
                let mask = light.shadow_caster_mask;
                let own: Vec<Rid> = casters
                    .iter()
                    .copied()
                    .filter(|c| self.scene.instances.get(*c).is_some_and(|i| i.layer_mask & mask != 0))
                    .collect();
                let mut near = 0.0;
                for (cascade, far) in splits.iter().copied().enumerate().take(count.min(MAX_CASCADES)) {
                    let radius = ((far - near) * 0.5).max(0.01);
                    let center = params.eye + params.forward * (near + radius);
                    let view_proj = shadow_atlas::directional_view_proj(
                        direction,
                        center,
                        radius,
                        light.param(LightParam::ShadowPancakeSize),
                    );
                    let rect = shadow_atlas::cascade_rect(size, count, cascade);
                    stats += self.submit_shadow(atlas, view_proj, rect, &own)?;
                    near = far;
                }
            }
        }
        Ok(stats)
    }

    /// Shadow casters whose bounds touch `bounds`.
    fn casters_in(&self, scenario: Rid, bounds: &vesper_core::Aabb, mask: u32) -> Vec<Rid> {
        let Some(sc) = self.scene.scenarios.get(scenario) else {
            return Vec::new();
        };
        let mut hits = Vec::new();
        sc.index.query_aabb(bounds, &mut hits);
        hits.retain(|h| {
            self.scene.instances.get(*h).is_some_and(|i| {
                i.is_geometry()
                    && i.visible
                    && i.layer_mask & mask != 0
                    && i.cast_shadows != vesper_scene::ShadowCastingSetting::Off
            })
        });
        hits.sort_unstable();
        hits
    }

    fn submit_shadow(&mut self, atlas: TextureId, view_proj: Mat4, rect: Rect2, casters: &[Rid]) -> Result<PassStats> {
        let mut list = DrawList::new(PassKind::Shadow, view_proj);
        list.viewport = Some(rect);
        for caster in casters {
            let Some(inst) = self.scene.instances.get(*caster) else { continue };
            push_draws(self.resources, inst, true, 1.0, &|_, m| RenderKey::opaque(0, m, 0.0).get(), &mut list.draws);
        }
        if list.draws.is_empty() {
            return Ok(PassStats::default());
        }
        list.sort();
        self.device.submit_draw_list(atlas, &list)
    }

    /// Debug modes that replace the image with an internal buffer.
    fn debug_overlay(&mut self, rid: Rid, vp: &Viewport, target: TextureId, passes: &mut Vec<RenderPass>) -> Result<()> {
        let full = Rect2::from_xywh(0.0, 0.0, vp.size.x as f32, vp.size.y as f32);
        let source = match vp.debug_draw {
            ViewportDebugDraw::ShadowAtlas => {
                if vp.shadow_atlas.size() == 0 {
                    return Ok(());
                }
                Some(self.targets.shadow_atlas(self.device, rid, vp.shadow_atlas.size())?)
            }
            ViewportDebugDraw::DirectionalShadowAtlas => {
                Some(self.targets.directional_atlas(self.device, self.config.directional_shadow_size())?)
            }
            ViewportDebugDraw::Overdraw | ViewportDebugDraw::Wireframe | ViewportDebugDraw::Unshaded => None,
            _ => return Ok(()),
        };
        if let Some(src) = source {
            self.device.blit(src, target, full)?;
        }
        passes.push(RenderPass::DebugOverlay);
        Ok(())
    }
}

/// Compositor effects of one viewport render and the buffers they share.
struct EffectRun<'e> {
    effects: &'e [Rid],
    viewport: Rid,
    target: TextureId,
    size: UVec2,
    scratch: EffectScratch,
}

/// Depth and normal-roughness buffers, allocated when an effect first asks
/// for them. The headless device does not write them; they start cleared.
#[derive(Default)]
struct EffectScratch {
    depth: Option<Vec<f32>>,
    normal_roughness: Option<Vec<Vec4>>,
}

fn image_format(format: TargetFormat) -> ImageFormat {
    match format {
        TargetFormat::Rgba8 => ImageFormat::Rgba8,
        TargetFormat::Rgba16F => ImageFormat::Rgbah,
    }
}

fn read_color(device: &dyn RenderingDevice, target: TextureId) -> Result<Image> {
    let desc = device
        .texture_desc(target)
        .ok_or_else(|| ServerError::Device(format!("unknown render target {target:?}")))?;
    Image::new(desc.size.x, desc.size.y, false, image_format(desc.format), device.texture_read(target)?)
}

/// Writes an effect's color edits back. An image whose size or format was
/// changed by the callback is dropped.
fn write_color(device: &mut dyn RenderingDevice, target: TextureId, image: &Image) -> Result<()> {
    let desc = device
        .texture_desc(target)
        .ok_or_else(|| ServerError::Device(format!("unknown render target {target:?}")))?;
    if image.size() != desc.size || image.format() != image_format(desc.format) {
        warn!("compositor effect resized or converted the color buffer, edits dropped");
        return Ok(());
    }
    device.texture_update(target, image.data())
}

/// Color the 3D buffer is cleared to before drawing, or `None` to keep
/// what is there.
fn background(
    res: &ResourceStores,
    env: Option<&Environment>,
    camera: &Camera,
    config: &GlobalRenderConfig,
    transparent: bool,
) -> Option<Color> {
    let Some(env) = env else {
        return Some(if transparent { Color::TRANSPARENT } else { config.default_clear_color() });
    };
    if env.background == EnvironmentBg::Keep {
        return None;
    }
    if transparent {
        return Some(Color::TRANSPARENT);
    }
    let energy = env.bg_energy_multiplier;
    match env.background {
        EnvironmentBg::ClearColor => Some(config.default_clear_color()),
        EnvironmentBg::Color => Some(scaled(env.bg_color, energy)),
        EnvironmentBg::Sky => {
            let Some(sky) = res.skies.get(env.sky) else {
                return Some(config.default_clear_color());
            };
            let elevation = camera.forward().y.clamp(-1.0, 1.0).asin();
            let gradient = SkyGradient::from_material(&res.materials, sky.material);
            Some(scaled(gradient.sample(elevation), energy))
        }
        EnvironmentBg::Canvas => None,
        EnvironmentBg::CameraFeed | EnvironmentBg::Keep => Some(Color::BLACK),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opaque_keys_order_by_priority_then_depth() {
        let m = Rid::INVALID;
        assert!(RenderKey::opaque(-1, m, 100.0) < RenderKey::opaque(0, m, 1.0));
        assert!(RenderKey::opaque(0, m, 1.0) < RenderKey::opaque(0, m, 2.0));
        assert_eq!(RenderKey::opaque(0, m, -3.0), RenderKey::opaque(0, m, 0.0));
    }

    #[test]
    fn transparent_keys_sort_back_to_front() {
        assert!(RenderKey::transparent(0, 10.0) < RenderKey::transparent(0, 1.0));
        assert!(RenderKey::transparent(0, 1.0) < RenderKey::transparent(1, 10.0));
    }

    #[test]
    fn background_follows_environment_mode() {
        let res = ResourceStores::new();
        let config = GlobalRenderConfig::default();
        let cam = Camera::default();
        assert_eq!(background(&res, None, &cam, &config, false), Some(config.default_clear_color()));
        assert_eq!(background(&res, None, &cam, &config, true), Some(Color::TRANSPARENT));

        let mut env = Environment::default();
        env.background = EnvironmentBg::Color;
        env.bg_color = Color::rgb(0.5, 0.25, 1.0);
        env.bg_energy_multiplier = 2.0;
        assert_eq!(background(&res, Some(&env), &cam, &config, false), Some(Color::rgb(1.0, 0.5, 2.0)));
        env.background = EnvironmentBg::Keep;
        assert_eq!(background(&res, Some(&env), &cam, &config, true), None);
    }
}
