//! 2D viewport rendering.
//!
//! Canvases attached to a viewport are drawn in `(layer, sublayer)` order on
//! top of whatever the clear and 3D passes left in the target. Each canvas is
//! flattened into draw items, every item is tessellated in target pixel
//! space, lit per vertex by the canvas lights that reach it, and submitted as
//! one batch list per canvas.
//!
//! An item that asks for a backbuffer copy flushes what was drawn so far and
//! copies its rect of the target into the viewport's backbuffer. Later items
//! that sample the viewport's own texture read that copy.

use glam::{Affine2, Vec2};
use log::{trace, warn};
use rustc_hash::FxHashSet;
use vesper_core::math::{Rect2, Transform2D};
use vesper_core::{Result, Rid};
use vesper_resources::{CanvasItemTextureFilter, CanvasItemTextureRepeat, ResourceStores};
use vesper_scene::{FlattenParams, ItemContext, Scene2D, ShadowCaster, Tessellator};

use crate::device::{CanvasDraw, PassStats, RenderingDevice, SamplerState, TextureId};
use crate::targets::TargetCache;
use crate::viewport::{CanvasAttachment, RenderPass, Viewport, ViewportMsaa};

/// Everything a 2D render of one viewport borrows from the server state.
pub(crate) struct CanvasRenderer<'a> {
    pub device: &'a mut dyn RenderingDevice,
    pub targets: &'a mut TargetCache,
    pub resources: &'a ResourceStores,
    pub scene: &'a Scene2D,
    /// Viewports whose texture was sampled this frame.
    pub sampled: &'a mut FxHashSet<Rid>,
    /// Items whose notifier rect was on screen.
    pub visible_notifiers: &'a mut FxHashSet<Rid>,
    pub time: f64,
    pub fraction: f32,
}

/// What a 2D render produced besides pixels.
#[derive(Debug, Default)]
pub(crate) struct CanvasOutput {
    pub stats: PassStats,
    pub passes: Vec<RenderPass>,
}

fn sampler_for(filter: CanvasItemTextureFilter, repeat: CanvasItemTextureRepeat) -> SamplerState {
    SamplerState {
        nearest: filter.is_nearest(),
        repeat: matches!(repeat, CanvasItemTextureRepeat::Enabled | CanvasItemTextureRepeat::Mirror),
        mirror: repeat == CanvasItemTextureRepeat::Mirror,
    }
}

/// Canvas-to-pixel transform of one attachment.
fn canvas_transform(vp: &Viewport, attachment: &CanvasAttachment, disable_scale: bool) -> Transform2D {
    let attached = if disable_scale {
        Affine2::from_translation(attachment.transform.translation)
    } else {
        attachment.transform
    };
    vp.global_canvas_transform * attached
}

fn snap(xform: Transform2D) -> Transform2D {
    let mut snapped = xform;
    snapped.translation = xform.translation.round();
    snapped
}

impl CanvasRenderer<'_> {
    /// Draws every canvas attached to `vp` into `target`.
    pub fn render(&mut self, rid: Rid, vp: &Viewport, target: TextureId) -> Result<CanvasOutput> {
        let mut out = CanvasOutput::default();
        let mut backbuffer = None;
        let view = Rect2::from_xywh(0.0, 0.0, vp.size.x as f32, vp.size.y as f32);
        let scene = self.scene;
        let res = self.resources;

        for attachment in vp.sorted_canvases() {
            let Some(canvas) = scene.canvases.get(attachment.canvas) else { continue };
            let mut xform = canvas_transform(vp, &attachment, canvas.disable_scale);
            if vp.snap_2d_transforms_to_pixel {
                xform = snap(xform);
            }
            let inverse = xform.inverse();
            let params = FlattenParams {
                cull_rect: Some(view.transformed(&inverse)),
                visibility_mask: vp.canvas_cull_mask,
                fraction: self.fraction,
                texture_filter: vp.texture_filter.resolve(CanvasItemTextureFilter::Linear),
                texture_repeat: vp.texture_repeat.resolve(CanvasItemTextureRepeat::Disabled),
            };
            let flat = scene.flatten(attachment.canvas, &params);
            for (item, rect) in &flat.notifiers {
                if rect.transformed(&xform).intersects(&view) {
                    self.visible_notifiers.insert(*item);
                }
            }
            if flat.items.is_empty() {
                continue;
            }

            let lights: Vec<Rid> = scene.lights.lights_of(attachment.canvas);
            let caster = ShadowCaster::new(attachment.canvas, &scene.light_occluders, &scene.occluder_polygons);
            let mut draws = Vec::new();
            let mut stats = PassStats::default();
            for item in &flat.items {
                if let Some(rect) = item.copy_to_backbuffer {
                    stats += self.device.submit_canvas(target, &draws)?;
                    draws.clear();
                    let rect = rect.transformed(&xform);
                    let rect = if rect.has_area() { rect } else { view };
                    let id = self.targets.backbuffer(self.device, rid)?;
                    self.device.copy_rect(target, id, rect)?;
                    trace!("item {:?} copied {rect:?} to the backbuffer", item.item);
                    backbuffer = Some(id);
                    out.passes.push(RenderPass::BackbufferCopy);
                }
                let mut item_xform = xform * item.transform;
                if vp.snap_2d_transforms_to_pixel {
                    item_xform = snap(item_xform);
                }
                let ctx = ItemContext {
                    transform: item_xform,
                    modulate: item.modulate,
                    clip: item.clip.map(|c| c.transformed(&xform)),
                    skeleton: item.skeleton,
                    time: self.time,
                };
                let mut tess = Tessellator::new(res);
                tess.add_item(scene.items.commands(item.item), &ctx);
                let sampler = sampler_for(item.texture_filter, item.texture_repeat);
                let reaching: Vec<_> = lights
                    .iter()
                    .filter_map(|l| scene.lights.get(*l))
                    .filter(|l| l.affects(item.z, attachment.layer, item.light_mask))
                    .collect();

                for mut batch in tess.finish() {
                    if vp.snap_2d_vertices_to_pixel {
                        for v in &mut batch.vertices {
                            v.position = v.position.round();
                        }
                    }
                    for light in &reaching {
                        for v in &mut batch.vertices {
                            let point: Vec2 = inverse.transform_point2(v.position);
                            let shadowed = light.shadow_enabled && caster.is_shadowed(light, point);
                            v.color = light.shade(v.color, point, shadowed);
                        }
                    }
                    let texture = match self.resolve_texture(batch.texture, target, backbuffer) {
                        Ok(texture) => texture,
                        Err(err) => {
                            warn!("canvas item {:?}: texture {:?} skipped: {err}", item.item, batch.texture);
                            continue;
                        }
                    };
                    draws.push(CanvasDraw {
                        texture,
                        sampler,
                        shading: batch.shading,
                        clip: batch.clip,
                        vertices: batch.vertices,
                        indices: batch.indices,
                    });
                }
            }
            stats += self.device.submit_canvas(target, &draws)?;
            stats.objects = flat.items.len() as u64;
            out.stats += stats;
        }

        out.passes.push(RenderPass::Canvas);
        if vp.msaa_2d != ViewportMsaa::Disabled {
            out.passes.push(RenderPass::Msaa2D);
        }
        Ok(out)
    }

    /// Device texture a batch samples. Viewport textures map onto the live
    /// render target. A viewport sampling itself reads its backbuffer copy
    /// when one was taken this frame.
    fn resolve_texture(
        &mut self,
        texture: Rid,
        target: TextureId,
        backbuffer: Option<TextureId>,
    ) -> Result<Option<TextureId>> {
        if !texture.is_valid() {
            return Ok(None);
        }
        let textures = &self.resources.textures;
        if let Some(viewport) = textures.get(texture).and_then(|t| t.render_target) {
            self.sampled.insert(viewport);
            let id = match self.targets.color_of(viewport) {
                Some(id) if id == target => backbuffer,
                other => other,
            };
            if id.is_none() {
                trace!("viewport texture {texture:?} has no usable target this frame");
            }
            return Ok(id);
        }
        self.targets.mirror(self.device, textures, texture)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeat_and_filter_map_to_sampler() {
        let s = sampler_for(CanvasItemTextureFilter::Nearest, CanvasItemTextureRepeat::Mirror);
        assert!(s.nearest && s.repeat && s.mirror);
        let s = sampler_for(CanvasItemTextureFilter::Linear, CanvasItemTextureRepeat::Disabled);
        assert_eq!(s, SamplerState::default());
    }

    #[test]
    fn disable_scale_keeps_translation_only() {
        let vp = Viewport::default();
        let attachment = CanvasAttachment {
            canvas: Rid::INVALID,
            transform: Affine2::from_scale_angle_translation(Vec2::splat(2.0), 0.0, Vec2::new(5.0, 6.0)),
            layer: 0,
            sublayer: 0,
        };
        let t = canvas_transform(&vp, &attachment, true);
        assert_eq!(t.transform_point2(Vec2::ONE), Vec2::new(6.0, 7.0));
        let t = canvas_transform(&vp, &attachment, false);
        assert_eq!(t.transform_point2(Vec2::ONE), Vec2::new(7.0, 8.0));
    }
}
