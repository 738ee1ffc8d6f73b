//! `canvas_*`, `canvas_item_*`, the 2D lights and occluders, and
//! `canvas_texture_*`.

use glam::Vec2;
use smallvec::SmallVec;
use vesper_core::math::{Rect2, Transform2D};
use vesper_core::{fail_cond, Color, Rid, RidKind};
use vesper_resources::{CanvasItemTextureFilter, CanvasItemTextureRepeat, CanvasTextureChannel, NotifierCallback};
use vesper_scene::canvas::commands::Colors;
use vesper_scene::{
    CanvasCommand, CanvasGroup, CanvasLightBlendMode, CanvasLightMode, CanvasLightShadowFilter,
    CanvasOccluderPolygonCullMode, NinePatchAxisMode,
};

use super::RenderingServer;

fn to_colors(colors: &[Color]) -> Colors {
    SmallVec::from_slice(colors)
}

impl RenderingServer {
    // ------------------------------------------------------------------
    // Canvases
    // ------------------------------------------------------------------

    pub fn canvas_create(&self) -> Rid {
        self.create(RidKind::Canvas, |s, rid| s.scene2d.canvases.initialize(rid))
    }

    forward!(canvas_set_modulate => scene2d.canvases::set_modulate(color: Color));
    forward!(canvas_set_disable_scale => scene2d.canvases::set_disable_scale(disable: bool));

    forward! {
        /// Repeats a root item of the canvas every `mirroring` units, for
        /// parallax layers. A zero component disables repetition on that axis.
        canvas_set_item_mirroring => scene2d.canvases::set_item_mirroring(item: Rid, mirroring: Vec2)
    }

    /// Draws `item` and its subtree `times` extra times in each direction,
    /// offset by `size`.
    pub fn canvas_set_item_repeat(&self, item: Rid, size: Vec2, times: i32) {
        self.apply("canvas_set_item_repeat", |s| s.scene2d.items.set_repeat(item, size, times));
    }

    // ------------------------------------------------------------------
    // Canvas items
    // ------------------------------------------------------------------

    pub fn canvas_item_create(&self) -> Rid {
        self.create(RidKind::CanvasItem, |s, rid| s.scene2d.items.initialize(rid))
    }

    /// Parents `item` to a canvas or to another item. The invalid handle
    /// detaches it. Parenting that would form a cycle is refused.
    pub fn canvas_item_set_parent(&self, item: Rid, parent: Rid) {
        let ok = !parent.is_valid()
            || self.inner.rids.owns(parent, RidKind::Canvas)
            || self.inner.rids.owns(parent, RidKind::CanvasItem);
        fail_cond!(!ok, "canvas_item_set_parent: {parent:?} is neither a canvas nor a canvas item");
        self.apply("canvas_item_set_parent", |s| s.scene2d.item_set_parent(item, parent));
    }

    forward!(canvas_item_set_visible => scene2d.items::set_visible(visible: bool));
    forward!(canvas_item_set_light_mask => scene2d.items::set_light_mask(mask: u32));
    forward!(canvas_item_set_visibility_layer => scene2d.items::set_visibility_layer(layer: u32));
    forward!(canvas_item_set_transform => scene2d.items::set_transform(transform: Transform2D));
    forward!(canvas_item_set_clip => scene2d.items::set_clip(clip: bool));
    forward!(canvas_item_set_distance_field_mode => scene2d.items::set_distance_field_mode(enabled: bool));
    forward!(canvas_item_set_modulate => scene2d.items::set_modulate(color: Color));
    forward!(canvas_item_set_self_modulate => scene2d.items::set_self_modulate(color: Color));
    forward!(canvas_item_set_draw_behind_parent => scene2d.items::set_draw_behind_parent(enabled: bool));
    forward!(canvas_item_set_z_as_relative_to_parent => scene2d.items::set_z_as_relative_to_parent(enabled: bool));
    forward!(canvas_item_set_sort_children_by_y => scene2d.items::set_sort_children_by_y(enabled: bool));
    forward!(canvas_item_set_draw_index => scene2d.items::set_draw_index(index: i32));
    forward!(canvas_item_set_default_texture_filter => scene2d.items::set_default_texture_filter(filter: CanvasItemTextureFilter));
    forward!(canvas_item_set_default_texture_repeat => scene2d.items::set_default_texture_repeat(repeat: CanvasItemTextureRepeat));
    forward!(canvas_item_set_use_parent_material => scene2d.items::set_use_parent_material(enabled: bool));
    forward!(canvas_item_set_interpolated => scene2d.items::set_interpolated(interpolated: bool));
    forward!(canvas_item_set_canvas_group_mode => scene2d.items::set_canvas_group_mode(group: CanvasGroup));
    forward!(canvas_item_reset_physics_interpolation => scene2d.items::reset_physics_interpolation());

    forward! {
        /// Shifts the current transform into the previous slot, then sets the new
        /// one. Interpolated frames blend between the two.
        canvas_item_transform_physics_interpolation => scene2d.items::transform_physics_interpolation(transform: Transform2D)
    }

    forward! {
        /// Clamped to the supported z range.
        canvas_item_set_z_index => scene2d.items::set_z_index(z: i32)
    }

    forward! {
        /// Overrides the command bounds used for culling. `None` restores
        /// the computed rect.
        canvas_item_set_custom_rect => scene2d.items::set_custom_rect(rect: Option<Rect2>)
    }

    forward! {
        /// Copies the screen into the back buffer before drawing this item,
        /// limited to `rect` when given.
        canvas_item_set_copy_to_backbuffer => scene2d.items::set_copy_to_backbuffer(rect: Option<Rect2>)
    }

    pub fn canvas_item_set_material(&self, item: Rid, material: Rid) {
        if self.accepts("canvas_item_set_material", material, RidKind::Material) {
            self.apply("canvas_item_set_material", |s| s.scene2d.items.set_material(item, material));
        }
    }

    pub fn canvas_item_attach_skeleton(&self, item: Rid, skeleton: Rid) {
        if self.accepts("canvas_item_attach_skeleton", skeleton, RidKind::Skeleton) {
            self.apply("canvas_item_attach_skeleton", |s| s.scene2d.items.attach_skeleton(item, skeleton));
        }
    }

    /// Calls `on_enter` when `rect` (in item space) becomes visible in any
    /// viewport and `on_exit` when it stops being visible. `None` removes the
    /// notifier. Callbacks run after the frame, outside the server lock.
    pub fn canvas_item_set_visibility_notifier(
        &self,
        item: Rid,
        rect: Option<Rect2>,
        on_enter: Option<NotifierCallback>,
        on_exit: Option<NotifierCallback>,
    ) {
        self.apply("canvas_item_set_visibility_notifier", |s| {
            s.scene2d.items.set_visibility_notifier(item, rect, on_enter, on_exit)
        });
    }

    // ------------------------------------------------------------------
    // Draw commands
    // ------------------------------------------------------------------

    fn record(&self, op: &str, item: Rid, cmd: CanvasCommand) {
        self.apply(op, |s| s.scene2d.items.add_command(item, cmd));
    }

    /// A negative `width` draws a one-pixel line regardless of scale.
    pub fn canvas_item_add_line(&self, item: Rid, from: Vec2, to: Vec2, color: Color, width: f32, antialiased: bool) {
        self.record(
            "canvas_item_add_line",
            item,
            CanvasCommand::Line {
                from,
                to,
                color,
                width,
                antialiased,
            },
        );
    }

    /// `colors` holds one color for the whole line or one per point.
    pub fn canvas_item_add_polyline(&self, item: Rid, points: &[Vec2], colors: &[Color], width: f32, antialiased: bool) {
        self.record(
            "canvas_item_add_polyline",
            item,
            CanvasCommand::Polyline {
                points: points.to_vec(),
                colors: to_colors(colors),
                width,
                antialiased,
            },
        );
    }

    /// Disjoint segments from consecutive point pairs. `colors` holds one
    /// color or one per segment.
    pub fn canvas_item_add_multiline(&self, item: Rid, points: &[Vec2], colors: &[Color], width: f32, antialiased: bool) {
        self.record(
            "canvas_item_add_multiline",
            item,
            CanvasCommand::Multiline {
                points: points.to_vec(),
                colors: to_colors(colors),
                width,
                antialiased,
            },
        );
    }

    pub fn canvas_item_add_rect(&self, item: Rid, rect: Rect2, color: Color, antialiased: bool) {
        self.record("canvas_item_add_rect", item, CanvasCommand::Rect { rect, color, antialiased });
    }

    pub fn canvas_item_add_circle(&self, item: Rid, center: Vec2, radius: f32, color: Color, antialiased: bool) {
        self.record(
            "canvas_item_add_circle",
            item,
            CanvasCommand::Circle {
                center,
                radius,
                color,
                antialiased,
            },
        );
    }

    /// With `tile` the texture repeats at its own size instead of stretching.
    pub fn canvas_item_add_texture_rect(
        &self,
        item: Rid,
        rect: Rect2,
        texture: Rid,
        tile: bool,
        modulate: Color,
        transpose: bool,
    ) {
        self.record(
            "canvas_item_add_texture_rect",
            item,
            CanvasCommand::TextureRect {
                rect,
                texture,
                tile,
                modulate,
                transpose,
            },
        );
    }

    /// `src_rect` is in texels of `texture`.
    #[allow(clippy::too_many_arguments)]
    pub fn canvas_item_add_texture_rect_region(
        &self,
        item: Rid,
        rect: Rect2,
        texture: Rid,
        src_rect: Rect2,
        modulate: Color,
        transpose: bool,
        clip_uv: bool,
    ) {
        self.record(
            "canvas_item_add_texture_rect_region",
            item,
            CanvasCommand::TextureRectRegion {
                rect,
                texture,
                src_rect,
                modulate,
                transpose,
                clip_uv,
            },
        );
    }

    /// Region of a multi-channel signed distance field font atlas.
    #[allow(clippy::too_many_arguments)]
    pub fn canvas_item_add_msdf_texture_rect_region(
        &self,
        item: Rid,
        rect: Rect2,
        texture: Rid,
        src_rect: Rect2,
        modulate: Color,
        outline_size: i32,
        px_range: f32,
        scale: f32,
    ) {
        self.record(
            "canvas_item_add_msdf_texture_rect_region",
            item,
            CanvasCommand::MsdfTextureRectRegion {
                rect,
                texture,
                src_rect,
                modulate,
                outline_size,
                px_range,
                scale,
            },
        );
    }

    pub fn canvas_item_add_lcd_texture_rect_region(
        &self,
        item: Rid,
        rect: Rect2,
        texture: Rid,
        src_rect: Rect2,
        modulate: Color,
    ) {
        self.record(
            "canvas_item_add_lcd_texture_rect_region",
            item,
            CanvasCommand::LcdTextureRectRegion {
                rect,
                texture,
                src_rect,
                modulate,
            },
        );
    }

    /// Nine-slice `source` of `texture` into `rect`. `topleft` and
    /// `bottomright` are the margins of the fixed border.
    #[allow(clippy::too_many_arguments)]
    pub fn canvas_item_add_nine_patch(
        &self,
        item: Rid,
        rect: Rect2,
        source: Rect2,
        texture: Rid,
        topleft: Vec2,
        bottomright: Vec2,
        x_axis_mode: NinePatchAxisMode,
        y_axis_mode: NinePatchAxisMode,
        draw_center: bool,
        modulate: Color,
    ) {
        self.record(
            "canvas_item_add_nine_patch",
            item,
            CanvasCommand::NinePatch {
                rect,
                source,
                texture,
                topleft,
                bottomright,
                x_axis_mode,
                y_axis_mode,
                draw_center,
                modulate,
            },
        );
    }

    /// One to four points: a point, a line, a triangle or a quad.
    pub fn canvas_item_add_primitive(&self, item: Rid, points: &[Vec2], colors: &[Color], uvs: &[Vec2], texture: Rid) {
        self.record(
            "canvas_item_add_primitive",
            item,
            CanvasCommand::Primitive {
                points: SmallVec::from_slice(points),
                colors: to_colors(colors),
                uvs: SmallVec::from_slice(uvs),
                texture,
            },
        );
    }

    /// A simple polygon, triangulated when recorded. Polygons that cannot
    /// be triangulated are refused.
    pub fn canvas_item_add_polygon(&self, item: Rid, points: &[Vec2], colors: &[Color], uvs: &[Vec2], texture: Rid) {
        self.record(
            "canvas_item_add_polygon",
            item,
            CanvasCommand::Polygon {
                points: points.to_vec(),
                colors: to_colors(colors),
                uvs: uvs.to_vec(),
                texture,
            },
        );
    }

    /// Indexed triangles. Without indices every three points form one
    /// triangle. `bones` and `weights` hold four entries per point.
    #[allow(clippy::too_many_arguments)]
    pub fn canvas_item_add_triangle_array(
        &self,
        item: Rid,
        indices: &[u32],
        points: &[Vec2],
        colors: &[Color],
        uvs: &[Vec2],
        bones: &[u32],
        weights: &[f32],
        texture: Rid,
    ) {
        self.record(
            "canvas_item_add_triangle_array",
            item,
            CanvasCommand::TriangleArray {
                indices: indices.to_vec(),
                points: points.to_vec(),
                colors: to_colors(colors),
                uvs: uvs.to_vec(),
                bones: bones.to_vec(),
                weights: weights.to_vec(),
                texture,
            },
        );
    }

    pub fn canvas_item_add_mesh(&self, item: Rid, mesh: Rid, transform: Transform2D, modulate: Color, texture: Rid) {
        if self.accepts("canvas_item_add_mesh", mesh, RidKind::Mesh) {
            self.record(
                "canvas_item_add_mesh",
                item,
                CanvasCommand::Mesh {
                    mesh,
                    transform,
                    modulate,
                    texture,
                },
            );
        }
    }

    pub fn canvas_item_add_multimesh(&self, item: Rid, multimesh: Rid, texture: Rid) {
        if self.accepts("canvas_item_add_multimesh", multimesh, RidKind::MultiMesh) {
            self.record(
                "canvas_item_add_multimesh",
                item,
                CanvasCommand::MultiMesh { multimesh, texture },
            );
        }
    }

    pub fn canvas_item_add_particles(&self, item: Rid, particles: Rid, texture: Rid) {
        if self.accepts("canvas_item_add_particles", particles, RidKind::Particles) {
            self.record(
                "canvas_item_add_particles",
                item,
                CanvasCommand::Particles { particles, texture },
            );
        }
    }

    /// Applies `transform` to every command recorded after this one.
    pub fn canvas_item_add_set_transform(&self, item: Rid, transform: Transform2D) {
        self.record("canvas_item_add_set_transform", item, CanvasCommand::SetTransform(transform));
    }

    /// While set, the following commands ignore the item's clip rect.
    pub fn canvas_item_add_clip_ignore(&self, item: Rid, ignore: bool) {
        self.record("canvas_item_add_clip_ignore", item, CanvasCommand::ClipIgnore(ignore));
    }

    /// The following commands are only drawn while
    /// `(time + offset) % length` lies in `begin..end`.
    pub fn canvas_item_add_animation_slice(&self, item: Rid, length: f64, begin: f64, end: f64, offset: f64) {
        self.record(
            "canvas_item_add_animation_slice",
            item,
            CanvasCommand::AnimationSlice {
                length,
                begin,
                end,
                offset,
            },
        );
    }

    forward!(canvas_item_clear => scene2d.items::clear());

    /// Recorded commands, in order.
    #[must_use]
    pub fn canvas_item_get_commands(&self, item: Rid) -> Vec<CanvasCommand> {
        self.with_state(|s| s.scene2d.items.commands(item).to_vec())
    }

    /// Local bounds of the item's commands, or its custom rect when set.
    #[must_use]
    pub fn debug_canvas_item_get_rect(&self, item: Rid) -> Rect2 {
        self.with_state(|s| s.scene2d.debug_item_rect(item))
    }

    // ------------------------------------------------------------------
    // Canvas lights
    // ------------------------------------------------------------------

    pub fn canvas_light_create(&self) -> Rid {
        self.create(RidKind::CanvasLight, |s, rid| s.scene2d.lights.initialize(rid))
    }

    pub fn canvas_light_attach_to_canvas(&self, light: Rid, canvas: Rid) {
        if self.accepts("canvas_light_attach_to_canvas", canvas, RidKind::Canvas) {
            self.apply("canvas_light_attach_to_canvas", |s| s.scene2d.lights.attach_to_canvas(light, canvas));
        }
    }

    pub fn canvas_light_set_texture(&self, light: Rid, texture: Rid) {
        if self.accepts("canvas_light_set_texture", texture, RidKind::Texture) {
            self.apply("canvas_light_set_texture", |s| s.scene2d.lights.set_texture(light, texture));
        }
    }

    forward!(canvas_light_set_mode => scene2d.lights::set_mode(mode: CanvasLightMode));
    forward!(canvas_light_set_enabled => scene2d.lights::set_enabled(enabled: bool));
    forward!(canvas_light_set_texture_scale => scene2d.lights::set_texture_scale(scale: f32));
    forward!(canvas_light_set_texture_offset => scene2d.lights::set_texture_offset(offset: Vec2));
    forward!(canvas_light_set_transform => scene2d.lights::set_transform(transform: Transform2D));
    forward!(canvas_light_set_color => scene2d.lights::set_color(color: Color));
    forward!(canvas_light_set_height => scene2d.lights::set_height(height: f32));
    forward!(canvas_light_set_energy => scene2d.lights::set_energy(energy: f32));
    forward!(canvas_light_set_item_cull_mask => scene2d.lights::set_item_cull_mask(mask: u32));
    forward!(canvas_light_set_item_shadow_cull_mask => scene2d.lights::set_item_shadow_cull_mask(mask: u32));
    forward!(canvas_light_set_blend_mode => scene2d.lights::set_blend_mode(mode: CanvasLightBlendMode));
    forward!(canvas_light_set_shadow_enabled => scene2d.lights::set_shadow_enabled(enabled: bool));
    forward!(canvas_light_set_shadow_filter => scene2d.lights::set_shadow_filter(filter: CanvasLightShadowFilter));
    forward!(canvas_light_set_shadow_color => scene2d.lights::set_shadow_color(color: Color));
    forward!(canvas_light_set_shadow_smooth => scene2d.lights::set_shadow_smooth(smooth: f32));
    forward!(canvas_light_set_directional_distance => scene2d.lights::set_directional_distance(distance: f32));
    forward!(canvas_light_set_interpolated => scene2d.lights::set_interpolated(interpolated: bool));
    forward!(canvas_light_reset_physics_interpolation => scene2d.lights::reset_physics_interpolation());

    forward! {
        /// Only items whose z index lies in `min..=max` are lit.
        canvas_light_set_z_range => scene2d.lights::set_z_range(min: i32, max: i32)
    }

    forward! {
        /// Only items on canvas layers in `min..=max` are lit.
        canvas_light_set_layer_range => scene2d.lights::set_layer_range(min: i32, max: i32)
    }

    // ------------------------------------------------------------------
    // Light occluders
    // ------------------------------------------------------------------

    pub fn canvas_light_occluder_create(&self) -> Rid {
        self.create(RidKind::CanvasLightOccluder, |s, rid| s.scene2d.light_occluders.initialize(rid))
    }

    pub fn canvas_light_occluder_attach_to_canvas(&self, occluder: Rid, canvas: Rid) {
        if self.accepts("canvas_light_occluder_attach_to_canvas", canvas, RidKind::Canvas) {
            self.apply("canvas_light_occluder_attach_to_canvas", |s| {
                s.scene2d.light_occluders.attach_to_canvas(occluder, canvas)
            });
        }
    }

    pub fn canvas_light_occluder_set_polygon(&self, occluder: Rid, polygon: Rid) {
        if self.accepts("canvas_light_occluder_set_polygon", polygon, RidKind::CanvasOccluderPolygon) {
            self.apply("canvas_light_occluder_set_polygon", |s| {
                s.scene2d.light_occluders.set_polygon(occluder, polygon)
            });
        }
    }

    forward!(canvas_light_occluder_set_enabled => scene2d.light_occluders::set_enabled(enabled: bool));
    forward!(canvas_light_occluder_set_as_sdf_collision => scene2d.light_occluders::set_as_sdf_collision(enabled: bool));
    forward!(canvas_light_occluder_set_light_mask => scene2d.light_occluders::set_light_mask(mask: u32));
    forward!(canvas_light_occluder_set_transform => scene2d.light_occluders::set_transform(transform: Transform2D));
    forward!(canvas_light_occluder_set_interpolated => scene2d.light_occluders::set_interpolated(interpolated: bool));
    forward!(canvas_light_occluder_reset_physics_interpolation => scene2d.light_occluders::reset_physics_interpolation());

    // ------------------------------------------------------------------
    // Occluder polygons
    // ------------------------------------------------------------------

    pub fn canvas_occluder_polygon_create(&self) -> Rid {
        self.create(RidKind::CanvasOccluderPolygon, |s, rid| s.scene2d.occluder_polygons.initialize(rid))
    }

    /// An open shape only blocks light along its segments; a closed one
    /// also connects the last point back to the first.
    pub fn canvas_occluder_polygon_set_shape(&self, polygon: Rid, points: &[Vec2], closed: bool) {
        self.apply("canvas_occluder_polygon_set_shape", |s| {
            s.scene2d.occluder_polygons.set_shape(polygon, points.to_vec(), closed)
        });
    }

    forward!(canvas_occluder_polygon_set_cull_mode => scene2d.occluder_polygons::set_cull_mode(mode: CanvasOccluderPolygonCullMode));

    // ------------------------------------------------------------------
    // Canvas textures
    // ------------------------------------------------------------------

    pub fn canvas_texture_create(&self) -> Rid {
        self.create(RidKind::CanvasTexture, |s, rid| s.resources.canvas_textures.initialize(rid))
    }

    pub fn canvas_texture_set_channel(&self, canvas_texture: Rid, channel: CanvasTextureChannel, texture: Rid) {
        if self.accepts("canvas_texture_set_channel", texture, RidKind::Texture) {
            self.apply("canvas_texture_set_channel", |s| {
                s.resources.canvas_textures.set_channel(canvas_texture, channel, texture)
            });
        }
    }

    forward! {
        /// `shininess` is clamped to `0..=1`.
        canvas_texture_set_shading_parameters => resources.canvas_textures::set_shading_parameters(specular_color: Color, shininess: f32)
    }

    forward!(canvas_texture_set_texture_filter => resources.canvas_textures::set_texture_filter(filter: CanvasItemTextureFilter));
    forward!(canvas_texture_set_texture_repeat => resources.canvas_textures::set_texture_repeat(repeat: CanvasItemTextureRepeat));
}
