//! `texture_*`, `shader_*`, `material_*` and `global_shader_parameter_*`.

use log::{error, warn};
use vesper_core::{GlobalShaderParameterType, Rid, RidKind, ServerError, StringName, Variant};
use vesper_resources::shader::ShaderParameterInfo;
use vesper_resources::texture::TextureInfo;
use vesper_resources::{GlobalUniformDecl, Image, ImageFormat, TextureLayeredType};

use super::RenderingServer;
use crate::device::TextureId;

impl RenderingServer {
    // ------------------------------------------------------------------
    // Textures
    // ------------------------------------------------------------------

    pub fn texture_2d_create(&self, image: Image) -> Rid {
        self.try_create("texture_2d_create", RidKind::Texture, |s, rid| {
            s.resources.textures.initialize_2d(rid, image)
        })
    }

    /// Layer count must match `ty`: any for arrays, 6 for cubemaps, a
    /// multiple of 6 for cubemap arrays. Every layer shares size and format.
    pub fn texture_2d_layered_create(&self, layers: Vec<Image>, ty: TextureLayeredType) -> Rid {
        self.try_create("texture_2d_layered_create", RidKind::Texture, |s, rid| {
            s.resources.textures.initialize_2d_layered(rid, layers, ty)
        })
    }

    /// `data` holds `depth` slices per mip level, level-major.
    pub fn texture_3d_create(
        &self,
        format: ImageFormat,
        width: u32,
        height: u32,
        depth: u32,
        mipmaps: bool,
        data: Vec<Image>,
    ) -> Rid {
        self.try_create("texture_3d_create", RidKind::Texture, |s, rid| {
            s.resources
                .textures
                .initialize_3d(rid, format, width, height, depth, mipmaps, data)
        })
    }

    /// Proxy textures are not supported; always returns `Rid::INVALID`.
    pub fn texture_proxy_create(&self, base: Rid) -> Rid {
        warn!("texture_proxy_create: proxy textures are deprecated, {base:?} not proxied");
        Rid::INVALID
    }

    pub fn texture_proxy_update(&self, texture: Rid, proxy_to: Rid) {
        warn!("texture_proxy_update: proxy textures are deprecated, {texture:?} -> {proxy_to:?} ignored");
    }

    pub fn texture_2d_placeholder_create(&self) -> Rid {
        self.create(RidKind::Texture, |s, rid| s.resources.textures.initialize_2d_placeholder(rid))
    }

    pub fn texture_2d_layered_placeholder_create(&self, ty: TextureLayeredType) -> Rid {
        self.create(RidKind::Texture, |s, rid| {
            s.resources.textures.initialize_2d_layered_placeholder(rid, ty);
        })
    }

    pub fn texture_3d_placeholder_create(&self) -> Rid {
        self.create(RidKind::Texture, |s, rid| s.resources.textures.initialize_3d_placeholder(rid))
    }

    /// Overwrites one layer; size and format must match the texture.
    pub fn texture_2d_update(&self, texture: Rid, image: Image, layer: usize) {
        self.apply("texture_2d_update", |s| s.resources.textures.update_2d(texture, image, layer));
    }

    pub fn texture_3d_update(&self, texture: Rid, data: Vec<Image>) {
        self.apply("texture_3d_update", |s| s.resources.textures.update_3d(texture, data));
    }

    /// Moves the contents of `by` into `texture` and frees `by`. Everything
    /// referencing `texture` keeps resolving. Viewport textures can be
    /// neither side of a replacement.
    pub fn texture_replace(&self, texture: Rid, by: Rid) {
        let rids = &self.inner.rids;
        self.apply("texture_replace", |s| {
            for rid in [texture, by] {
                if let Some(viewport) = s.resources.textures.get(rid).and_then(|t| t.render_target)
                    && s.viewports.owns(viewport)
                {
                    warn!("texture_replace: {rid:?} belongs to viewport {viewport:?}");
                    return Ok(());
                }
            }
            if rids.kind_of(by) != Some(RidKind::Texture) {
                return Err(ServerError::InvalidRid(by));
            }
            s.resources.textures.replace(texture, by)?;
            if rids.retire(by, s.frame).is_none() {
                warn!("texture_replace: {by:?} was already retired");
                return Ok(());
            }
            s.targets.free_texture(s.device.as_mut(), by);
            s.purge_reference(by);
            Ok(())
        });
    }

    /// Contents of a 2D texture. Viewport textures hold the last rendered
    /// frame; the call waits for queued frames to finish first.
    #[must_use]
    pub fn texture_2d_get(&self, texture: Rid) -> Option<Image> {
        self.scheduler.sync();
        self.with_state(|s| s.resources.textures.get_2d(texture))
    }

    #[must_use]
    pub fn texture_2d_layer_get(&self, texture: Rid, layer: usize) -> Option<Image> {
        self.scheduler.sync();
        self.with_state(|s| s.resources.textures.get_layer(texture, layer))
    }

    #[must_use]
    pub fn texture_3d_get(&self, texture: Rid) -> Vec<Image> {
        self.scheduler.sync();
        self.with_state(|s| s.resources.textures.get_3d(texture))
    }

    /// Logical size used for layout. Ignored unless both sides are positive.
    pub fn texture_set_size_override(&self, texture: Rid, width: i32, height: i32) {
        self.apply("texture_set_size_override", |s| {
            s.resources.textures.set_size_override(texture, width, height)
        });
    }

    pub fn texture_set_path(&self, texture: Rid, path: &str) {
        self.with_state(|s| match s.resources.textures.get_mut(texture) {
            Some(tex) => tex.path = path.to_owned(),
            None => error!("texture_set_path: invalid handle {texture:?}"),
        });
    }

    #[must_use]
    pub fn texture_get_path(&self, texture: Rid) -> String {
        self.with_state(|s| s.resources.textures.get(texture).map(|t| t.path.clone()).unwrap_or_default())
    }

    #[must_use]
    pub fn texture_get_format(&self, texture: Rid) -> Option<ImageFormat> {
        self.with_state(|s| s.resources.textures.get(texture).map(|t| t.format))
    }

    pub fn texture_set_force_redraw_if_visible(&self, texture: Rid, enable: bool) {
        self.with_state(|s| match s.resources.textures.get_mut(texture) {
            Some(tex) => tex.force_redraw_if_visible = enable,
            None => error!("texture_set_force_redraw_if_visible: invalid handle {texture:?}"),
        });
    }

    /// Every texture with its memory footprint, largest first.
    #[must_use]
    pub fn texture_debug_usage(&self) -> Vec<TextureInfo> {
        self.with_state(|s| s.resources.textures.debug_usage())
    }

    /// Device texture behind `texture`. `None` on the headless device.
    #[must_use]
    pub fn texture_get_rd_texture(&self, texture: Rid) -> Option<TextureId> {
        self.with_state(|s| {
            if !s.device.is_native() {
                return None;
            }
            s.targets
                .mirror(s.device.as_mut(), &s.resources.textures, texture)
                .unwrap_or_else(|err| {
                    error!("texture_get_rd_texture: {err}");
                    None
                })
        })
    }

    // ------------------------------------------------------------------
    // Shaders
    // ------------------------------------------------------------------

    pub fn shader_create(&self) -> Rid {
        self.create(RidKind::Shader, |s, rid| s.resources.shaders.initialize(rid))
    }

    /// Replaces the source. Materials using the shader pick up the new
    /// parameter list on their next use.
    pub fn shader_set_code(&self, shader: Rid, code: &str) {
        self.apply("shader_set_code", |s| {
            s.resources.shaders.set_code(shader, code)?;
            s.resources.materials.mark_shader_dirty(shader);
            Ok(())
        });
    }

    #[must_use]
    pub fn shader_get_code(&self, shader: Rid) -> String {
        self.with_state(|s| s.resources.shaders.get(shader).map(|sh| sh.code.clone()).unwrap_or_default())
    }

    pub fn shader_set_path_hint(&self, shader: Rid, path: &str) {
        self.with_state(|s| match s.resources.shaders.get_mut(shader) {
            Some(sh) => sh.path_hint = path.to_owned(),
            None => error!("shader_set_path_hint: invalid handle {shader:?}"),
        });
    }

    #[must_use]
    pub fn shader_get_parameter_list(&self, shader: Rid) -> Vec<ShaderParameterInfo> {
        self.with_state(|s| s.resources.shaders.parameter_list(shader))
    }

    #[must_use]
    pub fn shader_get_parameter_default(&self, shader: Rid, name: &str) -> Variant {
        self.with_state(|s| s.resources.shaders.parameter_default(shader, StringName::new(name)))
    }

    pub fn shader_set_default_texture_parameter(&self, shader: Rid, name: &str, texture: Rid, index: u32) {
        self.apply("shader_set_default_texture_parameter", |s| {
            s.resources
                .shaders
                .set_default_texture(shader, StringName::new(name), texture, index)
        });
    }

    #[must_use]
    pub fn shader_get_default_texture_parameter(&self, shader: Rid, name: &str, index: u32) -> Rid {
        self.with_state(|s| s.resources.shaders.default_texture(shader, StringName::new(name), index))
    }

    // ------------------------------------------------------------------
    // Materials
    // ------------------------------------------------------------------

    pub fn material_create(&self) -> Rid {
        self.create(RidKind::Material, |s, rid| s.resources.materials.initialize(rid))
    }

    /// Binds a shader; `Rid::INVALID` unbinds it.
    pub fn material_set_shader(&self, material: Rid, shader: Rid) {
        if !self.accepts("material_set_shader", shader, RidKind::Shader) {
            return;
        }
        self.apply("material_set_shader", |s| s.resources.materials.set_shader(material, shader));
    }

    pub fn material_set_param(&self, material: Rid, name: &str, value: Variant) {
        self.apply("material_set_param", |s| {
            s.resources.materials.set_param(material, StringName::new(name), value)
        });
    }

    #[must_use]
    pub fn material_get_param(&self, material: Rid, name: &str) -> Variant {
        self.with_state(|s| s.resources.materials.get_param(material, StringName::new(name)))
    }

    forward! {
        /// Sort key among materials of equal transparency, `-128..=127`.
        material_set_render_priority => resources.materials::set_render_priority(priority: i32)
    }

    /// Chains a material drawn after this one. Chains that would loop back
    /// are rejected.
    pub fn material_set_next_pass(&self, material: Rid, next: Rid) {
        if !self.accepts("material_set_next_pass", next, RidKind::Material) {
            return;
        }
        self.apply("material_set_next_pass", |s| s.resources.materials.set_next_pass(material, next));
    }

    // ------------------------------------------------------------------
    // Global shader parameters
    // ------------------------------------------------------------------

    pub fn global_shader_parameter_add(&self, name: &str, ty: GlobalShaderParameterType, default: Variant) {
        self.apply("global_shader_parameter_add", |s| {
            s.resources.global_uniforms.add(StringName::new(name), ty, default)
        });
    }

    pub fn global_shader_parameter_remove(&self, name: &str) {
        self.apply("global_shader_parameter_remove", |s| {
            s.resources.global_uniforms.remove(StringName::new(name))
        });
    }

    /// Every registered name. Synchronizes with the render thread.
    #[must_use]
    pub fn global_shader_parameter_get_list(&self) -> Vec<StringName> {
        self.scheduler.sync();
        self.with_state(|s| s.resources.global_uniforms.list())
    }

    pub fn global_shader_parameter_set(&self, name: &str, value: Variant) {
        self.apply("global_shader_parameter_set", |s| {
            s.resources.global_uniforms.set(StringName::new(name), value)
        });
    }

    /// Overrides the value without touching the base one; `Variant::Nil`
    /// clears the override.
    pub fn global_shader_parameter_set_override(&self, name: &str, value: Variant) {
        self.apply("global_shader_parameter_set_override", |s| {
            s.resources.global_uniforms.set_override(StringName::new(name), value)
        });
    }

    /// Base value of a parameter. Synchronizes with the render thread.
    #[must_use]
    pub fn global_shader_parameter_get(&self, name: &str) -> Variant {
        self.scheduler.sync();
        self.with_state(|s| s.resources.global_uniforms.get(StringName::new(name)))
    }

    /// Synchronizes with the render thread.
    #[must_use]
    pub fn global_shader_parameter_get_type(&self, name: &str) -> Option<GlobalShaderParameterType> {
        self.scheduler.sync();
        self.with_state(|s| s.resources.global_uniforms.get_type(StringName::new(name)))
    }

    /// Registers every declaration, as read from project settings.
    pub fn global_shader_parameters_load_settings(&self, decls: &[GlobalUniformDecl]) {
        self.apply("global_shader_parameters_load_settings", |s| {
            s.resources.global_uniforms.load_settings(decls)
        });
    }

    pub fn global_shader_parameters_clear(&self) {
        self.with_state(|s| s.resources.global_uniforms.clear());
    }
}
