//! Shader Store
//!
//! Shader source is opaque to the server except for two things it needs to
//! know: the `shader_type` declaration and the `uniform` declarations. Those
//! are reflected with a light-weight scan so materials can report and default
//! their parameters; everything else is handed to the backend untouched.
//!
//! Identical sources share one compiled program, keyed by an xxh3 hash of
//! the source text.

use rustc_hash::FxHashMap;
use vesper_core::math::Color;
use vesper_core::{ordinal_enum, ChangeTracker, GlobalShaderParameterType, Result, Rid, RidKind, RidOwner, ServerError, StringName, Variant};
use xxhash_rust::xxh3::xxh3_64;

ordinal_enum! {
    #[derive(Default)]
    pub enum ShaderMode {
        #[default]
        Spatial = 0,
        CanvasItem = 1,
        Particles = 2,
        Sky = 3,
        Fog = 4,
    }
}

impl ShaderMode {
    #[must_use]
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "spatial" => Some(Self::Spatial),
            "canvas_item" => Some(Self::CanvasItem),
            "particles" => Some(Self::Particles),
            "sky" => Some(Self::Sky),
            "fog" => Some(Self::Fog),
            _ => None,
        }
    }
}

/// Where a uniform's value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UniformScope {
    /// Set per material.
    #[default]
    Material,
    /// Read from the global shader parameter table.
    Global,
    /// Set per geometry instance.
    Instance,
}

/// One reflected `uniform` declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct ShaderParameterInfo {
    pub name: StringName,
    pub ty: GlobalShaderParameterType,
    pub scope: UniformScope,
    /// Hint text after the `:`, e.g. `source_color, hint_range(0, 1)`.
    pub hint: String,
    pub default: Variant,
    /// `Some(n)` for `uniform sampler2D tex[n]`.
    pub array_size: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct Shader {
    pub mode: ShaderMode,
    pub code: String,
    pub path_hint: String,
    /// `false` when the source has no recognizable `shader_type`; such shaders
    /// render through the error program.
    pub valid: bool,
    pub params: Vec<ShaderParameterInfo>,
    /// `(name, array index) -> texture`.
    pub default_textures: FxHashMap<(StringName, u32), Rid>,
    pub program: u64,
    pub changes: ChangeTracker,
}

impl Shader {
    #[must_use]
    pub fn param(&self, name: StringName) -> Option<&ShaderParameterInfo> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn params_in_scope(&self, scope: UniformScope) -> impl Iterator<Item = &ShaderParameterInfo> {
        self.params.iter().filter(move |p| p.scope == scope)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledProgram {
    pub mode: ShaderMode,
    pub uniform_count: usize,
    pub users: usize,
}

pub struct ShaderStore {
    owner: RidOwner<Shader>,
    programs: FxHashMap<u64, CompiledProgram>,
}

impl Default for ShaderStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ShaderStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            owner: RidOwner::new(RidKind::Shader),
            programs: FxHashMap::default(),
        }
    }

    pub fn initialize(&mut self, rid: Rid) {
        self.owner.initialize(rid, Shader::default());
    }

    #[must_use]
    pub fn get(&self, rid: Rid) -> Option<&Shader> {
        self.owner.get(rid)
    }

    pub fn get_mut(&mut self, rid: Rid) -> Option<&mut Shader> {
        self.owner.get_mut(rid)
    }

    #[must_use]
    pub fn owns(&self, rid: Rid) -> bool {
        self.owner.owns(rid)
    }

    pub fn free(&mut self, rid: Rid) -> Option<Shader> {
        let shader = self.owner.take(rid)?;
        self.release_program(shader.program);
        Some(shader)
    }

    /// Number of distinct compiled programs currently alive.
    #[must_use]
    pub fn program_count(&self) -> usize {
        self.programs.len()
    }

    fn release_program(&mut self, hash: u64) {
        if hash == 0 {
            return;
        }
        if let Some(program) = self.programs.get_mut(&hash) {
            program.users -= 1;
            if program.users == 0 {
                self.programs.remove(&hash);
            }
        }
    }

    /// Replaces the source, re-reflects uniforms and re-links the program.
    pub fn set_code(&mut self, rid: Rid, code: &str) -> Result<()> {
        let old_program = {
            let shader = self.owner.get(rid).ok_or(ServerError::InvalidRid(rid))?;
            shader.program
        };
        self.release_program(old_program);

        let reflection = reflect(code);
        let hash = if code.is_empty() { 0 } else { xxh3_64(code.as_bytes()) };
        if hash != 0 {
            let program = self.programs.entry(hash).or_insert_with(|| CompiledProgram {
                mode: reflection.mode.unwrap_or_default(),
                uniform_count: reflection.params.len(),
                users: 0,
            });
            program.users += 1;
        }

        let shader = self.owner.get_mut(rid).ok_or(ServerError::InvalidRid(rid))?;
        if reflection.mode.is_none() && !code.is_empty() {
            log::warn!("shader_set_code: missing or unknown shader_type in {rid:?}, using error shader");
        }
        shader.valid = reflection.mode.is_some();
        shader.mode = reflection.mode.unwrap_or_default();
        shader.params = reflection.params;
        shader.code = code.to_owned();
        shader.program = hash;
        shader.changes.changed();
        Ok(())
    }

    /// Material-scope parameters, in declaration order.
    #[must_use]
    pub fn parameter_list(&self, rid: Rid) -> Vec<ShaderParameterInfo> {
        self.owner
            .get(rid)
            .map(|s| s.params_in_scope(UniformScope::Material).cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn parameter_default(&self, rid: Rid, name: StringName) -> Variant {
        self.owner
            .get(rid)
            .and_then(|s| {
                if let Some(tex) = s.default_textures.get(&(name, 0)) {
                    return Some(Variant::Rid(*tex));
                }
                s.param(name).map(|p| p.default.clone())
            })
            .unwrap_or_default()
    }

    /// Binds a default texture to a sampler uniform. An invalid texture clears it.
    pub fn set_default_texture(&mut self, rid: Rid, name: StringName, texture: Rid, index: u32) -> Result<()> {
        let shader = self.owner.get_mut(rid).ok_or(ServerError::InvalidRid(rid))?;
        if texture.is_valid() {
            shader.default_textures.insert((name, index), texture);
        } else {
            shader.default_textures.remove(&(name, index));
        }
        shader.changes.changed();
        Ok(())
    }

    #[must_use]
    pub fn default_texture(&self, rid: Rid, name: StringName, index: u32) -> Rid {
        self.owner
            .get(rid)
            .and_then(|s| s.default_textures.get(&(name, index)).copied())
            .unwrap_or(Rid::INVALID)
    }

    /// Drops default-texture bindings pointing at a freed texture.
    pub fn purge_reference(&mut self, freed: Rid) {
        for (_, shader) in self.owner.iter_mut() {
            let before = shader.default_textures.len();
            shader.default_textures.retain(|_, tex| *tex != freed);
            if shader.default_textures.len() != before {
                shader.changes.changed();
            }
        }
    }
}

// ============================================================================
// Reflection
// ============================================================================

#[derive(Debug, Default)]
pub struct Reflection {
    pub mode: Option<ShaderMode>,
    pub params: Vec<ShaderParameterInfo>,
}

fn strip_comments(code: &str) -> String {
    let mut out = String::with_capacity(code.len());
    let mut chars = code.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '/' && chars.peek() == Some(&'/') {
            for n in chars.by_ref() {
                if n == '\n' {
                    out.push('\n');
                    break;
                }
            }
        } else if c == '/' && chars.peek() == Some(&'*') {
            chars.next();
            let mut prev = ' ';
            for n in chars.by_ref() {
                if prev == '*' && n == '/' {
                    break;
                }
                prev = n;
            }
            out.push(' ');
        } else {
            out.push(c);
        }
    }
    out
}

/// Scans `code` for the shader mode and uniform declarations.
#[must_use]
pub fn reflect(code: &str) -> Reflection {
    let mut reflection = Reflection::default();
    let clean = strip_comments(code);
    for raw in clean.split(';') {
        let stmt = raw.rsplit(['{', '}']).next().unwrap_or(raw).trim();
        if let Some(rest) = stmt.strip_prefix("shader_type") {
            reflection.mode = ShaderMode::from_keyword(rest.trim());
            continue;
        }
        if let Some(param) = parse_uniform(stmt) {
            if reflection.params.iter().all(|p| p.name != param.name) {
                reflection.params.push(param);
            }
        }
    }
    reflection
}

fn parse_uniform(stmt: &str) -> Option<ShaderParameterInfo> {
    let (decl, default_src) = match stmt.split_once('=') {
        Some((d, v)) => (d.trim(), Some(v.trim())),
        None => (stmt, None),
    };
    let (decl, hint) = match decl.split_once(':') {
        Some((d, h)) => (d.trim(), h.trim().to_owned()),
        None => (decl, String::new()),
    };

    let mut tokens = decl.split_whitespace().peekable();
    let scope = match tokens.peek().copied() {
        Some("global") => {
            tokens.next();
            UniformScope::Global
        }
        Some("instance") => {
            tokens.next();
            UniformScope::Instance
        }
        _ => UniformScope::Material,
    };
    if tokens.next()? != "uniform" {
        return None;
    }
    let mut ty_token = tokens.next()?;
    if matches!(ty_token, "lowp" | "mediump" | "highp") {
        ty_token = tokens.next()?;
    }
    let name_token = tokens.next()?;

    let is_color = hint.contains("source_color");
    let ty = parse_type(ty_token, is_color)?;
    let (name, array_size) = match name_token.split_once('[') {
        Some((n, size)) => (n, size.trim_end_matches(']').trim().parse().ok()),
        None => (name_token, None),
    };

    let default = default_src
        .and_then(|src| parse_literal(ty, src))
        .unwrap_or_else(|| ty.zero_value());

    Some(ShaderParameterInfo {
        name: StringName::new(name),
        ty,
        scope,
        hint,
        default,
        array_size,
    })
}

fn parse_type(token: &str, is_color: bool) -> Option<GlobalShaderParameterType> {
    use GlobalShaderParameterType as T;
    let ty = match token {
        "vec4" if is_color => T::Color,
        "vec3" if is_color => T::Color,
        "isampler2D" | "usampler2D" => T::Sampler2D,
        "isampler2DArray" | "usampler2DArray" => T::Sampler2DArray,
        "isampler3D" | "usampler3D" => T::Sampler3D,
        "samplerCubeArray" => T::SamplerCube,
        other => T::from_shader_name(other)?,
    };
    Some(ty)
}

fn parse_numbers(src: &str) -> Vec<f64> {
    let inner = match (src.find('('), src.rfind(')')) {
        (Some(a), Some(b)) if a < b => &src[a + 1..b],
        _ => src,
    };
    inner
        .split(',')
        .filter_map(|s| s.trim().trim_end_matches(['f', 'u']).parse::<f64>().ok())
        .collect()
}

fn parse_literal(ty: GlobalShaderParameterType, src: &str) -> Option<Variant> {
    use GlobalShaderParameterType as T;
    let src = src.trim();
    let nums = parse_numbers(src);
    let splat = |n: usize| -> Option<Vec<f32>> {
        match nums.len() {
            1 => Some(vec![nums[0] as f32; n]),
            len if len == n => Some(nums.iter().map(|v| *v as f32).collect()),
            _ => None,
        }
    };
    let value = match ty {
        T::Bool => Variant::Bool(src == "true"),
        T::Int => Variant::Int(*nums.first()? as i64),
        T::UInt => Variant::UInt(*nums.first()? as u32),
        T::Float => Variant::Float(*nums.first()?),
        T::Vec2 => {
            let v = splat(2)?;
            Variant::Vec2(glam::Vec2::new(v[0], v[1]))
        }
        T::Vec3 => {
            let v = splat(3)?;
            Variant::Vec3(glam::Vec3::new(v[0], v[1], v[2]))
        }
        T::Vec4 => {
            let v = splat(4)?;
            Variant::Vec4(glam::Vec4::new(v[0], v[1], v[2], v[3]))
        }
        T::Color => {
            let v: Vec<f32> = nums.iter().map(|v| *v as f32).collect();
            match v.len() {
                3 => Variant::Color(Color::rgb(v[0], v[1], v[2])),
                4 => Variant::Color(Color::rgba(v[0], v[1], v[2], v[3])),
                1 => Variant::Color(Color::rgba(v[0], v[0], v[0], v[0])),
                _ => return None,
            }
        }
        _ => return None,
    };
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPATIAL: &str = r"
shader_type spatial;
// comment with uniform float ignored;
uniform vec4 albedo : source_color = vec4(1.0, 0.5, 0.25, 1.0);
uniform float roughness : hint_range(0, 1) = 0.75;
uniform sampler2D albedo_tex[2];
global uniform vec3 wind;
instance uniform float tint_amount = 1.0;

void fragment() {
    ALBEDO = albedo.rgb;
}
uniform int after_function = 3;
";

    #[test]
    fn reflects_mode_and_uniforms() {
        let r = reflect(SPATIAL);
        assert_eq!(r.mode, Some(ShaderMode::Spatial));
        let names: Vec<&str> = r.params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["albedo", "roughness", "albedo_tex", "wind", "tint_amount", "after_function"]);

        let albedo = &r.params[0];
        assert_eq!(albedo.ty, GlobalShaderParameterType::Color);
        assert_eq!(albedo.default, Variant::Color(Color::rgba(1.0, 0.5, 0.25, 1.0)));
        assert_eq!(r.params[1].default, Variant::Float(0.75));
        assert_eq!(r.params[2].array_size, Some(2));
        assert_eq!(r.params[3].scope, UniformScope::Global);
        assert_eq!(r.params[4].scope, UniformScope::Instance);
        assert_eq!(r.params[5].default, Variant::Int(3));
    }

    #[test]
    fn unknown_mode_marks_invalid() {
        let r = reflect("shader_type volumetric;");
        assert!(r.mode.is_none());
    }

    #[test]
    fn identical_sources_share_a_program() {
        let alloc = vesper_core::RidAllocator::new();
        let mut store = ShaderStore::new();
        let a = alloc.alloc(RidKind::Shader);
        let b = alloc.alloc(RidKind::Shader);
        store.initialize(a);
        store.initialize(b);
        store.set_code(a, SPATIAL).unwrap();
        store.set_code(b, SPATIAL).unwrap();
        assert_eq!(store.program_count(), 1);
        store.set_code(b, "shader_type canvas_item;").unwrap();
        assert_eq!(store.program_count(), 2);
        store.free(a);
        assert_eq!(store.program_count(), 1);
    }

    #[test]
    fn parameter_list_reports_material_scope_only() {
        let alloc = vesper_core::RidAllocator::new();
        let mut store = ShaderStore::new();
        let s = alloc.alloc(RidKind::Shader);
        store.initialize(s);
        store.set_code(s, SPATIAL).unwrap();
        let list = store.parameter_list(s);
        assert_eq!(list.len(), 4);
        assert_eq!(store.parameter_default(s, StringName::new("roughness")), Variant::Float(0.75));
    }
}
