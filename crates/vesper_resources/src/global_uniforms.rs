//! Global Shader Uniforms
//!
//! A process-wide `name -> (type, value, override)` table read by every
//! material whose shader declares a `global uniform`. Names are
//! case-sensitive. The effective value is the override when one is set, the
//! base value otherwise.
//!
//! Non-sampler values are packed into a flat buffer of vec4 slots that the
//! renderer uploads once per change; [`GlobalShaderUniforms::buffer_version`]
//! tells it when.

use rustc_hash::FxHashMap;
use vesper_core::{ChangeTracker, GlobalShaderParameterType, Result, ServerError, StringName, Variant};

#[derive(Debug, Clone, PartialEq)]
pub struct GlobalUniform {
    pub ty: GlobalShaderParameterType,
    pub value: Variant,
    pub override_value: Option<Variant>,
    /// First vec4 slot in the packed buffer; `None` for samplers.
    pub buffer_slot: Option<usize>,
}

impl GlobalUniform {
    #[must_use]
    pub fn effective(&self) -> &Variant {
        self.override_value.as_ref().unwrap_or(&self.value)
    }
}

/// Declaration used by [`GlobalShaderUniforms::load_settings`].
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalUniformDecl {
    pub name: String,
    pub ty: GlobalShaderParameterType,
    pub value: Variant,
}

/// Number of vec4 slots a value of `ty` occupies in the packed buffer.
#[must_use]
pub fn slot_count(ty: GlobalShaderParameterType) -> usize {
    use GlobalShaderParameterType as T;
    match ty {
        T::Mat2 | T::Transform2D => 2,
        T::Mat3 | T::Transform => 3,
        T::Mat4 => 4,
        t if t.is_sampler() => 0,
        _ => 1,
    }
}

/// Packs a value into `slots` vec4s, zero padded.
#[must_use]
pub fn pack_variant(value: &Variant, slots: usize) -> Vec<f32> {
    let b = |v: bool| if v { 1.0 } else { 0.0 };
    let mut out: Vec<f32> = match value {
        Variant::Bool(v) => vec![b(*v)],
        Variant::BVec2(v) => vec![b(v.x), b(v.y)],
        Variant::BVec3(v) => vec![b(v.x), b(v.y), b(v.z)],
        Variant::BVec4(v) => vec![b(v.x), b(v.y), b(v.z), b(v.w)],
        Variant::Int(v) => vec![*v as f32],
        Variant::IVec2(v) => v.as_vec2().to_array().to_vec(),
        Variant::IVec3(v) => v.as_vec3().to_array().to_vec(),
        Variant::IVec4(v) | Variant::Rect2i(v) => v.as_vec4().to_array().to_vec(),
        Variant::UInt(v) => vec![*v as f32],
        Variant::UVec2(v) => v.as_vec2().to_array().to_vec(),
        Variant::UVec3(v) => v.as_vec3().to_array().to_vec(),
        Variant::UVec4(v) => v.as_vec4().to_array().to_vec(),
        Variant::Float(v) => vec![*v as f32],
        Variant::Vec2(v) => v.to_array().to_vec(),
        Variant::Vec3(v) => v.to_array().to_vec(),
        Variant::Vec4(v) => v.to_array().to_vec(),
        Variant::Color(c) => c.to_array().to_vec(),
        Variant::Rect2(r) => vec![r.position.x, r.position.y, r.size.x, r.size.y],
        Variant::Mat2(m) => {
            let c = m.to_cols_array();
            vec![c[0], c[1], 0.0, 0.0, c[2], c[3], 0.0, 0.0]
        }
        Variant::Mat3(m) => {
            let c = m.to_cols_array();
            vec![c[0], c[1], c[2], 0.0, c[3], c[4], c[5], 0.0, c[6], c[7], c[8], 0.0]
        }
        Variant::Mat4(m) => m.to_cols_array().to_vec(),
        Variant::Transform2D(t) => {
            let c = t.to_cols_array();
            vec![c[0], c[1], c[2], c[3], c[4], c[5], 0.0, 0.0]
        }
        Variant::Transform3D(t) => {
            // Row-major 3x4 so each slot is one row.
            let m = glam::Mat4::from(*t).transpose().to_cols_array();
            m[..12].to_vec()
        }
        _ => Vec::new(),
    };
    out.resize(slots * 4, 0.0);
    out
}

#[derive(Debug, Default)]
pub struct GlobalShaderUniforms {
    vars: FxHashMap<StringName, GlobalUniform>,
    buffer: Vec<f32>,
    free_slots: Vec<(usize, usize)>,
    changes: ChangeTracker,
}

impl GlobalShaderUniforms {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc_slots(&mut self, count: usize) -> usize {
        if let Some(pos) = self.free_slots.iter().position(|(_, n)| *n == count) {
            return self.free_slots.swap_remove(pos).0;
        }
        let start = self.buffer.len() / 4;
        self.buffer.resize((start + count) * 4, 0.0);
        start
    }

    fn write_slot(&mut self, name: StringName) {
        let Some(var) = self.vars.get(&name) else { return };
        let Some(slot) = var.buffer_slot else { return };
        let count = slot_count(var.ty);
        let packed = pack_variant(var.effective(), count);
        self.buffer[slot * 4..(slot + count) * 4].copy_from_slice(&packed);
    }

    fn check_type(name: StringName, ty: GlobalShaderParameterType, value: &Variant) -> Result<()> {
        if ty.accepts(value) {
            Ok(())
        } else {
            Err(ServerError::InvalidArgument(format!(
                "global shader parameter '{name}' is {}, got {}",
                ty.shader_name(),
                value.type_name()
            )))
        }
    }

    /// Registers a parameter. A nil default stores the type's zero value.
    pub fn add(&mut self, name: StringName, ty: GlobalShaderParameterType, default: Variant) -> Result<()> {
        if self.vars.contains_key(&name) {
            return Err(ServerError::InvalidArgument(format!(
                "global shader parameter '{name}' already exists"
            )));
        }
        let value = if default.is_nil() { ty.zero_value() } else { default };
        Self::check_type(name, ty, &value)?;
        let count = slot_count(ty);
        let buffer_slot = (count > 0).then(|| self.alloc_slots(count));
        self.vars.insert(
            name,
            GlobalUniform {
                ty,
                value,
                override_value: None,
                buffer_slot,
            },
        );
        self.write_slot(name);
        self.changes.changed();
        Ok(())
    }

    pub fn remove(&mut self, name: StringName) -> Result<()> {
        let var = self
            .vars
            .remove(&name)
            .ok_or_else(|| ServerError::InvalidArgument(format!("global shader parameter '{name}' does not exist")))?;
        if let Some(slot) = var.buffer_slot {
            let count = slot_count(var.ty);
            self.buffer[slot * 4..(slot + count) * 4].fill(0.0);
            self.free_slots.push((slot, count));
        }
        self.changes.changed();
        Ok(())
    }

    pub fn set(&mut self, name: StringName, value: Variant) -> Result<()> {
        let var = self
            .vars
            .get_mut(&name)
            .ok_or_else(|| ServerError::InvalidArgument(format!("global shader parameter '{name}' does not exist")))?;
        Self::check_type(name, var.ty, &value)?;
        var.value = value;
        self.write_slot(name);
        self.changes.changed();
        Ok(())
    }

    /// Stores an override; a nil value clears it.
    pub fn set_override(&mut self, name: StringName, value: Variant) -> Result<()> {
        let var = self
            .vars
            .get_mut(&name)
            .ok_or_else(|| ServerError::InvalidArgument(format!("global shader parameter '{name}' does not exist")))?;
        if value.is_nil() {
            var.override_value = None;
        } else {
            Self::check_type(name, var.ty, &value)?;
            var.override_value = Some(value);
        }
        self.write_slot(name);
        self.changes.changed();
        Ok(())
    }

    /// Base value, ignoring overrides. Nil for unknown names.
    #[must_use]
    pub fn get(&self, name: StringName) -> Variant {
        self.vars.get(&name).map(|v| v.value.clone()).unwrap_or_default()
    }

    /// Value materials observe.
    #[must_use]
    pub fn effective(&self, name: StringName) -> Option<&Variant> {
        self.vars.get(&name).map(GlobalUniform::effective)
    }

    #[must_use]
    pub fn get_type(&self, name: StringName) -> Option<GlobalShaderParameterType> {
        self.vars.get(&name).map(|v| v.ty)
    }

    /// Registered names, sorted alphabetically.
    #[must_use]
    pub fn list(&self) -> Vec<StringName> {
        let mut names: Vec<StringName> = self.vars.keys().copied().collect();
        names.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Registers every declaration, replacing entries with the same name.
    pub fn load_settings(&mut self, decls: &[GlobalUniformDecl]) -> Result<()> {
        for decl in decls {
            let name = StringName::new(&decl.name);
            if self.vars.contains_key(&name) {
                self.remove(name)?;
            }
            self.add(name, decl.ty, decl.value.clone())?;
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.vars.clear();
        self.buffer.clear();
        self.free_slots.clear();
        self.changes.changed();
    }

    /// Texture bindings held by sampler parameters.
    pub fn textures(&self) -> impl Iterator<Item = (StringName, vesper_core::Rid)> + '_ {
        self.vars.iter().filter_map(|(name, v)| v.effective().as_rid().map(|rid| (*name, rid)))
    }

    /// Resets sampler parameters bound to a freed texture.
    pub fn purge_reference(&mut self, freed: vesper_core::Rid) {
        let mut touched = false;
        for var in self.vars.values_mut() {
            if var.value.as_rid() == Some(freed) {
                var.value = var.ty.zero_value();
                touched = true;
            }
            if var.override_value.as_ref().and_then(Variant::as_rid) == Some(freed) {
                var.override_value = None;
                touched = true;
            }
        }
        if touched {
            self.changes.changed();
        }
    }

    #[must_use]
    pub fn buffer(&self) -> &[f32] {
        &self.buffer
    }

    #[must_use]
    pub fn buffer_version(&self) -> u64 {
        self.changes.version()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn add_set_and_override() {
        let mut g = GlobalShaderUniforms::new();
        let wind = StringName::new("wind_dir");
        g.add(wind, GlobalShaderParameterType::Vec3, Variant::Vec3(Vec3::X)).unwrap();
        assert_eq!(g.get(wind), Variant::Vec3(Vec3::X));

        g.set_override(wind, Variant::Vec3(Vec3::Y)).unwrap();
        assert_eq!(g.get(wind), Variant::Vec3(Vec3::X), "get returns the base value");
        assert_eq!(g.effective(wind), Some(&Variant::Vec3(Vec3::Y)));
        assert_eq!(&g.buffer()[..4], &[0.0, 1.0, 0.0, 0.0]);

        g.set_override(wind, Variant::Nil).unwrap();
        assert_eq!(g.effective(wind), Some(&Variant::Vec3(Vec3::X)));
    }

    #[test]
    fn names_are_case_sensitive() {
        let mut g = GlobalShaderUniforms::new();
        g.add(StringName::new("Time"), GlobalShaderParameterType::Float, Variant::Float(1.0)).unwrap();
        assert_eq!(g.get(StringName::new("time")), Variant::Nil);
        assert!(g.get_type(StringName::new("Time")).is_some());
    }

    #[test]
    fn type_mismatch_is_rejected() {
        let mut g = GlobalShaderUniforms::new();
        let name = StringName::new("flag");
        g.add(name, GlobalShaderParameterType::Bool, Variant::Nil).unwrap();
        assert!(g.set(name, Variant::Vec2(glam::Vec2::ONE)).is_err());
        assert_eq!(g.get(name), Variant::Bool(false));
    }

    #[test]
    fn removed_slots_are_reused() {
        let mut g = GlobalShaderUniforms::new();
        let a = StringName::new("slot_a");
        let b = StringName::new("slot_b");
        g.add(a, GlobalShaderParameterType::Mat4, Variant::Nil).unwrap();
        assert_eq!(g.buffer().len(), 16);
        g.remove(a).unwrap();
        g.add(b, GlobalShaderParameterType::Mat4, Variant::Nil).unwrap();
        assert_eq!(g.buffer().len(), 16);
    }

    #[test]
    fn list_is_sorted() {
        let mut g = GlobalShaderUniforms::new();
        for n in ["zeta", "alpha", "mid"] {
            g.add(StringName::new(n), GlobalShaderParameterType::Float, Variant::Nil).unwrap();
        }
        let names: Vec<&str> = g.list().iter().map(StringName::as_str).collect();
        assert_eq!(names, ["alpha", "mid", "zeta"]);
    }
}
