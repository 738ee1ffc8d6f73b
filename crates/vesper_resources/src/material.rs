//! Material Store
//!
//! A material is a shader handle plus a parameter map. Materials can be
//! chained through `next_pass`; chains are kept acyclic by refusing any
//! `next_pass` that would loop back.

use rustc_hash::{FxHashMap, FxHashSet};
use vesper_core::{ChangeTracker, Result, Rid, RidKind, RidOwner, ServerError, StringName, Variant};

use crate::global_uniforms::GlobalShaderUniforms;
use crate::shader::{ShaderStore, UniformScope};

pub const RENDER_PRIORITY_MIN: i32 = -128;
pub const RENDER_PRIORITY_MAX: i32 = 127;

#[derive(Debug, Clone, Default)]
pub struct Material {
    pub shader: Rid,
    pub params: FxHashMap<StringName, Variant>,
    pub render_priority: i32,
    pub next_pass: Rid,
    pub changes: ChangeTracker,
}

pub struct MaterialStore {
    owner: RidOwner<Material>,
}

impl Default for MaterialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MaterialStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            owner: RidOwner::new(RidKind::Material),
        }
    }

    pub fn initialize(&mut self, rid: Rid) {
        self.owner.initialize(rid, Material::default());
    }

    #[must_use]
    pub fn get(&self, rid: Rid) -> Option<&Material> {
        self.owner.get(rid)
    }

    pub fn get_mut(&mut self, rid: Rid) -> Option<&mut Material> {
        self.owner.get_mut(rid)
    }

    #[must_use]
    pub fn owns(&self, rid: Rid) -> bool {
        self.owner.owns(rid)
    }

    pub fn free(&mut self, rid: Rid) -> Option<Material> {
        self.owner.take(rid)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Rid, &Material)> {
        self.owner.iter()
    }

    pub fn set_shader(&mut self, rid: Rid, shader: Rid) -> Result<()> {
        let mat = self.owner.get_mut(rid).ok_or(ServerError::InvalidRid(rid))?;
        mat.shader = shader;
        mat.changes.changed();
        Ok(())
    }

    /// Stores a parameter value; nil removes it.
    pub fn set_param(&mut self, rid: Rid, name: StringName, value: Variant) -> Result<()> {
        let mat = self.owner.get_mut(rid).ok_or(ServerError::InvalidRid(rid))?;
        if value.is_nil() {
            mat.params.remove(&name);
        } else {
            mat.params.insert(name, value);
        }
        mat.changes.changed();
        Ok(())
    }

    /// Explicitly stored value, nil when unset.
    #[must_use]
    pub fn get_param(&self, rid: Rid, name: StringName) -> Variant {
        self.owner
            .get(rid)
            .and_then(|m| m.params.get(&name).cloned())
            .unwrap_or_default()
    }

    /// Clamped to `[RENDER_PRIORITY_MIN, RENDER_PRIORITY_MAX]`.
    pub fn set_render_priority(&mut self, rid: Rid, priority: i32) -> Result<()> {
        let mat = self.owner.get_mut(rid).ok_or(ServerError::InvalidRid(rid))?;
        mat.render_priority = priority.clamp(RENDER_PRIORITY_MIN, RENDER_PRIORITY_MAX);
        mat.changes.changed();
        Ok(())
    }

    /// `true` if following `next_pass` links from `start` reaches `target`.
    fn chain_reaches(&self, start: Rid, target: Rid) -> bool {
        let mut visited = FxHashSet::default();
        let mut current = start;
        while current.is_valid() && visited.insert(current) {
            if current == target {
                return true;
            }
            current = self.owner.get(current).map_or(Rid::INVALID, |m| m.next_pass);
        }
        false
    }

    pub fn set_next_pass(&mut self, rid: Rid, next: Rid) -> Result<()> {
        if !self.owner.owns(rid) {
            return Err(ServerError::InvalidRid(rid));
        }
        if next.is_valid() {
            if !self.owner.owns(next) {
                return Err(ServerError::InvalidRid(next));
            }
            if self.chain_reaches(next, rid) {
                return Err(ServerError::CycleDetected(format!(
                    "material {rid:?} cannot use {next:?} as next pass"
                )));
            }
        }
        if let Some(mat) = self.owner.get_mut(rid) {
            mat.next_pass = next;
            mat.changes.changed();
        }
        Ok(())
    }

    /// Pass chain starting at `rid`, `rid` included.
    #[must_use]
    pub fn pass_chain(&self, rid: Rid) -> Vec<Rid> {
        let mut chain = Vec::new();
        let mut current = rid;
        while let Some(mat) = self.owner.get(current) {
            if chain.contains(&current) {
                break;
            }
            chain.push(current);
            current = mat.next_pass;
        }
        chain
    }

    /// Marks every material using `shader` as changed.
    pub fn mark_shader_dirty(&mut self, shader: Rid) {
        for (_, mat) in self.owner.iter_mut() {
            if mat.shader == shader {
                mat.changes.changed();
            }
        }
    }

    /// Drops links to a freed shader, material or texture.
    pub fn purge_reference(&mut self, freed: Rid) {
        for (_, mat) in self.owner.iter_mut() {
            let mut touched = false;
            if mat.shader == freed {
                mat.shader = Rid::INVALID;
                touched = true;
            }
            if mat.next_pass == freed {
                mat.next_pass = Rid::INVALID;
                touched = true;
            }
            let before = mat.params.len();
            mat.params.retain(|_, v| v.as_rid() != Some(freed));
            touched |= mat.params.len() != before;
            if touched {
                mat.changes.changed();
            }
        }
    }

    /// Values the shader observes: the material's own value, else the
    /// shader's default; global uniforms come from the global table.
    #[must_use]
    pub fn resolve_uniforms(
        &self,
        rid: Rid,
        shaders: &ShaderStore,
        globals: &GlobalShaderUniforms,
    ) -> Vec<(StringName, Variant)> {
        let Some(mat) = self.owner.get(rid) else {
            return Vec::new();
        };
        let Some(shader) = shaders.get(mat.shader) else {
            return Vec::new();
        };
        shader
            .params
            .iter()
            .filter_map(|p| {
                let value = match p.scope {
                    UniformScope::Material => mat
                        .params
                        .get(&p.name)
                        .cloned()
                        .or_else(|| shader.default_textures.get(&(p.name, 0)).map(|t| Variant::Rid(*t)))
                        .unwrap_or_else(|| p.default.clone()),
                    UniformScope::Global => globals.effective(p.name).cloned().unwrap_or_else(|| p.ty.zero_value()),
                    UniformScope::Instance => return None,
                };
                Some((p.name, value))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_core::{GlobalShaderParameterType, RidAllocator};

    fn setup(n: usize) -> (RidAllocator, MaterialStore, Vec<Rid>) {
        let alloc = RidAllocator::new();
        let mut store = MaterialStore::new();
        let rids = (0..n)
            .map(|_| {
                let rid = alloc.alloc(RidKind::Material);
                store.initialize(rid);
                rid
            })
            .collect();
        (alloc, store, rids)
    }

    #[test]
    fn next_pass_cycles_are_rejected() {
        let (_alloc, mut store, m) = setup(3);
        store.set_next_pass(m[0], m[1]).unwrap();
        store.set_next_pass(m[1], m[2]).unwrap();
        let err = store.set_next_pass(m[2], m[0]).unwrap_err();
        assert!(matches!(err, ServerError::CycleDetected(_)));
        assert!(store.set_next_pass(m[0], m[0]).is_err());
        assert_eq!(store.pass_chain(m[0]), vec![m[0], m[1], m[2]]);
    }

    #[test]
    fn param_round_trip_and_removal() {
        let (_alloc, mut store, m) = setup(1);
        let name = StringName::new("metallic");
        store.set_param(m[0], name, Variant::Float(0.25)).unwrap();
        assert_eq!(store.get_param(m[0], name), Variant::Float(0.25));
        store.set_param(m[0], name, Variant::Nil).unwrap();
        assert_eq!(store.get_param(m[0], name), Variant::Nil);
    }

    #[test]
    fn render_priority_is_clamped() {
        let (_alloc, mut store, m) = setup(1);
        store.set_render_priority(m[0], 500).unwrap();
        assert_eq!(store.get(m[0]).unwrap().render_priority, RENDER_PRIORITY_MAX);
    }

    #[test]
    fn shader_change_dirties_users() {
        let (alloc, mut store, m) = setup(2);
        let shader = alloc.alloc(RidKind::Shader);
        store.set_shader(m[0], shader).unwrap();
        let v0 = store.get(m[0]).unwrap().changes.version();
        let v1 = store.get(m[1]).unwrap().changes.version();
        store.mark_shader_dirty(shader);
        assert_eq!(store.get(m[0]).unwrap().changes.version(), v0 + 1);
        assert_eq!(store.get(m[1]).unwrap().changes.version(), v1);
    }

    #[test]
    fn resolves_defaults_and_globals() {
        let (alloc, mut store, m) = setup(1);
        let mut shaders = ShaderStore::new();
        let shader = alloc.alloc(RidKind::Shader);
        shaders.initialize(shader);
        shaders
            .set_code(
                shader,
                "shader_type spatial; uniform float a = 2.0; uniform float b = 3.0; global uniform float g;",
            )
            .unwrap();
        let mut globals = GlobalShaderUniforms::new();
        globals
            .add(StringName::new("g"), GlobalShaderParameterType::Float, Variant::Float(9.0))
            .unwrap();

        store.set_shader(m[0], shader).unwrap();
        store.set_param(m[0], StringName::new("a"), Variant::Float(5.0)).unwrap();
        let resolved = store.resolve_uniforms(m[0], &shaders, &globals);
        assert_eq!(
            resolved,
            vec![
                (StringName::new("a"), Variant::Float(5.0)),
                (StringName::new("b"), Variant::Float(3.0)),
                (StringName::new("g"), Variant::Float(9.0)),
            ]
        );
    }

    #[test]
    fn freeing_shader_clears_reference() {
        let (alloc, mut store, m) = setup(1);
        let shader = alloc.alloc(RidKind::Shader);
        store.set_shader(m[0], shader).unwrap();
        store.purge_reference(shader);
        assert_eq!(store.get(m[0]).unwrap().shader, Rid::INVALID);
    }
}
