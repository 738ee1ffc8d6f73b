//! The 3D half of the scene graph: instances and the scenarios they live in.
//!
//! Instance mutations only mark cached state dirty. [`Scene3D::flush`]
//! recomputes world bounds against the resource stores and pushes them into
//! each scenario's index; every query flushes first.

use glam::Affine3A;
use log::{debug, trace};
use vesper_core::math::Aabb;
use vesper_core::{Result, Rid, RidKind, ServerError};
use vesper_resources::ResourceStores;

use crate::instance::{InstanceStore, InstanceType};
use crate::scenario::ScenarioStore;

#[derive(Default)]
pub struct Scene3D {
    pub instances: InstanceStore,
    pub scenarios: ScenarioStore,
}

impl Scene3D {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves an instance into `scenario`, or out of any scenario when
    /// `scenario` is invalid.
    pub fn instance_set_scenario(&mut self, instance: Rid, scenario: Rid) -> Result<()> {
        if scenario.is_valid() && !self.scenarios.owns(scenario) {
            return Err(ServerError::InvalidRid(scenario));
        }
        let inst = self
            .instances
            .get_mut(instance)
            .ok_or(ServerError::InvalidRid(instance))?;
        let previous = inst.scenario;
        if previous == scenario {
            return Ok(());
        }
        inst.scenario = scenario;
        inst.touch();
        if let Some(old) = self.scenarios.get_mut(previous) {
            old.instances.remove(&instance);
            old.index.remove(instance);
            old.occluders.remove(&instance);
            old.visible_notifiers.remove(&instance);
            old.changes.changed();
        }
        if let Some(new) = self.scenarios.get_mut(scenario) {
            new.instances.insert(instance);
            new.changes.changed();
        }
        trace!("instance {instance:?} moved from {previous:?} to {scenario:?}");
        Ok(())
    }

    pub fn instance_set_base(&mut self, instance: Rid, base: Rid, kind: Option<RidKind>) -> Result<()> {
        self.instances.set_base(instance, base, kind)
    }

    /// Removes an instance and every scenario-side trace of it.
    pub fn free_instance(&mut self, instance: Rid) -> bool {
        let Some(inst) = self.instances.free(instance) else {
            return false;
        };
        if let Some(sc) = self.scenarios.get_mut(inst.scenario) {
            sc.instances.remove(&instance);
            sc.index.remove(instance);
            sc.occluders.remove(&instance);
            sc.visible_notifiers.remove(&instance);
            sc.changes.changed();
        }
        self.instances.purge_reference(instance);
        true
    }

    /// Frees a scenario; its instances stay alive without a scenario.
    pub fn free_scenario(&mut self, scenario: Rid) -> bool {
        let Some(sc) = self.scenarios.free(scenario) else {
            return false;
        };
        for rid in sc.instances {
            if let Some(inst) = self.instances.get_mut(rid) {
                inst.scenario = Rid::INVALID;
                inst.touch();
            }
        }
        true
    }

    /// Drops references to a freed non-scene resource.
    pub fn purge_reference(&mut self, freed: Rid) {
        self.instances.purge_reference(freed);
        self.scenarios.purge_reference(freed);
    }

    /// Brings cached world bounds and scenario indices up to date.
    pub fn flush(&mut self, resources: &ResourceStores) {
        let mut updated = 0usize;
        for (rid, inst) in self.instances.iter_mut() {
            let version = inst.base_type.kind().map_or(0, |k| resources.version(inst.base, k));
            if !inst.aabb_dirty && version == inst.base_version {
                continue;
            }
            inst.base_version = version;
            inst.aabb_dirty = false;
            let local = inst
                .base_type
                .kind()
                .and_then(|k| resources.base_aabb(inst.base, k));
            let Some(sc) = self.scenarios.get_mut(inst.scenario) else {
                continue;
            };
            // Instances without a base still index when given a custom box.
            let indexed = local.is_some() || inst.custom_aabb.is_some();
            inst.world_aabb = inst.compute_world_aabb(local.unwrap_or(Aabb::ZERO));
            if indexed {
                sc.index.set(rid, inst.world_aabb);
            } else {
                sc.index.remove(rid);
            }
            if inst.base_type == InstanceType::Occluder {
                sc.occluders.insert(rid);
            } else {
                sc.occluders.remove(&rid);
            }
            updated += 1;
        }
        for (_, sc) in self.scenarios.iter_mut() {
            if sc.index.is_dirty() {
                sc.index.rebuild();
            }
        }
        if updated > 0 {
            debug!("flushed {updated} instance(s)");
        }
    }

    /// Advances physics interpolation: each interpolated instance's previous
    /// transform becomes its current one.
    pub fn physics_tick(&mut self) {
        for (_, inst) in self.instances.iter_mut() {
            if inst.interpolated {
                inst.prev_transform = inst.transform;
            }
        }
    }

    #[must_use]
    pub fn instance_transform(&self, instance: Rid) -> Affine3A {
        self.instances.get(instance).map_or(Affine3A::IDENTITY, |i| i.transform)
    }
}
