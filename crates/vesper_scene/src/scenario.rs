//! Scenarios
//!
//! The 3D world container: environment bindings plus the set of instances
//! placed in it and the spatial index over their world bounds.

use rustc_hash::FxHashSet;
use vesper_core::{ordinal_enum, ChangeTracker, Result, Rid, RidKind, RidOwner, ServerError};

use crate::bvh::Bvh;

ordinal_enum! {
    /// Debug visualisation applied to everything rendered from a scenario.
    #[derive(Default)]
    pub enum ScenarioDebugMode {
        #[default]
        Disabled = 0,
        Wireframe = 1,
        Overdraw = 2,
        Shadeless = 3,
    }
}

#[derive(Debug, Default)]
pub struct Scenario {
    pub environment: Rid,
    pub fallback_environment: Rid,
    pub camera_attributes: Rid,
    pub compositor: Rid,
    pub debug_mode: ScenarioDebugMode,
    pub instances: FxHashSet<Rid>,
    /// Bounds of every instance with a base, keyed by instance.
    pub index: Bvh,
    /// Instances whose base is an occluder.
    pub occluders: FxHashSet<Rid>,
    /// Notifier instances seen by the last cull, for enter/exit edges.
    pub visible_notifiers: FxHashSet<Rid>,
    pub changes: ChangeTracker,
}

impl Scenario {
    /// Environment used for rendering: the primary one, else the fallback.
    #[must_use]
    pub fn effective_environment(&self) -> Rid {
        if self.environment.is_valid() {
            self.environment
        } else {
            self.fallback_environment
        }
    }

    /// Records which notifier instances are visible now; returns the ones
    /// that became visible and the ones that stopped being visible.
    pub fn update_notifiers(&mut self, visible: &[Rid]) -> (Vec<Rid>, Vec<Rid>) {
        let now: FxHashSet<Rid> = visible.iter().copied().collect();
        let mut entered: Vec<Rid> = now.difference(&self.visible_notifiers).copied().collect();
        let mut exited: Vec<Rid> = self.visible_notifiers.difference(&now).copied().collect();
        entered.sort_unstable();
        exited.sort_unstable();
        self.visible_notifiers = now;
        (entered, exited)
    }
}

pub struct ScenarioStore {
    owner: RidOwner<Scenario>,
}

impl Default for ScenarioStore {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! scenario_binding {
    ($name:ident, $field:ident) => {
        pub fn $name(&mut self, rid: Rid, value: Rid) -> Result<()> {
            let sc = self.owner.get_mut(rid).ok_or(ServerError::InvalidRid(rid))?;
            sc.$field = value;
            sc.changes.changed();
            Ok(())
        }
    };
}

impl ScenarioStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            owner: RidOwner::new(RidKind::Scenario),
        }
    }

    pub fn initialize(&mut self, rid: Rid) {
        self.owner.initialize(rid, Scenario::default());
    }

    #[must_use]
    pub fn get(&self, rid: Rid) -> Option<&Scenario> {
        self.owner.get(rid)
    }

    pub fn get_mut(&mut self, rid: Rid) -> Option<&mut Scenario> {
        self.owner.get_mut(rid)
    }

    #[must_use]
    pub fn owns(&self, rid: Rid) -> bool {
        self.owner.owns(rid)
    }

    pub fn free(&mut self, rid: Rid) -> Option<Scenario> {
        self.owner.take(rid)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Rid, &Scenario)> {
        self.owner.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Rid, &mut Scenario)> {
        self.owner.iter_mut()
    }

    scenario_binding!(set_environment, environment);
    scenario_binding!(set_fallback_environment, fallback_environment);
    scenario_binding!(set_camera_attributes, camera_attributes);
    scenario_binding!(set_compositor, compositor);

    pub fn set_debug(&mut self, rid: Rid, mode: ScenarioDebugMode) -> Result<()> {
        let sc = self.owner.get_mut(rid).ok_or(ServerError::InvalidRid(rid))?;
        sc.debug_mode = mode;
        sc.changes.changed();
        Ok(())
    }

    /// Forgets a freed instance or a freed bound resource.
    pub fn purge_reference(&mut self, freed: Rid) {
        for (_, sc) in self.owner.iter_mut() {
            let mut touched = sc.instances.remove(&freed);
            touched |= sc.index.remove(freed);
            sc.occluders.remove(&freed);
            sc.visible_notifiers.remove(&freed);
            for r in [
                &mut sc.environment,
                &mut sc.fallback_environment,
                &mut sc.camera_attributes,
                &mut sc.compositor,
            ] {
                if *r == freed {
                    *r = Rid::INVALID;
                    touched = true;
                }
            }
            if touched {
                sc.changes.changed();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_core::RidAllocator;

    #[test]
    fn fallback_environment_applies_when_primary_unset() {
        let alloc = RidAllocator::new();
        let mut store = ScenarioStore::new();
        let s = alloc.alloc(RidKind::Scenario);
        store.initialize(s);
        let primary = alloc.alloc(RidKind::Environment);
        let fallback = alloc.alloc(RidKind::Environment);
        store.set_fallback_environment(s, fallback).unwrap();
        assert_eq!(store.get(s).unwrap().effective_environment(), fallback);
        store.set_environment(s, primary).unwrap();
        assert_eq!(store.get(s).unwrap().effective_environment(), primary);
        store.purge_reference(primary);
        assert_eq!(store.get(s).unwrap().effective_environment(), fallback);
    }

    #[test]
    fn notifier_edges() {
        let alloc = RidAllocator::new();
        let a = alloc.alloc(RidKind::Instance);
        let b = alloc.alloc(RidKind::Instance);
        let mut sc = Scenario::default();
        assert_eq!(sc.update_notifiers(&[a]), (vec![a], vec![]));
        assert_eq!(sc.update_notifiers(&[a, b]), (vec![b], vec![]));
        assert_eq!(sc.update_notifiers(&[b]), (vec![], vec![a]));
    }
}
