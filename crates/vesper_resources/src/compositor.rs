//! Compositors and compositor effects.
//!
//! A compositor is an ordered list of effects. Each effect runs a callback
//! at one point of the 3D pipeline and declares which intermediate buffers
//! it needs.

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use glam::{UVec2, Vec4};
use vesper_core::{ordinal_enum, ChangeTracker, Result, Rid, RidKind, ServerError};

use crate::image::Image;

ordinal_enum! {
    #[derive(Default)]
    pub enum CompositorEffectCallbackType {
        PreOpaque = 0,
        PostOpaque = 1,
        PostSky = 2,
        PreTransparent = 3,
        #[default]
        PostTransparent = 4,
        Any = -1,
    }
}

impl CompositorEffectCallbackType {
    /// Callback points in pipeline order.
    pub const PIPELINE: [CompositorEffectCallbackType; 5] = [
        Self::PreOpaque,
        Self::PostOpaque,
        Self::PostSky,
        Self::PreTransparent,
        Self::PostTransparent,
    ];
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct CompositorEffectFlags: u32 {
        const ACCESS_RESOLVED_COLOR = 1;
        const ACCESS_RESOLVED_DEPTH = 2;
        const NEEDS_MOTION_VECTORS = 4;
        const NEEDS_ROUGHNESS = 8;
        const NEEDS_SEPARATE_SPECULAR = 16;
    }
}

/// What an effect callback sees of the pass it runs in.
///
/// Buffers are present only when the effect's flags ask for them. Edits to
/// `color` land in the viewport's internal buffer before the next pass;
/// `depth` and `normal_roughness` live for one viewport render and are shared
/// by every effect of that render.
#[derive(Debug)]
pub struct CompositorEffectContext<'a> {
    pub viewport: Rid,
    pub effect: Rid,
    pub callback_type: CompositorEffectCallbackType,
    pub render_size: UVec2,
    pub flags: CompositorEffectFlags,
    /// Internal color buffer, with [`CompositorEffectFlags::ACCESS_RESOLVED_COLOR`].
    pub color: Option<&'a mut Image>,
    /// Row-major depth, `1.0` at the far plane, with
    /// [`CompositorEffectFlags::ACCESS_RESOLVED_DEPTH`].
    pub depth: Option<&'a mut [f32]>,
    /// Row-major normal (`xyz`) and roughness (`w`), with
    /// [`CompositorEffectFlags::NEEDS_ROUGHNESS`].
    pub normal_roughness: Option<&'a mut [Vec4]>,
}

/// Runs on the render thread while the frame is being drawn. It must not
/// call back into the server.
pub type CompositorEffectCallback = Arc<dyn Fn(&mut CompositorEffectContext<'_>) + Send + Sync>;

#[derive(Clone, Default)]
pub struct CompositorEffect {
    pub enabled: bool,
    pub callback_type: CompositorEffectCallbackType,
    pub callback: Option<CompositorEffectCallback>,
    pub flags: CompositorEffectFlags,
    pub changes: ChangeTracker,
}

impl fmt::Debug for CompositorEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositorEffect")
            .field("enabled", &self.enabled)
            .field("callback_type", &self.callback_type)
            .field("has_callback", &self.callback.is_some())
            .field("flags", &self.flags)
            .finish()
    }
}

resource_store!(CompositorEffectStore, CompositorEffect, RidKind::CompositorEffect);

impl CompositorEffectStore {
    pub fn initialize(&mut self, rid: Rid) {
        self.owner.initialize(
            rid,
            CompositorEffect {
                enabled: true,
                ..Default::default()
            },
        );
    }

    field_setters! {
        enabled: bool,
    }

    pub fn set_callback(
        &mut self,
        rid: Rid,
        callback_type: CompositorEffectCallbackType,
        callback: Option<CompositorEffectCallback>,
    ) -> Result<()> {
        let effect = self.state_mut(rid)?;
        effect.callback_type = callback_type;
        effect.callback = callback;
        effect.changes.changed();
        Ok(())
    }

    pub fn set_flag(&mut self, rid: Rid, flag: CompositorEffectFlags, set: bool) -> Result<()> {
        let effect = self.state_mut(rid)?;
        effect.flags.set(flag, set);
        effect.changes.changed();
        Ok(())
    }

    /// Callback and flags of `rid` if it is enabled and bound to `point`.
    #[must_use]
    pub fn active(
        &self,
        rid: Rid,
        point: CompositorEffectCallbackType,
    ) -> Option<(CompositorEffectCallback, CompositorEffectFlags)> {
        let effect = self.owner.get(rid)?;
        let matches = effect.callback_type == point || effect.callback_type == CompositorEffectCallbackType::Any;
        if !effect.enabled || !matches {
            return None;
        }
        Some((effect.callback.clone()?, effect.flags))
    }
}

#[derive(Debug, Clone, Default)]
pub struct Compositor {
    pub effects: Vec<Rid>,
    pub changes: ChangeTracker,
}

resource_store!(CompositorStore, Compositor, RidKind::Compositor);

impl CompositorStore {
    pub fn initialize(&mut self, rid: Rid) {
        self.owner.initialize(rid, Compositor::default());
    }

    pub fn set_compositor_effects(&mut self, rid: Rid, effects: Vec<Rid>, store: &CompositorEffectStore) -> Result<()> {
        if let Some(bad) = effects.iter().find(|e| !store.owns(**e)) {
            return Err(ServerError::InvalidRid(*bad));
        }
        let comp = self.state_mut(rid)?;
        comp.effects = effects;
        comp.changes.changed();
        Ok(())
    }

    /// Union of the flags of every enabled effect.
    #[must_use]
    pub fn required_flags(&self, rid: Rid, store: &CompositorEffectStore) -> CompositorEffectFlags {
        self.owner.get(rid).map_or(CompositorEffectFlags::empty(), |c| {
            c.effects
                .iter()
                .filter_map(|e| store.get(*e))
                .filter(|e| e.enabled)
                .fold(CompositorEffectFlags::empty(), |acc, e| acc | e.flags)
        })
    }

    pub fn purge_reference(&mut self, freed: Rid) {
        for (_, comp) in self.owner.iter_mut() {
            let before = comp.effects.len();
            comp.effects.retain(|e| *e != freed);
            if comp.effects.len() != before {
                comp.changes.changed();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use vesper_core::RidAllocator;

    #[test]
    fn callbacks_are_active_at_their_point_only() {
        let alloc = RidAllocator::new();
        let mut effects = CompositorEffectStore::new();
        let fx = alloc.alloc(RidKind::CompositorEffect);
        effects.initialize(fx);
        assert!(effects.active(fx, CompositorEffectCallbackType::PostSky).is_none());

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        effects
            .set_callback(
                fx,
                CompositorEffectCallbackType::PostSky,
                Some(Arc::new(move |ctx: &mut CompositorEffectContext<'_>| sink.lock().push(ctx.callback_type))),
            )
            .unwrap();
        effects.set_flag(fx, CompositorEffectFlags::ACCESS_RESOLVED_DEPTH, true).unwrap();
        let active: Vec<_> = CompositorEffectCallbackType::PIPELINE
            .into_iter()
            .filter(|p| effects.active(fx, *p).is_some())
            .collect();
        assert_eq!(active, vec![CompositorEffectCallbackType::PostSky]);

        let (cb, flags) = effects.active(fx, CompositorEffectCallbackType::PostSky).unwrap();
        assert_eq!(flags, CompositorEffectFlags::ACCESS_RESOLVED_DEPTH);
        let mut depth = vec![1.0; 4];
        cb(&mut CompositorEffectContext {
            viewport: Rid::INVALID,
            effect: fx,
            callback_type: CompositorEffectCallbackType::PostSky,
            render_size: UVec2::new(2, 2),
            flags,
            color: None,
            depth: Some(&mut depth),
            normal_roughness: None,
        });
        assert_eq!(*seen.lock(), vec![CompositorEffectCallbackType::PostSky]);

        effects.set_enabled(fx, false).unwrap();
        assert!(effects.active(fx, CompositorEffectCallbackType::PostSky).is_none());
    }

    #[test]
    fn any_binds_every_point() {
        let alloc = RidAllocator::new();
        let mut effects = CompositorEffectStore::new();
        let fx = alloc.alloc(RidKind::CompositorEffect);
        effects.initialize(fx);
        effects
            .set_callback(fx, CompositorEffectCallbackType::Any, Some(Arc::new(|_: &mut CompositorEffectContext<'_>| {})))
            .unwrap();
        for point in CompositorEffectCallbackType::PIPELINE {
            assert!(effects.active(fx, point).is_some());
        }
    }

    #[test]
    fn compositor_flags_and_purge() {
        let alloc = RidAllocator::new();
        let mut effects = CompositorEffectStore::new();
        let mut comps = CompositorStore::new();
        let a = alloc.alloc(RidKind::CompositorEffect);
        let b = alloc.alloc(RidKind::CompositorEffect);
        let c = alloc.alloc(RidKind::Compositor);
        effects.initialize(a);
        effects.initialize(b);
        comps.initialize(c);
        effects.set_flag(a, CompositorEffectFlags::NEEDS_ROUGHNESS, true).unwrap();
        effects.set_flag(b, CompositorEffectFlags::ACCESS_RESOLVED_DEPTH, true).unwrap();
        comps.set_compositor_effects(c, vec![a, b], &effects).unwrap();
        assert_eq!(
            comps.required_flags(c, &effects),
            CompositorEffectFlags::NEEDS_ROUGHNESS | CompositorEffectFlags::ACCESS_RESOLVED_DEPTH
        );
        comps.purge_reference(a);
        assert_eq!(comps.get(c).unwrap().effects, vec![b]);
        assert_eq!(CompositorEffectCallbackType::Any.ordinal(), -1);
    }
}
