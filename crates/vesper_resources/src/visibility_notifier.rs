//! Visibility notifiers: a box whose entering and leaving the view of any
//! camera fires callbacks on the render thread.

use std::fmt;
use std::sync::Arc;

use glam::Vec3;
use vesper_core::math::Aabb;
use vesper_core::{ChangeTracker, Result, Rid, RidKind};

/// Callback invoked on the render thread.
pub type NotifierCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone)]
pub struct VisibilityNotifier {
    pub aabb: Aabb,
    pub on_enter: Option<NotifierCallback>,
    pub on_exit: Option<NotifierCallback>,
    pub changes: ChangeTracker,
}

impl Default for VisibilityNotifier {
    fn default() -> Self {
        Self {
            aabb: Aabb::from_center_extents(Vec3::ZERO, Vec3::ONE),
            on_enter: None,
            on_exit: None,
            changes: ChangeTracker::new(),
        }
    }
}

impl fmt::Debug for VisibilityNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisibilityNotifier")
            .field("aabb", &self.aabb)
            .field("on_enter", &self.on_enter.is_some())
            .field("on_exit", &self.on_exit.is_some())
            .finish()
    }
}

resource_store!(VisibilityNotifierStore, VisibilityNotifier, RidKind::VisibilityNotifier);

impl VisibilityNotifierStore {
    pub fn initialize(&mut self, rid: Rid) {
        self.owner.initialize(rid, VisibilityNotifier::default());
    }

    field_setters! {
        aabb: Aabb,
    }

    pub fn set_callbacks(
        &mut self,
        rid: Rid,
        on_enter: Option<NotifierCallback>,
        on_exit: Option<NotifierCallback>,
    ) -> Result<()> {
        let n = self.state_mut(rid)?;
        n.on_enter = on_enter;
        n.on_exit = on_exit;
        Ok(())
    }

    /// Fires the enter or exit callback of `rid`, if any.
    pub fn notify(&self, rid: Rid, entered: bool) {
        let Some(n) = self.owner.get(rid) else {
            return;
        };
        let cb = if entered { &n.on_enter } else { &n.on_exit };
        if let Some(cb) = cb {
            cb();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use vesper_core::RidAllocator;

    #[test]
    fn callbacks_fire_per_direction() {
        let alloc = RidAllocator::new();
        let mut store = VisibilityNotifierStore::new();
        let n = alloc.alloc(RidKind::VisibilityNotifier);
        store.initialize(n);

        let entered = Arc::new(AtomicUsize::new(0));
        let exited = Arc::new(AtomicUsize::new(0));
        let (e, x) = (entered.clone(), exited.clone());
        store
            .set_callbacks(
                n,
                Some(Arc::new(move || {
                    e.fetch_add(1, Ordering::Relaxed);
                })),
                Some(Arc::new(move || {
                    x.fetch_add(1, Ordering::Relaxed);
                })),
            )
            .unwrap();
        store.notify(n, true);
        store.notify(n, true);
        store.notify(n, false);
        assert_eq!(entered.load(Ordering::Relaxed), 2);
        assert_eq!(exited.load(Ordering::Relaxed), 1);

        store.free(n);
        store.notify(n, true);
        assert_eq!(entered.load(Ordering::Relaxed), 2);
    }
}
