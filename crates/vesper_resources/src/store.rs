//! Store scaffolding shared by the parameter-container resources.
//!
//! `resource_store!` declares a store over a [`RidOwner`](vesper_core::RidOwner)
//! with the usual lookup and free methods; `field_setters!` expands, inside an
//! `impl` block of such a store, into `set_<field>` methods that validate the
//! handle, assign and bump the record's change tracker.

macro_rules! resource_store {
    ($(#[$meta:meta])* $store:ident, $state:ty, $kind:expr) => {
        $(#[$meta])*
        pub struct $store {
            owner: vesper_core::RidOwner<$state>,
        }

        impl Default for $store {
            fn default() -> Self {
                Self::new()
            }
        }

        impl $store {
            #[must_use]
            pub fn new() -> Self {
                Self {
                    owner: vesper_core::RidOwner::new($kind),
                }
            }

            #[must_use]
            pub fn get(&self, rid: vesper_core::Rid) -> Option<&$state> {
                self.owner.get(rid)
            }

            pub fn get_mut(&mut self, rid: vesper_core::Rid) -> Option<&mut $state> {
                self.owner.get_mut(rid)
            }

            #[must_use]
            pub fn owns(&self, rid: vesper_core::Rid) -> bool {
                self.owner.owns(rid)
            }

            pub fn free(&mut self, rid: vesper_core::Rid) -> Option<$state> {
                self.owner.take(rid)
            }

            pub fn iter(&self) -> impl Iterator<Item = (vesper_core::Rid, &$state)> {
                self.owner.iter()
            }

            #[must_use]
            pub fn len(&self) -> usize {
                self.owner.len()
            }

            #[must_use]
            pub fn is_empty(&self) -> bool {
                self.owner.is_empty()
            }

            #[allow(dead_code)]
            fn state_mut(&mut self, rid: vesper_core::Rid) -> vesper_core::Result<&mut $state> {
                self.owner
                    .get_mut(rid)
                    .ok_or(vesper_core::ServerError::InvalidRid(rid))
            }
        }
    };
}

macro_rules! field_setters {
    ($($field:ident : $ty:ty),* $(,)?) => {
        paste::paste! {
            $(
                pub fn [<set_ $field>](&mut self, rid: vesper_core::Rid, value: $ty) -> vesper_core::Result<()> {
                    let state = self.state_mut(rid)?;
                    state.$field = value;
                    state.changes.changed();
                    Ok(())
                }
            )*
        }
    };
}
