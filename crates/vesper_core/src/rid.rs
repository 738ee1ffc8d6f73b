//! Resource Handles
//!
//! Every resource owned by the server is addressed through an opaque [`Rid`].
//! A `Rid` packs a slot index and a generation counter into a single 64-bit
//! word (the slotmap FFI encoding). The type tag lives in the registry, keyed
//! by slot, so the handle itself stays a plain `u64`.
//!
//! # Lifecycle
//!
//! ```text
//! alloc(kind) ──► Live ──retire(frame)──► Retired ──reclaim(frame+1)──► slot reused
//!                   │                        │
//!              resolve ok              resolve fails
//! ```
//!
//! Retiring makes a handle invalid immediately. The slot itself is only
//! returned to the free list once the frame in which it was retired has
//! completed, so a handle value is never recycled while the render thread
//! may still be referencing it.

use std::fmt;

use parking_lot::Mutex;
use slotmap::{Key, KeyData, SecondaryMap, SlotMap, new_key_type};

new_key_type! {
    /// Internal slot key backing every [`Rid`].
    pub struct RidKey;
}

// ============================================================================
// Rid
// ============================================================================

/// Opaque, generation-protected resource identifier.
///
/// The all-zero value is the invalid handle returned by failed create-like
/// operations.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Rid(u64);

impl Rid {
    /// The invalid handle.
    pub const INVALID: Rid = Rid(0);

    /// Returns `true` if this is not the invalid handle. It does not check
    /// whether the resource is still alive.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// Raw 64-bit representation, suitable for FFI and logging.
    #[inline]
    #[must_use]
    pub const fn to_u64(self) -> u64 {
        self.0
    }

    /// Rebuilds a handle from its raw representation.
    #[inline]
    #[must_use]
    pub const fn from_u64(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    #[must_use]
    pub(crate) fn key(self) -> RidKey {
        if self.0 == 0 {
            RidKey::null()
        } else {
            RidKey::from(KeyData::from_ffi(self.0))
        }
    }

    #[inline]
    #[must_use]
    pub(crate) fn from_key(key: RidKey) -> Self {
        Self(key.data().as_ffi())
    }

    /// Slot index half of the handle.
    #[inline]
    #[must_use]
    pub const fn slot(self) -> u32 {
        (self.0 & 0xFFFF_FFFF) as u32
    }

    /// Generation half of the handle.
    #[inline]
    #[must_use]
    pub const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl fmt::Debug for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "Rid({}v{})", self.slot(), self.generation())
        } else {
            f.write_str("Rid(invalid)")
        }
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ============================================================================
// RidKind
// ============================================================================

/// Type tag attached to every live handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RidKind {
    Texture,
    Shader,
    Material,
    Mesh,
    MultiMesh,
    Skeleton,
    Light,
    ReflectionProbe,
    Decal,
    VoxelGi,
    Lightmap,
    Particles,
    ParticlesCollision,
    FogVolume,
    VisibilityNotifier,
    Occluder,
    Camera,
    Sky,
    CompositorEffect,
    Compositor,
    Environment,
    CameraAttributes,
    Scenario,
    Canvas,
    CanvasItem,
    CanvasTexture,
    CanvasLight,
    CanvasLightOccluder,
    CanvasOccluderPolygon,
    Viewport,
    Instance,
}

impl RidKind {
    /// Human readable name used in diagnostics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Texture => "Texture",
            Self::Shader => "Shader",
            Self::Material => "Material",
            Self::Mesh => "Mesh",
            Self::MultiMesh => "MultiMesh",
            Self::Skeleton => "Skeleton",
            Self::Light => "Light",
            Self::ReflectionProbe => "ReflectionProbe",
            Self::Decal => "Decal",
            Self::VoxelGi => "VoxelGI",
            Self::Lightmap => "Lightmap",
            Self::Particles => "Particles",
            Self::ParticlesCollision => "ParticlesCollision",
            Self::FogVolume => "FogVolume",
            Self::VisibilityNotifier => "VisibilityNotifier",
            Self::Occluder => "Occluder",
            Self::Camera => "Camera",
            Self::Sky => "Sky",
            Self::CompositorEffect => "CompositorEffect",
            Self::Compositor => "Compositor",
            Self::Environment => "Environment",
            Self::CameraAttributes => "CameraAttributes",
            Self::Scenario => "Scenario",
            Self::Canvas => "Canvas",
            Self::CanvasItem => "CanvasItem",
            Self::CanvasTexture => "CanvasTexture",
            Self::CanvasLight => "CanvasLight",
            Self::CanvasLightOccluder => "CanvasLightOccluder",
            Self::CanvasOccluderPolygon => "CanvasOccluderPolygon",
            Self::Viewport => "Viewport",
            Self::Instance => "Instance",
        }
    }

    /// Kinds that can be the base of a 3D instance.
    #[must_use]
    pub const fn is_instanceable(self) -> bool {
        matches!(
            self,
            Self::Mesh
                | Self::MultiMesh
                | Self::Light
                | Self::ReflectionProbe
                | Self::Decal
                | Self::VoxelGi
                | Self::Lightmap
                | Self::Particles
                | Self::ParticlesCollision
                | Self::FogVolume
                | Self::VisibilityNotifier
                | Self::Occluder
        )
    }
}

impl fmt::Display for RidKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// RidAllocator
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Live,
    Retired { frame: u64 },
}

#[derive(Debug, Clone, Copy)]
struct SlotEntry {
    kind: RidKind,
    state: SlotState,
}

/// Thread-safe handle allocator shared between caller threads and the render
/// thread.
///
/// Allocation happens eagerly on the calling thread so create operations can
/// return a handle without waiting for the render thread to initialise the
/// backing state.
#[derive(Default)]
pub struct RidAllocator {
    slots: Mutex<SlotMap<RidKey, SlotEntry>>,
}

impl RidAllocator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh live handle of the given kind.
    pub fn alloc(&self, kind: RidKind) -> Rid {
        let key = self.slots.lock().insert(SlotEntry {
            kind,
            state: SlotState::Live,
        });
        Rid::from_key(key)
    }

    /// Type tag of a live handle.
    #[must_use]
    pub fn kind_of(&self, rid: Rid) -> Option<RidKind> {
        let slots = self.slots.lock();
        match slots.get(rid.key()) {
            Some(entry) if entry.state == SlotState::Live => Some(entry.kind),
            _ => None,
        }
    }

    /// `true` if the handle is live and tagged with `kind`.
    #[must_use]
    pub fn owns(&self, rid: Rid, kind: RidKind) -> bool {
        self.kind_of(rid) == Some(kind)
    }

    /// `true` if the handle is live, whatever its kind.
    #[must_use]
    pub fn is_live(&self, rid: Rid) -> bool {
        self.kind_of(rid).is_some()
    }

    /// Invalidates a live handle. Returns its kind, or `None` if the handle was
    /// already retired or never existed. Calling this twice is harmless.
    pub fn retire(&self, rid: Rid, frame: u64) -> Option<RidKind> {
        let mut slots = self.slots.lock();
        let entry = slots.get_mut(rid.key())?;
        if entry.state != SlotState::Live {
            return None;
        }
        entry.state = SlotState::Retired { frame };
        Some(entry.kind)
    }

    /// Releases the slots of handles retired before `completed_frame`.
    /// Returns how many slots were returned to the free list.
    pub fn reclaim(&self, completed_frame: u64) -> usize {
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|_, entry| match entry.state {
            SlotState::Live => true,
            SlotState::Retired { frame } => frame >= completed_frame,
        });
        before - slots.len()
    }

    /// Number of live handles of every kind.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|e| e.state == SlotState::Live)
            .count()
    }

    /// Number of retired handles still waiting for their slot to be reclaimed.
    #[must_use]
    pub fn pending_reclaim(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|e| matches!(e.state, SlotState::Retired { .. }))
            .count()
    }

    /// Snapshot of live handles of one kind.
    #[must_use]
    pub fn live_of_kind(&self, kind: RidKind) -> Vec<Rid> {
        self.slots
            .lock()
            .iter()
            .filter(|(_, e)| e.kind == kind && e.state == SlotState::Live)
            .map(|(k, _)| Rid::from_key(k))
            .collect()
    }
}

// ============================================================================
// RidOwner
// ============================================================================

/// Per-kind state table.
///
/// An owner stores the private state record of every live handle of one kind.
/// It is only touched from the render thread, so it needs no locking.
pub struct RidOwner<T> {
    kind: RidKind,
    map: SecondaryMap<RidKey, T>,
}

impl<T> RidOwner<T> {
    #[must_use]
    pub fn new(kind: RidKind) -> Self {
        Self {
            kind,
            map: SecondaryMap::new(),
        }
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> RidKind {
        self.kind
    }

    /// Stores the state record of a freshly allocated handle.
    pub fn initialize(&mut self, rid: Rid, state: T) {
        if !rid.is_valid() {
            log::error!("{}: refusing to initialize the invalid handle", self.kind);
            return;
        }
        self.map.insert(rid.key(), state);
    }

    #[inline]
    #[must_use]
    pub fn get(&self, rid: Rid) -> Option<&T> {
        if !rid.is_valid() {
            return None;
        }
        self.map.get(rid.key())
    }

    #[inline]
    pub fn get_mut(&mut self, rid: Rid) -> Option<&mut T> {
        if !rid.is_valid() {
            return None;
        }
        self.map.get_mut(rid.key())
    }

    #[inline]
    #[must_use]
    pub fn owns(&self, rid: Rid) -> bool {
        rid.is_valid() && self.map.contains_key(rid.key())
    }

    /// Removes and returns the state record.
    pub fn take(&mut self, rid: Rid) -> Option<T> {
        if !rid.is_valid() {
            return None;
        }
        self.map.remove(rid.key())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Rid, &T)> {
        self.map.iter().map(|(k, v)| (Rid::from_key(k), v))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Rid, &mut T)> {
        self.map.iter_mut().map(|(k, v)| (Rid::from_key(k), v))
    }

    /// Handles currently owned, in slot order.
    #[must_use]
    pub fn rids(&self) -> Vec<Rid> {
        self.map.keys().map(Rid::from_key).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_rid_is_zero() {
        assert!(!Rid::INVALID.is_valid());
        assert_eq!(Rid::default(), Rid::INVALID);
    }

    #[test]
    fn alloc_returns_distinct_live_handles() {
        let alloc = RidAllocator::new();
        let a = alloc.alloc(RidKind::Texture);
        let b = alloc.alloc(RidKind::Texture);
        assert_ne!(a, b);
        assert!(a.is_valid());
        assert_eq!(alloc.kind_of(a), Some(RidKind::Texture));
        assert_eq!(alloc.live_count(), 2);
    }

    #[test]
    fn retire_is_idempotent() {
        let alloc = RidAllocator::new();
        let a = alloc.alloc(RidKind::Mesh);
        assert_eq!(alloc.retire(a, 0), Some(RidKind::Mesh));
        assert_eq!(alloc.retire(a, 0), None);
        assert!(!alloc.is_live(a));
    }

    #[test]
    fn retired_slot_not_reused_before_reclaim() {
        let alloc = RidAllocator::new();
        let a = alloc.alloc(RidKind::Mesh);
        alloc.retire(a, 5);
        let b = alloc.alloc(RidKind::Mesh);
        assert_ne!(a.slot(), b.slot());

        assert_eq!(alloc.reclaim(5), 0);
        assert_eq!(alloc.reclaim(6), 1);

        let c = alloc.alloc(RidKind::Mesh);
        assert_eq!(c.slot(), a.slot());
        assert_ne!(c, a, "generation must change when a slot is recycled");
        assert!(!alloc.is_live(a));
    }

    #[test]
    fn owner_rejects_stale_generation() {
        let alloc = RidAllocator::new();
        let mut owner: RidOwner<u32> = RidOwner::new(RidKind::Light);
        let a = alloc.alloc(RidKind::Light);
        owner.initialize(a, 7);
        assert_eq!(owner.get(a), Some(&7));

        owner.take(a);
        alloc.retire(a, 0);
        alloc.reclaim(1);

        let b = alloc.alloc(RidKind::Light);
        owner.initialize(b, 9);
        assert_eq!(owner.get(a), None);
        assert_eq!(owner.get(b), Some(&9));
    }

    #[test]
    fn kind_tag_is_checked() {
        let alloc = RidAllocator::new();
        let a = alloc.alloc(RidKind::Camera);
        assert!(alloc.owns(a, RidKind::Camera));
        assert!(!alloc.owns(a, RidKind::Viewport));
    }
}
