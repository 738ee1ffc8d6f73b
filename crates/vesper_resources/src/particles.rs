//! Particle systems and particle colliders.
//!
//! Process materials are not executed; each system runs a small CPU
//! simulation (spawn, integrate, expire) so emission, restarts, bounds and
//! draw passes behave the same on the headless backend as on a GPU one.

use bitflags::bitflags;
use glam::{Affine3A, Vec3, Vec4};
use smallvec::SmallVec;
use vesper_core::math::{Aabb, Color};
use vesper_core::{ordinal_enum, ChangeTracker, Result, Rid, RidKind, ServerError};

ordinal_enum! {
    #[derive(Default)]
    pub enum ParticlesMode {
        Mode2D = 0,
        #[default]
        Mode3D = 1,
    }
}

ordinal_enum! {
    #[derive(Default)]
    pub enum ParticlesDrawOrder {
        #[default]
        Index = 0,
        Lifetime = 1,
        ReverseLifetime = 2,
        ViewDepth = 3,
    }
}

ordinal_enum! {
    #[derive(Default)]
    pub enum ParticlesTransformAlign {
        #[default]
        Disabled = 0,
        ZBillboard = 1,
        YToVelocity = 2,
        ZBillboardYToVelocity = 3,
    }
}

ordinal_enum! {
    pub enum ParticlesCollisionType {
        SphereAttract = 0,
        BoxAttract = 1,
        VectorFieldAttract = 2,
        SphereCollide = 3,
        BoxCollide = 4,
        SdfCollide = 5,
        HeightfieldCollide = 6,
    }
}

ordinal_enum! {
    #[derive(Default)]
    pub enum ParticlesCollisionHeightfieldResolution {
        Res256 = 0,
        Res512 = 1,
        #[default]
        Res1024 = 2,
        Res2048 = 3,
        Res4096 = 4,
        Res8192 = 5,
    }
}

impl ParticlesCollisionHeightfieldResolution {
    #[must_use]
    pub const fn texels(self) -> u32 {
        256 << self.ordinal()
    }
}

ordinal_enum! {
    #[derive(Default)]
    pub enum ParticlesCollisionHeightfieldUpdate {
        #[default]
        WhenMoved = 0,
        Always = 1,
    }
}

bitflags! {
    /// Which fields of an explicit `emit` request are meaningful.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ParticlesEmitFlags: u32 {
        const POSITION = 1;
        const ROTATION_SCALE = 2;
        const VELOCITY = 4;
        const COLOR = 8;
        const CUSTOM = 16;
    }
}

pub const MAX_DRAW_PASSES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Particle {
    pub transform: Affine3A,
    pub velocity: Vec3,
    pub color: Color,
    pub custom: Vec4,
    pub age: f32,
    pub active: bool,
}

impl Default for Particle {
    fn default() -> Self {
        Self {
            transform: Affine3A::IDENTITY,
            velocity: Vec3::ZERO,
            color: Color::WHITE,
            custom: Vec4::ZERO,
            age: 0.0,
            active: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmitRequest {
    pub transform: Affine3A,
    pub velocity: Vec3,
    pub color: Color,
    pub custom: Vec4,
    pub flags: ParticlesEmitFlags,
}

#[derive(Debug, Clone)]
pub struct Particles {
    pub mode: ParticlesMode,
    pub emitting: bool,
    pub amount: usize,
    pub amount_ratio: f32,
    pub lifetime: f32,
    pub one_shot: bool,
    pub pre_process_time: f32,
    pub explosiveness: f32,
    pub randomness: f32,
    pub custom_aabb: Aabb,
    pub speed_scale: f32,
    pub use_local_coordinates: bool,
    pub process_material: Rid,
    pub fixed_fps: u32,
    pub interpolate: bool,
    pub fractional_delta: bool,
    pub collision_base_size: f32,
    pub trails_enabled: bool,
    pub trail_length: f32,
    pub trail_bind_poses: Vec<Affine3A>,
    pub draw_order: ParticlesDrawOrder,
    pub transform_align: ParticlesTransformAlign,
    pub draw_passes: SmallVec<[Rid; MAX_DRAW_PASSES]>,
    pub subemitter: Rid,
    pub emission_transform: Affine3A,
    pub emitter_velocity: Vec3,
    pub interp_to_end: f32,
    pub pool: Vec<Particle>,
    pending_emits: Vec<EmitRequest>,
    cycle_time: f32,
    emitted_in_cycle: usize,
    cycle_finished: bool,
    fixed_accum: f32,
    process_requested: f32,
    pub changes: ChangeTracker,
}

impl Default for Particles {
    fn default() -> Self {
        Self {
            mode: ParticlesMode::Mode3D,
            emitting: false,
            amount: 0,
            amount_ratio: 1.0,
            lifetime: 1.0,
            one_shot: false,
            pre_process_time: 0.0,
            explosiveness: 0.0,
            randomness: 0.0,
            custom_aabb: Aabb::from_position_size(Vec3::splat(-4.0), Vec3::splat(8.0)),
            speed_scale: 1.0,
            use_local_coordinates: false,
            process_material: Rid::INVALID,
            fixed_fps: 30,
            interpolate: true,
            fractional_delta: true,
            collision_base_size: 0.01,
            trails_enabled: false,
            trail_length: 0.3,
            trail_bind_poses: Vec::new(),
            draw_order: ParticlesDrawOrder::Index,
            transform_align: ParticlesTransformAlign::Disabled,
            draw_passes: SmallVec::new(),
            subemitter: Rid::INVALID,
            emission_transform: Affine3A::IDENTITY,
            emitter_velocity: Vec3::ZERO,
            interp_to_end: 0.0,
            pool: Vec::new(),
            pending_emits: Vec::new(),
            cycle_time: 0.0,
            emitted_in_cycle: 0,
            cycle_finished: false,
            fixed_accum: 0.0,
            process_requested: 0.0,
            changes: ChangeTracker::new(),
        }
    }
}

impl Particles {
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.pool.iter().filter(|p| p.active).count()
    }

    /// Particles allowed to be alive at once.
    #[must_use]
    pub fn budget(&self) -> usize {
        ((self.amount as f32) * self.amount_ratio.clamp(0.0, 1.0)).round() as usize
    }

    /// No particle is alive and nothing will spawn.
    #[must_use]
    pub fn is_inactive(&self) -> bool {
        !self.emitting && self.pending_emits.is_empty() && self.active_count() == 0
    }

    fn spawn(&mut self, request: EmitRequest) -> bool {
        let budget = self.budget();
        let Some(slot) = self.pool.iter_mut().take(budget).find(|p| !p.active) else {
            return false;
        };
        let mut p = Particle {
            transform: self.emission_transform,
            velocity: self.emitter_velocity,
            active: true,
            ..Default::default()
        };
        if request.flags.contains(ParticlesEmitFlags::POSITION) {
            p.transform.translation = request.transform.translation;
        }
        if request.flags.contains(ParticlesEmitFlags::ROTATION_SCALE) {
            p.transform.matrix3 = request.transform.matrix3;
        }
        if request.flags.contains(ParticlesEmitFlags::VELOCITY) {
            p.velocity = request.velocity;
        }
        if request.flags.contains(ParticlesEmitFlags::COLOR) {
            p.color = request.color;
        }
        if request.flags.contains(ParticlesEmitFlags::CUSTOM) {
            p.custom = request.custom;
        }
        *slot = p;
        true
    }

    fn step(&mut self, dt: f32) {
        let lifetime = self.lifetime.max(f32::EPSILON);
        for p in self.pool.iter_mut().filter(|p| p.active) {
            p.age += dt;
            if p.age >= lifetime {
                p.active = false;
                continue;
            }
            p.transform.translation += glam::Vec3A::from(p.velocity * dt);
        }

        for request in std::mem::take(&mut self.pending_emits) {
            self.spawn(request);
        }

        if !self.emitting || self.cycle_finished {
            return;
        }
        let budget = self.budget();
        let spread = lifetime * (1.0 - self.explosiveness.clamp(0.0, 1.0));
        self.cycle_time += dt;
        let due = if spread <= 0.0 {
            budget
        } else {
            ((self.cycle_time / spread) * budget as f32).floor() as usize
        }
        .min(budget);
        let base = EmitRequest {
            transform: self.emission_transform,
            velocity: self.emitter_velocity,
            color: Color::WHITE,
            custom: Vec4::ZERO,
            flags: ParticlesEmitFlags::empty(),
        };
        while self.emitted_in_cycle < due {
            self.spawn(base);
            self.emitted_in_cycle += 1;
        }
        if self.cycle_time >= lifetime {
            if self.one_shot {
                self.cycle_finished = true;
                self.emitting = false;
            } else {
                self.cycle_time -= lifetime;
                self.emitted_in_cycle = 0;
            }
        }
    }

    /// Advances the simulation by `delta` seconds of wall time.
    pub fn process(&mut self, delta: f32) {
        let mut delta = delta * self.speed_scale + std::mem::take(&mut self.process_requested);
        if delta <= 0.0 && self.pending_emits.is_empty() {
            return;
        }
        if self.fixed_fps == 0 {
            self.step(delta);
            return;
        }
        let frame = 1.0 / self.fixed_fps as f32;
        self.fixed_accum += delta;
        while self.fixed_accum >= frame {
            self.step(frame);
            self.fixed_accum -= frame;
            delta = 0.0;
        }
        if self.fractional_delta && self.fixed_accum > 0.0 && delta > 0.0 {
            let rest = std::mem::take(&mut self.fixed_accum);
            self.step(rest);
        } else if !self.pending_emits.is_empty() {
            self.step(0.0);
        }
    }

    /// Bounds of the live particles, or `None` when there are none.
    #[must_use]
    pub fn current_aabb(&self) -> Option<Aabb> {
        let points: Vec<Vec3> = self
            .pool
            .iter()
            .filter(|p| p.active)
            .map(|p| Vec3::from(p.transform.translation))
            .collect();
        if points.is_empty() {
            None
        } else {
            Some(Aabb::from_points(&points).grow(self.collision_base_size))
        }
    }

    fn reset_simulation(&mut self) {
        self.pool = vec![Particle::default(); self.amount];
        self.pending_emits.clear();
        self.cycle_time = 0.0;
        self.emitted_in_cycle = 0;
        self.cycle_finished = false;
        self.fixed_accum = 0.0;
    }
}

resource_store!(ParticlesStore, Particles, RidKind::Particles);

impl ParticlesStore {
    pub fn initialize(&mut self, rid: Rid) {
        self.owner.initialize(rid, Particles::default());
    }

    field_setters! {
        mode: ParticlesMode,
        one_shot: bool,
        pre_process_time: f32,
        explosiveness: f32,
        randomness: f32,
        custom_aabb: Aabb,
        speed_scale: f32,
        use_local_coordinates: bool,
        process_material: Rid,
        fixed_fps: u32,
        interpolate: bool,
        fractional_delta: bool,
        collision_base_size: f32,
        draw_order: ParticlesDrawOrder,
        transform_align: ParticlesTransformAlign,
        subemitter: Rid,
        emission_transform: Affine3A,
        emitter_velocity: Vec3,
        interp_to_end: f32,
    }

    pub fn set_emitting(&mut self, rid: Rid, emitting: bool) -> Result<()> {
        let p = self.state_mut(rid)?;
        if emitting && !p.emitting {
            p.cycle_finished = false;
            p.cycle_time = 0.0;
            p.emitted_in_cycle = 0;
        }
        p.emitting = emitting;
        p.changes.changed();
        Ok(())
    }

    /// Reallocates the pool; zero leaves no particle slots at all.
    pub fn set_amount(&mut self, rid: Rid, amount: usize) -> Result<()> {
        let p = self.state_mut(rid)?;
        p.amount = amount;
        p.reset_simulation();
        p.changes.changed();
        Ok(())
    }

    pub fn set_amount_ratio(&mut self, rid: Rid, ratio: f32) -> Result<()> {
        let p = self.state_mut(rid)?;
        p.amount_ratio = ratio.clamp(0.0, 1.0);
        p.changes.changed();
        Ok(())
    }

    pub fn set_lifetime(&mut self, rid: Rid, lifetime: f32) -> Result<()> {
        if lifetime <= 0.0 {
            return Err(ServerError::InvalidArgument(format!("particle lifetime {lifetime} must be positive")));
        }
        let p = self.state_mut(rid)?;
        p.lifetime = lifetime;
        p.changes.changed();
        Ok(())
    }

    pub fn set_trails(&mut self, rid: Rid, enabled: bool, length: f32) -> Result<()> {
        let p = self.state_mut(rid)?;
        p.trails_enabled = enabled;
        p.trail_length = length.max(0.0);
        p.changes.changed();
        Ok(())
    }

    pub fn set_trail_bind_poses(&mut self, rid: Rid, poses: Vec<Affine3A>) -> Result<()> {
        let p = self.state_mut(rid)?;
        p.trail_bind_poses = poses;
        p.changes.changed();
        Ok(())
    }

    /// Grows or shrinks the pass list to `count` (1..=4); new passes are empty.
    pub fn set_draw_passes(&mut self, rid: Rid, count: usize) -> Result<()> {
        if !(1..=MAX_DRAW_PASSES).contains(&count) {
            return Err(ServerError::OutOfRange {
                what: "particle draw pass count",
                index: count,
                limit: MAX_DRAW_PASSES,
            });
        }
        let p = self.state_mut(rid)?;
        p.draw_passes.resize(count, Rid::INVALID);
        p.changes.changed();
        Ok(())
    }

    pub fn set_draw_pass_mesh(&mut self, rid: Rid, pass: usize, mesh: Rid) -> Result<()> {
        let p = self.state_mut(rid)?;
        let limit = p.draw_passes.len();
        let slot = p.draw_passes.get_mut(pass).ok_or(ServerError::OutOfRange {
            what: "particle draw pass",
            index: pass,
            limit,
        })?;
        *slot = mesh;
        p.changes.changed();
        Ok(())
    }

    pub fn restart(&mut self, rid: Rid) -> Result<()> {
        let p = self.state_mut(rid)?;
        p.reset_simulation();
        p.changes.changed();
        Ok(())
    }

    pub fn emit(&mut self, rid: Rid, request: EmitRequest) -> Result<()> {
        let p = self.state_mut(rid)?;
        if p.amount > 0 {
            p.pending_emits.push(request);
        }
        Ok(())
    }

    /// Simulates `time` extra seconds on the next process step.
    pub fn request_process_time(&mut self, rid: Rid, time: f32) -> Result<()> {
        let p = self.state_mut(rid)?;
        p.process_requested += time.max(0.0);
        Ok(())
    }

    #[must_use]
    pub fn is_inactive(&self, rid: Rid) -> bool {
        self.owner.get(rid).is_none_or(Particles::is_inactive)
    }

    #[must_use]
    pub fn current_aabb(&self, rid: Rid) -> Aabb {
        self.owner
            .get(rid)
            .and_then(Particles::current_aabb)
            .unwrap_or(Aabb::ZERO)
    }

    /// Runs every system one frame forward.
    pub fn process_all(&mut self, delta: f32) {
        for (_, p) in self.owner.iter_mut() {
            p.process(delta);
        }
    }

    pub fn purge_reference(&mut self, freed: Rid) {
        for (_, p) in self.owner.iter_mut() {
            let mut touched = false;
            for pass in p.draw_passes.iter_mut().filter(|m| **m == freed) {
                *pass = Rid::INVALID;
                touched = true;
            }
            for r in [&mut p.process_material, &mut p.subemitter] {
                if *r == freed {
                    *r = Rid::INVALID;
                    touched = true;
                }
            }
            if touched {
                p.changes.changed();
            }
        }
    }
}

// ============================================================================
// Collision shapes and attractors
// ============================================================================

#[derive(Debug, Clone)]
pub struct ParticlesCollision {
    pub ty: ParticlesCollisionType,
    pub cull_mask: u32,
    pub sphere_radius: f32,
    pub box_extents: Vec3,
    pub attractor_strength: f32,
    pub attractor_directionality: f32,
    pub attractor_attenuation: f32,
    pub field_texture: Rid,
    pub height_field_resolution: ParticlesCollisionHeightfieldResolution,
    pub height_field_mask: u32,
    pub height_field_update: ParticlesCollisionHeightfieldUpdate,
    pub changes: ChangeTracker,
}

impl ParticlesCollision {
    #[must_use]
    pub fn new(ty: ParticlesCollisionType) -> Self {
        Self {
            ty,
            cull_mask: u32::MAX,
            sphere_radius: 1.0,
            box_extents: Vec3::ONE,
            attractor_strength: 1.0,
            attractor_directionality: 0.0,
            attractor_attenuation: 1.0,
            field_texture: Rid::INVALID,
            height_field_resolution: ParticlesCollisionHeightfieldResolution::Res1024,
            height_field_mask: 1 << 19,
            height_field_update: ParticlesCollisionHeightfieldUpdate::WhenMoved,
            changes: ChangeTracker::new(),
        }
    }

    #[must_use]
    pub fn aabb(&self) -> Aabb {
        match self.ty {
            ParticlesCollisionType::SphereAttract | ParticlesCollisionType::SphereCollide => {
                Aabb::from_center_extents(Vec3::ZERO, Vec3::splat(self.sphere_radius))
            }
            _ => Aabb::from_center_extents(Vec3::ZERO, self.box_extents),
        }
    }

    #[must_use]
    pub fn is_heightfield(&self) -> bool {
        self.ty == ParticlesCollisionType::HeightfieldCollide
    }
}

resource_store!(ParticlesCollisionStore, ParticlesCollision, RidKind::ParticlesCollision);

impl ParticlesCollisionStore {
    pub fn initialize(&mut self, rid: Rid) {
        self.owner
            .initialize(rid, ParticlesCollision::new(ParticlesCollisionType::SphereAttract));
    }

    field_setters! {
        cull_mask: u32,
        sphere_radius: f32,
        box_extents: Vec3,
        attractor_strength: f32,
        attractor_directionality: f32,
        attractor_attenuation: f32,
        field_texture: Rid,
        height_field_resolution: ParticlesCollisionHeightfieldResolution,
        height_field_mask: u32,
        height_field_update: ParticlesCollisionHeightfieldUpdate,
    }

    pub fn set_collision_type(&mut self, rid: Rid, ty: ParticlesCollisionType) -> Result<()> {
        let c = self.state_mut(rid)?;
        c.ty = ty;
        c.changes.changed();
        Ok(())
    }

    pub fn purge_reference(&mut self, freed: Rid) {
        for (_, c) in self.owner.iter_mut() {
            if c.field_texture == freed {
                c.field_texture = Rid::INVALID;
                c.changes.changed();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vesper_core::RidAllocator;

    fn setup() -> (RidAllocator, ParticlesStore, Rid) {
        let alloc = RidAllocator::new();
        let mut store = ParticlesStore::new();
        let rid = alloc.alloc(RidKind::Particles);
        store.initialize(rid);
        (alloc, store, rid)
    }

    fn point_emit(x: f32) -> EmitRequest {
        EmitRequest {
            transform: Affine3A::from_translation(Vec3::new(x, 0.0, 0.0)),
            velocity: Vec3::ZERO,
            color: Color::RED,
            custom: Vec4::ZERO,
            flags: ParticlesEmitFlags::POSITION | ParticlesEmitFlags::COLOR,
        }
    }

    #[test]
    fn zero_amount_emits_nothing() {
        let (_alloc, mut store, p) = setup();
        store.set_amount(p, 0).unwrap();
        store.emit(p, point_emit(1.0)).unwrap();
        store.set_emitting(p, true).unwrap();
        store.process_all(0.5);
        assert_eq!(store.get(p).unwrap().active_count(), 0);
        assert_eq!(store.current_aabb(p), Aabb::ZERO);
    }

    #[test]
    fn explicit_emit_spawns_at_position() {
        let (_alloc, mut store, p) = setup();
        store.set_amount(p, 4).unwrap();
        store.emit(p, point_emit(3.0)).unwrap();
        store.process_all(0.0);
        let sys = store.get(p).unwrap();
        assert_eq!(sys.active_count(), 1);
        assert!(!store.is_inactive(p));
        let aabb = store.current_aabb(p);
        assert!(aabb.contains_point(Vec3::new(3.0, 0.0, 0.0)));
    }

    #[test]
    fn explosive_one_shot_cycle() {
        let (_alloc, mut store, p) = setup();
        store.set_amount(p, 8).unwrap();
        store.set_explosiveness(p, 1.0).unwrap();
        store.set_one_shot(p, true).unwrap();
        store.set_fixed_fps(p, 0).unwrap();
        store.set_emitting(p, true).unwrap();
        store.process_all(0.1);
        assert_eq!(store.get(p).unwrap().active_count(), 8);
        store.process_all(1.0);
        assert_eq!(store.get(p).unwrap().active_count(), 0);
        assert!(store.is_inactive(p));
    }

    #[test]
    fn restart_clears_pool() {
        let (_alloc, mut store, p) = setup();
        store.set_amount(p, 2).unwrap();
        store.emit(p, point_emit(0.0)).unwrap();
        store.process_all(0.0);
        store.restart(p).unwrap();
        assert_eq!(store.get(p).unwrap().active_count(), 0);
    }

    #[test]
    fn draw_pass_bounds() {
        let (alloc, mut store, p) = setup();
        assert!(store.set_draw_passes(p, 0).is_err());
        assert!(store.set_draw_passes(p, 5).is_err());
        store.set_draw_passes(p, 2).unwrap();
        let mesh = alloc.alloc(RidKind::Mesh);
        store.set_draw_pass_mesh(p, 1, mesh).unwrap();
        assert!(store.set_draw_pass_mesh(p, 2, mesh).is_err());
        store.purge_reference(mesh);
        assert_eq!(store.get(p).unwrap().draw_passes[1], Rid::INVALID);
    }

    #[test]
    fn heightfield_resolution_texels() {
        assert_eq!(ParticlesCollisionHeightfieldResolution::Res256.texels(), 256);
        assert_eq!(ParticlesCollisionHeightfieldResolution::Res8192.texels(), 8192);
    }
}
