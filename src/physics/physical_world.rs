use std::collections::HashMap;
use std::mem;
use std::sync::Arc;

use crossbeam_utils::thread;
use log::{debug, warn};
use parking_lot::Mutex;

use crate::physics::collision_recording::{CollisionRecordingTarget, PhysicsCollision};
use crate::physics::contact_listener::{BodyContactFilter, NarrowPhaseCallbacks};
use crate::physics::error::BodyError;
use crate::physics::handles::{BodyId, ConstraintHandle, WorldId};
use crate::physics::physics_body::{
    ActiveCollisionReporter, CollisionFilterCallback, PhysicsBody, WorldBodyAccess,
};
use crate::physics::settings::PhysicsWorldSettings;
use crate::physics::tracked_constraint::TrackedConstraint;

struct WorldBody {
    body: Arc<PhysicsBody>,
    /// Stand-in for the engine body's user data field
    user_data: u64,
}

/// Owns the bodies of one simulation and drives their per-step bookkeeping.
pub struct PhysicalWorld {
    id: WorldId,
    settings: PhysicsWorldSettings,
    bodies: HashMap<BodyId, WorldBody>,
    constraints: HashMap<ConstraintHandle, Arc<TrackedConstraint>>,
    next_constraint_id: u32,
    step_identifier: u32,
    bodies_with_active_collisions: Mutex<Vec<BodyId>>,
}

impl PhysicalWorld {
    pub fn new(settings: PhysicsWorldSettings) -> Self {
        Self {
            id: WorldId::next(),
            settings,
            bodies: HashMap::with_capacity(settings.bodies),
            constraints: HashMap::with_capacity(settings.constraints),
            next_constraint_id: 0,
            step_identifier: 0,
            bodies_with_active_collisions: Mutex::new(Vec::with_capacity(
                settings.active_collision_bodies,
            )),
        }
    }

    #[inline(always)]
    pub fn id(&self) -> WorldId {
        self.id
    }

    pub fn settings(&self) -> &PhysicsWorldSettings {
        &self.settings
    }

    /// Identifier of the step currently being (or last) simulated.
    #[inline(always)]
    pub fn step_identifier(&self) -> u32 {
        self.step_identifier
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn body(&self, id: BodyId) -> Option<&Arc<PhysicsBody>> {
        self.bodies.get(&id).map(|entry| &entry.body)
    }

    /// The stuffed value currently stored for the body.
    pub fn user_data_word(&self, id: BodyId) -> Option<u64> {
        self.bodies.get(&id).map(|entry| entry.user_data)
    }

    // ------------------------------------ //
    // Bodies

    pub fn add_body(&mut self, body: Arc<PhysicsBody>) -> Result<(), BodyError> {
        if body.is_detached() {
            return Err(BodyError::Detached(body.id()));
        }

        if let Some(world) = body.world() {
            return Err(BodyError::AlreadyInWorld {
                body: body.id(),
                world,
            });
        }

        body.mark_used_in_world(self.id);
        let user_data = body.calculate_user_pointer();
        self.bodies.insert(body.id(), WorldBody { body, user_data });
        Ok(())
    }

    /// Takes a body out of the world, keeping it usable for adding back later.
    pub fn remove_body(&mut self, id: BodyId) -> Result<Arc<PhysicsBody>, BodyError> {
        let entry = self.bodies.remove(&id).ok_or(BodyError::NotInWorld {
            body: id,
            world: self.id,
        })?;

        entry.body.mark_removed_from_world();
        Ok(entry.body)
    }

    /// Removes a body for good, detaching every constraint it is part of.
    pub fn destroy_body(&mut self, id: BodyId) -> Result<(), BodyError> {
        let body = self.remove_body(id)?;

        for constraint in body.constraints() {
            self.destroy_constraint(constraint.handle());
        }

        body.mark_detached();
        if Arc::strong_count(&body) > 1 {
            debug!(
                "Destroyed body {} is still referenced from {} places",
                id,
                Arc::strong_count(&body) - 1
            );
        }
        Ok(())
    }

    /// Re-stuffs the stored user data word from the body's current flags.
    /// Returns true if the word changed.
    pub fn refresh_user_pointer(&mut self, id: BodyId) -> Result<bool, BodyError> {
        let entry = self.entry_mut(id)?;
        let new_value = entry.body.calculate_user_pointer();
        Ok(mem::replace(&mut entry.user_data, new_value) != new_value)
    }

    /// Runs `modify` on a body and refreshes its stored user data word if `modify` reports a
    /// flag change.
    pub fn modify_body<F: FnOnce(&PhysicsBody) -> bool>(
        &mut self,
        id: BodyId,
        modify: F,
    ) -> Result<bool, BodyError> {
        let changed = modify(self.entry(id)?.body.as_ref());
        if changed {
            self.refresh_user_pointer(id)?;
        }
        Ok(changed)
    }

    pub fn add_collision_ignore(
        &mut self,
        id: BodyId,
        ignored: BodyId,
        skip_duplicates: bool,
    ) -> Result<bool, BodyError> {
        self.modify_body(id, |body| body.add_collision_ignore(ignored, skip_duplicates))
    }

    pub fn remove_collision_ignore(
        &mut self,
        id: BodyId,
        no_longer_ignored: BodyId,
    ) -> Result<bool, BodyError> {
        self.modify_body(id, |body| body.remove_collision_ignore(no_longer_ignored))
    }

    pub fn set_collision_ignores(
        &mut self,
        id: BodyId,
        ignored_bodies: &[BodyId],
    ) -> Result<bool, BodyError> {
        self.modify_body(id, |body| body.set_collision_ignores(ignored_bodies))
    }

    pub fn set_single_collision_ignore(
        &mut self,
        id: BodyId,
        ignored: BodyId,
    ) -> Result<bool, BodyError> {
        self.modify_body(id, |body| body.set_single_collision_ignore(ignored))
    }

    pub fn clear_collision_ignores(&mut self, id: BodyId) -> Result<bool, BodyError> {
        self.modify_body(id, PhysicsBody::clear_collision_ignores)
    }

    pub fn set_collision_filter(
        &mut self,
        id: BodyId,
        callback: CollisionFilterCallback,
    ) -> Result<bool, BodyError> {
        self.modify_body(id, |body| body.set_collision_filter(callback))
    }

    pub fn remove_collision_filter(&mut self, id: BodyId) -> Result<bool, BodyError> {
        self.modify_body(id, PhysicsBody::remove_collision_filter)
    }

    pub fn set_collision_recording(
        &mut self,
        id: BodyId,
        target: Arc<CollisionRecordingTarget>,
        max_count: i32,
    ) -> Result<bool, BodyError> {
        self.modify_body(id, |body| {
            body.set_collision_recording_target(target, max_count)
        })
    }

    pub fn clear_collision_recording(&mut self, id: BodyId) -> Result<bool, BodyError> {
        self.modify_body(id, PhysicsBody::clear_collision_recording_target)
    }

    /// Makes a body collide with nothing, or restores its normal collisions.
    pub fn set_collision_disabled_state(
        &mut self,
        id: BodyId,
        disable_all_collisions: bool,
    ) -> Result<bool, BodyError> {
        self.modify_body(id, |body| {
            if !body.set_disable_all_collisions(disable_all_collisions) {
                return false;
            }

            if disable_all_collisions {
                body.mark_collision_disable_flag_enabled()
            } else {
                body.mark_collision_disable_flag_disabled()
            }
        })
    }

    /// Forwards an activation change from the engine.
    pub fn notify_body_active_status(&self, id: BodyId, active: bool) -> Result<(), BodyError> {
        self.entry(id)?.body.notify_active_status(active);
        Ok(())
    }

    fn entry(&self, id: BodyId) -> Result<&WorldBody, BodyError> {
        self.bodies.get(&id).ok_or(BodyError::NotInWorld {
            body: id,
            world: self.id,
        })
    }

    fn entry_mut(&mut self, id: BodyId) -> Result<&mut WorldBody, BodyError> {
        let world = self.id;
        self.bodies
            .get_mut(&id)
            .ok_or(BodyError::NotInWorld { body: id, world })
    }

    // ------------------------------------ //
    // Constraints

    pub fn create_constraint(
        &mut self,
        first: BodyId,
        second: Option<BodyId>,
    ) -> Result<Arc<TrackedConstraint>, BodyError> {
        let first_body = self.entry(first)?.body.clone();
        let second_body = match second {
            Some(id) => Some(self.entry(id)?.body.clone()),
            None => None,
        };

        let handle = ConstraintHandle(self.next_constraint_id);
        self.next_constraint_id += 1;

        let constraint = TrackedConstraint::new(handle, first_body, second_body);
        constraint.attach();
        self.constraints.insert(handle, constraint.clone());
        Ok(constraint)
    }

    /// Returns false if no such constraint exists in this world.
    pub fn destroy_constraint(&mut self, handle: ConstraintHandle) -> bool {
        match self.constraints.remove(&handle) {
            Some(constraint) => {
                constraint.detach();
                true
            }
            None => false,
        }
    }

    pub fn constraint_count(&self) -> usize {
        self.constraints.len()
    }

    // ------------------------------------ //
    // Stepping

    /// Starts a new step: clears the recorded collisions of bodies that recorded any during the
    /// previous step and advances the step identifier.
    pub fn begin_step(&mut self) -> u32 {
        let mut active = mem::take(self.bodies_with_active_collisions.get_mut());
        for id in active.drain(..) {
            match self.bodies.get(&id) {
                Some(entry) => entry.body.clear_recorded_data(),
                None => debug!("Body {} left the world before the step reset", id),
            }
        }
        // Keep the allocation
        *self.bodies_with_active_collisions.get_mut() = active;

        // u32::MAX is the "never recorded" marker of the recorders
        self.step_identifier = self.step_identifier.wrapping_add(1);
        if self.step_identifier == u32::MAX {
            self.step_identifier = 0;
        }

        self.step_identifier
    }

    /// Checks whether two bodies in this world may collide, using their stored user data words.
    pub fn allow_contact_generation(
        &self,
        first: BodyId,
        second: BodyId,
    ) -> Result<bool, BodyError> {
        let first_user_data = self.entry(first)?.user_data;
        let second_user_data = self.entry(second)?.user_data;

        // SAFETY: the words belong to bodies kept alive by `self.bodies` for this borrow
        let filter = unsafe { BodyContactFilter::new(self, self.step_identifier) };
        Ok(filter.allow_contact_generation(0, first_user_data, second_user_data))
    }

    /// Runs the contact callbacks for `contacts` on the configured number of worker threads.
    ///
    /// Contacts naming bodies that are not in this world are skipped. Returns the number of
    /// accepted contacts.
    pub fn dispatch_contacts(&self, contacts: &[PhysicsCollision]) -> usize {
        if contacts.is_empty() {
            return 0;
        }

        // SAFETY: the words belong to bodies kept alive by `self.bodies` for this borrow
        let filter = unsafe { BodyContactFilter::new(self, self.step_identifier) };
        let worker_count = self.settings.worker_count.max(1);
        let chunk_size = contacts.len().div_ceil(worker_count);

        let process = |worker_index: usize, chunk: &[PhysicsCollision]| -> usize {
            chunk
                .iter()
                .filter(|collision| {
                    match (
                        self.bodies.get(&collision.first_body),
                        self.bodies.get(&collision.second_body),
                    ) {
                        (Some(first), Some(second)) => filter.configure_contact(
                            worker_index,
                            first.user_data,
                            second.user_data,
                            collision,
                        ),
                        _ => false,
                    }
                })
                .count()
        };

        if worker_count == 1 {
            return process(0, contacts);
        }

        let result = thread::scope(|scope| {
            let workers: Vec<_> = contacts
                .chunks(chunk_size)
                .enumerate()
                .map(|(worker_index, chunk)| {
                    let process = &process;
                    scope.spawn(move |_| process(worker_index, chunk))
                })
                .collect();

            workers
                .into_iter()
                .enumerate()
                .map(|(worker_index, worker)| {
                    worker.join().unwrap_or_else(|_| {
                        warn!(
                            "Contact worker {} panicked, its accepted contacts are not counted",
                            worker_index
                        );
                        0
                    })
                })
                .sum::<usize>()
        });

        result.unwrap_or_else(|_| {
            warn!("A contact worker panicked");
            0
        })
    }
}

impl ActiveCollisionReporter for PhysicalWorld {
    #[inline(always)]
    fn world_id(&self) -> WorldId {
        self.id
    }

    fn report_body_with_active_collisions(&self, body: BodyId) {
        self.bodies_with_active_collisions.lock().push(body);
    }
}

impl Drop for PhysicalWorld {
    fn drop(&mut self) {
        for (_, constraint) in self.constraints.drain() {
            constraint.detach();
        }

        for (_, entry) in self.bodies.drain() {
            entry.body.mark_removed_from_world();
        }
    }
}
