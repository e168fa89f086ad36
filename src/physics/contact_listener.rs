// Narrow phase hooks deciding which body pairs may collide and recording accepted contacts.

use crate::physics::body_flags::UserPointerFlags;
use crate::physics::collision_recording::PhysicsCollision;
use crate::physics::physics_body::{ActiveCollisionReporter, PhysicsBody, WorldBodyAccess};

/// Defines handlers for narrow phase events.
///
/// Bodies are identified by the stuffed user data words the engine stores on its bodies.
pub trait NarrowPhaseCallbacks: Sync {
    /// Chooses whether to allow contact generation to proceed for two overlapping bodies.
    fn allow_contact_generation(
        &self,
        worker_index: usize,
        first_user_data: u64,
        second_user_data: u64,
    ) -> bool;

    /// Provides a notification that a contact has been found between two bodies.
    /// Returns true if the contact should be kept.
    fn configure_contact(
        &self,
        worker_index: usize,
        first_user_data: u64,
        second_user_data: u64,
        collision: &PhysicsCollision,
    ) -> bool;
}

/// Applies the per-body disable flag, ignore lists and filter callbacks, and writes accepted
/// contacts into the recording targets of recording bodies.
pub struct BodyContactFilter<'a, R: ActiveCollisionReporter + ?Sized> {
    reporter: &'a R,
    step_identifier: u32,
}

impl<'a, R: ActiveCollisionReporter + ?Sized> BodyContactFilter<'a, R> {
    /// # Safety
    ///
    /// Every user data word later passed to the callbacks must be null or come from
    /// `PhysicsBody::calculate_user_pointer` of a body that outlives this filter.
    pub unsafe fn new(reporter: &'a R, step_identifier: u32) -> Self {
        Self {
            reporter,
            step_identifier,
        }
    }

    #[inline(always)]
    pub fn step_identifier(&self) -> u32 {
        self.step_identifier
    }

    #[inline(always)]
    fn body(&self, user_data: u64) -> Option<&'a PhysicsBody> {
        // SAFETY: guaranteed by the contract of `new`
        unsafe { PhysicsBody::from_user_data_ref(user_data) }
    }

    /// Checks one side's ignore list and callback against the other body.
    #[inline(always)]
    fn filter_allows(body: &PhysicsBody, other: &PhysicsBody) -> bool {
        if body.is_body_ignored(other.id()) {
            return false;
        }

        match body.collision_filter() {
            Some(callback) => callback(body, other),
            None => true,
        }
    }

    fn record(&self, user_data: u64, collision: &PhysicsCollision) {
        if !PhysicsBody::flags_from_user_data(user_data).contains(UserPointerFlags::RECORDING) {
            return;
        }

        if let Some(body) = self.body(user_data) {
            if let Some(location) =
                body.next_collision_record_location(self.step_identifier, self.reporter)
            {
                location.write(*collision);
            }
        }
    }
}

impl<'a, R: ActiveCollisionReporter + ?Sized> NarrowPhaseCallbacks for BodyContactFilter<'a, R> {
    #[inline(always)]
    fn allow_contact_generation(
        &self,
        _worker_index: usize,
        first_user_data: u64,
        second_user_data: u64,
    ) -> bool {
        let first_flags = PhysicsBody::flags_from_user_data(first_user_data);
        let second_flags = PhysicsBody::flags_from_user_data(second_user_data);

        // Fast path for the common case of neither body needing any checks
        if !(first_flags | second_flags).intersects(UserPointerFlags::SPECIAL_COLLISION) {
            return true;
        }

        if (first_flags | second_flags).contains(UserPointerFlags::DISABLE_COLLISION) {
            return false;
        }

        let (Some(first), Some(second)) =
            (self.body(first_user_data), self.body(second_user_data))
        else {
            return true;
        };

        if first_flags.contains(UserPointerFlags::COLLISION_FILTER)
            && !Self::filter_allows(first, second)
        {
            return false;
        }

        if second_flags.contains(UserPointerFlags::COLLISION_FILTER)
            && !Self::filter_allows(second, first)
        {
            return false;
        }

        true
    }

    fn configure_contact(
        &self,
        worker_index: usize,
        first_user_data: u64,
        second_user_data: u64,
        collision: &PhysicsCollision,
    ) -> bool {
        if !self.allow_contact_generation(worker_index, first_user_data, second_user_data) {
            return false;
        }

        self.record(first_user_data, collision);
        self.record(second_user_data, &collision.swapped());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::collision_recording::CollisionRecordingTarget;
    use crate::physics::handles::{BodyId, WorldId};
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct TestReporter {
        world: WorldId,
        reported: Mutex<Vec<BodyId>>,
    }

    impl ActiveCollisionReporter for TestReporter {
        fn world_id(&self) -> WorldId {
            self.world
        }

        fn report_body_with_active_collisions(&self, body: BodyId) {
            self.reported.lock().push(body);
        }
    }

    fn only_even_partners(_: &PhysicsBody, other: &PhysicsBody) -> bool {
        other.id().0 % 2 == 0
    }

    fn setup(count: u32) -> (TestReporter, Vec<PhysicsBody>) {
        let reporter = TestReporter {
            world: WorldId::next(),
            reported: Mutex::new(Vec::new()),
        };
        let bodies: Vec<PhysicsBody> = (0..count)
            .map(|i| {
                let body = PhysicsBody::new(BodyId(i));
                body.mark_used_in_world(reporter.world);
                body
            })
            .collect();
        (reporter, bodies)
    }

    #[test]
    fn test_plain_pair_is_allowed() {
        let (reporter, bodies) = setup(2);
        let filter = unsafe { BodyContactFilter::new(&reporter, 0) };
        assert!(filter.allow_contact_generation(
            0,
            bodies[0].calculate_user_pointer(),
            bodies[1].calculate_user_pointer()
        ));
    }

    #[test]
    fn test_disabled_body_rejects_everything() {
        let (reporter, bodies) = setup(2);
        bodies[1].mark_collision_disable_flag_enabled();
        let filter = unsafe { BodyContactFilter::new(&reporter, 0) };
        assert!(!filter.allow_contact_generation(
            0,
            bodies[0].calculate_user_pointer(),
            bodies[1].calculate_user_pointer()
        ));
    }

    #[test]
    fn test_ignore_list_is_checked_from_both_sides() {
        let (reporter, bodies) = setup(3);
        bodies[0].add_collision_ignore(BodyId(1), true);
        let filter = unsafe { BodyContactFilter::new(&reporter, 0) };

        let words: Vec<u64> = bodies.iter().map(|b| b.calculate_user_pointer()).collect();
        assert!(!filter.allow_contact_generation(0, words[0], words[1]));
        assert!(!filter.allow_contact_generation(0, words[1], words[0]));
        assert!(filter.allow_contact_generation(0, words[0], words[2]));
    }

    #[test]
    fn test_callback_filter() {
        let (reporter, bodies) = setup(4);
        bodies[1].set_collision_filter(only_even_partners);
        let filter = unsafe { BodyContactFilter::new(&reporter, 0) };

        let words: Vec<u64> = bodies.iter().map(|b| b.calculate_user_pointer()).collect();
        assert!(filter.allow_contact_generation(0, words[1], words[2]));
        assert!(!filter.allow_contact_generation(0, words[3], words[1]));
    }

    #[test]
    fn test_stale_word_skips_filter_checks() {
        let (reporter, bodies) = setup(2);
        let stale = bodies[0].calculate_user_pointer();
        // Ignore added after the word was computed, without refreshing it
        bodies[0].add_collision_ignore(BodyId(1), true);
        let filter = unsafe { BodyContactFilter::new(&reporter, 0) };
        assert!(filter.allow_contact_generation(0, stale, bodies[1].calculate_user_pointer()));
    }

    #[test]
    fn test_recording_both_sides() {
        let (reporter, bodies) = setup(2);
        let first_target = Arc::new(CollisionRecordingTarget::new(2));
        let second_target = Arc::new(CollisionRecordingTarget::new(2));
        bodies[0].set_collision_recording_target(first_target.clone(), 2);
        bodies[1].set_collision_recording_target(second_target.clone(), 2);

        let filter = unsafe { BodyContactFilter::new(&reporter, 9) };
        let collision = PhysicsCollision {
            first_body: BodyId(0),
            second_body: BodyId(1),
            penetration_amount: 0.5,
            ..Default::default()
        };
        assert!(filter.configure_contact(
            0,
            bodies[0].calculate_user_pointer(),
            bodies[1].calculate_user_pointer(),
            &collision
        ));

        assert_eq!(first_target.get(0), Some(collision));
        assert_eq!(second_target.get(0).unwrap().first_body, BodyId(1));
        assert_eq!(bodies[1].recorded_collision_count(), 1);
        assert_eq!(reporter.reported.lock().len(), 2);
    }

    #[test]
    fn test_rejected_contact_is_not_recorded() {
        let (reporter, bodies) = setup(2);
        bodies[0].set_collision_recording_target(Arc::new(CollisionRecordingTarget::new(2)), 2);
        bodies[0].set_single_collision_ignore(BodyId(1));

        let filter = unsafe { BodyContactFilter::new(&reporter, 0) };
        assert!(!filter.configure_contact(
            0,
            bodies[0].calculate_user_pointer(),
            bodies[1].calculate_user_pointer(),
            &PhysicsCollision::default()
        ));
        assert_eq!(bodies[0].recorded_collision_count(), 0);
        assert!(reporter.reported.lock().is_empty());
    }
}
