use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use crossbeam_utils::atomic::AtomicCell;
use crossbeam_utils::CachePadded;
use glam::Vec3;
use log::trace;
use parking_lot::Mutex;

use crate::physics::handles::BodyId;

/// Recorded data of a single contact.
///
/// `first_body` is always the body the record was written for.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PhysicsCollision {
    pub first_body: BodyId,
    pub second_body: BodyId,
    pub first_sub_shape_data: u32,
    pub second_sub_shape_data: u32,
    pub contact_point: Vec3,
    pub world_normal: Vec3,
    pub penetration_amount: f32,
    /// True if the bodies were not touching on the previous step.
    pub just_started: bool,
}

impl PhysicsCollision {
    /// The same contact as seen from the other body.
    pub fn swapped(&self) -> Self {
        Self {
            first_body: self.second_body,
            second_body: self.first_body,
            first_sub_shape_data: self.second_sub_shape_data,
            second_sub_shape_data: self.first_sub_shape_data,
            contact_point: self.contact_point,
            world_normal: -self.world_normal,
            penetration_amount: self.penetration_amount,
            just_started: self.just_started,
        }
    }
}

/// Fixed-capacity storage recorded collisions are written to.
///
/// Owned by whoever wants to read the collisions; bodies only hold a shared reference while
/// recording is enabled and never resize it. Slots are individually atomic so workers writing to
/// different slots and a reader between steps never race.
pub struct CollisionRecordingTarget {
    slots: Box<[AtomicCell<PhysicsCollision>]>,
}

impl CollisionRecordingTarget {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity)
                .map(|_| AtomicCell::new(PhysicsCollision::default()))
                .collect(),
        }
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Reads a single slot.
    pub fn get(&self, index: usize) -> Option<PhysicsCollision> {
        self.slots.get(index).map(AtomicCell::load)
    }

    /// Copies out the first `count` slots, clamped to the capacity.
    pub fn recorded(&self, count: usize) -> Vec<PhysicsCollision> {
        self.slots[..count.min(self.slots.len())]
            .iter()
            .map(AtomicCell::load)
            .collect()
    }

    #[inline(always)]
    pub(crate) fn write(&self, index: usize, collision: PhysicsCollision) {
        self.slots[index].store(collision);
    }
}

impl std::fmt::Debug for CollisionRecordingTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("CollisionRecordingTarget")
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Per-body slot allocation for collision recording.
///
/// Called by any number of physics worker threads at once during a step.
pub trait CollisionRecorder: Default + Send + Sync {
    /// Claims the next slot index for `step_identifier`.
    ///
    /// `on_new_step` runs exactly once for the first claim made with a step identifier that
    /// differs from the previous one. Returns `None` once `max_count` slots have been handed out.
    fn reserve_index<F: FnOnce()>(
        &self,
        step_identifier: u32,
        max_count: i32,
        on_new_step: F,
    ) -> Option<usize>;

    /// Zeroes the recorded count.
    fn clear(&self);

    /// Zeroes the recorded count and forgets the last step, so the next claim counts as the
    /// start of a new step whatever its identifier.
    fn reset(&self);

    fn recorded_count(&self) -> i32;
}

/// Lock-free recorder using a compare-and-swap for step transitions and a fetch-and-add cursor.
pub struct AtomicCollisionRecorder {
    active_recorded_collision_count: CachePadded<AtomicI32>,
    /// Used to detect when a new batch of collisions begins
    last_recorded_physics_step: CachePadded<AtomicU32>,
}

impl Default for AtomicCollisionRecorder {
    fn default() -> Self {
        Self {
            active_recorded_collision_count: CachePadded::new(AtomicI32::new(0)),
            last_recorded_physics_step: CachePadded::new(AtomicU32::new(u32::MAX)),
        }
    }
}

impl AtomicCollisionRecorder {
    /// Brings an overflowed cursor back down to `max_count`.
    #[inline(never)]
    fn clamp_overflow(&self, max_count: i32) {
        let mut current = self.active_recorded_collision_count.load(Ordering::Acquire);
        while current > max_count {
            match self.active_recorded_collision_count.compare_exchange_weak(
                current,
                max_count,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }
}

impl CollisionRecorder for AtomicCollisionRecorder {
    #[inline(always)]
    fn reserve_index<F: FnOnce()>(
        &self,
        step_identifier: u32,
        max_count: i32,
        on_new_step: F,
    ) -> Option<usize> {
        let max_count = max_count.max(0);

        let original_step = self.last_recorded_physics_step.load(Ordering::Acquire);
        if original_step != step_identifier
            && self
                .last_recorded_physics_step
                .compare_exchange(
                    original_step,
                    step_identifier,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                )
                .is_ok()
        {
            on_new_step();
        }

        let index = self
            .active_recorded_collision_count
            .fetch_add(1, Ordering::AcqRel);

        if index >= max_count {
            if index == max_count {
                trace!("Collision recording full at {} entries", max_count);
            }
            self.clamp_overflow(max_count);
            return None;
        }

        Some(index as usize)
    }

    #[inline(always)]
    fn clear(&self) {
        self.active_recorded_collision_count
            .store(0, Ordering::Release);
    }

    fn reset(&self) {
        self.last_recorded_physics_step
            .store(u32::MAX, Ordering::Release);
        self.active_recorded_collision_count
            .store(0, Ordering::Release);
    }

    #[inline(always)]
    fn recorded_count(&self) -> i32 {
        self.active_recorded_collision_count.load(Ordering::Acquire)
    }
}

struct LockedRecordingState {
    active_recorded_collision_count: i32,
    last_recorded_physics_step: u32,
}

/// Recorder guarding a plain counter with a mutex, for targets without usable atomics.
pub struct LockedCollisionRecorder {
    state: Mutex<LockedRecordingState>,
}

impl Default for LockedCollisionRecorder {
    fn default() -> Self {
        Self {
            state: Mutex::new(LockedRecordingState {
                active_recorded_collision_count: 0,
                last_recorded_physics_step: u32::MAX,
            }),
        }
    }
}

impl CollisionRecorder for LockedCollisionRecorder {
    fn reserve_index<F: FnOnce()>(
        &self,
        step_identifier: u32,
        max_count: i32,
        on_new_step: F,
    ) -> Option<usize> {
        let mut state = self.state.lock();

        if state.last_recorded_physics_step != step_identifier {
            state.last_recorded_physics_step = step_identifier;
            on_new_step();
        }

        if state.active_recorded_collision_count >= max_count.max(0) {
            return None;
        }

        let index = state.active_recorded_collision_count;
        state.active_recorded_collision_count += 1;
        Some(index as usize)
    }

    fn clear(&self) {
        self.state.lock().active_recorded_collision_count = 0;
    }

    fn reset(&self) {
        let mut state = self.state.lock();
        state.active_recorded_collision_count = 0;
        state.last_recorded_physics_step = u32::MAX;
    }

    fn recorded_count(&self) -> i32 {
        self.state.lock().active_recorded_collision_count
    }
}

#[cfg(feature = "lock-free-recording")]
pub type DefaultCollisionRecorder = AtomicCollisionRecorder;

#[cfg(not(feature = "lock-free-recording"))]
pub type DefaultCollisionRecorder = LockedCollisionRecorder;

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_utils::thread;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;

    fn concurrent_reservations<R: CollisionRecorder>(
        recorder: &R,
        step: u32,
        attempts: usize,
        max_count: i32,
    ) -> (Vec<Option<usize>>, usize) {
        let notifications = AtomicUsize::new(0);
        let results = thread::scope(|s| {
            let handles: Vec<_> = (0..attempts)
                .map(|_| {
                    s.spawn(|_| {
                        recorder.reserve_index(step, max_count, || {
                            notifications.fetch_add(1, Ordering::Relaxed);
                        })
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .collect::<Vec<_>>()
        })
        .unwrap();
        (results, notifications.load(Ordering::Relaxed))
    }

    fn check_capacity_four_six_attempts<R: CollisionRecorder>() {
        let recorder = R::default();
        let (results, notifications) = concurrent_reservations(&recorder, 0, 6, 4);

        let indices: HashSet<usize> = results.iter().flatten().copied().collect();
        assert_eq!(indices, (0..4).collect::<HashSet<_>>());
        assert_eq!(results.iter().filter(|r| r.is_none()).count(), 2);
        assert_eq!(notifications, 1);
        assert_eq!(recorder.recorded_count(), 4);

        recorder.clear();
        assert_eq!(recorder.recorded_count(), 0);

        let (results, notifications) = concurrent_reservations(&recorder, 1, 2, 4);
        assert_eq!(results.iter().flatten().count(), 2);
        assert_eq!(notifications, 1);
        assert_eq!(recorder.recorded_count(), 2);
    }

    fn check_many_threads<R: CollisionRecorder>() {
        let recorder = R::default();
        let (results, notifications) = concurrent_reservations(&recorder, 7, 64, 16);

        let indices: Vec<usize> = results.iter().flatten().copied().collect();
        let unique: HashSet<usize> = indices.iter().copied().collect();
        assert_eq!(indices.len(), 16);
        assert_eq!(unique.len(), 16);
        assert!(indices.iter().all(|i| *i < 16));
        assert_eq!(notifications, 1);
        assert_eq!(recorder.recorded_count(), 16);
    }

    fn check_same_step_does_not_renotify<R: CollisionRecorder>() {
        let recorder = R::default();
        let mut notified = 0;
        assert_eq!(recorder.reserve_index(3, 2, || notified += 1), Some(0));
        assert_eq!(recorder.reserve_index(3, 2, || notified += 1), Some(1));
        assert_eq!(recorder.reserve_index(3, 2, || notified += 1), None);
        assert_eq!(recorder.reserve_index(3, 2, || notified += 1), None);
        assert_eq!(notified, 1);
        assert_eq!(recorder.recorded_count(), 2);
    }

    fn check_zero_capacity<R: CollisionRecorder>() {
        let recorder = R::default();
        assert_eq!(recorder.reserve_index(0, 0, || {}), None);
        assert_eq!(recorder.reserve_index(0, -3, || {}), None);
        assert_eq!(recorder.recorded_count(), 0);
    }

    fn check_reset_forgets_step<R: CollisionRecorder>() {
        let recorder = R::default();
        let mut notified = 0;
        assert_eq!(recorder.reserve_index(5, 2, || notified += 1), Some(0));
        assert_eq!(recorder.reserve_index(5, 2, || notified += 1), Some(1));

        // Clearing keeps the step, so the same identifier does not notify again
        recorder.clear();
        assert_eq!(recorder.reserve_index(5, 2, || notified += 1), Some(0));
        assert_eq!(notified, 1);

        recorder.reset();
        assert_eq!(recorder.recorded_count(), 0);
        assert_eq!(recorder.reserve_index(5, 2, || notified += 1), Some(0));
        assert_eq!(notified, 2);
        assert_eq!(recorder.recorded_count(), 1);
    }

    #[test]
    fn test_atomic_reset_forgets_step() {
        check_reset_forgets_step::<AtomicCollisionRecorder>();
    }

    #[test]
    fn test_locked_reset_forgets_step() {
        check_reset_forgets_step::<LockedCollisionRecorder>();
    }

    #[test]
    fn test_atomic_capacity_four_six_attempts() {
        check_capacity_four_six_attempts::<AtomicCollisionRecorder>();
    }

    #[test]
    fn test_locked_capacity_four_six_attempts() {
        check_capacity_four_six_attempts::<LockedCollisionRecorder>();
    }

    #[test]
    fn test_atomic_many_threads() {
        check_many_threads::<AtomicCollisionRecorder>();
    }

    #[test]
    fn test_locked_many_threads() {
        check_many_threads::<LockedCollisionRecorder>();
    }

    #[test]
    fn test_atomic_same_step_does_not_renotify() {
        check_same_step_does_not_renotify::<AtomicCollisionRecorder>();
    }

    #[test]
    fn test_locked_same_step_does_not_renotify() {
        check_same_step_does_not_renotify::<LockedCollisionRecorder>();
    }

    #[test]
    fn test_atomic_zero_capacity() {
        check_zero_capacity::<AtomicCollisionRecorder>();
    }

    #[test]
    fn test_locked_zero_capacity() {
        check_zero_capacity::<LockedCollisionRecorder>();
    }

    #[test]
    fn test_target_slots() {
        let target = CollisionRecordingTarget::new(3);
        assert_eq!(target.capacity(), 3);

        let collision = PhysicsCollision {
            first_body: BodyId(1),
            second_body: BodyId(2),
            penetration_amount: 0.25,
            ..Default::default()
        };
        target.write(1, collision);

        assert_eq!(target.get(1), Some(collision));
        assert_eq!(target.get(3), None);
        assert_eq!(target.recorded(10).len(), 3);
        assert_eq!(target.recorded(2)[1], collision);
    }

    #[test]
    fn test_swapped() {
        let collision = PhysicsCollision {
            first_body: BodyId(1),
            second_body: BodyId(2),
            first_sub_shape_data: 5,
            world_normal: Vec3::Y,
            ..Default::default()
        };
        let swapped = collision.swapped();
        assert_eq!(swapped.first_body, BodyId(2));
        assert_eq!(swapped.second_sub_shape_data, 5);
        assert_eq!(swapped.world_normal, -Vec3::Y);
        assert_eq!(swapped.swapped(), collision);
    }
}
