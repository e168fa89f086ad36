use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use log::{debug, warn};
use parking_lot::{MappedRwLockReadGuard, Mutex, RwLock, RwLockReadGuard};

use crate::physics::body_control_state::BodyControlState;
use crate::physics::body_flags::{BodyFlagState, UserPointerFlags};
use crate::physics::collision_recording::{
    CollisionRecorder, CollisionRecordingTarget, DefaultCollisionRecorder, PhysicsCollision,
};
use crate::physics::error::BodyError;
use crate::physics::handles::{BodyId, WorldId};
use crate::physics::ignore_list::IgnoredCollisionList;
use crate::physics::tracked_constraint::TrackedConstraint;
use crate::physics::user_data::PhysicsUserData;
use crate::utilities::stuffed_pointer::{
    stuff_pointer, stuffed_flags, unstuff_pointer, STUFFED_POINTER_ALIGNMENT,
};

/// Decides whether two bodies may collide. Called from physics worker threads with the body the
/// filter is set on first.
pub type CollisionFilterCallback = fn(&PhysicsBody, &PhysicsBody) -> bool;

/// Receives the "this body recorded collisions this step" notification.
///
/// Implemented by the world owning the body so it can clear the recorded count of exactly those
/// bodies before the next step.
pub trait ActiveCollisionReporter: Sync {
    fn world_id(&self) -> WorldId;

    /// Called at most once per body per step, from any worker thread.
    fn report_body_with_active_collisions(&self, body: BodyId);
}

const NO_WORLD: u32 = 0;

struct BodyFilterState {
    flags: BodyFlagState,
    ignored_collisions: IgnoredCollisionList,
    callback_based_filter: Option<CollisionFilterCallback>,
    all_collisions_disabled: bool,
}

struct RecordingState {
    /// Memory not owned by us where recorded collisions are written to
    target: Option<Arc<CollisionRecordingTarget>>,
    max_collisions_to_record: i32,
}

/// Extra state the simulation keeps for every physics engine body.
///
/// A body is shared through `Arc` between the world, constraints and gameplay code. Gameplay
/// code must not change the ignore list, filter callback or recording target while a step
/// that can touch this body is running: workers read them without coordinating with gameplay,
/// so such changes may or may not be seen by the running step.
#[repr(align(8))]
pub struct PhysicsBody {
    id: BodyId,
    filter: RwLock<BodyFilterState>,
    recording: RwLock<RecordingState>,
    recorder: DefaultCollisionRecorder,
    user_data: Mutex<PhysicsUserData>,
    constraints_this_is_part_of: Mutex<Vec<Arc<TrackedConstraint>>>,
    body_control_state_if_active: Mutex<Option<Box<BodyControlState>>>,
    /// Only for identity comparisons, see `WorldId`
    contained_in_world: AtomicU32,
    active: AtomicBool,
    detached: AtomicBool,
}

const _: () = {
    assert!(std::mem::align_of::<PhysicsBody>() >= STUFFED_POINTER_ALIGNMENT);
};

/// A reserved entry in a body's recording target. Only one thread gets any given entry per step.
pub struct CollisionRecordLocation<'a> {
    target: MappedRwLockReadGuard<'a, CollisionRecordingTarget>,
    index: usize,
}

impl<'a> CollisionRecordLocation<'a> {
    #[inline(always)]
    pub fn index(&self) -> usize {
        self.index
    }

    #[inline(always)]
    pub fn write(self, collision: PhysicsCollision) {
        self.target.write(self.index, collision);
    }
}

impl PhysicsBody {
    pub fn new(id: BodyId) -> Self {
        Self {
            id,
            filter: RwLock::new(BodyFilterState {
                flags: BodyFlagState::default(),
                ignored_collisions: IgnoredCollisionList::default(),
                callback_based_filter: None,
                all_collisions_disabled: false,
            }),
            recording: RwLock::new(RecordingState {
                target: None,
                max_collisions_to_record: 0,
            }),
            recorder: DefaultCollisionRecorder::default(),
            user_data: Mutex::new(PhysicsUserData::default()),
            constraints_this_is_part_of: Mutex::new(Vec::new()),
            body_control_state_if_active: Mutex::new(None),
            contained_in_world: AtomicU32::new(NO_WORLD),
            active: AtomicBool::new(true),
            detached: AtomicBool::new(false),
        }
    }

    // ------------------------------------ //
    // Stuffed user pointer

    /// Value to store in the engine body's user data field.
    #[inline(always)]
    pub fn calculate_user_pointer(&self) -> u64 {
        stuff_pointer(self as *const Self, self.user_pointer_flags().bits() as u64)
    }

    /// Recovers the body address from an engine user data value. Null decodes to `None`.
    #[inline(always)]
    pub fn from_user_data(body_user_data: u64) -> Option<*const PhysicsBody> {
        unstuff_pointer(body_user_data)
    }

    /// Recovers the flags stored in an engine user data value without touching the body.
    #[inline(always)]
    pub fn flags_from_user_data(body_user_data: u64) -> UserPointerFlags {
        UserPointerFlags::from_bits_truncate(stuffed_flags(body_user_data) as u8)
    }

    /// Dereferences an engine user data value.
    ///
    /// # Safety
    ///
    /// `body_user_data` must be null or a value produced by `calculate_user_pointer` of a body
    /// that stays alive for `'a`.
    #[inline(always)]
    pub unsafe fn from_user_data_ref<'a>(body_user_data: u64) -> Option<&'a PhysicsBody> {
        Self::from_user_data(body_user_data).map(|pointer| &*pointer)
    }

    #[inline(always)]
    pub fn user_pointer_flags(&self) -> UserPointerFlags {
        self.filter.read().flags.pointer_flags()
    }

    // ------------------------------------ //
    // Recording

    /// Starts recording collisions into `target`, at most `max_count` per step.
    ///
    /// `max_count` is clamped to the target capacity. Returns true if the recording flag changed.
    pub fn set_collision_recording_target(
        &self,
        target: Arc<CollisionRecordingTarget>,
        max_count: i32,
    ) -> bool {
        debug_assert!(max_count >= 0, "Negative collision recording count");
        debug_assert!(
            max_count as usize <= target.capacity(),
            "Collision recording count exceeds target capacity"
        );

        if self.is_detached() {
            warn!("Setting a collision recording target on detached body {}", self.id);
        }

        let max_count = max_count.clamp(0, target.capacity().min(i32::MAX as usize) as i32);
        {
            let mut recording = self.recording.write();
            recording.target = Some(target);
            recording.max_collisions_to_record = max_count;
        }
        self.recorder.clear();

        self.mark_collision_recording_enabled()
    }

    /// Stops recording. Returns true if the recording flag changed.
    pub fn clear_collision_recording_target(&self) -> bool {
        {
            let mut recording = self.recording.write();
            recording.target = None;
            recording.max_collisions_to_record = 0;
        }
        self.recorder.clear();

        self.mark_collision_recording_disabled()
    }

    /// Number of collisions written to the recording target during the latest step.
    #[inline(always)]
    pub fn recorded_collision_count(&self) -> i32 {
        self.recorder.recorded_count()
    }

    /// Copies out the collisions recorded during the latest step.
    pub fn recorded_collisions(&self) -> Vec<PhysicsCollision> {
        let count = self.recorded_collision_count().max(0) as usize;
        match &self.recording.read().target {
            Some(target) => target.recorded(count),
            None => Vec::new(),
        }
    }

    // ------------------------------------ //
    // Collision ignores

    /// Returns true if the filter flag changed.
    pub fn add_collision_ignore(&self, ignored_body: BodyId, skip_duplicates: bool) -> bool {
        self.update_collision_ignores(|ignored| {
            ignored.add(ignored_body, skip_duplicates);
        })
    }

    /// Returns true if the filter flag changed.
    pub fn remove_collision_ignore(&self, no_longer_ignored: BodyId) -> bool {
        self.update_collision_ignores(|ignored| {
            ignored.remove(no_longer_ignored);
        })
    }

    /// Replaces all ignores. Returns true if the filter flag changed.
    pub fn set_collision_ignores(&self, ignored_bodies: &[BodyId]) -> bool {
        self.update_collision_ignores(|ignored| ignored.set(ignored_bodies))
    }

    pub fn set_single_collision_ignore(&self, ignored_body: BodyId) -> bool {
        self.update_collision_ignores(|ignored| ignored.set(&[ignored_body]))
    }

    pub fn clear_collision_ignores(&self) -> bool {
        self.update_collision_ignores(IgnoredCollisionList::clear)
    }

    #[inline(always)]
    pub fn is_body_ignored(&self, body_id: BodyId) -> bool {
        self.filter.read().ignored_collisions.contains(body_id)
    }

    pub fn collision_ignore_count(&self) -> usize {
        self.filter.read().ignored_collisions.len()
    }

    fn update_collision_ignores<F: FnOnce(&mut IgnoredCollisionList)>(&self, update: F) -> bool {
        let mut filter = self.filter.write();
        let was_empty = filter.ignored_collisions.is_empty();

        update(&mut filter.ignored_collisions);

        match (was_empty, filter.ignored_collisions.is_empty()) {
            (true, false) => filter.flags.mark_collision_filter_enabled(),
            (false, true) => filter.flags.mark_collision_filter_disabled(),
            _ => false,
        }
    }

    // ------------------------------------ //
    // Collision filter callback

    /// Replaces the filter callback. Returns true if the filter flag changed.
    pub fn set_collision_filter(&self, callback: CollisionFilterCallback) -> bool {
        let mut filter = self.filter.write();
        filter.callback_based_filter = Some(callback);
        filter.flags.mark_collision_filter_callback_used()
    }

    /// Returns true if the filter flag changed.
    pub fn remove_collision_filter(&self) -> bool {
        let mut filter = self.filter.write();
        filter.callback_based_filter = None;
        filter.flags.mark_collision_filter_callback_disabled()
    }

    #[inline(always)]
    pub fn collision_filter(&self) -> Option<CollisionFilterCallback> {
        self.filter.read().callback_based_filter
    }

    // ------------------------------------ //
    // User pointer flags

    pub fn mark_collision_filter_enabled(&self) -> bool {
        self.filter.write().flags.mark_collision_filter_enabled()
    }

    pub fn mark_collision_filter_disabled(&self) -> bool {
        self.filter.write().flags.mark_collision_filter_disabled()
    }

    pub fn mark_collision_filter_callback_used(&self) -> bool {
        self.filter.write().flags.mark_collision_filter_callback_used()
    }

    pub fn mark_collision_filter_callback_disabled(&self) -> bool {
        self.filter.write().flags.mark_collision_filter_callback_disabled()
    }

    pub fn mark_collision_recording_enabled(&self) -> bool {
        self.filter.write().flags.mark_collision_recording_enabled()
    }

    pub fn mark_collision_recording_disabled(&self) -> bool {
        self.filter.write().flags.mark_collision_recording_disabled()
    }

    pub fn mark_collision_disable_flag_enabled(&self) -> bool {
        self.filter.write().flags.mark_collision_disable_flag_enabled()
    }

    pub fn mark_collision_disable_flag_disabled(&self) -> bool {
        self.filter.write().flags.mark_collision_disable_flag_disabled()
    }

    /// Separately stored "collides with nothing" value used by the world next to the pointer flag.
    pub fn set_disable_all_collisions(&self, new_value: bool) -> bool {
        let mut filter = self.filter.write();
        if filter.all_collisions_disabled == new_value {
            return false;
        }

        filter.all_collisions_disabled = new_value;
        true
    }

    pub fn all_collisions_disabled(&self) -> bool {
        self.filter.read().all_collisions_disabled
    }

    // ------------------------------------ //
    // User data

    #[inline(always)]
    pub fn has_user_data(&self) -> bool {
        self.user_data.lock().has_data()
    }

    pub fn user_data(&self) -> PhysicsUserData {
        self.user_data.lock().clone()
    }

    /// Copies `data` as the payload, `None` clears it. Returns false if the data was too long, in
    /// which case the payload is cleared.
    pub fn set_user_data(&self, data: Option<&[u8]>) -> bool {
        self.try_set_user_data(data).is_ok()
    }

    pub fn try_set_user_data(&self, data: Option<&[u8]>) -> Result<(), BodyError> {
        self.user_data.lock().set(data)
    }

    // ------------------------------------ //
    // Body control

    /// Creates the control state if missing. Returns true if it was created now.
    pub fn enable_body_control_if_not_already(&self) -> bool {
        let mut control = self.body_control_state_if_active.lock();
        if control.is_some() {
            return false;
        }

        *control = Some(Box::default());
        debug!("Enabled body control for {}", self.id);
        true
    }

    /// Destroys the control state. Returns true if there was one.
    pub fn disable_body_control(&self) -> bool {
        let removed = self.body_control_state_if_active.lock().take().is_some();
        if removed {
            debug!("Disabled body control for {}", self.id);
        }
        removed
    }

    pub fn has_body_control_state(&self) -> bool {
        self.body_control_state_if_active.lock().is_some()
    }

    pub fn body_control_state(&self) -> Option<BodyControlState> {
        self.body_control_state_if_active.lock().as_deref().copied()
    }

    pub fn modify_body_control_state<R, F: FnOnce(&mut BodyControlState) -> R>(
        &self,
        modify: F,
    ) -> Option<R> {
        self.body_control_state_if_active
            .lock()
            .as_deref_mut()
            .map(modify)
    }

    // ------------------------------------ //
    // State

    #[inline(always)]
    pub fn id(&self) -> BodyId {
        self.id
    }

    #[inline(always)]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub fn is_in_world(&self) -> bool {
        self.contained_in_world.load(Ordering::Acquire) != NO_WORLD
    }

    #[inline(always)]
    pub fn is_in_specific_world(&self, world: WorldId) -> bool {
        self.contained_in_world.load(Ordering::Acquire) == world.0
    }

    pub fn world(&self) -> Option<WorldId> {
        match self.contained_in_world.load(Ordering::Acquire) {
            NO_WORLD => None,
            id => Some(WorldId(id)),
        }
    }

    #[inline(always)]
    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    /// Snapshot of the constraints this body is part of.
    pub fn constraints(&self) -> Vec<Arc<TrackedConstraint>> {
        self.constraints_this_is_part_of.lock().clone()
    }
}

impl std::fmt::Debug for PhysicsBody {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("PhysicsBody")
            .field("id", &self.id)
            .field("flags", &self.user_pointer_flags())
            .field("world", &self.world())
            .field("detached", &self.is_detached())
            .finish()
    }
}

/// Operations reserved for the world, constraints and the contact listener.
pub(crate) trait WorldBodyAccess {
    fn mark_used_in_world(&self, world: WorldId);
    fn mark_removed_from_world(&self);
    fn mark_detached(&self);
    fn notify_constraint_added(&self, constraint: Arc<TrackedConstraint>);
    fn notify_constraint_removed(&self, constraint: &TrackedConstraint);
    fn notify_active_status(&self, new_active_value: bool);

    /// Prepares a location to record a new collision on this body for this physics step.
    ///
    /// Returns `None` when the body is not recording, is not in `reporter`'s world, or already
    /// has as many collisions as it can record this step.
    fn next_collision_record_location<'a, R: ActiveCollisionReporter + ?Sized>(
        &'a self,
        step_identifier: u32,
        reporter: &R,
    ) -> Option<CollisionRecordLocation<'a>>;

    /// Resets the recorded count in preparation for the next step.
    fn clear_recorded_data(&self);
}

impl WorldBodyAccess for PhysicsBody {
    fn mark_used_in_world(&self, world: WorldId) {
        debug_assert!(!self.is_in_world(), "Body added to a world twice");
        self.contained_in_world.store(world.0, Ordering::Release);
        debug!("Body {} added to {}", self.id, world);
    }

    fn mark_removed_from_world(&self) {
        debug_assert!(self.is_in_world(), "Body removed from a world it is not in");
        self.contained_in_world.store(NO_WORLD, Ordering::Release);

        // Step identifiers are per world, the next world must see our first claim as a new step
        self.recorder.reset();
        debug!("Body {} removed from its world", self.id);
    }

    fn mark_detached(&self) {
        self.detached.store(true, Ordering::Release);

        // Clear out any currently active collisions if any were recorded
        self.recorder.clear();
        debug!("Body {} detached", self.id);
    }

    fn notify_constraint_added(&self, constraint: Arc<TrackedConstraint>) {
        self.constraints_this_is_part_of.lock().push(constraint);
    }

    fn notify_constraint_removed(&self, constraint: &TrackedConstraint) {
        let mut constraints = self.constraints_this_is_part_of.lock();
        match constraints
            .iter()
            .position(|existing| existing.handle() == constraint.handle())
        {
            Some(index) => {
                constraints.swap_remove(index);
            }
            None => warn!(
                "Body {} was not part of removed constraint {}",
                self.id,
                constraint.handle()
            ),
        }
    }

    #[inline(always)]
    fn notify_active_status(&self, new_active_value: bool) {
        self.active.store(new_active_value, Ordering::Release);
    }

    #[inline(always)]
    fn next_collision_record_location<'a, R: ActiveCollisionReporter + ?Sized>(
        &'a self,
        step_identifier: u32,
        reporter: &R,
    ) -> Option<CollisionRecordLocation<'a>> {
        if !self.is_in_specific_world(reporter.world_id()) || self.is_detached() {
            return None;
        }

        let recording = self.recording.read();
        let max_count = recording.max_collisions_to_record;
        let target =
            RwLockReadGuard::try_map(recording, |recording| recording.target.as_deref()).ok()?;

        let index = self.recorder.reserve_index(step_identifier, max_count, || {
            // New step started, the world clears our count before the next one
            reporter.report_body_with_active_collisions(self.id);
        })?;

        Some(CollisionRecordLocation { target, index })
    }

    #[inline(always)]
    fn clear_recorded_data(&self) {
        self.recorder.clear();
    }
}
