use bitflags::bitflags;

use crate::utilities::stuffed_pointer::STUFFED_POINTER_DATA_MASK;

bitflags! {
    /// Flags mirrored into the low bits of a body's stuffed user data word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct UserPointerFlags: u8 {
        /// The body has an ignore list or a filter callback that must be consulted.
        const COLLISION_FILTER = 0x1;
        /// Contacts on the body are written into its recording target.
        const RECORDING = 0x2;
        /// The body collides with nothing.
        const DISABLE_COLLISION = 0x4;

        /// Any bit requiring per-pair checks before contact generation.
        const SPECIAL_COLLISION = Self::COLLISION_FILTER.bits() | Self::DISABLE_COLLISION.bits();
    }
}

const _: () = {
    assert!((UserPointerFlags::all().bits() as u64) & !STUFFED_POINTER_DATA_MASK == 0);
};

/// Flag state of a body.
///
/// `COLLISION_FILTER` has two independent reasons to be on: a non-empty ignore list and a filter
/// callback. It is recomputed from both after every change so it is on exactly when at least one
/// of them is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BodyFlagState {
    filter_list: bool,
    filter_callback: bool,
    pointer_flags: UserPointerFlags,
}

impl BodyFlagState {
    /// The bits that go into the stuffed pointer.
    #[inline(always)]
    pub fn pointer_flags(&self) -> UserPointerFlags {
        self.pointer_flags
    }

    #[inline(always)]
    pub fn has_filter_list(&self) -> bool {
        self.filter_list
    }

    #[inline(always)]
    pub fn has_filter_callback(&self) -> bool {
        self.filter_callback
    }

    /// Ignore list became non-empty. Returns true if the visible filter flag changed.
    pub fn mark_collision_filter_enabled(&mut self) -> bool {
        Self::set_reason(&mut self.filter_list, true, &mut self.pointer_flags, self.filter_callback)
    }

    /// Ignore list became empty. Returns true if the visible filter flag changed.
    pub fn mark_collision_filter_disabled(&mut self) -> bool {
        Self::set_reason(&mut self.filter_list, false, &mut self.pointer_flags, self.filter_callback)
    }

    /// Filter callback was set. Returns true if the visible filter flag changed.
    pub fn mark_collision_filter_callback_used(&mut self) -> bool {
        Self::set_reason(&mut self.filter_callback, true, &mut self.pointer_flags, self.filter_list)
    }

    /// Filter callback was removed. Returns true if the visible filter flag changed.
    pub fn mark_collision_filter_callback_disabled(&mut self) -> bool {
        Self::set_reason(&mut self.filter_callback, false, &mut self.pointer_flags, self.filter_list)
    }

    pub fn mark_collision_recording_enabled(&mut self) -> bool {
        self.set_single(UserPointerFlags::RECORDING, true)
    }

    pub fn mark_collision_recording_disabled(&mut self) -> bool {
        self.set_single(UserPointerFlags::RECORDING, false)
    }

    pub fn mark_collision_disable_flag_enabled(&mut self) -> bool {
        self.set_single(UserPointerFlags::DISABLE_COLLISION, true)
    }

    pub fn mark_collision_disable_flag_disabled(&mut self) -> bool {
        self.set_single(UserPointerFlags::DISABLE_COLLISION, false)
    }

    fn set_reason(
        reason: &mut bool,
        value: bool,
        pointer_flags: &mut UserPointerFlags,
        other_reason: bool,
    ) -> bool {
        if *reason == value {
            return false;
        }
        *reason = value;

        let old = *pointer_flags;
        pointer_flags.set(UserPointerFlags::COLLISION_FILTER, value || other_reason);
        old != *pointer_flags
    }

    fn set_single(&mut self, flag: UserPointerFlags, value: bool) -> bool {
        let old = self.pointer_flags;
        self.pointer_flags.set(flag, value);
        old != self.pointer_flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter_visible(state: &BodyFlagState) -> bool {
        state.pointer_flags().contains(UserPointerFlags::COLLISION_FILTER)
    }

    #[test]
    fn test_special_flag_is_filter_or_disable() {
        assert_eq!(UserPointerFlags::SPECIAL_COLLISION.bits(), 0x5);
        assert!(!UserPointerFlags::SPECIAL_COLLISION.contains(UserPointerFlags::RECORDING));
    }

    #[test]
    fn test_list_then_callback() {
        let mut state = BodyFlagState::default();
        assert!(state.mark_collision_filter_enabled());
        assert!(!state.mark_collision_filter_enabled());
        // Already visible through the list
        assert!(!state.mark_collision_filter_callback_used());
        assert!(filter_visible(&state));

        // Callback still keeps the flag on
        assert!(!state.mark_collision_filter_disabled());
        assert!(filter_visible(&state));

        assert!(state.mark_collision_filter_callback_disabled());
        assert!(!filter_visible(&state));
        assert!(!state.mark_collision_filter_callback_disabled());
    }

    #[test]
    fn test_disable_without_enable_is_no_change() {
        let mut state = BodyFlagState::default();
        assert!(!state.mark_collision_filter_disabled());
        assert!(!state.mark_collision_filter_callback_disabled());
        assert_eq!(state.pointer_flags(), UserPointerFlags::empty());
    }

    #[test]
    fn test_visible_flag_is_or_of_reasons_for_all_sequences() {
        // Every sequence of 6 operations out of the four toggles
        for sequence in 0..4u32.pow(6) {
            let mut state = BodyFlagState::default();
            let mut code = sequence;
            for _ in 0..6 {
                let before = filter_visible(&state);
                let changed = match code % 4 {
                    0 => state.mark_collision_filter_enabled(),
                    1 => state.mark_collision_filter_disabled(),
                    2 => state.mark_collision_filter_callback_used(),
                    _ => state.mark_collision_filter_callback_disabled(),
                };
                code /= 4;

                let after = filter_visible(&state);
                assert_eq!(after, state.has_filter_list() || state.has_filter_callback());
                assert_eq!(changed, before != after);
            }
        }
    }

    #[test]
    fn test_single_reason_flags() {
        let mut state = BodyFlagState::default();
        assert!(state.mark_collision_recording_enabled());
        assert!(!state.mark_collision_recording_enabled());
        assert!(state.mark_collision_disable_flag_enabled());
        assert_eq!(
            state.pointer_flags(),
            UserPointerFlags::RECORDING | UserPointerFlags::DISABLE_COLLISION
        );
        assert!(state.mark_collision_recording_disabled());
        assert!(!state.mark_collision_recording_disabled());
        assert!(state.mark_collision_disable_flag_disabled());
        assert!(!state.mark_collision_disable_flag_disabled());
        assert!(state.pointer_flags().is_empty());
    }
}
