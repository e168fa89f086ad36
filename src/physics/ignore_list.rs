use smallvec::SmallVec;

use crate::physics::handles::BodyId;

/// Bodies a body never collides with. Usually only a handful, so lookups are linear.
#[derive(Debug, Clone, Default)]
pub struct IgnoredCollisionList {
    ignored: SmallVec<[BodyId; 4]>,
}

impl IgnoredCollisionList {
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.ignored.is_empty()
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.ignored.len()
    }

    #[inline(always)]
    pub fn contains(&self, body_id: BodyId) -> bool {
        self.ignored.iter().any(|ignored| *ignored == body_id)
    }

    /// Adds an entry. Returns false if `skip_duplicates` is set and the body is already present.
    pub fn add(&mut self, body_id: BodyId, skip_duplicates: bool) -> bool {
        if skip_duplicates && self.contains(body_id) {
            return false;
        }

        self.ignored.push(body_id);
        true
    }

    /// Removes the first entry matching `body_id`. Returns true if one was found.
    pub fn remove(&mut self, body_id: BodyId) -> bool {
        match self.ignored.iter().position(|ignored| *ignored == body_id) {
            Some(index) => {
                self.ignored.swap_remove(index);
                true
            }
            None => false,
        }
    }

    pub fn set(&mut self, body_ids: &[BodyId]) {
        self.ignored.clear();
        self.ignored.extend_from_slice(body_ids);
    }

    pub fn clear(&mut self) {
        self.ignored.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = BodyId> + '_ {
        self.ignored.iter().copied()
    }
}
