use std::hash::Hash;
use std::sync::atomic::{AtomicU32, Ordering};

// Newtype Pattern for enhanced type safety
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct BodyId(pub u32);

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct WorldId(pub u32);

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct ConstraintHandle(pub u32);

static NEXT_WORLD_ID: AtomicU32 = AtomicU32::new(1);

impl WorldId {
    /// Allocates a process-unique world identity token.
    pub fn next() -> Self {
        WorldId(NEXT_WORLD_ID.fetch_add(1, Ordering::Relaxed))
    }
}

// Simple implementations for Display for user-friendliness
impl std::fmt::Display for BodyId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "BodyId<{}>", self.0)
    }
}

impl std::fmt::Display for WorldId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "WorldId<{}>", self.0)
    }
}

impl std::fmt::Display for ConstraintHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "ConstraintHandle<{}>", self.0)
    }
}
