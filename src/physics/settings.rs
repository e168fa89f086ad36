/// Allocation sizes and threading for a `PhysicalWorld`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysicsWorldSettings {
    /// The number of bodies to allocate space for.
    pub bodies: usize,
    /// The number of constraints to allocate bookkeeping space for.
    pub constraints: usize,
    /// Expected number of bodies recording collisions in a single step.
    pub active_collision_bodies: usize,
    /// Threads contact batches are spread over. Values below 1 are treated as 1.
    pub worker_count: usize,
}

impl PhysicsWorldSettings {
    pub fn new(
        bodies: usize,
        constraints: usize,
        active_collision_bodies: usize,
        worker_count: usize,
    ) -> Self {
        Self {
            bodies,
            constraints,
            active_collision_bodies,
            worker_count,
        }
    }
}

impl Default for PhysicsWorldSettings {
    fn default() -> Self {
        Self {
            bodies: 128,
            constraints: 32,
            active_collision_bodies: 16,
            worker_count: std::thread::available_parallelism()
                .map(|count| count.get())
                .unwrap_or(1),
        }
    }
}
