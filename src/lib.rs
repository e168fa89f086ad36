pub mod physics;
pub mod utilities;

pub use physics::{
    ActiveCollisionReporter, BodyError, BodyId, CollisionFilterCallback, CollisionRecordingTarget,
    PhysicalWorld, PhysicsBody, PhysicsCollision, PhysicsWorldSettings, UserPointerFlags,
};
