use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::debug;

use crate::physics::handles::ConstraintHandle;
use crate::physics::physics_body::{PhysicsBody, WorldBodyAccess};

/// A constraint between one or two bodies that the bodies know they are part of.
///
/// While attached, each body holds a reference to the constraint and the constraint holds
/// references to its bodies. Detaching drops the body side references so nothing keeps the
/// other alive afterwards.
pub struct TrackedConstraint {
    handle: ConstraintHandle,
    first_body: Arc<PhysicsBody>,
    second_body: Option<Arc<PhysicsBody>>,
    attached: AtomicBool,
}

impl TrackedConstraint {
    pub(crate) fn new(
        handle: ConstraintHandle,
        first_body: Arc<PhysicsBody>,
        second_body: Option<Arc<PhysicsBody>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            handle,
            first_body,
            second_body,
            attached: AtomicBool::new(false),
        })
    }

    #[inline(always)]
    pub fn handle(&self) -> ConstraintHandle {
        self.handle
    }

    pub fn first_body(&self) -> &Arc<PhysicsBody> {
        &self.first_body
    }

    pub fn second_body(&self) -> Option<&Arc<PhysicsBody>> {
        self.second_body.as_ref()
    }

    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    /// True if `body` is one of the constrained bodies.
    pub fn involves(&self, body: &PhysicsBody) -> bool {
        self.bodies().any(|existing| existing.id() == body.id())
    }

    fn bodies(&self) -> impl Iterator<Item = &Arc<PhysicsBody>> {
        std::iter::once(&self.first_body).chain(self.second_body.iter())
    }

    /// Registers this constraint with its bodies. Does nothing if already attached.
    pub(crate) fn attach(self: &Arc<Self>) {
        if self.attached.swap(true, Ordering::AcqRel) {
            return;
        }

        for body in self.bodies() {
            body.notify_constraint_added(Arc::clone(self));
        }
        debug!("Attached constraint {}", self.handle);
    }

    /// Unregisters this constraint from its bodies. Does nothing if not attached.
    pub(crate) fn detach(&self) {
        if !self.attached.swap(false, Ordering::AcqRel) {
            return;
        }

        for body in self.bodies() {
            body.notify_constraint_removed(self);
        }
        debug!("Detached constraint {}", self.handle);
    }
}

impl std::fmt::Debug for TrackedConstraint {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("TrackedConstraint")
            .field("handle", &self.handle)
            .field("first_body", &self.first_body.id())
            .field("second_body", &self.second_body.as_ref().map(|body| body.id()))
            .field("attached", &self.is_attached())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::handles::BodyId;

    #[test]
    fn test_attach_detach_updates_both_bodies() {
        let first = Arc::new(PhysicsBody::new(BodyId(1)));
        let second = Arc::new(PhysicsBody::new(BodyId(2)));

        let constraint =
            TrackedConstraint::new(ConstraintHandle(0), first.clone(), Some(second.clone()));
        assert!(!constraint.is_attached());
        assert!(first.constraints().is_empty());

        constraint.attach();
        constraint.attach();
        assert!(constraint.is_attached());
        assert_eq!(first.constraints().len(), 1);
        assert_eq!(second.constraints().len(), 1);
        assert!(constraint.involves(&second));

        constraint.detach();
        assert!(!constraint.is_attached());
        assert!(first.constraints().is_empty());
        assert!(second.constraints().is_empty());

        // Only the test's reference is left on the bodies' side
        assert_eq!(Arc::strong_count(&constraint), 1);
    }

    #[test]
    fn test_single_body_constraint() {
        let body = Arc::new(PhysicsBody::new(BodyId(3)));
        let other = PhysicsBody::new(BodyId(4));
        let constraint = TrackedConstraint::new(ConstraintHandle(1), body.clone(), None);

        constraint.attach();
        assert_eq!(body.constraints()[0].handle(), ConstraintHandle(1));
        assert!(!constraint.involves(&other));

        constraint.detach();
        constraint.detach();
        assert!(body.constraints().is_empty());
    }
}
