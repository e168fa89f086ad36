use thiserror::Error;

use crate::physics::handles::{BodyId, WorldId};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BodyError {
    #[error("user data of {length} bytes does not fit in {capacity} bytes")]
    UserDataTooLarge { length: usize, capacity: usize },
    #[error("body {body} is already in world {world}")]
    AlreadyInWorld { body: BodyId, world: WorldId },
    #[error("body {body} is not in world {world}")]
    NotInWorld { body: BodyId, world: WorldId },
    #[error("body {0} is detached")]
    Detached(BodyId),
}
