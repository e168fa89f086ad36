use log::warn;

use crate::physics::error::BodyError;

/// Maximum number of opaque payload bytes a body can carry.
pub const PHYSICS_USER_DATA_SIZE: usize = 64;

/// Opaque bytes attached to a body by gameplay code and handed back in collision callbacks.
#[derive(Debug, Clone)]
pub struct PhysicsUserData {
    data: [u8; PHYSICS_USER_DATA_SIZE],
    length: usize,
}

impl Default for PhysicsUserData {
    fn default() -> Self {
        Self {
            data: [0; PHYSICS_USER_DATA_SIZE],
            length: 0,
        }
    }
}

impl PhysicsUserData {
    #[inline(always)]
    pub fn has_data(&self) -> bool {
        self.length > 0
    }

    /// The currently set bytes.
    #[inline(always)]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.length]
    }

    /// Replaces the payload. `None` clears it.
    ///
    /// Too long data clears the payload as well and is reported as an error, nothing is partially
    /// copied.
    pub fn set(&mut self, data: Option<&[u8]>) -> Result<(), BodyError> {
        match data {
            Some(bytes) if bytes.len() > PHYSICS_USER_DATA_SIZE => {
                self.length = 0;
                warn!(
                    "Physics body user data of {} bytes exceeds the limit of {}",
                    bytes.len(),
                    PHYSICS_USER_DATA_SIZE
                );
                Err(BodyError::UserDataTooLarge {
                    length: bytes.len(),
                    capacity: PHYSICS_USER_DATA_SIZE,
                })
            }
            Some(bytes) => {
                self.data[..bytes.len()].copy_from_slice(bytes);
                self.length = bytes.len();
                Ok(())
            }
            None => {
                self.length = 0;
                Ok(())
            }
        }
    }
}
