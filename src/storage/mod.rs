// Slot storage seam. A slot is a region of persistent storage large enough
// for one complete firmware image, distinct from the region the device is
// currently running from. Writes are append-only; activation is the single
// atomic operation that flips which slot boots next.

pub mod file_store;

pub use file_store::{BootRecord, FileSlotStore};

use thiserror::Error;

#[derive(Debug, Error)]
#[error("{message}")]
pub struct StorageError {
    message: String,
}

impl StorageError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        StorageError::new(e.to_string())
    }
}

/// Exclusive write capability over one inactive slot.
///
/// The lifecycle is strictly `write_chunk`* -> `finalize` -> `activate`,
/// or `abort` from any point. A slot that was never finalized must never
/// become bootable; backends enforce that in `activate`.
pub trait FirmwareSlot {
    /// Append a chunk at the current write position.
    fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), StorageError>;

    /// Mark the written image as complete. No writes may follow.
    fn finalize(&mut self) -> Result<(), StorageError>;

    /// Make this slot the boot target. Only valid after `finalize`.
    fn activate(&mut self) -> Result<(), StorageError>;

    /// Discard the partial image and release the slot for reuse.
    fn abort(&mut self);
}

/// Storage backend that hands out inactive slots, one at a time.
pub trait FirmwareStorage {
    type Slot: FirmwareSlot;

    fn acquire_inactive_slot(&mut self) -> Result<Self::Slot, StorageError>;
}
