// OTA (Over-The-Air) update subsystem

pub mod catalog;
pub mod installer;
pub mod orchestrator;
pub mod reporter;

pub use catalog::{CatalogClient, CheckError, UpdateDescriptor};
pub use installer::{AbortSignal, InstallError};
pub use orchestrator::{CycleOutcome, UpdateOrchestrator};
pub use reporter::{StatusEvent, StatusReporter, UpdateStatus};

// Update cycle:
// 1. Ask the server whether a newer build exists for this device
// 2. Stream the image into the inactive slot, reporting progress
// 3. Verify the SHA256 against the descriptor
// 4. Finalize and activate the slot
// 5. Report success/failure; restarting is the caller's decision
