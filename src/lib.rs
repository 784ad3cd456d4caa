//! Firmware update agent for fielded devices.
//!
//! Periodically asks an update server whether a newer build exists for this
//! device, streams the image into the inactive storage slot, verifies it and
//! activates it, reporting progress back to the server along the way.
//! Transport and slot storage are trait seams so the update logic can be
//! exercised on the host without real flash or a live server.

pub mod config;
pub mod identity;
pub mod ota;
pub mod storage;
pub mod transport;

pub use crate::identity::DeviceIdentity;
pub use crate::ota::{CycleOutcome, UpdateOrchestrator};
