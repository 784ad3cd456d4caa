// Image installer - owns the write-target lifecycle for one install
// attempt: acquire slot -> stream-write -> verify -> finalize -> activate.
// Every failure path releases the slot before returning so the next cycle
// can reacquire it.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::ota::catalog::UpdateDescriptor;
use crate::storage::{FirmwareSlot, FirmwareStorage};
use crate::transport::Transport;

/// Download read size. Large enough to amortize per-call overhead, small
/// enough to bound peak memory on constrained devices.
pub const CHUNK_SIZE: usize = 4096;

/// Progress callbacks fire at most once per this many bytes written.
pub const PROGRESS_INTERVAL_BYTES: u64 = 100 * 1024;

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("no inactive slot available: {0}")]
    NoTargetSlot(String),
    #[error("download failed after {bytes_written} bytes: {reason}")]
    Download { bytes_written: u64, reason: String },
    #[error("slot write failed after {bytes_written} bytes: {reason}")]
    Write { bytes_written: u64, reason: String },
    #[error("image hash mismatch: expected {expected}, computed {computed}")]
    Integrity {
        bytes_written: u64,
        expected: String,
        computed: String,
    },
    #[error("finalize failed after {bytes_written} bytes: {reason}")]
    Finalize { bytes_written: u64, reason: String },
    #[error("activation failed: {reason}")]
    Activation { bytes_written: u64, reason: String },
    #[error("install aborted after {bytes_written} bytes")]
    Aborted { bytes_written: u64 },
}

impl InstallError {
    /// How far the write got before the attempt died. Reported to the
    /// server alongside the failure.
    pub fn bytes_written(&self) -> u64 {
        match self {
            InstallError::NoTargetSlot(_) => 0,
            InstallError::Download { bytes_written, .. }
            | InstallError::Write { bytes_written, .. }
            | InstallError::Integrity { bytes_written, .. }
            | InstallError::Finalize { bytes_written, .. }
            | InstallError::Activation { bytes_written, .. }
            | InstallError::Aborted { bytes_written } => *bytes_written,
        }
    }
}

/// Cooperative cancellation flag checked between chunks. Raising it routes
/// the session through the same slot-cleanup path as a stream error.
#[derive(Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InstallState {
    SlotAcquired,
    Writing,
    Finalizing,
    Activated,
    Aborted,
}

/// Stream the descriptor's image into an inactive slot and activate it.
/// Returns the total bytes written on success. At most one session exists
/// at a time; the orchestrator never calls this concurrently with itself.
pub fn install<T, S, F>(
    transport: &mut T,
    storage: &mut S,
    descriptor: &UpdateDescriptor,
    abort: &AbortSignal,
    progress: F,
) -> Result<u64, InstallError>
where
    T: Transport,
    S: FirmwareStorage,
    F: FnMut(u64, u64),
{
    let slot = storage
        .acquire_inactive_slot()
        .map_err(|e| InstallError::NoTargetSlot(e.to_string()))?;

    InstallSession::new(slot).run(transport, descriptor, abort, progress)
}

struct InstallSession<S: FirmwareSlot> {
    slot: S,
    state: InstallState,
    bytes_written: u64,
    last_reported: u64,
    hasher: Sha256,
}

impl<S: FirmwareSlot> InstallSession<S> {
    fn new(slot: S) -> Self {
        Self {
            slot,
            state: InstallState::SlotAcquired,
            bytes_written: 0,
            last_reported: 0,
            hasher: Sha256::new(),
        }
    }

    fn run<T, F>(
        mut self,
        transport: &mut T,
        descriptor: &UpdateDescriptor,
        abort: &AbortSignal,
        mut progress: F,
    ) -> Result<u64, InstallError>
    where
        T: Transport,
        F: FnMut(u64, u64),
    {
        log::info!(
            "installing firmware {} v{} ({} bytes) from {}",
            descriptor.firmware_id,
            descriptor.version,
            descriptor.file_size,
            descriptor.download_url
        );

        let mut stream = match transport.open_stream(&descriptor.download_url) {
            Ok(stream) => stream,
            Err(e) => {
                return Err(self.fail(InstallError::Download {
                    bytes_written: 0,
                    reason: e.to_string(),
                }))
            }
        };

        self.state = InstallState::Writing;
        let mut buf = [0u8; CHUNK_SIZE];
        loop {
            if abort.is_raised() {
                let bytes_written = self.bytes_written;
                return Err(self.fail(InstallError::Aborted { bytes_written }));
            }

            let read = match stream.read(&mut buf) {
                Ok(read) => read,
                Err(e) => {
                    let bytes_written = self.bytes_written;
                    return Err(self.fail(InstallError::Download {
                        bytes_written,
                        reason: e.to_string(),
                    }));
                }
            };
            // Zero-length read is end-of-data, not an error
            if read == 0 {
                break;
            }

            let chunk = &buf[..read];
            if let Err(e) = self.slot.write_chunk(chunk) {
                let bytes_written = self.bytes_written;
                return Err(self.fail(InstallError::Write {
                    bytes_written,
                    reason: e.to_string(),
                }));
            }
            self.hasher.update(chunk);
            self.bytes_written += read as u64;

            if self.bytes_written - self.last_reported >= PROGRESS_INTERVAL_BYTES {
                self.last_reported = self.bytes_written;
                progress(self.bytes_written, descriptor.file_size);
            }
        }

        // Verify the written stream against the descriptor before anything
        // can make it bootable.
        let computed = hex_digest(&self.hasher.finalize_reset());
        if !computed.eq_ignore_ascii_case(&descriptor.file_hash) {
            let bytes_written = self.bytes_written;
            let expected = descriptor.file_hash.clone();
            return Err(self.fail(InstallError::Integrity {
                bytes_written,
                expected,
                computed,
            }));
        }

        self.state = InstallState::Finalizing;
        if let Err(e) = self.slot.finalize() {
            let bytes_written = self.bytes_written;
            return Err(self.fail(InstallError::Finalize {
                bytes_written,
                reason: e.to_string(),
            }));
        }

        if let Err(e) = self.slot.activate() {
            let bytes_written = self.bytes_written;
            return Err(self.fail(InstallError::Activation {
                bytes_written,
                reason: e.to_string(),
            }));
        }

        self.state = InstallState::Activated;
        log::info!(
            "install complete: {} bytes written and verified, slot activated",
            self.bytes_written
        );
        Ok(self.bytes_written)
    }

    /// Single cleanup path for every failure and for cancellation: release
    /// the slot so the next cycle can reacquire it, then hand the error back.
    fn fail(&mut self, error: InstallError) -> InstallError {
        log::warn!("install failed in state {:?}: {error}", self.state);
        self.slot.abort();
        self.state = InstallState::Aborted;
        error
    }
}

fn hex_digest(digest: &[u8]) -> String {
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
