// Update orchestrator - runs one complete check -> install -> report cycle
// and classifies the outcome. Scheduling, retries and device restarts are
// the caller's business.

use crate::config::AgentConfig;
use crate::identity::DeviceIdentity;
use crate::ota::catalog::{CatalogClient, CheckError};
use crate::ota::installer::{self, AbortSignal, InstallError};
use crate::ota::reporter::{StatusEvent, StatusReporter};
use crate::storage::FirmwareStorage;
use crate::transport::Transport;

/// Classified result of one cycle. Every variant returns control to the
/// caller; nothing here is process-fatal.
#[derive(Debug)]
pub enum CycleOutcome {
    /// No newer build, or the server offered one that is not actually newer.
    NoUpdate,
    /// The check itself failed; treat as "no update this cycle" and retry
    /// on the next scheduled cycle.
    CheckFailed(CheckError),
    /// A new image is written, verified and activated. The caller decides
    /// when to restart into it.
    Installed {
        version: String,
        build_number: u32,
        bytes_written: u64,
    },
    /// The install attempt died; the slot has been released.
    InstallFailed(InstallError),
}

pub struct UpdateOrchestrator<T: Transport, S: FirmwareStorage> {
    catalog: CatalogClient,
    reporter: StatusReporter<T>,
    transport: T,
    storage: S,
    abort: AbortSignal,
}

impl<T: Transport, S: FirmwareStorage> UpdateOrchestrator<T, S> {
    /// `transport` carries the check request and the image download;
    /// `reporter_transport` carries status reports so progress can be sent
    /// while the download stream is open.
    pub fn new(config: &AgentConfig, transport: T, reporter_transport: T, storage: S) -> Self {
        Self {
            catalog: CatalogClient::new(&config.server_url),
            reporter: StatusReporter::new(&config.server_url, reporter_transport),
            transport,
            storage,
            abort: AbortSignal::new(),
        }
    }

    /// Clone of the signal that cancels an in-flight install.
    pub fn abort_signal(&self) -> AbortSignal {
        self.abort.clone()
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    /// One complete cycle: check, maybe install, report the outcome.
    /// Never runs concurrently with itself; the streaming install inside is
    /// the only long-blocking region and honors the abort signal.
    pub fn run_cycle(&mut self, identity: &DeviceIdentity) -> CycleOutcome {
        log::info!("checking for updates ({identity})");

        let descriptor = match self.catalog.check_for_update(&mut self.transport, identity) {
            Ok(Some(descriptor)) => descriptor,
            Ok(None) => {
                log::info!("no update available");
                return CycleOutcome::NoUpdate;
            }
            Err(e) => {
                log::warn!("update check failed: {e}");
                return CycleOutcome::CheckFailed(e);
            }
        };

        // A server should only offer strictly newer builds; don't reinstall
        // the running one if it misbehaves.
        if descriptor.build_number <= identity.current_build {
            log::warn!(
                "server offered build {} but device already runs build {}, ignoring",
                descriptor.build_number,
                identity.current_build
            );
            return CycleOutcome::NoUpdate;
        }

        log::info!(
            "update available: v{} build {} ({} bytes)",
            descriptor.version,
            descriptor.build_number,
            descriptor.file_size
        );

        let device_id = identity.device_id;
        let firmware_id = descriptor.firmware_id;

        let reporter = &mut self.reporter;
        reporter.report(&StatusEvent::downloading(device_id, firmware_id, 0));

        let result = installer::install(
            &mut self.transport,
            &mut self.storage,
            &descriptor,
            &self.abort,
            |bytes, _total| {
                reporter.report(&StatusEvent::downloading(device_id, firmware_id, bytes));
            },
        );

        match result {
            Ok(bytes_written) => {
                self.reporter
                    .report(&StatusEvent::success(device_id, firmware_id, bytes_written));
                CycleOutcome::Installed {
                    version: descriptor.version,
                    build_number: descriptor.build_number,
                    bytes_written,
                }
            }
            Err(e) => {
                self.reporter.report(&StatusEvent::failed(
                    device_id,
                    firmware_id,
                    e.bytes_written(),
                    e.to_string(),
                ));
                CycleOutcome::InstallFailed(e)
            }
        }
    }
}
