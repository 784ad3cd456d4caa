// End-to-end update cycles against a scripted server and in-memory slot
// storage: no update, clean install, mid-download failure, finalize failure.

use std::cell::RefCell;
use std::io::{self, Cursor, Read};
use std::rc::Rc;

use sha2::{Digest, Sha256};

use ota_agent::config::AgentConfig;
use ota_agent::identity::DeviceIdentity;
use ota_agent::ota::{CycleOutcome, InstallError, UpdateOrchestrator};
use ota_agent::storage::{FileSlotStore, FirmwareSlot, FirmwareStorage, StorageError};
use ota_agent::transport::{Transport, TransportError};

// ---------------------------------------------------------------------------
// Scripted server
// ---------------------------------------------------------------------------

enum DownloadPlan {
    Serve(Vec<u8>),
    ServeThenFail(Vec<u8>),
}

#[derive(Default)]
struct ServerState {
    check_body: Option<String>,
    check_unreachable: bool,
    download: Option<DownloadPlan>,
    statuses: Vec<serde_json::Value>,
}

/// Both orchestrator transports (check/download and status) share one
/// server state, like two connections to the same host.
#[derive(Clone, Default)]
struct MockServer(Rc<RefCell<ServerState>>);

impl MockServer {
    fn respond_to_check(&self, body: &str) {
        self.0.borrow_mut().check_body = Some(body.to_string());
    }

    fn serve_download(&self, plan: DownloadPlan) {
        self.0.borrow_mut().download = Some(plan);
    }

    fn statuses(&self) -> Vec<serde_json::Value> {
        self.0.borrow().statuses.clone()
    }
}

struct FailingStream {
    data: Cursor<Vec<u8>>,
}

impl Read for FailingStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.data.read(buf)?;
        if read == 0 {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer reset"));
        }
        Ok(read)
    }
}

impl Transport for MockServer {
    fn post_json(
        &mut self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<Vec<u8>, TransportError> {
        let mut state = self.0.borrow_mut();
        if url.ends_with("/api/ota/status") {
            state.statuses.push(body.clone());
            return Ok(b"{}".to_vec());
        }
        if url.ends_with("/api/ota/check") {
            if state.check_unreachable {
                return Err(TransportError::Connection("connection refused".to_string()));
            }
            let body = state.check_body.clone().expect("no check response scripted");
            return Ok(body.into_bytes());
        }
        panic!("unexpected POST to {url}");
    }

    fn open_stream(&mut self, _url: &str) -> Result<Box<dyn Read>, TransportError> {
        match self.0.borrow_mut().download.take() {
            Some(DownloadPlan::Serve(data)) => Ok(Box::new(Cursor::new(data))),
            Some(DownloadPlan::ServeThenFail(data)) => Ok(Box::new(FailingStream {
                data: Cursor::new(data),
            })),
            None => Err(TransportError::Status(404)),
        }
    }
}

// ---------------------------------------------------------------------------
// In-memory slot storage
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SlotState {
    data: Vec<u8>,
    in_use: bool,
    finalized: bool,
    activated: bool,
    aborted: bool,
    fail_finalize: bool,
}

#[derive(Clone, Default)]
struct MemoryStore(Rc<RefCell<SlotState>>);

struct MemorySlot(Rc<RefCell<SlotState>>);

impl FirmwareStorage for MemoryStore {
    type Slot = MemorySlot;

    fn acquire_inactive_slot(&mut self) -> Result<MemorySlot, StorageError> {
        let mut state = self.0.borrow_mut();
        if state.in_use {
            return Err(StorageError::new("inactive slot already claimed"));
        }
        state.in_use = true;
        state.data.clear();
        Ok(MemorySlot(self.0.clone()))
    }
}

impl FirmwareSlot for MemorySlot {
    fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), StorageError> {
        self.0.borrow_mut().data.extend_from_slice(chunk);
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), StorageError> {
        let mut state = self.0.borrow_mut();
        if state.fail_finalize {
            return Err(StorageError::new("simulated finalize failure"));
        }
        state.finalized = true;
        Ok(())
    }

    fn activate(&mut self) -> Result<(), StorageError> {
        let mut state = self.0.borrow_mut();
        assert!(state.finalized, "activation requires a finalized slot");
        state.activated = true;
        state.in_use = false;
        Ok(())
    }

    fn abort(&mut self) {
        let mut state = self.0.borrow_mut();
        state.aborted = true;
        state.in_use = false;
        state.data.clear();
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn sha256_hex(data: &[u8]) -> String {
    Sha256::digest(data)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn image(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

fn update_offer(build_number: u32, data: &[u8]) -> String {
    format!(
        r#"{{
            "update_available": true,
            "firmware_id": 7,
            "version": "1.1.0",
            "build_number": {build_number},
            "download_url": "/api/ota/download/7",
            "file_hash": "{hash}",
            "file_size": {size}
        }}"#,
        hash = sha256_hex(data),
        size = data.len()
    )
}

fn identity() -> DeviceIdentity {
    let mut identity = DeviceIdentity::from_config(&AgentConfig {
        device_id: 123,
        ..AgentConfig::default()
    });
    identity.advance("1.0.0", 3);
    identity
}

fn orchestrator_with(
    server: &MockServer,
    store: &MemoryStore,
) -> UpdateOrchestrator<MockServer, MemoryStore> {
    UpdateOrchestrator::new(
        &AgentConfig::default(),
        server.clone(),
        server.clone(),
        store.clone(),
    )
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[test]
fn no_update_sends_no_status_events() {
    let server = MockServer::default();
    server.respond_to_check(r#"{"update_available": false}"#);
    let store = MemoryStore::default();

    let outcome = orchestrator_with(&server, &store).run_cycle(&identity());

    assert!(matches!(outcome, CycleOutcome::NoUpdate));
    assert!(server.statuses().is_empty());
    assert!(!store.0.borrow().in_use);
}

#[test]
fn unreachable_server_means_no_update_this_cycle() {
    let server = MockServer::default();
    server.0.borrow_mut().check_unreachable = true;
    let store = MemoryStore::default();

    let outcome = orchestrator_with(&server, &store).run_cycle(&identity());

    assert!(matches!(outcome, CycleOutcome::CheckFailed(_)));
    assert!(server.statuses().is_empty());
}

#[test]
fn clean_install_reports_progress_and_success() {
    let data = image(250_000);
    let server = MockServer::default();
    server.respond_to_check(&update_offer(5, &data));
    server.serve_download(DownloadPlan::Serve(data.clone()));
    let store = MemoryStore::default();

    let outcome = orchestrator_with(&server, &store).run_cycle(&identity());

    match outcome {
        CycleOutcome::Installed {
            version,
            build_number,
            bytes_written,
        } => {
            assert_eq!(version, "1.1.0");
            assert_eq!(build_number, 5);
            assert_eq!(bytes_written, 250_000);
        }
        other => panic!("expected Installed, got {other:?}"),
    }

    let state = store.0.borrow();
    assert_eq!(state.data, data, "every byte written exactly once, in order");
    assert!(state.finalized);
    assert!(state.activated);
    assert!(!state.aborted);

    let statuses = server.statuses();
    let tags: Vec<&str> = statuses
        .iter()
        .map(|s| s["status"].as_str().unwrap())
        .collect();
    assert_eq!(
        tags,
        vec!["downloading", "downloading", "downloading", "success"]
    );

    // downloading(0), then one report per 100 KiB boundary crossed
    let bytes: Vec<u64> = statuses
        .iter()
        .map(|s| s["bytes_downloaded"].as_u64().unwrap())
        .collect();
    assert_eq!(bytes, vec![0, 102_400, 204_800, 250_000]);
    assert!(bytes.windows(2).all(|w| w[0] <= w[1]), "progress is monotonic");

    // Every event names the offered firmware and this device
    for status in &statuses {
        assert_eq!(status["firmware_id"], 7);
        assert_eq!(status["device_id"], 123);
    }
}

#[test]
fn download_failure_aborts_slot_and_reports_bytes() {
    let data = image(50_000);
    let full = image(250_000);
    let server = MockServer::default();
    // Offer promises 250000 bytes but the stream dies after 50000
    server.respond_to_check(&update_offer(5, &full));
    server.serve_download(DownloadPlan::ServeThenFail(data));
    let store = MemoryStore::default();
    let mut orchestrator = orchestrator_with(&server, &store);

    let outcome = orchestrator.run_cycle(&identity());

    match outcome {
        CycleOutcome::InstallFailed(InstallError::Download { bytes_written, .. }) => {
            assert_eq!(bytes_written, 50_000);
        }
        other => panic!("expected Download failure, got {other:?}"),
    }

    {
        let state = store.0.borrow();
        assert!(state.aborted);
        assert!(!state.finalized);
        assert!(!state.activated);
    }

    let statuses = server.statuses();
    let last = statuses.last().unwrap();
    assert_eq!(last["status"], "failed");
    assert_eq!(last["bytes_downloaded"], 50_000);
    assert!(last["error_message"].as_str().unwrap().contains("download"));

    // The aborted slot is reusable by the next cycle
    assert!(orchestrator.storage_mut().acquire_inactive_slot().is_ok());
}

#[test]
fn finalize_failure_leaves_slot_unbootable() {
    let data = image(120_000);
    let server = MockServer::default();
    server.respond_to_check(&update_offer(5, &data));
    server.serve_download(DownloadPlan::Serve(data));
    let store = MemoryStore::default();
    store.0.borrow_mut().fail_finalize = true;

    let outcome = orchestrator_with(&server, &store).run_cycle(&identity());

    assert!(matches!(
        outcome,
        CycleOutcome::InstallFailed(InstallError::Finalize { .. })
    ));
    let state = store.0.borrow();
    assert!(!state.finalized);
    assert!(!state.activated, "a failed finalize must never boot");
    assert!(state.aborted);
    drop(state);

    let statuses = server.statuses();
    let last = statuses.last().unwrap();
    assert_eq!(last["status"], "failed");
    assert!(last["error_message"].as_str().unwrap().contains("finalize"));
}

#[test]
fn stale_offer_is_ignored_without_touching_storage() {
    let data = image(1024);
    let server = MockServer::default();
    // Device already runs build 3; an offer of build 3 is not an update
    server.respond_to_check(&update_offer(3, &data));
    let store = MemoryStore::default();

    let outcome = orchestrator_with(&server, &store).run_cycle(&identity());

    assert!(matches!(outcome, CycleOutcome::NoUpdate));
    assert!(server.statuses().is_empty());
    assert!(!store.0.borrow().in_use);
}

// ---------------------------------------------------------------------------
// Full cycle against the file-backed store
// ---------------------------------------------------------------------------

#[test]
fn clean_install_through_file_store_flips_boot_target() {
    let data = image(150_000);
    let server = MockServer::default();
    server.respond_to_check(&update_offer(5, &data));
    server.serve_download(DownloadPlan::Serve(data.clone()));

    let dir = tempfile::tempdir().unwrap();
    let store = FileSlotStore::open(dir.path()).unwrap();
    let config = AgentConfig::default();
    let mut orchestrator =
        UpdateOrchestrator::new(&config, server.clone(), server.clone(), store);

    let outcome = orchestrator.run_cycle(&identity());
    assert!(matches!(outcome, CycleOutcome::Installed { .. }));

    orchestrator
        .storage_mut()
        .record_installed("1.1.0", 5)
        .unwrap();

    let record = orchestrator.storage().boot_record().unwrap().unwrap();
    assert_eq!(record.version.as_deref(), Some("1.1.0"));
    assert_eq!(record.build_number, Some(5));

    let image_path = dir.path().join("slot_b.bin");
    assert_eq!(std::fs::read(image_path).unwrap(), data);

    // A fresh start refreshes the identity from the boot record
    let mut identity = identity();
    identity.refresh_from_boot_record(&record);
    assert_eq!(identity.current_build, 5);
    assert_eq!(identity.current_version, "1.1.0");
}
