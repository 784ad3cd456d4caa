// Status reporter - tells the server how an update attempt is going.
// Strictly best-effort: a lost report never disturbs the install itself.

use std::fmt;

use serde::Serialize;

use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateStatus {
    Downloading,
    Failed,
    Success,
}

impl fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateStatus::Downloading => write!(f, "downloading"),
            UpdateStatus::Failed => write!(f, "failed"),
            UpdateStatus::Success => write!(f, "success"),
        }
    }
}

/// One outbound progress/outcome report. Constructed, sent, forgotten.
#[derive(Debug, Clone, Serialize)]
pub struct StatusEvent {
    pub device_id: u32,
    pub firmware_id: u32,
    pub status: UpdateStatus,
    pub bytes_downloaded: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl StatusEvent {
    pub fn downloading(device_id: u32, firmware_id: u32, bytes_downloaded: u64) -> Self {
        Self {
            device_id,
            firmware_id,
            status: UpdateStatus::Downloading,
            bytes_downloaded,
            error_message: None,
        }
    }

    pub fn success(device_id: u32, firmware_id: u32, bytes_downloaded: u64) -> Self {
        Self {
            device_id,
            firmware_id,
            status: UpdateStatus::Success,
            bytes_downloaded,
            error_message: None,
        }
    }

    pub fn failed(
        device_id: u32,
        firmware_id: u32,
        bytes_downloaded: u64,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            device_id,
            firmware_id,
            status: UpdateStatus::Failed,
            bytes_downloaded,
            error_message: Some(error_message.into()),
        }
    }
}

/// Owns its own transport so a report can be fired while the main transport
/// is busy streaming the download.
pub struct StatusReporter<T: Transport> {
    transport: T,
    status_url: String,
}

impl<T: Transport> StatusReporter<T> {
    pub fn new(server_url: &str, transport: T) -> Self {
        Self {
            transport,
            status_url: format!("{}/api/ota/status", server_url.trim_end_matches('/')),
        }
    }

    /// Send one event. Transport failures and non-2xx answers are logged
    /// and swallowed; reporting is observability, not a correctness gate.
    pub fn report(&mut self, event: &StatusEvent) {
        log::info!(
            "reporting status {} for firmware {} ({} bytes)",
            event.status,
            event.firmware_id,
            event.bytes_downloaded
        );

        let body = match serde_json::to_value(event) {
            Ok(body) => body,
            Err(e) => {
                log::warn!("could not encode status event: {e}");
                return;
            }
        };

        if let Err(e) = self.transport.post_json(&self.status_url, &body) {
            log::warn!("status report {} not delivered: {e}", event.status);
        }
    }
}
