// Update catalog client - asks the server whether a newer build exists
// for this device and turns the answer into a typed descriptor.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::DeviceIdentity;
use crate::transport::{Transport, TransportError};

#[derive(Debug, Error)]
pub enum CheckError {
    /// Could not reach the server, or it answered non-2xx. Not fatal;
    /// the next cycle retries from scratch.
    #[error("update check transport failure: {0}")]
    Transport(#[from] TransportError),
    /// The server answered 2xx but the body does not describe an update.
    #[error("malformed check response: {0}")]
    Protocol(String),
}

/// One candidate firmware build as described by the server. Immutable;
/// dropped once the install attempt concludes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateDescriptor {
    pub firmware_id: u32,
    pub version: String,
    pub build_number: u32,
    pub description: Option<String>,
    pub download_url: String,
    /// SHA256 hex digest of the image, compared case-insensitively.
    pub file_hash: String,
    pub file_size: u64,
}

#[derive(Debug, Serialize)]
struct CheckRequest<'a> {
    device_id: u32,
    device_type: &'a str,
    current_version: &'a str,
    current_build: u32,
}

#[derive(Debug, Deserialize)]
struct CheckResponse {
    #[serde(default)]
    update_available: bool,
    firmware_id: Option<u32>,
    version: Option<String>,
    build_number: Option<u32>,
    #[serde(default)]
    description: Option<String>,
    download_url: Option<String>,
    file_hash: Option<String>,
    file_size: Option<u64>,
}

pub struct CatalogClient {
    server_url: String,
}

impl CatalogClient {
    pub fn new(server_url: &str) -> Self {
        Self {
            server_url: server_url.trim_end_matches('/').to_string(),
        }
    }

    /// Ask the server for a newer build. `Ok(None)` means "nothing to do",
    /// which is the common case and not an error. No side effects, so the
    /// caller is free to retry on any future cycle.
    pub fn check_for_update<T: Transport>(
        &self,
        transport: &mut T,
        identity: &DeviceIdentity,
    ) -> Result<Option<UpdateDescriptor>, CheckError> {
        let request = CheckRequest {
            device_id: identity.device_id,
            device_type: &identity.device_type,
            current_version: &identity.current_version,
            current_build: identity.current_build,
        };
        let body = serde_json::to_value(&request)
            .map_err(|e| CheckError::Protocol(format!("encode check request: {e}")))?;

        let url = format!("{}/api/ota/check", self.server_url);
        let raw = transport.post_json(&url, &body)?;

        let response: CheckResponse = serde_json::from_slice(&raw)
            .map_err(|e| CheckError::Protocol(e.to_string()))?;

        if !response.update_available {
            return Ok(None);
        }

        let descriptor = UpdateDescriptor {
            firmware_id: required(response.firmware_id, "firmware_id")?,
            version: required(response.version, "version")?,
            build_number: required(response.build_number, "build_number")?,
            description: response.description,
            download_url: self.resolve_url(required(response.download_url, "download_url")?),
            file_hash: required(response.file_hash, "file_hash")?,
            file_size: required(response.file_size, "file_size")?,
        };
        Ok(Some(descriptor))
    }

    /// The server hands out relative download paths when signed URLs are
    /// enabled; resolve those against the configured base.
    fn resolve_url(&self, url: String) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            url
        } else if url.starts_with('/') {
            format!("{}{}", self.server_url, url)
        } else {
            format!("{}/{}", self.server_url, url)
        }
    }
}

fn required<V>(value: Option<V>, field: &str) -> Result<V, CheckError> {
    value.ok_or_else(|| CheckError::Protocol(format!("missing field `{field}`")))
}
