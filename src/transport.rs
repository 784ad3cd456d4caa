// HTTP transport seam - the update flow only ever needs "POST this JSON"
// and "give me the download as a byte stream".

use std::io::Read;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    /// The server answered with a non-2xx status.
    #[error("server returned HTTP {0}")]
    Status(u16),
    /// Connection setup, TLS or timeout failure before/while talking to the server.
    #[error("request failed: {0}")]
    Connection(String),
}

/// Blocking HTTP client used by the catalog client, the status reporter and
/// the installer's download stream. One request per call, no connection
/// state shared across cycles.
pub trait Transport {
    /// POST a JSON body and return the raw response body on success.
    fn post_json(
        &mut self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<Vec<u8>, TransportError>;

    /// Open a GET request as a sequential byte stream. The caller reads it
    /// to end-of-data in fixed-size chunks.
    fn open_stream(&mut self, url: &str) -> Result<Box<dyn Read>, TransportError>;
}

/// `reqwest`-backed transport. The configured timeout bounds the whole
/// request, so a stalled download eventually errors out of the read loop
/// instead of hanging the cycle.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
    auth_token: Option<String>,
}

impl HttpTransport {
    pub fn new(timeout: Duration, auth_token: Option<String>) -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        Ok(Self { client, auth_token })
    }

    fn authorize(
        &self,
        request: reqwest::blocking::RequestBuilder,
    ) -> reqwest::blocking::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

impl Transport for HttpTransport {
    fn post_json(
        &mut self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<Vec<u8>, TransportError> {
        let request = self.authorize(self.client.post(url).json(body));
        let response = request
            .send()
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        let bytes = response
            .bytes()
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    fn open_stream(&mut self, url: &str) -> Result<Box<dyn Read>, TransportError> {
        let request = self.authorize(self.client.get(url));
        let response = request
            .send()
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status.as_u16()));
        }

        // blocking::Response implements std::io::Read
        Ok(Box::new(response))
    }
}
