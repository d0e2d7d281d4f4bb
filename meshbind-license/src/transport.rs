//! Signed HTTP client for the remote license service.
//!
//! Every call serializes a JSON body, signs it with the request signer,
//! attaches the signature and timestamp headers, and normalizes the
//! response into an [`ApiResult`]. The status-code policy mirrors the
//! server contract exactly and transport failures are folded into the
//! `offline` flag, with TLS failures kept distinct because they can mean
//! interception rather than absence of connectivity.

use crate::error::TransportError;
use crate::signer::RequestSigner;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Short timeout for the liveness probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Normalized outcome of a license service call.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResult {
    /// The server-reported success flag (false for any failure).
    pub success: bool,
    /// The `data` object from the response envelope, when present.
    pub data: Option<Map<String, Value>>,
    /// Human-readable error, when the call failed.
    pub error: Option<String>,
    /// True when the failure was connectivity, not a server decision.
    pub offline: bool,
}

impl ApiResult {
    fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            offline: false,
        }
    }

    fn from_transport(err: TransportError) -> Self {
        let offline = matches!(err, TransportError::Timeout | TransportError::Offline(_));
        Self {
            success: false,
            data: None,
            error: Some(err.to_string()),
            offline,
        }
    }

    /// Returns the string value of a `data` field, if present.
    #[must_use]
    pub fn data_str(&self, field: &str) -> Option<&str> {
        self.data.as_ref()?.get(field)?.as_str()
    }
}

/// Response envelope the license service uses for every endpoint.
#[derive(Debug, Deserialize)]
struct WireEnvelope {
    success: bool,
    #[serde(default)]
    data: Option<Map<String, Value>>,
    #[serde(default)]
    error: Option<String>,
}

/// Signed HTTP client for the license service.
///
/// Cheap to clone; the non-blocking variants clone it into spawned tasks.
#[derive(Debug, Clone)]
pub struct LicenseClient {
    http: reqwest::Client,
    base_url: String,
    signer: RequestSigner,
    timeout: Duration,
    plugin_version: String,
}

impl LicenseClient {
    /// Creates a client for the given service base URL.
    pub fn new(base_url: impl Into<String>, plugin_version: impl Into<String>) -> Self {
        Self::with_signer(base_url, plugin_version, RequestSigner::default())
    }

    /// Creates a client with an explicit signer (tests, staging).
    pub fn with_signer(
        base_url: impl Into<String>,
        plugin_version: impl Into<String>,
        signer: RequestSigner,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            signer,
            timeout: DEFAULT_TIMEOUT,
            plugin_version: plugin_version.into(),
        }
    }

    /// Overrides the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Activates a license for this machine.
    pub async fn activate(&self, email: &str, key: &str, fingerprint: &str) -> ApiResult {
        let body = json!({
            "user_email": email,
            "license_key": key,
            "system_fingerprint": fingerprint,
        });
        self.post_signed("/api/licenses/activate", &body, fingerprint)
            .await
    }

    /// Validates a previously activated license.
    pub async fn validate(&self, key: &str, fingerprint: &str) -> ApiResult {
        let body = json!({
            "license_key": key,
            "system_fingerprint": fingerprint,
        });
        self.post_signed("/api/licenses/validate", &body, fingerprint)
            .await
    }

    /// Reports a heartbeat for usage tracking.
    pub async fn heartbeat(&self, key: &str, fingerprint: &str) -> ApiResult {
        let body = json!({
            "license_key": key,
            "system_fingerprint": fingerprint,
            "plugin_version": self.plugin_version,
            "timestamp": Utc::now().timestamp(),
        });
        self.post_signed("/api/heartbeats", &body, fingerprint).await
    }

    /// Non-blocking activate; invokes `on_done` from a spawned task.
    pub fn activate_nowait(
        &self,
        email: &str,
        key: &str,
        fingerprint: &str,
        on_done: impl FnOnce(ApiResult) + Send + 'static,
    ) {
        let client = self.clone();
        let (email, key, fingerprint) =
            (email.to_string(), key.to_string(), fingerprint.to_string());
        tokio::spawn(async move {
            on_done(client.activate(&email, &key, &fingerprint).await);
        });
    }

    /// Non-blocking validate; invokes `on_done` from a spawned task.
    pub fn validate_nowait(
        &self,
        key: &str,
        fingerprint: &str,
        on_done: impl FnOnce(ApiResult) + Send + 'static,
    ) {
        let client = self.clone();
        let (key, fingerprint) = (key.to_string(), fingerprint.to_string());
        tokio::spawn(async move {
            on_done(client.validate(&key, &fingerprint).await);
        });
    }

    /// Non-blocking heartbeat; invokes `on_done` from a spawned task.
    pub fn heartbeat_nowait(
        &self,
        key: &str,
        fingerprint: &str,
        on_done: impl FnOnce(ApiResult) + Send + 'static,
    ) {
        let client = self.clone();
        let (key, fingerprint) = (key.to_string(), fingerprint.to_string());
        tokio::spawn(async move {
            on_done(client.heartbeat(&key, &fingerprint).await);
        });
    }

    /// Cheap liveness probe: any HTTP response within the short timeout
    /// counts as reachable. Used to short-circuit user-facing flows
    /// before attempting a full signed call.
    pub async fn server_available(&self) -> bool {
        self.http
            .head(&self.base_url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .is_ok()
    }

    async fn post_signed(&self, path: &str, body: &Value, fingerprint: &str) -> ApiResult {
        let body_bytes = match serde_json::to_vec(body) {
            Ok(bytes) => bytes,
            Err(e) => return ApiResult::failure(format!("request serialization failed: {e}")),
        };

        // Fresh timestamp per request; the server enforces its replay
        // window against this value.
        let timestamp = Utc::now().timestamp();
        let signature = self.signer.sign(&body_bytes, timestamp);
        let url = format!("{}{path}", self.base_url);

        debug!(%url, "license service request");

        let response = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .header("X-Signature", signature)
            .header("X-Timestamp", timestamp.to_string())
            .header("X-Fingerprint", fingerprint)
            .header("X-Client-Version", &self.plugin_version)
            .body(body_bytes)
            .timeout(self.timeout)
            .send()
            .await;

        match response {
            Ok(resp) => Self::normalize(resp).await,
            Err(e) => {
                let err = classify_transport_error(&e);
                warn!(%url, error = %err, "license service request failed");
                ApiResult::from_transport(err)
            }
        }
    }

    /// Applies the fixed status-code policy of the license service.
    async fn normalize(resp: reqwest::Response) -> ApiResult {
        let status = resp.status().as_u16();
        match status {
            200 | 201 => match resp.json::<WireEnvelope>().await {
                Ok(envelope) => ApiResult {
                    success: envelope.success,
                    data: envelope.data,
                    error: envelope.error,
                    offline: false,
                },
                Err(e) => {
                    ApiResult::from_transport(TransportError::InvalidResponse(e.to_string()))
                }
            },
            400 | 401 | 403 | 404 => {
                // Best-effort extraction of a human-readable error.
                let message = resp
                    .json::<WireEnvelope>()
                    .await
                    .ok()
                    .and_then(|envelope| envelope.error)
                    .unwrap_or_else(|| format!("request rejected (http {status})"));
                ApiResult::failure(message)
            }
            429 => ApiResult::from_transport(TransportError::RateLimited),
            500..=599 => ApiResult::from_transport(TransportError::ServerFault(status)),
            _ => ApiResult::failure(format!("unexpected response (http {status})")),
        }
    }
}

/// Maps a reqwest error onto the transport taxonomy.
///
/// TLS failures are detected by walking the error source chain; reqwest
/// does not expose them as a dedicated predicate.
fn classify_transport_error(err: &reqwest::Error) -> TransportError {
    if err.is_timeout() {
        return TransportError::Timeout;
    }
    if is_tls_error(err) {
        return TransportError::Tls(err.to_string());
    }
    TransportError::Offline(err.to_string())
}

fn is_tls_error(err: &reqwest::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(current) = source {
        let text = current.to_string().to_ascii_lowercase();
        if text.contains("certificate")
            || text.contains("tls")
            || text.contains("handshake")
            || text.contains("ssl")
        {
            return true;
        }
        source = current.source();
    }
    false
}
