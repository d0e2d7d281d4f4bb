//! License manager: activation, validation, and the offline state machine.
//!
//! The manager is the only component the host shell calls directly. It
//! owns the cached record and the encrypted store, talks to the service
//! through the signed transport client, and maps every storage/transport
//! failure into a [`ValidationVerdict`]; callers never see raw I/O or
//! crypto errors.
//!
//! Background revalidation is fire-and-forget: it may tighten state for
//! the *next* call (discover a revocation) but never retroactively fails
//! a verdict already returned. Its outcome flows through a single
//! serialized `apply_validation` path and its errors are logged and
//! absorbed.

use crate::error::{LicenseError, LicenseResult, StoreError, TransportError};
use crate::fingerprint::{validate_flexible, HardwareFingerprint, HardwareProbe, PlatformProbe};
use crate::grace::{check_grace_period, GraceState, GRACE_PERIOD_DAYS};
use crate::record::{InvalidReason, LicenseInfo, LicenseRecord, LicenseStatus, ValidationVerdict};
use crate::store::EncryptedLicenseStore;
use crate::transport::{ApiResult, LicenseClient, DEFAULT_TIMEOUT};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Configuration for the license manager.
///
/// Constructed once by the host process at startup and handed to the
/// manager; there is no ambient global state.
#[derive(Debug, Clone)]
pub struct LicenseConfig {
    /// Base URL of the license service.
    pub server_url: String,
    /// Path of the encrypted license file.
    pub store_path: PathBuf,
    /// Plugin version reported in heartbeats and request headers.
    pub plugin_version: String,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Opt-in: tolerate single-component hardware drift via the
    /// threshold fingerprint matcher. Exact matching is the default.
    pub allow_component_drift: bool,
}

impl Default for LicenseConfig {
    fn default() -> Self {
        Self {
            server_url: "https://license.meshbind.io".to_string(),
            store_path: EncryptedLicenseStore::default_path(),
            plugin_version: env!("CARGO_PKG_VERSION").to_string(),
            request_timeout: DEFAULT_TIMEOUT,
            allow_component_drift: false,
        }
    }
}

struct ManagerInner {
    config: LicenseConfig,
    client: LicenseClient,
    store: EncryptedLicenseStore,
    probe: Arc<dyn HardwareProbe>,
    /// Cached record; the lock also serializes store access so a
    /// foreground validation and a background revalidation never
    /// interleave a read with a partial write.
    cache: Mutex<Option<LicenseRecord>>,
    activation_in_flight: AtomicBool,
    revalidations_started: AtomicU64,
}

/// Orchestrates activation, validation, and deactivation.
pub struct LicenseManager {
    inner: Arc<ManagerInner>,
}

impl LicenseManager {
    /// Creates a manager with the default platform probe.
    #[must_use]
    pub fn new(config: LicenseConfig) -> Self {
        Self::with_probe(config, Arc::new(PlatformProbe))
    }

    /// Creates a manager with an injected hardware probe.
    #[must_use]
    pub fn with_probe(config: LicenseConfig, probe: Arc<dyn HardwareProbe>) -> Self {
        let client = LicenseClient::new(config.server_url.clone(), config.plugin_version.clone())
            .with_timeout(config.request_timeout);
        let store = EncryptedLicenseStore::new(&config.store_path);

        Self {
            inner: Arc::new(ManagerInner {
                config,
                client,
                store,
                probe,
                cache: Mutex::new(None),
                activation_in_flight: AtomicBool::new(false),
                revalidations_started: AtomicU64::new(0),
            }),
        }
    }

    /// Returns the transport client, for host flows that talk to the
    /// service directly (heartbeats, liveness probes).
    #[must_use]
    pub fn client(&self) -> &LicenseClient {
        &self.inner.client
    }

    /// Number of background revalidation tasks started so far.
    /// Diagnostics only.
    #[must_use]
    pub fn revalidations_started(&self) -> u64 {
        self.inner.revalidations_started.load(Ordering::Relaxed)
    }

    /// Activates a license for this machine and persists the record.
    ///
    /// Only one activation may be in flight per manager instance. A
    /// persistence failure surfaces as a `Store` error, distinct from an
    /// API rejection (`ActivationFailed`) or connectivity (`Transport`).
    pub async fn activate_license(&self, email: &str, key: &str) -> LicenseResult<LicenseRecord> {
        if self
            .inner
            .activation_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(LicenseError::ActivationInProgress);
        }
        let _guard = ActivationGuard(&self.inner.activation_in_flight);

        let fingerprint = HardwareFingerprint::generate_with(self.inner.probe.as_ref());
        let result = self
            .inner
            .client
            .activate(email, key, fingerprint.digest())
            .await;

        if !result.success {
            let message = result
                .error
                .clone()
                .unwrap_or_else(|| "activation rejected".to_string());
            if result.offline {
                return Err(TransportError::Offline(message).into());
            }
            return Err(LicenseError::ActivationFailed(message));
        }

        let now = Utc::now();
        let data = result.data.unwrap_or_default();
        let status = result_status(&data).unwrap_or(LicenseStatus::Active);

        let record = LicenseRecord {
            license_key: key.to_string(),
            user_email: email.to_string(),
            fingerprint_digest: fingerprint.digest().to_string(),
            fingerprint_components: fingerprint.components().clone(),
            status,
            activated_at: now,
            last_validation_at: now,
            expires_at: parse_expiry(&data),
            server_payload: data,
        };

        let mut cache = self.inner.cache.lock().await;
        self.inner.store.save(&record, fingerprint.digest())?;
        *cache = Some(record.clone());

        info!(key_prefix = %record.key_prefix(), "license activated");
        Ok(record)
    }

    /// Validates the stored license and returns a verdict.
    ///
    /// Exact fingerprint matching is the default; the threshold matcher
    /// applies only when enabled in config. Within the grace window the
    /// verdict is decided locally and a single background revalidation is
    /// spawned; past it, a blocking online check is required.
    pub async fn validate_license(&self) -> ValidationVerdict {
        let fingerprint = HardwareFingerprint::generate_with(self.inner.probe.as_ref());
        let mut cache = self.inner.cache.lock().await;

        let record = match self.load_locked(&mut cache, fingerprint.digest()) {
            Ok(Some(record)) => record,
            Ok(None) => {
                return ValidationVerdict::invalid(
                    InvalidReason::NoLicense,
                    "no license is activated on this machine",
                );
            }
            Err(StoreError::DecryptFailure(_)) => {
                // The key derives from the live fingerprint, so an
                // unreadable file means the record came from different
                // hardware.
                return ValidationVerdict::invalid(
                    InvalidReason::HardwareMismatch,
                    "the license file was created on different hardware",
                );
            }
            Err(e) => {
                warn!(error = %e, "license store read failed");
                return ValidationVerdict::invalid(
                    InvalidReason::Exception,
                    format!("license check failed: {e}"),
                );
            }
        };

        if !fingerprint.matches(&record.fingerprint_digest) {
            let drift_ok = self.inner.config.allow_component_drift
                && !record.fingerprint_components.is_empty()
                && validate_flexible(
                    &record.fingerprint_components,
                    Some(fingerprint.components()),
                );
            if drift_ok {
                info!("fingerprint drifted within tolerance, accepting");
            } else {
                return ValidationVerdict::invalid(
                    InvalidReason::HardwareMismatch,
                    "this license is bound to different hardware",
                );
            }
        }

        if !record.status.is_usable() {
            return ValidationVerdict::invalid(
                InvalidReason::InvalidOnServer,
                "this license has been revoked",
            );
        }

        let now = Utc::now();
        if record.is_expired(now) {
            return ValidationVerdict::invalid(InvalidReason::Expired, "this license has expired");
        }

        match check_grace_period(record.last_validation_at, now) {
            GraceState::Allow => {
                self.spawn_background_revalidation(&record, fingerprint.digest());
                ValidationVerdict::Valid {
                    record: Box::new(record),
                    warning: None,
                }
            }
            GraceState::Warn { days_offline } => {
                self.spawn_background_revalidation(&record, fingerprint.digest());
                let remaining = (GRACE_PERIOD_DAYS - days_offline).max(0);
                ValidationVerdict::Valid {
                    record: Box::new(record),
                    warning: Some(format!(
                        "no license check for {days_offline} days; \
                         {remaining} days of offline use remain"
                    )),
                }
            }
            GraceState::Block { days_offline } => {
                debug!(days_offline, "grace period exhausted, online check required");
                self.blocking_revalidation(&mut cache, record, &fingerprint)
                    .await
            }
        }
    }

    /// Deletes the stored record. Idempotent: the second call returns
    /// `Ok(false)`, not an error.
    pub async fn deactivate_license(&self) -> LicenseResult<bool> {
        let mut cache = self.inner.cache.lock().await;
        let deleted = self.inner.store.delete()?;
        *cache = None;
        if deleted {
            info!("license deactivated");
        }
        Ok(deleted)
    }

    /// Returns a non-secret summary of the stored license, or `None`
    /// when nothing is activated.
    pub async fn license_info(&self) -> LicenseResult<Option<LicenseInfo>> {
        let fingerprint = HardwareFingerprint::generate_with(self.inner.probe.as_ref());
        let mut cache = self.inner.cache.lock().await;

        let Some(record) = self.load_locked(&mut cache, fingerprint.digest())? else {
            return Ok(None);
        };

        Ok(Some(LicenseInfo {
            key_prefix: record.key_prefix(),
            user_email: record.user_email.clone(),
            status: record.status,
            fingerprint_match: fingerprint.matches(&record.fingerprint_digest),
            activated_at: record.activated_at,
            last_validation_at: record.last_validation_at,
            expires_at: record.expires_at,
        }))
    }

    /// Loads the record through the cache. Must be called with the cache
    /// lock held.
    fn load_locked(
        &self,
        cache: &mut Option<LicenseRecord>,
        key_seed: &str,
    ) -> Result<Option<LicenseRecord>, StoreError> {
        if let Some(record) = cache.as_ref() {
            return Ok(Some(record.clone()));
        }
        let loaded = self.inner.store.load(key_seed)?;
        *cache = loaded.clone();
        Ok(loaded)
    }

    /// Spawns the single fire-and-forget revalidation for this call.
    ///
    /// The task holds its own `Arc` to the manager internals, so it is
    /// safe to let it run to completion after the manager is dropped.
    fn spawn_background_revalidation(&self, record: &LicenseRecord, current_digest: &str) {
        self.inner
            .revalidations_started
            .fetch_add(1, Ordering::Relaxed);

        let inner = Arc::clone(&self.inner);
        let key = record.license_key.clone();
        // The current digest, not the bound one: it is both what the wire
        // call reports and the seed the store encrypts under.
        let digest = current_digest.to_string();

        tokio::spawn(async move {
            let result = inner.client.validate(&key, &digest).await;
            inner.absorb_revalidation(result, &digest).await;
        });
    }

    /// Online check required once the grace window is exhausted. The
    /// cache lock is held across the call so no background task can
    /// interleave a store write.
    async fn blocking_revalidation(
        &self,
        cache: &mut Option<LicenseRecord>,
        mut record: LicenseRecord,
        fingerprint: &HardwareFingerprint,
    ) -> ValidationVerdict {
        if !self.inner.client.server_available().await {
            return ValidationVerdict::invalid(
                InvalidReason::OnlineRequired,
                "an online license check is required but the server is unreachable",
            );
        }

        let result = self
            .inner
            .client
            .validate(&record.license_key, fingerprint.digest())
            .await;

        if result.success {
            let data = result.data.unwrap_or_default();
            apply_server_data(&mut record, &data, Utc::now());
            if let Err(e) = self.inner.store.save(&record, fingerprint.digest()) {
                // The verdict stands; the refreshed timestamp is just
                // not persisted until the next successful check.
                warn!(error = %e, "failed to persist revalidated record");
            }
            *cache = Some(record.clone());
            ValidationVerdict::Valid {
                record: Box::new(record),
                warning: None,
            }
        } else if result.offline {
            ValidationVerdict::invalid(
                InvalidReason::OnlineRequired,
                "an online license check is required but the server is unreachable",
            )
        } else {
            ValidationVerdict::invalid(
                InvalidReason::InvalidOnServer,
                result
                    .error
                    .unwrap_or_else(|| "the server rejected this license".to_string()),
            )
        }
    }
}

impl ManagerInner {
    /// Consumes a background revalidation outcome. Failures are logged
    /// and absorbed; the caller of `validate_license` already has its
    /// verdict.
    async fn absorb_revalidation(&self, result: ApiResult, key_seed: &str) {
        if !result.success {
            debug!(
                offline = result.offline,
                error = result.error.as_deref().unwrap_or("unknown"),
                "background revalidation failed (absorbed)"
            );
            return;
        }

        let data = result.data.unwrap_or_default();
        let mut cache = self.cache.lock().await;
        let Some(record) = cache.as_mut() else {
            // Deactivated while the task was in flight; nothing to update.
            return;
        };

        apply_server_data(record, &data, Utc::now());
        if let Err(e) = self.store.save(record, key_seed) {
            debug!(error = %e, "background revalidation store update failed (absorbed)");
        } else {
            debug!("background revalidation refreshed the license record");
        }
    }
}

/// Clears the single-flight activation flag on scope exit.
struct ActivationGuard<'a>(&'a AtomicBool);

impl Drop for ActivationGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Applies a successful validation response to the record. Both writers
/// only ever move `last_validation_at` forward.
fn apply_server_data(record: &mut LicenseRecord, data: &Map<String, Value>, now: DateTime<Utc>) {
    if let Some(status) = result_status(data) {
        record.status = status;
    }
    if let Some(expires) = parse_expiry(data) {
        record.expires_at = Some(expires);
    }
    if record.last_validation_at < now {
        record.last_validation_at = now;
    }
    record.server_payload = data.clone();
}

fn result_status(data: &Map<String, Value>) -> Option<LicenseStatus> {
    data.get("status")
        .and_then(Value::as_str)
        .and_then(LicenseStatus::from_server)
}

/// Parses the server's `expires_at` field, which is either an RFC 3339
/// string or unix seconds.
fn parse_expiry(data: &Map<String, Value>) -> Option<DateTime<Utc>> {
    match data.get("expires_at")? {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(|secs| DateTime::from_timestamp(secs, 0)),
        _ => None,
    }
}
