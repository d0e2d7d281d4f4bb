//! License record and validation verdict types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Server-reported license status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LicenseStatus {
    /// License is valid and active.
    Active,
    /// License was renewed server-side.
    Renewed,
    /// License has been revoked.
    Revoked,
}

impl LicenseStatus {
    /// Parses the status string the server uses in its `data.status` field.
    #[must_use]
    pub fn from_server(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "renewed" => Some(Self::Renewed),
            "revoked" => Some(Self::Revoked),
            _ => None,
        }
    }

    /// Returns true if the license allows usage.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Active | Self::Renewed)
    }
}

/// The locally persisted license record.
///
/// Owned by the encrypted store on disk and cached by the manager in
/// memory for the host session. Created on first successful activation,
/// refreshed on every successful online validation, destroyed on
/// deactivation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LicenseRecord {
    /// The license key.
    pub license_key: String,
    /// Email the license was issued to.
    pub user_email: String,
    /// Fingerprint digest of the machine this record is bound to.
    pub fingerprint_digest: String,
    /// Raw fingerprint components at activation time, kept so the
    /// threshold matcher has something to compare against.
    #[serde(default)]
    pub fingerprint_components: BTreeMap<String, String>,
    /// Server-reported status.
    pub status: LicenseStatus,
    /// When the license was activated on this machine.
    pub activated_at: DateTime<Utc>,
    /// Last successful online validation.
    pub last_validation_at: DateTime<Utc>,
    /// Expiry, if the server set one.
    pub expires_at: Option<DateTime<Utc>>,
    /// Opaque payload the server returned with the last validation.
    #[serde(default)]
    pub server_payload: Map<String, Value>,
}

impl LicenseRecord {
    /// Returns the non-secret key prefix used in summaries and logs.
    #[must_use]
    pub fn key_prefix(&self) -> String {
        let prefix: String = self.license_key.chars().take(8).collect();
        if self.license_key.chars().count() > 8 {
            format!("{prefix}…")
        } else {
            prefix
        }
    }

    /// Returns true if `expires_at` is set and in the past.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp < now)
    }
}

/// Machine-readable reason a validation came back invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    /// No license record exists on this machine.
    NoLicense,
    /// The stored fingerprint does not match the current machine.
    HardwareMismatch,
    /// The license expiry has passed.
    Expired,
    /// An online check was required and the server was unreachable.
    OnlineRequired,
    /// The server rejected the license.
    InvalidOnServer,
    /// An internal failure was mapped into a verdict.
    Exception,
}

/// Outcome of a license validation.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationVerdict {
    /// License is usable.
    Valid {
        /// The (possibly just refreshed) record.
        record: Box<LicenseRecord>,
        /// Present when the grace window is running out.
        warning: Option<String>,
    },
    /// License is not usable.
    Invalid {
        /// Machine-readable reason.
        reason: InvalidReason,
        /// Human-readable message for the host UI.
        message: String,
    },
}

impl ValidationVerdict {
    /// Returns true for `Valid` verdicts.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }

    /// Builds an `Invalid` verdict.
    pub(crate) fn invalid(reason: InvalidReason, message: impl Into<String>) -> Self {
        Self::Invalid {
            reason,
            message: message.into(),
        }
    }
}

/// Non-secret license summary exposed to the host shell.
#[derive(Debug, Clone, Serialize)]
pub struct LicenseInfo {
    /// Truncated license key.
    pub key_prefix: String,
    /// Email the license was issued to.
    pub user_email: String,
    /// Server-reported status.
    pub status: LicenseStatus,
    /// Whether the stored fingerprint matches the current machine.
    pub fingerprint_match: bool,
    /// When the license was activated.
    pub activated_at: DateTime<Utc>,
    /// Last successful online validation.
    pub last_validation_at: DateTime<Utc>,
    /// Expiry, if any.
    pub expires_at: Option<DateTime<Utc>>,
}
