//! Shared test helpers for license tests.

#![allow(dead_code)]

use chrono::{Duration, Utc};
use meshbind_license::{
    digest_components, HardwareFingerprint, HardwareProbe, LicenseRecord, LicenseStatus,
};
use serde_json::Map;
use std::collections::BTreeMap;

/// Probe returning a fixed component map, for deterministic fingerprints.
pub struct FixedProbe(pub BTreeMap<String, String>);

impl HardwareProbe for FixedProbe {
    fn collect(&self) -> BTreeMap<String, String> {
        self.0.clone()
    }
}

/// A plausible component map for a test machine.
pub fn test_components() -> BTreeMap<String, String> {
    [
        ("hostname", "build-box"),
        ("mac_address", "aa:bb:cc:dd:ee:ff"),
        ("machine_id", "0123456789abcdef0123456789abcdef"),
        ("platform", "linux-x86_64"),
        ("serial_number", "SN-TEST-001"),
        ("volume_id", "f00dcafe-0000-4000-8000-000000000001"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// The digest the fixed test machine produces.
pub fn test_digest() -> String {
    digest_components(&test_components())
}

/// Fingerprint of the fixed test machine.
pub fn test_fingerprint() -> HardwareFingerprint {
    HardwareFingerprint::generate_with(&FixedProbe(test_components()))
}

/// A record bound to the fixed test machine, last validated `days_ago`
/// days in the past.
pub fn make_record(days_ago: i64) -> LicenseRecord {
    let now = Utc::now();
    LicenseRecord {
        license_key: "LIC-1".to_string(),
        user_email: "a@b.com".to_string(),
        fingerprint_digest: test_digest(),
        fingerprint_components: test_components(),
        status: LicenseStatus::Active,
        activated_at: now - Duration::days(days_ago + 30),
        last_validation_at: now - Duration::days(days_ago),
        expires_at: None,
        server_payload: Map::new(),
    }
}
