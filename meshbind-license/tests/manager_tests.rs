mod common;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use common::{make_record, test_components, test_digest, FixedProbe};
use meshbind_license::{
    digest_components, EncryptedLicenseStore, InvalidReason, LicenseConfig, LicenseError,
    LicenseManager, LicenseStatus, ValidationVerdict,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn manager_at(server_url: &str, dir: &TempDir) -> LicenseManager {
    manager_with(server_url, dir, test_components(), false)
}

fn manager_with(
    server_url: &str,
    dir: &TempDir,
    components: std::collections::BTreeMap<String, String>,
    allow_drift: bool,
) -> LicenseManager {
    let config = LicenseConfig {
        server_url: server_url.to_string(),
        store_path: dir.path().join("license.dat"),
        plugin_version: "1.2.3".to_string(),
        request_timeout: Duration::from_secs(2),
        allow_component_drift: allow_drift,
    };
    LicenseManager::with_probe(config, Arc::new(FixedProbe(components)))
}

fn store_in(dir: &TempDir) -> EncryptedLicenseStore {
    EncryptedLicenseStore::new(dir.path().join("license.dat"))
}

async fn mount_validate_ok(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/licenses/validate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": { "status": "active" },
        })))
        .mount(server)
        .await;
}

/// Waits for a background revalidation to land in the store.
async fn wait_for_refresh(store: &EncryptedLicenseStore, newer_than: DateTime<Utc>) -> bool {
    for _ in 0..40 {
        if let Ok(Some(record)) = store.load(&test_digest()) {
            if record.last_validation_at > newer_than {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

// ── Activation ───────────────────────────────────────────────

#[tokio::test]
async fn activation_persists_record_with_matching_timestamps() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/licenses/activate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": { "status": "active" },
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let manager = manager_at(&server.uri(), &dir);

    let record = manager.activate_license("a@b.com", "LIC-1").await.unwrap();
    assert_eq!(record.status, LicenseStatus::Active);
    assert_eq!(record.activated_at, record.last_validation_at);
    assert_eq!(record.fingerprint_digest, test_digest());

    let stored = store_in(&dir).load(&test_digest()).unwrap().unwrap();
    assert_eq!(stored, record);
}

#[tokio::test]
async fn activation_rejection_is_not_a_storage_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/licenses/activate"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "success": false,
            "error": "unknown license key",
        })))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let manager = manager_at(&server.uri(), &dir);

    let err = manager.activate_license("a@b.com", "BAD-KEY").await.unwrap_err();
    assert!(matches!(err, LicenseError::ActivationFailed(_)));
    assert!(!store_in(&dir).exists());
}

#[tokio::test]
async fn only_one_activation_in_flight() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/licenses/activate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_millis(300))
                .set_body_json(json!({ "success": true, "data": { "status": "active" } })),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let manager = manager_at(&server.uri(), &dir);

    let (first, second) = tokio::join!(
        manager.activate_license("a@b.com", "LIC-1"),
        manager.activate_license("a@b.com", "LIC-1"),
    );

    let outcomes = [first.is_ok(), second.is_ok()];
    assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
}

// ── Validation ───────────────────────────────────────────────

#[tokio::test]
async fn validate_without_license_is_no_license() {
    let dir = TempDir::new().unwrap();
    let manager = manager_at("http://127.0.0.1:1", &dir);

    let verdict = manager.validate_license().await;
    assert!(matches!(
        verdict,
        ValidationVerdict::Invalid { reason: InvalidReason::NoLicense, .. }
    ));
}

#[tokio::test]
async fn fresh_validation_is_quietly_valid_and_spawns_one_background_check() {
    let server = MockServer::start().await;
    mount_validate_ok(&server).await;

    let dir = TempDir::new().unwrap();
    let record = make_record(1);
    let before = record.last_validation_at;
    store_in(&dir).save(&record, &test_digest()).unwrap();

    let manager = manager_at(&server.uri(), &dir);
    let verdict = manager.validate_license().await;

    match verdict {
        ValidationVerdict::Valid { warning, .. } => assert!(warning.is_none()),
        other => panic!("expected Valid, got {other:?}"),
    }
    assert_eq!(manager.revalidations_started(), 1);

    // The background task refreshes the stored record.
    assert!(wait_for_refresh(&store_in(&dir), before).await);
}

#[tokio::test]
async fn warning_window_yields_valid_with_warning() {
    let server = MockServer::start().await;
    mount_validate_ok(&server).await;

    let dir = TempDir::new().unwrap();
    store_in(&dir).save(&make_record(5), &test_digest()).unwrap();

    let manager = manager_at(&server.uri(), &dir);
    match manager.validate_license().await {
        ValidationVerdict::Valid { warning, .. } => {
            let warning = warning.expect("warning expected in days 3..=7");
            assert!(warning.contains("5 days"));
        }
        other => panic!("expected Valid with warning, got {other:?}"),
    }
    assert_eq!(manager.revalidations_started(), 1);
}

#[tokio::test]
async fn exhausted_grace_with_unreachable_server_requires_online() {
    let dir = TempDir::new().unwrap();
    store_in(&dir).save(&make_record(10), &test_digest()).unwrap();

    let manager = manager_at("http://127.0.0.1:1", &dir);
    let verdict = manager.validate_license().await;

    assert!(matches!(
        verdict,
        ValidationVerdict::Invalid { reason: InvalidReason::OnlineRequired, .. }
    ));
    // Blocking path only; no background task.
    assert_eq!(manager.revalidations_started(), 0);
}

#[tokio::test]
async fn exhausted_grace_recovers_after_successful_online_check() {
    let server = MockServer::start().await;
    mount_validate_ok(&server).await;

    let dir = TempDir::new().unwrap();
    let record = make_record(10);
    let before = record.last_validation_at;
    store_in(&dir).save(&record, &test_digest()).unwrap();

    let manager = manager_at(&server.uri(), &dir);
    let verdict = manager.validate_license().await;

    match verdict {
        ValidationVerdict::Valid { record, warning } => {
            assert!(warning.is_none());
            assert!(record.last_validation_at > before);
        }
        other => panic!("expected Valid, got {other:?}"),
    }

    let stored = store_in(&dir).load(&test_digest()).unwrap().unwrap();
    assert!(stored.last_validation_at > before);
}

#[tokio::test]
async fn exhausted_grace_with_server_rejection_is_invalid_on_server() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/licenses/validate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "error": "license revoked",
        })))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    store_in(&dir).save(&make_record(10), &test_digest()).unwrap();

    let manager = manager_at(&server.uri(), &dir);
    match manager.validate_license().await {
        ValidationVerdict::Invalid { reason, message } => {
            assert_eq!(reason, InvalidReason::InvalidOnServer);
            assert_eq!(message, "license revoked");
        }
        other => panic!("expected Invalid, got {other:?}"),
    }
}

#[tokio::test]
async fn digest_mismatch_is_hardware_mismatch() {
    let dir = TempDir::new().unwrap();
    let mut record = make_record(1);
    record.fingerprint_digest = "0".repeat(64);
    record.fingerprint_components.clear();
    // Encrypted under the current machine's key, so it loads fine; only
    // the bound digest differs.
    store_in(&dir).save(&record, &test_digest()).unwrap();

    let manager = manager_at("http://127.0.0.1:1", &dir);
    assert!(matches!(
        manager.validate_license().await,
        ValidationVerdict::Invalid { reason: InvalidReason::HardwareMismatch, .. }
    ));
}

#[tokio::test]
async fn undecryptable_file_is_hardware_mismatch() {
    let dir = TempDir::new().unwrap();
    // Saved under a different machine's key.
    store_in(&dir).save(&make_record(1), &"e".repeat(64)).unwrap();

    let manager = manager_at("http://127.0.0.1:1", &dir);
    assert!(matches!(
        manager.validate_license().await,
        ValidationVerdict::Invalid { reason: InvalidReason::HardwareMismatch, .. }
    ));
}

#[tokio::test]
async fn component_drift_accepted_only_when_opted_in() {
    let server = MockServer::start().await;
    mount_validate_ok(&server).await;

    // The live machine drifted in one critical component since activation.
    let mut live = test_components();
    live.insert("mac_address".to_string(), "11:22:33:44:55:66".to_string());
    let live_digest = digest_components(&live);

    let dir = TempDir::new().unwrap();
    let record = make_record(1); // bound to the original components
    EncryptedLicenseStore::new(dir.path().join("license.dat"))
        .save(&record, &live_digest)
        .unwrap();

    let strict = manager_with(&server.uri(), &dir, live.clone(), false);
    assert!(matches!(
        strict.validate_license().await,
        ValidationVerdict::Invalid { reason: InvalidReason::HardwareMismatch, .. }
    ));

    let tolerant = manager_with(&server.uri(), &dir, live, true);
    assert!(tolerant.validate_license().await.is_valid());
}

#[tokio::test]
async fn expired_license_is_invalid() {
    let dir = TempDir::new().unwrap();
    let mut record = make_record(1);
    record.expires_at = Some(Utc::now() - ChronoDuration::days(2));
    store_in(&dir).save(&record, &test_digest()).unwrap();

    let manager = manager_at("http://127.0.0.1:1", &dir);
    assert!(matches!(
        manager.validate_license().await,
        ValidationVerdict::Invalid { reason: InvalidReason::Expired, .. }
    ));
}

#[tokio::test]
async fn revoked_status_blocks_locally() {
    let dir = TempDir::new().unwrap();
    let mut record = make_record(1);
    record.status = LicenseStatus::Revoked;
    store_in(&dir).save(&record, &test_digest()).unwrap();

    let manager = manager_at("http://127.0.0.1:1", &dir);
    assert!(matches!(
        manager.validate_license().await,
        ValidationVerdict::Invalid { reason: InvalidReason::InvalidOnServer, .. }
    ));
}

// ── Deactivation & info ──────────────────────────────────────

#[tokio::test]
async fn deactivate_twice_is_true_then_false() {
    let dir = TempDir::new().unwrap();
    store_in(&dir).save(&make_record(0), &test_digest()).unwrap();

    let manager = manager_at("http://127.0.0.1:1", &dir);
    assert!(manager.deactivate_license().await.unwrap());
    assert!(!store_in(&dir).exists());
    assert!(!manager.deactivate_license().await.unwrap());
}

#[tokio::test]
async fn license_info_is_a_nonsecret_summary() {
    let dir = TempDir::new().unwrap();
    store_in(&dir).save(&make_record(2), &test_digest()).unwrap();

    let manager = manager_at("http://127.0.0.1:1", &dir);
    let info = manager.license_info().await.unwrap().unwrap();

    assert_eq!(info.key_prefix, "LIC-1");
    assert_eq!(info.user_email, "a@b.com");
    assert_eq!(info.status, LicenseStatus::Active);
    assert!(info.fingerprint_match);
}

#[tokio::test]
async fn license_info_none_when_not_activated() {
    let dir = TempDir::new().unwrap();
    let manager = manager_at("http://127.0.0.1:1", &dir);
    assert!(manager.license_info().await.unwrap().is_none());
}
