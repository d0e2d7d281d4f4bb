//! Hardware fingerprinting for license binding.
//!
//! Collects a fixed set of platform identity signals and derives a stable
//! digest used both to bind a license to a machine and as the seed for the
//! store encryption key. Any signal that cannot be collected is replaced
//! with a sentinel so the component key set is identical across runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::env;

/// Placeholder for signals that could not be collected on this machine.
pub const UNAVAILABLE: &str = "unavailable";

/// Fingerprint schema version; bump when the component set changes.
pub const SCHEMA_VERSION: &str = "1";

/// Component keys, in canonical (sorted) order.
pub const COMPONENT_KEYS: [&str; 6] = [
    "hostname",
    "mac_address",
    "machine_id",
    "platform",
    "serial_number",
    "volume_id",
];

/// The hardest-to-spoof subset used by the flexible matcher.
pub const CRITICAL_COMPONENTS: [&str; 4] =
    ["mac_address", "machine_id", "serial_number", "volume_id"];

/// Source of raw identity signals.
///
/// The portable core depends only on this trait; the platform-specific
/// collection lives in [`PlatformProbe`]. Tests inject fixed maps.
pub trait HardwareProbe: Send + Sync {
    /// Collects the raw component map. Implementations must return the
    /// same key set on every call, substituting [`UNAVAILABLE`] for any
    /// signal they cannot read.
    fn collect(&self) -> BTreeMap<String, String>;
}

/// A stable fingerprint of the current machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareFingerprint {
    /// SHA-256 hex digest of the canonicalized component map.
    digest: String,
    /// The raw component map (sorted by key).
    components: BTreeMap<String, String>,
    /// Schema version of the component set.
    schema_version: String,
    /// When the fingerprint was collected.
    collected_at: DateTime<Utc>,
}

impl HardwareFingerprint {
    /// Generates a fingerprint for the current machine using the default
    /// platform probe.
    #[must_use]
    pub fn generate() -> Self {
        Self::generate_with(&PlatformProbe)
    }

    /// Generates a fingerprint from a specific probe.
    #[must_use]
    pub fn generate_with(probe: &dyn HardwareProbe) -> Self {
        let components = probe.collect();
        let digest = digest_components(&components);

        Self {
            digest,
            components,
            schema_version: SCHEMA_VERSION.to_string(),
            collected_at: Utc::now(),
        }
    }

    /// Returns the fingerprint digest (64 hex chars).
    #[must_use]
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Returns the raw component map.
    #[must_use]
    pub fn components(&self) -> &BTreeMap<String, String> {
        &self.components
    }

    /// Returns the schema version.
    #[must_use]
    pub fn schema_version(&self) -> &str {
        &self.schema_version
    }

    /// Returns when the fingerprint was collected.
    #[must_use]
    pub fn collected_at(&self) -> DateTime<Utc> {
        self.collected_at
    }

    /// Exact-match check against a stored digest.
    #[must_use]
    pub fn matches(&self, stored_digest: &str) -> bool {
        self.digest == stored_digest
    }
}

/// Canonical digest: `SHA-256(JSON(sort_by_key(components)))`.
///
/// `BTreeMap` serializes in key order, which is the canonical form.
pub fn digest_components(components: &BTreeMap<String, String>) -> String {
    let canonical = serde_json::to_vec(components).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    hex::encode(hasher.finalize())
}

/// Threshold matcher for hardware churn: returns true when at least
/// `N - 1` of the `N` critical signals match between the stored and
/// current component maps.
///
/// This tolerates single-component drift (a replaced network card, a
/// re-imaged boot volume) without invalidating the whole identity. It is
/// an opt-in fallback; exact digest matching remains the default policy.
#[must_use]
pub fn validate_flexible(
    stored: &BTreeMap<String, String>,
    current: Option<&BTreeMap<String, String>>,
) -> bool {
    let live;
    let current = match current {
        Some(map) => map,
        None => {
            live = PlatformProbe.collect();
            &live
        }
    };

    let total = CRITICAL_COMPONENTS.len();
    let matched = CRITICAL_COMPONENTS
        .iter()
        .filter(|key| {
            matches!((stored.get(**key), current.get(**key)), (Some(a), Some(b)) if a == b)
        })
        .count();

    matched + 1 >= total
}

/// Default probe backed by platform-specific identity sources.
pub struct PlatformProbe;

impl HardwareProbe for PlatformProbe {
    fn collect(&self) -> BTreeMap<String, String> {
        let mut components = BTreeMap::new();
        components.insert("hostname".to_string(), get_hostname());
        components.insert(
            "mac_address".to_string(),
            get_mac_address().unwrap_or_else(|| UNAVAILABLE.to_string()),
        );
        components.insert(
            "machine_id".to_string(),
            get_machine_id().unwrap_or_else(|| UNAVAILABLE.to_string()),
        );
        components.insert(
            "platform".to_string(),
            format!("{}-{}", env::consts::OS, env::consts::ARCH),
        );
        components.insert(
            "serial_number".to_string(),
            get_firmware_serial().unwrap_or_else(|| UNAVAILABLE.to_string()),
        );
        components.insert(
            "volume_id".to_string(),
            get_volume_id().unwrap_or_else(|| UNAVAILABLE.to_string()),
        );
        components
    }
}

/// Gets the machine hostname.
fn get_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| UNAVAILABLE.to_string())
}

/// Gets the MAC address of the first non-loopback network interface.
fn get_mac_address() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        let entries = std::fs::read_dir("/sys/class/net").ok()?;
        for entry in entries.flatten() {
            let iface = entry.file_name();
            let iface = iface.to_string_lossy();
            if iface == "lo" {
                continue;
            }
            let addr_path = format!("/sys/class/net/{iface}/address");
            if let Ok(addr) = std::fs::read_to_string(&addr_path) {
                let addr = addr.trim();
                if !addr.is_empty() && addr != "00:00:00:00:00:00" {
                    return Some(addr.to_string());
                }
            }
        }
        None
    }

    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("ifconfig")
            .arg("en0")
            .output()
            .ok()
            .and_then(|o| String::from_utf8(o.stdout).ok())
            .and_then(|out| {
                out.lines()
                    .find(|l| l.trim_start().starts_with("ether "))
                    .and_then(|l| l.split_whitespace().nth(1))
                    .map(String::from)
            })
    }

    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("getmac")
            .args(["/NH", "/FO", "CSV"])
            .output()
            .ok()
            .and_then(|o| String::from_utf8(o.stdout).ok())
            .and_then(|out| {
                out.lines()
                    .next()
                    .and_then(|l| l.split(',').next())
                    .map(|s| s.trim_matches('"').to_string())
            })
            .filter(|s| !s.is_empty())
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        None
    }
}

/// Gets the stable machine installation ID.
fn get_machine_id() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/etc/machine-id")
            .or_else(|_| std::fs::read_to_string("/var/lib/dbus/machine-id"))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    #[cfg(target_os = "macos")]
    {
        ioreg_platform_value("IOPlatformUUID")
    }

    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("reg")
            .args([
                "query",
                r"HKLM\SOFTWARE\Microsoft\Cryptography",
                "/v",
                "MachineGuid",
            ])
            .output()
            .ok()
            .and_then(|o| String::from_utf8(o.stdout).ok())
            .and_then(|out| {
                out.lines()
                    .find(|l| l.contains("MachineGuid"))
                    .and_then(|l| l.split_whitespace().last())
                    .map(String::from)
            })
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        None
    }
}

/// Gets the firmware/board serial number.
fn get_firmware_serial() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        // DMI serials are often root-only; fall through to the sentinel.
        std::fs::read_to_string("/sys/class/dmi/id/product_serial")
            .or_else(|_| std::fs::read_to_string("/sys/class/dmi/id/board_serial"))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty() && s != "None")
    }

    #[cfg(target_os = "macos")]
    {
        ioreg_platform_value("IOPlatformSerialNumber")
    }

    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("wmic")
            .args(["bios", "get", "serialnumber"])
            .output()
            .ok()
            .and_then(|o| String::from_utf8(o.stdout).ok())
            .and_then(|out| out.lines().nth(1).map(|s| s.trim().to_string()))
            .filter(|s| !s.is_empty())
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        None
    }
}

/// Gets a stable volume identifier for the system drive.
fn get_volume_id() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/sys/class/dmi/id/product_uuid")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("diskutil")
            .args(["info", "/"])
            .output()
            .ok()
            .and_then(|o| String::from_utf8(o.stdout).ok())
            .and_then(|out| {
                out.lines()
                    .find(|l| l.trim_start().starts_with("Volume UUID"))
                    .and_then(|l| l.split(':').nth(1))
                    .map(|s| s.trim().to_string())
            })
    }

    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("wmic")
            .args(["volume", "where", "DriveLetter='C:'", "get", "SerialNumber"])
            .output()
            .ok()
            .and_then(|o| String::from_utf8(o.stdout).ok())
            .and_then(|out| out.lines().nth(1).map(|s| s.trim().to_string()))
            .filter(|s| !s.is_empty())
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        None
    }
}

#[cfg(target_os = "macos")]
fn ioreg_platform_value(field: &str) -> Option<String> {
    std::process::Command::new("ioreg")
        .args(["-rd1", "-c", "IOPlatformExpertDevice"])
        .output()
        .ok()
        .and_then(|o| String::from_utf8(o.stdout).ok())
        .and_then(|output| {
            output
                .lines()
                .find(|l| l.contains(field))
                .and_then(|l| l.split('"').nth(3))
                .map(String::from)
        })
}
