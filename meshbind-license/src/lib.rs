//! Device-bound licensing and activation for Meshbind.
//!
//! This crate handles:
//! - Hardware fingerprinting for device binding
//! - An encrypted on-disk license store keyed off the live fingerprint
//! - HMAC-signed requests to the remote license service
//! - The offline grace-period state machine with background revalidation
//!
//! # Design Principles
//!
//! - **Offline-tolerant**: a validated license keeps working through a
//!   bounded grace window without connectivity
//! - **Device binding**: the store key derives from the machine identity
//!   and is never persisted, so the license file is useless elsewhere
//! - **Fail closed where it matters**: hardware mismatch and an exhausted
//!   grace window block usage; background check failures never do
//! - **No ambient state**: the host constructs one [`LicenseManager`]
//!   from a [`LicenseConfig`] and passes it around
//!
//! The [`LicenseManager`] is the only entry point other subsystems call;
//! it translates every storage, crypto, and transport failure into a
//! [`ValidationVerdict`].

mod error;
mod fingerprint;
mod grace;
mod manager;
mod record;
mod signer;
mod store;
mod transport;

pub use error::{LicenseError, LicenseResult, StoreError, TransportError};
pub use fingerprint::{
    digest_components, validate_flexible, HardwareFingerprint, HardwareProbe, PlatformProbe,
    COMPONENT_KEYS, CRITICAL_COMPONENTS, SCHEMA_VERSION, UNAVAILABLE,
};
pub use grace::{check_grace_period, GraceState, GRACE_PERIOD_DAYS, WARNING_PERIOD_DAYS};
pub use manager::{LicenseConfig, LicenseManager};
pub use record::{InvalidReason, LicenseInfo, LicenseRecord, LicenseStatus, ValidationVerdict};
pub use signer::RequestSigner;
pub use store::{EncryptedLicenseStore, FORMAT_VERSION};
pub use transport::{ApiResult, LicenseClient, DEFAULT_TIMEOUT};
