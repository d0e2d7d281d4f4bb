//! Request signing for the license service protocol.
//!
//! Every outgoing body is signed with HMAC-SHA256 over `body || timestamp`
//! using a shared secret built into the release and provisioned
//! identically server-side. The timestamp travels in a separate header so
//! the server can verify the signature and reject requests outside its
//! replay acceptance window independently.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Shared signing secret baked into the client release.
///
/// Matched server-side; rotating it requires a coordinated release.
const SHARED_SECRET: &str = "mb-2f81c4a9d7e3468bb05d91c6f2aa07de";

/// Signs request bodies for the license service.
#[derive(Clone)]
pub struct RequestSigner {
    secret: String,
}

impl RequestSigner {
    /// Creates a signer with an explicit secret (tests, staging).
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Computes the hex HMAC-SHA256 signature over `body || timestamp`.
    ///
    /// The timestamp must be fresh per request; callers never reuse one.
    #[must_use]
    pub fn sign(&self, body: &[u8], timestamp: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(body);
        mac.update(timestamp.to_string().as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Constant-time verification of a hex signature.
    #[must_use]
    pub fn verify(&self, body: &[u8], timestamp: i64, signature: &str) -> bool {
        let expected = self.sign(body, timestamp);
        expected.as_bytes().ct_eq(signature.as_bytes()).into()
    }
}

impl Default for RequestSigner {
    fn default() -> Self {
        Self::new(SHARED_SECRET)
    }
}

impl std::fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSigner")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}
