//! Webhook authenticity checks (X-Hub-Signature-256, X-Gitlab-Token).

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "sha256=";

/// Result of checking a delivery against the endpoint secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Verified,
    MissingSignature,
    Mismatch,
}

impl Verification {
    /// Value persisted in `deployment_events.verification`.
    pub fn outcome(self) -> &'static str {
        match self {
            Self::Verified => "verified",
            Self::MissingSignature => "unsigned",
            Self::Mismatch => "signature_mismatch",
        }
    }

    pub fn is_verified(self) -> bool {
        self == Self::Verified
    }
}

/// Compute the `sha256=<hex>` header value for `body`.
#[cfg(test)]
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC-SHA256 accepts keys of any length");
    mac.update(body);
    format!("{SIGNATURE_PREFIX}{}", hex::encode(mac.finalize().into_bytes()))
}

/// Validate a GitHub-style signature header over the raw request body.
///
/// `body` must be the exact bytes received. The digest comparison goes
/// through `Mac::verify_slice`, which is constant-time.
pub fn verify_signature(body: &[u8], header: Option<&str>, secret: &str) -> Verification {
    let header = match header.map(str::trim) {
        Some(h) if !h.is_empty() => h,
        _ => return Verification::MissingSignature,
    };

    let Some(sig_hex) = header.strip_prefix(SIGNATURE_PREFIX) else {
        return Verification::Mismatch;
    };
    let Ok(sig_bytes) = hex::decode(sig_hex) else {
        return Verification::Mismatch;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return Verification::Mismatch;
    };
    mac.update(body);

    match mac.verify_slice(&sig_bytes) {
        Ok(()) => Verification::Verified,
        Err(_) => Verification::Mismatch,
    }
}

/// Validate a GitLab `X-Gitlab-Token` header.
///
/// Both sides are hashed first so the byte comparison runs over fixed-size
/// digests unrelated to the secret's content.
pub fn verify_token(header: Option<&str>, secret: &str) -> Verification {
    match header {
        Some(h) if !h.is_empty() => {
            if Sha256::digest(h.as_bytes()) == Sha256::digest(secret.as_bytes()) {
                Verification::Verified
            } else {
                Verification::Mismatch
            }
        }
        _ => Verification::MissingSignature,
    }
}
