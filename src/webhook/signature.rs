use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::errors::AppError;

/// Header carrying Bling's webhook signature.
pub const SIGNATURE_HEADER: &str = "x-bling-signature-256";

// ── HMAC Signing ─────────────────────────────────────────────

/// Compute HMAC-SHA256 of `payload` using `secret`.
/// Returns the header form, `sha256=<lowercase hex>`.
pub fn sign(secret: &str, payload: &[u8]) -> String {
    // HMAC accepts keys of any length, so this never fails.
    let mut mac = match Hmac::<Sha256>::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC can take key of any size"),
    };
    mac.update(payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// How a delivery got past the signature check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureCheck {
    Verified,
    /// Accepted without verification (unsigned mode only).
    Bypassed,
}

// ── Verifier ─────────────────────────────────────────────────

#[derive(Clone)]
pub struct SignatureVerifier {
    secret: Option<String>,
    allow_unsigned: bool,
}

impl SignatureVerifier {
    pub fn new(secret: Option<String>, allow_unsigned: bool) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
            allow_unsigned,
        }
    }

    /// Checks `received` against the HMAC of the exact raw body bytes.
    ///
    /// With both a signature and a secret present the signature is always
    /// checked, unsigned mode or not. Anything short of that is accepted only
    /// in unsigned mode.
    pub fn verify(&self, raw_body: &[u8], received: Option<&str>) -> Result<SignatureCheck, AppError> {
        match (received, self.secret.as_deref()) {
            (Some(received), Some(secret)) => {
                let expected = sign(secret, raw_body);
                if bool::from(expected.as_bytes().ct_eq(received.trim().as_bytes())) {
                    Ok(SignatureCheck::Verified)
                } else {
                    Err(AppError::InvalidSignature)
                }
            }
            (received, secret) if self.allow_unsigned => {
                tracing::warn!(
                    signature_present = received.is_some(),
                    secret_configured = secret.is_some(),
                    "accepting webhook without HMAC validation (unsigned mode)"
                );
                Ok(SignatureCheck::Bypassed)
            }
            (None, _) => Err(AppError::InvalidSignature),
            (Some(_), None) => {
                tracing::error!("webhook secret not configured; cannot verify signature");
                Err(AppError::InvalidSignature)
            }
        }
    }
}
