//! HMAC-SHA256 request signing and verification for intercom HTTP exchanges.
//!
//! Every signed request carries `(machine_id, unix_ts, signature)` in headers.
//! The signature is `HMAC-SHA256(token, canonical_request)` over
//! `method \n path \n ts \n sha256(body)`. Replays are rejected by the
//! timestamp window alone; there is no per-nonce cache.

use {
    hmac::{Hmac, Mac},
    sha2::{Digest, Sha256},
    thiserror::Error,
    tracing::warn,
};

type HmacSha256 = Hmac<Sha256>;

/// Signed-request header names.
pub const HEADER_MACHINE: &str = "x-intercom-machine";
pub const HEADER_TS: &str = "x-intercom-ts";
pub const HEADER_SIG: &str = "x-intercom-sig";

/// Accepted clock skew between signer and verifier.
pub const SIGNATURE_WINDOW_SECS: i64 = 60;

#[derive(Error, Debug)]
pub enum SignError {
    /// An empty token marks an unauthenticated endpoint; it must never sign.
    #[error("cannot sign with an empty token")]
    EmptyToken,
}

/// The header triple attached to a signed request.
#[derive(Debug, Clone)]
pub struct SignedHeaders {
    pub machine_id: String,
    pub ts: i64,
    pub signature: String,
}

impl SignedHeaders {
    /// Header `(name, value)` pairs ready to attach to a request.
    pub fn pairs(&self) -> [(&'static str, String); 3] {
        [
            (HEADER_MACHINE, self.machine_id.clone()),
            (HEADER_TS, self.ts.to_string()),
            (HEADER_SIG, self.signature.clone()),
        ]
    }
}

/// Outcome of verifying a signed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Verified { machine_id: String },
    /// Timestamp outside the replay window.
    Stale,
    BadSignature,
    /// No token on file for the claimed machine (includes unapproved machines,
    /// whose token is empty by invariant).
    UnknownMachine,
}

/// Sign a request with the current clock.
pub fn sign(
    method: &str,
    path: &str,
    body: &[u8],
    token: &str,
    machine_id: &str,
) -> Result<SignedHeaders, SignError> {
    sign_at(method, path, body, token, machine_id, chrono::Utc::now().timestamp())
}

/// Sign a request at an explicit timestamp.
pub fn sign_at(
    method: &str,
    path: &str,
    body: &[u8],
    token: &str,
    machine_id: &str,
    ts: i64,
) -> Result<SignedHeaders, SignError> {
    if token.is_empty() {
        return Err(SignError::EmptyToken);
    }
    let signature = compute_signature(token, &canonical_request(method, path, ts, body));
    Ok(SignedHeaders {
        machine_id: machine_id.to_string(),
        ts,
        signature,
    })
}

/// Verify a signed request against the current clock.
///
/// `lookup_token` resolves the claimed machine to its current token; `None`
/// (or an empty token) yields [`Verification::UnknownMachine`].
pub fn verify<F>(
    method: &str,
    path: &str,
    body: &[u8],
    machine_id: &str,
    ts: i64,
    signature: &str,
    lookup_token: F,
) -> Verification
where
    F: FnOnce(&str) -> Option<String>,
{
    verify_at(
        method,
        path,
        body,
        machine_id,
        ts,
        signature,
        lookup_token,
        chrono::Utc::now().timestamp(),
    )
}

/// Verify a signed request against an explicit clock.
#[allow(clippy::too_many_arguments)]
pub fn verify_at<F>(
    method: &str,
    path: &str,
    body: &[u8],
    machine_id: &str,
    ts: i64,
    signature: &str,
    lookup_token: F,
    now: i64,
) -> Verification
where
    F: FnOnce(&str) -> Option<String>,
{
    let token = match lookup_token(machine_id) {
        Some(t) if !t.is_empty() => t,
        _ => {
            warn!(machine_id, "signed request from unknown or unapproved machine");
            return Verification::UnknownMachine;
        },
    };

    if (now - ts).abs() > SIGNATURE_WINDOW_SECS {
        return Verification::Stale;
    }

    let expected = compute_signature(&token, &canonical_request(method, path, ts, body));
    if constant_time_eq(&expected, signature) {
        Verification::Verified {
            machine_id: machine_id.to_string(),
        }
    } else {
        Verification::BadSignature
    }
}

/// `method \n path \n ts \n sha256(body)` with the body hash hex-encoded.
fn canonical_request(method: &str, path: &str, ts: i64, body: &[u8]) -> String {
    let body_hash = hex::encode(Sha256::digest(body));
    format!("{method}\n{path}\n{ts}\n{body_hash}")
}

fn compute_signature(token: &str, canonical: &str) -> String {
    // An HMAC key can be any length; new_from_slice only fails for unsized
    // keys, which a &[u8] never is.
    let mut mac = match HmacSha256::new_from_slice(token.as_bytes()) {
        Ok(m) => m,
        Err(_) => return String::new(),
    };
    mac.update(canonical.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time string comparison.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes()
        .zip(b.bytes())
        .fold(0, |acc, (x, y)| acc | (x ^ y))
        == 0
}
