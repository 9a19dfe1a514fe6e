//! OAuth login state and PKCE material
//!
//! The state cookie never stores the raw state: it stores
//! `hex(SHA256(state || signing_secret || client_secret))`, so a forged
//! callback cannot be matched up without both secrets. The PKCE verifier is
//! kept raw in its own cookie and replayed as `code_verifier` on exchange.

use base64::{engine::general_purpose, Engine as _};
use rand::Rng;
use sha2::{Digest, Sha256};

/// Unreserved characters permitted in a PKCE code verifier (RFC 7636 §4.1).
const PKCE_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

const PKCE_VERIFIER_LEN: usize = 128;

/// Random state for one login attempt, cookie- and URL-safe.
pub fn generate_state() -> String {
    let bytes: [u8; 32] = rand::thread_rng().gen();
    general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Value stored in the state cookie.
pub fn hash_state(state: &str, signing_secret: &str, client_secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(state.as_bytes());
    hasher.update(signing_secret.as_bytes());
    hasher.update(client_secret.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compares the cookie value against the hash recomputed from the state the
/// provider returned.
pub fn verify_state(
    cookie_value: &str,
    returned_state: &str,
    signing_secret: &str,
    client_secret: &str,
) -> bool {
    let expected = hash_state(returned_state, signing_secret, client_secret);
    constant_time_eq(cookie_value, &expected)
}

pub fn generate_pkce_verifier() -> String {
    let mut rng = rand::thread_rng();
    (0..PKCE_VERIFIER_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..PKCE_ALPHABET.len());
            PKCE_ALPHABET[idx] as char
        })
        .collect()
}

/// S256 code challenge for a verifier.
pub fn pkce_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    general_purpose::URL_SAFE_NO_PAD.encode(digest)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
