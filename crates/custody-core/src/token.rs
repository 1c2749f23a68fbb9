//! Single-use confirmation tokens for accountless receivers.
//!
//! The secret is 32 bytes from the OS RNG, encoded URL-safe base64 so it can
//! travel in a link. Only its SHA-256 digest and expiry are ever persisted;
//! the plaintext is handed to the caller once and then forgotten.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, TimeDelta, Utc};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Number of random bytes in a secret.
const SECRET_BYTES: usize = 32;

/// Default validity window for a freshly issued token.
pub fn default_ttl() -> TimeDelta { TimeDelta::hours(24) }

/// The persisted half of a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenDigest {
  /// Lowercase hex SHA-256 of the secret.
  pub hash:       String,
  pub expires_at: DateTime<Utc>,
}

impl TokenDigest {
  /// `true` if `secret` hashes to this digest and the digest has not expired.
  pub fn verify(&self, secret: &str, now: DateTime<Utc>) -> bool {
    let presented = hash_secret(secret);
    let matches: bool = presented.as_bytes().ct_eq(self.hash.as_bytes()).into();
    matches && now < self.expires_at
  }

  /// Short hash prefix safe to put in logs.
  pub fn fingerprint(&self) -> &str { &self.hash[..self.hash.len().min(12)] }
}

/// A freshly issued token. `secret` must not be stored.
#[derive(Debug, Clone)]
pub struct IssuedToken {
  pub secret: String,
  pub digest: TokenDigest,
}

/// Issue a new token valid for `ttl` from `now`.
pub fn issue(ttl: TimeDelta, now: DateTime<Utc>) -> IssuedToken {
  let mut bytes = [0u8; SECRET_BYTES];
  OsRng.fill_bytes(&mut bytes);
  let secret = URL_SAFE_NO_PAD.encode(bytes);
  let digest = TokenDigest {
    hash:       hash_secret(&secret),
    expires_at: now + ttl,
  };
  IssuedToken { secret, digest }
}

/// One-way digest of a presented secret, as stored.
pub fn hash_secret(secret: &str) -> String {
  hex::encode(Sha256::digest(secret.as_bytes()))
}
