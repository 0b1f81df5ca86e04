//! Password hashing and bearer tokens.
//!
//! Passwords are stored as `hmac-sha256$<rounds>$<salt-hex>$<digest-hex>`,
//! where the digest is a single PBKDF2-HMAC-SHA256 block. Tokens are
//! `<user-id>.<expires-unix>.<signature-hex>` signed with the service secret.

use chrono::{DateTime, TimeDelta, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use thiserror::Error;

use crate::domain::user::UserId;

type HmacSha256 = Hmac<Sha256>;

const HASH_SCHEME: &str = "hmac-sha256";
const SALT_LEN: usize = 16;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("token is malformed")]
    Malformed,
    #[error("token signature does not match")]
    BadSignature,
    #[error("token expired at {0}")]
    Expired(DateTime<Utc>),
}

#[derive(Clone, Debug)]
pub struct PasswordHasher {
    rounds: u32,
}

impl PasswordHasher {
    pub fn new(rounds: u32) -> Self {
        Self { rounds: rounds.max(1) }
    }

    pub fn hash(&self, password: &str) -> String {
        let mut salt = [0_u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        let digest = pbkdf2_block(password.as_bytes(), &salt, self.rounds);
        format!("{HASH_SCHEME}${}${}${}", self.rounds, encode_hex(&salt), encode_hex(&digest))
    }

    /// Verification honors the round count stored in the hash, not `self.rounds`.
    pub fn verify(&self, password: &str, encoded: &str) -> bool {
        let mut parts = encoded.split('$');
        let (Some(scheme), Some(rounds), Some(salt), Some(digest), None) =
            (parts.next(), parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return false;
        };
        if scheme != HASH_SCHEME {
            return false;
        }
        let (Ok(rounds), Some(salt), Some(expected)) =
            (rounds.parse::<u32>(), decode_hex(salt), decode_hex(digest))
        else {
            return false;
        };
        if rounds == 0 {
            return false;
        }

        let actual = pbkdf2_block(password.as_bytes(), &salt, rounds);
        constant_time_eq(&actual, &expected)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct TokenSigner {
    secret: SecretString,
    ttl: TimeDelta,
}

impl TokenSigner {
    /// TTLs beyond what chrono can represent are clamped to `TimeDelta::MAX`;
    /// `issue` then clamps the expiry to the latest representable instant.
    pub fn new(secret: SecretString, ttl_secs: u64) -> Self {
        let ttl = i64::try_from(ttl_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .unwrap_or(TimeDelta::MAX);
        Self { secret, ttl }
    }

    pub fn issue(&self, user_id: &UserId, now: DateTime<Utc>) -> IssuedToken {
        let expires_at = now.checked_add_signed(self.ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);
        let payload = format!("{}.{}", user_id.0, expires_at.timestamp());
        let signature = self.sign(&payload);
        IssuedToken { token: format!("{payload}.{signature}"), expires_at }
    }

    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<UserId, CredentialError> {
        let (payload, signature) = token.trim().rsplit_once('.').ok_or(CredentialError::Malformed)?;
        let (user_id, expires_unix) = payload.split_once('.').ok_or(CredentialError::Malformed)?;
        if user_id.is_empty() {
            return Err(CredentialError::Malformed);
        }
        let expires_unix = expires_unix.parse::<i64>().map_err(|_| CredentialError::Malformed)?;

        let expected = self.sign(payload);
        if !constant_time_eq(expected.as_bytes(), signature.as_bytes()) {
            return Err(CredentialError::BadSignature);
        }

        let expires_at =
            DateTime::<Utc>::from_timestamp(expires_unix, 0).ok_or(CredentialError::Malformed)?;
        if expires_at <= now {
            return Err(CredentialError::Expired(expires_at));
        }

        Ok(UserId(user_id.to_string()))
    }

    fn sign(&self, payload: &str) -> String {
        encode_hex(&hmac_sha256(self.secret.expose_secret().as_bytes(), payload.as_bytes()))
    }
}

fn pbkdf2_block(password: &[u8], salt: &[u8], rounds: u32) -> Vec<u8> {
    let mut seed = Vec::with_capacity(salt.len() + 4);
    seed.extend_from_slice(salt);
    seed.extend_from_slice(&1_u32.to_be_bytes());

    let mut block = hmac_sha256(password, &seed);
    let mut output = block.clone();
    for _ in 1..rounds {
        block = hmac_sha256(password, &block);
        for (out, byte) in output.iter_mut().zip(&block) {
            *out ^= byte;
        }
    }
    output
}

fn hmac_sha256(key: &[u8], payload: &[u8]) -> Vec<u8> {
    // HMAC takes keys of any length; the error arm is unreachable in practice.
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => return Vec::new(),
    };
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    if left.len() != right.len() || left.is_empty() {
        return false;
    }
    left.iter().zip(right).fold(0_u8, |acc, (a, b)| acc | (a ^ b)) == 0
}

fn encode_hex(bytes: &[u8]) -> String {
    let mut output = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

fn decode_hex(raw: &str) -> Option<Vec<u8>> {
    if raw.len() % 2 != 0 || !raw.is_ascii() {
        return None;
    }
    (0..raw.len())
        .step_by(2)
        .map(|index| u8::from_str_radix(&raw[index..index + 2], 16).ok())
        .collect()
}
