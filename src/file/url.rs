//! Self-describing public URL tokens.
//!
//! A token is `<file-id>.<expires-unix>[.<signature>]`, where an expiry of
//! `0` means "no expiry". With a signing secret configured, the signature is
//! a keyed BLAKE3 MAC over id and expiry (first 16 bytes, hex), so a
//! verified token's expiry can be enforced without reading the record.
//! Tokens without a valid signature carry no authority of their own and the
//! caller must fall back to the stored `expires_at`.

use crate::error::{Error, Result};
use subtle::ConstantTimeEq;

const KEY_CONTEXT: &str = "filequota 2024-06 public url token";
const SIGNATURE_BYTES: usize = 16;

/// What a token says once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenClaims {
    /// Signature checked; `expires_at` can be trusted.
    Verified {
        file_id: String,
        expires_at: Option<i64>,
    },
    /// Unsigned, or signed with another key. Only the id is usable.
    Unverified { file_id: String },
}

impl TokenClaims {
    pub fn file_id(&self) -> &str {
        match self {
            Self::Verified { file_id, .. } | Self::Unverified { file_id } => file_id,
        }
    }
}

/// Issues and checks public tokens.
#[derive(Clone)]
pub struct TokenSigner {
    key: Option<[u8; 32]>,
}

impl TokenSigner {
    /// `None` (or an empty secret) yields unsigned tokens.
    pub fn new(secret: Option<&str>) -> Self {
        let key = secret
            .filter(|s| !s.is_empty())
            .map(|s| blake3::derive_key(KEY_CONTEXT, s.as_bytes()));
        Self { key }
    }

    pub fn is_signing(&self) -> bool {
        self.key.is_some()
    }

    /// Builds the token for a file.
    pub fn issue(&self, file_id: &str, expires_at: Option<i64>) -> String {
        let expires = expires_at.unwrap_or(0);
        match &self.key {
            Some(key) => format!(
                "{file_id}.{expires}.{}",
                hex::encode(mac(key, file_id, expires))
            ),
            None => format!("{file_id}.{expires}"),
        }
    }

    /// Parses a token and checks its signature when possible.
    ///
    /// # Errors
    ///
    /// `Validation` if the token is not of the form described above.
    pub fn parse(&self, token: &str) -> Result<TokenClaims> {
        let malformed = || Error::validation("malformed public url token");

        let mut parts = token.split('.');
        let file_id = parts.next().filter(|id| !id.is_empty()).ok_or_else(malformed)?;
        let expires: i64 = parts
            .next()
            .and_then(|e| e.parse().ok())
            .filter(|e| *e >= 0)
            .ok_or_else(malformed)?;
        let signature = parts.next();
        if parts.next().is_some() {
            return Err(malformed());
        }

        let verified = match (&self.key, signature) {
            (Some(key), Some(sig)) => hex::decode(sig)
                .map(|provided| bool::from(provided.ct_eq(&mac(key, file_id, expires)[..])))
                .unwrap_or(false),
            _ => false,
        };

        let file_id = file_id.to_string();
        if verified {
            Ok(TokenClaims::Verified {
                file_id,
                expires_at: (expires != 0).then_some(expires),
            })
        } else {
            Ok(TokenClaims::Unverified { file_id })
        }
    }
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner")
            .field("signing", &self.is_signing())
            .finish()
    }
}

fn mac(key: &[u8; 32], file_id: &str, expires: i64) -> [u8; SIGNATURE_BYTES] {
    let hash = blake3::keyed_hash(key, format!("{file_id}.{expires}").as_bytes());
    let mut out = [0u8; SIGNATURE_BYTES];
    out.copy_from_slice(&hash.as_bytes()[..SIGNATURE_BYTES]);
    out
}
