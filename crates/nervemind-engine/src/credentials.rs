//! Credential records and at-rest encryption.
//!
//! Secrets are sealed into a tagged envelope, `nmc1.<nonce>.<ciphertext>`
//! with both parts url-safe base64, using AES-256-GCM under a key derived
//! from the master key with PBKDF2-HMAC-SHA256 and a fixed
//! domain-separation salt. The engine opens an envelope only on executor
//! request and opened values never pass through the logger.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;

/// Envelope tag; bumped whenever the sealed layout changes.
const ENVELOPE_TAG: &str = "nmc1";

/// Salt for master-key derivation. Separates credential keys from any
/// other use of the same master key.
const KDF_SALT: &[u8] = b"nervemind/credential-key/v1";

/// Default PBKDF2 round count.
const KDF_ROUNDS: u32 = 120_000;

/// AES-256-GCM nonce length in bytes.
const NONCE_LEN: usize = 12;

/// Errors that can occur sealing or opening credentials.
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("Cipher failure: {0}")]
    Cipher(String),

    #[error("Malformed credential envelope: {0}")]
    Envelope(String),

    #[error("Credential JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// How a credential is applied to an outgoing request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum CredentialKind {
    ApiKey,
    Basic,
    Bearer,
    OAuth2,
    CustomHeader,
}

impl CredentialKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialKind::ApiKey => "apiKey",
            CredentialKind::Basic => "basic",
            CredentialKind::Bearer => "bearer",
            CredentialKind::OAuth2 => "oauth2",
            CredentialKind::CustomHeader => "customHeader",
        }
    }
}

/// A stored credential. `data` is the sealed envelope of a JSON object
/// whose shape depends on `kind` (apiKey: key/headerName/queryName, basic:
/// username/password, bearer: token, oauth2: accessToken, customHeader:
/// headerName/headerValue).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub id: String,
    pub name: String,
    pub kind: CredentialKind,
    pub data: String,
}

impl Credential {
    pub fn new(
        name: impl Into<String>,
        kind: CredentialKind,
        cipher: &CredentialCipher,
        plaintext: &serde_json::Value,
    ) -> Result<Self, CredentialError> {
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            kind,
            data: cipher.seal(plaintext)?,
        })
    }
}

/// Seals and opens credential payloads.
#[derive(Clone)]
pub struct CredentialCipher {
    cipher: Aes256Gcm,
}

impl CredentialCipher {
    /// Build a cipher from the master key with the default round count.
    pub fn new(master_key: &str) -> Self {
        Self::with_rounds(master_key, KDF_ROUNDS)
    }

    /// Build a cipher with an explicit PBKDF2 round count. Installations
    /// tune this against their unlock-time tolerance.
    pub fn with_rounds(master_key: &str, rounds: u32) -> Self {
        let mut key = [0u8; 32];
        pbkdf2_hmac::<Sha256>(master_key.as_bytes(), KDF_SALT, rounds.max(1), &mut key);
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key)),
        }
    }

    /// Seal a JSON payload into an envelope string.
    pub fn seal(&self, payload: &serde_json::Value) -> Result<String, CredentialError> {
        self.seal_str(&serde_json::to_string(payload)?)
    }

    /// Seal a plaintext string directly.
    pub fn seal_str(&self, plaintext: &str) -> Result<String, CredentialError> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|e| CredentialError::Cipher(e.to_string()))?;
        Ok(format!(
            "{ENVELOPE_TAG}.{}.{}",
            URL_SAFE_NO_PAD.encode(nonce),
            URL_SAFE_NO_PAD.encode(sealed)
        ))
    }

    /// Open an envelope back to its JSON payload.
    pub fn open(&self, envelope: &str) -> Result<serde_json::Value, CredentialError> {
        Ok(serde_json::from_str(&self.open_str(envelope)?)?)
    }

    /// Open an envelope to its plaintext string.
    pub fn open_str(&self, envelope: &str) -> Result<String, CredentialError> {
        let mut parts = envelope.splitn(3, '.');
        let (tag, nonce, sealed) = match (parts.next(), parts.next(), parts.next()) {
            (Some(tag), Some(nonce), Some(sealed)) => (tag, nonce, sealed),
            _ => {
                return Err(CredentialError::Envelope(
                    "expected tag.nonce.ciphertext".to_string(),
                ))
            }
        };
        if tag != ENVELOPE_TAG {
            return Err(CredentialError::Envelope(format!(
                "unknown envelope tag '{tag}'"
            )));
        }
        let nonce = URL_SAFE_NO_PAD
            .decode(nonce)
            .map_err(|e| CredentialError::Envelope(e.to_string()))?;
        if nonce.len() != NONCE_LEN {
            return Err(CredentialError::Envelope(format!(
                "nonce must be {NONCE_LEN} bytes, got {}",
                nonce.len()
            )));
        }
        let sealed = URL_SAFE_NO_PAD
            .decode(sealed)
            .map_err(|e| CredentialError::Envelope(e.to_string()))?;

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce), sealed.as_slice())
            .map_err(|e| CredentialError::Cipher(e.to_string()))?;
        String::from_utf8(plaintext).map_err(|e| CredentialError::Cipher(e.to_string()))
    }
}

/// An opened credential, alive only for the duration of one executor
/// call.
#[derive(Debug, Clone)]
pub struct DecryptedCredential {
    pub kind: CredentialKind,
    pub data: serde_json::Value,
}

impl DecryptedCredential {
    pub fn new(kind: CredentialKind, data: serde_json::Value) -> Self {
        Self { kind, data }
    }

    /// Get a string value from the credential data.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    /// Get a boolean value from the credential data.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.data.get(key).and_then(|v| v.as_bool())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn seal_open_round_trip() {
        let cipher = CredentialCipher::new("test-master-key-12345");

        let payload = json!({
            "key": "sk-1234567890",
            "headerName": "X-Api-Key"
        });

        let envelope = cipher.seal(&payload).unwrap();
        assert!(envelope.starts_with("nmc1."));
        assert_eq!(cipher.open(&envelope).unwrap(), payload);
    }

    #[test]
    fn wrong_master_key_cannot_open() {
        let sealing = CredentialCipher::new("key-one");
        let opening = CredentialCipher::new("key-two");

        let envelope = sealing.seal(&json!({"secret": "value"})).unwrap();
        assert!(matches!(
            opening.open(&envelope),
            Err(CredentialError::Cipher(_))
        ));
    }

    #[test]
    fn malformed_envelopes_are_refused() {
        let cipher = CredentialCipher::new("key");

        assert!(matches!(
            cipher.open_str("no-dots-here"),
            Err(CredentialError::Envelope(_))
        ));
        assert!(matches!(
            cipher.open_str("nope.AAAA.AAAA"),
            Err(CredentialError::Envelope(_))
        ));
        // Valid tag, truncated nonce.
        assert!(matches!(
            cipher.open_str("nmc1.AAAA.AAAA"),
            Err(CredentialError::Envelope(_))
        ));
    }

    #[test]
    fn round_count_changes_the_key() {
        let fast = CredentialCipher::with_rounds("master", 1_000);
        let default = CredentialCipher::new("master");

        let envelope = fast.seal_str("payload").unwrap();
        assert_eq!(fast.open_str(&envelope).unwrap(), "payload");
        assert!(default.open_str(&envelope).is_err());

        let same = CredentialCipher::with_rounds("master", 1_000);
        assert_eq!(same.open_str(&envelope).unwrap(), "payload");
    }

    #[test]
    fn credential_record_stores_ciphertext_only() {
        let cipher = CredentialCipher::new("master");
        let cred = Credential::new(
            "github",
            CredentialKind::Bearer,
            &cipher,
            &json!({"token": "ghp_secret"}),
        )
        .unwrap();
        assert!(!cred.data.contains("ghp_secret"));
        let opened = cipher.open(&cred.data).unwrap();
        assert_eq!(opened["token"], "ghp_secret");
    }
}
