//! File-backed credential store implementing the `CredentialVerifier`
//! contract (C7). Concretizes spec.md §4.7/§6: `verify(username,
//! password) -> bool` against either a stored `(salt, hash)` pair or a
//! plaintext password, with unknown usernames and empty records
//! rejected.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use subtle::ConstantTimeEq;
use tunnel_core::CredentialVerifier;

#[derive(Debug, Serialize, Deserialize)]
struct UserRecordFile {
    username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    salt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hash: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CredentialFile {
    users: Vec<UserRecordFile>,
}

#[derive(Debug, Clone)]
enum Secret {
    Hashed { salt: Vec<u8>, hash: Vec<u8> },
    Plaintext(String),
}

#[derive(Debug, Clone)]
struct UserRecord {
    secret: Secret,
}

/// In-memory, file-backed credential store. Usernames are
/// case-sensitive; duplicate entries in the source file are resolved
/// last-writer-wins, per spec.md §6.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    records: HashMap<String, UserRecord>,
}

impl FileCredentialStore {
    /// Loads `{"users": [...]}` JSON from `path`. Each user record is
    /// either `{username, password}` (plaintext) or `{username, salt,
    /// hash}` (salt/hash base64-encoded).
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading credential file {}", path.display()))?;
        Self::load_from_str(&text)
    }

    fn load_from_str(text: &str) -> Result<Self> {
        let file: CredentialFile =
            serde_json::from_str(text).context("parsing credential file JSON")?;

        let mut records = HashMap::with_capacity(file.users.len());
        for user in file.users {
            let secret = match (&user.salt, &user.hash, &user.password) {
                (Some(salt_b64), Some(hash_b64), _) => {
                    use base64::Engine;
                    let salt = base64::engine::general_purpose::STANDARD
                        .decode(salt_b64)
                        .with_context(|| format!("decoding salt for {}", user.username))?;
                    let hash = base64::engine::general_purpose::STANDARD
                        .decode(hash_b64)
                        .with_context(|| format!("decoding hash for {}", user.username))?;
                    Secret::Hashed { salt, hash }
                }
                (_, _, Some(password)) => Secret::Plaintext(password.clone()),
                _ => {
                    tracing::warn!(
                        username = %user.username,
                        "credential record has neither (salt, hash) nor password; always rejects"
                    );
                    continue;
                }
            };
            // last-writer-wins on duplicate usernames
            records.insert(user.username, UserRecord { secret });
        }

        Ok(Self { records })
    }
}

impl CredentialVerifier for FileCredentialStore {
    fn verify(&self, username: &str, password: &str) -> bool {
        let Some(record) = self.records.get(username) else {
            return false;
        };
        match &record.secret {
            Secret::Hashed { salt, hash } => {
                let computed = compute_password_hash(salt, password);
                computed.ct_eq(hash).unwrap_u8() == 1
            }
            Secret::Plaintext(expected) => {
                expected.as_bytes().ct_eq(password.as_bytes()).unwrap_u8() == 1
            }
        }
    }
}

/// `SHA-256(salt || password_utf8)`, per spec.md §4.7.
pub fn compute_password_hash(salt: &[u8], password: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    hasher.finalize().to_vec()
}
