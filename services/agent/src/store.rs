//! Encrypted key/value configuration store.
//!
//! A single file-backed store holding every `ConfigEntry`, encrypted at rest
//! with AES-256-GCM under a key derived (SHA-256) from the resolved master
//! secret. Fail-closed: opening with the wrong key fails with `WrongKey`
//! before any state is observable - the AEAD tag makes a wrong key
//! indistinguishable from tampering, and there is no partial decrypt.
//!
//! Writes are serialized behind a writer lock; the version counter
//! increments under the same lock as the map mutation and the file rewrite,
//! so a reader observing version N sees exactly the state as of N.
//! Persistence is atomic (temp file + rename, mode 0600).

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;

const MAGIC: &[u8] = b"FBOX1";
const NONCE_BYTES: usize = 12;
const STORE_AAD: &[u8] = b"fbox-store-v1";

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Decryption failed: the supplied key does not match the store.
    /// Fatal - recover the key or discard the store; never partially
    /// recoverable.
    #[error("store decryption failed: wrong key")]
    WrongKey,

    /// The store file exists but is not a valid store (bad magic or
    /// truncated).
    #[error("store file is corrupt: {0}")]
    Corrupt(String),

    /// The requested key does not exist.
    #[error("config key not found: {0}")]
    KeyNotFound(String),

    /// The stored value does not have the requested type.
    #[error("config key '{key}' holds {actual}, not {expected}")]
    ValueTypeMismatch {
        key: String,
        expected: ValueType,
        actual: ValueType,
    },

    /// A structured value failed validation at write time.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// Encryption failed.
    #[error("store encryption failed")]
    EncryptFailed,

    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type tag for a configuration value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    String,
    Integer,
    Float,
    Boolean,
    Object,
    Array,
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ValueType::String => "string",
            ValueType::Integer => "integer",
            ValueType::Float => "float",
            ValueType::Boolean => "boolean",
            ValueType::Object => "object",
            ValueType::Array => "array",
        };
        write!(f, "{s}")
    }
}

/// A typed configuration value.
///
/// Structured variants carry canonical JSON; their shape is validated at
/// write time so a stored `Object` is always a JSON object and a stored
/// `Array` always a JSON array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ConfigValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Object(serde_json::Value),
    Array(serde_json::Value),
}

impl ConfigValue {
    /// The type tag of this value.
    pub fn value_type(&self) -> ValueType {
        match self {
            ConfigValue::String(_) => ValueType::String,
            ConfigValue::Integer(_) => ValueType::Integer,
            ConfigValue::Float(_) => ValueType::Float,
            ConfigValue::Boolean(_) => ValueType::Boolean,
            ConfigValue::Object(_) => ValueType::Object,
            ConfigValue::Array(_) => ValueType::Array,
        }
    }

    /// Check that the tag matches the payload shape.
    fn validate(&self) -> Result<(), StoreError> {
        match self {
            ConfigValue::Object(v) if !v.is_object() => Err(StoreError::InvalidValue(format!(
                "object value is not a JSON object: {v}"
            ))),
            ConfigValue::Array(v) if !v.is_array() => Err(StoreError::InvalidValue(format!(
                "array value is not a JSON array: {v}"
            ))),
            ConfigValue::Float(f) if !f.is_finite() => Err(StoreError::InvalidValue(
                "float value must be finite".to_string(),
            )),
            _ => Ok(()),
        }
    }
}

/// A single configuration entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigEntry {
    /// Dot-delimited hierarchical key, unique and case-sensitive.
    pub key: String,
    /// The typed value.
    pub value: ConfigValue,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

/// On-disk plaintext document (inside the AEAD envelope).
#[derive(Debug, Serialize, Deserialize)]
struct StoreDocument {
    version: u64,
    entries: HashMap<String, ConfigEntry>,
}

struct StoreInner {
    entries: HashMap<String, ConfigEntry>,
    version: u64,
}

/// Encrypted, file-backed configuration store.
pub struct EncryptedStore {
    inner: RwLock<StoreInner>,
    cipher: Aes256Gcm,
    path: Option<PathBuf>,
}

impl EncryptedStore {
    /// Open (or create) the store at `path` with the given master secret.
    ///
    /// Fails with `WrongKey` when existing state was written under a
    /// different secret; the error is distinct from every other failure
    /// mode, including `Corrupt` for a damaged file.
    pub fn open<P: AsRef<Path>>(path: P, secret: &str) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let cipher = cipher_for_secret(secret);

        let document = if path.exists() {
            decrypt_document(&cipher, &fs::read(&path)?)?
        } else {
            StoreDocument {
                version: 0,
                entries: HashMap::new(),
            }
        };

        let store = Self {
            inner: RwLock::new(StoreInner {
                entries: document.entries,
                version: document.version,
            }),
            cipher,
            path: Some(path),
        };

        // Persisting up front validates writability and creates the file
        // with owner-only permissions before any secret material lands in it.
        {
            let inner = store.inner.read().expect("store lock poisoned");
            store.persist(&*inner)?;
        }

        debug!(
            entries = store.len(),
            version = store.version(),
            "Encrypted store opened"
        );
        Ok(store)
    }

    /// Open a store with no backing file (for testing).
    pub fn open_in_memory(secret: &str) -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                entries: HashMap::new(),
                version: 0,
            }),
            cipher: cipher_for_secret(secret),
            path: None,
        }
    }

    /// Monotonic version counter; strictly increases with every mutation.
    pub fn version(&self) -> u64 {
        self.inner.read().expect("store lock poisoned").version
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.inner.read().expect("store lock poisoned").entries.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetch a full entry.
    pub fn get(&self, key: &str) -> Option<ConfigEntry> {
        self.inner
            .read()
            .expect("store lock poisoned")
            .entries
            .get(key)
            .cloned()
    }

    /// Read a string value, or `default` when the key is absent.
    pub fn get_str(&self, key: &str, default: &str) -> Result<String, StoreError> {
        match self.get(key) {
            None => Ok(default.to_string()),
            Some(entry) => match entry.value {
                ConfigValue::String(s) => Ok(s),
                other => Err(mismatch(key, ValueType::String, &other)),
            },
        }
    }

    /// Read an integer value, or `default` when the key is absent.
    pub fn get_i64(&self, key: &str, default: i64) -> Result<i64, StoreError> {
        match self.get(key) {
            None => Ok(default),
            Some(entry) => match entry.value {
                ConfigValue::Integer(i) => Ok(i),
                other => Err(mismatch(key, ValueType::Integer, &other)),
            },
        }
    }

    /// Read a float value, or `default` when the key is absent.
    pub fn get_f64(&self, key: &str, default: f64) -> Result<f64, StoreError> {
        match self.get(key) {
            None => Ok(default),
            Some(entry) => match entry.value {
                ConfigValue::Float(f) => Ok(f),
                other => Err(mismatch(key, ValueType::Float, &other)),
            },
        }
    }

    /// Read a boolean value, or `default` when the key is absent.
    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool, StoreError> {
        match self.get(key) {
            None => Ok(default),
            Some(entry) => match entry.value {
                ConfigValue::Boolean(b) => Ok(b),
                other => Err(mismatch(key, ValueType::Boolean, &other)),
            },
        }
    }

    /// Read a JSON object value. `None` when the key is absent.
    pub fn get_object(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        match self.get(key) {
            None => Ok(None),
            Some(entry) => match entry.value {
                ConfigValue::Object(v) => Ok(Some(v)),
                other => Err(mismatch(key, ValueType::Object, &other)),
            },
        }
    }

    /// Read a JSON array value. `None` when the key is absent.
    pub fn get_array(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        match self.get(key) {
            None => Ok(None),
            Some(entry) => match entry.value {
                ConfigValue::Array(v) => Ok(Some(v)),
                other => Err(mismatch(key, ValueType::Array, &other)),
            },
        }
    }

    /// Write a value. Creates or replaces the entry, increments the version,
    /// and persists - all atomically with respect to readers.
    ///
    /// Malformed structured values fail synchronously and are never
    /// persisted.
    pub fn set(
        &self,
        key: &str,
        value: ConfigValue,
        description: Option<&str>,
    ) -> Result<(), StoreError> {
        value.validate()?;
        if key.is_empty() {
            return Err(StoreError::InvalidValue("empty config key".to_string()));
        }

        let mut inner = self.inner.write().expect("store lock poisoned");

        // Stage the mutation, persist, then commit. A failed write leaves
        // both the file and the in-memory state untouched.
        let mut staged = inner.entries.clone();
        staged.insert(
            key.to_string(),
            ConfigEntry {
                key: key.to_string(),
                value,
                description: description.map(str::to_string),
                updated_at: Utc::now(),
            },
        );

        let staged = StoreInner {
            entries: staged,
            version: inner.version + 1,
        };
        self.persist(&staged)?;

        inner.entries = staged.entries;
        inner.version = staged.version;
        debug!(key, version = inner.version, "Config entry written");
        Ok(())
    }

    /// Delete an entry. Fails with `KeyNotFound` when it does not exist.
    pub fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.write().expect("store lock poisoned");

        if !inner.entries.contains_key(key) {
            return Err(StoreError::KeyNotFound(key.to_string()));
        }

        let mut staged = inner.entries.clone();
        staged.remove(key);

        let staged = StoreInner {
            entries: staged,
            version: inner.version + 1,
        };
        self.persist(&staged)?;

        inner.entries = staged.entries;
        inner.version = staged.version;
        debug!(key, version = inner.version, "Config entry deleted");
        Ok(())
    }

    /// Consistent snapshot of all values at a single version.
    pub fn snapshot(&self) -> (u64, HashMap<String, ConfigValue>) {
        let inner = self.inner.read().expect("store lock poisoned");
        let values = inner
            .entries
            .iter()
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect();
        (inner.version, values)
    }

    /// All entries, for listing surfaces.
    pub fn entries(&self) -> Vec<ConfigEntry> {
        let inner = self.inner.read().expect("store lock poisoned");
        let mut entries: Vec<_> = inner.entries.values().cloned().collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    fn persist(&self, inner: &StoreInner) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let document = StoreDocument {
            version: inner.version,
            entries: inner.entries.clone(),
        };
        let sealed = encrypt_document(&self.cipher, &document)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp = path.with_extension("fbox.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            set_owner_only(&file)?;
            file.write_all(&sealed)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// Debug output never includes the cipher or any derived key material.
impl std::fmt::Debug for EncryptedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read().expect("store lock poisoned");
        f.debug_struct("EncryptedStore")
            .field("path", &self.path)
            .field("version", &inner.version)
            .field("entries", &inner.entries.len())
            .finish_non_exhaustive()
    }
}

fn mismatch(key: &str, expected: ValueType, actual: &ConfigValue) -> StoreError {
    StoreError::ValueTypeMismatch {
        key: key.to_string(),
        expected,
        actual: actual.value_type(),
    }
}

fn cipher_for_secret(secret: &str) -> Aes256Gcm {
    let key_bytes = Sha256::digest(secret.as_bytes());
    Aes256Gcm::new_from_slice(&key_bytes).expect("SHA-256 digest is a valid AES-256 key")
}

fn encrypt_document(cipher: &Aes256Gcm, document: &StoreDocument) -> Result<Vec<u8>, StoreError> {
    let plaintext =
        serde_json::to_vec(document).map_err(|e| StoreError::InvalidValue(e.to_string()))?;

    let mut nonce_bytes = [0u8; NONCE_BYTES];
    rand::rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: &plaintext,
                aad: STORE_AAD,
            },
        )
        .map_err(|_| StoreError::EncryptFailed)?;

    let mut out = Vec::with_capacity(MAGIC.len() + NONCE_BYTES + ciphertext.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn decrypt_document(cipher: &Aes256Gcm, raw: &[u8]) -> Result<StoreDocument, StoreError> {
    if raw.len() < MAGIC.len() + NONCE_BYTES {
        return Err(StoreError::Corrupt("file too short".to_string()));
    }
    let (magic, rest) = raw.split_at(MAGIC.len());
    if magic != MAGIC {
        return Err(StoreError::Corrupt("bad magic".to_string()));
    }
    let (nonce_bytes, ciphertext) = rest.split_at(NONCE_BYTES);

    // The AEAD tag authenticates the whole document, so a wrong key fails
    // here unambiguously rather than producing garbage entries.
    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(nonce_bytes),
            Payload {
                msg: ciphertext,
                aad: STORE_AAD,
            },
        )
        .map_err(|_| StoreError::WrongKey)?;

    serde_json::from_slice(&plaintext)
        .map_err(|e| StoreError::Corrupt(format!("bad document: {e}")))
}

#[cfg(unix)]
fn set_owner_only(file: &fs::File) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn set_owner_only(_file: &fs::File) -> std::io::Result<()> {
    Ok(())
}
