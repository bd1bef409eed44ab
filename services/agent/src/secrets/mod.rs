//! Master key resolution for the encrypted config store.
//!
//! The key is resolved through an ordered fallback chain, short-circuiting
//! on the first source that yields a secret:
//!
//! 1. `FILAMENTBOX_CONFIG_KEY` environment variable (key directly)
//! 2. Vault, when `VAULT_ADDR` plus token or AppRole credentials are present
//! 3. Local key file (owner-only permissions expected, warned otherwise)
//! 4. Hardcoded development default, unless disabled
//!
//! Resolution is side-effect free beyond logging and bus notifications, and
//! the result is cached per resolver instance: concurrent callers during
//! startup converge on a single resolution. The resolver is an owned value
//! injected into whatever needs the key - never a process-wide global - so
//! tests construct independent resolvers with distinct inputs.

mod vault;

pub use vault::{VaultClient, VaultCredentials, VaultError, VaultSettings};

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use fbox_events::{Level, Metadata, NotificationBus};

/// Development fallback key. Using it is always surfaced as a warning and
/// hardened deployments disable it via `FILAMENTBOX_ALLOW_DEFAULT_KEY=false`.
const DEFAULT_DEV_KEY: &str = "filamentbox-dev-key-do-not-use-in-production";

/// Errors from secret resolution.
#[derive(Debug, Error)]
pub enum SecretError {
    /// No source yielded a key and the development default is disabled.
    /// Fatal at startup.
    #[error("no secret source yielded a key and the default key is disabled")]
    KeyUnavailable,
}

/// Which source ultimately supplied the key, kept for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecretSource {
    /// `FILAMENTBOX_CONFIG_KEY` held the key directly.
    EnvironmentVariable,
    /// Vault read succeeded with the given auth method.
    Vault(VaultAuth),
    /// Local key file.
    LocalFile,
    /// Hardcoded development default.
    DefaultInsecure,
}

/// Vault authentication method used for a successful read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultAuth {
    Token,
    AppRole,
}

impl std::fmt::Display for SecretSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecretSource::EnvironmentVariable => write!(f, "environment"),
            SecretSource::Vault(VaultAuth::Token) => write!(f, "vault(token)"),
            SecretSource::Vault(VaultAuth::AppRole) => write!(f, "vault(approle)"),
            SecretSource::LocalFile => write!(f, "local_file"),
            SecretSource::DefaultInsecure => write!(f, "default_insecure"),
        }
    }
}

/// The resolved master secret plus the source that produced it.
#[derive(Clone)]
pub struct ResolvedKey {
    secret: String,
    source: SecretSource,
}

impl ResolvedKey {
    /// The secret string. Callers derive cipher keys from it; it is never
    /// logged or published.
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// The source that supplied the key.
    pub fn source(&self) -> SecretSource {
        self.source
    }

    /// Short SHA-256 fingerprint, safe for logs.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.secret.as_bytes());
        hex::encode(digest)[..8].to_string()
    }
}

impl std::fmt::Debug for ResolvedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedKey")
            .field("source", &self.source)
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

/// Inputs to the resolver chain, captured once at startup.
///
/// Holding the values (rather than re-reading `std::env` at resolution time)
/// keeps resolution deterministic and lets tests inject inputs directly.
#[derive(Debug, Clone)]
pub struct SecretSettings {
    /// Key supplied directly via `FILAMENTBOX_CONFIG_KEY`.
    pub env_key: Option<String>,
    /// Vault access, present only when address and credentials are set.
    pub vault: Option<VaultSettings>,
    /// Local key file path.
    pub key_file: PathBuf,
    /// Whether the development default key may be used.
    pub allow_default: bool,
}

impl SecretSettings {
    /// Capture resolver inputs from the process environment.
    pub fn from_env(data_dir: &Path) -> Self {
        let env_key = std::env::var("FILAMENTBOX_CONFIG_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty());

        let vault = VaultSettings::from_env();

        let key_file = std::env::var("FILAMENTBOX_KEY_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("secret.key"));

        let allow_default = std::env::var("FILAMENTBOX_ALLOW_DEFAULT_KEY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(true);

        Self {
            env_key,
            vault,
            key_file,
            allow_default,
        }
    }
}

/// Resolves the master key through the fallback chain and caches the result.
pub struct SecretResolver {
    settings: SecretSettings,
    bus: NotificationBus,
    cached: OnceCell<ResolvedKey>,
}

impl SecretResolver {
    /// Create a resolver over the given inputs.
    pub fn new(settings: SecretSettings, bus: NotificationBus) -> Self {
        Self {
            settings,
            bus,
            cached: OnceCell::new(),
        }
    }

    /// Resolve the master key, caching the first success.
    ///
    /// Concurrent callers converge on a single resolution: the first caller
    /// runs the chain, later callers wait and receive the cached result. The
    /// cache is never invalidated short of dropping the resolver (explicit
    /// restart), so the key cannot change underneath an open store.
    pub async fn resolve(&self) -> Result<&ResolvedKey, SecretError> {
        self.cached
            .get_or_try_init(|| self.resolve_chain())
            .await
    }

    /// The source of the cached key, if resolution has happened.
    pub fn source(&self) -> Option<SecretSource> {
        self.cached.get().map(|k| k.source)
    }

    async fn resolve_chain(&self) -> Result<ResolvedKey, SecretError> {
        if let Some(key) = &self.settings.env_key {
            let resolved = ResolvedKey {
                secret: key.clone(),
                source: SecretSource::EnvironmentVariable,
            };
            info!(fingerprint = %resolved.fingerprint(), "Config key resolved from environment");
            return Ok(resolved);
        }

        if let Some(vault) = &self.settings.vault {
            match VaultClient::new(vault.clone()).fetch_key().await {
                Ok(secret) => {
                    let resolved = ResolvedKey {
                        secret,
                        source: SecretSource::Vault(vault.auth_method()),
                    };
                    info!(
                        addr = %vault.addr,
                        fingerprint = %resolved.fingerprint(),
                        "Config key resolved from Vault"
                    );
                    return Ok(resolved);
                }
                Err(e) => {
                    // Unreachable or failing Vault degrades to the next
                    // source; a warning, not an error.
                    warn!(addr = %vault.addr, error = %e, "Vault unreachable, falling back");
                    self.notify_fallthrough("vault", &e.to_string());
                }
            }
        }

        if let Some(secret) = self.read_key_file() {
            let resolved = ResolvedKey {
                secret,
                source: SecretSource::LocalFile,
            };
            info!(
                path = %self.settings.key_file.display(),
                fingerprint = %resolved.fingerprint(),
                "Config key resolved from local file"
            );
            return Ok(resolved);
        }

        if self.settings.allow_default {
            warn!("Using insecure default config key");
            let mut metadata = Metadata::new();
            metadata.insert("source".to_string(), "default_insecure".to_string());
            self.bus.publish(
                Level::Warning,
                "No config key source available; using the insecure development default",
                metadata,
            );
            return Ok(ResolvedKey {
                secret: DEFAULT_DEV_KEY.to_string(),
                source: SecretSource::DefaultInsecure,
            });
        }

        self.bus.error("No config key source available and the default key is disabled");
        Err(SecretError::KeyUnavailable)
    }

    fn read_key_file(&self) -> Option<String> {
        let path = &self.settings.key_file;
        if !path.exists() {
            return None;
        }

        self.check_key_file_permissions(path);

        match std::fs::read_to_string(path) {
            Ok(contents) => {
                let key = contents.trim().to_string();
                if key.is_empty() {
                    warn!(path = %path.display(), "Key file is empty, falling back");
                    self.notify_fallthrough("local_file", "key file is empty");
                    None
                } else {
                    Some(key)
                }
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Key file unreadable, falling back");
                self.notify_fallthrough("local_file", &e.to_string());
                None
            }
        }
    }

    /// Warn when the key file is readable beyond its owner. The key is still
    /// accepted.
    #[cfg(unix)]
    fn check_key_file_permissions(&self, path: &Path) {
        use std::os::unix::fs::PermissionsExt;

        let Ok(meta) = std::fs::metadata(path) else {
            return;
        };
        let mode = meta.permissions().mode() & 0o777;
        if mode & 0o077 != 0 {
            warn!(
                path = %path.display(),
                mode = format!("{mode:o}"),
                "Key file permissions are broader than owner-only"
            );
            let mut metadata = Metadata::new();
            metadata.insert("path".to_string(), path.display().to_string());
            metadata.insert("mode".to_string(), format!("{mode:o}"));
            self.bus.publish(
                Level::Warning,
                "Key file permissions are broader than owner-only (expected 0600)",
                metadata,
            );
        }
    }

    #[cfg(not(unix))]
    fn check_key_file_permissions(&self, _path: &Path) {}

    fn notify_fallthrough(&self, source: &str, reason: &str) {
        let mut metadata = Metadata::new();
        metadata.insert("source".to_string(), source.to_string());
        metadata.insert("reason".to_string(), reason.to_string());
        self.bus.publish(
            Level::Warning,
            format!("Secret source '{source}' unavailable, trying next source"),
            metadata,
        );
    }
}
