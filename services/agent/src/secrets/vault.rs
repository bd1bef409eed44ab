//! Vault client for the secret resolver.
//!
//! Supports two auth methods:
//! - static token (`VAULT_TOKEN`)
//! - AppRole (`VAULT_ROLE_ID` + `VAULT_SECRET_ID`), exchanged for a client
//!   token via `POST v1/auth/approle/login`
//!
//! The key is read from a fixed path (KV v2 `data.data.key`, with a KV v1
//! `data.key` fallback). Network and auth failures are retried with capped
//! exponential backoff; exhausting the retries surfaces as an error that the
//! resolver degrades into a fallthrough, never a fatal failure.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use super::VaultAuth;

const FETCH_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(200);
const BACKOFF_MAX: Duration = Duration::from_secs(2);

/// Field inside the Vault secret that carries the config key.
const KEY_FIELD: &str = "key";

/// Errors from Vault access.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("vault request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("vault returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("vault login did not return a client token")]
    LoginFailed,

    #[error("vault secret at '{0}' has no '{KEY_FIELD}' field")]
    MalformedSecret(String),
}

/// Vault credentials.
#[derive(Debug, Clone)]
pub enum VaultCredentials {
    /// Static token.
    Token(String),
    /// AppRole role-id/secret-id pair.
    AppRole { role_id: String, secret_id: String },
}

/// Vault access settings.
#[derive(Debug, Clone)]
pub struct VaultSettings {
    /// Base URL, e.g. `https://vault.internal:8200`.
    pub addr: String,
    /// Auth credentials.
    pub credentials: VaultCredentials,
    /// Secret read path, e.g. `secret/data/filamentbox`.
    pub secret_path: String,
}

impl VaultSettings {
    /// Capture Vault settings from the environment, if configured.
    ///
    /// Returns `None` when `VAULT_ADDR` is absent or no credentials are set,
    /// in which case the resolver skips Vault entirely.
    pub fn from_env() -> Option<Self> {
        let addr = std::env::var("VAULT_ADDR").ok().filter(|a| !a.is_empty())?;

        let credentials = if let Ok(token) = std::env::var("VAULT_TOKEN") {
            VaultCredentials::Token(token)
        } else {
            let role_id = std::env::var("VAULT_ROLE_ID").ok()?;
            let secret_id = std::env::var("VAULT_SECRET_ID").ok()?;
            VaultCredentials::AppRole { role_id, secret_id }
        };

        let secret_path = std::env::var("FILAMENTBOX_VAULT_PATH")
            .unwrap_or_else(|_| "secret/data/filamentbox".to_string());

        Some(Self {
            addr,
            credentials,
            secret_path,
        })
    }

    /// The auth method these settings use.
    pub fn auth_method(&self) -> VaultAuth {
        match self.credentials {
            VaultCredentials::Token(_) => VaultAuth::Token,
            VaultCredentials::AppRole { .. } => VaultAuth::AppRole,
        }
    }
}

/// Minimal Vault HTTP client.
pub struct VaultClient {
    http: reqwest::Client,
    settings: VaultSettings,
}

impl VaultClient {
    /// Create a client for the given settings.
    pub fn new(settings: VaultSettings) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();
        Self { http, settings }
    }

    /// Fetch the config key, retrying transient failures.
    pub async fn fetch_key(&self) -> Result<String, VaultError> {
        let mut last_err = VaultError::LoginFailed;

        for attempt in 0..FETCH_ATTEMPTS {
            if attempt > 0 {
                let delay = backoff_delay(attempt - 1);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "Retrying Vault fetch");
                tokio::time::sleep(delay).await;
            }

            match self.try_fetch().await {
                Ok(key) => return Ok(key),
                Err(e) => {
                    warn!(attempt, error = %e, "Vault fetch attempt failed");
                    last_err = e;
                }
            }
        }

        Err(last_err)
    }

    async fn try_fetch(&self) -> Result<String, VaultError> {
        let token = match &self.settings.credentials {
            VaultCredentials::Token(token) => token.clone(),
            VaultCredentials::AppRole { role_id, secret_id } => {
                self.approle_login(role_id, secret_id).await?
            }
        };

        let url = format!(
            "{}/v1/{}",
            self.settings.addr.trim_end_matches('/'),
            self.settings.secret_path
        );
        let response = self
            .http
            .get(&url)
            .header("X-Vault-Token", &token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(VaultError::Status(response.status()));
        }

        let body: Value = response.json().await?;
        extract_key(&body)
            .ok_or_else(|| VaultError::MalformedSecret(self.settings.secret_path.clone()))
    }

    async fn approle_login(&self, role_id: &str, secret_id: &str) -> Result<String, VaultError> {
        let url = format!(
            "{}/v1/auth/approle/login",
            self.settings.addr.trim_end_matches('/')
        );
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "role_id": role_id,
                "secret_id": secret_id,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(VaultError::Status(response.status()));
        }

        let body: Value = response.json().await?;
        body.pointer("/auth/client_token")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(VaultError::LoginFailed)
    }
}

/// Pull the key field out of a KV v2 (or v1) read response.
fn extract_key(body: &Value) -> Option<String> {
    body.pointer(&format!("/data/data/{KEY_FIELD}"))
        .or_else(|| body.pointer(&format!("/data/{KEY_FIELD}")))
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Capped exponential backoff delay for the given attempt number.
fn backoff_delay(attempt: u32) -> Duration {
    let delay = BACKOFF_BASE.as_millis() as u64 * 2u64.saturating_pow(attempt);
    Duration::from_millis(delay).min(BACKOFF_MAX)
}
