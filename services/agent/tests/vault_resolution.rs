//! Vault-backed key resolution against a mock server.

use std::path::PathBuf;

use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fbox_agent::secrets::{
    SecretResolver, SecretSettings, SecretSource, VaultAuth, VaultCredentials, VaultSettings,
};
use fbox_events::{Level, NotificationBus};

fn settings_with_vault(vault: VaultSettings) -> SecretSettings {
    SecretSettings {
        env_key: None,
        vault: Some(vault),
        key_file: PathBuf::from("/nonexistent/secret.key"),
        allow_default: true,
    }
}

#[tokio::test]
async fn test_token_auth_fetches_key() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/secret/data/filamentbox"))
        .and(header("X-Vault-Token", "root-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "data": { "key": "vault-master-key" } }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let resolver = SecretResolver::new(
        settings_with_vault(VaultSettings {
            addr: server.uri(),
            credentials: VaultCredentials::Token("root-token".to_string()),
            secret_path: "secret/data/filamentbox".to_string(),
        }),
        NotificationBus::default(),
    );

    let key = resolver.resolve().await.unwrap();
    assert_eq!(key.secret(), "vault-master-key");
    assert_eq!(key.source(), SecretSource::Vault(VaultAuth::Token));
}

#[tokio::test]
async fn test_approle_login_then_fetch() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/auth/approle/login"))
        .and(body_json(json!({
            "role_id": "role-1",
            "secret_id": "secret-1",
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "auth": { "client_token": "issued-token" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1/secret/data/filamentbox"))
        .and(header("X-Vault-Token", "issued-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "data": { "key": "approle-master-key" } }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let resolver = SecretResolver::new(
        settings_with_vault(VaultSettings {
            addr: server.uri(),
            credentials: VaultCredentials::AppRole {
                role_id: "role-1".to_string(),
                secret_id: "secret-1".to_string(),
            },
            secret_path: "secret/data/filamentbox".to_string(),
        }),
        NotificationBus::default(),
    );

    let key = resolver.resolve().await.unwrap();
    assert_eq!(key.secret(), "approle-master-key");
    assert_eq!(key.source(), SecretSource::Vault(VaultAuth::AppRole));
}

#[tokio::test]
async fn test_kv1_layout_fallback() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/secret/filamentbox"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "key": "kv1-master-key" }
        })))
        .mount(&server)
        .await;

    let resolver = SecretResolver::new(
        settings_with_vault(VaultSettings {
            addr: server.uri(),
            credentials: VaultCredentials::Token("t".to_string()),
            secret_path: "secret/filamentbox".to_string(),
        }),
        NotificationBus::default(),
    );

    let key = resolver.resolve().await.unwrap();
    assert_eq!(key.secret(), "kv1-master-key");
}

#[tokio::test]
async fn test_server_errors_exhaust_retries_then_fall_through() {
    let server = MockServer::start().await;

    // Three attempts, then the chain degrades to the next source (here the
    // development default, with a warning on the bus).
    Mock::given(method("GET"))
        .and(path("/v1/secret/data/filamentbox"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&server)
        .await;

    let bus = NotificationBus::default();
    let resolver = SecretResolver::new(
        settings_with_vault(VaultSettings {
            addr: server.uri(),
            credentials: VaultCredentials::Token("t".to_string()),
            secret_path: "secret/data/filamentbox".to_string(),
        }),
        bus.clone(),
    );

    let key = resolver.resolve().await.unwrap();
    assert_eq!(key.source(), SecretSource::DefaultInsecure);

    let (history, _) = bus.subscribe();
    assert!(history
        .iter()
        .any(|n| n.level == Level::Warning && n.message.contains("'vault'")));
}

#[tokio::test]
async fn test_malformed_secret_falls_through() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/secret/data/filamentbox"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "data": { "not_the_key": "x" } }
        })))
        .mount(&server)
        .await;

    let resolver = SecretResolver::new(
        settings_with_vault(VaultSettings {
            addr: server.uri(),
            credentials: VaultCredentials::Token("t".to_string()),
            secret_path: "secret/data/filamentbox".to_string(),
        }),
        NotificationBus::default(),
    );

    let key = resolver.resolve().await.unwrap();
    assert_eq!(key.source(), SecretSource::DefaultInsecure);
}

#[tokio::test]
async fn test_env_key_short_circuits_without_network() {
    let server = MockServer::start().await;

    // Zero requests expected; verified when the mock server drops.
    Mock::given(method("GET"))
        .and(path("/v1/secret/data/filamentbox"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut settings = settings_with_vault(VaultSettings {
        addr: server.uri(),
        credentials: VaultCredentials::Token("t".to_string()),
        secret_path: "secret/data/filamentbox".to_string(),
    });
    settings.env_key = Some("direct-key".to_string());

    let resolver = SecretResolver::new(settings, NotificationBus::default());
    let key = resolver.resolve().await.unwrap();

    assert_eq!(key.secret(), "direct-key");
    assert_eq!(key.source(), SecretSource::EnvironmentVariable);
}
