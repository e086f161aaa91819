//! Tests for the authorization state machine, driven through the provider API.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use url::Url;

use notebook_oauth::config::Config;
use notebook_oauth::error::{AuthError, AuthResult};
use notebook_oauth::server::oauth::{
    AccessToken, AuthorizationParams, ClientInfo, NotebookOAuthProvider, TokenResponse,
};

const REDIRECT: &str = "http://localhost:3030/callback";

fn provider_with(config: &Config) -> NotebookOAuthProvider {
    NotebookOAuthProvider::new(config)
}

fn provider() -> NotebookOAuthProvider {
    provider_with(&Config::for_testing("http://localhost:9000"))
}

fn params(state: &str, scopes: &[&str]) -> AuthorizationParams {
    AuthorizationParams {
        state: Some(state.to_string()),
        scopes: scopes.iter().map(|s| (*s).to_string()).collect(),
        code_challenge: "challenge".to_string(),
        redirect_uri: Url::parse(REDIRECT).unwrap(),
        redirect_uri_provided_explicitly: true,
        resource: None,
    }
}

fn code_from(redirect: &str) -> String {
    Url::parse(redirect)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == "code")
        .map(|(_, v)| v.into_owned())
        .unwrap()
}

fn client() -> ClientInfo {
    ClientInfo::new("c1", vec![REDIRECT.to_string()])
}

/// Authorize `client` under `state` and log in. Returns the code.
async fn login(
    provider: &NotebookOAuthProvider,
    client: &ClientInfo,
    state: &str,
    scopes: &[&str],
) -> String {
    provider
        .authorize(client, params(state, scopes))
        .await
        .unwrap();
    let redirect = provider
        .authenticate("demo_user", "demo_password", state)
        .await
        .unwrap();
    code_from(&redirect)
}

/// Register `c1`, authorize with `scopes` and log in. Returns the client and code.
async fn issue_code(provider: &NotebookOAuthProvider, scopes: &[&str]) -> (ClientInfo, String) {
    let client = client();
    provider.register_client(client.clone()).await.unwrap();
    let code = login(provider, &client, "state-1", scopes).await;
    (client, code)
}

async fn exchange(
    provider: &NotebookOAuthProvider,
    client: &ClientInfo,
    code: &str,
) -> AuthResult<TokenResponse> {
    provider.exchange_authorization_code(client, code).await
}

#[tokio::test]
async fn test_double_exchange_fails() {
    let provider = provider();
    let (client, code) = issue_code(&provider, &["read"]).await;

    exchange(&provider, &client, &code).await.unwrap();
    let err = exchange(&provider, &client, &code).await.unwrap_err();
    assert!(matches!(err, AuthError::Grant(_)));
    assert_eq!(err.error_code(), "invalid_grant");
}

#[tokio::test]
async fn test_token_scopes_equal_code_scopes() {
    for scopes in [&["read"][..], &["write"], &["read", "write"], &[]] {
        let provider = provider();
        let (client, code) = issue_code(&provider, scopes).await;

        let issued = provider.load_authorization_code(&client, &code).await;
        assert_eq!(issued.unwrap().scopes, scopes);

        let response = exchange(&provider, &client, &code).await.unwrap();
        assert_eq!(response.scopes(), scopes);
        assert_eq!(response.expires_in, Some(3600));
        assert_eq!(response.token_type, "Bearer");

        let token = provider.load_access_token(&response.access_token).await;
        let token = token.unwrap();
        assert_eq!(token.scopes, scopes);
        assert_eq!(token.client_id, "c1");
        assert_eq!(token.resource_owner.as_deref(), Some("demo_user"));
    }
}

#[tokio::test]
async fn test_expired_token_is_evicted() {
    let provider = provider();
    provider
        .store()
        .insert_access_token(AccessToken {
            token: "mcp_expired".into(),
            client_id: "c1".into(),
            scopes: vec!["read".into()],
            expires_at: Utc::now() - Duration::seconds(1),
            resource: None,
            resource_owner: None,
        })
        .await;
    assert_eq!(provider.store().counts().await.3, 1);

    assert!(provider.load_access_token("mcp_expired").await.is_none());
    assert_eq!(provider.store().counts().await.3, 0);
}

#[tokio::test]
async fn test_expired_code_rejected() {
    let mut config = Config::for_testing("http://localhost:9000");
    config.auth_code_lifetime = 0;
    let provider = provider_with(&config);
    let (client, code) = issue_code(&provider, &["read"]).await;

    tokio::time::sleep(StdDuration::from_millis(20)).await;

    let loaded = provider.load_authorization_code(&client, &code).await;
    assert!(loaded.is_none());
    let err = exchange(&provider, &client, &code).await.unwrap_err();
    assert!(matches!(err, AuthError::Grant(_)));
}

#[tokio::test]
async fn test_revoke_makes_token_unloadable() {
    let provider = provider();
    let (client, code) = issue_code(&provider, &["write"]).await;
    let response = exchange(&provider, &client, &code).await.unwrap();
    let token = response.access_token;

    provider.revoke_token(&token).await;
    assert!(provider.load_access_token(&token).await.is_none());

    // Revoking again, or revoking a token that never existed, is a no-op.
    provider.revoke_token(&token).await;
    provider.revoke_token("mcp_never_issued").await;
}

#[tokio::test]
async fn test_new_flow_after_token_issued() {
    let provider = provider();
    let (client, code) = issue_code(&provider, &["read"]).await;
    let first = exchange(&provider, &client, &code).await.unwrap();

    let code = login(&provider, &client, "state-2", &["write"]).await;
    let second = exchange(&provider, &client, &code).await.unwrap();

    assert_ne!(first.access_token, second.access_token);
    let still_live = provider.load_access_token(&first.access_token).await;
    assert!(still_live.is_some());
    assert_eq!(second.scopes(), ["write"]);
}

#[tokio::test]
async fn test_store_is_consumed_along_the_flow() {
    let provider = provider();
    let client = client();
    provider.register_client(client.clone()).await.unwrap();
    provider
        .authorize(&client, params("s", &["read"]))
        .await
        .unwrap();
    assert_eq!(provider.store().counts().await, (1, 1, 0, 0));

    let redirect = provider
        .authenticate("demo_user", "demo_password", "s")
        .await
        .unwrap();
    assert_eq!(provider.store().counts().await, (1, 0, 1, 0));

    let code = code_from(&redirect);
    exchange(&provider, &client, &code).await.unwrap();
    assert_eq!(provider.store().counts().await, (1, 0, 0, 1));
}

#[tokio::test]
async fn test_concurrent_logins_for_one_state() {
    let provider = Arc::new(provider());
    let client = client();
    provider.register_client(client.clone()).await.unwrap();
    provider
        .authorize(&client, params("race", &["read"]))
        .await
        .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let provider = Arc::clone(&provider);
            tokio::spawn(async move {
                provider
                    .authenticate("demo_user", "demo_password", "race")
                    .await
            })
        })
        .collect();

    let mut issued = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => issued += 1,
            Err(e) => assert!(matches!(e, AuthError::State)),
        }
    }
    assert_eq!(issued, 1);
}
