//! End-to-end tests for the authorization server over HTTP.
//!
//! Drives the axum router directly with `oneshot`: discovery, registration,
//! authorize, login, token exchange, introspection and revocation.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use serde_json::json;
use tower::ServiceExt;

use notebook_oauth::config::Config;
use notebook_oauth::server::create_router;
use notebook_oauth::server::oauth::pkce::challenge_s256;
use notebook_oauth::{NotebookOAuthProvider, ScopeTable};

const BASE_URL: &str = "http://localhost:9000";
const REDIRECT_URI: &str = "http://localhost:3030/callback";
const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";

fn build_test_router() -> axum::Router {
    let config = Config::for_testing(BASE_URL);
    let provider = Arc::new(NotebookOAuthProvider::new(&config));
    create_router(provider, &config, ScopeTable::notebook())
}

async fn body_json(response: Response<Body>) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

async fn body_text(response: Response<Body>) -> String {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}

fn location(response: &Response<Body>) -> String {
    response.headers()["location"].to_str().unwrap().to_string()
}

fn query_pairs(url: &str) -> HashMap<String, String> {
    let url = url::Url::parse(url).unwrap();
    url.query_pairs().into_owned().collect()
}

async fn post_form(app: &axum::Router, uri: &str, params: &[(&str, &str)]) -> Response<Body> {
    app.clone()
        .oneshot(
            Request::post(uri)
                .header("Content-Type", "application/x-www-form-urlencoded")
                .body(Body::from(serde_urlencoded::to_string(params).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn get(app: &axum::Router, uri: &str) -> Response<Body> {
    app.clone()
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn login(app: &axum::Router, password: &str, state: &str) -> Response<Body> {
    post_form(
        app,
        "/login/callback",
        &[
            ("username", "demo_user"),
            ("password", password),
            ("state", state),
        ],
    )
    .await
}

async fn register(app: &axum::Router, redirect_uris: &[&str]) -> String {
    let metadata = json!({ "client_name": "Test Client", "redirect_uris": redirect_uris });
    let response = app
        .clone()
        .oneshot(
            Request::post("/register")
                .header("Content-Type", "application/json")
                .body(Body::from(metadata.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    body["client_id"].as_str().unwrap().to_string()
}

fn authorize_uri(client_id: &str, scope: &str, state: &str) -> String {
    let challenge = challenge_s256(VERIFIER);
    let params = [
        ("client_id", client_id),
        ("redirect_uri", REDIRECT_URI),
        ("response_type", "code"),
        ("state", state),
        ("code_challenge", challenge.as_str()),
        ("code_challenge_method", "S256"),
        ("scope", scope),
        ("resource", "http://localhost:8001/mcp"),
    ];
    let query = serde_urlencoded::to_string(params).unwrap();
    format!("/authorize?{query}")
}

/// Register, authorize and log in; returns the client id and the code.
async fn obtain_code(app: &axum::Router, scope: &str) -> (String, String) {
    let client_id = register(app, &[REDIRECT_URI]).await;

    let response = get(app, &authorize_uri(&client_id, scope, "xyz123")).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    let login_url = location(&response);
    assert!(login_url.starts_with("http://localhost:9000/login?"));
    let state = query_pairs(&login_url)["state"].clone();
    assert_eq!(state, "xyz123");

    let response = login(app, "demo_password", &state).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    let redirect = location(&response);
    assert!(redirect.starts_with(REDIRECT_URI));

    let pairs = query_pairs(&redirect);
    assert_eq!(pairs["state"], "xyz123");
    (client_id, pairs["code"].clone())
}

async fn exchange(app: &axum::Router, client_id: &str, code: &str) -> Response<Body> {
    post_form(
        app,
        "/token",
        &[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", REDIRECT_URI),
            ("code_verifier", VERIFIER),
            ("client_id", client_id),
        ],
    )
    .await
}

#[tokio::test]
async fn test_full_oauth_http_flow() {
    let app = build_test_router();

    let response = get(&app, "/.well-known/oauth-authorization-server").await;
    assert_eq!(response.status(), StatusCode::OK);
    let metadata = body_json(response).await;
    assert_eq!(metadata["token_endpoint"], "http://localhost:9000/token");
    let methods = &metadata["code_challenge_methods_supported"];
    assert_eq!(*methods, json!(["S256"]));
    let grants = &metadata["grant_types_supported"];
    assert_eq!(*grants, json!(["authorization_code"]));

    let (client_id, code) = obtain_code(&app, "read write").await;

    let response = exchange(&app, &client_id, &code).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["cache-control"], "no-store");
    assert_eq!(response.headers()["pragma"], "no-cache");

    let token = body_json(response).await;
    assert_eq!(token["token_type"], "Bearer");
    assert_eq!(token["expires_in"], 3600);
    assert_eq!(token["scope"], "read write");
    assert!(token.get("refresh_token").is_none());
    let access_token = token["access_token"].as_str().unwrap().to_string();
    assert!(access_token.starts_with("mcp_"));

    let response = post_form(&app, "/introspect", &[("token", &access_token)]).await;
    let info = body_json(response).await;
    assert_eq!(info["active"], true);
    assert_eq!(info["client_id"], client_id.as_str());
    assert_eq!(info["scope"], "read write");
    assert_eq!(info["aud"], "http://localhost:8001/mcp");
    assert_eq!(info["sub"], "demo_user");

    let response = post_form(&app, "/revoke", &[("token", &access_token)]).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = post_form(&app, "/introspect", &[("token", &access_token)]).await;
    assert_eq!(body_json(response).await, json!({ "active": false }));
}

#[tokio::test]
async fn test_code_exchange_is_single_use() {
    let app = build_test_router();
    let (client_id, code) = obtain_code(&app, "read").await;

    let response = exchange(&app, &client_id, &code).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = exchange(&app, &client_id, &code).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_grant");
}

#[tokio::test]
async fn test_token_rejects_wrong_verifier() {
    let app = build_test_router();
    let (client_id, code) = obtain_code(&app, "read").await;

    let response = post_form(
        &app,
        "/token",
        &[
            ("grant_type", "authorization_code"),
            ("code", &code),
            ("redirect_uri", REDIRECT_URI),
            ("code_verifier", "not-the-verifier"),
            ("client_id", &client_id),
        ],
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_grant");
}

#[tokio::test]
async fn test_token_rejects_redirect_uri_mismatch() {
    let app = build_test_router();
    let (client_id, code) = obtain_code(&app, "read").await;

    let response = post_form(
        &app,
        "/token",
        &[
            ("grant_type", "authorization_code"),
            ("code", &code),
            ("redirect_uri", "http://localhost:4040/callback"),
            ("code_verifier", VERIFIER),
            ("client_id", &client_id),
        ],
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_refresh_grant_unsupported() {
    let app = build_test_router();
    let client_id = register(&app, &[REDIRECT_URI]).await;

    let response = post_form(
        &app,
        "/token",
        &[
            ("grant_type", "refresh_token"),
            ("refresh_token", "anything"),
            ("client_id", &client_id),
        ],
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "unsupported_grant_type");
}

#[tokio::test]
async fn test_token_unknown_client() {
    let app = build_test_router();
    let response = post_form(
        &app,
        "/token",
        &[
            ("grant_type", "authorization_code"),
            ("code", "mcp_x"),
            ("client_id", "ghost"),
        ],
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"], "invalid_client");
}

#[tokio::test]
async fn test_register_requires_redirect_uris() {
    let app = build_test_router();
    let response = app
        .clone()
        .oneshot(
            Request::post("/register")
                .header("Content-Type", "application/json")
                .body(Body::from(json!({ "client_name": "No Redirects" }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "invalid_client_metadata");
}

#[tokio::test]
async fn test_authorize_rejects_unregistered_client() {
    let app = build_test_router();
    let response = get(&app, &authorize_uri("unknown", "read", "s")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"], "invalid_client");
}

#[tokio::test]
async fn test_authorize_rejects_unregistered_redirect_uri() {
    let app = build_test_router();
    let client_id = register(&app, &["http://localhost:4040/callback"]).await;

    let response = get(&app, &authorize_uri(&client_id, "read", "s")).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_request");
}

#[tokio::test]
async fn test_authorize_requires_s256() {
    let app = build_test_router();
    let client_id = register(&app, &[REDIRECT_URI]).await;

    let uri = authorize_uri(&client_id, "read", "s").replace("S256", "plain");
    let response = get(&app, &uri).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_empty_state_is_replaced_and_login_completes() {
    let app = build_test_router();
    let client_id = register(&app, &[REDIRECT_URI]).await;

    let response = get(&app, &authorize_uri(&client_id, "read", "")).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    let login_url = location(&response);
    let state = query_pairs(&login_url)["state"].clone();
    assert_eq!(state.len(), 32);

    let page = format!("/login?state={state}");
    assert_eq!(get(&app, &page).await.status(), StatusCode::OK);

    let response = login(&app, "demo_password", &state).await;
    assert_eq!(response.status(), StatusCode::FOUND);
    let redirect = location(&response);
    assert_eq!(query_pairs(&redirect)["state"], state);
}

#[tokio::test]
async fn test_login_page_shows_requested_scopes() {
    let app = build_test_router();
    let client_id = register(&app, &[REDIRECT_URI]).await;
    get(&app, &authorize_uri(&client_id, "read write", "page-state")).await;

    let response = get(&app, "/login?state=page-state").await;
    assert_eq!(response.status(), StatusCode::OK);
    let html = body_text(response).await;
    let action = r#"action="http://localhost:9000/login/callback""#;
    assert!(html.contains("read write"));
    assert!(html.contains(action));

    let response = get(&app, "/login?state=unknown").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_login_wrong_password_then_retry() {
    let app = build_test_router();
    let client_id = register(&app, &[REDIRECT_URI]).await;
    get(&app, &authorize_uri(&client_id, "read", "retry-state")).await;

    let response = login(&app, "wrong", "retry-state").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let html = body_text(response).await;
    assert!(html.contains("Invalid username or password."));
    assert!(!html.contains("wrong"));

    let response = login(&app, "demo_password", "retry-state").await;
    assert_eq!(response.status(), StatusCode::FOUND);
}

#[tokio::test]
async fn test_login_unknown_state() {
    let app = build_test_router();
    let response = login(&app, "demo_password", "never-issued").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn test_login_missing_fields() {
    let app = build_test_router();
    let params = [("username", "demo_user"), ("state", "s")];
    let response = post_form(&app, "/login/callback", &params).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    let description = body["error_description"].as_str().unwrap();
    assert!(description.contains("password"));
}

#[tokio::test]
async fn test_protected_resource_metadata_lists_scopes() {
    let app = build_test_router();
    let response = get(&app, "/.well-known/oauth-protected-resource").await;
    assert_eq!(response.status(), StatusCode::OK);
    let metadata = body_json(response).await;
    assert_eq!(metadata["resource"], "http://localhost:8001/mcp");
    assert_eq!(metadata["authorization_servers"], json!([BASE_URL]));
    assert_eq!(metadata["scopes_supported"], json!(["read", "write"]));
}

#[tokio::test]
async fn test_health() {
    let app = build_test_router();
    let response = get(&app, "/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");
}
