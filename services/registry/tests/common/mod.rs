#![allow(dead_code)]
use axum::Router;
use chrono::Utc;
use libra_stream::MemoryStreamStore;
use registry::api::types::UniformLoginState;
use registry::api::user::sign_login_state;
use registry::app::{build_router, AppState};
use registry::apps::{AppRegistry, MemoryAppConfigStore};
use registry::config::Environment;
use registry::model::AppSpec;
use registry::store::{MemoryIdentityStore, MemoryNonceStore, MemorySessionStore};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

pub const APP_ID: &str = "alpha";
pub const APP_KEY: u32 = 7;
pub const APP_SECRET: &str = "s";
pub const OTHER_APP_ID: &str = "beta";
pub const OTHER_APP_KEY: u32 = 9;

pub struct TestEnv {
    pub state: AppState,
    pub router: Router,
}

pub async fn test_env() -> TestEnv {
    env_with(Environment::Dev).await
}

pub async fn env_with(env: Environment) -> TestEnv {
    let specs = vec![
        AppSpec {
            id: APP_ID.to_string(),
            key: APP_KEY,
            secret: APP_SECRET.to_string(),
            fingerprint: "fp-alpha".to_string(),
            permissions: Vec::new(),
        },
        AppSpec {
            id: OTHER_APP_ID.to_string(),
            key: OTHER_APP_KEY,
            secret: "s2".to_string(),
            fingerprint: "fp-beta".to_string(),
            permissions: Vec::new(),
        },
    ];
    let apps = Arc::new(
        AppRegistry::new(
            Arc::new(MemoryAppConfigStore::new(specs)),
            &["/v1/admin/**".to_string(), "/v1/pubsub/**".to_string()],
        )
        .expect("registry"),
    );
    apps.refresh().await.expect("refresh");
    let state = AppState {
        env,
        nonce_ttl: Duration::from_secs(60),
        apps,
        identity: Arc::new(MemoryIdentityStore::new()),
        sessions: Arc::new(MemorySessionStore::new()),
        nonces: Arc::new(MemoryNonceStore::new()),
        streams: Arc::new(MemoryStreamStore::new()),
    };
    TestEnv {
        router: build_router(state.clone()),
        state,
    }
}

pub async fn send(
    router: &Router,
    request: axum::http::Request<axum::body::Body>,
) -> axum::response::Response {
    router.clone().oneshot(request).await.expect("response")
}

pub async fn read_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

/// A signed uniform login body for the default test app.
pub fn uniform_login_body(acct_id: &str, nonce: &str) -> serde_json::Value {
    uniform_login_body_at(acct_id, nonce, Utc::now().timestamp())
}

pub fn uniform_login_body_at(acct_id: &str, nonce: &str, timestamp: i64) -> serde_json::Value {
    let mut state = UniformLoginState {
        acct_id: vec![acct_id.to_string()],
        timestamp,
        nonce: nonce.to_string(),
        signature: String::new(),
    };
    state.signature = sign_login_state(&state, APP_SECRET).expect("sign");
    serde_json::json!({
        "app_id": APP_ID,
        "state": {
            "type_url": "libra.v1.UniformLoginState",
            "value": serde_json::to_value(&state).expect("state"),
        }
    })
}

/// Log a user in and return `(token, user_id)`.
pub async fn login(env: &TestEnv, acct_id: &str, nonce: &str) -> (String, String) {
    let request =
        http_helpers_json_request("POST", "/v1/user/login", uniform_login_body(acct_id, nonce));
    let response = send(&env.router, request).await;
    assert_eq!(response.status(), axum::http::StatusCode::OK, "login failed");
    let token = response
        .headers()
        .get("x-libra-token")
        .expect("token header")
        .to_str()
        .expect("token text")
        .to_string();
    let body = read_json(response).await;
    let user_id = body["user"]["id"].as_str().expect("user id").to_string();
    (token, user_id)
}

// Small shim so `common` does not need its own copy of json_request.
fn http_helpers_json_request(
    method: &str,
    uri: &str,
    body: serde_json::Value,
) -> axum::http::Request<axum::body::Body> {
    axum::http::Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(axum::body::Body::from(body.to_string()))
        .expect("request")
}
