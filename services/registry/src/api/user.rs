//! User service: login, acct binding, metadata.
use crate::api::types::{
    DevLoginState, ErrorResponse, LoginStateEnvelope, UniformLoginState, UserBindRequest,
    UserBindResponse, UserData, UserLoginRequest, UserLoginResponse, UserSetMetadataRequest,
    UserSetMetadataResponse, DEV_LOGIN_STATE, UNIFORM_LOGIN_STATE,
};
use crate::app::AppState;
use crate::auth;
use crate::auth::Trust;
use crate::config::Environment;
use crate::error::{Error, Result};
use crate::model::App;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{AppendHeaders, IntoResponse};
use axum::{Extension, Json};
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha1::Sha1;

// Signature validity window: signatures age out after 10 s, and up to 3 s of
// client clock skew into the future is tolerated.
const TIMESTAMP_BACKWARD_SECS: i64 = 10;
const TIMESTAMP_FORWARD_SECS: i64 = 3;

/// HMAC-SHA1 over the canonical JSON encoding of the state with its
/// signature field emptied, rendered as lowercase hex. Clients compute the
/// same bytes to sign.
pub fn sign_login_state(state: &UniformLoginState, secret: &str) -> Result<String> {
    let mut cleared = state.clone();
    cleared.signature = String::new();
    let bytes = serde_json::to_vec(&cleared).map_err(|_| Error::InvalidState)?;
    let mut mac =
        Hmac::<Sha1>::new_from_slice(secret.as_bytes()).map_err(|_| Error::InvalidSignature)?;
    mac.update(&bytes);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

async fn check_state(
    state: &AppState,
    app: &App,
    envelope: &LoginStateEnvelope,
) -> Result<Vec<String>> {
    match envelope.type_url.as_str() {
        DEV_LOGIN_STATE => {
            if state.env != Environment::Dev {
                return Err(Error::InvalidState);
            }
            let dev: DevLoginState =
                serde_json::from_value(envelope.value.clone()).map_err(|_| Error::InvalidState)?;
            Ok(vec![format!("dev${}", dev.username)])
        }
        UNIFORM_LOGIN_STATE => {
            let uniform: UniformLoginState =
                serde_json::from_value(envelope.value.clone()).map_err(|_| Error::InvalidState)?;
            if !state
                .nonces
                .check(&app.id, &uniform.nonce, state.nonce_ttl)
                .await?
            {
                return Err(Error::InvalidNonce);
            }
            let now = Utc::now().timestamp();
            if uniform.timestamp < now - TIMESTAMP_BACKWARD_SECS
                || uniform.timestamp > now + TIMESTAMP_FORWARD_SECS
            {
                return Err(Error::InvalidTimestamp);
            }
            let expected = sign_login_state(&uniform, &app.secret)?;
            if !uniform.signature.eq_ignore_ascii_case(&expected) {
                tracing::warn!(app_id = %app.id, "login signature mismatch");
                return Err(Error::InvalidSignature);
            }
            Ok(uniform.acct_id)
        }
        other => {
            tracing::warn!(type_url = other, "unhandled login state type");
            Err(Error::InvalidState)
        }
    }
}

// Best-effort client address for audit fields.
fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .unwrap_or_default()
        .trim()
        .to_string()
}

#[utoipa::path(
    post,
    path = "/v1/user/login",
    tag = "user",
    request_body = UserLoginRequest,
    responses(
        (status = 200, description = "Logged in; token in response headers", body = UserLoginResponse),
        (status = 400, description = "Rejected login state", body = ErrorResponse)
    )
)]
pub(crate) async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<UserLoginRequest>,
) -> Result<impl IntoResponse> {
    let app = state.apps.find_by_id(&req.app_id).ok_or_else(|| {
        tracing::warn!(app_id = %req.app_id, "invalid app id");
        Error::InvalidAppId
    })?;
    let acct_ids = check_state(&state, &app, &req.state).await?;
    let user_ip = client_ip(&headers);
    let user = state.identity.login_user(&app, &user_ip, &acct_ids).await?;
    let sess = auth::new_sess(state.sessions.as_ref(), &app, &user.id).await?;
    metrics::counter!("registry_user_login_total").increment(1);
    Ok((
        AppendHeaders([
            (auth::X_LIBRA_TOKEN, sess.token.clone()),
            (auth::X_LIBRA_COOKIE_TOKEN, sess.token),
        ]),
        Json(UserLoginResponse {
            user: UserData::from(user),
        }),
    ))
}

#[utoipa::path(
    post,
    path = "/v1/user/bind",
    tag = "user",
    request_body = UserBindRequest,
    responses(
        (status = 200, description = "Acct ids bound", body = UserBindResponse),
        (status = 409, description = "Acct id held by another user", body = ErrorResponse)
    )
)]
pub(crate) async fn bind(
    State(state): State<AppState>,
    Extension(trust): Extension<Trust>,
    Json(req): Json<UserBindRequest>,
) -> Result<Json<UserBindResponse>> {
    let (app_id, user_id) = auth::require_user(&trust)?;
    state
        .identity
        .bind_acct_ids(&app_id, &user_id, &req.acct_ids, false)
        .await
        .map_err(|err| {
            tracing::warn!(error = %err, "failed to bind acct to user");
            err
        })?;
    Ok(Json(UserBindResponse {}))
}

#[utoipa::path(
    post,
    path = "/v1/user/set_metadata",
    tag = "user",
    request_body = UserSetMetadataRequest,
    responses(
        (status = 200, description = "Metadata patched", body = UserSetMetadataResponse)
    )
)]
pub(crate) async fn set_metadata(
    State(state): State<AppState>,
    Extension(trust): Extension<Trust>,
    Json(req): Json<UserSetMetadataRequest>,
) -> Result<Json<UserSetMetadataResponse>> {
    let (app_id, user_id) = auth::require_user(&trust)?;
    state
        .identity
        .set_user_metadata(&app_id, &user_id, &req.metadata)
        .await?;
    Ok(Json(UserSetMetadataResponse {}))
}
