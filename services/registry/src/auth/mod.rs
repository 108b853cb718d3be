//! Trust resolution for inbound calls.
//!
//! Every request passes the [`authenticate`] middleware, which resolves a
//! [`Trust`] record and stores it in request extensions. Two modes exist:
//! by-token (the caller holds an `x-libra-token` that must match the live
//! session) and by-secret (a trusted front door asserts the app identity;
//! the request path must then satisfy the app's permission rules). A small
//! allow-list of paths requires no trust at all.
use crate::app::AppState;
use crate::apps::AppRegistry;
use crate::error::{Error, Result};
use crate::model::{App, SessData, Session};
use crate::store::SessionStore;
use crate::token;
use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;

pub const X_LIBRA_TOKEN: &str = "x-libra-token";
pub const X_LIBRA_COOKIE_TOKEN: &str = "x-libra-cookie-token";
pub const X_LIBRA_TRUSTED_AUTH_BY: &str = "x-libra-trusted-auth-by";
pub const X_LIBRA_TRUSTED_APP_ID: &str = "x-libra-trusted-app-id";
pub const X_LIBRA_TRUSTED_USER_ID: &str = "x-libra-trusted-user-id";

// Paths that must work before any trust exists.
const TOKEN_EXEMPT_PATHS: &[&str] = &["/v1/user/login"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthBy {
    Token,
    Secret,
}

/// Trust record attached to a request by the interceptor.
#[derive(Debug, Clone)]
pub struct Trust {
    pub app_id: String,
    pub user_id: Option<String>,
    pub auth_by: AuthBy,
    /// Role pointer carried by the session, when one is signed in.
    pub role_id: Option<String>,
    pub role_index: Option<u32>,
}

/// Issue a fresh session for the user, rotating any previous token.
pub async fn new_sess(sessions: &dyn SessionStore, app: &App, user_id: &str) -> Result<Session> {
    let sess = Session {
        token: token::new_token(app, user_id)?,
        data: SessData::default(),
    };
    sessions.put(user_id, &sess).await?;
    Ok(sess)
}

/// Resolve a presented token against the app registry and the session
/// store. The token is only valid while it byte-equals the session's
/// current token.
pub async fn check_token(
    apps: &AppRegistry,
    sessions: &dyn SessionStore,
    token: &str,
) -> Result<Trust> {
    let (app, user_id) = token::dec_token(apps, token).map_err(|err| {
        tracing::warn!("failed to decode token");
        err
    })?;
    let sess = sessions.get(&user_id).await?;
    if sess.token != token {
        return Err(Error::InvalidToken);
    }
    let role_id = (!sess.data.role_id.is_empty()).then(|| sess.data.role_id.clone());
    let role_index = role_id.is_some().then_some(sess.data.role_index);
    Ok(Trust {
        app_id: app.id.clone(),
        user_id: Some(user_id),
        auth_by: AuthBy::Token,
        role_id,
        role_index,
    })
}

pub async fn authenticate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> std::result::Result<Response, Error> {
    let path = request.uri().path().to_string();
    if TOKEN_EXEMPT_PATHS.contains(&path.as_str()) {
        return Ok(next.run(request).await);
    }
    let trust = resolve_trust(&state, request.headers(), &path).await?;
    request.extensions_mut().insert(trust);
    Ok(next.run(request).await)
}

async fn resolve_trust(state: &AppState, headers: &HeaderMap, path: &str) -> Result<Trust> {
    if let Some(auth_by) = header_str(headers, X_LIBRA_TRUSTED_AUTH_BY) {
        return match auth_by {
            "secret" => {
                let app_id =
                    header_str(headers, X_LIBRA_TRUSTED_APP_ID).ok_or(Error::Unauthenticated)?;
                let app = state.apps.find_by_id(app_id).ok_or(Error::Unauthenticated)?;
                if !app.is_permitted(path) {
                    tracing::warn!(app_id, path, "path not permitted for app");
                    return Err(Error::Unauthenticated);
                }
                Ok(Trust {
                    app_id: app.id.clone(),
                    user_id: header_str(headers, X_LIBRA_TRUSTED_USER_ID).map(str::to_string),
                    auth_by: AuthBy::Secret,
                    role_id: None,
                    role_index: None,
                })
            }
            // A front door may assert token trust, but the session store
            // stays authoritative; resolve the token ourselves.
            "token" => token_trust(state, headers).await,
            _ => Err(Error::Unauthenticated),
        };
    }
    token_trust(state, headers).await
}

async fn token_trust(state: &AppState, headers: &HeaderMap) -> Result<Trust> {
    let token = header_str(headers, X_LIBRA_TOKEN).ok_or(Error::LoginRequired)?;
    check_token(&state.apps, state.sessions.as_ref(), token).await
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

/// Token-authenticated caller: `(app_id, user_id)`.
pub fn require_user(trust: &Trust) -> Result<(String, String)> {
    match &trust.user_id {
        Some(user_id) => Ok((trust.app_id.clone(), user_id.clone())),
        None => Err(Error::LoginRequired),
    }
}

/// Secret-authenticated caller: the trusted app id.
pub fn require_secret(trust: &Trust) -> Result<String> {
    if trust.auth_by != AuthBy::Secret {
        return Err(Error::Unauthenticated);
    }
    Ok(trust.app_id.clone())
}
