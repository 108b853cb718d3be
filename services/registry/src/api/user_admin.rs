//! Privileged user administration; every call is secret-authenticated and
//! every referenced id must belong to the trusted app.
use crate::api::types::{
    ErrorResponse, RoleData, UserAdminBanRequest, UserAdminBanResponse,
    UserAdminBindAcctIdRequest, UserAdminBindAcctIdResponse, UserAdminGetMetadataRequest,
    UserAdminGetMetadataResponse, UserAdminGetRequest, UserAdminGetResponse,
    UserAdminSetMetadataRequest, UserBanState, UserData, UserSetMetadataResponse,
};
use crate::app::AppState;
use crate::auth;
use crate::auth::Trust;
use crate::error::{Error, Result};
use crate::id;
use crate::model::App;
use axum::extract::State;
use axum::{Extension, Json};
use chrono::Utc;
use std::sync::Arc;

fn trusted_app<'a>(
    state: &AppState,
    trust: &Trust,
    ids: impl IntoIterator<Item = &'a str>,
) -> Result<Arc<App>> {
    let app_id = auth::require_secret(trust)?;
    let app = state.apps.find_by_id(&app_id).ok_or(Error::Unauthenticated)?;
    if !id::id_belongs_to_app(&app, ids) {
        return Err(Error::Unauthenticated);
    }
    Ok(app)
}

#[utoipa::path(
    post,
    path = "/v1/admin/user/get",
    tag = "user-admin",
    request_body = UserAdminGetRequest,
    responses(
        (status = 200, description = "Resolved users and roles", body = UserAdminGetResponse),
        (status = 401, description = "Ids outside the trusted app", body = ErrorResponse)
    )
)]
pub(crate) async fn get(
    State(state): State<AppState>,
    Extension(trust): Extension<Trust>,
    Json(req): Json<UserAdminGetRequest>,
) -> Result<Json<UserAdminGetResponse>> {
    let app = trusted_app(&state, &trust, req.ids.iter().map(String::as_str))?;
    let options = req.options.unwrap_or_default();

    let mut user_ids = req.ids.clone();
    if options.fuzzy {
        user_ids = Vec::with_capacity(req.ids.len());
        let mut role_ids = Vec::new();
        for raw in &req.ids {
            match id::dec_id(raw) {
                Ok((_, tag)) if tag == id::USER_TAG => user_ids.push(raw.clone()),
                Ok((_, tag)) if tag == id::ROLE_TAG => role_ids.push(raw.clone()),
                _ => {}
            }
        }
        if !role_ids.is_empty() {
            // Dereference role ids to their owning users.
            for role in state.identity.get_roles(&app.id, &role_ids).await? {
                user_ids.push(role.user_id);
            }
        }
        user_ids.sort();
        user_ids.dedup();
    }

    let users = state.identity.get_users(&app.id, &user_ids).await?;
    let roles = if options.with_roles {
        state.identity.roles_by_user(&app.id, &user_ids).await?
    } else {
        Vec::new()
    };
    Ok(Json(UserAdminGetResponse {
        users: users.into_iter().map(UserData::from).collect(),
        roles: roles.into_iter().map(RoleData::from).collect(),
    }))
}

#[utoipa::path(
    post,
    path = "/v1/admin/user/set_metadata",
    tag = "user-admin",
    request_body = UserAdminSetMetadataRequest,
    responses(
        (status = 200, description = "Metadata patched", body = UserSetMetadataResponse)
    )
)]
pub(crate) async fn set_metadata(
    State(state): State<AppState>,
    Extension(trust): Extension<Trust>,
    Json(req): Json<UserAdminSetMetadataRequest>,
) -> Result<Json<UserSetMetadataResponse>> {
    let app = trusted_app(&state, &trust, [req.user_id.as_str()])?;
    state
        .identity
        .set_user_metadata(&app.id, &req.user_id, &req.metadata)
        .await?;
    Ok(Json(UserSetMetadataResponse {}))
}

#[utoipa::path(
    post,
    path = "/v1/admin/user/get_metadata",
    tag = "user-admin",
    request_body = UserAdminGetMetadataRequest,
    responses(
        (status = 200, description = "Current metadata", body = UserAdminGetMetadataResponse)
    )
)]
pub(crate) async fn get_metadata(
    State(state): State<AppState>,
    Extension(trust): Extension<Trust>,
    Json(req): Json<UserAdminGetMetadataRequest>,
) -> Result<Json<UserAdminGetMetadataResponse>> {
    let app = trusted_app(&state, &trust, [req.user_id.as_str()])?;
    let user = state.identity.get_user(&app.id, &req.user_id).await?;
    Ok(Json(UserAdminGetMetadataResponse {
        metadata: user.metadata,
    }))
}

#[utoipa::path(
    post,
    path = "/v1/admin/user/ban",
    tag = "user-admin",
    request_body = UserAdminBanRequest,
    responses(
        (status = 200, description = "Resulting ban states", body = UserAdminBanResponse)
    )
)]
pub(crate) async fn ban(
    State(state): State<AppState>,
    Extension(trust): Extension<Trust>,
    Json(req): Json<UserAdminBanRequest>,
) -> Result<Json<UserAdminBanResponse>> {
    let app = trusted_app(&state, &trust, req.user_ids.iter().map(String::as_str))?;
    let mut states = Vec::new();
    if !req.user_ids.is_empty() {
        if req.seconds > 0 {
            let until = Utc::now() + chrono::Duration::seconds(req.seconds);
            state
                .identity
                .ban_users(&app.id, &req.user_ids, until, &req.reason)
                .await?;
            // A ban takes effect immediately: drop the live sessions.
            state.sessions.delete(&req.user_ids).await?;
        } else if req.seconds < 0 {
            state.identity.unban_users(&app.id, &req.user_ids).await?;
        }
        let now = Utc::now();
        for user in state.identity.get_users(&app.id, &req.user_ids).await? {
            let mut ban_state = UserBanState {
                id: user.id.clone(),
                ban_to: 0,
                ban_for: String::new(),
            };
            if user.banned_at(now) {
                ban_state.ban_to = user.ban_to.map(|t| t.timestamp()).unwrap_or_default();
                ban_state.ban_for = user.ban_for;
            }
            states.push(ban_state);
        }
    }
    Ok(Json(UserAdminBanResponse { states }))
}

#[utoipa::path(
    post,
    path = "/v1/admin/user/bind_acct_id",
    tag = "user-admin",
    request_body = UserAdminBindAcctIdRequest,
    responses(
        (status = 200, description = "Acct ids transferred", body = UserAdminBindAcctIdResponse),
        (status = 409, description = "Acct id held by another user", body = ErrorResponse)
    )
)]
pub(crate) async fn bind_acct_id(
    State(state): State<AppState>,
    Extension(trust): Extension<Trust>,
    Json(req): Json<UserAdminBindAcctIdRequest>,
) -> Result<Json<UserAdminBindAcctIdResponse>> {
    let app = trusted_app(&state, &trust, [req.user_id.as_str()])?;
    state
        .identity
        .bind_acct_ids(&app.id, &req.user_id, &req.acct_ids, req.takeover)
        .await
        .map_err(|err| {
            tracing::warn!(error = %err, "failed to transfer acct id");
            err
        })?;
    Ok(Json(UserAdminBindAcctIdResponse {}))
}
