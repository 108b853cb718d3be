//! Role service. Sign-in keeps the session's embedded role pointer current.
use crate::api::types::{
    ErrorResponse, RoleCreateRequest, RoleCreateResponse, RoleData, RoleListResponse,
    RoleSetMetadataRequest, RoleSetMetadataResponse, RoleSignInRequest, RoleSignInResponse,
};
use crate::app::AppState;
use crate::auth;
use crate::auth::Trust;
use crate::error::{Error, Result};
use crate::model::SessData;
use axum::extract::State;
use axum::{Extension, Json};

#[utoipa::path(
    post,
    path = "/v1/role/create",
    tag = "role",
    request_body = RoleCreateRequest,
    responses(
        (status = 200, description = "Role created", body = RoleCreateResponse),
        (status = 400, description = "Role index already taken", body = ErrorResponse)
    )
)]
pub(crate) async fn create(
    State(state): State<AppState>,
    Extension(trust): Extension<Trust>,
    Json(req): Json<RoleCreateRequest>,
) -> Result<Json<RoleCreateResponse>> {
    let (app_id, user_id) = auth::require_user(&trust)?;
    let app = state.apps.find_by_id(&app_id).ok_or(Error::InvalidAppId)?;
    let role = state.identity.create_role(&app, &user_id, req.index).await?;
    Ok(Json(RoleCreateResponse {
        role: RoleData::from(role),
    }))
}

#[utoipa::path(
    post,
    path = "/v1/role/sign_in",
    tag = "role",
    request_body = RoleSignInRequest,
    responses(
        (status = 200, description = "Role signed in", body = RoleSignInResponse),
        (status = 404, description = "Role not owned by caller", body = ErrorResponse)
    )
)]
pub(crate) async fn sign_in(
    State(state): State<AppState>,
    Extension(trust): Extension<Trust>,
    Json(req): Json<RoleSignInRequest>,
) -> Result<Json<RoleSignInResponse>> {
    let (app_id, user_id) = auth::require_user(&trust)?;
    let role = state
        .identity
        .sign_in_role(&app_id, &user_id, &req.role_id)
        .await?;
    // Patch only the embedded data record; the token must survive sign-in.
    state
        .sessions
        .update_data(
            &user_id,
            &SessData {
                role_id: role.id,
                role_index: role.index,
            },
        )
        .await
        .map_err(|err| {
            tracing::warn!(error = %err, "failed to update session");
            err
        })?;
    Ok(Json(RoleSignInResponse {}))
}

#[utoipa::path(
    post,
    path = "/v1/role/list",
    tag = "role",
    responses(
        (status = 200, description = "Roles of the caller", body = RoleListResponse)
    )
)]
pub(crate) async fn list(
    State(state): State<AppState>,
    Extension(trust): Extension<Trust>,
) -> Result<Json<RoleListResponse>> {
    let (app_id, user_id) = auth::require_user(&trust)?;
    let roles = state.identity.list_roles(&app_id, &user_id).await?;
    Ok(Json(RoleListResponse {
        roles: roles.into_iter().map(RoleData::from).collect(),
    }))
}

#[utoipa::path(
    post,
    path = "/v1/role/set_metadata",
    tag = "role",
    request_body = RoleSetMetadataRequest,
    responses(
        (status = 200, description = "Metadata patched", body = RoleSetMetadataResponse)
    )
)]
pub(crate) async fn set_metadata(
    State(state): State<AppState>,
    Extension(trust): Extension<Trust>,
    Json(req): Json<RoleSetMetadataRequest>,
) -> Result<Json<RoleSetMetadataResponse>> {
    let (app_id, user_id) = auth::require_user(&trust)?;
    state
        .identity
        .set_role_metadata(&app_id, &user_id, &req.role_id, &req.metadata)
        .await?;
    Ok(Json(RoleSetMetadataResponse {}))
}
