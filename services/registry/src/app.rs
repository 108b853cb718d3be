//! HTTP application wiring.
//!
//! Builds the Axum router, hangs the auth interceptor in front of every RPC
//! route, and defines the shared application state injected into handlers.
use crate::api;
use crate::api::ApiDoc;
use crate::apps::AppRegistry;
use crate::auth;
use crate::config::Environment;
use crate::store::{IdentityStore, NonceStore, SessionStore};
use axum::routing::post;
use axum::{middleware, Router};
use libra_stream::StreamStore;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

#[derive(Clone)]
pub struct AppState {
    pub env: Environment,
    pub nonce_ttl: Duration,
    pub apps: Arc<AppRegistry>,
    pub identity: Arc<dyn IdentityStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub nonces: Arc<dyn NonceStore>,
    pub streams: Arc<dyn StreamStore>,
}

pub fn build_router(state: AppState) -> Router {
    let trace_layer =
        TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri()
            )
        });

    let rpc = Router::new()
        .route("/v1/user/login", post(api::user::login))
        .route("/v1/user/bind", post(api::user::bind))
        .route("/v1/user/set_metadata", post(api::user::set_metadata))
        .route("/v1/admin/user/get", post(api::user_admin::get))
        .route(
            "/v1/admin/user/set_metadata",
            post(api::user_admin::set_metadata),
        )
        .route(
            "/v1/admin/user/get_metadata",
            post(api::user_admin::get_metadata),
        )
        .route("/v1/admin/user/ban", post(api::user_admin::ban))
        .route(
            "/v1/admin/user/bind_acct_id",
            post(api::user_admin::bind_acct_id),
        )
        .route("/v1/role/create", post(api::role::create))
        .route("/v1/role/sign_in", post(api::role::sign_in))
        .route("/v1/role/list", post(api::role::list))
        .route("/v1/role/set_metadata", post(api::role::set_metadata))
        .route("/v1/pubsub/publish", post(api::pubsub::publish))
        .route("/v1/pubsub/subscribe", post(api::pubsub::subscribe))
        .route("/v1/pubsub/consume", post(api::pubsub::consume))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::authenticate,
        ));

    Router::new()
        .merge(rpc)
        .merge(
            utoipa_swagger_ui::SwaggerUi::new("/docs").url("/v1/openapi.json", ApiDoc::openapi()),
        )
        .layer(trace_layer)
        .with_state(state)
}
