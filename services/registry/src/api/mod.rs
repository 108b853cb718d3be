//! RPC surface: handlers, request/response bodies and the OpenAPI document.
pub mod error;
pub mod pubsub;
pub mod role;
pub mod types;
pub mod user;
pub mod user_admin;

use utoipa::OpenApi;

// Subscribe is a server-sent event stream and is documented on the handler
// itself rather than in the OpenAPI document.
#[derive(OpenApi)]
#[openapi(
    paths(
        user::login,
        user::bind,
        user::set_metadata,
        user_admin::get,
        user_admin::set_metadata,
        user_admin::get_metadata,
        user_admin::ban,
        user_admin::bind_acct_id,
        role::create,
        role::sign_in,
        role::list,
        role::set_metadata,
        pubsub::publish,
        pubsub::consume,
    ),
    components(schemas(
        types::ErrorResponse,
        types::UserData,
        types::RoleData,
        types::LoginStateEnvelope,
        types::DevLoginState,
        types::UniformLoginState,
        types::UserLoginRequest,
        types::UserLoginResponse,
        types::UserBindRequest,
        types::UserBindResponse,
        types::UserSetMetadataRequest,
        types::UserSetMetadataResponse,
        types::UserAdminGetOptions,
        types::UserAdminGetRequest,
        types::UserAdminGetResponse,
        types::UserAdminSetMetadataRequest,
        types::UserAdminGetMetadataRequest,
        types::UserAdminGetMetadataResponse,
        types::UserAdminBanRequest,
        types::UserBanState,
        types::UserAdminBanResponse,
        types::UserAdminBindAcctIdRequest,
        types::UserAdminBindAcctIdResponse,
        types::RoleCreateRequest,
        types::RoleCreateResponse,
        types::RoleSignInRequest,
        types::RoleSignInResponse,
        types::RoleListResponse,
        types::RoleSetMetadataRequest,
        types::RoleSetMetadataResponse,
        types::PubSubMessage,
        types::PublishMessage,
        types::PublishOptions,
        types::PublishRequest,
        types::PublishResponse,
        types::Subscription,
        types::SubscribeRequest,
        types::SubscribeResponse,
        types::ConsumeAck,
        types::Consumption,
        types::ConsumeRequest,
        types::ConsumeResponse,
    )),
    tags(
        (name = "user", description = "Login and self-service identity"),
        (name = "user-admin", description = "Secret-authenticated user administration"),
        (name = "role", description = "Role lifecycle"),
        (name = "pubsub", description = "Tenant-scoped topics"),
    )
)]
pub struct ApiDoc;
