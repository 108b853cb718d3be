//! Request and response bodies for the RPC surface.
use crate::model::{Role, User};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct UserData {
    pub id: String,
    pub acct_ids: Vec<String>,
    pub metadata: HashMap<String, String>,
}

impl From<User> for UserData {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            acct_ids: user.acct_ids,
            metadata: user.metadata,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct RoleData {
    pub id: String,
    pub user_id: String,
    pub index: u32,
    pub metadata: HashMap<String, String>,
}

impl From<Role> for RoleData {
    fn from(role: Role) -> Self {
        Self {
            id: role.id,
            user_id: role.user_id,
            index: role.index,
            metadata: role.metadata,
        }
    }
}

/// Discriminated login state. The handler matches `type_url` explicitly;
/// unknown variants are rejected as `InvalidState`.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct LoginStateEnvelope {
    pub type_url: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub value: serde_json::Value,
}

pub const DEV_LOGIN_STATE: &str = "libra.v1.DevLoginState";
pub const UNIFORM_LOGIN_STATE: &str = "libra.v1.UniformLoginState";

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct DevLoginState {
    pub username: String,
}

/// Signed login state. `signature` is an HMAC-SHA1 over the canonical JSON
/// encoding of this struct with the signature field emptied, hex-rendered
/// and compared case-insensitively.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct UniformLoginState {
    pub acct_id: Vec<String>,
    pub timestamp: i64,
    pub nonce: String,
    #[serde(default)]
    pub signature: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct UserLoginRequest {
    pub app_id: String,
    pub state: LoginStateEnvelope,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct UserLoginResponse {
    pub user: UserData,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct UserBindRequest {
    pub acct_ids: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct UserBindResponse {}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct UserSetMetadataRequest {
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct UserSetMetadataResponse {}

#[derive(Debug, Default, Serialize, Deserialize, ToSchema, Clone)]
pub struct UserAdminGetOptions {
    /// Accept a mix of user and role ids; role ids dereference to owners.
    #[serde(default)]
    pub fuzzy: bool,
    /// Also return all roles owned by the resolved users.
    #[serde(default)]
    pub with_roles: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct UserAdminGetRequest {
    pub ids: Vec<String>,
    #[serde(default)]
    pub options: Option<UserAdminGetOptions>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct UserAdminGetResponse {
    pub users: Vec<UserData>,
    pub roles: Vec<RoleData>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct UserAdminSetMetadataRequest {
    pub user_id: String,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct UserAdminGetMetadataRequest {
    pub user_id: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct UserAdminGetMetadataResponse {
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct UserAdminBanRequest {
    pub user_ids: Vec<String>,
    /// Positive: ban for this many seconds. Negative: lift the ban.
    /// Zero: only report current states.
    #[serde(default)]
    pub seconds: i64,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct UserBanState {
    pub id: String,
    /// Epoch seconds; zero when not banned.
    #[serde(default)]
    pub ban_to: i64,
    #[serde(default)]
    pub ban_for: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct UserAdminBanResponse {
    pub states: Vec<UserBanState>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct UserAdminBindAcctIdRequest {
    pub user_id: String,
    pub acct_ids: Vec<String>,
    /// Steal acct ids from their current owners instead of failing.
    #[serde(default)]
    pub takeover: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct UserAdminBindAcctIdResponse {}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct RoleCreateRequest {
    pub index: u32,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct RoleCreateResponse {
    pub role: RoleData,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct RoleSignInRequest {
    pub role_id: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct RoleSignInResponse {}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct RoleListResponse {
    pub roles: Vec<RoleData>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct RoleSetMetadataRequest {
    pub role_id: String,
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct RoleSetMetadataResponse {}

/// A delivered message; `payload` is base64.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct PubSubMessage {
    pub topic: String,
    pub id: String,
    pub payload: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct PublishMessage {
    pub topic: String,
    /// Base64 of the opaque payload.
    pub payload: String,
}

#[derive(Debug, Default, Serialize, Deserialize, ToSchema, Clone)]
pub struct PublishOptions {
    /// Create the topic on first publish instead of failing.
    #[serde(default)]
    pub create_topic: bool,
    /// Approximate cap on retained entries.
    pub max_len: Option<u64>,
    /// Drop entries below this id.
    pub min_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct PublishRequest {
    pub msgs: Vec<PublishMessage>,
    #[serde(default)]
    pub opts: Option<PublishOptions>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct PublishResponse {}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct Subscription {
    pub topic: String,
    #[serde(default)]
    pub since_milli_timestamp: u64,
    /// Resume point from a previous subscription, if newer than `since`.
    #[serde(default)]
    pub after_id: String,
    #[serde(default)]
    pub batch_size: u32,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct SubscribeRequest {
    pub subscriptions: Vec<Subscription>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct SubscribeResponse {
    pub msgs: Vec<PubSubMessage>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct ConsumeAck {
    pub topic: String,
    pub group_id: u64,
    pub msg_ids: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct Consumption {
    pub topic: String,
    pub group_id: u64,
    /// Unacked messages become claimable after this long; also the block
    /// timeout of the group read.
    pub ack_timeout_milli: u64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct ConsumeRequest {
    #[serde(default)]
    pub acks: Vec<ConsumeAck>,
    #[serde(default)]
    pub consumptions: Vec<Consumption>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct ConsumeResponse {
    pub msgs: Vec<PubSubMessage>,
}
