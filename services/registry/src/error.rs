//! Service error taxonomy.
//!
//! Errors cross the RPC boundary as a status code plus a short reason; the
//! HTTP mapping lives in `api::error`. Authentication failures all render
//! the same way so callers cannot distinguish an unknown token from an
//! expired or mismatched one.
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid app id")]
    InvalidAppId,
    #[error("invalid login state")]
    InvalidState,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid nonce")]
    InvalidNonce,
    #[error("invalid timestamp")]
    InvalidTimestamp,
    #[error("invalid token")]
    InvalidToken,
    #[error("login required")]
    LoginRequired,
    #[error("unauthenticated")]
    Unauthenticated,
    #[error("user not found")]
    UserNotFound,
    #[error("role not found")]
    RoleNotFound,
    #[error("acct id already bound")]
    AcctAlreadyExists,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("malformed session data")]
    MalformedSessData,
    #[error("database unavailable")]
    DatabaseUnavailable,
}

impl Error {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument(message.into())
    }

    /// Stable machine-readable code used in response bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidAppId => "invalid_app_id",
            Error::InvalidState => "invalid_state",
            Error::InvalidSignature => "invalid_signature",
            Error::InvalidNonce => "invalid_nonce",
            Error::InvalidTimestamp => "invalid_timestamp",
            Error::InvalidToken => "invalid_token",
            Error::LoginRequired => "login_required",
            Error::Unauthenticated => "unauthenticated",
            Error::UserNotFound => "user_not_found",
            Error::RoleNotFound => "role_not_found",
            Error::AcctAlreadyExists => "acct_already_exists",
            Error::InvalidArgument(_) => "invalid_argument",
            Error::MalformedSessData => "malformed_sess_data",
            Error::DatabaseUnavailable => "database_unavailable",
        }
    }
}
