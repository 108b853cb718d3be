//! HTTP mapping for the service error taxonomy.
use crate::api::types::ErrorResponse;
use crate::error::Error;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

impl Error {
    pub fn status(&self) -> StatusCode {
        match self {
            Error::InvalidToken | Error::LoginRequired | Error::Unauthenticated => {
                StatusCode::UNAUTHORIZED
            }
            Error::UserNotFound | Error::RoleNotFound => StatusCode::NOT_FOUND,
            Error::AcctAlreadyExists => StatusCode::CONFLICT,
            Error::DatabaseUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Error::InvalidAppId
            | Error::InvalidState
            | Error::InvalidSignature
            | Error::InvalidNonce
            | Error::InvalidTimestamp
            | Error::InvalidArgument(_)
            | Error::MalformedSessData => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_failures_map_to_unauthorized() {
        assert_eq!(Error::InvalidToken.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(Error::LoginRequired.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(Error::Unauthenticated.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn conflict_and_availability_have_distinct_codes() {
        assert_eq!(Error::AcctAlreadyExists.status(), StatusCode::CONFLICT);
        assert_eq!(
            Error::DatabaseUnavailable.status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(Error::InvalidNonce.status(), StatusCode::BAD_REQUEST);
    }
}
