pub mod auth;
pub mod health;
pub mod me;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use crate::identity::IdentityError;

/// Map an identity failure to a status and its fixed public message.
/// Internal errors are logged here and never reach the body.
pub(crate) fn identity_error_response(err: &IdentityError) -> Response {
    let status = match err {
        IdentityError::DuplicateIdentity | IdentityError::PendingLink => StatusCode::CONFLICT,
        IdentityError::InvalidCredentials | IdentityError::TokenInvalid => StatusCode::UNAUTHORIZED,
        IdentityError::NotFound => StatusCode::NOT_FOUND,
        IdentityError::IdentityMismatch
        | IdentityError::OtpExpired
        | IdentityError::OtpInvalid
        | IdentityError::OtpAlreadyConsumed => StatusCode::BAD_REQUEST,
        IdentityError::StoreUnavailable(source) => {
            error!("Identity store failure: {source:#}");
            StatusCode::SERVICE_UNAVAILABLE
        }
    };
    (status, err.public_message().to_string()).into_response()
}
