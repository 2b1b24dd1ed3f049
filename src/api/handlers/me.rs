//! Endpoints for the signed-in patient.

use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use secrecy::SecretString;
use std::sync::Arc;

use super::{
    auth::{
        session::authenticate_session,
        types::{ChangePasswordRequest, ProfileResponse},
        utils::validate_new_password,
    },
    identity_error_response,
};
use crate::identity::{IdentityService, SessionContext};

async fn require_session(
    headers: &HeaderMap,
    identity: &IdentityService,
) -> Result<SessionContext, Response> {
    match authenticate_session(headers, identity).await? {
        Some(ctx) => Ok(ctx),
        None => Err((StatusCode::UNAUTHORIZED, "Please log in.".to_string()).into_response()),
    }
}

#[utoipa::path(
    get,
    path = "/v1/me",
    responses(
        (status = 200, description = "Profile of the signed-in patient", body = ProfileResponse),
        (status = 401, description = "No valid session", body = String)
    ),
    tag = "me"
)]
pub async fn profile(
    headers: HeaderMap,
    identity: Extension<Arc<IdentityService>>,
) -> impl IntoResponse {
    let ctx = match require_session(&headers, &identity).await {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };

    match identity.profile(&ctx).await {
        Ok(user) => {
            let has_password = user.has_password();
            (
                StatusCode::OK,
                Json(ProfileResponse {
                    patient_id: user.patient_id,
                    name: user.name,
                    email: user.email,
                    phone: user.phone,
                    google_linked: user.oauth_subject.is_some(),
                    has_password,
                    created_at: user.created_at.to_rfc3339(),
                }),
            )
                .into_response()
        }
        Err(err) => identity_error_response(&err),
    }
}

#[utoipa::path(
    post,
    path = "/v1/me/password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 204, description = "Password changed; other sessions revoked"),
        (status = 400, description = "Invalid new password", body = String),
        (status = 401, description = "No valid session or wrong current password", body = String)
    ),
    tag = "me"
)]
pub async fn change_password(
    headers: HeaderMap,
    identity: Extension<Arc<IdentityService>>,
    payload: Option<Json<ChangePasswordRequest>>,
) -> impl IntoResponse {
    let ctx = match require_session(&headers, &identity).await {
        Ok(ctx) => ctx,
        Err(response) => return response,
    };

    let request: ChangePasswordRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    if let Err(message) = validate_new_password(&request.new_password, &request.confirm_password) {
        return (StatusCode::BAD_REQUEST, message.to_string()).into_response();
    }

    match identity
        .change_password(
            &ctx,
            SecretString::from(request.current_password),
            SecretString::from(request.new_password),
        )
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => identity_error_response(&err),
    }
}
