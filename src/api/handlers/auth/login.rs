use axum::{
    Json,
    extract::Extension,
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::IntoResponse,
};
use secrecy::SecretString;
use std::sync::Arc;
use tracing::error;

use super::{
    session::session_cookie,
    state::AuthConfig,
    types::{LoginRequest, LoginResponse},
    utils::normalize_patient_id,
};
use crate::{
    api::handlers::identity_error_response,
    identity::{IdentityError, IdentityService, Session},
};

/// Password login. Unknown ids and wrong passwords get the same answer.
#[utoipa::path(
    post,
    path = "/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in; session cookie set", body = LoginResponse),
        (status = 400, description = "Missing payload", body = String),
        (status = 401, description = "Invalid Patient ID or password", body = String)
    ),
    tag = "auth"
)]
pub async fn login(
    identity: Extension<Arc<IdentityService>>,
    auth_config: Extension<Arc<AuthConfig>>,
    payload: Option<Json<LoginRequest>>,
) -> impl IntoResponse {
    let request: LoginRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    // A malformed id cannot exist; answer exactly like a wrong password.
    let Ok(patient_id) = normalize_patient_id(&request.patient_id) else {
        return identity_error_response(&IdentityError::InvalidCredentials);
    };

    match identity
        .login(&patient_id, SecretString::from(request.password))
        .await
    {
        Ok(session) => session_response(&auth_config, session),
        Err(err) => identity_error_response(&err),
    }
}

/// Set the session cookie and echo the token for bearer clients.
pub(super) fn session_response(auth_config: &AuthConfig, session: Session) -> axum::response::Response {
    let mut headers = HeaderMap::new();
    match session_cookie(auth_config, &session.token) {
        Ok(cookie) => {
            headers.insert(SET_COOKIE, cookie);
        }
        Err(err) => error!("Failed to build session cookie: {err}"),
    }
    let response = LoginResponse {
        patient_id: session.patient_id,
        token: session.token,
        expires_at: session.expires_at.to_rfc3339(),
    };
    (StatusCode::OK, headers, Json(response)).into_response()
}
