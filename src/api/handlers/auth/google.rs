//! Google sign-in and first-time account linking.

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};
use std::sync::Arc;

use super::{
    create_with_patient_id,
    login::session_response,
    state::AuthConfig,
    types::{GoogleLinkRequest, GoogleSignInRequest, LoginResponse, PendingLinkResponse},
    utils::{normalize_patient_id, normalize_phone, validate_name},
};
use crate::{
    api::handlers::identity_error_response,
    identity::{CompleteLink, IdentityService, SignIn},
};

#[utoipa::path(
    post,
    path = "/v1/auth/google",
    request_body = GoogleSignInRequest,
    responses(
        (status = 200, description = "Signed in; session cookie set", body = LoginResponse),
        (status = 202, description = "Verified, but a local account must be created", body = PendingLinkResponse),
        (status = 400, description = "Missing credential", body = String),
        (status = 401, description = "Token rejected", body = String)
    ),
    tag = "auth"
)]
pub async fn google_sign_in(
    identity: Extension<Arc<IdentityService>>,
    auth_config: Extension<Arc<AuthConfig>>,
    payload: Option<Json<GoogleSignInRequest>>,
) -> impl IntoResponse {
    let request: GoogleSignInRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let credential = request.credential.trim();
    if credential.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            "Missing Google credential.".to_string(),
        )
            .into_response();
    }

    match identity.sign_in_with_token(credential).await {
        Ok(SignIn::SignedIn(signed_in)) => session_response(&auth_config, signed_in.session),
        Ok(SignIn::PendingLink(pending)) => (
            StatusCode::ACCEPTED,
            Json(PendingLinkResponse {
                ticket: pending.ticket,
                email: pending.email,
                name: pending.name,
                expires_at: pending.expires_at.to_rfc3339(),
            }),
        )
            .into_response(),
        Err(err) => identity_error_response(&err),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/google/link",
    request_body = GoogleLinkRequest,
    responses(
        (status = 200, description = "Account created and linked; session cookie set", body = LoginResponse),
        (status = 400, description = "Validation failed", body = String),
        (status = 401, description = "Ticket unknown, expired or used", body = String),
        (status = 409, description = "Patient ID or email already exists", body = String)
    ),
    tag = "auth"
)]
pub async fn google_link(
    identity: Extension<Arc<IdentityService>>,
    auth_config: Extension<Arc<AuthConfig>>,
    payload: Option<Json<GoogleLinkRequest>>,
) -> impl IntoResponse {
    let request: GoogleLinkRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let name = match validate_name(&request.full_name) {
        Ok(name) => name,
        Err(message) => return (StatusCode::BAD_REQUEST, message.to_string()).into_response(),
    };
    let phone = match normalize_phone(request.country_code.as_deref(), request.phone.as_deref()) {
        Ok(phone) => phone,
        Err(message) => return (StatusCode::BAD_REQUEST, message.to_string()).into_response(),
    };
    let patient_id = match request
        .patient_id
        .as_deref()
        .filter(|id| !id.trim().is_empty())
        .map(normalize_patient_id)
        .transpose()
    {
        Ok(patient_id) => patient_id,
        Err(message) => return (StatusCode::BAD_REQUEST, message.to_string()).into_response(),
    };

    let ticket = request.ticket;
    let signed_in = create_with_patient_id(&identity, patient_id, |patient_id| {
        identity.complete_pending_link(CompleteLink {
            ticket: ticket.clone(),
            patient_id,
            name: Some(name.clone()),
            phone: phone.clone(),
        })
    })
    .await;

    match signed_in {
        Ok(signed_in) => session_response(&auth_config, signed_in.session),
        Err(err) => identity_error_response(&err),
    }
}
