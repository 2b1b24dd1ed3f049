use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};
use secrecy::SecretString;
use std::sync::Arc;

use super::{
    NewUserTemplate, create_password_user,
    types::{SignupRequest, SignupResponse},
    utils::{
        normalize_email, normalize_patient_id, normalize_phone, valid_email,
        validate_name, validate_new_password,
    },
};
use crate::{api::handlers::identity_error_response, identity::IdentityService};

/// Create a password account. Without a `patient_id` the next id in the
/// `P0001` sequence is assigned.
#[utoipa::path(
    post,
    path = "/v1/auth/signup",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "Account created", body = SignupResponse),
        (status = 400, description = "Validation failed", body = String),
        (status = 409, description = "Patient ID or email already exists", body = String)
    ),
    tag = "auth"
)]
pub async fn signup(
    identity: Extension<Arc<IdentityService>>,
    payload: Option<Json<SignupRequest>>,
) -> impl IntoResponse {
    let request: SignupRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let name = match validate_name(&request.full_name) {
        Ok(name) => name,
        Err(message) => return (StatusCode::BAD_REQUEST, message.to_string()).into_response(),
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return (
            StatusCode::BAD_REQUEST,
            "Please enter a valid email address.".to_string(),
        )
            .into_response();
    }

    if let Err(message) = validate_new_password(&request.password, &request.confirm_password) {
        return (StatusCode::BAD_REQUEST, message.to_string()).into_response();
    }

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

    // Checked up front so a taken email is not retried across allocated ids.
    match identity.credentials().find_by_email(&email).await {
        Ok(Some(_)) => {
            return (
                StatusCode::CONFLICT,
                "Email already exists. Please use a different email or login.".to_string(),
            )
                .into_response();
        }
        Ok(None) => {}
        Err(err) => return identity_error_response(&err),
    }

    let template = NewUserTemplate {
        name,
        email,
        phone,
        password: SecretString::from(request.password),
    };

    match create_password_user(&identity, patient_id, &template).await {
        Ok(user) => (
            StatusCode::CREATED,
            Json(SignupResponse {
                patient_id: user.patient_id,
                name: user.name,
                email: user.email,
            }),
        )
            .into_response(),
        Err(err) => identity_error_response(&err),
    }
}
