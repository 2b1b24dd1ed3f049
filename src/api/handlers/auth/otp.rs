//! Password reset by one-time code.

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};
use secrecy::SecretString;
use std::sync::Arc;
use tracing::warn;

use super::{
    types::{OtpRequest, OtpRequestResponse, OtpResetRequest},
    utils::{normalize_email, normalize_patient_id, validate_new_password},
};
use crate::{
    api::handlers::identity_error_response,
    identity::{Delivery, IdentityError, IdentityService},
};

const OTP_SENT_MESSAGE: &str = "OTP sent to your email. Please check your inbox (or spam).";

#[utoipa::path(
    post,
    path = "/v1/auth/otp",
    request_body = OtpRequest,
    responses(
        (status = 202, description = "Code issued and emailed", body = OtpRequestResponse),
        (status = 400, description = "Patient ID and email do not match", body = String),
        (status = 502, description = "Code issued but the email could not be sent", body = String)
    ),
    tag = "auth"
)]
pub async fn request_otp(
    identity: Extension<Arc<IdentityService>>,
    payload: Option<Json<OtpRequest>>,
) -> impl IntoResponse {
    let request: OtpRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    let Ok(patient_id) = normalize_patient_id(&request.patient_id) else {
        return identity_error_response(&IdentityError::IdentityMismatch);
    };
    let email = normalize_email(&request.email);

    match identity.request_otp(&email, &patient_id).await {
        Ok(receipt) => match receipt.delivery {
            Delivery::Sent => (
                StatusCode::ACCEPTED,
                Json(OtpRequestResponse {
                    message: OTP_SENT_MESSAGE.to_string(),
                    expires_at: receipt.expires_at.to_rfc3339(),
                }),
            )
                .into_response(),
            Delivery::Failed(reason) => {
                warn!(patient_id = %receipt.patient_id, "OTP email not delivered: {reason}");
                (
                    StatusCode::BAD_GATEWAY,
                    "Failed to send OTP email. Please try again.".to_string(),
                )
                    .into_response()
            }
        },
        Err(err) => identity_error_response(&err),
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/otp/verify",
    request_body = OtpResetRequest,
    responses(
        (status = 204, description = "Password reset; all sessions revoked"),
        (status = 400, description = "Invalid, expired or used code, or invalid password", body = String)
    ),
    tag = "auth"
)]
pub async fn verify_otp(
    identity: Extension<Arc<IdentityService>>,
    payload: Option<Json<OtpResetRequest>>,
) -> impl IntoResponse {
    let request: OtpResetRequest = match payload {
        Some(Json(payload)) => payload,
        None => return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response(),
    };

    // Check the new password first so a typo does not burn the code.
    if let Err(message) = validate_new_password(&request.new_password, &request.confirm_password) {
        return (StatusCode::BAD_REQUEST, message.to_string()).into_response();
    }

    let Ok(patient_id) = normalize_patient_id(&request.patient_id) else {
        return identity_error_response(&IdentityError::OtpInvalid);
    };

    match identity
        .reset_password_with_otp(
            &patient_id,
            &request.otp,
            SecretString::from(request.new_password),
        )
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        // No code was ever issued; answer like a wrong code.
        Err(IdentityError::NotFound) => identity_error_response(&IdentityError::OtpInvalid),
        Err(err) => identity_error_response(&err),
    }
}
