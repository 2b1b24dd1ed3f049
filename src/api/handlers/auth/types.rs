//! Request/response types for auth endpoints.
//!
//! Requests that carry passwords do not implement `Debug`.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize)]
pub struct SignupRequest {
    /// Leave empty to get the next id in the `P0001` sequence.
    pub patient_id: Option<String>,
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub country_code: Option<String>,
    pub password: String,
    pub confirm_password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SignupResponse {
    pub patient_id: String,
    pub name: String,
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize)]
pub struct LoginRequest {
    pub patient_id: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize)]
pub struct LoginResponse {
    pub patient_id: String,
    /// Also set as the `healthoracle_session` cookie.
    pub token: String,
    pub expires_at: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionResponse {
    pub patient_id: String,
    pub expires_at: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct OtpRequest {
    pub patient_id: String,
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct OtpRequestResponse {
    pub message: String,
    pub expires_at: String,
}

#[derive(ToSchema, Serialize, Deserialize)]
pub struct OtpResetRequest {
    pub patient_id: String,
    pub otp: String,
    pub new_password: String,
    pub confirm_password: String,
}

#[derive(ToSchema, Serialize, Deserialize)]
pub struct GoogleSignInRequest {
    /// Google ID token from Google Identity Services.
    pub credential: String,
}

#[derive(ToSchema, Serialize, Deserialize)]
pub struct PendingLinkResponse {
    pub ticket: String,
    pub email: String,
    pub name: Option<String>,
    pub expires_at: String,
}

#[derive(ToSchema, Serialize, Deserialize)]
pub struct GoogleLinkRequest {
    pub ticket: String,
    pub patient_id: Option<String>,
    pub full_name: String,
    pub phone: Option<String>,
    pub country_code: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ProfileResponse {
    pub patient_id: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub google_linked: bool,
    pub has_password: bool,
    pub created_at: String,
}

#[derive(ToSchema, Serialize, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
    pub confirm_password: String,
}
