//! Session endpoints for cookie and bearer auth.

use axum::{
    Json,
    extract::Extension,
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{AUTHORIZATION, COOKIE, InvalidHeaderValue, SET_COOKIE},
    },
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::error;

use super::{state::AuthConfig, types::SessionResponse};
use crate::{
    api::handlers::identity_error_response,
    identity::{IdentityService, SessionContext},
};

pub const SESSION_COOKIE_NAME: &str = "healthoracle_session";

#[utoipa::path(
    get,
    path = "/v1/auth/session",
    responses(
        (status = 200, description = "Session is active", body = SessionResponse),
        (status = 204, description = "No active session")
    ),
    tag = "auth"
)]
pub async fn session(
    headers: HeaderMap,
    identity: Extension<Arc<IdentityService>>,
) -> impl IntoResponse {
    match authenticate_session(&headers, &identity).await {
        Ok(Some(ctx)) => (
            StatusCode::OK,
            Json(SessionResponse {
                patient_id: ctx.patient_id,
                expires_at: ctx.expires_at.to_rfc3339(),
            }),
        )
            .into_response(),
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(response) => response,
    }
}

/// Resolve the bearer token or session cookie, if present.
///
/// Returns `Ok(None)` when no token is sent or the token is not valid.
pub(crate) async fn authenticate_session(
    headers: &HeaderMap,
    identity: &IdentityService,
) -> Result<Option<SessionContext>, Response> {
    let Some(token) = extract_session_token(headers) else {
        return Ok(None);
    };
    identity
        .validate_session(&token)
        .await
        .map_err(|err| identity_error_response(&err))
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    responses(
        (status = 204, description = "Session cleared")
    ),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    identity: Extension<Arc<IdentityService>>,
    auth_config: Extension<Arc<AuthConfig>>,
) -> impl IntoResponse {
    if let Some(token) = extract_session_token(&headers) {
        if let Err(err) = identity.logout(&token).await {
            error!("Failed to revoke session: {err:?}");
        }
    }

    // Always clear the cookie, even if the session record was missing.
    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = clear_session_cookie(&auth_config) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    (StatusCode::NO_CONTENT, response_headers).into_response()
}

/// Build a `HttpOnly` cookie for the session token.
pub(crate) fn session_cookie(
    auth_config: &AuthConfig,
    token: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let ttl_seconds = auth_config.session_ttl_seconds();
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={ttl_seconds}"
    );
    if auth_config.session_cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(crate) fn clear_session_cookie(
    auth_config: &AuthConfig,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if auth_config.session_cookie_secure() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(crate) fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = extract_bearer_token(headers) {
        return Some(token);
    }
    let value = headers.get(COOKIE)?.to_str().ok()?;
    value.split(';').find_map(|pair| {
        let mut parts = pair.trim().splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        (key == SESSION_COOKIE_NAME && !val.is_empty()).then(|| val.to_string())
    })
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(*name, HeaderValue::from_static(*value));
        }
        headers
    }

    #[test]
    fn bearer_wins_over_cookie() {
        let headers = headers(&[
            ("authorization", "Bearer from-header"),
            ("cookie", "healthoracle_session=from-cookie"),
        ]);
        assert_eq!(extract_session_token(&headers), Some("from-header".to_string()));
    }

    #[test]
    fn cookie_is_found_among_others() {
        let headers = headers(&[("cookie", "theme=dark; healthoracle_session=abc123; lang=ne")]);
        assert_eq!(extract_session_token(&headers), Some("abc123".to_string()));
    }

    #[test]
    fn missing_or_empty_tokens() {
        assert_eq!(extract_session_token(&HeaderMap::new()), None);
        assert_eq!(
            extract_session_token(&headers(&[("authorization", "Bearer   ")])),
            None
        );
        assert_eq!(
            extract_session_token(&headers(&[("cookie", "healthoracle_session=")])),
            None
        );
        assert_eq!(
            extract_session_token(&headers(&[("authorization", "Basic dXNlcjpwdw==")])),
            None
        );
    }

    #[test]
    fn cookie_flags_follow_frontend_scheme() -> anyhow::Result<()> {
        let https = AuthConfig::new("https://app.healthoracle.example".to_string(), 3600);
        let cookie = session_cookie(&https, "tok")?;
        let cookie = cookie.to_str()?;
        assert!(cookie.starts_with("healthoracle_session=tok;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Max-Age=3600"));
        assert!(cookie.ends_with("; Secure"));

        let http = AuthConfig::new("http://localhost:3000".to_string(), 3600);
        let cleared = clear_session_cookie(&http)?;
        let cleared = cleared.to_str()?;
        assert!(cleared.contains("Max-Age=0"));
        assert!(!cleared.contains("Secure"));
        Ok(())
    }
}
