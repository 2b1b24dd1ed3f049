mod common;

use anyhow::{Result, anyhow};
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use common::{Harness, harness};
use healthoracle::api::{self, AuthConfig};
use serde_json::{Value, json};
use tower::ServiceExt;

fn app(h: &Harness) -> Result<Router> {
    api::app(
        h.pool.clone(),
        h.identity.clone(),
        AuthConfig::new("http://localhost:3000".to_string(), 43200),
    )
}

fn post(uri: &str, body: &Value) -> Result<Request<Body>> {
    Ok(Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))?)
}

async fn json_body(response: axum::response::Response) -> Result<Value> {
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

async fn text_body(response: axum::response::Response) -> Result<String> {
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    Ok(String::from_utf8(bytes.to_vec())?)
}

fn signup_body(email: &str) -> Value {
    json!({
        "full_name": "Sita Sharma",
        "email": email,
        "phone": "9812345678",
        "password": "correct horse 42",
        "confirm_password": "correct horse 42"
    })
}

#[tokio::test]
async fn signup_assigns_ids_and_rejects_duplicates() -> Result<()> {
    let h = harness().await?;
    let app = app(&h)?;

    let response = app
        .clone()
        .oneshot(post("/v1/auth/signup", &signup_body("Sita@Example.com"))?)
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = json_body(response).await?;
    assert_eq!(body["patient_id"], "P0001");
    assert_eq!(body["email"], "sita@example.com");

    let user = h
        .identity
        .credentials()
        .find_by_id("P0001")
        .await?
        .ok_or_else(|| anyhow!("user missing"))?;
    assert_eq!(user.phone.as_deref(), Some("+977 9812345678"));

    let response = app
        .oneshot(post("/v1/auth/signup", &signup_body("sita@example.com"))?)
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    Ok(())
}

#[tokio::test]
async fn signup_validates_the_form() -> Result<()> {
    let h = harness().await?;
    let app = app(&h)?;

    let cases = [
        (json!({"full_name": " "}), "Full name is required."),
        (json!({"email": "not-an-email"}), "Please enter a valid email address."),
        (
            json!({"password": "short", "confirm_password": "short"}),
            "Password must be at least 8 characters.",
        ),
        (json!({"confirm_password": "different 123"}), "Passwords do not match."),
        (json!({"phone": "12345"}), "Please enter a valid number."),
        (
            json!({"phone": "12345", "country_code": "+1"}),
            "Please enter a valid phone number (at least 10 digits).",
        ),
    ];

    for (patch, message) in cases {
        let mut body = signup_body("sita@example.com");
        if let (Some(body), Some(patch)) = (body.as_object_mut(), patch.as_object()) {
            for (key, value) in patch {
                body.insert(key.clone(), value.clone());
            }
        }
        let response = app.clone().oneshot(post("/v1/auth/signup", &body)?).await?;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{message}");
        assert_eq!(text_body(response).await?, message);
    }

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/auth/signup")
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(text_body(response).await?, "Missing payload");
    Ok(())
}

#[tokio::test]
async fn login_cookie_drives_session_and_logout() -> Result<()> {
    let h = harness().await?;
    common::create_patient(&h.identity, "P0001", "sita@example.com").await?;
    let app = app(&h)?;

    let response = app
        .clone()
        .oneshot(post(
            "/v1/auth/login",
            &json!({"patient_id": "p0001", "password": "wrong password"}),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(post(
            "/v1/auth/login",
            &json!({"patient_id": "p0001", "password": common::PASSWORD}),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("missing cookie"))?;
    assert!(cookie.contains("HttpOnly"));
    let pair = cookie
        .split(';')
        .next()
        .ok_or_else(|| anyhow!("bad cookie"))?
        .to_string();

    let session_request = |pair: &str| {
        Request::builder()
            .uri("/v1/auth/session")
            .header(header::COOKIE, pair)
            .body(Body::empty())
    };

    let response = app.clone().oneshot(session_request(&pair)?).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await?["patient_id"], "P0001");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/auth/logout")
                .header(header::COOKIE, pair.as_str())
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app.oneshot(session_request(&pair)?).await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    Ok(())
}

#[tokio::test]
async fn otp_reset_over_http() -> Result<()> {
    let h = harness().await?;
    common::create_patient(&h.identity, "P0001", "sita@example.com").await?;
    let app = app(&h)?;

    let response = app
        .clone()
        .oneshot(post(
            "/v1/auth/otp",
            &json!({"patient_id": "P0001", "email": "someone@example.com"}),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(post(
            "/v1/auth/otp",
            &json!({"patient_id": "P0001", "email": "SITA@example.com"}),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let code = h.outbox.last_code()?;

    // A bad new password is rejected before the code is spent.
    let response = app
        .clone()
        .oneshot(post(
            "/v1/auth/otp/verify",
            &json!({
                "patient_id": "P0001",
                "otp": code,
                "new_password": "new secret 99",
                "confirm_password": "typo secret 99"
            }),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let reset = json!({
        "patient_id": "P0001",
        "otp": code,
        "new_password": "new secret 99",
        "confirm_password": "new secret 99"
    });
    let response = app.clone().oneshot(post("/v1/auth/otp/verify", &reset)?).await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app.oneshot(post("/v1/auth/otp/verify", &reset)?).await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        text_body(response).await?,
        "OTP already used. Please request a new one."
    );

    h.identity
        .login("P0001", secrecy::SecretString::from("new secret 99"))
        .await?;
    Ok(())
}

#[tokio::test]
async fn failed_otp_email_is_a_bad_gateway() -> Result<()> {
    let h = harness().await?;
    common::create_patient(&h.identity, "P0001", "sita@example.com").await?;
    h.outbox.set_failing(true);

    let response = app(&h)?
        .oneshot(post(
            "/v1/auth/otp",
            &json!({"patient_id": "P0001", "email": "sita@example.com"}),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    Ok(())
}

#[tokio::test]
async fn google_pending_link_then_profile() -> Result<()> {
    let h = harness().await?;
    h.verifier
        .allow("google-token", "sub-42", "hari@example.com", Some("Hari Thapa"));
    let app = app(&h)?;

    let response = app
        .clone()
        .oneshot(post("/v1/auth/google", &json!({"credential": ""}))?)
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .clone()
        .oneshot(post("/v1/auth/google", &json!({"credential": "forged"}))?)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .clone()
        .oneshot(post("/v1/auth/google", &json!({"credential": "google-token"}))?)
        .await?;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let pending = json_body(response).await?;
    assert_eq!(pending["email"], "hari@example.com");
    let ticket = pending["ticket"]
        .as_str()
        .ok_or_else(|| anyhow!("missing ticket"))?
        .to_string();

    let response = app
        .clone()
        .oneshot(post(
            "/v1/auth/google/link",
            &json!({"ticket": ticket, "full_name": "Hari Thapa", "phone": "9701234567"}),
        )?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let login = json_body(response).await?;
    assert_eq!(login["patient_id"], "P0001");
    let token = login["token"]
        .as_str()
        .ok_or_else(|| anyhow!("missing token"))?
        .to_string();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/me")
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let profile = json_body(response).await?;
    assert_eq!(profile["google_linked"], true);
    assert_eq!(profile["has_password"], false);
    assert_eq!(profile["phone"], "+977 9701234567");
    Ok(())
}

#[tokio::test]
async fn me_requires_a_session() -> Result<()> {
    let h = harness().await?;
    let response = app(&h)?
        .oneshot(Request::builder().uri("/v1/me").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn requests_get_an_id_and_health_reports_ok() -> Result<()> {
    let h = harness().await?;
    let response = app(&h)?
        .oneshot(Request::builder().uri("/health").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));
    let body = json_body(response).await?;
    assert_eq!(body["name"], env!("CARGO_PKG_NAME"));
    assert_eq!(body["database"], "ok");
    Ok(())
}

