//! Auth endpoints: signup, password login, sessions, OTP reset and Google
//! sign-in.
//!
//! Handlers validate and normalize input, call the identity core, and map
//! `IdentityError` to a status code plus its fixed public message.

pub mod google;
pub mod login;
pub mod otp;
pub mod session;
pub mod signup;
pub mod state;
pub mod types;
pub(crate) mod utils;

pub use state::AuthConfig;

use crate::identity::{IdentityError, IdentityService, NewUser, User};
use std::future::Future;

const PATIENT_ID_ALLOCATION_ATTEMPTS: usize = 3;

/// Create a user under `patient_id`, or under freshly allocated ids when
/// none was supplied. Allocated ids are retried if a concurrent signup took
/// them first.
pub(crate) async fn create_with_patient_id<F, Fut, T>(
    identity: &IdentityService,
    patient_id: Option<String>,
    create: F,
) -> Result<T, IdentityError>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<T, IdentityError>>,
{
    if let Some(patient_id) = patient_id {
        return create(patient_id).await;
    }

    let mut last_err = IdentityError::DuplicateIdentity;
    for _ in 0..PATIENT_ID_ALLOCATION_ATTEMPTS {
        let allocated = identity.allocate_patient_id().await?;
        match create(allocated).await {
            Err(IdentityError::DuplicateIdentity) => last_err = IdentityError::DuplicateIdentity,
            other => return other,
        }
    }
    Err(last_err)
}

pub(crate) async fn create_password_user(
    identity: &IdentityService,
    patient_id: Option<String>,
    template: &NewUserTemplate,
) -> Result<User, IdentityError> {
    create_with_patient_id(identity, patient_id, |patient_id| {
        identity.create_user(template.build(patient_id))
    })
    .await
}

/// Validated signup fields, reusable across allocation retries.
pub(crate) struct NewUserTemplate {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub password: secrecy::SecretString,
}

impl NewUserTemplate {
    fn build(&self, patient_id: String) -> NewUser {
        NewUser {
            patient_id,
            name: self.name.clone(),
            email: self.email.clone(),
            phone: self.phone.clone(),
            password: self.password.clone(),
        }
    }
}
