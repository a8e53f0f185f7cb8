//! Request/response types for the OTP endpoints.

use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

use crate::flows::RegistrationRequest;

/// Registration step 2: the registration fields plus the emailed code.
#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct VerifyRegistrationRequest {
    #[serde(flatten)]
    pub registration: RegistrationRequest,
    #[serde(default)]
    pub otp: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ForgotPasswordRequest {
    #[serde(default)]
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VerifyForgotPasswordRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub otp: String,
}

/// Password-reset step 3: the new password, accepted once the code is verified.
#[derive(ToSchema, Serialize, Deserialize)]
pub struct ResetPasswordRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default, alias = "newPassword")]
    pub new_password: String,
}

impl fmt::Debug for ResetPasswordRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResetPasswordRequest")
            .field("email", &self.email)
            .field("new_password", &"[REDACTED]")
            .finish()
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RegisteredResponse {
    pub id: String,
    pub email: String,
    pub message: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn verify_registration_request_reads_flat_fields() -> Result<()> {
        let decoded: VerifyRegistrationRequest = serde_json::from_str(
            r#"{"name":"Shop","email":"shop@x.com","password":"pw","phone_number":"1","country":"GB","otp":"4821"}"#,
        )?;
        assert_eq!(decoded.otp, "4821");
        assert_eq!(decoded.registration.email, "shop@x.com");
        assert_eq!(decoded.registration.country.as_deref(), Some("GB"));
        Ok(())
    }

    #[test]
    fn missing_fields_default_to_empty() -> Result<()> {
        let decoded: VerifyForgotPasswordRequest = serde_json::from_str("{}")?;
        assert!(decoded.email.is_empty());
        assert!(decoded.otp.is_empty());
        Ok(())
    }

    #[test]
    fn reset_password_request_accepts_camel_case_and_redacts() -> Result<()> {
        let decoded: ResetPasswordRequest =
            serde_json::from_str(r#"{"email":"a@x.com","newPassword":"s3cret"}"#)?;
        assert_eq!(decoded.new_password, "s3cret");

        let debug = format!("{decoded:?}");
        assert!(debug.contains("a@x.com"));
        assert!(!debug.contains("s3cret"));
        Ok(())
    }
}
