//! Registration and password-reset flows on top of [`OtpEngine`].
//!
//! Both flows start with two steps: the first call validates the request and
//! sends a code, the second verifies the code. Password reset adds a third
//! step, allowed once per verified code within the reset window. The flows
//! are parameterized by
//! [`AccountKind`]; users and sellers differ only in required fields, table
//! and email template.

use anyhow::{Context, anyhow};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use rand::rngs::OsRng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use utoipa::ToSchema;

use crate::accounts::{Account, AccountDirectory, AccountKind, CreateOutcome, NewAccount};
use crate::otp::{OtpEngine, OtpError};

#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("All fields are required!")]
    MissingFields,
    #[error("Invalid email format!")]
    InvalidEmail,
    #[error("{} not found!", .0.title())]
    AccountNotFound(AccountKind),
    #[error("{} already exists with this email!", .0.title())]
    AccountExists(AccountKind),
    #[error("Please verify the OTP before resetting your password!")]
    ResetNotVerified,
    #[error("New password cannot be the same as the old password!")]
    SamePassword,
    #[error(transparent)]
    Otp(#[from] OtpError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Registration payload; sellers must also send `phone_number` and `country`.
#[derive(ToSchema, Serialize, Deserialize, Clone, Default)]
pub struct RegistrationRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

impl std::fmt::Debug for RegistrationRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationRequest")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("password", &"***")
            .field("phone_number", &self.phone_number)
            .field("country", &self.country)
            .finish()
    }
}

/// Registration fields after validation, email normalized.
struct ValidRegistration {
    name: String,
    email: String,
    password: String,
    phone_number: Option<String>,
    country: Option<String>,
}

/// Normalize an email for lookup, uniqueness checks and OTP keys.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
#[must_use]
pub fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

fn required(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn validate(kind: AccountKind, request: &RegistrationRequest) -> Result<ValidRegistration, FlowError> {
    let name = required(&request.name).ok_or(FlowError::MissingFields)?;
    let email = required(&request.email).ok_or(FlowError::MissingFields)?;
    // Passwords are taken as-is; whitespace is significant.
    if request.password.is_empty() {
        return Err(FlowError::MissingFields);
    }

    let (phone_number, country) = if kind.requires_contact_details() {
        let phone = request
            .phone_number
            .as_deref()
            .and_then(required)
            .ok_or(FlowError::MissingFields)?;
        let country = request
            .country
            .as_deref()
            .and_then(required)
            .ok_or(FlowError::MissingFields)?;
        (Some(phone), Some(country))
    } else {
        (None, None)
    };

    let email = normalize_email(&email);
    if !valid_email(&email) {
        return Err(FlowError::InvalidEmail);
    }

    Ok(ValidRegistration {
        name,
        email,
        password: request.password.clone(),
        phone_number,
        country,
    })
}

fn validated_email(email: &str) -> Result<String, FlowError> {
    let email = required(email).ok_or(FlowError::MissingFields)?;
    let email = normalize_email(&email);
    if valid_email(&email) {
        Ok(email)
    } else {
        Err(FlowError::InvalidEmail)
    }
}

/// Hash a password with Argon2id and a random salt (PHC string format).
///
/// # Errors
/// Returns an error if hashing fails.
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| anyhow!("failed to hash password: {err}"))
}

/// Check a password against a stored PHC hash.
///
/// # Errors
/// Returns an error if the stored hash cannot be parsed.
pub fn password_matches(password: &str, stored_hash: &str) -> anyhow::Result<bool> {
    let parsed =
        PasswordHash::new(stored_hash).map_err(|err| anyhow!("invalid stored password hash: {err}"))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Registration and password-reset orchestration.
#[derive(Clone)]
pub struct AuthFlows {
    engine: Arc<OtpEngine>,
    accounts: Arc<dyn AccountDirectory>,
}

impl AuthFlows {
    #[must_use]
    pub fn new(engine: Arc<OtpEngine>, accounts: Arc<dyn AccountDirectory>) -> Self {
        Self { engine, accounts }
    }

    #[must_use]
    pub fn engine(&self) -> &OtpEngine {
        &self.engine
    }

    #[must_use]
    pub fn accounts(&self) -> &dyn AccountDirectory {
        self.accounts.as_ref()
    }

    /// Registration step 1: validate, make sure the account does not exist yet,
    /// then send an activation code.
    ///
    /// # Errors
    /// Validation errors, `AccountExists`, or any [`OtpError`] of issuance.
    #[instrument(skip(self, request))]
    pub async fn start_registration(
        &self,
        kind: AccountKind,
        request: &RegistrationRequest,
    ) -> Result<(), FlowError> {
        let registration = validate(kind, request)?;
        self.ensure_absent(kind, &registration.email).await?;

        self.engine
            .request_code(
                &registration.email,
                &registration.name,
                kind.activation_template(),
            )
            .await?;

        info!("activation otp requested");
        Ok(())
    }

    /// Registration step 2: verify the activation code and create the account.
    ///
    /// # Errors
    /// Validation errors, `AccountExists`, any [`OtpError`] of verification,
    /// or `Internal` when hashing or persistence fails.
    #[instrument(skip(self, request, otp))]
    pub async fn complete_registration(
        &self,
        kind: AccountKind,
        request: &RegistrationRequest,
        otp: &str,
    ) -> Result<Account, FlowError> {
        let registration = validate(kind, request)?;
        let otp = required(otp).ok_or(FlowError::MissingFields)?;
        self.ensure_absent(kind, &registration.email).await?;

        self.engine.verify_code(&registration.email, &otp).await?;

        let password = registration.password;
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .context("password hashing task failed")??;

        let outcome = self
            .accounts
            .create(
                kind,
                NewAccount {
                    name: registration.name,
                    email: registration.email,
                    password_hash,
                    phone_number: registration.phone_number,
                    country: registration.country,
                },
            )
            .await?;

        match outcome {
            CreateOutcome::Created(account) => {
                info!(account_id = %account.id, "account registered");
                Ok(account)
            }
            CreateOutcome::Conflict => Err(FlowError::AccountExists(kind)),
        }
    }

    /// Send a password-reset code to an existing account.
    ///
    /// # Errors
    /// Validation errors, `AccountNotFound`, or any [`OtpError`] of issuance.
    #[instrument(skip(self))]
    pub async fn forgot_password(&self, kind: AccountKind, email: &str) -> Result<(), FlowError> {
        let email = validated_email(email)?;

        let account = self
            .accounts
            .find_by_email(kind, &email)
            .await?
            .ok_or(FlowError::AccountNotFound(kind))?;

        self.engine
            .request_code(&email, &account.name, kind.reset_template())
            .await?;

        info!("password reset otp requested");
        Ok(())
    }

    /// Verify a password-reset code and allow one reset for the email.
    ///
    /// # Errors
    /// Validation errors or any [`OtpError`] of verification.
    #[instrument(skip(self, otp))]
    pub async fn verify_forgot_password(&self, email: &str, otp: &str) -> Result<(), FlowError> {
        let email = validated_email(email)?;
        let otp = required(otp).ok_or(FlowError::MissingFields)?;

        self.engine.verify_code(&email, &otp).await?;
        self.engine.authorize_reset(&email).await?;
        Ok(())
    }

    /// Set a new password after a verified reset code.
    ///
    /// The authorization is consumed only once the new password is accepted,
    /// so a rejected submission can be retried.
    ///
    /// # Errors
    /// Validation errors, `ResetNotVerified` without a pending authorization,
    /// `AccountNotFound`, `SamePassword`, or `Internal` when hashing or
    /// persistence fails.
    #[instrument(skip(self, new_password))]
    pub async fn reset_password(
        &self,
        kind: AccountKind,
        email: &str,
        new_password: &str,
    ) -> Result<(), FlowError> {
        let email = validated_email(email)?;
        if new_password.is_empty() {
            return Err(FlowError::MissingFields);
        }

        if !self.engine.reset_authorized(&email).await? {
            return Err(FlowError::ResetNotVerified);
        }

        let current_hash = self
            .accounts
            .password_hash(kind, &email)
            .await?
            .ok_or(FlowError::AccountNotFound(kind))?;

        let password = new_password.to_string();
        let new_hash = tokio::task::spawn_blocking(move || -> anyhow::Result<Option<String>> {
            if password_matches(&password, &current_hash)? {
                return Ok(None);
            }
            hash_password(&password).map(Some)
        })
        .await
        .context("password hashing task failed")??;
        let new_hash = new_hash.ok_or(FlowError::SamePassword)?;

        if !self.engine.consume_reset(&email).await? {
            return Err(FlowError::ResetNotVerified);
        }

        if !self.accounts.update_password(kind, &email, &new_hash).await? {
            return Err(FlowError::AccountNotFound(kind));
        }

        info!("password reset");
        Ok(())
    }

    async fn ensure_absent(&self, kind: AccountKind, email: &str) -> Result<(), FlowError> {
        if self.accounts.find_by_email(kind, email).await?.is_some() {
            return Err(FlowError::AccountExists(kind));
        }
        Ok(())
    }
}

impl std::fmt::Debug for AuthFlows {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthFlows")
            .field("engine", &self.engine)
            .finish_non_exhaustive()
    }
}
