//! # Otpgate (OTP issuance & verification)
//!
//! `otpgate` issues short numeric one-time passcodes for account registration
//! and password reset, delivers them by email, and verifies what the user
//! types back in.
//!
//! ## Throttling
//!
//! Every piece of state lives in a key-value store with per-key expiry (Redis
//! in production). Expiry is the only deletion mechanism besides the explicit
//! clean-up after a successful verification.
//!
//! - **Cooldown:** one code per identifier per minute.
//! - **Spam lock:** the third request inside a sliding hour locks issuance for an hour.
//! - **Lockout:** the third wrong code locks issuance and verification for 30 minutes.
//!
//! ## Account kinds
//!
//! Shoppers (`user`) and sellers (`seller`) share the same flows. The kind only
//! selects the account table and the email template.
//!
//! The engine in [`otp`] has no web-framework dependency; [`api`] maps its
//! results to HTTP responses.

pub mod accounts;
pub mod api;
pub mod cli;
pub mod flows;
pub mod otp;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
