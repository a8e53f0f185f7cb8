//! API handlers for otpgate.
//!
//! `otp` holds the registration and password-reset endpoints, `error` maps
//! flow failures to HTTP responses.

pub mod error;
pub mod health;
pub mod otp;
pub mod root;
pub mod types;
