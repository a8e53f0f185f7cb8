//! One-time passcode throttling and verification.
//!
//! All state is kept in a [`ThrottleStore`] as independent keys with TTLs,
//! keyed by the account identifier (the email address):
//!
//! | key                          | value           | ttl     |
//! |------------------------------|-----------------|---------|
//! | `otp:{id}`                   | 4-digit code    | 5 min   |
//! | `otp_cooldown:{id}`          | `"true"`        | 1 min   |
//! | `otp_request_count:{id}`     | request counter | 1 h     |
//! | `otp_spam_lock:{id}`         | `"locked"`      | 1 h     |
//! | `otp_attempts:{id}`          | failure counter | 5 min   |
//! | `otp_lock:{id}`              | `"locked"`      | 30 min  |
//!
//! Delivery goes through a [`Dispatcher`]; a code is stored only once it was sent.

mod dispatch;
mod engine;
mod error;
mod policy;
mod redis_store;
mod store;

pub use dispatch::{
    DispatchFuture, Dispatcher, LogDispatcher, OTP_SUBJECT, OtpMessage, OtpTemplate,
    RelayDispatcher, TemplateVariables,
};
pub use engine::{OtpEngine, generate_code, retry_after_seconds};
pub use error::OtpError;
pub use policy::{OtpKeys, OtpPolicy};
pub use redis_store::RedisThrottleStore;
pub use store::{MemoryThrottleStore, StoreFuture, ThrottleStore};
