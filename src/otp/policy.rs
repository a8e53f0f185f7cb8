//! Throttle timings and thresholds, plus the store key schema derived from them.

use std::time::Duration;

const DEFAULT_CODE_TTL_SECONDS: u64 = 5 * 60;
const DEFAULT_COOLDOWN_SECONDS: u64 = 60;
const DEFAULT_REQUEST_WINDOW_SECONDS: u64 = 60 * 60;
const DEFAULT_REQUEST_LIMIT: u32 = 2;
const DEFAULT_SPAM_LOCK_SECONDS: u64 = 60 * 60;
const DEFAULT_MAX_FAILED_ATTEMPTS: u32 = 2;
const DEFAULT_LOCK_SECONDS: u64 = 30 * 60;
const DEFAULT_RESET_WINDOW_SECONDS: u64 = 10 * 60;

/// TTLs and thresholds for issuance and verification.
///
/// `request_limit` and `max_failed_attempts` count *prior* events: with the
/// default of 2 the third request (or third wrong code) is the one that locks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OtpPolicy {
    code_ttl: Duration,
    cooldown: Duration,
    request_window: Duration,
    request_limit: u32,
    spam_lock: Duration,
    max_failed_attempts: u32,
    lock: Duration,
    reset_window: Duration,
}

impl OtpPolicy {
    #[must_use]
    pub fn new() -> Self {
        Self {
            code_ttl: Duration::from_secs(DEFAULT_CODE_TTL_SECONDS),
            cooldown: Duration::from_secs(DEFAULT_COOLDOWN_SECONDS),
            request_window: Duration::from_secs(DEFAULT_REQUEST_WINDOW_SECONDS),
            request_limit: DEFAULT_REQUEST_LIMIT,
            spam_lock: Duration::from_secs(DEFAULT_SPAM_LOCK_SECONDS),
            max_failed_attempts: DEFAULT_MAX_FAILED_ATTEMPTS,
            lock: Duration::from_secs(DEFAULT_LOCK_SECONDS),
            reset_window: Duration::from_secs(DEFAULT_RESET_WINDOW_SECONDS),
        }
    }

    #[must_use]
    pub fn with_code_ttl_seconds(mut self, seconds: u64) -> Self {
        self.code_ttl = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_cooldown_seconds(mut self, seconds: u64) -> Self {
        self.cooldown = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_request_window_seconds(mut self, seconds: u64) -> Self {
        self.request_window = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_request_limit(mut self, limit: u32) -> Self {
        self.request_limit = limit;
        self
    }

    #[must_use]
    pub fn with_spam_lock_seconds(mut self, seconds: u64) -> Self {
        self.spam_lock = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_max_failed_attempts(mut self, attempts: u32) -> Self {
        self.max_failed_attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_lock_seconds(mut self, seconds: u64) -> Self {
        self.lock = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_reset_window_seconds(mut self, seconds: u64) -> Self {
        self.reset_window = Duration::from_secs(seconds);
        self
    }

    /// Clamp values the store cannot express: TTLs have one-second granularity
    /// and a zero TTL would never expire on some backends.
    #[must_use]
    pub fn normalize(self) -> Self {
        let at_least_one_second = |d: Duration| {
            if d.as_secs() == 0 {
                Duration::from_secs(1)
            } else {
                Duration::from_secs(d.as_secs())
            }
        };
        Self {
            code_ttl: at_least_one_second(self.code_ttl),
            cooldown: at_least_one_second(self.cooldown),
            request_window: at_least_one_second(self.request_window),
            request_limit: self.request_limit,
            spam_lock: at_least_one_second(self.spam_lock),
            max_failed_attempts: self.max_failed_attempts,
            lock: at_least_one_second(self.lock),
            reset_window: at_least_one_second(self.reset_window),
        }
    }

    #[must_use]
    pub fn code_ttl(&self) -> Duration {
        self.code_ttl
    }

    #[must_use]
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    #[must_use]
    pub fn request_window(&self) -> Duration {
        self.request_window
    }

    #[must_use]
    pub fn request_limit(&self) -> u32 {
        self.request_limit
    }

    #[must_use]
    pub fn spam_lock(&self) -> Duration {
        self.spam_lock
    }

    #[must_use]
    pub fn max_failed_attempts(&self) -> u32 {
        self.max_failed_attempts
    }

    #[must_use]
    pub fn lock(&self) -> Duration {
        self.lock
    }

    /// How long a verified password-reset code allows the reset itself.
    #[must_use]
    pub fn reset_window(&self) -> Duration {
        self.reset_window
    }
}

impl Default for OtpPolicy {
    fn default() -> Self {
        Self::new()
    }
}

/// Store keys for a single identifier.
///
/// ```text
/// otp:{id}                → active code
/// otp_cooldown:{id}       → re-issue cooldown flag
/// otp_request_count:{id}  → issuance requests in the sliding window
/// otp_spam_lock:{id}      → issuance lock after too many requests
/// otp_attempts:{id}       → wrong submissions for the active code
/// otp_lock:{id}           → lock after too many wrong submissions
/// otp_reset_ok:{id}       → one-shot permission to reset the password
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OtpKeys {
    pub code: String,
    pub cooldown: String,
    pub request_count: String,
    pub spam_lock: String,
    pub attempts: String,
    pub lock: String,
    pub reset_ok: String,
}

impl OtpKeys {
    #[must_use]
    pub fn new(identifier: &str) -> Self {
        Self {
            code: format!("otp:{identifier}"),
            cooldown: format!("otp_cooldown:{identifier}"),
            request_count: format!("otp_request_count:{identifier}"),
            spam_lock: format!("otp_spam_lock:{identifier}"),
            attempts: format!("otp_attempts:{identifier}"),
            lock: format!("otp_lock:{identifier}"),
            reset_ok: format!("otp_reset_ok:{identifier}"),
        }
    }
}
