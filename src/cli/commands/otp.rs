use clap::{Arg, ArgMatches, Command};

use crate::otp::OtpPolicy;

pub const ARG_OTP_CODE_TTL_SECONDS: &str = "otp-code-ttl-seconds";
pub const ARG_OTP_COOLDOWN_SECONDS: &str = "otp-cooldown-seconds";
pub const ARG_OTP_REQUEST_WINDOW_SECONDS: &str = "otp-request-window-seconds";
pub const ARG_OTP_REQUEST_LIMIT: &str = "otp-request-limit";
pub const ARG_OTP_SPAM_LOCK_SECONDS: &str = "otp-spam-lock-seconds";
pub const ARG_OTP_MAX_FAILED_ATTEMPTS: &str = "otp-max-failed-attempts";
pub const ARG_OTP_LOCK_SECONDS: &str = "otp-lock-seconds";
pub const ARG_OTP_RESET_WINDOW_SECONDS: &str = "otp-reset-window-seconds";

#[derive(Debug, Clone, Copy)]
pub struct Options {
    pub code_ttl_seconds: u64,
    pub cooldown_seconds: u64,
    pub request_window_seconds: u64,
    pub request_limit: u32,
    pub spam_lock_seconds: u64,
    pub max_failed_attempts: u32,
    pub lock_seconds: u64,
    pub reset_window_seconds: u64,
}

impl Options {
    /// Parse OTP throttling arguments from matches.
    ///
    /// # Errors
    /// Returns an error if an argument is missing.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let seconds = |id: &str| -> anyhow::Result<u64> {
            matches
                .get_one::<u64>(id)
                .copied()
                .ok_or_else(|| anyhow::anyhow!("missing required argument: --{id}"))
        };
        let count = |id: &str| -> anyhow::Result<u32> {
            matches
                .get_one::<u32>(id)
                .copied()
                .ok_or_else(|| anyhow::anyhow!("missing required argument: --{id}"))
        };

        Ok(Self {
            code_ttl_seconds: seconds(ARG_OTP_CODE_TTL_SECONDS)?,
            cooldown_seconds: seconds(ARG_OTP_COOLDOWN_SECONDS)?,
            request_window_seconds: seconds(ARG_OTP_REQUEST_WINDOW_SECONDS)?,
            request_limit: count(ARG_OTP_REQUEST_LIMIT)?,
            spam_lock_seconds: seconds(ARG_OTP_SPAM_LOCK_SECONDS)?,
            max_failed_attempts: count(ARG_OTP_MAX_FAILED_ATTEMPTS)?,
            lock_seconds: seconds(ARG_OTP_LOCK_SECONDS)?,
            reset_window_seconds: seconds(ARG_OTP_RESET_WINDOW_SECONDS)?,
        })
    }

    #[must_use]
    pub fn policy(&self) -> OtpPolicy {
        OtpPolicy::new()
            .with_code_ttl_seconds(self.code_ttl_seconds)
            .with_cooldown_seconds(self.cooldown_seconds)
            .with_request_window_seconds(self.request_window_seconds)
            .with_request_limit(self.request_limit)
            .with_spam_lock_seconds(self.spam_lock_seconds)
            .with_max_failed_attempts(self.max_failed_attempts)
            .with_lock_seconds(self.lock_seconds)
            .with_reset_window_seconds(self.reset_window_seconds)
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_OTP_CODE_TTL_SECONDS)
                .long(ARG_OTP_CODE_TTL_SECONDS)
                .help("Lifetime of an issued code and of its failure counter")
                .env("OTPGATE_OTP_CODE_TTL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_OTP_COOLDOWN_SECONDS)
                .long(ARG_OTP_COOLDOWN_SECONDS)
                .help("Minimum delay between two codes for the same email")
                .env("OTPGATE_OTP_COOLDOWN_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_OTP_REQUEST_WINDOW_SECONDS)
                .long(ARG_OTP_REQUEST_WINDOW_SECONDS)
                .help("Sliding window for counting code requests")
                .env("OTPGATE_OTP_REQUEST_WINDOW_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_OTP_REQUEST_LIMIT)
                .long(ARG_OTP_REQUEST_LIMIT)
                .help("Requests allowed inside the window; the next one sets the spam lock")
                .env("OTPGATE_OTP_REQUEST_LIMIT")
                .default_value("2")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_OTP_SPAM_LOCK_SECONDS)
                .long(ARG_OTP_SPAM_LOCK_SECONDS)
                .help("How long issuance stays blocked after too many requests")
                .env("OTPGATE_OTP_SPAM_LOCK_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_OTP_MAX_FAILED_ATTEMPTS)
                .long(ARG_OTP_MAX_FAILED_ATTEMPTS)
                .help("Wrong codes allowed; the next one locks the account")
                .env("OTPGATE_OTP_MAX_FAILED_ATTEMPTS")
                .default_value("2")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new(ARG_OTP_LOCK_SECONDS)
                .long(ARG_OTP_LOCK_SECONDS)
                .help("How long issuance and verification stay blocked after too many wrong codes")
                .env("OTPGATE_OTP_LOCK_SECONDS")
                .default_value("1800")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_OTP_RESET_WINDOW_SECONDS)
                .long(ARG_OTP_RESET_WINDOW_SECONDS)
                .help("How long a verified reset code allows setting a new password")
                .env("OTPGATE_OTP_RESET_WINDOW_SECONDS")
                .default_value("600")
                .value_parser(clap::value_parser!(u64)),
        )
}
