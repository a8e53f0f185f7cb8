use std::time::Duration;

/// Failures returned by [`super::OtpEngine`].
///
/// Gating and verification variants carry user-facing messages; `Dispatch` and
/// `Store` wrap infrastructure faults and are not meant to be shown verbatim.
#[derive(Debug, thiserror::Error)]
pub enum OtpError {
    #[error(
        "Account locked due to multiple failed attempts! Try again after {}",
        humanize(.retry_after)
    )]
    Locked { retry_after: Duration },
    #[error(
        "Too many OTP requests! Please wait {} before requesting again.",
        humanize(.retry_after)
    )]
    SpamLocked { retry_after: Duration },
    #[error(
        "Please wait {} before requesting a new OTP!",
        humanize(.retry_after)
    )]
    CooldownActive { retry_after: Duration },
    #[error("Invalid or expired OTP!")]
    Expired,
    #[error("Incorrect OTP. {} left.", attempts(.remaining))]
    Incorrect { remaining: u32 },
    #[error(
        "Too many failed attempts. Your account is locked for {}!",
        humanize(.retry_after)
    )]
    LockedOut { retry_after: Duration },
    #[error("OTP delivery failed: {0}")]
    Dispatch(anyhow::Error),
    #[error("OTP store failure: {0}")]
    Store(anyhow::Error),
}

impl OtpError {
    /// How long the caller has to wait, for gating failures.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Locked { retry_after }
            | Self::SpamLocked { retry_after }
            | Self::CooldownActive { retry_after }
            | Self::LockedOut { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    /// `true` for faults of the store or the dispatcher rather than the caller.
    #[must_use]
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::Dispatch(_) | Self::Store(_))
    }
}

fn humanize(duration: &Duration) -> String {
    let seconds = duration.as_secs();
    let (value, unit) = if seconds >= 3600 && seconds % 3600 == 0 {
        (seconds / 3600, "hour")
    } else if seconds >= 60 && seconds % 60 == 0 {
        (seconds / 60, "minute")
    } else {
        (seconds, "second")
    };
    plural(value, unit)
}

fn attempts(remaining: &u32) -> String {
    plural(u64::from(*remaining), "attempt")
}

fn plural(count: u64, unit: &str) -> String {
    if count == 1 {
        format!("1 {unit}")
    } else {
        format!("{count} {unit}s")
    }
}
