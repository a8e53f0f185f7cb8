//! Command-line argument dispatch.
//!
//! Maps validated CLI matches to the server action with its full configuration.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{ARG_DSN, ARG_FRONTEND_BASE_URL, ARG_PORT, ARG_REDIS_URL, mail, otp};
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .cloned()
        .context("missing required argument: --dsn")?;
    let redis_url = matches
        .get_one::<String>(ARG_REDIS_URL)
        .cloned()
        .context("missing required argument: --redis-url")?;
    let frontend_base_url = matches
        .get_one::<String>(ARG_FRONTEND_BASE_URL)
        .cloned()
        .context("missing required argument: --frontend-base-url")?;

    let otp_opts = otp::Options::parse(matches)?;
    let mail_opts = mail::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        redis_url,
        frontend_base_url,
        policy: otp_opts.policy(),
        mail_relay_url: mail_opts.relay_url,
        mail_relay_token: mail_opts.relay_token,
        mail_from: mail_opts.from,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn handler_builds_server_args() {
        temp_env::with_vars(
            [
                ("OTPGATE_DSN", Some("postgres://user@localhost:5432/otpgate")),
                ("OTPGATE_REDIS_URL", Some("redis://localhost:6379")),
                ("OTPGATE_OTP_REQUEST_LIMIT", Some("5")),
                ("OTPGATE_OTP_RESET_WINDOW_SECONDS", Some("120")),
                ("OTPGATE_MAIL_RELAY_URL", None::<&str>),
                ("OTPGATE_MAIL_RELAY_TOKEN", Some("relay-secret")),
            ],
            || {
                let matches = crate::cli::commands::new().get_matches_from(vec!["otpgate"]);
                let result = handler(&matches);
                assert!(result.is_ok());
                if let Ok(Action::Server(args)) = result {
                    assert_eq!(args.port, 8080);
                    assert_eq!(args.redis_url, "redis://localhost:6379");
                    assert_eq!(args.policy.request_limit(), 5);
                    assert_eq!(args.policy.cooldown(), Duration::from_secs(60));
                    assert_eq!(args.policy.reset_window(), Duration::from_secs(120));
                    assert!(args.mail_relay_url.is_none());
                    assert!(args.mail_relay_token.is_some());
                    assert!(!format!("{args:?}").contains("relay-secret"));
                }
            },
        );
    }

    #[test]
    fn empty_mail_from_is_rejected() {
        temp_env::with_vars(
            [
                ("OTPGATE_DSN", Some("postgres://user@localhost:5432/otpgate")),
                ("OTPGATE_REDIS_URL", Some("redis://localhost:6379")),
                ("OTPGATE_MAIL_FROM", Some(" ")),
            ],
            || {
                let matches = crate::cli::commands::new().get_matches_from(vec!["otpgate"]);
                let result = handler(&matches);
                assert!(result.is_err());
                if let Err(err) = result {
                    assert!(
                        err.to_string()
                            .contains("missing required argument: --mail-from")
                    );
                }
            },
        );
    }
}
