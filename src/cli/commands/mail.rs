use clap::{Arg, ArgMatches, Command};
use secrecy::SecretString;

pub const ARG_MAIL_RELAY_URL: &str = "mail-relay-url";
pub const ARG_MAIL_RELAY_TOKEN: &str = "mail-relay-token";
pub const ARG_MAIL_FROM: &str = "mail-from";

#[derive(Debug, Clone)]
pub struct Options {
    /// Without a relay URL codes are only logged.
    pub relay_url: Option<String>,
    pub relay_token: Option<SecretString>,
    pub from: String,
}

impl Options {
    /// Parse mail delivery arguments from matches.
    ///
    /// # Errors
    /// Returns an error if `--mail-from` is missing.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let get_non_empty = |id: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
        };

        let from = get_non_empty(ARG_MAIL_FROM)
            .ok_or_else(|| anyhow::anyhow!("missing required argument: --{ARG_MAIL_FROM}"))?;

        Ok(Self {
            relay_url: get_non_empty(ARG_MAIL_RELAY_URL),
            relay_token: get_non_empty(ARG_MAIL_RELAY_TOKEN).map(SecretString::from),
            from,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_MAIL_RELAY_URL)
                .long(ARG_MAIL_RELAY_URL)
                .help("HTTP mail relay endpoint; codes are only logged when unset")
                .env("OTPGATE_MAIL_RELAY_URL"),
        )
        .arg(
            Arg::new(ARG_MAIL_RELAY_TOKEN)
                .long(ARG_MAIL_RELAY_TOKEN)
                .help("Bearer token for the mail relay")
                .env("OTPGATE_MAIL_RELAY_TOKEN")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_MAIL_FROM)
                .long(ARG_MAIL_FROM)
                .help("Sender address for OTP emails")
                .env("OTPGATE_MAIL_FROM")
                .default_value("no-reply@otpgate.dev"),
        )
}
