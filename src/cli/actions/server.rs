use crate::{
    accounts::PgAccountDirectory,
    api,
    cli::telemetry,
    flows::AuthFlows,
    otp::{Dispatcher, LogDispatcher, OtpEngine, OtpPolicy, RedisThrottleStore, RelayDispatcher},
};
use anyhow::{Context, Result};
use secrecy::SecretString;
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub redis_url: String,
    pub frontend_base_url: String,
    pub policy: OtpPolicy,
    pub mail_relay_url: Option<String>,
    pub mail_relay_token: Option<SecretString>,
    pub mail_from: String,
}

fn dispatcher(args: &Args) -> Result<Arc<dyn Dispatcher>> {
    match &args.mail_relay_url {
        Some(url) => {
            let relay = RelayDispatcher::new(
                url,
                args.mail_from.clone(),
                args.mail_relay_token.clone(),
            )?;
            info!("Delivering OTP emails through {}", relay.url());
            Ok(Arc::new(relay))
        }
        None => {
            warn!("No mail relay configured, OTP emails are only logged");
            Ok(Arc::new(LogDispatcher))
        }
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if Redis or the database are unreachable, or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let store = RedisThrottleStore::connect(&args.redis_url).await?;

    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&args.dsn)
        .await
        .context("Failed to connect to database")?;

    let dispatcher = dispatcher(&args)?;
    let engine = Arc::new(OtpEngine::new(Arc::new(store), dispatcher, args.policy));
    let flows = Arc::new(AuthFlows::new(
        engine,
        Arc::new(PgAccountDirectory::new(pool)),
    ));

    let result = api::new(args.port, flows, &args.frontend_base_url).await;

    telemetry::shutdown_tracer();

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(mail_relay_url: Option<&str>) -> Args {
        Args {
            port: 8080,
            dsn: "postgres://localhost/otpgate".to_string(),
            redis_url: "redis://localhost".to_string(),
            frontend_base_url: "http://localhost:3000".to_string(),
            policy: OtpPolicy::new(),
            mail_relay_url: mail_relay_url.map(str::to_string),
            mail_relay_token: None,
            mail_from: "no-reply@otpgate.dev".to_string(),
        }
    }

    #[test]
    fn dispatcher_falls_back_to_log() {
        assert!(dispatcher(&args(None)).is_ok());
    }

    #[test]
    fn dispatcher_rejects_bad_relay_url() {
        assert!(dispatcher(&args(Some("smtp://mail.local"))).is_err());
        assert!(dispatcher(&args(Some("https://mail.local/send"))).is_ok());
    }

    #[tokio::test]
    async fn execute_fails_without_redis() {
        let mut args = args(None);
        args.redis_url = "not-a-redis-url".to_string();
        assert!(execute(args).await.is_err());
    }
}
