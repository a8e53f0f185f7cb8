//! Code delivery.
//!
//! The engine hands every generated code to a [`Dispatcher`] before storing it.
//! A dispatcher must report failures as errors; a silent drop would leave a
//! stored code nobody received.
//!
//! - [`LogDispatcher`] logs the message (local dev, never in production).
//! - [`RelayDispatcher`] POSTs the rendered-template request to an HTTP mail relay.

use anyhow::{Context, Result, anyhow};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{Instrument, info, info_span};
use url::Url;

pub type DispatchFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

pub const OTP_SUBJECT: &str = "Verify Your Email";

/// Email template used to render the message on the relay side.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OtpTemplate {
    UserActivation,
    SellerActivation,
    UserPasswordReset,
    SellerPasswordReset,
}

impl OtpTemplate {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::UserActivation => "user-activation-mail",
            Self::SellerActivation => "seller-activation",
            Self::UserPasswordReset => "forgot-password-user-mail",
            Self::SellerPasswordReset => "forgot-password-seller-mail",
        }
    }
}

#[derive(Clone, Serialize)]
pub struct TemplateVariables {
    pub name: String,
    pub otp: String,
}

/// One outbound OTP email.
#[derive(Clone, Serialize)]
pub struct OtpMessage {
    pub to: String,
    pub subject: String,
    pub template: &'static str,
    pub variables: TemplateVariables,
}

impl OtpMessage {
    #[must_use]
    pub fn new(to: &str, name: &str, template: OtpTemplate, code: &str) -> Self {
        Self {
            to: to.to_string(),
            subject: OTP_SUBJECT.to_string(),
            template: template.as_str(),
            variables: TemplateVariables {
                name: name.to_string(),
                otp: code.to_string(),
            },
        }
    }
}

impl std::fmt::Debug for OtpMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtpMessage")
            .field("to", &self.to)
            .field("subject", &self.subject)
            .field("template", &self.template)
            .field("name", &self.variables.name)
            .field("otp", &"***")
            .finish()
    }
}

/// Delivery abstraction used by the engine.
pub trait Dispatcher: Send + Sync {
    /// Deliver a message or return an error so the engine can abort issuance.
    fn send<'a>(&'a self, message: &'a OtpMessage) -> DispatchFuture<'a>;
}

/// Local dev dispatcher that logs the payload instead of sending real email.
#[derive(Clone, Debug)]
pub struct LogDispatcher;

impl Dispatcher for LogDispatcher {
    fn send<'a>(&'a self, message: &'a OtpMessage) -> DispatchFuture<'a> {
        Box::pin(async move {
            info!(
                to_email = %message.to,
                template = %message.template,
                otp = %message.variables.otp,
                "otp email send stub"
            );
            Ok(())
        })
    }
}

#[derive(Serialize)]
struct RelayRequest<'a> {
    from: &'a str,
    #[serde(flatten)]
    message: &'a OtpMessage,
}

/// Sends messages to an HTTP mail relay as JSON:
/// `{"from", "to", "subject", "template", "variables": {"name", "otp"}}`.
///
/// Any non-2xx response is a delivery failure.
pub struct RelayDispatcher {
    client: Client,
    url: Url,
    from: String,
    token: Option<SecretString>,
}

impl RelayDispatcher {
    /// # Errors
    /// Returns an error if the URL is not http(s) or the HTTP client cannot be built.
    pub fn new(url: &str, from: String, token: Option<SecretString>) -> Result<Self> {
        let url = Url::parse(url).with_context(|| format!("Invalid mail relay URL: {url}"))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(anyhow!(
                "Mail relay URL must use http or https: {}",
                url.as_str()
            ));
        }

        let client = Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build mail relay HTTP client")?;

        Ok(Self {
            client,
            url,
            from,
            token,
        })
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl std::fmt::Debug for RelayDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayDispatcher")
            .field("url", &self.url.as_str())
            .field("from", &self.from)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .finish()
    }
}

impl Dispatcher for RelayDispatcher {
    fn send<'a>(&'a self, message: &'a OtpMessage) -> DispatchFuture<'a> {
        Box::pin(async move {
            let body = RelayRequest {
                from: &self.from,
                message,
            };
            let mut request = self.client.post(self.url.clone()).json(&body);
            if let Some(token) = &self.token {
                request = request.bearer_auth(token.expose_secret());
            }

            let span = info_span!(
                "mail.relay",
                http.method = "POST",
                template = message.template
            );
            let response = request
                .send()
                .instrument(span)
                .await
                .context("mail relay request failed")?;

            let status = response.status();
            if !status.is_success() {
                return Err(anyhow!("mail relay rejected message: {status}"));
            }
            Ok(())
        })
    }
}
