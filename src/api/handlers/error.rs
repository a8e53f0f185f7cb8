//! HTTP mapping for flow errors.
//!
//! Gating errors become 429 with `Retry-After`; caller mistakes are 4xx with
//! the error message; infrastructure faults are logged and answered with a
//! generic 500.

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use tracing::error;

use super::types::ErrorResponse;
use crate::flows::FlowError;
use crate::otp::{OtpError, retry_after_seconds};

const INTERNAL_MESSAGE: &str = "Internal server error";

#[must_use]
pub fn status_for(err: &FlowError) -> StatusCode {
    match err {
        FlowError::MissingFields | FlowError::InvalidEmail | FlowError::SamePassword => {
            StatusCode::BAD_REQUEST
        }
        FlowError::ResetNotVerified => StatusCode::FORBIDDEN,
        FlowError::AccountNotFound(_) => StatusCode::NOT_FOUND,
        FlowError::AccountExists(_) => StatusCode::CONFLICT,
        FlowError::Otp(otp) => match otp {
            OtpError::Locked { .. }
            | OtpError::SpamLocked { .. }
            | OtpError::CooldownActive { .. }
            | OtpError::LockedOut { .. } => StatusCode::TOO_MANY_REQUESTS,
            OtpError::Expired | OtpError::Incorrect { .. } => StatusCode::BAD_REQUEST,
            OtpError::Dispatch(_) | OtpError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        },
        FlowError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for FlowError {
    fn into_response(self) -> Response {
        let status = status_for(&self);

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("internal error: {self:?}");
            return (
                status,
                Json(ErrorResponse {
                    error: INTERNAL_MESSAGE.to_string(),
                }),
            )
                .into_response();
        }

        let retry_after = match &self {
            FlowError::Otp(otp) => otp.retry_after(),
            _ => None,
        };

        let mut response = (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response();

        if let Some(wait) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&retry_after_seconds(wait).to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::AccountKind;
    use anyhow::{Result, anyhow};
    use axum::body::to_bytes;
    use std::time::Duration;

    async fn body_json(response: Response) -> Result<serde_json::Value> {
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    #[tokio::test]
    async fn cooldown_maps_to_429_with_retry_after() -> Result<()> {
        let err = FlowError::Otp(OtpError::CooldownActive {
            retry_after: Duration::from_secs(60),
        });
        let response = err.into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok()),
            Some("60")
        );
        let body = body_json(response).await?;
        assert_eq!(
            body["error"],
            "Please wait 1 minute before requesting a new OTP!"
        );
        Ok(())
    }

    #[tokio::test]
    async fn store_failure_hides_details() -> Result<()> {
        let err = FlowError::Otp(OtpError::Store(anyhow!("redis://secret@host refused")));
        let response = err.into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await?;
        assert_eq!(body["error"], INTERNAL_MESSAGE);
        Ok(())
    }

    #[test]
    fn statuses_by_error_class() {
        assert_eq!(
            status_for(&FlowError::MissingFields),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&FlowError::AccountNotFound(AccountKind::User)),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&FlowError::AccountExists(AccountKind::Seller)),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&FlowError::ResetNotVerified),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_for(&FlowError::SamePassword),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&FlowError::Otp(OtpError::Incorrect { remaining: 1 })),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(&FlowError::Otp(OtpError::Dispatch(anyhow!("down")))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_for(&FlowError::Internal(anyhow!("boom"))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
