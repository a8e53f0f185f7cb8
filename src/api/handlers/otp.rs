//! Registration and password-reset endpoints.
//!
//! Every route is parameterized by the account kind (`user` or `seller`).

use axum::{
    Json,
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use super::types::{
    ErrorResponse, ForgotPasswordRequest, MessageResponse, RegisteredResponse,
    ResetPasswordRequest, VerifyForgotPasswordRequest, VerifyRegistrationRequest,
};
use crate::accounts::AccountKind;
use crate::flows::{AuthFlows, RegistrationRequest};

const OTP_SENT: &str = "OTP sent to email. Please verify your account.";

fn missing_payload() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: "Missing payload".to_string(),
        }),
    )
        .into_response()
}

/// Registration step 1: validate and email an activation code.
#[utoipa::path(
    post,
    path = "/v1/auth/{kind}/register",
    request_body = RegistrationRequest,
    params(
        ("kind" = AccountKind, Path, description = "Account kind")
    ),
    responses(
        (status = 200, description = "OTP sent", body = MessageResponse),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 409, description = "Account already exists", body = ErrorResponse),
        (status = 429, description = "Cooldown, spam lock or lockout active", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn register(
    Path(kind): Path<AccountKind>,
    flows: Extension<Arc<AuthFlows>>,
    payload: Option<Json<RegistrationRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    match flows.start_registration(kind, &request).await {
        Ok(()) => (StatusCode::OK, Json(MessageResponse::new(OTP_SENT))).into_response(),
        Err(err) => err.into_response(),
    }
}

/// Registration step 2: verify the activation code and create the account.
#[utoipa::path(
    post,
    path = "/v1/auth/{kind}/verify",
    request_body = VerifyRegistrationRequest,
    params(
        ("kind" = AccountKind, Path, description = "Account kind")
    ),
    responses(
        (status = 201, description = "Account created", body = RegisteredResponse),
        (status = 400, description = "Validation error or wrong/expired OTP", body = ErrorResponse),
        (status = 409, description = "Account already exists", body = ErrorResponse),
        (status = 429, description = "Account locked", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn verify(
    Path(kind): Path<AccountKind>,
    flows: Extension<Arc<AuthFlows>>,
    payload: Option<Json<VerifyRegistrationRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    match flows
        .complete_registration(kind, &request.registration, &request.otp)
        .await
    {
        Ok(account) => (
            StatusCode::CREATED,
            Json(RegisteredResponse {
                id: account.id.to_string(),
                email: account.email,
                message: format!("{} registered successfully!", kind.title()),
            }),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

/// Email a password-reset code to an existing account.
#[utoipa::path(
    post,
    path = "/v1/auth/{kind}/forgot-password",
    request_body = ForgotPasswordRequest,
    params(
        ("kind" = AccountKind, Path, description = "Account kind")
    ),
    responses(
        (status = 200, description = "OTP sent", body = MessageResponse),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 404, description = "Account not found", body = ErrorResponse),
        (status = 429, description = "Cooldown, spam lock or lockout active", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn forgot_password(
    Path(kind): Path<AccountKind>,
    flows: Extension<Arc<AuthFlows>>,
    payload: Option<Json<ForgotPasswordRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    match flows.forgot_password(kind, &request.email).await {
        Ok(()) => (StatusCode::OK, Json(MessageResponse::new(OTP_SENT))).into_response(),
        Err(err) => err.into_response(),
    }
}

/// Verify a password-reset code.
#[utoipa::path(
    post,
    path = "/v1/auth/{kind}/verify-forgot-password",
    request_body = VerifyForgotPasswordRequest,
    params(
        ("kind" = AccountKind, Path, description = "Account kind")
    ),
    responses(
        (status = 200, description = "OTP verified", body = MessageResponse),
        (status = 400, description = "Validation error or wrong/expired OTP", body = ErrorResponse),
        (status = 429, description = "Account locked", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn verify_forgot_password(
    Path(_kind): Path<AccountKind>,
    flows: Extension<Arc<AuthFlows>>,
    payload: Option<Json<VerifyForgotPasswordRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    match flows
        .verify_forgot_password(&request.email, &request.otp)
        .await
    {
        Ok(()) => (
            StatusCode::OK,
            Json(MessageResponse::new(
                "OTP verified. You can now reset your password.",
            )),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

/// Set a new password after the reset code was verified.
#[utoipa::path(
    post,
    path = "/v1/auth/{kind}/reset-password",
    request_body = ResetPasswordRequest,
    params(
        ("kind" = AccountKind, Path, description = "Account kind")
    ),
    responses(
        (status = 200, description = "Password updated", body = MessageResponse),
        (status = 400, description = "Validation error or unchanged password", body = ErrorResponse),
        (status = 403, description = "Reset code not verified", body = ErrorResponse),
        (status = 404, description = "Account not found", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn reset_password(
    Path(kind): Path<AccountKind>,
    flows: Extension<Arc<AuthFlows>>,
    payload: Option<Json<ResetPasswordRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    match flows
        .reset_password(kind, &request.email, &request.new_password)
        .await
    {
        Ok(()) => (
            StatusCode::OK,
            Json(MessageResponse::new("Password reset successfully!")),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}
