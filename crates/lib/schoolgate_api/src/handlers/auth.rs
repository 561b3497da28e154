//! Authentication request handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};
use schoolgate_core::auth::AuthError;
use schoolgate_core::models::{AccountContext, Role};
use tracing::error;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::{AuthenticatedUser, BearerToken};
use crate::middleware::client_addr::ClientAddr;
use crate::models::{
    ChangePasswordRequest, ForgotPasswordRequest, LoginRequest, LogoutRequest, MessageResponse,
    RefreshRequest, RegisterRequest, ResetPasswordRequest, TokenResponse, UserInfo,
    VerifyEmailRequest,
};

const MAX_EMAIL_LEN: usize = 254;

fn validate_email(email: &str) -> AppResult<()> {
    let email = email.trim();
    let valid = email.len() <= MAX_EMAIL_LEN
        && email
            .split_once('@')
            .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if !valid {
        return Err(AppError::Validation("A valid email address is required".into()));
    }
    Ok(())
}

/// `POST /auth/register` — create a student or parent account.
///
/// Staff, security and admin accounts are provisioned by administrators.
pub async fn register_handler(
    State(state): State<AppState>,
    Json(body): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<TokenResponse>)> {
    validate_email(&body.email)?;
    let role = body.role.unwrap_or(Role::Student);
    if !matches!(role, Role::Student | Role::Parent) {
        return Err(AppError::Validation(format!("Cannot self-register as {role}")));
    }
    let name = body
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());
    let account = state
        .auth
        .register(&body.email, &body.password, name, Some(role))
        .await?;
    let tokens = state.auth.issue_session_pair(&account)?;
    Ok((
        StatusCode::CREATED,
        Json(TokenResponse::new(tokens, state.auth.access_ttl_secs()).with_user(&account)),
    ))
}

/// `POST /auth/login` — authenticate with email + password.
///
/// A locked account answers exactly like a wrong password.
pub async fn login_handler(
    State(state): State<AppState>,
    ClientAddr(address): ClientAddr,
    Json(body): Json<LoginRequest>,
) -> AppResult<Json<TokenResponse>> {
    let login = state
        .auth
        .login(&address, &body.email, &body.password)
        .await
        .map_err(|e| match e {
            AuthError::AccountLocked { .. } => AppError::InvalidCredentials,
            other => AppError::from(other),
        })?;
    Ok(Json(
        TokenResponse::new(login.tokens, state.auth.access_ttl_secs()).with_user(&login.account),
    ))
}

/// `POST /auth/refresh` — exchange a refresh token for a new token pair.
pub async fn refresh_handler(
    State(state): State<AppState>,
    Json(body): Json<RefreshRequest>,
) -> AppResult<Json<TokenResponse>> {
    let tokens = state.auth.refresh(&body.refresh_token).await?;
    Ok(Json(TokenResponse::new(tokens, state.auth.access_ttl_secs())))
}

/// `POST /auth/logout` — revoke the presented access token, and the refresh
/// token if one is supplied. The body is optional.
pub async fn logout_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
    Extension(BearerToken(token)): Extension<BearerToken>,
    body: Option<Json<LogoutRequest>>,
) -> AppResult<StatusCode> {
    let body = body.map(|Json(body)| body).unwrap_or_default();
    state
        .auth
        .logout_session(user.user_id, &token, body.refresh_token.as_deref())
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /auth/logout-all` — end every session of the caller.
pub async fn logout_all_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
) -> AppResult<StatusCode> {
    state.auth.logout_all_devices(user.user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /auth/me`
pub async fn me_handler(
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
) -> Json<AccountContext> {
    Json(user)
}

/// `POST /auth/password/change` — returns a fresh pair; every other session
/// is ended.
pub async fn change_password_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
    Json(body): Json<ChangePasswordRequest>,
) -> AppResult<Json<TokenResponse>> {
    let tokens = state
        .auth
        .change_password(user.user_id, &body.current_password, &body.new_password)
        .await?;
    Ok(Json(TokenResponse::new(tokens, state.auth.access_ttl_secs())))
}

/// `POST /auth/password/forgot` — always 202, known email or not.
pub async fn forgot_password_handler(
    State(state): State<AppState>,
    Json(body): Json<ForgotPasswordRequest>,
) -> (StatusCode, Json<MessageResponse>) {
    if let Err(e) = state.auth.request_password_reset(&body.email).await {
        error!("password reset request failed: {e}");
    }
    (
        StatusCode::ACCEPTED,
        Json(MessageResponse::new(
            "If the address is registered, a reset link has been sent",
        )),
    )
}

/// `POST /auth/password/reset`
pub async fn reset_password_handler(
    State(state): State<AppState>,
    Json(body): Json<ResetPasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    state
        .auth
        .reset_password(&body.token, &body.new_password)
        .await?;
    Ok(Json(MessageResponse::new("Password has been reset")))
}

/// `POST /auth/verify-email`
pub async fn verify_email_handler(
    State(state): State<AppState>,
    Json(body): Json<VerifyEmailRequest>,
) -> AppResult<Json<UserInfo>> {
    let account = state.auth.verify_email(&body.token).await?;
    Ok(Json(UserInfo::from(&account)))
}

/// `POST /auth/verify-email/resend`
pub async fn resend_verification_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(user)): Extension<AuthenticatedUser>,
) -> AppResult<(StatusCode, Json<MessageResponse>)> {
    state.auth.request_email_verification(user.user_id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse::new("Verification email sent")),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_shape_is_checked() {
        assert!(validate_email("pat@school.test").is_ok());
        assert!(validate_email("  pat@school.test ").is_ok());
        assert!(validate_email("pat").is_err());
        assert!(validate_email("@school.test").is_err());
        assert!(validate_email("pat@localhost").is_err());
    }
}
