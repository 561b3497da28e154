//! Authentication middleware — Bearer token extraction and session checks.

use axum::http::header::AUTHORIZATION;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use schoolgate_core::models::AccountContext;

use crate::AppState;
use crate::error::AppError;

/// Caller identity, stored in request extensions by [`require_auth`].
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub AccountContext);

/// The raw bearer token that authenticated the request. Logout revokes it.
#[derive(Clone)]
pub struct BearerToken(pub String);

/// Axum middleware: extracts `Authorization: Bearer <token>`, runs the full
/// session check and injects [`AuthenticatedUser`] and [`BearerToken`].
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing authorization header".into()))?;

    let token = header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Unauthorized("Invalid authorization scheme".into()))?
        .to_string();

    let context = state.auth.authenticate(&token).await?;

    request.extensions_mut().insert(AuthenticatedUser(context));
    request.extensions_mut().insert(BearerToken(token));

    Ok(next.run(request).await)
}

/// Axum middleware: rejects callers without the admin role. Must run after
/// [`require_auth`].
pub async fn require_admin(request: Request, next: Next) -> Result<Response, AppError> {
    let user = request
        .extensions()
        .get::<AuthenticatedUser>()
        .ok_or_else(|| AppError::Unauthorized("Not authenticated".into()))?;
    if !user.0.is_admin() {
        return Err(AppError::Forbidden("Admin role required".into()));
    }
    Ok(next.run(request).await)
}
