//! Account administration handlers. Mounted behind `require_admin`.

use axum::Extension;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use tracing::info;
use uuid::Uuid;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthenticatedUser;

/// `POST /admin/users/{id}/unlock` — clear lockout state.
pub async fn unlock_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(admin)): Extension<AuthenticatedUser>,
    Path(user_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state.auth.unlock_account(user_id).await?;
    info!(admin_id = %admin.user_id, user_id = %user_id, "admin unlocked account");
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /admin/users/{id}/deactivate` — disable the account and end its
/// sessions.
pub async fn deactivate_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(admin)): Extension<AuthenticatedUser>,
    Path(user_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    if user_id == admin.user_id {
        return Err(AppError::Validation("Cannot deactivate your own account".into()));
    }
    state.auth.deactivate_account(user_id).await?;
    info!(admin_id = %admin.user_id, user_id = %user_id, "admin deactivated account");
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /admin/users/{id}/reactivate`
pub async fn reactivate_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(admin)): Extension<AuthenticatedUser>,
    Path(user_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    state.auth.reactivate_account(user_id).await?;
    info!(admin_id = %admin.user_id, user_id = %user_id, "admin reactivated account");
    Ok(StatusCode::NO_CONTENT)
}
