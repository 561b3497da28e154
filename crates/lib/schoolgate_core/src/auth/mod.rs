//! Authentication and account-security logic.
//!
//! Components, leaf first:
//!
//! - [`secure_token`]: random opaque tokens for single-use flows
//! - [`jwt`]: signed access/refresh token codec
//! - [`revocation`]: per-`jti` blacklist
//! - [`token_version`]: bulk invalidation via a per-account counter
//! - [`lockout`]: consecutive-failure lockout per account
//! - [`brute_force`]: sliding-window throttle per client address
//! - [`side_tokens`]: email verification and password reset
//! - [`gate`]: the composition consumed by the HTTP layer

pub mod brute_force;
pub mod config;
pub mod gate;
pub mod jwt;
pub mod lockout;
pub mod password;
pub mod revocation;
pub mod secure_token;
pub mod side_tokens;
pub mod token_version;

use std::time::Duration;

use thiserror::Error;

use crate::store::StoreError;

pub use config::AuthConfig;
pub use gate::{AuthService, LoginAllowance, LoginBlock, LoginSuccess};

/// Authentication errors.
///
/// Every variant except `Store`, `Config` and `Internal` is a recoverable
/// condition the caller maps to a 4xx response.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Malformed token")]
    MalformedToken,

    #[error("Token expired")]
    ExpiredToken,

    #[error("Wrong token type")]
    WrongTokenType,

    #[error("Token revoked")]
    RevokedToken,

    #[error("Stale token version")]
    StaleTokenVersion,

    #[error("Account inactive")]
    AccountInactive,

    #[error("Account locked, retry after {}s", retry_after.as_secs())]
    AccountLocked { retry_after: Duration },

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Too many attempts, retry after {}s", retry_after.as_secs())]
    BruteForceSuspected { retry_after: Duration },

    #[error("Token not found or expired")]
    SideTokenNotFoundOrExpired,

    #[error("Email already registered")]
    EmailTaken,

    #[error("Weak password: {0}")]
    WeakPassword(String),

    #[error("Account not found")]
    AccountNotFound,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Retry hint carried by throttling variants.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AuthError::AccountLocked { retry_after }
            | AuthError::BruteForceSuspected { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Convert a non-negative chrono delta into a std duration, clamping
/// negatives to zero.
pub(crate) fn to_std(delta: chrono::Duration) -> Duration {
    delta.to_std().unwrap_or(Duration::ZERO)
}
