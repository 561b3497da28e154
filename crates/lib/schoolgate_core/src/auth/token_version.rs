//! Bulk session invalidation through the per-account token version.
//!
//! Every token carries the account's `token_version` at issuance. Bumping
//! the stored value makes every outstanding token stale at once, without
//! enumerating them.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use super::AuthError;
use crate::models::{Account, TokenClaims};
use crate::store::{AccountStore, StoreError};

#[derive(Clone)]
pub struct TokenVersions {
    accounts: Arc<dyn AccountStore>,
}

impl TokenVersions {
    pub fn new(accounts: Arc<dyn AccountStore>) -> Self {
        Self { accounts }
    }

    /// Atomically increment the account's version, returning the new value.
    pub async fn bump(&self, user_id: Uuid, reason: &str) -> Result<i32, AuthError> {
        let version = self
            .accounts
            .increment_token_version(user_id)
            .await
            .map_err(|e| match e {
                StoreError::NotFound(_) => AuthError::AccountNotFound,
                other => AuthError::Store(other),
            })?;
        info!(user_id = %user_id, version, reason, "token version bumped");
        Ok(version)
    }

    /// `Err(StaleTokenVersion)` unless the token was issued at the current
    /// version.
    pub fn check(claims: &TokenClaims, account: &Account) -> Result<(), AuthError> {
        if claims.ver != account.token_version {
            return Err(AuthError::StaleTokenVersion);
        }
        Ok(())
    }
}
