//! Email-verification and password-reset tokens.
//!
//! Both are opaque random strings. Only their SHA-256 digest is stored on
//! the account, and it is cleared on redemption. Callers see `None` for both "unknown" and "expired"; the two
//! cases are only told apart in the logs.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use super::AuthError;
use super::secure_token::{self, SIDE_TOKEN_BYTES, hash_token};
use crate::clock::Clock;
use crate::models::Account;
use crate::store::{AccountPatch, AccountStore, StoreError};

/// Issued password-reset token.
#[derive(Debug, Clone)]
pub struct PasswordResetToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SideTokens {
    accounts: Arc<dyn AccountStore>,
    clock: Arc<dyn Clock>,
}

/// Short, non-reversible tag for log lines.
fn fingerprint(token: &str) -> String {
    hash_token(token)[..12].to_string()
}

fn not_found(e: StoreError) -> AuthError {
    match e {
        StoreError::NotFound(_) => AuthError::AccountNotFound,
        other => AuthError::Store(other),
    }
}

impl SideTokens {
    pub fn new(accounts: Arc<dyn AccountStore>, clock: Arc<dyn Clock>) -> Self {
        Self { accounts, clock }
    }

    /// Issue a verification token, replacing any outstanding one.
    pub async fn issue_email_verification(&self, user_id: Uuid) -> Result<String, AuthError> {
        let token = secure_token::generate(SIDE_TOKEN_BYTES);
        self.accounts
            .update_account(
                user_id,
                AccountPatch {
                    email_verification_token_hash: Some(Some(hash_token(&token))),
                    ..Default::default()
                },
            )
            .await
            .map_err(not_found)?;
        debug!(user_id = %user_id, token = %fingerprint(&token), "email verification issued");
        Ok(token)
    }

    /// Redeem a verification token: clears it and stamps
    /// `email_verified_at`.
    pub async fn redeem_email_verification(
        &self,
        token: &str,
    ) -> Result<Option<Account>, AuthError> {
        if token.is_empty() {
            return Ok(None);
        }
        let account = self
            .accounts
            .consume_email_verification_token(&hash_token(token), self.clock.now())
            .await?;
        match &account {
            Some(account) => info!(user_id = %account.id, "email verified"),
            None => debug!(token = %fingerprint(token), "email verification token not found"),
        }
        Ok(account)
    }

    /// Issue a reset token valid for `ttl_minutes`, replacing any
    /// outstanding one.
    pub async fn issue_password_reset(
        &self,
        user_id: Uuid,
        ttl_minutes: i64,
    ) -> Result<PasswordResetToken, AuthError> {
        let token = secure_token::generate(SIDE_TOKEN_BYTES);
        let expires_at = self.clock.now() + Duration::minutes(ttl_minutes);
        self.accounts
            .update_account(
                user_id,
                AccountPatch {
                    password_reset_token_hash: Some(Some(hash_token(&token))),
                    password_reset_expires: Some(Some(expires_at)),
                    ..Default::default()
                },
            )
            .await
            .map_err(not_found)?;
        debug!(user_id = %user_id, token = %fingerprint(&token), %expires_at, "password reset issued");
        Ok(PasswordResetToken { token, expires_at })
    }

    /// Redeem a reset token, storing `new_password_hash`.
    ///
    /// The token is consumed atomically, so concurrent or repeated
    /// redemptions succeed at most once. The caller must bump the token
    /// version afterwards.
    pub async fn redeem_password_reset(
        &self,
        token: &str,
        new_password_hash: &str,
    ) -> Result<Option<Account>, AuthError> {
        if token.is_empty() {
            return Ok(None);
        }
        let now = self.clock.now();
        let token_hash = hash_token(token);
        match self.accounts.find_by_password_reset_token(&token_hash).await? {
            None => {
                debug!(token = %fingerprint(token), "password reset token not found");
                return Ok(None);
            }
            Some(account) if !account.password_reset_expires.is_some_and(|exp| exp > now) => {
                info!(user_id = %account.id, "password reset token expired");
                return Ok(None);
            }
            Some(_) => {}
        }
        let account = self
            .accounts
            .complete_password_reset(&token_hash, new_password_hash, now)
            .await?;
        match &account {
            Some(account) => info!(user_id = %account.id, "password reset completed"),
            None => debug!(token = %fingerprint(token), "password reset token consumed concurrently"),
        }
        Ok(account)
    }
}
