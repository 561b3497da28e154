//! Persistence interface consumed by the auth core.
//!
//! Every counter mutation (`token_version`, `login_attempts`,
//! `locked_until`) is a single atomic operation in each backend; the core
//! never does read-then-write on those fields.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::auth::lockout::{LockoutPolicy, LoginCounters};
use crate::models::{Account, NewAccount, RevocationEntry, Role};

/// Errors raised by store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("Email already registered: {0}")]
    DuplicateEmail(String),

    #[error("Account not found: {0}")]
    NotFound(Uuid),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

/// Partial update of an account.
///
/// Outer `None` leaves a field untouched; `Some(None)` clears a nullable
/// field.
#[derive(Debug, Clone, Default)]
pub struct AccountPatch {
    pub password_hash: Option<String>,
    pub name: Option<Option<String>>,
    pub role: Option<Role>,
    pub is_active: Option<bool>,
    pub email_verified_at: Option<Option<DateTime<Utc>>>,
    pub email_verification_token_hash: Option<Option<String>>,
    pub password_reset_token_hash: Option<Option<String>>,
    pub password_reset_expires: Option<Option<DateTime<Utc>>>,
}

impl AccountPatch {
    /// Apply the patch to an in-memory account.
    pub fn apply(self, account: &mut Account) {
        if let Some(hash) = self.password_hash {
            account.password_hash = hash;
        }
        if let Some(name) = self.name {
            account.name = name;
        }
        if let Some(role) = self.role {
            account.role = role;
        }
        if let Some(active) = self.is_active {
            account.is_active = active;
        }
        if let Some(at) = self.email_verified_at {
            account.email_verified_at = at;
        }
        if let Some(token) = self.email_verification_token_hash {
            account.email_verification_token_hash = token;
        }
        if let Some(token) = self.password_reset_token_hash {
            account.password_reset_token_hash = token;
        }
        if let Some(expires) = self.password_reset_expires {
            account.password_reset_expires = expires;
        }
    }
}

/// Account persistence.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Cheap connectivity probe.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Insert a new account. Fails with `DuplicateEmail` if the email exists.
    async fn create_account(&self, new: NewAccount) -> Result<Account, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, StoreError>;

    /// Lookup by (already normalised) email.
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError>;

    /// Apply a partial update, returning the updated account.
    async fn update_account(&self, id: Uuid, patch: AccountPatch) -> Result<Account, StoreError>;

    /// Atomically add one to `token_version`, returning the new value.
    async fn increment_token_version(&self, id: Uuid) -> Result<i32, StoreError>;

    /// Atomically apply [`LockoutPolicy::after_failure`] to the stored
    /// counters. Returns the new counters, or `None` if the account was
    /// already locked at `now` and nothing changed.
    async fn record_failed_login(
        &self,
        id: Uuid,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> Result<Option<LoginCounters>, StoreError>;

    /// Zero `login_attempts` and clear `locked_until`.
    async fn reset_login_attempts(&self, id: Uuid) -> Result<(), StoreError>;

    async fn touch_last_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Clear the verification token and stamp `email_verified_at`, only if
    /// `token_hash` matches the outstanding one.
    async fn consume_email_verification_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Account>, StoreError>;

    async fn find_by_password_reset_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<Account>, StoreError>;

    /// Set the new password hash, clear the reset fields and the lockout
    /// counters, only if `token_hash` is outstanding and unexpired at `now`.
    async fn complete_password_reset(
        &self,
        token_hash: &str,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Account>, StoreError>;
}

/// Revocation-list persistence.
#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// Insert an entry. Returns `false` if the `jti` was already present
    /// (the existing entry is kept).
    async fn insert_revocation(&self, entry: &RevocationEntry) -> Result<bool, StoreError>;

    /// Whether `jti` has an entry that has not yet expired at `now`.
    async fn is_revoked(&self, jti: &str, now: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Delete entries past their `expires_at`. Returns rows removed.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}
