//! In-process store backed by mutex-guarded maps.
//!
//! Each operation holds the lock for its whole read-modify-write, which gives
//! the same atomicity as the single-statement SQL in [`super::postgres`].

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{AccountPatch, AccountStore, RevocationStore, StoreError};
use crate::auth::lockout::{LockoutPolicy, LoginCounters};
use crate::models::{Account, NewAccount, RevocationEntry};

#[derive(Debug, Default)]
pub struct MemoryStore {
    accounts: Mutex<HashMap<Uuid, Account>>,
    revocations: Mutex<HashMap<String, RevocationEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of revocation entries, expired or not.
    pub async fn revocation_count(&self) -> usize {
        self.revocations.lock().await.len()
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn create_account(&self, new: NewAccount) -> Result<Account, StoreError> {
        let mut accounts = self.accounts.lock().await;
        if accounts.values().any(|a| a.email == new.email) {
            return Err(StoreError::DuplicateEmail(new.email));
        }
        let now = Utc::now();
        let account = Account {
            id: Uuid::now_v7(),
            email: new.email,
            name: new.name,
            password_hash: new.password_hash,
            role: new.role,
            is_active: true,
            token_version: 0,
            login_attempts: 0,
            locked_until: None,
            email_verified_at: None,
            email_verification_token_hash: None,
            password_reset_token_hash: None,
            password_reset_expires: None,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        };
        accounts.insert(account.id, account.clone());
        Ok(account)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        Ok(self.accounts.lock().await.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        Ok(self
            .accounts
            .lock()
            .await
            .values()
            .find(|a| a.email == email)
            .cloned())
    }

    async fn update_account(&self, id: Uuid, patch: AccountPatch) -> Result<Account, StoreError> {
        let mut accounts = self.accounts.lock().await;
        let account = accounts.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        patch.apply(account);
        account.updated_at = Utc::now();
        Ok(account.clone())
    }

    async fn increment_token_version(&self, id: Uuid) -> Result<i32, StoreError> {
        let mut accounts = self.accounts.lock().await;
        let account = accounts.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        account.token_version += 1;
        account.updated_at = Utc::now();
        Ok(account.token_version)
    }

    async fn record_failed_login(
        &self,
        id: Uuid,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> Result<Option<LoginCounters>, StoreError> {
        let mut accounts = self.accounts.lock().await;
        let account = accounts.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let current = LoginCounters::of(account);
        if policy.state(current, now).is_locked() {
            return Ok(None);
        }
        let next = policy.after_failure(current, now);
        account.login_attempts = next.attempts;
        account.locked_until = next.locked_until;
        account.updated_at = now;
        Ok(Some(next))
    }

    async fn reset_login_attempts(&self, id: Uuid) -> Result<(), StoreError> {
        let mut accounts = self.accounts.lock().await;
        let account = accounts.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        account.login_attempts = 0;
        account.locked_until = None;
        Ok(())
    }

    async fn touch_last_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut accounts = self.accounts.lock().await;
        let account = accounts.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        account.last_login_at = Some(at);
        Ok(())
    }

    async fn consume_email_verification_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Account>, StoreError> {
        let mut accounts = self.accounts.lock().await;
        let Some(account) = accounts
            .values_mut()
            .find(|a| a.email_verification_token_hash.as_deref() == Some(token_hash))
        else {
            return Ok(None);
        };
        account.email_verification_token_hash = None;
        account.email_verified_at = Some(now);
        account.updated_at = now;
        Ok(Some(account.clone()))
    }

    async fn find_by_password_reset_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<Account>, StoreError> {
        Ok(self
            .accounts
            .lock()
            .await
            .values()
            .find(|a| a.password_reset_token_hash.as_deref() == Some(token_hash))
            .cloned())
    }

    async fn complete_password_reset(
        &self,
        token_hash: &str,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Account>, StoreError> {
        let mut accounts = self.accounts.lock().await;
        let Some(account) = accounts.values_mut().find(|a| {
            a.password_reset_token_hash.as_deref() == Some(token_hash)
                && a.password_reset_expires.is_some_and(|exp| exp > now)
        }) else {
            return Ok(None);
        };
        account.password_hash = password_hash.to_string();
        account.password_reset_token_hash = None;
        account.password_reset_expires = None;
        account.login_attempts = 0;
        account.locked_until = None;
        account.updated_at = now;
        Ok(Some(account.clone()))
    }
}

#[async_trait]
impl RevocationStore for MemoryStore {
    async fn insert_revocation(&self, entry: &RevocationEntry) -> Result<bool, StoreError> {
        let mut revocations = self.revocations.lock().await;
        if revocations.contains_key(&entry.jti) {
            return Ok(false);
        }
        revocations.insert(entry.jti.clone(), entry.clone());
        Ok(true)
    }

    async fn is_revoked(&self, jti: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        Ok(self
            .revocations
            .lock()
            .await
            .get(jti)
            .is_some_and(|e| e.expires_at > now))
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut revocations = self.revocations.lock().await;
        let before = revocations.len();
        revocations.retain(|_, e| e.expires_at > now);
        Ok((before - revocations.len()) as u64)
    }
}
