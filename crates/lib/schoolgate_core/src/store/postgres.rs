//! PostgreSQL store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use super::{AccountPatch, AccountStore, RevocationStore, StoreError};
use crate::auth::lockout::{LockoutPolicy, LoginCounters};
use crate::models::{Account, NewAccount, RevocationEntry};

/// Column list matching [`AccountRow`].
const ACCOUNT_COLUMNS: &str = "id, email, name, password_hash, role, is_active, token_version, \
     login_attempts, locked_until, email_verified_at, email_verification_token_hash, \
     password_reset_token_hash, password_reset_expires, last_login_at, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct AccountRow {
    id: Uuid,
    email: String,
    name: Option<String>,
    password_hash: String,
    role: String,
    is_active: bool,
    token_version: i32,
    login_attempts: i32,
    locked_until: Option<DateTime<Utc>>,
    email_verified_at: Option<DateTime<Utc>>,
    email_verification_token_hash: Option<String>,
    password_reset_token_hash: Option<String>,
    password_reset_expires: Option<DateTime<Utc>>,
    last_login_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AccountRow> for Account {
    type Error = StoreError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        let role = row
            .role
            .parse()
            .map_err(|e: String| StoreError::Corrupt(format!("users.role for {}: {e}", row.id)))?;
        Ok(Account {
            id: row.id,
            email: row.email,
            name: row.name,
            password_hash: row.password_hash,
            role,
            is_active: row.is_active,
            token_version: row.token_version,
            login_attempts: row.login_attempts,
            locked_until: row.locked_until,
            email_verified_at: row.email_verified_at,
            email_verification_token_hash: row.email_verification_token_hash,
            password_reset_token_hash: row.password_reset_token_hash,
            password_reset_expires: row.password_reset_expires,
            last_login_at: row.last_login_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_account(row: Option<AccountRow>) -> Result<Option<Account>, StoreError> {
    row.map(Account::try_from).transpose()
}

/// sqlx-backed implementation of both store traits.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_account_where(
        &self,
        predicate: &str,
        value: &str,
    ) -> Result<Option<Account>, StoreError> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM users WHERE {predicate} = $1");
        let row = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?;
        into_account(row)
    }
}

#[async_trait]
impl AccountStore for PgStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn create_account(&self, new: NewAccount) -> Result<Account, StoreError> {
        let sql = format!(
            "INSERT INTO users (id, email, name, password_hash, role) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (email) DO NOTHING \
             RETURNING {ACCOUNT_COLUMNS}"
        );
        let row = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(Uuid::now_v7())
            .bind(&new.email)
            .bind(&new.name)
            .bind(&new.password_hash)
            .bind(new.role.as_str())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => row.try_into(),
            None => Err(StoreError::DuplicateEmail(new.email)),
        }
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Account>, StoreError> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        into_account(row)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        self.fetch_account_where("email", email).await
    }

    async fn update_account(&self, id: Uuid, patch: AccountPatch) -> Result<Account, StoreError> {
        let mut qb = QueryBuilder::<Postgres>::new("UPDATE users SET updated_at = now()");
        if let Some(hash) = patch.password_hash {
            qb.push(", password_hash = ").push_bind(hash);
        }
        if let Some(name) = patch.name {
            qb.push(", name = ").push_bind(name);
        }
        if let Some(role) = patch.role {
            qb.push(", role = ").push_bind(role.as_str());
        }
        if let Some(active) = patch.is_active {
            qb.push(", is_active = ").push_bind(active);
        }
        if let Some(at) = patch.email_verified_at {
            qb.push(", email_verified_at = ").push_bind(at);
        }
        if let Some(token) = patch.email_verification_token_hash {
            qb.push(", email_verification_token_hash = ").push_bind(token);
        }
        if let Some(token) = patch.password_reset_token_hash {
            qb.push(", password_reset_token_hash = ").push_bind(token);
        }
        if let Some(expires) = patch.password_reset_expires {
            qb.push(", password_reset_expires = ").push_bind(expires);
        }
        qb.push(" WHERE id = ")
            .push_bind(id)
            .push(" RETURNING ")
            .push(ACCOUNT_COLUMNS);

        let row = qb
            .build_query_as::<AccountRow>()
            .fetch_optional(&self.pool)
            .await?;
        row.ok_or(StoreError::NotFound(id))?.try_into()
    }

    async fn increment_token_version(&self, id: Uuid) -> Result<i32, StoreError> {
        let version = sqlx::query_scalar::<_, i32>(
            "UPDATE users SET token_version = token_version + 1, updated_at = now() \
             WHERE id = $1 RETURNING token_version",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        version.ok_or(StoreError::NotFound(id))
    }

    async fn record_failed_login(
        &self,
        id: Uuid,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> Result<Option<LoginCounters>, StoreError> {
        // Locked rows are filtered out, so concurrent failures racing the
        // threshold serialize on the row and only one of them sets the lock.
        // Right-hand sides see the pre-update row.
        let row = sqlx::query_as::<_, (i32, Option<DateTime<Utc>>)>(
            "UPDATE users SET \
               login_attempts = LEAST(login_attempts + 1, $2), \
               locked_until = CASE \
                 WHEN login_attempts + 1 >= $2 THEN $4 \
                 ELSE locked_until END, \
               updated_at = now() \
             WHERE id = $1 AND (locked_until IS NULL OR locked_until <= $3) \
             RETURNING login_attempts, locked_until",
        )
        .bind(id)
        .bind(policy.max_attempts)
        .bind(now)
        .bind(now + policy.lock_duration)
        .fetch_optional(&self.pool)
        .await?;
        if let Some((attempts, locked_until)) = row {
            return Ok(Some(LoginCounters {
                attempts,
                locked_until,
            }));
        }
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        if exists {
            Ok(None)
        } else {
            Err(StoreError::NotFound(id))
        }
    }

    async fn reset_login_attempts(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE users SET login_attempts = 0, locked_until = NULL, updated_at = now() \
             WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    async fn touch_last_login(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET last_login_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn consume_email_verification_token(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Account>, StoreError> {
        let sql = format!(
            "UPDATE users SET email_verification_token_hash = NULL, email_verified_at = $2, \
               updated_at = now() \
             WHERE email_verification_token_hash = $1 \
             RETURNING {ACCOUNT_COLUMNS}"
        );
        let row = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(token_hash)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
        into_account(row)
    }

    async fn find_by_password_reset_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<Account>, StoreError> {
        self.fetch_account_where("password_reset_token_hash", token_hash)
            .await
    }

    async fn complete_password_reset(
        &self,
        token_hash: &str,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Account>, StoreError> {
        let sql = format!(
            "UPDATE users SET password_hash = $2, password_reset_token_hash = NULL, \
               password_reset_expires = NULL, login_attempts = 0, locked_until = NULL, \
               updated_at = now() \
             WHERE password_reset_token_hash = $1 AND password_reset_expires > $3 \
             RETURNING {ACCOUNT_COLUMNS}"
        );
        let row = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(token_hash)
            .bind(password_hash)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;
        into_account(row)
    }
}

#[async_trait]
impl RevocationStore for PgStore {
    async fn insert_revocation(&self, entry: &RevocationEntry) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO token_revocations (jti, user_id, reason, expires_at, revoked_at) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (jti) DO NOTHING",
        )
        .bind(&entry.jti)
        .bind(entry.user_id)
        .bind(&entry.reason)
        .bind(entry.expires_at)
        .bind(entry.revoked_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn is_revoked(&self, jti: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM token_revocations WHERE jti = $1 AND expires_at > $2)",
        )
        .bind(jti)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM token_revocations WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
