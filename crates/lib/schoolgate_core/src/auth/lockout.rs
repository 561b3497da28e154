//! Per-account lockout after consecutive failed logins.
//!
//! States are `Unlocked { attempts }` and `Locked { until }`. A lock reads as
//! unlocked once `until` has passed, but the stored attempt count is only
//! cleared by a successful login or an explicit unlock. A failure after
//! expiry therefore re-locks immediately with a fresh window.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use super::{AuthError, to_std};
use crate::clock::Clock;
use crate::models::Account;
use crate::store::AccountStore;

/// Threshold and lock length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    pub max_attempts: i32,
    pub lock_duration: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            lock_duration: Duration::minutes(30),
        }
    }
}

/// Persisted lockout fields of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoginCounters {
    pub attempts: i32,
    pub locked_until: Option<DateTime<Utc>>,
}

impl LoginCounters {
    pub fn of(account: &Account) -> Self {
        Self {
            attempts: account.login_attempts,
            locked_until: account.locked_until,
        }
    }
}

/// Effective lock state at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unlocked { attempts: i32 },
    Locked { until: DateTime<Utc>, attempts: i32 },
}

impl LockState {
    pub fn is_locked(&self) -> bool {
        matches!(self, LockState::Locked { .. })
    }
}

impl LockoutPolicy {
    /// Read the effective state.
    pub fn state(&self, counters: LoginCounters, now: DateTime<Utc>) -> LockState {
        match counters.locked_until {
            Some(until) if until > now => LockState::Locked {
                until,
                attempts: counters.attempts,
            },
            _ => LockState::Unlocked {
                attempts: counters.attempts,
            },
        }
    }

    /// Counters after one failed credential check.
    ///
    /// A failure recorded while still locked leaves the counters untouched;
    /// it neither extends the window nor moves the count past the threshold.
    pub fn after_failure(&self, counters: LoginCounters, now: DateTime<Utc>) -> LoginCounters {
        if self.state(counters, now).is_locked() {
            return counters;
        }
        let attempts = counters.attempts.saturating_add(1);
        if attempts >= self.max_attempts {
            LoginCounters {
                attempts: self.max_attempts,
                locked_until: Some(now + self.lock_duration),
            }
        } else {
            LoginCounters {
                attempts,
                locked_until: counters.locked_until,
            }
        }
    }
}

/// Result of recording a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureOutcome {
    /// Counters after the failure. When the account was already locked this
    /// is the caller's snapshot.
    pub counters: LoginCounters,
    /// This failure tipped the account into the locked state. At most one
    /// of any number of concurrent failures sees `true`.
    pub newly_locked: bool,
}

/// Lockout operations against the account store.
#[derive(Clone)]
pub struct LockoutGuard {
    accounts: Arc<dyn AccountStore>,
    policy: LockoutPolicy,
    clock: Arc<dyn Clock>,
}

impl LockoutGuard {
    pub fn new(accounts: Arc<dyn AccountStore>, policy: LockoutPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            accounts,
            policy,
            clock,
        }
    }

    pub fn state_of(&self, account: &Account) -> LockState {
        self.policy
            .state(LoginCounters::of(account), self.clock.now())
    }

    /// `Err(AccountLocked)` while the lock window is open.
    pub fn ensure_unlocked(&self, account: &Account) -> Result<(), AuthError> {
        match self.state_of(account) {
            LockState::Locked { until, .. } => Err(AuthError::AccountLocked {
                retry_after: to_std(until - self.clock.now()),
            }),
            LockState::Unlocked { .. } => Ok(()),
        }
    }

    /// Atomically count a failed attempt.
    pub async fn record_failure(&self, account: &Account) -> Result<FailureOutcome, AuthError> {
        let now = self.clock.now();
        let Some(counters) = self
            .accounts
            .record_failed_login(account.id, &self.policy, now)
            .await?
        else {
            info!(user_id = %account.id, "failed login while locked");
            return Ok(FailureOutcome {
                counters: LoginCounters::of(account),
                newly_locked: false,
            });
        };
        let newly_locked = self.policy.state(counters, now).is_locked();
        if newly_locked {
            warn!(
                user_id = %account.id,
                attempts = counters.attempts,
                locked_until = ?counters.locked_until,
                "account locked after repeated failed logins"
            );
        } else {
            info!(user_id = %account.id, attempts = counters.attempts, "failed login recorded");
        }
        Ok(FailureOutcome {
            counters,
            newly_locked,
        })
    }

    /// Clear counters after a successful login. Skips the write when there
    /// is nothing to clear.
    pub async fn record_success(&self, account: &Account) -> Result<(), AuthError> {
        if account.login_attempts == 0 && account.locked_until.is_none() {
            return Ok(());
        }
        self.accounts.reset_login_attempts(account.id).await?;
        Ok(())
    }

    /// Administrative unlock, regardless of elapsed time.
    pub async fn unlock(&self, user_id: Uuid) -> Result<(), AuthError> {
        self.accounts.reset_login_attempts(user_id).await?;
        info!(user_id = %user_id, "account unlocked");
        Ok(())
    }
}
