//! Authentication gate and session operations.
//!
//! [`AuthService`] composes the codec, revocation list, token versions,
//! lockout, brute-force counter and side tokens. It is the only auth type
//! the HTTP layer talks to.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::AuthError;
use super::brute_force::BruteForceCounter;
use super::config::AuthConfig;
use super::jwt::{TokenCodec, decode_unverified};
use super::lockout::{LockState, LockoutGuard};
use super::password::Passwords;
use super::revocation::{REASON_LOGOUT, REASON_ROTATED, RevocationList};
use super::side_tokens::SideTokens;
use super::to_std;
use super::token_version::TokenVersions;
use crate::clock::Clock;
use crate::models::{Account, AccountContext, NewAccount, Role, TokenClaims, TokenPair, TokenType};
use crate::notify::{Notifier, SecurityEvent, dispatch};
use crate::store::{AccountPatch, AccountStore, RevocationStore, StoreError};

/// What stopped a login attempt before credentials were checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginBlock {
    BruteForce,
    AccountLocked,
}

/// Result of [`AuthService::check_login_allowed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginAllowance {
    pub allowed: bool,
    pub retry_after: Option<StdDuration>,
    pub blocked_by: Option<LoginBlock>,
}

impl LoginAllowance {
    fn allowed() -> Self {
        Self {
            allowed: true,
            retry_after: None,
            blocked_by: None,
        }
    }

    fn blocked(by: LoginBlock, retry_after: StdDuration) -> Self {
        Self {
            allowed: false,
            retry_after: Some(retry_after),
            blocked_by: Some(by),
        }
    }
}

/// A successful login.
#[derive(Debug, Clone)]
pub struct LoginSuccess {
    pub account: Account,
    pub tokens: TokenPair,
}

/// Lowercase and trim an email address for storage and lookup.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn account_not_found(e: StoreError) -> AuthError {
    match e {
        StoreError::NotFound(_) => AuthError::AccountNotFound,
        other => AuthError::Store(other),
    }
}

pub struct AuthService {
    accounts: Arc<dyn AccountStore>,
    codec: TokenCodec,
    revocations: RevocationList,
    versions: TokenVersions,
    lockout: LockoutGuard,
    brute_force: Arc<BruteForceCounter>,
    side_tokens: SideTokens,
    passwords: Passwords,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    password_reset_ttl: Duration,
}

impl AuthService {
    pub fn new(
        config: &AuthConfig,
        accounts: Arc<dyn AccountStore>,
        revocations: Arc<dyn RevocationStore>,
        brute_force: Arc<BruteForceCounter>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AuthError> {
        Ok(Self {
            codec: TokenCodec::new(config, clock.clone())?,
            revocations: RevocationList::new(revocations, clock.clone()),
            versions: TokenVersions::new(accounts.clone()),
            lockout: LockoutGuard::new(accounts.clone(), config.lockout, clock.clone()),
            side_tokens: SideTokens::new(accounts.clone(), clock.clone()),
            passwords: Passwords::new(config.bcrypt_cost)?,
            password_reset_ttl: config.password_reset_ttl,
            accounts,
            brute_force,
            notifier,
            clock,
        })
    }

    pub fn brute_force(&self) -> &Arc<BruteForceCounter> {
        &self.brute_force
    }

    pub fn revocations(&self) -> &RevocationList {
        &self.revocations
    }

    /// Access token lifetime in seconds, for `expiresIn` fields.
    pub fn access_ttl_secs(&self) -> i64 {
        self.codec.access_ttl_secs()
    }

    pub async fn ping(&self) -> Result<(), AuthError> {
        Ok(self.accounts.ping().await?)
    }

    pub fn issue_session_pair(&self, account: &Account) -> Result<TokenPair, AuthError> {
        self.codec.issue_pair(account)
    }

    // ---------------------------------------------------------------------
    // Request authentication
    // ---------------------------------------------------------------------

    /// Validate a bearer access token and resolve the caller.
    pub async fn authenticate(&self, raw_access_token: &str) -> Result<AccountContext, AuthError> {
        let claims = self.codec.verify(raw_access_token, TokenType::Access)?;
        let account = self.session_account(&claims).await?;
        Ok(AccountContext {
            user_id: account.id,
            email: account.email.clone(),
            role: account.role,
            token_version: account.token_version,
            jti: claims.jti,
            email_verified: account.email_verified_at.is_some(),
        })
    }

    /// Checks shared by `authenticate` and `refresh` once the signature is
    /// good: revocation, account existence, version, active flag, lock.
    async fn session_account(&self, claims: &TokenClaims) -> Result<Account, AuthError> {
        if self.revocations.is_jti_revoked(&claims.jti).await? {
            return Err(AuthError::RevokedToken);
        }
        let user_id = claims.user_id().ok_or(AuthError::MalformedToken)?;
        let Some(account) = self.accounts.find_by_id(user_id).await? else {
            debug!(user_id = %user_id, "token subject no longer exists");
            return Err(AuthError::MalformedToken);
        };
        TokenVersions::check(claims, &account)?;
        if !account.is_active {
            return Err(AuthError::AccountInactive);
        }
        self.lockout.ensure_unlocked(&account)?;
        Ok(account)
    }

    // ---------------------------------------------------------------------
    // Login
    // ---------------------------------------------------------------------

    /// Record an attempt from `address` and report whether a login for
    /// `email` may proceed to the credential check.
    pub async fn check_login_allowed(
        &self,
        address: &str,
        email: &str,
    ) -> Result<LoginAllowance, AuthError> {
        if let Err(AuthError::BruteForceSuspected { retry_after }) = self.brute_force_gate(address) {
            return Ok(LoginAllowance::blocked(LoginBlock::BruteForce, retry_after));
        }
        let Some(account) = self.accounts.find_by_email(&normalize_email(email)).await? else {
            return Ok(LoginAllowance::allowed());
        };
        match self.lockout.state_of(&account) {
            LockState::Locked { until, .. } => Ok(LoginAllowance::blocked(
                LoginBlock::AccountLocked,
                to_std(until - self.clock.now()),
            )),
            LockState::Unlocked { .. } => Ok(LoginAllowance::allowed()),
        }
    }

    fn brute_force_gate(&self, address: &str) -> Result<(), AuthError> {
        if self.brute_force.record_and_check(address) {
            let retry_after = self
                .brute_force
                .retry_after(address)
                .unwrap_or_else(|| to_std(self.brute_force.policy().window));
            warn!(address, "login throttled: too many attempts from address");
            return Err(AuthError::BruteForceSuspected { retry_after });
        }
        Ok(())
    }

    /// Apply the lockout transition for a credential check outcome.
    pub async fn record_login_outcome(&self, user_id: Uuid, success: bool) -> Result<(), AuthError> {
        let account = self
            .accounts
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::AccountNotFound)?;
        if success {
            self.lockout.record_success(&account).await
        } else {
            self.on_failed_password(&account).await
        }
    }

    async fn on_failed_password(&self, account: &Account) -> Result<(), AuthError> {
        let outcome = self.lockout.record_failure(account).await?;
        if outcome.newly_locked
            && let Some(until) = outcome.counters.locked_until
        {
            dispatch(
                &self.notifier,
                SecurityEvent::AccountLocked {
                    user_id: account.id,
                    email: account.email.clone(),
                    until,
                },
            );
        }
        Ok(())
    }

    /// Full password login.
    ///
    /// The brute-force gate runs first, then the lock check, and only then
    /// the password comparison. Unknown and locked accounts still spend one
    /// bcrypt verification so response time does not reveal either.
    pub async fn login(
        &self,
        address: &str,
        email: &str,
        password: &str,
    ) -> Result<LoginSuccess, AuthError> {
        self.brute_force_gate(address)?;

        let email = normalize_email(email);
        let Some(account) = self.accounts.find_by_email(&email).await? else {
            self.passwords.burn(password);
            info!(address, "login failed: unknown email");
            return Err(AuthError::InvalidCredentials);
        };

        if let LockState::Locked { until, attempts } = self.lockout.state_of(&account) {
            self.passwords.burn(password);
            warn!(user_id = %account.id, address, attempts, "login refused: account locked");
            return Err(AuthError::AccountLocked {
                retry_after: to_std(until - self.clock.now()),
            });
        }

        if !self.passwords.verify(password, &account.password_hash)? {
            self.on_failed_password(&account).await?;
            info!(user_id = %account.id, address, "login failed: wrong password");
            return Err(AuthError::InvalidCredentials);
        }

        if !account.is_active {
            info!(user_id = %account.id, address, "login refused: account inactive");
            return Err(AuthError::AccountInactive);
        }

        self.lockout.record_success(&account).await?;
        self.accounts
            .touch_last_login(account.id, self.clock.now())
            .await?;
        let tokens = self.codec.issue_pair(&account)?;
        info!(user_id = %account.id, address, "login succeeded");
        Ok(LoginSuccess { account, tokens })
    }

    /// Exchange a refresh token for a new pair. The presented refresh token
    /// is revoked, so presenting it again fails with `RevokedToken`.
    pub async fn refresh(&self, raw_refresh_token: &str) -> Result<TokenPair, AuthError> {
        let claims = self.codec.verify(raw_refresh_token, TokenType::Refresh)?;
        let account = self.session_account(&claims).await?;
        // Loses the race against a concurrent rotation of the same token.
        if !self.revocations.revoke_claims(&claims, REASON_ROTATED).await? {
            warn!(user_id = %account.id, jti = %claims.jti, "refresh token reused");
            return Err(AuthError::RevokedToken);
        }
        debug!(user_id = %account.id, "session refreshed");
        self.codec.issue_pair(&account)
    }

    // ---------------------------------------------------------------------
    // Logout
    // ---------------------------------------------------------------------

    /// Revoke a single token. Tokens that have already expired need no
    /// entry and are accepted silently.
    pub async fn logout(&self, raw_token: &str) -> Result<(), AuthError> {
        let typ = decode_unverified(raw_token)
            .ok_or(AuthError::MalformedToken)?
            .typ;
        match self.codec.verify(raw_token, typ) {
            Ok(claims) => {
                self.revocations.revoke_claims(&claims, REASON_LOGOUT).await?;
                Ok(())
            }
            Err(AuthError::ExpiredToken) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// End the session behind `access_token` and, if given, its refresh
    /// token. The refresh token is checked before anything is revoked, so a
    /// rejected call leaves the session intact. A refresh token belonging to
    /// someone else is rejected as malformed.
    pub async fn logout_session(
        &self,
        user_id: Uuid,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> Result<(), AuthError> {
        let refresh_claims = match refresh_token {
            Some(raw) => self.owned_refresh_claims(user_id, raw)?,
            None => None,
        };
        self.logout(access_token).await?;
        if let Some(claims) = refresh_claims {
            self.revocations.revoke_claims(&claims, REASON_LOGOUT).await?;
        }
        Ok(())
    }

    /// Verified claims of a refresh token issued to `user_id`. `None` when
    /// it has already expired.
    fn owned_refresh_claims(&self, user_id: Uuid, raw: &str) -> Result<Option<TokenClaims>, AuthError> {
        let claims = match self.codec.verify(raw, TokenType::Refresh) {
            Ok(claims) => claims,
            Err(AuthError::ExpiredToken) => return Ok(None),
            Err(e) => return Err(e),
        };
        if claims.user_id() != Some(user_id) {
            warn!(user_id = %user_id, "logout with another account's refresh token");
            return Err(AuthError::MalformedToken);
        }
        Ok(Some(claims))
    }

    /// Invalidate every outstanding token of the account.
    pub async fn logout_all_devices(&self, user_id: Uuid) -> Result<i32, AuthError> {
        let version = self.versions.bump(user_id, "logout_all").await?;
        dispatch(&self.notifier, SecurityEvent::SessionsRevoked { user_id });
        Ok(version)
    }

    // ---------------------------------------------------------------------
    // Registration and passwords
    // ---------------------------------------------------------------------

    /// Create an account and send its email-verification token.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        name: Option<String>,
        role: Option<Role>,
    ) -> Result<Account, AuthError> {
        self.passwords.check_strength(password)?;
        let email = normalize_email(email);
        let password_hash = self.passwords.hash(password)?;
        let account = self
            .accounts
            .create_account(NewAccount {
                email,
                name,
                password_hash,
                role: role.unwrap_or(Role::Student),
            })
            .await
            .map_err(|e| match e {
                StoreError::DuplicateEmail(_) => AuthError::EmailTaken,
                other => AuthError::Store(other),
            })?;
        info!(user_id = %account.id, role = %account.role, "account registered");
        self.send_email_verification(&account).await?;
        Ok(account)
    }

    async fn send_email_verification(&self, account: &Account) -> Result<(), AuthError> {
        let token = self.side_tokens.issue_email_verification(account.id).await?;
        dispatch(
            &self.notifier,
            SecurityEvent::EmailVerificationRequested {
                user_id: account.id,
                email: account.email.clone(),
                token,
            },
        );
        Ok(())
    }

    /// Re-send the verification token. A no-op for verified accounts.
    pub async fn request_email_verification(&self, user_id: Uuid) -> Result<(), AuthError> {
        let account = self
            .accounts
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::AccountNotFound)?;
        if account.email_verified_at.is_some() {
            debug!(user_id = %user_id, "email already verified");
            return Ok(());
        }
        self.send_email_verification(&account).await
    }

    pub async fn verify_email(&self, token: &str) -> Result<Account, AuthError> {
        self.side_tokens
            .redeem_email_verification(token)
            .await?
            .ok_or(AuthError::SideTokenNotFoundOrExpired)
    }

    /// Start a password reset. Succeeds whether or not the email is known.
    pub async fn request_password_reset(&self, email: &str) -> Result<(), AuthError> {
        let email = normalize_email(email);
        let Some(account) = self.accounts.find_by_email(&email).await? else {
            debug!("password reset requested for unknown email");
            return Ok(());
        };
        if !account.is_active {
            info!(user_id = %account.id, "password reset requested for inactive account");
            return Ok(());
        }
        let issued = self
            .side_tokens
            .issue_password_reset(account.id, self.password_reset_ttl.num_minutes())
            .await?;
        dispatch(
            &self.notifier,
            SecurityEvent::PasswordResetRequested {
                user_id: account.id,
                email: account.email,
                token: issued.token,
                expires_at: issued.expires_at,
            },
        );
        Ok(())
    }

    /// Redeem a reset token. Every session issued before the reset dies.
    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<Account, AuthError> {
        self.passwords.check_strength(new_password)?;
        let hash = self.passwords.hash(new_password)?;
        let account = self
            .side_tokens
            .redeem_password_reset(token, &hash)
            .await?
            .ok_or(AuthError::SideTokenNotFoundOrExpired)?;
        self.versions.bump(account.id, "password_reset").await?;
        dispatch(
            &self.notifier,
            SecurityEvent::PasswordChanged {
                user_id: account.id,
                email: account.email.clone(),
            },
        );
        Ok(account)
    }

    /// Change the password of a signed-in account. Other sessions are
    /// invalidated; the returned pair keeps the caller signed in.
    pub async fn change_password(
        &self,
        user_id: Uuid,
        current_password: &str,
        new_password: &str,
    ) -> Result<TokenPair, AuthError> {
        let account = self
            .accounts
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::AccountNotFound)?;
        if !self.passwords.verify(current_password, &account.password_hash)? {
            info!(user_id = %user_id, "password change refused: wrong current password");
            return Err(AuthError::InvalidCredentials);
        }
        self.passwords.check_strength(new_password)?;
        let hash = self.passwords.hash(new_password)?;
        self.accounts
            .update_account(
                user_id,
                AccountPatch {
                    password_hash: Some(hash),
                    ..Default::default()
                },
            )
            .await
            .map_err(account_not_found)?;
        self.versions.bump(user_id, "password_change").await?;
        dispatch(
            &self.notifier,
            SecurityEvent::PasswordChanged {
                user_id,
                email: account.email,
            },
        );
        let account = self
            .accounts
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::AccountNotFound)?;
        self.codec.issue_pair(&account)
    }

    // ---------------------------------------------------------------------
    // Administration
    // ---------------------------------------------------------------------

    pub async fn unlock_account(&self, user_id: Uuid) -> Result<(), AuthError> {
        self.lockout.unlock(user_id).await.map_err(|e| match e {
            AuthError::Store(inner) => account_not_found(inner),
            other => other,
        })
    }

    /// Disable the account and kill its sessions.
    pub async fn deactivate_account(&self, user_id: Uuid) -> Result<(), AuthError> {
        self.set_active(user_id, false).await?;
        self.versions.bump(user_id, "deactivated").await?;
        dispatch(&self.notifier, SecurityEvent::AccountDeactivated { user_id });
        Ok(())
    }

    pub async fn reactivate_account(&self, user_id: Uuid) -> Result<(), AuthError> {
        self.set_active(user_id, true).await
    }

    async fn set_active(&self, user_id: Uuid, active: bool) -> Result<(), AuthError> {
        self.accounts
            .update_account(
                user_id,
                AccountPatch {
                    is_active: Some(active),
                    ..Default::default()
                },
            )
            .await
            .map_err(account_not_found)?;
        info!(user_id = %user_id, active, "account active flag changed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::*;
    use crate::auth::brute_force::BruteForcePolicy;
    use crate::auth::testing;
    use crate::clock::ManualClock;
    use crate::notify::NotifyError;
    use crate::store::memory::MemoryStore;

    const PASSWORD: &str = "correct-horse";

    struct ChannelNotifier(mpsc::UnboundedSender<SecurityEvent>);

    #[async_trait]
    impl Notifier for ChannelNotifier {
        async fn notify(&self, event: SecurityEvent) -> Result<(), NotifyError> {
            self.0
                .send(event)
                .map_err(|e| NotifyError::Delivery(e.to_string()))
        }
    }

    struct Harness {
        service: Arc<AuthService>,
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        events: mpsc::UnboundedReceiver<SecurityEvent>,
    }

    impl Harness {
        async fn next_event(&mut self) -> SecurityEvent {
            tokio::time::timeout(StdDuration::from_secs(1), self.events.recv())
                .await
                .expect("event within a second")
                .expect("channel open")
        }

        async fn account(&self, id: Uuid) -> Account {
            self.store.find_by_id(id).await.unwrap().unwrap()
        }
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let clock = testing::clock();
        let config = testing::config();
        let (tx, events) = mpsc::unbounded_channel();
        let brute_force = Arc::new(BruteForceCounter::new(BruteForcePolicy::default(), clock.clone()));
        let service = Arc::new(
            AuthService::new(
                &config,
                store.clone(),
                store.clone(),
                brute_force,
                Arc::new(ChannelNotifier(tx)),
                clock.clone(),
            )
            .unwrap(),
        );
        Harness {
            service,
            store,
            clock,
            events,
        }
    }

    #[tokio::test]
    async fn login_then_authenticate_resolves_same_identity() {
        let h = harness();
        let account = testing::seed_account(&h.store, "a@school.test", PASSWORD).await;

        let login = h.service.login("10.0.0.1", " A@School.Test ", PASSWORD).await.unwrap();
        assert_eq!(login.account.id, account.id);
        let ctx = h.service.authenticate(&login.tokens.access_token).await.unwrap();
        assert_eq!(ctx.user_id, account.id);
        assert_eq!(ctx.role, Role::Staff);
        assert!(!ctx.email_verified);
        assert!(h.account(account.id).await.last_login_at.is_some());
    }

    #[tokio::test]
    async fn refresh_token_cannot_authenticate() {
        let h = harness();
        testing::seed_account(&h.store, "b@school.test", PASSWORD).await;
        let login = h.service.login("10.0.0.1", "b@school.test", PASSWORD).await.unwrap();
        assert!(matches!(
            h.service.authenticate(&login.tokens.refresh_token).await,
            Err(AuthError::WrongTokenType)
        ));
        assert!(matches!(
            h.service.refresh(&login.tokens.access_token).await,
            Err(AuthError::WrongTokenType)
        ));
    }

    #[tokio::test]
    async fn logout_revokes_before_expiry() {
        let h = harness();
        testing::seed_account(&h.store, "c@school.test", PASSWORD).await;
        let login = h.service.login("10.0.0.1", "c@school.test", PASSWORD).await.unwrap();

        h.service.logout(&login.tokens.access_token).await.unwrap();
        h.service.logout(&login.tokens.access_token).await.unwrap();
        assert!(matches!(
            h.service.authenticate(&login.tokens.access_token).await,
            Err(AuthError::RevokedToken)
        ));
    }

    #[tokio::test]
    async fn logout_all_devices_makes_old_tokens_stale() {
        let mut h = harness();
        let account = testing::seed_account(&h.store, "d@school.test", PASSWORD).await;
        let first = h.service.login("10.0.0.1", "d@school.test", PASSWORD).await.unwrap();

        assert_eq!(h.service.logout_all_devices(account.id).await.unwrap(), 1);
        assert!(matches!(
            h.service.authenticate(&first.tokens.access_token).await,
            Err(AuthError::StaleTokenVersion)
        ));
        assert!(matches!(
            h.service.refresh(&first.tokens.refresh_token).await,
            Err(AuthError::StaleTokenVersion)
        ));
        assert_eq!(h.next_event().await.kind(), "sessions_revoked");

        let second = h.service.login("10.0.0.1", "d@school.test", PASSWORD).await.unwrap();
        assert!(h.service.authenticate(&second.tokens.access_token).await.is_ok());
    }

    #[tokio::test]
    async fn five_failures_lock_even_correct_password() {
        let mut h = harness();
        let account = testing::seed_account(&h.store, "e@school.test", PASSWORD).await;

        for _ in 0..5 {
            assert!(matches!(
                h.service.login("10.0.0.1", "e@school.test", "wrong-password").await,
                Err(AuthError::InvalidCredentials)
            ));
        }
        let locked = h.account(account.id).await;
        assert_eq!(locked.login_attempts, 5);
        assert_eq!(locked.locked_until, Some(h.clock.now() + Duration::minutes(30)));
        assert_eq!(h.next_event().await.kind(), "account_locked");

        match h.service.login("10.0.0.1", "e@school.test", PASSWORD).await {
            Err(AuthError::AccountLocked { retry_after }) => {
                assert_eq!(retry_after, StdDuration::from_secs(30 * 60));
            }
            other => panic!("expected AccountLocked, got {other:?}"),
        }
        // Further failures while locked do not move the counters.
        let _ = h.service.login("10.0.0.1", "e@school.test", "wrong-password").await;
        assert_eq!(h.account(account.id).await, locked);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_failures_lock_once_and_notify_once() {
        let mut h = harness();
        let account = testing::seed_account(&h.store, "r@school.test", PASSWORD).await;

        let mut handles = Vec::new();
        for _ in 0..10 {
            let service = h.service.clone();
            handles.push(tokio::spawn(async move {
                service.record_login_outcome(account.id, false).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let locked = h.account(account.id).await;
        assert_eq!(locked.login_attempts, 5);
        assert_eq!(locked.locked_until, Some(h.clock.now() + Duration::minutes(30)));
        assert_eq!(h.next_event().await.kind(), "account_locked");
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn lock_expiry_keeps_attempts_until_success() {
        let h = harness();
        let account = testing::seed_account(&h.store, "f@school.test", PASSWORD).await;
        for _ in 0..5 {
            let _ = h.service.login("10.0.0.1", "f@school.test", "wrong-password").await;
        }
        h.clock.advance(Duration::minutes(31));
        assert_eq!(h.account(account.id).await.login_attempts, 5);

        h.service.login("10.0.0.1", "f@school.test", PASSWORD).await.unwrap();
        let cleared = h.account(account.id).await;
        assert_eq!(cleared.login_attempts, 0);
        assert!(cleared.locked_until.is_none());
    }

    #[tokio::test]
    async fn success_below_threshold_resets_attempts() {
        let h = harness();
        let account = testing::seed_account(&h.store, "g@school.test", PASSWORD).await;
        for _ in 0..3 {
            let _ = h.service.login("10.0.0.1", "g@school.test", "wrong-password").await;
        }
        assert_eq!(h.account(account.id).await.login_attempts, 3);
        h.service.login("10.0.0.1", "g@school.test", PASSWORD).await.unwrap();
        assert_eq!(h.account(account.id).await.login_attempts, 0);
    }

    #[tokio::test]
    async fn locked_session_tokens_are_rejected_until_unlock() {
        let h = harness();
        let account = testing::seed_account(&h.store, "h@school.test", PASSWORD).await;
        let login = h.service.login("10.0.0.1", "h@school.test", PASSWORD).await.unwrap();
        for _ in 0..5 {
            h.service.record_login_outcome(account.id, false).await.unwrap();
        }
        assert!(matches!(
            h.service.authenticate(&login.tokens.access_token).await,
            Err(AuthError::AccountLocked { .. })
        ));

        h.service.unlock_account(account.id).await.unwrap();
        assert!(h.service.authenticate(&login.tokens.access_token).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_email_is_invalid_credentials() {
        let h = harness();
        assert!(matches!(
            h.service.login("10.0.0.1", "nobody@school.test", PASSWORD).await,
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn brute_force_gate_trips_on_twenty_first_attempt() {
        let h = harness();
        for _ in 0..20 {
            assert!(matches!(
                h.service.login("10.0.0.7", "nobody@school.test", PASSWORD).await,
                Err(AuthError::InvalidCredentials)
            ));
        }
        match h.service.login("10.0.0.7", "nobody@school.test", PASSWORD).await {
            Err(AuthError::BruteForceSuspected { retry_after }) => {
                assert_eq!(retry_after, StdDuration::from_secs(15 * 60));
            }
            other => panic!("expected BruteForceSuspected, got {other:?}"),
        }
        // Other addresses are unaffected.
        assert!(matches!(
            h.service.login("10.0.0.8", "nobody@school.test", PASSWORD).await,
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[tokio::test]
    async fn check_login_allowed_reports_lock() {
        let h = harness();
        let account = testing::seed_account(&h.store, "i@school.test", PASSWORD).await;
        assert_eq!(
            h.service.check_login_allowed("10.0.0.1", "i@school.test").await.unwrap(),
            LoginAllowance::allowed()
        );
        for _ in 0..5 {
            h.service.record_login_outcome(account.id, false).await.unwrap();
        }
        let allowance = h.service.check_login_allowed("10.0.0.1", "i@school.test").await.unwrap();
        assert!(!allowance.allowed);
        assert_eq!(allowance.blocked_by, Some(LoginBlock::AccountLocked));
        assert_eq!(allowance.retry_after, Some(StdDuration::from_secs(30 * 60)));
    }

    #[tokio::test]
    async fn refresh_rotates_and_rejects_reuse() {
        let h = harness();
        testing::seed_account(&h.store, "j@school.test", PASSWORD).await;
        let login = h.service.login("10.0.0.1", "j@school.test", PASSWORD).await.unwrap();

        let rotated = h.service.refresh(&login.tokens.refresh_token).await.unwrap();
        assert_ne!(rotated.refresh_token, login.tokens.refresh_token);
        assert!(h.service.authenticate(&rotated.access_token).await.is_ok());
        assert!(matches!(
            h.service.refresh(&login.tokens.refresh_token).await,
            Err(AuthError::RevokedToken)
        ));
        assert!(h.service.refresh(&rotated.refresh_token).await.is_ok());
    }

    #[tokio::test]
    async fn expired_access_token_is_rejected() {
        let h = harness();
        testing::seed_account(&h.store, "k@school.test", PASSWORD).await;
        let login = h.service.login("10.0.0.1", "k@school.test", PASSWORD).await.unwrap();
        h.clock.advance(Duration::hours(2));
        assert!(matches!(
            h.service.authenticate(&login.tokens.access_token).await,
            Err(AuthError::ExpiredToken)
        ));
        // Logging out an expired token is a no-op.
        h.service.logout(&login.tokens.access_token).await.unwrap();
    }

    #[tokio::test]
    async fn deactivation_kills_sessions_and_blocks_login() {
        let mut h = harness();
        let account = testing::seed_account(&h.store, "l@school.test", PASSWORD).await;
        let login = h.service.login("10.0.0.1", "l@school.test", PASSWORD).await.unwrap();

        h.service.deactivate_account(account.id).await.unwrap();
        assert_eq!(h.next_event().await.kind(), "account_deactivated");
        assert!(matches!(
            h.service.authenticate(&login.tokens.access_token).await,
            Err(AuthError::StaleTokenVersion)
        ));
        assert!(matches!(
            h.service.login("10.0.0.1", "l@school.test", PASSWORD).await,
            Err(AuthError::AccountInactive)
        ));

        h.service.reactivate_account(account.id).await.unwrap();
        assert!(h.service.login("10.0.0.1", "l@school.test", PASSWORD).await.is_ok());
    }

    #[tokio::test]
    async fn register_sends_verification_and_rejects_duplicates() {
        let mut h = harness();
        let account = h
            .service
            .register("New@School.Test", PASSWORD, Some("New Parent".into()), Some(Role::Parent))
            .await
            .unwrap();
        assert_eq!(account.email, "new@school.test");
        assert_eq!(account.role, Role::Parent);

        let SecurityEvent::EmailVerificationRequested { token, .. } = h.next_event().await else {
            panic!("expected verification event");
        };
        let verified = h.service.verify_email(&token).await.unwrap();
        assert!(verified.email_verified_at.is_some());
        assert!(matches!(
            h.service.verify_email(&token).await,
            Err(AuthError::SideTokenNotFoundOrExpired)
        ));

        assert!(matches!(
            h.service.register("new@school.test", PASSWORD, None, None).await,
            Err(AuthError::EmailTaken)
        ));
        assert!(matches!(
            h.service.register("other@school.test", "short", None, None).await,
            Err(AuthError::WeakPassword(_))
        ));
    }

    #[tokio::test]
    async fn password_reset_is_single_use_and_kills_sessions() {
        let mut h = harness();
        let account = testing::seed_account(&h.store, "m@school.test", PASSWORD).await;
        let login = h.service.login("10.0.0.1", "m@school.test", PASSWORD).await.unwrap();

        h.service.request_password_reset("M@school.test").await.unwrap();
        let SecurityEvent::PasswordResetRequested { token, .. } = h.next_event().await else {
            panic!("expected reset event");
        };
        h.service.reset_password(&token, "brand-new-password").await.unwrap();
        assert_eq!(h.next_event().await.kind(), "password_changed");
        assert!(matches!(
            h.service.reset_password(&token, "another-password").await,
            Err(AuthError::SideTokenNotFoundOrExpired)
        ));
        assert!(matches!(
            h.service.authenticate(&login.tokens.access_token).await,
            Err(AuthError::StaleTokenVersion)
        ));
        assert_eq!(h.account(account.id).await.token_version, 1);
        assert!(h.service.login("10.0.0.1", "m@school.test", "brand-new-password").await.is_ok());
    }

    #[tokio::test]
    async fn password_reset_expires_after_ttl() {
        let mut h = harness();
        testing::seed_account(&h.store, "n@school.test", PASSWORD).await;
        h.service.request_password_reset("n@school.test").await.unwrap();
        let SecurityEvent::PasswordResetRequested { token, .. } = h.next_event().await else {
            panic!("expected reset event");
        };
        h.clock.advance(Duration::minutes(61));
        assert!(matches!(
            h.service.reset_password(&token, "brand-new-password").await,
            Err(AuthError::SideTokenNotFoundOrExpired)
        ));
    }

    #[tokio::test]
    async fn password_reset_for_unknown_email_is_silent() {
        let mut h = harness();
        h.service.request_password_reset("ghost@school.test").await.unwrap();
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn change_password_requires_current_and_returns_fresh_pair() {
        let h = harness();
        let account = testing::seed_account(&h.store, "o@school.test", PASSWORD).await;
        let login = h.service.login("10.0.0.1", "o@school.test", PASSWORD).await.unwrap();

        assert!(matches!(
            h.service.change_password(account.id, "not-it", "brand-new-password").await,
            Err(AuthError::InvalidCredentials)
        ));
        let fresh = h
            .service
            .change_password(account.id, PASSWORD, "brand-new-password")
            .await
            .unwrap();
        assert!(h.service.authenticate(&fresh.access_token).await.is_ok());
        assert!(matches!(
            h.service.authenticate(&login.tokens.access_token).await,
            Err(AuthError::StaleTokenVersion)
        ));
    }

    #[tokio::test]
    async fn logout_with_foreign_refresh_token_revokes_nothing() {
        let h = harness();
        let alice = testing::seed_account(&h.store, "p@school.test", PASSWORD).await;
        let bob = testing::seed_account(&h.store, "q@school.test", PASSWORD).await;
        let alices = h.service.login("10.0.0.1", "p@school.test", PASSWORD).await.unwrap();
        let bobs = h.service.login("10.0.0.1", "q@school.test", PASSWORD).await.unwrap();

        assert!(matches!(
            h.service
                .logout_session(alice.id, &alices.tokens.access_token, Some(&bobs.tokens.refresh_token))
                .await,
            Err(AuthError::MalformedToken)
        ));
        // Neither Alice's access token nor Bob's refresh token was touched.
        h.service.authenticate(&alices.tokens.access_token).await.unwrap();

        h.service
            .logout_session(bob.id, &bobs.tokens.access_token, Some(&bobs.tokens.refresh_token))
            .await
            .unwrap();
        assert!(matches!(
            h.service.authenticate(&bobs.tokens.access_token).await,
            Err(AuthError::RevokedToken)
        ));
        assert!(matches!(
            h.service.refresh(&bobs.tokens.refresh_token).await,
            Err(AuthError::RevokedToken)
        ));
    }

    #[tokio::test]
    async fn logout_session_without_refresh_token() {
        let h = harness();
        let account = testing::seed_account(&h.store, "s@school.test", PASSWORD).await;
        let login = h.service.login("10.0.0.1", "s@school.test", PASSWORD).await.unwrap();

        h.service
            .logout_session(account.id, &login.tokens.access_token, None)
            .await
            .unwrap();
        assert!(matches!(
            h.service.authenticate(&login.tokens.access_token).await,
            Err(AuthError::RevokedToken)
        ));
        // The refresh token is left alone.
        h.service.refresh(&login.tokens.refresh_token).await.unwrap();
    }

    #[tokio::test]
    async fn admin_operations_on_unknown_account() {
        let h = harness();
        let ghost = Uuid::new_v4();
        assert!(matches!(h.service.unlock_account(ghost).await, Err(AuthError::AccountNotFound)));
        assert!(matches!(
            h.service.deactivate_account(ghost).await,
            Err(AuthError::AccountNotFound)
        ));
    }
}
