//! Token revocation list.
//!
//! Entries are keyed by `jti` and live until the token's own expiry; after
//! that the token is rejected on `exp` alone and the row is bookkeeping that
//! the periodic sweep removes.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use tracing::{debug, info, warn};

use super::AuthError;
use super::jwt::decode_unverified;
use crate::clock::Clock;
use crate::models::{RevocationEntry, TokenClaims};
use crate::store::RevocationStore;

/// Reason recorded on explicit logout.
pub const REASON_LOGOUT: &str = "logout";

/// Reason recorded when a refresh token is exchanged for a new pair.
pub const REASON_ROTATED: &str = "rotated";

#[derive(Clone)]
pub struct RevocationList {
    store: Arc<dyn RevocationStore>,
    clock: Arc<dyn Clock>,
}

impl RevocationList {
    pub fn new(store: Arc<dyn RevocationStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Revoke a raw token. The token must have been verified upstream; only
    /// `jti`, `sub` and `exp` are read from it here.
    ///
    /// Revoking the same token twice is a no-op.
    pub async fn revoke(&self, token: &str, reason: &str) -> Result<(), AuthError> {
        let claims = decode_unverified(token).ok_or(AuthError::MalformedToken)?;
        self.revoke_claims(&claims, reason).await.map(|_| ())
    }

    /// Revoke by already-decoded claims. Returns `true` if this call created
    /// the entry, `false` if the `jti` was already revoked.
    pub async fn revoke_claims(
        &self,
        claims: &TokenClaims,
        reason: &str,
    ) -> Result<bool, AuthError> {
        let user_id = claims.user_id().ok_or(AuthError::MalformedToken)?;
        let expires_at = claims.expires_at().ok_or(AuthError::MalformedToken)?;
        let entry = RevocationEntry {
            jti: claims.jti.clone(),
            user_id,
            reason: reason.to_string(),
            expires_at,
            revoked_at: self.clock.now(),
        };
        let inserted = self.store.insert_revocation(&entry).await?;
        if inserted {
            info!(user_id = %user_id, jti = %entry.jti, reason, "token revoked");
        } else {
            debug!(jti = %entry.jti, "token already revoked");
        }
        Ok(inserted)
    }

    /// Whether a raw token's `jti` is on the list.
    pub async fn is_revoked(&self, token: &str) -> Result<bool, AuthError> {
        let claims = decode_unverified(token).ok_or(AuthError::MalformedToken)?;
        self.is_jti_revoked(&claims.jti).await
    }

    pub async fn is_jti_revoked(&self, jti: &str) -> Result<bool, AuthError> {
        Ok(self.store.is_revoked(jti, self.clock.now()).await?)
    }

    /// Delete entries whose tokens have expired anyway.
    pub async fn sweep_expired(&self) -> Result<u64, AuthError> {
        let removed = self.store.delete_expired(self.clock.now()).await?;
        if removed > 0 {
            info!(removed, "swept expired revocation entries");
        }
        Ok(removed)
    }

    /// Spawn a periodic sweep.
    pub fn spawn_sweep_task(&self, every: StdDuration) -> tokio::task::JoinHandle<()> {
        let list = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                if let Err(e) = list.sweep_expired().await {
                    warn!("revocation sweep failed: {e}");
                }
            }
        })
    }
}
