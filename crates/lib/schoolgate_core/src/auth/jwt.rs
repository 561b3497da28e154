//! JWT access/refresh token generation and verification.
//!
//! Both token types are HS256 with distinct secrets. The verifier pins the
//! algorithm; the `alg` header of an incoming token is never trusted.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::debug;
use uuid::Uuid;

use super::AuthError;
use super::config::AuthConfig;
use crate::clock::Clock;
use crate::models::{Account, TokenClaims, TokenPair, TokenType};

const ALGORITHM: Algorithm = Algorithm::HS256;

/// Signing material for one token type.
struct KeyPair {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl KeyPair {
    fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl,
        }
    }
}

/// Issues and verifies session tokens.
pub struct TokenCodec {
    access: KeyPair,
    refresh: KeyPair,
    issuer: String,
    audience: String,
    clock: Arc<dyn Clock>,
}

impl TokenCodec {
    pub fn new(config: &AuthConfig, clock: Arc<dyn Clock>) -> Result<Self, AuthError> {
        config.validate()?;
        Ok(Self {
            access: KeyPair::new(&config.access_secret, config.access_ttl),
            refresh: KeyPair::new(&config.refresh_secret, config.refresh_ttl),
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            clock,
        })
    }

    fn keys(&self, typ: TokenType) -> &KeyPair {
        match typ {
            TokenType::Access => &self.access,
            TokenType::Refresh => &self.refresh,
        }
    }

    /// Lifetime of the access token in seconds.
    pub fn access_ttl_secs(&self) -> i64 {
        self.access.ttl.num_seconds()
    }

    /// Issue an access + refresh pair stamped with the account's current
    /// token version.
    pub fn issue_pair(&self, account: &Account) -> Result<TokenPair, AuthError> {
        let (access_token, access_expires_at) = self.issue(account, TokenType::Access)?;
        let (refresh_token, refresh_expires_at) = self.issue(account, TokenType::Refresh)?;
        Ok(TokenPair {
            access_token,
            refresh_token,
            access_expires_at,
            refresh_expires_at,
        })
    }

    fn issue(
        &self,
        account: &Account,
        typ: TokenType,
    ) -> Result<(String, DateTime<Utc>), AuthError> {
        let keys = self.keys(typ);
        let now = self.clock.now();
        let expires_at = now + keys.ttl;
        let claims = TokenClaims {
            sub: account.id.to_string(),
            role: account.role,
            ver: account.token_version,
            typ,
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::new(ALGORITHM), &claims, &keys.encoding)
            .map_err(|e| AuthError::Internal(format!("jwt encode: {e}")))?;
        Ok((token, expires_at))
    }

    /// Verify signature, issuer, audience, type and expiry.
    pub fn verify(&self, token: &str, expected: TokenType) -> Result<TokenClaims, AuthError> {
        // Type is checked before the signature so a token of the other
        // type is reported as such instead of as a bad signature.
        let unverified = decode_unverified(token).ok_or(AuthError::MalformedToken)?;
        if unverified.typ != expected {
            return Err(AuthError::WrongTokenType);
        }

        let mut validation = Validation::new(ALGORITHM);
        // Expiry is checked below against the injected clock.
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "iat", "sub", "iss", "aud"]);

        let data = decode::<TokenClaims>(token, &self.keys(expected).decoding, &validation)
            .map_err(|e| {
                match e.kind() {
                    ErrorKind::InvalidSignature => debug!("token signature mismatch"),
                    ErrorKind::InvalidAlgorithm => debug!("token algorithm not accepted"),
                    ErrorKind::InvalidIssuer | ErrorKind::InvalidAudience => {
                        debug!("token issuer/audience mismatch")
                    }
                    kind => debug!(?kind, "token rejected"),
                }
                AuthError::MalformedToken
            })?;

        let claims = data.claims;
        if claims.exp <= self.clock.now().timestamp() {
            return Err(AuthError::ExpiredToken);
        }
        Ok(claims)
    }
}

/// Decode claims without checking the signature or expiry.
///
/// Only for bookkeeping such as building a revocation entry. Never use the
/// result to authorize anything.
pub fn decode_unverified(token: &str) -> Option<TokenClaims> {
    let mut validation = Validation::new(ALGORITHM);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.set_required_spec_claims::<&str>(&[]);
    decode::<TokenClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .ok()
        .map(|data| data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::testing;
    use crate::clock::ManualClock;
    use crate::models::Role;

    fn account(version: i32) -> Account {
        let now = Utc::now();
        Account {
            id: Uuid::new_v4(),
            email: "teacher@school.test".into(),
            name: None,
            password_hash: String::new(),
            role: Role::Staff,
            is_active: true,
            token_version: version,
            login_attempts: 0,
            locked_until: None,
            email_verified_at: None,
            email_verification_token_hash: None,
            password_reset_token_hash: None,
            password_reset_expires: None,
            last_login_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn codec(clock: Arc<ManualClock>) -> TokenCodec {
        TokenCodec::new(&testing::config(), clock).unwrap()
    }

    #[test]
    fn issued_access_token_verifies() {
        let codec = codec(testing::clock());
        let account = account(3);
        let pair = codec.issue_pair(&account).unwrap();

        let claims = codec.verify(&pair.access_token, TokenType::Access).unwrap();
        assert_eq!(claims.user_id(), Some(account.id));
        assert_eq!(claims.role, Role::Staff);
        assert_eq!(claims.ver, 3);
        assert_eq!(claims.typ, TokenType::Access);
    }

    #[test]
    fn access_and_refresh_have_distinct_jti() {
        let codec = codec(testing::clock());
        let pair = codec.issue_pair(&account(0)).unwrap();
        let access = decode_unverified(&pair.access_token).unwrap();
        let refresh = decode_unverified(&pair.refresh_token).unwrap();
        assert_ne!(access.jti, refresh.jti);
        assert!(pair.refresh_expires_at > pair.access_expires_at);
    }

    #[test]
    fn refresh_token_is_not_accepted_as_access() {
        let codec = codec(testing::clock());
        let pair = codec.issue_pair(&account(0)).unwrap();
        assert!(matches!(
            codec.verify(&pair.refresh_token, TokenType::Access),
            Err(AuthError::WrongTokenType)
        ));
        assert!(matches!(
            codec.verify(&pair.access_token, TokenType::Refresh),
            Err(AuthError::WrongTokenType)
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let clock = testing::clock();
        let codec = codec(clock.clone());
        let pair = codec.issue_pair(&account(0)).unwrap();
        clock.advance(Duration::hours(1) + Duration::seconds(1));
        assert!(matches!(
            codec.verify(&pair.access_token, TokenType::Access),
            Err(AuthError::ExpiredToken)
        ));
        // Refresh still has days to live.
        assert!(codec.verify(&pair.refresh_token, TokenType::Refresh).is_ok());
    }

    #[test]
    fn garbage_is_malformed() {
        let codec = codec(testing::clock());
        assert!(matches!(
            codec.verify("not-a-jwt", TokenType::Access),
            Err(AuthError::MalformedToken)
        ));
    }

    #[test]
    fn tampered_signature_is_malformed() {
        let codec = codec(testing::clock());
        let pair = codec.issue_pair(&account(0)).unwrap();
        let mut tampered = pair.access_token.clone();
        let last = tampered.pop().unwrap();
        tampered.push(if last == 'A' { 'B' } else { 'A' });
        assert!(matches!(
            codec.verify(&tampered, TokenType::Access),
            Err(AuthError::MalformedToken)
        ));
    }

    #[test]
    fn token_signed_with_other_secret_is_malformed() {
        let clock = testing::clock();
        let ours = codec(clock.clone());
        let mut other_config = testing::config();
        other_config.access_secret = "some-other-access-secret".into();
        let theirs = TokenCodec::new(&other_config, clock).unwrap();

        let pair = theirs.issue_pair(&account(0)).unwrap();
        assert!(matches!(
            ours.verify(&pair.access_token, TokenType::Access),
            Err(AuthError::MalformedToken)
        ));
    }

    #[test]
    fn alg_none_is_rejected() {
        let clock = testing::clock();
        let codec = codec(clock.clone());
        let pair = codec.issue_pair(&account(0)).unwrap();
        let payload = pair.access_token.split('.').nth(1).unwrap();
        // {"alg":"none","typ":"JWT"}
        let forged = format!("eyJhbGciOiJub25lIiwidHlwIjoiSldUIn0.{payload}.");
        assert!(matches!(
            codec.verify(&forged, TokenType::Access),
            Err(AuthError::MalformedToken)
        ));
    }

    #[test]
    fn hs512_header_is_rejected() {
        let clock = testing::clock();
        let codec = codec(clock.clone());
        let account = account(0);
        let claims = decode_unverified(&codec.issue_pair(&account).unwrap().access_token).unwrap();
        let forged = encode(
            &Header::new(Algorithm::HS512),
            &claims,
            &EncodingKey::from_secret(testing::config().access_secret.as_bytes()),
        )
        .unwrap();
        assert!(matches!(
            codec.verify(&forged, TokenType::Access),
            Err(AuthError::MalformedToken)
        ));
    }

    #[test]
    fn wrong_audience_is_malformed() {
        let clock = testing::clock();
        let codec = codec(clock.clone());
        let mut other_config = testing::config();
        other_config.audience = "another-app".into();
        let other = TokenCodec::new(&other_config, clock).unwrap();
        let pair = other.issue_pair(&account(0)).unwrap();
        assert!(matches!(
            codec.verify(&pair.access_token, TokenType::Access),
            Err(AuthError::MalformedToken)
        ));
    }

    #[test]
    fn decode_unverified_ignores_signature() {
        let clock = testing::clock();
        let mut other_config = testing::config();
        other_config.access_secret = "unknown-secret".into();
        let other = TokenCodec::new(&other_config, clock).unwrap();
        let pair = other.issue_pair(&account(7)).unwrap();
        let claims = decode_unverified(&pair.access_token).unwrap();
        assert_eq!(claims.ver, 7);
        assert!(decode_unverified("nonsense").is_none());
    }
}
