//! Auth configuration.

use std::fmt;
use std::str::FromStr;

use chrono::{Duration, Utc};

use super::AuthError;
use super::brute_force::BruteForcePolicy;
use super::lockout::LockoutPolicy;
use super::password::BCRYPT_COST;

/// Access token lifetime: 1 hour.
pub const DEFAULT_ACCESS_EXPIRY_SECS: i64 = 60 * 60;

/// Refresh token lifetime: 7 days.
pub const DEFAULT_REFRESH_EXPIRY_SECS: i64 = 7 * 24 * 60 * 60;

/// Password-reset token lifetime: 60 minutes.
pub const DEFAULT_PASSWORD_RESET_TTL_MINUTES: i64 = 60;

pub const DEFAULT_ISSUER: &str = "schoolgate";
pub const DEFAULT_AUDIENCE: &str = "schoolgate-api";

/// Settings for token signing, lockout, throttling and side tokens.
#[derive(Clone)]
pub struct AuthConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub issuer: String,
    pub audience: String,
    pub lockout: LockoutPolicy,
    pub brute_force: BruteForcePolicy,
    pub password_reset_ttl: Duration,
    pub bcrypt_cost: u32,
}

impl AuthConfig {
    /// Config with the given secrets and default everything else.
    pub fn new(access_secret: impl Into<String>, refresh_secret: impl Into<String>) -> Self {
        Self {
            access_secret: access_secret.into(),
            refresh_secret: refresh_secret.into(),
            access_ttl: Duration::seconds(DEFAULT_ACCESS_EXPIRY_SECS),
            refresh_ttl: Duration::seconds(DEFAULT_REFRESH_EXPIRY_SECS),
            issuer: DEFAULT_ISSUER.to_string(),
            audience: DEFAULT_AUDIENCE.to_string(),
            lockout: LockoutPolicy::default(),
            brute_force: BruteForcePolicy::default(),
            password_reset_ttl: Duration::minutes(DEFAULT_PASSWORD_RESET_TTL_MINUTES),
            bcrypt_cost: BCRYPT_COST,
        }
    }

    /// Read configuration from environment variables.
    ///
    /// | Variable                      | Default            |
    /// |-------------------------------|--------------------|
    /// | `JWT_ACCESS_SECRET`           | required           |
    /// | `JWT_REFRESH_SECRET`          | required           |
    /// | `JWT_ACCESS_EXPIRY_SECS`      | `3600`             |
    /// | `JWT_REFRESH_EXPIRY_SECS`     | `604800`           |
    /// | `JWT_ISSUER`                  | `schoolgate`       |
    /// | `JWT_AUDIENCE`                | `schoolgate-api`   |
    /// | `MAX_LOGIN_ATTEMPTS`          | `5`                |
    /// | `LOCKOUT_DURATION_MINUTES`    | `30`               |
    /// | `BRUTE_FORCE_WINDOW_MINUTES`  | `15`               |
    /// | `BRUTE_FORCE_MAX_PER_WINDOW`  | `20`               |
    /// | `PASSWORD_RESET_TTL_MINUTES`  | `60`               |
    /// | `BCRYPT_COST`                 | `10`               |
    pub fn from_env() -> Result<Self, AuthError> {
        let defaults = Self::new(String::new(), String::new());
        let config = Self {
            access_secret: required("JWT_ACCESS_SECRET")?,
            refresh_secret: required("JWT_REFRESH_SECRET")?,
            access_ttl: duration_or(
                "JWT_ACCESS_EXPIRY_SECS",
                DEFAULT_ACCESS_EXPIRY_SECS,
                Duration::try_seconds,
            )?,
            refresh_ttl: duration_or(
                "JWT_REFRESH_EXPIRY_SECS",
                DEFAULT_REFRESH_EXPIRY_SECS,
                Duration::try_seconds,
            )?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or(defaults.issuer),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or(defaults.audience),
            lockout: LockoutPolicy {
                max_attempts: parsed_or("MAX_LOGIN_ATTEMPTS", defaults.lockout.max_attempts)?,
                lock_duration: duration_or(
                    "LOCKOUT_DURATION_MINUTES",
                    defaults.lockout.lock_duration.num_minutes(),
                    Duration::try_minutes,
                )?,
            },
            brute_force: BruteForcePolicy {
                window: duration_or(
                    "BRUTE_FORCE_WINDOW_MINUTES",
                    defaults.brute_force.window.num_minutes(),
                    Duration::try_minutes,
                )?,
                max_per_window: parsed_or(
                    "BRUTE_FORCE_MAX_PER_WINDOW",
                    defaults.brute_force.max_per_window,
                )?,
            },
            password_reset_ttl: duration_or(
                "PASSWORD_RESET_TTL_MINUTES",
                DEFAULT_PASSWORD_RESET_TTL_MINUTES,
                Duration::try_minutes,
            )?,
            bcrypt_cost: parsed_or("BCRYPT_COST", BCRYPT_COST)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the core cannot run safely with.
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.access_secret.is_empty() || self.refresh_secret.is_empty() {
            return Err(AuthError::Config("token secrets must not be empty".into()));
        }
        if self.access_secret == self.refresh_secret {
            return Err(AuthError::Config(
                "access and refresh secrets must differ".into(),
            ));
        }
        if self.access_ttl <= Duration::zero() || self.refresh_ttl <= Duration::zero() {
            return Err(AuthError::Config("token lifetimes must be positive".into()));
        }
        if self.lockout.max_attempts < 1 {
            return Err(AuthError::Config("MAX_LOGIN_ATTEMPTS must be at least 1".into()));
        }
        if self.lockout.lock_duration <= Duration::zero()
            || self.brute_force.window <= Duration::zero()
            || self.password_reset_ttl <= Duration::zero()
        {
            return Err(AuthError::Config("durations must be positive".into()));
        }
        // Expiry timestamps are computed as `now + ttl`.
        let now = Utc::now();
        let longest = [
            self.access_ttl,
            self.refresh_ttl,
            self.lockout.lock_duration,
            self.brute_force.window,
            self.password_reset_ttl,
        ];
        if longest.iter().any(|d| now.checked_add_signed(*d).is_none()) {
            return Err(AuthError::Config("durations are out of range".into()));
        }
        Ok(())
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("access_secret", &"<redacted>")
            .field("refresh_secret", &"<redacted>")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("lockout", &self.lockout)
            .field("brute_force", &self.brute_force)
            .field("password_reset_ttl", &self.password_reset_ttl)
            .field("bcrypt_cost", &self.bcrypt_cost)
            .finish()
    }
}

fn required(key: &str) -> Result<String, AuthError> {
    match std::env::var(key) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(AuthError::Config(format!("{key} is not set"))),
    }
}

fn parsed_or<T: FromStr>(key: &str, default: T) -> Result<T, AuthError> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| AuthError::Config(format!("{key}: cannot parse '{raw}'"))),
        _ => Ok(default),
    }
}

/// Read an integer setting and convert it with `unit`, rejecting values
/// the duration type cannot hold.
fn duration_or(
    key: &str,
    default: i64,
    unit: fn(i64) -> Option<Duration>,
) -> Result<Duration, AuthError> {
    let raw = parsed_or(key, default)?;
    unit(raw).ok_or_else(|| AuthError::Config(format!("{key}: {raw} is out of range")))
}
