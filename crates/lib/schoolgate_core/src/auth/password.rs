//! Password hashing via bcrypt.

use super::AuthError;

/// bcrypt cost factor used in production.
pub const BCRYPT_COST: u32 = 10;

/// Minimum accepted password length.
pub const MIN_PASSWORD_LEN: usize = 8;

/// Fixed input for the decoy hash.
const DUMMY_PASSWORD: &str = "schoolgate-dummy-password";

/// bcrypt hasher with a decoy hash for timing equalisation.
#[derive(Debug, Clone)]
pub struct Passwords {
    cost: u32,
    dummy_hash: String,
}

impl Passwords {
    /// Build a hasher. Computes the decoy hash once, at the same cost as
    /// real hashes.
    pub fn new(cost: u32) -> Result<Self, AuthError> {
        let dummy_hash = bcrypt::hash(DUMMY_PASSWORD, cost)
            .map_err(|e| AuthError::Config(format!("bcrypt cost {cost}: {e}")))?;
        Ok(Self { cost, dummy_hash })
    }

    /// Hash a password.
    pub fn hash(&self, password: &str) -> Result<String, AuthError> {
        bcrypt::hash(password, self.cost)
            .map_err(|e| AuthError::Internal(format!("bcrypt hash: {e}")))
    }

    /// Verify a password against a bcrypt hash.
    pub fn verify(&self, password: &str, hash: &str) -> Result<bool, AuthError> {
        bcrypt::verify(password, hash)
            .map_err(|e| AuthError::Internal(format!("bcrypt verify: {e}")))
    }

    /// Spend the time of one verification without looking at any real
    /// credential. Used when the account is unknown or locked.
    pub fn burn(&self, password: &str) {
        let _ = bcrypt::verify(password, &self.dummy_hash);
    }

    /// Reject passwords that are too short or blank.
    pub fn check_strength(&self, password: &str) -> Result<(), AuthError> {
        if password.trim().is_empty() {
            return Err(AuthError::WeakPassword("password must not be blank".into()));
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakPassword(format!(
                "password must be at least {MIN_PASSWORD_LEN} characters"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify() {
        let passwords = Passwords::new(4).unwrap();
        let hash = passwords.hash("correct horse").unwrap();
        assert!(passwords.verify("correct horse", &hash).unwrap());
        assert!(!passwords.verify("wrong horse", &hash).unwrap());
    }

    #[test]
    fn invalid_cost_is_a_config_error() {
        assert!(matches!(Passwords::new(99), Err(AuthError::Config(_))));
    }

    #[test]
    fn short_password_is_weak() {
        let passwords = Passwords::new(4).unwrap();
        assert!(matches!(
            passwords.check_strength("short"),
            Err(AuthError::WeakPassword(_))
        ));
        assert!(passwords.check_strength("long enough").is_ok());
    }
}
