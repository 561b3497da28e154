//! # schoolgate_core
//!
//! Authentication and account-security core for Schoolgate.
//!
//! Session tokens, revocation, token versions, lockout, brute-force
//! throttling and single-use side tokens live under [`auth`]; persistence is
//! abstracted behind the traits in [`store`].

pub mod auth;
pub mod clock;
pub mod migrate;
pub mod models;
pub mod notify;
pub mod store;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_not_empty() {
        assert!(!version().is_empty());
    }
}
