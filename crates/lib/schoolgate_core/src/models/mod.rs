//! Domain models shared by the auth core, the stores and the HTTP layer.

pub mod account;
pub mod token;

pub use account::{Account, AccountContext, NewAccount, Role};
pub use token::{RevocationEntry, TokenClaims, TokenPair, TokenType};
