//! Auth building blocks shared by the user-account handlers.
//!
//! ## Token rotation
//!
//! Login stores the SHA-256 hash of the refresh token it hands out. Exchanging
//! a refresh token swaps that hash for the hash of the new token in a single
//! conditional `UPDATE`, so a refresh token is accepted at most once and two
//! concurrent refreshes cannot both win. Logout clears the hash.

pub(crate) mod cookies;
pub(crate) mod password;
pub(crate) mod principal;
mod state;
pub(crate) mod storage;
pub(crate) mod token;
pub(crate) mod types;
pub(crate) mod utils;

pub use state::{AuthConfig, AuthState};
pub use token::{TokenError, TokenKind, TokenPair, TokenSigner};
