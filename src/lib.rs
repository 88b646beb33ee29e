//! # Vidtube (user accounts)
//!
//! `vidtube` serves the user-account API of the vidtube video backend:
//! registration, login/logout, token refresh, password changes and profile
//! updates.
//!
//! ## Tokens
//!
//! Login issues a pair of HS256-signed JWTs. The short-lived **access token**
//! authenticates requests (cookie `accessToken` or `Authorization: Bearer`).
//! The longer-lived **refresh token** is stored server-side as a SHA-256 hash
//! and is rotated every time it is exchanged for a new pair, so a refresh token
//! can be used exactly once.
//!
//! ## Images
//!
//! Avatar and cover image are URLs of assets hosted elsewhere. This service
//! never receives image bytes.

pub mod api;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }
}
