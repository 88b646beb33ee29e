//! Authenticated principal extraction.
//!
//! Flow Overview: read the access token (cookie first, then bearer header),
//! verify it, and load the user it names. Every protected handler starts here.

use axum::http::HeaderMap;
use sqlx::PgPool;
use tracing::debug;

use super::{
    cookies::extract_access_token,
    state::AuthState,
    storage::{UserRecord, find_user},
    token::TokenKind,
    utils::now_unix_seconds,
};
use crate::api::handlers::response::ApiError;

/// Resolve the request's access token into the current user, or 401.
///
/// # Errors
/// Returns `ApiError::Unauthorized` when the token is missing, invalid,
/// expired, or names a user that no longer exists.
pub(crate) async fn require_auth(
    headers: &HeaderMap,
    pool: &PgPool,
    auth_state: &AuthState,
) -> Result<UserRecord, ApiError> {
    let Some(token) = extract_access_token(headers) else {
        return Err(ApiError::unauthorized("Unauthorized request"));
    };

    let claims = auth_state
        .signer()
        .verify(&token, TokenKind::Access, now_unix_seconds())
        .map_err(|err| {
            debug!("Access token rejected: {err}");
            ApiError::unauthorized("Invalid access token")
        })?;

    find_user(pool, claims.sub)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid access token"))
}
