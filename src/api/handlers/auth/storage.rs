//! Database helpers for user accounts and refresh-token state.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::Instrument;
use utoipa::ToSchema;
use uuid::Uuid;

use super::utils::is_unique_violation;

// Public columns only; password and refresh-token hashes are selected explicitly where needed.
macro_rules! user_columns {
    () => {
        r#"
            id,
            username,
            email,
            fullname,
            avatar,
            cover_image,
            to_char(created_at AT TIME ZONE 'utc', 'YYYY-MM-DD"T"HH24:MI:SS"Z"') AS created_at,
            to_char(updated_at AT TIME ZONE 'utc', 'YYYY-MM-DD"T"HH24:MI:SS"Z"') AS updated_at
        "#
    };
}

/// Public view of a user; safe to serialize in responses.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub fullname: String,
    pub avatar: String,
    pub cover_image: String,
    pub created_at: String,
    pub updated_at: String,
}

/// User plus the stored password hash, used only by login.
pub(crate) struct CredentialRecord {
    pub(crate) user: UserRecord,
    pub(crate) password_hash: String,
}

pub(crate) struct NewUser<'a> {
    pub(crate) username: &'a str,
    pub(crate) email: &'a str,
    pub(crate) fullname: &'a str,
    pub(crate) avatar: &'a str,
    pub(crate) cover_image: &'a str,
    pub(crate) password_hash: &'a str,
}

#[derive(Debug)]
pub(crate) enum WriteOutcome {
    Written(UserRecord),
    Conflict,
    NotFound,
}

fn user_from_row(row: &PgRow) -> Result<UserRecord, sqlx::Error> {
    Ok(UserRecord {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        fullname: row.try_get("fullname")?,
        avatar: row.try_get("avatar")?,
        cover_image: row.try_get("cover_image")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn db_span(operation: &'static str, statement: &'static str) -> tracing::Span {
    tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

/// Check whether the email or the username is already taken.
pub(crate) async fn user_exists(pool: &PgPool, email: &str, username: &str) -> Result<bool> {
    let query = "SELECT EXISTS(SELECT 1 FROM users WHERE email = $1 OR username = $2) AS exists";
    let row = sqlx::query(query)
        .bind(email)
        .bind(username)
        .fetch_one(pool)
        .instrument(db_span("SELECT", query))
        .await
        .context("failed to check if user exists")?;

    row.try_get("exists").context("failed to read exists column")
}

/// Insert a user; a unique violation (email/username race) maps to `Conflict`.
pub(crate) async fn insert_user(pool: &PgPool, user: &NewUser<'_>) -> Result<WriteOutcome> {
    let query = concat!(
        "INSERT INTO users (username, email, fullname, avatar, cover_image, password_hash) ",
        "VALUES ($1, $2, $3, $4, $5, $6) RETURNING ",
        user_columns!()
    );
    let result = sqlx::query(query)
        .bind(user.username)
        .bind(user.email)
        .bind(user.fullname)
        .bind(user.avatar)
        .bind(user.cover_image)
        .bind(user.password_hash)
        .fetch_one(pool)
        .instrument(db_span("INSERT", query))
        .await;

    match result {
        Ok(row) => Ok(WriteOutcome::Written(
            user_from_row(&row).context("failed to decode inserted user")?,
        )),
        Err(err) if is_unique_violation(&err) => Ok(WriteOutcome::Conflict),
        Err(err) => Err(err).context("failed to insert user"),
    }
}

/// Look up a user by email or username for login. When both are given and
/// name different users, the email match wins.
pub(crate) async fn find_credentials(
    pool: &PgPool,
    email: Option<&str>,
    username: Option<&str>,
) -> Result<Option<CredentialRecord>> {
    let query = concat!(
        "SELECT password_hash, ",
        user_columns!(),
        " FROM users WHERE email = $1 OR username = $2",
        " ORDER BY (email = $1) IS TRUE DESC LIMIT 1"
    );
    let row = sqlx::query(query)
        .bind(email)
        .bind(username)
        .fetch_optional(pool)
        .instrument(db_span("SELECT", query))
        .await
        .context("failed to lookup login record")?;

    row.map(|row| -> Result<CredentialRecord> {
        Ok(CredentialRecord {
            password_hash: row.try_get("password_hash")?,
            user: user_from_row(&row)?,
        })
    })
    .transpose()
}

pub(crate) async fn find_user(pool: &PgPool, user_id: Uuid) -> Result<Option<UserRecord>> {
    let query = concat!("SELECT ", user_columns!(), " FROM users WHERE id = $1");
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(db_span("SELECT", query))
        .await
        .context("failed to lookup user")?;

    row.as_ref()
        .map(user_from_row)
        .transpose()
        .context("failed to decode user")
}

pub(crate) async fn find_password_hash(pool: &PgPool, user_id: Uuid) -> Result<Option<String>> {
    let query = "SELECT password_hash FROM users WHERE id = $1";
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(db_span("SELECT", query))
        .await
        .context("failed to lookup password hash")?;

    row.map(|row| row.try_get::<String, _>("password_hash"))
        .transpose()
        .context("failed to decode password hash")
}

/// Store the hash of a freshly issued refresh token, replacing any previous one.
pub(crate) async fn store_refresh_token(
    pool: &PgPool,
    user_id: Uuid,
    token_hash: &[u8],
) -> Result<()> {
    let query = "UPDATE users SET refresh_token_hash = $1 WHERE id = $2";
    sqlx::query(query)
        .bind(token_hash)
        .bind(user_id)
        .execute(pool)
        .instrument(db_span("UPDATE", query))
        .await
        .context("failed to store refresh token")?;
    Ok(())
}

/// Swap the stored refresh-token hash only if it still equals `current_hash`.
///
/// Returns `false` when the presented token was already rotated or revoked.
pub(crate) async fn rotate_refresh_token(
    pool: &PgPool,
    user_id: Uuid,
    current_hash: &[u8],
    next_hash: &[u8],
) -> Result<bool> {
    let query = r"
        UPDATE users
        SET refresh_token_hash = $1
        WHERE id = $2 AND refresh_token_hash = $3
    ";
    let result = sqlx::query(query)
        .bind(next_hash)
        .bind(user_id)
        .bind(current_hash)
        .execute(pool)
        .instrument(db_span("UPDATE", query))
        .await
        .context("failed to rotate refresh token")?;
    Ok(result.rows_affected() == 1)
}

pub(crate) async fn clear_refresh_token(pool: &PgPool, user_id: Uuid) -> Result<()> {
    let query = "UPDATE users SET refresh_token_hash = NULL WHERE id = $1";
    sqlx::query(query)
        .bind(user_id)
        .execute(pool)
        .instrument(db_span("UPDATE", query))
        .await
        .context("failed to clear refresh token")?;
    Ok(())
}

pub(crate) async fn update_password(
    pool: &PgPool,
    user_id: Uuid,
    password_hash: &str,
) -> Result<bool> {
    let query = "UPDATE users SET password_hash = $1, updated_at = NOW() WHERE id = $2";
    let result = sqlx::query(query)
        .bind(password_hash)
        .bind(user_id)
        .execute(pool)
        .instrument(db_span("UPDATE", query))
        .await
        .context("failed to update password")?;
    Ok(result.rows_affected() == 1)
}

/// Apply allow-listed profile changes; `None` keeps the current value.
pub(crate) async fn update_account(
    pool: &PgPool,
    user_id: Uuid,
    fullname: Option<&str>,
    email: Option<&str>,
) -> Result<WriteOutcome> {
    let query = concat!(
        "UPDATE users SET ",
        "fullname = COALESCE($1, fullname), ",
        "email = COALESCE($2, email), ",
        "updated_at = NOW() ",
        "WHERE id = $3 RETURNING ",
        user_columns!()
    );
    let result = sqlx::query(query)
        .bind(fullname)
        .bind(email)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(db_span("UPDATE", query))
        .await;

    match result {
        Ok(Some(row)) => Ok(WriteOutcome::Written(
            user_from_row(&row).context("failed to decode updated user")?,
        )),
        Ok(None) => Ok(WriteOutcome::NotFound),
        Err(err) if is_unique_violation(&err) => Ok(WriteOutcome::Conflict),
        Err(err) => Err(err).context("failed to update account"),
    }
}

/// Which image column an update targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ImageSlot {
    Avatar,
    CoverImage,
}

pub(crate) async fn update_image(
    pool: &PgPool,
    user_id: Uuid,
    slot: ImageSlot,
    url: &str,
) -> Result<Option<UserRecord>> {
    let query = match slot {
        ImageSlot::Avatar => concat!(
            "UPDATE users SET avatar = $1, updated_at = NOW() WHERE id = $2 RETURNING ",
            user_columns!()
        ),
        ImageSlot::CoverImage => concat!(
            "UPDATE users SET cover_image = $1, updated_at = NOW() WHERE id = $2 RETURNING ",
            user_columns!()
        ),
    };
    let row = sqlx::query(query)
        .bind(url)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(db_span("UPDATE", query))
        .await
        .context("failed to update image")?;

    row.as_ref()
        .map(user_from_row)
        .transpose()
        .context("failed to decode updated user")
}
