//! User-account endpoints.
//!
//! Flow Overview:
//! 1) Validate the JSON payload inline (missing fields produce a 400 message).
//! 2) Authenticate via `require_auth` for protected routes.
//! 3) Read or write the `users` row through `auth::storage`.
//! 4) Reply with the `ApiResponse` envelope, setting or clearing token cookies
//!    where the session changes.

use anyhow::{Context, anyhow};
use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use super::{
    auth::{
        AuthState, TokenKind, TokenPair,
        cookies::{REFRESH_TOKEN_COOKIE, cleared_cookies, extract_cookie, token_pair_cookies},
        password::{hash_password_blocking, verify_password_blocking},
        principal::require_auth,
        storage::{self, ImageSlot, NewUser, UserRecord, WriteOutcome},
        types::{
            ChangePasswordRequest, Empty, LoginRequest, LoginResponse, RefreshRequest,
            RegisterRequest, TokenResponse, UpdateAccountRequest, UpdateAvatarRequest,
            UpdateCoverImageRequest,
        },
        utils::{
            MIN_PASSWORD_LENGTH, hash_refresh_token, normalize_email, normalize_optional,
            normalize_username, now_unix_seconds, valid_email, valid_image_url, valid_password,
            valid_username,
        },
    },
    response::{ApiError, ApiResponse, ErrorBody},
};

/// A request without a JSON content type carries no payload; malformed or
/// mistyped JSON is rejected with the error envelope.
fn read_payload<T>(payload: Result<Json<T>, JsonRejection>) -> Result<Option<T>, ApiError> {
    match payload {
        Ok(Json(request)) => Ok(Some(request)),
        Err(JsonRejection::MissingJsonContentType(_)) => Ok(None),
        Err(JsonRejection::JsonDataError(err)) => {
            debug!("payload rejected: {}", err.body_text());
            Err(ApiError::bad_request(err.body_text()))
        }
        Err(err) => {
            debug!("payload rejected: {}", err.body_text());
            Err(ApiError::bad_request("Malformed JSON payload"))
        }
    }
}

/// Blank or whitespace-only passwords count as missing.
fn non_blank(password: Option<String>) -> Option<String> {
    password.filter(|password| !password.trim().is_empty())
}

fn password_too_short() -> ApiError {
    ApiError::bad_request(format!(
        "Password must be at least {MIN_PASSWORD_LENGTH} characters"
    ))
}

/// Issue a fresh pair and remember the refresh token's hash.
async fn start_session(
    pool: &PgPool,
    auth_state: &AuthState,
    user: &UserRecord,
) -> Result<TokenPair, ApiError> {
    let pair = auth_state
        .signer()
        .issue_pair(user, now_unix_seconds())
        .context("failed to sign tokens")?;
    storage::store_refresh_token(pool, user.id, &hash_refresh_token(&pair.refresh_token)).await?;
    Ok(pair)
}

fn session_cookies(auth_state: &AuthState, pair: &TokenPair) -> Result<HeaderMap, ApiError> {
    let signer = auth_state.signer();
    token_pair_cookies(
        auth_state.config(),
        &pair.access_token,
        signer.access_ttl_seconds(),
        &pair.refresh_token,
        signer.refresh_ttl_seconds(),
    )
    .context("failed to build token cookies")
    .map_err(ApiError::from)
}

#[utoipa::path(
    post,
    path = "/api/v1/users/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User registered.", body = UserRecord),
        (status = 400, description = "Missing or invalid fields.", body = ErrorBody),
        (status = 409, description = "Email or username already taken.", body = ErrorBody),
    ),
    tag = "users"
)]
#[instrument(skip_all)]
pub async fn register(
    pool: Extension<PgPool>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Some(request) = read_payload(payload)? else {
        return Err(ApiError::bad_request("Missing payload"));
    };
    debug!("register: {request:?}");

    let fullname = normalize_optional(request.fullname);
    let email = normalize_optional(request.email).map(|email| normalize_email(&email));
    let username =
        normalize_optional(request.username).map(|username| normalize_username(&username));
    let password = non_blank(request.password);

    let (Some(fullname), Some(email), Some(username), Some(password)) =
        (fullname, email, username, password)
    else {
        return Err(ApiError::bad_request("All fields are required"));
    };

    if !valid_email(&email) {
        return Err(ApiError::bad_request("Invalid email"));
    }
    if !valid_username(&username) {
        return Err(ApiError::bad_request(
            "Username must be 3-32 characters of a-z, 0-9, '_', '.' or '-'",
        ));
    }
    if !valid_password(&password) {
        return Err(password_too_short());
    }

    let Some(avatar) = normalize_optional(request.avatar) else {
        return Err(ApiError::bad_request("Avatar is required"));
    };
    if !valid_image_url(&avatar) {
        return Err(ApiError::bad_request("Invalid avatar URL"));
    }
    let cover_image = normalize_optional(request.cover_image).unwrap_or_default();
    if !cover_image.is_empty() && !valid_image_url(&cover_image) {
        return Err(ApiError::bad_request("Invalid cover image URL"));
    }

    if storage::user_exists(&pool, &email, &username).await? {
        return Err(ApiError::conflict(
            "User with email or username already exists",
        ));
    }

    let password_hash = hash_password_blocking(password).await?;
    let new_user = NewUser {
        username: &username,
        email: &email,
        fullname: &fullname,
        avatar: &avatar,
        cover_image: &cover_image,
        password_hash: &password_hash,
    };

    match storage::insert_user(&pool, &new_user).await? {
        WriteOutcome::Written(user) => {
            info!(user_id = %user.id, "user registered");
            Ok(ApiResponse::new(StatusCode::CREATED, user, "User registered successfully")
                .into_response())
        }
        WriteOutcome::Conflict => Err(ApiError::conflict(
            "User with email or username already exists",
        )),
        WriteOutcome::NotFound => Err(anyhow!("insert returned no row").into()),
    }
}

#[utoipa::path(
    post,
    path = "/api/v1/users/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in; token cookies set.", body = LoginResponse),
        (status = 400, description = "Missing identifier or password.", body = ErrorBody),
        (status = 401, description = "Wrong password.", body = ErrorBody),
        (status = 404, description = "No such user.", body = ErrorBody),
    ),
    tag = "users"
)]
#[instrument(skip_all)]
pub async fn login(
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Some(request) = read_payload(payload)? else {
        return Err(ApiError::bad_request("Missing payload"));
    };
    debug!("login: {request:?}");

    let email = normalize_optional(request.email).map(|email| normalize_email(&email));
    let username =
        normalize_optional(request.username).map(|username| normalize_username(&username));
    if email.is_none() && username.is_none() {
        return Err(ApiError::bad_request("Username or email is required"));
    }
    let Some(password) = non_blank(request.password) else {
        return Err(ApiError::bad_request("Password is required"));
    };

    let Some(credentials) =
        storage::find_credentials(&pool, email.as_deref(), username.as_deref()).await?
    else {
        return Err(ApiError::not_found("User does not exist"));
    };

    if !verify_password_blocking(password, credentials.password_hash).await? {
        return Err(ApiError::unauthorized("Invalid user credentials"));
    }

    let user = credentials.user;
    let pair = start_session(&pool, &auth_state, &user).await?;
    let headers = session_cookies(&auth_state, &pair)?;

    info!(user_id = %user.id, "user logged in");
    let body = LoginResponse {
        user,
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
    };
    Ok(ApiResponse::ok(body, "User logged in successfully").with_headers(headers))
}

#[utoipa::path(
    post,
    path = "/api/v1/users/logout",
    responses(
        (status = 200, description = "Logged out; token cookies cleared.", body = Empty),
        (status = 401, description = "Missing or invalid access token.", body = ErrorBody),
    ),
    tag = "users"
)]
#[instrument(skip_all)]
pub async fn logout(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Response, ApiError> {
    let user = require_auth(&headers, &pool, &auth_state).await?;
    storage::clear_refresh_token(&pool, user.id).await?;

    info!(user_id = %user.id, "user logged out");
    Ok(ApiResponse::ok(Empty::default(), "User logged out successfully")
        .with_headers(cleared_cookies(auth_state.config())))
}

#[utoipa::path(
    post,
    path = "/api/v1/users/refresh-token",
    request_body(content = RefreshRequest, description = "Only read when no refresh cookie is sent."),
    responses(
        (status = 200, description = "New token pair issued.", body = TokenResponse),
        (status = 401, description = "Missing, invalid or already used refresh token.", body = ErrorBody),
    ),
    tag = "users"
)]
#[instrument(skip_all)]
pub async fn refresh_token(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Result<Json<RefreshRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let incoming = match extract_cookie(&headers, REFRESH_TOKEN_COOKIE) {
        Some(token) => Some(token),
        None => read_payload(payload)?
            .and_then(|request| normalize_optional(request.refresh_token)),
    };
    let Some(incoming) = incoming else {
        return Err(ApiError::unauthorized("Unauthorized request"));
    };

    let now = now_unix_seconds();
    let claims = auth_state
        .signer()
        .verify(&incoming, TokenKind::Refresh, now)
        .map_err(|err| {
            debug!("Refresh token rejected: {err}");
            ApiError::unauthorized("Invalid refresh token")
        })?;

    let Some(user) = storage::find_user(&pool, claims.sub).await? else {
        return Err(ApiError::unauthorized("Invalid refresh token"));
    };

    let pair = auth_state
        .signer()
        .issue_pair(&user, now)
        .context("failed to sign tokens")?;

    let rotated = storage::rotate_refresh_token(
        &pool,
        user.id,
        &hash_refresh_token(&incoming),
        &hash_refresh_token(&pair.refresh_token),
    )
    .await?;
    if !rotated {
        return Err(ApiError::unauthorized("Refresh token is expired or used"));
    }

    let headers = session_cookies(&auth_state, &pair)?;
    debug!(user_id = %user.id, "refresh token rotated");
    let body = TokenResponse {
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
    };
    Ok(ApiResponse::ok(body, "Access token refreshed").with_headers(headers))
}

#[utoipa::path(
    post,
    path = "/api/v1/users/change-password",
    request_body = ChangePasswordRequest,
    responses(
        (status = 200, description = "Password changed.", body = Empty),
        (status = 400, description = "Wrong old password or weak new password.", body = ErrorBody),
        (status = 401, description = "Missing or invalid access token.", body = ErrorBody),
    ),
    tag = "users"
)]
#[instrument(skip_all)]
pub async fn change_password(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Result<Json<ChangePasswordRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let user = require_auth(&headers, &pool, &auth_state).await?;
    let Some(request) = read_payload(payload)? else {
        return Err(ApiError::bad_request("Missing payload"));
    };

    let (Some(old_password), Some(new_password)) =
        (non_blank(request.old_password), non_blank(request.new_password))
    else {
        return Err(ApiError::bad_request("Old and new password are required"));
    };
    if !valid_password(&new_password) {
        return Err(password_too_short());
    }

    let Some(current_hash) = storage::find_password_hash(&pool, user.id).await? else {
        return Err(ApiError::not_found("User does not exist"));
    };
    if !verify_password_blocking(old_password, current_hash).await? {
        return Err(ApiError::bad_request("Invalid old password"));
    }

    let new_hash = hash_password_blocking(new_password).await?;
    if !storage::update_password(&pool, user.id, &new_hash).await? {
        return Err(ApiError::not_found("User does not exist"));
    }

    info!(user_id = %user.id, "password changed");
    Ok(ApiResponse::ok(Empty::default(), "Password changed successfully").into_response())
}

#[utoipa::path(
    get,
    path = "/api/v1/users/current-user",
    responses(
        (status = 200, description = "The authenticated user.", body = UserRecord),
        (status = 401, description = "Missing or invalid access token.", body = ErrorBody),
    ),
    tag = "users"
)]
#[instrument(skip_all)]
pub async fn current_user(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Response, ApiError> {
    let user = require_auth(&headers, &pool, &auth_state).await?;
    Ok(ApiResponse::ok(user, "Current user fetched successfully").into_response())
}

#[utoipa::path(
    patch,
    path = "/api/v1/users/update-account",
    request_body = UpdateAccountRequest,
    responses(
        (status = 200, description = "Account updated.", body = UserRecord),
        (status = 400, description = "Nothing to update or invalid email.", body = ErrorBody),
        (status = 401, description = "Missing or invalid access token.", body = ErrorBody),
        (status = 409, description = "Email already in use.", body = ErrorBody),
    ),
    tag = "users"
)]
#[instrument(skip_all)]
pub async fn update_account(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Result<Json<UpdateAccountRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let user = require_auth(&headers, &pool, &auth_state).await?;
    let Some(request) = read_payload(payload)? else {
        return Err(ApiError::bad_request("Missing payload"));
    };

    let fullname = normalize_optional(request.fullname);
    let email = normalize_optional(request.email).map(|email| normalize_email(&email));
    if fullname.is_none() && email.is_none() {
        return Err(ApiError::bad_request("No updates provided"));
    }
    if email.as_deref().is_some_and(|email| !valid_email(email)) {
        return Err(ApiError::bad_request("Invalid email"));
    }

    match storage::update_account(&pool, user.id, fullname.as_deref(), email.as_deref()).await? {
        WriteOutcome::Written(updated) => {
            Ok(ApiResponse::ok(updated, "Account details updated successfully").into_response())
        }
        WriteOutcome::Conflict => Err(ApiError::conflict("Email is already in use")),
        WriteOutcome::NotFound => Err(ApiError::not_found("User does not exist")),
    }
}

async fn replace_image(
    pool: &PgPool,
    user: &UserRecord,
    slot: ImageSlot,
    url: &str,
    message: &str,
) -> Result<Response, ApiError> {
    let Some(updated) = storage::update_image(pool, user.id, slot, url).await? else {
        return Err(ApiError::not_found("User does not exist"));
    };
    debug!(user_id = %user.id, ?slot, "image updated");
    Ok(ApiResponse::ok(updated, message).into_response())
}

#[utoipa::path(
    patch,
    path = "/api/v1/users/avatar",
    request_body = UpdateAvatarRequest,
    responses(
        (status = 200, description = "Avatar updated.", body = UserRecord),
        (status = 400, description = "Missing or invalid avatar URL.", body = ErrorBody),
        (status = 401, description = "Missing or invalid access token.", body = ErrorBody),
    ),
    tag = "users"
)]
#[instrument(skip_all)]
pub async fn update_avatar(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Result<Json<UpdateAvatarRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let user = require_auth(&headers, &pool, &auth_state).await?;
    let avatar = read_payload(payload)?.and_then(|request| normalize_optional(request.avatar));
    let Some(avatar) = avatar else {
        return Err(ApiError::bad_request("Avatar file is missing"));
    };
    if !valid_image_url(&avatar) {
        return Err(ApiError::bad_request("Invalid avatar URL"));
    }
    replace_image(
        &pool,
        &user,
        ImageSlot::Avatar,
        &avatar,
        "Avatar image updated successfully",
    )
    .await
}

#[utoipa::path(
    patch,
    path = "/api/v1/users/cover-image",
    request_body = UpdateCoverImageRequest,
    responses(
        (status = 200, description = "Cover image updated.", body = UserRecord),
        (status = 400, description = "Missing or invalid cover image URL.", body = ErrorBody),
        (status = 401, description = "Missing or invalid access token.", body = ErrorBody),
    ),
    tag = "users"
)]
#[instrument(skip_all)]
pub async fn update_cover_image(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Result<Json<UpdateCoverImageRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let user = require_auth(&headers, &pool, &auth_state).await?;
    let cover_image =
        read_payload(payload)?.and_then(|request| normalize_optional(request.cover_image));
    let Some(cover_image) = cover_image else {
        return Err(ApiError::bad_request("Cover image file is missing"));
    };
    if !valid_image_url(&cover_image) {
        return Err(ApiError::bad_request("Invalid cover image URL"));
    }
    replace_image(
        &pool,
        &user,
        ImageSlot::CoverImage,
        &cover_image,
        "Cover image updated successfully",
    )
    .await
}
