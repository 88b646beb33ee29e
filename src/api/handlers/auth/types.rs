//! Request/response types for the user-account endpoints.
//!
//! Request fields are optional at the serde level so missing fields produce
//! the handler's own 400 message instead of a generic rejection.

use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

use super::storage::UserRecord;

#[derive(ToSchema, Serialize, Deserialize, Default)]
pub struct RegisterRequest {
    pub fullname: Option<String>,
    pub email: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// URL of an already hosted avatar image.
    pub avatar: Option<String>,
    /// URL of an already hosted cover image.
    pub cover_image: Option<String>,
}

impl fmt::Debug for RegisterRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterRequest")
            .field("fullname", &self.fullname)
            .field("email", &self.email)
            .field("username", &self.username)
            .field("password", &"***")
            .field("avatar", &self.avatar)
            .field("cover_image", &self.cover_image)
            .finish()
    }
}

#[derive(ToSchema, Serialize, Deserialize, Default)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("email", &self.email)
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginResponse {
    pub user: UserRecord,
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Default)]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Default)]
pub struct ChangePasswordRequest {
    pub old_password: Option<String>,
    pub new_password: Option<String>,
}

impl fmt::Debug for ChangePasswordRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangePasswordRequest")
            .field("old_password", &"***")
            .field("new_password", &"***")
            .finish()
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
pub struct UpdateAccountRequest {
    pub fullname: Option<String>,
    pub email: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct UpdateAvatarRequest {
    pub avatar: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct UpdateCoverImageRequest {
    pub cover_image: Option<String>,
}

/// Empty `data` payload.
#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct Empty {}
