//! HS256 access/refresh tokens.
//!
//! Tokens are compact JWTs (`header.claims.signature`, base64url without
//! padding). Access and refresh tokens are signed with different secrets and
//! carry a `typ` claim so one can never be accepted in place of the other.

use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

use super::storage::UserRecord;

type HmacSha256 = Hmac<Sha256>;

const ALG_HS256: &str = "HS256";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct TokenHeader {
    alg: String,
    typ: String,
}

impl TokenHeader {
    fn hs256() -> Self {
        Self {
            alg: ALG_HS256.to_string(),
            typ: "JWT".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: Uuid,
    pub typ: TokenKind,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fullname: Option<String>,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("invalid token format")]
    Format,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlg(String),
    #[error("invalid signature")]
    InvalidSignature,
    #[error("unexpected token type")]
    WrongKind,
    #[error("token expired")]
    Expired,
    #[error("invalid signing key")]
    Key,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Signs and verifies both token kinds.
#[derive(Clone)]
pub struct TokenSigner {
    access_secret: SecretString,
    access_ttl_seconds: i64,
    refresh_secret: SecretString,
    refresh_ttl_seconds: i64,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner")
            .field("access_secret", &"***")
            .field("access_ttl_seconds", &self.access_ttl_seconds)
            .field("refresh_secret", &"***")
            .field("refresh_ttl_seconds", &self.refresh_ttl_seconds)
            .finish()
    }
}

impl TokenSigner {
    #[must_use]
    pub fn new(
        access_secret: SecretString,
        access_ttl_seconds: i64,
        refresh_secret: SecretString,
        refresh_ttl_seconds: i64,
    ) -> Self {
        Self {
            access_secret,
            access_ttl_seconds,
            refresh_secret,
            refresh_ttl_seconds,
        }
    }

    #[must_use]
    pub fn access_ttl_seconds(&self) -> i64 {
        self.access_ttl_seconds
    }

    #[must_use]
    pub fn refresh_ttl_seconds(&self) -> i64 {
        self.refresh_ttl_seconds
    }

    fn secret(&self, kind: TokenKind) -> &SecretString {
        match kind {
            TokenKind::Access => &self.access_secret,
            TokenKind::Refresh => &self.refresh_secret,
        }
    }

    /// Sign an access token carrying the user's public identity.
    ///
    /// # Errors
    /// Returns an error if the claims cannot be encoded or the key is unusable.
    pub fn sign_access(&self, user: &UserRecord, now: i64) -> Result<String, TokenError> {
        let claims = Claims {
            sub: user.id,
            typ: TokenKind::Access,
            iat: now,
            exp: now.saturating_add(self.access_ttl_seconds),
            jti: Uuid::new_v4().to_string(),
            email: Some(user.email.clone()),
            username: Some(user.username.clone()),
            fullname: Some(user.fullname.clone()),
        };
        self.sign(&claims)
    }

    /// Sign a refresh token; it only identifies the user.
    ///
    /// # Errors
    /// Returns an error if the claims cannot be encoded or the key is unusable.
    pub fn sign_refresh(&self, user_id: Uuid, now: i64) -> Result<String, TokenError> {
        let claims = Claims {
            sub: user_id,
            typ: TokenKind::Refresh,
            iat: now,
            exp: now.saturating_add(self.refresh_ttl_seconds),
            jti: Uuid::new_v4().to_string(),
            email: None,
            username: None,
            fullname: None,
        };
        self.sign(&claims)
    }

    /// Issue a fresh access/refresh pair for `user`.
    ///
    /// # Errors
    /// Returns an error if either token cannot be signed.
    pub fn issue_pair(&self, user: &UserRecord, now: i64) -> Result<TokenPair, TokenError> {
        Ok(TokenPair {
            access_token: self.sign_access(user, now)?,
            refresh_token: self.sign_refresh(user.id, now)?,
        })
    }

    fn sign(&self, claims: &Claims) -> Result<String, TokenError> {
        let header_b64 = b64e_json(&TokenHeader::hs256())?;
        let claims_b64 = b64e_json(claims)?;
        let signing_input = format!("{header_b64}.{claims_b64}");

        let mut mac = self.mac(claims.typ)?;
        mac.update(signing_input.as_bytes());
        let signature_b64 = Base64UrlUnpadded::encode_string(&mac.finalize().into_bytes());

        Ok(format!("{signing_input}.{signature_b64}"))
    }

    /// Verify a token of the expected `kind` and return its claims.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the token is malformed or contains invalid base64/json,
    /// - the algorithm is not HS256,
    /// - the signature does not match the secret for `kind`,
    /// - the `typ` claim is not `kind`,
    /// - the token has expired.
    pub fn verify(&self, token: &str, kind: TokenKind, now: i64) -> Result<Claims, TokenError> {
        let mut parts = token.split('.');
        let header_b64 = parts.next().ok_or(TokenError::Format)?;
        let claims_b64 = parts.next().ok_or(TokenError::Format)?;
        let sig_b64 = parts.next().ok_or(TokenError::Format)?;
        if parts.next().is_some() {
            return Err(TokenError::Format);
        }

        let header: TokenHeader = b64d_json(header_b64)?;
        if header.alg != ALG_HS256 {
            return Err(TokenError::UnsupportedAlg(header.alg));
        }

        let signature = Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| TokenError::Base64)?;
        let mut mac = self.mac(kind)?;
        mac.update(format!("{header_b64}.{claims_b64}").as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::InvalidSignature)?;

        let claims: Claims = b64d_json(claims_b64)?;
        if claims.typ != kind {
            return Err(TokenError::WrongKind);
        }
        if claims.exp <= now {
            return Err(TokenError::Expired);
        }

        Ok(claims)
    }

    fn mac(&self, kind: TokenKind) -> Result<HmacSha256, TokenError> {
        HmacSha256::new_from_slice(self.secret(kind).expose_secret().as_bytes())
            .map_err(|_| TokenError::Key)
    }
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, TokenError> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, TokenError> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| TokenError::Base64)?;
    Ok(serde_json::from_slice(&bytes)?)
}
