//! Auth state and configuration.

use super::token::TokenSigner;

const DEFAULT_FRONTEND_BASE_URL: &str = "http://localhost:3000";

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new(DEFAULT_FRONTEND_BASE_URL.to_string())
    }
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self { frontend_base_url }
    }

    #[must_use]
    pub fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    /// Only mark cookies secure when the frontend is served over HTTPS.
    pub(crate) fn cookie_secure(&self) -> bool {
        self.frontend_base_url.starts_with("https://")
    }
}

#[derive(Debug)]
pub struct AuthState {
    config: AuthConfig,
    signer: TokenSigner,
}

impl AuthState {
    #[must_use]
    pub fn new(config: AuthConfig, signer: TokenSigner) -> Self {
        Self { config, signer }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    #[must_use]
    pub fn signer(&self) -> &TokenSigner {
        &self.signer
    }
}
