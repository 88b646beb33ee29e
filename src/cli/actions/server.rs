use crate::{
    api::{
        self,
        handlers::auth::{AuthConfig, AuthState, TokenSigner},
    },
    cli::telemetry,
};
use anyhow::Result;
use secrecy::SecretString;
use std::{fmt, sync::Arc};
use tracing::debug;
use url::Url;

pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub access_token_secret: SecretString,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_secret: SecretString,
    pub refresh_token_ttl_seconds: i64,
    pub frontend_base_url: String,
}

impl fmt::Debug for Args {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Args")
            .field("port", &self.port)
            .field("dsn", &redact_dsn(&self.dsn))
            .field("access_token_secret", &"***")
            .field("access_token_ttl_seconds", &self.access_token_ttl_seconds)
            .field("refresh_token_secret", &"***")
            .field("refresh_token_ttl_seconds", &self.refresh_token_ttl_seconds)
            .field("frontend_base_url", &self.frontend_base_url)
            .finish()
    }
}

/// Mask the password of a URL-style DSN.
fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut url) if url.password().is_some() => {
            if url.set_password(Some("***")).is_ok() {
                url.to_string()
            } else {
                "***".to_string()
            }
        }
        Ok(url) => url.to_string(),
        Err(_) => "***".to_string(),
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    debug!("Server args: {:?}", args);

    let signer = TokenSigner::new(
        args.access_token_secret,
        args.access_token_ttl_seconds,
        args.refresh_token_secret,
        args.refresh_token_ttl_seconds,
    );
    let auth_state = Arc::new(AuthState::new(
        AuthConfig::new(args.frontend_base_url),
        signer,
    ));

    let result = api::new(args.port, args.dsn, auth_state).await;

    telemetry::shutdown_tracer();

    result
}
