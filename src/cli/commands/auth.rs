//! Token signing and cookie arguments.

use anyhow::{Context, Result, bail};
use clap::{Arg, ArgMatches, Command};
use secrecy::{ExposeSecret, SecretString};

pub const ARG_ACCESS_TOKEN_SECRET: &str = "access-token-secret";
pub const ARG_ACCESS_TOKEN_TTL: &str = "access-token-ttl";
pub const ARG_REFRESH_TOKEN_SECRET: &str = "refresh-token-secret";
pub const ARG_REFRESH_TOKEN_TTL: &str = "refresh-token-ttl";
pub const ARG_FRONTEND_BASE_URL: &str = "frontend-base-url";

/// HMAC keys shorter than this are rejected at startup.
pub const MIN_SECRET_BYTES: usize = 32;

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_ACCESS_TOKEN_SECRET)
                .long(ARG_ACCESS_TOKEN_SECRET)
                .help("Secret used to sign access tokens (at least 32 bytes)")
                .env("VIDTUBE_ACCESS_TOKEN_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_ACCESS_TOKEN_TTL)
                .long(ARG_ACCESS_TOKEN_TTL)
                .help("Access token TTL in seconds")
                .env("VIDTUBE_ACCESS_TOKEN_TTL")
                .default_value("86400")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_REFRESH_TOKEN_SECRET)
                .long(ARG_REFRESH_TOKEN_SECRET)
                .help("Secret used to sign refresh tokens (at least 32 bytes)")
                .env("VIDTUBE_REFRESH_TOKEN_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_REFRESH_TOKEN_TTL)
                .long(ARG_REFRESH_TOKEN_TTL)
                .help("Refresh token TTL in seconds")
                .env("VIDTUBE_REFRESH_TOKEN_TTL")
                .default_value("864000")
                .value_parser(clap::value_parser!(i64).range(1..)),
        )
        .arg(
            Arg::new(ARG_FRONTEND_BASE_URL)
                .long(ARG_FRONTEND_BASE_URL)
                .help("Frontend base URL, used for CORS and to decide on Secure cookies")
                .env("VIDTUBE_FRONTEND_BASE_URL")
                .default_value("http://localhost:3000"),
        )
}

#[derive(Debug)]
pub struct Options {
    pub access_token_secret: SecretString,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_secret: SecretString,
    pub refresh_token_ttl_seconds: i64,
    pub frontend_base_url: String,
}

impl Options {
    /// Read and validate the token arguments.
    ///
    /// # Errors
    /// Returns an error if a secret is missing or shorter than
    /// [`MIN_SECRET_BYTES`], or if both tokens would share one secret.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let access_token_secret = secret(matches, ARG_ACCESS_TOKEN_SECRET)?;
        let refresh_token_secret = secret(matches, ARG_REFRESH_TOKEN_SECRET)?;

        if access_token_secret.expose_secret() == refresh_token_secret.expose_secret() {
            bail!("--{ARG_ACCESS_TOKEN_SECRET} and --{ARG_REFRESH_TOKEN_SECRET} must differ");
        }

        Ok(Self {
            access_token_secret,
            access_token_ttl_seconds: matches
                .get_one::<i64>(ARG_ACCESS_TOKEN_TTL)
                .copied()
                .unwrap_or(86_400),
            refresh_token_secret,
            refresh_token_ttl_seconds: matches
                .get_one::<i64>(ARG_REFRESH_TOKEN_TTL)
                .copied()
                .unwrap_or(864_000),
            frontend_base_url: matches
                .get_one::<String>(ARG_FRONTEND_BASE_URL)
                .cloned()
                .unwrap_or_else(|| "http://localhost:3000".to_string()),
        })
    }
}

fn secret(matches: &ArgMatches, name: &str) -> Result<SecretString> {
    let value = matches
        .get_one::<String>(name)
        .with_context(|| format!("missing required argument: --{name}"))?;
    if value.len() < MIN_SECRET_BYTES {
        bail!("--{name} must be at least {MIN_SECRET_BYTES} bytes");
    }
    Ok(SecretString::from(value.as_str()))
}
