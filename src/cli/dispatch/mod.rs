//! Map parsed CLI arguments to the action the binary runs.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{ARG_DSN, ARG_PORT, auth};
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or the token secrets
/// are too short or identical.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .cloned()
        .context("missing required argument: --dsn")?;

    let auth_opts = auth::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        access_token_secret: auth_opts.access_token_secret,
        access_token_ttl_seconds: auth_opts.access_token_ttl_seconds,
        refresh_token_secret: auth_opts.refresh_token_secret,
        refresh_token_ttl_seconds: auth_opts.refresh_token_ttl_seconds,
        frontend_base_url: auth_opts.frontend_base_url,
    }))
}
