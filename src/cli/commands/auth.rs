use anyhow::{anyhow, bail, Context, Result};
use clap::{Arg, ArgMatches, Command};
use secrecy::{ExposeSecret, SecretString};

use crate::{
    api::handlers::auth::{AuthConfig, DEFAULT_ACCESS_TTL_SECONDS},
    session::DEFAULT_REFRESH_TTL_SECONDS,
    token::MIN_SECRET_BYTES,
};

pub const ARG_PUBLIC_BASE_URL: &str = "public-base-url";
pub const ARG_JWT_SECRET: &str = "jwt-secret";
pub const ARG_JWT_ISSUER: &str = "jwt-issuer";
pub const ARG_ACCESS_TTL_SECONDS: &str = "access-ttl-seconds";
pub const ARG_REFRESH_TTL_SECONDS: &str = "refresh-ttl-seconds";

#[derive(Debug)]
pub struct Options {
    pub config: AuthConfig,
    pub jwt_secret: SecretString,
}

impl Options {
    /// Parse session arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the signing secret is missing or too short, or a
    /// lifetime is not positive.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let public_base_url = matches
            .get_one::<String>(ARG_PUBLIC_BASE_URL)
            .cloned()
            .context("missing required argument: --public-base-url")?;
        let jwt_secret = matches
            .get_one::<String>(ARG_JWT_SECRET)
            .filter(|secret| !secret.trim().is_empty())
            .map(|secret| SecretString::from(secret.clone()))
            .ok_or_else(|| anyhow!("missing required argument: --{ARG_JWT_SECRET}"))?;
        if jwt_secret.expose_secret().len() < MIN_SECRET_BYTES {
            bail!("--{ARG_JWT_SECRET} must be at least {MIN_SECRET_BYTES} bytes");
        }

        let ttl = |id: &str, default: i64| -> Result<i64> {
            let seconds = matches.get_one::<i64>(id).copied().unwrap_or(default);
            if seconds <= 0 {
                bail!("--{id} must be positive");
            }
            Ok(seconds)
        };

        let mut config = AuthConfig::new(public_base_url)
            .with_access_ttl_seconds(ttl(ARG_ACCESS_TTL_SECONDS, DEFAULT_ACCESS_TTL_SECONDS)?)
            .with_refresh_ttl_seconds(ttl(ARG_REFRESH_TTL_SECONDS, DEFAULT_REFRESH_TTL_SECONDS)?);
        if let Some(issuer) = matches.get_one::<String>(ARG_JWT_ISSUER) {
            config = config.with_jwt_issuer(issuer.clone());
        }

        Ok(Self { config, jwt_secret })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_PUBLIC_BASE_URL)
                .long(ARG_PUBLIC_BASE_URL)
                .help("Public base URL of the frontend, used for CORS and cookie flags")
                .env("PORTIER_PUBLIC_BASE_URL")
                .default_value("http://localhost:8080"),
        )
        .arg(
            Arg::new(ARG_JWT_SECRET)
                .long(ARG_JWT_SECRET)
                .help("HMAC secret for access tokens (at least 32 bytes)")
                .env("PORTIER_JWT_SECRET")
                .hide_env_values(true),
        )
        .arg(
            Arg::new(ARG_JWT_ISSUER)
                .long(ARG_JWT_ISSUER)
                .help("Issuer claim for access tokens")
                .env("PORTIER_JWT_ISSUER")
                .default_value("portier"),
        )
        .arg(
            Arg::new(ARG_ACCESS_TTL_SECONDS)
                .long(ARG_ACCESS_TTL_SECONDS)
                .help("Access token TTL in seconds")
                .env("PORTIER_ACCESS_TTL_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new(ARG_REFRESH_TTL_SECONDS)
                .long(ARG_REFRESH_TTL_SECONDS)
                .help("Refresh carrier TTL in seconds")
                .env("PORTIER_REFRESH_TTL_SECONDS")
                .default_value("604800")
                .value_parser(clap::value_parser!(i64)),
        )
}
