use anyhow::{anyhow, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use secrecy::SecretString;

use crate::identity::Role;

pub const NAME: &str = "create-user";
pub const ARG_EMAIL: &str = "email";
pub const ARG_PASSWORD: &str = "password";
pub const ARG_ROLE: &str = "role";
pub const ARG_UNCONFIRMED: &str = "unconfirmed";

#[derive(Debug)]
pub struct Options {
    pub email: String,
    pub password: SecretString,
    pub role: Role,
    pub email_confirmed: bool,
}

impl Options {
    /// Parse `create-user` arguments.
    ///
    /// # Errors
    /// Returns an error if the email or password is missing.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let read_required = |id: &str| -> Result<String> {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| anyhow!("missing required argument: --{id}"))
        };

        Ok(Self {
            email: read_required(ARG_EMAIL)?,
            password: SecretString::from(read_required(ARG_PASSWORD)?),
            role: matches.get_one::<Role>(ARG_ROLE).copied().unwrap_or(Role::User),
            email_confirmed: !matches.get_flag(ARG_UNCONFIRMED),
        })
    }
}

#[must_use]
pub fn subcommand() -> Command {
    Command::new(NAME)
        .about("Create an identity in the configured database")
        .arg(
            Arg::new(ARG_EMAIL)
                .long(ARG_EMAIL)
                .help("Email address of the new identity")
                .required(true),
        )
        .arg(
            Arg::new(ARG_PASSWORD)
                .long(ARG_PASSWORD)
                .help("Initial password")
                .env("PORTIER_CREATE_USER_PASSWORD")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_ROLE)
                .long(ARG_ROLE)
                .help("Role: USER or ADMIN")
                .default_value("USER")
                .value_parser(|value: &str| value.parse::<Role>()),
        )
        .arg(
            Arg::new(ARG_UNCONFIRMED)
                .long(ARG_UNCONFIRMED)
                .help("Leave the email unconfirmed and send a confirmation notice")
                .action(ArgAction::SetTrue),
        )
}
