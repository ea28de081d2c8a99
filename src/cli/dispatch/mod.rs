//! Maps validated CLI matches to an [`Action`].

use crate::cli::{
    actions::{create_user, server, Action},
    commands::{self, auth, create_user as create_user_args},
};
use anyhow::{Context, Result};

/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let dsn = matches
        .get_one::<String>(commands::ARG_DSN)
        .cloned()
        .context("missing required argument: --dsn")?;
    let public_base_url = matches
        .get_one::<String>(auth::ARG_PUBLIC_BASE_URL)
        .cloned()
        .context("missing required argument: --public-base-url")?;

    if let Some(sub) = matches.subcommand_matches(create_user_args::NAME) {
        let options = create_user_args::Options::parse(sub)?;
        return Ok(Action::CreateUser(create_user::Args {
            dsn,
            public_base_url,
            email: options.email,
            password: options.password,
            role: options.role,
            email_confirmed: options.email_confirmed,
        }));
    }

    let port = matches
        .get_one::<u16>(commands::ARG_PORT)
        .copied()
        .unwrap_or(8080);
    let auth_opts = auth::Options::parse(matches)?;

    Ok(Action::Server(server::Args {
        port,
        dsn,
        auth: auth_opts.config,
        jwt_secret: auth_opts.jwt_secret,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Role;

    const DSN: &str = "postgres://portier@localhost:5432/portier";

    #[test]
    fn server_action_from_env() {
        temp_env::with_vars(
            [
                ("PORTIER_DSN", Some(DSN)),
                ("PORTIER_PORT", Some("8443")),
                ("PORTIER_JWT_SECRET", Some("0123456789abcdef0123456789abcdef")),
                ("PORTIER_PUBLIC_BASE_URL", Some("https://portier.dev")),
            ],
            || {
                let matches = commands::new().get_matches_from(vec!["portier"]);
                match handler(&matches) {
                    Ok(Action::Server(args)) => {
                        assert_eq!(args.port, 8443);
                        assert_eq!(args.dsn, DSN);
                        assert_eq!(args.auth.public_base_url(), "https://portier.dev");
                    }
                    other => panic!("unexpected dispatch result: {other:?}"),
                }
            },
        );
    }

    #[test]
    fn server_requires_jwt_secret() {
        temp_env::with_vars(
            [("PORTIER_DSN", Some(DSN)), ("PORTIER_JWT_SECRET", None)],
            || {
                let matches = commands::new().get_matches_from(vec!["portier"]);
                assert!(handler(&matches).is_err());
            },
        );
    }

    #[test]
    fn create_user_does_not_need_jwt_secret() {
        temp_env::with_vars(
            [
                ("PORTIER_DSN", Some(DSN)),
                ("PORTIER_JWT_SECRET", None),
                ("PORTIER_CREATE_USER_PASSWORD", Some("Secr3t!1")),
            ],
            || {
                let matches = commands::new().get_matches_from(vec![
                    "portier",
                    "create-user",
                    "--email",
                    "a@x.com",
                ]);
                match handler(&matches) {
                    Ok(Action::CreateUser(args)) => {
                        assert_eq!(args.email, "a@x.com");
                        assert_eq!(args.role, Role::User);
                        assert!(args.email_confirmed);
                    }
                    other => panic!("unexpected dispatch result: {other:?}"),
                }
            },
        );
    }
}
