use crate::{
    api,
    cli::actions::server::redact_dsn,
    identity::Role,
    session::{
        email::{confirmation_notice, EmailSender, LogEmailSender},
        enroll,
        password::{Argon2Passwords, PasswordHasher},
        postgres::PgIdentityStore,
        store::IdentityStore,
    },
};
use anyhow::{bail, Result};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};

#[derive(Debug)]
pub struct Args {
    pub dsn: String,
    pub public_base_url: String,
    pub email: String,
    pub password: SecretString,
    pub role: Role,
    pub email_confirmed: bool,
}

/// Execute the create-user action.
/// # Errors
/// Returns an error if the database is unreachable, the email is invalid or
/// already registered.
pub async fn execute(args: Args) -> Result<()> {
    debug!(dsn = %redact_dsn(&args.dsn), "creating identity");
    let pool = api::connect(&args.dsn).await?;
    let store = PgIdentityStore::new(pool);
    let passwords = Argon2Passwords::new()?;

    create(&store, &passwords, &LogEmailSender, &args).await
}

pub(crate) async fn create(
    store: &dyn IdentityStore,
    passwords: &dyn PasswordHasher,
    mailer: &dyn EmailSender,
    args: &Args,
) -> Result<()> {
    let Some(id) = enroll(
        store,
        passwords,
        &args.email,
        args.password.expose_secret(),
        args.role,
        args.email_confirmed,
    )
    .await?
    else {
        bail!("An identity with this email already exists");
    };

    info!(identity_id = %id, role = %args.role, "identity created");

    if !args.email_confirmed {
        mailer.send(&confirmation_notice(&args.email, &args.public_base_url))?;
    }
    Ok(())
}
