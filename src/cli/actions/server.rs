use crate::api::{self, handlers::auth::AuthConfig};
use anyhow::Result;
use secrecy::SecretString;
use tracing::info;
use url::Url;

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub auth: AuthConfig,
    pub jwt_secret: SecretString,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database is unreachable or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);
    api::new(args.port, args.dsn, args.auth, &args.jwt_secret).await
}

fn log_startup_args(args: &Args) {
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("dsn", redact_dsn(&args.dsn)),
        ("public_base_url", args.auth.public_base_url().to_string()),
        ("jwt_issuer", args.auth.jwt_issuer().to_string()),
        ("access_ttl_seconds", args.auth.access_ttl_seconds().to_string()),
        ("refresh_ttl_seconds", args.auth.refresh_ttl_seconds().to_string()),
    ];
    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "portier {} - {}\n\nStartup configuration:",
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    );
    for (key, value) in &entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        message.push_str(&format!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

pub(crate) fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}

fn short_commit(hash: &str) -> &str {
    let trimmed = hash.trim();
    trimmed.get(..7).unwrap_or(trimmed)
}
