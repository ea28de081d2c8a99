//! Outbound mail abstraction.
//!
//! Template rendering and transport live outside this crate; the session core
//! only hands over a template name and a JSON payload. `LogEmailSender` is the
//! default for local use and logs instead of sending.

use anyhow::Result;
use tracing::info;

#[derive(Clone, Debug)]
pub struct EmailMessage {
    pub to_email: String,
    pub template: String,
    pub payload_json: String,
}

pub trait EmailSender: Send + Sync {
    /// Deliver a message or return an error.
    fn send(&self, message: &EmailMessage) -> Result<()>;
}

#[derive(Clone, Debug)]
pub struct LogEmailSender;

impl EmailSender for LogEmailSender {
    fn send(&self, message: &EmailMessage) -> Result<()> {
        info!(
            to_email = %message.to_email,
            template = %message.template,
            payload = %message.payload_json,
            "email send stub"
        );
        Ok(())
    }
}

/// Notice sent to a freshly created identity that still has to confirm its
/// address.
#[must_use]
pub fn confirmation_notice(to_email: &str, public_base_url: &str) -> EmailMessage {
    let base = public_base_url.trim_end_matches('/');
    EmailMessage {
        to_email: to_email.to_string(),
        template: "confirm_account".to_string(),
        payload_json: serde_json::json!({ "loginUrl": format!("{base}/login") }).to_string(),
    }
}
