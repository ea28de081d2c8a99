use std::time::Duration;

/// Default timeout applied to every request and to a renewal attempt.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_SESSION_KEY: &str = "default";

#[derive(Clone, Debug)]
pub struct ClientConfig {
    base_url: String,
    request_timeout: Duration,
    refresh_timeout: Duration,
    session_key: String,
}

impl ClientConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            request_timeout: DEFAULT_TIMEOUT,
            refresh_timeout: DEFAULT_TIMEOUT,
            session_key: DEFAULT_SESSION_KEY.to_string(),
        }
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    /// Renewals are de-duplicated per session key.
    #[must_use]
    pub fn with_session_key(mut self, key: impl Into<String>) -> Self {
        self.session_key = key.into();
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    #[must_use]
    pub fn refresh_timeout(&self) -> Duration {
        self.refresh_timeout
    }

    #[must_use]
    pub fn session_key(&self) -> &str {
        &self.session_key
    }
}
