//! Credential attachment and single-flight silent renewal.
//!
//! Flow Overview (per call):
//! `NotStarted -> AttachingCredential -> (Dispatched | Refreshing) -> Resolved | Failed`
//!
//! 1) A cached, unexpired credential is attached and the call dispatched.
//! 2) A missing or expired credential joins the in-flight renewal for this
//!    session key, or starts one. Every waiter gets the same outcome.
//! 3) A `401` on a dispatched call triggers one renewal-and-retry. If another
//!    call already renewed, the newer cached credential is reused.
//! 4) A failed renewal is terminal: the cache is cleared and the session
//!    context publishes `LoggedOut` once.
//!
//! Login, refresh and revoke go out without a credential; logout carries one
//! if cached. None of them ever trigger a renewal.
//!
//! Logout ends the session on the server with the access credential while it
//! is valid and falls back to revoking by carrier otherwise. Either way the
//! transport drops its carrier afterwards.

use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Deserialize};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};
use tracing::{debug, trace, warn};
use ulid::Ulid;

use super::{
    config::ClientConfig,
    error::ClientError,
    session::SessionContext,
    transport::{ApiRequest, ApiResponse, Transport},
};
use crate::identity::PublicIdentity;

pub const LOGIN_PATH: &str = "/auth/login";
pub const REFRESH_PATH: &str = "/auth/refresh";
pub const REVOKE_PATH: &str = "/auth/refresh/revoke";
pub const LOGOUT_PATH: &str = "/auth/logout";
pub const ME_PATH: &str = "/auth/me";

type Renewal = Shared<BoxFuture<'static, Result<String, ClientError>>>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallState {
    NotStarted,
    AttachingCredential,
    Dispatched,
    Refreshing,
    Resolved,
    Failed,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccessTokenPayload {
    access_token: String,
}

pub struct RefreshCoordinator {
    transport: Arc<dyn Transport>,
    session: Arc<SessionContext>,
    config: ClientConfig,
    inflight: Mutex<HashMap<String, Renewal>>,
    logging_out: Arc<AtomicBool>,
}

impl RefreshCoordinator {
    #[must_use]
    pub fn new(
        transport: Arc<dyn Transport>,
        session: Arc<SessionContext>,
        config: ClientConfig,
    ) -> Self {
        Self {
            transport,
            session,
            config,
            inflight: Mutex::new(HashMap::new()),
            logging_out: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn session(&self) -> &Arc<SessionContext> {
        &self.session
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Send `request` with the session's credential, renewing as needed.
    ///
    /// Non-2xx answers other than the handled `401` come back as `Ok`.
    ///
    /// # Errors
    ///
    /// - [`ClientError::SessionExpired`] when a needed renewal failed.
    /// - [`ClientError::Unauthenticated`] when the retried call is still `401`.
    /// - Transport errors from the underlying [`Transport`].
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
        let call = Ulid::new().to_string();
        transition(&call, &request, CallState::NotStarted);

        match request.route() {
            LOGIN_PATH | REFRESH_PATH | REVOKE_PATH => {
                let request = ApiRequest {
                    bearer: None,
                    ..request
                };
                return self.dispatch(&call, request).await;
            }
            LOGOUT_PATH => {
                let request = match self.session.cache().token() {
                    Some(token) => request.with_bearer(token),
                    None => request,
                };
                return self.dispatch(&call, request).await;
            }
            _ => {}
        }

        transition(&call, &request, CallState::AttachingCredential);
        let token = match self.session.cache().valid_token() {
            Some(token) => token,
            None => {
                transition(&call, &request, CallState::Refreshing);
                self.renew().await.inspect_err(|_| {
                    transition(&call, &request, CallState::Failed);
                })?
            }
        };

        let response = self
            .dispatch(&call, request.clone().with_bearer(token.clone()))
            .await?;
        if response.status != 401 {
            return Ok(response);
        }

        // One retry per call. Reuse a credential another call already renewed.
        let retry_token = match self.session.cache().valid_token() {
            Some(current) if current != token => current,
            _ => {
                transition(&call, &request, CallState::Refreshing);
                self.renew().await.inspect_err(|_| {
                    transition(&call, &request, CallState::Failed);
                })?
            }
        };
        let response = self
            .dispatch(&call, request.clone().with_bearer(retry_token))
            .await?;
        if response.status == 401 {
            transition(&call, &request, CallState::Failed);
            return Err(ClientError::Unauthenticated);
        }
        Ok(response)
    }

    /// Send and decode a JSON answer.
    ///
    /// # Errors
    ///
    /// Everything [`Self::send`] returns, plus [`ClientError::Forbidden`] for
    /// `403`, [`ClientError::Http`] for other failures and
    /// [`ClientError::Parse`] for undecodable bodies.
    pub async fn request_json<T: DeserializeOwned>(
        &self,
        request: ApiRequest,
    ) -> Result<T, ClientError> {
        let response = self.send(request).await?;
        match response.status {
            200..=299 => response.json(),
            401 => Err(ClientError::Unauthenticated),
            403 => Err(ClientError::Forbidden),
            _ => Err(response.into_http_error()),
        }
    }

    /// Renew the access credential, joining an in-flight renewal for the same
    /// session key if there is one.
    ///
    /// # Errors
    ///
    /// [`ClientError::SessionExpired`] for any renewal failure.
    pub async fn renew(&self) -> Result<String, ClientError> {
        let key = self.config.session_key().to_string();
        let renewal = {
            let mut inflight = self.inflight.lock();
            if let Some(existing) = inflight.get(&key) {
                debug!(session_key = %key, "joining in-flight renewal");
                existing.clone()
            } else {
                let renewal = self.start_renewal();
                inflight.insert(key.clone(), renewal.clone());
                renewal
            }
        };

        let outcome = renewal.clone().await;

        let mut inflight = self.inflight.lock();
        if inflight
            .get(&key)
            .is_some_and(|current| current.ptr_eq(&renewal))
        {
            inflight.remove(&key);
        }
        outcome
    }

    fn start_renewal(&self) -> Renewal {
        let transport = self.transport.clone();
        let session = self.session.clone();
        let logging_out = self.logging_out.clone();
        let timeout = self.config.refresh_timeout();

        async move {
            let attempt = refresh_once(transport.as_ref());
            let outcome = match tokio::time::timeout(timeout, attempt).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ClientError::Timeout(format!(
                    "Renewal did not finish within {}s",
                    timeout.as_secs()
                ))),
            };
            match outcome {
                Ok(token) => {
                    debug!("renewal succeeded");
                    session.establish(token.clone());
                    Ok(token)
                }
                Err(err) => {
                    warn!("renewal failed: {err}");
                    // A logout already in progress publishes on its own.
                    if !logging_out.load(Ordering::SeqCst) {
                        session.end();
                    }
                    Err(ClientError::SessionExpired)
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Authenticate and return the identity behind the new session.
    ///
    /// # Errors
    ///
    /// [`ClientError::InvalidCredentials`] on `401`; transport or HTTP errors
    /// otherwise.
    pub async fn login(&self, email: &str, password: &str) -> Result<PublicIdentity, ClientError> {
        let request = ApiRequest::post(LOGIN_PATH)
            .with_json(serde_json::json!({ "email": email, "password": password }));
        let response = self.send(request).await?;
        match response.status {
            200..=299 => {
                let payload: AccessTokenPayload = response.json()?;
                if payload.access_token.is_empty() {
                    return Err(ClientError::Parse("Empty access token".to_string()));
                }
                self.session.establish(payload.access_token);
            }
            401 => return Err(ClientError::InvalidCredentials),
            _ => return Err(response.into_http_error()),
        }
        self.fetch_me().await
    }

    /// End the session on the server, best-effort, then locally. The client
    /// holds no credential or carrier afterwards. Calling it again is harmless.
    pub async fn logout(&self) {
        self.logging_out.store(true, Ordering::SeqCst);
        let ended = self.session.cache().valid_token().is_some()
            && self.end_on_server(ApiRequest::post(LOGOUT_PATH)).await;
        if !ended {
            self.end_on_server(ApiRequest::post(REVOKE_PATH)).await;
        }
        if let Err(err) = self.transport.forget_carrier() {
            warn!("failed to drop refresh carrier: {err}");
        }
        self.session.end();
        self.logging_out.store(false, Ordering::SeqCst);
    }

    async fn end_on_server(&self, request: ApiRequest) -> bool {
        let path = request.route().to_string();
        match self.send(request).await {
            Ok(response) if response.is_success() => true,
            Ok(response) => {
                debug!(%path, status = response.status, "server did not end the session");
                false
            }
            Err(err) => {
                debug!(%path, "ending the session on the server failed: {err}");
                false
            }
        }
    }

    /// Identity for the current credential, served from the session context
    /// when it was already fetched with the same credential.
    ///
    /// # Errors
    ///
    /// Same as [`Self::request_json`].
    pub async fn fetch_me(&self) -> Result<PublicIdentity, ClientError> {
        if let Some(token) = self.session.cache().valid_token() {
            if let Some(identity) = self.session.cached_identity(&token) {
                return Ok(identity);
            }
        }
        let identity: PublicIdentity = self.request_json(ApiRequest::get(ME_PATH)).await?;
        if let Some(token) = self.session.cache().valid_token() {
            self.session.remember_identity(token, identity.clone());
        }
        Ok(identity)
    }

    async fn dispatch(&self, call: &str, request: ApiRequest) -> Result<ApiResponse, ClientError> {
        transition(call, &request, CallState::Dispatched);
        match self.transport.send(request.clone()).await {
            Ok(response) => {
                transition(call, &request, CallState::Resolved);
                Ok(response)
            }
            Err(err) => {
                transition(call, &request, CallState::Failed);
                Err(err)
            }
        }
    }
}

async fn refresh_once(transport: &dyn Transport) -> Result<String, ClientError> {
    let response = transport.send(ApiRequest::post(REFRESH_PATH)).await?;
    match response.status {
        200..=299 => {
            let payload: AccessTokenPayload = response.json()?;
            if payload.access_token.is_empty() {
                return Err(ClientError::Parse("Empty access token".to_string()));
            }
            Ok(payload.access_token)
        }
        401 | 403 => Err(ClientError::SessionExpired),
        _ => Err(response.into_http_error()),
    }
}

fn transition(call: &str, request: &ApiRequest, state: CallState) {
    trace!(call, method = %request.method, path = %request.route(), ?state, "call state");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        client::{mock::MockServer, mock::PASSWORD, session::SessionStatus},
        identity::Role,
    };
    use anyhow::Result;
    use futures_util::future::join_all;
    use std::time::Duration;

    fn config() -> ClientConfig {
        ClientConfig::new("http://localhost:8080")
    }

    #[tokio::test]
    async fn concurrent_calls_share_one_renewal() -> Result<()> {
        let server = MockServer::new(Role::User)?;
        server.set_refresh_delay(Duration::from_millis(20));
        let client = server.coordinator(config());

        let calls = (0..8).map(|_| client.send(ApiRequest::get("/data")));
        let responses = join_all(calls).await;

        assert_eq!(server.refresh_calls(), 1);
        for response in responses {
            assert_eq!(response?.status, 200);
        }
        assert!(matches!(client.session().status(), SessionStatus::Active(_)));
        Ok(())
    }

    #[tokio::test]
    async fn valid_credential_skips_renewal() -> Result<()> {
        let server = MockServer::new(Role::User)?;
        let client = server.coordinator(config());
        client.session().establish(server.mint()?);

        let response = client.send(ApiRequest::get("/data")).await?;
        assert_eq!(response.status, 200);
        assert_eq!(server.refresh_calls(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn expired_credential_renews_before_dispatch() -> Result<()> {
        let server = MockServer::new(Role::User)?;
        let client = server.coordinator(config());
        client.session().establish(server.mint()?);
        server.clock.advance(900);

        let response = client.send(ApiRequest::get("/data")).await?;
        assert_eq!(response.status, 200);
        assert_eq!(server.refresh_calls(), 1);
        // Only the renewed credential reached the protected endpoint.
        assert_eq!(server.bearers_for("/data").len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn rejected_credentials_retry_once_on_a_shared_renewal() -> Result<()> {
        let server = MockServer::new(Role::User)?;
        server.set_refresh_delay(Duration::from_millis(20));
        let client = server.coordinator(config());
        let stale = server.mint()?;
        server.revoke(&stale);
        client.session().establish(stale.clone());

        let calls = (0..5).map(|_| client.send(ApiRequest::get("/data")));
        for response in join_all(calls).await {
            assert_eq!(response?.status, 200);
        }
        assert_eq!(server.refresh_calls(), 1);
        let bearers = server.bearers_for("/data");
        assert_eq!(bearers.len(), 10);
        assert_eq!(
            bearers
                .iter()
                .filter(|bearer| bearer.as_deref() == Some(stale.as_str()))
                .count(),
            5
        );
        Ok(())
    }

    #[tokio::test]
    async fn retry_reuses_credential_renewed_elsewhere() -> Result<()> {
        let server = MockServer::new(Role::User)?;
        let client = server.coordinator(config());
        let stale = server.mint()?;
        server.revoke(&stale);
        client.session().establish(stale);
        server.renew_elsewhere_on_reject(client.session().cache().clone());

        let response = client.send(ApiRequest::get("/data")).await?;
        assert_eq!(response.status, 200);
        assert_eq!(server.refresh_calls(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn second_rejection_is_unauthenticated() -> Result<()> {
        let server = MockServer::new(Role::User)?;
        let client = server.coordinator(config());
        client.session().establish(server.mint()?);

        let outcome = client.send(ApiRequest::get("/always-401")).await;
        assert_eq!(outcome.err(), Some(ClientError::Unauthenticated));
        assert_eq!(server.refresh_calls(), 1);
        assert_eq!(server.bearers_for("/always-401").len(), 2);
        // The renewal itself worked, so the session stays.
        assert!(matches!(client.session().status(), SessionStatus::Active(_)));
        Ok(())
    }

    #[tokio::test]
    async fn failed_renewal_expires_every_waiter_and_logs_out_once() -> Result<()> {
        let server = MockServer::new(Role::User)?;
        server.set_refresh_delay(Duration::from_millis(20));
        server.set_refresh_status(401);
        let client = server.coordinator(config());
        let mut status = client.session().subscribe();

        let calls = (0..4).map(|_| client.send(ApiRequest::get("/data")));
        for outcome in join_all(calls).await {
            assert_eq!(outcome.err(), Some(ClientError::SessionExpired));
        }
        assert_eq!(server.refresh_calls(), 1);
        assert_eq!(server.bearers_for("/data").len(), 0);
        assert_eq!(client.session().logged_out_events(), 1);
        status.changed().await?;
        assert_eq!(*status.borrow(), SessionStatus::LoggedOut);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn renewal_times_out() -> Result<()> {
        let server = MockServer::new(Role::User)?;
        server.set_refresh_delay(Duration::from_secs(60));
        let client = server.coordinator(config());

        let outcome = client.send(ApiRequest::get("/data")).await;
        assert_eq!(outcome.err(), Some(ClientError::SessionExpired));
        assert_eq!(client.session().status(), SessionStatus::LoggedOut);
        Ok(())
    }

    #[tokio::test]
    async fn network_failure_during_renewal_is_terminal() -> Result<()> {
        let server = MockServer::new(Role::User)?;
        server.set_offline(true);
        let client = server.coordinator(config());

        assert_eq!(client.renew().await.err(), Some(ClientError::SessionExpired));
        assert_eq!(client.session().logged_out_events(), 1);

        // A later renewal starts fresh instead of replaying the old outcome.
        server.set_offline(false);
        assert!(client.renew().await.is_ok());
        assert_eq!(server.bearers_for(REFRESH_PATH).len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn login_sends_no_credential_and_caches_identity() -> Result<()> {
        let server = MockServer::new(Role::Admin)?;
        let client = server.coordinator(config());
        client.session().establish(server.mint()?);

        let identity = client.login("a@x.com", PASSWORD).await?;
        assert_eq!(identity, server.identity);
        assert_eq!(server.bearers_for(LOGIN_PATH), vec![None]);

        let again = client.fetch_me().await?;
        assert_eq!(again, identity);
        assert_eq!(server.me_calls(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn wrong_password_is_invalid_credentials() -> Result<()> {
        let server = MockServer::new(Role::User)?;
        let client = server.coordinator(config());

        let outcome = client.login("a@x.com", "nope").await;
        assert_eq!(outcome.err(), Some(ClientError::InvalidCredentials));
        assert_eq!(server.refresh_calls(), 0);
        assert_eq!(client.session().status(), SessionStatus::Anonymous);
        Ok(())
    }

    #[tokio::test]
    async fn forbidden_is_not_retried() -> Result<()> {
        let server = MockServer::new(Role::User)?;
        let client = server.coordinator(config());
        client.session().establish(server.mint()?);

        let outcome: Result<serde_json::Value, ClientError> =
            client.request_json(ApiRequest::get("/admin/reports")).await;
        assert_eq!(outcome.err(), Some(ClientError::Forbidden));
        assert_eq!(server.refresh_calls(), 0);
        assert_eq!(server.bearers_for("/admin/reports").len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn logout_carries_credential_and_is_idempotent() -> Result<()> {
        let server = MockServer::new(Role::User)?;
        let client = server.coordinator(config());
        let token = server.mint()?;
        client.session().establish(token.clone());

        client.logout().await;
        assert_eq!(server.bearers_for(LOGOUT_PATH), vec![Some(token)]);
        assert_eq!(client.session().status(), SessionStatus::LoggedOut);

        client.logout().await;
        assert_eq!(server.logout_calls(), 1);
        assert_eq!(client.session().logged_out_events(), 1);
        assert!(!server.session_live());

        // The carrier died with the logout; no second LoggedOut is published.
        let outcome = client.send(ApiRequest::get("/data")).await;
        assert_eq!(outcome.err(), Some(ClientError::SessionExpired));
        assert_eq!(client.session().logged_out_events(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn logout_with_expired_credential_revokes_by_carrier() -> Result<()> {
        let server = MockServer::new(Role::User)?;
        let client = server.coordinator(config());
        client.session().establish(server.mint()?);
        server.clock.advance(900);

        client.logout().await;
        assert_eq!(server.logout_calls(), 0);
        assert_eq!(server.bearers_for(REVOKE_PATH), vec![None]);
        assert!(!server.session_live());
        assert!(!server.holds_carrier());
        assert_eq!(client.session().status(), SessionStatus::LoggedOut);

        // Nothing is left to bring the session back.
        assert_eq!(client.renew().await.err(), Some(ClientError::SessionExpired));
        assert_eq!(server.refresh_calls(), 1);
        assert_eq!(client.session().logged_out_events(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn logout_rejected_by_server_falls_back_to_revoke() -> Result<()> {
        let server = MockServer::new(Role::User)?;
        let client = server.coordinator(config());
        let token = server.mint()?;
        server.revoke(&token);
        client.session().establish(token);

        client.logout().await;
        assert_eq!(server.logout_calls(), 1);
        assert_eq!(server.bearers_for(REVOKE_PATH).len(), 1);
        assert!(!server.session_live());
        assert_eq!(server.refresh_calls(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn offline_logout_still_drops_the_carrier() -> Result<()> {
        let server = MockServer::new(Role::User)?;
        let client = server.coordinator(config());
        client.session().establish(server.mint()?);
        server.set_offline(true);

        client.logout().await;
        assert_eq!(client.session().status(), SessionStatus::LoggedOut);
        assert!(!server.holds_carrier());

        server.set_offline(false);
        assert_eq!(client.renew().await.err(), Some(ClientError::SessionExpired));
        Ok(())
    }

    #[tokio::test]
    async fn refresh_requests_never_carry_a_bearer() -> Result<()> {
        let server = MockServer::new(Role::User)?;
        let client = server.coordinator(config());
        client.renew().await?;
        let response = client
            .send(ApiRequest::post(REFRESH_PATH).with_bearer("leaked"))
            .await?;
        assert_eq!(response.status, 200);
        assert_eq!(server.bearers_for(REFRESH_PATH), vec![None, None]);
        Ok(())
    }
}
