//! In-process stand-in for the session API, used by the client tests.
//!
//! It plays both ends of the carrier: whether the client's jar still holds
//! one, and whether the server slot behind it is live. Both start out set, as
//! if a session already existed.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use uuid::Uuid;

use super::{
    cache::{CredentialCache, MemoryTokenStorage},
    config::ClientConfig,
    coordinator::{
        RefreshCoordinator, LOGIN_PATH, LOGOUT_PATH, ME_PATH, REFRESH_PATH, REVOKE_PATH,
    },
    error::ClientError,
    session::SessionContext,
    transport::{ApiRequest, ApiResponse, Transport},
};
use crate::{
    clock::{Clock, ManualClock},
    identity::{PublicIdentity, Role},
    token::{AccessClaims, TokenCodec},
};

pub(crate) const NOW: i64 = 1_700_000_000;
pub(crate) const PASSWORD: &str = "Secr3t!1";
const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

pub(crate) struct MockServer {
    pub(crate) codec: TokenCodec,
    pub(crate) clock: Arc<ManualClock>,
    pub(crate) identity: PublicIdentity,
    refresh_delay: Mutex<Duration>,
    refresh_status: AtomicU16,
    offline: AtomicBool,
    carrier_held: AtomicBool,
    slot_live: AtomicBool,
    revoked: Mutex<HashSet<String>>,
    renewed_elsewhere: Mutex<Option<Arc<CredentialCache>>>,
    requests: Mutex<Vec<(String, Option<String>)>>,
    refresh_calls: AtomicUsize,
    logout_calls: AtomicUsize,
    me_calls: AtomicUsize,
}

impl MockServer {
    pub(crate) fn new(role: Role) -> anyhow::Result<Arc<Self>> {
        Ok(Arc::new(Self {
            codec: TokenCodec::new(SECRET, "http://localhost:8080", 900)?,
            clock: Arc::new(ManualClock::new(NOW)),
            identity: PublicIdentity {
                id: Uuid::new_v4(),
                email: "a@x.com".to_string(),
                role,
                email_confirmed: true,
            },
            refresh_delay: Mutex::new(Duration::ZERO),
            refresh_status: AtomicU16::new(200),
            offline: AtomicBool::new(false),
            carrier_held: AtomicBool::new(true),
            slot_live: AtomicBool::new(true),
            revoked: Mutex::new(HashSet::new()),
            renewed_elsewhere: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            refresh_calls: AtomicUsize::new(0),
            logout_calls: AtomicUsize::new(0),
            me_calls: AtomicUsize::new(0),
        }))
    }

    /// Coordinator wired to this server with a fresh, empty cache.
    pub(crate) fn coordinator(self: &Arc<Self>, config: ClientConfig) -> Arc<RefreshCoordinator> {
        let cache = Arc::new(CredentialCache::new(
            Arc::new(MemoryTokenStorage::new()),
            self.clock.clone(),
        ));
        let session = Arc::new(SessionContext::new(cache));
        Arc::new(RefreshCoordinator::new(self.clone(), session, config))
    }

    pub(crate) fn mint(&self) -> anyhow::Result<String> {
        Ok(self
            .codec
            .mint(self.identity.id, self.identity.role, self.clock.now_unix())?
            .token)
    }

    pub(crate) fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock() = delay;
    }

    pub(crate) fn set_refresh_status(&self, status: u16) {
        self.refresh_status.store(status, Ordering::SeqCst);
    }

    pub(crate) fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub(crate) fn revoke(&self, token: &str) {
        self.revoked.lock().insert(token.to_string());
    }

    /// On the next rejected call, install a fresh credential into `cache` as
    /// if another caller had renewed in the meantime.
    pub(crate) fn renew_elsewhere_on_reject(&self, cache: Arc<CredentialCache>) {
        *self.renewed_elsewhere.lock() = Some(cache);
    }

    pub(crate) fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn logout_calls(&self) -> usize {
        self.logout_calls.load(Ordering::SeqCst)
    }

    /// Whether the server-side slot still accepts the carrier.
    pub(crate) fn session_live(&self) -> bool {
        self.slot_live.load(Ordering::SeqCst)
    }

    /// Whether the client side still holds a carrier.
    pub(crate) fn holds_carrier(&self) -> bool {
        self.carrier_held.load(Ordering::SeqCst)
    }

    fn end_session(&self) {
        self.slot_live.store(false, Ordering::SeqCst);
        self.carrier_held.store(false, Ordering::SeqCst);
    }

    pub(crate) fn me_calls(&self) -> usize {
        self.me_calls.load(Ordering::SeqCst)
    }

    /// Bearer seen on each request to `path`, in order.
    pub(crate) fn bearers_for(&self, path: &str) -> Vec<Option<String>> {
        self.requests
            .lock()
            .iter()
            .filter(|(seen, _)| seen == path)
            .map(|(_, bearer)| bearer.clone())
            .collect()
    }

    pub(crate) fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    fn authorize(&self, request: &ApiRequest) -> Result<AccessClaims, ApiResponse> {
        let rejected =
            || ApiResponse::new(401, br#"{"error":{"code":"UNAUTHENTICATED"}}"#.to_vec());
        let token = request.bearer.as_deref().ok_or_else(rejected)?;
        if self.revoked.lock().contains(token) {
            if let Some(cache) = self.renewed_elsewhere.lock().take() {
                if let Ok(fresh) = self.mint() {
                    cache.set(fresh);
                }
            }
            return Err(rejected());
        }
        self.codec
            .verify(token, self.clock.now_unix())
            .map_err(|_| rejected())
    }

    fn token_response(&self) -> ApiResponse {
        match self.mint() {
            Ok(token) => ApiResponse::new(
                200,
                serde_json::json!({ "accessToken": token }).to_string(),
            ),
            Err(_) => ApiResponse::new(500, b"mint failed".to_vec()),
        }
    }
}

#[async_trait]
impl Transport for MockServer {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
        self.requests
            .lock()
            .push((request.route().to_string(), request.bearer.clone()));
        if self.offline.load(Ordering::SeqCst) {
            return Err(ClientError::Network("connection refused".to_string()));
        }

        let response = match request.route() {
            LOGIN_PATH => {
                let password = request
                    .body
                    .as_ref()
                    .and_then(|body| body.get("password"))
                    .and_then(|value| value.as_str());
                if password == Some(PASSWORD) {
                    self.slot_live.store(true, Ordering::SeqCst);
                    self.carrier_held.store(true, Ordering::SeqCst);
                    self.token_response()
                } else {
                    ApiResponse::new(401, br#"{"error":{"code":"INVALID_CREDENTIALS"}}"#.to_vec())
                }
            }
            REFRESH_PATH => {
                self.refresh_calls.fetch_add(1, Ordering::SeqCst);
                let delay = *self.refresh_delay.lock();
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if !self.holds_carrier() || !self.session_live() {
                    self.carrier_held.store(false, Ordering::SeqCst);
                    ApiResponse::new(401, br#"{"error":{"code":"INVALID_REFRESH"}}"#.to_vec())
                } else {
                    match self.refresh_status.load(Ordering::SeqCst) {
                        200 => self.token_response(),
                        status => ApiResponse::new(status, b"{}".to_vec()),
                    }
                }
            }
            REVOKE_PATH => {
                if self.holds_carrier() {
                    self.end_session();
                }
                ApiResponse::new(204, Vec::new())
            }
            LOGOUT_PATH => {
                self.logout_calls.fetch_add(1, Ordering::SeqCst);
                match self.authorize(&request) {
                    Ok(_) => {
                        self.end_session();
                        ApiResponse::new(204, Vec::new())
                    }
                    Err(response) => response,
                }
            }
            ME_PATH => {
                self.me_calls.fetch_add(1, Ordering::SeqCst);
                match self.authorize(&request) {
                    Ok(_) => ApiResponse::new(
                        200,
                        serde_json::to_vec(&self.identity).unwrap_or_default(),
                    ),
                    Err(response) => response,
                }
            }
            "/always-401" => ApiResponse::new(401, Vec::new()),
            path if path.starts_with("/admin") => match self.authorize(&request) {
                Ok(claims) if claims.role == Role::Admin => {
                    ApiResponse::new(200, br#"{"ok":true}"#.to_vec())
                }
                Ok(_) => ApiResponse::new(403, br#"{"error":{"code":"FORBIDDEN"}}"#.to_vec()),
                Err(response) => response,
            },
            _ => match self.authorize(&request) {
                Ok(_) => ApiResponse::new(200, br#"{"ok":true}"#.to_vec()),
                Err(response) => response,
            },
        };
        Ok(response)
    }

    fn forget_carrier(&self) -> Result<(), ClientError> {
        self.carrier_held.store(false, Ordering::SeqCst);
        Ok(())
    }
}
