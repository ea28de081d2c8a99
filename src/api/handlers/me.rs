use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use std::sync::Arc;
use tracing::{error, instrument};

use super::auth::{principal::require_auth, types::ErrorBody, AuthError, AuthState};
use crate::identity::PublicIdentity;

#[utoipa::path(
    get,
    path = "/auth/me",
    responses(
        (status = 200, description = "Identity behind the access credential", body = PublicIdentity),
        (status = 401, description = "Missing or invalid access credential", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn me(headers: HeaderMap, auth_state: Extension<Arc<AuthState>>) -> impl IntoResponse {
    let principal = match require_auth(&headers, auth_state.codec(), auth_state.now()) {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match auth_state
        .issuer()
        .store()
        .find_by_id(principal.identity_id)
        .await
    {
        Ok(Some(record)) => (StatusCode::OK, Json(record.public())).into_response(),
        // A valid credential for a deleted identity is no session at all.
        Ok(None) => AuthError::Unauthenticated.into_response(),
        Err(err) => {
            error!("Failed to lookup identity: {err:#}");
            AuthError::Internal.into_response()
        }
    }
}
