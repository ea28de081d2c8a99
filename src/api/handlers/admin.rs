//! Admin-only identity lookup, gated by the `ADMIN` role policy layer.

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use std::sync::Arc;
use tracing::{error, instrument};
use uuid::Uuid;

use super::auth::{principal::Principal, types::ErrorBody, AuthError, AuthState};
use crate::identity::PublicIdentity;

#[utoipa::path(
    get,
    path = "/admin/identities/{id}",
    params(
        ("id" = Uuid, Path, description = "Identity id")
    ),
    responses(
        (status = 200, description = "Identity found", body = PublicIdentity),
        (status = 401, description = "Missing or invalid access credential", body = ErrorBody),
        (status = 403, description = "Caller is not an administrator", body = ErrorBody),
        (status = 404, description = "No such identity", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "admin"
)]
#[instrument(skip_all, fields(caller = %principal.identity_id, identity_id = %id))]
pub async fn identity(
    Path(id): Path<Uuid>,
    auth_state: Extension<Arc<AuthState>>,
    Extension(principal): Extension<Principal>,
) -> impl IntoResponse {
    match auth_state.issuer().store().find_by_id(id).await {
        Ok(Some(record)) => (StatusCode::OK, Json(record.public())).into_response(),
        Ok(None) => AuthError::NotFound.into_response(),
        Err(err) => {
            error!("Failed to lookup identity: {err:#}");
            AuthError::Internal.into_response()
        }
    }
}
