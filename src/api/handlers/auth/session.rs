//! Session endpoints: login, refresh, logout and carrier revocation.
//!
//! Access credentials travel in the response body and go back as bearer
//! headers. The refresh carrier only ever travels in an `HttpOnly` cookie
//! scoped to `/auth/refresh`, which also covers `/auth/refresh/revoke`.

use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use std::sync::Arc;
use tracing::{error, instrument};

use super::{
    cookies::{clear_refresh_cookie, extract_refresh_carrier, refresh_cookie},
    error::AuthError,
    principal::require_auth,
    state::AuthState,
    types::{AccessTokenResponse, ErrorBody, LoginRequest},
};
use crate::session::IssuedSession;

#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session started; refresh carrier set as cookie", body = AccessTokenResponse),
        (status = 401, description = "Invalid email or password", body = ErrorBody)
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn login(
    auth_state: Extension<Arc<AuthState>>,
    Json(request): Json<LoginRequest>,
) -> impl IntoResponse {
    match auth_state
        .issuer()
        .login(&request.email, &request.password)
        .await
    {
        Ok(issued) => issued_response(&auth_state, &issued),
        Err(err) => AuthError::from(err).into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/auth/refresh",
    responses(
        (status = 200, description = "Credential renewed; carrier rotated", body = AccessTokenResponse),
        (status = 401, description = "Missing, superseded or expired refresh carrier", body = ErrorBody)
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn refresh(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let result = match extract_refresh_carrier(&headers) {
        Some(carrier) => auth_state
            .issuer()
            .refresh(&carrier)
            .await
            .map_err(AuthError::from),
        None => Err(AuthError::InvalidRefresh),
    };

    match result {
        Ok(issued) => issued_response(&auth_state, &issued),
        Err(AuthError::InvalidRefresh) => {
            // Drop the dead carrier so the browser stops presenting it.
            let mut response_headers = HeaderMap::new();
            if let Ok(cookie) = clear_refresh_cookie(auth_state.config()) {
                response_headers.insert(SET_COOKIE, cookie);
            }
            (response_headers, AuthError::InvalidRefresh).into_response()
        }
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 204, description = "Session ended and carrier cleared"),
        (status = 401, description = "Missing or invalid access credential", body = ErrorBody),
        (status = 500, description = "Refresh slot could not be cleared", body = ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn logout(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let principal = match require_auth(&headers, auth_state.codec(), auth_state.now()) {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    if let Err(err) = auth_state.issuer().logout(principal.identity_id).await {
        return AuthError::from(err).into_response();
    }
    ended_response(&auth_state)
}

#[utoipa::path(
    post,
    path = "/auth/refresh/revoke",
    responses(
        (status = 204, description = "Session behind the carrier ended and carrier cleared"),
        (status = 500, description = "Refresh slot could not be cleared", body = ErrorBody)
    ),
    tag = "auth"
)]
#[instrument(skip_all)]
pub async fn revoke(
    headers: HeaderMap,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    if let Some(carrier) = extract_refresh_carrier(&headers) {
        if let Err(err) = auth_state.issuer().revoke(&carrier).await {
            return AuthError::from(err).into_response();
        }
    }
    ended_response(&auth_state)
}

// Clear the cookie even if the slot was already empty.
fn ended_response(auth_state: &AuthState) -> axum::response::Response {
    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = clear_refresh_cookie(auth_state.config()) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    (StatusCode::NO_CONTENT, response_headers).into_response()
}

fn issued_response(auth_state: &AuthState, issued: &IssuedSession) -> axum::response::Response {
    let cookie = match refresh_cookie(auth_state.config(), &issued.refresh) {
        Ok(cookie) => cookie,
        Err(err) => {
            error!("Failed to build refresh cookie: {err}");
            return AuthError::Internal.into_response();
        }
    };
    let mut response_headers = HeaderMap::new();
    response_headers.insert(SET_COOKIE, cookie);
    (
        StatusCode::OK,
        response_headers,
        Json(AccessTokenResponse {
            access_token: issued.access.token.clone(),
        }),
    )
        .into_response()
}
