//! HTTP-facing auth failures and their `{error: {code, message}}` bodies.

use axum::{
    http::{header::WWW_AUTHENTICATE, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use thiserror::Error;
use tracing::error;

use super::types::{ErrorBody, ErrorDetail};
use crate::session::SessionError;

/// Single message for every login rejection so callers cannot tell an unknown
/// account from a wrong password or an unconfirmed email.
pub const INVALID_CREDENTIALS_MESSAGE: &str = "Invalid email or password";

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("authentication required")]
    Unauthenticated,
    #[error("insufficient role")]
    Forbidden,
    #[error("invalid refresh credential")]
    InvalidRefresh,
    #[error("not found")]
    NotFound,
    #[error("internal error")]
    Internal,
}

impl AuthError {
    #[must_use]
    pub const fn status(self) -> StatusCode {
        match self {
            Self::InvalidCredentials | Self::Unauthenticated | Self::InvalidRefresh => {
                StatusCode::UNAUTHORIZED
            }
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::Forbidden => "FORBIDDEN",
            Self::InvalidRefresh => "INVALID_REFRESH",
            Self::NotFound => "NOT_FOUND",
            Self::Internal => "INTERNAL",
        }
    }

    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::InvalidCredentials => INVALID_CREDENTIALS_MESSAGE,
            Self::Unauthenticated => "Authentication required",
            Self::Forbidden => "Insufficient role for this resource",
            Self::InvalidRefresh => "Session expired, please sign in again",
            Self::NotFound => "Resource not found",
            Self::Internal => "Internal server error",
        }
    }
}

impl From<SessionError> for AuthError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::InvalidCredentials | SessionError::AccountNotConfirmed => {
                Self::InvalidCredentials
            }
            SessionError::InvalidRefresh => Self::InvalidRefresh,
            SessionError::Token(err) => {
                error!("Token codec failure: {err}");
                Self::Internal
            }
            SessionError::Store(err) => {
                error!("Session store failure: {err:#}");
                Self::Internal
            }
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.message().to_string(),
            },
        });
        let mut response = (self.status(), body).into_response();
        if self == Self::Unauthenticated {
            response
                .headers_mut()
                .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}
