//! Caller identity. Authentication happens upstream; this service trusts the
//! `x-user-id` header set by the identity provider and a shared admin token.

use axum::{
    body::Body,
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use log::warn;
use secrecy::ExposeSecret;
use std::sync::Arc;
use thiserror::Error;

use super::errors::ErrorBody;
use crate::startup::AppState;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing x-user-id header")]
    NoUserId,
    #[error("invalid x-user-id header")]
    InvalidUserId,
    #[error("admin token required")]
    NotAdmin,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match self {
            AuthError::NoUserId | AuthError::InvalidUserId => StatusCode::UNAUTHORIZED,
            AuthError::NotAdmin => StatusCode::FORBIDDEN,
        };
        let body = ErrorBody {
            error: self.to_string(),
            code: "UNAUTHORIZED",
            checkout: None,
        };
        (status, Json(body)).into_response()
    }
}

/// Subject of the authenticated caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserId(pub String);

impl<S> FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(USER_ID_HEADER)
            .ok_or(AuthError::NoUserId)?;
        let user_id = value
            .to_str()
            .map_err(|_| AuthError::InvalidUserId)?
            .trim();
        if user_id.is_empty() || user_id.len() > 128 {
            return Err(AuthError::InvalidUserId);
        }
        Ok(UserId(user_id.to_string()))
    }
}

pub async fn require_admin(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let presented = request
        .headers()
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok());
    match presented {
        Some(token) if token == state.admin_token.expose_secret() => Ok(next.run(request).await),
        _ => {
            warn!(
                "rejected admin request to {} without a valid token",
                request.uri().path()
            );
            Err(AuthError::NotAdmin)
        }
    }
}
