use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json,
    extract::FromRequestParts,
    http::{HeaderValue, StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
};
use serde_json::json;

use super::helpers::{
    Credential, TokenValidationError, extract_credential, validate_api_key, validate_session,
};
use crate::server::AppState;
use crate::types::{Session, User};

/// Extractor for file and folder routes: a session or an API key.
pub struct RequireUser {
    pub user: User,
}

/// Extractor for account, billing and developer routes: sessions only.
pub struct RequireSession {
    pub user: User,
    pub session: Session,
}

/// Extractor that requires a session of an admin user
pub struct RequireAdmin {
    pub user: User,
    pub session: Session,
}

#[derive(Debug)]
pub enum AuthError {
    MissingAuth,
    InvalidScheme,
    InvalidToken,
    TokenExpired,
    KeyInactive,
    SessionRequired,
    NotAdmin,
    RateLimited(Duration),
    InternalError,
}

impl From<TokenValidationError> for AuthError {
    fn from(e: TokenValidationError) -> Self {
        match e {
            TokenValidationError::InvalidScheme => AuthError::InvalidScheme,
            TokenValidationError::InvalidToken => AuthError::InvalidToken,
            TokenValidationError::TokenExpired => AuthError::TokenExpired,
            TokenValidationError::KeyInactive => AuthError::KeyInactive,
            TokenValidationError::InternalError => AuthError::InternalError,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AuthError::MissingAuth => (StatusCode::UNAUTHORIZED, "Authentication required"),
            AuthError::InvalidScheme => (StatusCode::UNAUTHORIZED, "Invalid authorization scheme"),
            AuthError::InvalidToken => (StatusCode::UNAUTHORIZED, "Invalid token"),
            AuthError::TokenExpired => (StatusCode::UNAUTHORIZED, "Token expired"),
            AuthError::KeyInactive => (StatusCode::UNAUTHORIZED, "API key is inactive"),
            AuthError::SessionRequired => (
                StatusCode::FORBIDDEN,
                "A login session is required for this operation",
            ),
            AuthError::NotAdmin => (StatusCode::FORBIDDEN, "Admin access required"),
            AuthError::RateLimited(_) => (StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded"),
            AuthError::InternalError => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        let body = json!({ "data": null, "error": message });

        let mut response = (status, Json(body)).into_response();

        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Bearer realm=\"cloudvault\""),
            );
        }

        if let AuthError::RateLimited(retry_after) = self {
            let secs = retry_after.as_secs().max(1);
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }

        response
    }
}

impl FromRequestParts<Arc<AppState>> for RequireUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        match extract_credential(&parts.headers)?.ok_or(AuthError::MissingAuth)? {
            Credential::Session(raw) => {
                let (_, user) = validate_session(state, &raw)?;
                Ok(RequireUser { user })
            }
            Credential::ApiKey(raw) => {
                let (key, user) = validate_api_key(state, &raw)?;
                enforce_rate_limit(state, &key.id, &user)?;
                Ok(RequireUser { user })
            }
        }
    }
}

impl FromRequestParts<Arc<AppState>> for RequireSession {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let (session, user) = extract_session(parts, state)?;
        Ok(RequireSession { user, session })
    }
}

impl FromRequestParts<Arc<AppState>> for RequireAdmin {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let (session, user) = extract_session(parts, state)?;

        if !user.is_admin {
            return Err(AuthError::NotAdmin);
        }

        Ok(RequireAdmin { user, session })
    }
}

fn extract_session(parts: &Parts, state: &Arc<AppState>) -> Result<(Session, User), AuthError> {
    match extract_credential(&parts.headers)?.ok_or(AuthError::MissingAuth)? {
        Credential::Session(raw) => Ok(validate_session(state, &raw)?),
        Credential::ApiKey(_) => Err(AuthError::SessionRequired),
    }
}

fn enforce_rate_limit(state: &Arc<AppState>, key_id: &str, user: &User) -> Result<(), AuthError> {
    let limit = match &user.plan_id {
        Some(plan_id) => state
            .store
            .get_plan(plan_id)
            .map_err(|_| AuthError::InternalError)?
            .map_or(0, |plan| u32::try_from(plan.api_rate_limit).unwrap_or(0)),
        None => 0,
    };

    state.rate_limiter.check(key_id, limit).map_err(|retry_after| {
        tracing::debug!(key_id, limit, "API key rate limited");
        AuthError::RateLimited(retry_after)
    })
}
