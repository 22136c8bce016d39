use std::sync::Arc;

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use chrono::Utc;

use super::{TokenGenerator, TokenKind, parse_token};
use crate::server::AppState;
use crate::types::{ApiKey, Session, User};

pub const API_KEY_HEADER: &str = "x-api-key";

#[derive(Debug)]
pub enum TokenValidationError {
    InvalidScheme,
    InvalidToken,
    TokenExpired,
    KeyInactive,
    InternalError,
}

/// A raw credential pulled off a request, not yet checked against the store.
#[derive(Debug, PartialEq, Eq)]
pub enum Credential {
    Session(String),
    ApiKey(String),
}

/// Extracts the credential from `Authorization: Bearer` or `X-API-Key`.
/// Returns None if neither header is present.
/// Returns Err if the Authorization scheme is unsupported.
pub fn extract_credential(headers: &HeaderMap) -> Result<Option<Credential>, TokenValidationError> {
    if let Some(header) = headers.get(AUTHORIZATION) {
        let value = header
            .to_str()
            .map_err(|_| TokenValidationError::InvalidToken)?;
        let token = value
            .strip_prefix("Bearer ")
            .ok_or(TokenValidationError::InvalidScheme)?
            .trim();

        return Ok(Some(match TokenKind::detect(token) {
            Some(TokenKind::ApiKey) => Credential::ApiKey(token.to_string()),
            _ => Credential::Session(token.to_string()),
        }));
    }

    if let Some(header) = headers.get(API_KEY_HEADER) {
        let value = header
            .to_str()
            .map_err(|_| TokenValidationError::InvalidToken)?;
        return Ok(Some(Credential::ApiKey(value.trim().to_string())));
    }

    Ok(None)
}

/// Validates a raw session token against the store.
pub fn validate_session(
    state: &Arc<AppState>,
    raw_token: &str,
) -> Result<(Session, User), TokenValidationError> {
    let (lookup, _secret) = parse_token(TokenKind::Session, raw_token)
        .map_err(|_| TokenValidationError::InvalidToken)?;

    let session = state
        .store
        .get_session_by_lookup(&lookup)
        .map_err(|_| TokenValidationError::InternalError)?
        .ok_or(TokenValidationError::InvalidToken)?;

    let generator = TokenGenerator::new();
    if !generator
        .verify(raw_token, &session.token_hash)
        .map_err(|_| TokenValidationError::InternalError)?
    {
        return Err(TokenValidationError::InvalidToken);
    }

    if session.expires_at < Utc::now() {
        return Err(TokenValidationError::TokenExpired);
    }

    let user = state
        .store
        .get_user(&session.user_id)
        .map_err(|_| TokenValidationError::InternalError)?
        .ok_or(TokenValidationError::InvalidToken)?;

    if let Err(e) = state.store.update_session_last_used(&session.id) {
        tracing::warn!("Failed to update session last_used_at: {e}");
    }

    Ok((session, user))
}

/// Validates a raw API key against the store.
/// Inactive keys and keys past their trial expiry are rejected.
pub fn validate_api_key(
    state: &Arc<AppState>,
    raw_key: &str,
) -> Result<(ApiKey, User), TokenValidationError> {
    let (lookup, _secret) =
        parse_token(TokenKind::ApiKey, raw_key).map_err(|_| TokenValidationError::InvalidToken)?;

    let key = state
        .store
        .get_api_key_by_lookup(&lookup)
        .map_err(|_| TokenValidationError::InternalError)?
        .ok_or(TokenValidationError::InvalidToken)?;

    let generator = TokenGenerator::new();
    if !generator
        .verify(raw_key, &key.key_hash)
        .map_err(|_| TokenValidationError::InternalError)?
    {
        return Err(TokenValidationError::InvalidToken);
    }

    if !key.is_active {
        return Err(TokenValidationError::KeyInactive);
    }

    if key.trial_expired(Utc::now()) {
        return Err(TokenValidationError::TokenExpired);
    }

    let user = state
        .store
        .get_user(&key.user_id)
        .map_err(|_| TokenValidationError::InternalError)?
        .ok_or(TokenValidationError::InvalidToken)?;

    if let Err(e) = state.store.update_api_key_last_used(&key.id) {
        tracing::warn!("Failed to update API key last_used_at: {e}");
    }

    Ok((key, user))
}
