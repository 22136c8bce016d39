use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{Duration, Utc};

use crate::auth::{RequireSession, TokenGenerator, TokenKind};
use crate::error::Error;
use crate::server::{ApiJson, AppState};
use crate::server::dto::{ApiKeySecretResponse, CreateApiKeyRequest, UpdateApiKeyRequest};
use crate::server::response::{
    ApiError, ApiResponse, PaginatedResponse, StoreOptionExt, StoreResultExt,
};
use crate::server::validation::validate_key_name;
use crate::store::Store;
use crate::types::{ApiKey, new_id};

/// Keys issued on a free plan stop working after this many days.
const TRIAL_DAYS: i64 = 7;
const KEY_ATTEMPTS: usize = 3;

fn owned_key(store: &dyn Store, user_id: &str, id: &str) -> Result<ApiKey, ApiError> {
    store
        .get_api_key(id)
        .api_err("Failed to get API key")?
        .filter(|k| k.user_id == user_id)
        .or_not_found("API key not found")
}

pub async fn create_key(
    auth: RequireSession,
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<CreateApiKeyRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ApiKey>>), ApiError> {
    let store = state.store.as_ref();
    let user = &auth.user;

    let name = validate_key_name(&req.name)?;

    let on_free_plan = match &user.plan_id {
        Some(plan_id) => store
            .get_plan(plan_id)
            .api_err("Failed to get plan")?
            .is_none_or(|p| p.is_free()),
        None => true,
    };

    let generator = TokenGenerator::new();

    for _ in 0..KEY_ATTEMPTS {
        let (raw_key, lookup, hash) = generator
            .generate(TokenKind::ApiKey)
            .api_err("Failed to generate API key")?;

        let now = Utc::now();
        let key = ApiKey {
            id: new_id(),
            user_id: user.id.clone(),
            name: name.clone(),
            key_lookup: lookup,
            key_hash: hash,
            is_active: true,
            trial_expires_at: on_free_plan.then(|| now + Duration::days(TRIAL_DAYS)),
            last_used_at: None,
            created_at: now,
        };

        match store.create_api_key(&key) {
            Ok(()) => {
                state.temp_keys.store(&key.id, &raw_key, &user.id);
                tracing::info!(key_id = %key.id, user_id = %user.id, "Created API key");
                return Ok((StatusCode::CREATED, Json(ApiResponse::success(key))));
            }
            Err(Error::TokenLookupCollision) => continue,
            Err(e) => {
                tracing::error!("Failed to create API key: {e}");
                return Err(ApiError::internal("Failed to create API key"));
            }
        }
    }

    Err(ApiError::internal("Failed to create API key"))
}

/// Shows a new key's secret once. Later calls find nothing.
pub async fn reveal_secret(
    auth: RequireSession,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let key = state
        .temp_keys
        .take(&id, &auth.user.id)
        .or_not_found("API key secret is no longer available")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(ApiKeySecretResponse { id, key })))
}

pub async fn list_keys(
    auth: RequireSession,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let keys = state
        .store
        .list_user_api_keys(&auth.user.id)
        .api_err("Failed to list API keys")?;

    Ok::<_, ApiError>(Json(PaginatedResponse::new(keys, None, false)))
}

pub async fn update_key(
    auth: RequireSession,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<UpdateApiKeyRequest>,
) -> impl IntoResponse {
    let store = state.store.as_ref();
    let mut key = owned_key(store, &auth.user.id, &id)?;

    if let Some(name) = req.name {
        key.name = validate_key_name(&name)?;
    }
    if let Some(is_active) = req.is_active {
        key.is_active = is_active;
    }

    store.update_api_key(&key).api_err("Failed to update API key")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(key)))
}

pub async fn delete_key(
    auth: RequireSession,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let store = state.store.as_ref();
    let key = owned_key(store, &auth.user.id, &id)?;

    store
        .delete_api_key(&key.id)
        .api_err("Failed to delete API key")?;
    state.temp_keys.remove(&key.id);

    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}
