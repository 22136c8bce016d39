use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::Utc;

use crate::auth::{RequireSession, TokenGenerator, TokenKind, hash_password, verify_password};
use crate::error::Error;
use crate::server::{ApiJson, AppState};
use crate::server::dto::{AuthResponse, LoginRequest, RegisterRequest};
use crate::server::response::{ApiError, ApiResponse, StoreResultExt};
use crate::server::validation::{
    validate_display_name, validate_email, validate_password, validate_phone,
};
use crate::types::{Session, Subscription, SubscriptionStatus, User, new_id};

const SESSION_ATTEMPTS: usize = 3;

/// Issues a session token for `user_id`. Returns the raw token and the stored row.
fn open_session(state: &AppState, user_id: &str) -> Result<(String, Session), ApiError> {
    let generator = TokenGenerator::new();

    for _ in 0..SESSION_ATTEMPTS {
        let (raw_token, lookup, hash) = generator
            .generate(TokenKind::Session)
            .api_err("Failed to generate session token")?;

        let now = Utc::now();
        let session = Session {
            id: new_id(),
            user_id: user_id.to_string(),
            token_lookup: lookup,
            token_hash: hash,
            created_at: now,
            expires_at: now + state.config.session_ttl(),
            last_used_at: None,
        };

        match state.store.create_session(&session) {
            Ok(()) => return Ok((raw_token, session)),
            Err(Error::TokenLookupCollision) => continue,
            Err(e) => {
                tracing::error!("Failed to create session: {e}");
                return Err(ApiError::internal("Failed to create session"));
            }
        }
    }

    Err(ApiError::internal("Failed to create session"))
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> impl IntoResponse {
    let store = state.store.as_ref();

    let email = validate_email(&req.email)?;
    validate_password(&req.password, "password")?;
    let name = validate_display_name(&req.name)?;
    let phone = req.phone.as_deref().map(validate_phone).transpose()?;

    if store
        .get_user_by_email(&email)
        .api_err("Failed to check email")?
        .is_some()
    {
        return Err(ApiError::conflict("Email is already registered"));
    }

    if let Some(phone) = &phone {
        if store
            .get_user_by_phone(phone)
            .api_err("Failed to check phone")?
            .is_some()
        {
            return Err(ApiError::conflict("Phone number is already registered"));
        }
    }

    let plan = store
        .get_default_plan()
        .api_err("Failed to get default plan")?;

    let password_hash = hash_password(&req.password).api_err("Failed to hash password")?;

    let now = Utc::now();
    let user = User {
        id: new_id(),
        email,
        phone,
        name,
        password_hash,
        plan_id: plan.as_ref().map(|p| p.id.clone()),
        storage_used_bytes: 0,
        is_admin: false,
        created_at: now,
        updated_at: now,
    };

    match store.create_user(&user) {
        Ok(()) => {}
        Err(Error::AlreadyExists) => {
            return Err(ApiError::conflict("Email or phone is already registered"));
        }
        Err(e) => {
            tracing::error!("Failed to create user: {e}");
            return Err(ApiError::internal("Failed to create user"));
        }
    }

    if let Some(plan) = &plan {
        let subscription = Subscription {
            id: new_id(),
            user_id: user.id.clone(),
            plan_id: plan.id.clone(),
            status: SubscriptionStatus::Active,
            started_at: now,
            ended_at: None,
        };
        store
            .create_subscription(&subscription)
            .api_err("Failed to create subscription")?;
    }

    let (token, session) = open_session(&state, &user.id)?;

    tracing::info!(user_id = %user.id, "Registered user");

    Ok::<_, ApiError>((
        StatusCode::CREATED,
        Json(ApiResponse::success(AuthResponse {
            token,
            expires_at: session.expires_at,
            user,
        })),
    ))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> impl IntoResponse {
    let invalid = || ApiError::unauthorized("Invalid email or password");

    let email = req.email.trim().to_lowercase();
    let user = state
        .store
        .get_user_by_email(&email)
        .api_err("Failed to get user")?
        .ok_or_else(invalid)?;

    if !verify_password(&req.password, &user.password_hash).api_err("Failed to verify password")? {
        return Err(invalid());
    }

    let (token, session) = open_session(&state, &user.id)?;

    Ok::<_, ApiError>(Json(ApiResponse::success(AuthResponse {
        token,
        expires_at: session.expires_at,
        user,
    })))
}

pub async fn logout(
    auth: RequireSession,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    state
        .store
        .delete_session(&auth.session.id)
        .api_err("Failed to delete session")?;

    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}
