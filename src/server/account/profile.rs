use std::sync::Arc;

use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::Utc;

use crate::auth::{RequireSession, hash_password, verify_password};
use crate::error::Error;
use crate::server::{ApiJson, AppState};
use crate::server::dto::{ChangePasswordRequest, UpdateProfileRequest, UsageResponse};
use crate::server::response::{ApiError, ApiResponse, StoreResultExt};
use crate::server::validation::{validate_display_name, validate_password, validate_phone};

pub async fn get_me(auth: RequireSession) -> impl IntoResponse {
    Json(ApiResponse::success(auth.user))
}

pub async fn update_me(
    auth: RequireSession,
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<UpdateProfileRequest>,
) -> impl IntoResponse {
    let store = state.store.as_ref();
    let mut user = auth.user;

    if let Some(name) = req.name {
        user.name = validate_display_name(&name)?;
    }

    match req.phone {
        Some(Some(phone)) => {
            let phone = validate_phone(&phone)?;
            let taken = store
                .get_user_by_phone(&phone)
                .api_err("Failed to check phone")?
                .is_some_and(|other| other.id != user.id);
            if taken {
                return Err(ApiError::conflict("Phone number is already registered"));
            }
            user.phone = Some(phone);
        }
        Some(None) => user.phone = None,
        None => {}
    }

    user.updated_at = Utc::now();

    match store.update_user(&user) {
        Ok(()) => {}
        Err(Error::AlreadyExists) => {
            return Err(ApiError::conflict("Phone number is already registered"));
        }
        Err(e) => {
            tracing::error!("Failed to update user: {e}");
            return Err(ApiError::internal("Failed to update user"));
        }
    }

    Ok::<_, ApiError>(Json(ApiResponse::success(user)))
}

/// Changes the password and signs out every other session.
pub async fn change_password(
    auth: RequireSession,
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<ChangePasswordRequest>,
) -> impl IntoResponse {
    let store = state.store.as_ref();
    let mut user = auth.user;

    if !verify_password(&req.current_password, &user.password_hash)
        .api_err("Failed to verify password")?
    {
        return Err(ApiError::invalid_field(
            "current_password",
            "Current password is incorrect",
        ));
    }

    validate_password(&req.new_password, "new_password")?;

    user.password_hash = hash_password(&req.new_password).api_err("Failed to hash password")?;
    user.updated_at = Utc::now();
    store.update_user(&user).api_err("Failed to update user")?;

    let revoked = store
        .delete_user_sessions(&user.id, Some(&auth.session.id))
        .api_err("Failed to revoke sessions")?;
    tracing::info!(user_id = %user.id, revoked, "Password changed");

    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}

pub async fn get_usage(
    auth: RequireSession,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let store = state.store.as_ref();
    let user = auth.user;

    let plan = match &user.plan_id {
        Some(plan_id) => store.get_plan(plan_id).api_err("Failed to get plan")?,
        None => None,
    };

    let usage = UsageResponse {
        storage_used_bytes: user.storage_used_bytes,
        storage_limit_bytes: plan.as_ref().map(|p| p.storage_limit_bytes),
        plan: plan.map(|p| p.name),
        file_count: store
            .count_user_files(&user.id)
            .api_err("Failed to count files")?,
        folder_count: store
            .count_user_folders(&user.id)
            .api_err("Failed to count folders")?,
    };

    Ok::<_, ApiError>(Json(ApiResponse::success(usage)))
}
