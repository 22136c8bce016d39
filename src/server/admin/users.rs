use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde_json::json;

use crate::auth::RequireAdmin;
use crate::server::{ApiJson, AppState};
use crate::server::dto::{AdminUpdateUserRequest, PaginationParams};
use crate::server::response::{
    ApiError, ApiResponse, DEFAULT_PAGE_SIZE, PaginatedResponse, StoreOptionExt, StoreResultExt,
    paginate,
};
use crate::server::user::remove_blobs;
use crate::server::validation::validate_display_name;
use crate::store::{FolderFilter, PlanChange};
use crate::types::{Subscription, SubscriptionStatus, new_id};

use super::audit::record;

const FILE_SWEEP_PAGE: i32 = 500;

pub async fn list_users(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Query(params): Query<PaginationParams>,
) -> impl IntoResponse {
    let cursor = params.cursor.as_deref().unwrap_or("");

    let users = state
        .store
        .list_users(cursor, DEFAULT_PAGE_SIZE + 1)
        .api_err("Failed to list users")?;

    let (users, next_cursor, has_more) =
        paginate(users, DEFAULT_PAGE_SIZE as usize, |u| u.id.clone());

    Ok::<_, ApiError>(Json(PaginatedResponse::new(users, next_cursor, has_more)))
}

pub async fn get_user(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let user = state
        .store
        .get_user(&id)
        .api_err("Failed to get user")?
        .or_not_found("User not found")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(user)))
}

pub async fn update_user(
    admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<AdminUpdateUserRequest>,
) -> impl IntoResponse {
    let store = state.store.as_ref();

    let mut user = store
        .get_user(&id)
        .api_err("Failed to get user")?
        .or_not_found("User not found")?;

    if req.is_admin == Some(false) && user.id == admin.user.id {
        return Err(ApiError::bad_request(
            "Admins cannot remove their own admin role",
        ));
    }

    let name = req.name.as_deref().map(validate_display_name).transpose()?;

    if let Some(plan_id) = &req.plan_id {
        let plan = store
            .get_plan(plan_id)
            .api_err("Failed to get plan")?
            .or_not_found("Plan not found")?;

        if user.plan_id.as_deref() != Some(plan.id.as_str()) {
            let current = store
                .get_active_subscription(&user.id)
                .api_err("Failed to get subscription")?;
            let next = Subscription {
                id: new_id(),
                user_id: user.id.clone(),
                plan_id: plan.id.clone(),
                status: SubscriptionStatus::Active,
                started_at: Utc::now(),
                ended_at: None,
            };
            store
                .change_plan(&PlanChange {
                    user_id: &user.id,
                    previous: current
                        .as_ref()
                        .map(|s| (s.id.as_str(), SubscriptionStatus::Replaced)),
                    next: &next,
                    payment: None,
                })
                .api_err("Failed to change plan")?;
            user.plan_id = Some(plan.id);
        }
    }

    if let Some(name) = name {
        user.name = name;
    }
    if let Some(is_admin) = req.is_admin {
        user.is_admin = is_admin;
    }

    user.updated_at = Utc::now();
    store.update_user(&user).api_err("Failed to update user")?;

    record(
        store,
        &admin.user.id,
        "user.update",
        "user",
        &user.id,
        json!({
            "plan_id": req.plan_id,
            "is_admin": req.is_admin,
            "name": req.name,
        }),
    );

    Ok::<_, ApiError>(Json(ApiResponse::success(user)))
}

/// Deletes a user with all their content. Blob removal is best effort.
pub async fn delete_user(
    admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let store = state.store.as_ref();

    let user = store
        .get_user(&id)
        .api_err("Failed to get user")?
        .or_not_found("User not found")?;

    if user.id == admin.user.id {
        return Err(ApiError::bad_request("Admins cannot delete themselves"));
    }

    let mut cursor = String::new();
    let mut removed = 0usize;
    loop {
        let files = store
            .list_files(&user.id, FolderFilter::Any, &cursor, FILE_SWEEP_PAGE)
            .api_err("Failed to list user files")?;
        let Some(last) = files.last() else {
            break;
        };
        cursor = last.id.clone();
        removed += files.len();
        remove_blobs(&state, &files).await;
    }

    store
        .delete_user(&user.id)
        .api_err("Failed to delete user")?;

    record(
        store,
        &admin.user.id,
        "user.delete",
        "user",
        &user.id,
        json!({ "email": user.email, "files": removed }),
    );

    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}
