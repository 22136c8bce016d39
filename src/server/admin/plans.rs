use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use serde_json::json;

use crate::auth::RequireAdmin;
use crate::error::Error;
use crate::server::{ApiJson, AppState};
use crate::server::dto::{CreatePlanRequest, UpdatePlanRequest};
use crate::server::response::{
    ApiError, ApiResponse, PaginatedResponse, StoreOptionExt, StoreResultExt,
};
use crate::server::validation::{validate_currency, validate_non_negative, validate_plan_name};
use crate::types::{Plan, new_id};

use super::audit::record;

pub async fn list_plans(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let plans = state
        .store
        .list_plans(true)
        .api_err("Failed to list plans")?;

    Ok::<_, ApiError>(Json(PaginatedResponse::new(plans, None, false)))
}

pub async fn get_plan(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let plan = state
        .store
        .get_plan(&id)
        .api_err("Failed to get plan")?
        .or_not_found("Plan not found")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(plan)))
}

pub async fn create_plan(
    admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<CreatePlanRequest>,
) -> impl IntoResponse {
    let store = state.store.as_ref();

    let name = validate_plan_name(&req.name)?;
    validate_non_negative(req.storage_limit_bytes, "storage_limit_bytes")?;
    validate_non_negative(req.price_cents, "price_cents")?;
    validate_non_negative(i64::from(req.api_rate_limit), "api_rate_limit")?;
    let currency = validate_currency(req.currency.as_deref().unwrap_or("USD"))?;
    let is_active = req.is_active.unwrap_or(true);

    if req.is_default && !is_active {
        return Err(ApiError::bad_request("The default plan must be active"));
    }

    let now = Utc::now();
    let mut plan = Plan {
        id: new_id(),
        name,
        storage_limit_bytes: req.storage_limit_bytes,
        price_cents: req.price_cents,
        currency,
        api_rate_limit: req.api_rate_limit,
        is_default: false,
        is_active,
        created_at: now,
        updated_at: now,
    };

    match store.create_plan(&plan) {
        Ok(()) => {}
        Err(Error::AlreadyExists) => {
            return Err(ApiError::conflict("A plan with this name already exists"));
        }
        Err(e) => {
            tracing::error!("Failed to create plan: {e}");
            return Err(ApiError::internal("Failed to create plan"));
        }
    }

    if req.is_default {
        store
            .set_default_plan(&plan.id)
            .api_err("Failed to set default plan")?;
        plan.is_default = true;
    }

    record(
        store,
        &admin.user.id,
        "plan.create",
        "plan",
        &plan.id,
        json!({ "name": plan.name, "price_cents": plan.price_cents }),
    );

    Ok::<_, ApiError>((StatusCode::CREATED, Json(ApiResponse::success(plan))))
}

pub async fn update_plan(
    admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<UpdatePlanRequest>,
) -> impl IntoResponse {
    let store = state.store.as_ref();

    let mut plan = store
        .get_plan(&id)
        .api_err("Failed to get plan")?
        .or_not_found("Plan not found")?;

    if let Some(name) = &req.name {
        plan.name = validate_plan_name(name)?;
    }
    if let Some(limit) = req.storage_limit_bytes {
        validate_non_negative(limit, "storage_limit_bytes")?;
        plan.storage_limit_bytes = limit;
    }
    if let Some(price) = req.price_cents {
        validate_non_negative(price, "price_cents")?;
        plan.price_cents = price;
    }
    if let Some(currency) = &req.currency {
        plan.currency = validate_currency(currency)?;
    }
    if let Some(rate) = req.api_rate_limit {
        validate_non_negative(i64::from(rate), "api_rate_limit")?;
        plan.api_rate_limit = rate;
    }
    if let Some(is_active) = req.is_active {
        plan.is_active = is_active;
    }

    let becomes_default = req.is_default == Some(true) && !plan.is_default;
    if req.is_default == Some(false) && plan.is_default {
        return Err(ApiError::bad_request(
            "Make another plan the default instead",
        ));
    }
    if (plan.is_default || becomes_default) && !plan.is_active {
        return Err(ApiError::bad_request("The default plan must be active"));
    }

    plan.updated_at = Utc::now();

    match store.update_plan(&plan) {
        Ok(()) => {}
        Err(Error::AlreadyExists) => {
            return Err(ApiError::conflict("A plan with this name already exists"));
        }
        Err(Error::NotFound) => return Err(ApiError::not_found("Plan not found")),
        Err(e) => {
            tracing::error!("Failed to update plan: {e}");
            return Err(ApiError::internal("Failed to update plan"));
        }
    }

    if becomes_default {
        store
            .set_default_plan(&plan.id)
            .api_err("Failed to set default plan")?;
        plan.is_default = true;
    }

    record(
        store,
        &admin.user.id,
        "plan.update",
        "plan",
        &plan.id,
        json!({
            "name": req.name,
            "storage_limit_bytes": req.storage_limit_bytes,
            "price_cents": req.price_cents,
            "currency": req.currency,
            "api_rate_limit": req.api_rate_limit,
            "is_default": req.is_default,
            "is_active": req.is_active,
        }),
    );

    Ok::<_, ApiError>(Json(ApiResponse::success(plan)))
}

pub async fn delete_plan(
    admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let store = state.store.as_ref();

    let plan = store
        .get_plan(&id)
        .api_err("Failed to get plan")?
        .or_not_found("Plan not found")?;

    if plan.is_default {
        return Err(ApiError::conflict("The default plan cannot be deleted"));
    }

    let users = store
        .count_plan_users(&plan.id)
        .api_err("Failed to count plan users")?;
    if users > 0 {
        return Err(ApiError::conflict(format!(
            "Plan is in use by {users} user(s)"
        )));
    }

    match store.delete_plan(&plan.id) {
        Ok(true) => {}
        Ok(false) => return Err(ApiError::not_found("Plan not found")),
        Err(Error::Conflict(_)) => {
            return Err(ApiError::conflict(
                "Plan has billing history; deactivate it instead",
            ));
        }
        Err(e) => {
            tracing::error!("Failed to delete plan: {e}");
            return Err(ApiError::internal("Failed to delete plan"));
        }
    }

    record(
        store,
        &admin.user.id,
        "plan.delete",
        "plan",
        &plan.id,
        json!({ "name": plan.name }),
    );

    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}
