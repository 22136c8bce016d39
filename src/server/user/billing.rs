use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
    response::IntoResponse,
};
use chrono::Utc;

use crate::auth::RequireSession;
use crate::server::{ApiJson, AppState};
use crate::server::dto::{PaginationParams, SubscribeRequest, SubscriptionResponse};
use crate::server::response::{
    ApiError, ApiResponse, DEFAULT_PAGE_SIZE, PaginatedResponse, StoreOptionExt, StoreResultExt,
    paginate,
};
use crate::store::{PlanChange, Store};
use crate::types::{Payment, PaymentStatus, Plan, Subscription, SubscriptionStatus, User, new_id};

pub async fn list_plans(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let plans = state
        .store
        .list_plans(false)
        .api_err("Failed to list plans")?;

    Ok::<_, ApiError>(Json(PaginatedResponse::new(plans, None, false)))
}

pub async fn get_subscription(
    auth: RequireSession,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let store = state.store.as_ref();
    let user = &auth.user;

    let subscription = store
        .get_active_subscription(&user.id)
        .api_err("Failed to get subscription")?;
    let plan = match &user.plan_id {
        Some(plan_id) => store.get_plan(plan_id).api_err("Failed to get plan")?,
        None => None,
    };

    Ok::<_, ApiError>(Json(ApiResponse::success(SubscriptionResponse {
        subscription,
        plan,
    })))
}

/// Moves `user` onto `plan`, closing the current subscription with `closing`.
fn switch_plan(
    store: &dyn Store,
    user: &User,
    plan: Plan,
    closing: SubscriptionStatus,
    payment: Option<&Payment>,
) -> Result<SubscriptionResponse, ApiError> {
    if user.storage_used_bytes > plan.storage_limit_bytes {
        return Err(ApiError::conflict(
            "Current storage usage exceeds the plan's limit",
        ));
    }

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
            previous: current.as_ref().map(|s| (s.id.as_str(), closing)),
            next: &next,
            payment,
        })
        .api_err("Failed to change plan")?;

    tracing::info!(user_id = %user.id, plan = %plan.name, "Changed plan");

    Ok(SubscriptionResponse {
        subscription: Some(next),
        plan: Some(plan),
    })
}

pub async fn subscribe(
    auth: RequireSession,
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<SubscribeRequest>,
) -> impl IntoResponse {
    let store = state.store.as_ref();
    let user = &auth.user;

    let plan = store
        .get_plan(&req.plan_id)
        .api_err("Failed to get plan")?
        .filter(|p| p.is_active)
        .or_not_found("Plan not found")?;

    if user.plan_id.as_deref() == Some(plan.id.as_str()) {
        return Err(ApiError::conflict("Already subscribed to this plan"));
    }

    // Free plans carry no charge to record.
    let payment = (!plan.is_free()).then(|| Payment {
        id: new_id(),
        user_id: user.id.clone(),
        plan_id: plan.id.clone(),
        amount_cents: plan.price_cents,
        currency: plan.currency.clone(),
        status: PaymentStatus::Completed,
        reference: req.reference.clone(),
        created_at: Utc::now(),
    });

    let response = switch_plan(
        store,
        user,
        plan,
        SubscriptionStatus::Replaced,
        payment.as_ref(),
    )?;

    Ok::<_, ApiError>(Json(ApiResponse::success(response)))
}

/// Drops back to the default plan.
pub async fn cancel(
    auth: RequireSession,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let store = state.store.as_ref();
    let user = &auth.user;

    let plan = store
        .get_default_plan()
        .api_err("Failed to get default plan")?
        .or_not_found("No default plan configured")?;

    if user.plan_id.as_deref() == Some(plan.id.as_str()) {
        return Err(ApiError::conflict("Already on the default plan"));
    }

    let response = switch_plan(store, user, plan, SubscriptionStatus::Cancelled, None)?;

    Ok::<_, ApiError>(Json(ApiResponse::success(response)))
}

pub async fn list_payments(
    auth: RequireSession,
    State(state): State<Arc<AppState>>,
    Query(params): Query<PaginationParams>,
) -> impl IntoResponse {
    let cursor = params.cursor.as_deref().unwrap_or("");

    let payments = state
        .store
        .list_user_payments(&auth.user.id, cursor, DEFAULT_PAGE_SIZE + 1)
        .api_err("Failed to list payments")?;

    let (payments, next_cursor, has_more) =
        paginate(payments, DEFAULT_PAGE_SIZE as usize, |p| p.id.clone());

    Ok::<_, ApiError>(Json(PaginatedResponse::new(payments, next_cursor, has_more)))
}
