use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
    response::IntoResponse,
};
use chrono::Utc;
use serde_json::Value;

use crate::auth::RequireAdmin;
use crate::server::AppState;
use crate::server::dto::PaginationParams;
use crate::server::response::{
    ApiError, DEFAULT_PAGE_SIZE, PaginatedResponse, StoreResultExt, paginate,
};
use crate::store::Store;
use crate::types::{AuditLog, new_id};

/// Records an admin action. A failed write is logged, not surfaced.
pub(super) fn record(
    store: &dyn Store,
    actor_id: &str,
    action: &str,
    target_type: &str,
    target_id: &str,
    details: Value,
) {
    let entry = AuditLog {
        id: new_id(),
        actor_id: actor_id.to_string(),
        action: action.to_string(),
        target_type: target_type.to_string(),
        target_id: target_id.to_string(),
        details,
        created_at: Utc::now(),
    };

    if let Err(e) = store.create_audit_log(&entry) {
        tracing::warn!(action, target_id, "Failed to write audit log: {e}");
    }
}

pub async fn list_audit_logs(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Query(params): Query<PaginationParams>,
) -> impl IntoResponse {
    let cursor = params.cursor.as_deref().unwrap_or("");

    let logs = state
        .store
        .list_audit_logs(cursor, DEFAULT_PAGE_SIZE + 1)
        .api_err("Failed to list audit logs")?;

    let (logs, next_cursor, has_more) =
        paginate(logs, DEFAULT_PAGE_SIZE as usize, |l| l.id.clone());

    Ok::<_, ApiError>(Json(PaginatedResponse::new(logs, next_cursor, has_more)))
}
