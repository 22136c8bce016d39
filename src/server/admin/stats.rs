use std::sync::Arc;

use axum::{Json, extract::State, response::IntoResponse};

use crate::auth::RequireAdmin;
use crate::server::AppState;
use crate::server::response::{ApiError, ApiResponse, StoreResultExt};

pub async fn get_stats(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let stats = state.store.stats().api_err("Failed to get stats")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(stats)))
}
