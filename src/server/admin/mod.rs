mod audit;
mod plans;
mod stats;
mod users;

use std::sync::Arc;

use axum::{Router, routing::get};

use crate::server::AppState;

pub fn admin_router() -> Router<Arc<AppState>> {
    Router::new()
        // User routes
        .route("/users", get(users::list_users))
        .route(
            "/users/{id}",
            get(users::get_user)
                .patch(users::update_user)
                .delete(users::delete_user),
        )
        // Plan routes
        .route("/plans", get(plans::list_plans).post(plans::create_plan))
        .route(
            "/plans/{id}",
            get(plans::get_plan)
                .patch(plans::update_plan)
                .delete(plans::delete_plan),
        )
        // Audit and stats
        .route("/audit-logs", get(audit::list_audit_logs))
        .route("/stats", get(stats::get_stats))
}
