mod auth;
mod profile;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};

use crate::server::AppState;

pub fn account_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        .route("/me", get(profile::get_me).patch(profile::update_me))
        .route("/me/password", post(profile::change_password))
        .route("/me/usage", get(profile::get_usage))
}
