mod billing;
mod developer;
mod files;
mod folders;

use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, patch, post},
};

use crate::server::AppState;
use crate::server::response::{ApiError, StoreOptionExt, StoreResultExt};
use crate::store::Store;
use crate::types::{File, Folder};

pub(crate) use files::remove_blobs;

pub fn user_router(max_upload_bytes: usize) -> Router<Arc<AppState>> {
    Router::new()
        // Folders (hierarchical)
        .route(
            "/folders",
            get(folders::list_folders).post(folders::create_folder),
        )
        .route(
            "/folders/{id}",
            get(folders::get_folder)
                .patch(folders::update_folder)
                .delete(folders::delete_folder),
        )
        .route("/folders/{id}/children", get(folders::list_folder_children))
        .route("/folders/{id}/files", get(folders::list_folder_files))
        // Files
        .route(
            "/files/upload",
            post(files::upload_file).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/files", get(files::list_files))
        .route(
            "/files/{id}",
            get(files::get_file)
                .patch(files::update_file)
                .delete(files::delete_file),
        )
        .route("/files/{id}/download", get(files::download_file))
        // Plans and billing
        .route("/plans", get(billing::list_plans))
        .route("/billing/subscription", get(billing::get_subscription))
        .route("/billing/subscribe", post(billing::subscribe))
        .route("/billing/cancel", post(billing::cancel))
        .route("/billing/payments", get(billing::list_payments))
        // Developer portal
        .route(
            "/developer/keys",
            get(developer::list_keys).post(developer::create_key),
        )
        .route(
            "/developer/keys/{id}",
            patch(developer::update_key).delete(developer::delete_key),
        )
        .route("/developer/keys/{id}/secret", get(developer::reveal_secret))
}

/// Loads a folder owned by `user_id`. Other users' folders look missing.
fn owned_folder(store: &dyn Store, user_id: &str, id: &str) -> Result<Folder, ApiError> {
    store
        .get_folder(id)
        .api_err("Failed to get folder")?
        .filter(|f| f.user_id == user_id)
        .or_not_found("Folder not found")
}

/// Loads a file owned by `user_id`. Other users' files look missing.
fn owned_file(store: &dyn Store, user_id: &str, id: &str) -> Result<File, ApiError> {
    store
        .get_file(id)
        .api_err("Failed to get file")?
        .filter(|f| f.user_id == user_id)
        .or_not_found("File not found")
}
