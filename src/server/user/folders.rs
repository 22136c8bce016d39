use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;

use crate::auth::RequireUser;
use crate::error::Error;
use crate::server::{ApiJson, AppState};
use crate::server::dto::{
    CreateFolderRequest, FolderWithPath, ListFoldersParams, PaginationParams, UpdateFolderRequest,
};
use crate::server::response::{
    ApiError, ApiResponse, DEFAULT_PAGE_SIZE, PaginatedResponse, StoreOptionExt, StoreResultExt,
    paginate,
};
use crate::server::validation::validate_folder_name;
use crate::store::FolderFilter;
use crate::types::{Folder, new_id};

use super::{owned_folder, remove_blobs};

pub async fn list_folders(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListFoldersParams>,
) -> impl IntoResponse {
    let user = &auth.user;
    let store = state.store.as_ref();

    let folders = match params.parent_id.as_deref() {
        Some(parent_id) => {
            owned_folder(store, &user.id, parent_id)?;
            store
                .list_folder_children(&user.id, Some(parent_id))
                .api_err("Failed to list folders")?
        }
        None => store
            .list_folders(&user.id)
            .api_err("Failed to list folders")?,
    };

    Ok::<_, ApiError>(Json(PaginatedResponse::new(folders, None, false)))
}

pub async fn create_folder(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    ApiJson(req): ApiJson<CreateFolderRequest>,
) -> impl IntoResponse {
    let user = &auth.user;
    let store = state.store.as_ref();

    let name = validate_folder_name(&req.name)?;

    if let Some(parent_id) = &req.parent_id {
        owned_folder(store, &user.id, parent_id)?;
    }

    if store
        .get_folder_by_name(&user.id, req.parent_id.as_deref(), &name)
        .api_err("Failed to check folder")?
        .is_some()
    {
        return Err(ApiError::conflict("Folder already exists"));
    }

    let now = Utc::now();
    let folder = Folder {
        id: new_id(),
        user_id: user.id.clone(),
        parent_id: req.parent_id,
        name,
        created_at: now,
        updated_at: now,
    };

    match store.create_folder(&folder) {
        Ok(()) => {}
        Err(Error::AlreadyExists) => return Err(ApiError::conflict("Folder already exists")),
        Err(e) => {
            tracing::error!("Failed to create folder: {e}");
            return Err(ApiError::internal("Failed to create folder"));
        }
    }

    Ok::<_, ApiError>((StatusCode::CREATED, Json(ApiResponse::success(folder))))
}

pub async fn get_folder(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let store = state.store.as_ref();
    let folder = owned_folder(store, &auth.user.id, &id)?;

    let ancestors = store
        .list_folder_ancestors(&folder.id)
        .api_err("Failed to get folder path")?;
    let path = ancestors
        .iter()
        .rev()
        .map(|f| f.name.as_str())
        .collect::<Vec<_>>()
        .join("/");

    Ok::<_, ApiError>(Json(ApiResponse::success(FolderWithPath { folder, path })))
}

pub async fn update_folder(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<UpdateFolderRequest>,
) -> impl IntoResponse {
    let user = &auth.user;
    let store = state.store.as_ref();

    let mut folder = owned_folder(store, &user.id, &id)?;

    let new_parent_id = match req.parent_id {
        None => folder.parent_id.clone(),
        Some(None) => None,
        Some(Some(parent_id)) => {
            if parent_id == folder.id {
                return Err(ApiError::invalid_field(
                    "parent_id",
                    "Folder cannot be its own parent",
                ));
            }

            owned_folder(store, &user.id, &parent_id)?;

            let ancestors = store
                .list_folder_ancestors(&parent_id)
                .api_err("Failed to check for cycles")?;
            if ancestors.iter().any(|a| a.id == folder.id) {
                return Err(ApiError::invalid_field(
                    "parent_id",
                    "Moving folder would create a cycle",
                ));
            }

            Some(parent_id)
        }
    };

    let new_name = match req.name {
        Some(name) => validate_folder_name(&name)?,
        None => folder.name.clone(),
    };

    if new_name != folder.name || new_parent_id != folder.parent_id {
        let clash = store
            .get_folder_by_name(&user.id, new_parent_id.as_deref(), &new_name)
            .api_err("Failed to check folder name")?
            .is_some_and(|other| other.id != folder.id);
        if clash {
            return Err(ApiError::conflict(
                "Folder name already exists in this location",
            ));
        }
    }

    folder.name = new_name;
    folder.parent_id = new_parent_id;
    folder.updated_at = Utc::now();

    match store.update_folder(&folder) {
        Ok(()) => {}
        Err(Error::AlreadyExists) => {
            return Err(ApiError::conflict(
                "Folder name already exists in this location",
            ));
        }
        Err(e) => {
            tracing::error!("Failed to update folder: {e}");
            return Err(ApiError::internal("Failed to update folder"));
        }
    }

    Ok::<_, ApiError>(Json(ApiResponse::success(folder)))
}

/// Deletes the folder with everything beneath it, contents included.
pub async fn delete_folder(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let user = &auth.user;
    let store = state.store.as_ref();

    let folder = owned_folder(store, &user.id, &id)?;

    // Rows and the storage counter go first, in one transaction; blobs after.
    let files = store
        .delete_folder(&folder.id)
        .api_err("Failed to delete folder")?
        .or_not_found("Folder not found")?;

    let freed = remove_blobs(&state, &files).await;

    tracing::info!(
        folder_id = %folder.id,
        files = files.len(),
        freed,
        "Deleted folder"
    );

    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}

pub async fn list_folder_children(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let user = &auth.user;
    let store = state.store.as_ref();

    let folder = owned_folder(store, &user.id, &id)?;

    let children = store
        .list_folder_children(&user.id, Some(&folder.id))
        .api_err("Failed to list children")?;

    Ok::<_, ApiError>(Json(PaginatedResponse::new(children, None, false)))
}

pub async fn list_folder_files(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(params): Query<PaginationParams>,
) -> impl IntoResponse {
    let user = &auth.user;
    let store = state.store.as_ref();
    let cursor = params.cursor.as_deref().unwrap_or("");

    let folder = owned_folder(store, &user.id, &id)?;

    let files = store
        .list_files(
            &user.id,
            FolderFilter::In(&folder.id),
            cursor,
            DEFAULT_PAGE_SIZE + 1,
        )
        .api_err("Failed to list files")?;

    let (files, next_cursor, has_more) =
        paginate(files, DEFAULT_PAGE_SIZE as usize, |f| f.id.clone());

    Ok::<_, ApiError>(Json(PaginatedResponse::new(files, next_cursor, has_more)))
}
