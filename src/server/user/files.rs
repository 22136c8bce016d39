use std::sync::Arc;

use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State, multipart::MultipartError},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio_util::io::ReaderStream;

use crate::auth::RequireUser;
use crate::server::{ApiJson, AppState};
use crate::server::dto::{ListFilesParams, UpdateFileRequest};
use crate::server::response::{
    ApiError, ApiResponse, DEFAULT_PAGE_SIZE, PaginatedResponse, StoreResultExt, paginate,
};
use crate::server::validation::validate_file_name;
use crate::store::FolderFilter;
use crate::types::{File, new_id};

use super::{owned_file, owned_folder};

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

fn multipart_error(e: MultipartError) -> ApiError {
    ApiError {
        status: e.status(),
        message: e.body_text(),
        field: None,
    }
}

/// Deletes the blobs behind `files`, logging failures instead of returning them.
///
/// Returns the total size of the files, for releasing quota.
pub(crate) async fn remove_blobs(state: &AppState, files: &[File]) -> i64 {
    let mut total = 0;
    for file in files {
        if let Err(e) = state.storage.delete(&file.external_id).await {
            tracing::warn!(file_id = %file.id, "Failed to delete blob: {e}");
        }
        total += file.size_bytes;
    }
    total
}

struct Upload {
    name: String,
    mime_type: String,
    data: Bytes,
}

pub async fn upload_file(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> impl IntoResponse {
    let user = &auth.user;
    let store = state.store.as_ref();

    let mut upload: Option<Upload> = None;
    let mut folder_id: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("file") => {
                let name = field
                    .file_name()
                    .ok_or_else(|| ApiError::invalid_field("file", "File part needs a file name"))
                    .and_then(validate_file_name)?;
                let mime_type = field
                    .content_type()
                    .unwrap_or(DEFAULT_MIME_TYPE)
                    .to_string();
                let data = field.bytes().await.map_err(multipart_error)?;
                upload = Some(Upload {
                    name,
                    mime_type,
                    data,
                });
            }
            Some("folder_id") => {
                let value = field.text().await.map_err(multipart_error)?;
                let value = value.trim();
                if !value.is_empty() {
                    folder_id = Some(value.to_string());
                }
            }
            _ => {}
        }
    }

    let upload = upload.ok_or_else(|| ApiError::invalid_field("file", "Missing file part"))?;

    if let Some(folder_id) = &folder_id {
        owned_folder(store, &user.id, folder_id)?;
    }

    let limit = match &user.plan_id {
        Some(plan_id) => store
            .get_plan(plan_id)
            .api_err("Failed to get plan")?
            .map(|p| p.storage_limit_bytes),
        None => None,
    };

    let size = i64::try_from(upload.data.len())
        .map_err(|_| ApiError::payload_too_large("File is too large"))?;

    if !store
        .reserve_storage(&user.id, size, limit)
        .api_err("Failed to reserve storage")?
    {
        return Err(ApiError::payload_too_large("Storage quota exceeded"));
    }

    let checksum = hex::encode(Sha256::digest(&upload.data));
    let file_id = new_id();

    let external_id = match state.storage.put(&user.id, &file_id, upload.data).await {
        Ok(external_id) => external_id,
        Err(e) => {
            if let Err(e) = store.release_storage(&user.id, size) {
                tracing::error!("Failed to release storage after failed upload: {e}");
            }
            return Err(ApiError::from(e));
        }
    };

    let now = Utc::now();
    let file = File {
        id: file_id,
        user_id: user.id.clone(),
        folder_id,
        name: upload.name,
        size_bytes: size,
        mime_type: upload.mime_type,
        external_id,
        checksum,
        created_at: now,
        updated_at: now,
    };

    if let Err(e) = store.create_file(&file) {
        tracing::error!("Failed to record file: {e}");
        remove_blobs(&state, std::slice::from_ref(&file)).await;
        if let Err(e) = store.release_storage(&user.id, size) {
            tracing::error!("Failed to release storage after failed upload: {e}");
        }
        return Err(ApiError::internal("Failed to record file"));
    }

    tracing::info!(file_id = %file.id, size, backend = state.storage.name(), "Uploaded file");

    Ok::<_, ApiError>((StatusCode::CREATED, Json(ApiResponse::success(file))))
}

pub async fn list_files(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListFilesParams>,
) -> impl IntoResponse {
    let user = &auth.user;
    let store = state.store.as_ref();
    let cursor = params.cursor.as_deref().unwrap_or("");

    let filter = if params.all == Some(true) {
        FolderFilter::Any
    } else if let Some(folder_id) = params.folder_id.as_deref() {
        owned_folder(store, &user.id, folder_id)?;
        FolderFilter::In(folder_id)
    } else {
        FolderFilter::Root
    };

    let files = store
        .list_files(&user.id, filter, cursor, DEFAULT_PAGE_SIZE + 1)
        .api_err("Failed to list files")?;

    let (files, next_cursor, has_more) =
        paginate(files, DEFAULT_PAGE_SIZE as usize, |f| f.id.clone());

    Ok::<_, ApiError>(Json(PaginatedResponse::new(files, next_cursor, has_more)))
}

pub async fn get_file(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let file = owned_file(state.store.as_ref(), &auth.user.id, &id)?;

    Ok::<_, ApiError>(Json(ApiResponse::success(file)))
}

fn content_disposition(name: &str) -> HeaderValue {
    let escaped: String = name
        .chars()
        .map(|c| if c == '"' || c.is_control() || !c.is_ascii() { '_' } else { c })
        .collect();
    HeaderValue::from_str(&format!("attachment; filename=\"{escaped}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

pub async fn download_file(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let file = owned_file(state.store.as_ref(), &auth.user.id, &id)?;

    let (reader, size) = state.storage.get(&file.external_id).await?;
    let body = Body::from_stream(ReaderStream::new(reader));

    let content_type = HeaderValue::from_str(&file.mime_type)
        .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_MIME_TYPE));

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_LENGTH, HeaderValue::from(size)),
            (header::CONTENT_DISPOSITION, content_disposition(&file.name)),
        ],
        body,
    )
        .into_response())
}

pub async fn update_file(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    ApiJson(req): ApiJson<UpdateFileRequest>,
) -> impl IntoResponse {
    let user = &auth.user;
    let store = state.store.as_ref();

    let mut file = owned_file(store, &user.id, &id)?;

    if let Some(name) = req.name {
        file.name = validate_file_name(&name)?;
    }

    match req.folder_id {
        Some(Some(folder_id)) => {
            owned_folder(store, &user.id, &folder_id)?;
            file.folder_id = Some(folder_id);
        }
        Some(None) => file.folder_id = None,
        None => {}
    }

    file.updated_at = Utc::now();
    store.update_file(&file).api_err("Failed to update file")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(file)))
}

pub async fn delete_file(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let user = &auth.user;
    let store = state.store.as_ref();

    let file = owned_file(store, &user.id, &id)?;

    state.storage.delete(&file.external_id).await?;

    store.delete_file(&file.id).api_err("Failed to delete file")?;
    store
        .release_storage(&user.id, file.size_bytes)
        .api_err("Failed to update storage usage")?;

    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}
