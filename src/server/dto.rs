use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::types::{Folder, Plan, Subscription, User};

/// Distinguishes an absent field (`None`) from an explicit `null` (`Some(None)`).
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Default, Deserialize)]
pub struct PaginationParams {
    #[serde(default)]
    pub cursor: Option<String>,
}

// Accounts

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: User,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    #[serde(default)]
    pub name: Option<String>,
    /// `null` removes the phone number.
    #[serde(default, deserialize_with = "double_option")]
    pub phone: Option<Option<String>>,
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Debug, Serialize)]
pub struct UsageResponse {
    pub storage_used_bytes: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_limit_bytes: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
    pub file_count: i64,
    pub folder_count: i64,
}

// Folders

#[derive(Debug, Deserialize)]
pub struct CreateFolderRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateFolderRequest {
    #[serde(default)]
    pub name: Option<String>,
    /// `null` moves the folder to the root.
    #[serde(default, deserialize_with = "double_option")]
    pub parent_id: Option<Option<String>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListFoldersParams {
    #[serde(default)]
    pub parent_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FolderWithPath {
    #[serde(flatten)]
    pub folder: Folder,
    pub path: String,
}

// Files

#[derive(Debug, Default, Deserialize)]
pub struct ListFilesParams {
    #[serde(default)]
    pub folder_id: Option<String>,
    #[serde(default)]
    pub all: Option<bool>,
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateFileRequest {
    #[serde(default)]
    pub name: Option<String>,
    /// `null` moves the file to the root.
    #[serde(default, deserialize_with = "double_option")]
    pub folder_id: Option<Option<String>>,
}

// Billing

#[derive(Debug, Deserialize)]
pub struct SubscribeRequest {
    pub plan_id: String,
    #[serde(default)]
    pub reference: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    pub subscription: Option<Subscription>,
    pub plan: Option<Plan>,
}

// Developer portal

#[derive(Debug, Deserialize)]
pub struct CreateApiKeyRequest {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateApiKeyRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct ApiKeySecretResponse {
    pub id: String,
    pub key: String,
}

// Admin

#[derive(Debug, Deserialize)]
pub struct AdminUpdateUserRequest {
    #[serde(default)]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub is_admin: Option<bool>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePlanRequest {
    #[serde(default)]
    pub name: String,
    pub storage_limit_bytes: i64,
    #[serde(default)]
    pub price_cents: i64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub api_rate_limit: i32,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub is_active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePlanRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub storage_limit_bytes: Option<i64>,
    #[serde(default)]
    pub price_cents: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub api_rate_limit: Option<i32>,
    #[serde(default)]
    pub is_default: Option<bool>,
    #[serde(default)]
    pub is_active: Option<bool>,
}
