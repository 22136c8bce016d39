mod schema;
mod seed;
mod sqlite;

pub use seed::seed_default_plans;
pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::types::*;

/// Filter for file listings.
#[derive(Debug, Clone, Copy)]
pub enum FolderFilter<'a> {
    /// Every file of the user.
    Any,
    /// Files outside any folder.
    Root,
    /// Files directly inside the folder.
    In(&'a str),
}

/// A plan switch applied atomically: the previous subscription is closed,
/// the next one opened, the user moved and the payment (if any) recorded.
#[derive(Debug)]
pub struct PlanChange<'a> {
    pub user_id: &'a str,
    pub previous: Option<(&'a str, SubscriptionStatus)>,
    pub next: &'a Subscription,
    pub payment: Option<&'a Payment>,
}

/// Store defines the database interface.
pub trait Store: Send + Sync {
    fn initialize(&self) -> Result<()>;

    // Plan operations
    fn create_plan(&self, plan: &Plan) -> Result<()>;
    fn get_plan(&self, id: &str) -> Result<Option<Plan>>;
    fn get_plan_by_name(&self, name: &str) -> Result<Option<Plan>>;
    fn get_default_plan(&self) -> Result<Option<Plan>>;
    fn list_plans(&self, include_inactive: bool) -> Result<Vec<Plan>>;
    fn update_plan(&self, plan: &Plan) -> Result<()>;
    /// Marks one plan as the default and clears the flag everywhere else.
    fn set_default_plan(&self, id: &str) -> Result<()>;
    fn delete_plan(&self, id: &str) -> Result<bool>;
    fn count_plan_users(&self, id: &str) -> Result<i64>;

    // User operations
    fn create_user(&self, user: &User) -> Result<()>;
    fn get_user(&self, id: &str) -> Result<Option<User>>;
    fn get_user_by_email(&self, email: &str) -> Result<Option<User>>;
    fn get_user_by_phone(&self, phone: &str) -> Result<Option<User>>;
    fn list_users(&self, cursor: &str, limit: i32) -> Result<Vec<User>>;
    fn update_user(&self, user: &User) -> Result<()>;
    fn delete_user(&self, id: &str) -> Result<bool>;
    fn has_admin_user(&self) -> Result<bool>;

    /// Adds `bytes` to the user's storage counter if the result stays within
    /// `limit`. Returns false (and changes nothing) when it would not.
    fn reserve_storage(&self, user_id: &str, bytes: i64, limit: Option<i64>) -> Result<bool>;
    /// Subtracts `bytes` from the user's storage counter, never below zero.
    fn release_storage(&self, user_id: &str, bytes: i64) -> Result<()>;

    // Session operations
    fn create_session(&self, session: &Session) -> Result<()>;
    fn get_session_by_lookup(&self, lookup: &str) -> Result<Option<Session>>;
    fn delete_session(&self, id: &str) -> Result<bool>;
    fn delete_user_sessions(&self, user_id: &str, except: Option<&str>) -> Result<usize>;
    fn update_session_last_used(&self, id: &str) -> Result<()>;

    // Folder operations (self-referencing tree)
    fn create_folder(&self, folder: &Folder) -> Result<()>;
    fn get_folder(&self, id: &str) -> Result<Option<Folder>>;
    fn get_folder_by_name(
        &self,
        user_id: &str,
        parent_id: Option<&str>,
        name: &str,
    ) -> Result<Option<Folder>>;
    fn list_folders(&self, user_id: &str) -> Result<Vec<Folder>>;
    fn list_folder_children(&self, user_id: &str, parent_id: Option<&str>) -> Result<Vec<Folder>>;
    /// Returns the folder and its ancestors, nearest first.
    fn list_folder_ancestors(&self, id: &str) -> Result<Vec<Folder>>;
    fn update_folder(&self, folder: &Folder) -> Result<()>;
    /// Deletes the folder and its subtree in one transaction, releasing the
    /// owner's storage for every file that went with it.
    ///
    /// Returns the removed files so their blobs can be cleaned up, or `None`
    /// if the folder does not exist.
    fn delete_folder(&self, id: &str) -> Result<Option<Vec<File>>>;

    // File operations
    fn create_file(&self, file: &File) -> Result<()>;
    fn get_file(&self, id: &str) -> Result<Option<File>>;
    fn list_files(
        &self,
        user_id: &str,
        filter: FolderFilter<'_>,
        cursor: &str,
        limit: i32,
    ) -> Result<Vec<File>>;
    fn update_file(&self, file: &File) -> Result<()>;
    fn delete_file(&self, id: &str) -> Result<bool>;
    fn count_user_files(&self, user_id: &str) -> Result<i64>;
    fn count_user_folders(&self, user_id: &str) -> Result<i64>;

    // API key operations
    fn create_api_key(&self, key: &ApiKey) -> Result<()>;
    fn get_api_key(&self, id: &str) -> Result<Option<ApiKey>>;
    fn get_api_key_by_lookup(&self, lookup: &str) -> Result<Option<ApiKey>>;
    fn list_user_api_keys(&self, user_id: &str) -> Result<Vec<ApiKey>>;
    fn update_api_key(&self, key: &ApiKey) -> Result<()>;
    fn delete_api_key(&self, id: &str) -> Result<bool>;
    fn update_api_key_last_used(&self, id: &str) -> Result<()>;

    // Billing operations
    fn create_payment(&self, payment: &Payment) -> Result<()>;
    fn list_user_payments(&self, user_id: &str, cursor: &str, limit: i32) -> Result<Vec<Payment>>;
    fn create_subscription(&self, subscription: &Subscription) -> Result<()>;
    fn get_active_subscription(&self, user_id: &str) -> Result<Option<Subscription>>;
    fn update_subscription(&self, subscription: &Subscription) -> Result<()>;
    fn change_plan(&self, change: &PlanChange<'_>) -> Result<()>;

    // Audit log operations
    fn create_audit_log(&self, entry: &AuditLog) -> Result<()>;
    fn list_audit_logs(&self, cursor: &str, limit: i32) -> Result<Vec<AuditLog>>;

    fn stats(&self) -> Result<SystemStats>;
}
