use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::task::JoinHandle;

use cloudvault::config::ServerConfig;
use cloudvault::server::{AppState, create_router};
use cloudvault::storage::LocalStorage;
use cloudvault::store::{SqliteStore, Store, seed_default_plans};
use cloudvault::types::{Plan, new_id};

pub const PASSWORD: &str = "correct horse battery";

/// An in-process server over a throwaway data directory with local blob storage.
pub struct TestServer {
    pub temp_dir: TempDir,
    pub base_url: String,
    pub state: Arc<AppState>,
    pub client: reqwest::Client,
    handle: JoinHandle<()>,
}

/// A registered account and its session token.
pub struct TestUser {
    pub id: String,
    pub email: String,
    pub token: String,
}

impl TestServer {
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    pub async fn start_with(configure: impl FnOnce(&mut ServerConfig)) -> Self {
        let temp_dir = TempDir::new().expect("create temp dir");

        let mut config = ServerConfig {
            data_dir: temp_dir.path().to_path_buf(),
            ..ServerConfig::default()
        };
        configure(&mut config);

        let store = SqliteStore::new(config.db_path()).expect("open store");
        store.initialize().expect("initialize store");
        seed_default_plans(&store).expect("seed plans");

        let storage = LocalStorage::new(&config.data_dir);
        let state = Arc::new(AppState::new(Arc::new(store), Arc::new(storage), config));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let port = listener.local_addr().expect("local addr").port();
        let app = create_router(state.clone());

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve");
        });

        Self {
            temp_dir,
            base_url: format!("http://127.0.0.1:{port}"),
            state,
            client: reqwest::Client::new(),
            handle,
        }
    }

    pub fn data_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn store(&self) -> &dyn Store {
        self.state.store.as_ref()
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    pub async fn register(&self, email: &str) -> TestUser {
        let resp = self
            .client
            .post(self.url("/auth/register"))
            .json(&json!({
                "email": email,
                "password": PASSWORD,
                "name": "Test User",
            }))
            .send()
            .await
            .expect("register");
        assert_eq!(resp.status(), 201, "register {email}");

        let body: Value = resp.json().await.expect("parse register response");
        TestUser {
            id: body["data"]["user"]["id"]
                .as_str()
                .expect("user id")
                .to_string(),
            email: email.to_string(),
            token: body["data"]["token"].as_str().expect("token").to_string(),
        }
    }

    pub async fn register_admin(&self, email: &str) -> TestUser {
        let user = self.register(email).await;
        let mut row = self
            .store()
            .get_user(&user.id)
            .expect("get user")
            .expect("user exists");
        row.is_admin = true;
        self.store().update_user(&row).expect("promote user");
        user
    }

    /// Creates an active plan straight in the store.
    pub fn create_plan(&self, name: &str, storage_limit_bytes: i64, price_cents: i64, rate: i32) -> Plan {
        let now = Utc::now();
        let plan = Plan {
            id: new_id(),
            name: name.to_string(),
            storage_limit_bytes,
            price_cents,
            currency: "USD".to_string(),
            api_rate_limit: rate,
            is_default: false,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        self.store().create_plan(&plan).expect("create plan");
        plan
    }

    /// Moves a user onto a plan without going through billing.
    pub fn assign_plan(&self, user_id: &str, plan_id: &str) {
        let mut user = self
            .store()
            .get_user(user_id)
            .expect("get user")
            .expect("user exists");
        user.plan_id = Some(plan_id.to_string());
        self.store().update_user(&user).expect("assign plan");
    }

    pub async fn create_folder(&self, token: &str, name: &str, parent_id: Option<&str>) -> Value {
        let resp = self
            .client
            .post(self.url("/folders"))
            .bearer_auth(token)
            .json(&json!({ "name": name, "parent_id": parent_id }))
            .send()
            .await
            .expect("create folder");
        assert_eq!(resp.status(), 201, "create folder {name}");
        let body: Value = resp.json().await.expect("parse folder");
        body["data"].clone()
    }

    pub async fn upload(
        &self,
        token: &str,
        name: &str,
        bytes: Vec<u8>,
        folder_id: Option<&str>,
    ) -> reqwest::Response {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(name.to_string())
            .mime_str("application/octet-stream")
            .expect("mime");
        let mut form = reqwest::multipart::Form::new();
        if let Some(folder_id) = folder_id {
            form = form.text("folder_id", folder_id.to_string());
        }
        form = form.part("file", part);

        self.client
            .post(self.url("/files/upload"))
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await
            .expect("upload")
    }

    pub fn storage_used(&self, user_id: &str) -> i64 {
        self.store()
            .get_user(user_id)
            .expect("get user")
            .expect("user exists")
            .storage_used_bytes
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
