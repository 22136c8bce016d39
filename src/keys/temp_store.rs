use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

struct Entry {
    secret: String,
    owner_id: String,
    expires_at: Instant,
}

/// In-memory holder for freshly issued API key secrets.
///
/// A secret is kept only long enough for its owner to read it once. Entries
/// vanish on restart; nothing here is persisted.
#[derive(Clone)]
pub struct TempKeyStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    ttl: Duration,
}

impl TempKeyStore {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn store(&self, key_id: &str, secret: &str, owner_id: &str) {
        let entry = Entry {
            secret: secret.to_string(),
            owner_id: owner_id.to_string(),
            expires_at: Instant::now() + self.ttl,
        };
        self.entries().insert(key_id.to_string(), entry);
    }

    /// Returns the secret if it exists, belongs to `owner_id` and has not expired.
    pub fn retrieve(&self, key_id: &str, owner_id: &str) -> Option<String> {
        let entries = self.entries();
        let entry = entries.get(key_id)?;

        if entry.owner_id != owner_id || entry.expires_at <= Instant::now() {
            return None;
        }

        Some(entry.secret.clone())
    }

    /// Like [`retrieve`](Self::retrieve), but removes the entry under the same
    /// lock so only one caller ever gets the secret.
    pub fn take(&self, key_id: &str, owner_id: &str) -> Option<String> {
        let mut entries = self.entries();
        let entry = entries.get(key_id)?;

        if entry.owner_id != owner_id {
            return None;
        }
        if entry.expires_at <= Instant::now() {
            entries.remove(key_id);
            return None;
        }

        entries.remove(key_id).map(|entry| entry.secret)
    }

    pub fn remove(&self, key_id: &str) {
        self.entries().remove(key_id);
    }

    /// Drops every expired entry and returns how many went.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        before - entries.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs [`sweep_expired`](Self::sweep_expired) every `interval` until the task is aborted.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let removed = store.sweep_expired();
                if removed > 0 {
                    tracing::debug!(removed, "Swept expired temporary keys");
                }
            }
        })
    }
}

impl Default for TempKeyStore {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}
