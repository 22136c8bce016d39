use chrono::Utc;

use super::Store;
use crate::error::Result;
use crate::types::{Plan, new_id};

const GIB: i64 = 1024 * 1024 * 1024;

/// name, storage limit, price in cents, requests per minute, default
const DEFAULT_PLANS: &[(&str, i64, i64, i32, bool)] = &[
    ("free", 5 * GIB, 0, 60, true),
    ("pro", 200 * GIB, 999, 600, false),
    ("business", 2048 * GIB, 2999, 3000, false),
];

/// Creates the built-in plans that are missing. Existing plans are left as they are.
///
/// Returns the plans that were created.
pub fn seed_default_plans(store: &dyn Store) -> Result<Vec<Plan>> {
    let has_default = store.get_default_plan()?.is_some();
    let mut created = Vec::new();

    for &(name, limit, price, rate, is_default) in DEFAULT_PLANS {
        if store.get_plan_by_name(name)?.is_some() {
            continue;
        }

        let now = Utc::now();
        let plan = Plan {
            id: new_id(),
            name: name.to_string(),
            storage_limit_bytes: limit,
            price_cents: price,
            currency: "USD".to_string(),
            api_rate_limit: rate,
            is_default: is_default && !has_default,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        store.create_plan(&plan)?;
        tracing::info!(plan = %plan.name, "Seeded plan");
        created.push(plan);
    }

    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use tempfile::TempDir;

    #[test]
    fn test_seed_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let store = SqliteStore::new(temp.path().join("test.db")).unwrap();
        store.initialize().unwrap();

        let created = seed_default_plans(&store).unwrap();
        assert_eq!(created.len(), 3);

        let again = seed_default_plans(&store).unwrap();
        assert!(again.is_empty());

        let default = store.get_default_plan().unwrap().unwrap();
        assert_eq!(default.name, "free");
        assert!(default.is_free());
        assert_eq!(store.list_plans(false).unwrap().len(), 3);
    }
}
