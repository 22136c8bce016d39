use serde::Serialize;

use crate::store::Store;

use super::init_store;

#[derive(Serialize)]
struct PlanOutput {
    id: String,
    name: String,
    storage_limit_bytes: i64,
    price_cents: i64,
    currency: String,
    api_rate_limit: i32,
    is_default: bool,
    is_active: bool,
    users: i64,
}

#[derive(Serialize)]
struct ServerInfo {
    users: i64,
    admins: Vec<String>,
    folders: i64,
    files: i64,
    stored_bytes: i64,
    plans: Vec<PlanOutput>,
}

pub fn run_info(data_dir: String, json: bool) -> anyhow::Result<()> {
    let store = init_store(&data_dir)?;

    let stats = store.stats()?;

    let mut admins = Vec::new();
    let mut cursor = String::new();
    loop {
        let users = store.list_users(&cursor, 500)?;
        let Some(last) = users.last() else {
            break;
        };
        cursor = last.id.clone();
        admins.extend(users.into_iter().filter(|u| u.is_admin).map(|u| u.email));
    }

    let mut plans = Vec::new();
    for plan in store.list_plans(true)? {
        let users = store.count_plan_users(&plan.id)?;
        plans.push(PlanOutput {
            id: plan.id,
            name: plan.name,
            storage_limit_bytes: plan.storage_limit_bytes,
            price_cents: plan.price_cents,
            currency: plan.currency,
            api_rate_limit: plan.api_rate_limit,
            is_default: plan.is_default,
            is_active: plan.is_active,
            users,
        });
    }

    let info = ServerInfo {
        users: stats.users,
        admins,
        folders: stats.folders,
        files: stats.files,
        stored_bytes: stats.stored_bytes,
        plans,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!();
    println!("CloudVault Server Status");
    println!("{}", "─".repeat(24));
    println!("Users:    {} ({} admin)", info.users, info.admins.len());
    println!("Folders:  {}", info.folders);
    println!("Files:    {}", info.files);
    println!("Stored:   {} bytes", info.stored_bytes);
    println!("Plans:");
    for plan in &info.plans {
        let mut flags = Vec::new();
        if plan.is_default {
            flags.push("default");
        }
        if !plan.is_active {
            flags.push("inactive");
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", flags.join(", "))
        };
        println!(
            "  {:<12} {:>6} {} {:>5} users{}",
            plan.name,
            plan.price_cents,
            plan.currency,
            plan.users,
            flags
        );
    }
    println!();

    Ok(())
}
