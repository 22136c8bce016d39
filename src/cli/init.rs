use std::fs;
use std::path::PathBuf;

use anyhow::bail;
use chrono::Utc;
use inquire::validator::Validation;
use inquire::{Password, Text};

use crate::auth::hash_password;
use crate::server::validation::{validate_email, validate_password};
use crate::store::{SqliteStore, Store, seed_default_plans};
use crate::types::{Subscription, SubscriptionStatus, User, new_id};

pub fn run_init(
    data_dir: String,
    email: Option<String>,
    password: Option<String>,
    non_interactive: bool,
) -> anyhow::Result<()> {
    let data_path = PathBuf::from(data_dir);
    fs::create_dir_all(&data_path)?;

    let db_path = data_path.join("cloudvault.db");
    let store = SqliteStore::new(&db_path)?;
    store.initialize()?;

    if store.has_admin_user()? {
        bail!(
            "Server already initialized. An admin account exists in {}",
            db_path.display()
        );
    }

    let plans = seed_default_plans(&store)?;
    for plan in &plans {
        println!("Created plan '{}'", plan.name);
    }

    let email = match email {
        Some(email) => validate_email(&email).map_err(|e| anyhow::anyhow!(e.message))?,
        None if non_interactive => bail!("--email is required in non-interactive mode"),
        None => {
            let input = Text::new("Admin email:")
                .with_validator(|input: &str| {
                    Ok(validate_email(input)
                        .map(|_| Validation::Valid)
                        .unwrap_or_else(|e| Validation::Invalid(e.message.into())))
                })
                .prompt()?;
            validate_email(&input).map_err(|e| anyhow::anyhow!(e.message))?
        }
    };

    let password = match password {
        Some(password) => {
            validate_password(&password, "password").map_err(|e| anyhow::anyhow!(e.message))?;
            password
        }
        None if non_interactive => bail!("--password is required in non-interactive mode"),
        None => Password::new("Admin password:")
            .with_validator(|input: &str| {
                Ok(validate_password(input, "password")
                    .map(|()| Validation::Valid)
                    .unwrap_or_else(|e| Validation::Invalid(e.message.into())))
            })
            .prompt()?,
    };

    if store.get_user_by_email(&email)?.is_some() {
        bail!("User '{email}' already exists. Use 'cloudvault admin promote' instead.");
    }

    let plan = store.get_default_plan()?;
    let now = Utc::now();
    let user = User {
        id: new_id(),
        email: email.clone(),
        phone: None,
        name: "Administrator".to_string(),
        password_hash: hash_password(&password)?,
        plan_id: plan.as_ref().map(|p| p.id.clone()),
        storage_used_bytes: 0,
        is_admin: true,
        created_at: now,
        updated_at: now,
    };
    store.create_user(&user)?;

    if let Some(plan) = &plan {
        store.create_subscription(&Subscription {
            id: new_id(),
            user_id: user.id.clone(),
            plan_id: plan.id.clone(),
            status: SubscriptionStatus::Active,
            started_at: now,
            ended_at: None,
        })?;
    }

    println!();
    println!("========================================");
    println!("Admin account created: {email}");
    println!("Database: {}", db_path.display());
    println!("========================================");
    println!();

    Ok(())
}
