use anyhow::bail;
use chrono::Utc;

use crate::store::Store;

use super::init_store;

pub fn run_promote(data_dir: String, email: String) -> anyhow::Result<()> {
    let store = init_store(&data_dir)?;

    let email = email.trim().to_lowercase();
    let Some(mut user) = store.get_user_by_email(&email)? else {
        bail!("User '{email}' not found");
    };

    if user.is_admin {
        println!("User '{email}' is already an admin");
        return Ok(());
    }

    user.is_admin = true;
    user.updated_at = Utc::now();
    store.update_user(&user)?;

    println!("Promoted '{email}' to admin");

    Ok(())
}
