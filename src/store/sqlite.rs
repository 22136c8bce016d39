use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection, OptionalExtension, Row, params};

use super::schema::SCHEMA;
use super::{FolderFilter, PlanChange, Store};
use crate::error::{Error, Result};
use crate::types::*;

const PLAN_COLUMNS: &str = "id, name, storage_limit_bytes, price_cents, currency, api_rate_limit, \
                            is_default, is_active, created_at, updated_at";
const USER_COLUMNS: &str = "id, email, phone, name, password_hash, plan_id, storage_used_bytes, \
                            is_admin, created_at, updated_at";
const SESSION_COLUMNS: &str =
    "id, user_id, token_lookup, token_hash, created_at, expires_at, last_used_at";
const FOLDER_COLUMNS: &str = "id, user_id, parent_id, name, created_at, updated_at";
const FILE_COLUMNS: &str = "id, user_id, folder_id, name, size_bytes, mime_type, external_id, \
                            checksum, created_at, updated_at";
const API_KEY_COLUMNS: &str = "id, user_id, name, key_lookup, key_hash, is_active, \
                               trial_expires_at, last_used_at, created_at";
const PAYMENT_COLUMNS: &str =
    "id, user_id, plan_id, amount_cents, currency, status, reference, created_at";
const SUBSCRIPTION_COLUMNS: &str = "id, user_id, plan_id, status, started_at, ended_at";
const AUDIT_COLUMNS: &str = "id, actor_id, action, target_type, target_id, details, created_at";

/// Guards against runaway recursion should a cycle ever reach the folder table.
const MAX_FOLDER_DEPTH: i32 = 1000;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Handle SQLite's default datetime format: "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::error!("Invalid datetime in database: '{}' - {}", s, e);
            Utc::now()
        })
}

fn parse_optional_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.map(|s| parse_datetime(&s))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

impl ToSql for PaymentStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for PaymentStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Self::parse(value.as_str()?).ok_or(FromSqlError::InvalidType)
    }
}

impl ToSql for SubscriptionStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(self.as_str().into())
    }
}

impl FromSql for SubscriptionStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Self::parse(value.as_str()?).ok_or(FromSqlError::InvalidType)
    }
}

fn plan_from_row(row: &Row<'_>) -> rusqlite::Result<Plan> {
    Ok(Plan {
        id: row.get(0)?,
        name: row.get(1)?,
        storage_limit_bytes: row.get(2)?,
        price_cents: row.get(3)?,
        currency: row.get(4)?,
        api_rate_limit: row.get(5)?,
        is_default: row.get(6)?,
        is_active: row.get(7)?,
        created_at: parse_datetime(&row.get::<_, String>(8)?),
        updated_at: parse_datetime(&row.get::<_, String>(9)?),
    })
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        phone: row.get(2)?,
        name: row.get(3)?,
        password_hash: row.get(4)?,
        plan_id: row.get(5)?,
        storage_used_bytes: row.get(6)?,
        is_admin: row.get(7)?,
        created_at: parse_datetime(&row.get::<_, String>(8)?),
        updated_at: parse_datetime(&row.get::<_, String>(9)?),
    })
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        user_id: row.get(1)?,
        token_lookup: row.get(2)?,
        token_hash: row.get(3)?,
        created_at: parse_datetime(&row.get::<_, String>(4)?),
        expires_at: parse_datetime(&row.get::<_, String>(5)?),
        last_used_at: parse_optional_datetime(row.get(6)?),
    })
}

fn folder_from_row(row: &Row<'_>) -> rusqlite::Result<Folder> {
    Ok(Folder {
        id: row.get(0)?,
        user_id: row.get(1)?,
        parent_id: row.get(2)?,
        name: row.get(3)?,
        created_at: parse_datetime(&row.get::<_, String>(4)?),
        updated_at: parse_datetime(&row.get::<_, String>(5)?),
    })
}

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<File> {
    Ok(File {
        id: row.get(0)?,
        user_id: row.get(1)?,
        folder_id: row.get(2)?,
        name: row.get(3)?,
        size_bytes: row.get(4)?,
        mime_type: row.get(5)?,
        external_id: row.get(6)?,
        checksum: row.get(7)?,
        created_at: parse_datetime(&row.get::<_, String>(8)?),
        updated_at: parse_datetime(&row.get::<_, String>(9)?),
    })
}

fn api_key_from_row(row: &Row<'_>) -> rusqlite::Result<ApiKey> {
    Ok(ApiKey {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        key_lookup: row.get(3)?,
        key_hash: row.get(4)?,
        is_active: row.get(5)?,
        trial_expires_at: parse_optional_datetime(row.get(6)?),
        last_used_at: parse_optional_datetime(row.get(7)?),
        created_at: parse_datetime(&row.get::<_, String>(8)?),
    })
}

fn payment_from_row(row: &Row<'_>) -> rusqlite::Result<Payment> {
    Ok(Payment {
        id: row.get(0)?,
        user_id: row.get(1)?,
        plan_id: row.get(2)?,
        amount_cents: row.get(3)?,
        currency: row.get(4)?,
        status: row.get(5)?,
        reference: row.get(6)?,
        created_at: parse_datetime(&row.get::<_, String>(7)?),
    })
}

fn subscription_from_row(row: &Row<'_>) -> rusqlite::Result<Subscription> {
    Ok(Subscription {
        id: row.get(0)?,
        user_id: row.get(1)?,
        plan_id: row.get(2)?,
        status: row.get(3)?,
        started_at: parse_datetime(&row.get::<_, String>(4)?),
        ended_at: parse_optional_datetime(row.get(5)?),
    })
}

fn audit_from_row(row: &Row<'_>) -> rusqlite::Result<AuditLog> {
    let details: String = row.get(5)?;
    Ok(AuditLog {
        id: row.get(0)?,
        actor_id: row.get(1)?,
        action: row.get(2)?,
        target_type: row.get(3)?,
        target_id: row.get(4)?,
        details: serde_json::from_str(&details).unwrap_or(serde_json::Value::Null),
        created_at: parse_datetime(&row.get::<_, String>(6)?),
    })
}

fn insert_subscription(conn: &Connection, sub: &Subscription) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO subscriptions (id, user_id, plan_id, status, started_at, ended_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            sub.id,
            sub.user_id,
            sub.plan_id,
            sub.status,
            format_datetime(&sub.started_at),
            sub.ended_at.as_ref().map(format_datetime),
        ],
    )
}

fn insert_payment(conn: &Connection, payment: &Payment) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO payments (id, user_id, plan_id, amount_cents, currency, status, reference, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            payment.id,
            payment.user_id,
            payment.plan_id,
            payment.amount_cents,
            payment.currency,
            payment.status,
            payment.reference,
            format_datetime(&payment.created_at),
        ],
    )
}

impl Store for SqliteStore {
    fn initialize(&self) -> Result<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    // Plan operations

    fn create_plan(&self, plan: &Plan) -> Result<()> {
        let result = self.conn().execute(
            "INSERT INTO plans (id, name, storage_limit_bytes, price_cents, currency, api_rate_limit,
                                is_default, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                plan.id,
                plan.name,
                plan.storage_limit_bytes,
                plan.price_cents,
                plan.currency,
                plan.api_rate_limit,
                plan.is_default,
                plan.is_active,
                format_datetime(&plan.created_at),
                format_datetime(&plan.updated_at),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_constraint_violation(&e) => Err(Error::AlreadyExists),
            Err(e) => Err(Error::from(e)),
        }
    }

    fn get_plan(&self, id: &str) -> Result<Option<Plan>> {
        self.conn()
            .query_row(
                &format!("SELECT {PLAN_COLUMNS} FROM plans WHERE id = ?1"),
                params![id],
                plan_from_row,
            )
            .optional()
            .map_err(Error::from)
    }

    fn get_plan_by_name(&self, name: &str) -> Result<Option<Plan>> {
        self.conn()
            .query_row(
                &format!("SELECT {PLAN_COLUMNS} FROM plans WHERE name = ?1"),
                params![name],
                plan_from_row,
            )
            .optional()
            .map_err(Error::from)
    }

    fn get_default_plan(&self) -> Result<Option<Plan>> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {PLAN_COLUMNS} FROM plans WHERE is_default = 1 ORDER BY id LIMIT 1"
                ),
                [],
                plan_from_row,
            )
            .optional()
            .map_err(Error::from)
    }

    fn list_plans(&self, include_inactive: bool) -> Result<Vec<Plan>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PLAN_COLUMNS} FROM plans WHERE ?1 OR is_active = 1
             ORDER BY price_cents, name"
        ))?;

        let rows = stmt.query_map(params![include_inactive], plan_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn update_plan(&self, plan: &Plan) -> Result<()> {
        let result = self.conn().execute(
            "UPDATE plans SET name = ?1, storage_limit_bytes = ?2, price_cents = ?3, currency = ?4,
                              api_rate_limit = ?5, is_active = ?6, updated_at = ?7
             WHERE id = ?8",
            params![
                plan.name,
                plan.storage_limit_bytes,
                plan.price_cents,
                plan.currency,
                plan.api_rate_limit,
                plan.is_active,
                format_datetime(&plan.updated_at),
                plan.id,
            ],
        );

        match result {
            Ok(0) => Err(Error::NotFound),
            Ok(_) => Ok(()),
            Err(e) if is_constraint_violation(&e) => Err(Error::AlreadyExists),
            Err(e) => Err(Error::from(e)),
        }
    }

    fn set_default_plan(&self, id: &str) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        tx.execute("UPDATE plans SET is_default = 0 WHERE id != ?1", params![id])?;
        let rows = tx.execute(
            "UPDATE plans SET is_default = 1, updated_at = ?1 WHERE id = ?2",
            params![format_datetime(&Utc::now()), id],
        )?;

        if rows == 0 {
            return Err(Error::NotFound);
        }

        tx.commit()?;
        Ok(())
    }

    fn delete_plan(&self, id: &str) -> Result<bool> {
        let result = self
            .conn()
            .execute("DELETE FROM plans WHERE id = ?1", params![id]);

        match result {
            Ok(rows) => Ok(rows > 0),
            Err(e) if is_constraint_violation(&e) => {
                Err(Error::Conflict("plan is still referenced".to_string()))
            }
            Err(e) => Err(Error::from(e)),
        }
    }

    fn count_plan_users(&self, id: &str) -> Result<i64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM users WHERE plan_id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // User operations

    fn create_user(&self, user: &User) -> Result<()> {
        let result = self.conn().execute(
            "INSERT INTO users (id, email, phone, name, password_hash, plan_id, storage_used_bytes,
                                is_admin, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                user.id,
                user.email,
                user.phone,
                user.name,
                user.password_hash,
                user.plan_id,
                user.storage_used_bytes,
                user.is_admin,
                format_datetime(&user.created_at),
                format_datetime(&user.updated_at),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_constraint_violation(&e) => Err(Error::AlreadyExists),
            Err(e) => Err(Error::from(e)),
        }
    }

    fn get_user(&self, id: &str) -> Result<Option<User>> {
        self.conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
                user_from_row,
            )
            .optional()
            .map_err(Error::from)
    }

    fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?1"),
                params![email],
                user_from_row,
            )
            .optional()
            .map_err(Error::from)
    }

    fn get_user_by_phone(&self, phone: &str) -> Result<Option<User>> {
        self.conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE phone = ?1"),
                params![phone],
                user_from_row,
            )
            .optional()
            .map_err(Error::from)
    }

    fn list_users(&self, cursor: &str, limit: i32) -> Result<Vec<User>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id > ?1 ORDER BY id LIMIT ?2"
        ))?;

        let rows = stmt.query_map(params![cursor, limit], user_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn update_user(&self, user: &User) -> Result<()> {
        let result = self.conn().execute(
            "UPDATE users SET email = ?1, phone = ?2, name = ?3, password_hash = ?4, plan_id = ?5,
                              is_admin = ?6, updated_at = ?7
             WHERE id = ?8",
            params![
                user.email,
                user.phone,
                user.name,
                user.password_hash,
                user.plan_id,
                user.is_admin,
                format_datetime(&user.updated_at),
                user.id,
            ],
        );

        match result {
            Ok(0) => Err(Error::NotFound),
            Ok(_) => Ok(()),
            Err(e) if is_constraint_violation(&e) => Err(Error::AlreadyExists),
            Err(e) => Err(Error::from(e)),
        }
    }

    fn delete_user(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM users WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn has_admin_user(&self) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM users WHERE is_admin = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn reserve_storage(&self, user_id: &str, bytes: i64, limit: Option<i64>) -> Result<bool> {
        let rows = self.conn().execute(
            "UPDATE users SET storage_used_bytes = storage_used_bytes + ?2, updated_at = ?4
             WHERE id = ?1 AND (?3 IS NULL OR storage_used_bytes + ?2 <= ?3)",
            params![user_id, bytes, limit, format_datetime(&Utc::now())],
        )?;
        Ok(rows > 0)
    }

    fn release_storage(&self, user_id: &str, bytes: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE users SET storage_used_bytes = MAX(storage_used_bytes - ?2, 0), updated_at = ?3
             WHERE id = ?1",
            params![user_id, bytes, format_datetime(&Utc::now())],
        )?;
        Ok(())
    }

    // Session operations

    fn create_session(&self, session: &Session) -> Result<()> {
        let result = self.conn().execute(
            "INSERT INTO sessions (id, user_id, token_lookup, token_hash, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                session.id,
                session.user_id,
                session.token_lookup,
                session.token_hash,
                format_datetime(&session.created_at),
                format_datetime(&session.expires_at),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_constraint_violation(&e) => Err(Error::TokenLookupCollision),
            Err(e) => Err(Error::from(e)),
        }
    }

    fn get_session_by_lookup(&self, lookup: &str) -> Result<Option<Session>> {
        self.conn()
            .query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE token_lookup = ?1"),
                params![lookup],
                session_from_row,
            )
            .optional()
            .map_err(Error::from)
    }

    fn delete_session(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn delete_user_sessions(&self, user_id: &str, except: Option<&str>) -> Result<usize> {
        let rows = self.conn().execute(
            "DELETE FROM sessions WHERE user_id = ?1 AND (?2 IS NULL OR id != ?2)",
            params![user_id, except],
        )?;
        Ok(rows)
    }

    fn update_session_last_used(&self, id: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE sessions SET last_used_at = ?1 WHERE id = ?2",
            params![format_datetime(&Utc::now()), id],
        )?;
        Ok(())
    }

    // Folder operations

    fn create_folder(&self, folder: &Folder) -> Result<()> {
        let result = self.conn().execute(
            "INSERT INTO folders (id, user_id, parent_id, name, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                folder.id,
                folder.user_id,
                folder.parent_id,
                folder.name,
                format_datetime(&folder.created_at),
                format_datetime(&folder.updated_at),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_constraint_violation(&e) => Err(Error::AlreadyExists),
            Err(e) => Err(Error::from(e)),
        }
    }

    fn get_folder(&self, id: &str) -> Result<Option<Folder>> {
        self.conn()
            .query_row(
                &format!("SELECT {FOLDER_COLUMNS} FROM folders WHERE id = ?1"),
                params![id],
                folder_from_row,
            )
            .optional()
            .map_err(Error::from)
    }

    fn get_folder_by_name(
        &self,
        user_id: &str,
        parent_id: Option<&str>,
        name: &str,
    ) -> Result<Option<Folder>> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {FOLDER_COLUMNS} FROM folders
                     WHERE user_id = ?1 AND parent_id IS ?2 AND name = ?3"
                ),
                params![user_id, parent_id, name],
                folder_from_row,
            )
            .optional()
            .map_err(Error::from)
    }

    fn list_folders(&self, user_id: &str) -> Result<Vec<Folder>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {FOLDER_COLUMNS} FROM folders WHERE user_id = ?1 ORDER BY name, id"
        ))?;

        let rows = stmt.query_map(params![user_id], folder_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn list_folder_children(&self, user_id: &str, parent_id: Option<&str>) -> Result<Vec<Folder>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {FOLDER_COLUMNS} FROM folders
             WHERE user_id = ?1 AND parent_id IS ?2 ORDER BY name, id"
        ))?;

        let rows = stmt.query_map(params![user_id, parent_id], folder_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn list_folder_ancestors(&self, id: &str) -> Result<Vec<Folder>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "WITH RECURSIVE chain(id, depth) AS (
                 SELECT id, 0 FROM folders WHERE id = ?1
                 UNION ALL
                 SELECT f.parent_id, c.depth + 1 FROM folders f
                 JOIN chain c ON f.id = c.id
                 WHERE f.parent_id IS NOT NULL AND c.depth < ?2
             )
             SELECT f.id, f.user_id, f.parent_id, f.name, f.created_at, f.updated_at
             FROM folders f JOIN chain c ON f.id = c.id
             ORDER BY c.depth",
        )?;

        let rows = stmt.query_map(params![id, MAX_FOLDER_DEPTH], folder_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn update_folder(&self, folder: &Folder) -> Result<()> {
        let result = self.conn().execute(
            "UPDATE folders SET parent_id = ?1, name = ?2, updated_at = ?3 WHERE id = ?4",
            params![
                folder.parent_id,
                folder.name,
                format_datetime(&folder.updated_at),
                folder.id
            ],
        );

        match result {
            Ok(0) => Err(Error::NotFound),
            Ok(_) => Ok(()),
            Err(e) if is_constraint_violation(&e) => Err(Error::AlreadyExists),
            Err(e) => Err(Error::from(e)),
        }
    }

    fn delete_folder(&self, id: &str) -> Result<Option<Vec<File>>> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let owner: Option<String> = tx
            .query_row(
                "SELECT user_id FROM folders WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(owner) = owner else {
            return Ok(None);
        };

        let files = {
            let mut stmt = tx.prepare(&format!(
                "WITH RECURSIVE subtree(id, depth) AS (
                     SELECT id, 0 FROM folders WHERE id = ?1
                     UNION ALL
                     SELECT f.id, s.depth + 1 FROM folders f
                     JOIN subtree s ON f.parent_id = s.id
                     WHERE s.depth < ?2
                 )
                 SELECT {FILE_COLUMNS} FROM files
                 WHERE folder_id IN (SELECT id FROM subtree)
                 ORDER BY id"
            ))?;
            let rows = stmt.query_map(params![id, MAX_FOLDER_DEPTH], file_from_row)?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };

        tx.execute("DELETE FROM folders WHERE id = ?1", params![id])?;

        let freed: i64 = files.iter().map(|f| f.size_bytes).sum();
        if freed > 0 {
            tx.execute(
                "UPDATE users SET storage_used_bytes = MAX(storage_used_bytes - ?2, 0),
                                  updated_at = ?3
                 WHERE id = ?1",
                params![owner, freed, format_datetime(&Utc::now())],
            )?;
        }

        tx.commit()?;
        Ok(Some(files))
    }

    // File operations

    fn create_file(&self, file: &File) -> Result<()> {
        self.conn().execute(
            "INSERT INTO files (id, user_id, folder_id, name, size_bytes, mime_type, external_id,
                                checksum, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                file.id,
                file.user_id,
                file.folder_id,
                file.name,
                file.size_bytes,
                file.mime_type,
                file.external_id,
                file.checksum,
                format_datetime(&file.created_at),
                format_datetime(&file.updated_at),
            ],
        )?;
        Ok(())
    }

    fn get_file(&self, id: &str) -> Result<Option<File>> {
        self.conn()
            .query_row(
                &format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ?1"),
                params![id],
                file_from_row,
            )
            .optional()
            .map_err(Error::from)
    }

    fn list_files(
        &self,
        user_id: &str,
        filter: FolderFilter<'_>,
        cursor: &str,
        limit: i32,
    ) -> Result<Vec<File>> {
        let (mode, folder_id): (i32, Option<&str>) = match filter {
            FolderFilter::Any => (0, None),
            FolderFilter::Root => (1, None),
            FolderFilter::In(id) => (2, Some(id)),
        };

        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {FILE_COLUMNS} FROM files
             WHERE user_id = ?1 AND id > ?2
               AND (?3 = 0 OR (?3 = 1 AND folder_id IS NULL) OR (?3 = 2 AND folder_id = ?4))
             ORDER BY id LIMIT ?5"
        ))?;

        let rows = stmt.query_map(
            params![user_id, cursor, mode, folder_id, limit],
            file_from_row,
        )?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn update_file(&self, file: &File) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE files SET folder_id = ?1, name = ?2, updated_at = ?3 WHERE id = ?4",
            params![
                file.folder_id,
                file.name,
                format_datetime(&file.updated_at),
                file.id
            ],
        )?;

        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn delete_file(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM files WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn count_user_files(&self, user_id: &str) -> Result<i64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM files WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn count_user_folders(&self, user_id: &str) -> Result<i64> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM folders WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // API key operations

    fn create_api_key(&self, key: &ApiKey) -> Result<()> {
        let result = self.conn().execute(
            "INSERT INTO api_keys (id, user_id, name, key_lookup, key_hash, is_active,
                                   trial_expires_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                key.id,
                key.user_id,
                key.name,
                key.key_lookup,
                key.key_hash,
                key.is_active,
                key.trial_expires_at.as_ref().map(format_datetime),
                format_datetime(&key.created_at),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_constraint_violation(&e) => Err(Error::TokenLookupCollision),
            Err(e) => Err(Error::from(e)),
        }
    }

    fn get_api_key(&self, id: &str) -> Result<Option<ApiKey>> {
        self.conn()
            .query_row(
                &format!("SELECT {API_KEY_COLUMNS} FROM api_keys WHERE id = ?1"),
                params![id],
                api_key_from_row,
            )
            .optional()
            .map_err(Error::from)
    }

    fn get_api_key_by_lookup(&self, lookup: &str) -> Result<Option<ApiKey>> {
        self.conn()
            .query_row(
                &format!("SELECT {API_KEY_COLUMNS} FROM api_keys WHERE key_lookup = ?1"),
                params![lookup],
                api_key_from_row,
            )
            .optional()
            .map_err(Error::from)
    }

    fn list_user_api_keys(&self, user_id: &str) -> Result<Vec<ApiKey>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {API_KEY_COLUMNS} FROM api_keys WHERE user_id = ?1 ORDER BY id DESC"
        ))?;

        let rows = stmt.query_map(params![user_id], api_key_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn update_api_key(&self, key: &ApiKey) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE api_keys SET name = ?1, is_active = ?2, trial_expires_at = ?3 WHERE id = ?4",
            params![
                key.name,
                key.is_active,
                key.trial_expires_at.as_ref().map(format_datetime),
                key.id
            ],
        )?;

        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn delete_api_key(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM api_keys WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn update_api_key_last_used(&self, id: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE api_keys SET last_used_at = ?1 WHERE id = ?2",
            params![format_datetime(&Utc::now()), id],
        )?;
        Ok(())
    }

    // Billing operations

    fn create_payment(&self, payment: &Payment) -> Result<()> {
        insert_payment(&self.conn(), payment)?;
        Ok(())
    }

    fn list_user_payments(&self, user_id: &str, cursor: &str, limit: i32) -> Result<Vec<Payment>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments
             WHERE user_id = ?1 AND (?2 = '' OR id < ?2)
             ORDER BY id DESC LIMIT ?3"
        ))?;

        let rows = stmt.query_map(params![user_id, cursor, limit], payment_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn create_subscription(&self, subscription: &Subscription) -> Result<()> {
        insert_subscription(&self.conn(), subscription)?;
        Ok(())
    }

    fn get_active_subscription(&self, user_id: &str) -> Result<Option<Subscription>> {
        self.conn()
            .query_row(
                &format!(
                    "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions
                     WHERE user_id = ?1 AND status = ?2 ORDER BY id DESC LIMIT 1"
                ),
                params![user_id, SubscriptionStatus::Active],
                subscription_from_row,
            )
            .optional()
            .map_err(Error::from)
    }

    fn update_subscription(&self, subscription: &Subscription) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE subscriptions SET status = ?1, ended_at = ?2 WHERE id = ?3",
            params![
                subscription.status,
                subscription.ended_at.as_ref().map(format_datetime),
                subscription.id
            ],
        )?;

        if rows == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn change_plan(&self, change: &PlanChange<'_>) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let now = format_datetime(&change.next.started_at);

        if let Some((previous_id, status)) = change.previous {
            tx.execute(
                "UPDATE subscriptions SET status = ?1, ended_at = ?2 WHERE id = ?3",
                params![status, now, previous_id],
            )?;
        }

        insert_subscription(&tx, change.next)?;

        let rows = tx.execute(
            "UPDATE users SET plan_id = ?1, updated_at = ?2 WHERE id = ?3",
            params![change.next.plan_id, now, change.user_id],
        )?;
        if rows == 0 {
            return Err(Error::NotFound);
        }

        if let Some(payment) = change.payment {
            insert_payment(&tx, payment)?;
        }

        tx.commit()?;
        Ok(())
    }

    // Audit log operations

    fn create_audit_log(&self, entry: &AuditLog) -> Result<()> {
        self.conn().execute(
            "INSERT INTO audit_logs (id, actor_id, action, target_type, target_id, details, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.id,
                entry.actor_id,
                entry.action,
                entry.target_type,
                entry.target_id,
                entry.details.to_string(),
                format_datetime(&entry.created_at),
            ],
        )?;
        Ok(())
    }

    fn list_audit_logs(&self, cursor: &str, limit: i32) -> Result<Vec<AuditLog>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_logs
             WHERE ?1 = '' OR id < ?1
             ORDER BY id DESC LIMIT ?2"
        ))?;

        let rows = stmt.query_map(params![cursor, limit], audit_from_row)?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn stats(&self) -> Result<SystemStats> {
        self.conn()
            .query_row(
                "SELECT (SELECT COUNT(*) FROM users),
                        (SELECT COUNT(*) FROM files),
                        (SELECT COUNT(*) FROM folders),
                        (SELECT COUNT(*) FROM plans),
                        (SELECT COALESCE(SUM(size_bytes), 0) FROM files)",
                [],
                |row| {
                    Ok(SystemStats {
                        users: row.get(0)?,
                        files: row.get(1)?,
                        folders: row.get(2)?,
                        plans: row.get(3)?,
                        stored_bytes: row.get(4)?,
                    })
                },
            )
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_store() -> (TempDir, SqliteStore) {
        let temp = TempDir::new().unwrap();
        let store = SqliteStore::new(temp.path().join("test.db")).unwrap();
        store.initialize().unwrap();
        (temp, store)
    }

    fn plan(name: &str, limit: i64) -> Plan {
        let now = Utc::now();
        Plan {
            id: new_id(),
            name: name.to_string(),
            storage_limit_bytes: limit,
            price_cents: 0,
            currency: "USD".to_string(),
            api_rate_limit: 60,
            is_default: false,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn user(email: &str, plan_id: Option<&str>) -> User {
        let now = Utc::now();
        User {
            id: new_id(),
            email: email.to_string(),
            phone: None,
            name: "Test".to_string(),
            password_hash: "hash".to_string(),
            plan_id: plan_id.map(str::to_string),
            storage_used_bytes: 0,
            is_admin: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn folder(user_id: &str, parent_id: Option<&str>, name: &str) -> Folder {
        let now = Utc::now();
        Folder {
            id: new_id(),
            user_id: user_id.to_string(),
            parent_id: parent_id.map(str::to_string),
            name: name.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    fn file(user_id: &str, folder_id: Option<&str>, name: &str, size: i64) -> File {
        let now = Utc::now();
        File {
            id: new_id(),
            user_id: user_id.to_string(),
            folder_id: folder_id.map(str::to_string),
            name: name.to_string(),
            size_bytes: size,
            mime_type: "text/plain".to_string(),
            external_id: format!("{user_id}/{name}"),
            checksum: "00".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_initialize_creates_tables() {
        let (_temp, store) = test_store();

        let conn = store.conn();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();

        for table in [
            "plans",
            "users",
            "sessions",
            "folders",
            "files",
            "api_keys",
            "payments",
            "subscriptions",
            "audit_logs",
        ] {
            assert!(tables.contains(&table.to_string()), "missing {table}");
        }
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let (_temp, store) = test_store();
        store.initialize().unwrap();
    }

    #[test]
    fn test_plan_default_flag_is_exclusive() {
        let (_temp, store) = test_store();
        let free = plan("free", 100);
        let pro = plan("pro", 1000);
        store.create_plan(&free).unwrap();
        store.create_plan(&pro).unwrap();

        store.set_default_plan(&free.id).unwrap();
        assert_eq!(store.get_default_plan().unwrap().unwrap().id, free.id);

        store.set_default_plan(&pro.id).unwrap();
        assert_eq!(store.get_default_plan().unwrap().unwrap().id, pro.id);
        assert!(!store.get_plan(&free.id).unwrap().unwrap().is_default);

        assert!(matches!(
            store.set_default_plan("missing"),
            Err(Error::NotFound)
        ));
    }

    #[test]
    fn test_plan_in_use_cannot_be_deleted() {
        let (_temp, store) = test_store();
        let free = plan("free", 100);
        store.create_plan(&free).unwrap();
        store.create_user(&user("a@example.com", Some(&free.id))).unwrap();

        assert_eq!(store.count_plan_users(&free.id).unwrap(), 1);
        assert!(matches!(
            store.delete_plan(&free.id),
            Err(Error::Conflict(_))
        ));
    }

    #[test]
    fn test_duplicate_email_rejected() {
        let (_temp, store) = test_store();
        store.create_user(&user("a@example.com", None)).unwrap();

        let result = store.create_user(&user("a@example.com", None));
        assert!(matches!(result, Err(Error::AlreadyExists)));
    }

    #[test]
    fn test_reserve_storage_respects_limit() {
        let (_temp, store) = test_store();
        let u = user("a@example.com", None);
        store.create_user(&u).unwrap();

        assert!(store.reserve_storage(&u.id, 60, Some(100)).unwrap());
        assert!(!store.reserve_storage(&u.id, 60, Some(100)).unwrap());
        assert!(store.reserve_storage(&u.id, 40, Some(100)).unwrap());
        assert_eq!(store.get_user(&u.id).unwrap().unwrap().storage_used_bytes, 100);

        assert!(store.reserve_storage(&u.id, 1_000, None).unwrap());

        store.release_storage(&u.id, 5_000).unwrap();
        assert_eq!(store.get_user(&u.id).unwrap().unwrap().storage_used_bytes, 0);
    }

    #[test]
    fn test_folder_tree_queries() {
        let (_temp, store) = test_store();
        let u = user("a@example.com", None);
        store.create_user(&u).unwrap();

        let root = folder(&u.id, None, "root");
        let child = folder(&u.id, Some(&root.id), "child");
        let grandchild = folder(&u.id, Some(&child.id), "grandchild");
        let other = folder(&u.id, None, "other");
        for f in [&root, &child, &grandchild, &other] {
            store.create_folder(f).unwrap();
        }

        let ancestors: Vec<String> = store
            .list_folder_ancestors(&grandchild.id)
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(ancestors, vec!["grandchild", "child", "root"]);

        let top: Vec<String> = store
            .list_folder_children(&u.id, None)
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(top, vec!["other", "root"]);

        assert!(
            store
                .get_folder_by_name(&u.id, Some(&root.id), "child")
                .unwrap()
                .is_some()
        );
        assert!(
            store
                .get_folder_by_name(&u.id, None, "child")
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_folder_delete_cascades() {
        let (_temp, store) = test_store();
        let u = user("a@example.com", None);
        store.create_user(&u).unwrap();

        let root = folder(&u.id, None, "root");
        let child = folder(&u.id, Some(&root.id), "child");
        store.create_folder(&root).unwrap();
        store.create_folder(&child).unwrap();
        let nested = file(&u.id, Some(&child.id), "a.txt", 10);
        let top = file(&u.id, Some(&root.id), "c.txt", 5);
        let loose = file(&u.id, None, "b.txt", 10);
        for f in [&nested, &top, &loose] {
            store.create_file(f).unwrap();
        }
        assert!(store.reserve_storage(&u.id, 25, None).unwrap());

        let mut removed: Vec<String> = store
            .delete_folder(&root.id)
            .unwrap()
            .expect("folder exists")
            .into_iter()
            .map(|f| f.id)
            .collect();
        removed.sort();
        let mut expected = vec![nested.id.clone(), top.id.clone()];
        expected.sort();
        assert_eq!(removed, expected);

        assert!(store.get_folder(&child.id).unwrap().is_none());
        assert!(store.get_file(&nested.id).unwrap().is_none());
        assert!(store.get_file(&loose.id).unwrap().is_some());
        assert_eq!(store.get_user(&u.id).unwrap().unwrap().storage_used_bytes, 10);

        assert!(store.delete_folder(&root.id).unwrap().is_none());
    }

    #[test]
    fn test_sibling_folder_names_are_unique() {
        let (_temp, store) = test_store();
        let u = user("a@example.com", None);
        store.create_user(&u).unwrap();

        let root = folder(&u.id, None, "docs");
        store.create_folder(&root).unwrap();
        assert!(matches!(
            store.create_folder(&folder(&u.id, None, "docs")),
            Err(Error::AlreadyExists)
        ));

        let nested = folder(&u.id, Some(&root.id), "docs");
        store.create_folder(&nested).unwrap();
        let mut sibling = folder(&u.id, Some(&root.id), "notes");
        store.create_folder(&sibling).unwrap();

        sibling.name = "docs".to_string();
        assert!(matches!(
            store.update_folder(&sibling),
            Err(Error::AlreadyExists)
        ));

        let other = user("b@example.com", None);
        store.create_user(&other).unwrap();
        store.create_folder(&folder(&other.id, None, "docs")).unwrap();
    }

    #[test]
    fn test_list_files_filters() {
        let (_temp, store) = test_store();
        let u = user("a@example.com", None);
        store.create_user(&u).unwrap();
        let dir = folder(&u.id, None, "docs");
        store.create_folder(&dir).unwrap();

        store.create_file(&file(&u.id, None, "a.txt", 1)).unwrap();
        store.create_file(&file(&u.id, Some(&dir.id), "b.txt", 1)).unwrap();
        store.create_file(&file(&u.id, Some(&dir.id), "c.txt", 1)).unwrap();

        assert_eq!(store.list_files(&u.id, FolderFilter::Any, "", 10).unwrap().len(), 3);
        assert_eq!(store.list_files(&u.id, FolderFilter::Root, "", 10).unwrap().len(), 1);
        assert_eq!(
            store
                .list_files(&u.id, FolderFilter::In(&dir.id), "", 10)
                .unwrap()
                .len(),
            2
        );

        let first_page = store.list_files(&u.id, FolderFilter::Any, "", 2).unwrap();
        let second_page = store
            .list_files(&u.id, FolderFilter::Any, &first_page[1].id, 2)
            .unwrap();
        assert_eq!(second_page.len(), 1);
    }

    #[test]
    fn test_change_plan_is_atomic() {
        let (_temp, store) = test_store();
        let free = plan("free", 100);
        let pro = plan("pro", 1000);
        store.create_plan(&free).unwrap();
        store.create_plan(&pro).unwrap();
        let u = user("a@example.com", Some(&free.id));
        store.create_user(&u).unwrap();

        let now = Utc::now();
        let first = Subscription {
            id: new_id(),
            user_id: u.id.clone(),
            plan_id: free.id.clone(),
            status: SubscriptionStatus::Active,
            started_at: now,
            ended_at: None,
        };
        store.create_subscription(&first).unwrap();

        let next = Subscription {
            id: new_id(),
            user_id: u.id.clone(),
            plan_id: pro.id.clone(),
            status: SubscriptionStatus::Active,
            started_at: now,
            ended_at: None,
        };
        let payment = Payment {
            id: new_id(),
            user_id: u.id.clone(),
            plan_id: pro.id.clone(),
            amount_cents: 999,
            currency: "USD".to_string(),
            status: PaymentStatus::Completed,
            reference: Some("ch_1".to_string()),
            created_at: now,
        };

        store
            .change_plan(&PlanChange {
                user_id: &u.id,
                previous: Some((&first.id, SubscriptionStatus::Replaced)),
                next: &next,
                payment: Some(&payment),
            })
            .unwrap();

        let active = store.get_active_subscription(&u.id).unwrap().unwrap();
        assert_eq!(active.id, next.id);
        assert_eq!(store.get_user(&u.id).unwrap().unwrap().plan_id, Some(pro.id.clone()));

        let payments = store.list_user_payments(&u.id, "", 10).unwrap();
        assert_eq!(payments.len(), 1);
        assert_eq!(payments[0].status, PaymentStatus::Completed);

        let orphan = Subscription {
            id: new_id(),
            ..next.clone()
        };
        let result = store.change_plan(&PlanChange {
            user_id: "missing",
            previous: None,
            next: &orphan,
            payment: None,
        });
        assert!(result.is_err());
        assert_eq!(store.get_active_subscription(&u.id).unwrap().unwrap().id, next.id);
    }

    #[test]
    fn test_session_lookup_collision() {
        let (_temp, store) = test_store();
        let u = user("a@example.com", None);
        store.create_user(&u).unwrap();

        let session = |id: &str| Session {
            id: id.to_string(),
            user_id: u.id.clone(),
            token_lookup: "lookup12".to_string(),
            token_hash: "hash".to_string(),
            created_at: Utc::now(),
            expires_at: Utc::now(),
            last_used_at: None,
        };

        store.create_session(&session("s-1")).unwrap();
        let result = store.create_session(&session("s-2"));
        assert!(matches!(result, Err(Error::TokenLookupCollision)));
    }

    #[test]
    fn test_audit_logs_newest_first() {
        let (_temp, store) = test_store();

        for action in ["first", "second", "third"] {
            store
                .create_audit_log(&AuditLog {
                    id: new_id(),
                    actor_id: "admin".to_string(),
                    action: action.to_string(),
                    target_type: "user".to_string(),
                    target_id: "u".to_string(),
                    details: serde_json::json!({ "n": action }),
                    created_at: Utc::now(),
                })
                .unwrap();
        }

        let page = store.list_audit_logs("", 2).unwrap();
        assert_eq!(page[0].action, "third");
        assert_eq!(page[1].action, "second");
        assert_eq!(page[0].details["n"], "third");

        let rest = store.list_audit_logs(&page[1].id, 2).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].action, "first");
    }
}
