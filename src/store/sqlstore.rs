//! SQLite-backed implementation of the [`Store`] trait.

use std::collections::HashMap;

use async_trait::async_trait;
use sqlx::{
    Row as _,
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions},
};
use tracing::info;

use super::{Session, Store, StoreError, User, Workspace, now_millis};

/// Fixed id of the root workspace row.
const ROOT_WORKSPACE_ID: &str = "0";

/// SQLite store. Table names carry the configured prefix, e.g.
/// `tb_system_settings` for prefix `tb_`.
pub struct SqlStore {
    pool: SqlitePool,
    table_prefix: String,
}

fn validate_table_prefix(prefix: &str) -> Result<(), StoreError> {
    if prefix
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        Ok(())
    } else {
        Err(StoreError::InvalidTablePrefix(prefix.to_string()))
    }
}

impl SqlStore {
    /// Opens (or creates) the database and materializes the schema.
    ///
    /// # Errors
    ///
    /// Fails on an unsupported driver, an invalid table prefix, or any
    /// underlying connection/DDL error.
    pub async fn open(
        db_type: &str,
        connection_string: &str,
        table_prefix: &str,
    ) -> Result<Self, StoreError> {
        if db_type != "sqlite3" {
            return Err(StoreError::UnsupportedDriver(db_type.to_string()));
        }
        validate_table_prefix(table_prefix)?;

        let options = SqliteConnectOptions::new()
            .filename(connection_string)
            .create_if_missing(true);

        // A single connection sidesteps SQLite writer contention and gives
        // every caller the same view, including for `:memory:` databases.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            table_prefix: table_prefix.to_string(),
        };
        store.create_tables().await?;
        info!(db = connection_string, "Database initialized");
        Ok(store)
    }

    fn table(&self, name: &str) -> String {
        format!("{}{name}", self.table_prefix)
    }

    async fn create_tables(&self) -> Result<(), StoreError> {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {settings} (
                id TEXT PRIMARY KEY,
                value TEXT
            );
            CREATE TABLE IF NOT EXISTS {users} (
                id TEXT PRIMARY KEY,
                username TEXT UNIQUE,
                password TEXT,
                create_at INTEGER,
                update_at INTEGER
            );
            CREATE TABLE IF NOT EXISTS {sessions} (
                id TEXT PRIMARY KEY,
                token TEXT UNIQUE,
                user_id TEXT,
                create_at INTEGER,
                update_at INTEGER
            );
            CREATE TABLE IF NOT EXISTS {workspaces} (
                id TEXT PRIMARY KEY,
                title TEXT,
                update_at INTEGER
            );",
            settings = self.table("system_settings"),
            users = self.table("users"),
            sessions = self.table("sessions"),
            workspaces = self.table("workspaces"),
        );
        sqlx::raw_sql(&ddl).execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for SqlStore {
    async fn get_system_settings(&self) -> Result<HashMap<String, String>, StoreError> {
        let query = format!(
            "SELECT id, value FROM {}",
            self.table("system_settings")
        );
        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        let mut results = HashMap::new();
        for row in rows {
            results.insert(row.try_get("id")?, row.try_get("value")?);
        }
        Ok(results)
    }

    async fn set_system_setting(&self, id: &str, value: &str) -> Result<(), StoreError> {
        let query = format!(
            "INSERT INTO {} (id, value) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET value = excluded.value",
            self.table("system_settings")
        );
        sqlx::query(&query)
            .bind(id)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn ensure_system_setting(&self, id: &str, value: &str) -> Result<(), StoreError> {
        let query = format!(
            "INSERT OR IGNORE INTO {} (id, value) VALUES (?1, ?2)",
            self.table("system_settings")
        );
        sqlx::query(&query)
            .bind(id)
            .bind(value)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_session(&self, token: &str) -> Result<Option<Session>, StoreError> {
        let query = format!(
            "SELECT id, token, user_id, create_at, update_at FROM {} WHERE token = ?1",
            self.table("sessions")
        );
        let row = sqlx::query(&query)
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|row| {
            Ok(Session {
                id: row.try_get("id")?,
                token: row.try_get("token")?,
                user_id: row.try_get("user_id")?,
                create_at: row.try_get("create_at")?,
                update_at: row.try_get("update_at")?,
            })
        })
        .transpose()
    }

    async fn create_session(&self, session: &Session) -> Result<(), StoreError> {
        let query = format!(
            "INSERT INTO {} (id, token, user_id, create_at, update_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            self.table("sessions")
        );
        sqlx::query(&query)
            .bind(&session.id)
            .bind(&session.token)
            .bind(&session.user_id)
            .bind(session.create_at)
            .bind(session.update_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clean_up_sessions(&self, older_than_secs: i64) -> Result<(), StoreError> {
        let cutoff = now_millis() - older_than_secs * 1000;
        let query = format!(
            "DELETE FROM {} WHERE update_at < ?1",
            self.table("sessions")
        );
        sqlx::query(&query).bind(cutoff).execute(&self.pool).await?;
        Ok(())
    }

    async fn create_user(&self, user: &User) -> Result<(), StoreError> {
        let query = format!(
            "INSERT INTO {} (id, username, create_at, update_at) VALUES (?1, ?2, ?3, ?3)",
            self.table("users")
        );
        sqlx::query(&query)
            .bind(&user.id)
            .bind(&user.username)
            .bind(user.create_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_user_password(
        &self,
        username: &str,
        password_hash: &str,
    ) -> Result<(), StoreError> {
        let query = format!(
            "UPDATE {} SET password = ?1, update_at = ?2 WHERE username = ?3",
            self.table("users")
        );
        let result = sqlx::query(&query)
            .bind(password_hash)
            .bind(now_millis())
            .bind(username)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("user '{username}'")));
        }
        Ok(())
    }

    async fn get_registered_user_count(&self) -> Result<i64, StoreError> {
        let query = format!("SELECT COUNT(*) AS n FROM {}", self.table("users"));
        let row = sqlx::query(&query).fetch_one(&self.pool).await?;
        Ok(row.try_get("n")?)
    }

    async fn get_active_user_count(&self, window_secs: i64) -> Result<i64, StoreError> {
        let cutoff = now_millis() - window_secs * 1000;
        let query = format!(
            "SELECT COUNT(DISTINCT user_id) AS n FROM {} WHERE update_at > ?1",
            self.table("sessions")
        );
        let row = sqlx::query(&query)
            .bind(cutoff)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("n")?)
    }

    async fn get_root_workspace(&self) -> Result<Workspace, StoreError> {
        let insert = format!(
            "INSERT OR IGNORE INTO {} (id, title, update_at) VALUES (?1, ?2, ?3)",
            self.table("workspaces")
        );
        sqlx::query(&insert)
            .bind(ROOT_WORKSPACE_ID)
            .bind("")
            .bind(now_millis())
            .execute(&self.pool)
            .await?;

        let select = format!(
            "SELECT id, title, update_at FROM {} WHERE id = ?1",
            self.table("workspaces")
        );
        let row = sqlx::query(&select)
            .bind(ROOT_WORKSPACE_ID)
            .fetch_one(&self.pool)
            .await?;
        Ok(Workspace {
            id: row.try_get("id")?,
            title: row.try_get("title")?,
            update_at: row.try_get("update_at")?,
        })
    }

    async fn shutdown(&self) -> Result<(), StoreError> {
        self.pool.close().await;
        Ok(())
    }
}
