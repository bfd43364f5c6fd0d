//! SQLite-backed key-value store (sqlx).

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::collections::HashMap;
use std::path::Path;

use super::{KeyValueStore, KvError, KvValue};

/// Percent-encode a path for use in a sqlite:// URI so spaces and special chars don't break parsing.
fn path_to_sqlite_uri(path: &Path) -> String {
    let s = path.to_string_lossy();
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            ' ' => out.push_str("%20"),
            '#' => out.push_str("%23"),
            '?' => out.push_str("%3F"),
            '&' => out.push_str("%26"),
            c => out.push(c),
        }
    }
    format!("sqlite://{}?mode=rwc", out)
}

/// Handle to the state database at `~/.local/state/droidup/state.db`.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (or create) the default state database.
    pub async fn open_default() -> anyhow::Result<Self> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("droidup")?;
        let db_path = xdg_dirs.get_state_home().join("state.db");
        Self::open_at(&db_path).await
    }

    /// Open (or create) the database at a specific path. Creates parent dirs if needed.
    pub async fn open_at(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect(&path_to_sqlite_uri(path))
            .await?;
        let store = SqliteStore { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// In-memory database; a single connection so every query sees the same data.
    pub async fn open_memory() -> anyhow::Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = SqliteStore { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), KvError> {
        // Exactly one of text_value / int_value is set per row.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                text_value TEXT,
                int_value INTEGER
            );
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn row_value(row: &SqliteRow) -> Option<KvValue> {
    let text: Option<String> = row.get("text_value");
    let int: Option<i64> = row.get("int_value");
    match (text, int) {
        (Some(s), _) => Some(KvValue::Text(s)),
        (None, Some(n)) => Some(KvValue::Long(n)),
        (None, None) => None,
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<KvValue>, KvError> {
        let row = sqlx::query("SELECT text_value, int_value FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().and_then(row_value))
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<KvValue>>, KvError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        // One statement, so one read snapshot.
        let sql = format!(
            "SELECT key, text_value, int_value FROM kv WHERE key IN ({})",
            vec!["?"; keys.len()].join(", ")
        );
        let mut query = sqlx::query(&sql);
        for key in keys {
            query = query.bind(key.as_str());
        }
        let rows = query.fetch_all(&self.pool).await?;
        let mut found: HashMap<String, KvValue> = HashMap::with_capacity(rows.len());
        for row in &rows {
            if let Some(value) = row_value(row) {
                found.insert(row.get("key"), value);
            }
        }
        Ok(keys.iter().map(|k| found.remove(k)).collect())
    }

    async fn put_many(&self, entries: Vec<(String, KvValue)>) -> Result<(), KvError> {
        let mut tx = self.pool.begin().await?;
        for (key, value) in entries {
            let (text, int) = match value {
                KvValue::Text(s) => (Some(s), None),
                KvValue::Long(n) => (None, Some(n)),
            };
            sqlx::query(
                r#"
                INSERT INTO kv (key, text_value, int_value) VALUES (?, ?, ?)
                ON CONFLICT(key) DO UPDATE SET
                    text_value = excluded.text_value,
                    int_value = excluded.int_value
                "#,
            )
            .bind(key)
            .bind(text)
            .bind(int)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
