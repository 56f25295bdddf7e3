//! Embedded single-table SQL backend, preferably opened against a
//! RAM-backed filesystem (`/dev/shm` on Linux) so the "embedded SQL" choice
//! doesn't actually cost a disk round-trip in the common case.

use crate::backend::{BoxFuture, CacheBackend};
use bytes::Bytes;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use std::str::FromStr;

pub struct EmbeddedSqlBackend {
    pool: SqlitePool,
}

impl EmbeddedSqlBackend {
    /// Open (creating if needed) the single-table cache database at `path`.
    pub async fn open(path: &Path) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;

        sqlx::query("PRAGMA temp_store = MEMORY")
            .execute(&pool)
            .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS cache (key TEXT PRIMARY KEY, payload BLOB NOT NULL)",
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// Derive the cache database path for the given project root, per spec
    /// §6: `{tmpdir}/kern_core_{hash}.sqlite`.
    pub fn default_path(project_root: &Path) -> PathBuf {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        project_root.hash(&mut hasher);
        uid().hash(&mut hasher);
        let hash = hasher.finish();

        let base = ram_backed_dir().unwrap_or_else(std::env::temp_dir);
        base.join(format!("kern_core_{hash:016x}.sqlite"))
    }
}

/// A stand-in for "effective user id" that avoids an `unsafe` FFI call into
/// libc for a value that only needs to be *stable per installation*, not
/// actually the kernel uid: the owning username, when available.
fn uid() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_default()
}

/// A writable RAM-backed directory, if one exists on this platform.
fn ram_backed_dir() -> Option<PathBuf> {
    let shm = PathBuf::from("/dev/shm");
    if shm.is_dir() {
        Some(shm)
    } else {
        None
    }
}

impl CacheBackend for EmbeddedSqlBackend {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Option<Bytes>> {
        Box::pin(async move {
            let row = sqlx::query("SELECT payload FROM cache WHERE key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .ok()
                .flatten()?;
            let payload: Vec<u8> = row.try_get("payload").ok()?;
            Some(Bytes::from(payload))
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: Bytes) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            let _ = sqlx::query(
                "INSERT INTO cache (key, payload) VALUES (?, ?) \
                 ON CONFLICT(key) DO UPDATE SET payload = excluded.payload",
            )
            .bind(key)
            .bind(value.as_ref())
            .execute(&self.pool)
            .await;
        })
    }

    fn set_if_absent<'a>(&'a self, key: &'a str, value: Bytes) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            match sqlx::query("INSERT OR IGNORE INTO cache (key, payload) VALUES (?, ?)")
                .bind(key)
                .bind(value.as_ref())
                .execute(&self.pool)
                .await
            {
                Ok(result) => result.rows_affected() == 1,
                Err(_) => false,
            }
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            match sqlx::query("DELETE FROM cache WHERE key = ?")
                .bind(key)
                .execute(&self.pool)
                .await
            {
                Ok(result) => result.rows_affected() > 0,
                Err(_) => false,
            }
        })
    }

    fn keys<'a>(&'a self) -> BoxFuture<'a, Vec<String>> {
        Box::pin(async move {
            sqlx::query("SELECT key FROM cache")
                .fetch_all(&self.pool)
                .await
                .map(|rows| {
                    rows.iter()
                        .filter_map(|r| r.try_get::<String, _>("key").ok())
                        .collect()
                })
                .unwrap_or_default()
        })
    }

    fn name(&self) -> &'static str {
        "embedded-sql"
    }
}
