//! A local, opportunistic key/value microcache with TTL, CAS, and atomic
//! compute-or-fetch, fronted by a pluggable backend.
//!
//! Entries carry their own expiry in the stored payload (see
//! [`payload::CachePayload`]) — backends are free to evict more coarsely,
//! but the payload's `expires_at` is the only thing `Microcache` trusts.
//! Backend primitive failures (other than a per-key lock timeout) degrade
//! silently to a miss/`false`: this cache is an optimization, not a source
//! of truth, and a caller should never have to handle "the cache backend is
//! down" as a distinct error case.

mod backend;
mod payload;
#[cfg(feature = "sqlite")]
mod sqlite_backend;

pub use backend::{BoxFuture, CacheBackend, InProcessMapBackend, SharedTableBackend};
#[cfg(feature = "sqlite")]
pub use sqlite_backend::EmbeddedSqlBackend;

use payload::CachePayload;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Errors surfaced by [`Microcache`]. Everything else (backend primitive
/// failures) is swallowed into a miss/`false` by design — see the module
/// docs.
#[derive(Debug)]
pub enum CacheError {
    /// Acquiring the per-key lock used by `entry`/`cas`/`inc`/`dec` exceeded
    /// its 5 second budget.
    LockTimeout { key: String },
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::LockTimeout { key } => {
                write!(f, "timed out acquiring cache lock for key '{key}'")
            }
        }
    }
}

impl std::error::Error for CacheError {}

/// Tuning knobs honored by [`Microcache::auto`] when selecting a backend.
/// Corresponds to the `APCU_*` environment variables of spec §6.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub shared_table_rows: usize,
    pub shared_table_value_size: usize,
    pub sqlite_path: Option<std::path::PathBuf>,
    pub use_shared_table: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            shared_table_rows: 8192,
            shared_table_value_size: 4096,
            sqlite_path: None,
            use_shared_table: false,
        }
    }
}

impl BackendConfig {
    /// Read tuning from `APCU_ROWS` / `APCU_VALUE_SIZE` / `APCU_SQLITE_PATH`.
    /// `APCU_ROWS` (or `APCU_VALUE_SIZE`) being set at all is taken as an
    /// explicit request to prefer the shared-table backend.
    pub fn from_env() -> Self {
        let rows = std::env::var("APCU_ROWS").ok().and_then(|v| v.parse().ok());
        let value_size = std::env::var("APCU_VALUE_SIZE")
            .ok()
            .and_then(|v| v.parse().ok());
        Self {
            shared_table_rows: rows.unwrap_or(8192),
            shared_table_value_size: value_size.unwrap_or(4096),
            sqlite_path: std::env::var("APCU_SQLITE_PATH").ok().map(Into::into),
            use_shared_table: rows.is_some() || value_size.is_some(),
        }
    }
}

const LOCK_PREFIX: &str = "__lock:";
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(1);
const LOCK_TIMEOUT: Duration = Duration::from_secs(5);
/// Probability that a `store` call also triggers a GC sweep.
const GC_PROBABILITY: f64 = 1e-4;

/// The local key/value microcache. Cheap to clone (wraps an `Arc`).
#[derive(Clone)]
pub struct Microcache {
    backend: Arc<dyn CacheBackend>,
}

impl Microcache {
    /// Wrap an explicit backend (mainly for tests and for callers with a
    /// specific deployment topology in mind).
    pub fn with_backend(backend: impl CacheBackend) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    /// Select a backend per spec §4.1: shared table if tuning env vars ask
    /// for one, else embedded SQL on a writable RAM-backed path (falling
    /// back to the system temp dir), else the in-process map. The choice is
    /// logged once at `info` level and is fixed for the life of the
    /// returned handle.
    #[cfg(feature = "sqlite")]
    pub async fn auto(project_root: &std::path::Path, config: BackendConfig) -> Self {
        if config.use_shared_table {
            let backend =
                SharedTableBackend::new(config.shared_table_rows, config.shared_table_value_size);
            tracing::info!(backend = backend.name(), "microcache backend selected");
            return Self::with_backend(backend);
        }

        let path = config
            .sqlite_path
            .unwrap_or_else(|| EmbeddedSqlBackend::default_path(project_root));
        match EmbeddedSqlBackend::open(&path).await {
            Ok(backend) => {
                tracing::info!(backend = backend.name(), path = %path.display(), "microcache backend selected");
                Self::with_backend(backend)
            }
            Err(err) => {
                warn!(error = %err, "embedded-sql microcache backend unavailable, falling back to in-process map");
                Self::with_backend(InProcessMapBackend::new())
            }
        }
    }

    /// Select a backend per spec §4.1 without the embedded-SQL option
    /// (`sqlite` feature disabled): shared table if requested, else the
    /// in-process map.
    #[cfg(not(feature = "sqlite"))]
    pub fn auto(config: BackendConfig) -> Self {
        if config.use_shared_table {
            let backend =
                SharedTableBackend::new(config.shared_table_rows, config.shared_table_value_size);
            tracing::info!(backend = backend.name(), "microcache backend selected");
            Self::with_backend(backend)
        } else {
            Self::with_backend(InProcessMapBackend::new())
        }
    }

    /// Fetch a value. Returns `(value, hit)`; a miss is reported as
    /// `(None, false)`; a hit whose entry expired strictly before now is
    /// also reported as a miss, and the stale entry is lazily deleted.
    pub async fn fetch<V: Serialize + DeserializeOwned>(&self, key: &str) -> (Option<V>, bool) {
        match self.backend.get(key).await {
            Some(bytes) => match CachePayload::<V>::decode(&bytes) {
                Some(payload) if !payload.is_expired() => (Some(payload.v), true),
                Some(_) => {
                    self.backend.delete(key).await;
                    (None, false)
                }
                None => (None, false),
            },
            None => (None, false),
        }
    }

    /// Unconditional set. May trigger a probabilistic GC sweep.
    pub async fn store<V: Serialize + DeserializeOwned>(
        &self,
        key: &str,
        value: V,
        ttl: Option<Duration>,
    ) {
        let payload = CachePayload::new(value, ttl);
        self.backend.set(key, payload.encode()).await;
        self.maybe_gc().await;
    }

    /// Atomic set-if-absent. Returns whether the write happened.
    pub async fn add<V: Serialize + DeserializeOwned>(
        &self,
        key: &str,
        value: V,
        ttl: Option<Duration>,
    ) -> bool {
        let payload = CachePayload::new(value, ttl);
        self.backend.set_if_absent(key, payload.encode()).await
    }

    pub async fn delete(&self, key: &str) -> bool {
        self.backend.delete(key).await
    }

    /// Atomic compute-or-fetch: under a per-key lock, re-checks for a value,
    /// computes via `compute` if still absent, then stores and returns it.
    /// All concurrent callers for the same key observe the same value and
    /// `compute` runs at most once.
    pub async fn entry<V, F, Fut>(
        &self,
        key: &str,
        compute: F,
        ttl: Option<Duration>,
    ) -> Result<V, CacheError>
    where
        V: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = V>,
    {
        // Fast path: already cached, no lock needed.
        let (hit, ok) = self.fetch::<V>(key).await;
        if ok {
            return Ok(hit.expect("ok implies hit is Some"));
        }

        let _guard = self.acquire_lock(key).await?;

        // Re-check under the lock: another task may have raced us.
        let (hit, ok) = self.fetch::<V>(key).await;
        if ok {
            return Ok(hit.expect("ok implies hit is Some"));
        }

        let value = compute().await;
        self.store(key, &value, ttl).await;
        Ok(value)
    }

    /// Integer-typed compare-and-set, preserving the existing `expires_at`.
    pub async fn cas(&self, key: &str, old: i64, new: i64) -> Result<bool, CacheError> {
        let _guard = self.acquire_lock(key).await?;

        let Some(bytes) = self.backend.get(key).await else {
            return Ok(false);
        };
        let Some(payload) = CachePayload::<i64>::decode(&bytes) else {
            return Ok(false);
        };
        if payload.is_expired() || payload.v != old {
            return Ok(false);
        }

        let updated = CachePayload::with_expiry(new, payload.expires_at);
        self.backend.set(key, updated.encode()).await;
        Ok(true)
    }

    /// Atomic numeric mutate. Creates the entry with `ttl` if missing;
    /// preserves the existing `expires_at` if present. Returns
    /// `(new_value, ok)`, where `ok` mirrors `fetch`'s hit flag: whether a
    /// live, non-expired entry already existed to mutate rather than this
    /// call creating it fresh at zero.
    pub async fn inc(
        &self,
        key: &str,
        step: i64,
        ttl: Option<Duration>,
    ) -> Result<(i64, bool), CacheError> {
        self.mutate_numeric(key, step, ttl).await
    }

    pub async fn dec(
        &self,
        key: &str,
        step: i64,
        ttl: Option<Duration>,
    ) -> Result<(i64, bool), CacheError> {
        self.mutate_numeric(key, -step, ttl).await
    }

    async fn mutate_numeric(
        &self,
        key: &str,
        delta: i64,
        ttl: Option<Duration>,
    ) -> Result<(i64, bool), CacheError> {
        let _guard = self.acquire_lock(key).await?;

        let existing = self.backend.get(key).await.and_then(|b| CachePayload::<i64>::decode(&b));
        let (base, expires_at, ok) = match existing {
            Some(p) if !p.is_expired() => (p.v, p.expires_at, true),
            _ => (0, ttl.map(|d| payload::now_millis() + d.as_millis() as u64), false),
        };
        let updated = base + delta;
        let payload = CachePayload::with_expiry(updated, expires_at);
        self.backend.set(key, payload.encode()).await;
        Ok((updated, ok))
    }

    async fn acquire_lock(&self, key: &str) -> Result<LockGuard<'_>, CacheError> {
        let lock_key = format!("{LOCK_PREFIX}{key}");
        let deadline = tokio::time::Instant::now() + LOCK_TIMEOUT;
        loop {
            if self.backend.set_if_absent(&lock_key, bytes::Bytes::from_static(b"1")).await {
                return Ok(LockGuard {
                    backend: &self.backend,
                    key: lock_key,
                });
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(CacheError::LockTimeout { key: key.to_string() });
            }
            tokio::time::sleep(LOCK_POLL_INTERVAL).await;
        }
    }

    async fn maybe_gc(&self) {
        if rand::random::<f64>() >= GC_PROBABILITY {
            return;
        }
        let keys = self.backend.keys().await;
        let mut evicted = 0;
        for key in keys {
            if key.starts_with(LOCK_PREFIX) {
                continue;
            }
            if let Some(bytes) = self.backend.get(&key).await {
                if let Some(payload) = CachePayload::<serde_json::Value>::decode(&bytes) {
                    if payload.is_expired() {
                        self.backend.delete(&key).await;
                        evicted += 1;
                    }
                }
            }
        }
        if evicted > 0 {
            debug!(evicted, "microcache gc sweep");
        }
    }
}

/// RAII guard releasing the per-key lock on drop (including on cancellation
/// — a dropped `entry`/`cas`/`inc` future never leaves the lock held).
struct LockGuard<'a> {
    backend: &'a Arc<dyn CacheBackend>,
    key: String,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        let backend = self.backend.clone();
        let key = std::mem::take(&mut self.key);
        tokio::spawn(async move {
            backend.delete(&key).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn cache() -> Microcache {
        Microcache::with_backend(InProcessMapBackend::new())
    }

    #[tokio::test]
    async fn round_trip_within_ttl() {
        let c = cache();
        c.store("k", 42i32, Some(Duration::from_secs(60))).await;
        let (v, hit) = c.fetch::<i32>("k").await;
        assert!(hit);
        assert_eq!(v, Some(42));
    }

    #[tokio::test]
    async fn expires_after_ttl() {
        let c = cache();
        c.store("k", 42i32, Some(Duration::from_millis(10))).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        let (v, hit) = c.fetch::<i32>("k").await;
        assert!(!hit);
        assert_eq!(v, None);
    }

    #[tokio::test]
    async fn add_is_set_if_absent() {
        let c = cache();
        assert!(c.add("k", 1i32, None).await);
        assert!(!c.add("k", 2i32, None).await);
        let (v, _) = c.fetch::<i32>("k").await;
        assert_eq!(v, Some(1));
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let c = cache();
        c.store("k", 1i32, None).await;
        assert!(c.delete("k").await);
        let (_, hit) = c.fetch::<i32>("k").await;
        assert!(!hit);
    }

    #[tokio::test]
    async fn cas_preserves_expiry_and_requires_match() {
        let c = cache();
        c.store("k", 1i64, Some(Duration::from_secs(60))).await;
        assert!(!c.cas("k", 2, 3).await.unwrap());
        assert!(c.cas("k", 1, 3).await.unwrap());
        let (v, _) = c.fetch::<i64>("k").await;
        assert_eq!(v, Some(3));
    }

    #[tokio::test]
    async fn inc_creates_with_ttl_then_preserves_it() {
        let c = cache();
        let (v, ok) = c.inc("counter", 1, Some(Duration::from_secs(60))).await.unwrap();
        assert_eq!(v, 1);
        assert!(!ok, "first inc creates the entry, it doesn't find one");
        let (v, ok) = c.inc("counter", 4, None).await.unwrap();
        assert_eq!(v, 5);
        assert!(ok, "second inc finds the entry the first one created");
        let (v, hit) = c.fetch::<i64>("counter").await;
        assert!(hit);
        assert_eq!(v, Some(5));
    }

    #[tokio::test]
    async fn dec_below_zero_is_a_negative_value() {
        let c = cache();
        let (v, ok) = c.dec("counter", 3, None).await.unwrap();
        assert_eq!(v, -3);
        assert!(!ok);
    }

    #[tokio::test]
    async fn entry_is_idempotent_under_concurrency() {
        let c = cache();
        let calls = Arc::new(AtomicU32::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let c = c.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                c.entry(
                    "k",
                    || {
                        let calls = calls.clone();
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            7i32
                        }
                    },
                    Some(Duration::from_secs(60)),
                )
                .await
                .unwrap()
            }));
        }

        for h in handles {
            assert_eq!(h.await.unwrap(), 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_chain_like_behavior_fetch_miss_on_unknown_key() {
        let c = cache();
        let (v, hit) = c.fetch::<i32>("nope").await;
        assert!(!hit);
        assert_eq!(v, None);
    }
}
