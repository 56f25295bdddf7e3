use bytes::Bytes;
use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A boxed, `Send`-bound future — the object-safe shape every [`CacheBackend`]
/// method returns, mirroring `r2e_cache::CacheStore`'s `Pin<Box<dyn Future>>`
/// methods rather than `async fn` in a trait (backends are stored as
/// `Arc<dyn CacheBackend>`, which rules out `async fn` in traits today).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Pluggable storage primitive underneath the [`crate::Microcache`].
///
/// Implementors need only provide raw byte get/set/delete/set-if-absent —
/// TTL, CAS, locking, and GC all live one layer up in `Microcache` and are
/// backend-agnostic. A primitive failing here (I/O error, pool exhaustion)
/// should be treated as "absent" by the caller; `Microcache` does exactly
/// that rather than propagating backend errors.
pub trait CacheBackend: Send + Sync + 'static {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Option<Bytes>>;
    fn set<'a>(&'a self, key: &'a str, value: Bytes) -> BoxFuture<'a, ()>;
    /// Atomic set-if-absent. Returns whether the write happened.
    fn set_if_absent<'a>(&'a self, key: &'a str, value: Bytes) -> BoxFuture<'a, bool>;
    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, bool>;
    /// Best-effort enumeration for probabilistic GC. Backends that can't
    /// cheaply enumerate (e.g. a remote store) may return an empty vec —
    /// GC becomes a no-op, which is safe (entries still expire lazily on
    /// read).
    fn keys<'a>(&'a self) -> BoxFuture<'a, Vec<String>>;

    /// Human-readable name, used in `tracing` spans at backend selection time.
    fn name(&self) -> &'static str;
}

/// Process-local fallback backend. Always available; selected when no
/// shared-table or embedded-SQL backend can be set up (see
/// [`crate::Microcache::auto`]).
#[derive(Clone, Default)]
pub struct InProcessMapBackend {
    inner: Arc<DashMap<String, Bytes>>,
}

impl InProcessMapBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheBackend for InProcessMapBackend {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Option<Bytes>> {
        let value = self.inner.get(key).map(|v| v.value().clone());
        Box::pin(async move { value })
    }

    fn set<'a>(&'a self, key: &'a str, value: Bytes) -> BoxFuture<'a, ()> {
        self.inner.insert(key.to_string(), value);
        Box::pin(async move {})
    }

    fn set_if_absent<'a>(&'a self, key: &'a str, value: Bytes) -> BoxFuture<'a, bool> {
        let inserted = match self.inner.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(e) => {
                e.insert(value);
                true
            }
        };
        Box::pin(async move { inserted })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, bool> {
        let removed = self.inner.remove(key).is_some();
        Box::pin(async move { removed })
    }

    fn keys<'a>(&'a self) -> BoxFuture<'a, Vec<String>> {
        let keys: Vec<String> = self.inner.iter().map(|e| e.key().clone()).collect();
        Box::pin(async move { keys })
    }

    fn name(&self) -> &'static str {
        "in-process-map"
    }
}

/// Fixed-capacity stand-in for a shared-memory table (APCu-style). Backed by
/// a `DashMap` guarded by a row cap — task-safe by construction, since
/// `DashMap` shards its internal locks.
///
/// The row cap approximates "fixed rows" without actually mapping memory:
/// once `max_rows` is reached, `set`/`set_if_absent` on a new key fail
/// silently (the entry simply doesn't get cached — consistent with the
/// opportunistic-cache contract in spec §4.1).
#[derive(Clone)]
pub struct SharedTableBackend {
    inner: Arc<DashMap<String, Bytes>>,
    max_rows: usize,
    max_value_size: usize,
}

impl SharedTableBackend {
    pub fn new(max_rows: usize, max_value_size: usize) -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            max_rows,
            max_value_size,
        }
    }
}

impl CacheBackend for SharedTableBackend {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Option<Bytes>> {
        let value = self.inner.get(key).map(|v| v.value().clone());
        Box::pin(async move { value })
    }

    fn set<'a>(&'a self, key: &'a str, value: Bytes) -> BoxFuture<'a, ()> {
        if value.len() <= self.max_value_size
            && (self.inner.contains_key(key) || self.inner.len() < self.max_rows)
        {
            self.inner.insert(key.to_string(), value);
        }
        Box::pin(async move {})
    }

    fn set_if_absent<'a>(&'a self, key: &'a str, value: Bytes) -> BoxFuture<'a, bool> {
        let inserted = if value.len() > self.max_value_size {
            false
        } else {
            // The row cap must be checked *before* taking the entry:
            // `DashMap`'s per-shard locks aren't reentrant, and `len()`
            // read-locks every shard, including the one a `Vacant` entry's
            // write guard already holds on this map — checking it with the
            // entry held deadlocks on the very first call.
            let at_capacity = !self.inner.contains_key(key) && self.inner.len() >= self.max_rows;
            if at_capacity {
                false
            } else {
                match self.inner.entry(key.to_string()) {
                    dashmap::mapref::entry::Entry::Occupied(_) => false,
                    dashmap::mapref::entry::Entry::Vacant(e) => {
                        e.insert(value);
                        true
                    }
                }
            }
        };
        Box::pin(async move { inserted })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, bool> {
        let removed = self.inner.remove(key).is_some();
        Box::pin(async move { removed })
    }

    fn keys<'a>(&'a self) -> BoxFuture<'a, Vec<String>> {
        let keys: Vec<String> = self.inner.iter().map(|e| e.key().clone()).collect();
        Box::pin(async move { keys })
    }

    fn name(&self) -> &'static str {
        "shared-table"
    }
}
