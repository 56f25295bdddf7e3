//! Ordered, microcached path resolution.
//!
//! A primary search root plus an ordered list of fallback roots; the
//! primary always wins ties, fallbacks are searched most-recently-added
//! first. `find_first` is memoized through a [`Microcache`] with a short
//! TTL — filesystem layout changes are rare enough that a 1s staleness
//! window is an acceptable trade for not re-`stat`ing on every lookup.

use kern_cache::Microcache;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

const FIND_FIRST_TTL: Duration = Duration::from_secs(1);

pub struct PathRegistry {
    id: u64,
    primary: PathBuf,
    fallbacks: RwLock<Vec<PathBuf>>,
    cache: Microcache,
}

impl PathRegistry {
    pub fn new(primary: impl Into<PathBuf>, cache: Microcache) -> Self {
        Self {
            id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
            primary: primary.into(),
            fallbacks: RwLock::new(Vec::new()),
            cache,
        }
    }

    /// Append `p` to the fallback list if it isn't already present. The
    /// fallback list is expected to stay small (a handful of entries), so a
    /// linear scan for idempotence is cheaper than a set plus a parallel
    /// ordered list.
    pub fn add_path(&self, p: impl Into<PathBuf>) {
        let p = p.into();
        let mut fallbacks = self.fallbacks.write().unwrap();
        if !fallbacks.contains(&p) {
            fallbacks.push(p);
        }
    }

    /// `[primary] ++ reverse(fallbacks)` — primary first, then the most
    /// recently added fallback, down to the earliest.
    pub fn paths(&self) -> Vec<PathBuf> {
        let mut out = Vec::with_capacity(1 + self.fallbacks.read().unwrap().len());
        out.push(self.primary.clone());
        out.extend(self.fallbacks.read().unwrap().iter().rev().cloned());
        out
    }

    /// First existing `root.join(rel)` across `paths()`, memoized for
    /// `FIND_FIRST_TTL`. No symlink resolution — paths are compared and
    /// returned lexically.
    pub async fn find_first(&self, rel: &str) -> Option<PathBuf> {
        let cache_key = format!("path_registry:{}:{}", self.id, rel);
        let (cached, hit) = self.cache.fetch::<PathBuf>(&cache_key).await;
        if hit {
            return cached;
        }

        let found = self.paths().into_iter().map(|root| root.join(rel)).find(|p| p.exists());

        if let Some(found) = &found {
            self.cache.store(&cache_key, found.clone(), Some(FIND_FIRST_TTL)).await;
        }
        found
    }
}
