use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// On-disk/in-memory representation of a cache entry.
///
/// This is the *sole* source of truth for expiry: backends may additionally
/// evict coarsely (e.g. a fixed-size shared table recycling rows), but a
/// payload surviving in a backend past its `expires_at` must still be
/// treated as a miss by [`crate::Microcache`].
#[derive(Serialize, Deserialize)]
pub(crate) struct CachePayload<V> {
    pub(crate) v: V,
    /// Epoch millis, or `None` for entries that never expire.
    pub(crate) expires_at: Option<u64>,
}

impl<V: Serialize + DeserializeOwned> CachePayload<V> {
    pub(crate) fn new(v: V, ttl: Option<std::time::Duration>) -> Self {
        Self {
            v,
            expires_at: ttl.map(|d| now_millis() + d.as_millis() as u64),
        }
    }

    pub(crate) fn with_expiry(v: V, expires_at: Option<u64>) -> Self {
        Self { v, expires_at }
    }

    pub(crate) fn is_expired(&self) -> bool {
        matches!(self.expires_at, Some(at) if at <= now_millis())
    }

    pub(crate) fn encode(&self) -> bytes::Bytes {
        bytes::Bytes::from(serde_json::to_vec(self).expect("CachePayload serializes"))
    }

    pub(crate) fn decode(bytes: &[u8]) -> Option<Self> {
        serde_json::from_slice(bytes).ok()
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as u64
}
