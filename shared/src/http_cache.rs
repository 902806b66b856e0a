//! In-memory response cache that sits under [`crate::network::Network`].
//!
//! Keyed by the full request URL, bounded by total body bytes, evicting the
//! least recently used entries first.

use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use crate::capabilities::RawResponse;

pub const DEFAULT_CACHE_CAPACITY_BYTES: usize = 20 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: usize,
    pub capacity_bytes: usize,
}

struct CacheState {
    entries: LruCache<String, Bytes>,
    bytes: usize,
}

pub struct ResponseCache {
    capacity_bytes: usize,
    state: Mutex<CacheState>,
}

impl ResponseCache {
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            capacity_bytes,
            state: Mutex::new(CacheState {
                entries: LruCache::unbounded(),
                bytes: 0,
            }),
        }
    }

    pub fn get(&self, url: &str) -> Option<Bytes> {
        let mut state = self.state.lock();
        state.entries.get(url).cloned()
    }

    /// Stores a successful response body unless the server asked us not to.
    /// Returns whether the body was stored.
    pub fn store(&self, url: &str, response: &RawResponse) -> bool {
        if !response.is_success() || forbids_storage(response) {
            return false;
        }
        let Some(body) = response.body.as_ref().filter(|b| !b.is_empty()) else {
            return false;
        };
        if body.len() > self.capacity_bytes {
            debug!(url, size = body.len(), "response larger than cache, not stored");
            return false;
        }

        let mut state = self.state.lock();
        if let Some(previous) = state.entries.put(url.to_string(), body.clone()) {
            state.bytes -= previous.len();
        }
        state.bytes += body.len();

        while state.bytes > self.capacity_bytes {
            match state.entries.pop_lru() {
                Some((evicted, bytes)) => {
                    state.bytes -= bytes.len();
                    debug!(url = %evicted, size = bytes.len(), "evicted cached response");
                }
                None => break,
            }
        }
        true
    }

    pub fn remove(&self, url: &str) -> Option<Bytes> {
        let mut state = self.state.lock();
        let removed = state.entries.pop(url);
        if let Some(body) = &removed {
            state.bytes -= body.len();
        }
        removed
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.bytes = 0;
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            entries: state.entries.len(),
            bytes: state.bytes,
            capacity_bytes: self.capacity_bytes,
        }
    }
}

fn forbids_storage(response: &RawResponse) -> bool {
    response.header("cache-control").is_some_and(|value| {
        value
            .split(',')
            .map(str::trim)
            .any(|directive| directive.eq_ignore_ascii_case("no-store"))
    })
}
