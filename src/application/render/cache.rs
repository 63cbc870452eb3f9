//! In-memory LRU of successful render outputs.

use std::{
    num::NonZeroUsize,
    sync::{Mutex, MutexGuard},
};

use bytes::Bytes;
use lru::LruCache;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::domain::format::{Layout, OutputFormat};

const SOURCE: &str = "application::render::cache";

#[derive(Debug)]
pub struct RenderCache {
    entries: Mutex<LruCache<String, Bytes>>,
    max_entry_bytes: usize,
}

impl RenderCache {
    /// `None` when `capacity` is zero.
    pub fn new(capacity: usize, max_entry_bytes: usize) -> Option<Self> {
        let capacity = NonZeroUsize::new(capacity)?;
        Some(Self {
            entries: Mutex::new(LruCache::new(capacity)),
            max_entry_bytes,
        })
    }

    pub fn key(format: OutputFormat, layout: Option<Layout>, source: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format.as_str().as_bytes());
        hasher.update([0]);
        hasher.update(layout.map(Layout::as_str).unwrap_or_default().as_bytes());
        hasher.update([0]);
        hasher.update(source.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        lock(&self.entries, "get").get(key).cloned()
    }

    /// Stores `bytes` unless it is larger than the per-entry cap.
    pub fn insert(&self, key: String, bytes: Bytes) -> bool {
        if bytes.len() > self.max_entry_bytes {
            return false;
        }
        lock(&self.entries, "insert").put(key, bytes);
        true
    }

    pub fn len(&self) -> usize {
        lock(&self.entries, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn lock<'a>(
    entries: &'a Mutex<LruCache<String, Bytes>>,
    op: &'static str,
) -> MutexGuard<'a, LruCache<String, Bytes>> {
    match entries.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!(
                op,
                target_module = SOURCE,
                lock_kind = "mutex.lock",
                result = "poisoned_recovered",
                "Recovered from poisoned render cache lock"
            );
            poisoned.into_inner()
        }
    }
}
