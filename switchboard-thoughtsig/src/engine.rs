use moka::sync::Cache;
use std::{sync::Arc, time::Duration};

pub type CacheKey = u64;
pub type ThoughtSignature = Arc<str>;

/// Accepted by the upstream validator in lieu of a real signature, but only
/// on functionCall parts.
pub const SKIP_SIGNATURE_SENTINEL: &str = "skip_thought_signature_validator";

/// Signatures are only replayable within the conversation they were issued
/// for, and go stale quickly; 30 minutes covers any realistic turn gap.
pub const DEFAULT_TTL_SECS: u64 = 30 * 60;

pub struct SignatureStore {
    cache: Cache<CacheKey, ThoughtSignature>,
    sentinel: ThoughtSignature,
}

impl SignatureStore {
    pub fn new(ttl_secs: u64, max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .time_to_live(Duration::from_secs(ttl_secs.max(1)))
            .max_capacity(max_capacity.max(1))
            .build();

        Self {
            cache,
            sentinel: Arc::from(SKIP_SIGNATURE_SENTINEL),
        }
    }

    pub fn get(&self, key: CacheKey) -> Option<ThoughtSignature> {
        self.cache.get(&key)
    }

    pub fn put(&self, key: CacheKey, signature: ThoughtSignature) {
        self.cache.insert(key, signature);
    }

    pub fn sentinel(&self) -> ThoughtSignature {
        self.sentinel.clone()
    }

    /// Run pending eviction work now. Expired entries are otherwise evicted
    /// opportunistically on access; the server drives this from a periodic
    /// task.
    pub fn sweep(&self) {
        self.cache.run_pending_tasks();
    }

    pub fn len(&self) -> u64 {
        self.cache.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SignatureStore {
    fn default() -> Self {
        Self::new(DEFAULT_TTL_SECS, 16 * 1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn miss_then_hit() {
        let store = SignatureStore::default();
        assert!(store.get(7).is_none());

        store.put(7, Arc::from("sig_007"));
        assert_eq!(store.get(7).as_deref(), Some("sig_007"));
    }

    #[test]
    fn expired_entries_are_gone_after_sweep() {
        let store = SignatureStore::new(1, 16);
        store.put(1, Arc::from("sig"));
        assert_eq!(store.get(1).as_deref(), Some("sig"));

        std::thread::sleep(std::time::Duration::from_millis(1100));
        store.sweep();
        assert!(store.get(1).is_none());
        assert!(store.is_empty());
    }
}
