//! Sliding-expiration entity cache shared by the managers.
//!
//! Entries are keyed by a fingerprint string derived from the finder and its
//! arguments ("client_id:c1", "id:7f3a…"). Reads refresh the entry's clock;
//! entries untouched for the configured window are evicted lazily. The cache
//! is shared across transactions and safe for concurrent use.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

#[derive(Clone)]
pub struct EntityCache<T> {
    inner: Arc<DashMap<String, (T, Instant)>>,
    window: Duration,
}

impl<T: Clone> EntityCache<T> {
    /// Default sliding-expiration window.
    pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

    pub fn new(window: Duration) -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
            window,
        }
    }

    /// Gets a cached value and slides its expiration forward.
    pub fn get(&self, key: &str) -> Option<T> {
        if let Some(mut entry) = self.inner.get_mut(key) {
            let (value, touched) = entry.value_mut();
            if touched.elapsed() < self.window {
                *touched = Instant::now();
                return Some(value.clone());
            }
        }
        self.inner.remove(key);
        None
    }

    pub fn insert(&self, key: impl Into<String>, value: T) {
        self.inner.insert(key.into(), (value, Instant::now()));
    }

    pub fn remove(&self, key: &str) {
        self.inner.remove(key);
    }

    /// Removes every entry whose key starts with the given prefix. Used to
    /// drop all finder keys of an entity on write.
    pub fn remove_by_prefix(&self, prefix: &str) {
        self.inner.retain(|key, _| !key.starts_with(prefix));
    }

    pub fn clear(&self) {
        self.inner.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl<T: Clone> Default for EntityCache<T> {
    fn default() -> Self {
        Self::new(Self::DEFAULT_WINDOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn test_hit_and_miss() {
        let cache = EntityCache::new(Duration::from_secs(60));
        cache.insert("id:1", "entity");
        assert_eq!(cache.get("id:1"), Some("entity"));
        assert_eq!(cache.get("id:2"), None);
    }

    #[test]
    fn test_expires_after_idle_window() {
        let cache = EntityCache::new(Duration::from_millis(40));
        cache.insert("id:1", "entity");
        sleep(Duration::from_millis(60));
        assert_eq!(cache.get("id:1"), None);
    }

    #[test]
    fn test_read_slides_expiration() {
        let cache = EntityCache::new(Duration::from_millis(80));
        cache.insert("id:1", "entity");
        sleep(Duration::from_millis(50));
        assert_eq!(cache.get("id:1"), Some("entity"));
        sleep(Duration::from_millis(50));
        // Still alive: the previous read reset the clock.
        assert_eq!(cache.get("id:1"), Some("entity"));
    }

    #[test]
    fn test_remove_by_prefix() {
        let cache = EntityCache::new(Duration::from_secs(60));
        cache.insert("app:id:1", "a");
        cache.insert("app:client_id:c1", "a");
        cache.insert("scope:name:openid", "s");

        cache.remove_by_prefix("app:");
        assert_eq!(cache.get("app:id:1"), None);
        assert_eq!(cache.get("app:client_id:c1"), None);
        assert_eq!(cache.get("scope:name:openid"), Some("s"));
    }
}
