//! Caller-owned snapshot cache for loaded readings.
//!
//! The handle is cheap to clone and lives in the router state. Entries are
//! keyed by the device filter used to load them (`None` = all devices). Only
//! successful, non-empty loads are cached, entries expire after a fixed age,
//! and the map never holds more than `max_entries` snapshots.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::config::Config;
use crate::models::Reading;

// ---

pub const DEFAULT_MAX_ENTRIES: usize = 64;
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

type CacheKey = Option<String>;

#[derive(Debug)]
struct Entry {
    loaded_at: Instant,
    readings: Arc<Vec<Reading>>,
}

#[derive(Debug, Clone)]
pub struct ReadingCache {
    // ---
    entries: Arc<RwLock<HashMap<CacheKey, Entry>>>,
    max_entries: usize,
    ttl: Duration,
}

impl Default for ReadingCache {
    fn default() -> Self {
        Self::with_limits(DEFAULT_MAX_ENTRIES, DEFAULT_TTL)
    }
}

impl ReadingCache {
    // ---
    pub fn from_config(cfg: &Config) -> Self {
        Self::with_limits(
            cfg.reading_cache_max,
            Duration::from_secs(cfg.reading_cache_ttl_secs),
        )
    }

    pub fn with_limits(max_entries: usize, ttl: Duration) -> Self {
        Self {
            entries: Arc::default(),
            max_entries: max_entries.max(1),
            ttl,
        }
    }

    /// Cached snapshot for `device_id`, unless it has expired.
    pub async fn get(&self, device_id: Option<&str>) -> Option<Arc<Vec<Reading>>> {
        self.entries
            .read()
            .await
            .get(&device_id.map(str::to_owned))
            .filter(|entry| entry.loaded_at.elapsed() < self.ttl)
            .map(|entry| Arc::clone(&entry.readings))
    }

    /// Store a snapshot. Expired entries are dropped first; if the map is
    /// still full, the oldest entry is evicted.
    pub async fn insert(&self, device_id: Option<&str>, readings: Vec<Reading>) -> Arc<Vec<Reading>> {
        // ---
        let snapshot = Arc::new(readings);
        let key = device_id.map(str::to_owned);
        let mut entries = self.entries.write().await;

        entries.retain(|_, entry| entry.loaded_at.elapsed() < self.ttl);
        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.loaded_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                tracing::debug!("Reading cache full, evicting {:?}", oldest);
                entries.remove(&oldest);
            }
        }

        entries.insert(
            key,
            Entry {
                loaded_at: Instant::now(),
                readings: Arc::clone(&snapshot),
            },
        );
        snapshot
    }

    pub async fn invalidate(&self, device_id: Option<&str>) {
        self.entries
            .write()
            .await
            .remove(&device_id.map(str::to_owned));
    }

    /// Drop every cached snapshot.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Number of snapshots currently held, expired ones included.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Return the cached snapshot, or run `loader` and cache its result.
    ///
    /// `force_refresh` drops any cached entry first. A failed or empty load
    /// leaves the cache without an entry for this key.
    pub async fn load<F, Fut, E>(
        &self,
        device_id: Option<&str>,
        force_refresh: bool,
        loader: F,
    ) -> Result<Arc<Vec<Reading>>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<Reading>, E>>,
    {
        // ---
        if force_refresh {
            self.invalidate(device_id).await;
        } else if let Some(hit) = self.get(device_id).await {
            tracing::debug!("Reading cache hit for {:?} ({} readings)", device_id, hit.len());
            return Ok(hit);
        }

        let readings = loader().await?;
        if readings.is_empty() {
            // Unknown devices load nothing; keep them out of the map
            return Ok(Arc::new(readings));
        }
        tracing::debug!("Reading cache filled for {:?} ({} readings)", device_id, readings.len());
        Ok(self.insert(device_id, readings).await)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use crate::models::SensorValues;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample(device: &str) -> Vec<Reading> {
        vec![Reading {
            device_id: device.to_string(),
            timestamp: Utc::now(),
            values: SensorValues::default(),
        }]
    }

    #[test]
    fn test_load_caches_until_forced() {
        // ---
        tokio_test::block_on(async {
            let cache = ReadingCache::default();
            let counter = AtomicUsize::new(0);
            let calls = &counter;
            let loader = move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(sample("pond-A"))
            };

            let first = cache.load(Some("pond-A"), false, loader).await.unwrap();
            let second = cache.load(Some("pond-A"), false, loader).await.unwrap();
            assert_eq!(calls.load(Ordering::SeqCst), 1);
            assert!(Arc::ptr_eq(&first, &second));

            cache.load(Some("pond-A"), true, loader).await.unwrap();
            assert_eq!(calls.load(Ordering::SeqCst), 2);
        });
    }

    #[test]
    fn test_keys_are_independent() {
        // ---
        tokio_test::block_on(async {
            let cache = ReadingCache::default();
            cache.insert(Some("pond-A"), sample("pond-A")).await;

            assert!(cache.get(Some("pond-A")).await.is_some());
            assert!(cache.get(Some("pond-B")).await.is_none());
            assert!(cache.get(None).await.is_none());

            cache.invalidate(Some("pond-A")).await;
            assert!(cache.get(Some("pond-A")).await.is_none());
        });
    }

    #[test]
    fn test_clear_drops_everything() {
        // ---
        tokio_test::block_on(async {
            let cache = ReadingCache::default();
            cache.insert(Some("pond-A"), sample("pond-A")).await;
            cache.insert(None, sample("pond-B")).await;
            assert_eq!(cache.len().await, 2);

            cache.clear().await;
            assert_eq!(cache.len().await, 0);
            assert!(cache.get(None).await.is_none());
        });
    }

    #[test]
    fn test_failed_load_is_not_cached() {
        // ---
        tokio_test::block_on(async {
            let cache = ReadingCache::default();
            let failed = cache
                .load(None, false, || async { Err::<Vec<Reading>, _>("boom") })
                .await;
            assert_eq!(failed.unwrap_err(), "boom");
            assert!(cache.get(None).await.is_none());

            let loaded = cache
                .load(None, false, || async { Ok::<_, &str>(sample("pond-A")) })
                .await
                .unwrap();
            assert_eq!(loaded.len(), 1);
        });
    }

    #[test]
    fn test_unknown_devices_do_not_grow_the_map() {
        // ---
        tokio_test::block_on(async {
            let cache = ReadingCache::default();
            for i in 0..10_000 {
                let device = format!("nonexistent-{}", i);
                let loaded = cache
                    .load(Some(device.as_str()), false, || async { Ok::<_, String>(Vec::new()) })
                    .await
                    .unwrap();
                assert!(loaded.is_empty());
            }
            assert_eq!(cache.len().await, 0);
        });
    }

    #[test]
    fn test_entry_count_is_bounded() {
        // ---
        tokio_test::block_on(async {
            let cache = ReadingCache::with_limits(8, DEFAULT_TTL);
            for i in 0..100 {
                let device = format!("pond-{}", i);
                cache
                    .load(Some(device.as_str()), false, || async { Ok::<_, String>(sample("pond")) })
                    .await
                    .unwrap();
                assert!(cache.len().await <= 8);
            }
            assert_eq!(cache.len().await, 8);
            // Most recent load survives eviction
            assert!(cache.get(Some("pond-99")).await.is_some());
        });
    }

    #[test]
    fn test_expired_entries_are_reloaded() {
        // ---
        tokio_test::block_on(async {
            let cache = ReadingCache::with_limits(8, Duration::ZERO);
            let counter = AtomicUsize::new(0);
            let calls = &counter;
            let loader = move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(sample("pond-A"))
            };

            cache.load(Some("pond-A"), false, loader).await.unwrap();
            cache.load(Some("pond-A"), false, loader).await.unwrap();
            assert_eq!(calls.load(Ordering::SeqCst), 2);
        });
    }
}
