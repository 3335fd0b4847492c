//! Explicit memoization of history and forecast results.
//!
//! Entries are keyed by the canonical request and expire after a TTL. Keys
//! embed the end date of the historical window, so a new calendar day never
//! reuses yesterday's results. When the cache is full the oldest entry is
//! evicted.

use crate::forecast::Horizon;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct HistoryKey {
    /// Symbols in request order (row order of the combined table follows it).
    pub tickers: Vec<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ForecastKey {
    pub history: HistoryKey,
    pub horizon: Horizon,
}

#[derive(Clone, Copy, Debug)]
pub struct CachePolicy {
    pub enabled: bool,
    pub ttl: Duration,
    pub max_entries: usize,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(3600),
            max_entries: 32,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

struct Entry<V> {
    value: Arc<V>,
    inserted: Instant,
}

pub struct ResultCache<K, V> {
    policy: CachePolicy,
    entries: HashMap<K, Entry<V>>,
    hits: u64,
    misses: u64,
}

impl<K: Eq + Hash + Clone + std::fmt::Debug, V> ResultCache<K, V> {
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            policy,
            entries: HashMap::new(),
            hits: 0,
            misses: 0,
        }
    }

    pub fn get(&mut self, key: &K) -> Option<Arc<V>> {
        if !self.policy.enabled {
            self.misses += 1;
            return None;
        }

        let expired = match self.entries.get(key) {
            Some(entry) if entry.inserted.elapsed() < self.policy.ttl => {
                self.hits += 1;
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            debug!("cache entry expired: {:?}", key);
            self.entries.remove(key);
        }
        self.misses += 1;
        None
    }

    pub fn insert(&mut self, key: K, value: Arc<V>) {
        if !self.policy.enabled {
            return;
        }
        if !self.entries.contains_key(&key) && self.entries.len() >= self.policy.max_entries.max(1) {
            if let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.inserted)
                .map(|(k, _)| k.clone())
            {
                debug!("cache full, evicting {:?}", oldest);
                self.entries.remove(&oldest);
            }
        }
        self.entries.insert(
            key,
            Entry {
                value,
                inserted: Instant::now(),
            },
        );
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits,
            misses: self.misses,
        }
    }
}

/// Wall-clock comparison between a first (cold) and repeated (cached) call.
#[derive(Clone, Copy, Debug)]
pub struct CacheTiming {
    pub without_cache: Duration,
    pub with_cache: Duration,
}

impl CacheTiming {
    /// `(with − without) / without × 100`; `None` when the first call took no time.
    pub fn percentage_difference(&self) -> Option<f64> {
        let without = self.without_cache.as_secs_f64();
        if without == 0.0 {
            return None;
        }
        Some((self.with_cache.as_secs_f64() - without) / without * 100.0)
    }

    pub fn lines(&self) -> Vec<String> {
        let pct = match self.percentage_difference() {
            Some(p) => format!("{}%", p),
            None => "n/a".to_string(),
        };
        vec![
            format!("Execution time without cache: {} seconds", self.without_cache.as_secs_f64()),
            format!("Execution time with cache: {} seconds", self.with_cache.as_secs_f64()),
            format!("Percentage difference: {}", pct),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(ttl: Duration, max_entries: usize) -> CachePolicy {
        CachePolicy {
            enabled: true,
            ttl,
            max_entries,
        }
    }

    #[test]
    fn test_hit_after_insert() {
        let mut cache: ResultCache<&str, u32> = ResultCache::new(CachePolicy::default());
        assert!(cache.get(&"a").is_none());
        cache.insert("a", Arc::new(7));
        assert_eq!(*cache.get(&"a").unwrap(), 7);
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.entries), (1, 1, 1));
    }

    #[test]
    fn test_zero_ttl_always_expires() {
        let mut cache: ResultCache<&str, u32> = ResultCache::new(policy(Duration::ZERO, 4));
        cache.insert("a", Arc::new(1));
        assert!(cache.get(&"a").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_clear_drops_everything() {
        let mut cache: ResultCache<u8, u8> = ResultCache::new(CachePolicy::default());
        cache.insert(1, Arc::new(1));
        cache.insert(2, Arc::new(2));
        cache.clear();
        assert_eq!(cache.len(), 0);
        assert!(cache.get(&1).is_none());
        assert!(cache.get(&2).is_none());
    }

    #[test]
    fn test_full_cache_evicts_oldest() {
        let mut cache: ResultCache<u8, u8> = ResultCache::new(policy(Duration::from_secs(60), 2));
        cache.insert(1, Arc::new(1));
        std::thread::sleep(Duration::from_millis(2));
        cache.insert(2, Arc::new(2));
        std::thread::sleep(Duration::from_millis(2));
        cache.insert(3, Arc::new(3));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&1).is_none());
        assert!(cache.get(&2).is_some());
        assert!(cache.get(&3).is_some());
    }

    #[test]
    fn test_disabled_cache_never_stores() {
        let mut cache: ResultCache<u8, u8> = ResultCache::new(CachePolicy {
            enabled: false,
            ..CachePolicy::default()
        });
        cache.insert(1, Arc::new(1));
        assert!(cache.get(&1).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_timing_lines() {
        let timing = CacheTiming {
            without_cache: Duration::from_millis(2000),
            with_cache: Duration::from_millis(500),
        };
        assert_eq!(timing.percentage_difference(), Some(-75.0));
        let lines = timing.lines();
        assert_eq!(lines[0], "Execution time without cache: 2 seconds");
        assert_eq!(lines[2], "Percentage difference: -75%");

        let instant = CacheTiming {
            without_cache: Duration::ZERO,
            with_cache: Duration::ZERO,
        };
        assert_eq!(instant.lines()[2], "Percentage difference: n/a");
    }
}
