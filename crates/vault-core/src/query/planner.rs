//! Query planner with a lightweight in-memory cache of compiled queries.
//!
//! Compilation is pure, so compiled predicates can be shared between
//! requests; visibility is bound later, per viewer.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::config::VaultConfig;
use crate::errors::VaultResult;
use crate::models::ObjectType;
use crate::query::compiler::{compile, CompiledQuery};

struct CacheEntry {
    value: CompiledQuery,
    expires_at: Instant,
}

/// Whether a lookup was served from the cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheMode {
    Hit,
    Miss,
}

impl CacheMode {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheMode::Hit => "cache_hit",
            CacheMode::Miss => "cache_miss",
        }
    }
}

pub struct QueryPlanner {
    max_entries: usize,
    ttl: Duration,
    cache: Mutex<IndexMap<String, CacheEntry>>,
}

impl QueryPlanner {
    pub fn new(max_entries: usize, ttl_seconds: f64) -> Self {
        Self {
            max_entries: max_entries.max(1),
            ttl: Duration::from_secs_f64(ttl_seconds.max(0.1)),
            cache: Mutex::new(IndexMap::new()),
        }
    }

    pub fn from_config(config: &VaultConfig) -> Self {
        Self::new(config.query_cache_entries, config.query_cache_ttl_seconds)
    }

    fn cache_key(object_type: ObjectType, text: &str) -> String {
        format!("{}:{}", object_type.as_str(), text.trim())
    }

    fn evict_expired(cache: &mut IndexMap<String, CacheEntry>, now: Instant) {
        cache.retain(|_, entry| entry.expires_at > now);
    }

    fn evict_over_capacity(&self, cache: &mut IndexMap<String, CacheEntry>) {
        while cache.len() > self.max_entries {
            cache.shift_remove_index(0);
        }
    }

    /// Compile `text` for `object_type`, reusing a cached result when one
    /// is still fresh. Failed compilations are not cached.
    pub fn get_or_compile(
        &self,
        object_type: ObjectType,
        text: &str,
    ) -> VaultResult<(CompiledQuery, CacheMode)> {
        let cache_key = Self::cache_key(object_type, text);
        {
            let mut cache = self.cache.lock();
            Self::evict_expired(&mut cache, Instant::now());
            if let Some(entry) = cache.shift_remove(&cache_key) {
                let value = entry.value.clone();
                // Move to end for LRU
                cache.insert(cache_key, entry);
                debug!(object_type = %object_type, "query cache hit");
                return Ok((value, CacheMode::Hit));
            }
        }

        let compiled = compile(text, object_type)?;

        let mut cache = self.cache.lock();
        cache.insert(
            cache_key,
            CacheEntry {
                value: compiled.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        self.evict_over_capacity(&mut cache);
        Ok((compiled, CacheMode::Miss))
    }

    pub fn stats(&self) -> HashMap<String, i64> {
        let cache = self.cache.lock();
        let mut result = HashMap::new();
        result.insert("entries".to_string(), cache.len() as i64);
        result.insert("max_entries".to_string(), self.max_entries as i64);
        result
    }
}
