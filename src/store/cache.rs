use super::registry::RuleRegistry;
use super::tree::RuleTree;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use chrono::NaiveDate;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Loaded rule trees keyed by date, least recently used evicted first.
///
/// Trees are immutable once loaded, so entries never need invalidation.
pub struct TreeCache {
    trees: Mutex<LruCache<NaiveDate, Arc<RuleTree>>>,
}

impl TreeCache {
    pub fn new(capacity: usize) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity)
            .ok_or_else(|| EngineError::Config("tree cache capacity must be at least 1".into()))?;
        Ok(Self { trees: Mutex::new(LruCache::new(capacity)) })
    }

    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        Self::new(config.tree_cache_capacity)
    }

    pub fn capacity(&self) -> usize {
        self.lock().cap().get()
    }

    /// Returns the tree for `date`, loading it from `registry` on a miss.
    pub fn get_or_load(&self, registry: &RuleRegistry, date: NaiveDate) -> Result<Arc<RuleTree>> {
        if let Some(tree) = self.lock().get(&date) {
            debug!(%date, "tree cache hit");
            return Ok(Arc::clone(tree));
        }

        // Loading happens outside the lock; a concurrent miss loads the same tree twice.
        let tree = Arc::new(registry.load(date)?);
        self.lock().put(date, Arc::clone(&tree));
        debug!(%date, "tree cache miss");
        Ok(tree)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<NaiveDate, Arc<RuleTree>>> {
        self.trees.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
