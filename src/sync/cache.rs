/// Evaluation cache. Memoizes materialized groups per group id.
///
/// An entry remembers the exact `Arc`s of the base and operation log it was
/// computed from. A lookup hits only when both are pointer-equal to the
/// caller's current inputs; appends and reconciliations install new `Arc`s,
/// so they miss without any explicit invalidation. Because the entry keeps
/// its inputs alive, a freed log can never be reallocated at the same
/// address while an entry still points at it.
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::sync::config::ReferencePolicy;
use crate::sync::eval::{evaluate, EvalError};
use crate::sync::model::Group;
use crate::sync::ops::Operation;

struct CacheEntry {
    base: Arc<Group>,
    operations: Arc<Vec<Arc<Operation>>>,
    policy: ReferencePolicy,
    value: Arc<Group>,
}

impl CacheEntry {
    fn matches(
        &self,
        base: &Arc<Group>,
        operations: &Arc<Vec<Arc<Operation>>>,
        policy: ReferencePolicy,
    ) -> bool {
        Arc::ptr_eq(&self.base, base)
            && Arc::ptr_eq(&self.operations, operations)
            && self.policy == policy
    }
}

/// Hit/miss counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

struct Inner {
    entries: LruCache<String, CacheEntry>,
    stats: CacheStats,
}

pub struct EvaluationCache {
    inner: Mutex<Inner>,
}

impl EvaluationCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        EvaluationCache {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                stats: CacheStats::default(),
            }),
        }
    }

    /// Materialize a group, reusing the previous result when neither input
    /// changed identity. Errors are never cached.
    pub fn evaluate(
        &self,
        group_id: &str,
        base: Option<&Arc<Group>>,
        operations: &Arc<Vec<Arc<Operation>>>,
        policy: ReferencePolicy,
    ) -> Result<Option<Arc<Group>>, EvalError> {
        let base = match base {
            Some(b) => b,
            None => return Ok(None),
        };

        let mut inner = self.lock();
        if let Some(entry) = inner.entries.get(group_id) {
            if entry.matches(base, operations, policy) {
                let value = Arc::clone(&entry.value);
                inner.stats.hits += 1;
                return Ok(Some(value));
            }
        }
        inner.stats.misses += 1;

        let value = match evaluate(Some(&**base), operations.as_slice(), policy)? {
            Some(group) => Arc::new(group),
            None => return Ok(None),
        };
        log::debug!(
            "cache miss for {}: evaluated {} pending ops",
            group_id,
            operations.len()
        );

        inner.entries.put(
            group_id.to_string(),
            CacheEntry {
                base: Arc::clone(base),
                operations: Arc::clone(operations),
                policy,
                value: Arc::clone(&value),
            },
        );
        Ok(Some(value))
    }

    /// Grow the LRU so `groups` working copies fit at once. Never shrinks.
    pub fn ensure_capacity(&self, groups: usize) {
        let mut inner = self.lock();
        if let Some(needed) = NonZeroUsize::new(groups) {
            if needed > inner.entries.cap() {
                log::debug!("evaluation cache grown to {} entries", needed);
                inner.entries.resize(needed);
            }
        }
    }

    /// Drop the entry for one group (group removed from the store).
    pub fn invalidate(&self, group_id: &str) {
        self.lock().entries.pop(group_id);
    }

    pub fn clear(&self) {
        self.lock().entries.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Entries are only replaced whole, so a poisoned guard is still consistent.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for EvaluationCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("EvaluationCache")
            .field("len", &inner.entries.len())
            .field("cap", &inner.entries.cap())
            .field("stats", &inner.stats)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
