//! Bounded cache of contraction paths.
//!
//! Path search is pure in the expression and the operand shapes, so plans
//! are shared behind `Arc` and evicted least-recently-used once the cache
//! exceeds its capacity. The cache is internally synchronized and can be
//! shared across threads.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::EinsumError;
use crate::optimizer::ContractionPath;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PathKey {
    expr: String,
    shapes: Vec<Vec<usize>>,
}

#[derive(Debug)]
struct Entry {
    path: Arc<ContractionPath>,
    last_used: u64,
}

#[derive(Debug, Default)]
struct Inner {
    map: HashMap<PathKey, Entry>,
    clock: u64,
}

/// LRU cache keyed by `(expression, operand shapes)`.
#[derive(Debug)]
pub struct PathCache {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl PathCache {
    /// Create a cache holding at most `capacity` plans. A capacity of zero
    /// disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            capacity,
        }
    }

    /// Number of cached plans.
    pub fn len(&self) -> usize {
        self.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all cached plans.
    pub fn clear(&self) {
        self.lock().map.clear();
    }

    /// Look up the plan for `(expr, shapes)`, computing and inserting it on
    /// a miss.
    pub fn get_or_compute<F>(
        &self,
        expr: &str,
        shapes: &[Vec<usize>],
        compute: F,
    ) -> Result<Arc<ContractionPath>, EinsumError>
    where
        F: FnOnce() -> Result<ContractionPath, EinsumError>,
    {
        if self.capacity == 0 {
            return Ok(Arc::new(compute()?));
        }
        let key = PathKey {
            expr: expr.to_string(),
            shapes: shapes.to_vec(),
        };
        {
            let mut inner = self.lock();
            inner.clock += 1;
            let clock = inner.clock;
            if let Some(entry) = inner.map.get_mut(&key) {
                entry.last_used = clock;
                log::trace!("path cache hit for {expr}");
                return Ok(Arc::clone(&entry.path));
            }
        }

        // Computed outside the lock; a racing thread may insert the same
        // plan, which is harmless.
        let path = Arc::new(compute()?);
        let mut inner = self.lock();
        inner.clock += 1;
        let clock = inner.clock;
        inner.map.insert(
            key,
            Entry {
                path: Arc::clone(&path),
                last_used: clock,
            },
        );
        while inner.map.len() > self.capacity {
            let oldest = inner
                .map
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => {
                    inner.map.remove(&k);
                }
                None => break,
            }
        }
        Ok(path)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for PathCache {
    /// A cache sized for typical sweep workloads.
    fn default() -> Self {
        Self::new(128)
    }
}
