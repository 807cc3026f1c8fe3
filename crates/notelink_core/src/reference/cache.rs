//! Per-session reference lookup cache.
//!
//! # Responsibility
//! - Memoize code -> resolution outcomes (hits and misses) for one session.
//! - Fan out lookups for a batch of codes concurrently.
//!
//! # Invariants
//! - Negative entries live for the whole session; a code that never resolved
//!   is not re-queried until a fresh cache is built.
//! - A failed store call is never memoized: the code counts as not found for
//!   the current batch only.
//! - Positive entries expire only when a TTL is configured.

use crate::model::ref_code::RefCode;
use crate::model::reference::ResolvedReference;
use crate::store::{Collection, EntityStore, StoreResult};
use futures::future::join_all;
use log::debug;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Outcome of resolving one code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Found(ResolvedReference),
    NotFound,
}

impl Resolution {
    pub fn found(&self) -> Option<&ResolvedReference> {
        match self {
            Self::Found(reference) => Some(reference),
            Self::NotFound => None,
        }
    }
}

#[derive(Debug, Clone)]
enum CacheEntry {
    Found {
        reference: ResolvedReference,
        cached_at: Instant,
    },
    Missing,
}

/// Lazily populated code -> outcome map over an entity store.
pub struct ReferenceCache<S: EntityStore> {
    store: Arc<S>,
    entries: Mutex<HashMap<RefCode, CacheEntry>>,
    positive_ttl: Option<Duration>,
    lookups: AtomicU64,
}

impl<S: EntityStore> ReferenceCache<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_positive_ttl(store, None)
    }

    pub fn with_positive_ttl(store: Arc<S>, positive_ttl: Option<Duration>) -> Self {
        Self {
            store,
            entries: Mutex::new(HashMap::new()),
            positive_ttl,
            lookups: AtomicU64::new(0),
        }
    }

    /// Cached outcome, if any and not expired. Never touches the store.
    pub fn cached(&self, code: &RefCode) -> Option<Resolution> {
        let entries = self.entries.lock();
        match entries.get(code)? {
            CacheEntry::Missing => Some(Resolution::NotFound),
            CacheEntry::Found {
                reference,
                cached_at,
            } => match self.positive_ttl {
                Some(ttl) if cached_at.elapsed() >= ttl => None,
                _ => Some(Resolution::Found(reference.clone())),
            },
        }
    }

    /// Last "found" outcome for `code`, expired or not.
    ///
    /// Applying a settled batch reads through this; found entries are never
    /// re-verified at apply time.
    pub fn last_found(&self, code: &RefCode) -> Option<ResolvedReference> {
        match self.entries.lock().get(code)? {
            CacheEntry::Found { reference, .. } => Some(reference.clone()),
            CacheEntry::Missing => None,
        }
    }

    /// Whether `code` has a live entry (hit or miss).
    pub fn is_known(&self, code: &RefCode) -> bool {
        self.cached(code).is_some()
    }

    /// Resolves one code, consulting the store only on a cache miss.
    pub async fn resolve(&self, code: &RefCode) -> Resolution {
        if let Some(resolution) = self.cached(code) {
            return resolution;
        }

        self.lookups.fetch_add(1, Ordering::Relaxed);
        match self.lookup(code).await {
            Ok(resolution) => {
                let entry = match &resolution {
                    Resolution::Found(reference) => CacheEntry::Found {
                        reference: reference.clone(),
                        cached_at: Instant::now(),
                    },
                    Resolution::NotFound => CacheEntry::Missing,
                };
                self.entries.lock().insert(code.clone(), entry);
                resolution
            }
            Err(err) => {
                debug!(
                    "event=ref_lookup module=reference status=degraded code={code} error={err}"
                );
                Resolution::NotFound
            }
        }
    }

    /// Resolves every code concurrently; output order follows `codes`.
    pub async fn resolve_batch(&self, codes: &[RefCode]) -> Vec<(RefCode, Resolution)> {
        let outcomes = join_all(codes.iter().map(|code| self.resolve(code))).await;
        codes.iter().cloned().zip(outcomes).collect()
    }

    /// Store lookups issued so far (cache misses).
    pub fn lookups_issued(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    async fn lookup(&self, code: &RefCode) -> StoreResult<Resolution> {
        if let Some(note) = self.store.find_note_by_ref_code(code).await? {
            return Ok(Resolution::Found(ResolvedReference::from_note(&note)));
        }
        if let Some(task) = self.store.find_task_by_ref_code(code).await? {
            return Ok(Resolution::Found(ResolvedReference::from_task(&task)));
        }
        debug!(
            "event=ref_lookup module=reference status=miss code={code} searched={},{}",
            Collection::Notes.as_str(),
            Collection::Tasks.as_str()
        );
        Ok(Resolution::NotFound)
    }
}
