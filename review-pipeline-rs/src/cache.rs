//! # Analysis Cache
//!
//! Content-addressed cache of analysis results keyed by path and a SHA-256
//! fingerprint of the file content. A key is computed at most once at a time:
//! callers that arrive while a computation is in flight await the same
//! shared future. Successful results are kept until the cache is cleared.
//! A failed or panicking computation is handed to every caller awaiting it
//! and then evicted, so a later request computes again.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use error_handling::ClassifiedError;
use futures::future::{BoxFuture, FutureExt, Shared};
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, error};

use crate::processor::panic_message;

/// Identity of one analysis: the file and the exact content analysed
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    path: PathBuf,
    fingerprint: String,
}

impl CacheKey {
    pub fn new<P: Into<PathBuf>, S: Into<String>>(path: P, fingerprint: S) -> Self {
        Self {
            path: path.into(),
            fingerprint: fingerprint.into(),
        }
    }

    /// Key for `path` holding `content`
    pub fn from_content<P: Into<PathBuf>>(path: P, content: &str) -> Self {
        Self::new(path, fingerprint(content))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.fingerprint.get(..12).unwrap_or(&self.fingerprint);
        write!(f, "{}@{}", self.path.display(), short)
    }
}

/// Lower-case hex SHA-256 of `content`
pub fn fingerprint(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{:02x}", byte))
        .collect()
}

/// How a cached lookup was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheSource {
    /// This caller ran the computation
    Computed,
    /// This caller joined a computation already in flight
    Joined,
    /// A stored result was returned
    Cached,
}

impl CacheSource {
    pub fn is_hit(self) -> bool {
        !matches!(self, CacheSource::Computed)
    }
}

/// Counters exposed for observability
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub in_flight: u64,
    pub entries: u64,
}

type SharedComputation<T> = Shared<BoxFuture<'static, Result<T, ClassifiedError>>>;

enum Slot<T> {
    Pending(SharedComputation<T>),
    Ready { value: T, inserted_at: DateTime<Utc> },
}

/// Single-flight, content-addressed result cache
pub struct AnalysisCache<T> {
    entries: Mutex<HashMap<CacheKey, Slot<T>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<T> Default for AnalysisCache<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }
}

impl<T> fmt::Debug for AnalysisCache<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisCache").field("stats", &self.stats()).finish()
    }
}

impl<T> AnalysisCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, Slot<T>>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.lock();
        let in_flight = entries
            .values()
            .filter(|slot| matches!(slot, Slot::Pending(_)))
            .count() as u64;

        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            in_flight,
            entries: entries.len() as u64 - in_flight,
        }
    }

    /// When the stored result for `key` was inserted, if one is stored
    pub fn inserted_at(&self, key: &CacheKey) -> Option<DateTime<Utc>> {
        match self.lock().get(key) {
            Some(Slot::Ready { inserted_at, .. }) => Some(*inserted_at),
            _ => None,
        }
    }

    /// Drops every stored result and resets the counters. Computations in
    /// flight still complete for their callers but are not stored.
    pub fn clear(&self) {
        self.lock().clear();
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        gauge!("pipeline.cache.entries", 0.0);
    }
}

impl<T> AnalysisCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Returns the result for `key`, running `compute` only if no result is
    /// stored and no computation is in flight.
    pub async fn get_or_compute<F, Fut>(&self, key: CacheKey, compute: F) -> Result<T, ClassifiedError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ClassifiedError>> + Send + 'static,
    {
        self.get_or_compute_with_source(key, compute)
            .await
            .map(|(value, _)| value)
    }

    /// Like [`get_or_compute`](Self::get_or_compute), also reporting whether
    /// the result was computed by this call.
    pub async fn get_or_compute_with_source<F, Fut>(
        &self,
        key: CacheKey,
        compute: F,
    ) -> Result<(T, CacheSource), ClassifiedError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ClassifiedError>> + Send + 'static,
    {
        let (computation, source) = {
            let mut entries = self.lock();
            match entries.get(&key) {
                Some(Slot::Ready { value, .. }) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    counter!("pipeline.cache.hits", 1);
                    debug!(key = %key, "Analysis cache hit");
                    return Ok((value.clone(), CacheSource::Cached));
                }
                Some(Slot::Pending(shared)) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    counter!("pipeline.cache.hits", 1);
                    debug!(key = %key, "Joining in-flight analysis");
                    (shared.clone(), CacheSource::Joined)
                }
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    counter!("pipeline.cache.misses", 1);
                    let shared = settle_panics(key.clone(), compute()).boxed().shared();
                    entries.insert(key.clone(), Slot::Pending(shared.clone()));
                    (shared, CacheSource::Computed)
                }
            }
        };

        let outcome = computation.clone().await;

        // Whichever caller finishes first settles the slot, provided it still
        // holds this computation.
        {
            let mut entries = self.lock();
            let settles = matches!(
                entries.get(&key),
                Some(Slot::Pending(pending)) if pending.ptr_eq(&computation)
            );
            if settles {
                match &outcome {
                    Ok(value) => {
                        entries.insert(
                            key.clone(),
                            Slot::Ready {
                                value: value.clone(),
                                inserted_at: Utc::now(),
                            },
                        );
                    }
                    Err(error) => {
                        entries.remove(&key);
                        debug!(key = %key, error = %error, "Evicted failed analysis");
                    }
                }
                gauge!("pipeline.cache.entries", entries.len() as f64);
            }
        }

        outcome.map(|value| (value, source))
    }
}

/// Turns a panic inside `computation` into an ordinary failure, so the
/// shared future always completes and its slot can be settled.
async fn settle_panics<T, Fut>(key: CacheKey, computation: Fut) -> Result<T, ClassifiedError>
where
    Fut: Future<Output = Result<T, ClassifiedError>>,
{
    match AssertUnwindSafe(computation).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(payload) => {
            let message = panic_message(&*payload);
            error!(key = %key, panic = %message, "Analysis panicked");
            Err(ClassifiedError::unknown(format!("analysis of {} panicked: {}", key.path().display(), message)))
        }
    }
}
