//! In-memory cache of model handles with inactivity-based eviction.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use ml_common::ModelType;

use super::{InferenceModel, ModelFactory, ModelOptions};
use crate::error::Result;

/// Source of the current time, replaceable in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Clock backed by `Instant::now`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    model_name: String,
    model_type: ModelType,
    /// Options serialized with sorted keys.
    options: String,
}

struct CacheEntry {
    model: Arc<dyn InferenceModel>,
    last_used: Instant,
}

/// Cache of model handles keyed by (name, type, options).
///
/// Handles are created through the factory on first access. When a TTL is
/// set, entries idle for longer than the TTL are dropped the next time the
/// cache is accessed; a dropped handle unloads once its last user finishes.
pub struct ModelCache {
    factory: Arc<dyn ModelFactory>,
    ttl: Option<Duration>,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl ModelCache {
    pub fn new(factory: Arc<dyn ModelFactory>, ttl: Option<Duration>, clock: Arc<dyn Clock>) -> Self {
        Self {
            factory,
            ttl,
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Get the handle for a model, creating it if absent or expired.
    pub fn get(
        &self,
        model_name: &str,
        model_type: ModelType,
        options: &ModelOptions,
    ) -> Result<Arc<dyn InferenceModel>> {
        let key = CacheKey {
            model_name: model_name.to_string(),
            model_type,
            options: serde_json::to_string(options).unwrap_or_default(),
        };

        let now = self.clock.now();
        let mut entries = self.lock();
        self.evict_expired_locked(&mut entries, now);

        if let Some(entry) = entries.get_mut(&key) {
            entry.last_used = now;
            return Ok(entry.model.clone());
        }

        let model = self.factory.create(model_name, model_type, options)?;
        tracing::debug!("Cached new {} model handle '{}'", model_type, model_name);
        entries.insert(
            key,
            CacheEntry {
                model: model.clone(),
                last_used: now,
            },
        );
        Ok(model)
    }

    /// Drop every entry idle for longer than the TTL. Returns how many were dropped.
    pub fn evict_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.lock();
        self.evict_expired_locked(&mut entries, now)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn evict_expired_locked(&self, entries: &mut HashMap<CacheKey, CacheEntry>, now: Instant) -> usize {
        let Some(ttl) = self.ttl else {
            return 0;
        };

        let before = entries.len();
        entries.retain(|key, entry| {
            let keep = now.saturating_duration_since(entry.last_used) <= ttl;
            if !keep {
                tracing::info!(
                    "Unloading {} model '{}' after {}s of inactivity",
                    key.model_type,
                    key.model_name,
                    ttl.as_secs()
                );
            }
            keep
        });
        before - entries.len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
