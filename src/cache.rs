// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Memoized model detail lookups.
//!
//! `/api/show` responses are immutable for a given model tag, so they are
//! cached for the life of the client. There is no TTL or eviction beyond an
//! explicit [`DetailCache::clear`]; a local model catalog is small enough
//! that unbounded growth is an accepted trade-off.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use crate::error::ApiError;
use crate::types::ModelDetail;

/// Cache of `/api/show` responses keyed by model name.
#[derive(Debug, Default)]
pub struct DetailCache {
    entries: Mutex<HashMap<String, Arc<ModelDetail>>>,
}

impl DetailCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a cached detail without fetching.
    pub fn get(&self, model: &str) -> Option<Arc<ModelDetail>> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(model).cloned()
    }

    /// Return the cached detail, or run `fetch` and cache its result.
    ///
    /// A failed fetch is logged and yields `None` without caching, so the
    /// next call retries. Callers treat absence as "unknown".
    ///
    /// Concurrent misses for the same key are not deduplicated: each may
    /// issue its own fetch and the last insert wins. `/api/show` payloads
    /// are immutable per tag, so duplicate fetches waste a request but
    /// never produce inconsistent entries.
    pub async fn get_or_fetch<F, Fut>(&self, model: &str, fetch: F) -> Option<Arc<ModelDetail>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ModelDetail, ApiError>>,
    {
        if let Some(detail) = self.get(model) {
            return Some(detail);
        }
        match fetch().await {
            Ok(detail) => {
                let detail = Arc::new(detail);
                let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
                entries.insert(model.to_string(), Arc::clone(&detail));
                Some(detail)
            }
            Err(e) => {
                tracing::debug!("model detail fetch for '{}' failed: {}", model, e);
                None
            }
        }
    }

    /// Drop every cached entry.
    pub fn clear(&self) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.clear();
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn detail(params: &str) -> ModelDetail {
        ModelDetail {
            parameters: Some(params.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_second_get_hits_cache() {
        let cache = DetailCache::new();
        let fetches = AtomicUsize::new(0);

        let first = cache
            .get_or_fetch("llama3", || async {
                fetches.fetch_add(1, Ordering::SeqCst);
                Ok(detail("8b"))
            })
            .await
            .unwrap();
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        let second = cache
            .get_or_fetch("llama3", || async {
                fetches.fetch_add(1, Ordering::SeqCst);
                Ok(detail("8b"))
            })
            .await
            .unwrap();
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_clear_forces_refetch() {
        let cache = DetailCache::new();
        let fetches = AtomicUsize::new(0);

        for _ in 0..2 {
            cache
                .get_or_fetch("llama3", || async {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    Ok(detail("8b"))
                })
                .await;
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        cache.clear();
        assert!(cache.is_empty());

        cache
            .get_or_fetch("llama3", || async {
                fetches.fetch_add(1, Ordering::SeqCst);
                Ok(detail("8b"))
            })
            .await;
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_fetch_not_cached() {
        let cache = DetailCache::new();

        let miss = cache
            .get_or_fetch("ghost", || async {
                Err(ApiError::Transport("refused".to_string()))
            })
            .await;
        assert!(miss.is_none());
        assert!(cache.is_empty());

        // Next call retries and may succeed.
        let hit = cache
            .get_or_fetch("ghost", || async { Ok(detail("1b")) })
            .await;
        assert!(hit.is_some());
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_misses_leave_one_consistent_entry() {
        let cache = Arc::new(DetailCache::new());
        let fetches = Arc::new(AtomicUsize::new(0));

        let lookup = |cache: Arc<DetailCache>, fetches: Arc<AtomicUsize>| {
            tokio::spawn(async move {
                cache
                    .get_or_fetch("llama3", || async move {
                        fetches.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        Ok(detail("8b"))
                    })
                    .await
            })
        };
        let a = lookup(Arc::clone(&cache), Arc::clone(&fetches));
        let b = lookup(Arc::clone(&cache), Arc::clone(&fetches));
        let (a, b) = (a.await.unwrap(), b.await.unwrap());

        // Overlapping misses may each fetch; the cache still converges on
        // exactly one entry and both callers get a value.
        assert!(a.is_some() && b.is_some());
        assert!(fetches.load(Ordering::SeqCst) <= 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("llama3").unwrap().parameters.as_deref(), Some("8b"));
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let cache = DetailCache::new();
        cache
            .get_or_fetch("a", || async { Ok(detail("a")) })
            .await;
        cache
            .get_or_fetch("b", || async { Ok(detail("b")) })
            .await;
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a").unwrap().parameters.as_deref(), Some("a"));
        assert_eq!(cache.get("b").unwrap().parameters.as_deref(), Some("b"));
    }
}
