//! Single-flight metadata cache.
//!
//! Entity schemas are fetched lazily, the first time a service is
//! inspected, and memoized per service id. Each key is in one of two
//! states:
//!
//! - `Ready`: the parsed schema, returned without touching upstream;
//! - `Pending`: a shared future for an in-flight fetch. Every concurrent
//!   caller awaits the same future, so one key is fetched once no matter
//!   how many requests race for it.
//!
//! The fetch itself runs in a spawned task. A caller that gives up does
//! not cancel it; the result still lands in the cache for the next caller.
//! Failures are never cached: the slot is cleared and the next `get`
//! starts a fresh fetch.

use futures::future::{BoxFuture, FutureExt, Shared};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::DiscoveryError;
use crate::models::{CatalogEntry, EntitySchema};
use crate::upstream::SchemaProvider;

pub type SchemaList = Arc<Vec<EntitySchema>>;

type SchemaFuture = Shared<BoxFuture<'static, Result<SchemaList, DiscoveryError>>>;

enum Slot {
    Ready(SchemaList),
    /// In-flight fetch tagged with a generation, so a fetch that was
    /// invalidated mid-flight cannot overwrite a newer slot.
    Pending(u64, SchemaFuture),
}

#[derive(Default)]
struct Slots {
    map: HashMap<String, Slot>,
    next_generation: u64,
}

pub struct MetadataCache {
    provider: Arc<dyn SchemaProvider>,
    slots: Arc<Mutex<Slots>>,
}

fn lock(slots: &Mutex<Slots>) -> MutexGuard<'_, Slots> {
    match slots.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl MetadataCache {
    pub fn new(provider: Arc<dyn SchemaProvider>) -> Self {
        Self {
            provider,
            slots: Arc::new(Mutex::new(Slots::default())),
        }
    }

    /// Schema for `entry`, fetching it at most once across concurrent callers.
    pub async fn get(&self, entry: &CatalogEntry) -> Result<SchemaList, DiscoveryError> {
        let pending = {
            let mut slots = lock(&self.slots);
            match slots.map.get(&entry.id) {
                Some(Slot::Ready(schemas)) => return Ok(schemas.clone()),
                Some(Slot::Pending(_, future)) => future.clone(),
                None => {
                    let generation = slots.next_generation;
                    slots.next_generation += 1;
                    let future = self.spawn_fetch(entry.clone(), generation);
                    slots
                        .map
                        .insert(entry.id.clone(), Slot::Pending(generation, future.clone()));
                    future
                }
            }
        };
        pending.await
    }

    fn spawn_fetch(&self, entry: CatalogEntry, generation: u64) -> SchemaFuture {
        let provider = self.provider.clone();
        let slots = self.slots.clone();
        let service_id = entry.id.clone();

        let task = tokio::spawn({
            let slots = slots.clone();
            async move {
                tracing::debug!(service_id = %entry.id, "fetching schema");
                let result = provider
                    .fetch_schema(&entry)
                    .await
                    .map(Arc::new)
                    .map_err(|e| DiscoveryError::upstream("schema", &entry.id, format!("{:#}", e)));

                let mut guard = lock(&slots);
                let current = matches!(
                    guard.map.get(&entry.id),
                    Some(Slot::Pending(g, _)) if *g == generation
                );
                if current {
                    match &result {
                        Ok(schemas) => {
                            tracing::info!(
                                service_id = %entry.id,
                                entities = schemas.len(),
                                "schema cached"
                            );
                            guard.map.insert(entry.id.clone(), Slot::Ready(schemas.clone()));
                        }
                        Err(e) => {
                            tracing::warn!(service_id = %entry.id, error = %e, "schema fetch failed");
                            guard.map.remove(&entry.id);
                        }
                    }
                }
                result
            }
        });

        async move {
            match task.await {
                Ok(result) => result,
                Err(join_error) => {
                    let mut guard = lock(&slots);
                    if matches!(
                        guard.map.get(&service_id),
                        Some(Slot::Pending(g, _)) if *g == generation
                    ) {
                        guard.map.remove(&service_id);
                    }
                    Err(DiscoveryError::upstream(
                        "schema",
                        &service_id,
                        format!("fetch task failed: {}", join_error),
                    ))
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Cached schema without fetching.
    pub fn peek(&self, service_id: &str) -> Option<SchemaList> {
        match lock(&self.slots).map.get(service_id) {
            Some(Slot::Ready(schemas)) => Some(schemas.clone()),
            _ => None,
        }
    }

    /// Drop the entry for `service_id`. Returns whether anything was removed.
    pub fn invalidate(&self, service_id: &str) -> bool {
        lock(&self.slots).map.remove(service_id).is_some()
    }

    /// Number of ready entries.
    pub fn len(&self) -> usize {
        lock(&self.slots)
            .map
            .values()
            .filter(|s| matches!(s, Slot::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fetch schemas for many services with bounded concurrency.
    /// Returns the number fetched successfully; failures are logged.
    pub async fn prefetch(&self, entries: &[CatalogEntry], concurrency: usize) -> usize {
        let results: Vec<bool> = stream::iter(entries)
            .map(|entry| async move {
                match self.get(entry).await {
                    Ok(_) => true,
                    Err(e) => {
                        tracing::warn!(service_id = %entry.id, error = %e, "prefetch failed");
                        false
                    }
                }
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;
        results.into_iter().filter(|ok| *ok).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct SlowProvider {
        calls: AtomicUsize,
        fail_first: bool,
    }

    #[async_trait]
    impl SchemaProvider for SlowProvider {
        async fn fetch_schema(&self, entry: &CatalogEntry) -> Result<Vec<EntitySchema>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail_first && n == 0 {
                anyhow::bail!("gateway timeout");
            }
            Ok(vec![EntitySchema {
                entity_name: format!("{}Entity", entry.id),
                entity_set: "Set".to_string(),
                keys: vec!["Id".to_string()],
                properties: vec![],
                capabilities: Default::default(),
            }])
        }
    }

    fn entry(id: &str) -> CatalogEntry {
        CatalogEntry {
            id: id.to_string(),
            title: id.to_string(),
            description: String::new(),
            service_url: format!("https://gw/{}", id),
            metadata_url: String::new(),
            technical_name: None,
            version: None,
        }
    }

    fn cache(fail_first: bool) -> (MetadataCache, Arc<SlowProvider>) {
        let provider = Arc::new(SlowProvider {
            calls: AtomicUsize::new(0),
            fail_first,
        });
        (MetadataCache::new(provider.clone()), provider)
    }

    #[tokio::test]
    async fn test_concurrent_gets_fetch_once() {
        let (cache, provider) = cache(false);
        let e = entry("S1");
        let (a, b, c) = tokio::join!(cache.get(&e), cache.get(&e), cache.get(&e));
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        cache.get(&e).await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert!(cache.peek("S1").is_some());
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let (cache, provider) = cache(true);
        let e = entry("S1");
        match cache.get(&e).await {
            Err(DiscoveryError::Upstream { provider, key, .. }) => {
                assert_eq!(provider, "schema");
                assert_eq!(key, "S1");
            }
            other => panic!("expected upstream error, got {:?}", other.map(|_| ())),
        }
        assert!(cache.peek("S1").is_none());
        assert!(cache.get(&e).await.is_ok());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let (cache, provider) = cache(false);
        let e = entry("S1");
        cache.get(&e).await.unwrap();
        assert!(cache.invalidate("S1"));
        assert!(!cache.invalidate("S1"));
        cache.get(&e).await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_abandoned_caller_still_populates() {
        let (cache, provider) = cache(false);
        let e = entry("S1");
        let _ = tokio::time::timeout(Duration::from_millis(1), cache.get(&e)).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(cache.peek("S1").is_some());
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_prefetch_counts_successes() {
        let (cache, _) = cache(false);
        let entries = vec![entry("A"), entry("B"), entry("C")];
        assert_eq!(cache.prefetch(&entries, 2).await, 3);
        assert_eq!(cache.len(), 3);
    }
}
