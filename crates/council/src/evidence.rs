//! Evidence retrieval with a fingerprint-keyed, single-flight cache.
//!
//! Agents are never allowed to answer ungrounded: a failed or empty
//! retrieval is a hard error for the whole deliberation. Concurrent
//! requests for the same query fingerprint share one store fetch and
//! observe the same [`EvidenceBundle`] instance.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

use crate::error::{CouncilResult, DeliberationError};
use crate::types::{EvidenceBundle, EvidenceItem, Query, SharedEvidence};

/// Error from the external knowledge store.
#[derive(Debug, thiserror::Error)]
#[error("knowledge store error: {0}")]
pub struct KnowledgeStoreError(pub String);

/// Read-only boundary to the external knowledge store. Access control is
/// enforced upstream of this crate.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Fetch ranked evidence passages for a query.
    async fn fetch(&self, query: &Query) -> Result<Vec<EvidenceItem>, KnowledgeStoreError>;
}

/// Canonical form of query text used for fingerprinting and for the
/// exact-match similarity fallback: trimmed, lowercased, inner whitespace
/// collapsed.
pub(crate) fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Fingerprint of the normalized query text.
pub fn fingerprint(text: &str) -> String {
    blake3::hash(normalize(text).as_bytes()).to_hex().to_string()
}

type Slot = Arc<OnceCell<SharedEvidence>>;

/// Evidence retriever with TTL memoization.
///
/// The cache maps query fingerprints to single-flight slots: the map lock
/// is held only to look up or replace a slot, never across the store
/// fetch, and [`OnceCell::get_or_try_init`] guarantees at most one fetch
/// per slot even under concurrent demand.
pub struct EvidenceRetriever {
    store: Arc<dyn KnowledgeStore>,
    ttl: Duration,
    slots: Mutex<HashMap<String, Slot>>,
}

impl EvidenceRetriever {
    /// Create a retriever over a knowledge store with the given TTL.
    pub fn new(store: Arc<dyn KnowledgeStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Retrieve the evidence bundle for a query, reusing a cached bundle
    /// when one exists under the fingerprint and has not expired.
    pub async fn retrieve(&self, query: &Query) -> CouncilResult<SharedEvidence> {
        let fp = fingerprint(&query.text);

        let slot = {
            let mut slots = self.slots.lock().await;
            let entry = slots.entry(fp.clone()).or_default();
            if let Some(bundle) = entry.get() {
                if !bundle.is_expired() {
                    debug!(fingerprint = %fp, items = bundle.items.len(), "evidence cache hit");
                    return Ok(Arc::clone(bundle));
                }
            }
            if entry.get().is_some_and(|b| b.is_expired()) {
                *entry = Arc::new(OnceCell::new());
            }
            Arc::clone(entry)
        };

        let bundle = slot
            .get_or_try_init(|| self.fetch_fresh(query, &fp))
            .await?;
        Ok(Arc::clone(bundle))
    }

    async fn fetch_fresh(&self, query: &Query, fp: &str) -> CouncilResult<SharedEvidence> {
        let items = self.store.fetch(query).await.map_err(|e| {
            DeliberationError::EvidenceRetrieval {
                reason: e.to_string(),
            }
        })?;

        if items.is_empty() {
            return Err(DeliberationError::EvidenceRetrieval {
                reason: "knowledge store returned no evidence".into(),
            });
        }

        info!(
            fingerprint = %fp,
            items = items.len(),
            ttl_secs = self.ttl.as_secs(),
            "evidence retrieved"
        );

        Ok(Arc::new(EvidenceBundle {
            fingerprint: fp.to_string(),
            items,
            retrieved_at: chrono::Utc::now(),
            ttl: self.ttl,
        }))
    }

    /// Number of cache slots currently held (populated or in flight).
    pub async fn cached_len(&self) -> usize {
        self.slots.lock().await.len()
    }

    /// Drop expired entries.
    pub async fn purge_expired(&self) {
        let mut slots = self.slots.lock().await;
        slots.retain(|_, slot| match slot.get() {
            Some(bundle) => !bundle.is_expired(),
            None => true,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingStore {
        fetches: AtomicUsize,
        items: Vec<EvidenceItem>,
    }

    impl CountingStore {
        fn with_items(items: Vec<EvidenceItem>) -> Self {
            Self {
                fetches: AtomicUsize::new(0),
                items,
            }
        }

        fn one() -> Self {
            Self::with_items(vec![EvidenceItem {
                source_id: "kb:1".into(),
                excerpt: "excerpt".into(),
                relevance: 0.9,
            }])
        }
    }

    #[async_trait]
    impl KnowledgeStore for CountingStore {
        async fn fetch(&self, _query: &Query) -> Result<Vec<EvidenceItem>, KnowledgeStoreError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.items.clone())
        }
    }

    struct FailingStore;

    #[async_trait]
    impl KnowledgeStore for FailingStore {
        async fn fetch(&self, _query: &Query) -> Result<Vec<EvidenceItem>, KnowledgeStoreError> {
            Err(KnowledgeStoreError("store unreachable".into()))
        }
    }

    #[test]
    fn test_fingerprint_normalizes() {
        assert_eq!(
            fingerprint("  What is   X? "),
            fingerprint("what is x?")
        );
        assert_ne!(fingerprint("what is x?"), fingerprint("what is y?"));
    }

    #[tokio::test]
    async fn test_cache_hit_skips_store() {
        let store = Arc::new(CountingStore::one());
        let retriever = EvidenceRetriever::new(store.clone(), Duration::from_secs(300));

        let q = Query::new("what is x?", "test");
        let first = retriever.retrieve(&q).await.unwrap();
        let second = retriever.retrieve(&q).await.unwrap();

        assert_eq!(store.fetches.load(Ordering::SeqCst), 1);
        // Same instance, not an equal copy.
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_concurrent_requests_single_flight() {
        let store = Arc::new(CountingStore::one());
        let retriever = Arc::new(EvidenceRetriever::new(
            store.clone(),
            Duration::from_secs(300),
        ));

        let q = Query::new("what is x?", "test");
        let mut handles = Vec::new();
        for _ in 0..8 {
            let retriever = Arc::clone(&retriever);
            let q = q.clone();
            handles.push(tokio::spawn(async move {
                retriever.retrieve(&q).await.unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_entry_refetched() {
        let store = Arc::new(CountingStore::one());
        let retriever = EvidenceRetriever::new(store.clone(), Duration::ZERO);

        let q = Query::new("what is x?", "test");
        retriever.retrieve(&q).await.unwrap();
        retriever.retrieve(&q).await.unwrap();

        assert_eq!(store.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_store_failure_is_hard_error() {
        let retriever =
            EvidenceRetriever::new(Arc::new(FailingStore), Duration::from_secs(300));
        let err = retriever
            .retrieve(&Query::new("q", "test"))
            .await
            .unwrap_err();
        assert!(matches!(err, DeliberationError::EvidenceRetrieval { .. }));
    }

    #[tokio::test]
    async fn test_empty_result_is_hard_error() {
        let retriever = EvidenceRetriever::new(
            Arc::new(CountingStore::with_items(vec![])),
            Duration::from_secs(300),
        );
        let err = retriever
            .retrieve(&Query::new("q", "test"))
            .await
            .unwrap_err();
        assert!(matches!(err, DeliberationError::EvidenceRetrieval { .. }));
    }

    #[tokio::test]
    async fn test_failure_does_not_poison_slot() {
        // A failed fetch leaves the slot empty so the next call retries.
        struct FlakyStore {
            fetches: AtomicUsize,
        }

        #[async_trait]
        impl KnowledgeStore for FlakyStore {
            async fn fetch(
                &self,
                _query: &Query,
            ) -> Result<Vec<EvidenceItem>, KnowledgeStoreError> {
                if self.fetches.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(KnowledgeStoreError("transient".into()))
                } else {
                    Ok(vec![EvidenceItem {
                        source_id: "kb:1".into(),
                        excerpt: "e".into(),
                        relevance: 1.0,
                    }])
                }
            }
        }

        let retriever = EvidenceRetriever::new(
            Arc::new(FlakyStore {
                fetches: AtomicUsize::new(0),
            }),
            Duration::from_secs(300),
        );
        let q = Query::new("q", "test");
        assert!(retriever.retrieve(&q).await.is_err());
        assert!(retriever.retrieve(&q).await.is_ok());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = Arc::new(CountingStore::one());
        let retriever = EvidenceRetriever::new(store, Duration::ZERO);
        retriever.retrieve(&Query::new("q", "test")).await.unwrap();
        assert_eq!(retriever.cached_len().await, 1);
        retriever.purge_expired().await;
        assert_eq!(retriever.cached_len().await, 0);
    }
}
