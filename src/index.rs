//! In-memory embedding index with snapshot support.
//!
//! The index maps document keys (`service_id` or `service_id::entity`) to
//! vectors. All entries live behind one `RwLock<Arc<IndexState>>`: readers
//! clone the `Arc` and score without holding the lock, writers build a new
//! state and swap it in. A reader during a rebuild sees either the old or
//! the new map, never a mix.
//!
//! # Snapshots
//!
//! [`EmbeddingIndex::snapshot`] captures the current entries together with
//! the model identity and a corpus signature. [`EmbeddingIndex::restore`]
//! accepts a snapshot only if the model id and version match and the corpus
//! has drifted by no more than the configured threshold:
//!
//! ```text
//! drift = |changed ∪ added ∪ removed services| / max(|old corpus|, |new corpus|)
//! ```
//!
//! After an accepted restore, [`EmbeddingIndex::index_documents`] reuses
//! every entry whose text is unchanged and only embeds the rest.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use crate::cache::MetadataCache;
use crate::classify::Classifier;
use crate::document::{collect_documents, DocumentMetadata, EmbeddingDocument};
use crate::models::ServiceCatalog;
use crate::embedding::{cosine_similarity, EmbeddingProvider};

/// A stored, embedded document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub service_id: String,
    pub entity: Option<String>,
    pub text: String,
    pub vector: Vec<f32>,
    pub metadata: DocumentMetadata,
}

/// Durable image of the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexSnapshot {
    pub model_id: String,
    pub model_version: String,
    pub corpus_signature: String,
    /// Unix seconds.
    pub created_at: i64,
    /// Service id → number of entity documents.
    pub corpus: BTreeMap<String, usize>,
    pub entries: BTreeMap<String, IndexEntry>,
}

/// Counts from one indexing pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IndexReport {
    pub indexed: usize,
    pub skipped: usize,
    pub reused: usize,
}

/// Result of trying to restore a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum RestoreOutcome {
    /// Signature matched exactly.
    Hit { entries: usize },
    /// Signature differed within the drift threshold.
    Accepted { entries: usize, drift: f64 },
    /// Snapshot rejected; a full rebuild is needed.
    Miss { reason: String },
}

impl RestoreOutcome {
    pub fn is_usable(&self) -> bool {
        !matches!(self, RestoreOutcome::Miss { .. })
    }
}

/// One service-level semantic hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticHit {
    pub service_id: String,
    pub score: f64,
    /// Entity whose document scored best, if not the service document.
    pub entity: Option<String>,
}

#[derive(Debug, Default)]
struct IndexState {
    entries: HashMap<String, IndexEntry>,
    corpus: BTreeMap<String, usize>,
}

pub struct EmbeddingIndex {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    drift_threshold: f64,
    state: RwLock<Arc<IndexState>>,
}

impl EmbeddingIndex {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, batch_size: usize, drift_threshold: f64) -> Self {
        Self {
            provider,
            batch_size: batch_size.max(1),
            drift_threshold,
            state: RwLock::new(Arc::new(IndexState::default())),
        }
    }

    pub fn provider(&self) -> &Arc<dyn EmbeddingProvider> {
        &self.provider
    }

    fn current(&self) -> Arc<IndexState> {
        match self.state.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn swap(&self, next: IndexState) {
        let next = Arc::new(next);
        match self.state.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.current().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether semantic queries can be answered.
    pub fn is_ready(&self) -> bool {
        self.provider.is_enabled() && !self.is_empty()
    }

    /// Embed one text, checking the dimensionality.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let vector = self.provider.embed(text).await?;
        self.check_dims(&vector)?;
        Ok(vector)
    }

    fn check_dims(&self, vector: &[f32]) -> Result<()> {
        let expected = self.provider.dims();
        if expected > 0 && vector.len() != expected {
            bail!(
                "embedding has {} dimensions, expected {}",
                vector.len(),
                expected
            );
        }
        Ok(())
    }

    /// Build documents for the whole catalog and index them.
    pub async fn index_all(
        &self,
        catalog: &ServiceCatalog,
        classifier: &Classifier,
        cache: &MetadataCache,
        max_entity_properties: usize,
    ) -> IndexReport {
        let documents = collect_documents(catalog, classifier, cache, max_entity_properties);
        self.index_documents(documents).await
    }

    /// Replace the index with `documents`.
    ///
    /// Entries whose key and text are unchanged are reused. The rest are
    /// embedded in batches; a failing batch is retried one document at a
    /// time and documents that still fail are skipped.
    pub async fn index_documents(&self, documents: Vec<EmbeddingDocument>) -> IndexReport {
        let previous = self.current();
        let mut report = IndexReport::default();
        let mut entries: HashMap<String, IndexEntry> = HashMap::with_capacity(documents.len());
        let corpus = corpus_of(&documents);

        let mut pending = Vec::new();
        for doc in documents {
            match previous.entries.get(&doc.key) {
                Some(existing) if existing.text == doc.text && self.check_dims(&existing.vector).is_ok() => {
                    entries.insert(doc.key, existing.clone());
                    report.reused += 1;
                }
                _ => pending.push(doc),
            }
        }

        if !pending.is_empty() && !self.provider.is_enabled() {
            tracing::debug!(pending = pending.len(), "embedding provider disabled; documents not indexed");
            report.skipped += pending.len();
            pending.clear();
        }

        for batch in pending.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|d| d.text.clone()).collect();
            match self.provider.embed_texts(&texts).await {
                Ok(vectors) if vectors.len() == batch.len() => {
                    for (doc, vector) in batch.iter().zip(vectors) {
                        self.store(&mut entries, &mut report, doc, vector);
                    }
                }
                Ok(vectors) => {
                    tracing::warn!(
                        expected = batch.len(),
                        got = vectors.len(),
                        "embedding batch size mismatch; embedding individually"
                    );
                    self.embed_individually(batch, &mut entries, &mut report).await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, size = batch.len(), "embedding batch failed; embedding individually");
                    self.embed_individually(batch, &mut entries, &mut report).await;
                }
            }
        }

        tracing::info!(
            indexed = report.indexed,
            reused = report.reused,
            skipped = report.skipped,
            "embedding index updated"
        );
        self.swap(IndexState { entries, corpus });
        report
    }

    async fn embed_individually(
        &self,
        batch: &[EmbeddingDocument],
        entries: &mut HashMap<String, IndexEntry>,
        report: &mut IndexReport,
    ) {
        for doc in batch {
            match self.provider.embed(&doc.text).await {
                Ok(vector) => self.store(entries, report, doc, vector),
                Err(e) => {
                    tracing::warn!(key = %doc.key, error = %e, "skipping document");
                    report.skipped += 1;
                }
            }
        }
    }

    fn store(
        &self,
        entries: &mut HashMap<String, IndexEntry>,
        report: &mut IndexReport,
        doc: &EmbeddingDocument,
        vector: Vec<f32>,
    ) {
        if let Err(e) = self.check_dims(&vector) {
            tracing::warn!(key = %doc.key, error = %e, "rejecting vector");
            report.skipped += 1;
            return;
        }
        entries.insert(
            doc.key.clone(),
            IndexEntry {
                service_id: doc.service_id.clone(),
                entity: doc.entity.clone(),
                text: doc.text.clone(),
                vector,
                metadata: doc.metadata.clone(),
            },
        );
        report.indexed += 1;
    }

    /// Nearest services to `text`.
    ///
    /// Scores every entry whose service passes `filter`, keeps the best
    /// score per service, drops scores below `min_score`, and returns the
    /// top `k` by descending score.
    pub async fn query<F>(&self, text: &str, k: usize, min_score: f64, filter: F) -> Result<Vec<SemanticHit>>
    where
        F: Fn(&str) -> bool,
    {
        if !self.provider.is_enabled() {
            bail!("embedding provider is disabled");
        }
        let query = self.embed(text).await?;
        let state = self.current();

        let mut best: HashMap<&str, SemanticHit> = HashMap::new();
        for entry in state.entries.values() {
            if !filter(&entry.service_id) {
                continue;
            }
            let score = cosine_similarity(&query, &entry.vector) as f64;
            if score < min_score {
                continue;
            }
            let better = best
                .get(entry.service_id.as_str())
                .map(|hit| score > hit.score)
                .unwrap_or(true);
            if better {
                best.insert(
                    &entry.service_id,
                    SemanticHit {
                        service_id: entry.service_id.clone(),
                        score,
                        entity: entry.entity.clone(),
                    },
                );
            }
        }

        let mut hits: Vec<SemanticHit> = best.into_values().collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.service_id.cmp(&b.service_id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    /// Capture the current entries.
    pub fn snapshot(&self) -> IndexSnapshot {
        let state = self.current();
        IndexSnapshot {
            model_id: self.provider.model_name().to_string(),
            model_version: self.provider.model_version().to_string(),
            corpus_signature: corpus_signature(&state.corpus),
            created_at: chrono::Utc::now().timestamp(),
            corpus: state.corpus.clone(),
            entries: state
                .entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    /// Load `snapshot` if it is compatible with the current model and
    /// close enough to `corpus`. Entries of services no longer in `corpus`
    /// are dropped.
    pub fn restore(&self, snapshot: IndexSnapshot, corpus: &BTreeMap<String, usize>) -> RestoreOutcome {
        if snapshot.model_id != self.provider.model_name()
            || snapshot.model_version != self.provider.model_version()
        {
            return RestoreOutcome::Miss {
                reason: format!(
                    "model changed from {}@{} to {}@{}",
                    snapshot.model_id,
                    snapshot.model_version,
                    self.provider.model_name(),
                    self.provider.model_version()
                ),
            };
        }
        if let Some(entry) = snapshot
            .entries
            .values()
            .find(|e| self.check_dims(&e.vector).is_err())
        {
            return RestoreOutcome::Miss {
                reason: format!(
                    "snapshot vectors have {} dimensions, expected {}",
                    entry.vector.len(),
                    self.provider.dims()
                ),
            };
        }

        let exact = snapshot.corpus_signature == corpus_signature(corpus);
        let drift = if exact { 0.0 } else { corpus_drift(&snapshot.corpus, corpus) };
        if drift > self.drift_threshold {
            return RestoreOutcome::Miss {
                reason: format!(
                    "corpus drift {:.3} exceeds threshold {:.3}",
                    drift, self.drift_threshold
                ),
            };
        }

        let entries: HashMap<String, IndexEntry> = snapshot
            .entries
            .into_iter()
            .filter(|(_, e)| corpus.contains_key(&e.service_id))
            .collect();
        let count = entries.len();
        self.swap(IndexState {
            entries,
            corpus: corpus.clone(),
        });

        if exact {
            RestoreOutcome::Hit { entries: count }
        } else {
            RestoreOutcome::Accepted {
                entries: count,
                drift,
            }
        }
    }
}

/// Service id → entity document count for a document set.
pub fn corpus_of(documents: &[EmbeddingDocument]) -> BTreeMap<String, usize> {
    let mut corpus = BTreeMap::new();
    for doc in documents {
        let count = corpus.entry(doc.service_id.clone()).or_insert(0usize);
        if doc.entity.is_some() {
            *count += 1;
        }
    }
    corpus
}

/// SHA-256 hex over sorted ids and their entity counts.
pub fn corpus_signature(corpus: &BTreeMap<String, usize>) -> String {
    let mut hasher = Sha256::new();
    for (id, count) in corpus {
        hasher.update(id.as_bytes());
        hasher.update(b":");
        hasher.update(count.to_string().as_bytes());
        hasher.update(b"\n");
    }
    hex::encode(hasher.finalize())
}

/// Fraction of services added, removed, or with a changed entity count.
pub fn corpus_drift(old: &BTreeMap<String, usize>, new: &BTreeMap<String, usize>) -> f64 {
    let denominator = old.len().max(new.len());
    if denominator == 0 {
        return 0.0;
    }
    let changed_or_removed = old
        .iter()
        .filter(|(id, count)| new.get(*id) != Some(count))
        .count();
    let added = new.keys().filter(|id| !old.contains_key(*id)).count();
    (changed_or_removed + added) as f64 / denominator as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingProvider;

    fn doc(service: &str, text: &str) -> EmbeddingDocument {
        EmbeddingDocument {
            key: service.to_string(),
            service_id: service.to_string(),
            entity: None,
            text: text.to_string(),
            metadata: DocumentMetadata {
                display_name: service.to_string(),
                domain: None,
                tier: 0,
                entity_set: None,
            },
        }
    }

    fn index() -> EmbeddingIndex {
        EmbeddingIndex::new(Arc::new(HashingProvider::new(256, "1")), 2, 0.05)
    }

    fn corpus(n: usize) -> BTreeMap<String, usize> {
        (0..n).map(|i| (format!("S{:03}", i), 0)).collect()
    }

    struct NoSchemas;

    #[async_trait::async_trait]
    impl crate::upstream::SchemaProvider for NoSchemas {
        async fn fetch_schema(
            &self,
            _entry: &crate::models::CatalogEntry,
        ) -> Result<Vec<crate::models::EntitySchema>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_index_all_embeds_one_document_per_uncached_service() {
        use crate::classify::default_domains;
        use crate::models::{CatalogEntry, ServiceRecord};

        let classifier = Classifier::new(&default_domains()).unwrap();
        let records = ["ZFAR_CUSTOMER_LINE_ITEMS_0001", "API_SALES_ORDER_SRV"]
            .iter()
            .map(|id| ServiceRecord {
                entry: CatalogEntry {
                    id: id.to_string(),
                    title: id.to_string(),
                    description: String::new(),
                    service_url: String::new(),
                    metadata_url: String::new(),
                    technical_name: None,
                    version: None,
                },
                classification: classifier.classify(id, ""),
                hint: None,
            })
            .collect();
        let catalog = ServiceCatalog::new(records);
        let cache = MetadataCache::new(Arc::new(NoSchemas));

        let idx = index();
        let report = idx.index_all(&catalog, &classifier, &cache, 12).await;
        assert_eq!(report.indexed, 2);
        assert_eq!(idx.len(), 2);
        assert!(idx.is_ready());
    }

    #[test]
    fn test_signature_is_order_independent_and_count_sensitive() {
        let mut a = BTreeMap::new();
        a.insert("B".to_string(), 1);
        a.insert("A".to_string(), 0);
        let mut b = BTreeMap::new();
        b.insert("A".to_string(), 0);
        b.insert("B".to_string(), 1);
        assert_eq!(corpus_signature(&a), corpus_signature(&b));
        b.insert("B".to_string(), 2);
        assert_ne!(corpus_signature(&a), corpus_signature(&b));
    }

    #[test]
    fn test_drift() {
        let old = corpus(100);
        let mut new = old.clone();
        assert_eq!(corpus_drift(&old, &new), 0.0);
        new.remove("S000");
        new.insert("S999".to_string(), 0);
        new.insert("S001".to_string(), 3);
        assert!((corpus_drift(&old, &new) - 0.03).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_query_ranks_matching_document_first() {
        let index = index();
        let report = index
            .index_documents(vec![
                doc("AR", "customer invoices open items receivables"),
                doc("MM", "material stock warehouse inventory"),
                doc("AP", "supplier invoices payables"),
            ])
            .await;
        assert_eq!(report.indexed, 3);
        let hits = index.query("customer open items", 2, 0.0, |_| true).await.unwrap();
        assert_eq!(hits[0].service_id, "AR");
        assert!(hits.len() <= 2);
    }

    #[tokio::test]
    async fn test_query_respects_filter_and_floor() {
        let index = index();
        index
            .index_documents(vec![doc("AR", "customer invoices"), doc("AP", "supplier invoices")])
            .await;
        let hits = index.query("customer invoices", 10, 0.0, |id| id == "AP").await.unwrap();
        assert!(hits.iter().all(|h| h.service_id == "AP"));
        let none = index.query("customer invoices", 10, 1.01, |_| true).await.unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_entity_hits_collapse_onto_service() {
        let index = index();
        let mut entity = doc("AR", "Customer email address contact");
        entity.key = "AR::Customer".to_string();
        entity.entity = Some("Customer".to_string());
        index
            .index_documents(vec![doc("AR", "receivables"), entity])
            .await;
        let hits = index.query("customer email", 5, 0.0, |_| true).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].entity.as_deref(), Some("Customer"));
    }

    #[tokio::test]
    async fn test_reindex_reuses_unchanged_entries() {
        let index = index();
        index
            .index_documents(vec![doc("A", "alpha"), doc("B", "beta")])
            .await;
        let report = index
            .index_documents(vec![doc("A", "alpha"), doc("B", "beta changed"), doc("C", "gamma")])
            .await;
        assert_eq!(report.reused, 1);
        assert_eq!(report.indexed, 2);
        assert_eq!(index.len(), 3);
    }

    #[tokio::test]
    async fn test_restore_rejects_model_mismatch() {
        let index = index();
        index.index_documents(vec![doc("A", "alpha")]).await;
        let mut snapshot = index.snapshot();
        snapshot.model_version = "2".to_string();
        let other = self::index();
        let outcome = other.restore(snapshot, &corpus_of(&[doc("A", "alpha")]));
        assert!(matches!(outcome, RestoreOutcome::Miss { .. }));
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn test_restore_accepts_small_drift_and_drops_removed() {
        let index = index();
        let docs: Vec<_> = (0..40).map(|i| doc(&format!("S{:03}", i), "text")).collect();
        index.index_documents(docs.clone()).await;
        let snapshot = index.snapshot();

        let mut current = corpus_of(&docs);
        current.remove("S000");
        let fresh = self::index();
        match fresh.restore(snapshot.clone(), &current) {
            RestoreOutcome::Accepted { entries, drift } => {
                assert_eq!(entries, 39);
                assert!(drift <= 0.05);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        let mut far = current.clone();
        for i in 100..110 {
            far.insert(format!("S{:03}", i), 0);
        }
        assert!(!self::index().restore(snapshot, &far).is_usable());
    }
}
