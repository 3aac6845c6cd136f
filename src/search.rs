//! Hybrid service search.
//!
//! # Pipeline
//!
//! ```text
//! records ─► domain filter ─► semantic (index ready, query non-empty)
//!                                 │ unavailable / error / zero hits
//!                                 ▼
//!                              lexical (weighted fields)
//!                                 │ zero hits / empty query
//!                                 ▼
//!                              fallback-all (score 0.0)
//!                                 │
//!                                 ▼
//!                        business-priority rerank ─► truncate(limit)
//! ```
//!
//! Embedding failures never reach the caller; they are logged and the
//! engine moves on to the lexical stage. As long as the filtered corpus is
//! non-empty, the result set is non-empty.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

use crate::cache::MetadataCache;
use crate::classify::{rerank, tier_label};
use crate::config::SearchConfig;
use crate::index::EmbeddingIndex;
use crate::lexical::LexicalQuery;
use crate::models::{SearchResult, SearchSource, ServiceCatalog, ServiceRecord};

/// Ranked results plus provenance.
#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub results: Vec<SearchResult>,
    pub source: SearchSource,
    /// Size of the corpus after domain filtering.
    pub candidates: usize,
}

pub struct HybridSearchEngine {
    catalog: Arc<ServiceCatalog>,
    index: Arc<EmbeddingIndex>,
    cache: Arc<MetadataCache>,
    config: SearchConfig,
}

fn result_for(record: &ServiceRecord, score: f64, match_reason: String, source: SearchSource) -> SearchResult {
    let c = &record.classification;
    SearchResult {
        service_id: record.id().to_string(),
        display_name: record.display_name().to_string(),
        domain: c.domain.clone(),
        tier: c.tier,
        tier_label: tier_label(c.tier).to_string(),
        is_priority_service: c.is_priority_service,
        priority_score: c.priority_score,
        score,
        match_reason,
        source,
    }
}

impl HybridSearchEngine {
    pub fn new(
        catalog: Arc<ServiceCatalog>,
        index: Arc<EmbeddingIndex>,
        cache: Arc<MetadataCache>,
        config: SearchConfig,
    ) -> Self {
        Self {
            catalog,
            index,
            cache,
            config,
        }
    }

    /// `limit` (at least 1), defaulting to `default_limit`.
    pub fn effective_limit(&self, limit: Option<usize>) -> usize {
        limit.unwrap_or(self.config.default_limit).max(1)
    }

    fn filtered(&self, domain: Option<&str>) -> Vec<&ServiceRecord> {
        let domain = domain.map(str::trim).filter(|d| !d.is_empty());
        self.catalog
            .records()
            .iter()
            .filter(|r| match domain {
                Some(d) => r
                    .classification
                    .domain
                    .as_deref()
                    .map(|tag| tag.eq_ignore_ascii_case(d))
                    .unwrap_or(false),
                None => true,
            })
            .collect()
    }

    /// Run the full pipeline.
    pub async fn search(&self, query: Option<&str>, domain: Option<&str>, limit: Option<usize>) -> SearchOutcome {
        let limit = self.effective_limit(limit);
        let candidates = self.filtered(domain);
        let query = query.map(str::trim).unwrap_or("");

        let (mut results, source) = match self.semantic(query, &candidates, limit).await {
            Some(results) => (results, SearchSource::Semantic),
            None => {
                let lexical = self.lexical_results(query, &candidates);
                if lexical.is_empty() {
                    (Self::all_results(&candidates, query), SearchSource::FallbackAll)
                } else {
                    (lexical, SearchSource::Lexical)
                }
            }
        };

        rerank(&mut results);
        results.truncate(limit);

        tracing::debug!(
            query,
            domain = domain.unwrap_or(""),
            source = source.as_str(),
            candidates = candidates.len(),
            returned = results.len(),
            "search completed"
        );

        SearchOutcome {
            results,
            source,
            candidates: candidates.len(),
        }
    }

    /// Lexical stage alone, reranked and truncated.
    pub fn lexical(&self, query: &str, domain: Option<&str>, limit: Option<usize>) -> SearchOutcome {
        let limit = self.effective_limit(limit);
        let candidates = self.filtered(domain);
        let mut results = self.lexical_results(query.trim(), &candidates);
        rerank(&mut results);
        results.truncate(limit);
        SearchOutcome {
            results,
            source: SearchSource::Lexical,
            candidates: candidates.len(),
        }
    }

    /// `None` means "semantic unavailable": not ready, failed, or no hits.
    async fn semantic(&self, query: &str, candidates: &[&ServiceRecord], limit: usize) -> Option<Vec<SearchResult>> {
        if query.is_empty() || candidates.is_empty() || !self.index.is_ready() {
            return None;
        }
        let allowed: HashSet<&str> = candidates.iter().map(|r| r.id()).collect();
        let k = limit.saturating_mul(self.config.semantic_k_factor.max(1));

        let hits = match self
            .index
            .query(query, k, self.config.similarity_floor, |id| allowed.contains(id))
            .await
        {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!(error = %e, "semantic search unavailable; using lexical fallback");
                return None;
            }
        };
        if hits.is_empty() {
            return None;
        }

        let results: Vec<SearchResult> = hits
            .into_iter()
            .filter_map(|hit| {
                let record = self.catalog.get(&hit.service_id)?;
                let reason = match &hit.entity {
                    Some(entity) => format!("semantic match on entity {}", entity),
                    None => "semantic match on service description".to_string(),
                };
                Some(result_for(record, hit.score, reason, SearchSource::Semantic))
            })
            .collect();
        if results.is_empty() {
            None
        } else {
            Some(results)
        }
    }

    fn lexical_results(&self, query: &str, candidates: &[&ServiceRecord]) -> Vec<SearchResult> {
        let query = LexicalQuery::new(query);
        if query.is_empty() {
            return Vec::new();
        }
        candidates
            .iter()
            .filter_map(|record| {
                let entity_names: Vec<String> = self
                    .cache
                    .peek(record.id())
                    .map(|schemas| schemas.iter().map(|s| s.entity_name.clone()).collect())
                    .unwrap_or_default();
                let m = query.score_record(record, &entity_names)?;
                Some(result_for(record, m.score, m.reason(), SearchSource::Lexical))
            })
            .collect()
    }

    fn all_results(candidates: &[&ServiceRecord], query: &str) -> Vec<SearchResult> {
        let reason = if query.is_empty() {
            "no query; listing candidates by business priority"
        } else {
            "no match; listing candidates by business priority"
        };
        candidates
            .iter()
            .map(|record| result_for(record, 0.0, reason.to_string(), SearchSource::FallbackAll))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::{default_domains, Classifier};
    use crate::embedding::{DisabledProvider, HashingProvider};
    use crate::models::{CatalogEntry, EntitySchema};
    use crate::upstream::SchemaProvider;
    use async_trait::async_trait;

    struct NoSchemas;

    #[async_trait]
    impl SchemaProvider for NoSchemas {
        async fn fetch_schema(&self, _entry: &CatalogEntry) -> anyhow::Result<Vec<EntitySchema>> {
            Ok(vec![])
        }
    }

    fn catalog() -> Arc<ServiceCatalog> {
        let classifier = Classifier::new(&default_domains()).unwrap();
        let services = [
            ("ZFAR_CUSTOMER_LINE_ITEMS_0001", "Customer Line Items"),
            ("ZFAR_CUSTOMER_KPI_QUERY", "Customer Analytics"),
            ("ZFAR_DISPLAY_CUSTOMER_LIST", "Display Customers"),
            ("ZFAP_SUPPLIER_INVOICE_MANAGE", "Manage Supplier Invoices"),
            ("ZHR_EMPLOYEE_SRV", "Employees"),
        ];
        let records = services
            .iter()
            .map(|(id, title)| {
                let entry = CatalogEntry {
                    id: id.to_string(),
                    title: title.to_string(),
                    description: format!("{} service", title),
                    service_url: format!("https://gw/{}", id),
                    metadata_url: String::new(),
                    technical_name: None,
                    version: None,
                };
                ServiceRecord {
                    classification: classifier.classify(&entry.id, &entry.title),
                    entry,
                    hint: None,
                }
            })
            .collect();
        Arc::new(ServiceCatalog::new(records))
    }

    fn engine(index: Arc<EmbeddingIndex>) -> HybridSearchEngine {
        HybridSearchEngine::new(
            catalog(),
            index,
            Arc::new(MetadataCache::new(Arc::new(NoSchemas))),
            SearchConfig::default(),
        )
    }

    fn disabled_index() -> Arc<EmbeddingIndex> {
        Arc::new(EmbeddingIndex::new(Arc::new(DisabledProvider), 8, 0.05))
    }

    #[tokio::test]
    async fn test_empty_query_returns_all_by_priority() {
        let engine = engine(disabled_index());
        let outcome = engine.search(None, None, Some(3)).await;
        assert_eq!(outcome.source, SearchSource::FallbackAll);
        assert_eq!(outcome.results.len(), 3);
        assert_eq!(outcome.results[0].service_id, "ZFAR_CUSTOMER_LINE_ITEMS_0001");
        let ids: HashSet<_> = outcome.results.iter().map(|r| r.service_id.clone()).collect();
        assert_eq!(ids.len(), 3);
    }

    #[tokio::test]
    async fn test_domain_filter_is_case_insensitive() {
        let engine = engine(disabled_index());
        let outcome = engine.search(Some(""), Some("ar"), Some(50)).await;
        assert_eq!(outcome.candidates, 3);
        assert!(outcome.results.iter().all(|r| r.domain.as_deref() == Some("AR")));
    }

    #[tokio::test]
    async fn test_disabled_index_uses_lexical() {
        let engine = engine(disabled_index());
        let outcome = engine.search(Some("customer"), Some("AR"), None).await;
        assert_eq!(outcome.source, SearchSource::Lexical);
        let direct = engine.lexical("customer", Some("AR"), None);
        let a: Vec<_> = outcome.results.iter().map(|r| &r.service_id).collect();
        let b: Vec<_> = direct.results.iter().map(|r| &r.service_id).collect();
        assert_eq!(a, b);
        assert!(outcome.results.iter().all(|r| r.match_reason.starts_with("lexical match on ")));
    }

    #[tokio::test]
    async fn test_no_lexical_match_falls_back_to_all() {
        let engine = engine(disabled_index());
        let outcome = engine.search(Some("zzzz"), None, None).await;
        assert_eq!(outcome.source, SearchSource::FallbackAll);
        assert_eq!(outcome.results.len(), 5);
        assert!(outcome.results.iter().all(|r| r.score == 0.0));
    }

    #[tokio::test]
    async fn test_semantic_stage_when_index_ready() {
        let index = Arc::new(EmbeddingIndex::new(Arc::new(HashingProvider::new(256, "1")), 8, 0.05));
        let classifier = Classifier::new(&default_domains()).unwrap();
        let docs = catalog()
            .records()
            .iter()
            .map(|r| crate::document::service_document(r, &classifier))
            .collect();
        index.index_documents(docs).await;
        let engine = engine(index);
        let outcome = engine.search(Some("supplier invoices"), None, None).await;
        assert_eq!(outcome.source, SearchSource::Semantic);
        assert!(outcome
            .results
            .iter()
            .any(|r| r.service_id == "ZFAP_SUPPLIER_INVOICE_MANAGE"));
    }

    #[test]
    fn test_limit_defaults_and_floor() {
        let engine = engine(disabled_index());
        assert_eq!(engine.effective_limit(None), 10);
        assert_eq!(engine.effective_limit(Some(0)), 1);
        assert_eq!(engine.effective_limit(Some(500)), 500);
    }
}
