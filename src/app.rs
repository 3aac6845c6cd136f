//! Startup wiring.
//!
//! ```text
//! config ─► Collaborators (catalog, schema, data, embeddings)
//!              │
//!              ▼
//!        list_services ─► service_filter ─► classify + hints ─► ServiceCatalog
//!              │
//!              ├─► MetadataCache (optional prefetch)
//!              ├─► EmbeddingIndex ◄─ snapshot restore / reindex / save
//!              ▼
//!        HybridSearchEngine ─► Discovery
//! ```
//!
//! Embedding and snapshot failures are logged and never abort startup:
//! search falls back to lexical matching when the index is not ready.

use anyhow::{bail, Context, Result};
use regex::Regex;
use std::sync::Arc;

use crate::cache::MetadataCache;
use crate::classify::Classifier;
use crate::config::Config;
use crate::document::collect_documents;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::index::{corpus_of, EmbeddingIndex, IndexReport, RestoreOutcome};
use crate::models::{CatalogEntry, ServiceCatalog, ServiceRecord};
use crate::protocol::Discovery;
use crate::search::HybridSearchEngine;
use crate::snapshot::{SnapshotStore, SqliteSnapshotStore};
use crate::upstream::{CatalogProvider, DataClient, ODataGateway, SchemaProvider, StaticCatalog};

/// External systems the engine talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub catalog: Arc<dyn CatalogProvider>,
    pub schemas: Arc<dyn SchemaProvider>,
    pub data: Arc<dyn DataClient>,
    pub embeddings: Arc<dyn EmbeddingProvider>,
}

impl Collaborators {
    /// Gateway-backed collaborators. `catalog.file`, when set, replaces the
    /// gateway's catalog listing.
    pub fn from_config(config: &Config) -> Result<Self> {
        let gateway = Arc::new(ODataGateway::new(&config.upstream)?);
        let catalog: Arc<dyn CatalogProvider> = match &config.catalog.file {
            Some(path) => Arc::new(StaticCatalog::from_file(path)?),
            None if config.upstream.base_url.is_some() => gateway.clone(),
            None => bail!("Configure either [upstream].base_url or [catalog].file"),
        };
        Ok(Self {
            catalog,
            schemas: gateway.clone(),
            data: gateway,
            embeddings: create_provider(&config.embedding)?,
        })
    }
}

/// Fully wired engine.
pub struct App {
    pub config: Config,
    pub classifier: Arc<Classifier>,
    pub catalog: Arc<ServiceCatalog>,
    pub cache: Arc<MetadataCache>,
    pub index: Arc<EmbeddingIndex>,
    pub engine: Arc<HybridSearchEngine>,
    pub discovery: Arc<Discovery>,
}

/// Apply `service_filter`, then classify every entry and attach its hint.
pub fn classify_catalog(
    entries: Vec<CatalogEntry>,
    classifier: &Classifier,
    config: &Config,
) -> Result<ServiceCatalog> {
    let filter = match &config.upstream.service_filter {
        Some(pattern) => Some(
            Regex::new(pattern)
                .with_context(|| format!("Invalid upstream.service_filter: {}", pattern))?,
        ),
        None => None,
    };

    let total = entries.len();
    let records: Vec<ServiceRecord> = entries
        .into_iter()
        .filter(|e| filter.as_ref().map(|re| re.is_match(&e.id)).unwrap_or(true))
        .map(|entry| ServiceRecord {
            classification: classifier.classify(&entry.id, &entry.title),
            hint: config.hint_for(&entry.id).cloned(),
            entry,
        })
        .collect();

    let catalog = ServiceCatalog::new(records);
    tracing::info!(total, kept = catalog.len(), "service catalog classified");
    Ok(catalog)
}

/// Bootstrap against the configured upstream and snapshot database.
pub async fn bootstrap(config: Config) -> Result<App> {
    let collaborators = Collaborators::from_config(&config)?;
    let store = if collaborators.embeddings.is_enabled() {
        match SqliteSnapshotStore::open(&config.index.path).await {
            Ok(store) => Some(store),
            Err(e) => {
                tracing::warn!(error = %e, "snapshot store unavailable; index will not persist");
                None
            }
        }
    } else {
        None
    };
    let store_ref = store.as_ref().map(|s| s as &dyn SnapshotStore);
    bootstrap_with(config, collaborators, store_ref).await
}

/// Classifier, classified catalog, and a metadata cache (prefetched when
/// configured).
async fn load_catalog(
    config: &Config,
    collaborators: &Collaborators,
) -> Result<(Arc<Classifier>, Arc<ServiceCatalog>, Arc<MetadataCache>)> {
    let classifier = Arc::new(Classifier::from_config(&config.classification)?);

    let entries = collaborators
        .catalog
        .list_services()
        .await
        .context("Failed to list catalog services")?;
    let catalog = Arc::new(classify_catalog(entries, &classifier, config)?);

    let cache = Arc::new(MetadataCache::new(collaborators.schemas.clone()));
    if config.index.prefetch_schemas {
        let loaded = cache
            .prefetch(&catalog.entries(), config.index.prefetch_concurrency)
            .await;
        tracing::info!(loaded, services = catalog.len(), "schemas prefetched");
    }
    Ok((classifier, catalog, cache))
}

/// Bootstrap with explicit collaborators and an optional snapshot store.
pub async fn bootstrap_with(
    config: Config,
    collaborators: Collaborators,
    store: Option<&dyn SnapshotStore>,
) -> Result<App> {
    let (classifier, catalog, cache) = load_catalog(&config, &collaborators).await?;

    let index = Arc::new(EmbeddingIndex::new(
        collaborators.embeddings.clone(),
        config.embedding.batch_size,
        config.index.drift_threshold,
    ));
    if index.provider().is_enabled() {
        sync_index(&index, &catalog, &classifier, &cache, &config, store).await;
    } else {
        tracing::info!("embeddings disabled; search uses lexical matching");
    }

    let engine = Arc::new(HybridSearchEngine::new(
        catalog.clone(),
        index.clone(),
        cache.clone(),
        config.search.clone(),
    ));
    let discovery = Arc::new(Discovery::new(
        catalog.clone(),
        engine.clone(),
        cache.clone(),
        collaborators.data,
        config.upstream.max_top,
    ));

    Ok(App {
        config,
        classifier,
        catalog,
        cache,
        index,
        engine,
        discovery,
    })
}

/// Restore from `store` when possible, embed what changed, and save the
/// result back.
pub async fn sync_index(
    index: &EmbeddingIndex,
    catalog: &ServiceCatalog,
    classifier: &Classifier,
    cache: &MetadataCache,
    config: &Config,
    store: Option<&dyn SnapshotStore>,
) -> IndexReport {
    let documents = collect_documents(catalog, classifier, cache, config.index.max_entity_properties);
    let corpus = corpus_of(&documents);

    let mut exact_hit = false;
    if let Some(store) = store {
        match store.load().await {
            Ok(Some(snapshot)) => match index.restore(snapshot, &corpus) {
                RestoreOutcome::Hit { entries } => {
                    tracing::info!(entries, "index snapshot restored");
                    exact_hit = true;
                }
                RestoreOutcome::Accepted { entries, drift } => {
                    tracing::info!(entries, drift, "index snapshot restored with drift");
                }
                RestoreOutcome::Miss { reason } => {
                    tracing::info!(%reason, "index snapshot discarded; rebuilding");
                }
            },
            Ok(None) => tracing::info!("no index snapshot; building"),
            Err(e) => tracing::warn!(error = %e, "failed to load index snapshot; rebuilding"),
        }
    }

    let report = index.index_documents(documents).await;

    if let Some(store) = store {
        if !(exact_hit && report.indexed == 0 && report.skipped == 0) {
            if let Err(e) = store.save(&index.snapshot()).await {
                tracing::warn!(error = %e, "failed to save index snapshot");
            }
        }
    }
    report
}

/// Re-embed every document from scratch, ignoring any stored snapshot,
/// and replace the snapshot.
pub async fn rebuild_index(
    config: &Config,
    collaborators: &Collaborators,
    store: &dyn SnapshotStore,
) -> Result<IndexReport> {
    if !collaborators.embeddings.is_enabled() {
        bail!("Embeddings are disabled; set [embedding].provider to rebuild the index");
    }
    let (classifier, catalog, cache) = load_catalog(config, collaborators).await?;
    let index = EmbeddingIndex::new(
        collaborators.embeddings.clone(),
        config.embedding.batch_size,
        config.index.drift_threshold,
    );
    let report = index
        .index_all(&catalog, &classifier, &cache, config.index.max_entity_properties)
        .await;
    store.save(&index.snapshot()).await?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, title: &str) -> CatalogEntry {
        CatalogEntry {
            id: id.to_string(),
            title: title.to_string(),
            description: String::new(),
            service_url: format!("https://gw/sap/opu/odata/sap/{}/", id),
            metadata_url: String::new(),
            technical_name: None,
            version: None,
        }
    }

    #[test]
    fn test_classify_catalog_applies_filter_and_hints() {
        let config = crate::config::parse_config(
            r#"
            [upstream]
            base_url = "https://gw"
            service_filter = "^Z"

            [hints.ZFAR_CUSTOMER_LINE_ITEMS_0001]
            label = "Customer Line Items"
            "#,
        )
        .unwrap();
        let classifier = Classifier::from_config(&config.classification).unwrap();

        let catalog = classify_catalog(
            vec![
                entry("ZFAR_CUSTOMER_LINE_ITEMS_0001", "Customer Line Items"),
                entry("API_SALES_ORDER_SRV", "Sales Order"),
            ],
            &classifier,
            &config,
        )
        .unwrap();

        assert_eq!(catalog.len(), 1);
        let record = catalog.get("zfar_customer_line_items_0001").unwrap();
        assert_eq!(record.display_name(), "Customer Line Items");
        assert!(record.hint.is_some());
    }

    #[test]
    fn test_invalid_service_filter_fails() {
        let mut config = Config::minimal();
        config.upstream.service_filter = Some("(".to_string());
        let classifier = Classifier::from_config(&config.classification).unwrap();
        assert!(classify_catalog(vec![entry("A", "A")], &classifier, &config).is_err());
    }
}
