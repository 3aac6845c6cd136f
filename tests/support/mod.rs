//! In-process fakes shared by the integration tests.

#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use catalog_scout::app::{bootstrap_with, App, Collaborators};
use catalog_scout::config::Config;
use catalog_scout::embedding::{DisabledProvider, EmbeddingProvider, HashingProvider};
use catalog_scout::models::{Capabilities, CatalogEntry, EntitySchema, PropertySchema};
use catalog_scout::snapshot::SnapshotStore;
use catalog_scout::upstream::{DataClient, DataRequest, SchemaProvider, StaticCatalog};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn entry(id: &str, title: &str, description: &str) -> CatalogEntry {
    CatalogEntry {
        id: id.to_string(),
        title: title.to_string(),
        description: description.to_string(),
        service_url: format!("https://gw.example.com/sap/opu/odata/sap/{}/", id),
        metadata_url: String::new(),
        technical_name: None,
        version: None,
    }
}

/// Seven services over five domains plus one excluded configuration service.
pub fn catalog_entries() -> Vec<CatalogEntry> {
    vec![
        entry(
            "ZFAR_CUSTOMER_LINE_ITEMS_0001",
            "Customer Line Items",
            "Open and cleared items per customer account",
        ),
        entry(
            "ZFAR_CUSTOMER_MASTER_SRV",
            "Customer Master Data",
            "Customer addresses, email and phone contacts",
        ),
        entry(
            "ZFAR_DUNNING_DISPLAY_SRV",
            "Display Dunning Notices",
            "Dunning letters sent to debtors",
        ),
        entry(
            "ZFAR_CFG_DUNNING_SRV",
            "Dunning Configuration",
            "Dunning procedure customizing",
        ),
        entry(
            "API_SALES_ORDER_SRV",
            "Sales Order",
            "Create and change sales orders with email confirmations",
        ),
        entry(
            "API_PURCHASEORDER_PROCESS_SRV",
            "Purchase Order",
            "Purchase orders to suppliers",
        ),
        entry(
            "ZFAP_SUPPLIER_INVOICE_ANALYTICS",
            "Supplier Invoice Analytics",
            "Supplier invoice KPIs",
        ),
    ]
}

fn property(name: &str, type_name: &str) -> PropertySchema {
    PropertySchema {
        name: name.to_string(),
        type_name: type_name.to_string(),
        nullable: false,
        max_length: None,
        label: None,
    }
}

/// `Customer` (single key, not creatable/deletable) and `OpenItem`
/// (composite key, fully mutable).
pub fn schemas() -> Vec<EntitySchema> {
    vec![
        EntitySchema {
            entity_name: "Customer".to_string(),
            entity_set: "Customers".to_string(),
            keys: vec!["Customer".to_string()],
            properties: vec![
                property("Customer", "Edm.String"),
                property("CustomerName", "Edm.String"),
                property("EmailAddress", "Edm.String"),
            ],
            capabilities: Capabilities {
                creatable: false,
                updatable: true,
                deletable: false,
            },
        },
        EntitySchema {
            entity_name: "OpenItem".to_string(),
            entity_set: "OpenItems".to_string(),
            keys: vec!["CompanyCode".to_string(), "AccountingDocument".to_string()],
            properties: vec![
                property("CompanyCode", "Edm.String"),
                property("AccountingDocument", "Edm.String"),
                property("AmountInCompanyCodeCurrency", "Edm.Decimal"),
            ],
            capabilities: Capabilities::default(),
        },
    ]
}

/// Schema provider that counts fetches per service and answers slowly.
#[derive(Default)]
pub struct CountingSchemas {
    calls: Mutex<HashMap<String, usize>>,
}

impl CountingSchemas {
    pub fn calls(&self, service_id: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .get(service_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl SchemaProvider for CountingSchemas {
    async fn fetch_schema(&self, entry: &CatalogEntry) -> Result<Vec<EntitySchema>> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(entry.id.clone())
            .or_insert(0) += 1;
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(schemas())
    }
}

/// Data client that records every request and returns an empty page.
#[derive(Default)]
pub struct RecordingData {
    requests: Mutex<Vec<DataRequest>>,
}

impl RecordingData {
    pub fn requests(&self) -> Vec<DataRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl DataClient for RecordingData {
    async fn execute(&self, request: DataRequest) -> Result<Value> {
        self.requests.lock().unwrap().push(request);
        Ok(json!({ "count": 0, "results": [] }))
    }
}

/// Enabled provider whose every call fails.
pub struct FailingEmbedder;

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    fn model_name(&self) -> &str {
        "failing"
    }

    fn dims(&self) -> usize {
        8
    }

    async fn embed_texts(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("embedding service unreachable")
    }
}

/// Hashing provider that counts how many texts it embedded.
pub struct CountingEmbedder {
    inner: HashingProvider,
    embedded: AtomicUsize,
}

impl CountingEmbedder {
    pub fn new() -> Self {
        Self {
            inner: HashingProvider::new(128, "1"),
            embedded: AtomicUsize::new(0),
        }
    }

    pub fn embedded(&self) -> usize {
        self.embedded.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for CountingEmbedder {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn model_version(&self) -> &str {
        self.inner.model_version()
    }

    fn dims(&self) -> usize {
        self.inner.dims()
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embedded.fetch_add(texts.len(), Ordering::SeqCst);
        self.inner.embed_texts(texts).await
    }
}

/// Hashing provider that starts failing once `fail` is called.
pub struct FlakyEmbedder {
    inner: HashingProvider,
    failing: AtomicBool,
}

impl FlakyEmbedder {
    pub fn new() -> Self {
        Self {
            inner: HashingProvider::new(128, "1"),
            failing: AtomicBool::new(false),
        }
    }

    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl EmbeddingProvider for FlakyEmbedder {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dims(&self) -> usize {
        self.inner.dims()
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("embedding service went away");
        }
        self.inner.embed_texts(texts).await
    }
}

pub struct Fixture {
    pub app: App,
    pub schemas: Arc<CountingSchemas>,
    pub data: Arc<RecordingData>,
}

pub fn test_config() -> Config {
    let mut config = Config::minimal();
    config.embedding.batch_size = 4;
    config
}

pub async fn fixture_with(
    entries: Vec<CatalogEntry>,
    embeddings: Arc<dyn EmbeddingProvider>,
    config: Config,
    store: Option<&dyn SnapshotStore>,
) -> Fixture {
    let schemas = Arc::new(CountingSchemas::default());
    let data = Arc::new(RecordingData::default());
    let collaborators = Collaborators {
        catalog: Arc::new(StaticCatalog::new(entries)),
        schemas: schemas.clone(),
        data: data.clone(),
        embeddings,
    };
    let app = bootstrap_with(config, collaborators, store).await.unwrap();
    Fixture { app, schemas, data }
}

/// Fixture with embeddings disabled.
pub async fn fixture() -> Fixture {
    fixture_with(
        catalog_entries(),
        Arc::new(DisabledProvider),
        test_config(),
        None,
    )
    .await
}
