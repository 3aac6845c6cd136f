//! Core data models used throughout Catalog Scout.
//!
//! These types represent the catalog entries, classifications, entity
//! schemas, and search results that flow through the discovery pipeline.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Minimal descriptor of a data service, as returned by the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Root URL of the service (entity sets are addressed below it).
    pub service_url: String,
    /// URL of the service's `$metadata` document.
    #[serde(default)]
    pub metadata_url: String,
    #[serde(default)]
    pub technical_name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

impl CatalogEntry {
    /// Metadata URL, derived from the service URL when the catalog omits it.
    pub fn metadata_location(&self) -> String {
        if !self.metadata_url.is_empty() {
            return self.metadata_url.clone();
        }
        format!("{}/$metadata", self.service_url.trim_end_matches('/'))
    }
}

/// Domain/tier tag computed once per catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub domain: Option<String>,
    /// 1 = transactional, 2 = display, 3 = analytics, 0 = unclassified.
    pub tier: u8,
    pub priority_score: u32,
    pub is_priority_service: bool,
}

impl Classification {
    pub fn unclassified() -> Self {
        Self {
            domain: None,
            tier: 0,
            priority_score: 100,
            is_priority_service: false,
        }
    }
}

/// Curated override of a catalog entry's label, description, and key entities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceHint {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub use_for: Option<String>,
    #[serde(default)]
    pub transaction_code: Option<String>,
    #[serde(default)]
    pub key_entities: Vec<String>,
}

/// A catalog entry together with its classification and optional hint.
///
/// The schema is not stored here: it lives in the
/// [`MetadataCache`](crate::cache::MetadataCache), keyed by `entry.id`.
#[derive(Debug, Clone)]
pub struct ServiceRecord {
    pub entry: CatalogEntry,
    pub classification: Classification,
    pub hint: Option<ServiceHint>,
}

impl ServiceRecord {
    pub fn id(&self) -> &str {
        &self.entry.id
    }

    /// Hint label if present, otherwise the catalog title.
    pub fn display_name(&self) -> &str {
        self.hint
            .as_ref()
            .and_then(|h| h.label.as_deref())
            .unwrap_or(&self.entry.title)
    }

    /// Hint description if present, otherwise the catalog description.
    pub fn rich_description(&self) -> &str {
        self.hint
            .as_ref()
            .and_then(|h| h.description.as_deref())
            .unwrap_or(&self.entry.description)
    }
}

/// The immutable, classified service list shared by search and protocol.
#[derive(Debug, Clone, Default)]
pub struct ServiceCatalog {
    records: Vec<ServiceRecord>,
    by_id: HashMap<String, usize>,
}

impl ServiceCatalog {
    /// Later duplicates of an id are dropped.
    pub fn new(records: Vec<ServiceRecord>) -> Self {
        let mut by_id = HashMap::with_capacity(records.len());
        let mut unique = Vec::with_capacity(records.len());
        for record in records {
            let key = record.id().to_ascii_lowercase();
            if by_id.contains_key(&key) {
                continue;
            }
            by_id.insert(key, unique.len());
            unique.push(record);
        }
        Self {
            records: unique,
            by_id,
        }
    }

    /// Lookup by id, case-insensitive.
    pub fn get(&self, service_id: &str) -> Option<&ServiceRecord> {
        self.by_id
            .get(&service_id.to_ascii_lowercase())
            .map(|&i| &self.records[i])
    }

    pub fn records(&self) -> &[ServiceRecord] {
        &self.records
    }

    pub fn entries(&self) -> Vec<CatalogEntry> {
        self.records.iter().map(|r| r.entry.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// One property of an entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub nullable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Mutation flags declared by the service for an entity set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub creatable: bool,
    pub updatable: bool,
    pub deletable: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            creatable: true,
            updatable: true,
            deletable: true,
        }
    }
}

/// Parsed schema of one entity (type + the set that exposes it).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySchema {
    pub entity_name: String,
    pub entity_set: String,
    /// Key property names in declared order.
    pub keys: Vec<String>,
    pub properties: Vec<PropertySchema>,
    pub capabilities: Capabilities,
}

impl EntitySchema {
    pub fn property(&self, name: &str) -> Option<&PropertySchema> {
        self.properties.iter().find(|p| p.name == name)
    }
}

/// Which search stage produced a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SearchSource {
    Semantic,
    Lexical,
    FallbackAll,
}

impl SearchSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchSource::Semantic => "semantic",
            SearchSource::Lexical => "lexical",
            SearchSource::FallbackAll => "fallback-all",
        }
    }
}

/// A ranked service returned from stage 1 search.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub service_id: String,
    pub display_name: String,
    pub domain: Option<String>,
    pub tier: u8,
    pub tier_label: String,
    pub is_priority_service: bool,
    pub priority_score: u32,
    pub score: f64,
    pub match_reason: String,
    pub source: SearchSource,
}
