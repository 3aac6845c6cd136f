//! Embedding document synthesis.
//!
//! Turns a [`ServiceRecord`] (and, when its schema is already cached, its
//! entity schemas) into the text that gets vectorized. A service always
//! yields one service-level document keyed by its id; each business entity
//! yields an additional document keyed `"{service_id}::{entity_name}"`.

use serde::{Deserialize, Serialize};

use crate::cache::MetadataCache;
use crate::classify::{tier_label, Classifier};
use crate::models::{EntitySchema, ServiceCatalog, ServiceRecord};

/// Separator between service id and entity name in document keys.
pub const ENTITY_KEY_SEPARATOR: &str = "::";

/// Descriptive fields stored alongside a vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub display_name: String,
    pub domain: Option<String>,
    pub tier: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_set: Option<String>,
}

/// A synthesized, not-yet-embedded document.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingDocument {
    pub key: String,
    pub service_id: String,
    pub entity: Option<String>,
    pub text: String,
    pub metadata: DocumentMetadata,
}

/// Key of an entity-level document.
pub fn entity_key(service_id: &str, entity: &str) -> String {
    format!("{}{}{}", service_id, ENTITY_KEY_SEPARATOR, entity)
}

/// Property names that carry no business meaning.
const TECHNICAL_PROPERTY_NAMES: &[&str] = &[
    "createdby",
    "createdat",
    "createdon",
    "createdbyuser",
    "creationdate",
    "creationdatetime",
    "changedby",
    "changedat",
    "changedon",
    "lastchangedby",
    "lastchangedat",
    "lastchangedbyuser",
    "lastchangedate",
    "lastchangedatetime",
    "lastchangeddatetime",
    "draftuuid",
    "draftentitycreationdatetime",
    "draftentitylastchangedatetime",
    "hasactiveentity",
    "hasdraftentity",
    "isactiveentity",
    "etag",
];

/// Substrings marking internal identifier fields.
const TECHNICAL_PROPERTY_MARKERS: &[&str] = &["uuid", "guid"];

/// Prefixes reserved for system fields.
const TECHNICAL_PROPERTY_PREFIXES: &[&str] = &["sap__", "__"];

/// Entity name fragments for value helps, parameter objects and drafts.
const NON_BUSINESS_ENTITY_MARKERS: &[&str] = &[
    "valuehelp",
    "parameters",
    "internal",
    "system",
    "draftadministrativedata",
];

/// Whether a property name is an audit, GUID, or system field.
pub fn is_technical_property(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    TECHNICAL_PROPERTY_NAMES.contains(&lower.as_str())
        || TECHNICAL_PROPERTY_MARKERS.iter().any(|m| lower.contains(m))
        || TECHNICAL_PROPERTY_PREFIXES.iter().any(|p| lower.starts_with(p))
}

/// Whether an entity is a value help, parameter object, internal/system
/// helper, or draft administration entity.
pub fn is_non_business_entity(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    if NON_BUSINESS_ENTITY_MARKERS.iter().any(|m| lower.contains(m)) {
        return true;
    }
    // Value-help entities: `..._VH`, `...VH`, `VH_...`
    let upper = name.to_ascii_uppercase();
    upper.ends_with("VH") || upper.ends_with("_VH") || upper.starts_with("VH_") || upper.contains("_VH_")
}

fn metadata_for(record: &ServiceRecord, entity_set: Option<&str>) -> DocumentMetadata {
    DocumentMetadata {
        display_name: record.display_name().to_string(),
        domain: record.classification.domain.clone(),
        tier: record.classification.tier,
        entity_set: entity_set.map(|s| s.to_string()),
    }
}

/// The service-level document.
pub fn service_document(record: &ServiceRecord, classifier: &Classifier) -> EmbeddingDocument {
    let mut parts: Vec<String> = vec![
        record.display_name().to_string(),
        record.id().to_string(),
        record.rich_description().to_string(),
    ];

    if let Some(domain) = &record.classification.domain {
        if let Some(expansion) = classifier.domain_expansion(domain) {
            parts.push(expansion.to_string());
        }
    }
    parts.push(tier_label(record.classification.tier).to_string());

    if let Some(hint) = &record.hint {
        if let Some(code) = &hint.transaction_code {
            parts.push(format!("transaction {}", code));
        }
        if let Some(use_for) = &hint.use_for {
            parts.push(format!("use for {}", use_for));
        }
        if !hint.key_entities.is_empty() {
            parts.push(format!("entities {}", hint.key_entities.join(" ")));
        }
    }

    EmbeddingDocument {
        key: record.id().to_string(),
        service_id: record.id().to_string(),
        entity: None,
        text: join_parts(parts),
        metadata: metadata_for(record, None),
    }
}

/// Per-entity documents for business entities of a cached schema.
pub fn entity_documents(
    record: &ServiceRecord,
    schemas: &[EntitySchema],
    max_properties: usize,
) -> Vec<EmbeddingDocument> {
    schemas
        .iter()
        .filter(|s| !is_non_business_entity(&s.entity_name))
        .map(|schema| {
            let business: Vec<&str> = schema
                .properties
                .iter()
                .filter(|p| !schema.keys.contains(&p.name))
                .filter(|p| !is_technical_property(&p.name))
                .take(max_properties)
                .map(|p| p.label.as_deref().unwrap_or(&p.name))
                .collect();

            let mut capabilities = Vec::new();
            if schema.capabilities.creatable {
                capabilities.push("creatable");
            }
            if schema.capabilities.updatable {
                capabilities.push("updatable");
            }
            if schema.capabilities.deletable {
                capabilities.push("deletable");
            }
            if capabilities.is_empty() {
                capabilities.push("read-only");
            }

            let parts = vec![
                record.display_name().to_string(),
                record.rich_description().to_string(),
                schema.entity_name.clone(),
                format!("keys {}", schema.keys.join(" ")),
                format!("fields {}", business.join(" ")),
                capabilities.join(" "),
            ];

            EmbeddingDocument {
                key: entity_key(record.id(), &schema.entity_name),
                service_id: record.id().to_string(),
                entity: Some(schema.entity_name.clone()),
                text: join_parts(parts),
                metadata: metadata_for(record, Some(&schema.entity_set)),
            }
        })
        .collect()
}

/// Service document followed by any entity documents.
pub fn documents_for(
    record: &ServiceRecord,
    classifier: &Classifier,
    schemas: Option<&[EntitySchema]>,
    max_properties: usize,
) -> Vec<EmbeddingDocument> {
    let mut docs = vec![service_document(record, classifier)];
    if let Some(schemas) = schemas {
        docs.extend(entity_documents(record, schemas, max_properties));
    }
    docs
}

/// Documents for every record, with entity documents for the services
/// whose schemas the cache already holds.
pub fn collect_documents(
    catalog: &ServiceCatalog,
    classifier: &Classifier,
    cache: &MetadataCache,
    max_properties: usize,
) -> Vec<EmbeddingDocument> {
    catalog
        .records()
        .iter()
        .flat_map(|record| {
            let schemas = cache.peek(record.id());
            documents_for(
                record,
                classifier,
                schemas.as_deref().map(|s| s.as_slice()),
                max_properties,
            )
        })
        .collect()
}

fn join_parts(parts: Vec<String>) -> String {
    parts
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(". ")
}
