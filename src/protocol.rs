//! The progressive discovery protocol: search → inspect → act.
//!
//! Each stage reveals just enough for the next one:
//!
//! | Stage | Operation | Reveals |
//! |-------|-----------|---------|
//! | 1 | [`Discovery::search`] | service ids, names, domain and tier labels, score, provenance |
//! | 2b | [`Discovery::entities`] | entity names, sets, capabilities |
//! | 2 | [`Discovery::inspect`] | keys, full property list, capabilities of one entity |
//! | 3 | [`Discovery::act`] | data rows / mutation result |
//!
//! Nothing enforces the order. An agent may call `act` directly; it just
//! won't know the key fields or capabilities without inspecting first.
//!
//! Every failure is a [`DiscoveryError`] that names valid alternatives or
//! the missing inputs, so the caller can correct itself in one step.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::cache::MetadataCache;
use crate::classify::tier_label;
use crate::error::DiscoveryError;
use crate::lexical::LexicalQuery;
use crate::models::{Capabilities, EntitySchema, PropertySchema, SearchResult, SearchSource, ServiceCatalog, ServiceRecord};
use crate::search::HybridSearchEngine;
use crate::upstream::{DataClient, DataOperation, DataRequest, QueryOptions};

const MAX_SUGGESTIONS: usize = 5;

/// Stage 1 response.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: Option<String>,
    pub domain: Option<String>,
    pub source: SearchSource,
    pub candidates: usize,
    pub count: usize,
    pub results: Vec<SearchResult>,
    pub next_step: &'static str,
}

/// One entity as listed by stage 2b.
#[derive(Debug, Clone, Serialize)]
pub struct EntitySummary {
    pub entity_name: String,
    pub entity_set: String,
    pub capabilities: Capabilities,
}

/// Stage 2b response.
#[derive(Debug, Clone, Serialize)]
pub struct EntityListResponse {
    pub service_id: String,
    pub display_name: String,
    pub entities: Vec<EntitySummary>,
    pub next_step: &'static str,
}

/// Stage 2 response.
#[derive(Debug, Clone, Serialize)]
pub struct InspectResponse {
    pub service_id: String,
    pub entity_name: String,
    pub entity_set: String,
    pub keys: Vec<String>,
    pub properties: Vec<PropertySchema>,
    pub capabilities: Capabilities,
    pub next_step: &'static str,
}

/// Stage 3 request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActRequest {
    pub service_id: String,
    pub entity_name: String,
    pub operation: String,
    #[serde(default)]
    pub parameters: Option<Value>,
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub select: Option<String>,
    #[serde(default)]
    pub orderby: Option<String>,
    #[serde(default)]
    pub top: Option<u32>,
    #[serde(default)]
    pub skip: Option<u32>,
}

pub struct Discovery {
    catalog: Arc<ServiceCatalog>,
    engine: Arc<HybridSearchEngine>,
    cache: Arc<MetadataCache>,
    data: Arc<dyn DataClient>,
    max_top: u32,
}

/// OData key predicate from key values in declared order.
///
/// A single key renders as `'value'`; a composite key as
/// `Name='value',Other='value'`. Single quotes are doubled.
pub fn format_key(pairs: &[(String, String)]) -> String {
    let quote = |v: &str| format!("'{}'", v.replace('\'', "''"));
    match pairs {
        [(_, value)] => quote(value),
        _ => pairs
            .iter()
            .map(|(name, value)| format!("{}={}", name, quote(value)))
            .collect::<Vec<_>>()
            .join(","),
    }
}

fn key_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn lookup<'a>(params: &'a Map<String, Value>, name: &str) -> Option<&'a Value> {
    params.get(name).or_else(|| {
        params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    })
}

/// Key values for `schema` taken from `params`, or the list of missing keys.
pub fn extract_key(schema: &EntitySchema, params: &Map<String, Value>) -> Result<Vec<(String, String)>, Vec<String>> {
    let mut pairs = Vec::with_capacity(schema.keys.len());
    let mut missing = Vec::new();
    for key in &schema.keys {
        match lookup(params, key).and_then(key_value) {
            Some(value) => pairs.push((key.clone(), value)),
            None => missing.push(key.clone()),
        }
    }
    if missing.is_empty() {
        Ok(pairs)
    } else {
        Err(missing)
    }
}

/// `params` without the entity's key fields.
pub fn strip_keys(schema: &EntitySchema, params: &Map<String, Value>) -> Map<String, Value> {
    params
        .iter()
        .filter(|(k, _)| !schema.keys.iter().any(|key| key.eq_ignore_ascii_case(k)))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Exact entity type or set name first, then case-insensitive.
pub fn find_entity<'a>(schemas: &'a [EntitySchema], name: &str) -> Option<&'a EntitySchema> {
    schemas
        .iter()
        .find(|s| s.entity_name == name || s.entity_set == name)
        .or_else(|| {
            schemas.iter().find(|s| {
                s.entity_name.eq_ignore_ascii_case(name) || s.entity_set.eq_ignore_ascii_case(name)
            })
        })
}

impl Discovery {
    pub fn new(
        catalog: Arc<ServiceCatalog>,
        engine: Arc<HybridSearchEngine>,
        cache: Arc<MetadataCache>,
        data: Arc<dyn DataClient>,
        max_top: u32,
    ) -> Self {
        Self {
            catalog,
            engine,
            cache,
            data,
            max_top,
        }
    }

    pub fn catalog(&self) -> &Arc<ServiceCatalog> {
        &self.catalog
    }

    /// Stage 1.
    pub async fn search(
        &self,
        query: Option<&str>,
        domain: Option<&str>,
        limit: Option<usize>,
    ) -> Result<SearchResponse, DiscoveryError> {
        let outcome = self.engine.search(query, domain, limit).await;
        Ok(SearchResponse {
            query: query.map(|q| q.to_string()),
            domain: domain.map(|d| d.to_string()),
            source: outcome.source,
            candidates: outcome.candidates,
            count: outcome.results.len(),
            results: outcome.results,
            next_step: "call list_entities or inspect_entity with a service_id to see its schema",
        })
    }

    fn resolve_service(&self, service_id: &str) -> Result<&ServiceRecord, DiscoveryError> {
        self.catalog
            .get(service_id.trim())
            .ok_or_else(|| DiscoveryError::NotFound {
                kind: "service".to_string(),
                name: service_id.to_string(),
                available: self.suggest_services(service_id),
                remediation: "use search_services to find a valid service_id".to_string(),
            })
    }

    /// Closest service ids by lexical score on the unknown id.
    fn suggest_services(&self, service_id: &str) -> Vec<String> {
        let query = LexicalQuery::new(service_id);
        let mut scored: Vec<(f64, &str)> = self
            .catalog
            .records()
            .iter()
            .filter_map(|r| query.score_record(r, &[]).map(|m| (m.score, r.id())))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored
            .into_iter()
            .take(MAX_SUGGESTIONS)
            .map(|(_, id)| id.to_string())
            .collect()
    }

    async fn resolve_entity(
        &self,
        service_id: &str,
        entity_name: &str,
    ) -> Result<(&ServiceRecord, EntitySchema), DiscoveryError> {
        let record = self.resolve_service(service_id)?;
        let schemas = self.cache.get(&record.entry).await?;
        match find_entity(&schemas, entity_name.trim()) {
            Some(schema) => Ok((record, schema.clone())),
            None => Err(DiscoveryError::NotFound {
                kind: "entity".to_string(),
                name: entity_name.to_string(),
                available: schemas.iter().map(|s| s.entity_name.clone()).collect(),
                remediation: format!(
                    "use one of the entities of service {} (see list_entities)",
                    record.id()
                ),
            }),
        }
    }

    /// Stage 2b.
    pub async fn entities(&self, service_id: &str) -> Result<EntityListResponse, DiscoveryError> {
        let record = self.resolve_service(service_id)?;
        let schemas = self.cache.get(&record.entry).await?;
        Ok(EntityListResponse {
            service_id: record.id().to_string(),
            display_name: record.display_name().to_string(),
            entities: schemas
                .iter()
                .map(|s| EntitySummary {
                    entity_name: s.entity_name.clone(),
                    entity_set: s.entity_set.clone(),
                    capabilities: s.capabilities,
                })
                .collect(),
            next_step: "call inspect_entity to see the keys and properties of one entity",
        })
    }

    /// Stage 2.
    pub async fn inspect(&self, service_id: &str, entity_name: &str) -> Result<InspectResponse, DiscoveryError> {
        let (record, schema) = self.resolve_entity(service_id, entity_name).await?;
        tracing::debug!(service_id = %record.id(), entity = %schema.entity_name, "entity inspected");
        Ok(InspectResponse {
            service_id: record.id().to_string(),
            entity_name: schema.entity_name,
            entity_set: schema.entity_set,
            keys: schema.keys,
            properties: schema.properties,
            capabilities: schema.capabilities,
            next_step: "call execute_entity_operation; keyed operations need every key field in parameters",
        })
    }

    /// Stage 3.
    pub async fn act(&self, request: ActRequest) -> Result<Value, DiscoveryError> {
        let operation = DataOperation::parse(request.operation.trim()).ok_or_else(|| DiscoveryError::Validation {
            message: format!("unknown operation '{}'", request.operation),
            missing: Vec::new(),
            valid: DataOperation::ALL.iter().map(|op| op.as_str().to_string()).collect(),
        })?;

        let (record, schema) = self.resolve_entity(&request.service_id, &request.entity_name).await?;

        let blocking = match operation {
            DataOperation::Create if !schema.capabilities.creatable => Some("creatable"),
            DataOperation::Update if !schema.capabilities.updatable => Some("updatable"),
            DataOperation::Delete if !schema.capabilities.deletable => Some("deletable"),
            _ => None,
        };
        if let Some(capability) = blocking {
            return Err(DiscoveryError::Capability {
                service_id: record.id().to_string(),
                entity: schema.entity_name.clone(),
                operation: operation.as_str().to_string(),
                capability: capability.to_string(),
            });
        }

        let empty = Map::new();
        let params = match &request.parameters {
            Some(Value::Object(map)) => map,
            None | Some(Value::Null) => {
                if matches!(operation, DataOperation::Create | DataOperation::Update) {
                    return Err(DiscoveryError::validation(format!(
                        "operation '{}' requires parameters as a JSON object",
                        operation.as_str()
                    )));
                }
                &empty
            }
            Some(other) => {
                return Err(DiscoveryError::validation(format!(
                    "parameters must be a JSON object, got {}",
                    match other {
                        Value::Array(_) => "an array",
                        Value::String(_) => "a string",
                        Value::Number(_) => "a number",
                        _ => "a boolean",
                    }
                )));
            }
        };

        let key = if operation.is_keyed() {
            match extract_key(&schema, params) {
                Ok(pairs) => Some(format_key(&pairs)),
                Err(missing) => {
                    return Err(DiscoveryError::Validation {
                        message: format!(
                            "missing key field(s) for {}: {}",
                            schema.entity_name,
                            missing.join(", ")
                        ),
                        missing,
                        valid: Vec::new(),
                    })
                }
            }
        } else {
            None
        };

        let payload = match operation {
            DataOperation::Create => Some(Value::Object(params.clone())),
            DataOperation::Update => Some(Value::Object(strip_keys(&schema, params))),
            _ => None,
        };

        let top = match operation {
            DataOperation::Read => Some(request.top.unwrap_or(self.max_top).min(self.max_top)),
            _ => None,
        };

        let data_request = DataRequest {
            service_id: record.id().to_string(),
            service_url: record.entry.service_url.clone(),
            entity_set: schema.entity_set.clone(),
            operation,
            key,
            payload,
            query: QueryOptions {
                filter: request.filter.clone(),
                select: request.select.clone(),
                orderby: request.orderby.clone(),
                top,
                skip: request.skip,
            },
        };

        tracing::info!(
            service_id = %record.id(),
            entity = %schema.entity_name,
            operation = operation.as_str(),
            "executing entity operation"
        );

        let result = self
            .data
            .execute(data_request)
            .await
            .map_err(|e| DiscoveryError::upstream("data", record.id(), format!("{:#}", e)))?;

        Ok(serde_json::json!({
            "service_id": record.id(),
            "entity_name": schema.entity_name,
            "operation": operation.as_str(),
            "domain": record.classification.domain,
            "tier": tier_label(record.classification.tier),
            "data": result,
        }))
    }
}
