//! Tool trait, registry, and the built-in discovery tools.
//!
//! Every operation an agent can call is a [`Tool`]: a name, a one-line
//! description, a JSON Schema for its parameters, and an async `execute`.
//! Tools live in a [`ToolRegistry`], which both the HTTP API
//! (`POST /tools/{name}`) and the MCP bridge dispatch through.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                 ToolRegistry                 │
//! │  search_services   list_entities             │
//! │  inspect_entity    execute_entity_operation  │
//! └──────────────┬───────────────────────────────┘
//!                ▼
//!        ToolContext → Discovery (search → inspect → act)
//! ```
//!
//! # Usage
//!
//! ```rust
//! use catalog_scout::traits::ToolRegistry;
//!
//! let tools = ToolRegistry::with_builtins();
//! assert_eq!(tools.len(), 4);
//! assert!(tools.find("inspect_entity").is_some());
//! ```
//!
//! Tool errors are `anyhow` errors. When the underlying cause is a
//! [`DiscoveryError`], the server and the MCP bridge recover it with
//! `downcast_ref` and return its structured payload.

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::DiscoveryError;
use crate::protocol::{ActRequest, Discovery};
use crate::upstream::DataOperation;

/// An operation exposed to agents.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use anyhow::Result;
/// use serde_json::{json, Value};
/// use catalog_scout::traits::{Tool, ToolContext};
///
/// pub struct CatalogSizeTool;
///
/// #[async_trait]
/// impl Tool for CatalogSizeTool {
///     fn name(&self) -> &str { "catalog_size" }
///     fn description(&self) -> &str { "Number of services in the catalog" }
///
///     fn parameters_schema(&self) -> Value {
///         json!({ "type": "object", "properties": {}, "required": [] })
///     }
///
///     async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<Value> {
///         Ok(json!({ "services": ctx.discovery().catalog().len() }))
///     }
/// }
/// ```
#[async_trait]
pub trait Tool: Send + Sync {
    /// Route name (`POST /tools/{name}`), lowercase with underscores.
    fn name(&self) -> &str;

    /// One-line description for agent discovery.
    fn description(&self) -> &str;

    /// Whether this tool ships with the crate. Defaults to `false`.
    fn is_builtin(&self) -> bool {
        false
    }

    /// Whether the tool never changes upstream data. Defaults to `true`.
    fn is_read_only(&self) -> bool {
        true
    }

    /// JSON Schema (`type: "object"`) for the parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute with parameters already checked by [`validate_params`].
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;
}

/// Handle on the discovery engine passed to every tool call.
#[derive(Clone)]
pub struct ToolContext {
    discovery: Arc<Discovery>,
}

impl ToolContext {
    pub fn new(discovery: Arc<Discovery>) -> Self {
        Self { discovery }
    }

    pub fn discovery(&self) -> &Discovery {
        &self.discovery
    }
}

/// Check `params` against a tool's schema: required fields, JSON types,
/// and enums. Missing optional fields with a `default` are filled in.
pub fn validate_params(schema: &Value, params: &Value) -> Result<Value, DiscoveryError> {
    let params_obj = match params {
        Value::Object(map) => map.clone(),
        Value::Null => serde_json::Map::new(),
        _ => return Err(DiscoveryError::validation("tool parameters must be a JSON object")),
    };

    let properties = schema
        .get("properties")
        .and_then(|p| p.as_object())
        .cloned()
        .unwrap_or_default();

    let required: Vec<String> = schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default();

    let missing: Vec<String> = required
        .iter()
        .filter(|f| params_obj.get(*f).map(|v| v.is_null()).unwrap_or(true))
        .cloned()
        .collect();
    if !missing.is_empty() {
        return Err(DiscoveryError::Validation {
            message: format!("missing required parameter(s): {}", missing.join(", ")),
            missing,
            valid: Vec::new(),
        });
    }

    let mut result = params_obj.clone();

    for (prop_name, prop_schema) in &properties {
        match params_obj.get(prop_name) {
            Some(Value::Null) | None => {
                if let Some(default) = prop_schema.get("default") {
                    result.insert(prop_name.clone(), default.clone());
                }
            }
            Some(value) => {
                if let Some(expected_type) = prop_schema.get("type").and_then(|t| t.as_str()) {
                    let type_ok = match expected_type {
                        "string" => value.is_string(),
                        "integer" => value.is_i64() || value.is_u64(),
                        "number" => value.is_number(),
                        "boolean" => value.is_boolean(),
                        "array" => value.is_array(),
                        "object" => value.is_object(),
                        _ => true,
                    };
                    if !type_ok {
                        return Err(DiscoveryError::validation(format!(
                            "parameter '{}' must be of type '{}', got {}",
                            prop_name,
                            expected_type,
                            json_type_name(value)
                        )));
                    }
                }

                if let Some(enum_values) = prop_schema.get("enum").and_then(|e| e.as_array()) {
                    if !enum_values.contains(value) {
                        return Err(DiscoveryError::Validation {
                            message: format!("parameter '{}' has invalid value {}", prop_name, value),
                            missing: Vec::new(),
                            valid: enum_values
                                .iter()
                                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                                .collect(),
                        });
                    }
                }
            }
        }
    }

    Ok(Value::Object(result))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn str_param<'a>(params: &'a Value, name: &str) -> Option<&'a str> {
    params
        .get(name)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn u32_param(params: &Value, name: &str) -> Option<u32> {
    params
        .get(name)
        .and_then(|v| v.as_u64())
        .map(|n| n.min(u32::MAX as u64) as u32)
}

// ============ Built-in tools ============

/// Stage 1: find candidate services.
pub struct SearchServicesTool;

#[async_trait]
impl Tool for SearchServicesTool {
    fn name(&self) -> &str {
        "search_services"
    }

    fn description(&self) -> &str {
        "Find data services by business intent. Returns service ids, names, domain and tier labels; no schema or data."
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "What you want to do or find, e.g. 'customer open items'" },
                "domain": { "type": "string", "description": "Restrict to one business domain, e.g. 'AR'" },
                "limit": { "type": "integer", "description": "Max results", "default": 10 }
            },
            "required": []
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let limit = params
            .get("limit")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize);
        let response = ctx
            .discovery()
            .search(str_param(&params, "query"), str_param(&params, "domain"), limit)
            .await?;
        Ok(serde_json::to_value(response)?)
    }
}

/// Stage 2b: entity names of one service.
pub struct ListEntitiesTool;

#[async_trait]
impl Tool for ListEntitiesTool {
    fn name(&self) -> &str {
        "list_entities"
    }

    fn description(&self) -> &str {
        "List the entities of a service with their entity sets and create/update/delete capabilities."
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "service_id": { "type": "string", "description": "Service id from search_services" }
            },
            "required": ["service_id"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let service_id = str_param(&params, "service_id").unwrap_or("");
        let response = ctx.discovery().entities(service_id).await?;
        Ok(serde_json::to_value(response)?)
    }
}

/// Stage 2: full schema of one entity.
pub struct InspectEntityTool;

#[async_trait]
impl Tool for InspectEntityTool {
    fn name(&self) -> &str {
        "inspect_entity"
    }

    fn description(&self) -> &str {
        "Show the keys, properties, and capabilities of one entity of a service."
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "service_id": { "type": "string", "description": "Service id from search_services" },
                "entity_name": { "type": "string", "description": "Entity type or entity set name" }
            },
            "required": ["service_id", "entity_name"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let response = ctx
            .discovery()
            .inspect(
                str_param(&params, "service_id").unwrap_or(""),
                str_param(&params, "entity_name").unwrap_or(""),
            )
            .await?;
        Ok(serde_json::to_value(response)?)
    }
}

/// Stage 3: read or change data.
pub struct ExecuteEntityOperationTool;

#[async_trait]
impl Tool for ExecuteEntityOperationTool {
    fn name(&self) -> &str {
        "execute_entity_operation"
    }

    fn description(&self) -> &str {
        "Read, create, update, or delete entity data. Inspect the entity first to learn its keys and capabilities."
    }

    fn is_builtin(&self) -> bool {
        true
    }

    fn is_read_only(&self) -> bool {
        false
    }

    fn parameters_schema(&self) -> Value {
        let operations: Vec<&str> = DataOperation::ALL.iter().map(|op| op.as_str()).collect();
        json!({
            "type": "object",
            "properties": {
                "service_id": { "type": "string", "description": "Service id from search_services" },
                "entity_name": { "type": "string", "description": "Entity type or entity set name" },
                "operation": { "type": "string", "enum": operations },
                "parameters": { "type": "object", "description": "Key values for keyed operations; field values for create/update" },
                "filter": { "type": "string", "description": "OData $filter expression (read)" },
                "select": { "type": "string", "description": "Comma-separated properties (read, read-single)" },
                "orderby": { "type": "string", "description": "OData $orderby expression (read)" },
                "top": { "type": "integer", "description": "Max rows (read)" },
                "skip": { "type": "integer", "description": "Rows to skip (read)" }
            },
            "required": ["service_id", "entity_name", "operation"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let request = ActRequest {
            service_id: str_param(&params, "service_id").unwrap_or("").to_string(),
            entity_name: str_param(&params, "entity_name").unwrap_or("").to_string(),
            operation: str_param(&params, "operation").unwrap_or("").to_string(),
            parameters: params.get("parameters").cloned(),
            filter: str_param(&params, "filter").map(String::from),
            select: str_param(&params, "select").map(String::from),
            orderby: str_param(&params, "orderby").map(String::from),
            top: u32_param(&params, "top"),
            skip: u32_param(&params, "skip"),
        };
        Ok(ctx.discovery().act(request).await?)
    }
}

// ============ Registry ============

/// Registry of tools, in registration order.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Registry pre-loaded with the four discovery tools.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(SearchServicesTool));
        registry.register(Box::new(ListEntitiesTool));
        registry.register(Box::new(InspectEntityTool));
        registry.register(Box::new(ExecuteEntityOperationTool));
        registry
    }

    /// Register a tool. A tool with the same name as an existing one
    /// replaces it.
    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
