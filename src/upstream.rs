//! Upstream collaborators: catalog, schema, and data access.
//!
//! The discovery core only sees the three traits defined here:
//!
//! | Trait | Used by | Purpose |
//! |-------|---------|---------|
//! | [`CatalogProvider`] | bootstrap | list the services exposed by the gateway |
//! | [`SchemaProvider`] | [`MetadataCache`](crate::cache::MetadataCache) | fetch and parse one service's `$metadata` |
//! | [`DataClient`] | [`Discovery::act`](crate::protocol::Discovery::act) | execute reads and writes |
//!
//! [`ODataGateway`] implements all three against an OData gateway over
//! HTTP. [`StaticCatalog`] serves a catalog from a JSON file for offline
//! runs.
//!
//! # Gateway requests
//!
//! - catalog: `GET {base_url}{catalog_path}?$format=json`, following
//!   `__next` / `@odata.nextLink` until exhausted;
//! - schema: `GET {metadata_url}`;
//! - data: `{service_url}/{EntitySet}[({key})]?$filter=…&$select=…&$orderby=…&$top=…&$skip=…&$format=json`.
//!
//! Writes first fetch a CSRF token (`x-csrf-token: Fetch`) from the
//! service root and send it back with the mutation. Session cookies are
//! kept by the client so the token stays valid. Basic-auth credentials
//! come from the environment variables named in `[upstream]`; they never
//! appear in the config file. A configured `sap-client` is appended to
//! every request.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;

use crate::config::UpstreamConfig;
use crate::metadata::parse_edmx;
use crate::models::{CatalogEntry, EntitySchema};

/// Source of catalog entries.
#[async_trait]
pub trait CatalogProvider: Send + Sync {
    async fn list_services(&self) -> Result<Vec<CatalogEntry>>;
}

/// Source of entity schemas for one service.
#[async_trait]
pub trait SchemaProvider: Send + Sync {
    async fn fetch_schema(&self, entry: &CatalogEntry) -> Result<Vec<EntitySchema>>;
}

/// Executes a data operation against a service.
#[async_trait]
pub trait DataClient: Send + Sync {
    async fn execute(&self, request: DataRequest) -> Result<Value>;
}

/// Data operations accepted by stage 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DataOperation {
    Read,
    ReadSingle,
    Create,
    Update,
    Delete,
}

impl DataOperation {
    pub const ALL: [DataOperation; 5] = [
        DataOperation::Read,
        DataOperation::ReadSingle,
        DataOperation::Create,
        DataOperation::Update,
        DataOperation::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataOperation::Read => "read",
            DataOperation::ReadSingle => "read-single",
            DataOperation::Create => "create",
            DataOperation::Update => "update",
            DataOperation::Delete => "delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.as_str() == s)
    }

    /// Whether the operation addresses a single entity by key.
    pub fn is_keyed(&self) -> bool {
        matches!(
            self,
            DataOperation::ReadSingle | DataOperation::Update | DataOperation::Delete
        )
    }

    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            DataOperation::Create | DataOperation::Update | DataOperation::Delete
        )
    }
}

/// OData system query options for reads.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryOptions {
    pub filter: Option<String>,
    pub select: Option<String>,
    pub orderby: Option<String>,
    pub top: Option<u32>,
    pub skip: Option<u32>,
}

/// A fully validated data request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataRequest {
    pub service_id: String,
    pub service_url: String,
    pub entity_set: String,
    pub operation: DataOperation,
    /// Formatted key predicate, e.g. `'100'` or `A='1',B='2'`.
    pub key: Option<String>,
    pub payload: Option<Value>,
    pub query: QueryOptions,
}

/// Percent-encode everything except unreserved characters and the few
/// OData delimiters that must stay literal.
fn encode(value: &str, keep: &[u8]) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || b"-_.~".contains(&byte) || keep.contains(&byte) {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

/// Entity URL and query string for a request.
pub fn compose_url(request: &DataRequest, sap_client: Option<&str>) -> String {
    let mut url = format!(
        "{}/{}",
        request.service_url.trim_end_matches('/'),
        encode(&request.entity_set, b"")
    );
    if let Some(key) = &request.key {
        url.push('(');
        url.push_str(&encode(key, b"'=,"));
        url.push(')');
    }

    let mut params: Vec<(&str, String)> = Vec::new();
    if request.operation == DataOperation::Read {
        let q = &request.query;
        if let Some(filter) = &q.filter {
            params.push(("$filter", filter.clone()));
        }
        if let Some(select) = &q.select {
            params.push(("$select", select.clone()));
        }
        if let Some(orderby) = &q.orderby {
            params.push(("$orderby", orderby.clone()));
        }
        if let Some(top) = q.top {
            params.push(("$top", top.to_string()));
        }
        if let Some(skip) = q.skip {
            params.push(("$skip", skip.to_string()));
        }
    } else if request.operation == DataOperation::ReadSingle {
        if let Some(select) = &request.query.select {
            params.push(("$select", select.clone()));
        }
    }
    if let Some(client) = sap_client {
        params.push(("sap-client", client.to_string()));
    }
    if !request.operation.is_mutation() {
        params.push(("$format", "json".to_string()));
    }

    if !params.is_empty() {
        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, encode(v, b"',$*()")))
            .collect::<Vec<_>>()
            .join("&");
        url.push('?');
        url.push_str(&query);
    }
    url
}

fn with_sap_client(url: &str, sap_client: Option<&str>) -> String {
    match sap_client {
        Some(client) if !url.contains("sap-client=") => {
            let sep = if url.contains('?') { '&' } else { '?' };
            format!("{}{}sap-client={}", url, sep, encode(client, b""))
        }
        _ => url.to_string(),
    }
}

/// Unwrap an OData V2 (`d` / `d.results`) or V4 (`value`) envelope.
pub fn unwrap_envelope(body: Value) -> Value {
    match body {
        Value::Object(mut map) => {
            if let Some(d) = map.remove("d") {
                match d {
                    Value::Object(mut inner) if inner.contains_key("results") => {
                        inner.remove("results").unwrap_or(Value::Null)
                    }
                    other => other,
                }
            } else if let Some(value) = map.remove("value") {
                value
            } else {
                Value::Object(map)
            }
        }
        other => other,
    }
}

/// Link to the next page of a collection response, if any.
fn next_link(body: &Value) -> Option<String> {
    body.pointer("/d/__next")
        .or_else(|| body.get("@odata.nextLink"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

fn string_field(record: &Value, names: &[&str]) -> Option<String> {
    names
        .iter()
        .find_map(|n| record.get(*n).and_then(|v| v.as_str()))
        .map(|s| s.to_string())
        .filter(|s| !s.is_empty())
}

/// Map one catalog-service record to a [`CatalogEntry`].
fn catalog_entry(record: &Value) -> Option<CatalogEntry> {
    let id = string_field(record, &["ID", "Id", "TechnicalServiceName"])?;
    let service_url = string_field(record, &["ServiceUrl", "ServiceURL"])?;
    Some(CatalogEntry {
        title: string_field(record, &["Title"]).unwrap_or_else(|| id.clone()),
        description: string_field(record, &["Description"]).unwrap_or_default(),
        metadata_url: string_field(record, &["MetadataUrl", "MetadataURL"]).unwrap_or_default(),
        technical_name: string_field(record, &["TechnicalServiceName"]),
        version: record
            .get("TechnicalServiceVersion")
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .filter(|s| !s.is_empty() && s != "null"),
        id,
        service_url,
    })
}

/// HTTP client for an OData gateway.
pub struct ODataGateway {
    client: reqwest::Client,
    base_url: Option<String>,
    catalog_path: String,
    sap_client: Option<String>,
    credentials: Option<(String, String)>,
}

impl ODataGateway {
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .cookie_store(true)
            .build()
            .context("Failed to build upstream HTTP client")?;

        let credentials = match (
            std::env::var(&config.username_env),
            std::env::var(&config.password_env),
        ) {
            (Ok(user), Ok(password)) => Some((user, password)),
            _ => {
                tracing::debug!(
                    user_env = %config.username_env,
                    "upstream credentials not set; sending unauthenticated requests"
                );
                None
            }
        };

        Ok(Self {
            client,
            base_url: config
                .base_url
                .as_ref()
                .map(|u| u.trim_end_matches('/').to_string()),
            catalog_path: config.catalog_path.clone(),
            sap_client: config.sap_client.clone(),
            credentials,
        })
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, url)
            .header("Accept", "application/json");
        match &self.credentials {
            Some((user, password)) => builder.basic_auth(user, Some(password)),
            None => builder,
        }
    }

    /// Resolve gateway-relative URLs against `base_url`.
    fn absolute(&self, url: &str) -> String {
        if url.starts_with("http://") || url.starts_with("https://") {
            return url.to_string();
        }
        match &self.base_url {
            Some(base) => format!("{}/{}", base, url.trim_start_matches('/')),
            None => url.to_string(),
        }
    }

    async fn send(&self, builder: reqwest::RequestBuilder, what: &str) -> Result<reqwest::Response> {
        let response = builder
            .send()
            .await
            .with_context(|| format!("{} request failed", what))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(500).collect();
            bail!("{} returned HTTP {}: {}", what, status, snippet);
        }
        Ok(response)
    }

    async fn get_json(&self, url: &str, what: &str) -> Result<Value> {
        let url = with_sap_client(&self.absolute(url), self.sap_client.as_deref());
        let response = self.send(self.request(reqwest::Method::GET, &url), what).await?;
        response
            .json()
            .await
            .with_context(|| format!("{} returned invalid JSON", what))
    }

    async fn csrf_token(&self, service_url: &str) -> Result<String> {
        let url = with_sap_client(&self.absolute(service_url), self.sap_client.as_deref());
        let response = self
            .send(
                self.request(reqwest::Method::GET, &url)
                    .header("x-csrf-token", "Fetch"),
                "CSRF token fetch",
            )
            .await?;
        response
            .headers()
            .get("x-csrf-token")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("gateway did not return an x-csrf-token header"))
    }
}

#[async_trait]
impl CatalogProvider for ODataGateway {
    async fn list_services(&self) -> Result<Vec<CatalogEntry>> {
        let base = self
            .base_url
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("upstream.base_url is required to list services"))?;

        let mut url = format!("{}{}?$format=json", base, self.catalog_path);
        let mut entries = Vec::new();
        let mut pages = 0usize;

        loop {
            let body = self.get_json(&url, "catalog").await?;
            pages += 1;
            let next = next_link(&body);
            let records = unwrap_envelope(body);
            let records = records
                .as_array()
                .ok_or_else(|| anyhow::anyhow!("catalog response is not a collection"))?;
            let before = entries.len();
            entries.extend(records.iter().filter_map(catalog_entry));
            if entries.len() - before < records.len() {
                tracing::warn!(
                    dropped = records.len() - (entries.len() - before),
                    "catalog records without id or service URL skipped"
                );
            }
            match next {
                Some(link) => url = link,
                None => break,
            }
        }

        tracing::info!(services = entries.len(), pages, "catalog loaded from gateway");
        Ok(entries)
    }
}

#[async_trait]
impl SchemaProvider for ODataGateway {
    async fn fetch_schema(&self, entry: &CatalogEntry) -> Result<Vec<EntitySchema>> {
        let url = with_sap_client(
            &self.absolute(&entry.metadata_location()),
            self.sap_client.as_deref(),
        );
        let response = self
            .send(
                self.request(reqwest::Method::GET, &url)
                    .header("Accept", "application/xml"),
                "$metadata",
            )
            .await?;
        let xml = response.text().await?;
        parse_edmx(&xml).with_context(|| format!("Failed to parse $metadata of {}", entry.id))
    }
}

#[async_trait]
impl DataClient for ODataGateway {
    async fn execute(&self, request: DataRequest) -> Result<Value> {
        let mut resolved = request.clone();
        resolved.service_url = self.absolute(&request.service_url);
        let url = compose_url(&resolved, self.sap_client.as_deref());

        let builder = match request.operation {
            DataOperation::Read | DataOperation::ReadSingle => {
                self.request(reqwest::Method::GET, &url)
            }
            op => {
                let token = self.csrf_token(&resolved.service_url).await?;
                let method = match op {
                    DataOperation::Create => reqwest::Method::POST,
                    DataOperation::Update => reqwest::Method::from_bytes(b"MERGE")?,
                    _ => reqwest::Method::DELETE,
                };
                let mut builder = self
                    .request(method, &url)
                    .header("x-csrf-token", token);
                if let Some(payload) = &request.payload {
                    builder = builder.json(payload);
                }
                builder
            }
        };

        tracing::debug!(
            service_id = %request.service_id,
            operation = request.operation.as_str(),
            url = %url,
            "executing data request"
        );
        let response = self.send(builder, request.operation.as_str()).await?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();

        if body.trim().is_empty() {
            return Ok(json!({ "status": status, "success": true }));
        }
        let value: Value = serde_json::from_str(&body)
            .with_context(|| format!("{} returned invalid JSON", request.operation.as_str()))?;
        let data = unwrap_envelope(value);
        Ok(match data {
            Value::Array(rows) => json!({ "count": rows.len(), "results": rows }),
            other => json!({ "status": status, "result": other }),
        })
    }
}

/// Catalog read from a JSON array of [`CatalogEntry`] objects.
pub struct StaticCatalog {
    entries: Vec<CatalogEntry>,
}

impl StaticCatalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog file: {}", path.display()))?;
        let entries: Vec<CatalogEntry> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse catalog file: {}", path.display()))?;
        Ok(Self::new(entries))
    }
}

#[async_trait]
impl CatalogProvider for StaticCatalog {
    async fn list_services(&self) -> Result<Vec<CatalogEntry>> {
        Ok(self.entries.clone())
    }
}
