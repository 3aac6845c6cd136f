//! TOML configuration parsing and validation.
//!
//! Everything the engine needs at startup (upstream location, embedding
//! provider, classification rules, curated hints) is read once from a
//! single TOML file and handed to the components that use it. Nothing
//! reads configuration through a global.
//!
//! ```toml
//! [upstream]
//! base_url = "https://gateway.example.com"
//! sap_client = "100"
//!
//! [embedding]
//! provider = "hashing"
//! dims = 512
//!
//! [[classification.domains]]
//! name = "AR"
//! include = ["FAR_", "RECEIVABLE"]
//! exclude = ["^ZFAR_CFG_"]
//! priority_services = ["ZFAR_CUSTOMER_LINE_ITEMS_0001"]
//! tier1 = ["LINE_ITEM", "MANAGE"]
//!
//! [hints.ZFAR_CUSTOMER_LINE_ITEMS_0001]
//! label = "Customer Line Items"
//! use_for = "open items, cleared items, customer balances"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::models::ServiceHint;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub classification: ClassificationConfig,
    /// Curated overrides keyed by service id.
    #[serde(default)]
    pub hints: HashMap<String, ServiceHint>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamConfig {
    /// Gateway root, e.g. `https://gateway.example.com`.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_catalog_path")]
    pub catalog_path: String,
    /// Value for the `sap-client` query parameter, if the gateway needs one.
    #[serde(default)]
    pub sap_client: Option<String>,
    /// Name of the env var holding the basic-auth user.
    #[serde(default = "default_username_env")]
    pub username_env: String,
    /// Name of the env var holding the basic-auth password.
    #[serde(default = "default_password_env")]
    pub password_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Upper bound applied to `$top` on reads.
    #[serde(default = "default_max_top")]
    pub max_top: u32,
    /// Only services whose id matches this regex are kept.
    #[serde(default)]
    pub service_filter: Option<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            catalog_path: default_catalog_path(),
            sap_client: None,
            username_env: default_username_env(),
            password_env: default_password_env(),
            timeout_secs: default_timeout_secs(),
            max_top: default_max_top(),
            service_filter: None,
        }
    }
}

fn default_catalog_path() -> String {
    "/sap/opu/odata/IWFND/CATALOGSERVICE;v=2/ServiceCollection".to_string()
}
fn default_username_env() -> String {
    "SCOUT_UPSTREAM_USER".to_string()
}
fn default_password_env() -> String {
    "SCOUT_UPSTREAM_PASSWORD".to_string()
}
fn default_max_top() -> u32 {
    100
}

/// Offline catalog source: a JSON array of catalog entries.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct CatalogConfig {
    #[serde(default)]
    pub file: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Bumped by operators to force a reindex without changing the model name.
    #[serde(default)]
    pub model_version: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            model_version: None,
            dims: None,
            url: None,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// SQLite file holding the embedding snapshot.
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
    /// Tolerated fraction of changed services before a snapshot is discarded.
    #[serde(default = "default_drift_threshold")]
    pub drift_threshold: f64,
    #[serde(default = "default_max_entity_properties")]
    pub max_entity_properties: usize,
    /// Fetch every service's metadata at startup to build entity documents.
    #[serde(default)]
    pub prefetch_schemas: bool,
    #[serde(default = "default_prefetch_concurrency")]
    pub prefetch_concurrency: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
            drift_threshold: default_drift_threshold(),
            max_entity_properties: default_max_entity_properties(),
            prefetch_schemas: false,
            prefetch_concurrency: default_prefetch_concurrency(),
        }
    }
}

fn default_index_path() -> PathBuf {
    PathBuf::from("./data/scout.sqlite")
}
fn default_drift_threshold() -> f64 {
    0.05
}
fn default_max_entity_properties() -> usize {
    12
}
fn default_prefetch_concurrency() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_similarity_floor")]
    pub similarity_floor: f64,
    /// Semantic candidates fetched per requested result.
    #[serde(default = "default_semantic_k_factor")]
    pub semantic_k_factor: usize,
    #[serde(default = "default_limit")]
    pub default_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            similarity_floor: default_similarity_floor(),
            semantic_k_factor: default_semantic_k_factor(),
            default_limit: default_limit(),
        }
    }
}

fn default_similarity_floor() -> f64 {
    0.25
}
fn default_semantic_k_factor() -> usize {
    3
}
fn default_limit() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7332".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ClassificationConfig {
    /// Evaluated in declaration order; the first matching domain wins.
    /// Empty means "use the built-in rule set".
    #[serde(default)]
    pub domains: Vec<DomainRuleConfig>,
}

/// Uncompiled rule set for one business domain.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct DomainRuleConfig {
    pub name: String,
    /// Phrase added to embedding documents, e.g. "accounts receivable".
    #[serde(default)]
    pub expansion: String,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
    #[serde(default)]
    pub priority_services: Vec<String>,
    #[serde(default)]
    pub tier1: Vec<String>,
    #[serde(default)]
    pub tier2: Vec<String>,
    #[serde(default)]
    pub tier3: Vec<String>,
}

impl Config {
    /// Config with every section at its default; embeddings disabled.
    pub fn minimal() -> Self {
        Self {
            upstream: UpstreamConfig::default(),
            catalog: CatalogConfig::default(),
            embedding: EmbeddingConfig::default(),
            index: IndexConfig::default(),
            search: SearchConfig::default(),
            server: ServerConfig::default(),
            classification: ClassificationConfig::default(),
            hints: HashMap::new(),
        }
    }

    /// Case-insensitive hint lookup.
    pub fn hint_for(&self, service_id: &str) -> Option<&ServiceHint> {
        self.hints.get(service_id).or_else(|| {
            self.hints
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(service_id))
                .map(|(_, v)| v)
        })
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate a config document.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate search
    if !(0.0..=1.0).contains(&config.search.similarity_floor) {
        bail!("search.similarity_floor must be in [0.0, 1.0]");
    }
    if config.search.default_limit < 1 {
        bail!("search.default_limit must be >= 1");
    }
    if config.search.semantic_k_factor < 1 {
        bail!("search.semantic_k_factor must be >= 1");
    }

    // Validate index
    if !(0.0..=1.0).contains(&config.index.drift_threshold) {
        bail!("index.drift_threshold must be in [0.0, 1.0]");
    }
    if config.index.prefetch_concurrency == 0 {
        bail!("index.prefetch_concurrency must be > 0");
    }

    // Validate upstream
    if config.upstream.base_url.is_none() && config.catalog.file.is_none() {
        bail!("either upstream.base_url or catalog.file must be set");
    }
    if config.upstream.max_top == 0 {
        bail!("upstream.max_top must be > 0");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "hashing" | "local" => {}
        "openai" | "ollama" => {
            if config.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, hashing, openai, ollama, or local.",
            other
        ),
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    for domain in &config.classification.domains {
        if domain.name.trim().is_empty() {
            bail!("classification.domains entries must have a name");
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
[catalog]
file = "catalog.json"
"#;

    #[test]
    fn test_defaults_applied() {
        let config = parse_config(BASE).unwrap();
        assert_eq!(config.embedding.provider, "disabled");
        assert!((config.search.similarity_floor - 0.25).abs() < 1e-9);
        assert!((config.index.drift_threshold - 0.05).abs() < 1e-9);
        assert_eq!(config.search.default_limit, 10);
        assert_eq!(config.server.bind, "127.0.0.1:7332");
    }

    #[test]
    fn test_requires_catalog_source() {
        let err = parse_config("[search]\ndefault_limit = 5\n").unwrap_err();
        assert!(err.to_string().contains("upstream.base_url"));
    }

    #[test]
    fn test_rejects_floor_out_of_range() {
        let doc = format!("{}\n[search]\nsimilarity_floor = 1.5\n", BASE);
        assert!(parse_config(&doc).is_err());
    }

    #[test]
    fn test_openai_requires_model_and_dims() {
        let doc = format!("{}\n[embedding]\nprovider = \"openai\"\n", BASE);
        let err = parse_config(&doc).unwrap_err();
        assert!(err.to_string().contains("embedding.model"));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let doc = format!("{}\n[embedding]\nprovider = \"magic\"\n", BASE);
        assert!(parse_config(&doc).is_err());
    }

    #[test]
    fn test_domains_and_hints_parse() {
        let doc = format!(
            r#"{}
[[classification.domains]]
name = "AR"
include = ["FAR_"]
exclude = ["^ZFAR_CFG_"]

[[classification.domains]]
name = "AP"
include = ["FAP_"]

[hints.ZFAR_CUSTOMER_LINE_ITEMS_0001]
label = "Customer Line Items"
key_entities = ["Item"]
"#,
            BASE
        );
        let config = parse_config(&doc).unwrap();
        let names: Vec<&str> = config
            .classification
            .domains
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(names, vec!["AR", "AP"]);
        let hint = config.hint_for("zfar_customer_line_items_0001").unwrap();
        assert_eq!(hint.label.as_deref(), Some("Customer Line Items"));
        assert_eq!(hint.key_entities, vec!["Item".to_string()]);
    }
}
