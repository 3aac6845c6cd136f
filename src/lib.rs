//! # Catalog Scout
//!
//! Progressive discovery over large enterprise OData service catalogs.
//!
//! A catalog with thousands of services is too large to hand to an agent
//! whole. Catalog Scout classifies every service into a business domain and
//! tier, ranks services for a natural-language intent, and reveals schemas
//! and data one stage at a time:
//!
//! ```text
//!  search_services ──► list_entities / inspect_entity ──► execute_entity_operation
//!   (ids, labels)         (keys, properties, caps)          (rows / mutations)
//! ```
//!
//! ## Architecture
//!
//! ```text
//! CatalogProvider ──► Classifier ──► ServiceCatalog
//!                                        │
//!            ┌───────────────────────────┼───────────────────┐
//!            ▼                           ▼                   ▼
//!     EmbeddingIndex              MetadataCache        lexical scorer
//!     (+ SQLite snapshot)         (single-flight)
//!            └───────────────┬───────────┘
//!                            ▼
//!    HybridSearchEngine ──► Discovery ──► ToolRegistry ──► HTTP / MCP
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Catalog, classification, schema, and result types |
//! | [`error`] | Typed discovery errors and their JSON payloads |
//! | [`classify`] | Domain/tier classification and business-priority ordering |
//! | [`upstream`] | Catalog, schema, and data provider traits; OData gateway client |
//! | [`metadata`] | EDMX `$metadata` parsing |
//! | [`cache`] | Single-flight schema cache |
//! | [`document`] | Embedding document construction |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | In-memory vector index with snapshots |
//! | [`snapshot`] | SQLite snapshot store |
//! | [`lexical`] | Weighted field matching |
//! | [`search`] | Hybrid search pipeline |
//! | [`protocol`] | search → inspect → act |
//! | [`traits`] | Tool trait and built-in tools |
//! | [`server`] | HTTP tool server |
//! | [`mcp`] | MCP protocol bridge |
//! | [`app`] | Startup wiring |
//! | [`commands`] | CLI command implementations |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod app;
pub mod cache;
pub mod classify;
pub mod commands;
pub mod config;
pub mod db;
pub mod document;
pub mod embedding;
pub mod error;
pub mod index;
pub mod lexical;
pub mod mcp;
pub mod metadata;
pub mod migrate;
pub mod models;
pub mod protocol;
pub mod search;
pub mod server;
pub mod snapshot;
pub mod traits;
pub mod upstream;
