//! # Catalog Scout CLI (`scout`)
//!
//! ## Usage
//!
//! ```bash
//! scout --config ./config/scout.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `scout services` | List the classified catalog |
//! | `scout classify <id>` | Show how one service id is classified |
//! | `scout search "<query>"` | Rank services for an intent |
//! | `scout entities <service>` | List a service's entities |
//! | `scout inspect <service> <entity>` | Show keys, properties, capabilities |
//! | `scout act <service> <entity> <op>` | Read or change entity data |
//! | `scout index rebuild` | Re-embed the catalog and replace the snapshot |
//! | `scout index status` | Show the stored snapshot header |
//! | `scout serve mcp` | Start the tool server (REST + MCP) |
//!
//! Logs go to stderr; filter them with `SCOUT_LOG` (e.g. `SCOUT_LOG=debug`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use catalog_scout::{app, commands, config, protocol::ActRequest, server};

/// Catalog Scout: find, inspect, and use services in a large OData catalog.
#[derive(Parser)]
#[command(
    name = "scout",
    about = "Catalog Scout: progressive discovery over enterprise OData service catalogs",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/scout.toml")]
    config: PathBuf,

    /// Print JSON payloads instead of human-readable output.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the classified catalog in business-priority order.
    Services {
        /// Only services of this domain (e.g. `AR`).
        #[arg(long)]
        domain: Option<String>,
    },

    /// Classify a service id with the configured rules.
    ///
    /// Works offline; no catalog is loaded.
    Classify {
        id: String,
        /// Catalog title, also matched by include patterns.
        #[arg(long)]
        title: Option<String>,
    },

    /// Rank services for a business intent.
    Search {
        /// What you want to do or find. Empty lists all by priority.
        query: String,
        #[arg(long)]
        domain: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },

    /// List the entities of a service.
    Entities { service: String },

    /// Show the schema of one entity.
    Inspect { service: String, entity: String },

    /// Read or change entity data.
    Act {
        service: String,
        entity: String,
        /// `read`, `read-single`, `create`, `update`, or `delete`.
        operation: String,
        /// Keys and/or field values as a JSON object.
        #[arg(long)]
        params: Option<String>,
        #[arg(long)]
        filter: Option<String>,
        #[arg(long)]
        select: Option<String>,
        #[arg(long)]
        orderby: Option<String>,
        #[arg(long)]
        top: Option<u32>,
        #[arg(long)]
        skip: Option<u32>,
    },

    /// Manage the embedding index snapshot.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// Start a server.
    Serve {
        #[command(subcommand)]
        service: ServeService,
    },
}

#[derive(Subcommand)]
enum IndexAction {
    /// Re-embed every service and replace the stored snapshot.
    Rebuild,
    /// Show the stored snapshot's model, size, and signature.
    Status,
}

#[derive(Subcommand)]
enum ServeService {
    /// Start the tool server on `[server].bind` (REST at `/tools`, MCP at `/mcp`).
    Mcp,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("SCOUT_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;
    let json = cli.json;

    match cli.command {
        Commands::Services { domain } => {
            commands::run_services(&cfg, domain.as_deref(), json).await?;
        }
        Commands::Classify { id, title } => {
            commands::run_classify(&cfg, &id, title.as_deref(), json)?;
        }
        Commands::Search {
            query,
            domain,
            limit,
        } => {
            commands::run_search(cfg, &query, domain.as_deref(), limit, json).await?;
        }
        Commands::Entities { service } => {
            commands::run_entities(cfg, &service, json).await?;
        }
        Commands::Inspect { service, entity } => {
            commands::run_inspect(cfg, &service, &entity, json).await?;
        }
        Commands::Act {
            service,
            entity,
            operation,
            params,
            filter,
            select,
            orderby,
            top,
            skip,
        } => {
            let parameters = match params {
                Some(raw) => Some(serde_json::from_str(&raw).map_err(|e| {
                    anyhow::anyhow!("--params must be a JSON object: {}", e)
                })?),
                None => None,
            };
            let request = ActRequest {
                service_id: service,
                entity_name: entity,
                operation,
                parameters,
                filter,
                select,
                orderby,
                top,
                skip,
            };
            commands::run_act(cfg, request).await?;
        }
        Commands::Index { action } => match action {
            IndexAction::Rebuild => commands::run_index_rebuild(&cfg).await?,
            IndexAction::Status => commands::run_index_status(&cfg, json).await?,
        },
        Commands::Serve { service } => match service {
            ServeService::Mcp => {
                let bind = cfg.server.bind.clone();
                let app = app::bootstrap(cfg).await?;
                server::run_server(app.discovery, &bind).await?;
            }
        },
    }

    Ok(())
}
