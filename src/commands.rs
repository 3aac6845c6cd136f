//! CLI command implementations for `scout`.
//!
//! Each `run_*` function loads what it needs from the config, performs one
//! operation, and prints either a human-readable summary or, with
//! `--json`, the same JSON payload the tool server returns.

use anyhow::{anyhow, Result};
use serde::Serialize;
use serde_json::Value;

use crate::app::{self, classify_catalog, Collaborators};
use crate::classify::{tier_label, Classifier};
use crate::config::Config;
use crate::error::DiscoveryError;
use crate::protocol::ActRequest;
use crate::snapshot::SqliteSnapshotStore;

/// Attach the remediation hint to a protocol error for terminal output.
fn with_hint(err: DiscoveryError) -> anyhow::Error {
    anyhow!("{}\nhint: {}", err, err.remediation())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn domain_label(domain: Option<&str>) -> &str {
    domain.unwrap_or("-")
}

/// `scout services`: list the classified catalog in business-priority order.
pub async fn run_services(config: &Config, domain: Option<&str>, json: bool) -> Result<()> {
    let collaborators = Collaborators::from_config(config)?;
    let classifier = Classifier::from_config(&config.classification)?;
    let entries = collaborators.catalog.list_services().await?;
    let catalog = classify_catalog(entries, &classifier, config)?;

    let mut records: Vec<_> = catalog
        .records()
        .iter()
        .filter(|r| match domain {
            Some(d) => r
                .classification
                .domain
                .as_deref()
                .map(|tag| tag.eq_ignore_ascii_case(d))
                .unwrap_or(false),
            None => true,
        })
        .collect();
    records.sort_by(|a, b| {
        a.classification
            .priority_score
            .cmp(&b.classification.priority_score)
            .then_with(|| a.id().cmp(b.id()))
    });

    if json {
        let rows: Vec<Value> = records
            .iter()
            .map(|r| {
                serde_json::json!({
                    "service_id": r.id(),
                    "display_name": r.display_name(),
                    "classification": r.classification,
                })
            })
            .collect();
        return print_json(&rows);
    }

    println!("{} services", records.len());
    for r in records {
        let c = &r.classification;
        println!(
            "{:<6} {:<14} {}{}  {}",
            domain_label(c.domain.as_deref()),
            tier_label(c.tier),
            if c.is_priority_service { "* " } else { "" },
            r.id(),
            r.display_name()
        );
    }
    Ok(())
}

/// `scout classify <id>`: show the classification of one service id.
pub fn run_classify(config: &Config, id: &str, title: Option<&str>, json: bool) -> Result<()> {
    let classifier = Classifier::from_config(&config.classification)?;
    let classification = classifier.classify(id, title.unwrap_or(""));
    if json {
        return print_json(&classification);
    }
    println!("id:        {}", id);
    println!("domain:    {}", domain_label(classification.domain.as_deref()));
    println!("tier:      {} ({})", classification.tier, tier_label(classification.tier));
    println!("priority:  {}", classification.is_priority_service);
    println!("score:     {}", classification.priority_score);
    Ok(())
}

/// `scout search <query>`.
pub async fn run_search(
    config: Config,
    query: &str,
    domain: Option<&str>,
    limit: Option<usize>,
    json: bool,
) -> Result<()> {
    let app = app::bootstrap(config).await?;
    let query = Some(query).filter(|q| !q.trim().is_empty());
    let response = app
        .discovery
        .search(query, domain, limit)
        .await
        .map_err(with_hint)?;

    if json {
        return print_json(&response);
    }

    println!(
        "{} of {} candidates ({})",
        response.count,
        response.candidates,
        response.source.as_str()
    );
    for (i, r) in response.results.iter().enumerate() {
        println!(
            "{:>2}. {}  {}  [{} / {}]  score={:.3}",
            i + 1,
            r.service_id,
            r.display_name,
            domain_label(r.domain.as_deref()),
            r.tier_label,
            r.score
        );
        println!("    {}", r.match_reason);
    }
    println!();
    println!("next: {}", response.next_step);
    Ok(())
}

/// `scout entities <service>`.
pub async fn run_entities(config: Config, service_id: &str, json: bool) -> Result<()> {
    let app = app::bootstrap(config).await?;
    let response = app.discovery.entities(service_id).await.map_err(with_hint)?;
    if json {
        return print_json(&response);
    }

    println!("{} ({})", response.service_id, response.display_name);
    for e in &response.entities {
        let caps = &e.capabilities;
        println!(
            "  {:<32} set={:<32} c={} u={} d={}",
            e.entity_name, e.entity_set, caps.creatable, caps.updatable, caps.deletable
        );
    }
    Ok(())
}

/// `scout inspect <service> <entity>`.
pub async fn run_inspect(config: Config, service_id: &str, entity: &str, json: bool) -> Result<()> {
    let app = app::bootstrap(config).await?;
    let response = app
        .discovery
        .inspect(service_id, entity)
        .await
        .map_err(with_hint)?;
    if json {
        return print_json(&response);
    }

    println!("--- {} / {} ---", response.service_id, response.entity_name);
    println!("entity_set:   {}", response.entity_set);
    println!("keys:         {}", response.keys.join(", "));
    println!(
        "capabilities: creatable={} updatable={} deletable={}",
        response.capabilities.creatable,
        response.capabilities.updatable,
        response.capabilities.deletable
    );
    println!();
    for p in &response.properties {
        let key = if response.keys.contains(&p.name) { "*" } else { " " };
        println!(
            "{} {:<32} {:<20} {}",
            key,
            p.name,
            p.type_name,
            p.label.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

/// `scout act`: always prints JSON.
pub async fn run_act(config: Config, request: ActRequest) -> Result<()> {
    let app = app::bootstrap(config).await?;
    let result = app.discovery.act(request).await.map_err(with_hint)?;
    print_json(&result)
}

/// `scout index rebuild`.
pub async fn run_index_rebuild(config: &Config) -> Result<()> {
    let collaborators = Collaborators::from_config(config)?;
    let store = SqliteSnapshotStore::open(&config.index.path).await?;
    let report = app::rebuild_index(config, &collaborators, &store).await;
    store.close().await;
    let report = report?;
    println!(
        "Index rebuilt: {} embedded, {} skipped ({})",
        report.indexed,
        report.skipped,
        config.index.path.display()
    );
    Ok(())
}

/// `scout index status`.
pub async fn run_index_status(config: &Config, json: bool) -> Result<()> {
    let store = SqliteSnapshotStore::open(&config.index.path).await?;
    let info = store.info().await?;
    store.close().await;

    if json {
        return print_json(&info);
    }
    match info {
        Some(info) => {
            let created = chrono::DateTime::from_timestamp(info.created_at, 0)
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| info.created_at.to_string());
            println!("Index snapshot ({})", config.index.path.display());
            println!("  model:      {}@{}", info.model_id, info.model_version);
            println!("  services:   {}", info.services);
            println!("  entries:    {}", info.entries);
            println!("  signature:  {}", info.corpus_signature);
            println!("  created:    {}", created);
        }
        None => println!("No index snapshot at {}", config.index.path.display()),
    }
    Ok(())
}
