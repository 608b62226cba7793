//! pawsync - command-line inspector for the pawsync cache layer.
//!
//! Talks to the pet-care API through the same sync layer the app uses, so
//! pagination, retries and status polling can be exercised by hand.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pawsync_core::cache::KeyFilter;
use pawsync_core::mutation::budget_alerts_key;
use pawsync_core::{
    CachePersister, Config, HttpService, PageOutcome, ResourceType, SyncContext,
};

// ============================================================================
// Constants
// ============================================================================

/// Set to `1` to also log to a daily rolling file under the cache directory
const ENV_LOG_FILE: &str = "PAWSYNC_LOG_FILE";

const LOG_FILE_PREFIX: &str = "pawsync.log";

/// Pages fetched by `list` when no count is given
const DEFAULT_LIST_PAGES: u32 = 1;

const USAGE: &str = "\
usage: pawsync <command>

commands:
  list <resource> [petId] [pages]   list a resource page by page
  status                            refresh budget alerts once
  watch [seconds]                   poll budget alerts until the breaker opens
  cache                             show cached entries and their age

resources: pets, expenses, budgets, health-records, events, feeding-schedules";

/// Initialize the tracing subscriber for logging.
/// The returned guard must live as long as file logging is wanted.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let file_logging = std::env::var(ENV_LOG_FILE).is_ok_and(|v| v == "1");
    let (file_layer, guard) = match config.cache_dir() {
        Ok(dir) if file_logging => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let config = Config::load().context("Failed to load config")?;
    let _log_guard = init_tracing(&config);
    info!(api = %config.api_base_url, "pawsync starting");

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        println!("{}", USAGE);
        return Ok(());
    };

    let mut service = HttpService::with_timeout(&config.api_base_url, config.request_timeout())?;
    if let Some(token) = &config.api_token {
        service.set_token(token.clone());
    }
    let ctx = SyncContext::from_config(&config, Arc::new(service));

    let persister = CachePersister::new(config.cache_dir()?)?;
    if let Err(e) = persister.load(ctx.store()) {
        warn!(error = %e, "Ignoring unreadable cache file");
    }

    match command.as_str() {
        "list" => list(&ctx, &args[1..]).await?,
        "status" => status(&ctx).await,
        "watch" => watch(&ctx, &args[1..]).await?,
        "cache" => show_cache(&ctx),
        other => bail!("Unknown command '{}'\n\n{}", other, USAGE),
    }

    if let Err(e) = persister.save(ctx.store()) {
        error!(error = %e, "Failed to persist cache");
    }
    Ok(())
}

async fn list(ctx: &SyncContext, args: &[String]) -> Result<()> {
    let Some(segment) = args.first() else {
        bail!("list needs a resource\n\n{}", USAGE);
    };
    let resource = ResourceType::from_segment(segment)
        .with_context(|| format!("Unknown resource '{}'", segment))?;
    let filter = match args.get(1) {
        Some(pet_id) if resource != ResourceType::Pets => json!({ "petId": pet_id }),
        _ => json!({}),
    };
    let pages: u32 = match args.get(2) {
        Some(n) => n.parse().with_context(|| format!("Invalid page count '{}'", n))?,
        None => DEFAULT_LIST_PAGES,
    };

    let query = ctx.paginated(resource, filter);
    let mut outcome = query.refresh().await.map_err(|e| anyhow::anyhow!(e.user_message()))?;
    while query.page() < pages {
        match outcome {
            PageOutcome::Merged { has_more: true, .. } => {}
            _ => break,
        }
        outcome = query.load_more().await.map_err(|e| anyhow::anyhow!(e.user_message()))?;
    }

    for record in query.values() {
        println!("{}", summarize(&record));
    }
    eprintln!(
        "{} records, {} page(s){}",
        query.values().len(),
        query.page(),
        if query.has_more() { ", more available" } else { "" }
    );
    Ok(())
}

/// One line per record: id followed by the fields most resources carry.
fn summarize(record: &Value) -> String {
    let id = record["id"].as_str().unwrap_or("?");
    let label = ["name", "title", "description", "category", "type", "foodType"]
        .iter()
        .find_map(|field| record[*field].as_str())
        .unwrap_or("");
    match record.get("amount") {
        Some(amount) => format!("{:<28} {:<24} {}", id, label, amount),
        None => format!("{:<28} {}", id, label),
    }
}

async fn status(ctx: &SyncContext) {
    let refresher = ctx.status_refresher("alerts", budget_alerts_key());
    let outcome = refresher.refresh().await;
    println!("{:?}", outcome);
    if let Some(payload) = ctx.store().get(refresher.key()) {
        println!("{}", serde_json::to_string_pretty(&payload).unwrap_or_default());
    }
}

async fn watch(ctx: &SyncContext, args: &[String]) -> Result<()> {
    let seconds: u64 = match args.first() {
        Some(n) => n.parse().with_context(|| format!("Invalid interval '{}'", n))?,
        None => 60,
    };
    let refresher = ctx.status_refresher("alerts", budget_alerts_key());
    let _sub = ctx
        .store()
        .subscribe(KeyFilter::exact(refresher.key()), |event| {
            println!("{:?} {}", event.kind, event.key);
        });
    refresher.run_polling(Duration::from_secs(seconds)).await;
    println!("Circuit open after {} failures", refresher.state().consecutive_failures);
    Ok(())
}

fn show_cache(ctx: &SyncContext) {
    let mut rows: Vec<(String, String)> = ResourceType::ALL
        .iter()
        .flat_map(|r| ctx.store().matching_keys(&KeyFilter::resource(*r)))
        .filter_map(|key| {
            let info = ctx.store().entry_info(&key)?;
            let age = if info.stale {
                format!("{} (stale)", info.age_display())
            } else {
                info.age_display()
            };
            Some((key.to_string(), age))
        })
        .collect();
    rows.sort();
    if rows.is_empty() {
        println!("Cache is empty");
    }
    for (key, age) in rows {
        println!("{:<60} {}", key, age);
    }
}
