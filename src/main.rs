//! sync-cache-replay - feed recorded traffic through the sync cache
//!
//! Reads NDJSON from a file or stdin. Each line is either a change event or
//! a query result (anything carrying `items`). Lines go through the async
//! driver exactly as live traffic would; afterwards the requested lists and
//! the engine stats are printed to stdout as JSON. Logs go to stderr.

use anyhow::Context;
use clap::Parser;
use serde_json::json;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sync_cache_core::{
    spawn_engine_task, EngineHandle, InboundMessage, ListKey, ReplayArgs, SyncEngine,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = ReplayArgs::parse();

    // Initialize tracing/logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("sync_cache_core={},info", args.log_level).into());
    let (plain, structured) = if args.log_json {
        (None, Some(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr)))
    } else {
        (Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)), None)
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(structured)
        .init();

    let config = args.engine_config().context("invalid engine configuration")?;

    info!("======================================");
    info!("  sync-cache-replay");
    info!("======================================");
    info!(
        "Streaming buffers: max {} entries, {} ms TTL",
        config.max_streaming_entries, config.streaming_ttl_ms
    );
    match &args.input {
        Some(path) => info!("Input: {}", path.display()),
        None => info!("Input: stdin"),
    }

    let handle = EngineHandle::new(SyncEngine::new(config)?);
    let (inbound_tx, inbound_rx) = mpsc::channel(1024);
    let (_shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
    let engine_task = spawn_engine_task(handle.clone(), inbound_rx, shutdown_rx);

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match &args.input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("opening {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    let mut lines = reader.lines();
    let mut line_no = 0usize;
    let mut skipped = 0usize;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match InboundMessage::from_json(line) {
            Ok(message) => inbound_tx
                .send(message)
                .await
                .context("engine task stopped early")?,
            Err(e) => {
                skipped += 1;
                warn!(line = line_no, error = %e, "Skipping undecodable line");
            }
        }
    }

    // Closing the channel lets the task drain what is queued and exit
    drop(inbound_tx);
    engine_task.await.context("engine task panicked")?;

    let mut lists = serde_json::Map::new();
    for raw in &args.lists {
        let key = ListKey::new(raw.as_str());
        let entities = handle.resolve_entities(&key).await;
        lists.insert(raw.clone(), serde_json::to_value(entities)?);
    }

    let stats = handle.stats().await;
    info!(
        lines = line_no,
        skipped,
        entities = stats.entities,
        lists = stats.lists,
        "Replay complete"
    );

    let snapshot = json!({
        "lists": lists,
        "stats": stats,
        "skippedLines": skipped,
    });
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    Ok(())
}
