//! Almanac - community release-date forecasting engine

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use almanac::{
    cache::{spawn_cache_cleanup_task, TtlCache},
    config::Args,
    db::{MemoryStore, MongoClient, MongoSubmissionStore},
    engine::{spawn_drain_task, SubmissionEngine},
    store::SubmissionStore,
    verify::AllowAll,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    // Parse command line arguments
    let args = Args::parse();

    // Initialize tracing/logging
    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("almanac={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Validate configuration
    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    // Print startup banner
    info!("======================================");
    info!("  Almanac - Community Date Forecast");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!(
        "Build: {} ({})",
        env!("GIT_COMMIT_SHORT"),
        env!("BUILD_TIMESTAMP")
    );
    info!(
        "Mode: {}",
        if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" }
    );
    info!("MongoDB: {}", args.mongodb_uri);
    info!("Daily limit: {}", args.daily_limit);
    info!(
        "Release window: {} .. {}",
        args.window_start, args.window_end
    );
    info!("Drain sweep: every {}s", args.drain_interval_secs);
    info!("======================================");

    // Connect to MongoDB (in-memory fallback in dev mode)
    let store = connect_store(&args).await;

    // Shared cache store with its cleanup sweep
    let cache = Arc::new(TtlCache::new());
    spawn_cache_cleanup_task(Arc::clone(&cache), args.cache_cleanup_interval());

    // This process only drains the queue; the bot check already ran when
    // each item was accepted for queuing
    let verifier = Arc::new(AllowAll);

    let engine = Arc::new(SubmissionEngine::new(
        store,
        cache,
        verifier,
        args.weight_policy(),
        args.daily_limit,
        args.stats_config(),
        args.engine_config(),
    ));

    let _drain_handle = spawn_drain_task(Arc::clone(&engine), args.drain_interval());

    let report = engine.read_capacity();
    info!(
        level = report.level.as_str(),
        requests_today = report.requests_today,
        "Almanac engine ready"
    );

    // Run until interrupted
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, attempting a final drain");
    match engine.drain_queue().await {
        Ok(report) => info!(
            committed = report.committed,
            discarded = report.discarded,
            requeued = report.requeued,
            "Final drain completed"
        ),
        Err(e) => warn!("Final drain failed: {}", e),
    }
    info!("Almanac stopped");

    Ok(())
}

/// Open the durable store, falling back to memory in dev mode
async fn connect_store(args: &Args) -> Arc<dyn SubmissionStore> {
    match open_mongo(args).await {
        Ok(store) => {
            info!("MongoDB connected successfully");
            Arc::new(store)
        }
        Err(e) => {
            if args.dev_mode {
                warn!(
                    "MongoDB connection failed (dev mode, using in-memory store): {}",
                    e
                );
                Arc::new(MemoryStore::new())
            } else {
                error!("MongoDB connection failed: {}", e);
                std::process::exit(1);
            }
        }
    }
}

async fn open_mongo(args: &Args) -> almanac::Result<MongoSubmissionStore> {
    let client = MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await?;
    MongoSubmissionStore::new(&client).await
}
