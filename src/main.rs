//! Check-in agent - daily GitHub activity verification with on-chain recording

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};

use checkin_agent::{config::Args, db::MongoClient, logging, server};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    logging::init_logging(args.log_format, &args.log_level);

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  Check-in Agent");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("MongoDB: {} (db {})", args.mongodb_uri, args.mongodb_db);
    info!("GitHub API: {}", args.github.github_api_url);
    info!("Check-in day offset: UTC{}", args.checkin_utc_offset);
    info!(
        "Feed budget: {} page(s) x {} events, max {} events",
        args.feed_max_pages, args.feed_page_size, args.feed_max_events
    );
    match &args.chain.chain_rpc_url {
        Some(url) if args.chain_enabled() => info!("Chain RPC: {}", url),
        _ => info!("Chain RPC: disabled"),
    }
    info!("======================================");

    // MongoDB is optional in dev mode; fall back to in-memory stores
    let state = match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
        Ok(mongo) => {
            info!("MongoDB connected successfully");
            server::AppState::with_mongo(args, mongo).await?
        }
        Err(e) if args.dev_mode => {
            warn!("MongoDB connection failed (dev mode, using in-memory stores): {}", e);
            server::AppState::new(args)
        }
        Err(e) => {
            error!("MongoDB connection failed: {}", e);
            std::process::exit(1);
        }
    };

    server::run(Arc::new(state)).await?;

    Ok(())
}
