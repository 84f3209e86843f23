//! realmd - realm server
//!
//! Main server binary

use anyhow::Context;
use realmd_config::RealmConfig;
use realmd_network::{build_registry, Dispatcher, RealmServer, ServerContext};
use realmd_world::{JsonFilePersistence, NoopHooks, Persistence, World};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Configuration first: it carries the fallback log filter
    let (config, load_error) = match RealmConfig::load_default() {
        Ok(config) => (config, None),
        Err(e) => (RealmConfig::default(), Some(e)),
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🚀 realmd {} starting up...", env!("CARGO_PKG_VERSION"));
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    if let Some(e) = load_error {
        warn!("⚠️  Failed to load {}: {}", realmd_config::DEFAULT_CONFIG_PATH, e);
        warn!("   Using default configuration (port 10300)");
    }
    config.validate().context("invalid configuration")?;
    config.display();

    let config = Arc::new(config);
    let world = Arc::new(World::from_config(&config, Arc::new(NoopHooks)).context("cannot build the world")?);
    let persistence: Arc<dyn Persistence> = Arc::new(
        JsonFilePersistence::open(&config.store_path)
            .with_context(|| format!("cannot open store {}", config.store_path.display()))?,
    );

    let registry = build_registry().context("handler table is inconsistent")?;
    let dispatcher = Arc::new(Dispatcher::new(registry, config.max_bad_packets));
    let ctx = ServerContext::new(Arc::clone(&config), Arc::clone(&world), persistence);

    let schedulers = world.spawn_schedulers(config.scheduler_tick);
    info!("✓ {} region schedulers running", schedulers.len());

    let server = RealmServer::bind(ctx, dispatcher).await?;
    info!("🎮 Server is ready to accept connections!");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let result = server.run().await;

    for handle in schedulers {
        handle.abort();
    }

    if let Err(e) = result {
        error!("💥 Server error: {}", e);
        return Err(e.into());
    }

    info!("👋 Server shutdown complete");
    Ok(())
}
