use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use spotprice_collector::{
    config::Config,
    db::{Db, PriceStore},
    electricity::ElprisClient,
    ingest::Ingestor,
    normalize::Normalizer,
    scheduler::{Job, Scheduler},
};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let db = Db::init_db(&config.db_path).await?;
    info!("Database initialized at {}", config.db_path);
    let store: Arc<dyn PriceStore> = Arc::new(db);

    let client = ElprisClient::new(&config.api_base_url, config.request_timeout)
        .context("failed to build HTTP client")?;
    let ingestor = Arc::new(Ingestor::new(
        Arc::new(client),
        store.clone(),
        Normalizer::new(config.timezone, config.tariffs.clone()),
        config.regions.clone(),
    ));
    let scheduler = Scheduler::new(ingestor, store, &config);

    if config.fetch_on_startup {
        info!("Fetching today's and tomorrow's prices on startup");
        // tomorrow's absence before publication is logged as informational
        if let Err(e) = scheduler.run(Job::Backup).await {
            warn!("Startup fetch failed: {e:#}");
        }
    }

    let jobs = scheduler.spawn(&config);
    info!("Background scheduler started with {} jobs", jobs.len());

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    for job in jobs {
        job.abort();
    }

    Ok(())
}
