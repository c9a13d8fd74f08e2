use anyhow::{anyhow, Context, Result};
use gridiron_stats::api::{self, AppState};
use gridiron_stats::cache::{CacheCoordinator, CacheStore, MemoryCache, RedisCache};
use gridiron_stats::config::Config;
use gridiron_stats::coordinator::FetchCoordinator;
use gridiron_stats::resolver::EntityResolver;
use gridiron_stats::store::Queries;
use gridiron_stats::sync::IngestionService;
use gridiron_stats::upstream::ProviderClient;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

async fn connect_db_with_retry(url: &str, max_retries: u32) -> Result<PgPool> {
    let mut attempt = 0;
    loop {
        match PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(10))
            .connect(url)
            .await
        {
            Ok(pool) => {
                info!("Connected to PostgreSQL");
                return Ok(pool);
            }
            Err(e) => {
                attempt += 1;
                if attempt >= max_retries {
                    return Err(anyhow!(
                        "Failed to connect to database after {} attempts: {}",
                        max_retries,
                        e
                    ));
                }
                warn!("Database connection attempt {} failed: {}. Retrying...", attempt, e);
                tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("gridiron_stats=info".parse().expect("valid directive")),
        )
        .init();

    info!("GridIron Stats API starting");

    let config = Config::from_env()?;

    let pool = connect_db_with_retry(&config.database_url, 5).await?;

    let cache_store: Arc<dyn CacheStore> = match &config.redis_url {
        Some(url) => Arc::new(RedisCache::connect_with_retry(url, 5).await?),
        None => {
            warn!("REDIS_URL not set; using in-process cache");
            Arc::new(MemoryCache::new())
        }
    };
    let cache = CacheCoordinator::new(cache_store);

    let store = Queries::new(pool.clone());
    let resolver = EntityResolver::new(pool);
    let client = ProviderClient::new(config.provider_base_url.clone())?;
    let ingestion = IngestionService::new(client, store.clone(), resolver);
    let coordinator = Arc::new(FetchCoordinator::new(ingestion, cache.clone()));

    let app = api::router(AppState {
        store,
        cache,
        coordinator,
    });

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context(format!("failed to bind {}", addr))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down...");
        })
        .await?;

    Ok(())
}
