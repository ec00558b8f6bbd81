//! Recommender Service - course and activity recommendations
//!
//! Port: 8090 (configurable)

use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Context;
use learning_gateway_recommender::{
    cache::{RecommendationStore, RedisStore},
    config::CacheBackend,
    server, CatalogSource, InMemoryProfiles, InMemoryStore, MoodleClient, PostgresInterestStore,
    ProfileSource, RecommendationEngine, RecommenderConfig,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let config = RecommenderConfig::load().context("Failed to load configuration")?;
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    info!("Starting Recommender Service on {}", bind_addr);

    let moodle = MoodleClient::new(&config.collaborators)?;
    match moodle.test_connection().await {
        Ok(site) => info!(site = %site, "Connected to Moodle"),
        Err(e) => warn!(error = %e, "Moodle not reachable at startup, continuing"),
    }
    let catalog: Arc<dyn CatalogSource> = Arc::new(moodle);

    let profiles: Arc<dyn ProfileSource> = if config.database.url.is_empty() {
        warn!("No interest store configured, interest profiles will be empty");
        Arc::new(InMemoryProfiles::new())
    } else {
        Arc::new(PostgresInterestStore::connect(&config.database).await?)
    };

    let store: Arc<dyn RecommendationStore> = match config.cache.backend {
        CacheBackend::Redis => match RedisStore::new(&config.cache.redis_url).await {
            Ok(redis) => Arc::new(redis),
            Err(e) => {
                warn!(error = %e, "Redis unavailable, falling back to in-memory cache");
                Arc::new(InMemoryStore::new())
            }
        },
        CacheBackend::Memory => Arc::new(InMemoryStore::new()),
    };

    let workers = config.server.workers.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    });

    let engine = Arc::new(RecommendationEngine::with_store(
        catalog, profiles, config, store,
    ));
    let app_state = web::Data::new(server::AppState::new(engine));

    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .configure(server::configure_routes)
            .wrap(Logger::default())
    })
    .workers(workers)
    .bind(&bind_addr)?
    .run()
    .await?;

    Ok(())
}
