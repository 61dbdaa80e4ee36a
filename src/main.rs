// src/main.rs
use actix_web::{App, HttpServer, middleware, web};
use detail_forge::config::Config;
use detail_forge::services::{MemoryStore, RedisService, RunStore, build_synthesizer};
use detail_forge::{AppState, routes};
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    info!("Starting detail-forge service...");

    let config = Config::from_env()?;

    // Initialize services
    let store: Arc<dyn RunStore> = match &config.redis_url {
        Some(url) => Arc::new(RedisService::new(url, config.run_ttl_secs).await?),
        None => {
            warn!("REDIS_URL not set, runs are kept in memory only");
            Arc::new(MemoryStore::with_ttl(Duration::from_secs(config.run_ttl_secs)))
        }
    };
    let synthesizer = build_synthesizer(&config)?;
    let app_state = AppState::new(&config, store, synthesizer);
    let json_limit = config.max_body_bytes;

    info!("Starting HTTP server on {}", config.bind_addr);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::JsonConfig::default().limit(json_limit))
            .wrap(middleware::Logger::default())
            .configure(routes)
    })
    .bind(&config.bind_addr)?
    .run()
    .await?;

    Ok(())
}
