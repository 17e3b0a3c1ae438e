mod config;
mod handlers;
mod models;
mod services;

use anyhow::Result;
use dotenv::dotenv;
use std::sync::Arc;

use config::AppConfig;
use handlers::{create_router, AppState, ReminderSweeper};
use services::{Database, ExtractionPipeline, GeminiClient, GenerativeBackend, OpenFoodFactsClient};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    dotenv().ok();

    log::info!("🚀 Starting food scanner backend...");

    let config = AppConfig::from_env();

    let gemini: Option<Arc<dyn GenerativeBackend>> = config
        .gemini_api_key
        .clone()
        .map(|key| Arc::new(GeminiClient::new(key)) as Arc<dyn GenerativeBackend>);

    let pipeline = gemini.clone().map(|backend| {
        Arc::new(ExtractionPipeline::new(
            backend,
            config.image_models.clone(),
            config.text_models.clone(),
            config.attempt_timeout,
        ))
    });
    if pipeline.is_some() {
        log::info!(
            "✅ Extraction pipeline ready ({} image / {} text candidates, {:?} per attempt)",
            config.image_models.len(),
            config.text_models.len(),
            config.attempt_timeout
        );
    }

    let off = Arc::new(OpenFoodFactsClient::new());
    log::info!("✅ OpenFoodFacts client ready");

    let db = match &config.database_url {
        Some(url) => {
            let db = Arc::new(Database::new(url).await?);
            log::info!("✅ PostgreSQL database initialized");
            Some(db)
        }
        None => None,
    };

    let mut sweeper = match &db {
        Some(db) => {
            let mut sweeper = ReminderSweeper::new(db.clone()).await?;
            sweeper.start().await?;
            Some(sweeper)
        }
        None => None,
    };

    let state = AppState {
        pipeline,
        gemini,
        off,
        db,
        plan_model: config.plan_model.clone(),
    };

    let app = create_router(state);
    let addr = format!("{}:{}", config.host, config.port);
    log::info!("🌐 Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            log::info!("🛑 Shutting down...");
        })
        .await?;

    if let Some(sweeper) = sweeper.as_mut() {
        sweeper.stop().await?;
    }

    Ok(())
}
