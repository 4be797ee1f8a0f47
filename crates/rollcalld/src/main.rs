use anyhow::Result;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod http;
mod pipeline;

use config::Config;
use http::AppState;
use pipeline::Pipeline;
use rollcall_core::OrtEmbedder;
use rollcall_store::Store;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    tracing::info!(
        db = %config.db_path.display(),
        model = %config.model_path.display(),
        threshold = config.similarity_threshold,
        "rollcalld starting"
    );

    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let store = Store::open(config.db_path.clone()).await?;

    // Fail fast: a daemon without its model is useless.
    let embedder = OrtEmbedder::load(&config.model_path.to_string_lossy())?;
    let engine = engine::spawn_engine(embedder);

    let pipeline = Pipeline::new(store, engine, config.similarity_threshold);
    let state = Arc::new(AppState {
        pipeline,
        version: env!("CARGO_PKG_VERSION").to_string(),
        db_path: config.db_path.display().to_string(),
        frame_stride: config.frame_stride,
    });

    let app = http::create_router(state);
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "rollcalld ready");
    axum::serve(listener, app).await?;

    Ok(())
}
