use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use imageforge::{
    config::Config,
    handlers::{self, AppState},
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    init_tracing(&config)?;

    tokio::fs::create_dir_all(&config.image_dir)
        .await
        .with_context(|| format!("create image dir {}", config.image_dir.display()))?;
    tokio::fs::create_dir_all(&config.metadata_dir)
        .await
        .with_context(|| format!("create metadata dir {}", config.metadata_dir.display()))?;

    let state = Arc::new(AppState::from_config(&config)?);
    let router = handlers::router(state);

    let bind_address = config.bind_address();
    let tcp_listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("bind {bind_address}"))?;

    tracing::info!(
        address = %bind_address,
        image_dir = %config.image_dir.display(),
        metadata_dir = %config.metadata_dir.display(),
        pipeline = ?config.prompt_pipeline,
        ratelimit_default = %config.rate_limits.default_limit,
        ratelimit_generate = %config.rate_limits.generate_limit,
        ratelimit_improve = %config.rate_limits.improve_limit,
        ratelimit_strategy = %config.rate_limits.strategy,
        "imageforge started"
    );

    axum::serve(tcp_listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

fn init_tracing(config: &Config) -> Result<()> {
    let filter = EnvFilter::try_new(&config.log_level)
        .with_context(|| format!("invalid LOG_LEVEL: {}", config.log_level))?;
    match &config.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}
