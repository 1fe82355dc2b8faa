use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use metadata_catalog::config::Config;
use metadata_catalog::events::LoggingEventPublisher;
use metadata_catalog::permissions::AlwaysAllow;
use sqlx::postgres::PgPoolOptions;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    init_tracing(&config.log_level, &config.log_format);

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url())
        .await
        .context("connecting to the metadata database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("running database migrations")?;

    let router = metadata_catalog::build_router(pool, Arc::new(LoggingEventPublisher), Arc::new(AlwaysAllow), &config)?;

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, "metadata catalog listening");
    axum::serve(listener, router)
        .await
        .context("serving metadata catalog")?;

    Ok(())
}

fn init_tracing(log_level: &str, log_format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if log_format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}
