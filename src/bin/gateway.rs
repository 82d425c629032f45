//! Movies gateway server
//!
//! Serves `POST /graphql` (and the Playground on `GET /graphql`) plus
//! `/health` and `/ready`. Configuration comes from the environment, see
//! [`GatewayConfig`].

use anyhow::Context;
use movies_gateway::{GatewayBuilder, GatewayConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = GatewayConfig::from_env().context("invalid gateway configuration")?;
    tracing::info!(
        upstream = %config.upstream_base_url,
        cache_ttl_secs = config.cache_ttl.as_secs(),
        "Starting movies gateway"
    );

    let gateway = GatewayBuilder::from_config(&config)
        .build()
        .context("failed to build gateway")?;

    gateway
        .serve(config.listen_addr.to_string())
        .await
        .context("gateway server failed")?;

    Ok(())
}
