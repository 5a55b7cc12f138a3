//! Curio API - read-only HTTP service over the indexer's projections.

use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("curio_api=info,tower_http=info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    curio_api::server::run_from_env().await
}
