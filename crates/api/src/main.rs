use std::sync::Arc;

use anyhow::Context;

use kestrel_infra::{AppConfig, Services};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().context("invalid KESTREL_* configuration")?;
    kestrel_observability::init(config.log_format);

    let services = Arc::new(Services::in_memory());
    let app = kestrel_api::app::build_app(&config, services);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app).await?;
    Ok(())
}
