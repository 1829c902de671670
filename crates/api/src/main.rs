use anyhow::Context;

use prodreview_infra::ServiceConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    prodreview_observability::init();

    let config = ServiceConfig::from_env().context("invalid configuration")?;
    let app = prodreview_api::app::build_app(config.clone()).await?;

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(prodreview_api::shutdown::signal())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}
