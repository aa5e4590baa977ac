use anyhow::Context;

use kedai_infra::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    kedai_observability::init();

    let config = AppConfig::load().context("loading configuration")?;
    let addr = config.http_addr.clone();

    let app = kedai_api::app::build_app(config).await.context("starting services")?;

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
