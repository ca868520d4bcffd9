use anyhow::Context;
use integration::{AppConfig, Application};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mut config = match std::env::var("SITE_ARCHIVER_CONFIG") {
        Ok(path) => AppConfig::from_file(&path).with_context(|| format!("loading configuration from {}", path))?,
        Err(_) => AppConfig::default(),
    };
    config.apply_env().context("applying environment overrides")?;

    let app = Application::new(config).await?;
    app.start().await?;

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;

    app.shutdown().await?;
    Ok(())
}
