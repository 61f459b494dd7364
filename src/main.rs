//! Taskflow server binary.

use taskflow::{api, Config};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("taskflow=info,tower_http=info")),
        )
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        addr = %config.bind_addr(),
        dev_mode = config.dev_mode,
        persistent = config.data_path.is_some(),
        "starting taskflow"
    );

    api::serve(config).await
}
