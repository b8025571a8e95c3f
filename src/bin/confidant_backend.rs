use anyhow::{Context, Result};
use confidant::config::AppConfig;
use confidant::runtime::BackendRuntime;
use confidant::server::serve_backend;
use flume::unbounded;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,confidant=debug")),
        )
        .init();

    let config = AppConfig::load();
    let (events_tx, events_rx) = unbounded();
    let runtime = BackendRuntime::bootstrap(config, events_tx)
        .context("failed to bootstrap backend runtime")?;

    tracing::info!(
        "Starting confidant backend (LLM at {}, binding {})",
        runtime.config.llm_api_url,
        runtime.config.bind_addr
    );

    let server_rt = tokio::runtime::Runtime::new().context("failed to start server runtime")?;
    server_rt.block_on(serve_backend(runtime, events_rx))
}
