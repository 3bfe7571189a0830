pub mod ai_config;
pub mod api;
pub mod config;
pub mod core_state;
pub mod db;
pub mod generation;
pub mod jobs;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crate::ai_config::FileConfigProvider;
use crate::core_state::CoreState;
use crate::generation::audit::TracingLogSink;
use crate::generation::invoker::UnwiredInvoker;
use crate::jobs::store::{JobStoreError, SqliteStore};

/// Failures that prevent the service from starting.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Job store: {0}")]
    Store(#[from] JobStoreError),
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
}

pub fn run() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build async runtime");
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(serve()) {
        tracing::error!(error = %e, "Startup failed");
        std::process::exit(1);
    }
}

async fn serve() -> Result<(), StartupError> {
    let db_path = config::database_path();
    let store = SqliteStore::open(&db_path)?;
    tracing::info!(path = %db_path.display(), "Job store opened");

    let settings = config::ai_settings_path();
    tracing::info!(path = %settings.display(), "AI settings source");

    let core = Arc::new(CoreState::new(
        Arc::new(store),
        Arc::new(FileConfigProvider::new(settings)),
        Arc::new(UnwiredInvoker),
        Arc::new(TracingLogSink),
    ));

    let server = api::start_api_server(core, config::bind_addr()).await?;
    tracing::info!(addr = %server.session.server_addr, "Listening");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Ctrl-C received, shutting down");
    server.stop().await;
    Ok(())
}
