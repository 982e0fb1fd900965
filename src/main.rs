mod assets;
mod config_manager;
mod error;
mod handlers;
mod routes;
mod state;
mod translate;

use anyhow::{Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use assets::{ensure_assets, logging_progress, Provisioned};
use config_manager::Config;
use state::AppState;
use translate::LanguageRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("translation_backend=debug,tower_http=debug")),
        )
        .init();

    let (config, loaded_from) = Config::discover().context("failed to load configuration")?;
    match &loaded_from {
        Some(path) => info!("Loaded configuration from: {}", path.display()),
        None => warn!(
            "No configuration file found (tried {:?}), using defaults",
            Config::candidate_paths()
        ),
    }

    // Models must be on disk before the server accepts requests.
    let extract_path = config.assets.extract_path.clone();
    let mut progress = logging_progress(format!("Downloading {}", config.assets.blob_name));
    match ensure_assets(&config.assets, &extract_path, &mut progress)
        .await
        .context("failed to provision model assets")?
    {
        Provisioned::AlreadyPresent => {}
        Provisioned::Downloaded { bytes } => {
            info!("Fetched {} bytes of model weights", bytes)
        }
    }

    let models = config.models.clone();
    let registry = tokio::task::spawn_blocking(move || LanguageRegistry::load(&models, &extract_path))
        .await
        .context("model loading task failed")?
        .map_err(|(language, err)| {
            anyhow::Error::new(err).context(format!("failed to load the {language} model"))
        })?;
    info!("Serving {} languages: {:?}", registry.len(), registry.languages());

    let app_state = AppState::new(registry, config.models.max_input_chars);
    let app = routes::app(app_state, &config.server.api_prefix);

    let addr = config.server.socket_addr()?;
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
