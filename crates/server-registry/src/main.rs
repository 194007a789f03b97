//! Server registry binary

use server_registry::{
    ChannelQueue, Config, Dependencies, RegistryServer, SteamWebDirectory, TracingOptions,
    setup_tracing, store,
};
use server_probe::WebApiProbeClient;
use std::path::PathBuf;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let explicit_path = std::env::args_os().nth(1).map(PathBuf::from);

    // Load configuration first (needed for logging settings)
    let yaml_config = match Config::load(explicit_path.as_deref()) {
        Ok(cfg) => Some(cfg),
        Err(e) if explicit_path.is_some() => {
            let err = common::Error::config(e);
            eprintln!("{}", err);
            return Err(err.into());
        }
        Err(e) => {
            // Can't use tracing yet - not initialized
            eprintln!("Configuration error: {}", e);
            eprintln!("Using default configuration");
            None
        }
    };
    let config = yaml_config.unwrap_or_default();

    let options = TracingOptions {
        service_name: config.telemetry.service_name.clone(),
        otlp_endpoint: config.telemetry.otlp_endpoint.clone(),
        telemetry_enabled: config.telemetry.enabled,
        log_level: config
            .logging
            .level
            .clone()
            .unwrap_or_else(|| "info".to_string()),
        json: config.logging.json(),
    };
    let _telemetry_guard = setup_tracing(&options).await?;

    tracing::info!("Server registry starting");

    let pipeline = config.to_pipeline_config();

    let registry_store = store::open(&config.store)
        .map_err(|e| common::Error::startup(format!("registry store: {}", e)))?;

    let api_key = config.steam_api_key().ok_or_else(|| {
        common::Error::startup(format!(
            "no Steam Web API key configured (discovery.steam_api_key or {})",
            server_registry::config::API_KEY_ENV
        ))
    })?;

    let directory = SteamWebDirectory::new(
        config.discovery.api_base.clone(),
        api_key.clone(),
        config.discovery.limit,
        config.discovery.request_timeout,
    )
    .map_err(common::Error::startup)?;
    let probe_client = WebApiProbeClient::new(config.discovery.api_base.clone(), api_key)
        .map_err(common::Error::startup)?;

    let deps = Dependencies {
        store: registry_store,
        queue: Arc::new(ChannelQueue::new(pipeline.queue_capacity)),
        directory: Arc::new(directory),
        probe_client: Arc::new(probe_client),
    };

    if let Err(e) = RegistryServer::new(pipeline, deps).run().await {
        tracing::error!(error = %e, fatal = e.is_fatal(), "Server registry failed");
        return Err(e.into());
    }

    // Telemetry guard will flush spans on drop
    Ok(())
}
