use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::app::config::{EngineConfig, EngineKind};
use crate::app::state::AppState;
use crate::engine::remote::RemoteEngine;
use crate::engine::simulated::{SimulatedEngine, SimulatedOptions};
use crate::engine::TransferEngine;

// this runs at boot time
pub fn build_engine(config: &EngineConfig) -> Result<Arc<dyn TransferEngine>> {
    match config.kind {
        EngineKind::Simulated => {
            let options = SimulatedOptions {
                metadata_delay: Duration::from_millis(config.simulated.metadata_delay_ms),
                ready_delay: Duration::from_millis(config.simulated.ready_delay_ms),
                default_file_size: config.simulated.default_file_size,
            };
            Ok(Arc::new(SimulatedEngine::new(options)))
        }
        EngineKind::Remote => {
            let endpoint = config
                .endpoint
                .clone()
                .context("engine.endpoint is required for the remote engine")?;

            let engine = RemoteEngine::new(
                endpoint,
                Duration::from_secs(config.request_timeout),
                Duration::from_secs(config.poll_interval),
            )
            .context("Failed to create remote engine client")?;

            Ok(Arc::new(engine))
        }
    }
}

/// Log where integrations should point
pub fn log_endpoints(state: &AppState) {
    let base_url = state.base_url();

    info!(
        engine = state.sessions.engine().name(),
        base_url = %base_url,
        stremio_manifest = %format!("{}/stremio/manifest.json", base_url),
        mediafusion_resolve = %format!("{}/mediafusion/resolve", base_url),
        health = %format!("{}/health", base_url),
        auth_enabled = state.config.auth.token.is_some(),
        "Service endpoints"
    );
}
