// libs/appointplan-cell/src/state.rs
use std::sync::Arc;

use tracing::{info, warn};

use shared_config::AppConfig;
use shared_database::BitrixClient;

use crate::services::batch::BatchTransport;
use crate::services::mappings::StoreMappings;

/// Shared, read-only state behind every planning request.
pub struct AppointplanState {
    pub config: Arc<AppConfig>,
    pub mappings: Arc<StoreMappings>,
    pub transport: Arc<dyn BatchTransport>,
}

impl AppointplanState {
    pub fn new(
        config: Arc<AppConfig>,
        mappings: StoreMappings,
        transport: Arc<dyn BatchTransport>,
    ) -> Self {
        Self {
            config,
            mappings: Arc::new(mappings),
            transport,
        }
    }

    /// Connect to the configured store and load its mappings once.
    ///
    /// A failed load leaves the service running with empty mappings.
    pub async fn bootstrap(config: AppConfig) -> Self {
        let config = Arc::new(config);
        let transport: Arc<dyn BatchTransport> = Arc::new(BitrixClient::new(&config));

        let mappings = if config.is_configured() {
            match StoreMappings::load(transport.as_ref(), &config).await {
                Ok(mappings) => mappings,
                Err(e) => {
                    warn!("Failed to load store mappings, continuing without them: {}", e);
                    StoreMappings::default()
                }
            }
        } else {
            warn!("Remote store not configured, skipping mappings load");
            StoreMappings::default()
        };

        info!("Appointment planner state ready");
        Self::new(config, mappings, transport)
    }
}
