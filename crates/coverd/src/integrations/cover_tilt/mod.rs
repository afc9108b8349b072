//! Cover tilt integration
//!
//! Watches a height control and a tilt control (both on/off entities) and
//! commands the position and tilt of a target cover whenever either changes.

mod adapter;
mod config;
pub mod features;

use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
pub use adapter::Branch;
pub use adapter::BranchOutcome;
pub use adapter::ControlAdapter;
pub use adapter::InputChangeOutcome;
pub use adapter::SkipReason;
pub use adapter::Toggle;
pub use adapter::COVER_DOMAIN;
pub use adapter::POSITION_OFF;
pub use adapter::POSITION_ON;
pub use adapter::SERVICE_SET_POSITION;
pub use adapter::SERVICE_SET_TILT_POSITION;
pub use config::Config as CoverTiltConfig;
use linkme::distributed_slice;
use tracing::debug;
use tracing::info;

use crate::engine;
use crate::engine::Engine;
use crate::engine::Integration;
use crate::engine::Subscription;

#[distributed_slice(engine::INTEGRATION_REGISTRY)]
fn init_cover_tilt(ctx: &engine::IntegrationContext) -> engine::IntegrationFactoryResult {
    let Some(config) = &ctx.config.integrations.cover_tilt else {
        return Ok(None);
    };

    Ok(Some(Box::new(CoverTiltIntegration::new(config.clone()))))
}

/// Owns the adapter and its subscription for the lifetime of the integration.
pub struct CoverTiltIntegration {
    config: CoverTiltConfig,
    adapter: Option<Arc<ControlAdapter>>,
    subscription: Option<Subscription>,
}

impl CoverTiltIntegration {
    pub fn new(config: CoverTiltConfig) -> Self {
        Self {
            config,
            adapter: None,
            subscription: None,
        }
    }

    /// The running adapter, once set up.
    pub fn adapter(&self) -> Option<&Arc<ControlAdapter>> {
        self.adapter.as_ref()
    }
}

#[async_trait]
impl Integration for CoverTiltIntegration {
    fn name(&self) -> &str {
        "cover_tilt"
    }

    async fn setup(&mut self, engine: Arc<Engine>) -> Result<(), Box<dyn Error + Send>> {
        let adapter = Arc::new(ControlAdapter::new(
            self.config.clone(),
            engine.clone(),
            engine.clone(),
        ));

        // Process whatever the controls currently say, on the delivery task
        // so that changes arriving meanwhile are handled after it
        let tracked = adapter.tracked_entity_ids();
        let subscription = engine
            .track_state_change_and_sync(tracked.clone(), adapter.clone())
            .await;
        debug!("Listeners registered for {:?}", tracked);

        self.adapter = Some(adapter);
        self.subscription = Some(subscription);

        info!(
            "Cover tilt integration set up for target {}",
            self.config.target_cover_entity_id
        );
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), Box<dyn Error + Send>> {
        info!("Cover tilt integration shutting down");
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        self.adapter = None;
        Ok(())
    }
}
