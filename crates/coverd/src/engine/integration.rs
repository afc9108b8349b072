use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use linkme::distributed_slice;

use super::engine::Engine;
use crate::config::Config;

/// Result type for integration factory functions
pub type IntegrationFactoryResult = anyhow::Result<Option<Box<dyn Integration>>>;

pub struct IntegrationContext<'a> {
    pub config: &'a Config,
}

#[distributed_slice]
pub static REGISTRY: [fn(&IntegrationContext) -> IntegrationFactoryResult];

/// Integration trait that all integrations must implement
#[async_trait]
pub trait Integration: Send + Sync {
    /// Get the name/identifier of this integration
    fn name(&self) -> &str;

    /// Whether this integration creates entities or services that other
    /// integrations read during their own setup.
    ///
    /// Providers are set up before everything else.
    fn provides_entities(&self) -> bool {
        false
    }

    /// Set up the integration - publish entities, register services,
    /// subscribe to state changes, etc.
    async fn setup(&mut self, engine: Arc<Engine>) -> Result<(), Box<dyn Error + Send>>;

    /// Shut down the integration gracefully
    async fn shutdown(&mut self) -> Result<(), Box<dyn Error + Send>>;
}
