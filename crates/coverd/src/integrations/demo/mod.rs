//! Demo platform
//!
//! Simulated covers and input booleans, configured statically. Gives the
//! engine real entities and services to work with without any hardware.

mod config;
mod cover;
mod input_boolean;

use std::collections::HashSet;
use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
pub use config::Config as DemoConfig;
pub use config::DemoCover;
pub use config::DemoInputBoolean;
pub use config::DEFAULT_SUPPORTED_FEATURES;
pub use cover::ATTR_CURRENT_POSITION;
pub use cover::ATTR_CURRENT_TILT_POSITION;
use cover::CoverCommand;
use cover::CoverService;
use input_boolean::InputBooleanAction;
use input_boolean::InputBooleanService;
use linkme::distributed_slice;
use tracing::info;

use crate::engine;
use crate::engine::Engine;
use crate::engine::Integration;
use crate::integrations::cover_tilt::COVER_DOMAIN;

#[distributed_slice(engine::INTEGRATION_REGISTRY)]
fn init_demo(ctx: &engine::IntegrationContext) -> engine::IntegrationFactoryResult {
    match &ctx.config.integrations.demo {
        Some(config) if !config.is_empty() => {
            Ok(Some(Box::new(DemoIntegration::new(config.clone()))))
        }
        _ => Ok(None),
    }
}

pub struct DemoIntegration {
    config: DemoConfig,
    engine: Option<Arc<Engine>>,
}

impl DemoIntegration {
    pub fn new(config: DemoConfig) -> Self {
        Self {
            config,
            engine: None,
        }
    }

    fn entity_ids(&self) -> impl Iterator<Item = &String> {
        self.config
            .covers
            .keys()
            .chain(self.config.input_booleans.keys())
    }
}

#[async_trait]
impl Integration for DemoIntegration {
    fn name(&self) -> &str {
        "demo"
    }

    fn provides_entities(&self) -> bool {
        true
    }

    async fn setup(&mut self, engine: Arc<Engine>) -> Result<(), Box<dyn Error + Send>> {
        for (entity_id, cover) in &self.config.covers {
            let (state, attributes) = cover::initial_state(entity_id, cover);
            engine.set_state(entity_id, state, attributes);
            info!("Demo cover discovered: {}", entity_id);
        }

        for (entity_id, input) in &self.config.input_booleans {
            let (state, attributes) = input_boolean::initial_state(entity_id, input);
            engine.set_state(entity_id, state, attributes);
            info!("Demo input_boolean discovered: {}", entity_id);
        }

        if !self.config.covers.is_empty() {
            let covers: Arc<HashSet<String>> =
                Arc::new(self.config.covers.keys().cloned().collect());
            for command in [CoverCommand::SetPosition, CoverCommand::SetTiltPosition] {
                engine.register_service(
                    COVER_DOMAIN,
                    command.service(),
                    Arc::new(CoverService::new(
                        Arc::downgrade(&engine),
                        covers.clone(),
                        command,
                    )),
                );
            }
        }

        if !self.config.input_booleans.is_empty() {
            let entities: Arc<HashSet<String>> =
                Arc::new(self.config.input_booleans.keys().cloned().collect());
            for action in InputBooleanAction::ALL {
                engine.register_service(
                    input_boolean::DOMAIN,
                    action.service(),
                    Arc::new(InputBooleanService::new(
                        Arc::downgrade(&engine),
                        entities.clone(),
                        action,
                    )),
                );
            }
        }

        self.engine = Some(engine);
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), Box<dyn Error + Send>> {
        info!("Demo integration shutting down");
        if let Some(engine) = self.engine.take() {
            for entity_id in self.entity_ids() {
                engine.remove_state(entity_id);
            }
        }
        Ok(())
    }
}
