use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Weak;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use super::config::DemoCover;
use crate::engine::Attributes;
use crate::engine::Engine;
use crate::engine::ServiceCall;
use crate::engine::ServiceError;
use crate::engine::ServiceHandler;
use crate::engine::StateReader;
use crate::integrations::cover_tilt::features::supported_features;
use crate::integrations::cover_tilt::features::SET_POSITION;
use crate::integrations::cover_tilt::features::SET_TILT_POSITION;
use crate::integrations::cover_tilt::SERVICE_SET_POSITION;
use crate::integrations::cover_tilt::SERVICE_SET_TILT_POSITION;

pub const ATTR_CURRENT_POSITION: &str = "current_position";
pub const ATTR_CURRENT_TILT_POSITION: &str = "current_tilt_position";

/// Initial state and attributes of a demo cover.
pub fn initial_state(entity_id: &str, cover: &DemoCover) -> (String, Attributes) {
    let mut attributes = Attributes::new();
    attributes.insert(
        "friendly_name".to_string(),
        json!(cover.name.clone().unwrap_or_else(|| entity_id.to_string())),
    );
    attributes.insert("supported_features".to_string(), json!(cover.supported_features));
    attributes.insert(ATTR_CURRENT_POSITION.to_string(), json!(cover.position));
    attributes.insert(ATTR_CURRENT_TILT_POSITION.to_string(), json!(cover.tilt_position));
    (open_or_closed(cover.position), attributes)
}

fn open_or_closed(position: u8) -> String {
    let state = if position > 0 { "open" } else { "closed" };
    state.to_string()
}

/// Which cover command a handler implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverCommand {
    SetPosition,
    SetTiltPosition,
}

impl CoverCommand {
    pub fn service(self) -> &'static str {
        match self {
            CoverCommand::SetPosition => SERVICE_SET_POSITION,
            CoverCommand::SetTiltPosition => SERVICE_SET_TILT_POSITION,
        }
    }

    fn data_key(self) -> &'static str {
        match self {
            CoverCommand::SetPosition => "position",
            CoverCommand::SetTiltPosition => "tilt_position",
        }
    }

    fn attribute(self) -> &'static str {
        match self {
            CoverCommand::SetPosition => ATTR_CURRENT_POSITION,
            CoverCommand::SetTiltPosition => ATTR_CURRENT_TILT_POSITION,
        }
    }

    fn feature(self) -> u64 {
        match self {
            CoverCommand::SetPosition => SET_POSITION,
            CoverCommand::SetTiltPosition => SET_TILT_POSITION,
        }
    }
}

/// Service handler that moves simulated covers.
///
/// The engine is held weakly: the engine owns its service handlers.
pub struct CoverService {
    engine: Weak<Engine>,
    covers: Arc<HashSet<String>>,
    command: CoverCommand,
}

impl CoverService {
    pub fn new(engine: Weak<Engine>, covers: Arc<HashSet<String>>, command: CoverCommand) -> Self {
        Self {
            engine,
            covers,
            command,
        }
    }
}

#[async_trait]
impl ServiceHandler for CoverService {
    async fn handle(&self, call: ServiceCall) -> Result<(), ServiceError> {
        let entity_id = call
            .entity_id()
            .ok_or_else(|| ServiceError::Failed("entity_id is required".to_string()))?;
        if !self.covers.contains(entity_id) {
            return Err(ServiceError::Failed(format!(
                "{} is not a demo cover",
                entity_id
            )));
        }

        let engine = self
            .engine
            .upgrade()
            .ok_or_else(|| ServiceError::Failed("engine is shutting down".to_string()))?;
        let current = engine
            .get_state(entity_id)
            .ok_or_else(|| ServiceError::Failed(format!("{} has no state", entity_id)))?;

        if supported_features(&current.attributes) & self.command.feature() == 0 {
            return Err(ServiceError::Failed(format!(
                "{} does not support {}",
                entity_id,
                self.command.service()
            )));
        }

        let key = self.command.data_key();
        let value = call
            .data
            .get(key)
            .and_then(|v| v.as_f64())
            .filter(|v| (0.0..=100.0).contains(v))
            .ok_or_else(|| {
                ServiceError::Failed(format!("{} must be a number between 0 and 100", key))
            })?;
        let value = value.round() as u8;

        let mut attributes = current.attributes.clone();
        attributes.insert(self.command.attribute().to_string(), json!(value));
        let position = attributes
            .get(ATTR_CURRENT_POSITION)
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let state = open_or_closed(position.min(100) as u8);

        info!("Demo cover {} {} -> {}", entity_id, key, value);
        engine.set_state(entity_id, state, attributes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup(cover: DemoCover) -> (Arc<Engine>, CoverService, CoverService) {
        let engine = Arc::new(Engine::new());
        let (state, attributes) = initial_state("cover.demo", &cover);
        engine.set_state("cover.demo", state, attributes);

        let covers = Arc::new(HashSet::from(["cover.demo".to_string()]));
        let position = CoverService::new(
            Arc::downgrade(&engine),
            covers.clone(),
            CoverCommand::SetPosition,
        );
        let tilt = CoverService::new(Arc::downgrade(&engine), covers, CoverCommand::SetTiltPosition);
        (engine, position, tilt)
    }

    fn call(service: &str, data: serde_json::Value) -> ServiceCall {
        ServiceCall {
            domain: "cover".to_string(),
            service: service.to_string(),
            data,
        }
    }

    #[test]
    fn test_initial_state() {
        let (state, attributes) = initial_state(
            "cover.demo",
            &DemoCover {
                name: Some("Demo".to_string()),
                position: 30,
                ..DemoCover::default()
            },
        );
        assert_eq!(state, "open");
        assert_eq!(attributes["friendly_name"], json!("Demo"));
        assert_eq!(attributes["supported_features"], json!(255));
        assert_eq!(attributes[ATTR_CURRENT_POSITION], json!(30));

        let (state, attributes) = initial_state("cover.demo", &DemoCover::default());
        assert_eq!(state, "closed");
        assert_eq!(attributes["friendly_name"], json!("cover.demo"));
    }

    #[tokio::test]
    async fn test_set_position_updates_state() {
        let (engine, position, tilt) = setup(DemoCover::default());

        position
            .handle(call("set_position", json!({"entity_id": "cover.demo", "position": 90.0})))
            .await
            .unwrap();
        tilt.handle(call(
            "set_tilt_position",
            json!({"entity_id": "cover.demo", "tilt_position": 80.0}),
        ))
        .await
        .unwrap();

        let state = engine.get_state("cover.demo").unwrap();
        assert_eq!(state.state, "open");
        assert_eq!(state.attributes[ATTR_CURRENT_POSITION], json!(90));
        assert_eq!(state.attributes[ATTR_CURRENT_TILT_POSITION], json!(80));

        position
            .handle(call("set_position", json!({"entity_id": "cover.demo", "position": 0})))
            .await
            .unwrap();
        assert_eq!(engine.get_state("cover.demo").unwrap().state, "closed");
    }

    #[tokio::test]
    async fn test_rejects_unadvertised_feature() {
        let (engine, _position, tilt) = setup(DemoCover {
            supported_features: SET_POSITION as u32,
            ..DemoCover::default()
        });

        let err = tilt
            .handle(call(
                "set_tilt_position",
                json!({"entity_id": "cover.demo", "tilt_position": 50}),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Failed(msg) if msg.contains("does not support")));
        assert_eq!(
            engine.get_state("cover.demo").unwrap().attributes[ATTR_CURRENT_TILT_POSITION],
            json!(0)
        );
    }

    #[tokio::test]
    async fn test_rejects_bad_requests() {
        let (_engine, position, _tilt) = setup(DemoCover::default());

        for data in [
            json!({"position": 50}),
            json!({"entity_id": "cover.other", "position": 50}),
            json!({"entity_id": "cover.demo", "position": 101}),
            json!({"entity_id": "cover.demo", "position": "high"}),
            json!({"entity_id": "cover.demo"}),
        ] {
            let result = position.handle(call("set_position", data.clone())).await;
            assert!(result.is_err(), "expected failure for {}", data);
        }
    }
}
