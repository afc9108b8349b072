use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Weak;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use super::config::DemoInputBoolean;
use crate::engine::Attributes;
use crate::engine::Engine;
use crate::engine::ServiceCall;
use crate::engine::ServiceError;
use crate::engine::ServiceHandler;
use crate::engine::StateReader;

pub const DOMAIN: &str = "input_boolean";

/// Initial state and attributes of a demo input boolean.
pub fn initial_state(entity_id: &str, input: &DemoInputBoolean) -> (String, Attributes) {
    let mut attributes = Attributes::new();
    attributes.insert(
        "friendly_name".to_string(),
        json!(input.name.clone().unwrap_or_else(|| entity_id.to_string())),
    );
    (on_off(input.initial).to_string(), attributes)
}

fn on_off(on: bool) -> &'static str {
    if on {
        "on"
    } else {
        "off"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputBooleanAction {
    TurnOn,
    TurnOff,
    Toggle,
}

impl InputBooleanAction {
    pub const ALL: [InputBooleanAction; 3] = [
        InputBooleanAction::TurnOn,
        InputBooleanAction::TurnOff,
        InputBooleanAction::Toggle,
    ];

    pub fn service(self) -> &'static str {
        match self {
            InputBooleanAction::TurnOn => "turn_on",
            InputBooleanAction::TurnOff => "turn_off",
            InputBooleanAction::Toggle => "toggle",
        }
    }
}

/// Service handler flipping simulated input booleans.
pub struct InputBooleanService {
    engine: Weak<Engine>,
    entities: Arc<HashSet<String>>,
    action: InputBooleanAction,
}

impl InputBooleanService {
    pub fn new(
        engine: Weak<Engine>,
        entities: Arc<HashSet<String>>,
        action: InputBooleanAction,
    ) -> Self {
        Self {
            engine,
            entities,
            action,
        }
    }
}

#[async_trait]
impl ServiceHandler for InputBooleanService {
    async fn handle(&self, call: ServiceCall) -> Result<(), ServiceError> {
        let entity_id = call
            .entity_id()
            .ok_or_else(|| ServiceError::Failed("entity_id is required".to_string()))?;
        if !self.entities.contains(entity_id) {
            return Err(ServiceError::Failed(format!(
                "{} is not a demo input_boolean",
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

        let on = match self.action {
            InputBooleanAction::TurnOn => true,
            InputBooleanAction::TurnOff => false,
            InputBooleanAction::Toggle => current.state != "on",
        };

        info!("Demo input_boolean {} -> {}", entity_id, on_off(on));
        engine.set_state(entity_id, on_off(on), current.attributes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_actions() {
        let engine = Arc::new(Engine::new());
        let (state, attributes) = initial_state("input_boolean.a", &DemoInputBoolean::default());
        assert_eq!(state, "off");
        engine.set_state("input_boolean.a", state, attributes);

        let entities = Arc::new(HashSet::from(["input_boolean.a".to_string()]));
        let service = |action| {
            InputBooleanService::new(Arc::downgrade(&engine), entities.clone(), action)
        };
        let call = |action: InputBooleanAction| ServiceCall {
            domain: DOMAIN.to_string(),
            service: action.service().to_string(),
            data: json!({"entity_id": "input_boolean.a"}),
        };

        let toggle = service(InputBooleanAction::Toggle);
        toggle.handle(call(InputBooleanAction::Toggle)).await.unwrap();
        assert_eq!(engine.get_state("input_boolean.a").unwrap().state, "on");
        toggle.handle(call(InputBooleanAction::Toggle)).await.unwrap();
        assert_eq!(engine.get_state("input_boolean.a").unwrap().state, "off");

        let turn_on = service(InputBooleanAction::TurnOn);
        turn_on.handle(call(InputBooleanAction::TurnOn)).await.unwrap();
        turn_on.handle(call(InputBooleanAction::TurnOn)).await.unwrap();
        assert_eq!(engine.get_state("input_boolean.a").unwrap().state, "on");

        let turn_off = service(InputBooleanAction::TurnOff);
        turn_off.handle(call(InputBooleanAction::TurnOff)).await.unwrap();
        let state = engine.get_state("input_boolean.a").unwrap();
        assert_eq!(state.state, "off");
        assert_eq!(state.attributes["friendly_name"], json!("input_boolean.a"));
    }

    #[tokio::test]
    async fn test_unknown_entity() {
        let engine = Arc::new(Engine::new());
        let service = InputBooleanService::new(
            Arc::downgrade(&engine),
            Arc::new(HashSet::new()),
            InputBooleanAction::TurnOn,
        );
        let result = service
            .handle(ServiceCall {
                domain: DOMAIN.to_string(),
                service: "turn_on".to_string(),
                data: json!({"entity_id": "input_boolean.nope"}),
            })
            .await;
        assert!(result.is_err());
    }
}
