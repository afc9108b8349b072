use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;

/// Attribute map attached to an entity state.
pub type Attributes = serde_json::Map<String, serde_json::Value>;

/// Snapshot of a single entity.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EntityState {
    /// Entity ID (e.g., "cover.living_room")
    pub entity_id: String,

    /// Discrete state value ("on", "off", "open", ...).
    pub state: String,

    /// Free-form attributes (supported_features, current_position, ...).
    #[serde(default)]
    pub attributes: Attributes,
}

impl EntityState {
    pub fn new(entity_id: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            state: state.into(),
            attributes: Attributes::new(),
        }
    }

    pub fn with_attribute(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.attributes.insert(key.to_string(), value.into());
        self
    }
}

/// Centralized snapshot of the entire engine state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct State {
    pub entities: HashMap<String, EntityState>,
}

impl State {
    pub fn get(&self, entity_id: &str) -> Option<&EntityState> {
        self.entities.get(entity_id)
    }
}

/// Read access to entity state.
///
/// Implemented by the engine; allows mocking the state registry in tests.
pub trait StateReader: Send + Sync {
    /// Current state of an entity, or `None` if it does not exist.
    fn get_state(&self, entity_id: &str) -> Option<EntityState>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attributes_default_when_missing() {
        let state: EntityState =
            serde_json::from_str(r#"{"entity_id": "cover.a", "state": "open"}"#).unwrap();
        assert!(state.attributes.is_empty());
    }
}
