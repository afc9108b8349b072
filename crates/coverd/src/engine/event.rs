use super::state::EntityState;

/// Automation-level events broadcast by the engine.
#[derive(Debug, Clone)]
pub enum Event {
    /// An entity's state or attributes changed. `new_state` is `None` when
    /// the entity was removed, `old_state` is `None` when it first appeared.
    StateChanged {
        entity_id: String,
        old_state: Option<EntityState>,
        new_state: Option<EntityState>,
    },
}

impl Event {
    pub fn entity_id(&self) -> &str {
        match self {
            Event::StateChanged { entity_id, .. } => entity_id,
        }
    }
}
