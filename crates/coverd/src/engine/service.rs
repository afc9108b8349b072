use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

/// A request to run a named service.
#[derive(Debug, Clone)]
pub struct ServiceCall {
    pub domain: String,
    pub service: String,
    pub data: serde_json::Value,
}

impl ServiceCall {
    /// The `entity_id` field of the call data, if present.
    pub fn entity_id(&self) -> Option<&str> {
        self.data.get("entity_id").and_then(|v| v.as_str())
    }
}

/// Errors returned by service dispatch.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ServiceError {
    /// No handler is registered for `domain.service`.
    #[error("service {domain}.{service} not found")]
    NotFound { domain: String, service: String },

    /// The handler ran and reported a failure.
    #[error("{0}")]
    Failed(String),
}

/// Handler for a single registered service.
#[async_trait]
pub trait ServiceHandler: Send + Sync {
    async fn handle(&self, call: ServiceCall) -> Result<(), ServiceError>;
}

/// Dispatch side of the service registry.
///
/// Implemented by the engine; allows mocking command dispatch in tests.
#[async_trait]
pub trait ServiceCaller: Send + Sync {
    /// Whether a handler is currently registered for `domain.service`.
    fn has_service(&self, domain: &str, service: &str) -> bool;

    /// Run `domain.service` with `data`.
    ///
    /// With `blocking` the call returns once the handler completed and reports
    /// its result. Otherwise the handler runs in the background and only the
    /// lookup can fail.
    async fn call(
        &self,
        domain: &str,
        service: &str,
        data: serde_json::Value,
        blocking: bool,
    ) -> Result<(), ServiceError>;
}

/// Map of (domain, service) -> handler
#[derive(Default)]
pub(super) struct ServiceRegistry {
    handlers: HashMap<(String, String), Arc<dyn ServiceHandler>>,
}

impl ServiceRegistry {
    pub fn insert(&mut self, domain: &str, service: &str, handler: Arc<dyn ServiceHandler>) {
        self.handlers
            .insert((domain.to_string(), service.to_string()), handler);
    }

    pub fn get(&self, domain: &str, service: &str) -> Option<Arc<dyn ServiceHandler>> {
        self.handlers
            .get(&(domain.to_string(), service.to_string()))
            .cloned()
    }

    pub fn contains(&self, domain: &str, service: &str) -> bool {
        self.handlers
            .contains_key(&(domain.to_string(), service.to_string()))
    }

    /// All registered services, sorted, as "domain.service".
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlers
            .keys()
            .map(|(domain, service)| format!("{}.{}", domain, service))
            .collect();
        names.sort();
        names
    }
}
