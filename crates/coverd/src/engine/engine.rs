use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::RwLock;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::event::Event;
use super::integration::Integration;
use super::integration::IntegrationContext;
use super::service::ServiceCall;
use super::service::ServiceCaller;
use super::service::ServiceError;
use super::service::ServiceHandler;
use super::service::ServiceRegistry;
use super::state::Attributes;
use super::state::EntityState;
use super::state::State;
use super::state::StateReader;
use super::subscription::StateChangeHandler;
use super::subscription::Subscription;

/// Capacity of the state-change broadcast channel
/// Subscribers that fall further behind than this are resynchronised
const EVENT_CHANNEL_SIZE: usize = 1024;

/// coverd engine
///
/// Owns the view of the world (State), the registry of callable services, and
/// the broadcast of state changes to subscribers.
pub struct Engine {
    /// Centralized state snapshot (readers load the Arc, writers store a new one)
    state: ArcSwap<State>,

    /// Serializes writers so that read-modify-store and event order agree
    write_lock: Mutex<()>,

    /// Registered services by (domain, service)
    services: RwLock<ServiceRegistry>,

    /// State-change notifications
    events: broadcast::Sender<Event>,
}

impl Engine {
    /// Create a new Engine instance
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            state: ArcSwap::new(Arc::default()),
            write_lock: Mutex::new(()),
            services: RwLock::new(ServiceRegistry::default()),
            events,
        }
    }

    /// Build and set up every integration enabled by the configuration.
    ///
    /// Integrations that provide entities are set up first so that consumers
    /// see them during their initial synchronisation. Integrations that fail
    /// to build or set up are logged and skipped. The returned integrations
    /// are owned by the caller, which is responsible for shutting them down.
    pub async fn start_integrations(
        self: &Arc<Self>,
        cfg: &crate::config::Config,
    ) -> Vec<Box<dyn Integration>> {
        let ctx = IntegrationContext { config: cfg };
        let mut pending = Vec::new();
        for constr in super::integration::REGISTRY {
            match constr(&ctx) {
                Ok(Some(i)) => pending.push(i),
                Ok(None) => continue,
                Err(e) => {
                    error!("failed to setup integration: {:#}", e);
                    continue;
                }
            }
        }

        // Stable sort keeps registry order within each group
        pending.sort_by_key(|i| !i.provides_entities());

        let mut started = Vec::new();
        for mut integration in pending {
            let name = integration.name().to_string();
            info!("Setting up integration '{}'", name);
            if let Err(e) = integration.setup(Arc::clone(self)).await {
                warn!("Integration '{}' setup failed: {}", name, e);
                continue;
            }
            started.push(integration);
        }

        started
    }

    /// Get a snapshot of the current engine state.
    ///
    /// Clones the `Arc` (atomic refcount bump), essentially free.
    pub fn state_snapshot(&self) -> Arc<State> {
        self.state.load_full()
    }

    /// Set the state and attributes of an entity, creating it if needed.
    ///
    /// A `StateChanged` event is broadcast only when the state or the
    /// attributes differ from what was stored before.
    pub fn set_state(
        &self,
        entity_id: &str,
        state: impl Into<String>,
        attributes: Attributes,
    ) -> EntityState {
        let new_state = EntityState {
            entity_id: entity_id.to_string(),
            state: state.into(),
            attributes,
        };

        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.state.load();
        let old_state = current.get(entity_id).cloned();
        if old_state.as_ref() == Some(&new_state) {
            return new_state;
        }

        let mut next = State::clone(&current);
        next.entities
            .insert(entity_id.to_string(), new_state.clone());
        self.state.store(Arc::new(next));

        debug!("State changed: {} -> {}", entity_id, new_state.state);
        self.publish(Event::StateChanged {
            entity_id: entity_id.to_string(),
            old_state,
            new_state: Some(new_state.clone()),
        });

        new_state
    }

    /// Remove an entity. Returns its last state if it existed.
    pub fn remove_state(&self, entity_id: &str) -> Option<EntityState> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.state.load();
        current.get(entity_id)?;

        let mut next = State::clone(&current);
        let old_state = next.entities.remove(entity_id);
        self.state.store(Arc::new(next));

        info!("Entity removed: {}", entity_id);
        self.publish(Event::StateChanged {
            entity_id: entity_id.to_string(),
            old_state: old_state.clone(),
            new_state: None,
        });

        old_state
    }

    /// Receive every state change from now on.
    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Invoke `handler` whenever one of `entity_ids` changes.
    ///
    /// The handler is not invoked for the current state; callers that need an
    /// initial synchronisation call it themselves after subscribing.
    pub fn track_state_change(
        &self,
        entity_ids: Vec<String>,
        handler: Arc<dyn StateChangeHandler>,
    ) -> Subscription {
        debug!("Tracking state changes for {:?}", entity_ids);
        Subscription::spawn(entity_ids, self.events.subscribe(), handler, None)
    }

    /// Like [`Engine::track_state_change`], but first invoke `handler` once
    /// without a trigger and return when that invocation has completed.
    ///
    /// The initial invocation runs on the subscription's own delivery task,
    /// so it never overlaps with the invocations for later changes.
    pub async fn track_state_change_and_sync(
        &self,
        entity_ids: Vec<String>,
        handler: Arc<dyn StateChangeHandler>,
    ) -> Subscription {
        debug!("Tracking state changes for {:?} with initial sync", entity_ids);
        let (done_tx, done_rx) = tokio::sync::oneshot::channel();
        let subscription =
            Subscription::spawn(entity_ids, self.events.subscribe(), handler, Some(done_tx));
        // Err only if the task was aborted before finishing the sync
        let _ = done_rx.await;
        subscription
    }

    /// Register (or replace) the handler for `domain.service`.
    pub fn register_service(&self, domain: &str, service: &str, handler: Arc<dyn ServiceHandler>) {
        info!("Registering service {}.{}", domain, service);
        self.services
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(domain, service, handler);
    }

    /// Names of all registered services ("domain.service"), sorted.
    pub fn services(&self) -> Vec<String> {
        self.services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .names()
    }

    fn publish(&self, event: Event) {
        // No receivers is not an error: nobody is tracking anything yet
        let _ = self.events.send(event);
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateReader for Engine {
    fn get_state(&self, entity_id: &str) -> Option<EntityState> {
        self.state.load().get(entity_id).cloned()
    }
}

#[async_trait]
impl ServiceCaller for Engine {
    fn has_service(&self, domain: &str, service: &str) -> bool {
        self.services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(domain, service)
    }

    async fn call(
        &self,
        domain: &str,
        service: &str,
        data: serde_json::Value,
        blocking: bool,
    ) -> Result<(), ServiceError> {
        let handler = self
            .services
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(domain, service)
            .ok_or_else(|| ServiceError::NotFound {
                domain: domain.to_string(),
                service: service.to_string(),
            })?;

        let call = ServiceCall {
            domain: domain.to_string(),
            service: service.to_string(),
            data,
        };
        debug!("Calling service {}.{} with {}", domain, service, call.data);

        if blocking {
            return handler.handle(call).await;
        }

        tokio::spawn(async move {
            let name = format!("{}.{}", call.domain, call.service);
            if let Err(e) = handler.handle(call).await {
                warn!("Service {} failed: {}", name, e);
            }
        });
        Ok(())
    }
}
