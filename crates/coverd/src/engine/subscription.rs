use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::warn;

use super::event::Event;

/// Callback invoked for state changes of tracked entities.
///
/// `event` is `None` when the handler is invoked without a triggering change
/// (initial synchronisation, or after missed events).
#[async_trait]
pub trait StateChangeHandler: Send + Sync {
    async fn on_state_change(&self, event: Option<&Event>);
}

/// Registration of a handler for state changes of a fixed set of entities.
///
/// Events are delivered one at a time: the next event is not handed to the
/// handler until the previous invocation has completed. Dropping the
/// subscription detaches the handler.
pub struct Subscription {
    entity_ids: Vec<String>,
    task: JoinHandle<()>,
}

impl Subscription {
    /// Start delivering events from `rx` to `handler`.
    ///
    /// With `initial_sync`, the handler is first invoked once without a
    /// trigger, inside the delivery task, and the sender is signalled when
    /// that invocation has completed. Events arriving meanwhile queue up in
    /// `rx` and are delivered afterwards.
    pub(super) fn spawn(
        entity_ids: Vec<String>,
        mut rx: broadcast::Receiver<Event>,
        handler: Arc<dyn StateChangeHandler>,
        initial_sync: Option<oneshot::Sender<()>>,
    ) -> Self {
        let tracked = entity_ids.clone();
        let task = tokio::spawn(async move {
            if let Some(done) = initial_sync {
                handler.on_state_change(None).await;
                let _ = done.send(());
            }

            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if !tracked.iter().any(|id| id == event.entity_id()) {
                            continue;
                        }
                        debug!("Delivering state change for {}", event.entity_id());
                        handler.on_state_change(Some(&event)).await;
                    }
                    Err(RecvError::Lagged(missed)) => {
                        // Handlers re-read current state, so a single
                        // untriggered call catches up on everything missed.
                        warn!(
                            "Subscription for {:?} missed {} event(s), resynchronising",
                            tracked, missed
                        );
                        handler.on_state_change(None).await;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Self { entity_ids, task }
    }

    /// Entities this subscription listens to.
    pub fn entity_ids(&self) -> &[String] {
        &self.entity_ids
    }

    /// Whether events are still being delivered.
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop delivering events to the handler.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("entity_ids", &self.entity_ids)
            .field("active", &self.is_active())
            .finish()
    }
}
