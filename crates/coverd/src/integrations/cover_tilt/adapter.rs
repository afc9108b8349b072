use std::sync::Arc;

use async_trait::async_trait;
use strum::Display;
use strum::EnumString;
use tracing::debug;
use tracing::error;
use tracing::warn;

use super::config::Config;
use super::features::supported_features;
use super::features::CoverCapabilities;
use crate::engine::EntityState;
use crate::engine::Event;
use crate::engine::ServiceCaller;
use crate::engine::ServiceError;
use crate::engine::StateChangeHandler;
use crate::engine::StateReader;

/// Service domain of the commands issued to the target.
pub const COVER_DOMAIN: &str = "cover";
pub const SERVICE_SET_POSITION: &str = "set_position";
pub const SERVICE_SET_TILT_POSITION: &str = "set_tilt_position";

/// Position requested while a control is "on".
pub const POSITION_ON: f64 = 90.0;
/// Position requested while a control is "off".
pub const POSITION_OFF: f64 = 80.0;

/// Value of a control entity that the adapter acts on.
///
/// Matching is exact: "ON", "unknown", "unavailable" etc. are not toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Toggle {
    On,
    Off,
}

impl Toggle {
    pub fn position(self) -> f64 {
        match self {
            Toggle::On => POSITION_ON,
            Toggle::Off => POSITION_OFF,
        }
    }
}

/// The two independent things the adapter controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Branch {
    #[strum(serialize = "height")]
    Height,
    #[strum(serialize = "tilt")]
    Tilt,
}

impl Branch {
    pub fn service(self) -> &'static str {
        match self {
            Branch::Height => SERVICE_SET_POSITION,
            Branch::Tilt => SERVICE_SET_TILT_POSITION,
        }
    }

    /// Key of the requested value in the service data.
    pub fn data_key(self) -> &'static str {
        match self {
            Branch::Height => "position",
            Branch::Tilt => "tilt_position",
        }
    }

    fn feature_name(self) -> &'static str {
        match self {
            Branch::Height => "SET_POSITION",
            Branch::Tilt => "SET_TILT_POSITION",
        }
    }

    fn is_supported(self, capabilities: CoverCapabilities) -> bool {
        match self {
            Branch::Height => capabilities.set_position,
            Branch::Tilt => capabilities.set_tilt_position,
        }
    }
}

/// Why a branch issued no command.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// The control is missing or not exactly "on"/"off".
    Inactive { state: Option<String> },

    /// The target does not advertise the needed capability.
    Unsupported { supported_features: u64 },
}

/// Result of evaluating one branch during an invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum BranchOutcome {
    Skipped(SkipReason),
    Sent { position: f64 },
    Failed { position: f64, error: ServiceError },
}

impl BranchOutcome {
    /// Whether a command was handed to the dispatcher.
    pub fn attempted(&self) -> bool {
        !matches!(self, BranchOutcome::Skipped(_))
    }
}

/// Result of one `on_input_change` invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum InputChangeOutcome {
    /// Target cover state could not be read; nothing was evaluated.
    TargetNotFound,

    Evaluated {
        height: BranchOutcome,
        tilt: BranchOutcome,
    },
}

/// Drives a cover's position and tilt from two on/off controls.
///
/// Every invocation re-reads the controls and the target's capabilities;
/// nothing is remembered between invocations.
pub struct ControlAdapter {
    config: Config,
    states: Arc<dyn StateReader>,
    services: Arc<dyn ServiceCaller>,
}

impl ControlAdapter {
    pub fn new(
        config: Config,
        states: Arc<dyn StateReader>,
        services: Arc<dyn ServiceCaller>,
    ) -> Self {
        debug!(
            "Cover tilt adapter initialized for target: {}",
            config.target_cover_entity_id
        );
        Self {
            config,
            states,
            services,
        }
    }

    /// Entities whose changes should trigger `on_input_change`.
    ///
    /// The target is not tracked: its updates, including the ones our own
    /// commands cause, must not re-trigger the adapter.
    pub fn tracked_entity_ids(&self) -> Vec<String> {
        vec![
            self.config.height_control_entity_id.clone(),
            self.config.tilt_control_entity_id.clone(),
        ]
    }

    /// Re-evaluate both controls and command the target accordingly.
    ///
    /// `trigger` is only logged; current state is always read fresh. The
    /// height command is awaited before the tilt command is issued. Failures
    /// are logged and reported in the returned outcome, never propagated.
    pub async fn on_input_change(&self, trigger: Option<&Event>) -> InputChangeOutcome {
        debug!("Input change detected. Event: {:?}", trigger);

        let has_position_service = self
            .services
            .has_service(COVER_DOMAIN, SERVICE_SET_POSITION);
        let has_tilt_service = self
            .services
            .has_service(COVER_DOMAIN, SERVICE_SET_TILT_POSITION);
        debug!(
            "Check services availability: set_position={}, set_tilt_position={}",
            has_position_service, has_tilt_service
        );

        let height_state = self.states.get_state(&self.config.height_control_entity_id);
        let tilt_state = self.states.get_state(&self.config.tilt_control_entity_id);

        let target = &self.config.target_cover_entity_id;
        let Some(target_state) = self.states.get_state(target) else {
            error!(
                "Target cover entity '{}' not found. Cannot proceed.",
                target
            );
            return InputChangeOutcome::TargetNotFound;
        };

        let features = supported_features(&target_state.attributes);
        debug!(
            "Target cover '{}' supported_features: {}",
            target, features
        );
        let capabilities = CoverCapabilities::from_bits(features);

        let height = self
            .evaluate(Branch::Height, height_state.as_ref(), capabilities, features)
            .await;
        self.log_outcome(Branch::Height, &height, features);

        let tilt = self
            .evaluate(Branch::Tilt, tilt_state.as_ref(), capabilities, features)
            .await;
        self.log_outcome(Branch::Tilt, &tilt, features);

        InputChangeOutcome::Evaluated { height, tilt }
    }

    async fn evaluate(
        &self,
        branch: Branch,
        control: Option<&EntityState>,
        capabilities: CoverCapabilities,
        features: u64,
    ) -> BranchOutcome {
        let toggle = control.and_then(|s| s.state.parse::<Toggle>().ok());
        let Some(toggle) = toggle else {
            return BranchOutcome::Skipped(SkipReason::Inactive {
                state: control.map(|s| s.state.clone()),
            });
        };

        let position = toggle.position();
        debug!(
            "Processing {} control. New state: {}, setting to {}%",
            branch, toggle, position
        );

        if !branch.is_supported(capabilities) {
            return BranchOutcome::Skipped(SkipReason::Unsupported {
                supported_features: features,
            });
        }

        let target = &self.config.target_cover_entity_id;
        debug!(
            "Calling {}.{} for {} with {} {}",
            COVER_DOMAIN,
            branch.service(),
            target,
            branch.data_key(),
            position
        );

        let mut data = serde_json::Map::new();
        data.insert("entity_id".to_string(), target.clone().into());
        data.insert(branch.data_key().to_string(), position.into());

        match self
            .services
            .call(COVER_DOMAIN, branch.service(), data.into(), true)
            .await
        {
            Ok(()) => BranchOutcome::Sent { position },
            Err(error) => BranchOutcome::Failed { position, error },
        }
    }

    fn log_outcome(&self, branch: Branch, outcome: &BranchOutcome, features: u64) {
        let target = &self.config.target_cover_entity_id;
        let service = branch.service();
        match outcome {
            BranchOutcome::Skipped(SkipReason::Inactive { state }) => {
                debug!(
                    "{} control not active or state not 'on'/'off'. Current state: {}",
                    branch,
                    state.as_deref().unwrap_or("None")
                );
            }
            BranchOutcome::Skipped(SkipReason::Unsupported { supported_features }) => {
                warn!(
                    "Target cover {} does not support {}. Supported features: {}",
                    target,
                    branch.feature_name(),
                    supported_features
                );
            }
            BranchOutcome::Sent { .. } => {
                debug!("Successfully called {}.{}", COVER_DOMAIN, service);
            }
            BranchOutcome::Failed {
                error: error @ ServiceError::NotFound { .. },
                ..
            } => {
                error!(
                    "Service {}.{} NOT FOUND for {} despite supported_features ({}). Error: {}",
                    COVER_DOMAIN, service, target, features, error
                );
            }
            BranchOutcome::Failed { error, .. } => {
                error!(
                    "Error calling {}.{} for {}: {}",
                    COVER_DOMAIN, service, target, error
                );
            }
        }
    }
}

#[async_trait]
impl StateChangeHandler for ControlAdapter {
    async fn on_state_change(&self, event: Option<&Event>) {
        self.on_input_change(event).await;
    }
}


#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::mock::MockHost;
    use super::*;
    use crate::integrations::cover_tilt::features::SET_POSITION;
    use crate::integrations::cover_tilt::features::SET_TILT_POSITION;

    const TARGET: &str = "cover.living_room";
    const HEIGHT: &str = "input_boolean.height";
    const TILT: &str = "input_boolean.tilt";

    fn adapter(host: &Arc<MockHost>) -> ControlAdapter {
        let config = Config {
            target_cover_entity_id: TARGET.to_string(),
            height_control_entity_id: HEIGHT.to_string(),
            tilt_control_entity_id: TILT.to_string(),
        };
        ControlAdapter::new(config, host.clone(), host.clone())
    }

    fn not_found(service: &str) -> ServiceError {
        ServiceError::NotFound {
            domain: COVER_DOMAIN.to_string(),
            service: service.to_string(),
        }
    }

    #[test]
    fn test_toggle_parsing() {
        assert_eq!("on".parse::<Toggle>().unwrap(), Toggle::On);
        assert_eq!("off".parse::<Toggle>().unwrap(), Toggle::Off);
        assert!("ON".parse::<Toggle>().is_err());
        assert!("unavailable".parse::<Toggle>().is_err());
        assert!("".parse::<Toggle>().is_err());

        assert_eq!(Toggle::On.position(), 90.0);
        assert_eq!(Toggle::Off.position(), 80.0);
    }

    #[test]
    fn test_tracked_entities_exclude_target() {
        let host = Arc::new(MockHost::new());
        let adapter = adapter(&host);
        assert_eq!(adapter.tracked_entity_ids(), vec![HEIGHT, TILT]);
    }

    #[tokio::test]
    async fn test_both_supported_sends_both_commands() {
        let host = Arc::new(MockHost::new());
        host.set_cover(TARGET, SET_POSITION | SET_TILT_POSITION);
        host.set(HEIGHT, "on");
        host.set(TILT, "off");

        let outcome = adapter(&host).on_input_change(None).await;
        assert_eq!(
            outcome,
            InputChangeOutcome::Evaluated {
                height: BranchOutcome::Sent { position: 90.0 },
                tilt: BranchOutcome::Sent { position: 80.0 },
            }
        );

        let calls = host.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].service, SERVICE_SET_POSITION);
        assert_eq!(calls[0].data, json!({"entity_id": TARGET, "position": 90.0}));
        assert_eq!(calls[1].service, SERVICE_SET_TILT_POSITION);
        assert_eq!(
            calls[1].data,
            json!({"entity_id": TARGET, "tilt_position": 80.0})
        );
        assert!(calls.iter().all(|c| c.domain == COVER_DOMAIN && c.blocking));
    }

    #[tokio::test]
    async fn test_tilt_unsupported_only_height_sent() {
        let host = Arc::new(MockHost::new());
        host.set_cover(TARGET, SET_POSITION);
        host.set(HEIGHT, "on");
        host.set(TILT, "on");

        let outcome = adapter(&host).on_input_change(None).await;
        assert_eq!(
            outcome,
            InputChangeOutcome::Evaluated {
                height: BranchOutcome::Sent { position: 90.0 },
                tilt: BranchOutcome::Skipped(SkipReason::Unsupported {
                    supported_features: SET_POSITION,
                }),
            }
        );
        assert_eq!(host.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_target_issues_nothing() {
        let host = Arc::new(MockHost::new());
        host.set(HEIGHT, "on");
        host.set(TILT, "off");

        let outcome = adapter(&host).on_input_change(None).await;
        assert_eq!(outcome, InputChangeOutcome::TargetNotFound);
        assert!(host.calls().is_empty());
    }

    #[tokio::test]
    async fn test_tilt_not_found_despite_capability() {
        let host = Arc::new(MockHost::new());
        host.set_cover(TARGET, SET_TILT_POSITION);
        host.set(TILT, "on");
        host.fail("cover.set_tilt_position", not_found(SERVICE_SET_TILT_POSITION));

        let outcome = adapter(&host).on_input_change(None).await;
        assert_eq!(
            outcome,
            InputChangeOutcome::Evaluated {
                height: BranchOutcome::Skipped(SkipReason::Inactive { state: None }),
                tilt: BranchOutcome::Failed {
                    position: 90.0,
                    error: not_found(SERVICE_SET_TILT_POSITION),
                },
            }
        );
        assert_eq!(host.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_inactive_states_issue_nothing() {
        let host = Arc::new(MockHost::new());
        host.set_cover(TARGET, SET_POSITION | SET_TILT_POSITION);
        host.set(HEIGHT, "unavailable");
        host.set(TILT, "ON");

        let outcome = adapter(&host).on_input_change(None).await;
        assert_eq!(
            outcome,
            InputChangeOutcome::Evaluated {
                height: BranchOutcome::Skipped(SkipReason::Inactive {
                    state: Some("unavailable".to_string()),
                }),
                tilt: BranchOutcome::Skipped(SkipReason::Inactive {
                    state: Some("ON".to_string()),
                }),
            }
        );
        assert!(host.calls().is_empty());
    }

    #[tokio::test]
    async fn test_height_failure_does_not_block_tilt() {
        let host = Arc::new(MockHost::new());
        host.set_cover(TARGET, SET_POSITION | SET_TILT_POSITION);
        host.set(HEIGHT, "off");
        host.set(TILT, "on");
        host.fail(
            "cover.set_position",
            ServiceError::Failed("motor jammed".to_string()),
        );

        let InputChangeOutcome::Evaluated { height, tilt } =
            adapter(&host).on_input_change(None).await
        else {
            panic!("target should be found");
        };
        assert_eq!(
            height,
            BranchOutcome::Failed {
                position: 80.0,
                error: ServiceError::Failed("motor jammed".to_string()),
            }
        );
        assert_eq!(tilt, BranchOutcome::Sent { position: 90.0 });
        assert!(height.attempted() && tilt.attempted());

        let services: Vec<_> = host.calls().into_iter().map(|c| c.service).collect();
        assert_eq!(services, vec![SERVICE_SET_POSITION, SERVICE_SET_TILT_POSITION]);
    }

    #[tokio::test]
    async fn test_height_unsupported_does_not_block_tilt() {
        let host = Arc::new(MockHost::new());
        host.set_cover(TARGET, SET_TILT_POSITION);
        host.set(HEIGHT, "on");
        host.set(TILT, "off");

        let InputChangeOutcome::Evaluated { height, tilt } =
            adapter(&host).on_input_change(None).await
        else {
            panic!("target should be found");
        };
        assert!(!height.attempted());
        assert_eq!(tilt, BranchOutcome::Sent { position: 80.0 });
    }

    #[tokio::test]
    async fn test_capabilities_reread_every_invocation() {
        let host = Arc::new(MockHost::new());
        host.set_cover(TARGET, 0);
        host.set(HEIGHT, "on");
        let adapter = adapter(&host);

        let first = adapter.on_input_change(None).await;
        assert!(matches!(
            first,
            InputChangeOutcome::Evaluated {
                height: BranchOutcome::Skipped(SkipReason::Unsupported { .. }),
                ..
            }
        ));
        assert!(host.calls().is_empty());

        host.set_cover(TARGET, SET_POSITION);
        let second = adapter.on_input_change(None).await;
        assert!(matches!(
            second,
            InputChangeOutcome::Evaluated {
                height: BranchOutcome::Sent { position },
                ..
            } if position == 90.0
        ));
        assert_eq!(host.calls().len(), 1);

        host.remove(TARGET);
        assert_eq!(
            adapter.on_input_change(None).await,
            InputChangeOutcome::TargetNotFound
        );
        assert_eq!(host.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_repeated_invocation_is_idempotent() {
        let host = Arc::new(MockHost::new());
        host.set_cover(TARGET, SET_POSITION | SET_TILT_POSITION);
        host.set(HEIGHT, "off");
        host.set(TILT, "on");
        let adapter = adapter(&host);

        let first = adapter.on_input_change(None).await;
        let second = adapter.on_input_change(None).await;
        assert_eq!(first, second);

        let calls = host.calls();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[0], calls[2]);
        assert_eq!(calls[1], calls[3]);
    }

    #[tokio::test]
    async fn test_service_availability_does_not_gate() {
        // The mock advertises no services at all; commands are still issued
        let host = Arc::new(MockHost::new());
        host.set_cover(TARGET, SET_POSITION);
        host.set(HEIGHT, "on");
        assert!(!host.has_service(COVER_DOMAIN, SERVICE_SET_POSITION));

        adapter(&host).on_input_change(None).await;
        assert_eq!(host.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_trigger_payload_is_ignored() {
        let host = Arc::new(MockHost::new());
        host.set_cover(TARGET, SET_POSITION);
        host.set(HEIGHT, "off");

        // Event claims "on" but the registry says "off"
        let stale = Event::StateChanged {
            entity_id: HEIGHT.to_string(),
            old_state: None,
            new_state: Some(EntityState::new(HEIGHT, "on")),
        };
        let outcome = adapter(&host).on_input_change(Some(&stale)).await;
        assert!(matches!(
            outcome,
            InputChangeOutcome::Evaluated {
                height: BranchOutcome::Sent { position },
                ..
            } if position == 80.0
        ));
    }
}
