// Private module - allowed by clippy.toml allow-private-module-inception
#[allow(clippy::module_inception)]
mod engine;
mod event;
mod integration;
mod service;
pub mod state;
mod subscription;

pub use engine::Engine;
pub use event::Event;
pub use integration::Integration;
pub use integration::IntegrationContext;
pub use integration::IntegrationFactoryResult;
pub use integration::REGISTRY as INTEGRATION_REGISTRY;
pub use service::ServiceCall;
pub use service::ServiceCaller;
pub use service::ServiceError;
pub use service::ServiceHandler;
pub use state::Attributes;
pub use state::EntityState;
pub use state::State;
pub use state::StateReader;
pub use subscription::StateChangeHandler;
pub use subscription::Subscription;
