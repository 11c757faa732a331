pub mod config;
pub mod container;
pub mod dispatcher;
pub mod errors;
pub mod logging;
pub mod validation;

// Re-export commonly used items for convenience
pub use config::{AppConfig, DispatcherConfig};
pub use container::registry::{Registry, RegistryBuilder};
pub use container::resolver::{ContainerStats, Resolver};
pub use container::scope::{Scope, ScopeManager, ScopeState};
pub use container::{
    capability, recipe, release_hook, Binding, CapabilityId, CapabilityObject,
    ConstructionRecipe, Lifetime, ReleaseHook, ResolvedDeps,
};
pub use dispatcher::request::{
    handler_object, BoundRequest, DispatchOutcome, HttpMethod, Request, RequestHandler,
    SharedHandler,
};
pub use dispatcher::{Dispatcher, DispatcherBuilder, RequestPhase};
pub use errors::{ConfigError, ContainerError, Error, RouteError};
pub use validation::{Rule, RuleSet, Violation};
