pub mod config;
pub mod container;
pub mod errors;
pub mod logging;

// Re-export commonly used items for convenience
pub use config::{ConfigLoader, ContainerConfig, FallbackPolicy, Settings};
pub use container::{
    CapabilityKey, ChildScopeOptions, Constructible, Disposable, ExportStrategy, Instance, LocateOptions,
    Resolver, Scope, ScopeId, ScopeManager,
};
pub use errors::{ConfigError, LocateError, LocateResult};
