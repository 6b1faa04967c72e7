pub mod container_config;
pub mod loader;
pub mod settings;

// Re-export commonly used types
pub use container_config::{ContainerConfig, FallbackPolicy, PartialContainerConfig};
pub use loader::ConfigLoader;
pub use settings::{PartialSettings, Settings};

// Re-export environment variable names
pub use container_config::{
    ENV_AUTO_REGISTER_UNKNOWN, ENV_FALLBACK_POLICY, ENV_MAX_RESOLUTION_DEPTH, ENV_PREFIX,
    ENV_THROW_EXCEPTIONS, ENV_TRACK_DISPOSABLE_TRANSIENTS,
};
