use serde::Deserialize;
use std::collections::HashMap;
use crate::errors::ConfigError;
use crate::logging::{LoggingConfig, PartialLoggingConfig};

use super::container_config::{ContainerConfig, PartialContainerConfig};

/// Top-level settings file
///
/// ```toml
/// [container]
/// auto_register_unknown = true
/// fallback_policy = "last_match"
///
/// [logging]
/// level = "debug"
/// format = "compact"
/// ```
#[derive(Debug, Clone, Default)]
pub struct Settings {
    pub container: ContainerConfig,
    pub logging: LoggingConfig,
}

/// Partial settings for loading from files
#[derive(Deserialize, Debug, Default)]
pub struct PartialSettings {
    pub container: Option<PartialContainerConfig>,
    pub logging: Option<PartialLoggingConfig>,
}

impl Settings {
    pub fn from_partial_and_env(
        partial: Option<PartialSettings>,
        env_map: &HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let partial = partial.unwrap_or_default();

        let container = ContainerConfig::from_partial_and_env(partial.container, env_map)?;
        let logging = LoggingConfig::from_partial(partial.logging)?;

        Ok(Settings { container, logging })
    }
}
