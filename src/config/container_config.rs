use serde::Deserialize;
use std::{collections::HashMap, fmt, str::FromStr};
use crate::errors::ConfigError;

// Environment variable names
pub const ENV_PREFIX: &str = "IOC_";
pub const ENV_AUTO_REGISTER_UNKNOWN: &str = "IOC_AUTO_REGISTER_UNKNOWN";
pub const ENV_THROW_EXCEPTIONS: &str = "IOC_THROW_EXCEPTIONS";
pub const ENV_FALLBACK_POLICY: &str = "IOC_FALLBACK_POLICY";
pub const ENV_MAX_RESOLUTION_DEPTH: &str = "IOC_MAX_RESOLUTION_DEPTH";
pub const ENV_TRACK_DISPOSABLE_TRANSIENTS: &str = "IOC_TRACK_DISPOSABLE_TRANSIENTS";

const DEFAULT_MAX_RESOLUTION_DEPTH: usize = 100;
const DEFAULT_ROOT_SCOPE_NAME: &str = "root";

/// Which fallback result wins when several missing-export providers or
/// unknown-export listeners can satisfy the same request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Every provider still runs for its registrations, but the first hit is
    /// the one activated and returned; listeners stop at the first value.
    #[default]
    FirstMatch,
    /// Re-query and activate after every provider; the last activation wins.
    /// All listeners run and the last supplied value wins.
    LastMatch,
}

impl FromStr for FallbackPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "first_match" | "first" => Ok(FallbackPolicy::FirstMatch),
            "last_match" | "last" => Ok(FallbackPolicy::LastMatch),
            other => Err(ConfigError::InvalidValue {
                field: "fallback_policy".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for FallbackPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackPolicy::FirstMatch => f.write_str("first_match"),
            FallbackPolicy::LastMatch => f.write_str("last_match"),
        }
    }
}

/// Container-wide resolution settings, read by every locate call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerConfig {
    /// Synthesize strategies for declared constructible types nobody registered
    pub auto_register_unknown: bool,
    /// Raise `NotLocated` instead of returning `None` from `locate`
    pub throw_exceptions: bool,
    pub fallback_policy: FallbackPolicy,
    pub max_resolution_depth: usize,
    /// When false, transient activations never enter a disposal set
    pub track_disposable_transients: bool,
    pub root_scope_name: String,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            auto_register_unknown: false,
            throw_exceptions: false,
            fallback_policy: FallbackPolicy::FirstMatch,
            max_resolution_depth: DEFAULT_MAX_RESOLUTION_DEPTH,
            track_disposable_transients: true,
            root_scope_name: DEFAULT_ROOT_SCOPE_NAME.to_string(),
        }
    }
}

/// Partial container configuration for loading from files
#[derive(Deserialize, Debug, Default, Clone)]
pub struct PartialContainerConfig {
    pub auto_register_unknown: Option<bool>,
    pub throw_exceptions: Option<bool>,
    pub fallback_policy: Option<FallbackPolicy>,
    pub max_resolution_depth: Option<usize>,
    pub track_disposable_transients: Option<bool>,
    pub root_scope_name: Option<String>,
}

impl ContainerConfig {
    pub fn with_auto_register_unknown(mut self, enabled: bool) -> Self {
        self.auto_register_unknown = enabled;
        self
    }

    pub fn with_throw_exceptions(mut self, enabled: bool) -> Self {
        self.throw_exceptions = enabled;
        self
    }

    pub fn with_fallback_policy(mut self, policy: FallbackPolicy) -> Self {
        self.fallback_policy = policy;
        self
    }

    pub fn with_max_resolution_depth(mut self, depth: usize) -> Self {
        self.max_resolution_depth = depth;
        self
    }

    pub fn with_track_disposable_transients(mut self, enabled: bool) -> Self {
        self.track_disposable_transients = enabled;
        self
    }

    pub fn from_partial(partial: Option<PartialContainerConfig>) -> Self {
        let partial = partial.unwrap_or_default();
        let defaults = ContainerConfig::default();

        ContainerConfig {
            auto_register_unknown: partial
                .auto_register_unknown
                .unwrap_or(defaults.auto_register_unknown),
            throw_exceptions: partial.throw_exceptions.unwrap_or(defaults.throw_exceptions),
            fallback_policy: partial.fallback_policy.unwrap_or(defaults.fallback_policy),
            max_resolution_depth: partial
                .max_resolution_depth
                .unwrap_or(defaults.max_resolution_depth),
            track_disposable_transients: partial
                .track_disposable_transients
                .unwrap_or(defaults.track_disposable_transients),
            root_scope_name: partial.root_scope_name.unwrap_or(defaults.root_scope_name),
        }
    }

    /// Build from a file section with environment variables taking precedence.
    pub fn from_partial_and_env(
        partial: Option<PartialContainerConfig>,
        env_map: &HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::from_partial(partial);

        if let Some(value) = env_map.get(ENV_AUTO_REGISTER_UNKNOWN) {
            config.auto_register_unknown = parse_bool(ENV_AUTO_REGISTER_UNKNOWN, value)?;
        }
        if let Some(value) = env_map.get(ENV_THROW_EXCEPTIONS) {
            config.throw_exceptions = parse_bool(ENV_THROW_EXCEPTIONS, value)?;
        }
        if let Some(value) = env_map.get(ENV_FALLBACK_POLICY) {
            config.fallback_policy = value.parse()?;
        }
        if let Some(value) = env_map.get(ENV_MAX_RESOLUTION_DEPTH) {
            config.max_resolution_depth =
                value.trim().parse().map_err(|_| ConfigError::InvalidValue {
                    field: ENV_MAX_RESOLUTION_DEPTH.to_string(),
                    value: value.clone(),
                })?;
        }
        if let Some(value) = env_map.get(ENV_TRACK_DISPOSABLE_TRANSIENTS) {
            config.track_disposable_transients =
                parse_bool(ENV_TRACK_DISPOSABLE_TRANSIENTS, value)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_resolution_depth == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_resolution_depth".to_string(),
                value: "0".to_string(),
            });
        }
        if self.root_scope_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "root_scope_name".to_string(),
                value: self.root_scope_name.clone(),
            });
        }
        Ok(())
    }
}

fn parse_bool(field: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ContainerConfig::from_partial(None);
        assert_eq!(config, ContainerConfig::default());
        assert!(!config.auto_register_unknown);
        assert!(!config.throw_exceptions);
        assert_eq!(config.fallback_policy, FallbackPolicy::FirstMatch);
        assert!(config.track_disposable_transients);
    }

    #[test]
    fn test_env_overrides_partial() {
        let partial = PartialContainerConfig {
            throw_exceptions: Some(false),
            max_resolution_depth: Some(12),
            ..Default::default()
        };
        let mut env_map = HashMap::new();
        env_map.insert(ENV_THROW_EXCEPTIONS.to_string(), "yes".to_string());
        env_map.insert(ENV_FALLBACK_POLICY.to_string(), "last-match".to_string());

        let config = ContainerConfig::from_partial_and_env(Some(partial), &env_map).unwrap();
        assert!(config.throw_exceptions);
        assert_eq!(config.max_resolution_depth, 12);
        assert_eq!(config.fallback_policy, FallbackPolicy::LastMatch);
    }

    #[test]
    fn test_invalid_env_value() {
        let mut env_map = HashMap::new();
        env_map.insert(ENV_AUTO_REGISTER_UNKNOWN.to_string(), "maybe".to_string());

        let result = ContainerConfig::from_partial_and_env(None, &env_map);
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_zero_depth_rejected() {
        let config = ContainerConfig::default().with_max_resolution_depth(0);
        assert!(config.validate().is_err());
    }
}
