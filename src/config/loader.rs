use std::{collections::HashMap, env, fs, path::Path};
use crate::errors::ConfigError;

use super::container_config::ENV_PREFIX;
use super::settings::{PartialSettings, Settings};

/// Configuration loader responsible for loading settings from TOML and environment
pub struct ConfigLoader {
    env_map: HashMap<String, String>,
}

impl ConfigLoader {
    /// Create a loader that reads `IOC_*` variables from the process environment
    pub fn new() -> Self {
        Self {
            env_map: collect_env_vars(),
        }
    }

    /// Create a loader with an explicit environment (for testing)
    pub fn with_env(env_map: HashMap<String, String>) -> Self {
        Self { env_map }
    }

    /// Load settings from a TOML file
    pub fn load_file(&self, path: &Path) -> Result<Settings, ConfigError> {
        let origin = path.display().to_string();
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(origin.clone(), e))?;
        self.load_str(&content, &origin)
    }

    /// Load settings from TOML text; `origin` names the source in errors
    pub fn load_str(&self, content: &str, origin: &str) -> Result<Settings, ConfigError> {
        let partial: PartialSettings = toml::from_str(content)
            .map_err(|e| ConfigError::TomlParse(origin.to_string(), e))?;

        tracing::debug!(origin = %origin, "Loaded container settings");
        Settings::from_partial_and_env(Some(partial), &self.env_map)
    }

    /// Defaults plus environment overrides, no file
    pub fn load_env_only(&self) -> Result<Settings, ConfigError> {
        Settings::from_partial_and_env(None, &self.env_map)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn collect_env_vars() -> HashMap<String, String> {
    env::vars()
        .filter(|(key, _)| key.starts_with(ENV_PREFIX))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FallbackPolicy;
    use crate::config::container_config::ENV_AUTO_REGISTER_UNKNOWN;
    use std::io::Write;

    const SAMPLE: &str = r#"
[container]
auto_register_unknown = false
throw_exceptions = true
fallback_policy = "last_match"
max_resolution_depth = 32
root_scope_name = "app"

[logging]
level = "warn"
format = "compact"
"#;

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let loader = ConfigLoader::with_env(HashMap::new());
        let settings = loader.load_file(file.path()).unwrap();

        assert!(settings.container.throw_exceptions);
        assert_eq!(settings.container.fallback_policy, FallbackPolicy::LastMatch);
        assert_eq!(settings.container.max_resolution_depth, 32);
        assert_eq!(settings.container.root_scope_name, "app");
        assert_eq!(settings.logging.level, tracing::Level::WARN);
    }

    #[test]
    fn test_env_wins_over_file() {
        let mut env_map = HashMap::new();
        env_map.insert(ENV_AUTO_REGISTER_UNKNOWN.to_string(), "true".to_string());

        let loader = ConfigLoader::with_env(env_map);
        let settings = loader.load_str(SAMPLE, "inline").unwrap();

        assert!(settings.container.auto_register_unknown);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::with_env(HashMap::new());

        let result = loader.load_file(&dir.path().join("absent.toml"));
        assert!(matches!(result, Err(ConfigError::FileRead(_, _))));
    }

    #[test]
    fn test_malformed_toml() {
        let loader = ConfigLoader::with_env(HashMap::new());
        let result = loader.load_str("[container\nthrow_exceptions = 1", "inline");
        assert!(matches!(result, Err(ConfigError::TomlParse(_, _))));
    }
}
