//! Settings loading integration tests

use ioc_kernel::config::{ConfigLoader, ENV_THROW_EXCEPTIONS};
use ioc_kernel::ScopeManager;
use std::collections::HashMap;
use std::io::Write;

#[test]
fn test_manager_built_from_settings_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[container]
root_scope_name = "app"
fallback_policy = "first_match"

[logging]
level = "debug"
"#
    )
    .unwrap();

    let mut env_map = HashMap::new();
    env_map.insert(ENV_THROW_EXCEPTIONS.to_string(), "on".to_string());
    let settings = ConfigLoader::with_env(env_map).load_file(file.path()).unwrap();

    let manager = ScopeManager::with_config(settings.container);
    assert_eq!(manager.root().name(), "app");
    assert!(manager.config().throw_exceptions);

    let err = manager.root().locate::<u64>().unwrap_err();
    assert!(err.is_not_located());
    assert!(err.to_string().contains("app"));
}

#[test]
fn test_malformed_toml_is_reported() {
    let loader = ConfigLoader::with_env(HashMap::new());
    let err = loader.load_str("[container\nthrow_exceptions = ", "broken.toml").unwrap_err();
    assert!(err.to_string().contains("broken.toml"));
}
