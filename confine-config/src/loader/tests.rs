use std::fs;

use pretty_assertions::assert_eq;
use serial_test::serial;

use super::*;
use crate::constants::{CONFIG_FILE_NAME, ENV_CONFIG_PATH};
use crate::core::{PermissionPolicy, ResourceLimitsPreset};
use crate::loader::layers::ConfigLayerSource;

#[test]
fn missing_files_yield_defaults() {
    let workspace = assert_fs::TempDir::new().expect("failed to create workspace");
    let manager = ConfigManager::load_from_workspace_with(workspace.path(), &ConfigSearchPaths::none())
        .expect("load defaults");

    assert!(manager.layer_stack().is_empty());
    assert!(manager.config_path().is_none());
    assert_eq!(manager.config().limits.preset, ResourceLimitsPreset::Conservative);
    assert!(manager.config().monitor.enabled);
}

#[test]
fn user_and_workspace_layers_merge() {
    let workspace = assert_fs::TempDir::new().expect("failed to create workspace");
    let root = workspace.path();

    let user_config = root.join("home").join(CONFIG_FILE_NAME);
    fs::create_dir_all(user_config.parent().expect("parent")).expect("create home");
    fs::write(
        &user_config,
        "[limits]\nmax_memory_mb = 256\nnetwork_access = true\n\n[logging]\nlevel = \"debug\"\n",
    )
    .expect("write user config");

    fs::write(
        root.join(CONFIG_FILE_NAME),
        "[limits]\nmax_cpu_time = 5.0\nnetwork_access = false\n",
    )
    .expect("write workspace config");

    let search = ConfigSearchPaths {
        system: None,
        user: vec![user_config.clone()],
    };
    let manager = ConfigManager::load_from_workspace_with(root, &search).expect("load layers");
    let limits = &manager.config().limits;

    assert_eq!(limits.max_memory_mb, 256);
    assert_eq!(limits.max_cpu_time, 5.0);
    assert!(!limits.network_access);
    assert_eq!(manager.config().logging.level.as_str(), "debug");

    let layers = manager.layer_stack().layers();
    assert_eq!(layers.len(), 2);
    assert!(matches!(layers[0].source, ConfigLayerSource::User { .. }));
    assert!(matches!(layers[1].source, ConfigLayerSource::Workspace { .. }));
    assert_eq!(manager.config_path(), Some(root.join(CONFIG_FILE_NAME).as_path()));
}

#[test]
fn permission_tables_deserialize() {
    let workspace = assert_fs::TempDir::new().expect("failed to create workspace");
    let file = workspace.path().join("custom.toml");
    fs::write(
        &file,
        r#"
[permissions]
default_policy = "standard"

[permissions.tools.fetcher]
policy = "elevated"
deny = ["KILL_PROCESSES"]
"#,
    )
    .expect("write config");

    let manager =
        ConfigManager::load_from_file_with(&file, &ConfigSearchPaths::none()).expect("load file");
    let permissions = &manager.config().permissions;

    assert_eq!(permissions.default_policy, PermissionPolicy::Standard);
    let fetcher = &permissions.tools["fetcher"];
    assert_eq!(fetcher.policy, Some(PermissionPolicy::Elevated));
    assert_eq!(fetcher.deny, vec!["KILL_PROCESSES".to_string()]);
    assert!(fetcher.allow.is_empty());
}

#[test]
fn invalid_values_fail_validation() {
    let workspace = assert_fs::TempDir::new().expect("failed to create workspace");
    fs::write(
        workspace.path().join(CONFIG_FILE_NAME),
        "[monitor]\ninterval_ms = 0\n",
    )
    .expect("write config");

    let err = ConfigManager::load_from_workspace_with(workspace.path(), &ConfigSearchPaths::none())
        .expect_err("zero interval must be rejected");
    assert!(format!("{err:#}").contains("interval_ms"));
}

#[test]
fn malformed_workspace_file_is_an_error() {
    let workspace = assert_fs::TempDir::new().expect("failed to create workspace");
    fs::write(workspace.path().join(CONFIG_FILE_NAME), "[limits\n").expect("write config");

    assert!(
        ConfigManager::load_from_workspace_with(workspace.path(), &ConfigSearchPaths::none())
            .is_err()
    );
}

#[test]
fn builder_overrides_take_precedence() {
    let workspace = assert_fs::TempDir::new().expect("failed to create workspace");
    fs::write(
        workspace.path().join(CONFIG_FILE_NAME),
        "[limits]\nmax_cpu_time = 10.0\n",
    )
    .expect("write config");

    let manager = ConfigBuilder::new()
        .workspace(workspace.path())
        .search_paths(ConfigSearchPaths::none())
        .set("limits.max_cpu_time", 2.5)
        .set_from_str(&[("monitor.enabled".to_string(), "false".to_string())])
        .build()
        .expect("build config");

    assert_eq!(manager.config().limits.max_cpu_time, 2.5);
    assert!(!manager.config().monitor.enabled);
    let last = manager.layer_stack().layers().last().expect("runtime layer");
    assert_eq!(last.source, ConfigLayerSource::Runtime);
}

#[test]
#[serial]
fn env_config_path_selects_file() {
    let workspace = assert_fs::TempDir::new().expect("failed to create workspace");
    let file = workspace.path().join("explicit.toml");
    fs::write(&file, "[sandbox]\ntermination_grace_ms = 50\n").expect("write config");

    // SAFETY: serialized with other env-mutating tests.
    #[allow(unsafe_code)]
    unsafe {
        std::env::set_var(ENV_CONFIG_PATH, &file);
    }
    let result = ConfigManager::load();
    #[allow(unsafe_code)]
    unsafe {
        std::env::remove_var(ENV_CONFIG_PATH);
    }

    let manager = result.expect("load from env path");
    assert_eq!(manager.config().sandbox.termination_grace_ms, 50);
    assert_eq!(manager.config_path(), Some(file.as_path()));
}
