//! Integration tests for ssp-config
//!
//! These tests verify the full config loading pipeline with real file system operations.

use ssp_config::{Config, ConfigError, PreopenConfig};
use std::path::PathBuf;
use tempfile::tempdir;

/// Test config loading from a real config file
#[test]
fn test_load_config_from_file() {
    let temp = tempdir().unwrap();
    let ssp_dir = temp.path().join(".ssp");
    std::fs::create_dir_all(&ssp_dir).unwrap();

    let config_content = r#"
[sandbox]
inherit_stdio = false
args = ["prog", "--flag"]
env = ["LANG=C"]
preopens = [
    { host = "/srv/data", guest = "/data" },
    { host = "/tmp", guest = "/tmp" },
]

[logging]
level = "debug"
"#;
    std::fs::write(ssp_dir.join("config.toml"), config_content).unwrap();

    let config = Config::load_file(&ssp_dir.join("config.toml")).unwrap();

    assert!(!config.sandbox.inherit_stdio);
    assert_eq!(config.sandbox.args, vec!["prog", "--flag"]);
    assert_eq!(config.sandbox.env, vec!["LANG=C"]);
    assert_eq!(
        config.sandbox.preopens[0],
        PreopenConfig {
            host: PathBuf::from("/srv/data"),
            guest: "/data".to_string(),
        }
    );
    assert_eq!(config.logging.level, "debug");
    assert_eq!(
        config.logging.log_level().unwrap(),
        ssp_config::logging::LogLevel::Debug
    );
}

/// Test config hierarchy: project config overrides global
#[test]
fn test_config_hierarchy_project_overrides_global() {
    let temp = tempdir().unwrap();

    let global_dir = temp.path().join("global/.ssp");
    std::fs::create_dir_all(&global_dir).unwrap();
    let global_config = r#"
[sandbox]
preopens = [{ host = "/home/me", guest = "/home" }]
args = ["global-prog"]

[logging]
level = "info"
"#;
    std::fs::write(global_dir.join("config.toml"), global_config).unwrap();

    let project_dir = temp.path().join("project/.ssp");
    std::fs::create_dir_all(&project_dir).unwrap();
    let project_config = r#"
[sandbox]
preopens = [{ host = ".", guest = "." }]
"#;
    std::fs::write(project_dir.join("config.toml"), project_config).unwrap();

    let mut config = Config::load_file(&global_dir.join("config.toml")).unwrap();
    config.merge(Config::load_file(&project_dir.join("config.toml")).unwrap());

    assert_eq!(config.sandbox.preopens.len(), 1);
    assert_eq!(config.sandbox.preopens[0].guest, ".");
    assert_eq!(config.sandbox.args, vec!["global-prog"]);
    assert_eq!(config.logging.level, "info");
}

/// Partial configs fill in defaults for every missing field
#[test]
fn test_partial_config_uses_defaults() {
    let config: Config = toml::from_str("[logging]\nlevel = \"trace\"\n").unwrap();
    assert!(config.sandbox.inherit_stdio);
    assert!(config.sandbox.preopens.is_empty());

    let empty: Config = toml::from_str("").unwrap();
    assert_eq!(empty, Config::default());
}

#[test]
fn test_malformed_config_is_an_error() {
    let temp = tempdir().unwrap();
    let path = temp.path().join("config.toml");
    std::fs::write(&path, "[sandbox\npreopens = 3").unwrap();
    assert!(matches!(
        Config::load_file(&path).unwrap_err(),
        ConfigError::Toml(_)
    ));

    assert!(matches!(
        Config::load_file(&temp.path().join("missing.toml")).unwrap_err(),
        ConfigError::Io(_)
    ));
}

#[test]
fn test_preopen_requires_host_and_guest() {
    let err = toml::from_str::<Config>("[sandbox]\npreopens = [{ host = \"/x\" }]\n");
    assert!(err.is_err());
}
