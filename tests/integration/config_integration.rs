//! Configuration loading feeding engine construction

use std::sync::Mutex;
use strata::config::{ConfigLoader, CONFIG_DIR_ENV};
use strata::engine::StateEngine;
use strata::StateError;
use tempfile::TempDir;

static ENV_MUTEX: Mutex<()> = Mutex::new(());

#[test]
fn test_workspace_config_builds_engine() {
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let global = TempDir::new().unwrap();
    let workspace = TempDir::new().unwrap();
    let storage = workspace.path().join("store");
    std::fs::create_dir_all(workspace.path().join("config")).unwrap();
    std::fs::write(
        workspace.path().join("config/strata.toml"),
        format!(
            "[events]\ncapacity = 2\n\n[persistence]\ndir = {:?}\ncompress = true\n",
            storage.display().to_string()
        ),
    )
    .unwrap();

    std::env::set_var(CONFIG_DIR_ENV, global.path());
    let config = ConfigLoader::load(workspace.path());
    std::env::remove_var(CONFIG_DIR_ENV);
    let config = config.unwrap();

    let engine = StateEngine::builder().config(config).build().unwrap();
    assert_eq!(engine.events().capacity(), 2);
    assert_eq!(engine.persistence().dir(), Some(storage.as_path()));

    let ctx = engine.create_context(None).unwrap();
    let persisted = engine
        .persistence()
        .persist(&ctx, strata::PersistOptions::default())
        .unwrap();
    assert!(persisted.compressed);
}

#[test]
fn test_invalid_file_is_reported() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("bad.toml");
    std::fs::write(&path, "[events]\ncapacity = \"lots\"\n").unwrap();

    let err = ConfigLoader::load_file(&path).unwrap_err();
    assert!(matches!(err, StateError::ConfigError(_)));
}

#[test]
fn test_invalid_logging_output_is_reported() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("log.toml");
    std::fs::write(&path, "[logging]\noutput = \"syslog\"\n").unwrap();

    let err = ConfigLoader::load_file(&path).unwrap_err();
    assert!(err.to_string().contains("syslog"));
}
