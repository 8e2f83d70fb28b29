//! Loading pipeline configuration from disk.

use std::io::Write;
use testport::config::RetryContext;
use testport::{ConfigError, PipelineConfig};

#[test]
fn loads_yaml_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "worker_limit: 2\nstage_config_version: 7\noracle_command: python3 oracle.py\ntransform:\n  max_retries: 5\nvalidate:\n  retry_context: issues_and_prior_attempt\ncache:\n  capacity: 500\n"
    )
    .unwrap();

    let config = PipelineConfig::load(file.path()).unwrap();
    assert_eq!(config.worker_limit, 2);
    assert_eq!(config.stage_config_version, 7);
    assert_eq!(config.oracle_command.as_deref(), Some("python3 oracle.py"));
    assert_eq!(config.transform.max_retries, 5);
    assert_eq!(config.transform.initial_backoff_ms, 500);
    assert_eq!(config.validate.retry_context, RetryContext::IssuesAndPriorAttempt);
    assert_eq!(config.cache.capacity, Some(500));
}

#[test]
fn explicit_path_must_exist() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.yaml");

    let err = PipelineConfig::load_or_default(Some(&missing)).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
}

#[test]
fn invalid_values_are_rejected_on_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, "progress:\n  buffer: 0\n").unwrap();

    let err = PipelineConfig::load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));
}
