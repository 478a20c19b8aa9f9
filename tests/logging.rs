use confine::config::{LogLevel, LoggingConfig};
use confine::init_tracing;

#[test]
fn file_logging_installs_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let log_file = dir.path().join("logs").join("confine.log");
    let config = LoggingConfig {
        level: LogLevel::Debug,
        targets: vec!["logging".into()],
        file: Some(log_file.clone()),
    };

    assert!(init_tracing(&config).expect("first init"));
    tracing::info!(marker = 7, "written to the log file");
    assert!(log_file.is_file());
    if std::env::var_os("RUST_LOG").is_none() {
        let contents = std::fs::read_to_string(&log_file).expect("read log");
        assert!(contents.contains("written to the log file"), "{contents}");
    }

    let fallback = LoggingConfig::default();
    assert!(!init_tracing(&fallback).expect("second init"));
}
