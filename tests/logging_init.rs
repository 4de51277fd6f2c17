//! Global logging setup.
//!
//! Installing a subscriber is process-wide, so this lives in its own test
//! binary with a single test.

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use classify_store::{LogFormat, LoggingConfig, init_logging};

#[test]
fn test_json_file_logging_installs_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("logs").join("store.log");
    let config = LoggingConfig {
        level: "info".to_string(),
        format: LogFormat::Json,
        file: Some(path.clone()),
    };

    init_logging(&config).expect("first init");
    tracing::warn!(marker = "written", "json line");

    let second = init_logging(&config).unwrap_err();
    assert!(second.to_string().contains("already initialized"), "{second}");

    // RUST_LOG would shadow the configured level.
    if std::env::var_os("RUST_LOG").is_none() {
        let contents = std::fs::read_to_string(&path).unwrap();
        let line = contents
            .lines()
            .find(|l| l.contains("\"marker\":\"written\""))
            .unwrap_or_else(|| panic!("no event in {contents:?}"));
        let event: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(event["level"], "WARN");
    }
}
