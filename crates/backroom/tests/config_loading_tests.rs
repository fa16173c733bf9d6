//! Table-driven tests for configuration loading and validation.

mod common;

use std::path::PathBuf;

use backroom::config::{default_config_path, load_config_from_str, ConfigFormat};
use backroom::config::loader::CONFIG_ENV;
use backroom::{EndpointStatus, Strategy};
use serial_test::serial;

/// Represents a single config loading test case.
struct ConfigTestCase {
    /// Test case name for identification.
    name: &'static str,
    /// The config content to test.
    content: &'static str,
    format: ConfigFormat,
    /// Whether loading should succeed.
    should_succeed: bool,
    /// Expected error substring (if should_succeed is false).
    expected_error: Option<&'static str>,
}

const CONFIG_TESTS: &[ConfigTestCase] = &[
    ConfigTestCase {
        name: "valid_minimal",
        content: r#"{ "version": "1.0" }"#,
        format: ConfigFormat::Json,
        should_succeed: true,
        expected_error: None,
    },
    ConfigTestCase {
        name: "valid_full_yaml",
        content: r#"
version: "1.0"
tick_interval_ms: 2000
max_assignments_per_tick: 16
analysis_timeout_ms: 30000
database_path: ~/.backroom/data/test.db
inbox_directory: /srv/backroom/inbox
defaults:
  strategy: most-accurate
  max_concurrent: 3
  max_retries: 2
  parallel_processing: false
  required_capabilities: [regulatory-analysis, document-processing]
  load_per_job: 25
endpoints:
  - id: anthropic-us-west
    name: Claude US West
    provider: Anthropic
    model: claude-3
    region: us-west-2
    capabilities: [regulatory-analysis, document-processing]
    max_load: 100
    latency_ms: 140
    throughput: 42
    reliability: 99.5
    accuracy: 96
    cost_per_unit: 0.025
    base_url: https://analysis.internal.example/claude
"#,
        format: ConfigFormat::Yaml,
        should_succeed: true,
        expected_error: None,
    },
    ConfigTestCase {
        name: "missing_version",
        content: r#"{ "tick_interval_ms": 1000 }"#,
        format: ConfigFormat::Json,
        should_succeed: false,
        expected_error: Some("version"),
    },
    ConfigTestCase {
        name: "wrong_version",
        content: r#"{ "version": "0.9" }"#,
        format: ConfigFormat::Json,
        should_succeed: false,
        expected_error: None,
    },
    ConfigTestCase {
        name: "invalid_strategy",
        content: r#"{ "version": "1.0", "defaults": { "strategy": "cheapest" } }"#,
        format: ConfigFormat::Json,
        should_succeed: false,
        expected_error: None,
    },
    ConfigTestCase {
        name: "zero_max_load",
        content: r#"{ "version": "1.0", "endpoints": [
            { "id": "a", "name": "A", "provider": "P", "region": "r", "max_load": 0 }
        ] }"#,
        format: ConfigFormat::Json,
        should_succeed: false,
        expected_error: None,
    },
    ConfigTestCase {
        name: "negative_cost",
        content: r#"{ "version": "1.0", "endpoints": [
            { "id": "a", "name": "A", "provider": "P", "region": "r", "cost_per_unit": -1 }
        ] }"#,
        format: ConfigFormat::Json,
        should_succeed: false,
        expected_error: None,
    },
    ConfigTestCase {
        name: "duplicate_endpoint",
        content: r#"{ "version": "1.0", "endpoints": [
            { "id": "a", "name": "A", "provider": "P", "region": "r" },
            { "id": "a", "name": "B", "provider": "P", "region": "r" }
        ] }"#,
        format: ConfigFormat::Json,
        should_succeed: false,
        expected_error: Some("Duplicate endpoint ID"),
    },
    ConfigTestCase {
        name: "malformed_yaml",
        content: "version: [1.0",
        format: ConfigFormat::Yaml,
        should_succeed: false,
        expected_error: Some("YAML"),
    },
];

#[test]
fn test_config_loading_table() {
    for case in CONFIG_TESTS {
        let result = load_config_from_str(case.content, case.format);
        match (case.should_succeed, result) {
            (true, Ok(_)) => {}
            (true, Err(e)) => panic!("[{}] expected success, got error: {}", case.name, e),
            (false, Ok(_)) => panic!("[{}] expected failure, but config loaded", case.name),
            (false, Err(e)) => {
                if let Some(expected) = case.expected_error {
                    assert!(
                        e.to_string().contains(expected),
                        "[{}] error '{}' does not contain '{}'",
                        case.name,
                        e,
                        expected
                    );
                }
            }
        }
    }
}

#[test]
fn test_full_config_seeds_endpoints() {
    let case = CONFIG_TESTS
        .iter()
        .find(|c| c.name == "valid_full_yaml")
        .unwrap();
    let config = load_config_from_str(case.content, case.format).unwrap();

    assert_eq!(config.defaults.strategy, Strategy::MostAccurate);
    let batch = config.defaults.batch_config();
    assert_eq!(batch.effective_max_concurrent(), 1);
    assert_eq!(batch.required_capabilities.len(), 2);

    let endpoints = config.seed_endpoints();
    assert_eq!(endpoints.len(), 1);
    let endpoint = &endpoints[0];
    assert_eq!(endpoint.status, EndpointStatus::Active);
    assert_eq!(endpoint.load_per_job, 25);
    assert_eq!(endpoint.reliability, 99.5);
    assert!(endpoint.has_capabilities(&batch.required_capabilities));

    let db_path = config.resolved_database_path().unwrap();
    assert!(db_path.ends_with(".backroom/data/test.db"));
    assert!(!db_path.starts_with("~"));
}

#[test]
#[serial]
fn test_config_path_from_environment() {
    std::env::set_var(CONFIG_ENV, "/etc/backroom/config.json");
    assert_eq!(
        default_config_path(),
        Some(PathBuf::from("/etc/backroom/config.json"))
    );

    std::env::remove_var(CONFIG_ENV);
    let fallback = default_config_path();
    if let Some(path) = fallback {
        assert!(path.ends_with("backroom/config.yaml"));
    }
}
