// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-counter-logger project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use anyhow::Result;
use rust_counter_logger::config::Config;
use std::fs;
use std::path::Path;
use std::sync::Once;
use tempfile::tempdir;

static INIT: Once = Once::new();

// Setup logger for tests
fn setup() {
    INIT.call_once(|| {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::Debug)
            .is_test(true)
            .try_init();
    });
}

fn assert_sample_created(config_path: &Path) -> Result<()> {
    let sample_path = config_path.with_extension("sample.yaml");
    assert!(
        Path::new(&sample_path).exists(),
        "Sample config file was not created"
    );

    // Load and verify the sample file is valid
    let sample_config = Config::from_file(&sample_path)?;
    assert_eq!(sample_config.devices.len(), 1);
    assert_eq!(sample_config.devices[0].port, 502);
    Ok(())
}

#[test]
fn test_config_type_mismatch_creates_sample_file() -> Result<()> {
    setup();
    let temp_dir = tempdir()?;
    let config_path = temp_dir.path().join("config.yaml");

    // Valid YAML but wrong types
    let invalid_yaml = r#"
acquisition:
  read_timeout_ms: "fast"
devices:
  - id: 12
    address: []
storage:
  batch_size: -3
"#;
    fs::write(&config_path, invalid_yaml)?;

    let result = Config::from_file(&config_path);
    assert!(result.is_err(), "Config loading should have failed");
    assert_sample_created(&config_path)
}

#[test]
fn test_config_schema_violation_creates_sample_file() -> Result<()> {
    setup();
    let temp_dir = tempdir()?;
    let config_path = temp_dir.path().join("config.yaml");

    // 24-bit counters are not supported
    let invalid_config = r#"
devices:
  - id: adam-1
    address: 192.168.1.100
    channels:
      - channel: 0
        start_address: 0
        counter_bits: 24
"#;
    fs::write(&config_path, invalid_config)?;

    let result = Config::from_file(&config_path);
    let message = result.unwrap_err().to_string();
    assert!(message.contains("validation failed"), "{}", message);
    assert_sample_created(&config_path)
}

#[test]
fn test_unknown_field_is_rejected() -> Result<()> {
    setup();
    let temp_dir = tempdir()?;
    let config_path = temp_dir.path().join("config.yaml");

    fs::write(&config_path, "storage:\n  batch_sise: 10\n")?;

    assert!(Config::from_file(&config_path).is_err());
    assert_sample_created(&config_path)
}

#[test]
fn test_duplicate_device_ids_fail_specific_rules() -> Result<()> {
    setup();
    let temp_dir = tempdir()?;
    let config_path = temp_dir.path().join("config.yaml");

    // Passes the schema, fails the cross-field rules
    let duplicated = r#"
devices:
  - id: adam-1
    address: 192.168.1.100
  - id: adam-1
    address: 192.168.1.101
"#;
    fs::write(&config_path, duplicated)?;

    let message = Config::from_file(&config_path).unwrap_err().to_string();
    assert!(message.contains("Duplicate device id"), "{}", message);
    assert_sample_created(&config_path)
}

#[test]
fn test_inline_document_error_writes_no_sample() {
    setup();
    let result = Config::from_yaml_str("devices: [ { id: x } ]", None);
    assert!(result.is_err());
}
