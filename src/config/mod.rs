// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-counter-logger project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration management for the counter logger
//!
//! This module provides functionality for loading, validating, and applying
//! configuration settings for the acquisition daemon. The configuration
//! is backed by a YAML file and validated against a JSON schema for robustness.
//!
//! ## Configuration Structure
//!
//! The configuration is organized as a nested structure with sections:
//! - `acquisition`: Polling, read timeout and retry policy
//! - `devices`: Field devices and their counter channels
//! - `storage`: Time-series backend and batching writer settings
//! - `health`: Health monitoring cadence and thresholds
//!
//! ## Usage
//!
//! ```no_run
//! use rust_counter_logger::config::Config;
//! use std::path::Path;
//!
//! // Load config from file, creates a default if not found
//! let mut config = Config::from_file(Path::new("config.yaml")).unwrap();
//!
//! // Apply command line overrides if needed
//! config.apply_args(
//!     Some("http://influx:8086".to_string()), // Storage URL
//!     Some(1000),                             // Poll interval (ms)
//!     false,                                  // Dry run
//! );
//!
//! println!("Polling {} devices", config.devices.len());
//! ```

pub mod acquisition;
pub mod device;
pub mod health;
pub mod storage;
pub mod utils;

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, error};
use serde::{Deserialize, Serialize};

// Re-export all types for public API
pub use acquisition::{AcquisitionConfig, RetryConfig};
pub use device::{ChannelConfig, DeviceConfig, RegisterType, WordOrder};
pub use health::HealthConfig;
pub use storage::{InfluxDbConfig, StorageBackend, StorageConfig};
pub use utils::{is_valid_ip_address, output_config_schema, validate_specific_rules};

/// Root configuration structure for the counter logger.
///
/// # Structure
///
/// The configuration is deserialized from and serialized to YAML using serde.
/// The raw document is validated against the embedded JSON schema before
/// deserialization, then [`validate_specific_rules`] checks the cross-field
/// constraints the schema cannot express.
///
/// # Default Values
///
/// Each section uses default values when not explicitly specified in the
/// configuration file. An absent `devices` list means nothing is polled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Global acquisition settings shared by all devices.
    #[serde(default)]
    pub acquisition: AcquisitionConfig,

    /// Field devices to poll.
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,

    /// Storage writer and backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Health monitoring settings.
    #[serde(default)]
    pub health: HealthConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            acquisition: AcquisitionConfig::default(),
            devices: vec![DeviceConfig::default()],
            storage: StorageConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

impl Config {
    /// Helper method to create a sample config file when validation fails
    fn create_sample_config<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        let sample_path = path.with_extension("sample.yaml");
        debug!("Original path: {:?}, Sample path: {:?}", path, sample_path);

        if let Some(parent) = sample_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                debug!("Creating parent directory: {:?}", parent);
                fs::create_dir_all(parent).with_context(|| {
                    format!(
                        "Failed to create parent directory for sample config at {:?}",
                        parent
                    )
                })?;
            }
        }

        Self::default()
            .save_to_file(&sample_path)
            .with_context(|| format!("Failed to save sample config to {:?}", sample_path))?;

        error!(
            "Sample configuration file created at {:?}\nPlease edit and rename it",
            sample_path
        );
        Ok(())
    }

    /// Load configuration from a file
    ///
    /// A missing file is created with default values. A file failing schema
    /// validation, deserialization or the specific rules produces a
    /// `<name>.sample.yaml` next to it and an error.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(
                "Configuration file not found at {:?}, creating default",
                path
            );
            let default_config = Self::default();
            default_config.save_to_file(path)?;
            return Ok(default_config);
        }

        debug!("Loading configuration from {:?}", path);
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file at {:?}", path))?;

        Self::from_yaml_str(&contents, Some(path))
    }

    /// Parse and validate a YAML document.
    ///
    /// `origin` is used for error messages and to place the sample file.
    pub fn from_yaml_str(contents: &str, origin: Option<&Path>) -> Result<Self> {
        let display = origin
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<inline>".to_string());

        // First step: convert YAML to a generic Value
        let yaml_value: serde_yml::Value = serde_yml::from_str(contents)
            .with_context(|| format!("Failed to parse YAML configuration from {}", display))?;

        // Convert to JSON Value for validation
        let json_value = serde_json::to_value(&yaml_value).with_context(|| {
            format!("Failed to convert YAML to JSON for validation: {}", display)
        })?;

        let schema_str = include_str!("../../resources/config.schema.json");
        let schema: serde_json::Value =
            serde_json::from_str(schema_str).context("Failed to parse JSON schema")?;

        let validator = jsonschema::draft202012::options()
            .should_validate_formats(true)
            .build(&schema)?;

        debug!("Validating {} configuration against schema", display);
        if let Err(error) = validator.validate(&json_value) {
            error!("Configuration validation error before deserialization");
            if let Some(path) = origin {
                Self::create_sample_config(path)?;
            }
            anyhow::bail!("Configuration validation failed: {}", error);
        }

        debug!("Schema validation passed, deserializing into Config structure");
        let config: Config = match serde_yml::from_str(contents) {
            Ok(config) => config,
            Err(err) => {
                error!("Configuration deserialization error: {}", err);
                if let Some(path) = origin {
                    if let Err(e) = Self::create_sample_config(path) {
                        error!("Failed to create sample config: {}", e);
                    }
                }
                return Err(anyhow::anyhow!(
                    "Failed to deserialize configuration from {}: {}",
                    display,
                    err
                ));
            }
        };

        if let Err(err) = validate_specific_rules(&config) {
            error!("Configuration specific validation error: {}", err);
            if let Some(path) = origin {
                Self::create_sample_config(path)?;
            }
            return Err(err);
        }

        Ok(config)
    }

    /// Save the configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml =
            serde_yml::to_string(self).context("Failed to serialize configuration to YAML")?;

        let mut file = File::create(path.as_ref())
            .with_context(|| format!("Failed to create config file at {:?}", path.as_ref()))?;

        file.write_all(yaml.as_bytes())
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Validate an in-memory configuration against the specific rules.
    pub fn validate(&self) -> Result<()> {
        validate_specific_rules(self)
    }

    /// Apply command line arguments to override configuration values.
    ///
    /// # Parameters
    ///
    /// * `storage_url` - Optional InfluxDB base URL
    /// * `poll_interval_ms` - Optional poll interval applied to every device
    /// * `dry_run` - If true, readings go to the in-memory store instead of InfluxDB
    pub fn apply_args(
        &mut self,
        storage_url: Option<String>,
        poll_interval_ms: Option<u64>,
        dry_run: bool,
    ) {
        if let Some(url) = storage_url {
            debug!("Overriding storage URL from command line: {}", url);
            self.storage.influxdb.url = url;
        }

        if let Some(interval) = poll_interval_ms {
            debug!("Overriding poll interval from command line: {} ms", interval);
            for device in &mut self.devices {
                device.poll_interval_ms = interval;
            }
        }

        if dry_run {
            debug!("Dry run requested, using in-memory storage backend");
            self.storage.backend = StorageBackend::Memory;
        }
    }
}
