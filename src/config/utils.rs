// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-counter-logger project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration utilities
//!
//! This module provides utility functions for working with configuration
//! settings, including validation and schema management.

use std::collections::HashSet;

use anyhow::{Context, Result};
use log::{debug, warn};

use super::{Config, StorageBackend};

/// Output the embedded JSON schema to the console.
///
/// This function is called when the `--show-config-schema` flag is provided
/// on the command line.
///
/// # Example
///
/// ```bash
/// ./rust_counter_logger --show-config-schema > config_schema.json
/// ```
pub fn output_config_schema() -> Result<()> {
    let schema_str = include_str!("../../resources/config.schema.json");

    let schema: serde_json::Value =
        serde_json::from_str(schema_str).context("Failed to parse JSON schema")?;

    let formatted_schema =
        serde_json::to_string_pretty(&schema).context("Failed to format JSON schema")?;

    println!("{}", formatted_schema);

    Ok(())
}

/// Check if a string is a valid IP address
///
/// Validates that a string represents a valid IPv4 or IPv6 address,
/// or is one of the special values like "localhost" or "0.0.0.0".
///
/// # Arguments
///
/// * `addr` - The address string to validate
///
/// # Returns
///
/// `true` if the address is valid, `false` otherwise
pub fn is_valid_ip_address(addr: &str) -> bool {
    if addr.parse::<std::net::IpAddr>().is_ok() {
        return true;
    }

    matches!(addr, "localhost" | "::" | "::0" | "0.0.0.0")
}

/// Validates the configuration against additional rules that aren't covered by the JSON schema.
///
/// # Arguments
///
/// * `config` - The configuration object to validate
///
/// # Returns
///
/// * `Ok(())` if all validations pass
/// * `Err(anyhow::Error)` with descriptive message if any validation fails
///
/// # Validation Rules
///
/// - **Device identity**: device ids are non-empty and unique
/// - **Channels**: channel numbers are unique per device, the register count
///   is large enough for the counter width, scale is finite
/// - **Timing**: poll intervals between 100 ms and one hour
/// - **Storage**: the InfluxDB URL parses as http(s), batch and queue sizes are coherent
/// - **Health**: the critical memory threshold is above the warning threshold
pub fn validate_specific_rules(config: &Config) -> Result<()> {
    debug!("Performing additional validation checks");

    let mut ids = HashSet::new();
    for device in &config.devices {
        if device.id.trim().is_empty() {
            anyhow::bail!("Device id must not be empty");
        }
        if !ids.insert(device.id.as_str()) {
            anyhow::bail!("Duplicate device id: {}", device.id);
        }
        if device.port == 0 {
            anyhow::bail!("Invalid port number for device {}: 0", device.id);
        }
        if !is_valid_ip_address(&device.address) {
            // Host names are resolved at connect time
            debug!(
                "Device {} address '{}' is not an IP literal, it will be resolved",
                device.id, device.address
            );
        }
        if !(100..=3_600_000).contains(&device.poll_interval_ms) {
            anyhow::bail!(
                "Poll interval of device {} must be between 100 ms and 1 hour, got {} ms",
                device.id,
                device.poll_interval_ms
            );
        }
        if device.enabled && device.channels.is_empty() {
            warn!("Device {} has no channels configured", device.id);
        }

        let mut channels = HashSet::new();
        for channel in &device.channels {
            if !channels.insert(channel.channel) {
                anyhow::bail!(
                    "Duplicate channel {} on device {}",
                    channel.channel,
                    device.id
                );
            }
            if !matches!(channel.counter_bits, 16 | 32 | 64) {
                anyhow::bail!(
                    "Channel {} on device {}: counter_bits must be 16, 32 or 64",
                    channel.channel,
                    device.id
                );
            }
            if !(1..=4).contains(&channel.register_count)
                || u32::from(channel.register_count) * 16 < u32::from(channel.counter_bits)
            {
                anyhow::bail!(
                    "Channel {} on device {}: {} registers cannot hold a {}-bit counter",
                    channel.channel,
                    device.id,
                    channel.register_count,
                    channel.counter_bits
                );
            }
            if u32::from(channel.start_address) + u32::from(channel.register_count) > 0x1_0000 {
                anyhow::bail!(
                    "Channel {} on device {}: register block exceeds the address space",
                    channel.channel,
                    device.id
                );
            }
            if !channel.scale.is_finite() {
                anyhow::bail!(
                    "Channel {} on device {}: scale must be finite",
                    channel.channel,
                    device.id
                );
            }
            if let Some(max_rate) = channel.max_rate {
                if !(max_rate.is_finite() && max_rate > 0.0) {
                    anyhow::bail!(
                        "Channel {} on device {}: max_rate must be a positive number",
                        channel.channel,
                        device.id
                    );
                }
            }
            if channel.window_size == Some(0) || channel.window_size == Some(1) {
                anyhow::bail!(
                    "Channel {} on device {}: window_size must hold at least two samples",
                    channel.channel,
                    device.id
                );
            }
        }
    }

    if config.acquisition.window_size < 2 {
        anyhow::bail!("acquisition.window_size must hold at least two samples");
    }
    if config.acquisition.retry.max_attempts == 0 {
        anyhow::bail!("acquisition.retry.max_attempts must be at least 1");
    }

    if config.storage.backend == StorageBackend::InfluxDb {
        let url = url::Url::parse(&config.storage.influxdb.url)
            .with_context(|| format!("Invalid InfluxDB URL: {}", config.storage.influxdb.url))?;
        if !matches!(url.scheme(), "http" | "https") {
            anyhow::bail!("InfluxDB URL must use http or https: {}", url);
        }
    }
    if config.storage.batch_size == 0 || config.storage.queue_capacity == 0 {
        anyhow::bail!("storage.batch_size and storage.queue_capacity must be positive");
    }
    if config.storage.batch_size > config.storage.queue_capacity {
        warn!(
            "storage.batch_size ({}) exceeds queue_capacity ({}), batches will be flushed by timer",
            config.storage.batch_size, config.storage.queue_capacity
        );
    }

    if config.health.memory_critical_mb <= config.health.memory_warning_mb {
        anyhow::bail!("health.memory_critical_mb must be greater than memory_warning_mb");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChannelConfig, DeviceConfig};

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_specific_rules(&Config::default()).is_ok());
    }

    #[test]
    fn test_duplicate_device_rejected() {
        let mut config = Config::default();
        config.devices.push(DeviceConfig::default());
        let err = validate_specific_rules(&config).unwrap_err();
        assert!(err.to_string().contains("Duplicate device id"));
    }

    #[test]
    fn test_counter_width_must_fit_registers() {
        let mut config = Config::default();
        let mut channel = ChannelConfig::counter32(5, 10);
        channel.register_count = 1;
        config.devices[0].channels.push(channel);
        assert!(validate_specific_rules(&config).is_err());
    }

    #[test]
    fn test_invalid_storage_url() {
        let mut config = Config::default();
        config.storage.influxdb.url = "ftp://example.com".to_string();
        assert!(validate_specific_rules(&config).is_err());

        config.storage.backend = StorageBackend::Memory;
        assert!(validate_specific_rules(&config).is_ok());
    }

    #[test]
    fn test_ip_address_validation() {
        assert!(is_valid_ip_address("192.168.1.100"));
        assert!(is_valid_ip_address("::1"));
        assert!(is_valid_ip_address("localhost"));
        assert!(!is_valid_ip_address("plc.local"));
    }
}
