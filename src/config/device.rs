// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-counter-logger project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Field device configuration
//!
//! A device is a Modbus TCP endpoint (typically an ADAM-6051 style counter
//! module) exposing one or more hardware counters. Each counter is a
//! [`ChannelConfig`] describing where its registers live and how to turn the
//! raw register words into an engineering value.
//!
//! ## Example
//!
//! ```yaml
//! devices:
//!   - id: line1-counter
//!     address: 192.168.1.100
//!     port: 502
//!     unit_id: 1
//!     poll_interval_ms: 5000
//!     channels:
//!       - channel: 0
//!         start_address: 0
//!         register_count: 2
//!         counter_bits: 32
//!         scale: 1.0
//!         unit: bottles
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Modbus register table a channel is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RegisterType {
    /// Function code 0x03
    #[default]
    Holding,
    /// Function code 0x04
    Input,
}

/// Order of the 16-bit words making up a multi-register counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WordOrder {
    /// Least significant word at the lowest address (ADAM-6051 layout).
    #[default]
    LowFirst,
    /// Most significant word at the lowest address.
    HighFirst,
}

/// Configuration of a single field device.
///
/// Devices are immutable once loaded; the scheduler and the connection pool
/// keep shared references to them for the lifetime of the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Unique device identifier, used as the `device_id` tag in storage.
    pub id: String,

    /// Host name or IP address of the Modbus TCP endpoint.
    pub address: String,

    /// TCP port, 502 by default.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Modbus unit (slave) identifier.
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,

    /// Free-form location label, written as a tag when present.
    #[serde(default)]
    pub location: Option<String>,

    /// Disabled devices are loaded but never polled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Interval between the start of two poll cycles, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Per-device read timeout override in milliseconds.
    ///
    /// Falls back to `acquisition.read_timeout_ms` when absent.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Counter channels exposed by this device.
    #[serde(default)]
    pub channels: Vec<ChannelConfig>,
}

/// Configuration of one hardware counter on a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Channel number, unique within the device.
    pub channel: u16,

    /// Optional human readable name.
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub register_type: RegisterType,

    /// First register address of the counter.
    pub start_address: u16,

    /// Number of 16-bit registers holding the counter (1 to 4).
    #[serde(default = "default_register_count")]
    pub register_count: u16,

    #[serde(default)]
    pub word_order: WordOrder,

    /// Hardware counter width in bits (16, 32 or 64), used for wraparound correction.
    #[serde(default = "default_counter_bits")]
    pub counter_bits: u8,

    /// Multiplier applied to the raw counter to obtain the processed value.
    #[serde(default = "default_scale")]
    pub scale: f64,

    /// Unit label of the processed value.
    #[serde(default = "default_unit")]
    pub unit: String,

    /// Maximum plausible rate in counts per second.
    ///
    /// Deltas implying a higher rate are flagged as `Bad`. `null` disables the ceiling.
    #[serde(default = "default_max_rate")]
    pub max_rate: Option<f64>,

    /// Raw value above which an approaching-overflow warning is logged.
    #[serde(default)]
    pub overflow_warning: Option<u64>,

    /// Rolling window capacity override for this channel.
    #[serde(default)]
    pub window_size: Option<usize>,
}

fn default_port() -> u16 {
    502
}

fn default_unit_id() -> u8 {
    1
}

fn default_enabled() -> bool {
    true
}

fn default_poll_interval_ms() -> u64 {
    5000
}

fn default_register_count() -> u16 {
    2
}

fn default_counter_bits() -> u8 {
    32
}

fn default_scale() -> f64 {
    1.0
}

fn default_unit() -> String {
    "counts".to_string()
}

fn default_max_rate() -> Option<f64> {
    Some(10_000.0)
}

impl DeviceConfig {
    /// Poll interval as a [`Duration`].
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Socket address string `host:port`.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// Look up a channel definition by number.
    pub fn channel(&self, channel: u16) -> Option<&ChannelConfig> {
        self.channels.iter().find(|c| c.channel == channel)
    }
}

impl ChannelConfig {
    /// Create a 32-bit holding register counter at `start_address`.
    pub fn counter32(channel: u16, start_address: u16) -> Self {
        Self {
            channel,
            name: None,
            register_type: RegisterType::Holding,
            start_address,
            register_count: 2,
            word_order: WordOrder::LowFirst,
            counter_bits: 32,
            scale: default_scale(),
            unit: default_unit(),
            max_rate: default_max_rate(),
            overflow_warning: None,
            window_size: None,
        }
    }

    /// Largest value the hardware counter can hold before wrapping.
    pub fn max_counter_value(&self) -> u64 {
        max_value_for_bits(self.counter_bits)
    }
}

/// Largest value representable on `bits` bits, saturating at 64.
pub fn max_value_for_bits(bits: u8) -> u64 {
    if bits >= 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            id: "adam-6051-01".to_string(),
            address: "127.0.0.1".to_string(),
            port: default_port(),
            unit_id: default_unit_id(),
            location: Some("production-line-1".to_string()),
            enabled: true,
            poll_interval_ms: default_poll_interval_ms(),
            timeout_ms: None,
            channels: vec![ChannelConfig::counter32(0, 0), ChannelConfig::counter32(1, 2)],
        }
    }
}
