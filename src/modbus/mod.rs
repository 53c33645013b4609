// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-counter-logger project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus communication module
//!
//! This module reads hardware counters from field devices over Modbus TCP.
//!
//! ## Key Components
//!
//! - [`DeviceConnectionPool`]: one persistent connection per device, retries with
//!   backoff, per-device statistics and connectivity events.
//! - [`DeviceConnection`]: a single reconnecting client context.
//! - [`register`]: word order aware counter decoding.
//! - [`CounterSimulator`]: an in-process counter module for tests and demos.
//!
//! ## Usage
//!
//! ```no_run
//! use rust_counter_logger::config::Config;
//! use rust_counter_logger::modbus::DeviceConnectionPool;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Config::default();
//! let pool = DeviceConnectionPool::new(&config.devices, &config.acquisition);
//! let reading = pool.read_channel("adam-6051-01", 0).await?;
//! println!("counter = {}", reading.raw_value);
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod pool;
pub mod register;
pub mod simulator;

pub use connection::DeviceConnection;
pub use pool::{DeviceConnectionPool, DeviceEvent, DeviceEventKind, DeviceStatsSnapshot};
pub use simulator::CounterSimulator;
