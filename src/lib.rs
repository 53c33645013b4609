// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-counter-logger project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Rust Counter Logger library
//!
//! Polls industrial counter modules over Modbus TCP, turns raw register values
//! into rates with wraparound handling, and stores the readings in a
//! time-series database through a batching, backpressured writer.
//!
//! Data flow: [`acquisition::PollScheduler`] → [`modbus::DeviceConnectionPool`]
//! → [`processing::CounterProcessor`] → [`storage::StorageWriter`].
//! The [`health::HealthOrchestrator`] observes every stage independently.

pub mod acquisition;
pub mod config;
pub mod daemon;
pub mod error;
pub mod health;
pub mod modbus;
pub mod processing;
pub mod storage;
pub mod utility;
