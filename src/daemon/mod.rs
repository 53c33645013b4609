// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-counter-logger project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! # Daemon Module
//!
//! Wires the device pool, the poll scheduler, the storage writer and the
//! health orchestrator together and manages their lifetime.
//!
//! ## Shutdown order
//!
//! 1. Poll loops stop between cycles.
//! 2. The storage writer closes its intake and drains.
//! 3. Device connections are closed.
//! 4. The health monitor and heartbeat stop.
//!
//! ## Usage
//!
//! ```no_run
//! use rust_counter_logger::{config::Config, daemon::Daemon};
//!
//! async fn run() -> anyhow::Result<()> {
//!     let config = Config::from_file("config.yaml")?;
//!
//!     // Create and launch daemon
//!     let mut daemon = Daemon::new();
//!     daemon.launch(&config).await?;
//!
//!     // Wait for shutdown signal (e.g., Ctrl+C)
//!     tokio::signal::ctrl_c().await?;
//!
//!     // Clean shutdown
//!     daemon.shutdown();
//!     daemon.join().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod launch_daemon;

pub use launch_daemon::{Daemon, OnceSummary};
