// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-counter-logger project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Counter acquisition
//!
//! Reading types and the per-device poll scheduler.

pub mod reading;
pub mod scheduler;

pub use reading::{DataQuality, ProcessedReading, RawReading};
pub use scheduler::{CycleReport, PollScheduler, SchedulerStatsSnapshot};
