// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-counter-logger project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Counter data processing
//!
//! - [`window`]: fixed-capacity sample history per device channel
//! - [`counter`]: rate computation, wraparound correction and quality classification

pub mod counter;
pub mod window;

pub use counter::{ChannelSettings, CounterProcessor, ProcessingStats, ProcessingStatsSnapshot};
pub use window::{ChannelWindow, Sample};
