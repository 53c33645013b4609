// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-counter-logger project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Reading types flowing through the pipeline

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A successful register read, as produced by the connection pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawReading {
    pub device_id: String,
    pub channel: u16,
    /// Counter value decoded from the register words.
    pub raw_value: u64,
    pub timestamp: DateTime<Utc>,
    /// Time spent on the read, retries included.
    pub read_duration: Duration,
}

/// Confidence attached to a processed reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataQuality {
    Good,
    /// Not enough history to compute a rate.
    Uncertain,
    /// Rate could not be trusted; the previous rate is carried over.
    Bad,
    /// A single counter wraparound was corrected.
    OverflowCorrected,
}

impl DataQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataQuality::Good => "good",
            DataQuality::Uncertain => "uncertain",
            DataQuality::Bad => "bad",
            DataQuality::OverflowCorrected => "overflow_corrected",
        }
    }
}

impl fmt::Display for DataQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A reading after rate computation, ready to be persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedReading {
    pub device_id: String,
    pub channel: u16,
    pub raw_value: u64,
    /// `raw_value` multiplied by the channel scale.
    pub processed_value: f64,
    /// Counts per second; absent until two samples exist.
    pub rate: Option<f64>,
    pub quality: DataQuality,
    pub timestamp: DateTime<Utc>,
    pub unit: String,
}
