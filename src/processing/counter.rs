// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-counter-logger project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Counter to rate conversion
//!
//! [`CounterProcessor`] turns [`RawReading`]s into [`ProcessedReading`]s. Each
//! device poll loop owns its own processor, so channel windows are only ever
//! touched by one task and need no locking.
//!
//! ## Algorithm
//!
//! 1. Without an accepted sample the reading is `Uncertain`, has no rate and
//!    becomes the reference.
//! 2. `delta = current - reference`. A negative delta is taken as a single
//!    wraparound and corrected to `(max + 1 - reference) + current`
//!    (`OverflowCorrected`). Values outside the counter width make the wrap
//!    ambiguous and the reading `Bad`; the sample becomes the new reference.
//! 3. `rate = delta / elapsed`. A non-increasing timestamp or a rate above the
//!    channel ceiling makes the reading `Bad`; the previous rate is carried
//!    over and the sample is kept out of the window, so a single spike does
//!    not poison the next delta. After [`REBASELINE_AFTER`] rejections in a
//!    row the counter is assumed to have jumped for good and the latest
//!    sample becomes the reference.
//!
//! A channel whose read failed gets a `Bad` reading through
//! [`CounterProcessor::record_failure`], leaving its window untouched.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::window::{ChannelWindow, Sample};
use crate::acquisition::reading::{DataQuality, ProcessedReading, RawReading};
use crate::config::{ChannelConfig, DeviceConfig};
use crate::error::{DeviceError, ProcessingError};

/// Consecutive rejected samples after which the latest one is accepted as reference.
pub const REBASELINE_AFTER: u32 = 2;

/// Per-channel processing parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSettings {
    pub counter_bits: u8,
    pub scale: f64,
    pub unit: String,
    /// Plausible rate ceiling in counts per second.
    pub max_rate: Option<f64>,
    pub overflow_warning: Option<u64>,
    pub window_size: usize,
}

impl ChannelSettings {
    pub fn from_config(channel: &ChannelConfig, default_window: usize) -> Self {
        Self {
            counter_bits: channel.counter_bits,
            scale: channel.scale,
            unit: channel.unit.clone(),
            max_rate: channel.max_rate,
            overflow_warning: channel.overflow_warning,
            window_size: channel.window_size.unwrap_or(default_window),
        }
    }
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            counter_bits: 32,
            scale: 1.0,
            unit: "counts".to_string(),
            max_rate: None,
            overflow_warning: None,
            window_size: 60,
        }
    }
}

/// Quality counters shared between processors and the health check.
#[derive(Debug, Default)]
pub struct ProcessingStats {
    processed: AtomicU64,
    good: AtomicU64,
    uncertain: AtomicU64,
    bad: AtomicU64,
    overflow_corrected: AtomicU64,
}

/// Point-in-time copy of [`ProcessingStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessingStatsSnapshot {
    pub processed: u64,
    pub good: u64,
    pub uncertain: u64,
    pub bad: u64,
    pub overflow_corrected: u64,
}

impl ProcessingStats {
    fn record(&self, quality: DataQuality) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        let counter = match quality {
            DataQuality::Good => &self.good,
            DataQuality::Uncertain => &self.uncertain,
            DataQuality::Bad => &self.bad,
            DataQuality::OverflowCorrected => &self.overflow_corrected,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProcessingStatsSnapshot {
        ProcessingStatsSnapshot {
            processed: self.processed.load(Ordering::Relaxed),
            good: self.good.load(Ordering::Relaxed),
            uncertain: self.uncertain.load(Ordering::Relaxed),
            bad: self.bad.load(Ordering::Relaxed),
            overflow_corrected: self.overflow_corrected.load(Ordering::Relaxed),
        }
    }
}

impl ProcessingStatsSnapshot {
    /// Share of `Bad` readings, 0 when nothing was processed.
    pub fn bad_ratio(&self) -> f64 {
        if self.processed == 0 {
            0.0
        } else {
            self.bad as f64 / self.processed as f64
        }
    }
}

struct ChannelState {
    settings: ChannelSettings,
    window: ChannelWindow,
    rejected_in_row: u32,
}

impl ChannelState {
    fn new(settings: ChannelSettings) -> Self {
        let window = ChannelWindow::new(settings.window_size, settings.counter_bits);
        Self {
            settings,
            window,
            rejected_in_row: 0,
        }
    }

    fn reading(
        &self,
        device_id: &str,
        channel: u16,
        raw_value: u64,
        rate: Option<f64>,
        quality: DataQuality,
        timestamp: DateTime<Utc>,
    ) -> ProcessedReading {
        ProcessedReading {
            device_id: device_id.to_string(),
            channel,
            raw_value,
            processed_value: raw_value as f64 * self.settings.scale,
            rate,
            quality,
            timestamp,
            unit: self.settings.unit.clone(),
        }
    }
}

/// Stateful rate calculator for a set of device channels.
pub struct CounterProcessor {
    channels: HashMap<(String, u16), ChannelState>,
    stats: Arc<ProcessingStats>,
}

impl CounterProcessor {
    pub fn new(stats: Arc<ProcessingStats>) -> Self {
        Self {
            channels: HashMap::new(),
            stats,
        }
    }

    /// Processor preconfigured with every channel of `device`.
    pub fn for_device(
        device: &DeviceConfig,
        default_window: usize,
        stats: Arc<ProcessingStats>,
    ) -> Self {
        let mut processor = Self::new(stats);
        for channel in &device.channels {
            processor.configure_channel(
                &device.id,
                channel.channel,
                ChannelSettings::from_config(channel, default_window),
            );
        }
        processor
    }

    /// Install or replace the settings of a channel. Its window is reset.
    pub fn configure_channel(&mut self, device_id: &str, channel: u16, settings: ChannelSettings) {
        debug!(
            "Configuring channel {}/{}: {}-bit, window {}",
            device_id, channel, settings.counter_bits, settings.window_size
        );
        self.channels
            .insert((device_id.to_string(), channel), ChannelState::new(settings));
    }

    /// Window of a channel, if the channel has been seen or configured.
    pub fn window(&self, device_id: &str, channel: u16) -> Option<&ChannelWindow> {
        self.channels
            .get(&(device_id.to_string(), channel))
            .map(|state| &state.window)
    }

    pub fn stats(&self) -> Arc<ProcessingStats> {
        Arc::clone(&self.stats)
    }

    fn state(&mut self, device_id: &str, channel: u16) -> &mut ChannelState {
        self.channels
            .entry((device_id.to_string(), channel))
            .or_insert_with(|| {
                debug!(
                    "Channel {}/{} not configured, using defaults",
                    device_id, channel
                );
                ChannelState::new(ChannelSettings::default())
            })
    }

    /// Process one raw reading of a channel.
    pub fn process(&mut self, raw: &RawReading) -> ProcessedReading {
        let state = self.state(&raw.device_id, raw.channel);

        if let Some(threshold) = state.settings.overflow_warning {
            if raw.raw_value >= threshold {
                warn!(
                    "Counter {}/{} approaching overflow: {} (max {})",
                    raw.device_id,
                    raw.channel,
                    raw.raw_value,
                    state.window.max_counter_value()
                );
            }
        }

        let current = Sample {
            timestamp: raw.timestamp,
            raw_value: raw.raw_value,
        };

        let (rate, quality) = match state.window.latest().copied() {
            None => {
                state.window.push(current);
                (None, DataQuality::Uncertain)
            }
            Some(reference) => match evaluate(
                &reference,
                &current,
                state.window.max_counter_value(),
                state.settings.max_rate,
            ) {
                Ok((rate, quality)) => {
                    state.window.push(current);
                    state.window.set_last_rate(rate);
                    state.rejected_in_row = 0;
                    (Some(rate), quality)
                }
                Err(err) => {
                    warn!("Bad reading on {}/{}: {}", raw.device_id, raw.channel, err);
                    state.rejected_in_row += 1;
                    let rebaseline = matches!(err, ProcessingError::OverflowAmbiguous { .. })
                        || state.rejected_in_row >= REBASELINE_AFTER;
                    if rebaseline {
                        debug!(
                            "Channel {}/{} rebased on {}",
                            raw.device_id, raw.channel, raw.raw_value
                        );
                        state.window.push(current);
                        state.rejected_in_row = 0;
                    }
                    (state.window.last_rate(), DataQuality::Bad)
                }
            },
        };

        let reading = state.reading(
            &raw.device_id,
            raw.channel,
            raw.raw_value,
            rate,
            quality,
            raw.timestamp,
        );
        self.stats.record(quality);
        reading
    }

    /// `Bad` reading for a channel whose read failed.
    ///
    /// Carries the last accepted raw value (0 if none) and the retained rate.
    /// The window is not modified.
    pub fn record_failure(
        &mut self,
        device_id: &str,
        channel: u16,
        error: &DeviceError,
    ) -> ProcessedReading {
        let state = self.state(device_id, channel);
        let raw_value = state.window.latest().map_or(0, |s| s.raw_value);
        debug!("Recording {}/{} as bad: {}", device_id, channel, error);
        let reading = state.reading(
            device_id,
            channel,
            raw_value,
            state.window.last_rate(),
            DataQuality::Bad,
            Utc::now(),
        );
        self.stats.record(DataQuality::Bad);
        reading
    }
}

/// Rate between two consecutive samples.
fn evaluate(
    previous: &Sample,
    current: &Sample,
    max: u64,
    max_rate: Option<f64>,
) -> Result<(f64, DataQuality), ProcessingError> {
    let span = current.timestamp - previous.timestamp;
    let elapsed_secs = match span.num_nanoseconds() {
        Some(nanos) => nanos as f64 / 1e9,
        None => span.num_milliseconds() as f64 / 1e3,
    };
    if elapsed_secs <= 0.0 {
        return Err(ProcessingError::NonIncreasingTimestamp { elapsed_secs });
    }

    let mut delta = i128::from(current.raw_value) - i128::from(previous.raw_value);
    let mut quality = DataQuality::Good;
    if delta < 0 {
        if previous.raw_value > max || current.raw_value > max {
            return Err(ProcessingError::OverflowAmbiguous {
                previous: previous.raw_value,
                current: current.raw_value,
                max,
            });
        }
        delta = (i128::from(max) + 1 - i128::from(previous.raw_value))
            + i128::from(current.raw_value);
        if delta < 0 {
            return Err(ProcessingError::OverflowAmbiguous {
                previous: previous.raw_value,
                current: current.raw_value,
                max,
            });
        }
        quality = DataQuality::OverflowCorrected;
    }

    let rate = delta as f64 / elapsed_secs;
    if let Some(ceiling) = max_rate {
        if rate > ceiling {
            return Err(ProcessingError::ImplausibleRate { rate, ceiling });
        }
    }

    Ok((rate, quality))
}
