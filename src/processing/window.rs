// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-counter-logger project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Per-channel circular sample buffer

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

use crate::config::device::max_value_for_bits;

/// One `(timestamp, raw value)` sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub raw_value: u64,
}

/// Fixed-capacity FIFO history of a single device channel.
///
/// Inserting past capacity evicts exactly the oldest sample. The window also
/// remembers the counter width and the last rate that was accepted.
#[derive(Debug, Clone)]
pub struct ChannelWindow {
    samples: VecDeque<Sample>,
    capacity: usize,
    counter_bits: u8,
    last_rate: Option<f64>,
}

impl ChannelWindow {
    /// Create an empty window. Capacity is raised to 2 if lower.
    pub fn new(capacity: usize, counter_bits: u8) -> Self {
        let capacity = capacity.max(2);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            counter_bits,
            last_rate: None,
        }
    }

    /// Append a sample, returning the evicted one if the window was full.
    pub fn push(&mut self, sample: Sample) -> Option<Sample> {
        let evicted = if self.samples.len() >= self.capacity {
            self.samples.pop_front()
        } else {
            None
        };
        self.samples.push_back(sample);
        evicted
    }

    /// Most recent sample.
    pub fn latest(&self) -> Option<&Sample> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn max_counter_value(&self) -> u64 {
        max_value_for_bits(self.counter_bits)
    }

    pub fn last_rate(&self) -> Option<f64> {
        self.last_rate
    }

    pub fn set_last_rate(&mut self, rate: f64) {
        self.last_rate = Some(rate);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample(secs: i64, raw: u64) -> Sample {
        Sample {
            timestamp: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            raw_value: raw,
        }
    }

    #[test]
    fn test_window_evicts_oldest_first() {
        let mut window = ChannelWindow::new(3, 32);
        assert!(window.push(sample(0, 1)).is_none());
        assert!(window.push(sample(1, 2)).is_none());
        assert!(window.push(sample(2, 3)).is_none());
        assert_eq!(window.len(), 3);

        let evicted = window.push(sample(3, 4)).unwrap();
        assert_eq!(evicted.raw_value, 1);
        assert_eq!(window.len(), 3);
        assert_eq!(window.push(sample(4, 5)).unwrap().raw_value, 2);
        assert_eq!(window.latest().unwrap().raw_value, 5);
    }

    #[test]
    fn test_window_never_exceeds_capacity() {
        let mut window = ChannelWindow::new(5, 16);
        for i in 0..100 {
            window.push(sample(i, i as u64));
            assert!(window.len() <= 5);
        }
        assert_eq!(window.latest().unwrap().raw_value, 99);
    }

    #[test]
    fn test_minimum_capacity() {
        let mut window = ChannelWindow::new(0, 16);
        assert_eq!(window.capacity(), 2);
        window.push(sample(0, 10));
        window.push(sample(1, 11));
        assert_eq!(window.push(sample(2, 12)).unwrap().raw_value, 10);
        assert_eq!(window.len(), 2);
        assert_eq!(window.last_rate(), None);
        window.set_last_rate(2.0);
        assert_eq!(window.last_rate(), Some(2.0));
        assert_eq!(window.max_counter_value(), 65_535);
    }
}
