// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-counter-logger project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! InfluxDB line protocol encoding of processed readings

use std::collections::BTreeMap;
use std::fmt::Write;

use crate::acquisition::reading::ProcessedReading;

/// Encode one reading as a line protocol record.
///
/// Tags: `device_id`, `channel`, `unit` plus the static tags (sorted).
/// Fields: `raw_value` (integer), `processed_value`, `rate` when present and
/// `quality` (string). Non-finite floats are omitted. Timestamp in nanoseconds.
pub fn encode_reading(
    measurement: &str,
    static_tags: &BTreeMap<String, String>,
    reading: &ProcessedReading,
) -> String {
    let mut line = escape_measurement(measurement);

    let mut tags: BTreeMap<&str, String> = static_tags
        .iter()
        .map(|(k, v)| (k.as_str(), v.clone()))
        .collect();
    tags.insert("device_id", reading.device_id.clone());
    tags.insert("channel", reading.channel.to_string());
    tags.insert("unit", reading.unit.clone());
    for (key, value) in tags.iter().filter(|(_, v)| !v.is_empty()) {
        let _ = write!(line, ",{}={}", escape_tag(key), escape_tag(value));
    }

    let mut fields = vec![format!("raw_value={}i", reading.raw_value)];
    if reading.processed_value.is_finite() {
        fields.push(format!("processed_value={}", reading.processed_value));
    }
    if let Some(rate) = reading.rate.filter(|r| r.is_finite()) {
        fields.push(format!("rate={}", rate));
    }
    fields.push(format!("quality=\"{}\"", reading.quality.as_str()));

    let timestamp = reading
        .timestamp
        .timestamp_nanos_opt()
        .unwrap_or_else(|| reading.timestamp.timestamp_micros().saturating_mul(1000));

    let _ = write!(line, " {} {}", fields.join(","), timestamp);
    line
}

/// Encode a batch, one record per line.
pub fn encode_batch(
    measurement: &str,
    static_tags: &BTreeMap<String, String>,
    readings: &[ProcessedReading],
) -> String {
    readings
        .iter()
        .map(|r| encode_reading(measurement, static_tags, r))
        .collect::<Vec<_>>()
        .join("\n")
}

fn escape_measurement(value: &str) -> String {
    value.replace(',', "\\,").replace(' ', "\\ ")
}

fn escape_tag(value: &str) -> String {
    value
        .replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}
