// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-counter-logger project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! InfluxDB 1.x HTTP store
//!
//! The bulk path posts the whole batch in one `/write` request. The row path
//! posts one request per reading, which is cheaper for a handful of points
//! and isolates a rejected point from the others.

use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use log::debug;
use reqwest::{Client, RequestBuilder, StatusCode};

use super::line_protocol::{encode_batch, encode_reading};
use super::TimeSeriesStore;
use crate::acquisition::reading::ProcessedReading;
use crate::config::InfluxDbConfig;
use crate::error::StorageError;

pub struct InfluxDbStore {
    client: Client,
    config: InfluxDbConfig,
    write_url: String,
    ping_url: String,
}

impl InfluxDbStore {
    pub fn new(config: &InfluxDbConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .context("Failed to build HTTP client for InfluxDB")?;
        let base = config.url.trim_end_matches('/');
        Ok(Self {
            client,
            config: config.clone(),
            write_url: format!("{}/write", base),
            ping_url: format!("{}/ping", base),
        })
    }

    fn authenticated(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.username {
            Some(user) => request.basic_auth(user, self.config.password.as_ref()),
            None => request,
        }
    }

    async fn post_lines(&self, body: String) -> Result<(), StorageError> {
        let mut query = vec![
            ("db", self.config.database.clone()),
            ("precision", "ns".to_string()),
        ];
        if let Some(rp) = &self.config.retention_policy {
            query.push(("rp", rp.clone()));
        }

        let request = self
            .authenticated(self.client.post(&self.write_url))
            .query(&query)
            .body(body);
        let response = request.send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let message = response.text().await.unwrap_or_default();
        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StorageError::Transient(format!(
                "InfluxDB rejected credentials ({}): {}",
                status, message
            )),
            StatusCode::TOO_MANY_REQUESTS => {
                StorageError::Transient(format!("InfluxDB throttled the write: {}", message))
            }
            // Malformed points or unknown database, the same body fails again
            status if status.is_client_error() => StorageError::Rejected(format!(
                "InfluxDB refused the points ({}): {}",
                status, message
            )),
            _ => StorageError::Transient(format!(
                "InfluxDB write failed ({}): {}",
                status, message
            )),
        })
    }
}

#[async_trait]
impl TimeSeriesStore for InfluxDbStore {
    fn name(&self) -> &'static str {
        "influxdb"
    }

    async fn write_bulk(&self, readings: &[ProcessedReading]) -> Result<(), StorageError> {
        if readings.is_empty() {
            return Ok(());
        }
        debug!("InfluxDB bulk write of {} points", readings.len());
        self.post_lines(encode_batch(
            &self.config.measurement,
            &self.config.tags,
            readings,
        ))
        .await
    }

    async fn write_rows(&self, readings: &[ProcessedReading]) -> Result<(), StorageError> {
        for reading in readings {
            self.post_lines(encode_reading(
                &self.config.measurement,
                &self.config.tags,
                reading,
            ))
            .await?;
        }
        Ok(())
    }

    async fn ping(&self) -> Result<Duration, StorageError> {
        let started = Instant::now();
        let response = self
            .authenticated(self.client.get(&self.ping_url))
            .send()
            .await?;
        if response.status().is_success() {
            Ok(started.elapsed())
        } else {
            Err(StorageError::Transient(format!(
                "InfluxDB ping returned {}",
                response.status()
            )))
        }
    }
}
