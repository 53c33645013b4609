// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-counter-logger project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Tests for the InfluxDB HTTP store against a mock server

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::{TimeZone, Utc};
use rust_counter_logger::acquisition::{DataQuality, ProcessedReading};
use rust_counter_logger::config::InfluxDbConfig;
use rust_counter_logger::error::StorageError;
use rust_counter_logger::storage::{InfluxDbStore, TimeSeriesStore};
use wiremock::matchers::{basic_auth, body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(url: String) -> InfluxDbConfig {
    InfluxDbConfig {
        url,
        ..InfluxDbConfig::default()
    }
}

fn reading(channel: u16) -> ProcessedReading {
    ProcessedReading {
        device_id: "adam-1".to_string(),
        channel,
        raw_value: 1000 + u64::from(channel),
        processed_value: 100.0,
        rate: Some(2.0),
        quality: DataQuality::OverflowCorrected,
        timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        unit: "counts".to_string(),
    }
}

#[tokio::test]
async fn test_bulk_write_posts_one_request() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/write"))
        .and(query_param("db", "adam_counters"))
        .and(query_param("precision", "ns"))
        .and(body_string_contains(
            "counter_data,channel=1,device_id=adam-1,unit=counts raw_value=1001i",
        ))
        .and(body_string_contains("quality=\"overflow_corrected\""))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let store = InfluxDbStore::new(&config(server.uri()))?;
    store.write_bulk(&[reading(0), reading(1), reading(2)]).await?;

    let requests = server.received_requests().await.unwrap_or_default();
    let body = String::from_utf8(requests[0].body.clone())?;
    assert_eq!(body.lines().count(), 3);
    Ok(())
}

#[tokio::test]
async fn test_row_write_posts_per_reading() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/write"))
        .respond_with(ResponseTemplate::new(204))
        .expect(2)
        .mount(&server)
        .await;

    let store = InfluxDbStore::new(&config(server.uri()))?;
    store.write_rows(&[reading(0), reading(1)]).await?;
    Ok(())
}

#[tokio::test]
async fn test_server_error_is_transient() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/write"))
        .respond_with(ResponseTemplate::new(500).set_body_string("database is busy"))
        .mount(&server)
        .await;

    let store = InfluxDbStore::new(&config(server.uri()))?;
    match store.write_bulk(&[reading(0)]).await {
        Err(StorageError::Transient(message)) => assert!(message.contains("busy"), "{}", message),
        other => panic!("unexpected result {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_client_errors_are_rejected_except_auth_and_throttling() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/write"))
        .and(query_param("db", "malformed"))
        .respond_with(ResponseTemplate::new(400).set_body_string("unable to parse"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/write"))
        .and(query_param("db", "throttled"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/write"))
        .and(query_param("db", "locked"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let store_for = |database: &str| {
        InfluxDbStore::new(&InfluxDbConfig {
            database: database.to_string(),
            ..config(server.uri())
        })
    };

    match store_for("malformed")?.write_bulk(&[reading(0)]).await {
        Err(StorageError::Rejected(message)) => assert!(message.contains("parse"), "{}", message),
        other => panic!("unexpected result {:?}", other),
    }
    assert!(matches!(
        store_for("throttled")?.write_bulk(&[reading(0)]).await,
        Err(StorageError::Transient(_))
    ));
    assert!(matches!(
        store_for("locked")?.write_bulk(&[reading(0)]).await,
        Err(StorageError::Transient(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_credentials_tags_and_retention_policy() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/write"))
        .and(basic_auth("logger", "secret"))
        .and(query_param("rp", "one_year"))
        .and(body_string_contains("location=hall\\ 2"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let mut tags = BTreeMap::new();
    tags.insert("location".to_string(), "hall 2".to_string());
    let store = InfluxDbStore::new(&InfluxDbConfig {
        username: Some("logger".to_string()),
        password: Some("secret".to_string()),
        retention_policy: Some("one_year".to_string()),
        tags,
        ..config(server.uri())
    })?;
    store.write_bulk(&[reading(0)]).await?;
    Ok(())
}

#[tokio::test]
async fn test_ping() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ping"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let store = InfluxDbStore::new(&config(server.uri()))?;
    store.ping().await?;

    let unreachable = InfluxDbStore::new(&config("http://127.0.0.1:1".to_string()))?;
    assert!(matches!(
        unreachable.ping().await,
        Err(StorageError::Transient(_))
    ));
    Ok(())
}
