// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-counter-logger project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Single persistent Modbus TCP connection to a field device
//!
//! The client context lives behind an async mutex, which serializes requests
//! to the device. Transport failures and timeouts drop the context so the next
//! read transparently reconnects.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::net::lookup_host;
use tokio::sync::Mutex;
use tokio::time;
use tokio_modbus::client::Context;
use tokio_modbus::prelude::*;

use crate::config::{DeviceConfig, RegisterType};
use crate::error::DeviceError;

pub struct DeviceConnection {
    device: Arc<DeviceConfig>,
    timeout: Duration,
    context: Mutex<Option<Context>>,
    connected: AtomicBool,
}

impl DeviceConnection {
    pub fn new(device: Arc<DeviceConfig>, timeout: Duration) -> Self {
        Self {
            device,
            timeout,
            context: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    pub fn device(&self) -> &DeviceConfig {
        &self.device
    }

    /// Whether a client context is currently established.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Read `count` registers starting at `start`.
    ///
    /// Connects first if needed. Both the connect and the request are bounded
    /// by the device timeout.
    pub async fn read_registers(
        &self,
        register_type: RegisterType,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, DeviceError> {
        let mut guard = self.context.lock().await;

        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        let Some(ctx) = guard.as_mut() else {
            return Err(DeviceError::Connection {
                device: self.device.id.clone(),
                reason: "no client context".to_string(),
            });
        };
        self.connected.store(true, Ordering::SeqCst);

        let request = async {
            match register_type {
                RegisterType::Holding => ctx.read_holding_registers(start, count).await,
                RegisterType::Input => ctx.read_input_registers(start, count).await,
            }
        };

        let outcome = match time::timeout(self.timeout, request).await {
            Err(_) => Err((
                true,
                DeviceError::Timeout {
                    device: self.device.id.clone(),
                    after: self.timeout,
                },
            )),
            Ok(Err(tokio_modbus::Error::Transport(err))) => Err((
                true,
                DeviceError::Connection {
                    device: self.device.id.clone(),
                    reason: err.to_string(),
                },
            )),
            // Framing is out of sync, start over with a fresh connection
            Ok(Err(tokio_modbus::Error::Protocol(err))) => Err((
                true,
                DeviceError::Protocol {
                    device: self.device.id.clone(),
                    reason: err.to_string(),
                },
            )),
            Ok(Ok(Err(exception))) => Err((
                false,
                DeviceError::Protocol {
                    device: self.device.id.clone(),
                    reason: format!("exception response {:?}", exception),
                },
            )),
            Ok(Ok(Ok(words))) if words.len() != usize::from(count) => Err((
                false,
                DeviceError::Protocol {
                    device: self.device.id.clone(),
                    reason: format!("expected {} registers, got {}", count, words.len()),
                },
            )),
            Ok(Ok(Ok(words))) => Ok(words),
        };

        match outcome {
            Ok(words) => Ok(words),
            Err((teardown, err)) => {
                if teardown {
                    warn!("Dropping connection to device {}: {}", self.device.id, err);
                    *guard = None;
                    self.connected.store(false, Ordering::SeqCst);
                }
                Err(err)
            }
        }
    }

    /// Close the connection if open.
    pub async fn disconnect(&self) {
        let mut guard = self.context.lock().await;
        if let Some(mut ctx) = guard.take() {
            debug!("Disconnecting from device {}", self.device.id);
            if let Err(e) = ctx.disconnect().await {
                debug!("Error while disconnecting from {}: {}", self.device.id, e);
            }
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn connect(&self) -> Result<Context, DeviceError> {
        let endpoint = self.device.endpoint();
        let connection_error = |reason: String| DeviceError::Connection {
            device: self.device.id.clone(),
            reason,
        };

        let socket_addr = lookup_host(endpoint.as_str())
            .await
            .map_err(|e| connection_error(format!("cannot resolve {}: {}", endpoint, e)))?
            .next()
            .ok_or_else(|| connection_error(format!("no address for {}", endpoint)))?;

        debug!("Connecting to device {} at {}", self.device.id, socket_addr);
        let ctx = time::timeout(
            self.timeout,
            tcp::connect_slave(socket_addr, Slave(self.device.unit_id)),
        )
        .await
        .map_err(|_| DeviceError::Timeout {
            device: self.device.id.clone(),
            after: self.timeout,
        })?
        .map_err(|e| connection_error(e.to_string()))?;

        info!(
            "Connected to device {} at {} (unit {})",
            self.device.id, socket_addr, self.device.unit_id
        );
        Ok(ctx)
    }
}
