// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-counter-logger project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus TCP counter simulator
//!
//! For avoiding confusion with the Modbus master/slave terminology, this module uses
//! the terms "server" and "client" instead. The simulator is the server: it plays the
//! role of an ADAM-6051 style counter module so the pool can be exercised without
//! hardware.
//!
//! ## Register Map
//!
//! Counter `n` occupies registers `2n` (low word) and `2n + 1` (high word) in both
//! the holding and the input register tables. Counters are 32-bit and wrap at 2^32.

use std::collections::HashMap;
use std::future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, error, info};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_modbus::{
    prelude::*,
    server::tcp::{accept_tcp_connection, Server},
};
use tokio_util::sync::CancellationToken;

use super::register::encode_counter;
use crate::config::WordOrder;

#[derive(Default)]
struct RegisterBank {
    input_registers: HashMap<u16, u16>,
    holding_registers: HashMap<u16, u16>,
}

struct CounterService {
    registers: Arc<Mutex<RegisterBank>>,
    failing: Arc<AtomicBool>,
}

impl tokio_modbus::server::Service for CounterService {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        if self.failing.load(Ordering::SeqCst) {
            return future::ready(Err(ExceptionCode::ServerDeviceFailure));
        }
        let mut bank = match self.registers.lock() {
            Ok(bank) => bank,
            Err(_) => return future::ready(Err(ExceptionCode::ServerDeviceFailure)),
        };
        let res = match req {
            Request::ReadInputRegisters(addr, cnt) => {
                register_read(&bank.input_registers, addr, cnt).map(Response::ReadInputRegisters)
            }
            Request::ReadHoldingRegisters(addr, cnt) => {
                register_read(&bank.holding_registers, addr, cnt)
                    .map(Response::ReadHoldingRegisters)
            }
            Request::WriteMultipleRegisters(addr, values) => {
                register_write(&mut bank.holding_registers, addr, &values)
                    .map(|_| Response::WriteMultipleRegisters(addr, values.len() as u16))
            }
            Request::WriteSingleRegister(addr, value) => register_write(
                &mut bank.holding_registers,
                addr,
                std::slice::from_ref(&value),
            )
            .map(|_| Response::WriteSingleRegister(addr, value)),
            _ => {
                error!("SIMULATOR: Exception::IllegalFunction - Unimplemented function code in request: {req:?}");
                Err(ExceptionCode::IllegalFunction)
            }
        };
        future::ready(res)
    }
}

/// Helper function implementing reading registers from a HashMap.
fn register_read(
    registers: &HashMap<u16, u16>,
    addr: u16,
    cnt: u16,
) -> Result<Vec<u16>, ExceptionCode> {
    let mut response_values = vec![0; cnt.into()];
    for i in 0..cnt {
        let reg_addr = addr.wrapping_add(i);
        match registers.get(&reg_addr) {
            Some(r) => response_values[i as usize] = *r,
            None => {
                debug!("SIMULATOR: Exception::IllegalDataAddress {}", reg_addr);
                return Err(ExceptionCode::IllegalDataAddress);
            }
        }
    }

    Ok(response_values)
}

/// Write holding registers. Used by both the write single register
/// and write multiple registers requests.
fn register_write(
    registers: &mut HashMap<u16, u16>,
    addr: u16,
    values: &[u16],
) -> Result<(), ExceptionCode> {
    for (i, value) in values.iter().enumerate() {
        let reg_addr = addr.wrapping_add(i as u16);
        match registers.get_mut(&reg_addr) {
            Some(r) => *r = *value,
            None => {
                debug!("SIMULATOR: Exception::IllegalDataAddress {}", reg_addr);
                return Err(ExceptionCode::IllegalDataAddress);
            }
        }
    }

    Ok(())
}

/// Simulated counter module.
///
/// Cloning yields another handle on the same registers.
#[derive(Clone)]
pub struct CounterSimulator {
    registers: Arc<Mutex<RegisterBank>>,
    failing: Arc<AtomicBool>,
    counters: u16,
}

impl CounterSimulator {
    /// Create a simulator exposing `counters` 32-bit counters, all at zero.
    pub fn new(counters: u16) -> Self {
        let simulator = Self {
            registers: Arc::new(Mutex::new(RegisterBank::default())),
            failing: Arc::new(AtomicBool::new(false)),
            counters,
        };
        for index in 0..counters {
            simulator.set_counter(index, 0);
        }
        simulator
    }

    pub fn counters(&self) -> u16 {
        self.counters
    }

    /// Set counter `index` in both register tables.
    pub fn set_counter(&self, index: u16, value: u32) {
        let words = encode_counter(u64::from(value), 2, WordOrder::LowFirst);
        let mut bank = self.registers.lock().unwrap_or_else(|p| p.into_inner());
        for (offset, word) in words.into_iter().enumerate() {
            let addr = index * 2 + offset as u16;
            bank.holding_registers.insert(addr, word);
            bank.input_registers.insert(addr, word);
        }
    }

    /// Current value of counter `index`, read from the holding registers.
    pub fn counter(&self, index: u16) -> Option<u32> {
        let bank = self.registers.lock().unwrap_or_else(|p| p.into_inner());
        let low = *bank.holding_registers.get(&(index * 2))?;
        let high = *bank.holding_registers.get(&(index * 2 + 1))?;
        Some(u32::from(high) << 16 | u32::from(low))
    }

    /// Add `step` to every counter, wrapping at 2^32.
    pub fn increment_all(&self, step: u32) {
        for index in 0..self.counters {
            let value = self.counter(index).unwrap_or(0).wrapping_add(step);
            self.set_counter(index, value);
        }
    }

    /// When set, every request is answered with a server device failure exception.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Serve on `listener` until `token` is cancelled.
    pub async fn serve(&self, listener: TcpListener, token: CancellationToken) -> Result<()> {
        let server = Server::new(listener);
        let registers = Arc::clone(&self.registers);
        let failing = Arc::clone(&self.failing);

        let on_connected = move |stream, socket_addr| {
            let registers = Arc::clone(&registers);
            let failing = Arc::clone(&failing);
            async move {
                accept_tcp_connection(stream, socket_addr, move |_socket_addr| {
                    Ok(Some(CounterService {
                        registers: Arc::clone(&registers),
                        failing: Arc::clone(&failing),
                    }))
                })
            }
        };
        let on_process_error = |err| {
            error!("Simulator connection error: {}", err);
        };

        tokio::select! {
            _ = token.cancelled() => {
                debug!("Simulator stopped");
                Ok(())
            }
            result = server.serve(&on_connected, on_process_error) => {
                result.context("Simulator server failed")
            }
        }
    }

    /// Bind `addr` and serve in a background task.
    ///
    /// Use port 0 to let the OS pick a free port; the bound address is returned.
    pub async fn spawn(
        &self,
        addr: &str,
        token: CancellationToken,
    ) -> Result<(SocketAddr, JoinHandle<Result<()>>)> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind simulator on {}", addr))?;
        let local_addr = listener.local_addr()?;
        info!(
            "Counter simulator listening on {} with {} counters",
            local_addr, self.counters
        );
        let simulator = self.clone();
        let handle = tokio::spawn(async move { simulator.serve(listener, token).await });
        Ok((local_addr, handle))
    }

    /// Increment every counter by `step` each `period` until `token` is cancelled.
    pub fn spawn_incrementer(
        &self,
        period: Duration,
        step: u32,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let simulator = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => simulator.increment_all(step),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_layout_and_wrap() {
        let simulator = CounterSimulator::new(2);
        simulator.set_counter(1, 0x0001_0002);
        {
            let bank = simulator.registers.lock().unwrap();
            assert_eq!(bank.holding_registers.get(&2), Some(&0x0002));
            assert_eq!(bank.holding_registers.get(&3), Some(&0x0001));
            assert_eq!(bank.input_registers.get(&3), Some(&0x0001));
        }
        simulator.set_counter(0, u32::MAX);
        simulator.increment_all(3);
        assert_eq!(simulator.counter(0), Some(2));
        assert_eq!(simulator.counter(1), Some(0x0001_0005));
    }

    #[test]
    fn test_register_read_out_of_range() {
        let simulator = CounterSimulator::new(1);
        let bank = simulator.registers.lock().unwrap();
        assert_eq!(
            register_read(&bank.holding_registers, 0, 3),
            Err(ExceptionCode::IllegalDataAddress)
        );
        assert_eq!(register_read(&bank.holding_registers, 0, 2), Ok(vec![0, 0]));
    }
}
