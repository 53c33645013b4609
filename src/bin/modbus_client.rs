// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-counter-logger project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use clap::{Parser, ValueEnum};
use rust_counter_logger::config::WordOrder;
use rust_counter_logger::modbus::register::decode_counter;
use std::error::Error;
use tokio::time::{timeout, Duration};
use tokio_modbus::prelude::*;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Table {
    Holding,
    Input,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Order {
    LowFirst,
    HighFirst,
}

/// Register probe for counter modules: reads a register block and decodes 32-bit counters
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Modbus server address
    #[clap(long, default_value = "127.0.0.1")]
    address: String,

    /// Modbus server port
    #[clap(long, default_value = "502")]
    port: u16,

    /// Unit (slave) identifier
    #[clap(long, default_value = "1")]
    unit: u8,

    /// Register table to read
    #[clap(long, value_enum, default_value = "holding")]
    table: Table,

    /// Starting register address
    #[clap(long, default_value = "0")]
    start: u16,

    /// Number of registers to read
    #[clap(long, default_value = "8")]
    quantity: u16,

    /// Word order of 32-bit counters
    #[clap(long, value_enum, default_value = "low-first")]
    word_order: Order,

    /// Request timeout in milliseconds
    #[clap(long, default_value = "3000")]
    timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Initialize logging
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    let args = Args::parse();
    let request_timeout = Duration::from_millis(args.timeout_ms);

    let endpoint = format!("{}:{}", args.address, args.port);
    let socket_addr = tokio::net::lookup_host(&endpoint)
        .await?
        .next()
        .ok_or_else(|| format!("Cannot resolve {}", endpoint))?;
    println!("Connecting to Modbus server at {} (unit {})", socket_addr, args.unit);

    let mut ctx = timeout(request_timeout, tcp::connect_slave(socket_addr, Slave(args.unit)))
        .await
        .map_err(|_| format!("Connection to {} timed out", socket_addr))??;

    println!(
        "Reading {} {:?} registers starting at address {}",
        args.quantity, args.table, args.start
    );
    let request = async {
        match args.table {
            Table::Holding => ctx.read_holding_registers(args.start, args.quantity).await,
            Table::Input => ctx.read_input_registers(args.start, args.quantity).await,
        }
    };
    let response = timeout(request_timeout, request)
        .await
        .map_err(|_| "Request timed out".to_string())??
        .map_err(|code| format!("Modbus exception: {:?}", code))?;

    println!("Raw register values: {:?}", response);
    for (i, value) in response.iter().enumerate() {
        println!("Register {}: {} (0x{:04X})", args.start as usize + i, value, value);
    }

    let order = match args.word_order {
        Order::LowFirst => WordOrder::LowFirst,
        Order::HighFirst => WordOrder::HighFirst,
    };
    for (index, pair) in response.chunks_exact(2).enumerate() {
        println!(
            "Counter {} (registers {}-{}): {}",
            index,
            args.start as usize + index * 2,
            args.start as usize + index * 2 + 1,
            decode_counter(pair, order)
        );
    }
    if response.len() % 2 == 1 {
        println!("Last register has no partner word, not decoded");
    }

    ctx.disconnect().await?;
    Ok(())
}
