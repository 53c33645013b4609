// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-counter-logger project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use anyhow::Result;
use clap::Parser;
use log::info;
use rust_counter_logger::modbus::CounterSimulator;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Modbus TCP simulator of a counter module
///
/// Counters are 32-bit values stored low word first at registers 2n and 2n+1,
/// in both the holding and the input register tables.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Listen address
    #[clap(long, default_value = "127.0.0.1:5020")]
    listen: String,

    /// Number of counters
    #[clap(long, default_value = "4")]
    counters: u16,

    /// Initial value of every counter (use a value near 4294967295 to exercise wraparound)
    #[clap(long, default_value = "0")]
    initial: u32,

    /// Increment period in milliseconds, 0 disables incrementing
    #[clap(long, default_value = "1000")]
    period_ms: u64,

    /// Increment applied to every counter each period
    #[clap(long, default_value = "10")]
    step: u32,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );
    let args = Args::parse();

    let simulator = CounterSimulator::new(args.counters);
    for index in 0..args.counters {
        simulator.set_counter(index, args.initial);
    }

    let token = CancellationToken::new();
    let (addr, server) = simulator.spawn(&args.listen, token.clone()).await?;
    let incrementer = (args.period_ms > 0).then(|| {
        simulator.spawn_incrementer(
            Duration::from_millis(args.period_ms),
            args.step,
            token.clone(),
        )
    });
    info!(
        "Simulating {} counters on {}, +{} every {} ms",
        args.counters, addr, args.step, args.period_ms
    );

    signal::ctrl_c().await?;
    info!("Stopping simulator");
    token.cancel();
    if let Some(incrementer) = incrementer {
        incrementer.await?;
    }
    server.await??;
    Ok(())
}
