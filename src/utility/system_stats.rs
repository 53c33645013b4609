// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-counter-logger project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Process resource statistics
//!
//! Feeds the `Application` health check with the daemon's own CPU and memory
//! consumption. Only the current process and the memory counters are
//! refreshed, so a collection stays cheap enough to run inside a health check
//! timeout.

use std::time::Instant;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use sysinfo::{
    CpuRefreshKind, MemoryRefreshKind, Pid, ProcessRefreshKind, ProcessesToUpdate, RefreshKind,
    System,
};

const MIB: u64 = 1024 * 1024;

/// Resource usage of the daemon process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStats {
    /// CPU usage since the previous collection (100.0 per saturated core)
    pub cpu_usage_percent: f32,
    /// Resident memory in MiB
    pub memory_usage_mb: u64,
    pub virtual_memory_mb: u64,
    pub total_cpu_cores: usize,
    /// Memory still available to the host in MiB
    pub available_memory_mb: u64,
    /// Seconds since the collector was created
    pub process_uptime_seconds: u64,
}

/// Collects [`SystemStats`] for the current process
pub struct SystemStatsCollector {
    system: System,
    pid: Pid,
    created: Instant,
}

impl SystemStatsCollector {
    pub fn new() -> Result<Self> {
        let pid = sysinfo::get_current_pid()
            .map_err(|e| anyhow!("Failed to get current process PID: {}", e))?;
        let system = System::new_with_specifics(
            RefreshKind::nothing()
                .with_memory(MemoryRefreshKind::nothing().with_ram())
                .with_cpu(CpuRefreshKind::nothing()),
        );

        let mut collector = Self {
            system,
            pid,
            created: Instant::now(),
        };
        // CPU usage is a difference between two refreshes, prime the first one
        collector.refresh_process();
        Ok(collector)
    }

    fn refresh_process(&mut self) {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::nothing().with_memory().with_cpu(),
        );
    }

    /// Refresh the process and memory counters and return a snapshot
    pub fn collect_stats(&mut self) -> Result<SystemStats> {
        self.refresh_process();
        self.system
            .refresh_memory_specifics(MemoryRefreshKind::nothing().with_ram());

        let process = self
            .system
            .process(self.pid)
            .ok_or_else(|| anyhow!("Process {} not found in the process table", self.pid))?;

        Ok(SystemStats {
            cpu_usage_percent: process.cpu_usage(),
            memory_usage_mb: process.memory() / MIB,
            virtual_memory_mb: process.virtual_memory() / MIB,
            total_cpu_cores: self.system.cpus().len(),
            available_memory_mb: self.system.available_memory() / MIB,
            process_uptime_seconds: self.created.elapsed().as_secs(),
        })
    }
}

impl SystemStats {
    /// Share of resident memory in what the process holds plus what is still available
    pub fn memory_usage_percent(&self) -> f32 {
        let reachable = self.memory_usage_mb + self.available_memory_mb;
        if reachable == 0 {
            return 0.0;
        }
        self.memory_usage_mb as f32 * 100.0 / reachable as f32
    }

    /// One-line summary for log messages and health check details
    pub fn format_for_logging(&self) -> String {
        format!(
            "CPU: {:.1}%, RAM: {} MB ({:.1}%), VM: {} MB, up {}s",
            self.cpu_usage_percent,
            self.memory_usage_mb,
            self.memory_usage_percent(),
            self.virtual_memory_mb,
            self.process_uptime_seconds
        )
    }
}
