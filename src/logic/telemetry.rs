//! Telemetry Provider
//!
//! Periodic system snapshots pushed over the control channel to the
//! risk-assessment peer. Uses the sysinfo crate to read CPU, memory,
//! network and per-process figures.

use std::time::Instant;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sysinfo::{Networks, System};

use crate::constants::MAX_PROCESSES_PER_SNAPSHOT;

/// One telemetry snapshot, serialized as the `system_stats` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStats {
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub network_in_mbps: f64,
    pub network_out_mbps: f64,
    pub process_count: usize,
    pub processes: Vec<ProcessInfo>,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub cpu: f32,
    pub memory_mb: f64,
}

/// Source of telemetry snapshots. The orchestrator only sees this
/// trait; tests inject a canned provider.
pub trait TelemetryProvider: Send {
    fn snapshot(&mut self) -> SystemStats;
}

/// sysinfo-backed provider.
pub struct SysinfoProvider {
    system: System,
    networks: Networks,
    last_refresh: Instant,
}

impl SysinfoProvider {
    pub fn new() -> Self {
        let mut system = System::new_all();
        system.refresh_all();
        Self {
            system,
            networks: Networks::new_with_refreshed_list(),
            last_refresh: Instant::now(),
        }
    }
}

/// Bytes moved over an interval, as megabits per second.
fn bytes_to_mbps(bytes: u64, elapsed_secs: f64) -> f64 {
    if elapsed_secs <= 0.0 {
        return 0.0;
    }
    bytes as f64 * 8.0 / 1_000_000.0 / elapsed_secs
}

impl Default for SysinfoProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryProvider for SysinfoProvider {
    fn snapshot(&mut self) -> SystemStats {
        self.system.refresh_all();
        self.networks.refresh();
        let now = Instant::now();
        let elapsed_secs = now.duration_since(self.last_refresh).as_secs_f64();
        self.last_refresh = now;

        let cpu_usage = f64::from(self.system.global_cpu_info().cpu_usage());
        let total_memory = self.system.total_memory();
        let memory_usage = if total_memory == 0 {
            0.0
        } else {
            100.0 * self.system.used_memory() as f64 / total_memory as f64
        };

        // Bytes moved since the previous refresh, scaled by the
        // elapsed time to an actual per-second rate.
        let mut rx: u64 = 0;
        let mut tx: u64 = 0;
        for (_name, data) in &self.networks {
            rx += data.received();
            tx += data.transmitted();
        }
        let network_in_mbps = bytes_to_mbps(rx, elapsed_secs);
        let network_out_mbps = bytes_to_mbps(tx, elapsed_secs);

        let process_count = self.system.processes().len();
        let mut processes: Vec<ProcessInfo> = self
            .system
            .processes()
            .iter()
            .map(|(pid, process)| ProcessInfo {
                pid: pid.as_u32(),
                name: process.name().to_string(),
                cpu: process.cpu_usage(),
                memory_mb: process.memory() as f64 / (1024.0 * 1024.0),
            })
            .collect();

        // Heaviest consumers first; cap the list so a frame always
        // stays under the channel's size limit.
        processes.sort_by(|a, b| b.cpu.partial_cmp(&a.cpu).unwrap_or(std::cmp::Ordering::Equal));
        processes.truncate(MAX_PROCESSES_PER_SNAPSHOT);

        SystemStats {
            cpu_usage,
            memory_usage,
            network_in_mbps,
            network_out_mbps,
            process_count,
            processes,
            timestamp: Utc::now().timestamp(),
        }
    }
}
