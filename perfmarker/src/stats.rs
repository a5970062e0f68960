//! Monitor statistics
//!
//! Counters are updated by the sampling threads with relaxed atomics and read
//! from any thread as a consistent-enough [`Serialize`] snapshot.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Live counters of a working set monitor
#[derive(Debug, Default)]
pub struct WorkingSetStats {
    ticks: AtomicU64,
    ticks_skipped: AtomicU64,
    snapshot_failures: AtomicU64,
    processes_sampled: AtomicU64,
    processes_skipped: AtomicU64,
    query_retries: AtomicU64,
    markers_emitted: AtomicU64,
}

/// Point-in-time copy of [`WorkingSetStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingSetStatsSnapshot {
    /// Ticks that enumerated processes and emitted a total
    pub ticks: u64,

    /// Ticks skipped because the filter named no process
    pub ticks_skipped: u64,

    /// Ticks abandoned because the process snapshot failed
    pub snapshot_failures: u64,

    pub processes_sampled: u64,

    /// Matched processes whose page table could not be read
    pub processes_skipped: u64,

    /// Queries repeated after growing the page table
    pub query_retries: u64,

    pub markers_emitted: u64,
}

impl WorkingSetStats {
    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tick_skipped(&self) {
        self.ticks_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_snapshot_failure(&self) {
        self.snapshot_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_process_sampled(&self) {
        self.processes_sampled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_process_skipped(&self) {
        self.processes_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_query_retry(&self) {
        self.query_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_marker(&self) {
        self.markers_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WorkingSetStatsSnapshot {
        WorkingSetStatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            ticks_skipped: self.ticks_skipped.load(Ordering::Relaxed),
            snapshot_failures: self.snapshot_failures.load(Ordering::Relaxed),
            processes_sampled: self.processes_sampled.load(Ordering::Relaxed),
            processes_skipped: self.processes_skipped.load(Ordering::Relaxed),
            query_retries: self.query_retries.load(Ordering::Relaxed),
            markers_emitted: self.markers_emitted.load(Ordering::Relaxed),
        }
    }
}

/// Live counters of a CPU frequency monitor
#[derive(Debug, Default)]
pub struct CpuFrequencyStats {
    rounds: AtomicU64,
    active_cpus: AtomicU64,
    excluded_cpus: AtomicU64,
}

/// Point-in-time copy of [`CpuFrequencyStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuFrequencyStatsSnapshot {
    pub rounds: u64,

    /// Workers running pinned to their CPU
    pub active_cpus: u64,

    /// CPUs dropped because their worker could not be spawned or pinned
    pub excluded_cpus: u64,
}

impl CpuFrequencyStats {
    pub fn record_round(&self) {
        self.rounds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_active_cpu(&self) {
        self.active_cpus.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_excluded_cpu(&self) {
        self.excluded_cpus.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CpuFrequencyStatsSnapshot {
        CpuFrequencyStatsSnapshot {
            rounds: self.rounds.load(Ordering::Relaxed),
            active_cpus: self.active_cpus.load(Ordering::Relaxed),
            excluded_cpus: self.excluded_cpus.load(Ordering::Relaxed),
        }
    }
}
