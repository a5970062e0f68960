//! Prometheus export of monitor statistics
//!
//! The exporter does not sample anything itself: callers feed it stats
//! snapshots and the latest frequency round, then render the registry in the
//! text exposition format.

use prometheus::{Encoder, GaugeVec, IntGauge, Opts, Registry, TextEncoder};

use crate::error::Result;
use crate::marker::CpuFrequencyMarker;
use crate::stats::{CpuFrequencyStatsSnapshot, WorkingSetStatsSnapshot};

/// Gauges mirroring the monitors' counters
pub struct MetricsExporter {
    registry: Registry,

    ws_ticks: IntGauge,
    ws_ticks_skipped: IntGauge,
    ws_snapshot_failures: IntGauge,
    ws_processes_sampled: IntGauge,
    ws_processes_skipped: IntGauge,
    ws_query_retries: IntGauge,

    cpu_rounds: IntGauge,
    cpu_active: IntGauge,
    cpu_excluded: IntGauge,
    cpu_frequency_ghz: GaugeVec,
}

fn register_gauge(registry: &Registry, name: &str, help: &str) -> Result<IntGauge> {
    let gauge = IntGauge::new(name, help)?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

impl MetricsExporter {
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some("perfmarker".to_string()), None)?;

        let cpu_frequency_ghz = GaugeVec::new(
            Opts::new("cpu_frequency_ghz", "Most recent measured frequency per logical CPU"),
            &["cpu"],
        )?;
        registry.register(Box::new(cpu_frequency_ghz.clone()))?;

        Ok(Self {
            ws_ticks: register_gauge(&registry, "working_set_ticks", "Completed working set ticks")?,
            ws_ticks_skipped: register_gauge(
                &registry,
                "working_set_ticks_skipped",
                "Ticks skipped because the process filter was empty",
            )?,
            ws_snapshot_failures: register_gauge(
                &registry,
                "working_set_snapshot_failures",
                "Ticks abandoned because process enumeration failed",
            )?,
            ws_processes_sampled: register_gauge(
                &registry,
                "working_set_processes_sampled",
                "Process working sets reported",
            )?,
            ws_processes_skipped: register_gauge(
                &registry,
                "working_set_processes_skipped",
                "Matched processes whose page table could not be read",
            )?,
            ws_query_retries: register_gauge(
                &registry,
                "working_set_query_retries",
                "Page table queries retried with a larger buffer",
            )?,
            cpu_rounds: register_gauge(&registry, "cpu_frequency_rounds", "Completed frequency rounds")?,
            cpu_active: register_gauge(
                &registry,
                "cpu_frequency_active_cpus",
                "CPUs with a pinned frequency worker",
            )?,
            cpu_excluded: register_gauge(
                &registry,
                "cpu_frequency_excluded_cpus",
                "CPUs excluded after a spawn or pin failure",
            )?,
            cpu_frequency_ghz,
            registry,
        })
    }

    pub fn update_working_set(&self, stats: &WorkingSetStatsSnapshot) {
        self.ws_ticks.set(stats.ticks as i64);
        self.ws_ticks_skipped.set(stats.ticks_skipped as i64);
        self.ws_snapshot_failures.set(stats.snapshot_failures as i64);
        self.ws_processes_sampled.set(stats.processes_sampled as i64);
        self.ws_processes_skipped.set(stats.processes_skipped as i64);
        self.ws_query_retries.set(stats.query_retries as i64);
    }

    pub fn update_cpu_frequency(
        &self,
        stats: &CpuFrequencyStatsSnapshot,
        latest: Option<&CpuFrequencyMarker>,
    ) {
        self.cpu_rounds.set(stats.rounds as i64);
        self.cpu_active.set(stats.active_cpus as i64);
        self.cpu_excluded.set(stats.excluded_cpus as i64);

        if let Some(marker) = latest {
            for sample in &marker.samples {
                let cpu = sample.cpu.to_string();
                self.cpu_frequency_ghz
                    .with_label_values(&[cpu.as_str()])
                    .set(sample.frequency_ghz);
            }
        }
    }

    /// Render every registered metric in the Prometheus text format
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| e.to_string().into())
    }
}
