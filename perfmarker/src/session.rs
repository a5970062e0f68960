//! Capture session
//!
//! Starts the enabled monitors for the duration of a trace capture. The
//! capture is bracketed by `Begin`/`End` markers and preceded by a message
//! describing the host. Dropping the session stops the frequency monitor,
//! then the working set monitor, then closes the bracket.

use std::sync::Arc;

use tracing::info;

use crate::config::MonitorConfig;
use crate::cpu_frequency::CpuFrequencyMonitor;
use crate::error::Result;
use crate::filter::ProcessFilter;
use crate::marker::{CpuFrequencyMarker, Marker};
use crate::sink::{MarkerScope, MarkerSink};
use crate::stats::{CpuFrequencyStatsSnapshot, WorkingSetStatsSnapshot};
use crate::system_info::SystemDescription;
use crate::working_set::WorkingSetMonitor;

const CAPTURE_SCOPE: &str = "capture";

pub struct CaptureSession {
    // Field order is drop order
    cpu_frequency: Option<CpuFrequencyMonitor>,
    working_set: Option<WorkingSetMonitor>,
    _scope: MarkerScope,
    sink: Arc<dyn MarkerSink>,
}

impl CaptureSession {
    pub fn start(config: &MonitorConfig, sink: Arc<dyn MarkerSink>) -> Result<Self> {
        config.validate()?;

        let scope = MarkerScope::new(Arc::clone(&sink), CAPTURE_SCOPE);
        let description = SystemDescription::collect();
        sink.emit(Marker::message(description.summary()));

        let working_set = if config.working_set.enabled {
            Some(WorkingSetMonitor::new(&config.working_set, Arc::clone(&sink))?)
        } else {
            None
        };

        let cpu_frequency = if config.cpu_frequency.enabled {
            let monitor = CpuFrequencyMonitor::new(&config.cpu_frequency, Arc::clone(&sink))?;
            sink.emit(Marker::float1("start frequency (GHz)", monitor.start_frequency_ghz()));
            sink.emit(Marker::int1("frequency cpus", monitor.active_cpus().len() as i64));
            Some(monitor)
        } else {
            None
        };

        info!(
            working_set = working_set.is_some(),
            cpu_frequency = cpu_frequency.is_some(),
            "capture started"
        );

        Ok(Self {
            cpu_frequency,
            working_set,
            _scope: scope,
            sink,
        })
    }

    /// Change which processes the working set monitor samples
    pub fn set_process_filter(&self, spec: &str) {
        if let Some(monitor) = &self.working_set {
            monitor.set_process_filter(spec);
        }
    }

    pub fn process_filter(&self) -> Option<Arc<ProcessFilter>> {
        self.working_set.as_ref().map(WorkingSetMonitor::process_filter)
    }

    pub fn latest_frequency(&self) -> Option<CpuFrequencyMarker> {
        self.cpu_frequency.as_ref().and_then(CpuFrequencyMonitor::latest)
    }

    pub fn working_set_stats(&self) -> Option<WorkingSetStatsSnapshot> {
        self.working_set.as_ref().map(WorkingSetMonitor::stats)
    }

    pub fn cpu_frequency_stats(&self) -> Option<CpuFrequencyStatsSnapshot> {
        self.cpu_frequency.as_ref().map(CpuFrequencyMonitor::stats)
    }

    pub fn sink(&self) -> &Arc<dyn MarkerSink> {
        &self.sink
    }

    /// Stop every monitor and close the capture bracket
    pub fn stop(self) {
        info!("capture stopping");
    }
}
