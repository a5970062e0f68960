//! Trace marker sinks
//!
//! `MarkerSink` is the only output channel of the monitors. It is injected at
//! construction and used fire-and-forget: recording never fails from the
//! caller's point of view.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::config::{SinkConfig, SinkKind};
use crate::error::{MonitorError, Result};
use crate::marker::{CpuFrequencyMarker, Marker, MarkerEvent, WorkingSetMarker};

/// Destination for timestamped markers
pub trait MarkerSink: Send + Sync {
    /// Record an event carrying an explicit timestamp
    fn record(&self, event: MarkerEvent);

    /// Record a marker stamped with the current time
    fn emit(&self, marker: Marker) {
        self.record(MarkerEvent::now(marker));
    }
}

/// Discards every marker
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl MarkerSink for NullSink {
    fn record(&self, _event: MarkerEvent) {}
}

/// Keeps markers in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<MarkerEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Copy of every event recorded so far
    pub fn events(&self) -> Vec<MarkerEvent> {
        self.events.lock().clone()
    }

    /// Remove and return every event recorded so far
    pub fn take(&self) -> Vec<MarkerEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn working_set_markers(&self) -> Vec<WorkingSetMarker> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match &event.marker {
                Marker::WorkingSet(marker) => Some(marker.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn cpu_frequency_markers(&self) -> Vec<CpuFrequencyMarker> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match &event.marker {
                Marker::CpuFrequency(marker) => Some(marker.clone()),
                _ => None,
            })
            .collect()
    }
}

impl MarkerSink for MemorySink {
    fn record(&self, event: MarkerEvent) {
        self.events.lock().push(event);
    }
}

/// Writes one JSON object per line
pub struct JsonLinesSink {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl JsonLinesSink {
    pub fn from_writer<W: Write + Send + 'static>(writer: W) -> Self {
        Self {
            writer: Mutex::new(Box::new(writer)),
        }
    }

    pub fn stdout() -> Self {
        Self::from_writer(io::stdout())
    }

    /// Create (or truncate) `path` and write markers to it
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self::from_writer(BufWriter::new(file)))
    }
}

impl MarkerSink for JsonLinesSink {
    fn record(&self, event: MarkerEvent) {
        let mut writer = self.writer.lock();
        let written = serde_json::to_writer(&mut *writer, &event)
            .map_err(io::Error::from)
            .and_then(|_| writer.write_all(b"\n"))
            .and_then(|_| writer.flush());

        if let Err(e) = written {
            warn!(error = %e, kind = event.marker.kind(), "failed to write marker");
        }
    }
}

/// Forwards markers to `tracing` on the `marker` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl MarkerSink for TracingSink {
    fn record(&self, event: MarkerEvent) {
        let timestamp = event.timestamp.to_rfc3339();
        match &event.marker {
            Marker::Message { message } => {
                info!(target: "marker", %timestamp, %message, "mark");
            }
            Marker::Int { message, values } => {
                info!(target: "marker", %timestamp, %message, ?values, "mark");
            }
            Marker::Float { message, values } => {
                info!(target: "marker", %timestamp, %message, ?values, "mark");
            }
            Marker::Begin { message } => {
                info!(target: "marker", %timestamp, %message, "begin");
            }
            Marker::End { message, elapsed_ns } => {
                info!(target: "marker", %timestamp, %message, elapsed_ns, "end");
            }
            Marker::WorkingSet(ws) => {
                info!(
                    target: "marker",
                    %timestamp,
                    process = %ws.process_name,
                    label = %ws.label,
                    private_bytes = ws.private_bytes,
                    pss_bytes = ws.pss_bytes,
                    working_set_bytes = ws.working_set_bytes,
                    "working set"
                );
            }
            Marker::CpuFrequency(freq) => {
                let ghz: Vec<f64> = freq.samples.iter().map(|s| s.frequency_ghz).collect();
                info!(
                    target: "marker",
                    %timestamp,
                    round = freq.round,
                    start_ghz = freq.start_frequency_ghz,
                    ?ghz,
                    "cpu frequency"
                );
            }
        }
    }
}

/// Build the sink selected by configuration
pub fn build_sink(config: &SinkConfig) -> Result<Arc<dyn MarkerSink>> {
    let sink: Arc<dyn MarkerSink> = match config.kind {
        SinkKind::Json => match &config.path {
            Some(path) => Arc::new(JsonLinesSink::create(path).map_err(|e| {
                MonitorError::Sink(format!("cannot create {}: {}", path.display(), e))
            })?),
            None => Arc::new(JsonLinesSink::stdout()),
        },
        SinkKind::Tracing => Arc::new(TracingSink),
        SinkKind::Null => Arc::new(NullSink),
    };
    Ok(sink)
}

/// Brackets a region of the trace with `Begin` and `End` markers
///
/// The `End` marker is emitted when the scope is dropped, on every exit path.
pub struct MarkerScope {
    sink: Arc<dyn MarkerSink>,
    message: String,
    started: Instant,
}

impl MarkerScope {
    pub fn new(sink: Arc<dyn MarkerSink>, message: impl Into<String>) -> Self {
        let message = message.into();
        sink.emit(Marker::Begin {
            message: message.clone(),
        });
        Self {
            sink,
            message,
            started: Instant::now(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Drop for MarkerScope {
    fn drop(&mut self) {
        let elapsed_ns = u64::try_from(self.started.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.sink.emit(Marker::End {
            message: std::mem::take(&mut self.message),
            elapsed_ns,
        });
    }
}
