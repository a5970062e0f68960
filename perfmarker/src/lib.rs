//! perfmarker monitoring library
//!
//! Background samplers that annotate a performance trace: per-process
//! private, proportional and total working set, and per-core clock
//! frequency. Measurements are handed to a `MarkerSink` as timestamped
//! markers.

pub mod accounting;
pub mod config;
pub mod error;
pub mod filter;
pub mod marker;
pub mod pagemap;
pub mod process;
pub mod sink;
pub mod stats;
pub mod working_set;

// Frequency sampling
pub mod affinity;
pub mod cpu_frequency;
pub mod probe;
pub mod sync;

pub mod platform;
pub mod session;
pub mod system_info;

#[cfg(feature = "metrics")]
pub mod metrics;

// Re-export commonly used types
pub use accounting::{AggregateMemorySample, MemoryBytes, MemorySample};
pub use config::MonitorConfig;
pub use cpu_frequency::{CpuFrequencyMonitor, CpuFrequencyOptions};
pub use error::{MonitorError, Result};
pub use filter::ProcessFilter;
pub use marker::{CpuFrequencyMarker, Marker, MarkerEvent, WorkingSetMarker};
pub use session::CaptureSession;
pub use sink::{JsonLinesSink, MarkerScope, MarkerSink, MemorySink, NullSink, TracingSink};
pub use working_set::{WorkingSetMonitor, WorkingSetSampler};

#[cfg(feature = "metrics")]
pub use metrics::MetricsExporter;
