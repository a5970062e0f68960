//! Trace marker events
//!
//! A marker attributes a measurement or a note to a point on the trace
//! timeline. Monitors build markers; sinks decide where they go.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::accounting::MemoryBytes;

/// Label of the aggregate working-set marker emitted after every tick
pub const TOTAL_PROCESS_NAME: &str = "Total";

/// A timestamped marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerEvent {
    pub timestamp: DateTime<Utc>,

    #[serde(flatten)]
    pub marker: Marker,
}

/// Marker payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Marker {
    /// A notable point in the trace
    Message { message: String },

    /// One or two integer data fields
    Int { message: String, values: Vec<i64> },

    /// One or two float data fields
    Float { message: String, values: Vec<f64> },

    /// Start of a bracketed region
    Begin { message: String },

    /// End of a bracketed region
    End { message: String, elapsed_ns: u64 },

    /// Private, proportional and total working set of one process
    WorkingSet(WorkingSetMarker),

    /// Per-CPU clock frequencies measured in one round
    CpuFrequency(CpuFrequencyMarker),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingSetMarker {
    /// Executable file name, or `Total`
    pub process_name: String,

    /// `name (pid)`; empty for the aggregate marker
    pub label: String,

    pub private_bytes: u64,
    pub pss_bytes: u64,
    pub working_set_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuFrequencyMarker {
    /// Round number, starting at 1
    pub round: u64,

    /// Baseline measured when the monitor was constructed
    pub start_frequency_ghz: f64,

    pub samples: Vec<CpuFrequencySample>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CpuFrequencySample {
    pub cpu: usize,
    pub frequency_ghz: f64,
}

impl MarkerEvent {
    /// Stamp a marker with the current time
    pub fn now(marker: Marker) -> Self {
        Self {
            timestamp: Utc::now(),
            marker,
        }
    }
}

impl Marker {
    pub fn message(message: impl Into<String>) -> Self {
        Marker::Message {
            message: message.into(),
        }
    }

    pub fn int1(message: impl Into<String>, data1: i64) -> Self {
        Marker::Int {
            message: message.into(),
            values: vec![data1],
        }
    }

    pub fn int2(message: impl Into<String>, data1: i64, data2: i64) -> Self {
        Marker::Int {
            message: message.into(),
            values: vec![data1, data2],
        }
    }

    pub fn float1(message: impl Into<String>, data1: f64) -> Self {
        Marker::Float {
            message: message.into(),
            values: vec![data1],
        }
    }

    pub fn float2(message: impl Into<String>, data1: f64, data2: f64) -> Self {
        Marker::Float {
            message: message.into(),
            values: vec![data1, data2],
        }
    }

    /// Short name of the marker kind, matching the serialized `kind` tag
    pub fn kind(&self) -> &'static str {
        match self {
            Marker::Message { .. } => "message",
            Marker::Int { .. } => "int",
            Marker::Float { .. } => "float",
            Marker::Begin { .. } => "begin",
            Marker::End { .. } => "end",
            Marker::WorkingSet(_) => "working_set",
            Marker::CpuFrequency(_) => "cpu_frequency",
        }
    }
}

impl WorkingSetMarker {
    /// Marker for one sampled process
    pub fn process(name: &str, pid: u32, bytes: MemoryBytes) -> Self {
        Self {
            process_name: name.to_string(),
            label: format!("{name} ({pid})"),
            private_bytes: bytes.private_bytes,
            pss_bytes: bytes.pss_bytes,
            working_set_bytes: bytes.working_set_bytes,
        }
    }

    /// Aggregate marker closing a tick
    pub fn total(bytes: MemoryBytes) -> Self {
        Self {
            process_name: TOTAL_PROCESS_NAME.to_string(),
            label: String::new(),
            private_bytes: bytes.private_bytes,
            pss_bytes: bytes.pss_bytes,
            working_set_bytes: bytes.working_set_bytes,
        }
    }

    pub fn is_total(&self) -> bool {
        self.process_name == TOTAL_PROCESS_NAME && self.label.is_empty()
    }

    pub fn bytes(&self) -> MemoryBytes {
        MemoryBytes {
            private_bytes: self.private_bytes,
            pss_bytes: self.pss_bytes,
            working_set_bytes: self.working_set_bytes,
        }
    }
}

impl CpuFrequencyMarker {
    pub fn average_ghz(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: f64 = self.samples.iter().map(|s| s.frequency_ghz).sum();
        Some(sum / self.samples.len() as f64)
    }

    pub fn min_ghz(&self) -> Option<f64> {
        self.samples.iter().map(|s| s.frequency_ghz).reduce(f64::min)
    }

    pub fn max_ghz(&self) -> Option<f64> {
        self.samples.iter().map(|s| s.frequency_ghz).reduce(f64::max)
    }
}
