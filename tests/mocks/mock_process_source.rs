use std::sync::Arc;

use parking_lot::Mutex;

use perfmarker::error::{SnapshotError, SnapshotResult};
use perfmarker::process::{ProcessEntry, ProcessSource};

/// Process list controlled by the test
///
/// Clones share state, so a test can keep a handle after moving the source
/// into a sampler.
#[derive(Clone, Default)]
pub struct ScriptedProcessSource {
    state: Arc<Mutex<SourceState>>,
}

#[derive(Default)]
struct SourceState {
    processes: Vec<ProcessEntry>,
    failures_remaining: usize,
    snapshots: usize,
}

impl ScriptedProcessSource {
    pub fn new(processes: &[(u32, &str)]) -> Self {
        let source = Self::default();
        source.set_processes(processes);
        source
    }

    pub fn set_processes(&self, processes: &[(u32, &str)]) {
        self.state.lock().processes = processes
            .iter()
            .map(|&(pid, name)| ProcessEntry::new(pid, name))
            .collect();
    }

    /// Make the next `count` snapshots fail
    pub fn fail_next(&self, count: usize) {
        self.state.lock().failures_remaining = count;
    }

    /// Number of snapshot attempts, failed ones included
    pub fn snapshots(&self) -> usize {
        self.state.lock().snapshots
    }
}

impl ProcessSource for ScriptedProcessSource {
    fn snapshot(&mut self) -> SnapshotResult<Vec<ProcessEntry>> {
        let mut state = self.state.lock();
        state.snapshots += 1;

        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(SnapshotError::EnumerationFailed {
                reason: "scripted failure".to_string(),
            });
        }

        Ok(state.processes.clone())
    }
}
