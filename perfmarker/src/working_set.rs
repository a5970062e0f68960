//! Working set monitor
//!
//! A background thread that periodically measures the private, proportional
//! and total resident memory of the processes selected by a
//! [`ProcessFilter`] and reports them to a [`MarkerSink`]. Each tick emits one
//! marker per sampled process followed by a `Total` marker whose values are
//! the sum of the per-process markers of that tick.

use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::accounting::{AggregateMemorySample, MemorySample};
use crate::config::WorkingSetConfig;
use crate::error::{MonitorError, QueryError, QueryResult, Result};
use crate::filter::ProcessFilter;
use crate::marker::{Marker, WorkingSetMarker};
use crate::pagemap::{PageTable, WorkingSetQuery};
use crate::platform;
use crate::process::ProcessSource;
use crate::sink::MarkerSink;
use crate::stats::{WorkingSetStats, WorkingSetStatsSnapshot};

const THREAD_NAME: &str = "working-set-monitor";

/// Runs single working set ticks
///
/// Owns the process source, the page table query and the reusable page
/// table. The monitor thread drives one sampler; it can also be driven
/// directly for one-shot measurements.
pub struct WorkingSetSampler {
    source: Box<dyn ProcessSource>,
    query: Box<dyn WorkingSetQuery>,
    table: PageTable,
    stats: Arc<WorkingSetStats>,
}

impl WorkingSetSampler {
    pub fn new(
        source: Box<dyn ProcessSource>,
        query: Box<dyn WorkingSetQuery>,
        initial_capacity: usize,
    ) -> Self {
        Self {
            source,
            query,
            table: PageTable::with_capacity(initial_capacity),
            stats: Arc::new(WorkingSetStats::default()),
        }
    }

    /// Sampler over the platform's process list and page tables
    pub fn with_platform_defaults(initial_capacity: usize) -> Self {
        Self::new(
            platform::default_process_source(),
            platform::default_query(),
            initial_capacity,
        )
    }

    pub fn stats(&self) -> Arc<WorkingSetStats> {
        Arc::clone(&self.stats)
    }

    /// Current page table capacity in entries
    pub fn page_table_capacity(&self) -> usize {
        self.table.capacity()
    }

    /// Run one tick.
    ///
    /// Returns the tick's totals, or `None` when the tick was skipped
    /// because the filter is empty or the process snapshot failed.
    pub fn sample(
        &mut self,
        filter: &ProcessFilter,
        sink: &dyn MarkerSink,
    ) -> Option<AggregateMemorySample> {
        if filter.is_empty() {
            self.stats.record_tick_skipped();
            trace!("empty process filter, skipping tick");
            return None;
        }

        let processes = match self.source.snapshot() {
            Ok(processes) => processes,
            Err(e) => {
                self.stats.record_snapshot_failure();
                debug!(error = %e, "process snapshot failed, abandoning tick");
                return None;
            }
        };

        let page_size = self.query.page_size();
        let mut aggregate = AggregateMemorySample::default();

        for process in processes.iter().filter(|p| filter.matches(&p.name)) {
            let sample = match self.measure(process.pid) {
                Ok(sample) => sample,
                Err(e) => {
                    self.stats.record_process_skipped();
                    trace!(pid = process.pid, name = %process.name, error = %e, "skipping process");
                    continue;
                }
            };

            // Kernel threads have no user address space
            if sample.working_set_pages == 0 {
                trace!(pid = process.pid, name = %process.name, "empty working set");
                continue;
            }

            let bytes = sample.to_bytes(page_size);
            sink.emit(Marker::WorkingSet(WorkingSetMarker::process(
                &process.name,
                process.pid,
                bytes,
            )));
            self.stats.record_process_sampled();
            self.stats.record_marker();
            aggregate.add_process(bytes);
        }

        sink.emit(Marker::WorkingSet(WorkingSetMarker::total(aggregate.bytes)));
        self.stats.record_marker();
        self.stats.record_tick();

        debug!(
            processes = aggregate.processes,
            pss_bytes = aggregate.bytes.pss_bytes,
            working_set_bytes = aggregate.bytes.working_set_bytes,
            "working set tick"
        );

        Some(aggregate)
    }

    /// Query one process, growing the page table and retrying once if it
    /// did not fit
    fn measure(&mut self, pid: u32) -> QueryResult<MemorySample> {
        match self.query.query(pid, &mut self.table) {
            Ok(()) => {}
            Err(QueryError::BufferTooSmall { required }) => {
                self.stats.record_query_retry();
                self.table.grow_to(required + required / 4);
                trace!(pid, capacity = self.table.capacity(), "grew page table");
                self.query.query(pid, &mut self.table)?;
            }
            Err(e) => return Err(e),
        }

        Ok(MemorySample::from_pages(self.table.entries()))
    }
}

/// Periodic working set sampling on a dedicated thread
///
/// The thread starts in the constructor. Dropping the monitor signals the
/// thread and waits for it to exit.
pub struct WorkingSetMonitor {
    filter: Arc<Mutex<Arc<ProcessFilter>>>,
    stats: Arc<WorkingSetStats>,
    exit: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl WorkingSetMonitor {
    /// Start a monitor over the platform's process list and page tables
    pub fn new(config: &WorkingSetConfig, sink: Arc<dyn MarkerSink>) -> Result<Self> {
        config.validate()?;
        let sampler = WorkingSetSampler::with_platform_defaults(config.initial_page_capacity);
        let filter = ProcessFilter::parse(&config.process_filter);
        Self::with_sampler(sampler, config.interval(), filter, sink)
    }

    /// Start a monitor driving `sampler` every `interval`
    pub fn with_sampler(
        mut sampler: WorkingSetSampler,
        interval: Duration,
        filter: ProcessFilter,
        sink: Arc<dyn MarkerSink>,
    ) -> Result<Self> {
        if interval.is_zero() {
            return Err(MonitorError::Generic(
                "working set interval must be non-zero".to_string(),
            ));
        }

        let filter = Arc::new(Mutex::new(Arc::new(filter)));
        let stats = sampler.stats();
        let (exit_tx, exit_rx) = mpsc::channel();

        let thread_filter = Arc::clone(&filter);
        let thread = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || {
                info!(interval_ms = interval.as_millis() as u64, "working set monitor started");
                loop {
                    match exit_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            let filter = Arc::clone(&*thread_filter.lock());
                            sampler.sample(&filter, sink.as_ref());
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                info!("working set monitor stopped");
            })
            .map_err(|source| MonitorError::Spawn {
                name: THREAD_NAME.to_string(),
                source,
            })?;

        Ok(Self {
            filter,
            stats,
            exit: Some(exit_tx),
            thread: Some(thread),
        })
    }

    /// Replace the process filter; takes effect from the next tick
    pub fn set_process_filter(&self, spec: &str) {
        let filter = Arc::new(ProcessFilter::parse(spec));
        debug!(?filter, "process filter updated");
        *self.filter.lock() = filter;
    }

    pub fn process_filter(&self) -> Arc<ProcessFilter> {
        Arc::clone(&*self.filter.lock())
    }

    pub fn stats(&self) -> WorkingSetStatsSnapshot {
        self.stats.snapshot()
    }

    /// Stop sampling and wait for the thread to exit
    pub fn stop(self) {}
}

impl Drop for WorkingSetMonitor {
    fn drop(&mut self) {
        if let Some(exit) = self.exit.take() {
            // The thread may already be gone; a closed channel stops it too
            let _ = exit.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("working set monitor thread panicked");
            }
        }
    }
}
