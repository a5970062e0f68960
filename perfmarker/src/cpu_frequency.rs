//! CPU frequency monitor
//!
//! One worker thread per logical CPU, each pinned to its CPU, and one
//! coordinator thread that drives them in lockstep. Every round the
//! coordinator publishes the round number, hands each worker a start token,
//! waits for exactly one `done` token per worker and only then reads the
//! per-CPU slots and emits a [`CpuFrequencyMarker`].

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::affinity::{CpuAffinity, NoAffinity};
use crate::config::CpuFrequencyConfig;
use crate::error::{MonitorError, Result};
use crate::marker::{CpuFrequencyMarker, CpuFrequencySample, Marker};
use crate::platform;
use crate::probe::{FrequencyProbe, SpinProbe};
use crate::sink::MarkerSink;
use crate::stats::{CpuFrequencyStats, CpuFrequencyStatsSnapshot};
use crate::sync::Semaphore;

const COORDINATOR_THREAD_NAME: &str = "cpu-frequency-monitor";

/// Timing and sizing of a CPU frequency monitor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CpuFrequencyOptions {
    /// Logical CPU ids that get a worker
    pub cpus: Vec<usize>,
    pub round_interval: Duration,
    pub measurement_window: Duration,
}

impl From<&CpuFrequencyConfig> for CpuFrequencyOptions {
    fn from(config: &CpuFrequencyConfig) -> Self {
        Self {
            cpus: config.cpus(),
            round_interval: config.round_interval(),
            measurement_window: config.measurement_window(),
        }
    }
}

/// Result slot of one worker. Written only by that worker, read by the
/// coordinator after the `done` rendezvous.
#[derive(Debug)]
struct CpuSampleSlot {
    logical_cpu: usize,
    start: Semaphore,
    frequency_bits: AtomicU64,
    round: AtomicU64,
}

impl CpuSampleSlot {
    fn new(logical_cpu: usize) -> Self {
        Self {
            logical_cpu,
            start: Semaphore::new(0),
            frequency_bits: AtomicU64::new(0),
            round: AtomicU64::new(0),
        }
    }

    // Relaxed is enough: the done semaphore orders these against the reader
    fn store(&self, frequency_ghz: f64, round: u64) {
        self.frequency_bits.store(frequency_ghz.to_bits(), Ordering::Relaxed);
        self.round.store(round, Ordering::Relaxed);
    }

    fn load(&self) -> (f64, u64) {
        (
            f64::from_bits(self.frequency_bits.load(Ordering::Relaxed)),
            self.round.load(Ordering::Relaxed),
        )
    }
}

/// State shared by the coordinator and every worker
struct RoundState {
    quit: AtomicBool,
    round: AtomicU64,
    done: Semaphore,
    window: Duration,
    probe: Arc<dyn FrequencyProbe>,
}

struct Worker {
    slot: Arc<CpuSampleSlot>,
    thread: JoinHandle<()>,
}

/// The active workers. Dropping the pool runs the quit protocol.
struct WorkerPool {
    state: Arc<RoundState>,
    workers: Vec<Worker>,
}

impl WorkerPool {
    /// Spawn one pinned worker per CPU. CPUs whose worker cannot be spawned
    /// or pinned are left out.
    fn spawn(
        cpus: &[usize],
        state: Arc<RoundState>,
        affinity: Arc<dyn CpuAffinity>,
        stats: &CpuFrequencyStats,
    ) -> Self {
        let mut workers = Vec::with_capacity(cpus.len());

        for &cpu in cpus {
            let slot = Arc::new(CpuSampleSlot::new(cpu));
            let (ready_tx, ready_rx) = mpsc::sync_channel(1);

            let worker_slot = Arc::clone(&slot);
            let worker_state = Arc::clone(&state);
            let worker_affinity = Arc::clone(&affinity);
            let spawned = thread::Builder::new()
                .name(format!("cpu-frequency-{cpu}"))
                .spawn(move || {
                    let pinned = worker_affinity.pin_current_thread(cpu);
                    let ok = pinned.is_ok();
                    let _ = ready_tx.send(pinned);
                    if ok {
                        sample_loop(&worker_slot, &worker_state);
                    }
                });

            let thread = match spawned {
                Ok(thread) => thread,
                Err(e) => {
                    warn!(cpu, error = %e, "failed to spawn frequency worker, excluding cpu");
                    stats.record_excluded_cpu();
                    continue;
                }
            };

            match ready_rx.recv() {
                Ok(Ok(())) => {
                    stats.record_active_cpu();
                    workers.push(Worker { slot, thread });
                }
                Ok(Err(e)) => {
                    warn!(cpu, error = %e, "failed to pin frequency worker, excluding cpu");
                    stats.record_excluded_cpu();
                    let _ = thread.join();
                }
                Err(_) => {
                    warn!(cpu, "frequency worker exited before reporting, excluding cpu");
                    stats.record_excluded_cpu();
                    let _ = thread.join();
                }
            }
        }

        Self { state, workers }
    }

    fn active_cpus(&self) -> Vec<usize> {
        self.workers.iter().map(|w| w.slot.logical_cpu).collect()
    }

    /// Run one lockstep round and collect every worker's result
    fn run_round(&self, round: u64) -> Vec<CpuFrequencySample> {
        self.state.round.store(round, Ordering::Relaxed);
        for worker in &self.workers {
            worker.slot.start.release(1);
        }

        self.state.done.acquire_many(self.workers.len());
        debug_assert_eq!(self.state.done.available_permits(), 0, "extra done token");

        self.workers
            .iter()
            .map(|worker| {
                let (frequency_ghz, written_in) = worker.slot.load();
                debug_assert_eq!(written_in, round, "cpu {} slot is stale", worker.slot.logical_cpu);
                CpuFrequencySample {
                    cpu: worker.slot.logical_cpu,
                    frequency_ghz,
                }
            })
            .collect()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.state.quit.store(true, Ordering::Release);
        for worker in &self.workers {
            worker.slot.start.release(1);
        }
        for worker in self.workers.drain(..) {
            if worker.thread.join().is_err() {
                warn!(cpu = worker.slot.logical_cpu, "frequency worker panicked");
            }
        }
    }
}

fn sample_loop(slot: &CpuSampleSlot, state: &RoundState) {
    loop {
        slot.start.acquire();
        if state.quit.load(Ordering::Acquire) {
            break;
        }

        let round = state.round.load(Ordering::Relaxed);
        let frequency_ghz = state.probe.measure(Some(slot.logical_cpu), state.window);
        slot.store(frequency_ghz, round);
        state.done.release(1);
    }
}

/// Per-core clock frequency sampling on pinned threads
///
/// Threads start in the constructor; dropping the monitor stops the
/// coordinator, which stops and joins every worker before it exits.
pub struct CpuFrequencyMonitor {
    start_frequency_ghz: f64,
    active_cpus: Vec<usize>,
    latest: Arc<Mutex<Option<CpuFrequencyMarker>>>,
    stats: Arc<CpuFrequencyStats>,
    exit: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CpuFrequencyMonitor {
    /// Start a monitor using the spin probe and, if configured, real pinning
    pub fn new(config: &CpuFrequencyConfig, sink: Arc<dyn MarkerSink>) -> Result<Self> {
        config.validate()?;
        let affinity: Arc<dyn CpuAffinity> = if config.pin_threads {
            Arc::from(platform::default_affinity())
        } else {
            Arc::new(NoAffinity)
        };
        Self::with_parts(config.into(), Arc::new(SpinProbe), affinity, sink)
    }

    pub fn with_parts(
        options: CpuFrequencyOptions,
        probe: Arc<dyn FrequencyProbe>,
        affinity: Arc<dyn CpuAffinity>,
        sink: Arc<dyn MarkerSink>,
    ) -> Result<Self> {
        if options.measurement_window.is_zero() || options.round_interval.is_zero() {
            return Err(MonitorError::Generic(
                "frequency round interval and measurement window must be non-zero".to_string(),
            ));
        }

        // Baseline on the constructing thread, before any worker competes for it
        let start_frequency_ghz = probe.measure(None, options.measurement_window);
        info!(start_ghz = start_frequency_ghz, cpus = ?options.cpus, "measured start frequency");

        let stats = Arc::new(CpuFrequencyStats::default());
        let state = Arc::new(RoundState {
            quit: AtomicBool::new(false),
            round: AtomicU64::new(0),
            done: Semaphore::new(0),
            window: options.measurement_window,
            probe,
        });

        let pool = WorkerPool::spawn(&options.cpus, state, affinity, &stats);
        let active_cpus = pool.active_cpus();
        if active_cpus.len() < options.cpus.len() {
            warn!(
                active = active_cpus.len(),
                requested = options.cpus.len(),
                "frequency monitor running on a subset of cpus"
            );
        }

        let latest = Arc::new(Mutex::new(None));
        let (exit_tx, exit_rx) = mpsc::channel::<()>();

        let thread_latest = Arc::clone(&latest);
        let thread_stats = Arc::clone(&stats);
        let round_interval = options.round_interval;
        // If spawning fails the closure is dropped, and the pool with it
        let thread = thread::Builder::new()
            .name(COORDINATOR_THREAD_NAME.to_string())
            .spawn(move || {
                info!(workers = pool.workers.len(), "cpu frequency monitor started");
                let mut round = 0;
                loop {
                    match exit_rx.recv_timeout(round_interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            round += 1;
                            let marker = CpuFrequencyMarker {
                                round,
                                start_frequency_ghz,
                                samples: pool.run_round(round),
                            };
                            debug!(
                                round,
                                avg_ghz = ?marker.average_ghz(),
                                min_ghz = ?marker.min_ghz(),
                                max_ghz = ?marker.max_ghz(),
                                "frequency round"
                            );
                            *thread_latest.lock() = Some(marker.clone());
                            sink.emit(Marker::CpuFrequency(marker));
                            thread_stats.record_round();
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                drop(pool);
                info!("cpu frequency monitor stopped");
            })
            .map_err(|source| MonitorError::Spawn {
                name: COORDINATOR_THREAD_NAME.to_string(),
                source,
            })?;

        Ok(Self {
            start_frequency_ghz,
            active_cpus,
            latest,
            stats,
            exit: Some(exit_tx),
            thread: Some(thread),
        })
    }

    /// Frequency measured on the constructing thread
    pub fn start_frequency_ghz(&self) -> f64 {
        self.start_frequency_ghz
    }

    /// Logical CPUs with a running, pinned worker
    pub fn active_cpus(&self) -> &[usize] {
        &self.active_cpus
    }

    /// Most recent completed round
    pub fn latest(&self) -> Option<CpuFrequencyMarker> {
        self.latest.lock().clone()
    }

    pub fn stats(&self) -> CpuFrequencyStatsSnapshot {
        self.stats.snapshot()
    }

    /// Stop sampling and wait for every thread to exit
    pub fn stop(self) {}
}

impl Drop for CpuFrequencyMonitor {
    fn drop(&mut self) {
        if let Some(exit) = self.exit.take() {
            let _ = exit.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("cpu frequency coordinator panicked");
            }
        }
    }
}
