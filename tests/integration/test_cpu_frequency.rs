use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use perfmarker::affinity::NoAffinity;
use perfmarker::{CpuFrequencyMonitor, CpuFrequencyOptions, MemorySink};

use crate::mocks::{CountingProbe, SelectiveAffinity};
use crate::utils::{drop_within, wait_until};
use crate::{init_test_environment, DEFAULT_JOIN_TIMEOUT, DEFAULT_PROGRESS_TIMEOUT};

fn options(cpu_count: usize) -> CpuFrequencyOptions {
    CpuFrequencyOptions {
        cpus: (0..cpu_count).collect(),
        round_interval: Duration::from_millis(5),
        measurement_window: Duration::from_millis(1),
    }
}

#[test]
fn test_every_round_reads_slots_written_that_round() -> Result<()> {
    init_test_environment();
    let probe = Arc::new(CountingProbe::new(3.2));
    let sink = Arc::new(MemorySink::new());
    let monitor = CpuFrequencyMonitor::with_parts(
        options(4),
        probe.clone(),
        Arc::new(SelectiveAffinity::default()),
        sink.clone(),
    )?;

    assert!(wait_until(DEFAULT_PROGRESS_TIMEOUT, || monitor.stats().rounds >= 5));
    assert!(drop_within(monitor, DEFAULT_JOIN_TIMEOUT));

    let markers = sink.cpu_frequency_markers();
    assert!(markers.len() >= 5);
    for (index, marker) in markers.iter().enumerate() {
        assert_eq!(marker.round, index as u64 + 1);
        assert_eq!(marker.start_frequency_ghz, 3.2);
        assert_eq!(marker.samples.len(), 4);
        for (cpu, sample) in marker.samples.iter().enumerate() {
            assert_eq!(sample.cpu, cpu);
            assert_eq!(sample.frequency_ghz, CountingProbe::expected(cpu, marker.round));
        }
    }

    // One measurement per CPU per emitted round, none left in flight
    for cpu in 0..4 {
        assert_eq!(probe.measurements(cpu), markers.len() as u64);
    }
    Ok(())
}

#[test]
fn test_baseline_is_measured_once_unpinned() -> Result<()> {
    init_test_environment();
    let probe = Arc::new(CountingProbe::new(2.5));
    let monitor = CpuFrequencyMonitor::with_parts(
        CpuFrequencyOptions {
            round_interval: Duration::from_secs(3600),
            ..options(2)
        },
        probe.clone(),
        Arc::new(NoAffinity),
        Arc::new(MemorySink::new()),
    )?;

    assert_eq!(monitor.start_frequency_ghz(), 2.5);
    assert!(monitor.latest().is_none());
    assert_eq!(probe.measurements(0), 0);
    assert!(drop_within(monitor, DEFAULT_JOIN_TIMEOUT));
    Ok(())
}

#[test]
fn test_workers_run_on_their_own_threads() -> Result<()> {
    init_test_environment();
    let probe = Arc::new(CountingProbe::new(1.0));
    let affinity = Arc::new(SelectiveAffinity::default());
    let monitor = CpuFrequencyMonitor::with_parts(
        options(3),
        probe.clone(),
        affinity.clone(),
        Arc::new(MemorySink::new()),
    )?;

    assert!(wait_until(DEFAULT_PROGRESS_TIMEOUT, || monitor.stats().rounds >= 1));
    assert_eq!(affinity.pinned(), vec![0, 1, 2]);
    for cpu in 0..3 {
        assert_eq!(probe.thread_name(cpu), Some(format!("cpu-frequency-{cpu}")));
    }
    Ok(())
}

#[test]
fn test_unpinnable_cpus_are_excluded() -> Result<()> {
    init_test_environment();
    let probe = Arc::new(CountingProbe::new(1.0));
    let sink = Arc::new(MemorySink::new());
    let monitor = CpuFrequencyMonitor::with_parts(
        options(4),
        probe.clone(),
        Arc::new(SelectiveAffinity::failing_on(&[1, 3])),
        sink.clone(),
    )?;

    assert_eq!(monitor.active_cpus(), &[0, 2]);
    let stats = monitor.stats();
    assert_eq!(stats.active_cpus, 2);
    assert_eq!(stats.excluded_cpus, 2);

    assert!(wait_until(DEFAULT_PROGRESS_TIMEOUT, || monitor.stats().rounds >= 3));
    let latest = monitor.latest().unwrap();
    assert!(drop_within(monitor, DEFAULT_JOIN_TIMEOUT));

    let cpus: Vec<usize> = latest.samples.iter().map(|s| s.cpu).collect();
    assert_eq!(cpus, vec![0, 2]);
    for marker in sink.cpu_frequency_markers() {
        assert_eq!(marker.samples.len(), 2);
    }
    assert_eq!(probe.measurements(1), 0);
    assert_eq!(probe.measurements(3), 0);
    Ok(())
}

#[test]
fn test_sparse_cpu_set_samples_its_own_ids() -> Result<()> {
    init_test_environment();
    let probe = Arc::new(CountingProbe::new(1.0));
    let affinity = Arc::new(SelectiveAffinity::allowing(&[2, 3, 7]));
    let sink = Arc::new(MemorySink::new());
    let monitor = CpuFrequencyMonitor::with_parts(
        CpuFrequencyOptions {
            cpus: vec![2, 3, 7],
            ..options(0)
        },
        probe.clone(),
        affinity.clone(),
        sink.clone(),
    )?;

    assert_eq!(monitor.active_cpus(), &[2, 3, 7]);
    assert_eq!(monitor.stats().excluded_cpus, 0);
    assert!(wait_until(DEFAULT_PROGRESS_TIMEOUT, || monitor.stats().rounds >= 2));
    assert!(drop_within(monitor, DEFAULT_JOIN_TIMEOUT));

    assert_eq!(affinity.pinned(), vec![2, 3, 7]);
    for marker in sink.cpu_frequency_markers() {
        let cpus: Vec<usize> = marker.samples.iter().map(|s| s.cpu).collect();
        assert_eq!(cpus, vec![2, 3, 7]);
        for sample in &marker.samples {
            assert_eq!(sample.frequency_ghz, CountingProbe::expected(sample.cpu, marker.round));
        }
    }
    assert_eq!(probe.measurements(0), 0);
    Ok(())
}

#[test]
fn test_all_cpus_excluded_still_shuts_down() -> Result<()> {
    init_test_environment();
    let sink = Arc::new(MemorySink::new());
    let monitor = CpuFrequencyMonitor::with_parts(
        options(2),
        Arc::new(CountingProbe::new(1.0)),
        Arc::new(SelectiveAffinity::failing_on(&[0, 1])),
        sink.clone(),
    )?;

    assert!(monitor.active_cpus().is_empty());
    assert!(wait_until(DEFAULT_PROGRESS_TIMEOUT, || monitor.stats().rounds >= 1));
    assert!(drop_within(monitor, DEFAULT_JOIN_TIMEOUT));

    assert!(sink.cpu_frequency_markers().iter().all(|m| m.samples.is_empty()));
    Ok(())
}

#[test]
fn test_drop_stops_all_sampling() -> Result<()> {
    init_test_environment();
    let probe = Arc::new(CountingProbe::new(1.0));
    let sink = Arc::new(MemorySink::new());
    let monitor = CpuFrequencyMonitor::with_parts(
        CpuFrequencyOptions {
            cpus: (0..8).collect(),
            round_interval: Duration::from_millis(2),
            measurement_window: Duration::from_millis(1),
        },
        probe.clone(),
        Arc::new(NoAffinity),
        sink.clone(),
    )?;

    assert!(wait_until(DEFAULT_PROGRESS_TIMEOUT, || monitor.stats().rounds >= 2));
    assert!(drop_within(monitor, DEFAULT_JOIN_TIMEOUT));

    let emitted = sink.len();
    let measured = probe.measurements(0);
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(sink.len(), emitted);
    assert_eq!(probe.measurements(0), measured);
    Ok(())
}

#[test]
fn test_latest_tracks_emitted_rounds() -> Result<()> {
    init_test_environment();
    let sink = Arc::new(MemorySink::new());
    let monitor = CpuFrequencyMonitor::with_parts(
        options(2),
        Arc::new(CountingProbe::new(1.0)),
        Arc::new(NoAffinity),
        sink.clone(),
    )?;

    assert!(wait_until(DEFAULT_PROGRESS_TIMEOUT, || monitor.stats().rounds >= 2));
    drop(monitor);

    // The last emitted marker is the last stored one
    let markers = sink.cpu_frequency_markers();
    let last = markers.last().unwrap();
    assert_eq!(last.round, markers.len() as u64);
    assert_eq!(last.samples[1].frequency_ghz, 1000.0 + last.round as f64);
    Ok(())
}
