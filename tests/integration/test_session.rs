use std::fs;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tempfile::TempDir;

use perfmarker::config::{MonitorConfig, SinkKind};
use perfmarker::sink::build_sink;
use perfmarker::{CaptureSession, Marker, MemorySink, ProcessFilter};

use crate::utils::{drop_within, wait_until};
use crate::{init_test_environment, DEFAULT_JOIN_TIMEOUT, DEFAULT_PROGRESS_TIMEOUT};

fn quick_config() -> MonitorConfig {
    let mut config = MonitorConfig::default();
    config.working_set.interval_ms = 10;
    config.working_set.process_filter = "*".to_string();
    config.cpu_frequency.round_interval_ms = 10;
    config.cpu_frequency.measurement_window_ms = 1;
    config.cpu_frequency.max_cpus = 2;
    config.cpu_frequency.pin_threads = false;
    config
}

#[test]
fn test_session_rejects_invalid_config() {
    init_test_environment();
    let mut config = quick_config();
    config.cpu_frequency.measurement_window_ms = 10;

    let sink = Arc::new(MemorySink::new());
    assert!(CaptureSession::start(&config, sink.clone()).is_err());
    assert!(sink.is_empty());
}

#[test]
fn test_session_filter_passthrough() -> Result<()> {
    init_test_environment();
    let mut config = quick_config();
    config.working_set.interval_ms = 60_000;
    config.cpu_frequency.enabled = false;

    let session = CaptureSession::start(&config, Arc::new(MemorySink::new()))?;
    assert_eq!(session.process_filter().as_deref(), Some(&ProcessFilter::All));

    session.set_process_filter("bash;sshd");
    assert_eq!(
        session.process_filter().as_deref(),
        Some(&ProcessFilter::parse("sshd;bash"))
    );

    assert!(drop_within(session, DEFAULT_JOIN_TIMEOUT));
    Ok(())
}

#[cfg(target_os = "linux")]
#[test]
fn test_session_captures_both_monitors() -> Result<()> {
    init_test_environment();
    let sink = Arc::new(MemorySink::new());
    let session = CaptureSession::start(&quick_config(), sink.clone())?;

    assert!(wait_until(DEFAULT_PROGRESS_TIMEOUT, || {
        sink.working_set_markers().iter().any(|m| m.is_total())
            && !sink.cpu_frequency_markers().is_empty()
    }));
    assert!(session.latest_frequency().is_some());
    assert!(drop_within(session, DEFAULT_JOIN_TIMEOUT));

    let events = sink.events();
    assert!(matches!(&events[0].marker, Marker::Begin { message } if message == "capture"));
    assert!(matches!(events.last().map(|e| &e.marker), Some(Marker::End { .. })));

    // The bracket closes after both monitors have stopped
    let settled = sink.len();
    std::thread::sleep(Duration::from_millis(30));
    assert_eq!(sink.len(), settled);

    // Our own process is always visible
    let me = std::process::id();
    assert!(sink
        .working_set_markers()
        .iter()
        .any(|m| m.label.ends_with(&format!("({me})"))));
    Ok(())
}

#[cfg(target_os = "linux")]
#[test]
fn test_json_sink_capture_file() -> Result<()> {
    init_test_environment();
    let dir = TempDir::new()?;
    let path = dir.path().join("markers.jsonl");

    let mut config = quick_config();
    config.cpu_frequency.enabled = false;
    config.sink.kind = SinkKind::Json;
    config.sink.path = Some(path.clone());

    let sink = build_sink(&config.sink)?;
    let session = CaptureSession::start(&config, sink)?;
    let stats_ready = wait_until(DEFAULT_PROGRESS_TIMEOUT, || {
        session.working_set_stats().map_or(false, |s| s.ticks >= 1)
    });
    session.stop();
    assert!(stats_ready);

    let content = fs::read_to_string(&path)?;
    let kinds: Vec<String> = content
        .lines()
        .map(|line| -> Result<String> {
            let value: serde_json::Value = serde_json::from_str(line)?;
            Ok(value["kind"].as_str().unwrap_or_default().to_string())
        })
        .collect::<Result<_>>()?;

    assert_eq!(kinds.first().map(String::as_str), Some("begin"));
    assert_eq!(kinds.last().map(String::as_str), Some("end"));
    assert!(kinds.iter().any(|kind| kind == "working_set"));
    Ok(())
}
