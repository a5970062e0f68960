use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use perfmarker::WorkingSetMarker;

/// Drop `value` on a helper thread and report whether the drop finished
/// within `timeout`
pub fn drop_within<T: Send + 'static>(value: T, timeout: Duration) -> bool {
    let (done_tx, done_rx) = mpsc::channel();
    thread::spawn(move || {
        drop(value);
        let _ = done_tx.send(());
    });
    done_rx.recv_timeout(timeout).is_ok()
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(2));
    }
}

/// Split a stream of working set markers into ticks, each ending with its
/// `Total` marker. Markers after the last total are dropped.
pub fn split_ticks(markers: &[WorkingSetMarker]) -> Vec<Vec<WorkingSetMarker>> {
    let mut ticks = Vec::new();
    let mut current = Vec::new();
    for marker in markers {
        current.push(marker.clone());
        if marker.is_total() {
            ticks.push(std::mem::take(&mut current));
        }
    }
    ticks
}

/// Names of the per-process markers of one tick, sorted
pub fn sampled_names(tick: &[WorkingSetMarker]) -> Vec<String> {
    let mut names: Vec<String> = tick
        .iter()
        .filter(|marker| !marker.is_total())
        .map(|marker| marker.process_name.clone())
        .collect();
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use perfmarker::MemoryBytes;

    #[test]
    fn test_drop_within() {
        assert!(drop_within(vec![1, 2, 3], Duration::from_secs(1)));

        struct SlowDrop;
        impl Drop for SlowDrop {
            fn drop(&mut self) {
                thread::sleep(Duration::from_millis(200));
            }
        }
        assert!(!drop_within(SlowDrop, Duration::from_millis(10)));
    }

    #[test]
    fn test_split_ticks() {
        let bytes = MemoryBytes::default();
        let markers = vec![
            WorkingSetMarker::process("a", 1, bytes),
            WorkingSetMarker::total(bytes),
            WorkingSetMarker::total(bytes),
            WorkingSetMarker::process("b", 2, bytes),
        ];

        let ticks = split_ticks(&markers);
        assert_eq!(ticks.len(), 2);
        assert_eq!(sampled_names(&ticks[0]), vec!["a".to_string()]);
        assert!(sampled_names(&ticks[1]).is_empty());
    }
}
