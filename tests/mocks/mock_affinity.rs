use std::collections::HashSet;
use std::io;

use parking_lot::Mutex;

use perfmarker::affinity::CpuAffinity;

/// Pins succeed except on the CPUs the test marks as failing, or outside
/// the set it allows
#[derive(Default)]
pub struct SelectiveAffinity {
    failing: HashSet<usize>,
    allowed: Option<HashSet<usize>>,
    pinned: Mutex<Vec<usize>>,
}

impl SelectiveAffinity {
    pub fn failing_on(cpus: &[usize]) -> Self {
        Self {
            failing: cpus.iter().copied().collect(),
            ..Self::default()
        }
    }

    /// Behave like a cpuset: only `cpus` can be pinned
    pub fn allowing(cpus: &[usize]) -> Self {
        Self {
            allowed: Some(cpus.iter().copied().collect()),
            ..Self::default()
        }
    }

    /// CPUs successfully pinned, sorted
    pub fn pinned(&self) -> Vec<usize> {
        let mut pinned = self.pinned.lock().clone();
        pinned.sort_unstable();
        pinned
    }
}

impl CpuAffinity for SelectiveAffinity {
    fn pin_current_thread(&self, cpu: usize) -> io::Result<()> {
        let outside = self.allowed.as_ref().is_some_and(|allowed| !allowed.contains(&cpu));
        if outside || self.failing.contains(&cpu) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("cpu {cpu} is not in the allowed set"),
            ));
        }
        self.pinned.lock().push(cpu);
        Ok(())
    }
}
