//! Point-in-time process enumeration

use crate::error::SnapshotResult;

/// A process seen in one snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,

    /// Executable file name without its directory
    pub name: String,
}

impl ProcessEntry {
    pub fn new(pid: u32, name: impl Into<String>) -> Self {
        Self {
            pid,
            name: name.into(),
        }
    }
}

/// Source of process snapshots
///
/// Processes that start or exit while a snapshot is taken may be missing
/// from it.
pub trait ProcessSource: Send {
    fn snapshot(&mut self) -> SnapshotResult<Vec<ProcessEntry>>;
}

#[cfg(target_os = "linux")]
pub use self::linux::ProcfsProcessSource;

#[cfg(target_os = "linux")]
mod linux {
    use procfs::process::{all_processes, Process};
    use tracing::trace;

    use super::{ProcessEntry, ProcessSource};
    use crate::error::{SnapshotError, SnapshotResult};

    /// Enumerates `/proc`
    #[derive(Debug, Default)]
    pub struct ProcfsProcessSource;

    impl ProcfsProcessSource {
        pub fn new() -> Self {
            Self
        }
    }

    /// Marker the kernel appends to `exe` once the file is replaced on disk
    const DELETED_SUFFIX: &str = " (deleted)";

    /// File name of an executable path, ignoring the deleted marker
    fn executable_name(path: &str) -> Option<&str> {
        let path = path.strip_suffix(DELETED_SUFFIX).unwrap_or(path);
        path.rsplit('/').next().filter(|name| !name.is_empty())
    }

    /// Executable file name. Falls back to `argv[0]` when `exe` is
    /// unreadable, and to the truncated `comm` last.
    fn process_name(process: &Process) -> Option<String> {
        if let Ok(exe) = process.exe() {
            if let Some(name) = exe.to_str().and_then(executable_name) {
                return Some(name.to_string());
            }
        }

        if let Ok(cmdline) = process.cmdline() {
            if let Some(name) = cmdline.first().and_then(|arg0| executable_name(arg0)) {
                return Some(name.to_string());
            }
        }

        process.stat().ok().map(|stat| stat.comm)
    }

    impl ProcessSource for ProcfsProcessSource {
        fn snapshot(&mut self) -> SnapshotResult<Vec<ProcessEntry>> {
            let processes = all_processes().map_err(|e| SnapshotError::EnumerationFailed {
                reason: e.to_string(),
            })?;

            let mut entries = Vec::new();
            for process in processes {
                let process = match process {
                    Ok(process) => process,
                    Err(e) => {
                        trace!(error = %e, "process vanished during snapshot");
                        continue;
                    }
                };

                let Ok(pid) = u32::try_from(process.pid()) else {
                    continue;
                };
                match process_name(&process) {
                    Some(name) => entries.push(ProcessEntry::new(pid, name)),
                    None => trace!(pid, "process has no readable name"),
                }
            }

            Ok(entries)
        }
    }

}
