//! Platform defaults for process enumeration, page queries and affinity
//!
//! Only Linux has real implementations. Elsewhere the sources report
//! `Unsupported`, which the monitors treat like any other sampling failure.

use crate::affinity::CpuAffinity;
use crate::pagemap::WorkingSetQuery;
use crate::process::ProcessSource;

/// Page size in bytes
#[cfg(unix)]
pub fn page_size() -> u64 {
    // SAFETY: sysconf has no preconditions
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as u64
    } else {
        4096
    }
}

/// Page size in bytes
#[cfg(not(unix))]
pub fn page_size() -> u64 {
    4096
}

#[cfg(target_os = "linux")]
pub fn default_process_source() -> Box<dyn ProcessSource> {
    Box::new(crate::process::ProcfsProcessSource::new())
}

#[cfg(target_os = "linux")]
pub fn default_query() -> Box<dyn WorkingSetQuery> {
    Box::new(crate::pagemap::PagemapQuery::new(page_size()))
}

#[cfg(target_os = "linux")]
pub fn default_affinity() -> Box<dyn CpuAffinity> {
    Box::new(crate::affinity::SchedAffinity)
}

#[cfg(not(target_os = "linux"))]
pub fn default_process_source() -> Box<dyn ProcessSource> {
    Box::new(unsupported::UnsupportedProcessSource)
}

#[cfg(not(target_os = "linux"))]
pub fn default_query() -> Box<dyn WorkingSetQuery> {
    Box::new(unsupported::UnsupportedQuery)
}

#[cfg(not(target_os = "linux"))]
pub fn default_affinity() -> Box<dyn CpuAffinity> {
    Box::new(unsupported::UnsupportedAffinity)
}

#[cfg(not(target_os = "linux"))]
mod unsupported {
    use std::io;

    use crate::affinity::CpuAffinity;
    use crate::error::{QueryError, QueryResult, SnapshotError, SnapshotResult};
    use crate::pagemap::{PageTable, WorkingSetQuery};
    use crate::process::{ProcessEntry, ProcessSource};

    pub struct UnsupportedProcessSource;

    impl ProcessSource for UnsupportedProcessSource {
        fn snapshot(&mut self) -> SnapshotResult<Vec<ProcessEntry>> {
            Err(SnapshotError::Unsupported)
        }
    }

    pub struct UnsupportedQuery;

    impl WorkingSetQuery for UnsupportedQuery {
        fn page_size(&self) -> u64 {
            super::page_size()
        }

        fn query(&mut self, _pid: u32, _table: &mut PageTable) -> QueryResult<()> {
            Err(QueryError::Unsupported)
        }
    }

    pub struct UnsupportedAffinity;

    impl CpuAffinity for UnsupportedAffinity {
        fn pin_current_thread(&self, _cpu: usize) -> io::Result<()> {
            Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "thread affinity is not supported on this platform",
            ))
        }
    }
}
