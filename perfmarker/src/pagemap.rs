//! Resident page tables
//!
//! A `WorkingSetQuery` fills a caller-owned [`PageTable`] with one entry per
//! resident page of a process. The table has a fixed capacity; a query that
//! does not fit reports the entry count it needed so the caller can grow the
//! table and try again.
//!
//! On Linux the table is read from `/proc/<pid>/maps` and
//! `/proc/<pid>/pagemap`, with share counts from `/proc/kpagecount`.

use crate::error::{QueryError, QueryResult};

/// Share count assumed for a shared page whose mapping count is unreadable
pub const UNKNOWN_SHARE_COUNT: u8 = 2;

/// Residency information for one page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageEntry {
    shared: bool,
    share_count: u8,
}

impl PageEntry {
    pub const fn private() -> Self {
        Self {
            shared: false,
            share_count: 1,
        }
    }

    pub const fn shared(share_count: u8) -> Self {
        Self {
            shared: true,
            share_count,
        }
    }

    /// Classify a page from the number of address spaces mapping it. A count
    /// of zero means the kernel keeps no mapcount for the page (the shared
    /// zero page, for one), so it says nothing about sharing.
    pub fn from_map_count(map_count: u64) -> Option<Self> {
        match map_count {
            0 => None,
            1 => Some(Self::private()),
            n => Some(Self::shared(n.min(u64::from(u8::MAX)) as u8)),
        }
    }

    #[inline]
    pub fn is_shared(&self) -> bool {
        self.shared
    }

    /// Raw share count; callers clamp it to the supported range
    #[inline]
    pub fn share_count(&self) -> u8 {
        self.share_count
    }
}

/// Reusable, bounded buffer of page entries
#[derive(Debug)]
pub struct PageTable {
    entries: Vec<PageEntry>,
    capacity: usize,
}

impl PageTable {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Maximum number of entries a single query may store
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[PageEntry] {
        &self.entries
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Store an entry; returns false once the table is full
    #[inline]
    pub fn push(&mut self, entry: PageEntry) -> bool {
        if self.entries.len() >= self.capacity {
            return false;
        }
        self.entries.push(entry);
        true
    }

    /// Grow to hold at least `capacity` entries. The table never shrinks.
    pub fn grow_to(&mut self, capacity: usize) {
        if capacity > self.capacity {
            self.entries.reserve(capacity - self.entries.len());
            self.capacity = capacity;
        }
    }
}

/// Reads the resident page table of a process
pub trait WorkingSetQuery: Send {
    /// Size in bytes of one page
    fn page_size(&self) -> u64;

    /// Replace the contents of `table` with the resident pages of `pid`.
    ///
    /// Fails with [`QueryError::BufferTooSmall`] when the process has more
    /// resident pages than `table.capacity()`.
    fn query(&mut self, pid: u32, table: &mut PageTable) -> QueryResult<()>;
}

/// Finish a query that counted `required` entries into `table`
pub fn check_capacity(required: usize, table: &PageTable) -> QueryResult<()> {
    if required > table.capacity() {
        Err(QueryError::BufferTooSmall { required })
    } else {
        Ok(())
    }
}

/// One line of `/proc/<pid>/maps`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapsRange {
    pub start: u64,
    pub end: u64,
    pub pathname: Option<String>,
}

impl MapsRange {
    /// Parse `start-end perms offset dev inode [pathname]`
    pub fn parse(line: &str) -> Option<Self> {
        let mut fields = line.split_whitespace();
        let (start, end) = fields.next()?.split_once('-')?;
        let start = u64::from_str_radix(start, 16).ok()?;
        let end = u64::from_str_radix(end, 16).ok()?;
        if end < start {
            return None;
        }

        let pathname = fields.nth(4).map(str::to_string);
        Some(Self { start, end, pathname })
    }

    /// The vsyscall page lives outside the process's own page tables
    pub fn is_vsyscall(&self) -> bool {
        self.pathname.as_deref() == Some("[vsyscall]")
    }
}

#[cfg(target_os = "linux")]
pub use self::linux::PagemapQuery;

#[cfg(target_os = "linux")]
mod linux {
    use std::fs::{self, File};
    use std::io;
    use std::ops::Range;
    use std::os::unix::fs::FileExt;

    use tracing::debug;

    use super::{check_capacity, MapsRange, PageEntry, PageTable, WorkingSetQuery, UNKNOWN_SHARE_COUNT};
    use crate::error::{QueryError, QueryResult};

    const PAGEMAP_ENTRY_SIZE: u64 = 8;
    const PAGEMAP_CHUNK_ENTRIES: usize = 4096;

    /// Widest stretch of `/proc/kpagecount` fetched by one read
    const KPAGECOUNT_SPAN: u64 = 512;

    const PM_PRESENT: u64 = 1 << 63;
    const PM_EXCLUSIVE: u64 = 1 << 56;
    const PM_PFN_MASK: u64 = (1 << 55) - 1;

    /// `/proc`-backed page table query
    pub struct PagemapQuery {
        page_size: u64,
        kpagecount: Option<File>,
        chunk: Vec<u8>,
        // Per chunk: present entries, their sorted PFNs and the map count of each PFN
        present: Vec<u64>,
        pfns: Vec<u64>,
        counts: Vec<Option<u64>>,
        window: Vec<u8>,
    }

    fn read_word(bytes: &[u8]) -> u64 {
        let mut word = [0u8; 8];
        word.copy_from_slice(bytes);
        u64::from_ne_bytes(word)
    }

    /// Split sorted, deduplicated PFNs into index ranges whose PFNs lie
    /// within `span` of the first one, so each range is one read
    pub(super) fn batch_runs(pfns: &[u64], span: u64) -> Vec<Range<usize>> {
        let mut runs = Vec::new();
        let mut start = 0;
        for (index, &pfn) in pfns.iter().enumerate() {
            if pfn - pfns[start] >= span {
                runs.push(start..index);
                start = index;
            }
        }
        if start < pfns.len() {
            runs.push(start..pfns.len());
        }
        runs
    }

    /// Map count when the kernel reported one, else the exclusive bit
    pub(super) fn classify(raw: u64, map_count: Option<u64>) -> PageEntry {
        if let Some(entry) = map_count.and_then(PageEntry::from_map_count) {
            return entry;
        }

        if raw & PM_EXCLUSIVE != 0 {
            PageEntry::private()
        } else {
            PageEntry::shared(UNKNOWN_SHARE_COUNT)
        }
    }

    impl PagemapQuery {
        pub fn new(page_size: u64) -> Self {
            let kpagecount = match File::open("/proc/kpagecount") {
                Ok(file) => Some(file),
                Err(e) => {
                    debug!(error = %e, "kpagecount unavailable, using exclusive bit for sharing");
                    None
                }
            };

            Self {
                page_size,
                kpagecount,
                chunk: vec![0; PAGEMAP_CHUNK_ENTRIES * PAGEMAP_ENTRY_SIZE as usize],
                present: Vec::with_capacity(PAGEMAP_CHUNK_ENTRIES),
                pfns: Vec::with_capacity(PAGEMAP_CHUNK_ENTRIES),
                counts: Vec::with_capacity(PAGEMAP_CHUNK_ENTRIES),
                window: Vec::new(),
            }
        }

        /// Look up the map count of every PFN in `self.pfns`, one read per
        /// run of nearby frames
        fn resolve_map_counts(&mut self) {
            let Self {
                kpagecount,
                pfns,
                counts,
                window,
                ..
            } = self;

            counts.clear();
            let Some(kpagecount) = kpagecount else {
                counts.resize(pfns.len(), None);
                return;
            };

            for run in batch_runs(pfns, KPAGECOUNT_SPAN) {
                let first = pfns[run.start];
                let last = pfns[run.end - 1];
                let bytes = ((last - first + 1) * 8) as usize;
                window.resize(bytes, 0);

                let read = kpagecount.read_exact_at(&mut window[..bytes], first * 8).is_ok();
                for &pfn in &pfns[run] {
                    let count = read.then(|| {
                        let at = ((pfn - first) * 8) as usize;
                        read_word(&window[at..at + 8])
                    });
                    counts.push(count);
                }
            }
        }

        fn map_count(&self, raw: u64) -> Option<u64> {
            let pfn = raw & PM_PFN_MASK;
            if pfn == 0 {
                return None;
            }
            let index = self.pfns.binary_search(&pfn).ok()?;
            self.counts.get(index).copied().flatten()
        }

        /// Walk one mapping; returns the number of resident pages seen
        fn walk_range(
            &mut self,
            pagemap: &File,
            range: &MapsRange,
            table: &mut PageTable,
        ) -> io::Result<usize> {
            let mut resident = 0;
            let mut page = range.start / self.page_size;
            let last = range.end / self.page_size;

            while page < last {
                let count = ((last - page) as usize).min(PAGEMAP_CHUNK_ENTRIES);
                let bytes = count * PAGEMAP_ENTRY_SIZE as usize;

                let read = pagemap.read_exact_at(&mut self.chunk[..bytes], page * PAGEMAP_ENTRY_SIZE);
                if let Err(e) = read {
                    if e.kind() == io::ErrorKind::UnexpectedEof {
                        break;
                    }
                    return Err(e);
                }
                page += count as u64;

                self.present.clear();
                self.present.extend(
                    self.chunk[..bytes]
                        .chunks_exact(PAGEMAP_ENTRY_SIZE as usize)
                        .map(read_word)
                        .filter(|raw| raw & PM_PRESENT != 0),
                );
                resident += self.present.len();

                // Past capacity we only count, so the caller learns the size it needs
                if table.len() >= table.capacity() {
                    continue;
                }

                self.pfns.clear();
                self.pfns.extend(
                    self.present
                        .iter()
                        .map(|raw| raw & PM_PFN_MASK)
                        .filter(|&pfn| pfn != 0),
                );
                self.pfns.sort_unstable();
                self.pfns.dedup();
                self.resolve_map_counts();

                for &raw in &self.present {
                    table.push(classify(raw, self.map_count(raw)));
                }
            }

            Ok(resident)
        }
    }

    impl WorkingSetQuery for PagemapQuery {
        fn page_size(&self) -> u64 {
            self.page_size
        }

        fn query(&mut self, pid: u32, table: &mut PageTable) -> QueryResult<()> {
            table.clear();

            let maps = fs::read_to_string(format!("/proc/{pid}/maps"))
                .map_err(|e| QueryError::from_io(pid, e))?;
            let pagemap = File::open(format!("/proc/{pid}/pagemap"))
                .map_err(|e| QueryError::from_io(pid, e))?;

            let mut required = 0;
            for range in maps.lines().filter_map(MapsRange::parse) {
                if range.is_vsyscall() {
                    continue;
                }
                required += self
                    .walk_range(&pagemap, &range, table)
                    .map_err(|e| QueryError::from_io(pid, e))?;
            }

            check_capacity(required, table)
        }
    }

}
