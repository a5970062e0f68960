//! Process name filter
//!
//! A filter is either `*` (every process) or a `;`-separated list of
//! executable file names. Names are compared case-insensitively against the
//! final path component only.

use std::path::Path;

/// Which processes the working set monitor samples
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessFilter {
    /// Every running process
    All,

    /// Exact, lowercased executable names; an empty list samples nothing
    Names(Vec<String>),
}

impl Default for ProcessFilter {
    fn default() -> Self {
        ProcessFilter::Names(Vec::new())
    }
}

impl ProcessFilter {
    /// Parse `*` or a `;`-separated list. Items are trimmed and empty items
    /// are dropped.
    pub fn parse(spec: &str) -> Self {
        let spec = spec.trim();
        if spec == "*" {
            return ProcessFilter::All;
        }

        let mut names: Vec<String> = spec
            .split(';')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(|item| file_name(item).to_lowercase())
            .collect();
        names.sort();
        names.dedup();

        ProcessFilter::Names(names)
    }

    /// True when a tick under this filter can never match a process
    pub fn is_empty(&self) -> bool {
        matches!(self, ProcessFilter::Names(names) if names.is_empty())
    }

    /// Check an executable name or path against the filter
    pub fn matches(&self, executable: &str) -> bool {
        match self {
            ProcessFilter::All => true,
            ProcessFilter::Names(names) => {
                let name = file_name(executable).to_lowercase();
                names.iter().any(|candidate| *candidate == name)
            }
        }
    }
}

fn file_name(executable: &str) -> &str {
    // Backslash paths are accepted so that names copied from a Windows trace
    // still compare equal
    let tail = executable.rsplit('\\').next().unwrap_or(executable);
    Path::new(tail)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(tail)
}
