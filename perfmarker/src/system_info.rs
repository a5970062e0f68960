//! Host description recorded at the start of a capture

use serde::{Deserialize, Serialize};
use sysinfo::System;

/// Machine facts that help interpret the measurements in a trace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemDescription {
    pub host_name: Option<String>,
    pub kernel_version: Option<String>,
    pub cpu_brand: String,
    pub logical_cpus: usize,
    pub physical_cpus: usize,
    pub total_memory_bytes: u64,
}

impl SystemDescription {
    pub fn collect() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        system.refresh_cpu();

        let cpu_brand = system
            .cpus()
            .first()
            .map(|cpu| cpu.brand().trim().to_string())
            .unwrap_or_default();

        Self {
            host_name: System::host_name(),
            kernel_version: System::kernel_version(),
            cpu_brand,
            logical_cpus: num_cpus::get(),
            physical_cpus: num_cpus::get_physical(),
            total_memory_bytes: system.total_memory(),
        }
    }

    /// One-line summary for a trace message marker
    pub fn summary(&self) -> String {
        format!(
            "{} ({} logical / {} physical cpus, {} MiB, kernel {})",
            if self.cpu_brand.is_empty() { "unknown cpu" } else { &self.cpu_brand },
            self.logical_cpus,
            self.physical_cpus,
            self.total_memory_bytes / (1024 * 1024),
            self.kernel_version.as_deref().unwrap_or("unknown"),
        )
    }
}
