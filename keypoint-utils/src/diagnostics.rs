//! Host identification strings attached to run reports.

use serde::{Deserialize, Serialize};

/// Static description of the machine a pipeline ran on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub family: String,
    pub arch: String,
    /// Logical CPUs visible to the process (0 when the platform cannot tell).
    pub logical_cpus: usize,
    pub crate_version: String,
}

impl SystemInfo {
    /// Gather host details for the current process.
    pub fn collect() -> Self {
        let logical_cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(0);
        Self {
            os: std::env::consts::OS.to_string(),
            family: std::env::consts::FAMILY.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            logical_cpus,
            crate_version: crate::version().to_string(),
        }
    }
}
