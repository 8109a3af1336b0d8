//! Object-store memory budget
//!
//! Toyota Way Principles:
//! - Poka-Yoke: a zero-sized store is never requested; `None` defers to the backend
//! - Genchi Genbutsu: sizes come from the machine's real memory, rounded to whole GB
//!
//! Out-of-core mode deliberately oversubscribes: the store is sized at 8x
//! physical memory because spilled objects live on disk, not in RAM.

use crate::config::ClusterConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Decimal gigabyte used for rounding
pub const GB: u64 = 1_000_000_000;

/// Object-store multiplier in out-of-core mode
pub const OUT_OF_CORE_FACTOR: u64 = 8;

/// Share of system memory given to the store in-core, as tenths
const IN_CORE_TENTHS: u128 = 6;

/// Shared-memory sizing handed to the backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryBudget {
    /// Object-store size; `None` lets the backend pick its default
    pub object_store_bytes: Option<u64>,
    /// Spill location for out-of-core mode
    pub spill_directory: Option<PathBuf>,
}

impl MemoryBudget {
    /// Budget that defers every choice to the backend
    #[must_use]
    pub const fn backend_default() -> Self {
        Self {
            object_store_bytes: None,
            spill_directory: None,
        }
    }

    /// Compute the budget from configuration and total system memory
    ///
    /// Pure and deterministic: the same inputs always give the same budget.
    #[must_use]
    pub fn compute(config: &ClusterConfig, system_memory_bytes: u64) -> Self {
        let spill_directory = config.out_of_core.then(std::env::temp_dir);

        let candidate = match config.memory_override_bytes {
            Some(bytes) => bytes,
            None if config.out_of_core => {
                round_down_to_gb(system_memory_bytes).saturating_mul(OUT_OF_CORE_FACTOR)
            }
            None => in_core_share(system_memory_bytes),
        };

        Self {
            object_store_bytes: (candidate != 0).then_some(candidate),
            spill_directory,
        }
    }

    /// Compute the budget when system memory may be unknown
    ///
    /// Without a probe result only an explicit override can size the store.
    #[must_use]
    pub fn compute_with_probe(config: &ClusterConfig, system_memory_bytes: Option<u64>) -> Self {
        match system_memory_bytes {
            Some(bytes) => Self::compute(config, bytes),
            None => {
                if config.memory_override_bytes.is_none() {
                    tracing::warn!("system memory unknown; object store size left to the backend");
                }
                Self {
                    object_store_bytes: config.memory_override_bytes.filter(|&b| b != 0),
                    spill_directory: config.out_of_core.then(std::env::temp_dir),
                }
            }
        }
    }
}

const fn round_down_to_gb(bytes: u64) -> u64 {
    bytes / GB * GB
}

/// 60% of system memory, floored to whole GB
fn in_core_share(system_memory_bytes: u64) -> u64 {
    let share = u128::from(system_memory_bytes) * IN_CORE_TENTHS / 10;
    // share <= system_memory_bytes, so it fits in u64
    let share = u64::try_from(share).unwrap_or(u64::MAX);
    round_down_to_gb(share)
}

/// Total physical memory of this machine, if it can be read
#[cfg(target_os = "linux")]
#[must_use]
pub fn system_memory() -> Option<u64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    meminfo
        .lines()
        .find(|line| line.starts_with("MemTotal:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb * 1024)
}

/// Total physical memory of this machine, if it can be read
#[cfg(target_os = "macos")]
#[must_use]
pub fn system_memory() -> Option<u64> {
    let output = std::process::Command::new("sysctl")
        .arg("-n")
        .arg("hw.memsize")
        .output()
        .ok()?;
    String::from_utf8(output.stdout).ok()?.trim().parse().ok()
}

/// Total physical memory of this machine, if it can be read
#[cfg(not(any(target_os = "linux", target_os = "macos")))]
#[must_use]
pub fn system_memory() -> Option<u64> {
    None
}
