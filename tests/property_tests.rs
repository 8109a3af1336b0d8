//! Property-based tests for parframe
//!
//! - Test mathematical invariants of the pure calculators
//! - Run with ProptestConfig::with_cases(100)

use parframe::memory::GB;
use parframe::normalize::normalize;
use parframe::partitions::{from_cpus, MIN_PARTITIONS};
use parframe::{ClusterConfig, MemoryBudget};
use proptest::prelude::*;
use std::path::{Path, PathBuf};

// ============================================================================
// Property Test Generators (Strategies)
// ============================================================================

fn arb_cluster_config() -> impl Strategy<Value = ClusterConfig> {
    (proptest::option::of(0u64..200 * GB), any::<bool>()).prop_map(|(memory_override_bytes, out_of_core)| {
        ClusterConfig {
            memory_override_bytes,
            out_of_core,
            ..ClusterConfig::default()
        }
    })
}

/// Search paths mixing package dirs inside and outside `/opt/py`,
/// including package dirs nested inside other package dirs
fn arb_search_path() -> impl Strategy<Value = Vec<PathBuf>> {
    let segment = prop_oneof![
        Just(PathBuf::from("/opt/py/lib/site-packages")),
        Just(PathBuf::from("/opt/py/lib")),
        Just(PathBuf::from("/opt/py/site-packages")),
        Just(PathBuf::from("/opt/py/site-packages/site-packages")),
        Just(PathBuf::from("/opt/py/lib/site-packages/site-packages")),
        Just(PathBuf::from("/usr/lib/site-packages")),
        "[a-z]{1,6}".prop_map(|name| PathBuf::from("/srv").join(name)),
        "[a-z]{1,6}".prop_map(|name| PathBuf::from("/opt/py").join(name).join("site-packages")),
    ];
    proptest::collection::vec(segment, 0..8)
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: same inputs always give the same budget
    #[test]
    fn prop_memory_budget_deterministic(config in arb_cluster_config(), memory in any::<u64>()) {
        prop_assert_eq!(MemoryBudget::compute(&config, memory), MemoryBudget::compute(&config, memory));
    }

    /// Property: a zero-sized store is never requested
    #[test]
    fn prop_memory_budget_never_zero(config in arb_cluster_config(), memory in any::<u64>()) {
        prop_assert_ne!(MemoryBudget::compute(&config, memory).object_store_bytes, Some(0));
    }

    /// Property: computed (non-override) budgets are whole gigabytes
    #[test]
    fn prop_computed_budget_whole_gb(out_of_core in any::<bool>(), memory in 0u64..1_000 * GB) {
        let config = ClusterConfig { out_of_core, ..ClusterConfig::default() };
        if let Some(bytes) = MemoryBudget::compute(&config, memory).object_store_bytes {
            prop_assert_eq!(bytes % GB, 0);
        }
    }

    /// Property: in-core budget never exceeds system memory
    #[test]
    fn prop_in_core_budget_fits(memory in any::<u64>()) {
        let budget = MemoryBudget::compute(&ClusterConfig::default(), memory);
        prop_assert!(budget.object_store_bytes.unwrap_or(0) <= memory);
    }

    /// Property: spill directory is set exactly in out-of-core mode
    #[test]
    fn prop_spill_directory_iff_out_of_core(config in arb_cluster_config(), memory in any::<u64>()) {
        let budget = MemoryBudget::compute(&config, memory);
        prop_assert_eq!(budget.spill_directory.is_some(), config.out_of_core);
    }

    /// Property: normalizing twice equals normalizing once
    #[test]
    fn prop_normalize_idempotent(path in arb_search_path()) {
        let prefix = Path::new("/opt/py");
        let once = normalize(&path, prefix);
        prop_assert_eq!(normalize(&once, prefix), once);
    }

    /// Property: normalization inserts at most one segment and drops none
    #[test]
    fn prop_normalize_preserves_entries(path in arb_search_path()) {
        let normalized = normalize(&path, Path::new("/opt/py"));
        prop_assert!(normalized.len() == path.len() || normalized.len() == path.len() + 1);
        let mut remaining = normalized.iter();
        for segment in &path {
            prop_assert!(remaining.any(|s| s == segment), "order of {:?} not preserved", segment);
        }
    }

    /// Property: partition count is monotone and bounded below
    #[test]
    fn prop_partitions_monotone(a in 0.0f64..4096.0, b in 0.0f64..4096.0) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(from_cpus(lo) <= from_cpus(hi));
        prop_assert!(from_cpus(lo) >= MIN_PARTITIONS);
    }
}

// ============================================================================
// QuickCheck: normalization against a reference model
// ============================================================================

/// Reference model: skip package dirs directly followed by their own child
/// package dir, then insert the first match's parent unless it already occurs
/// earlier in the path
fn reference_normalize(path: &[PathBuf], prefix: &Path) -> Vec<PathBuf> {
    let is_pkg = |p: &PathBuf| p.starts_with(prefix) && p.ends_with("site-packages");
    let mut out = path.to_vec();
    for (i, segment) in path.iter().enumerate() {
        if !is_pkg(segment) {
            continue;
        }
        if let Some(next) = path.get(i + 1) {
            if is_pkg(next) && next.parent() == Some(segment.as_path()) {
                continue;
            }
        }
        let parent = segment.parent().unwrap().to_path_buf();
        if !path[..i].contains(&parent) {
            out.insert(i, parent);
        }
        break;
    }
    out
}

const SEGMENTS: [&str; 6] = [
    "/opt/py/lib/site-packages",
    "/opt/py/lib",
    "/opt/py/site-packages",
    "/opt/py/site-packages/site-packages",
    "/home/u/site-packages",
    "/srv/app",
];

fn pick_path(picks: &[u8]) -> Vec<PathBuf> {
    picks
        .iter()
        .take(10)
        .map(|&p| PathBuf::from(SEGMENTS[usize::from(p) % SEGMENTS.len()]))
        .collect()
}

quickcheck::quickcheck! {
    fn qc_normalize_matches_reference(picks: Vec<u8>) -> bool {
        let path = pick_path(&picks);
        let prefix = Path::new("/opt/py");
        normalize(&path, prefix) == reference_normalize(&path, prefix)
    }

    fn qc_normalize_idempotent_with_nested_dirs(picks: Vec<u8>) -> bool {
        let path = pick_path(&picks);
        let prefix = Path::new("/opt/py");
        let once = normalize(&path, prefix);
        normalize(&once, prefix) == once
    }
}
