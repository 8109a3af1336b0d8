//! Default partition count
//!
//! The partitioned engine fans out to this many partitions when a caller
//! does not ask for a specific count.

use crate::bootstrap::ClusterState;

/// Lower bound on the default partition count
pub const MIN_PARTITIONS: usize = 4;

/// `max(4, floor(reported_cpus))`
///
/// Non-finite or negative CPU counts derive [`MIN_PARTITIONS`].
#[must_use]
pub fn derive(state: &ClusterState) -> usize {
    from_cpus(state.reported_cpus)
}

/// Same as [`derive`] for a bare CPU count
#[must_use]
pub fn from_cpus(cpus: f64) -> usize {
    if !cpus.is_finite() || cpus < 0.0 {
        return MIN_PARTITIONS;
    }
    // floor of a finite, non-negative f64; saturates above usize::MAX
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let whole = cpus.floor() as usize;
    whole.max(MIN_PARTITIONS)
}
