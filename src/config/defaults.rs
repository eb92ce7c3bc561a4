//! Default constants for sampler configuration.
//!
//! All magic numbers are centralized here with documentation.

// =============================================================================
// Cluster Defaults
// =============================================================================

/// Default process group name shared by all workers of a sampling cluster
pub const DEFAULT_GROUP_NAME: &str = "dist-sampler";

/// Default number of workers (and partitions)
pub const DEFAULT_WORLD_SIZE: u32 = 1;

// =============================================================================
// RPC Defaults
// =============================================================================

/// Per remote call timeout in milliseconds.
/// A single call exceeding it fails the whole session.
pub const DEFAULT_RPC_TIMEOUT_MS: u64 = 30_000;

/// Capacity of a worker's inbound request queue
pub const DEFAULT_REQUEST_QUEUE_CAPACITY: usize = 128;

// =============================================================================
// Sampling Defaults
// =============================================================================

/// Default fan-out: two hops, full neighborhoods
pub fn default_num_neighbors() -> Vec<i64> {
    vec![-1, -1]
}

/// Name of the time attribute used by the example datasets
pub const DEFAULT_TIME_ATTR: &str = "time";
