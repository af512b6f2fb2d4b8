//! Documented constants for the vector-memory engine
//!
//! This module contains all fixed tunable parameters with justification for
//! their values. Centralizing constants prevents magic numbers and makes
//! tuning easier.

// =============================================================================
// ANN GRAPH INDEX CONSTANTS
// =============================================================================

/// Default maximum connections per graph node (M)
///
/// Justification:
/// - M=16 is the sweet spot reported by the HNSW paper (Malkov & Yashunin)
///   for dimensionalities in the 100-1000 range used by sentence embedders
/// - Higher M improves recall but grows memory per node linearly and slows
///   insertion; 16 keeps recall@10 above 0.95 at default ef settings
pub const DEFAULT_M: usize = 16;

/// Default beam width during index construction (efConstruction)
///
/// Justification:
/// - 200 candidates per layer gives near-exhaustive neighbor quality for
///   collections up to low millions of records
/// - Construction cost is paid once per insert; query latency is unaffected
pub const DEFAULT_EF_CONSTRUCTION: usize = 200;

/// Default query-time beam width (ef)
///
/// Must be >= k at query time; searches clamp ef up to k when callers pass
/// a smaller value.
pub const DEFAULT_EF_SEARCH: usize = 64;

/// Hard cap on graph layers
///
/// With the exponential layer assignment (scale 1/ln(M)) the probability of
/// reaching layer 16 is below 1e-19 for M=16; the cap only guards against
/// degenerate RNG output.
pub const MAX_LAYER: usize = 16;

/// Tombstone ratio that triggers index compaction
///
/// Deleted nodes stay in the graph (eager unlinking risks disconnecting it)
/// and are filtered from results. Once 20% of nodes are tombstones the graph
/// wastes enough traversal work that a rebuild from live records pays off.
pub const TOMBSTONE_COMPACT_RATIO: f32 = 0.20;

/// Over-fetch multiplier when tombstones or filters are present
///
/// Search requests extra candidates so that result-level filtering of
/// deleted/unmatched records still yields k hits.
pub const FILTER_OVERFETCH_FACTOR: usize = 4;

// =============================================================================
// PORTABLE BACKEND CONSTANTS
// =============================================================================

/// Collection size below which the portable backend scans exactly
///
/// Brute force over a few thousand vectors is faster than graph traversal
/// and returns exact results; above this the in-process graph index takes
/// over.
pub const BRUTE_FORCE_LIMIT: usize = 10_000;

// =============================================================================
// QUERY CACHE CONSTANTS
// =============================================================================

/// Default maximum cached query results per collection
pub const DEFAULT_CACHE_ENTRIES: usize = 1_024;

// =============================================================================
// OUTCOME SMOOTHING CONSTANTS
// =============================================================================

/// Default smoothing factor for pattern success-rate updates
///
/// successRate += alpha * (outcome - successRate). 0.1 requires roughly ten
/// consistent outcomes to move the estimate most of the way to a new level,
/// damping single lucky or unlucky runs.
pub const DEFAULT_SUCCESS_ALPHA: f32 = 0.1;

/// Default smoothing factor for average-reward updates
///
/// Slightly slower than the success-rate factor: rewards are noisier than
/// binary outcomes.
pub const DEFAULT_REWARD_ALPHA: f32 = 0.05;

// =============================================================================
// CHANGE LOG CONSTANTS
// =============================================================================

/// Events retained in the in-memory change-log tail buffer
///
/// Enough for a replication consumer to catch up after a short stall without
/// unbounded growth; a consumer further behind must re-sync via export.
pub const CHANGELOG_TAIL_CAPACITY: usize = 4_096;

// =============================================================================
// NATIVE CALL DISPATCH CONSTANTS
// =============================================================================

/// Default worker threads for native-backend dispatch
///
/// Two workers let one slow native call proceed without starving a second
/// collection; more threads rarely help because RocksDB and the graph
/// library parallelize internally.
pub const DEFAULT_DISPATCH_WORKERS: usize = 2;

/// Default timeout for a dispatched native call in milliseconds
pub const DEFAULT_NATIVE_CALL_TIMEOUT_MS: u64 = 5_000;
