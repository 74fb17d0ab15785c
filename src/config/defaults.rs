//! Default constants for entity-xref configuration.
//!
//! All magic numbers are centralized here with documentation.

// =============================================================================
// Resolver Defaults
// =============================================================================

/// Default resolver snapshot path (file backend) or database directory (rocksdb)
pub const DEFAULT_RESOLVER_PATH: &str = "data/resolver.json";

/// Pending edges scoring below this are pruned
pub const DEFAULT_PRUNE_MIN_SCORE: f64 = 0.0;

/// Pending edges not re-suggested within this many days are pruned.
/// 0 keeps pending edges forever.
pub const DEFAULT_RETENTION_DAYS: u64 = 0;

// =============================================================================
// Blocking Index Defaults
// =============================================================================

/// Buckets holding more entities than this are skipped during pair generation.
/// Bounds the quadratic expansion of very common tokens.
pub const DEFAULT_MAX_BUCKET_SIZE: usize = 100;

/// Candidate pairs scoring below this are not emitted
pub const DEFAULT_INDEX_MIN_SCORE: f64 = 0.0;

// =============================================================================
// Xref Defaults
// =============================================================================

/// Suggestion budget per run
pub const DEFAULT_XREF_LIMIT: usize = 5000;

/// Entity fetches in flight ahead of the evaluation stage
pub const DEFAULT_FETCH_CONCURRENCY: usize = 32;

/// Per-pair entity fetch timeout in milliseconds
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 5_000;

/// Progress log cadence in evaluated pairs
pub const DEFAULT_PROGRESS_EVERY: usize = 1000;

// =============================================================================
// Input Defaults
// =============================================================================

/// Default statements file (JSON lines)
pub const DEFAULT_STATEMENTS_PATH: &str = "data/statements.jsonl";

/// Environment variable prefix
pub const ENV_PREFIX: &str = "XREF_";

/// Separator between nested keys in environment variable names
pub const ENV_SPLIT: &str = "__";
