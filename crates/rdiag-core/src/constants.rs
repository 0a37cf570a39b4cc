/// Snapshots retained per entity before FIFO eviction.
pub const DEFAULT_HISTORY_SIZE: usize = 50;

/// Global record ring buffer capacity.
pub const DEFAULT_MAX_RECORDS: usize = 1000;

/// Sliding window for update frequency counting (ms).
pub const DEFAULT_FREQUENCY_WINDOW_MS: f64 = 1000.0;

/// Updates within one window at which an entity is in a storm.
pub const DEFAULT_STORM_THRESHOLD: usize = 5;

/// Maximum unmount→mount gap still considered a recreation (ms).
pub const DEFAULT_RECREATION_WINDOW_MS: f64 = 100.0;

/// Recreation candidates held before the oldest is evicted.
pub const DEFAULT_RECREATION_MAX_TRACKED: usize = 100;

/// Fraction of matching attribute keys needed to call a mount a recreation.
/// Empirical, not derived.
pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.7;

/// Probability that an auxiliary event is logged.
pub const DEFAULT_SAMPLING_RATE: f64 = 1.0;

/// Per-entity cap for each of the read and write logs.
pub const DEFAULT_MAX_EVENTS_PER_ENTITY: usize = 100;

/// Serializer nesting limit.
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// Durations kept for the moving average (K).
pub const DEFAULT_DURATION_WINDOW: usize = 10;

/// Idle time after which compaction drops an entity's snapshot history (ms).
pub const DEFAULT_STALE_ENTITY_MS: f64 = 60_000.0;

/// Candidates older than this multiple of the recreation window are discarded.
pub const CANDIDATE_EXPIRY_FACTOR: f64 = 2.0;

/// Fallback attributed key when a necessary update cannot be pinned to one key.
pub const UNKNOWN_KEY: &str = "unknown";
