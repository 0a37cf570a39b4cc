//! Render diagnostic engine.
//!
//! Watches the update cycles of a component-style UI runtime and tells, for
//! each cycle, whether it was necessary and what caused it. Alongside the
//! per-cycle verdict it flags update storms (too many updates of one entity
//! in a sliding window) and recreations (an entity torn down and rebuilt
//! with near-identical inputs).
//!
//! Zero I/O: the host integration drives an [`Engine`] through its
//! lifecycle callbacks and reads back [`Record`]s and summaries.

pub mod aggregator;
pub mod classifier;
pub mod config;
pub mod constants;
pub mod differ;
pub mod engine;
pub mod entity;
pub mod error;
pub mod frequency;
pub mod host;
pub mod recreation;
pub mod sampler;
pub mod serializer;
pub mod snapshot;
pub mod trace;

pub use aggregator::{Aggregator, EntityStats, Record, Summary};
pub use classifier::{
    AttributeGroup, Cause, Classification, Confidence, Suggestion, classify, try_classify,
};
pub use config::DiagnosticsConfig;
pub use differ::{DiffResult, KeyChange, compute_diff, is_deep_equal, shallow_equal};
pub use engine::{CompactionStats, CycleInput, Engine};
pub use entity::{EntityId, EntityInfo};
pub use error::{ClassifyError, ConfigError, TraceError};
pub use frequency::{FrequencyMonitor, StormReport, StormSeverity};
pub use host::{FieldError, HostField, HostNode, HostValue};
pub use recreation::{RecreationDetector, RecreationMatch};
pub use sampler::{AuxEvent, CycleSignals, EventSampler, SignalKind};
pub use serializer::serialize;
pub use snapshot::{Attributes, Snapshot, SnapshotStore};
pub use trace::{Replayer, TraceDecoder, TraceEvent, parse_line, parse_trace};
