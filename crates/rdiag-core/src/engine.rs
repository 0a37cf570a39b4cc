//! Lifecycle surface driven by the host integration.
//!
//! The engine owns every table (snapshot histories, sampler logs, frequency
//! windows, recreation candidates, records). It runs synchronously on the
//! host's update callbacks: each call finishes before returning and all
//! eviction happens inline. The host calls, per entity:
//!
//! - `on_mount` once when the entity first renders,
//! - `on_before_update` / `on_updated` around each later update,
//! - `on_unmount` on teardown (or `dispose_entity` if no recreation check is
//!   wanted).

use std::collections::HashMap;
use std::rc::Rc;

use rand::SeedableRng;
use rand::rngs::SmallRng;
use uuid::Uuid;

use crate::aggregator::{Aggregator, EntityStats, Record, Summary};
use crate::classifier::{Cause, Classification, Confidence, Suggestion, classify};
use crate::config::DiagnosticsConfig;
use crate::entity::{EntityId, EntityInfo};
use crate::error::ConfigError;
use crate::frequency::{FrequencyMonitor, StormReport};
use crate::host::{HostField, HostValue};
use crate::recreation::{RecreationDetector, RecreationMatch};
use crate::sampler::{AuxEvent, EventSampler};
use crate::snapshot::{Snapshot, SnapshotStore};

/// Raw attributes and timing of one update cycle.
#[derive(Clone, Debug)]
pub struct CycleInput {
    pub timestamp: f64,
    pub duration_ms: Option<f64>,
    pub attributes_a: Vec<(String, HostField)>,
    pub attributes_b: Vec<(String, HostField)>,
}

impl CycleInput {
    pub fn at(timestamp: f64) -> Self {
        Self {
            timestamp,
            duration_ms: None,
            attributes_a: Vec::new(),
            attributes_b: Vec::new(),
        }
    }

    pub fn duration(mut self, ms: f64) -> Self {
        self.duration_ms = Some(ms);
        self
    }

    /// Add a caller-supplied input (group A).
    pub fn input(mut self, key: &str, value: HostValue) -> Self {
        self.attributes_a.push((key.to_string(), Ok(value)));
        self
    }

    /// Add an internally owned state value (group B).
    pub fn state(mut self, key: &str, value: HostValue) -> Self {
        self.attributes_b.push((key.to_string(), Ok(value)));
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Lifecycle {
    Idle,
    Running,
    Disposed,
}

struct CompactionSchedule {
    interval_ms: f64,
    next_due: f64,
}

/// Open update bracket of one entity.
#[derive(Clone, Copy, Debug)]
struct Bracket {
    depth: u32,
    /// Engine clock when the outermost level opened.
    opened_at: f64,
}

impl Bracket {
    fn abandoned(&self, now: f64, window_ms: f64) -> bool {
        now - self.opened_at > window_ms
    }
}

/// What one compaction pass removed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompactionStats {
    pub candidates: usize,
    pub frequency_windows: usize,
    /// Idle entities whose history and per-entity tables were dropped.
    pub histories: usize,
    pub brackets: usize,
}

pub struct Engine {
    config: DiagnosticsConfig,
    lifecycle: Lifecycle,
    snapshots: SnapshotStore,
    sampler: EventSampler,
    frequency: FrequencyMonitor,
    recreation: RecreationDetector,
    aggregator: Aggregator,
    entities: HashMap<EntityId, EntityInfo>,
    brackets: HashMap<EntityId, Bracket>,
    /// Latest timestamp seen on any callback.
    clock: f64,
    compaction: Option<CompactionSchedule>,
}

impl Engine {
    /// Build an engine. It ignores lifecycle calls until [`Engine::init`].
    pub fn new(config: DiagnosticsConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let rng = match config.seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::from_os_rng(),
        };
        Ok(Self {
            snapshots: SnapshotStore::new(config.history_size, config.max_depth),
            sampler: EventSampler::new(config.sampling_rate, config.max_events_per_entity, rng),
            frequency: FrequencyMonitor::new(config.frequency_window_ms, config.storm_threshold),
            recreation: RecreationDetector::new(config.recreation()),
            aggregator: Aggregator::new(config.max_records, config.duration_window),
            entities: HashMap::new(),
            brackets: HashMap::new(),
            clock: 0.0,
            compaction: None,
            lifecycle: Lifecycle::Idle,
            config,
        })
    }

    pub fn config(&self) -> &DiagnosticsConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle == Lifecycle::Running
    }

    /// Start (or restart) with empty tables and arm compaction if configured.
    pub fn init(&mut self, now: f64) {
        self.reset();
        self.clock = now;
        self.compaction = self
            .config
            .compaction_interval_ms
            .map(|interval_ms| CompactionSchedule {
                interval_ms,
                next_due: now + interval_ms,
            });
        self.lifecycle = Lifecycle::Running;
        tracing::debug!(compaction = self.compaction.is_some(), "engine initialized");
    }

    /// Stop: cancel compaction and drop all state.
    pub fn dispose(&mut self) {
        self.cancel_compaction();
        self.reset();
        self.lifecycle = Lifecycle::Disposed;
        tracing::debug!("engine disposed");
    }

    /// Disarm the periodic compaction. Returns whether it was armed.
    pub fn cancel_compaction(&mut self) -> bool {
        self.compaction.take().is_some()
    }

    fn reset(&mut self) {
        self.snapshots.clear();
        self.sampler.clear();
        self.frequency.clear();
        self.recreation.clear();
        self.aggregator.clear(None);
        self.entities.clear();
        self.brackets.clear();
    }

    // --- Lifecycle callbacks ---

    /// First render of `entity`.
    pub fn on_mount(&mut self, entity: &EntityInfo, input: CycleInput) -> Option<&Record> {
        if !self.is_running() {
            return None;
        }
        self.advance(input.timestamp);
        let id = entity.id;
        self.snapshots.dispose(id);
        self.brackets.remove(&id);
        self.sampler.dispose(id);
        self.entities.insert(id, entity.clone());

        let snapshot = self.capture(id, &input);
        let recreation = self.recreation.on_mount(
            &entity.display_name,
            entity.parent_id,
            &snapshot.attributes_a,
            input.timestamp,
        );

        let mut classification = Classification {
            necessary: true,
            cause: Cause::InitialRender,
            ..Classification::unknown()
        };
        if let Some(m) = &recreation {
            classification.suggestions.push(Suggestion::new(
                Confidence::High,
                format!(
                    "{} was destroyed and recreated within {:.2} ms; keep its identity key stable so it is updated in place",
                    entity.display_name, m.gap_ms
                ),
                None,
            ));
            classification.diff_a = m.mismatched.clone();
        }
        self.emit(entity, &snapshot, classification, recreation);
        self.settle(input.timestamp)
    }

    /// Open the update bracket for `id`. Nested calls for the same entity
    /// only deepen the bracket and return false. A bracket left open for
    /// longer than the frequency window is abandoned and reopened.
    pub fn on_before_update(&mut self, id: EntityId) -> bool {
        if !self.is_running() {
            return false;
        }
        let window = self.config.frequency_window_ms;
        if let Some(bracket) = self.brackets.get_mut(&id) {
            if !bracket.abandoned(self.clock, window) {
                bracket.depth += 1;
                return false;
            }
            tracing::debug!(
                entity = %id,
                depth = bracket.depth,
                "reopening abandoned update bracket"
            );
        }
        self.brackets.insert(
            id,
            Bracket {
                depth: 1,
                opened_at: self.clock,
            },
        );
        self.sampler.dispose(id);
        self.sampler.begin(id);
        true
    }

    /// Auxiliary read/write signal for the entity's open cycle.
    pub fn record_event(&mut self, id: EntityId, event: AuxEvent) -> bool {
        self.is_running() && self.sampler.record(id, event)
    }

    /// Close the update bracket and classify the cycle. Returns `None` for
    /// nested closes, so a cascade yields one record per outermost cycle.
    pub fn on_updated(&mut self, entity: &EntityInfo, input: CycleInput) -> Option<&Record> {
        if !self.is_running() {
            return None;
        }
        self.advance(input.timestamp);
        let id = entity.id;
        let window = self.config.frequency_window_ms;
        if let Some(bracket) = self.brackets.get_mut(&id) {
            if bracket.depth > 1 && !bracket.abandoned(input.timestamp, window) {
                bracket.depth -= 1;
                return None;
            }
            self.brackets.remove(&id);
        }
        let signals = self.sampler.end(id);

        let prev = match self.snapshots.latest(id) {
            Some(prev) => Rc::clone(prev),
            None => return self.on_mount(entity, input),
        };
        self.entities.insert(id, entity.clone());

        let curr = self.capture(id, &input);
        let classification = classify(&prev, &curr, &signals);
        self.emit(entity, &curr, classification, None);
        self.settle(input.timestamp)
    }

    /// Teardown: the last inputs become a recreation candidate, then the
    /// entity's state is dropped. Aggregated statistics are kept.
    pub fn on_unmount(&mut self, id: EntityId, timestamp: f64) {
        if !self.is_running() {
            return;
        }
        self.advance(timestamp);
        if let (Some(info), Some(snapshot)) = (self.entities.get(&id), self.snapshots.latest(id)) {
            self.recreation.on_unmount(
                &info.display_name,
                info.parent_id,
                &snapshot.attributes_a,
                timestamp,
            );
        }
        self.dispose_entity(id);
        self.tick(timestamp);
    }

    /// Drop all per-entity state except aggregated statistics.
    pub fn dispose_entity(&mut self, id: EntityId) {
        self.snapshots.dispose(id);
        self.sampler.dispose(id);
        self.frequency.dispose(id);
        self.entities.remove(&id);
        self.brackets.remove(&id);
    }

    fn capture(&mut self, id: EntityId, input: &CycleInput) -> Rc<Snapshot> {
        self.snapshots.capture(
            id,
            input.timestamp,
            input.duration_ms,
            &input.attributes_a,
            &input.attributes_b,
        )
    }

    fn emit(
        &mut self,
        entity: &EntityInfo,
        snapshot: &Snapshot,
        classification: Classification,
        recreation: Option<RecreationMatch>,
    ) {
        self.frequency.record(entity.id, snapshot.timestamp);
        let storm_severity = self.frequency.severity(entity.id);

        let record = Record {
            id: Uuid::new_v4(),
            timestamp: snapshot.timestamp,
            entity_id: entity.id,
            display_name: entity.display_name.clone(),
            necessary: classification.necessary,
            cause: classification.cause,
            attributed_group: classification.attributed_group,
            attributed_key: classification.attributed_key,
            duration_ms: snapshot.duration_ms,
            attr_diff_a: classification.diff_a,
            attr_diff_b: classification.diff_b,
            is_storm: storm_severity.is_some(),
            storm_severity,
            is_recreation: recreation.is_some(),
            recreation_similarity: recreation.map(|m| m.similarity),
            suggestions: classification.suggestions,
        };
        self.aggregator.push(record);
    }

    /// Compact if due, then hand back the record just emitted. Runs after
    /// the cycle so compaction never sees the calling entity as idle.
    fn settle(&mut self, now: f64) -> Option<&Record> {
        self.tick(now);
        self.aggregator.latest()
    }

    fn advance(&mut self, now: f64) {
        self.clock = self.clock.max(now);
    }

    // --- Compaction ---

    fn tick(&mut self, now: f64) {
        if let Some(schedule) = self.compaction.as_mut()
            && now >= schedule.next_due
        {
            schedule.next_due = now + schedule.interval_ms;
            self.compact(now);
        }
    }

    /// Age-based cleanup of every table. Runs lazily from the schedule, or
    /// on demand.
    pub fn compact(&mut self, now: f64) -> CompactionStats {
        let open = self.brackets.len();
        let window = self.config.frequency_window_ms;
        let brackets = &self.brackets;
        let idle = self.snapshots.prune_idle(now, self.config.stale_entity_ms, |id| {
            brackets.get(&id).is_some_and(|b| !b.abandoned(now, window))
        });
        for id in &idle {
            self.entities.remove(id);
            self.brackets.remove(id);
            self.sampler.dispose(*id);
        }

        let mut abandoned = Vec::new();
        self.brackets.retain(|id, b| {
            let keep = !b.abandoned(now, window);
            if !keep {
                abandoned.push(*id);
            }
            keep
        });
        for id in abandoned {
            self.sampler.dispose(id);
        }

        let stats = CompactionStats {
            candidates: self.recreation.prune(now),
            frequency_windows: self.frequency.prune_all(now),
            histories: idle.len(),
            brackets: open - self.brackets.len(),
        };
        tracing::debug!(?stats, "compaction pass");
        stats
    }

    /// Entities with live per-entity state.
    pub fn tracked_entities(&self) -> usize {
        self.entities.len()
    }

    /// Entities with an open update bracket.
    pub fn open_brackets(&self) -> usize {
        self.brackets.len()
    }

    // --- Queries ---

    pub fn summary(&self) -> Summary {
        self.aggregator.summary(self.frequency.active_storms().len())
    }

    pub fn top_unnecessary(&self, limit: usize) -> Vec<&EntityStats> {
        self.aggregator.top_unnecessary(limit)
    }

    pub fn top_slowest(&self, limit: usize) -> Vec<&EntityStats> {
        self.aggregator.top_slowest(limit)
    }

    pub fn active_storms(&self) -> Vec<StormReport> {
        self.frequency.active_storms()
    }

    /// Retained records, oldest first.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.aggregator.records()
    }

    pub fn entity_stats(&self, id: EntityId) -> Option<&EntityStats> {
        self.aggregator.entity_stats(id)
    }

    /// Retained snapshot count for `id`.
    pub fn history_len(&self, id: EntityId) -> usize {
        self.snapshots.len(id)
    }

    pub fn pending_recreations(&self) -> usize {
        self.recreation.len()
    }

    /// Forget reported data for one entity, or for all of them.
    pub fn clear(&mut self, id: Option<EntityId>) {
        self.aggregator.clear(id);
        match id {
            Some(id) => self.frequency.dispose(id),
            None => self.frequency.clear(),
        }
    }
}
