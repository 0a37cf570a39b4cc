//! Global record ring buffer and per-entity rolling statistics.

use std::collections::{HashMap, VecDeque};

use serde::Serialize;
use uuid::Uuid;

use crate::classifier::{AttributeGroup, Cause, Suggestion};
use crate::differ::DiffResult;
use crate::entity::EntityId;
use crate::frequency::StormSeverity;

/// Engine output for one update cycle.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: Uuid,
    pub timestamp: f64,
    pub entity_id: EntityId,
    pub display_name: String,
    pub necessary: bool,
    pub cause: Cause,
    pub attributed_group: Option<AttributeGroup>,
    pub attributed_key: Option<String>,
    pub duration_ms: Option<f64>,
    pub attr_diff_a: DiffResult,
    pub attr_diff_b: DiffResult,
    pub is_storm: bool,
    pub storm_severity: Option<StormSeverity>,
    pub is_recreation: bool,
    pub recreation_similarity: Option<f64>,
    pub suggestions: Vec<Suggestion>,
}

/// Rolling statistics for one entity.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityStats {
    pub entity_id: EntityId,
    pub display_name: String,
    pub total_updates: u64,
    pub necessary: u64,
    pub unnecessary: u64,
    pub recreations: u64,
    /// Arithmetic mean over the last K durations.
    pub average_duration_ms: Option<f64>,
    #[serde(skip)]
    durations: VecDeque<f64>,
}

impl EntityStats {
    fn new(entity_id: EntityId, display_name: &str) -> Self {
        Self {
            entity_id,
            display_name: display_name.to_string(),
            total_updates: 0,
            necessary: 0,
            unnecessary: 0,
            recreations: 0,
            average_duration_ms: None,
            durations: VecDeque::new(),
        }
    }

    fn observe(&mut self, record: &Record, window: usize) {
        self.display_name.clone_from(&record.display_name);
        self.total_updates += 1;
        if record.necessary {
            self.necessary += 1;
        } else {
            self.unnecessary += 1;
        }
        if record.is_recreation {
            self.recreations += 1;
        }
        if let Some(d) = record.duration_ms.filter(|d| d.is_finite()) {
            self.durations.push_back(d);
            while self.durations.len() > window {
                self.durations.pop_front();
            }
            let sum: f64 = self.durations.iter().sum();
            self.average_duration_ms = Some(sum / self.durations.len() as f64);
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total_updates: u64,
    pub necessary: u64,
    pub unnecessary: u64,
    pub necessary_pct: f64,
    pub unnecessary_pct: f64,
    pub tracked_entities: usize,
    pub active_storms: usize,
    pub recreations: u64,
    pub retained_records: usize,
}

pub struct Aggregator {
    max_records: usize,
    duration_window: usize,
    records: VecDeque<Record>,
    stats: HashMap<EntityId, EntityStats>,
}

impl Aggregator {
    pub fn new(max_records: usize, duration_window: usize) -> Self {
        Self {
            max_records: max_records.max(1),
            duration_window: duration_window.max(1),
            records: VecDeque::new(),
            stats: HashMap::new(),
        }
    }

    /// Fold a record into the stats and append it, evicting the oldest
    /// record past the cap.
    pub fn push(&mut self, record: Record) {
        self.stats
            .entry(record.entity_id)
            .or_insert_with(|| EntityStats::new(record.entity_id, &record.display_name))
            .observe(&record, self.duration_window);
        self.records.push_back(record);
        while self.records.len() > self.max_records {
            self.records.pop_front();
        }
    }

    /// Retained records, oldest first.
    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.records.iter()
    }

    pub fn latest(&self) -> Option<&Record> {
        self.records.back()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn entity_stats(&self, id: EntityId) -> Option<&EntityStats> {
        self.stats.get(&id)
    }

    pub fn summary(&self, active_storms: usize) -> Summary {
        let (total, necessary, unnecessary, recreations) =
            self.stats.values().fold((0, 0, 0, 0), |acc, s| {
                (
                    acc.0 + s.total_updates,
                    acc.1 + s.necessary,
                    acc.2 + s.unnecessary,
                    acc.3 + s.recreations,
                )
            });
        let pct = |n: u64| {
            if total == 0 {
                0.0
            } else {
                n as f64 * 100.0 / total as f64
            }
        };
        Summary {
            total_updates: total,
            necessary,
            unnecessary,
            necessary_pct: pct(necessary),
            unnecessary_pct: pct(unnecessary),
            tracked_entities: self.stats.len(),
            active_storms,
            recreations,
            retained_records: self.records.len(),
        }
    }

    /// Entities with the most unnecessary updates.
    pub fn top_unnecessary(&self, limit: usize) -> Vec<&EntityStats> {
        let mut all: Vec<&EntityStats> = self
            .stats
            .values()
            .filter(|s| s.unnecessary > 0)
            .collect();
        all.sort_by(|a, b| {
            b.unnecessary
                .cmp(&a.unnecessary)
                .then(a.entity_id.cmp(&b.entity_id))
        });
        all.truncate(limit);
        all
    }

    /// Entities with the highest moving-average duration.
    pub fn top_slowest(&self, limit: usize) -> Vec<&EntityStats> {
        let mut all: Vec<(&EntityStats, f64)> = self
            .stats
            .values()
            .filter_map(|s| s.average_duration_ms.map(|avg| (s, avg)))
            .collect();
        all.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.entity_id.cmp(&b.0.entity_id)));
        all.into_iter().take(limit).map(|(s, _)| s).collect()
    }

    /// Forget one entity, or everything when `id` is `None`.
    pub fn clear(&mut self, id: Option<EntityId>) {
        match id {
            Some(id) => {
                self.stats.remove(&id);
                self.records.retain(|r| r.entity_id != id);
            }
            None => {
                self.stats.clear();
                self.records.clear();
            }
        }
    }
}
