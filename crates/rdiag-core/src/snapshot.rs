//! Captured attribute state and the bounded per-entity history.

use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::entity::EntityId;
use crate::host::{HostField, RefToken};
use crate::serializer::{Serializer, error_sentinel, is_private_key};

/// One attribute group (inputs or internal state) as serialized at capture
/// time, plus the identity of each top-level value that had one.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(transparent)]
pub struct Attributes {
    values: Map<String, Value>,
    #[serde(skip)]
    origins: HashMap<String, RefToken>,
    /// Built from live host values, so a key without an origin held a
    /// primitive.
    #[serde(skip)]
    captured: bool,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize a raw field list. Top-level values sit at depth 1.
    pub fn capture(fields: &[(String, HostField)], max_depth: usize) -> Self {
        let mut serializer = Serializer::new(max_depth);
        let mut attrs = Self {
            captured: true,
            ..Self::new()
        };
        for (key, field) in fields {
            if is_private_key(key) {
                continue;
            }
            match field {
                Ok(v) => {
                    let value = serializer.serialize(v, 1);
                    attrs.insert(key, value, v.identity());
                }
                Err(e) => attrs.insert(key, Value::String(error_sentinel(&e.0)), None),
            }
        }
        attrs
    }

    /// Attributes without identity information, e.g. decoded from JSON.
    pub fn from_json(values: Map<String, Value>) -> Self {
        Self {
            values,
            origins: HashMap::new(),
            captured: false,
        }
    }

    pub fn insert(&mut self, key: &str, value: Value, origin: Option<RefToken>) {
        match origin {
            Some(token) => {
                self.origins.insert(key.to_string(), token);
            }
            None => {
                self.origins.remove(key);
            }
        }
        self.values.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn origin(&self, key: &str) -> Option<&RefToken> {
        self.origins.get(key)
    }

    /// Whether identity information is available for every key.
    pub fn is_captured(&self) -> bool {
        self.captured
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Keys in capture order.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    pub fn sorted_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.values.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Attribute state of one entity at one update cycle. Immutable once built.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub entity_id: EntityId,
    pub timestamp: f64,
    pub duration_ms: Option<f64>,
    /// Caller-supplied inputs.
    pub attributes_a: Attributes,
    /// Internally owned state.
    pub attributes_b: Attributes,
}

/// Per-entity FIFO history of snapshots, capped at `history_size`.
pub struct SnapshotStore {
    history_size: usize,
    max_depth: usize,
    histories: HashMap<EntityId, VecDeque<Rc<Snapshot>>>,
}

impl SnapshotStore {
    pub fn new(history_size: usize, max_depth: usize) -> Self {
        Self {
            history_size: history_size.max(1),
            max_depth,
            histories: HashMap::new(),
        }
    }

    pub fn history_size(&self) -> usize {
        self.history_size
    }

    /// Serialize both attribute groups and retain the result.
    pub fn capture(
        &mut self,
        entity_id: EntityId,
        timestamp: f64,
        duration_ms: Option<f64>,
        attributes_a: &[(String, HostField)],
        attributes_b: &[(String, HostField)],
    ) -> Rc<Snapshot> {
        let snapshot = Snapshot {
            entity_id,
            timestamp,
            duration_ms,
            attributes_a: Attributes::capture(attributes_a, self.max_depth),
            attributes_b: Attributes::capture(attributes_b, self.max_depth),
        };
        self.retain(snapshot)
    }

    /// Append an already built snapshot, evicting the oldest past the cap.
    pub fn retain(&mut self, snapshot: Snapshot) -> Rc<Snapshot> {
        let snapshot = Rc::new(snapshot);
        let history = self.histories.entry(snapshot.entity_id).or_default();
        history.push_back(Rc::clone(&snapshot));
        while history.len() > self.history_size {
            history.pop_front();
            tracing::debug!(entity = %snapshot.entity_id, "evicted oldest snapshot");
        }
        snapshot
    }

    pub fn latest(&self, id: EntityId) -> Option<&Rc<Snapshot>> {
        self.histories.get(&id).and_then(|h| h.back())
    }

    /// The two most recent snapshots of `id`, oldest first.
    pub fn last_pair(&self, id: EntityId) -> Option<(&Rc<Snapshot>, &Rc<Snapshot>)> {
        let history = self.histories.get(&id)?;
        let n = history.len();
        if n < 2 {
            return None;
        }
        Some((&history[n - 2], &history[n - 1]))
    }

    /// Retained snapshots of `id`, oldest first.
    pub fn history(&self, id: EntityId) -> impl Iterator<Item = &Rc<Snapshot>> {
        self.histories.get(&id).into_iter().flatten()
    }

    pub fn len(&self, id: EntityId) -> usize {
        self.histories.get(&id).map_or(0, VecDeque::len)
    }

    pub fn entity_count(&self) -> usize {
        self.histories.len()
    }

    pub fn dispose(&mut self, id: EntityId) -> bool {
        self.histories.remove(&id).is_some()
    }

    /// Drop histories whose latest snapshot is older than `max_idle_ms`,
    /// except those `busy` holds on to, and return the ids that went.
    pub fn prune_idle(
        &mut self,
        now: f64,
        max_idle_ms: f64,
        busy: impl Fn(EntityId) -> bool,
    ) -> Vec<EntityId> {
        let mut dropped = Vec::new();
        self.histories.retain(|id, history| {
            let live = busy(*id)
                || history
                    .back()
                    .is_some_and(|s| now - s.timestamp <= max_idle_ms);
            if !live {
                dropped.push(*id);
            }
            live
        });
        dropped
    }

    pub fn clear(&mut self) {
        self.histories.clear();
    }
}
