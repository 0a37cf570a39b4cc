//! Per-entity read/write event logs, scoped to one update cycle.
//!
//! Events are only accepted while the entity's sampling bracket is open, so
//! reads and writes from another entity's cycle are never attributed here.

use std::collections::{HashMap, HashSet, VecDeque};

use rand::Rng;
use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};

use crate::entity::EntityId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Read,
    Write,
}

/// One auxiliary signal observed during an update cycle.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuxEvent {
    pub kind: SignalKind,
    /// Name of the value read or written.
    pub target: String,
    /// True for derived/cached values (computed properties and the like).
    #[serde(default)]
    pub derived: bool,
}

impl AuxEvent {
    pub fn read(target: &str) -> Self {
        Self {
            kind: SignalKind::Read,
            target: target.to_string(),
            derived: false,
        }
    }

    pub fn derived_read(target: &str) -> Self {
        Self {
            derived: true,
            ..Self::read(target)
        }
    }

    pub fn write(target: &str) -> Self {
        Self {
            kind: SignalKind::Write,
            target: target.to_string(),
            derived: false,
        }
    }
}

/// Everything sampled for one entity during one cycle.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CycleSignals {
    pub reads: Vec<AuxEvent>,
    pub writes: Vec<AuxEvent>,
}

impl CycleSignals {
    /// Derived-value reads with no write in the same cycle.
    pub fn unwritten_derived_reads(&self) -> Vec<&str> {
        if !self.writes.is_empty() {
            return Vec::new();
        }
        let mut seen = HashSet::new();
        self.reads
            .iter()
            .filter(|e| e.derived && seen.insert(e.target.as_str()))
            .map(|e| e.target.as_str())
            .collect()
    }
}

#[derive(Default)]
struct EventLog {
    reads: VecDeque<AuxEvent>,
    writes: VecDeque<AuxEvent>,
}

pub struct EventSampler {
    rate: f64,
    max_events: usize,
    logs: HashMap<EntityId, EventLog>,
    active: HashSet<EntityId>,
    rng: SmallRng,
}

impl EventSampler {
    pub fn new(rate: f64, max_events: usize, rng: SmallRng) -> Self {
        Self {
            rate: rate.clamp(0.0, 1.0),
            max_events: max_events.max(1),
            logs: HashMap::new(),
            active: HashSet::new(),
            rng,
        }
    }

    /// Open the bracket for `id` and start a fresh log. False if it was
    /// already open.
    pub fn begin(&mut self, id: EntityId) -> bool {
        if !self.active.insert(id) {
            return false;
        }
        self.logs.insert(id, EventLog::default());
        true
    }

    /// Close the bracket and hand over what was logged.
    pub fn end(&mut self, id: EntityId) -> CycleSignals {
        self.active.remove(&id);
        match self.logs.remove(&id) {
            Some(log) => CycleSignals {
                reads: log.reads.into(),
                writes: log.writes.into(),
            },
            None => CycleSignals::default(),
        }
    }

    pub fn is_sampling(&self, id: EntityId) -> bool {
        self.active.contains(&id)
    }

    /// Log an event. Returns whether it was kept (bracket open and not
    /// dropped by sampling).
    pub fn record(&mut self, id: EntityId, event: AuxEvent) -> bool {
        if !self.active.contains(&id) {
            return false;
        }
        if self.rate < 1.0 && self.rng.random::<f64>() >= self.rate {
            return false;
        }
        let log = self.logs.entry(id).or_default();
        let queue = match event.kind {
            SignalKind::Read => &mut log.reads,
            SignalKind::Write => &mut log.writes,
        };
        queue.push_back(event);
        if queue.len() > self.max_events {
            queue.pop_front();
        }
        true
    }

    pub fn dispose(&mut self, id: EntityId) {
        self.active.remove(&id);
        self.logs.remove(&id);
    }

    pub fn clear(&mut self) {
        self.active.clear();
        self.logs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn sampler(rate: f64, max: usize) -> EventSampler {
        EventSampler::new(rate, max, SmallRng::seed_from_u64(42))
    }

    #[test]
    fn test_events_outside_bracket_dropped() {
        let mut s = sampler(1.0, 10);
        let id = EntityId(1);
        assert!(!s.record(id, AuxEvent::read("a")));
        assert!(s.begin(id));
        assert!(s.record(id, AuxEvent::read("a")));
        let signals = s.end(id);
        assert_eq!(signals.reads.len(), 1);
        assert!(!s.record(id, AuxEvent::read("b")));
        assert!(!s.is_sampling(id));
    }

    #[test]
    fn test_no_cross_attribution() {
        let mut s = sampler(1.0, 10);
        let (a, b) = (EntityId(1), EntityId(2));
        s.begin(a);
        s.record(a, AuxEvent::write("x"));
        s.record(b, AuxEvent::write("y"));
        let signals = s.end(a);
        assert_eq!(signals.writes, vec![AuxEvent::write("x")]);
        assert!(s.end(b).writes.is_empty());
    }

    #[test]
    fn test_logs_capped_fifo() {
        let mut s = sampler(1.0, 3);
        let id = EntityId(1);
        s.begin(id);
        for i in 0..5 {
            s.record(id, AuxEvent::read(&format!("r{i}")));
        }
        s.record(id, AuxEvent::write("w"));
        let signals = s.end(id);
        let targets: Vec<&str> = signals.reads.iter().map(|e| e.target.as_str()).collect();
        assert_eq!(targets, vec!["r2", "r3", "r4"]);
        assert_eq!(signals.writes.len(), 1);
    }

    #[test]
    fn test_begin_resets_previous_cycle() {
        let mut s = sampler(1.0, 10);
        let id = EntityId(1);
        s.begin(id);
        s.record(id, AuxEvent::read("old"));
        assert!(!s.begin(id), "bracket already open");
        s.end(id);
        s.begin(id);
        assert!(s.end(id).reads.is_empty());
    }

    #[test]
    fn test_sampling_rate_drops_some() {
        let mut s = sampler(0.5, 10_000);
        let id = EntityId(1);
        s.begin(id);
        let kept = (0..2000)
            .filter(|i| s.record(id, AuxEvent::read(&i.to_string())))
            .count();
        assert!(kept > 800 && kept < 1200, "kept {kept} of 2000");
    }

    #[test]
    fn test_unwritten_derived_reads() {
        let signals = CycleSignals {
            reads: vec![
                AuxEvent::derived_read("total"),
                AuxEvent::read("items"),
                AuxEvent::derived_read("total"),
            ],
            writes: vec![],
        };
        assert_eq!(signals.unwritten_derived_reads(), vec!["total"]);

        let with_write = CycleSignals {
            writes: vec![AuxEvent::write("items")],
            ..signals
        };
        assert!(with_write.unwritten_derived_reads().is_empty());
    }
}
