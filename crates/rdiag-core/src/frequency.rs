//! Sliding-window update counter and storm classification.
//!
//! Windows are pruned lazily on every `record`, so memory per entity is
//! bounded by the window duration rather than by total update count.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::entity::EntityId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StormSeverity {
    Warning,
    Error,
    Critical,
}

impl StormSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            StormSeverity::Warning => "warning",
            StormSeverity::Error => "error",
            StormSeverity::Critical => "critical",
        }
    }

    /// `warning` below 2× threshold, `error` below 4×, else `critical`.
    pub fn for_count(count: usize, threshold: usize) -> Option<Self> {
        if count < threshold {
            None
        } else if count < threshold.saturating_mul(2) {
            Some(StormSeverity::Warning)
        } else if count < threshold.saturating_mul(4) {
            Some(StormSeverity::Error)
        } else {
            Some(StormSeverity::Critical)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StormReport {
    pub entity_id: EntityId,
    pub count: usize,
    pub severity: StormSeverity,
}

pub struct FrequencyMonitor {
    window_ms: f64,
    threshold: usize,
    windows: HashMap<EntityId, VecDeque<f64>>,
}

impl FrequencyMonitor {
    pub fn new(window_ms: f64, threshold: usize) -> Self {
        Self {
            window_ms,
            threshold: threshold.max(1),
            windows: HashMap::new(),
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Record an update at `t` and prune everything older than `t - window`.
    /// Returns the count after pruning.
    pub fn record(&mut self, id: EntityId, t: f64) -> usize {
        let window = self.windows.entry(id).or_default();
        window.push_back(t);
        prune(window, t - self.window_ms);
        let count = window.len();
        if count == self.threshold {
            tracing::info!(entity = %id, count, "update storm started");
        }
        count
    }

    /// Size of the window as of its most recent prune.
    pub fn count(&self, id: EntityId) -> usize {
        self.windows.get(&id).map_or(0, VecDeque::len)
    }

    pub fn is_storm(&self, id: EntityId) -> bool {
        self.count(id) >= self.threshold
    }

    pub fn severity(&self, id: EntityId) -> Option<StormSeverity> {
        StormSeverity::for_count(self.count(id), self.threshold)
    }

    /// Every tracked entity currently at or over the threshold, worst first.
    pub fn active_storms(&self) -> Vec<StormReport> {
        let mut storms: Vec<StormReport> = self
            .windows
            .iter()
            .filter_map(|(id, window)| {
                StormSeverity::for_count(window.len(), self.threshold).map(|severity| {
                    StormReport {
                        entity_id: *id,
                        count: window.len(),
                        severity,
                    }
                })
            })
            .collect();
        storms.sort_by(|a, b| b.count.cmp(&a.count).then(a.entity_id.cmp(&b.entity_id)));
        storms
    }

    /// Prune every window relative to `now` and forget empty ones.
    pub fn prune_all(&mut self, now: f64) -> usize {
        let cutoff = now - self.window_ms;
        let before = self.windows.len();
        self.windows.retain(|_, window| {
            prune(window, cutoff);
            !window.is_empty()
        });
        before - self.windows.len()
    }

    pub fn tracked(&self) -> usize {
        self.windows.len()
    }

    pub fn dispose(&mut self, id: EntityId) {
        self.windows.remove(&id);
    }

    pub fn clear(&mut self) {
        self.windows.clear();
    }
}

fn prune(window: &mut VecDeque<f64>, cutoff: f64) {
    while window.front().is_some_and(|&t| t < cutoff) {
        window.pop_front();
    }
}
