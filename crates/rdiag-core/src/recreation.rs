//! Correlates unmounts with structurally similar mounts.
//!
//! An unmount leaves a candidate keyed by display name and sorted input-key
//! signature. A mount with the same signature, the same parent, inside the
//! window and with enough matching inputs consumes the candidate and is
//! reported as a recreation: the entity was torn down and rebuilt where it
//! could have been patched in place.

use std::collections::HashMap;

use serde::Serialize;
use serde_json::Value;

use crate::constants::CANDIDATE_EXPIRY_FACTOR;
use crate::differ::{DiffResult, KeyChange, is_deep_equal};
use crate::entity::EntityId;
use crate::serializer::is_function_sentinel;
use crate::snapshot::Attributes;

/// Tunables. All three are empirical.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RecreationConfig {
    pub window_ms: f64,
    pub max_tracked: usize,
    pub similarity_threshold: f64,
}

struct Candidate {
    attributes: Attributes,
    timestamp: f64,
    parent_id: Option<EntityId>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecreationMatch {
    pub similarity: f64,
    pub gap_ms: f64,
    /// Keys that did not match between the old and the new entity.
    pub mismatched: DiffResult,
}

pub struct RecreationDetector {
    config: RecreationConfig,
    candidates: HashMap<String, Candidate>,
}

/// Display name plus sorted attribute keys.
pub fn signature(display_name: &str, attributes: &Attributes) -> String {
    format!("{display_name}({})", attributes.sorted_keys().join(","))
}

impl RecreationDetector {
    pub fn new(config: RecreationConfig) -> Self {
        Self {
            config,
            candidates: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Register an unmounted entity's last inputs as a candidate.
    pub fn on_unmount(
        &mut self,
        display_name: &str,
        parent_id: Option<EntityId>,
        attributes: &Attributes,
        now: f64,
    ) {
        self.prune(now);
        let key = signature(display_name, attributes);
        tracing::debug!(signature = %key, "recreation candidate registered");
        self.candidates.insert(
            key,
            Candidate {
                attributes: attributes.clone(),
                timestamp: now,
                parent_id,
            },
        );
        while self.candidates.len() > self.config.max_tracked {
            self.evict_oldest();
        }
    }

    /// Check a freshly mounted entity against the candidates. A match
    /// consumes its candidate.
    pub fn on_mount(
        &mut self,
        display_name: &str,
        parent_id: Option<EntityId>,
        attributes: &Attributes,
        now: f64,
    ) -> Option<RecreationMatch> {
        self.prune(now);
        let key = signature(display_name, attributes);
        let candidate = self.candidates.get(&key)?;

        let gap_ms = now - candidate.timestamp;
        if gap_ms > self.config.window_ms || candidate.parent_id != parent_id {
            return None;
        }

        let (similarity, mismatched) = compare(&candidate.attributes, attributes);
        if similarity < self.config.similarity_threshold {
            return None;
        }

        self.candidates.remove(&key);
        tracing::info!(signature = %key, similarity, gap_ms, "recreation detected");
        Some(RecreationMatch {
            similarity,
            gap_ms,
            mismatched,
        })
    }

    /// Discard candidates older than twice the window.
    pub fn prune(&mut self, now: f64) -> usize {
        let max_age = self.config.window_ms * CANDIDATE_EXPIRY_FACTOR;
        let before = self.candidates.len();
        self.candidates.retain(|_, c| now - c.timestamp <= max_age);
        before - self.candidates.len()
    }

    pub fn clear(&mut self) {
        self.candidates.clear();
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .candidates
            .iter()
            .min_by(|a, b| a.1.timestamp.total_cmp(&b.1.timestamp))
            .map(|(k, _)| k.clone());
        if let Some(key) = oldest {
            tracing::debug!(signature = %key, "evicted oldest recreation candidate");
            self.candidates.remove(&key);
        }
    }
}

/// Matched keys over distinct keys, plus a diff of the keys that missed.
fn compare(old: &Attributes, new: &Attributes) -> (f64, DiffResult) {
    let mut mismatched = DiffResult::default();
    let mut matched = 0usize;
    let mut total = 0usize;

    for (key, from) in old.values() {
        total += 1;
        match new.get(key) {
            Some(to) if values_match(from, to) => matched += 1,
            Some(to) => mismatched.changed.push(KeyChange {
                key: key.clone(),
                from: from.clone(),
                to: to.clone(),
                same_reference: false,
                deep_equal: false,
            }),
            None => {
                mismatched.removed.insert(key.clone(), from.clone());
            }
        }
    }
    for (key, to) in new.values() {
        if !old.contains_key(key) {
            total += 1;
            mismatched.added.insert(key.clone(), to.clone());
        }
    }

    let similarity = if total == 0 {
        1.0
    } else {
        matched as f64 / total as f64
    };
    (similarity, mismatched)
}

fn values_match(a: &Value, b: &Value) -> bool {
    is_deep_equal(a, b) || (is_function_sentinel(a) && is_function_sentinel(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};

    fn config() -> RecreationConfig {
        RecreationConfig {
            window_ms: 100.0,
            max_tracked: 3,
            similarity_threshold: 0.7,
        }
    }

    fn attrs(v: Value) -> Attributes {
        match v {
            Value::Object(map) => Attributes::from_json(map),
            _ => Attributes::from_json(Map::new()),
        }
    }

    #[test]
    fn test_match_consumes_candidate() {
        let mut d = RecreationDetector::new(config());
        let row = attrs(json!({"id": 1, "name": "x"}));
        d.on_unmount("Row", Some(EntityId(9)), &row, 0.0);

        let m = d.on_mount("Row", Some(EntityId(9)), &row, 50.0).unwrap();
        assert_eq!(m.similarity, 1.0);
        assert_eq!(m.gap_ms, 50.0);
        assert!(m.mismatched.is_empty());

        assert!(d.on_mount("Row", Some(EntityId(9)), &row, 60.0).is_none());
        assert!(d.is_empty());
    }

    #[test]
    fn test_window_and_parent_respected() {
        let mut d = RecreationDetector::new(config());
        let row = attrs(json!({"id": 1}));
        d.on_unmount("Row", Some(EntityId(1)), &row, 0.0);
        assert!(d.on_mount("Row", Some(EntityId(2)), &row, 10.0).is_none());
        assert!(d.on_mount("Row", Some(EntityId(1)), &row, 150.0).is_none());
        // Still within 2x window, so it was kept, but it cannot match anymore.
        assert_eq!(d.len(), 1);
        assert_eq!(d.prune(250.0), 1);
    }

    #[test]
    fn test_similarity_threshold() {
        let mut d = RecreationDetector::new(config());
        let old = attrs(json!({"a": 1, "b": 2, "c": 3, "d": 4}));
        let close = attrs(json!({"a": 1, "b": 2, "c": 3, "d": 5}));
        let far = attrs(json!({"a": 1, "b": 9, "c": 9, "d": 9}));

        d.on_unmount("Cell", None, &old, 0.0);
        assert!(d.on_mount("Cell", None, &far, 10.0).is_none());
        let m = d.on_mount("Cell", None, &close, 20.0).unwrap();
        assert!((m.similarity - 0.75).abs() < 1e-12);
        assert_eq!(m.mismatched.changed.len(), 1);
        assert_eq!(m.mismatched.changed[0].key, "d");
    }

    #[test]
    fn test_function_sentinels_count_as_matching() {
        let mut d = RecreationDetector::new(config());
        let old = attrs(json!({"id": 1, "onClick": "[Function: onClick]"}));
        let new = attrs(json!({"id": 1, "onClick": "[Function: onClick]"}));
        d.on_unmount("Btn", None, &old, 0.0);
        let m = d.on_mount("Btn", None, &new, 5.0).unwrap();
        assert_eq!(m.similarity, 1.0);
    }

    #[test]
    fn test_signature_requires_same_keys() {
        let mut d = RecreationDetector::new(config());
        d.on_unmount("Row", None, &attrs(json!({"id": 1})), 0.0);
        assert!(d.on_mount("Row", None, &attrs(json!({"id": 1, "x": 2})), 1.0).is_none());
        assert!(d.on_mount("Col", None, &attrs(json!({"id": 1})), 1.0).is_none());
        assert_eq!(signature("Row", &attrs(json!({"b": 1, "a": 2}))), "Row(a,b)");
    }

    #[test]
    fn test_cap_evicts_oldest() {
        let mut d = RecreationDetector::new(config());
        for (i, name) in ["A", "B", "C", "D"].iter().enumerate() {
            d.on_unmount(name, None, &attrs(json!({})), i as f64);
        }
        assert_eq!(d.len(), 3);
        assert!(d.on_mount("A", None, &attrs(json!({})), 5.0).is_none());
        assert!(d.on_mount("D", None, &attrs(json!({})), 5.0).is_some());
    }
}
