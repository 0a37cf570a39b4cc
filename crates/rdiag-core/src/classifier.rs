//! Decides whether an update cycle was necessary and, if not, why it ran.
//!
//! Decision procedure over two consecutive snapshots of the same entity:
//! 1. Diff the input group (A) and the state group (B).
//! 2. A group has a real change if any changed key differs in content, or
//!    any key was added or removed.
//! 3. No real change anywhere: `ancestor-rerender` when both diffs are empty,
//!    otherwise `reference-changes-only`.
//! 4. Otherwise the update was necessary; it is attributed to the group(s)
//!    with a real change and to the first responsible key.
//! 5. Auxiliary signals only add suggestions, they never change 1-4.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::UNKNOWN_KEY;
use crate::differ::{DiffResult, compute_diff, shallow_equal};
use crate::error::ClassifyError;
use crate::sampler::CycleSignals;
use crate::serializer::is_function_sentinel;
use crate::snapshot::{Attributes, Snapshot};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Cause {
    AttributesChanged,
    AncestorRerender,
    ReferenceChangesOnly,
    InitialRender,
    Unknown,
}

impl Cause {
    pub fn as_str(&self) -> &'static str {
        match self {
            Cause::AttributesChanged => "attributes-changed",
            Cause::AncestorRerender => "ancestor-rerender",
            Cause::ReferenceChangesOnly => "reference-changes-only",
            Cause::InitialRender => "initial-render",
            Cause::Unknown => "unknown",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeGroup {
    A,
    B,
    Both,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub confidence: Confidence,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

impl Suggestion {
    pub fn new(confidence: Confidence, message: String, key: Option<&str>) -> Self {
        Self {
            confidence,
            message,
            key: key.map(str::to_string),
        }
    }
}

/// Outcome of classifying one update cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct Classification {
    pub necessary: bool,
    pub cause: Cause,
    pub attributed_key: Option<String>,
    pub attributed_group: Option<AttributeGroup>,
    pub suggestions: Vec<Suggestion>,
    pub diff_a: DiffResult,
    pub diff_b: DiffResult,
}

impl Classification {
    /// Degraded result used when classification itself failed.
    pub fn unknown() -> Self {
        Self {
            necessary: false,
            cause: Cause::Unknown,
            attributed_key: None,
            attributed_group: None,
            suggestions: Vec::new(),
            diff_a: DiffResult::default(),
            diff_b: DiffResult::default(),
        }
    }
}

/// Classify, degrading any failure to `necessary=false, cause=unknown`.
pub fn classify(prev: &Snapshot, curr: &Snapshot, signals: &CycleSignals) -> Classification {
    match try_classify(prev, curr, signals) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(entity = %curr.entity_id, "classification degraded: {e}");
            Classification::unknown()
        }
    }
}

pub fn try_classify(
    prev: &Snapshot,
    curr: &Snapshot,
    signals: &CycleSignals,
) -> Result<Classification, ClassifyError> {
    if prev.entity_id != curr.entity_id {
        return Err(ClassifyError::EntityMismatch {
            prev: prev.entity_id,
            curr: curr.entity_id,
        });
    }
    if !prev.timestamp.is_finite() || !curr.timestamp.is_finite() {
        return Err(ClassifyError::NonFiniteTimestamp);
    }
    if curr.timestamp < prev.timestamp {
        return Err(ClassifyError::OutOfOrder {
            prev_ts: prev.timestamp,
            curr_ts: curr.timestamp,
        });
    }

    let diff_a = diff_group(&prev.attributes_a, &curr.attributes_a);
    let diff_b = diff_group(&prev.attributes_b, &curr.attributes_b);
    let real_a = diff_a.has_real_change();
    let real_b = diff_b.has_real_change();

    let (necessary, cause, group) = match (real_a, real_b) {
        (false, false) if diff_a.is_empty() && diff_b.is_empty() => {
            (false, Cause::AncestorRerender, None)
        }
        (false, false) => (false, Cause::ReferenceChangesOnly, None),
        (true, true) => (true, Cause::AttributesChanged, Some(AttributeGroup::Both)),
        (true, false) => (true, Cause::AttributesChanged, Some(AttributeGroup::A)),
        (false, true) => (true, Cause::AttributesChanged, Some(AttributeGroup::B)),
    };

    let attributed_key = group.map(|g| {
        let key = match g {
            AttributeGroup::A => diff_a.first_real_key(),
            AttributeGroup::B => diff_b.first_real_key(),
            AttributeGroup::Both => diff_a.first_real_key().or(diff_b.first_real_key()),
        };
        key.unwrap_or(UNKNOWN_KEY).to_string()
    });

    let mut suggestions = Vec::new();
    match cause {
        Cause::AncestorRerender => suggestions.push(Suggestion::new(
            Confidence::Low,
            "no attribute changed; the update came from an ancestor. Memoizing this entity would skip it"
                .to_string(),
            None,
        )),
        Cause::ReferenceChangesOnly => {
            for change in diff_a.reference_only().chain(diff_b.reference_only()) {
                suggestions.push(Suggestion::new(
                    Confidence::Medium,
                    format!(
                        "`{}` is a new {} with identical content; memoize it where it is created",
                        change.key,
                        kind_name(&change.to)
                    ),
                    Some(&change.key),
                ));
            }
        }
        _ => {}
    }
    for change in diff_a.changed.iter().chain(&diff_b.changed) {
        if is_function_sentinel(&change.from) && is_function_sentinel(&change.to) {
            suggestions.push(Suggestion::new(
                Confidence::Medium,
                format!(
                    "callback `{}` is recreated on every update and always counts as a change; hoist or memoize it",
                    change.key
                ),
                Some(&change.key),
            ));
        }
    }

    let stale = signals.unwritten_derived_reads();
    if !stale.is_empty() {
        suggestions.push(Suggestion::new(
            Confidence::Low,
            format!(
                "derived values [{}] were read with no write in this cycle; a cached computation may be stale or re-evaluated redundantly",
                stale.join(", ")
            ),
            None,
        ));
    }

    Ok(Classification {
        necessary,
        cause,
        attributed_key,
        attributed_group: group,
        suggestions,
        diff_a,
        diff_b,
    })
}

fn diff_group(prev: &Attributes, curr: &Attributes) -> DiffResult {
    if shallow_equal(prev, curr) {
        return DiffResult::default();
    }
    compute_diff(prev, curr)
}

fn kind_name(v: &Value) -> &'static str {
    match v {
        Value::Array(_) => "array",
        _ => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityId;
    use crate::host::{HostField, HostValue};
    use crate::sampler::AuxEvent;

    fn attrs(pairs: &[(&str, HostValue)]) -> Attributes {
        let fields: Vec<(String, HostField)> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Ok(v.clone())))
            .collect();
        Attributes::capture(&fields, 8)
    }

    fn snap(id: u64, ts: f64, a: Attributes, b: Attributes) -> Snapshot {
        Snapshot {
            entity_id: EntityId(id),
            timestamp: ts,
            duration_ms: Some(1.0),
            attributes_a: a,
            attributes_b: b,
        }
    }

    #[test]
    fn test_reference_changes_only() {
        let cfg = || attrs(&[("cfg", HostValue::object([("a", HostValue::from(1))]))]);
        let prev = snap(1, 0.0, cfg(), Attributes::new());
        let curr = snap(1, 1.0, cfg(), Attributes::new());
        let c = classify(&prev, &curr, &CycleSignals::default());
        assert!(!c.necessary);
        assert_eq!(c.cause, Cause::ReferenceChangesOnly);
        assert!(c.attributed_key.is_none());
        assert_eq!(c.suggestions.len(), 1);
        assert_eq!(c.suggestions[0].key.as_deref(), Some("cfg"));
        assert!(c.suggestions[0].message.contains("new object"));
    }

    #[test]
    fn test_real_change_in_state_group() {
        let prev = snap(1, 0.0, Attributes::new(), attrs(&[("count", HostValue::from(1))]));
        let curr = snap(1, 1.0, Attributes::new(), attrs(&[("count", HostValue::from(2))]));
        let c = classify(&prev, &curr, &CycleSignals::default());
        assert!(c.necessary);
        assert_eq!(c.cause, Cause::AttributesChanged);
        assert_eq!(c.attributed_group, Some(AttributeGroup::B));
        assert_eq!(c.attributed_key.as_deref(), Some("count"));
    }

    #[test]
    fn test_both_groups_prefer_input_key() {
        let prev = snap(
            1,
            0.0,
            attrs(&[("title", HostValue::from("a"))]),
            attrs(&[("count", HostValue::from(1))]),
        );
        let curr = snap(
            1,
            1.0,
            attrs(&[("title", HostValue::from("b"))]),
            attrs(&[("count", HostValue::from(2))]),
        );
        let c = classify(&prev, &curr, &CycleSignals::default());
        assert_eq!(c.attributed_group, Some(AttributeGroup::Both));
        assert_eq!(c.attributed_key.as_deref(), Some("title"));
    }

    #[test]
    fn test_ancestor_rerender() {
        let cfg = HostValue::object([("a", HostValue::from(1))]);
        let a = attrs(&[("cfg", cfg.clone()), ("n", HostValue::from(3))]);
        let a2 = attrs(&[("cfg", cfg), ("n", HostValue::from(3))]);
        let prev = snap(1, 0.0, a, Attributes::new());
        let curr = snap(1, 1.0, a2, Attributes::new());
        let c = classify(&prev, &curr, &CycleSignals::default());
        assert!(!c.necessary);
        assert_eq!(c.cause, Cause::AncestorRerender);
        assert!(c.diff_a.is_empty() && c.diff_b.is_empty());
    }

    #[test]
    fn test_added_key_is_attributed() {
        let prev = snap(1, 0.0, attrs(&[]), Attributes::new());
        let curr = snap(1, 1.0, attrs(&[("open", HostValue::from(true))]), Attributes::new());
        let c = classify(&prev, &curr, &CycleSignals::default());
        assert!(c.necessary);
        assert_eq!(c.attributed_key.as_deref(), Some("open"));
    }

    #[test]
    fn test_recreated_callback_is_a_change_with_hint() {
        let handler = || attrs(&[("onClick", HostValue::function("onClick"))]);
        let prev = snap(1, 0.0, handler(), Attributes::new());
        let curr = snap(1, 1.0, handler(), Attributes::new());
        let c = classify(&prev, &curr, &CycleSignals::default());
        assert!(c.necessary);
        assert_eq!(c.attributed_key.as_deref(), Some("onClick"));
        assert!(c.suggestions.iter().any(|s| s.message.contains("hoist or memoize")));
    }

    #[test]
    fn test_stale_derived_hint_only_augments() {
        let prev = snap(1, 0.0, attrs(&[("n", HostValue::from(1))]), Attributes::new());
        let curr = snap(1, 1.0, attrs(&[("n", HostValue::from(1))]), Attributes::new());
        let signals = CycleSignals {
            reads: vec![AuxEvent::derived_read("total")],
            writes: vec![],
        };
        let c = classify(&prev, &curr, &signals);
        assert_eq!(c.cause, Cause::AncestorRerender);
        let hint = c.suggestions.last().unwrap();
        assert_eq!(hint.confidence, Confidence::Low);
        assert!(hint.message.contains("total"));
    }

    #[test]
    fn test_mismatched_entities_degrade_to_unknown() {
        let prev = snap(1, 0.0, Attributes::new(), Attributes::new());
        let curr = snap(2, 1.0, Attributes::new(), Attributes::new());
        assert!(matches!(
            try_classify(&prev, &curr, &CycleSignals::default()),
            Err(ClassifyError::EntityMismatch { .. })
        ));
        let c = classify(&prev, &curr, &CycleSignals::default());
        assert!(!c.necessary);
        assert_eq!(c.cause, Cause::Unknown);
    }

    #[test]
    fn test_out_of_order_degrades() {
        let prev = snap(1, 5.0, Attributes::new(), Attributes::new());
        let curr = snap(1, 1.0, Attributes::new(), Attributes::new());
        assert_eq!(classify(&prev, &curr, &CycleSignals::default()).cause, Cause::Unknown);

        let nan = snap(1, f64::NAN, Attributes::new(), Attributes::new());
        assert_eq!(
            try_classify(&prev, &nan, &CycleSignals::default()),
            Err(ClassifyError::NonFiniteTimestamp)
        );
    }
}
