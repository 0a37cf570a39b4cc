//! Equality and diff primitives over captured attributes.
//!
//! Reference identity comes from the capture-time [`RefToken`]s, content
//! equality from the serialized values. Serialized values are trees (the
//! serializer already cut every cycle), so deep comparison needs no
//! visited set and always terminates.
//!
//! Known limitation: functions are only visible as `[Function: name]`
//! sentinels. Two different closures with the same name render identically,
//! so function sentinels are never deep-equal; a replaced callback always
//! counts as a real change rather than risk hiding one. At the top level a
//! captured function carries an origin token, so a plain string that happens
//! to read `[Function: x]` still compares as a primitive. Nested inside an
//! object or array the two are indistinguishable, and such a string makes
//! its container count as a real change whenever the container's reference
//! changes.
//!
//! [`RefToken`]: crate::host::RefToken

use serde::Serialize;
use serde_json::{Map, Value};

use crate::serializer::{is_function_sentinel, type_marker};
use crate::snapshot::Attributes;

/// A key present on both sides whose reference changed.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyChange {
    pub key: String,
    pub from: Value,
    pub to: Value,
    pub same_reference: bool,
    pub deep_equal: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DiffResult {
    pub changed: Vec<KeyChange>,
    pub added: Map<String, Value>,
    pub removed: Map<String, Value>,
}

impl DiffResult {
    /// No changed, added or removed keys at all.
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.added.is_empty() && self.removed.is_empty()
    }

    /// Some key differs in content, not just in reference.
    pub fn has_real_change(&self) -> bool {
        self.changed.iter().any(|c| !c.deep_equal)
            || !self.added.is_empty()
            || !self.removed.is_empty()
    }

    /// First key responsible for a real change: a content change first,
    /// then an added key, then a removed key.
    pub fn first_real_key(&self) -> Option<&str> {
        self.changed
            .iter()
            .find(|c| !c.deep_equal)
            .map(|c| c.key.as_str())
            .or_else(|| self.added.keys().next().map(String::as_str))
            .or_else(|| self.removed.keys().next().map(String::as_str))
    }

    /// Keys that got a new reference with identical content.
    pub fn reference_only(&self) -> impl Iterator<Item = &KeyChange> {
        self.changed.iter().filter(|c| c.deep_equal)
    }

    pub fn change(&self, key: &str) -> Option<&KeyChange> {
        self.changed.iter().find(|c| c.key == key)
    }
}

fn is_primitive(v: &Value) -> bool {
    !matches!(v, Value::Array(_) | Value::Object(_))
}

/// Strict (`===`-style) equality of `key` between two captures.
pub fn same_reference(prev: &Attributes, next: &Attributes, key: &str) -> bool {
    match (prev.origin(key), next.origin(key)) {
        (Some(a), Some(b)) => a.same(b),
        (None, None) => match (prev.get(key), next.get(key)) {
            (Some(a), Some(b)) => {
                // Without capture provenance a sentinel could stand for a function.
                let comparable = (prev.is_captured() && next.is_captured())
                    || !is_function_sentinel(a);
                std::ptr::eq(a, b) || (is_primitive(a) && comparable && a == b)
            }
            _ => false,
        },
        _ => false,
    }
}

/// Structural equality of two serialized values.
pub fn is_deep_equal(a: &Value, b: &Value) -> bool {
    if std::ptr::eq(a, b) {
        return true;
    }
    if is_function_sentinel(a) || is_function_sentinel(b) {
        return false;
    }
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| is_deep_equal(l, r))
        }
        (Value::Object(x), Value::Object(y)) => objects_equal(x, y),
        _ => false,
    }
}

fn objects_equal(x: &Map<String, Value>, y: &Map<String, Value>) -> bool {
    match (type_marker(x), type_marker(y)) {
        (Some(tx), Some(ty)) if tx != ty => return false,
        (Some(_), None) | (None, Some(_)) => return false,
        (Some("Date"), Some("Date")) => {
            return match (x.get("value"), y.get("value")) {
                (Some(Value::Number(l)), Some(Value::Number(r))) => l.as_f64() == r.as_f64(),
                (l, r) => l == r,
            };
        }
        (Some("RegExp"), Some("RegExp")) => {
            return x.get("source") == y.get("source") && x.get("flags") == y.get("flags");
        }
        _ => {}
    }
    x.len() == y.len()
        && x
            .iter()
            .all(|(k, v)| y.get(k).is_some_and(|w| is_deep_equal(v, w)))
}

/// One-level comparison: same key set and every value strictly equal.
pub fn shallow_equal(a: &Attributes, b: &Attributes) -> bool {
    a.len() == b.len() && a.keys().all(|k| b.contains_key(k) && same_reference(a, b, k))
}

/// Classify every key of the union as added, removed or changed.
pub fn compute_diff(prev: &Attributes, next: &Attributes) -> DiffResult {
    let mut diff = DiffResult::default();

    for (key, from) in prev.values() {
        match next.get(key) {
            None => {
                diff.removed.insert(key.clone(), from.clone());
            }
            Some(to) => {
                let same = same_reference(prev, next, key);
                if !same {
                    diff.changed.push(KeyChange {
                        key: key.clone(),
                        from: from.clone(),
                        to: to.clone(),
                        same_reference: same,
                        deep_equal: is_deep_equal(from, to),
                    });
                }
            }
        }
    }

    for (key, to) in next.values() {
        if !prev.contains_key(key) {
            diff.added.insert(key.clone(), to.clone());
        }
    }

    diff
}
