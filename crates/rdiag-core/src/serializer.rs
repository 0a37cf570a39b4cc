//! Bounded-depth, cycle-safe conversion of host values into plain JSON.
//!
//! Output is acyclic by construction: every node is walked at most once per
//! serializer, and a second visit (whether through a real cycle or through a
//! shared sub-value reached by another path) yields the circular sentinel.

use std::collections::HashSet;
use std::rc::Rc;

use serde_json::{Map, Value};

use crate::host::{HostNode, HostObject, HostValue};

pub const CIRCULAR_SENTINEL: &str = "[Circular Reference]";
pub const MAX_DEPTH_SENTINEL: &str = "[Max Depth]";

/// Key carrying the type of a tagged value. Never collides with user keys
/// because private-prefixed keys are dropped.
pub const TYPE_MARKER: &str = "__type";

const FUNCTION_PREFIX: &str = "[Function: ";

pub fn function_sentinel(name: &str) -> String {
    let name = if name.is_empty() { "anonymous" } else { name };
    format!("{FUNCTION_PREFIX}{name}]")
}

pub fn error_sentinel(message: &str) -> String {
    format!("[Error: {message}]")
}

pub fn is_function_sentinel(value: &Value) -> bool {
    matches!(value, Value::String(s) if s.starts_with(FUNCTION_PREFIX) && s.ends_with(']'))
}

/// Internal bookkeeping keys of the host runtime.
pub fn is_private_key(key: &str) -> bool {
    key.starts_with('_') || key.starts_with('$')
}

/// Type marker of a tagged object, if any.
pub fn type_marker(map: &Map<String, Value>) -> Option<&str> {
    map.get(TYPE_MARKER).and_then(Value::as_str)
}

/// Serialize a single value graph.
pub fn serialize(value: &HostValue, max_depth: usize) -> Value {
    Serializer::new(max_depth).serialize(value, 0)
}

/// Walker holding the visited set. One instance per capture, so values
/// shared between attributes of the same capture are emitted once.
pub struct Serializer {
    max_depth: usize,
    visited: HashSet<*const HostNode>,
}

impl Serializer {
    pub fn new(max_depth: usize) -> Self {
        Self {
            max_depth,
            visited: HashSet::new(),
        }
    }

    /// Serialize `value` found at nesting level `depth`.
    pub fn serialize(&mut self, value: &HostValue, depth: usize) -> Value {
        let rc = match value {
            HostValue::Null => return Value::Null,
            HostValue::Bool(b) => return Value::Bool(*b),
            HostValue::Number(n) => return number(*n),
            HostValue::String(s) => return Value::String(s.clone()),
            HostValue::Node(rc) => rc,
        };

        // Functions never recurse, so they skip both guards.
        if !matches!(rc.as_ref(), HostNode::Function { .. }) {
            if depth > self.max_depth {
                return Value::String(MAX_DEPTH_SENTINEL.to_string());
            }
            if !self.visited.insert(Rc::as_ptr(rc)) {
                return Value::String(CIRCULAR_SENTINEL.to_string());
            }
        }

        match rc.as_ref() {
            HostNode::Function { name } => Value::String(function_sentinel(name)),
            HostNode::Date { epoch_ms } => tagged("Date", [("value", number(*epoch_ms))]),
            HostNode::Pattern { source, flags } => tagged(
                "RegExp",
                [
                    ("source", Value::String(source.clone())),
                    ("flags", Value::String(flags.clone())),
                ],
            ),
            HostNode::Array(items) => Value::Array(
                items
                    .get()
                    .map(|items| {
                        items
                            .iter()
                            .map(|item| self.serialize(item, depth + 1))
                            .collect()
                    })
                    .unwrap_or_default(),
            ),
            HostNode::Object(obj) => Value::Object(self.object(obj, depth)),
            // Wrappers are transparent for depth: only their payload is shown.
            HostNode::Boxed(inner) => {
                let inner = match inner.get() {
                    Some(v) => self.serialize(v, depth),
                    None => Value::Null,
                };
                tagged("Ref", [("value", inner)])
            }
            HostNode::Tracked(obj) => {
                let inner = Value::Object(self.object(obj, depth));
                tagged("Reactive", [("value", inner)])
            }
        }
    }

    fn object(&mut self, obj: &HostObject, depth: usize) -> Map<String, Value> {
        let mut map = Map::new();
        if let Some(ctor) = obj.constructor().filter(|c| *c != "Object") {
            map.insert(TYPE_MARKER.to_string(), Value::String(ctor.to_string()));
        }
        for (key, field) in obj.fields() {
            if is_private_key(key) {
                continue;
            }
            let value = match field {
                Ok(v) => self.serialize(v, depth + 1),
                Err(e) => Value::String(error_sentinel(&e.0)),
            };
            map.insert(key.clone(), value);
        }
        map
    }
}

fn tagged<const N: usize>(kind: &str, fields: [(&str, Value); N]) -> Value {
    let mut map = Map::new();
    map.insert(TYPE_MARKER.to_string(), Value::String(kind.to_string()));
    for (k, v) in fields {
        map.insert(k.to_string(), v);
    }
    Value::Object(map)
}

/// JSON has no NaN or infinities; integral values print without a fraction.
fn number(n: f64) -> Value {
    if n.is_nan() {
        Value::String("NaN".to_string())
    } else if n.is_infinite() {
        let s = if n > 0.0 { "Infinity" } else { "-Infinity" };
        Value::String(s.to_string())
    } else if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::FieldError;
    use serde_json::json;

    #[test]
    fn test_primitives_pass_through() {
        assert_eq!(serialize(&HostValue::Null, 3), Value::Null);
        assert_eq!(serialize(&HostValue::from(true), 3), json!(true));
        assert_eq!(serialize(&HostValue::from(2), 3), json!(2));
        assert_eq!(serialize(&HostValue::from(2.5), 3), json!(2.5));
        assert_eq!(serialize(&HostValue::from("hi"), 3), json!("hi"));
        assert_eq!(serialize(&HostValue::from(f64::NAN), 3), json!("NaN"));
        assert_eq!(
            serialize(&HostValue::from(f64::NEG_INFINITY), 3),
            json!("-Infinity")
        );
    }

    #[test]
    fn test_function_sentinel() {
        let v = serialize(&HostValue::function("onClick"), 3);
        assert_eq!(v, json!("[Function: onClick]"));
        assert!(is_function_sentinel(&v));
        assert_eq!(
            serialize(&HostValue::function(""), 3),
            json!("[Function: anonymous]")
        );
        assert!(!is_function_sentinel(&json!("onClick")));
    }

    #[test]
    fn test_max_depth() {
        let deep = HostValue::object([(
            "a",
            HostValue::object([("b", HostValue::object([("c", HostValue::from(1))]))]),
        )]);
        let v = serialize(&deep, 1);
        assert_eq!(v, json!({"a": {"b": MAX_DEPTH_SENTINEL}}));

        // Primitives are never cut off.
        let shallow = HostValue::object([("n", HostValue::from(1))]);
        assert_eq!(serialize(&shallow, 0), json!({"n": 1}));
    }

    #[test]
    fn test_self_reference_terminates() {
        let obj = HostValue::empty_object();
        obj.fill_fields(vec![
            ("name".into(), Ok(HostValue::from("root"))),
            ("me".into(), Ok(obj.clone())),
        ]);
        let v = serialize(&obj, 50);
        assert_eq!(v, json!({"name": "root", "me": CIRCULAR_SENTINEL}));
    }

    #[test]
    fn test_shared_value_serialized_once() {
        let shared = HostValue::object([("x", HostValue::from(1))]);
        let root = HostValue::object([("a", shared.clone()), ("b", shared)]);
        let v = serialize(&root, 5);
        assert_eq!(v, json!({"a": {"x": 1}, "b": CIRCULAR_SENTINEL}));
    }

    #[test]
    fn test_wrappers_unwrapped_and_tagged() {
        let boxed = HostValue::boxed(HostValue::from(3));
        assert_eq!(serialize(&boxed, 3), json!({"__type": "Ref", "value": 3}));

        let tracked = HostValue::tracked([
            ("count", HostValue::from(1)),
            ("__v_raw", HostValue::from("internal")),
        ]);
        assert_eq!(
            serialize(&tracked, 3),
            json!({"__type": "Reactive", "value": {"count": 1}})
        );
    }

    #[test]
    fn test_private_keys_skipped() {
        let obj = HostValue::object([
            ("visible", HostValue::from(1)),
            ("_hidden", HostValue::from(2)),
            ("$parent", HostValue::from(3)),
        ]);
        assert_eq!(serialize(&obj, 3), json!({"visible": 1}));
    }

    #[test]
    fn test_field_error_isolated() {
        let obj = HostValue::object_with(vec![
            ("ok".into(), Ok(HostValue::from(1))),
            ("bad".into(), Err(FieldError("getter threw".into()))),
            ("after".into(), Ok(HostValue::from(2))),
        ]);
        assert_eq!(
            serialize(&obj, 3),
            json!({"ok": 1, "bad": "[Error: getter threw]", "after": 2})
        );
    }

    #[test]
    fn test_typed_values() {
        let inst = HostValue::instance("Point", [("x", HostValue::from(1))]);
        assert_eq!(serialize(&inst, 3), json!({"__type": "Point", "x": 1}));

        let date = HostValue::date(1_000.0);
        assert_eq!(serialize(&date, 3), json!({"__type": "Date", "value": 1000}));

        let re = HostValue::pattern("a+", "g");
        assert_eq!(
            serialize(&re, 3),
            json!({"__type": "RegExp", "source": "a+", "flags": "g"})
        );
    }

    #[test]
    fn test_key_order_preserved() {
        let obj = HostValue::object([
            ("z", HostValue::from(1)),
            ("a", HostValue::from(2)),
            ("m", HostValue::from(3)),
        ]);
        let v = serialize(&obj, 3);
        let keys: Vec<&String> = v.as_object().unwrap().keys().collect();
        assert_eq!(keys, ["z", "a", "m"]);
    }
}
