//! JSON-lines lifecycle traces and their replay onto an [`Engine`].
//!
//! A trace is one [`TraceEvent`] per line. Attribute maps are plain JSON
//! with `$`-markers for the host values JSON cannot express:
//!
//! | marker                              | host value                  |
//! |-------------------------------------|-----------------------------|
//! | `{"$fn": "name"}`                   | function                    |
//! | `{"$date": 1700000000000}`          | date (epoch ms)             |
//! | `{"$regexp": "a+", "flags": "g"}`   | pattern                     |
//! | `{"$ref": v}`                       | boxed value                 |
//! | `{"$reactive": {..}}`               | tracked object              |
//! | `{"$class": "Name", ..fields}`      | class instance              |
//! | `{"$error": "msg"}`                 | field whose getter throws   |
//!
//! Any marker object or plain object may carry `"$id"`. The first occurrence
//! defines the node; later occurrences (in any event) resolve to the same
//! node, which is how a trace expresses "same reference" and cycles.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::engine::{CycleInput, Engine};
use crate::entity::{EntityId, EntityInfo};
use crate::error::TraceError;
use crate::host::{FieldError, HostField, HostValue};
use crate::sampler::{AuxEvent, SignalKind};

const ID_KEY: &str = "$id";
const PLAIN_SKIP: &[&str] = &[ID_KEY];
const CLASS_SKIP: &[&str] = &["$class", ID_KEY];

/// Payload of `mount` and `updated` events.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleEvent {
    pub entity_id: u64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<u64>,
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    #[serde(default)]
    pub attributes_a: Map<String, Value>,
    #[serde(default)]
    pub attributes_b: Map<String, Value>,
}

impl CycleEvent {
    fn entity(&self) -> EntityInfo {
        EntityInfo {
            id: EntityId(self.entity_id),
            display_name: self.name.clone(),
            parent_id: self.parent_id.map(EntityId),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum TraceEvent {
    Mount(CycleEvent),
    BeforeUpdate {
        entity_id: u64,
    },
    Signal {
        entity_id: u64,
        kind: SignalKind,
        target: String,
        #[serde(default)]
        derived: bool,
    },
    Updated(CycleEvent),
    Unmount {
        entity_id: u64,
        timestamp: f64,
    },
}

impl TraceEvent {
    /// Event time, for the events that carry one.
    pub fn timestamp(&self) -> Option<f64> {
        match self {
            TraceEvent::Mount(c) | TraceEvent::Updated(c) => Some(c.timestamp),
            TraceEvent::Unmount { timestamp, .. } => Some(*timestamp),
            TraceEvent::BeforeUpdate { .. } | TraceEvent::Signal { .. } => None,
        }
    }
}

/// Parse one trace line. Blank lines and `#` comments yield `None`.
pub fn parse_line(line: &str) -> Result<Option<TraceEvent>, TraceError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(line)?))
}

/// Parse a whole trace. Errors carry their 1-based line number.
pub fn parse_trace(input: &str) -> Result<Vec<TraceEvent>, TraceError> {
    let mut events = Vec::new();
    for (i, line) in input.lines().enumerate() {
        let parsed = parse_line(line).map_err(|e| TraceError::Line {
            line: i + 1,
            source: Box::new(e),
        })?;
        events.extend(parsed);
    }
    Ok(events)
}

fn invalid(msg: impl Into<String>) -> TraceError {
    TraceError::InvalidMarker(msg.into())
}

/// Turns marker-annotated JSON into host values, keeping `$id` identities
/// alive for the whole trace.
#[derive(Default)]
pub struct TraceDecoder {
    nodes: HashMap<String, HostValue>,
}

impl TraceDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `$id` nodes defined so far.
    pub fn defined(&self) -> usize {
        self.nodes.len()
    }

    /// Decode an attribute map into host fields. `{"$error": ..}` becomes a
    /// failing field.
    pub fn decode_fields(
        &mut self,
        map: &Map<String, Value>,
    ) -> Result<Vec<(String, HostField)>, TraceError> {
        let mut fields = Vec::with_capacity(map.len());
        for (key, value) in map {
            fields.push((key.clone(), self.decode_field(value)?));
        }
        Ok(fields)
    }

    fn decode_field(&mut self, value: &Value) -> Result<HostField, TraceError> {
        if let Value::Object(map) = value
            && let Some(msg) = map.get("$error")
        {
            let msg = msg
                .as_str()
                .ok_or_else(|| invalid("$error must be a string"))?;
            return Ok(Err(FieldError(msg.to_string())));
        }
        self.decode(value).map(Ok)
    }

    pub fn decode(&mut self, value: &Value) -> Result<HostValue, TraceError> {
        match value {
            Value::Null => Ok(HostValue::Null),
            Value::Bool(b) => Ok(HostValue::Bool(*b)),
            Value::Number(n) => Ok(HostValue::Number(n.as_f64().unwrap_or(f64::NAN))),
            Value::String(s) => Ok(HostValue::String(s.clone())),
            Value::Array(items) => {
                let items = items
                    .iter()
                    .map(|v| self.decode(v))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(HostValue::array(items))
            }
            Value::Object(map) => self.decode_object(map),
        }
    }

    fn decode_object(&mut self, map: &Map<String, Value>) -> Result<HostValue, TraceError> {
        let id = match map.get(ID_KEY) {
            None => None,
            Some(Value::String(id)) => Some(id.as_str()),
            Some(other) => return Err(invalid(format!("$id must be a string, got {other}"))),
        };
        if let Some(existing) = id.and_then(|id| self.nodes.get(id)) {
            return Ok(existing.clone());
        }

        if let Some(name) = map.get("$fn") {
            let name = name.as_str().ok_or_else(|| invalid("$fn must be a string"))?;
            return Ok(self.register(id, HostValue::function(name)));
        }
        if let Some(ms) = map.get("$date") {
            let ms = ms.as_f64().ok_or_else(|| invalid("$date must be a number"))?;
            return Ok(self.register(id, HostValue::date(ms)));
        }
        if let Some(source) = map.get("$regexp") {
            let source = source
                .as_str()
                .ok_or_else(|| invalid("$regexp must be a string"))?;
            let flags = map.get("flags").and_then(Value::as_str).unwrap_or("");
            return Ok(self.register(id, HostValue::pattern(source, flags)));
        }
        if let Some(inner) = map.get("$ref") {
            let boxed = self.register(id, HostValue::empty_boxed());
            let inner = self.decode(inner)?;
            boxed.fill_inner(inner);
            return Ok(boxed);
        }
        if let Some(target) = map.get("$reactive") {
            let Value::Object(fields) = target else {
                return Err(invalid("$reactive must wrap an object"));
            };
            let tracked = self.register(id, HostValue::empty_tracked());
            let fields = self.decode_fields(fields)?;
            tracked.fill_fields(fields);
            return Ok(tracked);
        }
        if map.contains_key("$error") {
            return Err(invalid("$error is only valid as an object field"));
        }

        let (object, skip) = match map.get("$class") {
            Some(Value::String(name)) => (HostValue::empty_instance(name), CLASS_SKIP),
            Some(_) => return Err(invalid("$class must be a string")),
            None => (HostValue::empty_object(), PLAIN_SKIP),
        };
        let object = self.register(id, object);
        let mut fields = Vec::with_capacity(map.len());
        for (key, value) in map.iter().filter(|(k, _)| !skip.contains(&k.as_str())) {
            fields.push((key.clone(), self.decode_field(value)?));
        }
        object.fill_fields(fields);
        Ok(object)
    }

    fn register(&mut self, id: Option<&str>, value: HostValue) -> HostValue {
        if let Some(id) = id {
            self.nodes.insert(id.to_string(), value.clone());
        }
        value
    }
}

/// Feeds trace events into an engine.
#[derive(Default)]
pub struct Replayer {
    decoder: TraceDecoder,
    applied: usize,
    emitted: usize,
}

impl Replayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events applied so far.
    pub fn applied(&self) -> usize {
        self.applied
    }

    /// Records the engine produced for those events.
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    pub fn apply(&mut self, engine: &mut Engine, event: &TraceEvent) -> Result<(), TraceError> {
        let emitted = match event {
            TraceEvent::Mount(cycle) => {
                let input = self.cycle_input(cycle)?;
                engine.on_mount(&cycle.entity(), input).is_some()
            }
            TraceEvent::Updated(cycle) => {
                let input = self.cycle_input(cycle)?;
                engine.on_updated(&cycle.entity(), input).is_some()
            }
            TraceEvent::BeforeUpdate { entity_id } => {
                engine.on_before_update(EntityId(*entity_id));
                false
            }
            TraceEvent::Signal {
                entity_id,
                kind,
                target,
                derived,
            } => {
                let event = AuxEvent {
                    kind: *kind,
                    target: target.clone(),
                    derived: *derived,
                };
                engine.record_event(EntityId(*entity_id), event);
                false
            }
            TraceEvent::Unmount {
                entity_id,
                timestamp,
            } => {
                engine.on_unmount(EntityId(*entity_id), *timestamp);
                false
            }
        };
        self.applied += 1;
        if emitted {
            self.emitted += 1;
        }
        Ok(())
    }

    /// Apply every event in order, stopping at the first decoding error.
    pub fn replay<'a>(
        &mut self,
        engine: &mut Engine,
        events: impl IntoIterator<Item = &'a TraceEvent>,
    ) -> Result<(), TraceError> {
        for event in events {
            self.apply(engine, event)?;
        }
        Ok(())
    }

    fn cycle_input(&mut self, cycle: &CycleEvent) -> Result<CycleInput, TraceError> {
        Ok(CycleInput {
            timestamp: cycle.timestamp,
            duration_ms: cycle.duration_ms,
            attributes_a: self.decoder.decode_fields(&cycle.attributes_a)?,
            attributes_b: self.decoder.decode_fields(&cycle.attributes_b)?,
        })
    }
}
