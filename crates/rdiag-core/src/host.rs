//! Attribute value graph as handed over by the host runtime.
//!
//! Values with identity (objects, arrays, functions, dates, patterns and the
//! host's wrapper containers) live behind `Rc<HostNode>`, so two attribute
//! maps can share a value and the engine can tell "same object" from "equal
//! object". Node contents are written once through `OnceCell`, which lets a
//! caller allocate a node first and close a cycle afterwards.

use std::cell::OnceCell;
use std::fmt;
use std::rc::{Rc, Weak};

/// A field getter that failed on the host side.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldError(pub String);

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One object field: either its value or the error raised while reading it.
pub type HostField = Result<HostValue, FieldError>;

#[derive(Clone, Debug)]
pub enum HostValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Node(Rc<HostNode>),
}

pub enum HostNode {
    Object(HostObject),
    Array(OnceCell<Vec<HostValue>>),
    Function { name: String },
    Date { epoch_ms: f64 },
    Pattern { source: String, flags: String },
    /// Single-value box of the host's state model.
    Boxed(OnceCell<HostValue>),
    /// Proxy-tracked object of the host's state model.
    Tracked(HostObject),
}

/// Field list plus the constructor name, if the object is a class instance.
pub struct HostObject {
    constructor: Option<String>,
    fields: OnceCell<Vec<(String, HostField)>>,
}

impl HostObject {
    fn new(constructor: Option<String>) -> Self {
        Self {
            constructor,
            fields: OnceCell::new(),
        }
    }

    fn with_fields(constructor: Option<String>, fields: Vec<(String, HostField)>) -> Self {
        let obj = Self::new(constructor);
        let _ = obj.fields.set(fields);
        obj
    }

    pub fn constructor(&self) -> Option<&str> {
        self.constructor.as_deref()
    }

    /// Fields in insertion order. Empty until filled.
    pub fn fields(&self) -> &[(String, HostField)] {
        self.fields.get().map(Vec::as_slice).unwrap_or(&[])
    }
}

// Shallow on purpose: a derived impl would loop forever on cyclic graphs.
impl fmt::Debug for HostNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostNode::Object(obj) => write!(
                f,
                "Object({}, {} fields)",
                obj.constructor().unwrap_or("Object"),
                obj.fields().len()
            ),
            HostNode::Array(items) => {
                write!(f, "Array({})", items.get().map_or(0, Vec::len))
            }
            HostNode::Function { name } => write!(f, "Function({name})"),
            HostNode::Date { epoch_ms } => write!(f, "Date({epoch_ms})"),
            HostNode::Pattern { source, flags } => write!(f, "Pattern(/{source}/{flags})"),
            HostNode::Boxed(_) => f.write_str("Boxed"),
            HostNode::Tracked(obj) => write!(f, "Tracked({} fields)", obj.fields().len()),
        }
    }
}

/// Identity of a node captured without keeping the node alive.
///
/// The weak count pins the allocation, so two tokens compare equal only if
/// they were taken from the very same node.
#[derive(Clone)]
pub struct RefToken(Weak<HostNode>);

impl RefToken {
    pub fn same(&self, other: &RefToken) -> bool {
        Weak::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for RefToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RefToken({:p})", self.0.as_ptr())
    }
}

fn node(n: HostNode) -> HostValue {
    HostValue::Node(Rc::new(n))
}

fn ok_fields<K: Into<String>>(
    fields: impl IntoIterator<Item = (K, HostValue)>,
) -> Vec<(String, HostField)> {
    fields.into_iter().map(|(k, v)| (k.into(), Ok(v))).collect()
}

impl HostValue {
    pub fn object<K: Into<String>>(fields: impl IntoIterator<Item = (K, HostValue)>) -> Self {
        node(HostNode::Object(HostObject::with_fields(None, ok_fields(fields))))
    }

    /// Object whose fields may individually fail to read.
    pub fn object_with(fields: Vec<(String, HostField)>) -> Self {
        node(HostNode::Object(HostObject::with_fields(None, fields)))
    }

    pub fn instance<K: Into<String>>(
        constructor: &str,
        fields: impl IntoIterator<Item = (K, HostValue)>,
    ) -> Self {
        node(HostNode::Object(HostObject::with_fields(
            Some(constructor.to_string()),
            ok_fields(fields),
        )))
    }

    pub fn array(items: impl IntoIterator<Item = HostValue>) -> Self {
        let cell = OnceCell::new();
        let _ = cell.set(items.into_iter().collect());
        node(HostNode::Array(cell))
    }

    pub fn function(name: &str) -> Self {
        node(HostNode::Function {
            name: name.to_string(),
        })
    }

    pub fn date(epoch_ms: f64) -> Self {
        node(HostNode::Date { epoch_ms })
    }

    pub fn pattern(source: &str, flags: &str) -> Self {
        node(HostNode::Pattern {
            source: source.to_string(),
            flags: flags.to_string(),
        })
    }

    pub fn boxed(inner: HostValue) -> Self {
        let cell = OnceCell::new();
        let _ = cell.set(inner);
        node(HostNode::Boxed(cell))
    }

    pub fn tracked<K: Into<String>>(fields: impl IntoIterator<Item = (K, HostValue)>) -> Self {
        node(HostNode::Tracked(HostObject::with_fields(
            None,
            ok_fields(fields),
        )))
    }

    /// Unfilled plain object, to be completed with [`HostValue::fill_fields`].
    pub fn empty_object() -> Self {
        node(HostNode::Object(HostObject::new(None)))
    }

    /// Unfilled class instance, to be completed with [`HostValue::fill_fields`].
    pub fn empty_instance(constructor: &str) -> Self {
        node(HostNode::Object(HostObject::new(Some(constructor.to_string()))))
    }

    /// Unfilled tracked object, to be completed with [`HostValue::fill_fields`].
    pub fn empty_tracked() -> Self {
        node(HostNode::Tracked(HostObject::new(None)))
    }

    /// Unfilled array, to be completed with [`HostValue::fill_items`].
    pub fn empty_array() -> Self {
        node(HostNode::Array(OnceCell::new()))
    }

    /// Unfilled box, to be completed with [`HostValue::fill_inner`].
    pub fn empty_boxed() -> Self {
        node(HostNode::Boxed(OnceCell::new()))
    }

    /// Set the fields of an unfilled object. False if not an object or
    /// already filled.
    pub fn fill_fields(&self, fields: Vec<(String, HostField)>) -> bool {
        match self.as_node() {
            Some(HostNode::Object(obj)) | Some(HostNode::Tracked(obj)) => {
                obj.fields.set(fields).is_ok()
            }
            _ => false,
        }
    }

    pub fn fill_items(&self, items: Vec<HostValue>) -> bool {
        match self.as_node() {
            Some(HostNode::Array(cell)) => cell.set(items).is_ok(),
            _ => false,
        }
    }

    pub fn fill_inner(&self, inner: HostValue) -> bool {
        match self.as_node() {
            Some(HostNode::Boxed(cell)) => cell.set(inner).is_ok(),
            _ => false,
        }
    }

    pub fn as_node(&self) -> Option<&HostNode> {
        match self {
            HostValue::Node(rc) => Some(rc.as_ref()),
            _ => None,
        }
    }

    /// Identity token for values that have one.
    pub fn identity(&self) -> Option<RefToken> {
        match self {
            HostValue::Node(rc) => Some(RefToken(Rc::downgrade(rc))),
            _ => None,
        }
    }

    /// True if both values are the same node.
    pub fn same_node(&self, other: &HostValue) -> bool {
        match (self, other) {
            (HostValue::Node(a), HostValue::Node(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        HostValue::Bool(b)
    }
}

impl From<i32> for HostValue {
    fn from(n: i32) -> Self {
        HostValue::Number(f64::from(n))
    }
}

impl From<i64> for HostValue {
    fn from(n: i64) -> Self {
        HostValue::Number(n as f64)
    }
}

impl From<f64> for HostValue {
    fn from(n: f64) -> Self {
        HostValue::Number(n)
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        HostValue::String(s.to_string())
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        HostValue::String(s)
    }
}
