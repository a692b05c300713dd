//! Property flattening and dotted-path lookup.
//!
//! Host variables must be plain JSON. Typed VM fields convert directly; the
//! free-form [`VirtualMachine::other`] map holds [`PropertyValue`] trees
//! decoded from the backend, which may contain nested data objects,
//! attributes the session is not allowed to read, or methods. [`flatten`]
//! turns any such tree into JSON without ever failing:
//!
//! - values that are already JSON-safe are returned unchanged;
//! - data objects become maps keyed by lower-cased attribute names, visited
//!   in sorted order, skipping `_`-prefixed names, a small deny-list,
//!   methods, and unreadable attributes;
//! - nesting stops after [`MAX_DEPTH`] levels. Deeper objects come out as
//!   empty or partial maps.
//!
//! [`get_object_prop`] resolves a dotted path such as
//! `config.hardware.numCPU`. Known paths go through a static table of
//! extractors on the typed schema; everything else walks `other`.

use std::collections::BTreeMap;

use serde_json::{json, Map, Value};

use crate::models::{VirtualMachine, VmConfig};

/// Maximum recursion depth below the root value.
pub const MAX_DEPTH: usize = 2;

/// Special property that expands into one variable per custom attribute.
pub const CUSTOM_VALUE: &str = "customValue";

/// Attribute names that are never expanded.
const DENIED_ATTRIBUTES: [&str; 3] = ["Array", "disabledMethod", "declaredAlarmState"];

/// Dynamic value decoded from the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// Leaf text the backend sent without a declared type. Emitted as a
    /// number or boolean when it reads as one, otherwise as a string.
    Text(String),
    List(Vec<PropertyValue>),
    Object(DataObject),
}

/// A backend data object: a type name plus ordered, named attributes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataObject {
    pub type_name: String,
    pub attributes: Vec<(String, Attribute)>,
}

/// Outcome of reading one attribute of a [`DataObject`].
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    Value(PropertyValue),
    /// A method, not data.
    Method,
    /// The session lacks the privilege to read this attribute.
    Denied,
    /// Reading the attribute failed for another reason.
    Unreadable(String),
}

impl DataObject {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            attributes: Vec::new(),
        }
    }

    /// Builder-style helper appending a readable attribute.
    pub fn with(mut self, name: impl Into<String>, value: PropertyValue) -> Self {
        self.attributes.push((name.into(), Attribute::Value(value)));
        self
    }

    /// Builder-style helper appending an attribute with an explicit outcome.
    pub fn with_attribute(mut self, name: impl Into<String>, attribute: Attribute) -> Self {
        self.attributes.push((name.into(), attribute));
        self
    }

    /// First readable attribute with this exact name.
    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, attr)| match attr {
                Attribute::Value(v) => Some(v),
                _ => None,
            })
    }
}

impl PropertyValue {
    /// Whether the value can be emitted as JSON without flattening.
    pub fn is_serializable(&self) -> bool {
        match self {
            PropertyValue::Object(_) => false,
            PropertyValue::List(items) => items.iter().all(PropertyValue::is_serializable),
            _ => true,
        }
    }

    /// Child lookup used by dotted paths: attribute name on objects,
    /// numeric index on lists.
    pub fn attribute(&self, name: &str) -> Option<&PropertyValue> {
        match self {
            PropertyValue::Object(obj) => obj.get(name),
            PropertyValue::List(items) => name.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) | PropertyValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Boolean view; accepts the string forms the SOAP decoder leaves behind.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(b) => Some(*b),
            PropertyValue::String(s) | PropertyValue::Text(s) => match s.as_str() {
                "true" | "1" => Some(true),
                "false" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// Integer view; accepts numeric strings.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(i) => Some(*i),
            PropertyValue::String(s) | PropertyValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn to_json(&self) -> Value {
        match self {
            PropertyValue::Null => Value::Null,
            PropertyValue::Bool(b) => Value::Bool(*b),
            PropertyValue::Int(i) => Value::from(*i),
            // NaN and infinities have no JSON form.
            PropertyValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            PropertyValue::String(s) => Value::String(s.clone()),
            PropertyValue::Text(s) => infer_scalar(s),
            PropertyValue::List(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            PropertyValue::Object(_) => Value::Object(Map::new()),
        }
    }
}

/// Typed JSON for untyped leaf text: `true`/`false`, canonical integers
/// and plain decimals. Anything else, including leading zeros, stays a
/// string.
fn infer_scalar(text: &str) -> Value {
    match text {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }

    let digits = text.strip_prefix('-').unwrap_or(text);
    let (int_part, frac_part) = match digits.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (digits, None),
    };
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    let canonical = all_digits(int_part) && (int_part == "0" || !int_part.starts_with('0'));

    match frac_part {
        None if canonical => text
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(text.to_string())),
        Some(frac) if canonical && all_digits(frac) => text
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(text.to_string())),
        _ => Value::String(text.to_string()),
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::String(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::String(s)
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        PropertyValue::Bool(b)
    }
}

impl From<i64> for PropertyValue {
    fn from(i: i64) -> Self {
        PropertyValue::Int(i)
    }
}

impl<T: Into<PropertyValue>> From<Option<T>> for PropertyValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(PropertyValue::Null)
    }
}

/// Convert any property value into JSON. Never fails.
pub fn flatten(value: &PropertyValue) -> Value {
    flatten_at(value, 0)
}

fn flatten_at(value: &PropertyValue, level: usize) -> Value {
    if value.is_serializable() {
        return value.to_json();
    }

    match value {
        PropertyValue::Object(obj) => {
            let mut attributes: Vec<&(String, Attribute)> = obj
                .attributes
                .iter()
                .filter(|(name, _)| {
                    !name.starts_with('_') && !DENIED_ATTRIBUTES.contains(&name.as_str())
                })
                .collect();
            attributes.sort_by(|a, b| a.0.cmp(&b.0));

            let mut out = Map::new();
            for (name, attribute) in attributes {
                let inner = match attribute {
                    Attribute::Value(v) => v,
                    Attribute::Method | Attribute::Denied => continue,
                    Attribute::Unreadable(reason) => {
                        tracing::trace!(
                            object = %obj.type_name,
                            attribute = %name,
                            "skipping unreadable attribute: {}",
                            reason
                        );
                        continue;
                    }
                };
                if level < MAX_DEPTH {
                    out.insert(name.to_lowercase(), flatten_at(inner, level + 1));
                }
            }
            Value::Object(out)
        }
        PropertyValue::List(items) => {
            Value::Array(items.iter().map(|item| flatten_at(item, level)).collect())
        }
        other => other.to_json(),
    }
}

// ============ Dotted-path lookup ============

type Extractor = fn(&VirtualMachine) -> Value;

/// Leaf paths answered from the typed schema. Containers such as `guest`
/// are fetched whole from the backend and resolved through `other`.
const KNOWN_PROPERTIES: &[(&str, Extractor)] = &[
    ("name", |vm| Value::String(vm.name.clone())),
    ("config.uuid", |vm| config_value(vm, |c| json!(c.uuid))),
    ("config.instanceUuid", |vm| {
        config_value(vm, |c| opt(c.instance_uuid.clone()))
    }),
    ("config.guestId", |vm| config_value(vm, |c| opt(c.guest_id.clone()))),
    ("config.guestFullName", |vm| {
        config_value(vm, |c| opt(c.guest_full_name.clone()))
    }),
    ("config.name", |vm| config_value(vm, |c| opt(c.name.clone()))),
    ("config.template", |vm| config_value(vm, |c| opt(c.template))),
    ("config.cpuHotAddEnabled", |vm| {
        config_value(vm, |c| opt(c.cpu_hot_add_enabled))
    }),
    ("config.cpuHotRemoveEnabled", |vm| {
        config_value(vm, |c| opt(c.cpu_hot_remove_enabled))
    }),
    ("config.hardware.numCPU", |vm| {
        config_value(vm, |c| opt(c.hardware.num_cpu))
    }),
    ("config.hardware.memoryMB", |vm| {
        config_value(vm, |c| opt(c.hardware.memory_mb))
    }),
    ("guest.hostName", |vm| opt(vm.guest.host_name.clone())),
    ("guest.ipAddress", |vm| opt(vm.guest.ip_address.clone())),
    ("guest.guestId", |vm| opt(vm.guest.guest_id.clone())),
    ("guest.guestFullName", |vm| opt(vm.guest.guest_full_name.clone())),
    ("guest.guestState", |vm| opt(vm.guest.guest_state.clone())),
    ("runtime.powerState", |vm| json!(vm.runtime.power_state)),
    ("runtime.maxMemoryUsage", |vm| opt(vm.runtime.max_memory_usage)),
    ("summary.runtime.powerState", |vm| json!(vm.runtime.power_state)),
];

/// Whether `path` is answered from the typed schema.
pub fn is_known_property(path: &str) -> bool {
    path == CUSTOM_VALUE || KNOWN_PROPERTIES.iter().any(|(p, _)| *p == path)
}

/// Resolve a dotted property path against a VM. Returns `null` when any
/// step is missing. Never fails.
pub fn get_object_prop(vm: &VirtualMachine, path: &str) -> Value {
    if let Some((_, extract)) = KNOWN_PROPERTIES.iter().find(|(p, _)| *p == path) {
        return extract(vm);
    }
    resolve_other(&vm.other, path)
        .map(flatten)
        .unwrap_or(Value::Null)
}

/// Walk the free-form map, starting from the longest stored key that is a
/// prefix of `path`.
fn resolve_other<'a>(
    other: &'a BTreeMap<String, PropertyValue>,
    path: &str,
) -> Option<&'a PropertyValue> {
    let segments: Vec<&str> = path.split('.').collect();
    for split in (1..=segments.len()).rev() {
        let prefix = segments[..split].join(".");
        if let Some(root) = other.get(&prefix) {
            return segments[split..]
                .iter()
                .try_fold(root, |current, segment| current.attribute(segment));
        }
    }
    None
}

fn opt<T: Into<Value>>(value: Option<T>) -> Value {
    value.map(Into::into).unwrap_or(Value::Null)
}

fn config_value(vm: &VirtualMachine, f: impl Fn(&VmConfig) -> Value) -> Value {
    vm.config.as_ref().map(f).unwrap_or(Value::Null)
}
