//! Label sets attached to measurements
use serde::Serialize;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A label value
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    I64(i64),
    F64(f64),
    String(String),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::I64(a), Value::I64(b)) => a == b,
            (Value::F64(a), Value::F64(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Bool(v) => v.hash(state),
            Value::I64(v) => v.hash(state),
            Value::F64(v) => v.to_bits().hash(state),
            Value::String(v) => v.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{}", v),
            Value::I64(v) => write!(f, "{}", v),
            Value::F64(v) => write!(f, "{}", v),
            Value::String(v) => f.write_str(v),
        }
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

/// A single key/value attribute
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct KeyValue {
    pub key: String,
    pub value: Value,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn string(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(key, Value::String(value.into()))
    }

    pub fn i64(key: impl Into<String>, value: i64) -> Self {
        Self::new(key, Value::I64(value))
    }

    pub fn f64(key: impl Into<String>, value: f64) -> Self {
        Self::new(key, Value::F64(value))
    }

    pub fn bool(key: impl Into<String>, value: bool) -> Self {
        Self::new(key, Value::Bool(value))
    }
}

/// Renders a label set into a string
pub trait LabelEncoder: Send + Sync {
    fn encode(&self, labels: &[KeyValue]) -> String;
}

/// `key=value` pairs joined by commas, escaping `,`, `=` and `\`.
///
/// Non-string values carry a type tag (`int:`, `float:`, `bool:`) and `:` is
/// escaped in string values, so `x="1"` and `x=1` encode differently.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultEncoder;

impl DefaultEncoder {
    fn escape_into(out: &mut String, s: &str, special: &[char]) {
        for c in s.chars() {
            if special.contains(&c) {
                out.push('\\');
            }
            out.push(c);
        }
    }

    fn encode_value(out: &mut String, value: &Value) {
        match value {
            Value::String(v) => Self::escape_into(out, v, &[',', '=', '\\', ':']),
            Value::I64(v) => out.push_str(&format!("int:{}", v)),
            Value::F64(v) => out.push_str(&format!("float:{}", v)),
            Value::Bool(v) => out.push_str(&format!("bool:{}", v)),
        }
    }
}

impl LabelEncoder for DefaultEncoder {
    fn encode(&self, labels: &[KeyValue]) -> String {
        let mut out = String::new();
        for (i, kv) in labels.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            Self::escape_into(&mut out, &kv.key, &[',', '=', '\\']);
            out.push('=');
            Self::encode_value(&mut out, &kv.value);
        }
        out
    }
}

/// A canonical, immutable set of labels.
///
/// Labels are sorted by key; when a key is repeated the last value wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct LabelSet {
    labels: Vec<KeyValue>,
    #[serde(skip)]
    encoded: String,
}

impl LabelSet {
    pub fn new<I>(labels: I) -> Self
    where
        I: IntoIterator<Item = KeyValue>,
    {
        let mut labels: Vec<KeyValue> = labels.into_iter().collect();
        // Stable sort keeps insertion order among equal keys, so the last one
        // is the one to keep.
        labels.sort_by(|a, b| a.key.cmp(&b.key));
        let mut deduped: Vec<KeyValue> = Vec::with_capacity(labels.len());
        for kv in labels {
            match deduped.last_mut() {
                Some(last) if last.key == kv.key => *last = kv,
                _ => deduped.push(kv),
            }
        }
        Self::from_sorted(deduped)
    }

    pub fn empty() -> Self {
        Self::default()
    }

    fn from_sorted(labels: Vec<KeyValue>) -> Self {
        let encoded = DefaultEncoder.encode(&labels);
        Self { labels, encoded }
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyValue> {
        self.labels.iter()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.labels
            .binary_search_by(|kv| kv.key.as_str().cmp(key))
            .ok()
            .map(|i| &self.labels[i].value)
    }

    /// Canonical encoding produced by [`DefaultEncoder`]
    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    /// Encode with a caller-provided encoder
    pub fn encode_with(&self, encoder: &dyn LabelEncoder) -> String {
        encoder.encode(&self.labels)
    }

    /// Keep only the labels whose key is in `keys`
    pub fn filtered(&self, keys: &[String]) -> LabelSet {
        let kept: Vec<KeyValue> = self
            .labels
            .iter()
            .filter(|kv| keys.iter().any(|k| k == &kv.key))
            .cloned()
            .collect();
        if kept.len() == self.labels.len() {
            return self.clone();
        }
        Self::from_sorted(kept)
    }
}

impl From<&[KeyValue]> for LabelSet {
    fn from(labels: &[KeyValue]) -> Self {
        LabelSet::new(labels.iter().cloned())
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}
