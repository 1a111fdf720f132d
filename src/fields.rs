//! Dotted-path extraction over JSON reports and key normalisation.
//!
//! A path such as `assemblyInfo.biosample.attributes.name==isolate.value`
//! walks objects by key. When the current value is an array, a `key==value`
//! segment keeps the elements whose `key` is the string `value`, and a plain
//! segment collects `key` from every element that has it, flattening nested
//! arrays one level.

use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Segment {
    raw: String,
    filter: Option<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    segments: Vec<Segment>,
}

impl FieldPath {
    pub fn parse(path: &str) -> Self {
        let segments = path
            .split('.')
            .map(|raw| Segment {
                raw: raw.to_string(),
                filter: raw
                    .split_once("==")
                    .map(|(key, value)| (key.to_string(), value.to_string())),
            })
            .collect();
        Self { segments }
    }

    /// Applies the path, returning `Value::Null` where it leads nowhere.
    pub fn extract(&self, data: &Value) -> Value {
        match data {
            Value::Object(map) => self.extract_map(map),
            _ => self.walk(data.clone(), &self.segments),
        }
    }

    /// Same as [`FieldPath::extract`] without cloning the whole record first.
    pub fn extract_map(&self, map: &Map<String, Value>) -> Value {
        let Some((first, rest)) = self.segments.split_first() else {
            return Value::Object(map.clone());
        };
        let start = map.get(&first.raw).cloned().unwrap_or(Value::Null);
        self.walk(start, rest)
    }

    fn walk(&self, start: Value, segments: &[Segment]) -> Value {
        let mut current = start;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(&segment.raw).cloned().unwrap_or(Value::Null),
                Value::Array(items) => select_from_array(items, segment),
                _ => return Value::Null,
            };
        }
        current
    }
}

impl FromStr for FieldPath {
    type Err = std::convert::Infallible;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(value))
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .segments
            .iter()
            .map(|segment| segment.raw.as_str())
            .collect::<Vec<_>>()
            .join(".");
        write!(f, "{joined}")
    }
}

fn select_from_array(items: Vec<Value>, segment: &Segment) -> Value {
    if let Some((key, expected)) = &segment.filter {
        let kept = items
            .into_iter()
            .filter(|item| {
                item.get(key)
                    .and_then(Value::as_str)
                    .map(|value| value == expected)
                    .unwrap_or(false)
            })
            .collect();
        return Value::Array(kept);
    }
    let mut flat = Vec::new();
    for item in items {
        let Value::Object(mut map) = item else {
            continue;
        };
        match map.remove(&segment.raw) {
            Some(Value::Array(nested)) => flat.extend(nested),
            Some(value) => flat.push(value),
            None => {}
        }
    }
    Value::Array(flat)
}

/// Rewrites every object key from snake_case to camelCase, recursively.
pub fn camel_case_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut converted = Map::with_capacity(map.len());
            for (key, value) in map {
                converted.insert(camel_case(&key), camel_case_keys(value));
            }
            Value::Object(converted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(camel_case_keys).collect()),
        other => other,
    }
}

pub fn camel_case(key: &str) -> String {
    if !key.contains('_') {
        return key.to_string();
    }
    let mut out = String::with_capacity(key.len());
    for (index, word) in key.split('_').enumerate() {
        if index == 0 {
            out.push_str(word);
            continue;
        }
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.push_str(&chars.as_str().to_lowercase());
        }
    }
    out
}
