//! Raw labeled text records

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// One training example: named text fields such as `question` and `answer`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord {
    fields: BTreeMap<String, String>,
}

impl RawRecord {
    /// Create an empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field insertion
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert or replace a field
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Get a field by name
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Iterate over fields in name order
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True if the record has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Build a record from a JSON object
    ///
    /// Strings are kept as-is, numbers and booleans are rendered with their
    /// JSON text, `null` fields are dropped and nested arrays or objects are
    /// stored as compact JSON.
    pub fn from_json(value: Value) -> Result<Self> {
        let map = match value {
            Value::Object(map) => map,
            other => anyhow::bail!("Expected a JSON object, found: {}", other),
        };

        let mut record = Self::new();
        for (name, value) in map {
            let text = match value {
                Value::Null => continue,
                Value::String(s) => s,
                scalar @ (Value::Bool(_) | Value::Number(_)) => scalar.to_string(),
                nested @ (Value::Array(_) | Value::Object(_)) => serde_json::to_string(&nested)
                    .with_context(|| format!("Failed to encode field `{}`", name))?,
            };
            record.insert(name, text);
        }
        Ok(record)
    }

    /// Parse one JSON line into a record
    pub fn from_json_str(line: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(line).context("Invalid JSON")?;
        Self::from_json(value)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RawRecord {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}
