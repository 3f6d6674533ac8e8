//! Heterogeneous, case-variant property map.
//!
//! [`Properties`] is the value store attached to every service registration,
//! component configuration, and configuration object.  Values are
//! [`serde_json::Value`] — the tagged union over `{bool, i64, f64, string,
//! vector, map}` — and lookups are **case-insensitive** while the originally
//! inserted key spelling is preserved for enumeration.
//!
//! Typed accessors ([`get_bool`](Properties::get_bool),
//! [`get_int`](Properties::get_int), …) return an error when the stored tag
//! does not match instead of panicking or coercing.

use std::collections::HashMap;

use serde::ser::SerializeMap;
use serde_json::Value;

use crate::error::{ServiceError, ServiceResult};

#[derive(Debug, Clone)]
struct Entry {
    /// Original key spelling as inserted.
    key: String,
    value: Value,
}

/// A heterogeneous key/value store with case-insensitive keys and typed access.
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use solder_core::Properties;
///
/// let props = Properties::from_json(json!({"Service.Ranking": 10, "tags": ["a", "b"]})).unwrap();
/// assert_eq!(props.get_int("service.ranking").unwrap(), 10);
/// assert!(props.get_bool("service.ranking").is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct Properties {
    /// Keyed by the lowercased spelling.
    entries: HashMap<String, Entry>,
}

impl Properties {
    /// Creates an empty property map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a property map from a JSON object.
    ///
    /// Returns [`ServiceError::InvalidArgument`] when `value` is not an
    /// object.  Keys that collide case-insensitively keep the last value.
    pub fn from_json(value: Value) -> ServiceResult<Self> {
        match value {
            Value::Object(map) => {
                let mut props = Self::new();
                for (k, v) in map {
                    props.insert(k, v);
                }
                Ok(props)
            }
            other => Err(ServiceError::invalid(format!(
                "properties must be a JSON object, got {other}"
            ))),
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when the map holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts `value` under `key`, replacing any entry whose key differs only
    /// in case.  The new spelling wins.  Returns the replaced value.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        let key = key.into();
        self.entries
            .insert(key.to_lowercase(), Entry { key, value })
            .map(|e| e.value)
    }

    /// Removes the entry matching `key` case-insensitively.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(&key.to_lowercase()).map(|e| e.value)
    }

    /// Returns `true` when an entry matches `key` case-insensitively.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(&key.to_lowercase())
    }

    /// Case-insensitive lookup.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(&key.to_lowercase()).map(|e| &e.value)
    }

    /// Iterates `(original key spelling, value)` pairs in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.values().map(|e| (e.key.as_str(), &e.value))
    }

    /// Iterates the originally inserted key spellings.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.values().map(|e| e.key.as_str())
    }

    // ─── Typed accessors ─────────────────────────────────────────────────────

    fn typed<'a, T>(
        &'a self,
        key: &str,
        kind: &str,
        extract: impl FnOnce(&'a Value) -> Option<T>,
    ) -> ServiceResult<T> {
        let value = self
            .get(key)
            .ok_or_else(|| ServiceError::invalid(format!("no property '{key}'")))?;
        extract(value).ok_or_else(|| {
            ServiceError::invalid(format!("property '{key}' is not a {kind}: {value}"))
        })
    }

    /// Returns the boolean stored under `key`.
    pub fn get_bool(&self, key: &str) -> ServiceResult<bool> {
        self.typed(key, "bool", Value::as_bool)
    }

    /// Returns the signed integer stored under `key`.  A float tag is a
    /// mismatch even when it holds an integral value.
    pub fn get_int(&self, key: &str) -> ServiceResult<i64> {
        self.typed(key, "integer", Value::as_i64)
    }

    /// Returns the float stored under `key`.
    pub fn get_float(&self, key: &str) -> ServiceResult<f64> {
        self.typed(key, "float", |v| match v {
            Value::Number(n) if !n.is_i64() && !n.is_u64() => n.as_f64(),
            _ => None,
        })
    }

    /// Returns the string stored under `key`.
    pub fn get_str(&self, key: &str) -> ServiceResult<&str> {
        self.typed(key, "string", Value::as_str)
    }

    /// Returns the vector stored under `key`.
    pub fn get_vec(&self, key: &str) -> ServiceResult<&Vec<Value>> {
        self.typed(key, "vector", Value::as_array)
    }

    /// Returns the nested map stored under `key`.
    pub fn get_map(&self, key: &str) -> ServiceResult<&serde_json::Map<String, Value>> {
        self.typed(key, "map", Value::as_object)
    }

    /// Copies every entry of `other` into `self`, overwriting collisions.
    pub fn extend(&mut self, other: &Properties) {
        for (k, v) in other.iter() {
            self.insert(k.to_string(), v.clone());
        }
    }

    /// Renders the map as a JSON object using the original key spellings.
    pub fn to_json(&self) -> Value {
        let mut map = serde_json::Map::with_capacity(self.entries.len());
        for entry in self.entries.values() {
            map.insert(entry.key.clone(), entry.value.clone());
        }
        Value::Object(map)
    }
}

/// Strict comparison: keys equal case-insensitively, values equal under
/// `serde_json`'s typed equality (`1` ≠ `1.0`, `"1"` ≠ `1`).
impl PartialEq for Properties {
    fn eq(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .all(|(k, e)| other.entries.get(k).is_some_and(|o| o.value == e.value))
    }
}

impl Eq for Properties {}

impl FromIterator<(String, Value)> for Properties {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut props = Self::new();
        for (k, v) in iter {
            props.insert(k, v);
        }
        props
    }
}

impl serde::Serialize for Properties {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for entry in self.entries.values() {
            map.serialize_entry(&entry.key, &entry.value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lookup_is_case_insensitive() {
        let mut props = Properties::new();
        props.insert("Service.Ranking", json!(5));

        assert_eq!(props.get("service.ranking"), Some(&json!(5)));
        assert_eq!(props.get("SERVICE.RANKING"), Some(&json!(5)));
        assert_eq!(props.keys().collect::<Vec<_>>(), vec!["Service.Ranking"]);
    }

    #[test]
    fn insert_replaces_case_variant_key() {
        let mut props = Properties::new();
        props.insert("foo", json!(1));
        let old = props.insert("FOO", json!(2));

        assert_eq!(old, Some(json!(1)));
        assert_eq!(props.len(), 1);
        assert_eq!(props.keys().collect::<Vec<_>>(), vec!["FOO"]);
    }

    #[test]
    fn typed_access_rejects_tag_mismatch() {
        let props = Properties::from_json(json!({"n": 3, "f": 1.5, "s": "x"})).unwrap();

        assert_eq!(props.get_int("n").unwrap(), 3);
        assert!(props.get_bool("n").is_err());
        assert!(props.get_int("f").is_err());
        assert_eq!(props.get_float("f").unwrap(), 1.5);
        assert_eq!(props.get_str("s").unwrap(), "x");
        assert!(props.get_str("missing").is_err());
    }

    #[test]
    fn equality_is_typed() {
        let a = Properties::from_json(json!({"x": 1})).unwrap();
        let b = Properties::from_json(json!({"X": 1})).unwrap();
        let c = Properties::from_json(json!({"x": 1.0})).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn from_json_rejects_non_object() {
        assert!(Properties::from_json(json!([1, 2])).is_err());
    }
}
