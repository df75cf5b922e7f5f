//! The local mirror of the instrument's registers.

use std::collections::BTreeMap;

use crate::value::TypedValue;

/// A flat `command path -> value` map, serialized as a JSON object for save/restore.
pub type Snapshot = BTreeMap<String, TypedValue>;

/// Read access to register values by command path.
pub trait ValueSource {
    fn value(&self, wire_path: &str) -> Option<&TypedValue>;
}

impl ValueSource for BTreeMap<String, TypedValue> {
    fn value(&self, wire_path: &str) -> Option<&TypedValue> {
        self.get(wire_path)
    }
}

/// Mirror of the instrument's registers, keyed by command path.
///
/// Physical registers are independent of the mode they are viewed from, so two descriptors
/// declaring the same command path share one entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterStateCache {
    values: Snapshot,
}

impl ParameterStateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, wire_path: &str) -> Option<&TypedValue> {
        self.values.get(wire_path)
    }

    pub fn contains(&self, wire_path: &str) -> bool {
        self.values.contains_key(wire_path)
    }

    pub fn insert(&mut self, wire_path: impl Into<String>, value: TypedValue) -> Option<TypedValue> {
        self.values.insert(wire_path.into(), value)
    }

    pub fn remove(&mut self, wire_path: &str) -> Option<TypedValue> {
        self.values.remove(wire_path)
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TypedValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// A copy of every cached value.
    pub fn snapshot(&self) -> Snapshot {
        self.values.clone()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.values)
    }

    pub fn snapshot_from_json(json: &str) -> serde_json::Result<Snapshot> {
        serde_json::from_str(json)
    }
}

impl ValueSource for ParameterStateCache {
    fn value(&self, wire_path: &str) -> Option<&TypedValue> {
        self.get(wire_path)
    }
}

/// A view of `base` with pending, not yet written values layered on top.
pub struct Overlay<'a, S: ValueSource> {
    base: &'a S,
    top: &'a BTreeMap<String, TypedValue>,
}

impl<'a, S: ValueSource> Overlay<'a, S> {
    pub fn new(base: &'a S, top: &'a BTreeMap<String, TypedValue>) -> Self {
        Self { base, top }
    }
}

impl<S: ValueSource> ValueSource for Overlay<'_, S> {
    fn value(&self, wire_path: &str) -> Option<&TypedValue> {
        self.top.get(wire_path).or_else(|| self.base.value(wire_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_prefers_pending_values() {
        let mut cache = ParameterStateCache::new();
        cache.insert("CURRENT:IRANGE", "30".into());
        cache.insert("CURRENT:LEVEL:IMMEDIATE", TypedValue::Float(1.0));

        let mut pending = BTreeMap::new();
        pending.insert("CURRENT:IRANGE".to_owned(), TypedValue::from("5"));
        let overlay = Overlay::new(&cache, &pending);

        assert_eq!(overlay.value("CURRENT:IRANGE"), Some(&TypedValue::from("5")));
        assert_eq!(overlay.value("CURRENT:LEVEL:IMMEDIATE"), Some(&TypedValue::Float(1.0)));
        assert_eq!(overlay.value("VOLTAGE:IRANGE"), None);
    }

    #[test]
    fn snapshot_is_a_flat_json_object() {
        let mut cache = ParameterStateCache::new();
        cache.insert("INPUT:STATE", TypedValue::Bool(false));
        cache.insert("BATTERY:CAP", TypedValue::Int(2500));
        cache.insert("TRIGGER:SOURCE", "BUS".into());

        let json = cache.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "BATTERY:CAP": 2500,
                "INPUT:STATE": false,
                "TRIGGER:SOURCE": "BUS",
            })
        );

        let restored = ParameterStateCache::snapshot_from_json(&json).unwrap();
        assert_eq!(restored, cache.snapshot());
    }
}
