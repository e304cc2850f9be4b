//! Insertion-ordered metric field mapping.
//!
//! Snapshot fields are keyed by dotted metric names (`agent.num_evts`,
//! `driver.n_drops_perc`, ...) and serialized as a single JSON object
//! per snapshot. Order is the order of first insertion; re-setting a
//! field keeps its original position.

use serde::ser::{Serialize, SerializeMap, Serializer};

/// A single metric field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    U64(u64),
    U32(u32),
    F64(f64),
    Str(String),
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldValue::U64(v) => serializer.serialize_u64(*v),
            FieldValue::U32(v) => serializer.serialize_u32(*v),
            FieldValue::F64(v) => serializer.serialize_f64(*v),
            FieldValue::Str(v) => serializer.serialize_str(v),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Str(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Str(v)
    }
}

/// Ordered name -> value mapping for one snapshot.
///
/// Backed by a Vec: snapshots carry a few dozen fields, linear lookup
/// is cheaper than hashing at that size and keeps insertion order for
/// free.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMap {
    entries: Vec<(String, FieldValue)>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a field, replacing in place if the name already exists.
    pub fn set(&mut self, name: impl Into<String>, value: FieldValue) {
        let name = name.into();
        if let Some(entry) = self.entries.iter_mut().find(|(n, _)| *n == name) {
            entry.1 = value;
        } else {
            self.entries.push((name, value));
        }
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }
}

impl Serialize for FieldMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_preserves_insertion_order() {
        let mut fields = FieldMap::new();
        fields.set("b", FieldValue::U64(1));
        fields.set("a", FieldValue::U64(2));
        fields.set("c", FieldValue::U64(3));

        let names: Vec<&str> = fields.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["b", "a", "c"]);
    }

    #[test]
    fn reinsert_replaces_value_keeps_position() {
        let mut fields = FieldMap::new();
        fields.set("a", FieldValue::U64(1));
        fields.set("b", FieldValue::U64(2));
        fields.set("a", FieldValue::U64(10));

        assert_eq!(fields.len(), 2);
        assert_eq!(fields.get("a"), Some(&FieldValue::U64(10)));
        let names: Vec<&str> = fields.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn serializes_as_ordered_json_object() {
        let mut fields = FieldMap::new();
        fields.set("z.count", FieldValue::U64(5));
        fields.set("a.rate", FieldValue::F64(1.5));
        fields.set("a.name", FieldValue::from("syscall"));

        let json = serde_json::to_string(&fields).unwrap();
        assert_eq!(json, r#"{"z.count":5,"a.rate":1.5,"a.name":"syscall"}"#);
    }
}
