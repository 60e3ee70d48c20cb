//! Data items emitted by user callbacks.
//!
//! A [`DataItem`] is an ordered field map. Fields can be supplied as plain
//! values or as fallible thunks; a thunk failure is captured per-field in
//! the item's error map instead of failing the whole item.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A single captured field failure.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct DataError {
    /// Short type name of the error that was raised.
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

/// A record emitted to the data queue.
///
/// Built either field by field, or lifted from any `Serialize` struct via
/// [`DataItem::from_record`].
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DataItem {
    #[serde(flatten)]
    values: Map<String, Value>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    errors: BTreeMap<String, DataError>,
}

impl DataItem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field to an immediate value.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(name.into(), value.into());
        self
    }

    /// Set a field from a fallible thunk.
    ///
    /// The thunk runs exactly once, here. On failure the field is set to
    /// `null` and the error is recorded under the field name; other fields
    /// are unaffected.
    pub fn try_field<T, E, F>(mut self, name: impl Into<String>, thunk: F) -> Self
    where
        T: Into<Value>,
        E: std::error::Error,
        F: FnOnce() -> Result<T, E>,
    {
        let name = name.into();
        match thunk() {
            Ok(value) => {
                self.values.insert(name, value.into());
            }
            Err(err) => {
                self.errors.insert(
                    name.clone(),
                    DataError {
                        kind: short_type_name::<E>(),
                        message: err.to_string(),
                    },
                );
                self.values.insert(name, Value::Null);
            }
        }
        self
    }

    /// Lift a declared record type into an item.
    ///
    /// Only structs serializing to a JSON object are accepted.
    pub fn from_record<R: Serialize>(record: &R) -> Result<Self, serde_json::Error> {
        let value = serde_json::to_value(record)?;
        match value {
            Value::Object(values) => Ok(Self {
                values,
                errors: BTreeMap::new(),
            }),
            other => Err(serde::ser::Error::custom(format!(
                "expected a record serializing to an object, got {other}"
            ))),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn errors(&self) -> &BTreeMap<String, DataError> {
        &self.errors
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for DataItem {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::new(), |item, (k, v)| item.field(k, v))
    }
}

/// Last path segment of a type name, `std::num::ParseIntError` → `ParseIntError`.
fn short_type_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full).to_string()
}
