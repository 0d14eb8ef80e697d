//! Response-shape normalization
//!
//! List endpoints answer in three shapes: a bare array, an object wrapping
//! the array in a named field, or a single entity object. Callers always
//! get a list.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::Result;

/// Wrapper fields tried when the caller names none
const DEFAULT_COLLECTION_FIELDS: [&str; 3] = ["items", "data", "results"];

/// Normalize `value` into a list of entities
///
/// `collection_field` names the wrapper field; without it the common
/// wrapper names are tried. `null` and `{}` yield an empty list.
pub fn normalize_entities(value: Value, collection_field: Option<&str>) -> Vec<Value> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items,
        Value::Object(mut map) => {
            let wrapper = match collection_field {
                Some(field) => map.contains_key(field).then_some(field),
                None => DEFAULT_COLLECTION_FIELDS
                    .into_iter()
                    .find(|f| map.get(*f).is_some_and(Value::is_array)),
            };

            match wrapper.and_then(|field| map.remove(field)) {
                Some(Value::Array(items)) => items,
                Some(Value::Null) => Vec::new(),
                Some(single) => vec![single],
                None if map.is_empty() => Vec::new(),
                None => vec![Value::Object(map)],
            }
        }
        other => vec![other],
    }
}

/// Normalize and deserialize into typed entities
pub fn into_entities<T: DeserializeOwned>(
    value: Value,
    collection_field: Option<&str>,
) -> Result<Vec<T>> {
    normalize_entities(value, collection_field)
        .into_iter()
        .map(|entity| serde_json::from_value(entity).map_err(Into::into))
        .collect()
}
