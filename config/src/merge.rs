//! Layering of raw JSON override documents onto typed option values.
//!
//! The override is merged field by field: objects recurse, scalars from the
//! override win, `null` in the override leaves the base untouched, and lists
//! follow the [`ListMerge`] policy chosen by the caller. Fields unknown to the
//! typed value survive as long as the type keeps a flattened catch-all map.

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Eq, PartialEq, Copy, Clone, Debug)]
pub enum ListMerge {
    /// Base items first, then override items.
    Append,
    /// The override list replaces the base list.
    Replace,
}

pub fn merge_into<T>(base: &T, overlay: &Value, lists: ListMerge) -> Result<T>
where
    T: Serialize + DeserializeOwned,
{
    let Value::Object(overlay) = overlay else {
        bail!("override must be a JSON object, found: {overlay}");
    };
    let mut merged = serde_json::to_value(base).context("serialize merge destination")?;
    match &mut merged {
        Value::Object(destination) => merge_objects(destination, overlay, lists),
        other => bail!("merge destination is not an object: {other}"),
    }
    serde_json::from_value(merged).context("decode merged value")
}

pub fn merge_objects(destination: &mut Map<String, Value>, source: &Map<String, Value>, lists: ListMerge) {
    for (key, value) in source {
        match destination.get_mut(key) {
            Some(existing) => merge_values(existing, value, lists),
            None => {
                if !value.is_null() {
                    destination.insert(key.clone(), value.clone());
                }
            }
        }
    }
}

pub fn merge_values(destination: &mut Value, source: &Value, lists: ListMerge) {
    match (destination, source) {
        (_, Value::Null) => {}
        (Value::Object(destination), Value::Object(source)) => {
            merge_objects(destination, source, lists)
        }
        (Value::Array(destination), Value::Array(source)) if lists == ListMerge::Append => {
            destination.extend(source.iter().cloned())
        }
        (destination, source) => *destination = source.clone(),
    }
}
