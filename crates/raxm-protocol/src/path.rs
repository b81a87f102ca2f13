//! Dotted property paths over JSON data (`address.city`, `items.0.title`).
//!
//! Writes merge into the existing nested value: siblings of the written key
//! are preserved and missing intermediate objects are created.

use crate::error::{RaxmError, RaxmResult};
use crate::wire::DataMap;
use serde_json::{Map, Value};

/// Split a dotted path into its segments, rejecting empty segments.
pub fn segments(path: &str) -> RaxmResult<Vec<&str>> {
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|segment| segment.trim().is_empty()) {
        return Err(RaxmError::InvalidPath(path.to_owned()));
    }
    Ok(segments)
}

/// The top-level property a path addresses.
pub fn root(path: &str) -> &str {
    path.split('.').next().unwrap_or(path)
}

pub fn get<'a>(data: &'a DataMap, path: &str) -> Option<&'a Value> {
    let segments = segments(path).ok()?;
    let (first, rest) = segments.split_first()?;
    let mut current = data.get(*first)?;
    for segment in rest {
        current = match current {
            Value::Object(map) => map.get(*segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

pub fn set(data: &mut DataMap, path: &str, value: Value) -> RaxmResult<()> {
    let segments = segments(path)?;
    let Some((first, rest)) = segments.split_first() else {
        return Err(RaxmError::InvalidPath(path.to_owned()));
    };
    if rest.is_empty() {
        data.insert((*first).to_owned(), value);
        return Ok(());
    }
    let slot = data
        .entry((*first).to_owned())
        .or_insert_with(|| Value::Object(Map::new()));
    set_in_value(slot, rest, value, path)
}

fn set_in_value(slot: &mut Value, segments: &[&str], value: Value, path: &str) -> RaxmResult<()> {
    let Some((segment, rest)) = segments.split_first() else {
        *slot = value;
        return Ok(());
    };
    if slot.is_null() {
        *slot = Value::Object(Map::new());
    }
    let child = match slot {
        Value::Object(map) => map
            .entry((*segment).to_owned())
            .or_insert_with(|| Value::Object(Map::new())),
        Value::Array(items) => {
            let index = segment
                .parse::<usize>()
                .map_err(|_| RaxmError::InvalidPath(path.to_owned()))?;
            if index == items.len() {
                items.push(Value::Null);
            }
            items
                .get_mut(index)
                .ok_or_else(|| RaxmError::InvalidPath(path.to_owned()))?
        }
        _ => return Err(RaxmError::InvalidPath(path.to_owned())),
    };
    if rest.is_empty() {
        *child = value;
        Ok(())
    } else {
        set_in_value(child, rest, value, path)
    }
}
