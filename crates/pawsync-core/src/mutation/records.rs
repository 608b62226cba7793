//! In-place edits of cached records and record lists.

use serde_json::{Map, Value};

pub fn record_id(record: &Value) -> Option<&str> {
    record.get("id").and_then(Value::as_str)
}

fn position(list: &[Value], id: &str) -> Option<usize> {
    list.iter().position(|r| record_id(r) == Some(id))
}

pub fn find_in_list<'a>(list: &'a Value, id: &str) -> Option<&'a Value> {
    let items = list.as_array()?;
    position(items, id).map(|i| &items[i])
}

/// Shallow-merge `patch` into `record` and stamp `updatedAt`.
pub fn merge_patch(record: &mut Value, patch: &Map<String, Value>, updated_at: &str) -> bool {
    let Some(fields) = record.as_object_mut() else {
        return false;
    };
    for (name, value) in patch {
        fields.insert(name.clone(), value.clone());
    }
    fields.insert("updatedAt".to_string(), Value::String(updated_at.to_string()));
    true
}

pub fn patch_in_list(
    list: &mut Value,
    id: &str,
    patch: &Map<String, Value>,
    updated_at: &str,
) -> bool {
    let Some(items) = list.as_array_mut() else {
        return false;
    };
    match position(items, id) {
        Some(i) => merge_patch(&mut items[i], patch, updated_at),
        None => false,
    }
}

pub fn remove_from_list(list: &mut Value, id: &str) -> Option<Value> {
    let items = list.as_array_mut()?;
    position(items, id).map(|i| items.remove(i))
}

/// Swap the record `old_id` for `record` in place. If `record` is already in
/// the list (a refetch got there first) the old one is just dropped.
pub fn replace_in_list(list: &mut Value, old_id: &str, record: &Value) -> bool {
    let Some(items) = list.as_array_mut() else {
        return false;
    };
    let Some(old) = position(items, old_id) else {
        return false;
    };
    let new_id = record_id(record).unwrap_or_default();
    if new_id != old_id && position(items, new_id).is_some() {
        items.remove(old);
    } else {
        items[old] = record.clone();
    }
    true
}
