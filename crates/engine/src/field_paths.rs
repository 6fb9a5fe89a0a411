//! Dotted field-path lookup over JSON values.
//!
//! Paths use dot notation with optional bracket indices, e.g.
//! `status.conditions[0].type`. A purely numeric segment also indexes into
//! arrays (`items.0.name`), which keeps template paths like `.items.0` usable.

use serde_json::{Map, Value};

/// Resolves `path` against `root`, returning `None` when any segment is missing.
///
/// An empty path resolves to the root itself.
pub fn lookup<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let trimmed = path.trim();
    let mut current = root;
    for segment in trimmed.split('.') {
        if segment.is_empty() {
            continue;
        }
        let (key, indices) = split_indices(segment);
        if !key.is_empty() {
            current = step_into(current, key)?;
        }
        for index in indices {
            current = current.get(index)?;
        }
    }
    Some(current)
}

/// Resolves `path` against a variable map without cloning the map into a `Value`.
pub fn lookup_in<'a>(vars: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let trimmed = path.trim();
    let (head, rest) = match trimmed.find(['.', '[']) {
        Some(position) => trimmed.split_at(position),
        None => (trimmed, ""),
    };
    let root = vars.get(head)?;
    lookup(root, rest)
}

/// Returns true when `path` is a plain field path (identifiers, dots, and numeric brackets).
pub fn is_field_path(path: &str) -> bool {
    let trimmed = path.trim();
    if trimmed.is_empty() || trimmed.starts_with('.') || trimmed.ends_with('.') {
        return false;
    }
    trimmed.split('.').all(|segment| {
        let (key, _) = split_indices(segment);
        let brackets_valid = segment[key.len()..]
            .split_inclusive(']')
            .all(|part| part.starts_with('[') && part.ends_with(']') && part[1..part.len() - 1].parse::<usize>().is_ok());
        !segment.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') && brackets_valid
    })
}

fn step_into<'a>(current: &'a Value, key: &str) -> Option<&'a Value> {
    match current {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|index| items.get(index)),
        _ => None,
    }
}

fn split_indices(segment: &str) -> (&str, Vec<usize>) {
    let key_end = segment.find('[').unwrap_or(segment.len());
    let key = &segment[..key_end];
    let bytes = segment.as_bytes();
    let mut indices = Vec::new();
    let mut i = key_end;
    while i < bytes.len() {
        if bytes[i] != b'[' {
            break;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i] != b']' {
            i += 1;
        }
        if i <= start {
            break;
        }
        if let Ok(index) = segment[start..i].parse::<usize>() {
            indices.push(index);
        }
        i += 1;
    }
    (key, indices)
}
