//! Data types for workflow execution payloads.

use serde_json::{Map, Value};

/// A JSON-shaped map of string keys to values. Everything a node consumes
/// or produces is one of these.
pub type DataObject = Map<String, Value>;

/// Build a [`DataObject`] from key/value pairs.
pub fn data_object<I, K>(pairs: I) -> DataObject
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

/// Merge `overlay` into `base`, overwriting colliding keys.
pub fn merge_into(base: &mut DataObject, overlay: &DataObject) {
    for (key, value) in overlay {
        base.insert(key.clone(), value.clone());
    }
}

/// Walk a dotted path through a value tree, best effort.
///
/// Returns `None` when any segment is missing or the current value is not
/// an object.
pub fn lookup_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for segment in path.split('.') {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Render a value the way it appears inside an interpolated string:
/// strings bare, everything else as compact JSON.
pub fn value_to_display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lookup_path_walks_nested_objects() {
        let root = json!({"a": {"b": {"c": 7}}});
        assert_eq!(lookup_path(&root, "a.b.c"), Some(&json!(7)));
        assert_eq!(lookup_path(&root, "a.missing"), None);
        assert_eq!(lookup_path(&root, "a.b.c.d"), None);
    }

    #[test]
    fn merge_overwrites_colliding_keys() {
        let mut base = data_object([("x", json!(1)), ("y", json!(2))]);
        let overlay = data_object([("y", json!(3)), ("z", json!(4))]);
        merge_into(&mut base, &overlay);
        assert_eq!(base.get("y"), Some(&json!(3)));
        assert_eq!(base.get("z"), Some(&json!(4)));
        assert_eq!(base.get("x"), Some(&json!(1)));
    }
}
