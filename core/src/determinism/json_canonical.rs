use crate::error::CoreResult;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

// Canonical form used for fingerprints:
// - keys sorted lexicographically at every depth
// - no insignificant whitespace
// - array order preserved
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> CoreResult<Vec<u8>> {
    let v = serde_json::to_value(value)?;
    let normalized = normalize_value(v);
    let s = serde_json::to_string(&normalized)?;
    Ok(s.into_bytes())
}

fn normalize_value(v: Value) -> Value {
    match v {
        Value::Object(map) => {
            let btm: BTreeMap<String, Value> = map
                .into_iter()
                .map(|(k, vv)| (k, normalize_value(vv)))
                .collect();
            // serde_json::Map preserves insertion order; rebuild in sorted order.
            let mut out = serde_json::Map::new();
            for (k, vv) in btm {
                out.insert(k, vv);
            }
            Value::Object(out)
        }
        Value::Array(arr) => Value::Array(arr.into_iter().map(normalize_value).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::to_canonical_bytes;
    use serde_json::json;

    #[test]
    fn nested_keys_are_sorted() {
        let bytes = to_canonical_bytes(&json!({"b": 1, "a": {"d": [2, 1], "c": null}})).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"a":{"c":null,"d":[2,1]},"b":1}"#
        );
    }
}
