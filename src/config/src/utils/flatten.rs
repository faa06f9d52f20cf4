// Copyright 2024 OpenObserve Inc.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use super::json::{Map, Value};

const KEY_SEPARATOR: &str = ".";

/// Flattens a record object into dotted column keys, e.g.
/// `{"key":{"userId":"u"}}` becomes `{"key.userId":"u"}`. Array elements are
/// keyed by index. Keys come out in map order, so the column set is
/// deterministic for a given record shape.
pub fn flatten(record: &Value) -> Result<Map<String, Value>, anyhow::Error> {
    let Value::Object(fields) = record else {
        anyhow::bail!("flatten value must be an object");
    };
    let mut flat = Map::new();
    for (key, value) in fields {
        flatten_value(value, key.clone(), &mut flat);
    }
    Ok(flat)
}

fn flatten_value(current: &Value, parent_key: String, flattened: &mut Map<String, Value>) {
    match current {
        Value::Object(map) => {
            for (key, value) in map {
                flatten_value(
                    value,
                    format!("{parent_key}{KEY_SEPARATOR}{key}"),
                    flattened,
                );
            }
        }
        Value::Array(values) => {
            for (i, value) in values.iter().enumerate() {
                flatten_value(value, format!("{parent_key}{KEY_SEPARATOR}{i}"), flattened);
            }
        }
        _ => {
            flattened.insert(parent_key, current.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_flatten_nested_object() {
        let record = json!({
            "key": {"projectId": "p", "userId": "u"},
            "value": {"time": 12, "acceleration": {"x": 0.5}},
        });
        let flat = flatten(&record).unwrap();
        let keys = flat.keys().cloned().collect::<Vec<_>>();
        assert_eq!(
            keys,
            ["key.projectId", "key.userId", "value.acceleration.x", "value.time"]
        );
        assert_eq!(flat["value.time"], json!(12));
    }

    #[test]
    fn test_flatten_array() {
        let record = json!({"value": {"samples": [1, 2]}});
        let flat = flatten(&record).unwrap();
        assert_eq!(flat["value.samples.0"], json!(1));
        assert_eq!(flat["value.samples.1"], json!(2));
    }

    #[test]
    fn test_flatten_rejects_non_object() {
        assert!(flatten(&json!(42)).is_err());
        assert!(flatten(&json!(["a"])).is_err());
    }
}
