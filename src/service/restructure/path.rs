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

use config::utils::{json, time};

/// Where a record lands: the target path, the hour bucket it fell into and
/// the category it is accounted under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordOrganization {
    pub path: String,
    pub time_bucket: String,
    pub category: String,
}

/// Derives the output organization for a record through a built-in strategy.
/// The suffix disambiguates schema-incompatible record groups sharing the
/// derived path; suffix 0 renders without a marker.
pub fn organize(
    factory: &str,
    topic: &str,
    record: &json::Value,
    suffix: u32,
    extension: &str,
) -> Result<RecordOrganization, anyhow::Error> {
    match factory {
        "observationKey" => observation_key(topic, record, suffix, extension),
        _ => anyhow::bail!("unknown path factory: {factory}"),
    }
}

fn observation_key(
    topic: &str,
    record: &json::Value,
    suffix: u32,
    extension: &str,
) -> Result<RecordOrganization, anyhow::Error> {
    let project = key_field(record, "projectId");
    let user = key_field(record, "userId");
    let source = key_field(record, "sourceId");
    let bucket = time::hour_bucket(record_time(record)?);
    let file = if suffix == 0 {
        format!("{bucket}{extension}")
    } else {
        format!("{bucket}.{suffix}{extension}")
    };
    Ok(RecordOrganization {
        path: format!(
            "{}/{}/{}/{}/{}",
            sanitize(topic),
            sanitize(&project),
            sanitize(&user),
            sanitize(&source),
            file
        ),
        time_bucket: bucket,
        category: source,
    })
}

fn key_field(record: &json::Value, name: &str) -> String {
    record
        .get("key")
        .and_then(|key| key.get(name))
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string()
}

/// Record time in nanoseconds since epoch. A record without a numeric
/// `value.time` cannot be routed and aborts the current source file.
pub fn record_time(record: &json::Value) -> Result<i64, anyhow::Error> {
    record
        .get("value")
        .and_then(|value| value.get("time"))
        .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
        .ok_or_else(|| anyhow::anyhow!("record has no numeric value.time field"))
}

fn sanitize(part: &str) -> String {
    let cleaned = part
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || "._-".contains(c) {
                c
            } else {
                '_'
            }
        })
        .collect::<String>();
    if cleaned.trim_matches('.').is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn record() -> json::Value {
        json!({
            "key": {"projectId": "p1", "userId": "u1", "sourceId": "s1"},
            // 2024-01-01T00:30:00Z
            "value": {"time": 1_704_069_000_000_000_000i64, "battery": 0.5},
        })
    }

    #[test]
    fn test_observation_key_path() {
        let org = organize("observationKey", "test", &record(), 0, ".csv.gz").unwrap();
        assert_eq!(org.path, "test/p1/u1/s1/20240101_00.csv.gz");
        assert_eq!(org.time_bucket, "20240101_00");
        assert_eq!(org.category, "s1");
    }

    #[test]
    fn test_suffix_marks_the_file_name() {
        let org = organize("observationKey", "test", &record(), 2, ".csv.gz").unwrap();
        assert_eq!(org.path, "test/p1/u1/s1/20240101_00.2.csv.gz");
    }

    #[test]
    fn test_missing_key_fields_fall_back() {
        let record = json!({"value": {"time": 0}});
        let org = organize("observationKey", "test", &record, 0, ".json").unwrap();
        assert_eq!(org.path, "test/unknown/unknown/unknown/19700101_00.json");
    }

    #[test]
    fn test_missing_time_is_an_error() {
        let record = json!({"key": {"sourceId": "s1"}, "value": {"battery": 1.0}});
        assert!(organize("observationKey", "test", &record, 0, ".csv").is_err());
        assert!(record_time(&record).is_err());
    }

    #[test]
    fn test_path_components_are_sanitized() {
        let record = json!({
            "key": {"projectId": "p/../x", "userId": "u 1", "sourceId": "s1"},
            "value": {"time": 0},
        });
        let org = organize("observationKey", "test", &record, 0, ".csv").unwrap();
        assert_eq!(org.path, "test/p_.._x/u_1/s1/19700101_00.csv");
    }

    #[test]
    fn test_unknown_factory_is_rejected() {
        assert!(organize("reflection", "test", &record(), 0, ".csv").is_err());
    }
}
