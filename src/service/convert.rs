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

use std::io;

use anyhow::Context;
use config::utils::{flatten, json};
use itertools::Itertools;

use super::compress::CompressWriter;

pub fn extension(format: &str) -> &'static str {
    match format {
        "json" => config::FILE_EXT_JSON,
        _ => config::FILE_EXT_CSV,
    }
}

/// Serialises records into an open output stream. One converter per cache
/// entry; it owns the compressed writer until `finish`.
pub trait RecordConverter: Send {
    /// False means the record does not fit this file's schema and the caller
    /// should retry under the next path suffix.
    fn write_record(&mut self, record: &json::Value) -> Result<bool, anyhow::Error>;
    fn flush(&mut self) -> io::Result<()>;
    fn finish(self: Box<Self>) -> Result<(), anyhow::Error>;
}

/// Builds the converter for a format name. `existing` carries the
/// decompressed content of a pre-existing target so appends can validate
/// against the header already on disk.
pub fn converter_for(
    format: &str,
    writer: Box<dyn CompressWriter>,
    example: &json::Value,
    file_is_new: bool,
    existing: Option<&[u8]>,
) -> Result<Box<dyn RecordConverter>, anyhow::Error> {
    match format {
        "json" => Ok(Box::new(JsonConverter { writer })),
        _ => Ok(Box::new(CsvConverter::new(
            writer,
            example,
            file_is_new,
            existing,
        )?)),
    }
}

struct JsonConverter {
    writer: Box<dyn CompressWriter>,
}

impl RecordConverter for JsonConverter {
    fn write_record(&mut self, record: &json::Value) -> Result<bool, anyhow::Error> {
        let mut line = json::to_vec(record)?;
        line.push(b'\n');
        io::Write::write_all(&mut self.writer, &line)?;
        Ok(true)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    fn finish(self: Box<Self>) -> Result<(), anyhow::Error> {
        self.writer.finish()?;
        Ok(())
    }
}

struct CsvConverter {
    headers: Vec<String>,
    writer: csv::Writer<Box<dyn CompressWriter>>,
}

impl CsvConverter {
    fn new(
        writer: Box<dyn CompressWriter>,
        example: &json::Value,
        file_is_new: bool,
        existing: Option<&[u8]>,
    ) -> Result<Self, anyhow::Error> {
        let headers = if file_is_new {
            flatten::flatten(example)?.keys().cloned().collect::<Vec<_>>()
        } else {
            let data = existing.context("existing target content required to append")?;
            let mut reader = csv::Reader::from_reader(data);
            reader.headers()?.iter().map(|h| h.to_string()).collect()
        };
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(writer);
        if file_is_new {
            writer.write_record(&headers)?;
        }
        Ok(Self { headers, writer })
    }
}

impl RecordConverter for CsvConverter {
    fn write_record(&mut self, record: &json::Value) -> Result<bool, anyhow::Error> {
        let flat = flatten::flatten(record)?;
        if !flat.keys().eq(self.headers.iter()) {
            return Ok(false);
        }
        self.writer
            .write_record(flat.values().map(csv_cell).collect::<Vec<_>>())?;
        Ok(true)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    fn finish(self: Box<Self>) -> Result<(), anyhow::Error> {
        let writer = self
            .writer
            .into_inner()
            .map_err(|e| anyhow::anyhow!("csv writer finish error: {e}"))?;
        writer.finish()?;
        Ok(())
    }
}

fn csv_cell(value: &json::Value) -> String {
    match value {
        json::Value::Null => String::new(),
        json::Value::String(s) => s.clone(),
        v => v.to_string(),
    }
}

/// Deduplicates decompressed output content: rows are stable-sorted by their
/// distinct-field key and the first row per key survives. With no distinct
/// fields configured the key is the whole row minus the ignored fields.
pub fn deduplicate(
    format: &str,
    data: Vec<u8>,
    distinct_fields: &[String],
    ignore_fields: &[String],
) -> Result<Vec<u8>, anyhow::Error> {
    match format {
        "json" => dedup_json(data, distinct_fields, ignore_fields),
        _ => dedup_csv(data, distinct_fields, ignore_fields),
    }
}

fn dedup_csv(
    data: Vec<u8>,
    distinct_fields: &[String],
    ignore_fields: &[String],
) -> Result<Vec<u8>, anyhow::Error> {
    let mut reader = csv::Reader::from_reader(data.as_slice());
    let headers = reader.headers()?.clone();
    let key_idx = headers
        .iter()
        .enumerate()
        .filter(|(_, h)| {
            if distinct_fields.is_empty() {
                !ignore_fields.iter().any(|f| f == h)
            } else {
                distinct_fields.iter().any(|f| f == h)
            }
        })
        .map(|(i, _)| i)
        .collect::<Vec<_>>();

    let mut rows = Vec::new();
    for row in reader.records() {
        let row = row?;
        let key = key_idx
            .iter()
            .map(|&i| row.get(i).unwrap_or_default().to_string())
            .collect::<Vec<_>>();
        rows.push((key, row));
    }
    rows.sort_by(|(a, _), (b, _)| a.cmp(b));

    let mut out = csv::Writer::from_writer(Vec::new());
    out.write_record(&headers)?;
    for (_, row) in rows.into_iter().dedup_by(|(a, _), (b, _)| a == b) {
        out.write_record(&row)?;
    }
    Ok(out.into_inner()?)
}

fn dedup_json(
    data: Vec<u8>,
    distinct_fields: &[String],
    ignore_fields: &[String],
) -> Result<Vec<u8>, anyhow::Error> {
    let mut rows = Vec::new();
    for line in data.split(|b| *b == b'\n').filter(|l| !l.is_empty()) {
        let record: json::Value = json::from_slice(line)?;
        let flat = flatten::flatten(&record)?;
        let key = flat
            .iter()
            .filter(|(k, _)| {
                if distinct_fields.is_empty() {
                    !ignore_fields.iter().any(|f| f == *k)
                } else {
                    distinct_fields.iter().any(|f| f == *k)
                }
            })
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>();
        rows.push((key, line.to_vec()));
    }
    rows.sort_by(|(a, _), (b, _)| a.cmp(b));

    let mut out = Vec::new();
    for (_, line) in rows.into_iter().dedup_by(|(a, _), (b, _)| a == b) {
        out.extend_from_slice(&line);
        out.push(b'\n');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::fs::File;

    use serde_json::json;

    use super::{super::compress, *};

    fn staged(dir: &tempfile::TempDir, name: &str) -> Box<dyn CompressWriter> {
        compress::writer("none", name, File::create(dir.path().join(name)).unwrap()).unwrap()
    }

    #[test]
    fn test_csv_converter_writes_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let record = json!({"key": {"sourceId": "s1"}, "value": {"time": 5}});
        let writer = staged(&dir, "out.csv");
        let mut conv = converter_for("csv", writer, &record, true, None).unwrap();
        assert!(conv.write_record(&record).unwrap());
        assert!(conv
            .write_record(&json!({"key": {"sourceId": "s2"}, "value": {"time": 6}}))
            .unwrap());
        conv.finish().unwrap();

        let content = std::fs::read_to_string(dir.path().join("out.csv")).unwrap();
        assert_eq!(content, "key.sourceId,value.time\ns1,5\ns2,6\n");
    }

    #[test]
    fn test_csv_converter_rejects_other_schema() {
        let dir = tempfile::tempdir().unwrap();
        let record = json!({"key": {"sourceId": "s1"}, "value": {"time": 5}});
        let writer = staged(&dir, "out.csv");
        let mut conv = converter_for("csv", writer, &record, true, None).unwrap();
        assert!(conv.write_record(&record).unwrap());
        assert!(!conv
            .write_record(&json!({"key": {"sourceId": "s1"}, "value": {"temperature": 21.5}}))
            .unwrap());
        conv.finish().unwrap();
    }

    #[test]
    fn test_csv_converter_appends_against_existing_header() {
        let dir = tempfile::tempdir().unwrap();
        let existing = b"key.sourceId,value.time\ns1,5\n";
        let record = json!({"key": {"sourceId": "s1"}, "value": {"time": 6}});
        let writer = staged(&dir, "out.csv");
        let mut conv = converter_for("csv", writer, &record, false, Some(existing)).unwrap();
        assert!(conv.write_record(&record).unwrap());
        conv.finish().unwrap();

        // no second header: the replayed original already carries one
        let content = std::fs::read_to_string(dir.path().join("out.csv")).unwrap();
        assert_eq!(content, "s1,6\n");
    }

    #[test]
    fn test_json_converter_accepts_any_record() {
        let dir = tempfile::tempdir().unwrap();
        let writer = staged(&dir, "out.json");
        let mut conv =
            converter_for("json", writer, &json!({"value": {"time": 5}}), true, None).unwrap();
        assert!(conv.write_record(&json!({"value": {"time": 5}})).unwrap());
        assert!(conv.write_record(&json!({"other": true})).unwrap());
        conv.finish().unwrap();

        let content = std::fs::read_to_string(dir.path().join("out.json")).unwrap();
        assert_eq!(content, "{\"value\":{\"time\":5}}\n{\"other\":true}\n");
    }

    #[test]
    fn test_dedup_csv_whole_row() {
        let data = b"a,b\n1,x\n2,y\n1,x\n".to_vec();
        let out = deduplicate("csv", data, &[], &[]).unwrap();
        assert_eq!(out, b"a,b\n1,x\n2,y\n");
    }

    #[test]
    fn test_dedup_csv_distinct_fields_keep_first() {
        let data = b"a,b\n1,x\n1,y\n2,z\n".to_vec();
        let out = deduplicate("csv", data, &["a".to_string()], &[]).unwrap();
        assert_eq!(out, b"a,b\n1,x\n2,z\n");
    }

    #[test]
    fn test_dedup_csv_ignore_fields() {
        // same row once column b is ignored
        let data = b"a,b\n1,x\n1,y\n".to_vec();
        let out = deduplicate("csv", data, &[], &["b".to_string()]).unwrap();
        assert_eq!(out, b"a,b\n1,x\n");
    }

    #[test]
    fn test_dedup_json_distinct_fields() {
        let data = b"{\"value\":{\"time\":1,\"n\":1}}\n{\"value\":{\"time\":1,\"n\":2}}\n{\"value\":{\"time\":2,\"n\":3}}\n".to_vec();
        let out = deduplicate("json", data, &["value.time".to_string()], &[]).unwrap();
        let lines = out.split(|b| *b == b'\n').filter(|l| !l.is_empty()).count();
        assert_eq!(lines, 2);
    }
}
