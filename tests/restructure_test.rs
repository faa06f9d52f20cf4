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

use std::{
    fs,
    path::Path,
    sync::{atomic::AtomicBool, Arc},
    time::{Duration, SystemTime},
};

use apache_avro::{Schema, Writer};
use config::meta::offsets::{OffsetRange, OffsetRangeSet, TopicPartition};
use restructure::service::{cleaner, compress, restructure as pipeline};
use serde::Serialize;

const SCHEMA: &str = r#"
{
  "type": "record",
  "name": "Observation",
  "fields": [
    {"name": "key", "type": {"type": "record", "name": "ObservationKey", "fields": [
      {"name": "projectId", "type": "string"},
      {"name": "userId", "type": "string"},
      {"name": "sourceId", "type": "string"}
    ]}},
    {"name": "value", "type": {"type": "record", "name": "ObservationValue", "fields": [
      {"name": "time", "type": "long"},
      {"name": "battery", "type": "double"}
    ]}}
  ]
}
"#;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Key {
    project_id: String,
    user_id: String,
    source_id: String,
}

#[derive(Serialize)]
struct Value {
    time: i64,
    battery: f64,
}

#[derive(Serialize)]
struct Observation {
    key: Key,
    value: Value,
}

// 2024-01-01T00:00:00Z
const T0: i64 = 1_704_067_200_000_000_000;
const HOUR: i64 = 3_600_000_000_000;

fn obs(time: i64) -> Observation {
    Observation {
        key: Key {
            project_id: "p1".into(),
            user_id: "u1".into(),
            source_id: "s1".into(),
        },
        value: Value { time, battery: 0.5 },
    }
}

fn write_avro(path: &Path, records: &[Observation]) {
    let schema = Schema::parse_str(SCHEMA).unwrap();
    let mut writer = Writer::new(&schema, Vec::new());
    for record in records {
        writer.append_ser(record).unwrap();
    }
    let data = writer.into_inner().unwrap();
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, data).unwrap();
}

fn age_file(path: &Path, days: u64) {
    let file = fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() - Duration::from_secs(days * 86_400))
        .unwrap();
}

fn read_gz_csv(path: &Path) -> String {
    let data = fs::read(path).unwrap();
    String::from_utf8(compress::decompress("gzip", &data).unwrap()).unwrap()
}

fn range(from: i64, to: i64) -> OffsetRange {
    OffsetRange::new(TopicPartition::new("test", 0), from, to).unwrap()
}

#[tokio::test]
async fn test_restructure_end_to_end() {
    let source_dir = tempfile::tempdir().unwrap();
    let target_dir = tempfile::tempdir().unwrap();
    std::env::set_var("RS_SOURCE_LOCAL_DIR", source_dir.path());
    std::env::set_var("RS_TARGET_LOCAL_DIR", target_dir.path());
    std::env::set_var("RS_MINIMUM_FILE_AGE", "0");
    std::env::set_var("RS_CACHE_SIZE", "1");
    std::env::set_var("RS_NUM_THREADS", "1");
    std::env::set_var("RS_FORMAT", "csv");
    std::env::set_var("RS_COMPRESSION", "gzip");
    config::refresh_config().unwrap();

    // two records in the first hour, then a file spanning two hours so that
    // cache capacity 1 forces an eviction mid-file
    write_avro(
        &source_dir.path().join("test/test+0+0+1.avro"),
        &[obs(T0), obs(T0 + 1)],
    );
    write_avro(
        &source_dir.path().join("test/test+0+2+3.avro"),
        &[obs(T0 + 2), obs(T0 + HOUR)],
    );

    let tmp = tempfile::tempdir().unwrap();
    let accountant = pipeline::accountant::Accountant::new(tmp.path())
        .await
        .unwrap();
    let cancel = Arc::new(AtomicBool::new(false));
    pipeline::run_pass(accountant.clone(), tmp.path(), cancel.clone())
        .await
        .unwrap();

    let out0 = target_dir.path().join("test/p1/u1/s1/20240101_00.csv.gz");
    let out1 = target_dir.path().join("test/p1/u1/s1/20240101_01.csv.gz");
    let content0 = read_gz_csv(&out0);
    assert_eq!(
        content0,
        format!(
            "key.projectId,key.sourceId,key.userId,value.battery,value.time\n\
             p1,s1,u1,0.5,{}\np1,s1,u1,0.5,{}\np1,s1,u1,0.5,{}\n",
            T0,
            T0 + 1,
            T0 + 2
        )
    );
    let content1 = read_gz_csv(&out1);
    assert!(content1.ends_with(&format!("p1,s1,u1,0.5,{}\n", T0 + HOUR)));

    let offsets_file = target_dir.path().join("offsets.csv");
    let offsets = OffsetRangeSet::read_csv(fs::read(&offsets_file).unwrap().as_slice()).unwrap();
    assert_eq!(offsets.size(&TopicPartition::new("test", 0)), 1);
    assert!(offsets.contains(&range(0, 3)));
    assert!(accountant.contains(&range(0, 3)));

    // running the same pass again must not touch outputs or offsets
    let before0 = fs::read(&out0).unwrap();
    let before_offsets = fs::read(&offsets_file).unwrap();
    pipeline::run_pass(accountant.clone(), tmp.path(), cancel.clone())
        .await
        .unwrap();
    assert_eq!(fs::read(&out0).unwrap(), before0);
    assert_eq!(fs::read(&offsets_file).unwrap(), before_offsets);

    // no staged temp leaks
    let staged = fs::read_dir(tmp.path().join("worker-0"))
        .unwrap()
        .collect::<Vec<_>>();
    assert!(staged.is_empty());

    // a corrupt pre-existing target is rotated aside and rebuilt fresh
    let out2 = target_dir.path().join("test/p1/u1/s1/20240101_02.csv.gz");
    fs::create_dir_all(out2.parent().unwrap()).unwrap();
    fs::write(&out2, b"this is not gzip").unwrap();
    write_avro(
        &source_dir.path().join("test/test+0+4+4.avro"),
        &[obs(T0 + 2 * HOUR)],
    );
    pipeline::run_pass(accountant.clone(), tmp.path(), cancel.clone())
        .await
        .unwrap();
    assert!(target_dir
        .path()
        .join("test/p1/u1/s1/20240101_02.csv.gz.corrupted")
        .exists());
    let content2 = read_gz_csv(&out2);
    assert!(content2.ends_with(&format!("p1,s1,u1,0.5,{}\n", T0 + 2 * HOUR)));
    assert!(accountant.contains(&range(0, 4)));

    // cleaner: every source file is old enough, but only files whose records
    // are all present in their targets may go
    for name in ["test+0+0+1.avro", "test+0+2+3.avro", "test+0+4+4.avro"] {
        age_file(&source_dir.path().join("test").join(name), 8);
    }
    fs::remove_file(&out1).unwrap();
    cleaner::run_pass(accountant.clone(), cancel.clone())
        .await
        .unwrap();

    assert!(!source_dir.path().join("test/test+0+0+1.avro").exists());
    assert!(!source_dir.path().join("test/test+0+4+4.avro").exists());
    // one record of this file lived in the deleted target
    assert!(source_dir.path().join("test/test+0+2+3.avro").exists());

    // offset ranges stay as historical record after deletion
    let offsets = OffsetRangeSet::read_csv(fs::read(&offsets_file).unwrap().as_slice()).unwrap();
    assert!(offsets.contains(&range(0, 4)));

    accountant.close().await.unwrap();
}
