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

use chrono::{DateTime, Utc};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

use super::offsets::{OffsetRange, OffsetRangeSet, TopicPartition};

pub const BIN_WRITE: &str = "write";
pub const BIN_DELETE: &str = "deleted";

/// One landing-zone file, as listed from source storage.
#[derive(Debug, Clone)]
pub struct TopicFile {
    pub topic: String,
    pub path: String,
    pub range: OffsetRange,
    pub last_modified: DateTime<Utc>,
    pub size: u64,
}

impl TopicFile {
    /// Builds a topic file from a storage listing entry. Returns `None` for
    /// files the sink did not produce: no avro extension, no offset-range
    /// name, or a name carrying another topic.
    pub fn new(
        topic: &str,
        path: impl Into<String>,
        last_modified: DateTime<Utc>,
        size: u64,
    ) -> Option<Self> {
        let path = path.into();
        if !path.ends_with(crate::FILE_EXT_AVRO) {
            return None;
        }
        let range = OffsetRange::parse_filename(&path)?;
        if range.tp.topic != topic {
            return None;
        }
        Some(Self {
            topic: topic.to_string(),
            path,
            range,
            last_modified,
            size,
        })
    }

    pub fn age_seconds(&self, now: DateTime<Utc>) -> i64 {
        (now - self.last_modified).num_seconds()
    }
}

/// Hourly counter key for operational accounting.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BinKey {
    pub topic: String,
    pub device: String,
    pub category: String,
    pub time: String,
}

pub type Bins = HashMap<BinKey, i64>;

#[derive(Debug, Serialize, Deserialize)]
struct BinRow {
    topic: String,
    device: String,
    category: String,
    time: String,
    count: i64,
}

pub fn write_bins_csv<W: io::Write>(bins: &Bins, out: W) -> Result<(), anyhow::Error> {
    let mut w = csv::Writer::from_writer(out);
    let mut rows = bins.iter().collect::<Vec<_>>();
    rows.sort_by(|(a, _), (b, _)| {
        (&a.topic, &a.device, &a.category, &a.time).cmp(&(&b.topic, &b.device, &b.category, &b.time))
    });
    for (key, count) in rows {
        w.serialize(BinRow {
            topic: key.topic.clone(),
            device: key.device.clone(),
            category: key.category.clone(),
            time: key.time.clone(),
            count: *count,
        })?;
    }
    w.flush()?;
    Ok(())
}

pub fn read_bins_csv<R: io::Read>(input: R) -> Result<Bins, anyhow::Error> {
    let mut bins = Bins::new();
    let mut r = csv::Reader::from_reader(input);
    for row in r.deserialize() {
        let row: BinRow = row?;
        let key = BinKey {
            topic: row.topic,
            device: row.device,
            category: row.category,
            time: row.time,
        };
        *bins.entry(key).or_insert(0) += row.count;
    }
    Ok(bins)
}

/// One accepted record, as accounted by a cache entry.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub tp: TopicPartition,
    pub offset: i64,
    pub bin: BinKey,
}

/// Worker-local staging of offsets and bins. Merged into the accountant only
/// when the owning cache entry closes without error.
#[derive(Debug, Default, Clone)]
pub struct Ledger {
    pub offsets: OffsetRangeSet,
    pub bins: Bins,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, tx: &Transaction) {
        self.offsets.add(&OffsetRange {
            tp: tx.tp.clone(),
            from: tx.offset,
            to: tx.offset,
        });
        *self.bins.entry(tx.bin.clone()).or_insert(0) += 1;
    }

    pub fn add_bin(&mut self, bin: BinKey, count: i64) {
        *self.bins.entry(bin).or_insert(0) += count;
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty() && self.bins.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn test_topic_file_from_listing() {
        let modified = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let file = TopicFile::new("test", "in/test/test+0+0+9.avro", modified, 128).unwrap();
        assert_eq!(file.range.tp, TopicPartition::new("test", 0));
        assert_eq!((file.range.from, file.range.to), (0, 9));
        assert_eq!(file.age_seconds(modified + chrono::Duration::seconds(90)), 90);

        assert!(TopicFile::new("test", "in/test/_SUCCESS", modified, 0).is_none());
        assert!(TopicFile::new("test", "in/test/other+0+0+9.avro", modified, 1).is_none());
        assert!(TopicFile::new("test", "in/test/test+0+0+9.tmp", modified, 1).is_none());
    }

    #[test]
    fn test_ledger_merges_consecutive_offsets() {
        let tp = TopicPartition::new("test", 0);
        let bin = BinKey {
            topic: "test".into(),
            device: "s1".into(),
            category: BIN_WRITE.into(),
            time: "20240101_00".into(),
        };
        let mut ledger = Ledger::new();
        for offset in 0..4 {
            ledger.add(&Transaction {
                tp: tp.clone(),
                offset,
                bin: bin.clone(),
            });
        }
        assert_eq!(ledger.offsets.size(&tp), 1);
        assert_eq!(ledger.bins.get(&bin), Some(&4));
    }

    #[test]
    fn test_bins_csv_round_trip() {
        let mut bins = Bins::new();
        bins.insert(
            BinKey {
                topic: "test".into(),
                device: "s1".into(),
                category: BIN_WRITE.into(),
                time: "20240101_00".into(),
            },
            12,
        );
        bins.insert(
            BinKey {
                topic: "test".into(),
                device: "s2".into(),
                category: BIN_DELETE.into(),
                time: "20240101_01".into(),
            },
            1,
        );

        let mut buf = Vec::new();
        write_bins_csv(&bins, &mut buf).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.starts_with("topic,device,category,time,count\n"));

        let read = read_bins_csv(buf.as_slice()).unwrap();
        assert_eq!(read, bins);
    }
}
