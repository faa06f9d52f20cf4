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

use std::{collections::BTreeMap, fmt, io};

use serde::{Deserialize, Serialize};

/// One Kafka topic-partition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TopicPartition {
    pub topic: String,
    pub partition: i32,
}

impl TopicPartition {
    pub fn new(topic: impl Into<String>, partition: i32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for TopicPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.topic, self.partition)
    }
}

/// Closed interval of offsets covered by one landing-zone file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OffsetRange {
    pub tp: TopicPartition,
    pub from: i64,
    pub to: i64,
}

impl OffsetRange {
    pub fn new(tp: TopicPartition, from: i64, to: i64) -> Result<Self, anyhow::Error> {
        anyhow::ensure!(from <= to, "offset range [{from},{to}] is inverted");
        Ok(Self { tp, from, to })
    }

    /// Parses the sink file name form `<topic>+<partition>+<from>+<to>[.<ext>]`.
    /// Returns `None` for names the sink did not produce.
    pub fn parse_filename(name: &str) -> Option<Self> {
        let name = name.rsplit('/').next()?;
        let stem = name.split('.').next()?;
        let mut parts = stem.rsplitn(4, '+');
        let to = parts.next()?.parse::<i64>().ok()?;
        let from = parts.next()?.parse::<i64>().ok()?;
        let partition = parts.next()?.parse::<i32>().ok()?;
        let topic = parts.next()?;
        if topic.is_empty() || partition < 0 || from > to {
            return None;
        }
        Some(Self {
            tp: TopicPartition::new(topic, partition),
            from,
            to,
        })
    }

    pub fn format_filename(&self, ext: &str) -> String {
        format!(
            "{}+{}+{}+{}{}",
            self.tp.topic, self.tp.partition, self.from, self.to, ext
        )
    }
}

impl fmt::Display for OffsetRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}+{}", self.tp, self.from, self.to)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct OffsetRow {
    #[serde(rename = "offsetFrom")]
    offset_from: i64,
    #[serde(rename = "offsetTo")]
    offset_to: i64,
    partition: i32,
    topic: String,
}

/// Merged offset intervals per topic-partition.
///
/// Intervals within a partition stay sorted by `from`, pairwise disjoint and
/// non-adjacent: adding `[2,3]` next to `[0,1]` yields the single interval
/// `[0,3]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OffsetRangeSet {
    ranges: BTreeMap<TopicPartition, Vec<(i64, i64)>>,
}

impl OffsetRangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a range, merging it with any overlapping or adjacent neighbours
    /// into exactly one replacement interval.
    pub fn add(&mut self, range: &OffsetRange) {
        let v = self.ranges.entry(range.tp.clone()).or_default();
        let (mut from, mut to) = (range.from, range.to);
        let at = v.partition_point(|(x, _)| *x < from);
        let mut lo = at;
        if lo > 0 && v[lo - 1].1.saturating_add(1) >= from {
            lo -= 1;
        }
        let mut hi = at;
        while hi < v.len() && v[hi].0 <= to.saturating_add(1) {
            hi += 1;
        }
        if lo < hi {
            from = from.min(v[lo].0);
            to = to.max(v[hi - 1].1);
        }
        v.splice(lo..hi, [(from, to)]);
    }

    /// True iff one stored interval fully covers `range`. Partial coverage is
    /// not exposed.
    pub fn contains(&self, range: &OffsetRange) -> bool {
        let Some(v) = self.ranges.get(&range.tp) else {
            return false;
        };
        let at = v.partition_point(|(x, _)| *x <= range.from);
        at > 0 && v[at - 1].1 >= range.to
    }

    /// Number of merged intervals stored for a partition.
    pub fn size(&self, tp: &TopicPartition) -> usize {
        self.ranges.get(tp).map_or(0, |v| v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.values().all(|v| v.is_empty())
    }

    pub fn merge(&mut self, other: &OffsetRangeSet) {
        for range in other.iter() {
            self.add(&range);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = OffsetRange> + '_ {
        self.ranges.iter().flat_map(|(tp, v)| {
            v.iter().map(move |(from, to)| OffsetRange {
                tp: tp.clone(),
                from: *from,
                to: *to,
            })
        })
    }

    pub fn write_csv<W: io::Write>(&self, out: W) -> Result<(), anyhow::Error> {
        let mut w = csv::Writer::from_writer(out);
        for range in self.iter() {
            w.serialize(OffsetRow {
                offset_from: range.from,
                offset_to: range.to,
                partition: range.tp.partition,
                topic: range.tp.topic,
            })?;
        }
        w.flush()?;
        Ok(())
    }

    pub fn read_csv<R: io::Read>(input: R) -> Result<Self, anyhow::Error> {
        let mut set = Self::new();
        let mut r = csv::Reader::from_reader(input);
        for row in r.deserialize() {
            let row: OffsetRow = row?;
            set.add(&OffsetRange::new(
                TopicPartition::new(row.topic, row.partition),
                row.offset_from,
                row.offset_to,
            )?);
        }
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(from: i64, to: i64) -> OffsetRange {
        OffsetRange::new(TopicPartition::new("test", 0), from, to).unwrap()
    }

    #[test]
    fn test_parse_filename() {
        let range = OffsetRange::parse_filename("test_topic+2+100+199.avro").unwrap();
        assert_eq!(range.tp, TopicPartition::new("test_topic", 2));
        assert_eq!((range.from, range.to), (100, 199));

        let range = OffsetRange::parse_filename("dir/sub/test+0+0+0.avro").unwrap();
        assert_eq!((range.from, range.to), (0, 0));

        assert!(OffsetRange::parse_filename("_SUCCESS").is_none());
        assert!(OffsetRange::parse_filename("test+0+5+1.avro").is_none());
        assert!(OffsetRange::parse_filename("test+x+0+1.avro").is_none());
    }

    #[test]
    fn test_filename_round_trip() {
        let range = OffsetRange::new(TopicPartition::new("a+b", 12), 3, 900).unwrap();
        let parsed = OffsetRange::parse_filename(&range.format_filename(".avro")).unwrap();
        assert_eq!(parsed, range);
    }

    #[test]
    fn test_add_disjoint() {
        let mut set = OffsetRangeSet::new();
        set.add(&range(0, 1));
        set.add(&range(10, 20));
        assert_eq!(set.size(&TopicPartition::new("test", 0)), 2);
        assert!(set.contains(&range(0, 1)));
        assert!(set.contains(&range(15, 20)));
        assert!(!set.contains(&range(1, 10)));
    }

    #[test]
    fn test_add_adjacent_merges() {
        let mut set = OffsetRangeSet::new();
        set.add(&range(0, 1));
        set.add(&range(2, 3));
        assert_eq!(set.size(&TopicPartition::new("test", 0)), 1);
        assert!(set.contains(&range(0, 3)));
    }

    #[test]
    fn test_add_overlapping_merges() {
        let mut set = OffsetRangeSet::new();
        set.add(&range(0, 5));
        set.add(&range(10, 20));
        set.add(&range(25, 30));
        set.add(&range(3, 26));
        assert_eq!(set.size(&TopicPartition::new("test", 0)), 1);
        assert!(set.contains(&range(0, 30)));
        assert!(!set.contains(&range(0, 31)));
    }

    #[test]
    fn test_add_covered_is_noop() {
        let mut set = OffsetRangeSet::new();
        set.add(&range(0, 100));
        set.add(&range(10, 20));
        assert_eq!(set.size(&TopicPartition::new("test", 0)), 1);
        assert!(set.contains(&range(0, 100)));
    }

    #[test]
    fn test_contains_needs_single_interval_cover() {
        let mut set = OffsetRangeSet::new();
        set.add(&range(0, 4));
        set.add(&range(6, 9));
        assert!(!set.contains(&range(0, 9)));
        assert!(set.contains(&range(6, 9)));
    }

    #[test]
    fn test_partitions_are_independent() {
        let mut set = OffsetRangeSet::new();
        set.add(&OffsetRange::new(TopicPartition::new("test", 0), 0, 5).unwrap());
        set.add(&OffsetRange::new(TopicPartition::new("test", 1), 6, 9).unwrap());
        assert!(!set.contains(&OffsetRange::new(TopicPartition::new("test", 1), 0, 5).unwrap()));
        assert_eq!(set.size(&TopicPartition::new("test", 0)), 1);
        assert_eq!(set.size(&TopicPartition::new("test", 1)), 1);
    }

    #[test]
    fn test_csv_round_trip() {
        let mut set = OffsetRangeSet::new();
        set.add(&range(0, 1));
        set.add(&range(10, 20));
        set.add(&OffsetRange::new(TopicPartition::new("other", 3), 7, 7).unwrap());

        let mut buf = Vec::new();
        set.write_csv(&mut buf).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.starts_with("offsetFrom,offsetTo,partition,topic\n"));

        let read = OffsetRangeSet::read_csv(buf.as_slice()).unwrap();
        assert_eq!(read, set);
    }

    #[test]
    fn test_csv_read_merges_adjacent_rows() {
        let data = "offsetFrom,offsetTo,partition,topic\n0,1,0,test\n2,3,0,test\n";
        let set = OffsetRangeSet::read_csv(data.as_bytes()).unwrap();
        assert_eq!(set.size(&TopicPartition::new("test", 0)), 1);
        assert!(set.contains(&range(0, 3)));
    }
}
