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
    collections::HashSet,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use anyhow::Context;
use apache_avro::Reader as AvroReader;
use config::{
    get_config, metrics,
    meta::topic::{BinKey, Ledger, TopicFile, BIN_DELETE},
    utils::{flatten, json, time},
};
use hashlink::lru_cache::LruCache;
use infra::{dist_lock, storage};

use super::{
    compress, convert,
    restructure::{accountant::Accountant, path},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckResult {
    Found,
    NotFound,
    FileNotFound,
    BadSchema,
}

struct TargetFile {
    exists: bool,
    headers: Option<Vec<String>>,
    timestamps: HashSet<i64>,
}

/// Read-only cache over target files: per output path, the set of record
/// timestamps present and, for CSV, the header for schema checks. Bounded
/// like the write-side cache and cleared wholesale every
/// `cleaner.cache_offsets_size` checked records.
pub struct TimestampFileCacheStore {
    caches: LruCache<String, TargetFile>,
    capacity: usize,
    clear_every: usize,
    checked: usize,
}

impl Default for TimestampFileCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TimestampFileCacheStore {
    pub fn new() -> Self {
        let cfg = get_config();
        Self {
            caches: LruCache::new_unbounded(),
            capacity: cfg.cleaner.cache_size,
            clear_every: cfg.cleaner.cache_offsets_size,
            checked: 0,
        }
    }

    /// Resolves one record against the target at `path`.
    pub async fn check(
        &mut self,
        path: &str,
        record: &json::Value,
        time_nanos: i64,
    ) -> Result<CheckResult, anyhow::Error> {
        self.checked += 1;
        if self.clear_every > 0 && self.checked % self.clear_every == 0 {
            self.caches.clear();
        }
        if self.caches.get(path).is_none() {
            let entry = load_target(path).await?;
            while self.caches.len() >= self.capacity {
                self.caches.remove_lru();
            }
            self.caches.insert(path.to_string(), entry);
        }
        let Some(entry) = self.caches.get(path) else {
            return Ok(CheckResult::FileNotFound);
        };
        if !entry.exists {
            return Ok(CheckResult::FileNotFound);
        }
        if let Some(headers) = &entry.headers {
            let keys = flatten::flatten(record)?.keys().cloned().collect::<Vec<_>>();
            if &keys != headers {
                return Ok(CheckResult::BadSchema);
            }
        }
        if entry.timestamps.contains(&time_nanos) {
            Ok(CheckResult::Found)
        } else {
            Ok(CheckResult::NotFound)
        }
    }
}

async fn load_target(path: &str) -> Result<TargetFile, anyhow::Error> {
    let cfg = get_config();
    let Some(data) = storage::get_opt(storage::target(), path).await? else {
        return Ok(TargetFile {
            exists: false,
            headers: None,
            timestamps: HashSet::new(),
        });
    };
    let content = compress::decompress(&cfg.format.compression, &data)?;
    match cfg.format.record_format.as_str() {
        "json" => {
            let mut timestamps = HashSet::new();
            for line in content.split(|b| *b == b'\n').filter(|l| !l.is_empty()) {
                let record: json::Value = json::from_slice(line)?;
                if let Ok(t) = path::record_time(&record) {
                    timestamps.insert(t);
                }
            }
            Ok(TargetFile {
                exists: true,
                headers: None,
                timestamps,
            })
        }
        _ => {
            let mut reader = csv::Reader::from_reader(content.as_slice());
            let headers = reader
                .headers()?
                .iter()
                .map(|h| h.to_string())
                .collect::<Vec<_>>();
            let mut timestamps = HashSet::new();
            if let Some(idx) = headers.iter().position(|h| h == "value.time") {
                for row in reader.records() {
                    let row = row?;
                    let Some(cell) = row.get(idx) else {
                        continue;
                    };
                    if let Ok(t) = cell.parse::<i64>() {
                        timestamps.insert(t);
                    } else if let Ok(f) = cell.parse::<f64>() {
                        timestamps.insert(f as i64);
                    }
                }
            }
            Ok(TargetFile {
                exists: true,
                headers: Some(headers),
                timestamps,
            })
        }
    }
}

/// True when every record of the source file, in order, resolves to FOUND in
/// its expected target.
async fn file_fully_extracted(
    cache: &mut TimestampFileCacheStore,
    file: &TopicFile,
) -> Result<bool, anyhow::Error> {
    let cfg = get_config();
    let data = storage::get(storage::source(), &file.path).await?;
    if data.is_empty() {
        log::warn!("[CLEANER] source file {} is empty, retained", file.path);
        return Ok(false);
    }
    let extension = format!(
        "{}{}",
        convert::extension(&cfg.format.record_format),
        compress::extension(&cfg.format.compression)
    );
    let reader = AvroReader::new(data.as_ref())
        .with_context(|| format!("cannot open avro container {}", file.path))?;
    for value in reader {
        let value = value.with_context(|| format!("corrupt record in {}", file.path))?;
        let record: json::Value = value
            .try_into()
            .map_err(|e: apache_avro::Error| anyhow::anyhow!("record is not json-representable: {e}"))?;
        let time_nanos = path::record_time(&record)?;
        let mut suffix = 0;
        loop {
            if suffix > 99 {
                return Ok(false);
            }
            let org =
                path::organize(&cfg.common.path_factory, &file.topic, &record, suffix, &extension)?;
            match cache.check(&org.path, &record, time_nanos).await? {
                CheckResult::Found => break,
                CheckResult::BadSchema => suffix += 1,
                CheckResult::NotFound | CheckResult::FileNotFound => return Ok(false),
            }
        }
    }
    Ok(true)
}

/// One cleaner pass: delete landing files whose age passed the threshold,
/// whose range the accountant knows, and whose every record is verifiably
/// present in its target. The offset range stays in the accountant as a
/// historical record.
pub async fn run_pass(
    accountant: Arc<Accountant>,
    cancel: Arc<AtomicBool>,
) -> Result<(), anyhow::Error> {
    let started = std::time::Instant::now();
    let mut cache = TimestampFileCacheStore::new();
    let mut deleted = 0;
    let mut retained = 0;

    'discover: for prefix in config::input_prefixes() {
        let topics = storage::list_dirs(storage::source(), &prefix).await?;
        for topic in topics {
            if cancel.load(Ordering::Relaxed) {
                log::info!("[CLEANER] pass cancelled");
                break 'discover;
            }
            if config::is_topic_excluded(&topic) {
                continue;
            }
            let locker = match dist_lock::try_lock(&topic).await {
                Ok(Some(locker)) => locker,
                Ok(None) => {
                    log::info!("[CLEANER] topic {topic} skipped, locked by another process");
                    continue;
                }
                Err(e) => {
                    log::error!("[CLEANER] lock error for topic {topic}: {e}");
                    continue;
                }
            };
            if let Err(e) = clean_topic(
                &accountant,
                &mut cache,
                &prefix,
                &topic,
                &cancel,
                &mut deleted,
                &mut retained,
            )
            .await
            {
                log::error!("[CLEANER] cleaning topic {topic} failed: {e}");
            }
            if let Err(e) = dist_lock::unlock(&locker).await {
                log::error!("[CLEANER] unlock {topic} error: {e}");
            }
        }
    }

    accountant.flush().await?;
    log::info!(
        "[CLEANER] pass done: {deleted} files deleted, {retained} retained in {:.3}s",
        started.elapsed().as_secs_f64(),
    );
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn clean_topic(
    accountant: &Accountant,
    cache: &mut TimestampFileCacheStore,
    prefix: &str,
    topic: &str,
    cancel: &AtomicBool,
    deleted: &mut usize,
    retained: &mut usize,
) -> Result<(), anyhow::Error> {
    let cfg = get_config();
    let dir = if prefix.is_empty() {
        topic.to_string()
    } else {
        format!("{prefix}/{topic}")
    };
    let now = time::now();
    for meta in storage::list(storage::source(), &dir).await? {
        if cancel.load(Ordering::Relaxed) {
            break;
        }
        let location = meta.location.to_string();
        let Some(file) = TopicFile::new(topic, location, meta.last_modified, meta.size) else {
            continue;
        };
        if file.age_seconds(now) < cfg.cleaner.age_days * 86_400 {
            continue;
        }
        if !accountant.contains(&file.range) {
            continue;
        }
        match file_fully_extracted(cache, &file).await {
            Ok(true) => {
                storage::del(storage::source(), &file.path).await?;
                metrics::FILES_DELETED.with_label_values(&[topic]).inc();
                *deleted += 1;
                log::info!("[CLEANER] deleted extracted source file {}", file.path);
                if cfg.cleaner.emit_delete_bins {
                    let mut ledger = Ledger::new();
                    ledger.add_bin(
                        BinKey {
                            topic: topic.to_string(),
                            device: file.range.tp.partition.to_string(),
                            category: BIN_DELETE.to_string(),
                            time: time::hour_bucket(
                                now.timestamp_nanos_opt().unwrap_or_default(),
                            ),
                        },
                        1,
                    );
                    accountant.process(ledger).await?;
                }
            }
            Ok(false) => {
                *retained += 1;
                log::debug!("[CLEANER] source file {} retained", file.path);
            }
            Err(e) => {
                *retained += 1;
                log::error!("[CLEANER] verification of {} failed: {e}", file.path);
            }
        }
    }
    Ok(())
}
