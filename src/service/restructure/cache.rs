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
    io::{self, Write},
    path::PathBuf,
    sync::Arc,
};

use bytes::Bytes;
use config::{
    get_config, metrics,
    meta::{
        offsets::TopicPartition,
        topic::{BinKey, Ledger, Transaction, BIN_WRITE},
    },
    utils::{file::get_file_contents, json},
};
use hashlink::lru_cache::LruCache;
use infra::storage;

use super::{
    super::{compress, convert},
    accountant::Accountant,
    path,
};

const MAX_SCHEMA_SUFFIX: u32 = 99;

/// One open output file: a staged local temp file behind a compressed stream
/// and a format converter. Closing publishes the staged bytes atomically and
/// commits the entry's ledger; an errored entry discards both.
pub struct FileCache {
    path: String,
    topic: String,
    staged: PathBuf,
    converter: Box<dyn convert::RecordConverter>,
    ledger: Ledger,
    has_error: bool,
}

impl FileCache {
    /// Opens the staged stream for `path`. A pre-existing target is replayed
    /// through decompress and recompress so new records append to it; a
    /// target that fails to decompress is rotated aside and the file starts
    /// fresh.
    pub async fn new(
        path: String,
        topic: String,
        staged: PathBuf,
        example: &json::Value,
    ) -> Result<Self, anyhow::Error> {
        let cfg = get_config();
        let existing = match storage::get_opt(storage::target(), &path).await? {
            Some(data) => match compress::decompress(&cfg.format.compression, &data) {
                Ok(content) => Some(content),
                Err(e) => {
                    log::error!("[FILECACHE] corrupt target {path}, rotating aside: {e}");
                    rotate_corrupted(&path).await?;
                    None
                }
            },
            None => None,
        };
        let file = std::fs::File::create(&staged)?;
        let mut writer = compress::writer(
            &cfg.format.compression,
            &entry_name(&path, &cfg.format.compression),
            file,
        )?;
        if let Some(content) = &existing {
            writer.write_all(content)?;
        }
        let converter = convert::converter_for(
            &cfg.format.record_format,
            writer,
            example,
            existing.is_none(),
            existing.as_deref(),
        )?;
        Ok(Self {
            path,
            topic,
            staged,
            converter,
            ledger: Ledger::new(),
            has_error: false,
        })
    }

    /// Serialises one record. True appends the transaction to the ledger;
    /// false is a schema mismatch and writes nothing.
    pub fn write(&mut self, record: &json::Value, tx: &Transaction) -> Result<bool, anyhow::Error> {
        match self.converter.write_record(record) {
            Ok(true) => {
                self.ledger.add(tx);
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(e) => {
                self.has_error = true;
                Err(e)
            }
        }
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.converter.flush()
    }

    /// Finishes the stream, optionally deduplicates, publishes the staged
    /// file at the final path and hands the ledger to the accountant. With
    /// the error flag set the staged bytes are discarded and nothing is
    /// committed.
    pub async fn close(self, accountant: &Accountant) -> Result<(), anyhow::Error> {
        let FileCache {
            path,
            topic,
            staged,
            converter,
            ledger,
            has_error,
        } = self;
        let finished = converter.finish();
        if has_error || finished.is_err() {
            if let Err(e) = finished {
                log::error!("[FILECACHE] finish error for {path}: {e}");
            }
            log::warn!("[FILECACHE] discarding staged output for {path}");
            let _ = std::fs::remove_file(&staged);
            return Ok(());
        }

        let mut data = get_file_contents(&staged)?;
        let dedup = config::dedup_for(&topic);
        if dedup.enabled {
            let cfg = get_config();
            let content = compress::decompress(&cfg.format.compression, &data)?;
            let unique = convert::deduplicate(
                &cfg.format.record_format,
                content,
                &dedup.distinct_fields,
                &dedup.ignore_fields,
            )?;
            data = compress::compress(
                &cfg.format.compression,
                &entry_name(&path, &cfg.format.compression),
                &unique,
            )?;
        }
        storage::put(storage::target(), &path, Bytes::from(data)).await?;
        metrics::OUTPUT_FILES_PUBLISHED
            .with_label_values(&[&topic])
            .inc();
        accountant.process(ledger).await?;
        let _ = std::fs::remove_file(&staged);
        Ok(())
    }

    /// Drops the entry without publishing, keeping any published target
    /// untouched.
    pub fn close_discard(self) {
        let _ = self.converter.finish();
        let _ = std::fs::remove_file(&self.staged);
    }
}

/// Bounded population of open output files, one per worker. Eviction closes
/// the least-recently-used entry, which publishes it.
pub struct FileCacheStore {
    caches: LruCache<String, FileCache>,
    capacity: usize,
    tmp_dir: PathBuf,
    accountant: Arc<Accountant>,
    seq: u64,
}

impl FileCacheStore {
    pub fn new(accountant: Arc<Accountant>, tmp_dir: impl Into<PathBuf>) -> Self {
        Self {
            caches: LruCache::new_unbounded(),
            capacity: get_config().limit.cache_size,
            tmp_dir: tmp_dir.into(),
            accountant,
            seq: 0,
        }
    }

    /// Routes one record to its output file, rotating the path suffix past
    /// schema-incompatible files.
    pub async fn write(
        &mut self,
        topic: &str,
        record: &json::Value,
        tp: &TopicPartition,
        offset: i64,
    ) -> Result<(), anyhow::Error> {
        let cfg = get_config();
        let extension = format!(
            "{}{}",
            convert::extension(&cfg.format.record_format),
            compress::extension(&cfg.format.compression)
        );
        let mut suffix = 0;
        loop {
            if suffix > MAX_SCHEMA_SUFFIX {
                anyhow::bail!("no schema-compatible output path for a {topic} record");
            }
            let org = path::organize(&cfg.common.path_factory, topic, record, suffix, &extension)?;
            let tx = Transaction {
                tp: tp.clone(),
                offset,
                bin: BinKey {
                    topic: topic.to_string(),
                    device: org.category.clone(),
                    category: BIN_WRITE.to_string(),
                    time: org.time_bucket.clone(),
                },
            };

            if let Some(entry) = self.caches.get_mut(&org.path) {
                match entry.write(record, &tx)? {
                    true => {
                        metrics::RECORDS_ROUTED.with_label_values(&[topic]).inc();
                        return Ok(());
                    }
                    false => {
                        suffix += 1;
                        continue;
                    }
                }
            }

            while self.caches.len() >= self.capacity {
                self.evict().await?;
            }

            self.seq += 1;
            let staged = self
                .tmp_dir
                .join(format!("{}.{}", org.path.replace('/', "_"), self.seq));
            let mut entry =
                FileCache::new(org.path.clone(), topic.to_string(), staged, record).await?;
            match entry.write(record, &tx) {
                Ok(true) => {
                    self.caches.insert(org.path, entry);
                    metrics::RECORDS_ROUTED.with_label_values(&[topic]).inc();
                    return Ok(());
                }
                Ok(false) => {
                    entry.close_discard();
                    suffix += 1;
                }
                Err(e) => {
                    entry.close_discard();
                    return Err(e);
                }
            }
        }
    }

    async fn evict(&mut self) -> Result<(), anyhow::Error> {
        if let Some((_, entry)) = self.caches.remove_lru() {
            metrics::CACHE_EVICTIONS.inc();
            entry.close(&self.accountant).await?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        for (_, entry) in self.caches.iter_mut() {
            entry.flush()?;
        }
        Ok(())
    }

    /// Closes every entry in least-recently-used order, publishing clean
    /// outputs and discarding errored ones. The first close error is
    /// reported after the drain completes.
    pub async fn close(&mut self) -> Result<(), anyhow::Error> {
        let mut first_error = None;
        while let Some((path, entry)) = self.caches.remove_lru() {
            if let Err(e) = entry.close(&self.accountant).await {
                log::error!("[FILECACHE] close error for {path}: {e}");
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    pub fn len(&self) -> usize {
        self.caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }
}

fn entry_name(path: &str, compression: &str) -> String {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.strip_suffix(compress::extension(compression))
        .unwrap_or(name)
        .to_string()
}

async fn rotate_corrupted(path: &str) -> Result<(), anyhow::Error> {
    for i in 0..=MAX_SCHEMA_SUFFIX {
        let target = if i == 0 {
            format!("{path}.corrupted")
        } else {
            format!("{path}.corrupted-{i}")
        };
        if !storage::exists(storage::target(), &target).await? {
            storage::rename(storage::target(), path, &target).await?;
            return Ok(());
        }
    }
    log::warn!("[FILECACHE] corrupted rotation exhausted for {path}, deleting");
    storage::del(storage::target(), path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_name_strips_compression_extension() {
        assert_eq!(entry_name("t/p/u/s/20240101_00.csv.gz", "gzip"), "20240101_00.csv");
        assert_eq!(entry_name("t/p/u/s/20240101_00.json.zip", "zip"), "20240101_00.json");
        assert_eq!(entry_name("t/p/u/s/20240101_00.csv", "none"), "20240101_00.csv");
    }
}
