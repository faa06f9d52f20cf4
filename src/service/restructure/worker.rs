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

use anyhow::Context;
use apache_avro::Reader as AvroReader;
use config::{metrics, meta::topic::TopicFile, utils::json};
use infra::storage;

use super::cache::FileCacheStore;

/// Decodes one landing-zone file and routes every record through the cache
/// store. Record `index` sits at offset `range.from + index`. The store is
/// flushed at end of file, not closed: entries are reused across files.
pub async fn process_file(
    store: &mut FileCacheStore,
    file: &TopicFile,
) -> Result<u64, anyhow::Error> {
    let data = storage::get(storage::source(), &file.path).await?;
    if data.is_empty() {
        log::warn!("[WORKER] source file {} is empty, skipping", file.path);
        metrics::FILES_SKIPPED
            .with_label_values(&[&file.topic, "empty"])
            .inc();
        return Ok(0);
    }

    let reader = AvroReader::new(data.as_ref())
        .with_context(|| format!("cannot open avro container {}", file.path))?;
    let mut count = 0;
    for (index, value) in reader.enumerate() {
        let value = value.with_context(|| format!("corrupt record in {}", file.path))?;
        let record: json::Value = value
            .try_into()
            .map_err(|e: apache_avro::Error| anyhow::anyhow!("record is not json-representable: {e}"))?;
        let offset = file.range.from + index as i64;
        store
            .write(&file.topic, &record, &file.range.tp, offset)
            .await?;
        count += 1;
    }
    store.flush()?;
    metrics::FILES_PROCESSED
        .with_label_values(&[&file.topic])
        .inc();
    log::debug!("[WORKER] processed {}: {count} records", file.path);
    Ok(count)
}
