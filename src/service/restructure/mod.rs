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
    path::Path,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
};

use config::{get_config, metrics, meta::topic::TopicFile, utils::time};
use infra::{dist_lock, storage};
use tokio::sync::{mpsc, Mutex};

pub mod accountant;
pub mod cache;
pub mod path;
pub mod worker;

use accountant::Accountant;
use cache::FileCacheStore;

#[derive(Default)]
struct PassStats {
    topics: AtomicUsize,
    files: AtomicUsize,
    failed: AtomicUsize,
    records: AtomicU64,
}

struct TopicJob {
    topic: String,
    files: Vec<TopicFile>,
    locker: dist_lock::Locker,
}

/// One restructure pass: discover topics one directory level below each
/// input prefix, take the per-topic lock, and feed bounded file batches to a
/// fixed pool of workers. Each worker owns its cache store; the accountant
/// is shared.
pub async fn run_pass(
    accountant: Arc<Accountant>,
    tmp_dir: &Path,
    cancel: Arc<AtomicBool>,
) -> Result<(), anyhow::Error> {
    let cfg = get_config();
    let started = std::time::Instant::now();
    let stats = Arc::new(PassStats::default());

    let (tx, rx) = mpsc::channel::<TopicJob>(cfg.limit.num_threads);
    let rx = Arc::new(Mutex::new(rx));
    let mut workers = tokio::task::JoinSet::new();
    for thread_id in 0..cfg.limit.num_threads {
        let rx = rx.clone();
        let accountant = accountant.clone();
        let stats = stats.clone();
        let cancel = cancel.clone();
        let tmp = tmp_dir.join(format!("worker-{thread_id}"));
        workers.spawn(async move {
            if let Err(e) = std::fs::create_dir_all(&tmp) {
                log::error!("[RESTRUCTURE] cannot create worker tmp dir: {e}");
                return;
            }
            let mut store = FileCacheStore::new(accountant.clone(), tmp);
            loop {
                let job = rx.lock().await.recv().await;
                let Some(job) = job else {
                    break;
                };
                process_topic(&mut store, &accountant, job, &stats, &cancel).await;
            }
        });
    }

    'discover: for prefix in config::input_prefixes() {
        let topics = storage::list_dirs(storage::source(), &prefix).await?;
        for topic in topics {
            if cancel.load(Ordering::Relaxed) {
                log::info!("[RESTRUCTURE] pass cancelled");
                break 'discover;
            }
            if config::is_topic_excluded(&topic) {
                log::debug!("[RESTRUCTURE] topic {topic} excluded");
                continue;
            }
            let locker = match dist_lock::try_lock(&topic).await {
                Ok(Some(locker)) => locker,
                Ok(None) => {
                    log::info!("[RESTRUCTURE] topic {topic} skipped, locked by another process");
                    metrics::LOCKS_CONTENDED.with_label_values(&[&topic]).inc();
                    continue;
                }
                Err(e) => {
                    log::error!("[RESTRUCTURE] lock error for topic {topic}: {e}");
                    continue;
                }
            };
            let files = match list_topic_files(&accountant, &prefix, &topic).await {
                Ok(files) => files,
                Err(e) => {
                    log::error!("[RESTRUCTURE] listing topic {topic} failed: {e}");
                    if let Err(e) = dist_lock::unlock(&locker).await {
                        log::error!("[RESTRUCTURE] unlock {topic} error: {e}");
                    }
                    continue;
                }
            };
            if files.is_empty() {
                if let Err(e) = dist_lock::unlock(&locker).await {
                    log::error!("[RESTRUCTURE] unlock {topic} error: {e}");
                }
                continue;
            }
            stats.topics.fetch_add(1, Ordering::Relaxed);
            if tx
                .send(TopicJob {
                    topic,
                    files,
                    locker,
                })
                .await
                .is_err()
            {
                break 'discover;
            }
        }
    }
    drop(tx);
    while workers.join_next().await.is_some() {}

    accountant.flush().await?;
    log::info!(
        "[RESTRUCTURE] pass done: {} topics, {} files ({} failed), {} records in {:.3}s",
        stats.topics.load(Ordering::Relaxed),
        stats.files.load(Ordering::Relaxed),
        stats.failed.load(Ordering::Relaxed),
        stats.records.load(Ordering::Relaxed),
        started.elapsed().as_secs_f64(),
    );
    Ok(())
}

/// Files of one topic worth processing this pass: range parseable, not yet
/// accounted, old enough to be closed by the sink, bounded to keep the lock
/// hold time under its TTL.
async fn list_topic_files(
    accountant: &Accountant,
    prefix: &str,
    topic: &str,
) -> Result<Vec<TopicFile>, anyhow::Error> {
    let cfg = get_config();
    let dir = if prefix.is_empty() {
        topic.to_string()
    } else {
        format!("{prefix}/{topic}")
    };
    let now = time::now();
    let mut files = Vec::new();
    for meta in storage::list(storage::source(), &dir).await? {
        let location = meta.location.to_string();
        let Some(file) = TopicFile::new(topic, location, meta.last_modified, meta.size) else {
            log::debug!("[RESTRUCTURE] ignoring non-range file {}", meta.location);
            continue;
        };
        if accountant.contains(&file.range) {
            metrics::FILES_SKIPPED
                .with_label_values(&[topic, "done"])
                .inc();
            continue;
        }
        if file.age_seconds(now) < cfg.limit.minimum_file_age {
            metrics::FILES_SKIPPED
                .with_label_values(&[topic, "age"])
                .inc();
            continue;
        }
        files.push(file);
    }
    files.sort_by(|a, b| {
        (a.range.tp.partition, a.range.from, &a.path).cmp(&(b.range.tp.partition, b.range.from, &b.path))
    });
    files.truncate(cfg.limit.max_files_per_topic);
    Ok(files)
}

async fn process_topic(
    store: &mut FileCacheStore,
    accountant: &Accountant,
    job: TopicJob,
    stats: &PassStats,
    cancel: &AtomicBool,
) {
    let TopicJob {
        topic,
        files,
        locker,
    } = job;
    log::info!("[RESTRUCTURE] processing topic {topic}: {} files", files.len());
    for file in files {
        if cancel.load(Ordering::Relaxed) {
            break;
        }
        match worker::process_file(store, &file).await {
            Ok(count) => {
                stats.files.fetch_add(1, Ordering::Relaxed);
                stats.records.fetch_add(count, Ordering::Relaxed);
            }
            Err(e) => {
                log::error!("[RESTRUCTURE] file {} failed: {e}", file.path);
                metrics::FILES_FAILED.with_label_values(&[&topic]).inc();
                stats.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
    if let Err(e) = store.close().await {
        log::error!("[RESTRUCTURE] closing caches for topic {topic} failed: {e}");
    }
    if let Err(e) = accountant.flush().await {
        log::error!("[RESTRUCTURE] accountant flush for topic {topic} failed: {e}");
    }
    if let Err(e) = dist_lock::unlock(&locker).await {
        log::error!("[RESTRUCTURE] unlock {topic} error: {e}");
    }
}
