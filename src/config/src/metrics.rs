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

use once_cell::sync::Lazy;
use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

pub const NAMESPACE: &str = "restructure";

pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

pub static RECORDS_ROUTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("records_routed", "Records routed into output caches.").namespace(NAMESPACE),
        &["topic"],
    )
    .expect("Metric created")
});

pub static FILES_PROCESSED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("files_processed", "Source files fully decoded.").namespace(NAMESPACE),
        &["topic"],
    )
    .expect("Metric created")
});

pub static FILES_SKIPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("files_skipped", "Source files skipped per reason.").namespace(NAMESPACE),
        &["topic", "reason"],
    )
    .expect("Metric created")
});

pub static FILES_FAILED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("files_failed", "Source files aborted by an error.").namespace(NAMESPACE),
        &["topic"],
    )
    .expect("Metric created")
});

pub static FILES_DELETED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("files_deleted", "Source files removed by the cleaner.").namespace(NAMESPACE),
        &["topic"],
    )
    .expect("Metric created")
});

pub static OUTPUT_FILES_PUBLISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("output_files_published", "Output files atomically stored.").namespace(NAMESPACE),
        &["topic"],
    )
    .expect("Metric created")
});

pub static CACHE_EVICTIONS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new("cache_evictions", "Cache entries closed to free capacity.").namespace(NAMESPACE),
    )
    .expect("Metric created")
});

pub static LOCKS_CONTENDED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("locks_contended", "Topics skipped because another process held the lock.")
            .namespace(NAMESPACE),
        &["topic"],
    )
    .expect("Metric created")
});

pub fn init() {
    REGISTRY
        .register(Box::new(RECORDS_ROUTED.clone()))
        .expect("Metric registered");
    REGISTRY
        .register(Box::new(FILES_PROCESSED.clone()))
        .expect("Metric registered");
    REGISTRY
        .register(Box::new(FILES_SKIPPED.clone()))
        .expect("Metric registered");
    REGISTRY
        .register(Box::new(FILES_FAILED.clone()))
        .expect("Metric registered");
    REGISTRY
        .register(Box::new(FILES_DELETED.clone()))
        .expect("Metric registered");
    REGISTRY
        .register(Box::new(OUTPUT_FILES_PUBLISHED.clone()))
        .expect("Metric registered");
    REGISTRY
        .register(Box::new(CACHE_EVICTIONS.clone()))
        .expect("Metric registered");
    REGISTRY
        .register(Box::new(LOCKS_CONTENDED.clone()))
        .expect("Metric registered");
}
