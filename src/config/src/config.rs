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

use std::{path::Path, sync::Arc};

use arc_swap::ArcSwap;
use dotenv_config::EnvConfig;
use dotenvy::dotenv_override;
use hashbrown::HashMap;
use once_cell::sync::Lazy;
use serde::Deserialize;

pub const FILE_EXT_AVRO: &str = ".avro";
pub const FILE_EXT_CSV: &str = ".csv";
pub const FILE_EXT_JSON: &str = ".json";

pub const RECORD_FORMATS: [&str; 2] = ["csv", "json"];
pub const COMPRESSIONS: [&str; 3] = ["none", "gzip", "zip"];
pub const PATH_FACTORIES: [&str; 1] = ["observationKey"];
pub const STORAGE_PROVIDERS: [&str; 4] = ["local", "s3", "azure", "gcs"];

static CONFIG: Lazy<ArcSwap<Config>> = Lazy::new(|| ArcSwap::from(Arc::new(load())));
static TOPICS: Lazy<ArcSwap<HashMap<String, TopicOverride>>> =
    Lazy::new(|| ArcSwap::from(Arc::new(HashMap::new())));

pub fn get_config() -> Arc<Config> {
    CONFIG.load().clone()
}

pub fn get_topics() -> Arc<HashMap<String, TopicOverride>> {
    TOPICS.load().clone()
}

pub fn refresh_config() -> Result<(), anyhow::Error> {
    CONFIG.store(Arc::new(load()));
    Ok(())
}

fn load() -> Config {
    dotenv_override().ok();
    let mut cfg = Config::init().expect("config load error");
    check_config(&mut cfg).expect("config check error");
    cfg
}

/// Builds the effective configuration for this run: environment first, then
/// the optional `restructure.yml` layer, then CLI flags, then validation.
pub fn bootstrap(file: Option<&str>, cli: &CliOverrides) -> Result<(), anyhow::Error> {
    dotenv_override().ok();
    let mut cfg = Config::init().map_err(|e| anyhow::anyhow!("config load error: {e}"))?;
    let mut topics = HashMap::new();
    if let Some(file) = file {
        topics = apply_file_config(&mut cfg, file)?;
    }
    apply_cli_overrides(&mut cfg, cli);
    check_config(&mut cfg)?;
    TOPICS.store(Arc::new(topics));
    CONFIG.store(Arc::new(cfg));
    Ok(())
}

#[derive(EnvConfig)]
pub struct Config {
    pub common: Common,
    pub limit: Limit,
    pub format: Format,
    pub service: Service,
    pub cleaner: Cleaner,
    pub redis: Redis,
    pub source: Source,
    pub target: Target,
    pub s3: S3,
    pub log: Log,
}

#[derive(EnvConfig)]
pub struct Common {
    /// Single-process mode: no Redis, topic locks are process-local no-ops.
    #[env_config(name = "RS_LOCAL_MODE", default = true)]
    pub local_mode: bool,
    #[env_config(name = "RS_TMP_DIR", default = "")]
    pub tmp_dir: String,
    #[env_config(name = "RS_EXCLUDED_TOPICS", default = "")]
    pub excluded_topics: String,
    #[env_config(name = "RS_PATH_FACTORY", default = "observationKey")]
    pub path_factory: String,
}

#[derive(EnvConfig)]
pub struct Limit {
    #[env_config(name = "RS_NUM_THREADS", default = 0, help = "0 means available cores")]
    pub num_threads: usize,
    #[env_config(name = "RS_CACHE_SIZE", default = 100)]
    pub cache_size: usize,
    #[env_config(name = "RS_MAX_FILES_PER_TOPIC", default = 500)]
    pub max_files_per_topic: usize,
    #[env_config(
        name = "RS_MINIMUM_FILE_AGE",
        default = 60,
        help = "Skip source files modified fewer than this many seconds ago"
    )]
    pub minimum_file_age: i64,
}

#[derive(EnvConfig)]
pub struct Format {
    #[env_config(name = "RS_FORMAT", default = "csv")]
    pub record_format: String,
    #[env_config(name = "RS_COMPRESSION", default = "gzip")]
    pub compression: String,
    #[env_config(name = "RS_DEDUPLICATE", default = false)]
    pub deduplicate: bool,
    #[env_config(name = "RS_DISTINCT_FIELDS", default = "")]
    pub distinct_fields: String,
    #[env_config(name = "RS_IGNORE_FIELDS", default = "")]
    pub ignore_fields: String,
}

#[derive(EnvConfig)]
pub struct Service {
    #[env_config(name = "RS_SERVICE_ENABLED", default = false)]
    pub enabled: bool,
    #[env_config(name = "RS_SERVICE_INTERVAL", default = 300)]
    pub interval: u64,
    #[env_config(name = "RS_RESTRUCTURE_ENABLED", default = true)]
    pub restructure: bool,
}

#[derive(EnvConfig)]
pub struct Cleaner {
    #[env_config(name = "RS_CLEANER_ENABLED", default = false)]
    pub enabled: bool,
    #[env_config(name = "RS_CLEANER_INTERVAL", default = 1260)]
    pub interval: u64,
    #[env_config(name = "RS_CLEANER_AGE_DAYS", default = 7)]
    pub age_days: i64,
    #[env_config(name = "RS_CLEANER_CACHE_SIZE", default = 100)]
    pub cache_size: usize,
    #[env_config(
        name = "RS_CLEANER_CACHE_OFFSETS_SIZE",
        default = 500000,
        help = "Clear the target timestamp cache after this many checked records"
    )]
    pub cache_offsets_size: usize,
    #[env_config(name = "RS_CLEANER_EMIT_DELETE_BINS", default = true)]
    pub emit_delete_bins: bool,
}

#[derive(EnvConfig)]
pub struct Redis {
    #[env_config(name = "RS_REDIS_URL", default = "redis://127.0.0.1:6379")]
    pub url: String,
    #[env_config(name = "RS_REDIS_LOCK_PREFIX", default = "restructure/lock")]
    pub lock_prefix: String,
    #[env_config(name = "RS_REDIS_LOCK_TTL", default = 300)]
    pub lock_ttl: u64,
}

#[derive(EnvConfig)]
pub struct Source {
    #[env_config(name = "RS_SOURCE_PROVIDER", default = "local")]
    pub provider: String,
    #[env_config(name = "RS_SOURCE_LOCAL_DIR", default = "./data/input")]
    pub local_dir: String,
    #[env_config(
        name = "RS_SOURCE_INPUTS",
        default = "",
        help = "Comma-separated prefixes under the source root; empty scans the root"
    )]
    pub inputs: String,
}

#[derive(EnvConfig)]
pub struct Target {
    #[env_config(name = "RS_TARGET_PROVIDER", default = "local")]
    pub provider: String,
    #[env_config(name = "RS_TARGET_LOCAL_DIR", default = "./data/output")]
    pub local_dir: String,
}

#[derive(EnvConfig)]
pub struct S3 {
    #[env_config(name = "RS_S3_SERVER_URL", default = "")]
    pub server_url: String,
    #[env_config(name = "RS_S3_REGION_NAME", default = "")]
    pub region_name: String,
    #[env_config(name = "RS_S3_ACCESS_KEY", default = "")]
    pub access_key: String,
    #[env_config(name = "RS_S3_SECRET_KEY", default = "")]
    pub secret_key: String,
    #[env_config(name = "RS_S3_BUCKET_NAME", default = "")]
    pub bucket_name: String,
    #[env_config(name = "RS_S3_BUCKET_PREFIX", default = "")]
    pub bucket_prefix: String,
    #[env_config(name = "RS_S3_CONNECT_TIMEOUT", default = 10)]
    pub connect_timeout: u64,
    #[env_config(name = "RS_S3_REQUEST_TIMEOUT", default = 3600)]
    pub request_timeout: u64,
    #[env_config(name = "RS_S3_FEATURE_FORCE_HOSTED_STYLE", default = false)]
    pub feature_force_hosted_style: bool,
    #[env_config(name = "RS_S3_ALLOW_INVALID_CERTIFICATES", default = false)]
    pub allow_invalid_certificates: bool,
}

#[derive(EnvConfig)]
pub struct Log {
    #[env_config(name = "RS_LOG_LEVEL", default = "info")]
    pub level: String,
}

/// Per-topic overrides, configurable through `restructure.yml` only.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TopicOverride {
    pub exclude: bool,
    pub deduplicate: Option<bool>,
    pub distinct_fields: Option<Vec<String>>,
    pub ignore_fields: Option<Vec<String>>,
}

/// Flag values parsed from the command line, layered over env and file
/// configuration.
#[derive(Debug, Default)]
pub struct CliOverrides {
    pub service: bool,
    pub poll_interval: Option<u64>,
    pub cache_size: Option<usize>,
    pub num_threads: Option<usize>,
    pub max_files_per_topic: Option<usize>,
    pub tmp_dir: Option<String>,
    pub format: Option<String>,
    pub compression: Option<String>,
    pub deduplicate: bool,
    pub clean: bool,
    pub no_restructure: bool,
    pub inputs: Vec<String>,
    pub output: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct FileConfig {
    local_mode: Option<bool>,
    tmp_dir: Option<String>,
    excluded_topics: Option<Vec<String>>,
    path_factory: Option<String>,
    service: FileService,
    worker: FileWorker,
    format: FileFormat,
    cleaner: FileCleaner,
    redis: FileRedis,
    source: FileSource,
    target: FileTarget,
    topics: HashMap<String, TopicOverride>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct FileService {
    enabled: Option<bool>,
    interval: Option<u64>,
    restructure: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct FileWorker {
    num_threads: Option<usize>,
    cache_size: Option<usize>,
    max_files_per_topic: Option<usize>,
    minimum_file_age: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct FileFormat {
    format: Option<String>,
    compression: Option<String>,
    deduplicate: Option<bool>,
    distinct_fields: Option<Vec<String>>,
    ignore_fields: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct FileCleaner {
    enabled: Option<bool>,
    interval: Option<u64>,
    age_days: Option<i64>,
    cache_offsets_size: Option<usize>,
    emit_delete_bins: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct FileRedis {
    url: Option<String>,
    lock_prefix: Option<String>,
    lock_ttl: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct FileSource {
    provider: Option<String>,
    local_dir: Option<String>,
    inputs: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct FileTarget {
    provider: Option<String>,
    local_dir: Option<String>,
}

fn apply_file_config(
    cfg: &mut Config,
    path: &str,
) -> Result<HashMap<String, TopicOverride>, anyhow::Error> {
    let data = std::fs::read_to_string(Path::new(path))
        .map_err(|e| anyhow::anyhow!("cannot read config file {path}: {e}"))?;
    let file: FileConfig = serde_yaml::from_str(&data)
        .map_err(|e| anyhow::anyhow!("cannot parse config file {path}: {e}"))?;

    macro_rules! set {
        ($field:expr, $value:expr) => {
            if let Some(v) = $value {
                $field = v;
            }
        };
    }

    set!(cfg.common.local_mode, file.local_mode);
    set!(cfg.common.tmp_dir, file.tmp_dir);
    set!(
        cfg.common.excluded_topics,
        file.excluded_topics.map(|v| v.join(","))
    );
    set!(cfg.common.path_factory, file.path_factory);

    set!(cfg.service.enabled, file.service.enabled);
    set!(cfg.service.interval, file.service.interval);
    set!(cfg.service.restructure, file.service.restructure);

    set!(cfg.limit.num_threads, file.worker.num_threads);
    set!(cfg.limit.cache_size, file.worker.cache_size);
    set!(cfg.limit.max_files_per_topic, file.worker.max_files_per_topic);
    set!(cfg.limit.minimum_file_age, file.worker.minimum_file_age);

    set!(cfg.format.record_format, file.format.format);
    set!(cfg.format.compression, file.format.compression);
    set!(cfg.format.deduplicate, file.format.deduplicate);
    set!(
        cfg.format.distinct_fields,
        file.format.distinct_fields.map(|v| v.join(","))
    );
    set!(
        cfg.format.ignore_fields,
        file.format.ignore_fields.map(|v| v.join(","))
    );

    set!(cfg.cleaner.enabled, file.cleaner.enabled);
    set!(cfg.cleaner.interval, file.cleaner.interval);
    set!(cfg.cleaner.age_days, file.cleaner.age_days);
    set!(cfg.cleaner.cache_offsets_size, file.cleaner.cache_offsets_size);
    set!(cfg.cleaner.emit_delete_bins, file.cleaner.emit_delete_bins);

    set!(cfg.redis.url, file.redis.url);
    set!(cfg.redis.lock_prefix, file.redis.lock_prefix);
    set!(cfg.redis.lock_ttl, file.redis.lock_ttl);

    set!(cfg.source.provider, file.source.provider);
    set!(cfg.source.local_dir, file.source.local_dir);
    set!(cfg.source.inputs, file.source.inputs.map(|v| v.join(",")));

    set!(cfg.target.provider, file.target.provider);
    set!(cfg.target.local_dir, file.target.local_dir);

    Ok(file.topics)
}

fn apply_cli_overrides(cfg: &mut Config, cli: &CliOverrides) {
    if cli.service {
        cfg.service.enabled = true;
    }
    if let Some(v) = cli.poll_interval {
        cfg.service.interval = v;
    }
    if let Some(v) = cli.cache_size {
        cfg.limit.cache_size = v;
    }
    if let Some(v) = cli.num_threads {
        cfg.limit.num_threads = v;
    }
    if let Some(v) = cli.max_files_per_topic {
        cfg.limit.max_files_per_topic = v;
    }
    if let Some(v) = &cli.tmp_dir {
        cfg.common.tmp_dir = v.clone();
    }
    if let Some(v) = &cli.format {
        cfg.format.record_format = v.clone();
    }
    if let Some(v) = &cli.compression {
        cfg.format.compression = v.clone();
    }
    if cli.deduplicate {
        cfg.format.deduplicate = true;
    }
    if cli.clean {
        cfg.cleaner.enabled = true;
    }
    if cli.no_restructure {
        cfg.service.restructure = false;
    }
    if !cli.inputs.is_empty() {
        cfg.source.inputs = cli.inputs.join(",");
    }
    if let Some(v) = &cli.output {
        cfg.target.local_dir = v.clone();
    }
}

fn check_config(cfg: &mut Config) -> Result<(), anyhow::Error> {
    if !RECORD_FORMATS.contains(&cfg.format.record_format.as_str()) {
        anyhow::bail!("unknown record format: {}", cfg.format.record_format);
    }
    if !COMPRESSIONS.contains(&cfg.format.compression.as_str()) {
        anyhow::bail!("unknown compression: {}", cfg.format.compression);
    }
    if !PATH_FACTORIES.contains(&cfg.common.path_factory.as_str()) {
        anyhow::bail!("unknown path factory: {}", cfg.common.path_factory);
    }
    if !STORAGE_PROVIDERS.contains(&cfg.source.provider.as_str()) {
        anyhow::bail!("unknown source storage provider: {}", cfg.source.provider);
    }
    if !STORAGE_PROVIDERS.contains(&cfg.target.provider.as_str()) {
        anyhow::bail!("unknown target storage provider: {}", cfg.target.provider);
    }
    if cfg.limit.cache_size == 0 {
        anyhow::bail!("cache size must be at least 1");
    }
    if cfg.limit.num_threads == 0 {
        cfg.limit.num_threads = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
    }
    if cfg.cleaner.age_days < 1 {
        anyhow::bail!("cleaner age must be at least one day");
    }
    if cfg.cleaner.cache_size == 0 {
        anyhow::bail!("cleaner cache size must be at least 1");
    }
    if !cfg.common.local_mode && cfg.redis.url.is_empty() {
        anyhow::bail!("redis url is required outside local mode");
    }
    for dir in [&mut cfg.source.local_dir, &mut cfg.target.local_dir] {
        while dir.len() > 1 && dir.ends_with('/') {
            dir.pop();
        }
    }
    Ok(())
}

pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .filter_map(|s| {
            let s = s.trim();
            if s.is_empty() {
                None
            } else {
                Some(s.to_string())
            }
        })
        .collect()
}

/// Prefixes to scan for topic directories; an empty configuration scans the
/// source root itself.
pub fn input_prefixes() -> Vec<String> {
    let inputs = split_list(&get_config().source.inputs);
    if inputs.is_empty() {
        vec![String::new()]
    } else {
        inputs
    }
}

pub fn is_topic_excluded(topic: &str) -> bool {
    if split_list(&get_config().common.excluded_topics)
        .iter()
        .any(|t| t == topic)
    {
        return true;
    }
    get_topics().get(topic).is_some_and(|t| t.exclude)
}

#[derive(Debug, Clone)]
pub struct DedupConfig {
    pub enabled: bool,
    pub distinct_fields: Vec<String>,
    pub ignore_fields: Vec<String>,
}

/// Deduplication settings for a topic: the global format section, with any
/// per-topic override replacing only the fields it sets. Distinct and ignore
/// fields never feed each other.
pub fn dedup_for(topic: &str) -> DedupConfig {
    let cfg = get_config();
    let mut dedup = DedupConfig {
        enabled: cfg.format.deduplicate,
        distinct_fields: split_list(&cfg.format.distinct_fields),
        ignore_fields: split_list(&cfg.format.ignore_fields),
    };
    if let Some(t) = get_topics().get(topic) {
        if let Some(enabled) = t.deduplicate {
            dedup.enabled = enabled;
        }
        if let Some(fields) = &t.distinct_fields {
            dedup.distinct_fields = fields.clone();
        }
        if let Some(fields) = &t.ignore_fields {
            dedup.ignore_fields = fields.clone();
        }
    }
    dedup
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_list() {
        assert_eq!(split_list("a, b ,,c"), ["a", "b", "c"]);
        assert!(split_list("").is_empty());
    }

    #[test]
    fn test_file_config_layer() {
        let mut cfg = Config::init().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("restructure.yml");
        std::fs::write(
            &path,
            r#"
service:
  enabled: true
  interval: 30
format:
  format: json
  compression: zip
worker:
  cacheSize: 3
topics:
  widget_events:
    exclude: true
  widget_battery:
    deduplicate: true
    distinctFields: ["key.sourceId", "value.time"]
"#,
        )
        .unwrap();

        let topics = apply_file_config(&mut cfg, path.to_str().unwrap()).unwrap();
        assert!(cfg.service.enabled);
        assert_eq!(cfg.service.interval, 30);
        assert_eq!(cfg.format.record_format, "json");
        assert_eq!(cfg.format.compression, "zip");
        assert_eq!(cfg.limit.cache_size, 3);
        assert!(topics["widget_events"].exclude);
        assert_eq!(
            topics["widget_battery"].distinct_fields.as_deref().unwrap(),
            ["key.sourceId", "value.time"]
        );
        check_config(&mut cfg).unwrap();
    }

    #[test]
    fn test_cli_overrides() {
        let mut cfg = Config::init().unwrap();
        let cli = CliOverrides {
            service: true,
            poll_interval: Some(10),
            cache_size: Some(1),
            compression: Some("none".into()),
            no_restructure: true,
            inputs: vec!["stage".into()],
            ..Default::default()
        };
        apply_cli_overrides(&mut cfg, &cli);
        assert!(cfg.service.enabled);
        assert!(!cfg.service.restructure);
        assert_eq!(cfg.service.interval, 10);
        assert_eq!(cfg.limit.cache_size, 1);
        assert_eq!(cfg.format.compression, "none");
        assert_eq!(cfg.source.inputs, "stage");
    }

    #[test]
    fn test_check_config_rejects_bad_format() {
        let mut cfg = Config::init().unwrap();
        cfg.format.record_format = "parquet".into();
        assert!(check_config(&mut cfg).is_err());
    }
}
