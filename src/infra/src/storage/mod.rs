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

use bytes::Bytes;
use config::get_config;
use futures::TryStreamExt;
use object_store::{path::Path, ObjectMeta, ObjectStore};
use once_cell::sync::Lazy;

use crate::errors::Result;

pub mod local;
pub mod remote;

pub const CONCURRENT_REQUESTS: usize = 64;

static SOURCE: Lazy<Box<dyn ObjectStore>> = Lazy::new(init_source);
static TARGET: Lazy<Box<dyn ObjectStore>> = Lazy::new(init_target);

/// The landing zone the Kafka sink writes into.
pub fn source() -> &'static dyn ObjectStore {
    &**SOURCE
}

/// The record-partitioned output hierarchy.
pub fn target() -> &'static dyn ObjectStore {
    &**TARGET
}

fn init_source() -> Box<dyn ObjectStore> {
    let cfg = get_config();
    if cfg.source.provider == "local" {
        std::fs::create_dir_all(&cfg.source.local_dir).expect("create source dir success");
        Box::new(local::Local::new(&cfg.source.local_dir))
    } else {
        Box::new(remote::Remote::new(&cfg.source.provider))
    }
}

fn init_target() -> Box<dyn ObjectStore> {
    let cfg = get_config();
    if cfg.target.provider == "local" {
        std::fs::create_dir_all(&cfg.target.local_dir).expect("create target dir success");
        Box::new(local::Local::new(&cfg.target.local_dir))
    } else {
        Box::new(remote::Remote::new(&cfg.target.provider))
    }
}

pub fn format_key(key: &str) -> String {
    let prefix = &get_config().s3.bucket_prefix;
    if !prefix.is_empty() && !key.starts_with(prefix.as_str()) {
        format!("{prefix}{key}")
    } else {
        key.to_string()
    }
}

pub async fn list(store: &dyn ObjectStore, prefix: &str) -> Result<Vec<ObjectMeta>> {
    let prefix = Path::from(prefix);
    let files = store.list(Some(&prefix)).try_collect::<Vec<_>>().await?;
    Ok(files)
}

/// First-level directory names under a prefix.
pub async fn list_dirs(store: &dyn ObjectStore, prefix: &str) -> Result<Vec<String>> {
    let prefix = if prefix.is_empty() {
        None
    } else {
        Some(Path::from(prefix))
    };
    let ret = store.list_with_delimiter(prefix.as_ref()).await?;
    Ok(ret
        .common_prefixes
        .iter()
        .filter_map(|p| p.parts().last().map(|v| v.as_ref().to_string()))
        .collect())
}

pub async fn get(store: &dyn ObjectStore, file: &str) -> Result<Bytes> {
    let data = store.get(&Path::from(file)).await?;
    Ok(data.bytes().await?)
}

pub async fn put(store: &dyn ObjectStore, file: &str, data: Bytes) -> Result<()> {
    store.put(&Path::from(file), data.into()).await?;
    Ok(())
}

/// Like [`get`], but absence is a value rather than an error.
pub async fn get_opt(store: &dyn ObjectStore, file: &str) -> Result<Option<Bytes>> {
    match store.get(&Path::from(file)).await {
        Ok(data) => Ok(Some(data.bytes().await?)),
        Err(object_store::Error::NotFound { .. }) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub async fn exists(store: &dyn ObjectStore, file: &str) -> Result<bool> {
    match store.head(&Path::from(file)).await {
        Ok(_) => Ok(true),
        Err(object_store::Error::NotFound { .. }) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

pub async fn del(store: &dyn ObjectStore, file: &str) -> Result<()> {
    store.delete(&Path::from(file)).await?;
    Ok(())
}

pub async fn rename(store: &dyn ObjectStore, from: &str, to: &str) -> Result<()> {
    store.rename(&Path::from(from), &Path::from(to)).await?;
    Ok(())
}
