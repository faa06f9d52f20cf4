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

use async_trait::async_trait;
use config::get_config;
use futures::stream::BoxStream;
use object_store::{
    limit::LimitStore, path::Path, GetOptions, GetResult, ListResult, MultipartUpload, ObjectMeta,
    ObjectStore, PutMultipartOpts, PutOptions, PutPayload, PutResult, Result,
};

use crate::storage::{format_key, CONCURRENT_REQUESTS};

pub struct Remote {
    client: LimitStore<Box<dyn object_store::ObjectStore>>,
}

impl Remote {
    pub fn new(provider: &str) -> Self {
        Self {
            client: LimitStore::new(init_client(provider), CONCURRENT_REQUESTS),
        }
    }
}

impl std::fmt::Debug for Remote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("storage for remote")
    }
}

impl std::fmt::Display for Remote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("storage for remote")
    }
}

#[async_trait]
impl ObjectStore for Remote {
    async fn put_opts(
        &self,
        location: &Path,
        payload: PutPayload,
        opts: PutOptions,
    ) -> Result<PutResult> {
        let file = format_key(location.as_ref());
        match self.client.put_opts(&file.into(), payload, opts).await {
            Ok(ret) => Ok(ret),
            Err(err) => {
                log::error!("remote file store error: {:?}", err);
                Err(err)
            }
        }
    }

    async fn put_multipart_opts(
        &self,
        location: &Path,
        opts: PutMultipartOpts,
    ) -> Result<Box<dyn MultipartUpload>> {
        let file = format_key(location.as_ref());
        self.client.put_multipart_opts(&file.into(), opts).await
    }

    async fn get_opts(&self, location: &Path, options: GetOptions) -> Result<GetResult> {
        let file = format_key(location.as_ref());
        self.client.get_opts(&file.into(), options).await
    }

    async fn head(&self, location: &Path) -> Result<ObjectMeta> {
        let file = format_key(location.as_ref());
        self.client.head(&file.into()).await
    }

    async fn delete(&self, location: &Path) -> Result<()> {
        let file = format_key(location.as_ref());
        self.client.delete(&file.into()).await
    }

    fn list(&self, prefix: Option<&Path>) -> BoxStream<'static, Result<ObjectMeta>> {
        let prefix = format_key(prefix.map(|p| p.as_ref()).unwrap_or_default());
        self.client.list(Some(&prefix.into()))
    }

    async fn list_with_delimiter(&self, prefix: Option<&Path>) -> Result<ListResult> {
        let prefix = format_key(prefix.map(|p| p.as_ref()).unwrap_or_default());
        self.client.list_with_delimiter(Some(&prefix.into())).await
    }

    async fn copy(&self, from: &Path, to: &Path) -> Result<()> {
        let from = format_key(from.as_ref());
        let to = format_key(to.as_ref());
        self.client.copy(&from.into(), &to.into()).await
    }

    async fn copy_if_not_exists(&self, from: &Path, to: &Path) -> Result<()> {
        let from = format_key(from.as_ref());
        let to = format_key(to.as_ref());
        self.client.copy_if_not_exists(&from.into(), &to.into()).await
    }
}

fn init_aws_config() -> object_store::Result<object_store::aws::AmazonS3> {
    let cfg = get_config();
    let opts = object_store::ClientOptions::default()
        .with_connect_timeout(std::time::Duration::from_secs(cfg.s3.connect_timeout))
        .with_timeout(std::time::Duration::from_secs(cfg.s3.request_timeout))
        .with_allow_invalid_certificates(cfg.s3.allow_invalid_certificates)
        .with_allow_http(true);
    let mut builder = object_store::aws::AmazonS3Builder::from_env()
        .with_client_options(opts)
        .with_bucket_name(&cfg.s3.bucket_name)
        .with_virtual_hosted_style_request(cfg.s3.feature_force_hosted_style);
    if !cfg.s3.server_url.is_empty() {
        builder = builder.with_endpoint(&cfg.s3.server_url);
    }
    if !cfg.s3.region_name.is_empty() {
        builder = builder.with_region(&cfg.s3.region_name);
    }
    if !cfg.s3.access_key.is_empty() {
        builder = builder.with_access_key_id(&cfg.s3.access_key);
    }
    if !cfg.s3.secret_key.is_empty() {
        builder = builder.with_secret_access_key(&cfg.s3.secret_key);
    }
    builder.build()
}

fn init_azure_config() -> object_store::Result<object_store::azure::MicrosoftAzure> {
    let cfg = get_config();
    let mut builder = object_store::azure::MicrosoftAzureBuilder::from_env()
        .with_client_options(
            object_store::ClientOptions::default()
                .with_connect_timeout(std::time::Duration::from_secs(cfg.s3.connect_timeout))
                .with_timeout(std::time::Duration::from_secs(cfg.s3.request_timeout))
                .with_allow_invalid_certificates(cfg.s3.allow_invalid_certificates),
        )
        .with_container_name(&cfg.s3.bucket_name);
    if !cfg.s3.access_key.is_empty() {
        builder = builder.with_account(&cfg.s3.access_key);
    }
    if !cfg.s3.secret_key.is_empty() {
        builder = builder.with_access_key(&cfg.s3.secret_key);
    }
    builder.build()
}

fn init_gcp_config() -> object_store::Result<object_store::gcp::GoogleCloudStorage> {
    let cfg = get_config();
    let mut builder = object_store::gcp::GoogleCloudStorageBuilder::from_env()
        .with_client_options(
            object_store::ClientOptions::default()
                .with_connect_timeout(std::time::Duration::from_secs(cfg.s3.connect_timeout))
                .with_timeout(std::time::Duration::from_secs(cfg.s3.request_timeout))
                .with_allow_invalid_certificates(cfg.s3.allow_invalid_certificates),
        )
        .with_bucket_name(&cfg.s3.bucket_name);
    if !cfg.s3.access_key.is_empty() {
        builder = builder.with_service_account_path(&cfg.s3.access_key);
    }
    builder.build()
}

fn init_client(provider: &str) -> Box<dyn object_store::ObjectStore> {
    match provider {
        "s3" | "aws" => match init_aws_config() {
            Ok(client) => Box::new(client),
            Err(e) => panic!("s3 init config error: {e:?}"),
        },
        "azure" => match init_azure_config() {
            Ok(client) => Box::new(client),
            Err(e) => panic!("azure init config error: {e:?}"),
        },
        "gcs" | "gcp" => match init_gcp_config() {
            Ok(client) => Box::new(client),
            Err(e) => panic!("gcp init config error: {e:?}"),
        },
        _ => match init_aws_config() {
            Ok(client) => Box::new(client),
            Err(e) => panic!("{provider} init config error: {e:?}"),
        },
    }
}
