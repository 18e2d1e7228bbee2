//! Object-store access for job inputs and outputs.

use std::path::Path;

use aws_sdk_s3::primitives::ByteStream;
use tracing::debug;

/// Metadata key carrying the output page count. Stores keep metadata keys
/// lowercase.
const METADATA_PAGE_COUNT_KEY: &str = "pagecount";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("object store error: {0}")]
    Service(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One bucket/prefix combination, e.g. the input or the output side of a
/// job.
#[derive(Clone)]
pub struct ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: String,
}

impl ObjectStore {
    pub async fn connect(
        endpoint: Option<&str>,
        profile: Option<&str>,
        bucket: &str,
        prefix: &str,
    ) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(profile) = profile.filter(|p| !p.is_empty()) {
            loader = loader.profile_name(profile);
        }
        let shared = loader.load().await;
        let mut builder = aws_sdk_s3::config::Builder::from(&shared);
        if let Some(endpoint) = endpoint.filter(|e| !e.is_empty()) {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }
        let client = aws_sdk_s3::Client::from_conf(builder.build());
        ObjectStore {
            client,
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
        }
    }

    fn key(&self, file: &str) -> String {
        format!("{}{}", self.prefix, file)
    }

    pub async fn exists(&self, file: &str) -> Result<bool, StorageError> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.key(file))
            .send()
            .await;
        match result {
            Ok(_) => Ok(true),
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_not_found() {
                    Ok(false)
                } else {
                    Err(StorageError::Service(service_err.to_string()))
                }
            }
        }
    }

    pub async fn download(&self, file: &str, local_path: &Path) -> Result<(), StorageError> {
        let object = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.key(file))
            .send()
            .await
            .map_err(|err| StorageError::Service(err.to_string()))?;
        let data = object
            .body
            .collect()
            .await
            .map_err(|err| StorageError::Service(err.to_string()))?;
        tokio::fs::write(local_path, data.into_bytes()).await?;
        debug!("downloaded {file} to {}", local_path.display());
        Ok(())
    }

    /// Uploads the finished PDF, tagging it with its page count.
    pub async fn upload_pdf(
        &self,
        file: &str,
        local_path: &Path,
        page_count: Option<usize>,
    ) -> Result<(), StorageError> {
        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|err| StorageError::Service(err.to_string()))?;
        let mut put = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(self.key(file))
            .content_type("application/pdf")
            .body(body);
        if let Some(page_count) = page_count {
            put = put.metadata(METADATA_PAGE_COUNT_KEY, page_count.to_string());
        }
        put.send()
            .await
            .map_err(|err| StorageError::Service(err.to_string()))?;
        debug!("uploaded {file}");
        Ok(())
    }

    /// File names (without the prefix) of every PDF under the prefix.
    pub async fn list_filenames(&self) -> Result<Vec<String>, StorageError> {
        let mut names = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&self.prefix)
            .into_paginator()
            .send();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|err| StorageError::Service(err.to_string()))?;
            for object in page.contents() {
                let Some(key) = object.key() else { continue };
                if !key.to_lowercase().ends_with(".pdf") {
                    continue;
                }
                let name = key.rsplit('/').next().unwrap_or(key);
                if !name.is_empty() {
                    names.push(name.to_string());
                }
            }
        }
        Ok(names)
    }
}
