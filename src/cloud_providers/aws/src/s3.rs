//! Object-storage access for the asset bucket. The `ObjectStore` trait is
//! the seam the analysis pipeline is written against; `S3Client` is the real
//! implementation.

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("listing objects under {prefix} failed: {message}")]
    List { prefix: String, message: String },

    #[error("download of {key} failed: {message}")]
    Download { key: String, message: String },

    #[error("upload of {key} failed: {message}")]
    Upload { key: String, message: String },

    #[error("expected artifact {0} is missing")]
    MissingArtifact(String),

    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait ObjectStore {
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, TransferError>;
    async fn download(&self, key: &str, dest: &Path) -> Result<(), TransferError>;
    async fn upload(&self, src: &Path, key: &str) -> Result<(), TransferError>;
}

pub struct S3Client {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3Client {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3Client {
    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, TransferError> {
        let mut keys = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .into_paginator()
            .send();

        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| TransferError::List {
                prefix: prefix.to_string(),
                message: e.to_string(),
            })?;
            for object in page.contents() {
                if let Some(key) = object.key() {
                    keys.push(key.to_string());
                }
            }
        }
        Ok(keys)
    }

    async fn download(&self, key: &str, dest: &Path) -> Result<(), TransferError> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| TransferError::Download {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| TransferError::Download {
                key: key.to_string(),
                message: e.to_string(),
            })?
            .into_bytes();

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, bytes).await?;
        tracing::info!(key, dest = %dest.display(), "file retrieval complete");
        Ok(())
    }

    async fn upload(&self, src: &Path, key: &str) -> Result<(), TransferError> {
        if !src.exists() {
            return Err(TransferError::MissingArtifact(src.display().to_string()));
        }
        let body = aws_sdk_s3::primitives::ByteStream::from_path(src)
            .await
            .map_err(|e| TransferError::Upload {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| TransferError::Upload {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        tracing::info!(key, src = %src.display(), "uploaded result");
        Ok(())
    }
}
