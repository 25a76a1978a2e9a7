//! S3-compatible object storage for the staged catalog
//!
//! The stager writes the NDJSON blob with a multipart upload so an
//! interrupted transfer can continue from the parts the store already holds.
//! The loader reads the same object back as a byte stream.

use async_trait::async_trait;
use aws_sdk_s3::{
    config::{http::HttpResponse, Credentials, Region},
    error::{DisplayErrorContext, SdkError},
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart},
    Client,
};
use bytes::Bytes;
use std::pin::Pin;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncRead};
use tracing::{debug, info, instrument};

use crate::ingest::pipeline::BlobSource;
use crate::ingest::stager::{CompletedChunk, TransferError, TransferTarget};

pub mod config;

/// A failed storage call, with the HTTP status when the store answered
#[derive(Debug, Error)]
#[error("{operation} failed: {message}")]
pub struct StorageError {
    pub operation: &'static str,
    pub status: Option<u16>,
    pub message: String,
}

impl StorageError {
    fn from_sdk<E>(operation: &'static str, err: SdkError<E, HttpResponse>) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            operation,
            status: err.raw_response().map(|r| r.status().as_u16()),
            message: DisplayErrorContext(&err).to_string(),
        }
    }

    fn is_not_found(&self) -> bool {
        self.status == Some(404) || self.message.contains("NoSuchUpload")
    }
}

impl From<StorageError> for TransferError {
    fn from(err: StorageError) -> Self {
        TransferError::from_status(err.status, err.to_string())
    }
}

#[derive(Clone)]
pub struct Storage {
    client: Client,
    bucket: String,
}

impl Storage {
    pub fn new(config: config::StorageConfig) -> Self {
        debug!("Initializing storage with config: {:?}", config);

        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "pimsync-storage",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .credentials_provider(credentials)
            .region(Region::new(config.region.clone()))
            .force_path_style(config.path_style);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        info!(bucket = %config.bucket, "Storage client initialized");

        Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Open `key` for streaming reads
    #[instrument(skip(self))]
    pub async fn download_stream(
        &self,
        key: &str,
    ) -> Result<Pin<Box<dyn AsyncBufRead + Send>>, StorageError> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| StorageError::from_sdk("get_object", e))?;

        debug!(
            size = response.content_length().unwrap_or(-1),
            "Streaming s3://{}/{}", self.bucket, key
        );

        Ok(Box::pin(response.body.into_async_read()))
    }

    async fn list_all_parts(
        &self,
        key: &str,
        upload_id: &str,
    ) -> Result<Vec<CompletedChunk>, StorageError> {
        let mut parts = Vec::new();
        let mut marker: Option<String> = None;

        loop {
            let response = self
                .client
                .list_parts()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .set_part_number_marker(marker.take())
                .send()
                .await
                .map_err(|e| StorageError::from_sdk("list_parts", e))?;

            parts.extend(response.parts().iter().filter_map(|p| {
                Some(CompletedChunk {
                    part_number: p.part_number()?,
                    etag: p.e_tag()?.to_string(),
                    size: u64::try_from(p.size()?).ok()?,
                })
            }));

            match (response.is_truncated(), response.next_part_number_marker()) {
                (Some(true), Some(next)) => marker = Some(next.to_string()),
                _ => break,
            }
        }

        parts.sort_by_key(|p| p.part_number);
        Ok(parts)
    }
}

#[async_trait]
impl BlobSource for Storage {
    async fn open(&self, key: &str) -> anyhow::Result<Box<dyn AsyncRead + Send + Unpin>> {
        let reader = self.download_stream(key).await?;
        Ok(Box::new(reader))
    }
}

#[async_trait]
impl TransferTarget for Storage {
    fn location(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }

    #[instrument(skip(self))]
    async fn begin(&self, key: &str) -> Result<String, TransferError> {
        let response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type("application/x-ndjson")
            .send()
            .await
            .map_err(|e| StorageError::from_sdk("create_multipart_upload", e))?;

        response
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| TransferError::Permanent("store returned no upload id".to_string()))
    }

    #[instrument(skip(self))]
    async fn acknowledged(
        &self,
        key: &str,
        upload_id: &str,
    ) -> Result<Option<Vec<CompletedChunk>>, TransferError> {
        match self.list_all_parts(key, upload_id).await {
            Ok(parts) => Ok(Some(parts)),
            Err(e) if e.is_not_found() => {
                debug!("Upload session {} is gone", upload_id);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    #[instrument(skip(self, data), fields(bytes = data.len()))]
    async fn put_chunk(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Bytes,
    ) -> Result<CompletedChunk, TransferError> {
        let size = data.len() as u64;
        let response = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| StorageError::from_sdk("upload_part", e))?;

        let etag = response
            .e_tag()
            .ok_or_else(|| TransferError::Transient("store returned no ETag".to_string()))?;

        Ok(CompletedChunk { part_number, etag: etag.to_string(), size })
    }

    #[instrument(skip(self, parts), fields(parts = parts.len()))]
    async fn finish(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[CompletedChunk],
    ) -> Result<(), TransferError> {
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(
                parts
                    .iter()
                    .map(|p| {
                        CompletedPart::builder()
                            .part_number(p.part_number)
                            .e_tag(&p.etag)
                            .build()
                    })
                    .collect(),
            ))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| StorageError::from_sdk("complete_multipart_upload", e))?;

        info!("Completed upload to s3://{}/{}", self.bucket, key);
        Ok(())
    }
}
