//! Chunked uploads to the backend object store.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use super::{decode, DecodeError, Transport};
use crate::errors::ClientError;
use crate::models::{StoredObject, UploadQuery, UploadStatus};
use crate::submit::{ObjectStore, UploadProgress};

/// Offset resynchronisations allowed per upload.
const MAX_RESYNCS: usize = 3;

/// Uploads objects chunk by chunk, resuming from the server's offset on 409.
pub struct HttpObjectStore {
    transport: Transport,
    chunk_bytes: usize,
    chunk_timeout: Duration,
}

impl HttpObjectStore {
    pub fn new(transport: Transport, chunk_bytes: usize, chunk_timeout: Duration) -> Self {
        Self {
            transport,
            chunk_bytes: chunk_bytes.max(1),
            chunk_timeout,
        }
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn upload(
        &self,
        path: &str,
        bytes: &[u8],
        bearer: &str,
        progress: &UploadProgress<'_>,
    ) -> Result<StoredObject, ClientError> {
        if bytes.is_empty() {
            return Err(ClientError::Validation("Cannot upload an empty file.".to_string()));
        }

        let segments: Vec<&str> = std::iter::once("storage")
            .chain(path.split('/').filter(|s| !s.is_empty()))
            .collect();
        let total = bytes.len() as u64;
        let mut offset = 0u64;
        let mut resyncs = 0usize;

        loop {
            let end = (offset + self.chunk_bytes as u64).min(total);
            let is_final = end == total;
            let query = UploadQuery {
                offset,
                r#final: is_final,
            };
            let chunk = bytes
                .get(offset as usize..end as usize)
                .ok_or_else(|| {
                    ClientError::Network(format!("Upload offset {} is past {} bytes", offset, total))
                })?
                .to_vec();

            let response = self
                .transport
                .post(&segments, Some(bearer))?
                .query(&query)
                .timeout(self.chunk_timeout)
                .body(chunk)
                .send()
                .await?;

            match decode::<UploadStatus>(response).await {
                Ok(status) if status.complete => {
                    progress.report(total, total);
                    let url = status.url.ok_or_else(|| {
                        ClientError::Network("Upload committed without a URL".to_string())
                    })?;
                    return Ok(StoredObject {
                        path: status.path,
                        url,
                        size: status.received,
                    });
                }
                Ok(status) => {
                    if is_final || status.received <= offset || status.received > total {
                        return Err(ClientError::Network(format!(
                            "Upload stalled at {} of {} bytes",
                            status.received, total
                        )));
                    }
                    offset = status.received;
                    progress.report(offset, total);
                }
                Err(DecodeError::Remote(failure)) if failure.status == StatusCode::CONFLICT => {
                    let received = failure
                        .details
                        .as_ref()
                        .and_then(|d| d.get("received"))
                        .and_then(|v| v.as_u64());
                    match received {
                        Some(received) if received < total && resyncs < MAX_RESYNCS => {
                            tracing::debug!(
                                "Resuming upload of {} at {} (was {})",
                                path,
                                received,
                                offset
                            );
                            resyncs += 1;
                            offset = received;
                            progress.report(offset, total);
                        }
                        _ => return Err(failure.into()),
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
