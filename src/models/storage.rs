//! Object store payloads.

use serde::{Deserialize, Serialize};

/// Query string of `POST /storage/{*path}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadQuery {
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub r#final: bool,
}

/// Progress of an upload after one chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadStatus {
    pub path: String,
    /// Bytes received so far
    pub received: u64,
    pub complete: bool,
    /// Public URL, present once the upload is committed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// A committed object and its durable retrieval reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredObject {
    pub path: String,
    pub url: String,
    pub size: u64,
}
