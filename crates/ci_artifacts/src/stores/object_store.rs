//! Contract for remote object storage backends

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::warn;
use uuid::Uuid;

use crate::models::error::{ArtifactError, StoreError};
use crate::models::types::{ObjectBody, RemoteKey};

/// Body of a downloaded object, delivered in chunks.
pub type ObjectStream = BoxStream<'static, Result<Bytes, StoreError>>;

/// PUT/GET/HEAD/DELETE over path-addressed objects.
///
/// Implementations retry transient failures internally. A PUT to an existing
/// key replaces the object.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload `body` under `key`, overwriting any existing object.
    async fn put(&self, key: &RemoteKey, body: ObjectBody) -> Result<(), StoreError>;

    /// Open the object for reading. Absent objects yield `StoreError::NotFound`.
    /// A transfer that fails partway through the body is retried like any
    /// other transient failure, so the returned stream reads local data.
    async fn get(&self, key: &RemoteKey) -> Result<ObjectStream, StoreError>;

    /// `Ok(false)` when the object is absent.
    async fn exists(&self, key: &RemoteKey) -> Result<bool, StoreError>;

    async fn delete(&self, key: &RemoteKey) -> Result<(), StoreError>;

    /// Externally reachable URL of the object, when the backend has one.
    fn object_url(&self, _key: &RemoteKey) -> Option<String> {
        None
    }
}

/// Drain an object stream into memory. Only for small objects and tests.
pub async fn read_to_vec(mut stream: ObjectStream) -> Result<Vec<u8>, StoreError> {
    let mut data = Vec::new();
    while let Some(chunk) = stream.next().await {
        data.extend_from_slice(&chunk?);
    }
    Ok(data)
}

/// Stream an object into `dest`.
///
/// Bytes land in a sibling temp file that is renamed over `dest` only once the
/// whole body has been written, so an interrupted download never leaves a
/// truncated file at `dest`.
pub async fn download_to_file(stream: ObjectStream, dest: &Path) -> Result<u64, ArtifactError> {
    let file_name = dest
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ArtifactError::invalid_path(dest.display().to_string(), "no file name"))?;
    let parent = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir()?,
    };
    fs::create_dir_all(&parent).await?;

    let temp_path = parent.join(format!(".{}.{}.part", file_name, Uuid::new_v4()));
    match write_stream(stream, &temp_path).await {
        Ok(written) => {
            fs::rename(&temp_path, dest).await?;
            Ok(written)
        }
        Err(e) => {
            if let Err(cleanup) = fs::remove_file(&temp_path).await {
                warn!(path = %temp_path.display(), error = %cleanup, "Failed to remove partial download");
            }
            Err(e)
        }
    }
}

async fn write_stream(mut stream: ObjectStream, path: &Path) -> Result<u64, ArtifactError> {
    let mut file = fs::File::create(path).await?;
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}
