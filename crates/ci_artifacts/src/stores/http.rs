//! Generic artifact repository client over plain HTTP verbs

use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use std::io::SeekFrom;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::config::RepositoryConfig;
use crate::models::error::{ArtifactError, StoreError};
use crate::models::types::{ObjectBody, RemoteKey};
use crate::stores::object_store::{ObjectStore, ObjectStream};
use crate::stores::retry::RetryPolicy;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Objects live at `{server_url}/{base_repo_name}/{key}`.
pub struct HttpObjectStore {
    client: Client,
    repo_url: String,
    username: Option<String>,
    password: Option<SecretString>,
    retry: RetryPolicy,
}

impl HttpObjectStore {
    pub fn new(config: &RepositoryConfig, retry: RetryPolicy) -> Result<Self, ArtifactError> {
        config.validate()?;

        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(CONNECT_TIMEOUT.min(config.timeout))
            .build()
            .map_err(|e| ArtifactError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        let repo_url = format!(
            "{}/{}",
            config.server_url.trim_end_matches('/'),
            config.base_repo_name.trim()
        );

        info!(repository = %repo_url, max_attempts = retry.max_attempts, "HTTP object store initialized");

        Ok(Self {
            client,
            repo_url,
            username: config.username.clone(),
            password: config.password.clone(),
            retry,
        })
    }

    pub fn url_for(&self, key: &RemoteKey) -> String {
        format!("{}/{}", self.repo_url, key)
    }

    fn request(&self, method: Method, key: &RemoteKey) -> RequestBuilder {
        let request = self.client.request(method, self.url_for(key));
        match &self.username {
            Some(username) => request.basic_auth(
                username,
                self.password.as_ref().map(|p| p.expose_secret()),
            ),
            None => request,
        }
    }

    async fn send(&self, method: Method, key: &RemoteKey) -> Result<reqwest::Response, StoreError> {
        self.request(method, key)
            .send()
            .await
            .map_err(|e| StoreError::network(key.as_str(), e))
    }
}

/// Drain a response body into an anonymous temp file, rewound for reading.
async fn spool(mut response: reqwest::Response, key: &RemoteKey) -> Result<(File, u64), StoreError> {
    let mut file = File::from_std(tempfile::tempfile()?);
    let mut size = 0u64;
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| StoreError::network(key.as_str(), e))?
    {
        file.write_all(&chunk).await?;
        size += chunk.len() as u64;
    }
    file.flush().await?;
    file.seek(SeekFrom::Start(0)).await?;
    Ok((file, size))
}

/// Map a response status onto the store error taxonomy.
pub(crate) fn classify_status(status: StatusCode, key: &str) -> Result<(), StoreError> {
    if status.is_success() {
        return Ok(());
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(StoreError::AuthFailure(key.to_string())),
        StatusCode::NOT_FOUND => Err(StoreError::NotFound(key.to_string())),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            Err(StoreError::network(key, format!("HTTP {}", status.as_u16())))
        }
        s if s.is_server_error() => Err(StoreError::network(key, format!("HTTP {}", s.as_u16()))),
        s => Err(StoreError::RemoteRejected {
            key: key.to_string(),
            status: s.as_u16(),
        }),
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put(&self, key: &RemoteKey, body: ObjectBody) -> Result<(), StoreError> {
        let size = body.size().await?;
        let body = &body;
        let this = self;

        self.retry
            .run("put", key.as_str(), move || async move {
                let payload = match body {
                    ObjectBody::Bytes(bytes) => reqwest::Body::from(bytes.clone()),
                    ObjectBody::File(path) => {
                        let file = tokio::fs::File::open(path).await?;
                        reqwest::Body::wrap_stream(ReaderStream::new(file))
                    }
                };
                let response = this
                    .request(Method::PUT, key)
                    .header(CONTENT_LENGTH, size)
                    .body(payload)
                    .send()
                    .await
                    .map_err(|e| StoreError::network(key.as_str(), e))?;
                classify_status(response.status(), key.as_str())
            })
            .await?;

        debug!(key = %key, size, "Object uploaded");
        Ok(())
    }

    /// The whole body is fetched inside the retry loop, so a connection lost
    /// mid-body costs one attempt rather than the download.
    async fn get(&self, key: &RemoteKey) -> Result<ObjectStream, StoreError> {
        let this = self;
        let (file, size) = self
            .retry
            .run("get", key.as_str(), move || async move {
                let response = this.send(Method::GET, key).await?;
                classify_status(response.status(), key.as_str())?;
                spool(response, key).await
            })
            .await?;

        debug!(key = %key, size, "Object fetched");
        Ok(ReaderStream::new(file).map_err(StoreError::from).boxed())
    }

    async fn exists(&self, key: &RemoteKey) -> Result<bool, StoreError> {
        let this = self;
        self.retry
            .run("exists", key.as_str(), move || async move {
                let response = this.send(Method::HEAD, key).await?;
                match classify_status(response.status(), key.as_str()) {
                    Ok(()) => Ok(true),
                    Err(StoreError::NotFound(_)) => Ok(false),
                    Err(e) => Err(e),
                }
            })
            .await
    }

    async fn delete(&self, key: &RemoteKey) -> Result<(), StoreError> {
        let this = self;
        self.retry
            .run("delete", key.as_str(), move || async move {
                let response = this.send(Method::DELETE, key).await?;
                classify_status(response.status(), key.as_str())
            })
            .await?;

        debug!(key = %key, "Object deleted");
        Ok(())
    }

    fn object_url(&self, key: &RemoteKey) -> Option<String> {
        Some(self.url_for(key))
    }
}
