//! Archiving build outputs and serving them back

use chrono::Utc;
use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{info, instrument, warn};

use crate::config::RepositoryConfig;
use crate::models::error::{ArchiveFailure, ArtifactError, PartialArchiveFailure, StoreError};
use crate::models::types::{
    ArtifactRef, ArtifactSource, BuildIdentity, DownloadLink, Manifest, ManifestEntry, ObjectBody,
};
use crate::services::artifact_collector::ArtifactCollector;
use crate::services::path_resolver::resolve;
use crate::stores::object_store::{download_to_file, ObjectStore};
use crate::workspace::NodeWorkspace;

async fn sha256_of(body: &ObjectBody) -> Result<String, std::io::Error> {
    match body {
        ObjectBody::Bytes(bytes) => Ok(hex::encode(Sha256::digest(bytes))),
        ObjectBody::File(path) => {
            let mut file = tokio::fs::File::open(path).await?;
            let mut hasher = Sha256::new();
            let mut buffer = vec![0u8; 8192];
            loop {
                let n = file.read(&mut buffer).await?;
                if n == 0 {
                    break;
                }
                hasher.update(&buffer[..n]);
            }
            Ok(hex::encode(hasher.finalize()))
        }
    }
}

pub struct ArchiveCoordinator {
    store: Arc<dyn ObjectStore>,
    config: RepositoryConfig,
}

impl ArchiveCoordinator {
    pub fn new(store: Arc<dyn ObjectStore>, config: RepositoryConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// Upload every file, even after earlier failures.
    ///
    /// Returns the manifest when all uploads succeed. Otherwise returns
    /// `ArtifactError::PartialArchive` carrying the successful entries and one
    /// failure per file that could not be stored.
    #[instrument(skip(self, files), fields(build = %build, files = files.len()))]
    pub async fn archive(&self, build: &BuildIdentity, files: Vec<ArtifactSource>) -> Result<Manifest, ArtifactError> {
        let mut manifest = Manifest::new();
        let mut failures = Vec::new();
        let attempted = files.len();

        for file in files {
            match self.archive_one(build, &file).await {
                Ok(entry) => {
                    info!(artifact = %file.relative_path, key = %entry.key, size = entry.size, "Artifact archived");
                    manifest.insert(
                        ArtifactRef {
                            relative_path: file.relative_path,
                        },
                        entry,
                    );
                }
                Err(error) => {
                    warn!(artifact = %file.relative_path, error = %error, "Failed to archive artifact");
                    failures.push(ArchiveFailure {
                        relative_path: file.relative_path,
                        error: Box::new(error),
                    });
                }
            }
        }

        if failures.is_empty() {
            Ok(manifest)
        } else {
            Err(ArtifactError::PartialArchive(PartialArchiveFailure {
                manifest,
                failures,
                attempted,
            }))
        }
    }

    async fn archive_one(&self, build: &BuildIdentity, file: &ArtifactSource) -> Result<ManifestEntry, ArtifactError> {
        let key = resolve(&self.config, build, &file.relative_path)?;
        let size = file.body.size().await?;
        let sha256 = sha256_of(&file.body).await?;

        self.store.put(&key, file.body.clone()).await?;

        Ok(ManifestEntry {
            key,
            size,
            sha256,
            recorded_at: Utc::now(),
        })
    }

    /// Archive the workspace files selected by the given patterns.
    pub async fn archive_workspace(
        &self,
        build: &BuildIdentity,
        workspace: &NodeWorkspace,
        includes: &[String],
        excludes: &[String],
    ) -> Result<Manifest, ArtifactError> {
        let collector = ArtifactCollector::new(includes, excludes)?;
        let files = collector.collect(workspace).await?;
        self.archive(build, files.into_iter().map(|f| f.into_source()).collect())
            .await
    }

    /// Stream one archived artifact to `dest`. Returns the bytes written.
    #[instrument(skip(self, dest), fields(build = %build))]
    pub async fn download(&self, build: &BuildIdentity, relative_path: &str, dest: &Path) -> Result<u64, ArtifactError> {
        let key = resolve(&self.config, build, relative_path)?;
        let stream = self.store.get(&key).await?;
        let written = download_to_file(stream, dest).await?;
        info!(key = %key, dest = %dest.display(), bytes = written, "Artifact downloaded");
        Ok(written)
    }

    pub fn download_links(&self, manifest: &Manifest) -> Vec<DownloadLink> {
        manifest
            .iter()
            .map(|(path, entry)| DownloadLink {
                relative_path: path.to_string(),
                key: entry.key.clone(),
                url: self.store.object_url(&entry.key),
            })
            .collect()
    }

    /// Rebuild a manifest for known relative paths by reading the stored
    /// objects. Paths with no stored object are left out.
    #[instrument(skip(self, relative_paths), fields(build = %build))]
    pub async fn reconstruct(&self, build: &BuildIdentity, relative_paths: &[String]) -> Result<Manifest, ArtifactError> {
        let mut manifest = Manifest::new();
        for relative_path in relative_paths {
            let key = resolve(&self.config, build, relative_path)?;
            let mut stream = match self.store.get(&key).await {
                Ok(stream) => stream,
                Err(StoreError::NotFound(_)) => continue,
                Err(e) => return Err(e.into()),
            };

            let mut hasher = Sha256::new();
            let mut size = 0u64;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                size += chunk.len() as u64;
                hasher.update(&chunk);
            }

            manifest.insert(
                ArtifactRef {
                    relative_path: relative_path.clone(),
                },
                ManifestEntry {
                    key,
                    size,
                    sha256: hex::encode(hasher.finalize()),
                    recorded_at: Utc::now(),
                },
            );
        }
        Ok(manifest)
    }
}
