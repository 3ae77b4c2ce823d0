//! Stash and unstash of file sets between pipeline steps
//!
//! The remote store is the only channel between nodes: the unstashing node
//! recomputes the stash key from the build identity and the stash name.

use std::sync::Arc;
use tracing::{info, instrument};

use crate::config::RepositoryConfig;
use crate::models::error::{ArtifactError, StoreError};
use crate::models::types::{BuildIdentity, ObjectBody, StashRef};
use crate::services::artifact_collector::ArtifactCollector;
use crate::services::bundle;
use crate::services::path_resolver::stash_key;
use crate::stores::object_store::{download_to_file, ObjectStore};
use crate::workspace::NodeWorkspace;

const DOWNLOADED_BUNDLE: &str = "stash.bundle";

#[derive(Debug, Clone, Default)]
pub struct StashOptions {
    /// Upload an empty bundle instead of failing when no files are given.
    pub allow_empty: bool,
}

pub struct StashCoordinator {
    store: Arc<dyn ObjectStore>,
    config: RepositoryConfig,
}

impl StashCoordinator {
    pub fn new(store: Arc<dyn ObjectStore>, config: RepositoryConfig) -> Self {
        Self { store, config }
    }

    fn stash_failure(stash_name: &str, build: &BuildIdentity, source: StoreError) -> ArtifactError {
        match source {
            StoreError::NotFound(_) => ArtifactError::StashNotFound {
                stash: stash_name.to_string(),
                build: build.clone(),
            },
            source => ArtifactError::Stash {
                stash: stash_name.to_string(),
                source,
            },
        }
    }

    /// Bundle `files` (workspace-relative) and upload them as one object.
    /// Stashing the same name again in the same build replaces the bundle.
    #[instrument(skip(self, workspace, files, options), fields(build = %build, node = workspace.node(), files = files.len()))]
    pub async fn stash(
        &self,
        build: &BuildIdentity,
        stash_name: &str,
        workspace: &NodeWorkspace,
        files: &[String],
        options: &StashOptions,
    ) -> Result<StashRef, ArtifactError> {
        let key = stash_key(&self.config, build, stash_name)?;
        if files.is_empty() && !options.allow_empty {
            return Err(ArtifactError::EmptyStash(stash_name.to_string()));
        }

        let bundle = bundle::pack(workspace, files).await?;
        self.store
            .put(&key, ObjectBody::File(bundle.path().to_path_buf()))
            .await
            .map_err(|source| Self::stash_failure(stash_name, build, source))?;

        info!(stash = stash_name, key = %key, "Stash uploaded");
        Ok(StashRef {
            stash_name: stash_name.to_string(),
            owning_build: build.clone(),
        })
    }

    /// Stash the workspace files selected by the given patterns.
    pub async fn stash_matching(
        &self,
        build: &BuildIdentity,
        stash_name: &str,
        workspace: &NodeWorkspace,
        includes: &[String],
        excludes: &[String],
        options: &StashOptions,
    ) -> Result<StashRef, ArtifactError> {
        let collector = ArtifactCollector::new(includes, excludes)?;
        let files: Vec<String> = collector
            .collect(workspace)
            .await?
            .into_iter()
            .map(|f| f.relative_path)
            .collect();
        self.stash(build, stash_name, workspace, &files, options).await
    }

    /// Download the bundle stashed under `build` and unpack it into
    /// `workspace`. Returns the restored relative paths.
    #[instrument(skip(self, workspace), fields(build = %build, node = workspace.node()))]
    pub async fn unstash(
        &self,
        build: &BuildIdentity,
        stash_name: &str,
        workspace: &NodeWorkspace,
    ) -> Result<Vec<String>, ArtifactError> {
        let key = stash_key(&self.config, build, stash_name)?;
        let stream = self
            .store
            .get(&key)
            .await
            .map_err(|source| Self::stash_failure(stash_name, build, source))?;

        let staging = tempfile::tempdir()?;
        let bundle_path = staging.path().join(DOWNLOADED_BUNDLE);
        download_to_file(stream, &bundle_path)
            .await
            .map_err(|e| match e {
                ArtifactError::Store(source) => Self::stash_failure(stash_name, build, source),
                other => other,
            })?;

        let restored = bundle::unpack(&bundle_path, workspace).await?;
        info!(stash = stash_name, key = %key, files = restored.len(), "Stash restored");
        Ok(restored)
    }

    /// Remove a stash. `Ok(false)` when there was nothing to remove.
    #[instrument(skip(self), fields(build = %build))]
    pub async fn clear(&self, build: &BuildIdentity, stash_name: &str) -> Result<bool, ArtifactError> {
        let key = stash_key(&self.config, build, stash_name)?;
        match self.store.delete(&key).await {
            Ok(()) => {
                info!(stash = stash_name, key = %key, "Stash cleared");
                Ok(true)
            }
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(source) => Err(Self::stash_failure(stash_name, build, source)),
        }
    }

    /// Remove every named stash of a build. Returns how many existed.
    pub async fn clear_all(&self, build: &BuildIdentity, stash_names: &[String]) -> Result<usize, ArtifactError> {
        let mut removed = 0;
        for name in stash_names {
            if self.clear(build, name).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Copy a stash bundle from one build to another without unpacking it.
    #[instrument(skip(self), fields(from = %from, to = %to))]
    pub async fn copy(&self, from: &BuildIdentity, to: &BuildIdentity, stash_name: &str) -> Result<StashRef, ArtifactError> {
        let source_key = stash_key(&self.config, from, stash_name)?;
        let target_key = stash_key(&self.config, to, stash_name)?;

        let stream = self
            .store
            .get(&source_key)
            .await
            .map_err(|source| Self::stash_failure(stash_name, from, source))?;

        let staging = tempfile::tempdir()?;
        let bundle_path = staging.path().join(DOWNLOADED_BUNDLE);
        download_to_file(stream, &bundle_path)
            .await
            .map_err(|e| match e {
                ArtifactError::Store(source) => Self::stash_failure(stash_name, from, source),
                other => other,
            })?;

        self.store
            .put(&target_key, ObjectBody::File(bundle_path))
            .await
            .map_err(|source| Self::stash_failure(stash_name, to, source))?;

        info!(stash = stash_name, from_key = %source_key, to_key = %target_key, "Stash copied");
        Ok(StashRef {
            stash_name: stash_name.to_string(),
            owning_build: to.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::memory::InMemoryObjectStore;

    fn setup() -> (Arc<InMemoryObjectStore>, StashCoordinator) {
        let store = Arc::new(InMemoryObjectStore::new());
        let config = RepositoryConfig::new("http://localhost:8081", "my-generic-repo").with_prefix("jenkins/");
        (store.clone(), StashCoordinator::new(store, config))
    }

    #[tokio::test]
    async fn empty_stash_is_rejected_unless_allowed() {
        let (store, stash) = setup();
        let dir = tempfile::tempdir().unwrap();
        let ws = NodeWorkspace::new("agent", dir.path());
        let build = BuildIdentity::new("job", 1).unwrap();

        let err = stash
            .stash(&build, "empty", &ws, &[], &StashOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ArtifactError::EmptyStash(_)));
        assert!(store.keys().await.is_empty());

        stash
            .stash(&build, "empty", &ws, &[], &StashOptions { allow_empty: true })
            .await
            .unwrap();
        let restored = stash.unstash(&build, "empty", &ws).await.unwrap();
        assert!(restored.is_empty());
    }

    #[tokio::test]
    async fn unstash_of_unknown_name_is_stash_not_found() {
        let (_store, stash) = setup();
        let dir = tempfile::tempdir().unwrap();
        let ws = NodeWorkspace::new("controller", dir.path());
        let build = BuildIdentity::new("job", 1).unwrap();

        let err = stash.unstash(&build, "never", &ws).await.unwrap_err();
        match err {
            ArtifactError::StashNotFound { stash, build: b } => {
                assert_eq!(stash, "never");
                assert_eq!(b, build);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn clear_removes_the_bundle_once() {
        let (_store, stash) = setup();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        let ws = NodeWorkspace::new("agent", dir.path());
        let build = BuildIdentity::new("job", 1).unwrap();

        stash
            .stash(&build, "s", &ws, &["a.txt".to_string()], &StashOptions::default())
            .await
            .unwrap();
        assert!(stash.clear(&build, "s").await.unwrap());
        assert!(!stash.clear(&build, "s").await.unwrap());
        assert!(matches!(
            stash.unstash(&build, "s", &ws).await,
            Err(ArtifactError::StashNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn stash_upload_rejection_names_the_stash() {
        let (store, stash) = setup();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        let ws = NodeWorkspace::new("agent", dir.path());
        let build = BuildIdentity::new("job", 1).unwrap();
        let config = RepositoryConfig::new("http://localhost:8081", "my-generic-repo").with_prefix("jenkins/");
        store
            .reject_puts(&stash_key(&config, &build, "denied").unwrap(), 403)
            .await;

        let err = stash
            .stash(&build, "denied", &ws, &["a.txt".to_string()], &StashOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("denied"));
        assert!(matches!(
            err,
            ArtifactError::Stash {
                source: StoreError::RemoteRejected { status: 403, .. },
                ..
            }
        ));
    }
}
