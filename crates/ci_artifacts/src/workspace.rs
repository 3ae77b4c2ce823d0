use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::info;

use crate::models::error::ArtifactError;

/// Working directory of a build on one execution node (controller or agent).
#[derive(Debug, Clone)]
pub struct NodeWorkspace {
    node: String,
    root: PathBuf,
}

impl NodeWorkspace {
    pub fn new(node: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            node: node.into(),
            root: root.into(),
        }
    }

    /// Create the root directory if needed and return a handle to it.
    /// Only a root created here is restricted to the owner; an existing
    /// workspace keeps its permissions.
    pub async fn create(node: impl Into<String>, root: impl Into<PathBuf>) -> Result<Self, ArtifactError> {
        let workspace = Self::new(node, root);
        if fs::try_exists(&workspace.root).await? {
            return Ok(workspace);
        }
        fs::create_dir_all(&workspace.root).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o700);
            fs::set_permissions(&workspace.root, perms).await?;
        }

        info!(node = %workspace.node, root = %workspace.root.display(), "Workspace created");
        Ok(workspace)
    }

    pub fn node(&self) -> &str {
        &self.node
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Join a `/`-separated relative path onto the root. Anything that could
    /// land outside the root is rejected.
    pub fn resolve(&self, relative_path: &str) -> Result<PathBuf, ArtifactError> {
        if relative_path.is_empty() {
            return Err(ArtifactError::invalid_path(relative_path, "path is empty"));
        }
        let relative = Path::new(relative_path);
        for component in relative.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => {
                    return Err(ArtifactError::invalid_path(
                        relative_path,
                        "path escapes the workspace",
                    ))
                }
            }
        }
        Ok(self.root.join(relative))
    }

    /// Like [`resolve`](Self::resolve), but the file must exist and its
    /// target, after following symlinks, must still lie under the root.
    pub async fn resolve_contained(&self, relative_path: &str) -> Result<PathBuf, ArtifactError> {
        let path = self.resolve(relative_path)?;
        let target = fs::canonicalize(&path).await?;
        let root = fs::canonicalize(&self.root).await?;
        if !target.starts_with(&root) {
            return Err(ArtifactError::invalid_path(
                relative_path,
                format!("links outside the workspace to {}", target.display()),
            ));
        }
        Ok(path)
    }

    /// Workspace-relative form of `path`, always with `/` separators.
    pub fn relative_of(&self, path: &Path) -> Result<String, ArtifactError> {
        let relative = path.strip_prefix(&self.root).map_err(|e| {
            ArtifactError::invalid_path(path.display().to_string(), format!("not in workspace: {}", e))
        })?;
        Ok(relative.to_string_lossy().replace('\\', "/"))
    }
}
