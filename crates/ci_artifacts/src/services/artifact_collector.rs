//! Workspace file selection by include/exclude glob patterns

use glob::{MatchOptions, Pattern};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

use crate::models::error::ArtifactError;
use crate::models::types::ArtifactSource;
use crate::workspace::NodeWorkspace;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectedFile {
    pub relative_path: String,
    pub path: PathBuf,
    pub size: u64,
}

impl CollectedFile {
    pub fn into_source(self) -> ArtifactSource {
        ArtifactSource::from_file(self.relative_path, self.path)
    }
}

pub struct ArtifactCollector {
    includes: Vec<Pattern>,
    excludes: Vec<Pattern>,
}

fn compile(patterns: &[String]) -> Result<Vec<Pattern>, ArtifactError> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p)
                .map_err(|e| ArtifactError::Configuration(format!("Invalid artifact pattern {}: {}", p, e)))
        })
        .collect()
}

impl ArtifactCollector {
    /// An empty include list selects every file.
    pub fn new(includes: &[String], excludes: &[String]) -> Result<Self, ArtifactError> {
        Ok(Self {
            includes: compile(includes)?,
            excludes: compile(excludes)?,
        })
    }

    fn selects(&self, relative: &str) -> bool {
        let included = self.includes.is_empty()
            || self.includes.iter().any(|p| p.matches_with(relative, MATCH_OPTIONS));
        included && !self.excludes.iter().any(|p| p.matches_with(relative, MATCH_OPTIONS))
    }

    /// Matching regular files, sorted by relative path.
    ///
    /// Symlinked directories are not descended into. A symlinked file is
    /// collected only when its target lies inside the workspace.
    pub async fn collect(&self, workspace: &NodeWorkspace) -> Result<Vec<CollectedFile>, ArtifactError> {
        let mut files = Vec::new();
        if fs::try_exists(workspace.root()).await? {
            self.collect_matching_files(workspace, workspace.root(), &mut files).await?;
        }
        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

        if files.is_empty() {
            warn!(node = workspace.node(), root = %workspace.root().display(), "No files matched artifact patterns");
        } else {
            debug!(node = workspace.node(), count = files.len(), "Collected files");
        }
        Ok(files)
    }

    async fn collect_matching_files(
        &self,
        workspace: &NodeWorkspace,
        dir: &Path,
        files: &mut Vec<CollectedFile>,
    ) -> Result<(), ArtifactError> {
        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let file_type = entry.file_type().await?;

            if file_type.is_dir() {
                // Box the recursive call to avoid infinite size
                Box::pin(self.collect_matching_files(workspace, &path, files)).await?;
                continue;
            }

            let relative = workspace.relative_of(&path)?;
            if !self.selects(&relative) {
                continue;
            }

            if file_type.is_file() {
                let size = entry.metadata().await?.len();
                files.push(CollectedFile {
                    relative_path: relative,
                    path,
                    size,
                });
            } else if file_type.is_symlink() {
                if let Some(size) = self.linked_file_size(workspace, &relative).await? {
                    files.push(CollectedFile {
                        relative_path: relative,
                        path,
                        size,
                    });
                }
            }
        }
        Ok(())
    }

    /// Size of the file a symlink points at, or `None` when the link is
    /// dangling, points at a directory or leaves the workspace.
    async fn linked_file_size(&self, workspace: &NodeWorkspace, relative: &str) -> Result<Option<u64>, ArtifactError> {
        let target = match workspace.resolve_contained(relative).await {
            Ok(target) => target,
            Err(ArtifactError::InvalidPath { reason, .. }) => {
                warn!(artifact = relative, reason = %reason, "Skipping symlink");
                return Ok(None);
            }
            Err(ArtifactError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(artifact = relative, "Skipping dangling symlink");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let metadata = fs::metadata(&target).await?;
        if metadata.is_file() {
            Ok(Some(metadata.len()))
        } else {
            debug!(artifact = relative, "Skipping symlinked directory");
            Ok(None)
        }
    }
}
