//! Stash bundles: gzip-compressed tar archives of workspace files

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::Write;
use std::path::{Component, Path, PathBuf};
use tar::{Archive, Builder, EntryType};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::models::error::ArtifactError;
use crate::workspace::NodeWorkspace;

fn bundle_error(context: &str, e: impl std::fmt::Display) -> ArtifactError {
    ArtifactError::Bundle(format!("{}: {}", context, e))
}

/// Pack `files` (workspace-relative) into a temp file. The bundle is deleted
/// when the returned handle drops.
///
/// Symlinks are stored as the file they point at, and only when that file
/// lies inside the workspace.
pub async fn pack(workspace: &NodeWorkspace, files: &[String]) -> Result<NamedTempFile, ArtifactError> {
    let mut sources: Vec<(String, PathBuf)> = Vec::with_capacity(files.len());
    for rel in files {
        sources.push((rel.clone(), workspace.resolve_contained(rel).await?));
    }

    tokio::task::spawn_blocking(move || pack_blocking(&sources))
        .await
        .map_err(|e| bundle_error("pack task failed", e))?
}

fn pack_blocking(sources: &[(String, PathBuf)]) -> Result<NamedTempFile, ArtifactError> {
    let mut bundle = NamedTempFile::new()?;
    {
        let encoder = GzEncoder::new(bundle.as_file_mut(), Compression::default());
        let mut tar = Builder::new(encoder);
        tar.follow_symlinks(true);

        for (relative, path) in sources {
            tar.append_path_with_name(path, relative)
                .map_err(|e| bundle_error(&format!("Tar append error for {}", relative), e))?;
        }

        let encoder = tar
            .into_inner()
            .map_err(|e| bundle_error("Tar finish error", e))?;
        let file = encoder
            .finish()
            .map_err(|e| bundle_error("Gzip finish error", e))?;
        file.flush()?;
    }
    debug!(entries = sources.len(), path = %bundle.path().display(), "Stash bundle packed");
    Ok(bundle)
}

/// Unpack a bundle into the workspace, overwriting existing files.
/// Returns the restored file paths, sorted.
pub async fn unpack(bundle: &Path, workspace: &NodeWorkspace) -> Result<Vec<String>, ArtifactError> {
    let bundle = bundle.to_path_buf();
    let workspace = workspace.clone();
    tokio::task::spawn_blocking(move || unpack_blocking(&bundle, &workspace))
        .await
        .map_err(|e| bundle_error("unpack task failed", e))?
}

fn entry_relative_path(path: &Path) -> Result<String, ArtifactError> {
    let mut segments = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(segment) => segments.push(segment.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => {
                return Err(ArtifactError::invalid_path(
                    path.display().to_string(),
                    "bundle entry escapes the workspace",
                ))
            }
        }
    }
    if segments.is_empty() {
        return Err(ArtifactError::invalid_path(path.display().to_string(), "empty bundle entry"));
    }
    Ok(segments.join("/"))
}

fn unpack_blocking(bundle: &Path, workspace: &NodeWorkspace) -> Result<Vec<String>, ArtifactError> {
    let file = File::open(bundle)?;
    let mut archive = Archive::new(GzDecoder::new(file));
    let mut restored = Vec::new();

    let entries = archive
        .entries()
        .map_err(|e| bundle_error("Corrupt stash bundle", e))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| bundle_error("Corrupt stash bundle", e))?;
        let relative = entry_relative_path(&entry.path()?)?;
        let dest = workspace.resolve(&relative)?;

        match entry.header().entry_type() {
            EntryType::Directory => {
                std::fs::create_dir_all(&dest)?;
            }
            EntryType::Regular | EntryType::Continuous => {
                if let Some(parent) = dest.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                entry
                    .unpack(&dest)
                    .map_err(|e| bundle_error(&format!("Failed to restore {}", relative), e))?;
                restored.push(relative);
            }
            other => {
                return Err(ArtifactError::Bundle(format!(
                    "Unsupported entry type {:?} for {}",
                    other, relative
                )))
            }
        }
    }

    restored.sort();
    Ok(restored)
}
