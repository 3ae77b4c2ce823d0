use std::fmt;
use thiserror::Error;

use crate::models::types::{BuildIdentity, Manifest};

/// Failure of a single operation against the remote object store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Network error on {key}: {message}")]
    Network { key: String, message: String },

    #[error("Authentication rejected for {0}")]
    AuthFailure(String),

    #[error("Remote rejected {key}: HTTP {status}")]
    RemoteRejected { key: String, status: u16 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn network(key: impl Into<String>, message: impl fmt::Display) -> Self {
        StoreError::Network {
            key: key.into(),
            message: message.to_string(),
        }
    }

    /// Whether the retry policy may attempt the operation again.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Network { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StoreError::NotFound(_) => "not found",
            StoreError::Network { .. } => "network",
            StoreError::AuthFailure(_) => "authentication",
            StoreError::RemoteRejected { .. } => "rejected",
            StoreError::Io(_) => "io",
        }
    }
}

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid artifact path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    PartialArchive(PartialArchiveFailure),

    #[error("No stash named {stash:?} found for {build}")]
    StashNotFound { stash: String, build: BuildIdentity },

    #[error("Stash {0:?} matched no files")]
    EmptyStash(String),

    #[error("Stash {stash:?} failed ({}): {source}", .source.kind())]
    Stash {
        stash: String,
        #[source]
        source: StoreError,
    },

    #[error("Bundle error: {0}")]
    Bundle(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ArtifactError {
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        ArtifactError::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// One file that could not be archived.
#[derive(Debug)]
pub struct ArchiveFailure {
    pub relative_path: String,
    pub error: Box<ArtifactError>,
}

/// Outcome of an archive step where at least one upload failed.
///
/// `manifest` still holds every file that was stored successfully; those
/// objects stay in the remote repository and remain listable.
#[derive(Debug)]
pub struct PartialArchiveFailure {
    pub manifest: Manifest,
    pub failures: Vec<ArchiveFailure>,
    /// Files handed to the archive call, counting repeated paths.
    pub attempted: usize,
}

impl fmt::Display for PartialArchiveFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} artifacts failed to archive:",
            self.failures.len(),
            self.attempted
        )?;
        for failure in &self.failures {
            write!(f, " {} ({});", failure.relative_path, failure.error)?;
        }
        Ok(())
    }
}

pub type Result<T, E = ArtifactError> = std::result::Result<T, E>;
