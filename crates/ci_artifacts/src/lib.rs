//! CI Artifacts Library
//!
//! Archive and stash persistence for pipeline builds, backed by a generic
//! artifact repository addressed by job name, build number and artifact path.

// Core modules
pub mod config;
pub mod models;
pub mod workspace;

// Services
pub mod services;

// Storage
pub mod stores;

// Re-export commonly used types
pub use config::{Config, RepositoryConfig};
pub use models::error::{ArtifactError, StoreError};
pub use models::types::{ArtifactSource, BuildIdentity, Manifest, RemoteKey, StashRef};
pub use services::archive::ArchiveCoordinator;
pub use services::path_resolver::resolve;
pub use services::replay::{new_build_context, ReplayAdapter, ReplayContext, StashSource};
pub use services::stash::{StashCoordinator, StashOptions};
pub use stores::{HttpObjectStore, InMemoryObjectStore, ObjectStore, RetryPolicy};
pub use workspace::NodeWorkspace;
