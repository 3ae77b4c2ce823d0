//! Replays of completed pipelines under a new build number

use std::sync::Arc;
use tracing::{info, instrument};

use crate::models::error::ArtifactError;
use crate::models::types::{ArtifactSource, BuildIdentity, Manifest, StashRef};
use crate::services::archive::ArchiveCoordinator;
use crate::services::stash::{StashCoordinator, StashOptions};
use crate::workspace::NodeWorkspace;

/// Which build an unstash inside a replay reads from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StashSource {
    /// Stashes produced by the replay itself.
    #[default]
    Replayed,
    /// Reuse a stash produced by the build being replayed.
    Original,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayContext {
    original: BuildIdentity,
    replayed: BuildIdentity,
}

impl ReplayContext {
    pub fn original(&self) -> &BuildIdentity {
        &self.original
    }

    pub fn replayed(&self) -> &BuildIdentity {
        &self.replayed
    }

    pub fn stash_build(&self, source: StashSource) -> &BuildIdentity {
        match source {
            StashSource::Replayed => &self.replayed,
            StashSource::Original => &self.original,
        }
    }
}

/// Build context for replaying `original` as `new_build_number`, which the
/// build engine assigns.
pub fn new_build_context(original: &BuildIdentity, new_build_number: u64) -> Result<ReplayContext, ArtifactError> {
    if new_build_number == original.build_number() {
        return Err(ArtifactError::Configuration(format!(
            "replay of {} must run under a new build number",
            original
        )));
    }
    let replayed = BuildIdentity::new(original.job_full_name(), new_build_number)?;
    Ok(ReplayContext {
        original: original.clone(),
        replayed,
    })
}

pub struct ReplayAdapter {
    archive: Arc<ArchiveCoordinator>,
    stash: Arc<StashCoordinator>,
}

impl ReplayAdapter {
    pub fn new(archive: Arc<ArchiveCoordinator>, stash: Arc<StashCoordinator>) -> Self {
        Self { archive, stash }
    }

    /// New artifacts always belong to the replayed build.
    pub async fn archive(&self, ctx: &ReplayContext, files: Vec<ArtifactSource>) -> Result<Manifest, ArtifactError> {
        self.archive.archive(ctx.replayed(), files).await
    }

    /// New stashes always belong to the replayed build.
    pub async fn stash(
        &self,
        ctx: &ReplayContext,
        stash_name: &str,
        workspace: &NodeWorkspace,
        files: &[String],
        options: &StashOptions,
    ) -> Result<StashRef, ArtifactError> {
        self.stash
            .stash(ctx.replayed(), stash_name, workspace, files, options)
            .await
    }

    /// Reads from the original build only when `source` asks for it.
    #[instrument(skip(self, ctx, workspace), fields(original = %ctx.original(), replayed = %ctx.replayed()))]
    pub async fn unstash(
        &self,
        ctx: &ReplayContext,
        stash_name: &str,
        workspace: &NodeWorkspace,
        source: StashSource,
    ) -> Result<Vec<String>, ArtifactError> {
        let build = ctx.stash_build(source);
        if source == StashSource::Original {
            info!(stash = stash_name, build = %build, "Reusing stash from original build");
        }
        self.stash.unstash(build, stash_name, workspace).await
    }

    /// Copy the named stashes of the original build to the replayed build so
    /// later steps can unstash them without asking for reuse.
    pub async fn carry_over_stashes(&self, ctx: &ReplayContext, stash_names: &[String]) -> Result<Vec<StashRef>, ArtifactError> {
        let mut copied = Vec::with_capacity(stash_names.len());
        for name in stash_names {
            copied.push(self.stash.copy(ctx.original(), ctx.replayed(), name).await?);
        }
        Ok(copied)
    }
}
