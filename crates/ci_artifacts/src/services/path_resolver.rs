//! Deterministic remote key derivation
//!
//! Every node computes keys on its own, so archive, list, download, stash and
//! unstash agree on object locations only because this mapping is pure.

use crate::config::RepositoryConfig;
use crate::models::error::ArtifactError;
use crate::models::types::{BuildIdentity, RemoteKey};

const ARTIFACTS_SEGMENT: &str = "artifacts";
const STASH_DIR: &str = "stash";
const STASH_EXTENSION: &str = ".bundle";

/// Percent-encode each `/`-separated segment on its own and re-join them.
fn encode_segments(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn validate_relative_path(relative_path: &str) -> Result<(), ArtifactError> {
    if relative_path.is_empty() {
        return Err(ArtifactError::invalid_path(relative_path, "path is empty"));
    }
    if relative_path.starts_with('/') {
        return Err(ArtifactError::invalid_path(relative_path, "path must be relative"));
    }
    for segment in relative_path.split('/') {
        match segment {
            "" => return Err(ArtifactError::invalid_path(relative_path, "empty path segment")),
            "." | ".." => {
                return Err(ArtifactError::invalid_path(
                    relative_path,
                    "dot segments are not allowed",
                ))
            }
            _ => {}
        }
    }
    Ok(())
}

/// `prefix + job + "/" + build + "/artifacts/" + relative_path`, encoded.
///
/// The prefix is taken as configured: an empty prefix contributes nothing and a
/// prefix without a trailing slash is not corrected.
pub fn resolve(
    config: &RepositoryConfig,
    build: &BuildIdentity,
    relative_path: &str,
) -> Result<RemoteKey, ArtifactError> {
    validate_relative_path(relative_path)?;

    let key = format!(
        "{}{}/{}/{}/{}",
        encode_segments(&config.prefix),
        encode_segments(build.job_full_name()),
        build.build_number(),
        ARTIFACTS_SEGMENT,
        encode_segments(relative_path),
    );
    Ok(RemoteKey::from_encoded(key))
}

pub fn validate_stash_name(stash_name: &str) -> Result<(), ArtifactError> {
    if stash_name.trim().is_empty() {
        return Err(ArtifactError::invalid_path(stash_name, "stash name is empty"));
    }
    if stash_name.contains('/') {
        return Err(ArtifactError::invalid_path(
            stash_name,
            "stash name must not contain '/'",
        ));
    }
    Ok(())
}

/// Key of the bundle backing a stash.
pub fn stash_key(
    config: &RepositoryConfig,
    build: &BuildIdentity,
    stash_name: &str,
) -> Result<RemoteKey, ArtifactError> {
    validate_stash_name(stash_name)?;
    resolve(
        config,
        build,
        &format!("{}/{}{}", STASH_DIR, stash_name, STASH_EXTENSION),
    )
}
