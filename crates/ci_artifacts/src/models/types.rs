use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::models::error::ArtifactError;

/// Identity of one build of one job, assigned by the build engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawBuildIdentity")]
pub struct BuildIdentity {
    job_full_name: String,
    build_number: u64,
}

#[derive(Deserialize)]
struct RawBuildIdentity {
    job_full_name: String,
    build_number: u64,
}

impl TryFrom<RawBuildIdentity> for BuildIdentity {
    type Error = ArtifactError;

    fn try_from(raw: RawBuildIdentity) -> Result<Self, Self::Error> {
        BuildIdentity::new(raw.job_full_name, raw.build_number)
    }
}

impl BuildIdentity {
    pub fn new(job_full_name: impl Into<String>, build_number: u64) -> Result<Self, ArtifactError> {
        let job_full_name = job_full_name.into();
        if job_full_name.trim().is_empty() {
            return Err(ArtifactError::Configuration(
                "job full name must not be empty".to_string(),
            ));
        }
        if build_number == 0 {
            return Err(ArtifactError::Configuration(format!(
                "build number for {} must be positive",
                job_full_name
            )));
        }
        Ok(Self {
            job_full_name,
            build_number,
        })
    }

    pub fn job_full_name(&self) -> &str {
        &self.job_full_name
    }

    pub fn build_number(&self) -> u64 {
        self.build_number
    }
}

impl fmt::Display for BuildIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} #{}", self.job_full_name, self.build_number)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub relative_path: String,
}

/// Fully resolved, percent-encoded object path inside the base repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteKey(String);

impl RemoteKey {
    pub(crate) fn from_encoded(encoded: String) -> Self {
        Self(encoded)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RemoteKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A named transient bundle owned by a build.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StashRef {
    pub stash_name: String,
    pub owning_build: BuildIdentity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub key: RemoteKey,
    pub size: u64,
    pub sha256: String,
    pub recorded_at: DateTime<Utc>,
}

/// Artifacts archived for one build, keyed by relative path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    entries: BTreeMap<String, ManifestEntry>,
}

impl Manifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, artifact: ArtifactRef, entry: ManifestEntry) {
        self.entries.insert(artifact.relative_path, entry);
    }

    pub fn get(&self, relative_path: &str) -> Option<&ManifestEntry> {
        self.entries.get(relative_path)
    }

    pub fn contains(&self, relative_path: &str) -> bool {
        self.entries.contains_key(relative_path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ManifestEntry)> {
        self.entries.iter().map(|(path, entry)| (path.as_str(), entry))
    }

    /// Entries in `other` replace entries with the same relative path.
    pub fn merge(&mut self, other: Manifest) {
        self.entries.extend(other.entries);
    }
}

/// What the UI or CLI needs to fetch one archived artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadLink {
    pub relative_path: String,
    pub key: RemoteKey,
    pub url: Option<String>,
}

/// Upload source. File bodies are opened again on every attempt and streamed.
#[derive(Debug, Clone)]
pub enum ObjectBody {
    Bytes(Bytes),
    File(PathBuf),
}

impl ObjectBody {
    pub async fn size(&self) -> std::io::Result<u64> {
        match self {
            ObjectBody::Bytes(bytes) => Ok(bytes.len() as u64),
            ObjectBody::File(path) => Ok(tokio::fs::metadata(path).await?.len()),
        }
    }
}

impl From<Vec<u8>> for ObjectBody {
    fn from(data: Vec<u8>) -> Self {
        ObjectBody::Bytes(Bytes::from(data))
    }
}

impl From<&'static str> for ObjectBody {
    fn from(data: &'static str) -> Self {
        ObjectBody::Bytes(Bytes::from_static(data.as_bytes()))
    }
}

/// A file produced by the build, ready to be archived.
#[derive(Debug, Clone)]
pub struct ArtifactSource {
    pub relative_path: String,
    pub body: ObjectBody,
}

impl ArtifactSource {
    pub fn new(relative_path: impl Into<String>, body: impl Into<ObjectBody>) -> Self {
        Self {
            relative_path: relative_path.into(),
            body: body.into(),
        }
    }

    pub fn from_file(relative_path: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            relative_path: relative_path.into(),
            body: ObjectBody::File(path.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_identity_rejects_zero_and_empty() {
        assert!(BuildIdentity::new("job", 0).is_err());
        assert!(BuildIdentity::new("  ", 3).is_err());
        let build = BuildIdentity::new("folder/my job", 7).unwrap();
        assert_eq!(build.to_string(), "folder/my job #7");
    }

    #[test]
    fn deserialized_identities_are_validated() {
        let build: BuildIdentity =
            serde_json::from_str(r#"{"job_full_name":"folder/my job","build_number":7}"#).unwrap();
        assert_eq!(build, BuildIdentity::new("folder/my job", 7).unwrap());

        assert!(serde_json::from_str::<BuildIdentity>(r#"{"job_full_name":"job","build_number":0}"#).is_err());
        assert!(serde_json::from_str::<BuildIdentity>(r#"{"job_full_name":"","build_number":1}"#).is_err());
    }

    #[test]
    fn manifest_merge_overwrites_same_path() {
        let entry = |key: &str, size| ManifestEntry {
            key: RemoteKey::from_encoded(key.to_string()),
            size,
            sha256: String::new(),
            recorded_at: Utc::now(),
        };
        let artifact = |path: &str| ArtifactRef {
            relative_path: path.to_string(),
        };

        let mut first = Manifest::new();
        first.insert(artifact("a.txt"), entry("k/a.txt", 1));
        first.insert(artifact("b.txt"), entry("k/b.txt", 2));

        let mut second = Manifest::new();
        second.insert(artifact("b.txt"), entry("k/b.txt", 20));

        first.merge(second);
        assert_eq!(first.len(), 2);
        assert_eq!(first.get("b.txt").map(|e| e.size), Some(20));
    }

    #[test]
    fn manifest_serializes_keys_as_plain_strings() {
        let mut manifest = Manifest::new();
        manifest.insert(
            ArtifactRef {
                relative_path: "my artifact.txt".to_string(),
            },
            ManifestEntry {
                key: RemoteKey::from_encoded("job/1/artifacts/my%20artifact.txt".to_string()),
                size: 13,
                sha256: String::new(),
                recorded_at: Utc::now(),
            },
        );
        let json = serde_json::to_value(&manifest).unwrap();
        assert_eq!(
            json["entries"]["my artifact.txt"]["key"],
            "job/1/artifacts/my%20artifact.txt"
        );
        let back: Manifest = serde_json::from_value(json).unwrap();
        assert_eq!(back, manifest);
    }
}
