//! Artifact staging.
//!
//! Files mapped onto a cloud target travel through a bucket: the session
//! uploads them under a per-session key prefix and the target downloads them
//! during bootstrap.

mod http;

use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;

pub use http::HttpArtifactStore;

/// An object that was uploaded to the staging bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedArtifact {
    pub bucket: String,
    pub key: String,
    /// Where the target downloads the object from
    pub url: String,
    /// Header the target must send with the download, if the store needs one
    pub download_header: Option<String>,
}

/// A staged object and the path it must end up at on the target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedMapping {
    pub artifact: StagedArtifact,
    pub destination: String,
}

/// Object storage reachable from both the harness and its targets.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn upload(&self, local: &Path, bucket: &str, key: &str) -> Result<StagedArtifact>;

    /// Remove a staged object. Removing a missing object succeeds.
    async fn delete(&self, bucket: &str, key: &str) -> Result<()>;
}

/// Key for the `index`-th mapping of a session.
///
/// The session ID prefix keeps concurrent sessions sharing a bucket apart.
pub fn staging_key(session_id: &str, index: usize, source: &Path) -> String {
    let file_name = source
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "artifact".to_string());
    format!("farmprobe/{}/{:02}-{}", session_id, index, file_name)
}
