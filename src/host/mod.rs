//! Capabilities the synchronization engine consumes from the repository host.
//!
//! [`ObjectStore`] is the low-level git data API (blobs, trees, commits, refs)
//! scoped to one repository. [`Provisioner`] covers the single-call
//! repository management the publish command performs before syncing.
//! [`github`] implements both against the GitHub REST API and [`memory`]
//! implements the object store in memory.

pub mod github;
pub mod memory;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::RemoteError;

/// Identifier of a blob, tree or commit held by the host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(String);

impl ObjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transfer encoding used when uploading a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlobEncoding {
    #[serde(rename = "utf-8")]
    Utf8,
    #[serde(rename = "base64")]
    Base64,
}

/// File contents ready for upload, already classified as text or binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobContent {
    Text(String),
    Binary(Vec<u8>),
}

impl BlobContent {
    pub fn encoding(&self) -> BlobEncoding {
        match self {
            BlobContent::Text(_) => BlobEncoding::Utf8,
            BlobContent::Binary(_) => BlobEncoding::Base64,
        }
    }

    /// The payload as it goes over the wire for [`BlobContent::encoding`].
    pub fn wire_content(&self) -> String {
        match self {
            BlobContent::Text(s) => s.clone(),
            BlobContent::Binary(b) => STANDARD.encode(b),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            BlobContent::Text(s) => s.as_bytes(),
            BlobContent::Binary(b) => b,
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, BlobContent::Binary(_))
    }
}

/// Decode a wire payload back into raw bytes.
pub fn decode_wire(content: &str, encoding: BlobEncoding) -> Result<Vec<u8>, RemoteError> {
    match encoding {
        BlobEncoding::Utf8 => Ok(content.as_bytes().to_vec()),
        BlobEncoding::Base64 => {
            let cleaned: String = content.chars().filter(|c| !c.is_whitespace()).collect();
            STANDARD
                .decode(cleaned)
                .map_err(|e| RemoteError::Decode(format!("invalid base64 blob: {e}")))
        }
    }
}

/// One entry of a tree submission. Only regular files are ever written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub path: String,
    pub object_id: ObjectId,
}

impl TreeEntry {
    pub const MODE_FILE: &'static str = "100644";
}

/// Tip commit and root tree of an existing branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchState {
    pub branch: String,
    pub tip_commit: ObjectId,
    pub root_tree: ObjectId,
}

/// Low-level git data operations against one repository.
///
/// Implementations must be shareable across the upload thread pool.
pub trait ObjectStore: Send + Sync {
    fn create_blob(&self, content: &BlobContent) -> Result<ObjectId, RemoteError>;

    /// Create a tree. With `base`, entries are layered on top of that tree;
    /// without it the tree contains exactly `entries`.
    fn create_tree(
        &self,
        base: Option<&ObjectId>,
        entries: &[TreeEntry],
    ) -> Result<ObjectId, RemoteError>;

    fn create_commit(
        &self,
        tree: &ObjectId,
        parent: &ObjectId,
        message: &str,
    ) -> Result<ObjectId, RemoteError>;

    /// Root tree of a commit.
    fn commit_tree(&self, commit: &ObjectId) -> Result<ObjectId, RemoteError>;

    /// Tip of `branch`, or `None` when the branch does not exist.
    fn get_ref(&self, branch: &str) -> Result<Option<ObjectId>, RemoteError>;

    fn create_ref(&self, branch: &str, commit: &ObjectId) -> Result<(), RemoteError>;

    /// Move `branch` to `commit`. Hosts may refuse non-fast-forward moves.
    fn update_ref(&self, branch: &str, commit: &ObjectId) -> Result<(), RemoteError>;
}

/// A repository as seen by the provisioning step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoHandle {
    pub owner: String,
    pub name: String,
    pub default_branch: String,
    pub private: bool,
}

/// Options used when a repository is created or updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepoOptions {
    /// `None` keeps the current visibility (or the host default on creation).
    pub private: Option<bool>,
    pub template: bool,
}

/// An issue as listed by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub id: u64,
    pub number: u64,
    pub title: String,
}

/// Repository management calls made before synchronization.
pub trait Provisioner {
    /// The repository, or `None` when it does not exist.
    fn find_repository(&self, owner: &str, name: &str) -> Result<Option<RepoHandle>, RemoteError>;

    /// Create the repository if needed, otherwise update its settings.
    fn ensure_repository(
        &self,
        owner: &str,
        name: &str,
        opts: RepoOptions,
    ) -> Result<RepoHandle, RemoteError>;

    fn protect_branch(
        &self,
        repo: &RepoHandle,
        branch: &str,
        required_reviews: u32,
    ) -> Result<(), RemoteError>;

    fn list_issues(&self, repo: &RepoHandle) -> Result<Vec<Issue>, RemoteError>;

    fn create_issue(&self, repo: &RepoHandle, title: &str, body: &str)
    -> Result<Issue, RemoteError>;

    fn add_issue_card(&self, column_id: u64, issue: &Issue) -> Result<(), RemoteError>;

    fn grant_team(
        &self,
        repo: &RepoHandle,
        team_slug: &str,
        permission: Option<&str>,
    ) -> Result<(), RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_content_survives_wire_encoding() {
        let raw = vec![0u8, 159, 146, 150, b'\n', 0xff];
        let content = BlobContent::Binary(raw.clone());
        assert_eq!(content.encoding(), BlobEncoding::Base64);
        let back = decode_wire(&content.wire_content(), content.encoding()).unwrap();
        assert_eq!(back, raw);
    }

    #[test]
    fn text_content_is_sent_verbatim() {
        let content = BlobContent::Text("héllo\n".into());
        assert_eq!(content.encoding(), BlobEncoding::Utf8);
        assert_eq!(content.wire_content(), "héllo\n");
    }

    #[test]
    fn encoding_serializes_like_the_api_expects() {
        assert_eq!(serde_json::to_string(&BlobEncoding::Utf8).unwrap(), "\"utf-8\"");
        assert_eq!(
            serde_json::to_string(&BlobEncoding::Base64).unwrap(),
            "\"base64\""
        );
    }
}
