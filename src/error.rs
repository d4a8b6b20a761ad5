//! Error types shared by the synchronization engine and its collaborators.

use std::fmt;
use std::io;
use std::path::PathBuf;

use crate::host::ObjectId;

/// Problems detected before any remote call is made.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Neither `GITHUB_PAT` nor `GITHUB_TOKEN` is set.
    #[error("no GitHub access token found (set GITHUB_PAT)")]
    MissingCredential,

    /// The working directory name cannot be used as a repository name.
    #[error("invalid repository name derived from the working directory: {0:?}")]
    InvalidRepositoryName(String),

    /// A branch folder is missing next to the working directory.
    #[error("required folder not found: {}", .0.display())]
    MissingFolder(PathBuf),

    #[error("failed to read {}: {source}", path.display())]
    ReadConfig {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    ParseConfig {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// A local file could not be enumerated or read.
#[derive(Debug, thiserror::Error)]
#[error("failed to read {}: {source}", path.display())]
pub struct ReadError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

impl ReadError {
    pub fn new(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self {
            path: path.into(),
            source,
        }
    }
}

/// Failure of a call against the repository host.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// The host answered 404 for the requested resource.
    #[error("{0} not found")]
    NotFound(String),

    /// The host answered with a non-success status.
    #[error("{method} {url} failed with {status}: {message}")]
    Status {
        method: String,
        url: String,
        status: u16,
        message: String,
    },

    /// The request never produced a response.
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// The response did not have the expected shape.
    #[error("unexpected response: {0}")]
    Decode(String),

    /// The host refused the operation for a reason of its own.
    #[error("rejected: {0}")]
    Rejected(String),
}

impl RemoteError {
    pub fn is_not_found(&self) -> bool {
        match self {
            RemoteError::NotFound(_) => true,
            RemoteError::Status { status, .. } => *status == 404,
            _ => false,
        }
    }
}

/// A tree submission that is malformed or was refused by the host.
#[derive(Debug, thiserror::Error)]
pub enum TreeBuildError {
    #[error("duplicate tree path: {0}")]
    DuplicatePath(String),

    #[error("invalid tree path: {0:?}")]
    InvalidPath(String),

    #[error("host rejected tree: {0}")]
    Rejected(#[source] RemoteError),
}

/// The step of a branch synchronization that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStep {
    ResolveBranch,
    Bootstrap,
    ReadContent,
    UploadContent,
    BuildTree,
    Commit,
    AdvanceRef,
}

impl fmt::Display for SyncStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SyncStep::ResolveBranch => "resolve branch",
            SyncStep::Bootstrap => "bootstrap branch",
            SyncStep::ReadContent => "read content",
            SyncStep::UploadContent => "upload content",
            SyncStep::BuildTree => "build tree",
            SyncStep::Commit => "create commit",
            SyncStep::AdvanceRef => "advance ref",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SyncErrorKind {
    #[error(transparent)]
    Read(#[from] ReadError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Tree(#[from] TreeBuildError),

    /// The branch moved between resolution and the ref update.
    #[error("branch tip moved from {expected} to {found}")]
    RefConflict { expected: ObjectId, found: String },
}

/// Failure of one branch synchronization. Other branches are unaffected.
#[derive(Debug, thiserror::Error)]
#[error("sync of branch `{branch}` failed at step `{step}`: {kind}")]
pub struct SyncError {
    pub branch: String,
    pub step: SyncStep,
    #[source]
    pub kind: SyncErrorKind,
}

impl SyncError {
    pub fn new(branch: &str, step: SyncStep, kind: impl Into<SyncErrorKind>) -> Self {
        Self {
            branch: branch.to_string(),
            step,
            kind: kind.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_error_names_branch_and_step() {
        let err = SyncError::new(
            "solution",
            SyncStep::UploadContent,
            RemoteError::Rejected("blob too large".into()),
        );
        let msg = err.to_string();
        assert!(msg.contains("`solution`"));
        assert!(msg.contains("upload content"));
        assert!(msg.contains("blob too large"));
    }

    #[test]
    fn status_404_counts_as_not_found() {
        let err = RemoteError::Status {
            method: "GET".into(),
            url: "https://api.github.com/x".into(),
            status: 404,
            message: "Not Found".into(),
        };
        assert!(err.is_not_found());
        assert!(!RemoteError::Decode("x".into()).is_not_found());
    }
}
