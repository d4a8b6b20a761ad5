use std::path::PathBuf;

use crate::content::{LocalFile, PathMapper, list_files};
use crate::error::{SyncErrorKind, TreeBuildError};
use crate::settings::Settings;

/// Root-level path the shared readme is published under in every branch.
pub const SHARED_README_PATH: &str = "README.md";

/// One folder to publish onto one branch.
#[derive(Debug, Clone)]
pub struct SyncJob {
    pub branch: String,
    pub folder: PathBuf,
    /// Shared readme living next to the folders, if any.
    pub readme: Option<PathBuf>,
    pub message: String,
}

/// Build one job per configured branch, in configuration order.
pub fn build_jobs(settings: &Settings) -> Vec<SyncJob> {
    settings
        .layout
        .folders
        .iter()
        .map(|(branch, folder)| SyncJob {
            branch: branch.clone(),
            folder: folder.clone(),
            readme: settings.layout.readme.clone(),
            message: settings.message_for(branch),
        })
        .collect()
}

impl SyncJob {
    pub fn mapper(&self) -> PathMapper {
        let m = PathMapper::new(&self.folder);
        match &self.readme {
            Some(r) => m.promote(r, SHARED_README_PATH),
            None => m,
        }
    }

    /// Enumerate the folder and map every file to its remote path.
    ///
    /// The shared readme takes precedence over a file inside the folder
    /// that would land on the same path; the folder's copy is skipped.
    ///
    /// # Errors
    /// - [`SyncErrorKind::Read`] if the folder cannot be listed.
    /// - [`TreeBuildError::InvalidPath`] for a name that cannot be expressed
    ///   as a tree path (e.g. not valid UTF-8).
    pub fn local_files(&self) -> Result<Vec<LocalFile>, SyncErrorKind> {
        let mapper = self.mapper();
        let promoted = mapper.promoted().map(|(_, remote)| remote.to_string());

        let mut out = Vec::new();
        for path in list_files(&self.folder)? {
            let remote = mapper
                .remote_path(&path)
                .ok_or_else(|| TreeBuildError::InvalidPath(path.to_string_lossy().into_owned()))?;
            if promoted.as_deref() == Some(remote.as_str()) {
                log::warn!(
                    "{} is shadowed by the shared readme in branch {}",
                    path.display(),
                    self.branch
                );
                continue;
            }
            out.push(LocalFile {
                absolute_path: path,
                remote_path: remote,
            });
        }

        if let Some((src, remote)) = mapper.promoted() {
            out.push(LocalFile {
                absolute_path: src.to_path_buf(),
                remote_path: remote.to_string(),
            });
        }
        Ok(out)
    }
}
