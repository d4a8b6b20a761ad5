use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::content::is_regular_file;
use crate::error::ConfigError;

/// Name of the optional configuration file in the exercise directory.
pub const CONFIG_FILE: &str = "expub.toml";

/// Local layout of one exercise directory.
///
/// ```text
/// <root>/            repository name = final path component
///   README.md        shared readme, promoted into every branch (optional)
///   main/            synced to branch `main`
///   solution/        synced to branch `solution`
///   expub.toml       optional configuration
/// ```
#[derive(Debug, Clone)]
pub struct Layout {
    pub root: PathBuf,
    pub repo_name: String,
    /// `(branch, folder)` pairs in sync order.
    pub folders: Vec<(String, PathBuf)>,
    pub readme: Option<PathBuf>,
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

fn repo_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9._-]+$").expect("static regex"))
}

/// Derive the repository name from the directory name.
///
/// # Errors
/// [`ConfigError::InvalidRepositoryName`] when the name is not something
/// GitHub accepts as a repository name.
pub fn repo_name(root: &Path) -> Result<String, ConfigError> {
    let name = root
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    if name == "." || name == ".." || !repo_name_re().is_match(&name) {
        return Err(ConfigError::InvalidRepositoryName(name));
    }
    Ok(name)
}

/// Inspect `root` and check that a folder exists for every branch.
///
/// # Errors
/// - [`ConfigError::InvalidRepositoryName`] if the directory name is unusable.
/// - [`ConfigError::MissingFolder`] if a branch folder is absent.
pub fn layout(root: &Path, branches: &[String], readme: &str) -> Result<Layout, ConfigError> {
    let repo_name = repo_name(root)?;

    let mut folders = Vec::with_capacity(branches.len());
    for b in branches {
        let dir = root.join(b);
        if !dir.is_dir() {
            return Err(ConfigError::MissingFolder(dir));
        }
        folders.push((b.clone(), dir));
    }

    let readme_path = root.join(readme);
    let readme = match is_regular_file(&readme_path) {
        Ok(true) => Some(readme_path),
        Ok(false) => {
            log::info!("no shared readme at {}", readme_path.display());
            None
        }
        Err(e) => {
            log::warn!("cannot inspect {}: {}", readme_path.display(), e);
            None
        }
    };

    Ok(Layout {
        root: root.to_path_buf(),
        repo_name,
        folders,
        readme,
    })
}
